// audiofeed-core - Audiobook chapter rendering for podcast feeds
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Render job descriptors

use crate::audio::metadata::FileInfo;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A time range of one input file
///
/// `None` bounds mean the file's own start or end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSubset {
    pub path: PathBuf,
    pub start: Option<f64>,
    pub end: Option<f64>,
}

impl FileSubset {
    pub fn new(path: impl Into<PathBuf>, start: Option<f64>, end: Option<f64>) -> Self {
        Self {
            path: path.into(),
            start,
            end,
        }
    }

    /// The whole of `path`
    pub fn whole(path: impl Into<PathBuf>) -> Self {
        Self::new(path, None, None)
    }

    /// True when this subset is the entire file
    pub fn is_whole_file(&self) -> bool {
        self.start.map_or(true, |s| s == 0.0) && self.end.is_none()
    }
}

/// How a job will be executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobKind {
    /// Byte-for-byte copy of one whole file
    Copy,
    /// Trim of a single input file
    Extract,
    /// Concatenation of several files
    Merge,
}

/// One output file to produce
#[derive(Debug, Clone, PartialEq)]
pub struct RenderJob {
    pub inputs: Vec<FileSubset>,
    pub out_path: PathBuf,
    pub out_file_info: FileInfo,
}

impl RenderJob {
    pub fn new(inputs: Vec<FileSubset>, out_path: impl Into<PathBuf>, out_file_info: FileInfo) -> Self {
        Self {
            inputs,
            out_path: out_path.into(),
            out_file_info,
        }
    }

    /// Classify by subset shape
    pub fn kind(&self) -> JobKind {
        match self.inputs.as_slice() {
            [only] if only.is_whole_file() => JobKind::Copy,
            [first, rest @ ..] if rest.iter().all(|s| s.path == first.path) => JobKind::Extract,
            _ => JobKind::Merge,
        }
    }

    pub fn is_copy(&self) -> bool {
        self.kind() == JobKind::Copy
    }

    /// Collapse subsets of a single file into one range
    ///
    /// Only meaningful for extract jobs.
    pub fn extract_range(&self) -> Option<FileSubset> {
        let first = self.inputs.first()?;
        let last = self.inputs.last()?;
        Some(FileSubset {
            path: first.path.clone(),
            start: first.start,
            end: last.end,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(inputs: Vec<FileSubset>) -> RenderJob {
        RenderJob::new(inputs, "/out/Part0.mp3", FileInfo::default())
    }

    #[test]
    fn test_copy_classification() {
        assert_eq!(job(vec![FileSubset::whole("a.mp3")]).kind(), JobKind::Copy);
        assert_eq!(
            job(vec![FileSubset::new("a.mp3", Some(0.0), None)]).kind(),
            JobKind::Copy
        );
    }

    #[test]
    fn test_extract_classification() {
        assert_eq!(
            job(vec![FileSubset::new("a.mp3", Some(10.0), None)]).kind(),
            JobKind::Extract
        );
        assert_eq!(
            job(vec![FileSubset::new("a.mp3", None, Some(30.0))]).kind(),
            JobKind::Extract
        );
        assert_eq!(
            job(vec![
                FileSubset::new("a.mp3", Some(10.0), Some(20.0)),
                FileSubset::new("a.mp3", Some(20.0), Some(30.0)),
            ])
            .kind(),
            JobKind::Extract
        );
    }

    #[test]
    fn test_merge_classification() {
        let merge = job(vec![FileSubset::whole("a.mp3"), FileSubset::whole("b.mp3")]);
        assert_eq!(merge.kind(), JobKind::Merge);
        assert_eq!(job(vec![]).kind(), JobKind::Merge);
    }

    #[test]
    fn test_extract_range() {
        let j = job(vec![
            FileSubset::new("a.mp3", Some(10.0), Some(20.0)),
            FileSubset::new("a.mp3", Some(20.0), None),
        ]);
        assert_eq!(j.extract_range(), Some(FileSubset::new("a.mp3", Some(10.0), None)));
    }
}
