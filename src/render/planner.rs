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


//! Render job planning
//!
//! Turns probed input files into `RenderJob` descriptors. Planning is pure:
//! nothing here touches the filesystem or spawns processes.
//!
//! # Strategies
//! - `single_file_chaptered_jobs` - every input merged into one chaptered file
//! - `chapter_split_jobs` - one output per chapter, stitching chapters that
//!   straddle a file boundary back together
//! - `segment_jobs` - chapters grouped into duration-balanced parts

use crate::audio::chapters::{resolve, DURATION_TOLERANCE};
use crate::audio::metadata::{ChapterInfo, FileInfo};
use crate::error::{RenderError, Result};
use crate::render::job::{FileSubset, RenderJob};
use crate::render::segmenter::{segment, CostFn, Scorable};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default base name for chapter outputs
pub const DEFAULT_CHAPTER_BASE: &str = "Chapter";

/// One chapter as an input to the segmenter
#[derive(Debug, Clone)]
pub struct SegmentUnit {
    pub path: PathBuf,
    pub chapter: ChapterInfo,
    /// Duration of the whole source file
    pub source_duration: f64,
    /// Information for an output holding only this chapter
    pub file_info: FileInfo,
}

impl Scorable for SegmentUnit {
    fn duration(&self) -> f64 {
        self.chapter.duration()
    }
}

/// Plan one output merging every input, keeping (or synthesizing) chapters
///
/// When no input has embedded chapters, each file becomes one chapter.
pub fn single_file_chaptered_jobs(
    files: &[(PathBuf, FileInfo)],
    out_dir: &Path,
) -> Result<Vec<RenderJob>> {
    let (first_path, _) = files
        .first()
        .ok_or_else(|| RenderError::invalid_input("No input files to render"))?;

    let mut infos: Vec<FileInfo> = files.iter().map(|(_, info)| info.clone()).collect();

    if !infos.iter().any(FileInfo::has_chapters) {
        let mut per_file: HashMap<PathBuf, Vec<ChapterInfo>> = HashMap::new();
        for (path, chapter) in resolve(files, true)? {
            per_file.entry(path).or_default().push(chapter);
        }

        for ((path, _), info) in files.iter().zip(infos.iter_mut()) {
            *info = info.with_chapters(per_file.get(path).cloned().unwrap_or_default());
        }
    }

    let merged = merge_all(&infos)?;

    let stem = first_path
        .file_stem()
        .ok_or_else(|| RenderError::InvalidPath(first_path.display().to_string()))?;
    let mut out_name = stem.to_os_string();
    out_name.push(".m4b");
    let out_path = out_dir.join(out_name);

    debug!("Adding job to generate {}", out_path.display());

    let inputs = files.iter().map(|(path, _)| FileSubset::whole(path)).collect();
    Ok(vec![RenderJob::new(inputs, out_path, merged)])
}

/// Plan one output per resolved chapter
///
/// Files without embedded chapters contribute nothing. A chapter that begins
/// part-way into a new file continues the previous chapter's job, which is
/// extended with the head of the new file.
pub fn chapter_split_jobs(
    files: &[(PathBuf, FileInfo)],
    out_dir: &Path,
    base_name: Option<&str>,
) -> Result<Vec<RenderJob>> {
    let (first_path, _) = files
        .first()
        .ok_or_else(|| RenderError::invalid_input("No input files to render"))?;

    let base_name = base_name.unwrap_or(DEFAULT_CHAPTER_BASE);
    let ext = dotted_extension(first_path);
    let durations = source_durations(files);

    let chapters = resolve(files, false)?;
    let width = match chapters.iter().map(|(_, c)| c.num).max() {
        Some(max_num) => padding_width(max_num),
        None => return Ok(Vec::new()),
    };

    let mut jobs: Vec<RenderJob> = Vec::new();
    let mut last_file: Option<&Path> = None;

    for (path, chapter) in &chapters {
        let out_path = out_dir.join(format!(
            "{}{:0width$}{}",
            base_name,
            chapter.num,
            ext,
            width = width
        ));
        debug!("Adding job to generate {}", out_path.display());

        if last_file != Some(path.as_path()) && chapter.start_time > 0.0 {
            if let Some(previous) = jobs.pop() {
                jobs.push(extend_with_head(previous, path, chapter.start_time));
            }
        }

        let source_duration = durations.get(path.as_path()).copied().flatten();
        let subset = FileSubset::new(
            path.clone(),
            open_start(chapter.start_time),
            open_end(chapter.end_time, source_duration),
        );

        let file_info = file_info_for(files, path)?.trimmed_to_chapter(chapter);
        jobs.push(RenderJob::new(vec![subset], out_path, file_info));
        last_file = Some(path.as_path());
    }

    Ok(jobs)
}

/// Plan duration-balanced parts
///
/// Chapters are resolved with the one-chapter-per-file fallback, grouped by
/// the segmenter under `cost`, and each group becomes one output.
pub fn segment_jobs(
    files: &[(PathBuf, FileInfo)],
    out_dir: &Path,
    cost: &CostFn,
) -> Result<Vec<RenderJob>> {
    let units = segment_units(files)?;
    let ext = match files.first() {
        Some((path, _)) => dotted_extension(path),
        None => return Err(RenderError::invalid_input("No input files to render")),
    };

    let groups = segment(&units, cost);
    let width = padding_width(groups.len() as i64);

    let mut jobs = Vec::with_capacity(groups.len());
    for (index, group) in groups.into_iter().enumerate() {
        let out_path = out_dir.join(format!("Part{:0width$}{}", index, ext, width = width));
        debug!(
            "Adding job to generate {} from {} chapter(s)",
            out_path.display(),
            group.len()
        );

        let job = match group {
            [unit] => {
                let subset = FileSubset::new(
                    unit.path.clone(),
                    open_start(unit.chapter.start_time),
                    open_end(unit.chapter.end_time, Some(unit.source_duration)),
                );
                RenderJob::new(vec![subset], out_path, unit.file_info.clone())
            }
            _ => {
                let infos: Vec<FileInfo> = group.iter().map(|u| u.file_info.clone()).collect();
                let subsets = group
                    .iter()
                    .map(|u| {
                        FileSubset::new(
                            u.path.clone(),
                            open_start(u.chapter.start_time),
                            open_end(u.chapter.end_time, Some(u.source_duration)),
                        )
                    })
                    .collect();
                RenderJob::new(subsets, out_path, merge_all(&infos)?)
            }
        };
        jobs.push(job);
    }

    Ok(jobs)
}

/// Build segmenter units from resolved (fallback-enabled) chapters
pub fn segment_units(files: &[(PathBuf, FileInfo)]) -> Result<Vec<SegmentUnit>> {
    resolve(files, true)?
        .into_iter()
        .map(|(path, chapter)| {
            let source = file_info_for(files, &path)?;
            let source_duration = source.duration().unwrap_or(chapter.end_time);
            let file_info = source.trimmed_to_chapter(&chapter);
            Ok(SegmentUnit {
                path,
                chapter,
                source_duration,
                file_info,
            })
        })
        .collect()
}

/// Left fold of `FileInfo::merge`
pub fn merge_all(infos: &[FileInfo]) -> Result<FileInfo> {
    let (first, rest) = infos
        .split_first()
        .ok_or_else(|| RenderError::invalid_input("Nothing to merge"))?;
    rest.iter().try_fold(first.clone(), |acc, next| acc.merge(next))
}

/// Digits needed for the largest number in a sequence
pub fn padding_width(max_num: i64) -> usize {
    max_num.max(0).to_string().len()
}

fn extend_with_head(previous: RenderJob, path: &Path, head_end: f64) -> RenderJob {
    let mut inputs = previous.inputs;
    inputs.push(FileSubset::new(path, None, Some(head_end)));

    let mut info = previous.out_file_info;
    if let Some(chapter) = info.chapters.as_mut().and_then(|c| c.first_mut()) {
        chapter.end_time += head_end;
    }
    if let Some(duration) = info.format_info.duration.as_mut() {
        *duration += head_end;
    }

    RenderJob::new(inputs, previous.out_path, info)
}

fn open_start(start: f64) -> Option<f64> {
    if start == 0.0 {
        None
    } else {
        Some(start)
    }
}

/// `None` when `end` is the end of the file, within tolerance
fn open_end(end: f64, source_duration: Option<f64>) -> Option<f64> {
    match source_duration {
        Some(duration) if (end - duration).abs() < DURATION_TOLERANCE => None,
        _ => Some(end),
    }
}

fn dotted_extension(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default()
}

fn source_durations(files: &[(PathBuf, FileInfo)]) -> HashMap<&Path, Option<f64>> {
    files
        .iter()
        .map(|(path, info)| (path.as_path(), info.duration()))
        .collect()
}

fn file_info_for<'a>(files: &'a [(PathBuf, FileInfo)], path: &Path) -> Result<&'a FileInfo> {
    files
        .iter()
        .find(|(p, _)| p == path)
        .map(|(_, info)| info)
        .ok_or_else(|| RenderError::FileNotFound(path.display().to_string()))
}
