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


//! Media probing via FFprobe
//!
//! The `FileProber` trait is the seam between chapter resolution/planning and
//! the external prober. `FfprobeProber` is the production implementation;
//! tests substitute an in-memory prober.

use crate::audio::metadata::FileInfo;
use crate::error::{RenderError, Result};
use futures_util::future::try_join_all;
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, error, warn};

/// Something that can produce `FileInfo` for a media file
pub trait FileProber: Send + Sync {
    fn probe(&self, path: &Path) -> impl Future<Output = Result<FileInfo>> + Send;
}

/// Probes files by running `ffprobe`
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    ffprobe_path: PathBuf,
}

impl Default for FfprobeProber {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

impl FfprobeProber {
    pub fn new<P: Into<PathBuf>>(ffprobe_path: P) -> Self {
        Self {
            ffprobe_path: ffprobe_path.into(),
        }
    }

    /// Execute FFprobe and return its stdout
    ///
    /// Executes: ffprobe -i {path} -print_format json -show_chapters -show_format -v quiet -loglevel error
    async fn probe_with_ffprobe(&self, path: &Path) -> Result<String> {
        debug!("Probing {}", path.display());

        let output = Command::new(&self.ffprobe_path)
            .arg("-i")
            .arg(path.as_os_str())
            .arg("-print_format")
            .arg("json")
            .arg("-show_chapters")
            .arg("-show_format")
            .arg("-v")
            .arg("quiet")
            .arg("-loglevel")
            .arg("error")
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    RenderError::FfmpegNotFound
                } else {
                    RenderError::probe_failed(path, format!("Failed to execute ffprobe: {}", e))
                }
            })?;

        if !output.stderr.is_empty() {
            error!(
                "Error in file {}: {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr)
            );
        }

        if !output.status.success() {
            return Err(RenderError::probe_failed(
                path,
                format!("ffprobe exited with {}", output.status),
            ));
        }

        String::from_utf8(output.stdout).map_err(|e| {
            RenderError::probe_failed(path, format!("FFprobe output is not valid UTF-8: {}", e))
        })
    }

    /// Quick duration lookup
    ///
    /// Failures are logged and reported as `None`.
    pub async fn duration(&self, path: &Path) -> Option<f64> {
        let output = Command::new(&self.ffprobe_path)
            .arg("-v")
            .arg("error")
            .arg("-show_entries")
            .arg("format=duration")
            .arg("-of")
            .arg("default=noprint_wrappers=1:nokey=1")
            .arg(path.as_os_str())
            .output()
            .await;

        let parsed = match output {
            Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout)
                .trim()
                .parse::<f64>()
                .map_err(|e| e.to_string()),
            Ok(output) => Err(String::from_utf8_lossy(&output.stderr).trim().to_string()),
            Err(e) => Err(e.to_string()),
        };

        match parsed {
            Ok(duration) => Some(duration),
            Err(e) => {
                warn!("Failed to get duration of {}: {}", path.display(), e);
                None
            }
        }
    }
}

impl FileProber for FfprobeProber {
    async fn probe(&self, path: &Path) -> Result<FileInfo> {
        let json = self.probe_with_ffprobe(path).await?;
        FileInfo::from_probe_json(&json).map_err(|e| match e {
            RenderError::SerdeJsonError(_) | RenderError::InvalidInput(_) => {
                RenderError::probe_failed(path, e.to_string())
            }
            other => other,
        })
    }
}

/// Probe every path, keeping the input order
pub async fn probe_all<P: FileProber>(
    prober: &P,
    paths: &[PathBuf],
) -> Result<Vec<(PathBuf, FileInfo)>> {
    let infos = try_join_all(paths.iter().map(|path| prober.probe(path))).await?;
    Ok(paths.iter().cloned().zip(infos).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_ffprobe_binary() {
        let prober = FfprobeProber::new("/nonexistent/bin/ffprobe");
        let err = prober.probe(Path::new("book.mp3")).await.unwrap_err();
        assert!(matches!(err, RenderError::FfmpegNotFound));
    }

    #[tokio::test]
    async fn test_nonzero_exit_fails() {
        let prober = FfprobeProber::new("false");
        let err = prober.probe(Path::new("book.mp3")).await.unwrap_err();
        assert!(matches!(err, RenderError::ProbeFailed { .. }), "{:?}", err);
    }

    #[tokio::test]
    async fn test_unparseable_output_fails() {
        // echo exits 0 and prints its arguments, which is not JSON
        let prober = FfprobeProber::new("echo");
        let err = prober.probe(Path::new("book.mp3")).await.unwrap_err();
        match err {
            RenderError::ProbeFailed { path, .. } => assert_eq!(path, PathBuf::from("book.mp3")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_duration_failure_is_none() {
        let temp_dir = TempDir::new().unwrap();
        let prober = FfprobeProber::new(temp_dir.path().join("no-ffprobe"));
        assert!(prober.duration(&temp_dir.path().join("a.mp3")).await.is_none());
    }
}
