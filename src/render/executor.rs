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


//! Render job execution
//!
//! # Job Kinds
//! - **Copy**: the output is the input file, duplicated with `tokio::fs::copy`
//! - **Extract**: one FFmpeg run over a single input with `-ss`/`-to`
//! - **Merge**: one FFmpeg run over a concat-demuxer list file
//!
//! In both FFmpeg cases the output's metadata document is piped on stdin as
//! input 0, and the audio is input 1:
//!
//! ```text
//! ffmpeg -loglevel error -y -f ffmetadata -i pipe: [-ss S] [-to E] -i IN \
//!        -map 1 -map_metadata 0 -map_chapters 0 -c copy OUT
//! ffmpeg -loglevel error -y -f ffmetadata -i pipe: -f concat -safe 0 -i LIST \
//!        -map 1 -map_metadata 0 -map_chapters 0 (-c copy | -c:a aac -q:a 3 -c:v copy) OUT
//! ```
//!
//! Batches run concurrently, bounded by a semaphore.

use crate::config::RenderConfig;
use crate::error::{RenderError, Result};
use crate::render::job::{FileSubset, JobKind, RenderJob};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Containers that only take AAC audio
const AAC_CONTAINERS: &[&str] = &["m4b", "m4a", "mp4"];

/// Input extensions already carrying AAC audio
const AAC_INPUTS: &[&str] = &["m4b", "m4a", "mp4", "aac"];

/// Runs a batch of render jobs
///
/// Returns one result per job, in job order. Failures of one job never stop
/// its siblings.
pub trait JobRunner: Send + Sync + 'static {
    fn run_jobs(&self, jobs: Vec<RenderJob>) -> impl Future<Output = Vec<Result<()>>> + Send;
}

/// FFmpeg-backed job executor
#[derive(Debug, Clone)]
pub struct JobExecutor {
    ffmpeg_path: PathBuf,
    semaphore: Arc<Semaphore>,
}

impl JobExecutor {
    pub fn new<P: Into<PathBuf>>(ffmpeg_path: P, max_concurrent: usize) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn from_config(config: &RenderConfig) -> Self {
        Self::new(&config.ffmpeg_path, config.max_concurrent_renders)
    }

    /// Execute one job
    pub async fn execute(&self, job: &RenderJob) -> Result<()> {
        if let Some(parent) = job.out_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RenderError::file_io("Failed to create output directory", parent, e))?;
        }

        match job.kind() {
            JobKind::Copy => {
                let input = &job.inputs[0].path;
                info!("Copying {} to {}", input.display(), job.out_path.display());
                tokio::fs::copy(input, &job.out_path)
                    .await
                    .map_err(|e| RenderError::file_io("Failed to copy", input, e))?;
                Ok(())
            }
            JobKind::Extract => {
                if let Some(chapter) = job.out_file_info.chapters.as_ref().and_then(|c| c.first()) {
                    info!(
                        "Extracting chapter {} from {}",
                        chapter.num,
                        job.inputs[0].path.display()
                    );
                }
                let command = self.extract_command(job)?;
                let document = extract_metadata_document(job);
                self.run_ffmpeg(&command, document, &job.out_path).await
            }
            JobKind::Merge => {
                info!(
                    "Merging {} input(s) into {}",
                    job.inputs.len(),
                    job.out_path.display()
                );
                let temp_dir = tokio::task::spawn_blocking(tempfile::tempdir).await??;
                let list_path = temp_dir.path().join("input_files.txt");
                let list = concat_list(&job.inputs);
                debug!("file list:\n{}", list);
                tokio::fs::write(&list_path, list)
                    .await
                    .map_err(|e| RenderError::file_io("Failed to write concat list", &list_path, e))?;

                let command = self.merge_command(job, &list_path);
                let document = job.out_file_info.to_metadata_document();
                self.run_ffmpeg(&command, document, &job.out_path).await
            }
        }
    }

    /// Build the FFmpeg command for an extract job
    pub fn extract_command(&self, job: &RenderJob) -> Result<Vec<String>> {
        let range = job
            .extract_range()
            .ok_or_else(|| RenderError::invalid_input("Extract job without inputs"))?;

        let mut cmd = self.base_command();

        if let Some(start) = range.start.filter(|s| *s > 0.0) {
            cmd.push("-ss".to_string());
            cmd.push(format!("{:.3}", start));
        }
        if let Some(end) = range.end {
            cmd.push("-to".to_string());
            cmd.push(format!("{:.3}", end));
        }

        cmd.push("-i".to_string());
        cmd.push(range.path.to_string_lossy().to_string());
        cmd.extend(mapping_args());
        cmd.push("-c".to_string());
        cmd.push("copy".to_string());
        cmd.push(job.out_path.to_string_lossy().to_string());

        Ok(cmd)
    }

    /// Build the FFmpeg command for a merge job reading `list_path`
    pub fn merge_command(&self, job: &RenderJob, list_path: &Path) -> Vec<String> {
        let mut cmd = self.base_command();
        cmd.extend(
            ["-f", "concat", "-safe", "0", "-i"]
                .iter()
                .map(|s| s.to_string()),
        );
        cmd.push(list_path.to_string_lossy().to_string());
        cmd.extend(mapping_args());

        if needs_aac_reencode(job) {
            cmd.extend(
                ["-c:a", "aac", "-q:a", "3", "-c:v", "copy"]
                    .iter()
                    .map(|s| s.to_string()),
            );
        } else {
            cmd.push("-c".to_string());
            cmd.push("copy".to_string());
        }

        cmd.push(job.out_path.to_string_lossy().to_string());
        cmd
    }

    /// Execute a batch with bounded concurrency
    pub async fn render_jobs(&self, jobs: Vec<RenderJob>) -> Vec<Result<()>> {
        let handles: Vec<_> = jobs
            .into_iter()
            .map(|job| {
                let executor = self.clone();
                tokio::spawn(async move {
                    let _permit = executor
                        .semaphore
                        .acquire()
                        .await
                        .map_err(|e| RenderError::InvalidState(format!("Semaphore closed: {}", e)))?;
                    executor.execute(&job).await
                })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(match handle.await {
                Ok(result) => result,
                Err(e) => Err(RenderError::from(e)),
            });
        }
        results
    }

    fn base_command(&self) -> Vec<String> {
        [
            &*self.ffmpeg_path.to_string_lossy(),
            "-loglevel",
            "error",
            "-y",
            "-f",
            "ffmetadata",
            "-i",
            "pipe:",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    /// Run FFmpeg with `document` on stdin
    async fn run_ffmpeg(&self, command: &[String], document: String, output: &Path) -> Result<()> {
        debug!("Executing ffmpeg command: {:?}", command);

        let mut child = Command::new(&command[0])
            .args(&command[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    RenderError::FfmpegNotFound
                } else {
                    RenderError::file_io("Failed to spawn ffmpeg", output, e)
                }
            })?;

        let mut stdin = child.stdin.take().ok_or_else(|| {
            RenderError::InvalidState("Failed to capture ffmpeg stdin".to_string())
        })?;

        let write_metadata = async move {
            let result = stdin.write_all(document.as_bytes()).await;
            drop(stdin);
            result
        };

        let (written, finished) = tokio::join!(write_metadata, child.wait_with_output());
        let result = finished?;

        if let Err(e) = written {
            warn!("Failed to pipe metadata to ffmpeg: {}", e);
        }

        if !result.stdout.is_empty() {
            info!("{}", String::from_utf8_lossy(&result.stdout));
        }
        if !result.stderr.is_empty() {
            error!("{}", String::from_utf8_lossy(&result.stderr));
        }

        if !result.status.success() {
            return Err(RenderError::EncodeFailed {
                exit_code: result.status.code(),
                output: output.to_path_buf(),
            });
        }

        Ok(())
    }
}

impl JobRunner for JobExecutor {
    async fn run_jobs(&self, jobs: Vec<RenderJob>) -> Vec<Result<()>> {
        self.render_jobs(jobs).await
    }
}

/// Concat-demuxer list for `subsets`
///
/// Single quotes in paths are closed, escaped and reopened (`'\''`).
pub fn concat_list(subsets: &[FileSubset]) -> String {
    subsets
        .iter()
        .map(|subset| {
            let path = subset.path.to_string_lossy().replace('\'', r"'\''");
            let mut entry = format!("file '{}'\n", path);
            if let Some(start) = subset.start {
                entry.push_str(&format!("inpoint {:.3}\n", start));
            }
            if let Some(end) = subset.end {
                entry.push_str(&format!("outpoint {:.3}\n", end));
                entry.push_str(&format!("duration {:.3}\n", end - subset.start.unwrap_or(0.0)));
            }
            entry
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn mapping_args() -> impl Iterator<Item = String> {
    ["-map", "1", "-map_metadata", "0", "-map_chapters", "0"]
        .into_iter()
        .map(String::from)
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// True when the output container needs AAC and some input is not AAC
fn needs_aac_reencode(job: &RenderJob) -> bool {
    AAC_CONTAINERS.contains(&extension_of(&job.out_path).as_str())
        && job
            .inputs
            .iter()
            .any(|s| !AAC_INPUTS.contains(&extension_of(&s.path).as_str()))
}

/// Extract outputs get `title` and `track` tags from their chapter when absent
fn extract_metadata_document(job: &RenderJob) -> String {
    let mut info = job.out_file_info.clone();
    if let Some(chapter) = info.chapters.as_ref().and_then(|c| c.first()).cloned() {
        let tags = &mut info.format_info.tags;
        tags.entry("title".to_string())
            .or_insert_with(|| chapter.title.clone().unwrap_or_default());
        tags.entry("track".to_string())
            .or_insert_with(|| chapter.num.to_string());
    }
    info.to_metadata_document()
}
