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


//! Render orchestration
//!
//! `RenderOrchestrator::trigger` takes one entry and render mode from
//! "nothing rendered" to a finished output directory:
//!
//! 1. Admit the output directory (duplicate triggers are dropped)
//! 2. Clear stale output, probe the inputs and plan the jobs
//! 3. Write the `.file_metadata` sidecar (paths, chapter info, content hashes)
//! 4. Either mark the directory `.default` (every job is a plain copy) or
//!    hand the batch to a supervisory task
//!
//! The supervisor owns the admission guard, so the directory stays admitted
//! until every job has finished. On full success it drops the cached feed
//! document and writes `.render_complete`.
//!
//! # Output Directory Layout
//!
//! ```text
//! <media_cache_path>/<entry id>/<mode>/
//!     Chapter01.mp3 ...        rendered files
//!     .file_metadata           JSON sidecar, written before rendering starts
//!     .render_complete         every job succeeded
//!     .default                 no derived output needed, serve the originals
//!     .last_retrieved          RFC 3339 timestamp of the last feed request
//!     <entry id>-<mode>.xml    cached feed document (owned by the feed layer)
//! ```

use crate::audio::metadata::FileInfo;
use crate::audio::probe::{probe_all, FfprobeProber, FileProber};
use crate::config::RenderConfig;
use crate::error::{RenderError, Result};
use crate::file::hash::hash_random;
use crate::file::manager::FileManager;
use crate::file::paths::{chapter_base_name, output_dir};
use crate::file::scanner::audio_files;
use crate::render::admission::{AdmissionControl, AdmissionGuard};
use crate::render::executor::{JobExecutor, JobRunner};
use crate::render::job::RenderJob;
use crate::render::planner::{chapter_split_jobs, segment_jobs, single_file_chaptered_jobs};
use crate::render::segmenter::asymmetric_cost;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Sidecar with the planned outputs' metadata and hashes
pub const FILE_METADATA: &str = ".file_metadata";

/// Marker: every job of the batch succeeded
pub const RENDER_COMPLETE: &str = ".render_complete";

/// Marker: the entry needs no derived output
pub const DEFAULT_MARKER: &str = ".default";

/// Timestamp of the last feed request, read by cache eviction
pub const LAST_RETRIEVED: &str = ".last_retrieved";

/// Derived rendition to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RenderMode {
    /// One merged, chaptered file
    SingleFile,
    /// One file per chapter
    Chapters,
    /// Duration-balanced parts
    Segmented,
}

impl RenderMode {
    pub const ALL: [RenderMode; 3] = [
        RenderMode::SingleFile,
        RenderMode::Chapters,
        RenderMode::Segmented,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RenderMode::SingleFile => "SINGLEFILE",
            RenderMode::Chapters => "CHAPTERS",
            RenderMode::Segmented => "SEGMENTED",
        }
    }

    /// Name of the mode's output directory
    pub fn dir_name(&self) -> &'static str {
        match self {
            RenderMode::SingleFile => "singlefile",
            RenderMode::Chapters => "chapters",
            RenderMode::Segmented => "segmented",
        }
    }
}

impl fmt::Display for RenderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RenderMode {
    type Err = RenderError;

    fn from_str(s: &str) -> Result<Self> {
        RenderMode::ALL
            .into_iter()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| RenderError::invalid_input(format!("Unknown render mode: {}", s)))
    }
}

/// Where an (entry, mode) pair is in its render lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderState {
    NotStarted,
    Rendering,
    Complete,
    Default,
}

/// One audiobook as seen by the renderer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderEntry {
    /// Stable entry identifier, names the output directory and feed document
    pub id: String,

    /// Directory scanned for audio when `files` is empty (relative to `media_base`)
    pub path: PathBuf,

    /// Explicit ordered audio files, relative to `media_base`
    #[serde(default)]
    pub files: Vec<PathBuf>,

    /// Root the entry's paths are relative to
    pub media_base: PathBuf,

    /// Seed for partial content hashing
    pub hash_seed: u64,

    /// Precomputed partial hashes, keyed by path relative to `media_base`
    #[serde(default)]
    pub file_hashes: HashMap<PathBuf, String>,

    /// Book title, used to name per-chapter outputs
    #[serde(default)]
    pub title: Option<String>,
}

impl RenderEntry {
    /// Absolute input files in playback order
    pub async fn input_files(&self) -> Result<Vec<PathBuf>> {
        if self.files.is_empty() {
            audio_files(&self.media_base.join(&self.path)).await
        } else {
            Ok(self.files.iter().map(|f| self.media_base.join(f)).collect())
        }
    }

    /// Name of the cached feed document for `mode`
    pub fn feed_document_name(&self, mode: RenderMode) -> String {
        format!("{}-{}.xml", self.id, mode.dir_name())
    }
}

/// One planned output, as recorded in the sidecar
#[derive(Debug, Clone, PartialEq)]
pub struct FileMetadata {
    /// Output path relative to the output directory
    pub file_path: PathBuf,
    pub file_info: FileInfo,
    pub file_hash: String,
}

#[derive(Serialize, Deserialize)]
struct SidecarRecord {
    file_path: String,
    file_info: serde_json::Value,
    file_hash: String,
}

impl FileMetadata {
    fn to_record(&self) -> SidecarRecord {
        SidecarRecord {
            file_path: self.file_path.to_string_lossy().into_owned(),
            file_info: self.file_info.to_json_value(),
            file_hash: self.file_hash.clone(),
        }
    }

    fn from_record(record: SidecarRecord) -> Result<Self> {
        Ok(Self {
            file_path: PathBuf::from(record.file_path),
            file_info: FileInfo::from_json_value(record.file_info)?,
            file_hash: record.file_hash,
        })
    }
}

/// Drives probing, planning and rendering for entries
pub struct RenderOrchestrator<P: FileProber, R: JobRunner> {
    prober: Arc<P>,
    runner: Arc<R>,
    config: RenderConfig,
    admission: AdmissionControl<PathBuf>,
    supervisors: Arc<Mutex<HashMap<PathBuf, JoinHandle<()>>>>,
}

impl<P: FileProber, R: JobRunner> Clone for RenderOrchestrator<P, R> {
    fn clone(&self) -> Self {
        Self {
            prober: Arc::clone(&self.prober),
            runner: Arc::clone(&self.runner),
            config: self.config.clone(),
            admission: self.admission.clone(),
            supervisors: Arc::clone(&self.supervisors),
        }
    }
}

impl RenderOrchestrator<FfprobeProber, JobExecutor> {
    /// Orchestrator backed by FFprobe and FFmpeg
    pub fn from_config(config: RenderConfig) -> Self {
        let prober = FfprobeProber::new(&config.ffprobe_path);
        let runner = JobExecutor::from_config(&config);
        Self::new(prober, runner, config)
    }
}

impl<P: FileProber, R: JobRunner> RenderOrchestrator<P, R> {
    pub fn new(prober: P, runner: R, config: RenderConfig) -> Self {
        Self {
            prober: Arc::new(prober),
            runner: Arc::new(runner),
            config,
            admission: AdmissionControl::new(),
            supervisors: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Output directory for `entry` rendered as `mode`
    pub fn output_dir(&self, entry: &RenderEntry, mode: RenderMode) -> PathBuf {
        output_dir(&self.config.media_cache_path, &entry.id, mode.dir_name())
    }

    fn files_for(&self, entry: &RenderEntry, mode: RenderMode) -> FileManager {
        FileManager::new(self.output_dir(entry, mode))
    }

    /// Start rendering `entry` as `mode` unless it is in flight or finished
    ///
    /// Returns once the jobs are planned and the sidecar is written; the
    /// transcode itself runs in the background. Planning errors are returned
    /// and leave the pair free to be triggered again.
    pub async fn trigger(&self, entry: &RenderEntry, mode: RenderMode) -> Result<RenderState> {
        let out_dir = self.output_dir(entry, mode);
        let files = FileManager::new(&out_dir);
        self.lock_supervisors().retain(|_, handle| !handle.is_finished());

        let guard = match self.admission.try_acquire(out_dir.clone()) {
            Some(guard) => guard,
            None => {
                debug!("Render already in flight for {}", out_dir.display());
                return Ok(RenderState::Rendering);
            }
        };

        if files.exists(RENDER_COMPLETE).await {
            return Ok(RenderState::Complete);
        }
        if files.exists(DEFAULT_MARKER).await {
            return Ok(RenderState::Default);
        }

        info!("Planning {} render for entry {}", mode, entry.id);
        files.clear_directory().await?;

        let jobs = self.plan(entry, mode, &out_dir).await?;
        self.write_file_metadata(entry, &jobs, &files).await?;

        if jobs.iter().all(RenderJob::is_copy) {
            info!("Entry {} needs no {} rendering", entry.id, mode);
            files.touch(DEFAULT_MARKER).await?;
            return Ok(RenderState::Default);
        }

        info!("Submitting {} render job(s) for entry {}", jobs.len(), entry.id);
        let handle = tokio::spawn(supervise(
            Arc::clone(&self.runner),
            jobs,
            files,
            entry.feed_document_name(mode),
            guard,
        ));

        self.lock_supervisors().insert(out_dir, handle);
        Ok(RenderState::Rendering)
    }

    /// Probe the entry's inputs and plan the jobs for `mode`
    pub async fn plan(
        &self,
        entry: &RenderEntry,
        mode: RenderMode,
        out_dir: &Path,
    ) -> Result<Vec<RenderJob>> {
        let inputs = entry.input_files().await?;
        if inputs.is_empty() {
            return Err(RenderError::invalid_input(format!(
                "Entry {} has no audio files",
                entry.id
            )));
        }

        let probed = probe_all(self.prober.as_ref(), &inputs).await?;

        match mode {
            RenderMode::SingleFile => single_file_chaptered_jobs(&probed, out_dir),
            RenderMode::Chapters => {
                let base_name = chapter_base_name(entry.title.as_deref())
                    .unwrap_or_else(|| self.config.chapter_base_name.clone());
                chapter_split_jobs(&probed, out_dir, Some(base_name.as_str()))
            }
            RenderMode::Segmented => {
                let cost = asymmetric_cost(
                    self.config.segment_target_seconds,
                    self.config.segment_pos_exponent,
                    self.config.segment_neg_exponent,
                );
                segment_jobs(&probed, out_dir, &cost)
            }
        }
    }

    /// Current lifecycle state of `entry` rendered as `mode`
    pub async fn state(&self, entry: &RenderEntry, mode: RenderMode) -> RenderState {
        let out_dir = self.output_dir(entry, mode);
        if self.admission.is_active(&out_dir) {
            return RenderState::Rendering;
        }

        let files = FileManager::new(out_dir);
        if files.exists(RENDER_COMPLETE).await {
            RenderState::Complete
        } else if files.exists(DEFAULT_MARKER).await {
            RenderState::Default
        } else {
            RenderState::NotStarted
        }
    }

    /// Wait for the supervisory task of `entry`/`mode`, if one is running
    pub async fn wait_idle(&self, entry: &RenderEntry, mode: RenderMode) -> Result<()> {
        let handle = self.lock_supervisors().remove(&self.output_dir(entry, mode));
        if let Some(handle) = handle {
            handle.await?;
        }
        Ok(())
    }

    /// Content hash of one planned output
    ///
    /// Built from the inputs' partial hashes, so it is known before the output
    /// exists and stays stable across re-renders of unchanged inputs.
    pub async fn content_hash(
        &self,
        entry: &RenderEntry,
        job: &RenderJob,
        out_dir: &Path,
    ) -> Result<String> {
        self.content_hash_cached(entry, job, out_dir, &mut HashMap::new())
            .await
    }

    async fn content_hash_cached(
        &self,
        entry: &RenderEntry,
        job: &RenderJob,
        out_dir: &Path,
        input_hashes: &mut HashMap<PathBuf, String>,
    ) -> Result<String> {
        let out_path = relative_to(&job.out_path, out_dir).to_string_lossy().into_owned();
        let duration = job.out_file_info.duration().unwrap_or(0.0);

        let mut parts: Vec<(String, String, f64)> = Vec::with_capacity(job.inputs.len());
        for subset in &job.inputs {
            let input_hash = match input_hashes.get(&subset.path) {
                Some(hash) => hash.clone(),
                None => {
                    let hash = self.input_hash(entry, &subset.path).await?;
                    input_hashes.insert(subset.path.clone(), hash.clone());
                    hash
                }
            };
            parts.push((input_hash, out_path.clone(), duration));
        }

        parts.sort_by(|a, b| {
            a.0.cmp(&b.0)
                .then_with(|| a.1.cmp(&b.1))
                .then_with(|| a.2.total_cmp(&b.2))
        });

        let mut hasher = Sha256::new();
        for (input_hash, out_path, duration) in &parts {
            hasher.update(input_hash.as_bytes());
            hasher.update(out_path.as_bytes());
            hasher.update(format!("{:?}", duration).as_bytes());
        }
        Ok(hex::encode(hasher.finalize()))
    }

    async fn input_hash(&self, entry: &RenderEntry, path: &Path) -> Result<String> {
        let relative = relative_to(path, &entry.media_base);
        if let Some(hash) = entry.file_hashes.get(relative) {
            return Ok(hash.clone());
        }

        debug!("Hashing {}", path.display());
        hash_random(
            path,
            entry.hash_seed,
            self.config.hash_amount,
            self.config.hash_block_size,
        )
        .await
    }

    async fn write_file_metadata(
        &self,
        entry: &RenderEntry,
        jobs: &[RenderJob],
        files: &FileManager,
    ) -> Result<()> {
        let mut input_hashes = HashMap::new();
        let mut records = Vec::with_capacity(jobs.len());
        for job in jobs {
            let file_hash = self
                .content_hash_cached(entry, job, files.root(), &mut input_hashes)
                .await?;
            let metadata = FileMetadata {
                file_path: relative_to(&job.out_path, files.root()).to_path_buf(),
                file_info: job.out_file_info.clone(),
                file_hash,
            };
            records.push(metadata.to_record());
        }

        let json = serde_json::to_vec(&records)?;
        files.write(FILE_METADATA, &json).await
    }

    /// Planned outputs recorded in the sidecar, in job order
    pub async fn read_file_metadata(
        &self,
        entry: &RenderEntry,
        mode: RenderMode,
    ) -> Result<Vec<FileMetadata>> {
        let files = self.files_for(entry, mode);
        let contents = files
            .read_optional(FILE_METADATA)
            .await?
            .ok_or_else(|| RenderError::FileNotFound(files.join(FILE_METADATA).display().to_string()))?;

        let records: Vec<SidecarRecord> = serde_json::from_str(&contents)?;
        records.into_iter().map(FileMetadata::from_record).collect()
    }

    /// JSON Chapters document for one rendered file, from the sidecar
    pub async fn chapter_document(
        &self,
        entry: &RenderEntry,
        mode: RenderMode,
        file_path: &Path,
    ) -> Result<Option<String>> {
        Ok(self
            .find_file_metadata(entry, mode, file_path)
            .await?
            .map(|m| m.file_info.chapter_document()))
    }

    /// Chapter descriptions for one rendered file, from the sidecar
    pub async fn chapter_description(
        &self,
        entry: &RenderEntry,
        mode: RenderMode,
        file_path: &Path,
    ) -> Result<Option<String>> {
        Ok(self
            .find_file_metadata(entry, mode, file_path)
            .await?
            .and_then(|m| m.file_info.chapter_description()))
    }

    async fn find_file_metadata(
        &self,
        entry: &RenderEntry,
        mode: RenderMode,
        file_path: &Path,
    ) -> Result<Option<FileMetadata>> {
        Ok(self
            .read_file_metadata(entry, mode)
            .await?
            .into_iter()
            .find(|m| m.file_path == file_path))
    }

    /// When the feed for `entry`/`mode` was last requested
    pub async fn read_access_time(
        &self,
        entry: &RenderEntry,
        mode: RenderMode,
    ) -> Result<Option<DateTime<Utc>>> {
        let files = self.files_for(entry, mode);
        let Some(contents) = files.read_optional(LAST_RETRIEVED).await? else {
            return Ok(None);
        };

        let timestamp = DateTime::parse_from_rfc3339(contents.trim()).map_err(|e| {
            RenderError::InvalidInput(format!(
                "Invalid timestamp in {}: {}",
                files.join(LAST_RETRIEVED).display(),
                e
            ))
        })?;
        Ok(Some(timestamp.with_timezone(&Utc)))
    }

    /// Record that the feed for `entry`/`mode` was just requested
    pub async fn update_access_time(&self, entry: &RenderEntry, mode: RenderMode) -> Result<()> {
        let files = self.files_for(entry, mode);
        files.ensure_directory_exists().await?;
        files
            .write(LAST_RETRIEVED, Utc::now().to_rfc3339().as_bytes())
            .await
    }

    fn lock_supervisors(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, JoinHandle<()>>> {
        self.supervisors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Run the batch, then mark the directory complete if nothing failed
///
/// Holds `guard` for its whole run; the output directory is released when
/// this returns, whatever happened.
async fn supervise<R: JobRunner>(
    runner: Arc<R>,
    jobs: Vec<RenderJob>,
    files: FileManager,
    feed_document: String,
    guard: AdmissionGuard<PathBuf>,
) {
    let outputs: Vec<PathBuf> = jobs.iter().map(|job| job.out_path.clone()).collect();
    let results = runner.run_jobs(jobs).await;

    let mut failures = 0;
    for (output, result) in outputs.iter().zip(&results) {
        if let Err(e) = result {
            failures += 1;
            error!("Rendering error for {}: {}", output.display(), e);
        }
    }

    if failures > 0 {
        warn!(
            "{} of {} job(s) failed in {}",
            failures,
            outputs.len(),
            files.root().display()
        );
    } else if let Err(e) = finish(&files, &feed_document).await {
        error!("Failed to mark {} complete: {}", files.root().display(), e);
    } else {
        info!("Render complete: {}", files.root().display());
    }

    drop(guard);
}

async fn finish(files: &FileManager, feed_document: &str) -> Result<()> {
    // The cached feed was generated against the old outputs
    files.remove(feed_document).await?;
    files.touch(RENDER_COMPLETE).await
}

fn relative_to<'a>(path: &'a Path, base: &Path) -> &'a Path {
    path.strip_prefix(base).unwrap_or(path)
}
