//! Integration tests for RenderOrchestrator
//!
//! Drives the whole trigger flow (probe, plan, sidecar, batch, markers) with
//! an in-memory prober and a job runner that counts batches instead of
//! invoking FFmpeg.

use audiofeed_core::audio::{ChapterInfo, FileInfo, FileProber, FormatInfo};
use audiofeed_core::render::{JobRunner, RenderJob};
use audiofeed_core::{
    RenderConfig, RenderEntry, RenderError, RenderMode, RenderOrchestrator, RenderState, Result,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Notify;

/// Serves canned probe results
struct FakeProber {
    files: HashMap<PathBuf, FileInfo>,
}

impl FileProber for FakeProber {
    async fn probe(&self, path: &Path) -> Result<FileInfo> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| RenderError::probe_failed(path, "unknown file"))
    }
}

/// Counts batches and writes placeholder outputs
#[derive(Clone, Default)]
struct CountingRunner {
    batches: Arc<AtomicUsize>,
    jobs: Arc<AtomicUsize>,
    gate: Option<Arc<Notify>>,
    fail_outputs: Vec<String>,
}

impl JobRunner for CountingRunner {
    async fn run_jobs(&self, jobs: Vec<RenderJob>) -> Vec<Result<()>> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        let mut results = Vec::with_capacity(jobs.len());
        for job in jobs {
            self.jobs.fetch_add(1, Ordering::SeqCst);
            let name = job.out_path.file_name().unwrap().to_string_lossy().into_owned();
            if self.fail_outputs.contains(&name) {
                results.push(Err(RenderError::EncodeFailed {
                    exit_code: Some(1),
                    output: job.out_path.clone(),
                }));
            } else {
                results.push(
                    tokio::fs::write(&job.out_path, b"rendered")
                        .await
                        .map_err(RenderError::from),
                );
            }
        }
        results
    }
}

struct Fixture {
    _temp_dir: TempDir,
    media_base: PathBuf,
    cache: PathBuf,
}

impl Fixture {
    async fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let media_base = temp_dir.path().join("media");
        let cache = temp_dir.path().join("cache");
        tokio::fs::create_dir_all(media_base.join("book")).await.unwrap();
        Self {
            media_base,
            cache,
            _temp_dir: temp_dir,
        }
    }

    async fn add_file(&self, name: &str, len: usize) -> PathBuf {
        let path = self.media_base.join("book").join(name);
        let bytes: Vec<u8> = (0..len).map(|i| (i * 31 % 251) as u8).collect();
        tokio::fs::write(&path, bytes).await.unwrap();
        path
    }

    fn entry(&self, files: &[&str]) -> RenderEntry {
        RenderEntry {
            id: "moby-dick".to_string(),
            path: PathBuf::from("book"),
            files: files.iter().map(|f| Path::new("book").join(f)).collect(),
            media_base: self.media_base.clone(),
            hash_seed: 1851,
            file_hashes: HashMap::new(),
            title: Some("Moby Dick".to_string()),
        }
    }

    fn orchestrator(
        &self,
        files: HashMap<PathBuf, FileInfo>,
        runner: CountingRunner,
    ) -> RenderOrchestrator<FakeProber, CountingRunner> {
        let config = RenderConfig {
            media_cache_path: self.cache.clone(),
            segment_target_seconds: 600.0,
            ..RenderConfig::default()
        };
        RenderOrchestrator::new(FakeProber { files }, runner, config)
    }
}

fn info(duration: f64, chapters: Option<Vec<ChapterInfo>>) -> FileInfo {
    FileInfo::new(
        FormatInfo {
            format_name: Some("mp3".to_string()),
            duration: Some(duration),
            ..FormatInfo::default()
        },
        chapters,
    )
}

fn three_chapters() -> FileInfo {
    info(
        300.0,
        Some(vec![
            ChapterInfo::new(1, 0.0, 100.0, Some("Loomings".into())),
            ChapterInfo::new(2, 100.0, 200.0, Some("The Carpet-Bag".into())),
            ChapterInfo::new(3, 200.0, 300.0, Some("The Spouter-Inn".into())),
        ]),
    )
}

#[tokio::test]
async fn test_concurrent_triggers_render_once() {
    let fixture = Fixture::new().await;
    let path = fixture.add_file("book.mp3", 10_000).await;
    let gate = Arc::new(Notify::new());
    let runner = CountingRunner {
        gate: Some(Arc::clone(&gate)),
        ..CountingRunner::default()
    };
    let orchestrator = fixture.orchestrator(
        HashMap::from([(path, three_chapters())]),
        runner.clone(),
    );
    let entry = fixture.entry(&["book.mp3"]);

    let (first, second) = tokio::join!(
        orchestrator.trigger(&entry, RenderMode::Chapters),
        orchestrator.trigger(&entry, RenderMode::Chapters),
    );
    assert_eq!(first.unwrap(), RenderState::Rendering);
    assert_eq!(second.unwrap(), RenderState::Rendering);

    // A trigger while the batch is running is dropped too
    assert_eq!(
        orchestrator.trigger(&entry, RenderMode::Chapters).await.unwrap(),
        RenderState::Rendering
    );

    gate.notify_one();
    orchestrator.wait_idle(&entry, RenderMode::Chapters).await.unwrap();

    assert_eq!(runner.batches.load(Ordering::SeqCst), 1);
    assert_eq!(runner.jobs.load(Ordering::SeqCst), 3);

    let out_dir = orchestrator.output_dir(&entry, RenderMode::Chapters);
    assert!(out_dir.join(".render_complete").exists());
    assert!(out_dir.join("Moby Dick-1.mp3").exists());
    assert!(out_dir.join("Moby Dick-3.mp3").exists());

    // Complete is terminal
    assert_eq!(
        orchestrator.trigger(&entry, RenderMode::Chapters).await.unwrap(),
        RenderState::Complete
    );
    assert_eq!(runner.batches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_sidecar_written_before_completion() {
    let fixture = Fixture::new().await;
    let path = fixture.add_file("book.mp3", 10_000).await;
    let gate = Arc::new(Notify::new());
    let runner = CountingRunner {
        gate: Some(Arc::clone(&gate)),
        ..CountingRunner::default()
    };
    let orchestrator = fixture.orchestrator(HashMap::from([(path, three_chapters())]), runner);
    let entry = fixture.entry(&["book.mp3"]);

    orchestrator.trigger(&entry, RenderMode::Chapters).await.unwrap();

    let out_dir = orchestrator.output_dir(&entry, RenderMode::Chapters);
    assert!(!out_dir.join(".render_complete").exists());
    assert_eq!(
        orchestrator.state(&entry, RenderMode::Chapters).await,
        RenderState::Rendering
    );

    let metadata = orchestrator
        .read_file_metadata(&entry, RenderMode::Chapters)
        .await
        .unwrap();
    let names: Vec<String> = metadata
        .iter()
        .map(|m| m.file_path.to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["Moby Dick-1.mp3", "Moby Dick-2.mp3", "Moby Dick-3.mp3"]);
    for record in &metadata {
        assert_eq!(record.file_info.duration(), Some(100.0));
        assert_eq!(record.file_hash.len(), 64);
    }
    assert_ne!(metadata[0].file_hash, metadata[1].file_hash);

    let document = orchestrator
        .chapter_document(&entry, RenderMode::Chapters, Path::new("Moby Dick-2.mp3"))
        .await
        .unwrap()
        .unwrap();
    let json: serde_json::Value = serde_json::from_str(&document).unwrap();
    assert_eq!(json["chapters"][0]["title"], "The Carpet-Bag");
    assert_eq!(json["chapters"][0]["startTime"], 0.0);

    gate.notify_one();
    orchestrator.wait_idle(&entry, RenderMode::Chapters).await.unwrap();
    assert_eq!(
        orchestrator.state(&entry, RenderMode::Chapters).await,
        RenderState::Complete
    );
}

#[tokio::test]
async fn test_hashes_stable_across_renders() {
    let fixture = Fixture::new().await;
    let path = fixture.add_file("book.mp3", 10_000).await;
    let orchestrator = fixture.orchestrator(
        HashMap::from([(path, three_chapters())]),
        CountingRunner::default(),
    );
    let entry = fixture.entry(&["book.mp3"]);

    orchestrator.trigger(&entry, RenderMode::Chapters).await.unwrap();
    orchestrator.wait_idle(&entry, RenderMode::Chapters).await.unwrap();
    let first = orchestrator
        .read_file_metadata(&entry, RenderMode::Chapters)
        .await
        .unwrap();

    // Force a re-render
    let out_dir = orchestrator.output_dir(&entry, RenderMode::Chapters);
    tokio::fs::remove_file(out_dir.join(".render_complete")).await.unwrap();
    orchestrator.trigger(&entry, RenderMode::Chapters).await.unwrap();
    orchestrator.wait_idle(&entry, RenderMode::Chapters).await.unwrap();
    let second = orchestrator
        .read_file_metadata(&entry, RenderMode::Chapters)
        .await
        .unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn test_all_copy_jobs_mark_default() {
    let fixture = Fixture::new().await;
    let path = fixture.add_file("book.mp3", 10_000).await;
    let runner = CountingRunner::default();
    let orchestrator = fixture.orchestrator(
        HashMap::from([(path, info(300.0, None))]),
        runner.clone(),
    );
    let entry = fixture.entry(&["book.mp3"]);

    // One short file without chapters segments into one whole-file copy
    let state = orchestrator.trigger(&entry, RenderMode::Segmented).await.unwrap();
    assert_eq!(state, RenderState::Default);
    assert_eq!(runner.batches.load(Ordering::SeqCst), 0);

    let out_dir = orchestrator.output_dir(&entry, RenderMode::Segmented);
    assert!(out_dir.join(".default").exists());
    assert!(!out_dir.join(".render_complete").exists());
    assert_eq!(
        orchestrator
            .read_file_metadata(&entry, RenderMode::Segmented)
            .await
            .unwrap()
            .len(),
        1
    );

    // Default is terminal
    assert_eq!(
        orchestrator.trigger(&entry, RenderMode::Segmented).await.unwrap(),
        RenderState::Default
    );
}

#[tokio::test]
async fn test_failed_job_leaves_render_incomplete() {
    let fixture = Fixture::new().await;
    let path = fixture.add_file("book.mp3", 10_000).await;
    let gate = Arc::new(Notify::new());
    let runner = CountingRunner {
        gate: Some(Arc::clone(&gate)),
        fail_outputs: vec!["Moby Dick-2.mp3".to_string()],
        ..CountingRunner::default()
    };
    let orchestrator = fixture.orchestrator(
        HashMap::from([(path, three_chapters())]),
        runner.clone(),
    );
    let entry = fixture.entry(&["book.mp3"]);

    orchestrator.trigger(&entry, RenderMode::Chapters).await.unwrap();
    let out_dir = orchestrator.output_dir(&entry, RenderMode::Chapters);
    let feed = out_dir.join(entry.feed_document_name(RenderMode::Chapters));
    tokio::fs::write(&feed, b"<rss/>").await.unwrap();

    gate.notify_one();
    orchestrator.wait_idle(&entry, RenderMode::Chapters).await.unwrap();

    // Siblings still ran
    assert_eq!(runner.jobs.load(Ordering::SeqCst), 3);
    assert!(out_dir.join("Moby Dick-3.mp3").exists());
    assert!(!out_dir.join(".render_complete").exists());
    assert!(feed.exists());

    // The pair is released and can be retried
    assert_eq!(
        orchestrator.state(&entry, RenderMode::Chapters).await,
        RenderState::NotStarted
    );
}

#[tokio::test]
async fn test_success_removes_cached_feed() {
    let fixture = Fixture::new().await;
    let first = fixture.add_file("part1.mp3", 10_000).await;
    let second = fixture.add_file("part2.mp3", 10_000).await;
    let gate = Arc::new(Notify::new());
    let runner = CountingRunner {
        gate: Some(Arc::clone(&gate)),
        ..CountingRunner::default()
    };
    let orchestrator = fixture.orchestrator(
        HashMap::from([(first, three_chapters()), (second, three_chapters())]),
        runner,
    );
    let entry = fixture.entry(&["part1.mp3", "part2.mp3"]);

    let state = orchestrator.trigger(&entry, RenderMode::SingleFile).await.unwrap();
    assert_eq!(state, RenderState::Rendering);
    let out_dir = orchestrator.output_dir(&entry, RenderMode::SingleFile);
    let feed = out_dir.join("moby-dick-singlefile.xml");
    tokio::fs::write(&feed, b"<rss/>").await.unwrap();

    gate.notify_one();
    orchestrator.wait_idle(&entry, RenderMode::SingleFile).await.unwrap();

    assert!(!feed.exists());
    assert!(out_dir.join(".render_complete").exists());
    assert!(out_dir.join("part1.m4b").exists());
}

#[tokio::test]
async fn test_planning_error_releases_key() {
    let fixture = Fixture::new().await;
    fixture.add_file("book.mp3", 10_000).await;
    let runner = CountingRunner::default();
    // Nothing is known to the prober
    let orchestrator = fixture.orchestrator(HashMap::new(), runner.clone());
    let entry = fixture.entry(&["book.mp3"]);

    for _ in 0..2 {
        let err = orchestrator
            .trigger(&entry, RenderMode::Segmented)
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::ProbeFailed { .. }));
    }
    assert_eq!(runner.batches.load(Ordering::SeqCst), 0);
    assert_eq!(
        orchestrator.state(&entry, RenderMode::Segmented).await,
        RenderState::NotStarted
    );
}

#[tokio::test]
async fn test_stale_output_is_cleared() {
    let fixture = Fixture::new().await;
    let path = fixture.add_file("book.mp3", 10_000).await;
    let orchestrator = fixture.orchestrator(
        HashMap::from([(path, three_chapters())]),
        CountingRunner::default(),
    );
    let entry = fixture.entry(&["book.mp3"]);

    let out_dir = orchestrator.output_dir(&entry, RenderMode::Chapters);
    tokio::fs::create_dir_all(out_dir.join("leftover")).await.unwrap();
    tokio::fs::write(out_dir.join("Chapter99.mp3"), b"old").await.unwrap();

    orchestrator.trigger(&entry, RenderMode::Chapters).await.unwrap();
    orchestrator.wait_idle(&entry, RenderMode::Chapters).await.unwrap();

    assert!(!out_dir.join("leftover").exists());
    assert!(!out_dir.join("Chapter99.mp3").exists());
    assert!(out_dir.join(".render_complete").exists());
}

#[tokio::test]
async fn test_scanned_directory_segments_into_parts() {
    let fixture = Fixture::new().await;
    let mut files = HashMap::new();
    for (name, duration) in [("01.mp3", 400.0), ("02.mp3", 250.0), ("03.mp3", 500.0)] {
        let path = fixture.add_file(name, 4_000).await;
        files.insert(path, info(duration, None));
    }
    let runner = CountingRunner::default();
    let orchestrator = fixture.orchestrator(files, runner.clone());
    // No explicit file list, the entry directory is scanned
    let entry = fixture.entry(&[]);

    let state = orchestrator.trigger(&entry, RenderMode::Segmented).await.unwrap();
    assert_eq!(state, RenderState::Rendering);
    orchestrator.wait_idle(&entry, RenderMode::Segmented).await.unwrap();

    let metadata = orchestrator
        .read_file_metadata(&entry, RenderMode::Segmented)
        .await
        .unwrap();
    let total: f64 = metadata
        .iter()
        .map(|m| m.file_info.duration().unwrap())
        .sum();
    assert!((total - 1150.0).abs() < 1e-6);
    // 1150 s in one part beats any split around a 600 s target
    assert_eq!(metadata.len(), 1);
    assert_eq!(metadata[0].file_path, Path::new("Part0.mp3"));
    assert_eq!(runner.batches.load(Ordering::SeqCst), 1);
}
