//! Error types for audiofeed-core
//!
//! This module defines error types using thiserror for ergonomic error handling.
//! Errors are categorized by the pipeline stage that raises them (probing,
//! chapter parsing, encoding, output directory management, configuration).
//!
//! ## Recoverable vs fatal
//!
//! - `MalformedChapterMarkers` is the only error that drives a fallback: the
//!   probe layer catches it and treats the file as chapterless.
//! - `DegenerateChapter` never escapes a module; it is built only so the
//!   warning that drops the chapter carries a consistent message.
//! - `EncodeFailed` is fatal for one render job. The orchestrator records it
//!   and keeps going with the sibling jobs.
//! - Everything else propagates to the caller.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our RenderError type
pub type Result<T> = std::result::Result<T, RenderError>;

/// Main error type for audiofeed-core
#[derive(Error, Debug)]
pub enum RenderError {
    // ===== External Tool Errors =====

    /// The prober exited non-zero or produced output we could not parse
    #[error("Probe failed for {path}: {message}")]
    ProbeFailed {
        path: PathBuf,
        message: String,
    },

    /// FFmpeg/FFprobe binary not found
    #[error("FFmpeg not found. Please install FFmpeg and ensure it's in your PATH.")]
    FfmpegNotFound,

    /// The encoder exited non-zero while rendering one output
    #[error("ffmpeg returned non-zero exit status {exit_code:?} while rendering {output}")]
    EncodeFailed {
        exit_code: Option<i32>,
        output: PathBuf,
    },

    // ===== Chapter Metadata Errors =====

    /// Legacy OverDrive marker tag is missing its root element or has a bad timestamp
    #[error("Malformed OverDrive MediaMarkers: {0}")]
    MalformedChapterMarkers(String),

    /// Chapter whose end does not come after its start
    #[error("Degenerate chapter {num}: start {start_time} >= end {end_time}")]
    DegenerateChapter {
        num: i64,
        start_time: f64,
        end_time: f64,
    },

    /// Metadata document could not be parsed
    #[error("Invalid metadata document: {0}")]
    InvalidMetadataDocument(String),

    // ===== File/Storage Errors =====

    /// File or directory not found
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// Generic file I/O error with context
    #[error("File I/O error: {0}")]
    FileIoError(String),

    /// Invalid file path
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    // ===== Input/State Errors =====

    /// Generic input validation error
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Operation is not valid for the current render state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Configuration file is invalid or incomplete
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    // ===== External Library Errors =====

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// A spawned render task panicked or was aborted
    #[error("Render task failed: {0}")]
    JoinError(#[from] tokio::task::JoinError),
}

impl From<std::num::ParseFloatError> for RenderError {
    fn from(err: std::num::ParseFloatError) -> Self {
        RenderError::InvalidInput(format!("Failed to parse float: {}", err))
    }
}

impl From<std::num::ParseIntError> for RenderError {
    fn from(err: std::num::ParseIntError) -> Self {
        RenderError::InvalidInput(format!("Failed to parse integer: {}", err))
    }
}

// Helper methods for creating common errors
impl RenderError {
    /// Create a ProbeFailed error for a path
    pub fn probe_failed<P: Into<PathBuf>, S: Into<String>>(path: P, message: S) -> Self {
        RenderError::ProbeFailed {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an InvalidInput error with a message
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        RenderError::InvalidInput(message.into())
    }

    /// Create a FileIoError from an operation, a path and the underlying error
    pub fn file_io(operation: &str, path: &std::path::Path, err: impl std::fmt::Display) -> Self {
        RenderError::FileIoError(format!("{}: {} - {}", operation, path.display(), err))
    }

    /// Check if the caller should fall back to duration-based chapters
    pub fn is_fallback(&self) -> bool {
        matches!(self, RenderError::MalformedChapterMarkers(_))
    }

    /// Check if error came from an external ffmpeg/ffprobe process
    pub fn is_process_error(&self) -> bool {
        matches!(
            self,
            RenderError::ProbeFailed { .. }
                | RenderError::FfmpegNotFound
                | RenderError::EncodeFailed { .. }
        )
    }

    /// Check if error is related to file/disk operations
    pub fn is_file_error(&self) -> bool {
        matches!(
            self,
            RenderError::FileNotFound(_)
                | RenderError::FileIoError(_)
                | RenderError::InvalidPath(_)
                | RenderError::IoError(_)
        )
    }
}
