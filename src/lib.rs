//! audiofeed-core
//!
//! Chapter resolution, segmentation and derived-rendition rendering for
//! audiobooks served as podcast feeds. Probing and encoding are delegated to
//! FFprobe/FFmpeg.
//!
//! # Pipeline
//!
//! ```text
//! RenderEntry -> probe (audio::probe) -> resolve chapters (audio::chapters)
//!             -> plan jobs (render::planner, render::segmenter)
//!             -> execute (render::executor) -> markers/sidecar (render::orchestrator)
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod file;
pub mod logging;
pub mod render;

pub use config::RenderConfig;
pub use error::{RenderError, Result};
pub use render::{RenderEntry, RenderMode, RenderOrchestrator, RenderState};
