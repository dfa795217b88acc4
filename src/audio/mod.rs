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


//! Audio metadata, probing, and chapter resolution
//!
//! # Module Organization
//!
//! ## metadata
//! Normalized format/chapter model:
//! - `FormatInfo` - Container information (duration, size, bitrate, tags)
//! - `ChapterInfo` - Chapter marker structure
//! - `FileInfo` - Format info plus embedded chapters; merge and serialization
//!
//! ## markers
//! Legacy OverDrive `MediaMarkers` chapter tags:
//! - `OverdriveMediaMarker` - Start time and optional name
//! - `parse_markers` - XML tag parsing
//!
//! ## probe
//! External prober integration:
//! - `FileProber` - Trait for anything that yields `FileInfo` for a path
//! - `FfprobeProber` - FFprobe-backed implementation
//!
//! ## chapters
//! Chapter resolution across an ordered file list, with fallback to one
//! chapter per file.
//!
//! # FFmpeg Integration
//!
//! Probing requires FFprobe to be installed and available in PATH (or
//! configured via `RenderConfig::ffprobe_path`).

pub mod chapters;
pub mod markers;
pub mod metadata;
pub mod probe;

// Re-export commonly used types for convenience
pub use chapters::{resolve, resolve_paths};
pub use markers::{parse_markers, OverdriveMediaMarker};
pub use metadata::{ChapterInfo, ChapterMarker, FileInfo, FormatInfo, Tags};
pub use probe::{probe_all, FfprobeProber, FileProber};
