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


//! Render pipeline configuration
//!
//! Loaded from a JSON file; any key left out takes its default.
//!
//! ```json
//! {
//!   "media_cache_path": "/srv/audiofeed/media",
//!   "max_concurrent_renders": 4,
//!   "segment_target_seconds": 3600.0
//! }
//! ```

use crate::error::{RenderError, Result};
use crate::file::hash::{DEFAULT_BLOCK_SIZE, DEFAULT_HASH_AMOUNT};
use crate::render::planner::DEFAULT_CHAPTER_BASE;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for probing, planning and rendering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Root of the per-entry render output directories
    pub media_cache_path: PathBuf,

    /// FFmpeg binary (resolved through PATH when bare)
    pub ffmpeg_path: PathBuf,

    /// FFprobe binary (resolved through PATH when bare)
    pub ffprobe_path: PathBuf,

    /// Maximum render jobs running at once
    pub max_concurrent_renders: usize,

    /// Target part length for segmented renders, in seconds
    pub segment_target_seconds: f64,

    /// Penalty exponent for parts longer than the target
    pub segment_pos_exponent: f64,

    /// Penalty exponent for parts shorter than the target
    pub segment_neg_exponent: f64,

    /// Chapter file prefix when the entry has no title
    pub chapter_base_name: String,

    /// Bytes sampled by the partial content hash
    pub hash_amount: u64,

    /// Block size of the partial content hash
    pub hash_block_size: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            media_cache_path: PathBuf::from("media"),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            max_concurrent_renders: default_concurrency(),
            segment_target_seconds: 3600.0,
            segment_pos_exponent: 1.25,
            segment_neg_exponent: 1.75,
            chapter_base_name: DEFAULT_CHAPTER_BASE.to_string(),
            hash_amount: DEFAULT_HASH_AMOUNT,
            hash_block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .max(1)
}

impl RenderConfig {
    /// Load and validate a JSON configuration file
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RenderError::FileNotFound(path.display().to_string())
            } else {
                RenderError::file_io("Failed to read config", path, e)
            }
        })?;
        Self::from_json(&contents)
    }

    /// Parse and validate a JSON configuration document
    pub fn from_json(json: &str) -> Result<Self> {
        let config: RenderConfig = serde_json::from_str(json)
            .map_err(|e| RenderError::ConfigurationError(format!("Invalid config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_renders == 0 {
            return Err(RenderError::ConfigurationError(
                "max_concurrent_renders must be at least 1".to_string(),
            ));
        }
        if !(self.segment_target_seconds > 0.0) {
            return Err(RenderError::ConfigurationError(format!(
                "segment_target_seconds must be positive, got {}",
                self.segment_target_seconds
            )));
        }
        if self.hash_block_size == 0 {
            return Err(RenderError::ConfigurationError(
                "hash_block_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
