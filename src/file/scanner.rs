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


//! Audio file discovery
//!
//! Lists the audio files of one audiobook directory in natural order, so
//! `Part 2.mp3` sorts before `Part 10.mp3`.

use crate::error::{RenderError, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Extensions treated as audiobook audio
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "mp4", "ogg", "ac3", "aac", "m4b", "m4a"];

/// One run of a natural sort key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum NaturalToken {
    Number(u128),
    Text(String),
}

/// Split `value` into alternating text and number runs
pub fn natural_sort_key(value: &str) -> Vec<NaturalToken> {
    let mut tokens = Vec::new();
    let mut run = String::new();
    let mut run_is_digit = false;

    for c in value.chars() {
        let is_digit = c.is_ascii_digit();
        if !run.is_empty() && is_digit != run_is_digit {
            tokens.push(to_token(std::mem::take(&mut run), run_is_digit));
        }
        run_is_digit = is_digit;
        run.push(c);
    }
    if !run.is_empty() {
        tokens.push(to_token(run, run_is_digit));
    }

    tokens
}

fn to_token(run: String, is_digit: bool) -> NaturalToken {
    if is_digit {
        NaturalToken::Number(run.parse().unwrap_or(u128::MAX))
    } else {
        NaturalToken::Text(run)
    }
}

/// Check if file is an audio file
pub fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| AUDIO_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Audio files directly inside `dir`, naturally sorted
pub async fn audio_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(RenderError::InvalidPath(format!(
            "Path is not a directory: {}",
            dir.display()
        )));
    }

    let mut entries = fs::read_dir(dir)
        .await
        .map_err(|e| RenderError::file_io("Failed to read directory", dir, e))?;

    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| RenderError::file_io("Failed to read directory entry in", dir, e))?
    {
        let path = entry.path();
        if path.is_file() && is_audio_file(&path) {
            files.push(path);
        }
    }

    files.sort_by_cached_key(|p| natural_sort_key(&p.to_string_lossy()));
    Ok(files)
}
