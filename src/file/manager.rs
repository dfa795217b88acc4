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


//! Render output directory management
//!
//! Every (entry, mode) pair owns one output directory holding the rendered
//! files plus a handful of dot-file markers and sidecars.
//!
//! # Key Operations
//! - Directory creation and clearing of stale renders
//! - Safe deletes (retried, missing files are not an error)
//! - Atomic writes (temp file + rename) for sidecars
//! - Marker files (`touch`)

use crate::error::{RenderError, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::time::sleep;
use tracing::debug;

/// Maximum retry attempts for file operations
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Delay between retry attempts
const RETRY_DELAY: Duration = Duration::from_millis(100);

/// File operations scoped to one render output directory
#[derive(Debug, Clone)]
pub struct FileManager {
    root: PathBuf,
}

impl FileManager {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// The output directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of `name` inside the output directory
    pub fn join<P: AsRef<Path>>(&self, name: P) -> PathBuf {
        self.root.join(name)
    }

    /// Ensure directory exists, creating parent directories as needed
    pub async fn ensure_directory_exists(&self) -> Result<()> {
        if fs::try_exists(&self.root).await.unwrap_or(false) {
            return Ok(());
        }

        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| RenderError::file_io("Failed to create directory", &self.root, e))
    }

    /// Create the directory if needed and delete everything inside it
    ///
    /// Subdirectories are removed recursively.
    pub async fn clear_directory(&self) -> Result<()> {
        self.ensure_directory_exists().await?;

        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|e| RenderError::file_io("Failed to read directory", &self.root, e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| RenderError::file_io("Failed to read directory entry in", &self.root, e))?
        {
            let path = entry.path();
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| RenderError::file_io("Failed to stat", &path, e))?;

            debug!("Removing stale {}", path.display());
            if file_type.is_dir() {
                fs::remove_dir_all(&path)
                    .await
                    .map_err(|e| RenderError::file_io("Failed to remove directory", &path, e))?;
            } else {
                safe_delete(&path).await?;
            }
        }

        Ok(())
    }

    /// Check whether `name` exists inside the output directory
    pub async fn exists(&self, name: &str) -> bool {
        file_exists(&self.join(name)).await
    }

    /// Create an empty marker file (existing content is kept)
    pub async fn touch(&self, name: &str) -> Result<()> {
        let path = self.join(name);
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| RenderError::file_io("Failed to touch", &path, e))?;
        Ok(())
    }

    /// Delete `name` inside the output directory if present
    pub async fn remove(&self, name: &str) -> Result<()> {
        safe_delete(&self.join(name)).await
    }

    /// Read `name` as UTF-8, `None` when it does not exist
    pub async fn read_optional(&self, name: &str) -> Result<Option<String>> {
        let path = self.join(name);
        match fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RenderError::file_io("Failed to read", &path, e)),
        }
    }

    /// Atomically replace `name` with `contents`
    pub async fn write(&self, name: &str, contents: &[u8]) -> Result<()> {
        atomic_write(&self.join(name), contents).await
    }
}

/// Check if file exists
pub async fn file_exists(path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}

/// Safe delete operation with retry
///
/// Deleting a file that does not exist succeeds.
pub async fn safe_delete(path: &Path) -> Result<()> {
    let mut attempts = 0;

    loop {
        attempts += 1;

        match safe_delete_once(path).await {
            Ok(()) => return Ok(()),
            Err(e) if attempts >= MAX_RETRY_ATTEMPTS => {
                return Err(RenderError::FileIoError(format!(
                    "Failed to delete file after {} attempts: {}: {}",
                    MAX_RETRY_ATTEMPTS,
                    path.display(),
                    e
                )));
            }
            Err(_) => {
                sleep(RETRY_DELAY).await;
                continue;
            }
        }
    }
}

async fn safe_delete_once(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(RenderError::file_io("Delete failed", path, e)),
    }
}

/// Atomic write: write to temp file, then rename
pub async fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("file");
    let temp_path = path.with_file_name(format!(".{}.tmp", file_name));

    fs::write(&temp_path, contents)
        .await
        .map_err(|e| RenderError::file_io("Failed to write temp file", &temp_path, e))?;

    // Sync to disk
    let file = fs::OpenOptions::new()
        .write(true)
        .open(&temp_path)
        .await
        .map_err(|e| RenderError::file_io("Failed to open temp file for sync", &temp_path, e))?;
    file.sync_all()
        .await
        .map_err(|e| RenderError::file_io("Failed to sync temp file", &temp_path, e))?;
    drop(file);

    fs::rename(&temp_path, path).await.map_err(|e| {
        RenderError::FileIoError(format!(
            "Failed to rename temp file {} to {}: {}",
            temp_path.display(),
            path.display(),
            e
        ))
    })
}
