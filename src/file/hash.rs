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


//! Partial content hashing
//!
//! Hashing whole audiobooks is slow, so files are identified by the SHA-256
//! of a seeded random sample of fixed-size blocks. Files no larger than the
//! sample are hashed in full.
//!
//! This is an identity/cache key, not an integrity check: two files that
//! differ only outside the sampled blocks hash the same, and the sample is
//! predictable from the seed. The block choice depends on `rand`'s `StdRng`
//! stream, so hashes are only comparable between builds using the same
//! `rand` major version.

use crate::error::{RenderError, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use sha2::{Digest, Sha256};
use std::io::SeekFrom;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Bytes sampled per file (1 MiB)
pub const DEFAULT_HASH_AMOUNT: u64 = 1 << 20;

/// Sample block size (4 KiB)
pub const DEFAULT_BLOCK_SIZE: u64 = 1 << 12;

/// Hex SHA-256 of a seeded random subset of `path`'s blocks
///
/// `hash_amount` is rounded up to a whole number of blocks.
pub async fn hash_random(path: &Path, seed: u64, hash_amount: u64, block_size: u64) -> Result<String> {
    if block_size == 0 {
        return Err(RenderError::invalid_input("Hash block size must be positive"));
    }

    let mut file = File::open(path)
        .await
        .map_err(|e| RenderError::file_io("Failed to open for hashing", path, e))?;
    let file_size = file
        .metadata()
        .await
        .map_err(|e| RenderError::file_io("Failed to stat", path, e))?
        .len();

    let hash_amount = hash_amount.div_ceil(block_size) * block_size;
    let num_blocks = file_size.div_ceil(block_size);

    let blocks: Vec<u64> = if file_size < hash_amount {
        (0..num_blocks).collect()
    } else {
        let mut rng = StdRng::seed_from_u64(seed);
        let used = (hash_amount / block_size) as usize;
        let mut sample: Vec<u64> = rand::seq::index::sample(&mut rng, num_blocks as usize, used)
            .into_iter()
            .map(|i| i as u64)
            .collect();
        sample.sort_unstable();
        sample
    };

    let mut hasher = Sha256::new();
    let mut chunk = Vec::with_capacity(block_size as usize);
    for block in blocks {
        file.seek(SeekFrom::Start(block * block_size))
            .await
            .map_err(|e| RenderError::file_io("Failed to seek", path, e))?;

        chunk.clear();
        (&mut file)
            .take(block_size)
            .read_to_end(&mut chunk)
            .await
            .map_err(|e| RenderError::file_io("Failed to read", path, e))?;
        hasher.update(&chunk);
    }

    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use tempfile::TempDir;

    async fn write_file(dir: &TempDir, name: &str, len: usize) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut rng = StdRng::seed_from_u64(len as u64);
        let bytes: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
        tokio::fs::write(&path, bytes).await.unwrap();
        path
    }

    #[tokio::test]
    async fn test_small_file_hashes_whole_content() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_file(&temp_dir, "small.mp3", 10_000).await;

        let content = tokio::fs::read(&path).await.unwrap();
        let expected = hex::encode(Sha256::digest(&content));

        let hash = hash_random(&path, 1, DEFAULT_HASH_AMOUNT, DEFAULT_BLOCK_SIZE)
            .await
            .unwrap();
        assert_eq!(hash, expected);
        // Seed does not matter below the sample size
        assert_eq!(
            hash,
            hash_random(&path, 99, DEFAULT_HASH_AMOUNT, DEFAULT_BLOCK_SIZE).await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_sampled_hash_is_seed_keyed_and_stable() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_file(&temp_dir, "big.mp3", 64 * 1024 + 17).await;

        let a = hash_random(&path, 7, 8 * 1024, 1024).await.unwrap();
        let b = hash_random(&path, 7, 8 * 1024, 1024).await.unwrap();
        let c = hash_random(&path, 8, 8 * 1024, 1024).await.unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn test_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let err = hash_random(&temp_dir.path().join("nope.mp3"), 1, 1024, 256)
            .await
            .unwrap_err();
        assert!(err.is_file_error());
    }

    #[tokio::test]
    async fn test_zero_block_size() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_file(&temp_dir, "a.mp3", 10).await;
        assert!(hash_random(&path, 1, 1024, 0).await.is_err());
    }
}
