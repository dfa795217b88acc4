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


//! Filesystem helpers for the render cache
//!
//! - `scanner` - Audio file discovery in natural order
//! - `hash` - Seeded partial content hashing of source files
//! - `manager` - Output directory operations (clear, markers, atomic sidecars)
//! - `paths` - Safe output names

pub mod hash;
pub mod manager;
pub mod paths;
pub mod scanner;

// Re-export commonly used types
pub use hash::hash_random;
pub use manager::FileManager;
pub use paths::{chapter_base_name, output_dir, sanitize_filename};
pub use scanner::{audio_files, natural_sort_key};
