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


//! Render planning and execution
//!
//! # Module Organization
//!
//! ## segmenter
//! Optimal contiguous partitioning of chapters into duration-balanced parts.
//!
//! ## job / planner
//! `RenderJob` descriptors and the three planners (single file, one file per
//! chapter, balanced parts).
//!
//! ## executor
//! FFmpeg-backed execution of job batches with bounded concurrency.
//!
//! ## admission / orchestrator
//! At-most-one render per output directory, on-disk markers and sidecars.

pub mod admission;
pub mod executor;
pub mod job;
pub mod orchestrator;
pub mod planner;
pub mod segmenter;

// Re-export commonly used types for convenience
pub use admission::{AdmissionControl, AdmissionGuard};
pub use executor::{JobExecutor, JobRunner};
pub use job::{FileSubset, JobKind, RenderJob};
pub use orchestrator::{FileMetadata, RenderEntry, RenderMode, RenderOrchestrator, RenderState};
pub use planner::{chapter_split_jobs, segment_jobs, single_file_chaptered_jobs};
pub use segmenter::{asymmetric_cost, default_cost, segment, CostFn, Scorable};
