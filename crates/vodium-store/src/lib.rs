//! Persistence seam for the Vodium processing backend.
//!
//! This crate provides:
//! - A shared in-process store with single-lock compound mutations
//! - Repositories per aggregate (jobs, runner jobs, runners, videos)
//! - Atomic per-video pending-job counters
//! - Idempotent load-or-create inserts

pub mod error;
pub mod memory;
pub mod repos;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use repos::{JobRepository, RunnerJobRepository, RunnerRepository, VideoRepository};
