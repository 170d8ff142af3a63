//! Dependency-aware local job queue for the Vodium processing backend.
//!
//! This crate provides:
//! - Enqueue with payload validation and parent gating
//! - Sequential job flows realized through parent links and barriers
//! - A multi-worker scheduler bounded globally and per job kind
//! - Retry with exponential backoff and permanent-failure cascade

pub mod error;
pub mod flow;
pub mod logging;
pub mod queue;

pub use error::{JobError, QueueError, QueueResult};
pub use flow::{NewJob, SequentialJobFlow};
pub use logging::JobLogger;
pub use queue::{JobHandler, LocalJobQueue, QueueConfig};
