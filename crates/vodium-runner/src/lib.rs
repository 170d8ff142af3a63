//! Remote runner registry and claim protocol for the Vodium processing
//! backend.
//!
//! This crate provides:
//! - The runner job registry: create/update/complete/error/cancel/abort
//!   with public/private payload separation
//! - Single-use job tokens rotated atomically per lease generation
//! - Registration tokens, runner credentials, and the claim protocol
//! - The lease reaper reclaiming jobs from crashed runners
//! - HMAC-signed time-scoped resource references
//! - Debounced "jobs available" pings to connected runner sessions

pub mod error;
pub mod notifier;
pub mod protocol;
pub mod registry;
pub mod token;

pub use error::{RunnerError, RunnerResult};
pub use notifier::AvailabilityNotifier;
pub use protocol::{AcceptedJob, ProtocolConfig, RunnerManager};
pub use registry::{
    HookOutcome, NewRunnerJob, RegistryConfig, RunnerJobHooks, RunnerJobRegistry,
    RunnerJobRequest,
};
pub use token::{generate_job_token, ResourceSigner};
