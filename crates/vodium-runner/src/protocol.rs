//! The runner claim protocol.
//!
//! Registration-token redemption, credential authentication, discovery,
//! the first-caller-wins claim, progress/lease renewal, and the lease
//! reaper that reclaims jobs from crashed or disconnected runners. The
//! server never blocks on a runner: every interaction is receive, persist,
//! return.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use tokio::time::interval;
use tracing::{error, info, warn};

use vodium_models::{
    RegistrationToken, Runner, RunnerJobId, RunnerJobKind, RunnerJobRecord, RunnerJobResult,
    RunnerJobState,
};
use vodium_store::{RunnerJobRepository, RunnerRepository};

use crate::error::{RunnerError, RunnerResult};
use crate::registry::RunnerJobRegistry;
use crate::token::generate_job_token;

/// Claim protocol configuration.
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// Exclusive claim window; renewed by every progress update
    pub lease_duration: Duration,
    /// How often the reaper scans for lapsed leases
    pub reaper_interval: Duration,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(120),
            reaper_interval: Duration::from_secs(30),
        }
    }
}

impl ProtocolConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            lease_duration: Duration::from_secs(
                std::env::var("RUNNER_LEASE_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.lease_duration.as_secs()),
            ),
            reaper_interval: Duration::from_secs(
                std::env::var("RUNNER_REAPER_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.reaper_interval.as_secs()),
            ),
        }
    }
}

/// Successful claim: the job's public payload plus the single-use token
/// proving ownership of this lease generation.
#[derive(Debug, Clone)]
pub struct AcceptedJob {
    pub job_token: String,
    pub job: RunnerJobRecord,
}

/// Server side of the runner claim protocol.
pub struct RunnerManager {
    runners: RunnerRepository,
    jobs: RunnerJobRepository,
    registry: Arc<RunnerJobRegistry>,
    config: ProtocolConfig,
}

impl RunnerManager {
    pub fn new(
        runners: RunnerRepository,
        jobs: RunnerJobRepository,
        registry: Arc<RunnerJobRegistry>,
        config: ProtocolConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            runners,
            jobs,
            registry,
            config,
        })
    }

    /// Mint a registration token an administrator can hand to a runner
    /// operator.
    pub async fn generate_registration_token(&self) -> RegistrationToken {
        let token = RegistrationToken::generate();
        self.runners.add_registration_token(token.clone()).await;
        info!(token_id = %token.id, "Generated runner registration token");
        token
    }

    /// Redeem a registration token for a long-lived runner credential.
    pub async fn register(
        &self,
        registration_secret: &str,
        name: impl Into<String>,
    ) -> RunnerResult<Runner> {
        let token = self
            .runners
            .find_registration_token(registration_secret)
            .await
            .ok_or(RunnerError::InvalidRegistrationToken)?;

        let runner = Runner::new(name, token.id);
        self.runners.insert(runner.clone()).await;
        counter!("vodium_runners_registered_total").increment(1);
        info!(runner_id = %runner.id, name = %runner.name, "Registered runner");
        Ok(runner)
    }

    /// Remove a runner; its in-flight jobs come back through lease expiry.
    pub async fn unregister(&self, credential: &str) -> RunnerResult<()> {
        if self.runners.remove_by_token(credential).await {
            Ok(())
        } else {
            Err(RunnerError::UnknownRunner)
        }
    }

    /// Resolve a credential to its runner, refreshing `last_contact_at`.
    pub async fn authenticate(&self, credential: &str) -> RunnerResult<Runner> {
        self.runners
            .authenticate(credential)
            .await
            .ok_or(RunnerError::UnknownRunner)
    }

    /// Unleased pending jobs ordered by priority then age, optionally
    /// filtered to the kinds the runner supports.
    pub async fn list_available(
        &self,
        credential: &str,
        kinds: Option<&[RunnerJobKind]>,
    ) -> RunnerResult<Vec<RunnerJobRecord>> {
        self.authenticate(credential).await?;
        Ok(self.jobs.list_available(kinds).await)
    }

    /// Claim a pending job: optimistic first-caller-wins check, fresh
    /// single-use token bound to (job, runner), lease started — all under
    /// one transition.
    pub async fn accept(
        &self,
        credential: &str,
        uuid: &RunnerJobId,
    ) -> RunnerResult<AcceptedJob> {
        let runner = self.authenticate(credential).await?;
        let token = generate_job_token();
        let lease_expires_at = Utc::now()
            + chrono::Duration::from_std(self.config.lease_duration)
                .unwrap_or_else(|_| chrono::Duration::seconds(120));

        match self
            .jobs
            .try_claim(uuid, &runner.id, token.clone(), lease_expires_at)
            .await?
        {
            Some(job) => {
                counter!("vodium_runner_jobs_accepted_total", "kind" => job.kind.as_str())
                    .increment(1);
                info!(
                    uuid = %uuid,
                    runner_id = %runner.id,
                    kind = %job.kind,
                    "Runner claimed job"
                );
                Ok(AcceptedJob {
                    job_token: token,
                    job,
                })
            }
            None => {
                let job = self.jobs.get(uuid).await?;
                Err(RunnerError::invalid_state("pending", job.state))
            }
        }
    }

    /// Progress report; proves liveness and renews the lease.
    pub async fn update(
        &self,
        credential: &str,
        uuid: &RunnerJobId,
        job_token: &str,
        progress: u8,
    ) -> RunnerResult<()> {
        self.authenticate(credential).await?;
        self.registry
            .update_progress(uuid, job_token, progress, self.config.lease_duration)
            .await
    }

    /// Submit a successful result.
    pub async fn complete(
        &self,
        credential: &str,
        uuid: &RunnerJobId,
        job_token: &str,
        result: RunnerJobResult,
    ) -> RunnerResult<()> {
        self.authenticate(credential).await?;
        self.registry.complete(uuid, job_token, result).await
    }

    /// Report a failure; the registry decides between requeue and
    /// permanent error.
    pub async fn error(
        &self,
        credential: &str,
        uuid: &RunnerJobId,
        job_token: &str,
        message: &str,
    ) -> RunnerResult<()> {
        self.authenticate(credential).await?;
        self.registry.error(uuid, job_token, message).await
    }

    /// Voluntarily release a claimed job.
    pub async fn abort(
        &self,
        credential: &str,
        uuid: &RunnerJobId,
        job_token: &str,
    ) -> RunnerResult<()> {
        self.authenticate(credential).await?;
        self.registry.abort(uuid, job_token).await
    }

    /// Reaper loop: spawn as a background task; scans for lapsed leases
    /// every `reaper_interval`.
    pub async fn run_reaper(self: Arc<Self>) {
        info!(
            interval = ?self.config.reaper_interval,
            lease = ?self.config.lease_duration,
            "Starting runner lease reaper"
        );
        let mut ticker = interval(self.config.reaper_interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.check_once().await {
                error!("Lease reaper cycle failed: {}", e);
            }
        }
    }

    /// One reaper cycle; returns how many jobs were reclaimed.
    pub async fn check_once(&self) -> RunnerResult<u32> {
        let expired = self.jobs.expired_leases(Utc::now()).await;
        let mut reclaimed = 0u32;
        for uuid in expired {
            match self.registry.reclaim_expired(&uuid).await {
                Ok(true) => reclaimed += 1,
                Ok(false) => {}
                Err(e) => warn!(uuid = %uuid, "Failed to reclaim runner job: {}", e),
            }
        }
        if reclaimed > 0 {
            info!(reclaimed, "Reclaimed runner jobs with lapsed leases");
        }
        Ok(reclaimed)
    }

    /// Count of jobs currently claimable, for operator introspection.
    pub async fn pending_count(&self) -> usize {
        self.jobs.count_by_state(RunnerJobState::Pending).await
    }
}
