//! Runner orchestration manager
//!
//! Policy layer on top of [`RunnerService`]: validates caller input, adds
//! linear-backoff retries to registration, and composes the lifecycle
//! operations into the two public entry points (`orchestrate_start`,
//! `orchestrate_stop`). Knows nothing about the container runtime.

use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::service::RunnerService;

/// Environment entry that must identify the target repository
pub const REPOSITORY_ENV: &str = "GITHUB_REPOSITORY";

/// Errors surfaced by the orchestration layer
///
/// Usage errors and cancellation are kept distinct from the plain `false`
/// that signals an exhausted or failed remote operation.
#[derive(Debug, Error)]
pub enum OrchestrateError {
    /// The retry budget was not a positive number
    #[error("max_retries must be at least 1 (got {0})")]
    InvalidRetries(u32),

    /// The container environment is missing the repository marker entry
    #[error("env_vars must contain a {REPOSITORY_ENV}= entry")]
    MissingRepositoryVar,

    /// The operation was cancelled before it could finish
    #[error("operation cancelled")]
    Cancelled,

    /// The underlying service failed in a way that is not retried here
    #[error(transparent)]
    Service(#[from] anyhow::Error),
}

/// Retry schedule for registration attempts
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of registration attempts; must be at least 1
    pub max_retries: u32,
    /// Backoff grows linearly: `base_delay * attempt` between attempts
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(200),
        }
    }
}

/// Orchestrates a [`RunnerService`] through its lifecycle
pub struct RunnerManager<S> {
    service: S,
}

impl<S: RunnerService> RunnerManager<S> {
    /// Wraps a runner service
    pub fn new(service: S) -> Self {
        Self { service }
    }

    /// The wrapped service, for inspection
    pub fn service(&self) -> &S {
        &self.service
    }

    /// Repeatedly attempts registration with linear backoff
    ///
    /// Service errors are logged and count as failed attempts; the first
    /// success short-circuits. Cancellation is honored before each attempt,
    /// while a registration call is in flight, and during the backoff
    /// sleeps, and always surfaces as [`OrchestrateError::Cancelled`]
    /// rather than an ordinary failure.
    pub async fn start_with_retries(
        &mut self,
        token: &str,
        owner_repo: &str,
        base_url: &str,
        retry: RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<bool, OrchestrateError> {
        if retry.max_retries == 0 {
            return Err(OrchestrateError::InvalidRetries(retry.max_retries));
        }

        for attempt in 1..=retry.max_retries {
            if cancel.is_cancelled() {
                return Err(OrchestrateError::Cancelled);
            }

            debug!("Attempt {} to register runner for {}", attempt, owner_repo);
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(OrchestrateError::Cancelled),
                outcome = self.service.register(token, owner_repo, base_url) => outcome,
            };

            match outcome {
                Ok(true) => return Ok(true),
                Ok(false) => warn!("Registration attempt {} was refused", attempt),
                Err(e) => warn!("Registration attempt {} failed: {:#}", attempt, e),
            }

            if attempt < retry.max_retries {
                let delay = retry.base_delay * attempt;
                debug!("Waiting {:?} before retry", delay);
                tokio::select! {
                    _ = cancel.cancelled() => return Err(OrchestrateError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        Ok(false)
    }

    /// Registers with retries, then starts the runner container
    ///
    /// Fails fast with a usage error when the environment set is missing
    /// the repository marker; returns `Ok(false)` when registration was
    /// exhausted (no container work is attempted) or when the container
    /// could not be started after a successful registration.
    pub async fn orchestrate_start(
        &mut self,
        token: &str,
        owner_repo: &str,
        base_url: &str,
        env_vars: &[String],
        retry: RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<bool, OrchestrateError> {
        let marker = format!("{REPOSITORY_ENV}=");
        let has_marker = env_vars.iter().any(|entry| {
            entry
                .get(..marker.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(&marker))
        });
        if !has_marker {
            error!("env_vars missing required {} entry", REPOSITORY_ENV);
            return Err(OrchestrateError::MissingRepositoryVar);
        }

        info!("Starting orchestration for {}", owner_repo);

        let registered = self
            .start_with_retries(token, owner_repo, base_url, retry, cancel)
            .await?;
        if !registered {
            warn!(
                "Registration failed after {} attempt(s)",
                retry.max_retries
            );
            return Ok(false);
        }

        info!("Registration succeeded; starting runner container");
        let started = self.service.start(env_vars).await?;
        if started {
            info!("Runner container started");
        } else {
            // Distinct from "could not register" so operators can tell the
            // two failure stages apart.
            warn!("Registration succeeded but container start failed");
        }

        Ok(started)
    }

    /// Unregisters the runner, then stops its container
    ///
    /// Unregister runs first because its exec session needs the container
    /// still running; its failures are logged and swallowed so teardown
    /// always proceeds to the stop.
    pub async fn orchestrate_stop(&mut self) -> Result<bool, OrchestrateError> {
        match self.service.unregister().await {
            Ok(true) => info!("Runner unregistered"),
            Ok(false) => debug!("Nothing to unregister"),
            Err(e) => warn!("Unregister failed; proceeding to stop the container: {:#}", e),
        }

        let stopped = self.service.stop().await?;
        Ok(stopped)
    }
}
