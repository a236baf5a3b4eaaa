//! Gantry runner lifecycle
//!
//! The stateful core of the orchestrator:
//!
//! - [`ContainerRunnerService`]: drives one runner identity through
//!   register → start → unregister → stop against a runtime client
//! - [`RunnerManager`]: validation, linear-backoff retries, and the
//!   composed start/stop entry points used by the CLI
//! - [`RunnerConfig`]: image identity, naming, labels, and timeouts
//!
//! Registration state is held in process memory only and does not survive
//! a restart; a fresh process can still tear a runner down via
//! [`ContainerRunnerService::adopt_container`].

pub mod config;
pub mod manager;
pub mod service;

pub use config::RunnerConfig;
pub use manager::{OrchestrateError, REPOSITORY_ENV, RetryPolicy, RunnerManager};
pub use service::{ContainerRunnerService, RUNNER_NAME_MAX_LEN, Registration, RunnerService};
