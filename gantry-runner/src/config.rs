//! Runner configuration
//!
//! Everything that was tunable about the runner lifecycle lives here:
//! image identity, naming, labels, and the timeouts the service applies
//! during teardown. Tests override fields directly instead of touching
//! process-wide state.

use std::time::Duration;

/// Configuration for one runner service instance
///
/// All timeouts are explicit so deployments can tune them and tests can
/// shrink them without waiting on real-world defaults.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Image tag the runner container is created from
    pub image_tag: String,

    /// Prefix for generated runner/container names
    pub name_prefix: String,

    /// Runner release version baked into the image when it has to be built
    pub runner_version: String,

    /// Comma-separated labels the runner registers with
    pub labels: String,

    /// Grace period a stopping container gets before it is killed
    pub stop_wait: Duration,

    /// Upper bound on draining an exec session's output during unregister
    pub exec_timeout: Duration,
}

impl RunnerConfig {
    /// Creates a configuration with the stock defaults
    pub fn new() -> Self {
        Self {
            image_tag: "gantry-runner:latest".to_string(),
            name_prefix: "gantry".to_string(),
            runner_version: "2.328.0".to_string(),
            labels: "self-hosted".to_string(),
            stop_wait: Duration::from_secs(10),
            exec_timeout: Duration::from_secs(60),
        }
    }

    /// Creates a configuration from environment variables, falling back to
    /// defaults for anything unset
    ///
    /// Recognized variables:
    /// - GANTRY_IMAGE_TAG
    /// - GANTRY_RUNNER_LABELS
    /// - GANTRY_RUNNER_VERSION
    /// - GANTRY_STOP_WAIT_SECS
    /// - GANTRY_EXEC_TIMEOUT_SECS
    pub fn from_env() -> Self {
        let mut config = Self::new();

        if let Some(tag) = read_var("GANTRY_IMAGE_TAG") {
            config.image_tag = tag;
        }
        if let Some(labels) = read_var("GANTRY_RUNNER_LABELS") {
            config.labels = labels;
        }
        if let Some(version) = read_var("GANTRY_RUNNER_VERSION") {
            config.runner_version = version;
        }
        if let Some(secs) = read_secs("GANTRY_STOP_WAIT_SECS") {
            config.stop_wait = secs;
        }
        if let Some(secs) = read_secs("GANTRY_EXEC_TIMEOUT_SECS") {
            config.exec_timeout = secs;
        }

        config
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.image_tag.is_empty() {
            anyhow::bail!("image_tag cannot be empty");
        }

        if self.name_prefix.is_empty() {
            anyhow::bail!("name_prefix cannot be empty");
        }

        // Names and labels end up inside container names and a shell
        // command line; whitespace would corrupt both.
        if self.name_prefix.chars().any(char::is_whitespace) {
            anyhow::bail!("name_prefix must not contain whitespace");
        }

        if self.labels.chars().any(char::is_whitespace) {
            anyhow::bail!("labels must not contain whitespace");
        }

        if self.stop_wait.as_secs() == 0 {
            anyhow::bail!("stop_wait must be greater than 0");
        }

        if self.exec_timeout.as_secs() == 0 {
            anyhow::bail!("exec_timeout must be greater than 0");
        }

        Ok(())
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn read_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

fn read_secs(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_secs)
}
