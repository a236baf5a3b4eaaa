//! Runner lifecycle service
//!
//! Drives one runner identity through its lifecycle against the container
//! runtime: prepare registration (image present, names generated), start
//! the hosting container, stop it, and deregister the runner from the CI
//! service by exec'ing the runner's own removal command.
//!
//! One service instance manages exactly one container. The registration
//! record lives in process memory only; tokens are never written to disk.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use gantry_runtime::models::{
    ContainerCreateBody, HostConfig, Mount, MountTypeEnum, RestartPolicy, RestartPolicyNameEnum,
};
use gantry_runtime::{CreateExecOptions, RuntimeClient, dockerfile_context};

use crate::config::RunnerConfig;

/// Upper bound the CI service places on runner names
pub const RUNNER_NAME_MAX_LEN: usize = 30;

/// In-memory record of one prepared registration
///
/// Populated only by a successful `register`; the token is cleared by
/// `unregister` whatever the remote outcome was. Never persisted.
#[derive(Debug, Clone)]
pub struct Registration {
    /// Repository URL the runner is attached to (base URL + owner/repo)
    pub repo_url: String,
    /// Short-lived credential used to register and later remove the runner
    pub token: String,
    /// Generated runner name, at most [`RUNNER_NAME_MAX_LEN`] characters
    pub runner_name: String,
    /// Name of the hosting container; always equal to `runner_name`
    pub container_name: String,
}

/// Service trait for the four runner lifecycle operations
///
/// Methods take `&mut self`: one instance is driven through one
/// register → start → unregister → stop cycle at a time, and overlapping
/// calls on the same instance are not a supported pattern.
#[async_trait]
pub trait RunnerService: Send + Sync {
    /// Prepares a registration: stores the credential, generates the
    /// runner identity, and makes sure the runner image exists
    async fn register(&mut self, token: &str, owner_repo: &str, base_url: &str) -> Result<bool>;

    /// Creates and starts the container hosting the registered runner
    async fn start(&mut self, env_vars: &[String]) -> Result<bool>;

    /// Stops the hosting container; a no-op success when none is known
    async fn stop(&mut self) -> Result<bool>;

    /// Removes the runner from the CI service via an exec session inside
    /// the still-running container, then clears the held token
    async fn unregister(&mut self) -> Result<bool>;
}

/// [`RunnerService`] backed by a container runtime client
pub struct ContainerRunnerService<C> {
    client: C,
    config: RunnerConfig,
    registration: Option<Registration>,
    created_volume: Option<String>,
}

impl<C: RuntimeClient> ContainerRunnerService<C> {
    /// Creates a service over the given runtime client
    pub fn new(client: C, config: RunnerConfig) -> Self {
        Self {
            client,
            config,
            registration: None,
            created_volume: None,
        }
    }

    /// The current registration record, if `register` has run
    pub fn registration(&self) -> Option<&Registration> {
        self.registration.as_ref()
    }

    /// Name of the work volume created by `start`, if one exists
    pub fn created_volume(&self) -> Option<&str> {
        self.created_volume.as_deref()
    }

    /// Adopts an existing runner container left behind by another process
    ///
    /// Scans for containers whose name carries this service's name prefix
    /// and tracks the newest one as the managed container, so a fresh
    /// `stop` process can tear it down. The adopted record holds no token,
    /// so `unregister` correctly reports there is nothing to deregister.
    pub async fn adopt_container(&mut self) -> Result<bool> {
        if self.registration.is_some() {
            return Ok(true);
        }

        let prefix = format!("/{}-", self.config.name_prefix);
        let containers = self
            .client
            .list_containers(true)
            .await
            .context("listing containers during discovery")?;

        let found = containers
            .iter()
            .filter_map(|container| {
                let name = container
                    .names
                    .as_ref()?
                    .iter()
                    .find(|name| name.starts_with(&prefix))?;
                Some((
                    container.created.unwrap_or(0),
                    name.trim_start_matches('/').to_string(),
                ))
            })
            .max_by_key(|(created, _)| *created)
            .map(|(_, name)| name);

        match found {
            Some(name) => {
                info!("Adopted existing runner container {}", name);
                self.registration = Some(Registration {
                    repo_url: String::new(),
                    token: String::new(),
                    runner_name: name.clone(),
                    container_name: name,
                });
                Ok(true)
            }
            None => {
                info!("No existing runner container to adopt");
                Ok(false)
            }
        }
    }

    async fn image_exists(&self) -> Result<bool> {
        let images = self
            .client
            .list_images(true)
            .await
            .context("listing images")?;

        Ok(images
            .iter()
            .any(|image| image.repo_tags.iter().any(|t| t == &self.config.image_tag)))
    }

    async fn build_image(&self) -> Result<()> {
        let dockerfile = runner_dockerfile(&self.config.runner_version);
        let context =
            dockerfile_context(&dockerfile).context("assembling image build context")?;

        self.client
            .build_image(&self.config.image_tag, context)
            .await
            .with_context(|| format!("building image {}", self.config.image_tag))
    }

    /// Best-effort removal of a leftover container with the same name,
    /// covering crash-recovery and re-run scenarios. A failure here must
    /// not abort the start; a later create failure will surface on its own.
    async fn remove_stale_container(&self, name: &str) {
        let slash_name = format!("/{name}");

        let existing = match self.client.list_containers(true).await {
            Ok(existing) => existing,
            Err(e) => {
                warn!("Could not check for a stale container {}: {}", name, e);
                return;
            }
        };

        let stale = existing.iter().find(|container| {
            container
                .names
                .as_ref()
                .is_some_and(|names| names.iter().any(|n| n == &slash_name))
        });

        if let Some(container) = stale {
            let target = container.id.clone().unwrap_or_else(|| name.to_string());
            info!("Removing existing container {}", name);
            if let Err(e) = self.client.remove_container(&target, true).await {
                warn!("Failed to remove existing container {}: {}", name, e);
            }
        }
    }

    /// Best-effort provisioning of a dedicated work volume; the runner
    /// works fine on the container filesystem when this fails.
    async fn provision_volume(&mut self, runner_name: &str) -> Option<String> {
        let name = format!("{runner_name}-work");
        match self.client.create_volume(&name).await {
            Ok(()) => {
                debug!("Created work volume {}", name);
                self.created_volume = Some(name.clone());
                Some(name)
            }
            Err(e) => {
                warn!(
                    "Failed to create volume {}; proceeding without a dedicated work volume: {}",
                    name, e
                );
                self.created_volume = None;
                None
            }
        }
    }

    async fn run_remove_command(
        &self,
        repo_url: &str,
        token: &str,
        container_name: &str,
    ) -> Result<()> {
        let command = format!("./config.sh remove --url {repo_url} --token {token}");
        let options = CreateExecOptions {
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            cmd: Some(vec!["/bin/bash".to_string(), "-c".to_string(), command]),
            ..Default::default()
        };

        let exec_id = self
            .client
            .create_exec(container_name, options)
            .await
            .context("creating unregister exec")?;

        let mut output = self
            .client
            .start_exec(&exec_id)
            .await
            .context("attaching to unregister exec")?;

        let drain = async {
            while let Some(chunk) = output.next().await {
                match chunk {
                    Ok(bytes) => {
                        for line in String::from_utf8_lossy(&bytes).lines() {
                            let line = line.trim_end();
                            if !line.is_empty() {
                                info!("[unregister] {}", line);
                            }
                        }
                    }
                    Err(e) => {
                        debug!("Error streaming unregister output: {}", e);
                        break;
                    }
                }
            }
        };

        if tokio::time::timeout(self.config.exec_timeout, drain)
            .await
            .is_err()
        {
            warn!(
                "Unregister output did not complete within {:?}; continuing teardown",
                self.config.exec_timeout
            );
        }

        match self.client.inspect_exec(&exec_id).await {
            Ok(inspect) => {
                if let Some(code) = inspect.exit_code
                    && code != 0
                {
                    warn!("Unregister command exited with code {}", code);
                }
            }
            Err(e) => debug!("Could not inspect unregister exec: {}", e),
        }

        Ok(())
    }
}

#[async_trait]
impl<C: RuntimeClient> RunnerService for ContainerRunnerService<C> {
    async fn register(&mut self, token: &str, owner_repo: &str, base_url: &str) -> Result<bool> {
        info!("Preparing registration for {}", owner_repo);

        let repo_url = format!("{}/{}", base_url.trim_end_matches('/'), owner_repo);
        let runner_name = generate_runner_name(&self.config.name_prefix);

        self.registration = Some(Registration {
            repo_url,
            token: token.to_string(),
            runner_name: runner_name.clone(),
            container_name: runner_name.clone(),
        });

        // The image check is the cheap path; the build runs once per host.
        if !self.image_exists().await? {
            info!(
                "Runner image {} not found; building it",
                self.config.image_tag
            );
            self.build_image().await?;
        }

        info!("Runner {} prepared for registration", runner_name);
        Ok(true)
    }

    async fn start(&mut self, env_vars: &[String]) -> Result<bool> {
        let Some(reg) = self.registration.clone() else {
            error!("Missing registration details; call register first");
            return Ok(false);
        };
        if reg.repo_url.is_empty() || reg.token.is_empty() {
            error!("Registration record is incomplete; call register first");
            return Ok(false);
        }

        info!("Starting runner container {}", reg.container_name);
        self.remove_stale_container(&reg.container_name).await;
        let volume = self.provision_volume(&reg.runner_name).await;

        // Derived entries are computed from the registration record, never
        // caller-supplied, so the container cannot drift from what was
        // registered.
        let mut env = env_vars.to_vec();
        env.push(format!("RUNNER_REPO_URL={}", reg.repo_url));
        env.push(format!("RUNNER_TOKEN={}", reg.token));
        env.push(format!("RUNNER_NAME={}", reg.runner_name));

        let command = format!(
            "./config.sh --url {} --token {} --name {} --labels {} --work _work --ephemeral && ./run.sh",
            reg.repo_url, reg.token, reg.runner_name, self.config.labels
        );

        let body = ContainerCreateBody {
            image: Some(self.config.image_tag.clone()),
            env: Some(env),
            tty: Some(true),
            cmd: Some(vec!["/bin/bash".to_string(), "-c".to_string(), command]),
            host_config: Some(HostConfig {
                auto_remove: Some(true),
                restart_policy: Some(RestartPolicy {
                    name: Some(RestartPolicyNameEnum::NO),
                    maximum_retry_count: None,
                }),
                mounts: volume.map(|name| {
                    vec![Mount {
                        typ: Some(MountTypeEnum::VOLUME),
                        source: Some(name),
                        target: Some("/actions-runner/_work".to_string()),
                        ..Default::default()
                    }]
                }),
                ..Default::default()
            }),
            ..Default::default()
        };

        let id = self
            .client
            .create_container(&reg.container_name, body)
            .await
            .context("creating runner container")?;
        info!("Container created: {}", id);

        self.client
            .start_container(&reg.container_name)
            .await
            .context("starting runner container")?;
        info!("Container started");

        match self.client.inspect_container(&reg.container_name).await {
            Ok(inspect) => {
                let running = inspect
                    .state
                    .and_then(|state| state.running)
                    .unwrap_or(false);
                if !running {
                    warn!(
                        "Container {} is not reported running yet",
                        reg.container_name
                    );
                }
            }
            Err(e) => debug!("Could not inspect container after start: {}", e),
        }

        Ok(true)
    }

    async fn stop(&mut self) -> Result<bool> {
        let Some(container_name) = self
            .registration
            .as_ref()
            .map(|reg| reg.container_name.clone())
        else {
            info!("Stop requested but no container is known; treating as success");
            return Ok(true);
        };

        match self
            .client
            .stop_container(&container_name, self.config.stop_wait)
            .await
        {
            Ok(()) => info!("Container {} stopped", container_name),
            // Already gone means the target state is reached.
            Err(e) if e.is_not_found() => {
                warn!("Container {} not found; nothing to stop", container_name)
            }
            Err(e) => {
                return Err(anyhow::Error::from(e)
                    .context(format!("stopping container {container_name}")));
            }
        }

        if let Some(volume) = self.created_volume.take()
            && let Err(e) = self.client.remove_volume(&volume, true).await
        {
            warn!("Failed to remove volume {}: {}", volume, e);
        }

        Ok(true)
    }

    async fn unregister(&mut self) -> Result<bool> {
        let Some(reg) = self.registration.as_ref() else {
            warn!("Unregister skipped: no registration recorded");
            return Ok(false);
        };
        if reg.token.is_empty() {
            warn!("Unregister skipped: no registration token held");
            return Ok(false);
        }

        let repo_url = reg.repo_url.clone();
        let token = reg.token.clone();
        let container_name = reg.container_name.clone();

        // Clearing local state wins over guaranteeing the remote removal
        // went through; a flaky exec must not leave the token held.
        if let Err(e) = self
            .run_remove_command(&repo_url, &token, &container_name)
            .await
        {
            warn!(
                "Runner removal inside container {} failed: {:#}",
                container_name, e
            );
        }

        if let Some(reg) = self.registration.as_mut() {
            reg.token.clear();
        }

        Ok(true)
    }
}

/// Generates a runner name from a timestamp and a random suffix, bounded
/// by the CI service's name length limit
fn generate_runner_name(prefix: &str) -> String {
    let mut name = format!(
        "{}-{}-{}",
        prefix,
        Utc::now().format("%Y%m%d%H%M%S"),
        Uuid::new_v4().simple()
    );
    name.truncate(RUNNER_NAME_MAX_LEN);
    name
}

/// The embedded build definition used when the runner image is absent
fn runner_dockerfile(version: &str) -> String {
    format!(
        r#"FROM ubuntu:22.04
RUN apt-get update && apt-get install -y curl ca-certificates tar gzip sudo git && rm -rf /var/lib/apt/lists/*
RUN useradd -m -s /bin/bash runner
WORKDIR /actions-runner
RUN curl -fsSL -o runner.tar.gz https://github.com/actions/runner/releases/download/v{version}/actions-runner-linux-x64-{version}.tar.gz \
    && tar xzf runner.tar.gz && rm runner.tar.gz
RUN ./bin/installdependencies.sh
USER runner
"#
    )
}
