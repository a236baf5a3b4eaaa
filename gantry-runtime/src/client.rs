//! Runtime client facade
//!
//! A narrow, substitutable surface over the handful of daemon operations
//! the orchestrator needs. Every method is a pass-through: no retries, no
//! domain interpretation. Policy lives in the runner service so that this
//! layer can be faked wholesale in tests.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::LogOutput;
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::models::{
    ContainerCreateBody, ContainerInspectResponse, ContainerSummary, ExecInspectResponse,
    ImageSummary, VolumeCreateOptions,
};
use bollard::query_parameters::{
    BuildImageOptionsBuilder, CreateContainerOptionsBuilder, InspectContainerOptions,
    ListContainersOptionsBuilder, ListImagesOptionsBuilder, RemoveContainerOptionsBuilder,
    RemoveVolumeOptionsBuilder, StartContainerOptions, StopContainerOptionsBuilder,
};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tracing::debug;

use crate::error::{Result, RuntimeError};

/// Combined stdout/stderr of an exec session, as a stream of byte chunks
pub type ExecOutput = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Narrow interface over the container runtime's primitives
///
/// Implementations forward each call to the daemon unchanged. The runner
/// service is the single place where retries, fallbacks, and idempotency
/// decisions live.
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// List images known to the daemon, including intermediates when `all`
    async fn list_images(&self, all: bool) -> Result<Vec<ImageSummary>>;

    /// Build and tag an image from an in-memory tar build context
    async fn build_image(&self, tag: &str, context: Bytes) -> Result<()>;

    /// List containers, including stopped ones when `all`
    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>>;

    /// Create a named container and return its id
    async fn create_container(&self, name: &str, body: ContainerCreateBody) -> Result<String>;

    /// Start a container by name or id
    async fn start_container(&self, name: &str) -> Result<()>;

    /// Gracefully stop a container, killing it after `wait_before_kill`
    async fn stop_container(&self, name: &str, wait_before_kill: Duration) -> Result<()>;

    /// Remove a container by name or id
    async fn remove_container(&self, name: &str, force: bool) -> Result<()>;

    /// Create a named volume
    async fn create_volume(&self, name: &str) -> Result<()>;

    /// Remove a named volume
    async fn remove_volume(&self, name: &str, force: bool) -> Result<()>;

    /// Create an exec session inside a running container, returning its id
    async fn create_exec(&self, container: &str, options: CreateExecOptions<String>)
    -> Result<String>;

    /// Start an exec session and attach to its combined output stream
    async fn start_exec(&self, exec_id: &str) -> Result<ExecOutput>;

    /// Inspect a container's state
    async fn inspect_container(&self, name: &str) -> Result<ContainerInspectResponse>;

    /// Inspect an exec session's terminal state
    async fn inspect_exec(&self, exec_id: &str) -> Result<ExecInspectResponse>;
}

/// Production [`RuntimeClient`] backed by the Docker Engine API
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Wraps an already-connected daemon client
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Cheap liveness check used when probing endpoint candidates
    pub(crate) async fn probe(&self) -> Result<()> {
        self.list_images(true).await.map(|_| ())
    }
}

#[async_trait]
impl RuntimeClient for DockerRuntime {
    async fn list_images(&self, all: bool) -> Result<Vec<ImageSummary>> {
        let options = ListImagesOptionsBuilder::new().all(all).build();
        Ok(self.docker.list_images(Some(options)).await?)
    }

    async fn build_image(&self, tag: &str, context: Bytes) -> Result<()> {
        let options = BuildImageOptionsBuilder::new().t(tag).rm(true).build();
        let mut progress =
            self.docker
                .build_image(options, None, Some(bollard::body_full(context)));

        // The daemon reports build failure as a message in the progress
        // stream, not as an HTTP error.
        while let Some(update) = progress.next().await {
            let info = update?;
            if let Some(error) = info.error {
                return Err(RuntimeError::Build(error));
            }
            if let Some(line) = info.stream {
                let line = line.trim_end();
                if !line.is_empty() {
                    debug!("[build] {}", line);
                }
            }
        }
        Ok(())
    }

    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>> {
        let options = ListContainersOptionsBuilder::new().all(all).build();
        Ok(self.docker.list_containers(Some(options)).await?)
    }

    async fn create_container(&self, name: &str, body: ContainerCreateBody) -> Result<String> {
        let options = CreateContainerOptionsBuilder::new().name(name).build();
        let response = self.docker.create_container(Some(options), body).await?;
        Ok(response.id)
    }

    async fn start_container(&self, name: &str) -> Result<()> {
        self.docker
            .start_container(name, None::<StartContainerOptions>)
            .await?;
        Ok(())
    }

    async fn stop_container(&self, name: &str, wait_before_kill: Duration) -> Result<()> {
        let options = StopContainerOptionsBuilder::new()
            .t(wait_before_kill.as_secs() as i32)
            .build();
        self.docker.stop_container(name, Some(options)).await?;
        Ok(())
    }

    async fn remove_container(&self, name: &str, force: bool) -> Result<()> {
        let options = RemoveContainerOptionsBuilder::new().force(force).build();
        self.docker.remove_container(name, Some(options)).await?;
        Ok(())
    }

    async fn create_volume(&self, name: &str) -> Result<()> {
        let config = VolumeCreateOptions {
            name: Some(name.to_string()),
            ..Default::default()
        };
        self.docker.create_volume(config).await?;
        Ok(())
    }

    async fn remove_volume(&self, name: &str, force: bool) -> Result<()> {
        let options = RemoveVolumeOptionsBuilder::new().force(force).build();
        self.docker.remove_volume(name, Some(options)).await?;
        Ok(())
    }

    async fn create_exec(
        &self,
        container: &str,
        options: CreateExecOptions<String>,
    ) -> Result<String> {
        let created = self.docker.create_exec(container, options).await?;
        Ok(created.id)
    }

    async fn start_exec(&self, exec_id: &str) -> Result<ExecOutput> {
        match self
            .docker
            .start_exec(exec_id, None::<StartExecOptions>)
            .await?
        {
            StartExecResults::Attached { output, .. } => Ok(Box::pin(output.map(
                |chunk| -> Result<Bytes> { Ok(chunk.map(LogOutput::into_bytes)?) },
            ))),
            StartExecResults::Detached => Ok(Box::pin(futures_util::stream::empty())),
        }
    }

    async fn inspect_container(&self, name: &str) -> Result<ContainerInspectResponse> {
        Ok(self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await?)
    }

    async fn inspect_exec(&self, exec_id: &str) -> Result<ExecInspectResponse> {
        Ok(self.docker.inspect_exec(exec_id).await?)
    }
}

/// Packs a single Dockerfile into an in-memory tar build context
pub fn dockerfile_context(dockerfile: &str) -> Result<Bytes> {
    let mut builder = tar::Builder::new(Vec::new());

    let mut header = tar::Header::new_gnu();
    header.set_size(dockerfile.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();

    builder.append_data(&mut header, "Dockerfile", dockerfile.as_bytes())?;
    let archive = builder.into_inner()?;
    Ok(Bytes::from(archive))
}
