//! Common test infrastructure for the runner lifecycle suites.
//!
//! Provides a scriptable fake runtime client (for exercising
//! `ContainerRunnerService` without a daemon) and a scriptable fake
//! runner service (for exercising `RunnerManager` without containers).

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use gantry_runner::RunnerService;
use gantry_runtime::models::{
    ContainerCreateBody, ContainerInspectResponse, ContainerState, ContainerSummary,
    ExecInspectResponse, ImageSummary,
};
use gantry_runtime::{Bytes, CreateExecOptions, ExecOutput, RuntimeClient, RuntimeError};

// ---------------------------------------------------------------------------
// Fake runtime client
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeRuntimeState {
    images: Mutex<Vec<ImageSummary>>,
    containers: Mutex<Vec<ContainerSummary>>,
    calls: AtomicUsize,
    built: Mutex<Vec<String>>,
    created: Mutex<Vec<(String, ContainerCreateBody)>>,
    started: Mutex<Vec<String>>,
    stopped: Mutex<Vec<String>>,
    removed: Mutex<Vec<String>>,
    volumes_created: Mutex<Vec<String>>,
    volumes_removed: Mutex<Vec<String>>,
    exec_requests: Mutex<Vec<CreateExecOptions<String>>>,
    execs_started: Mutex<Vec<String>>,
    exec_lines: Mutex<Vec<String>>,
    exec_exit_code: Mutex<Option<i64>>,
    stop_error_status: Mutex<Option<u16>>,
    fail_create_container: AtomicBool,
    fail_create_volume: AtomicBool,
    fail_exec_create: AtomicBool,
    fail_exec_stream: AtomicBool,
}

/// Scriptable [`RuntimeClient`] that records every call.
///
/// Clones share state, so a test can keep a handle for assertions after
/// moving a clone into the service under test.
#[derive(Clone, Default)]
pub struct FakeRuntime {
    inner: Arc<FakeRuntimeState>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fake whose daemon already has the given image tag
    pub fn with_image(tag: &str) -> Self {
        let fake = Self::new();
        fake.add_image(tag);
        fake
    }

    pub fn add_image(&self, tag: &str) {
        self.inner.images.lock().unwrap().push(ImageSummary {
            repo_tags: vec![tag.to_string()],
            ..Default::default()
        });
    }

    pub fn add_container(&self, id: &str, name: &str, created: i64) {
        self.inner.containers.lock().unwrap().push(ContainerSummary {
            id: Some(id.to_string()),
            names: Some(vec![format!("/{name}")]),
            created: Some(created),
            ..Default::default()
        });
    }

    pub fn set_exec_lines(&self, lines: &[&str]) {
        *self.inner.exec_lines.lock().unwrap() =
            lines.iter().map(|line| line.to_string()).collect();
    }

    pub fn set_exec_exit_code(&self, code: i64) {
        *self.inner.exec_exit_code.lock().unwrap() = Some(code);
    }

    pub fn fail_stop_with(&self, status: u16) {
        *self.inner.stop_error_status.lock().unwrap() = Some(status);
    }

    pub fn fail_create_container(&self) {
        self.inner.fail_create_container.store(true, Ordering::SeqCst);
    }

    pub fn fail_create_volume(&self) {
        self.inner.fail_create_volume.store(true, Ordering::SeqCst);
    }

    pub fn fail_exec_create(&self) {
        self.inner.fail_exec_create.store(true, Ordering::SeqCst);
    }

    pub fn fail_exec_stream(&self) {
        self.inner.fail_exec_stream.store(true, Ordering::SeqCst);
    }

    /// Total number of runtime calls made through this fake
    pub fn call_count(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }

    pub fn built_tags(&self) -> Vec<String> {
        self.inner.built.lock().unwrap().clone()
    }

    pub fn created_containers(&self) -> Vec<(String, ContainerCreateBody)> {
        self.inner.created.lock().unwrap().clone()
    }

    pub fn started_containers(&self) -> Vec<String> {
        self.inner.started.lock().unwrap().clone()
    }

    pub fn stopped_containers(&self) -> Vec<String> {
        self.inner.stopped.lock().unwrap().clone()
    }

    pub fn removed_containers(&self) -> Vec<String> {
        self.inner.removed.lock().unwrap().clone()
    }

    pub fn created_volumes(&self) -> Vec<String> {
        self.inner.volumes_created.lock().unwrap().clone()
    }

    pub fn removed_volumes(&self) -> Vec<String> {
        self.inner.volumes_removed.lock().unwrap().clone()
    }

    pub fn exec_requests(&self) -> Vec<CreateExecOptions<String>> {
        self.inner.exec_requests.lock().unwrap().clone()
    }

    pub fn started_execs(&self) -> Vec<String> {
        self.inner.execs_started.lock().unwrap().clone()
    }

    fn record_call(&self) {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RuntimeClient for FakeRuntime {
    async fn list_images(&self, _all: bool) -> Result<Vec<ImageSummary>, RuntimeError> {
        self.record_call();
        Ok(self.inner.images.lock().unwrap().clone())
    }

    async fn build_image(&self, tag: &str, _context: Bytes) -> Result<(), RuntimeError> {
        self.record_call();
        self.inner.built.lock().unwrap().push(tag.to_string());
        self.add_image(tag);
        Ok(())
    }

    async fn list_containers(&self, _all: bool) -> Result<Vec<ContainerSummary>, RuntimeError> {
        self.record_call();
        Ok(self.inner.containers.lock().unwrap().clone())
    }

    async fn create_container(
        &self,
        name: &str,
        body: ContainerCreateBody,
    ) -> Result<String, RuntimeError> {
        self.record_call();
        if self.inner.fail_create_container.load(Ordering::SeqCst) {
            return Err(RuntimeError::api(500, "create failed"));
        }
        self.inner
            .created
            .lock()
            .unwrap()
            .push((name.to_string(), body));
        Ok(format!("id-{name}"))
    }

    async fn start_container(&self, name: &str) -> Result<(), RuntimeError> {
        self.record_call();
        self.inner.started.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn stop_container(
        &self,
        name: &str,
        _wait_before_kill: Duration,
    ) -> Result<(), RuntimeError> {
        self.record_call();
        if let Some(status) = *self.inner.stop_error_status.lock().unwrap() {
            return Err(RuntimeError::api(status, "stop failed"));
        }
        self.inner.stopped.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn remove_container(&self, name: &str, _force: bool) -> Result<(), RuntimeError> {
        self.record_call();
        self.inner.removed.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn create_volume(&self, name: &str) -> Result<(), RuntimeError> {
        self.record_call();
        if self.inner.fail_create_volume.load(Ordering::SeqCst) {
            return Err(RuntimeError::api(500, "volume create failed"));
        }
        self.inner
            .volumes_created
            .lock()
            .unwrap()
            .push(name.to_string());
        Ok(())
    }

    async fn remove_volume(&self, name: &str, _force: bool) -> Result<(), RuntimeError> {
        self.record_call();
        self.inner
            .volumes_removed
            .lock()
            .unwrap()
            .push(name.to_string());
        Ok(())
    }

    async fn create_exec(
        &self,
        _container: &str,
        options: CreateExecOptions<String>,
    ) -> Result<String, RuntimeError> {
        self.record_call();
        if self.inner.fail_exec_create.load(Ordering::SeqCst) {
            return Err(RuntimeError::api(500, "exec create failed"));
        }
        self.inner.exec_requests.lock().unwrap().push(options);
        Ok("exec-1".to_string())
    }

    async fn start_exec(&self, exec_id: &str) -> Result<ExecOutput, RuntimeError> {
        self.record_call();
        self.inner
            .execs_started
            .lock()
            .unwrap()
            .push(exec_id.to_string());

        let mut items: Vec<Result<Bytes, RuntimeError>> = self
            .inner
            .exec_lines
            .lock()
            .unwrap()
            .iter()
            .map(|line| Ok(Bytes::from(format!("{line}\n").into_bytes())))
            .collect();
        if self.inner.fail_exec_stream.load(Ordering::SeqCst) {
            items.push(Err(RuntimeError::api(500, "stream reset")));
        }

        Ok(Box::pin(futures_util::stream::iter(items)))
    }

    async fn inspect_container(&self, _name: &str) -> Result<ContainerInspectResponse, RuntimeError> {
        self.record_call();
        Ok(ContainerInspectResponse {
            state: Some(ContainerState {
                running: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    async fn inspect_exec(&self, _exec_id: &str) -> Result<ExecInspectResponse, RuntimeError> {
        self.record_call();
        Ok(ExecInspectResponse {
            exit_code: self.inner.exec_exit_code.lock().unwrap().or(Some(0)),
            running: Some(false),
            ..Default::default()
        })
    }
}

// ---------------------------------------------------------------------------
// Fake runner service
// ---------------------------------------------------------------------------

/// Scripted outcome for one registration attempt
#[derive(Debug, Clone, Copy)]
pub enum Scripted {
    Succeed,
    Refuse,
    Fail(&'static str),
}

struct FakeServiceState {
    script: Mutex<VecDeque<Scripted>>,
    register_calls: AtomicUsize,
    register_times: Mutex<Vec<tokio::time::Instant>>,
    register_delay: Mutex<Option<Duration>>,
    start_calls: AtomicUsize,
    start_result: AtomicBool,
    last_env: Mutex<Vec<String>>,
    stop_calls: AtomicUsize,
    unregister_calls: AtomicUsize,
    fail_unregister: AtomicBool,
}

/// Scriptable [`RunnerService`] that records every lifecycle call.
///
/// Registration consumes the script front-to-back; an empty script means
/// "succeed". Clones share state for post-hoc assertions.
#[derive(Clone)]
pub struct FakeService {
    inner: Arc<FakeServiceState>,
}

impl Default for FakeService {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeService {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(FakeServiceState {
                script: Mutex::new(VecDeque::new()),
                register_calls: AtomicUsize::new(0),
                register_times: Mutex::new(Vec::new()),
                register_delay: Mutex::new(None),
                start_calls: AtomicUsize::new(0),
                start_result: AtomicBool::new(true),
                last_env: Mutex::new(Vec::new()),
                stop_calls: AtomicUsize::new(0),
                unregister_calls: AtomicUsize::new(0),
                fail_unregister: AtomicBool::new(false),
            }),
        }
    }

    /// A fake whose registration attempts play out the given script
    pub fn scripted(outcomes: &[Scripted]) -> Self {
        let fake = Self::new();
        fake.inner
            .script
            .lock()
            .unwrap()
            .extend(outcomes.iter().copied());
        fake
    }

    /// Make each registration attempt take this long (in tokio time)
    pub fn set_register_delay(&self, delay: Duration) {
        *self.inner.register_delay.lock().unwrap() = Some(delay);
    }

    pub fn refuse_start(&self) {
        self.inner.start_result.store(false, Ordering::SeqCst);
    }

    pub fn fail_unregister(&self) {
        self.inner.fail_unregister.store(true, Ordering::SeqCst);
    }

    pub fn register_calls(&self) -> usize {
        self.inner.register_calls.load(Ordering::SeqCst)
    }

    /// Tokio-clock instants at which registration attempts began
    pub fn register_times(&self) -> Vec<tokio::time::Instant> {
        self.inner.register_times.lock().unwrap().clone()
    }

    pub fn start_calls(&self) -> usize {
        self.inner.start_calls.load(Ordering::SeqCst)
    }

    pub fn last_env(&self) -> Vec<String> {
        self.inner.last_env.lock().unwrap().clone()
    }

    pub fn stop_calls(&self) -> usize {
        self.inner.stop_calls.load(Ordering::SeqCst)
    }

    pub fn unregister_calls(&self) -> usize {
        self.inner.unregister_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RunnerService for FakeService {
    async fn register(
        &mut self,
        _token: &str,
        _owner_repo: &str,
        _base_url: &str,
    ) -> anyhow::Result<bool> {
        self.inner.register_calls.fetch_add(1, Ordering::SeqCst);
        self.inner
            .register_times
            .lock()
            .unwrap()
            .push(tokio::time::Instant::now());

        let delay = *self.inner.register_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.inner.script.lock().unwrap().pop_front();
        match next {
            None | Some(Scripted::Succeed) => Ok(true),
            Some(Scripted::Refuse) => Ok(false),
            Some(Scripted::Fail(message)) => Err(anyhow::anyhow!(message)),
        }
    }

    async fn start(&mut self, env_vars: &[String]) -> anyhow::Result<bool> {
        self.inner.start_calls.fetch_add(1, Ordering::SeqCst);
        *self.inner.last_env.lock().unwrap() = env_vars.to_vec();
        Ok(self.inner.start_result.load(Ordering::SeqCst))
    }

    async fn stop(&mut self) -> anyhow::Result<bool> {
        self.inner.stop_calls.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn unregister(&mut self) -> anyhow::Result<bool> {
        self.inner.unregister_calls.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_unregister.load(Ordering::SeqCst) {
            anyhow::bail!("unregister exploded");
        }
        Ok(true)
    }
}
