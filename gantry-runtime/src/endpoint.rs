//! Runtime endpoint resolution
//!
//! Builds an ordered list of candidate daemon addresses (explicit override,
//! OS-local default, TCP fallback), probes each with a cheap list-images
//! call, and hands back a client for the first one that answers. A total
//! failure reports every address that was tried, not just the last one.

use bollard::{API_DEFAULT_VERSION, Docker};
use tracing::{debug, info, warn};

use crate::client::DockerRuntime;
use crate::error::{Result, RuntimeError};

/// Environment variable that overrides endpoint discovery
pub const ENDPOINT_ENV: &str = "DOCKER_HOST";

/// Connection and request timeout for candidate probing, in seconds
const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Daemon address exposed over a local TCP port, tried last
const TCP_FALLBACK: &str = "tcp://localhost:2375";

#[cfg(windows)]
const LOCAL_DEFAULTS: &[&str] = &["npipe:////./pipe/docker_engine"];

#[cfg(not(windows))]
const LOCAL_DEFAULTS: &[&str] = &["unix:///var/run/docker.sock"];

/// Builds the ordered, deduplicated candidate list for this host
///
/// # Arguments
/// * `override_addr` - Explicit endpoint address, placed first when present
pub fn candidates(override_addr: Option<&str>) -> Vec<String> {
    let mut list = Vec::new();

    if let Some(addr) = override_addr {
        let addr = addr.trim();
        if !addr.is_empty() {
            list.push(addr.to_string());
        }
    }

    for addr in LOCAL_DEFAULTS {
        list.push((*addr).to_string());
    }
    list.push(TCP_FALLBACK.to_string());

    let mut deduped: Vec<String> = Vec::with_capacity(list.len());
    for addr in list {
        if !deduped.contains(&addr) {
            deduped.push(addr);
        }
    }
    deduped
}

/// Resolves a live connection to the container runtime
///
/// Tries each candidate in order and returns a client for the first one
/// whose probe succeeds.
///
/// # Arguments
/// * `override_addr` - Explicit endpoint address (typically `DOCKER_HOST`)
///
/// # Errors
/// [`RuntimeError::NoReachableEndpoint`] naming every attempted candidate
/// and wrapping the last underlying failure.
pub async fn resolve(override_addr: Option<&str>) -> Result<DockerRuntime> {
    let tried = candidates(override_addr);
    let mut last_error: Option<RuntimeError> = None;

    for addr in &tried {
        debug!("Probing runtime endpoint candidate {}", addr);

        let docker = match connect(addr) {
            Ok(docker) => docker,
            Err(e) => {
                warn!("Could not open endpoint {}: {}", addr, e);
                last_error = Some(e);
                continue;
            }
        };

        let runtime = DockerRuntime::new(docker);
        match runtime.probe().await {
            Ok(()) => {
                info!("Connected to container runtime at {}", addr);
                return Ok(runtime);
            }
            Err(e) => {
                warn!("Endpoint {} did not answer probe: {}", addr, e);
                last_error = Some(e);
            }
        }
    }

    Err(RuntimeError::NoReachableEndpoint {
        source: Box::new(
            last_error.unwrap_or_else(|| RuntimeError::UnsupportedAddress(String::new())),
        ),
        tried,
    })
}

/// Opens a client for a single candidate address based on its scheme
fn connect(addr: &str) -> Result<Docker> {
    if let Some(rest) = addr.strip_prefix("tcp://") {
        let http = format!("http://{rest}");
        return Docker::connect_with_http(&http, CONNECT_TIMEOUT_SECS, API_DEFAULT_VERSION)
            .map_err(RuntimeError::Api);
    }

    if addr.starts_with("http://") {
        return Docker::connect_with_http(addr, CONNECT_TIMEOUT_SECS, API_DEFAULT_VERSION)
            .map_err(RuntimeError::Api);
    }

    if addr.starts_with("npipe://") {
        #[cfg(windows)]
        return Docker::connect_with_named_pipe(addr, CONNECT_TIMEOUT_SECS, API_DEFAULT_VERSION)
            .map_err(RuntimeError::Api);

        #[cfg(not(windows))]
        return Err(RuntimeError::UnsupportedAddress(addr.to_string()));
    }

    // unix:// or a bare socket path
    Docker::connect_with_socket(addr, CONNECT_TIMEOUT_SECS, API_DEFAULT_VERSION)
        .map_err(RuntimeError::Api)
}
