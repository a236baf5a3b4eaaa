//! Error types for the runtime client

use thiserror::Error;

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors that can occur when talking to the container runtime
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The runtime API rejected or failed a call
    #[error("runtime API error: {0}")]
    Api(#[from] bollard::errors::Error),

    /// The daemon reported a failure while building an image
    #[error("image build failed: {0}")]
    Build(String),

    /// I/O failure while assembling a build context
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An endpoint candidate used an address scheme this platform cannot open
    #[error("unsupported endpoint address: {0}")]
    UnsupportedAddress(String),

    /// Every endpoint candidate was tried and none answered the probe
    #[error("no reachable container runtime endpoint (tried: {})", .tried.join(", "))]
    NoReachableEndpoint {
        /// Every address that was attempted, in probe order
        tried: Vec<String>,
        /// The failure from the last candidate
        #[source]
        source: Box<RuntimeError>,
    },
}

impl RuntimeError {
    /// Create a daemon API error from a status code and message
    ///
    /// Mostly useful to fakes that need to simulate daemon responses.
    pub fn api(status_code: u16, message: impl Into<String>) -> Self {
        Self::Api(bollard::errors::Error::DockerResponseServerError {
            status_code,
            message: message.into(),
        })
    }

    /// Check whether this error is the daemon's "no such object" response
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Api(bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                ..
            })
        )
    }
}
