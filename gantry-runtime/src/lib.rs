//! Gantry runtime client
//!
//! Connection discovery and a narrow client facade for the container
//! runtime that hosts gantry's runner containers.
//!
//! This crate deliberately exposes only the daemon operations the runner
//! lifecycle needs: image listing and building, container create/start/
//! stop/remove, volume create/remove, and exec sessions with an attached
//! output stream. The [`RuntimeClient`] trait exists so the runner service
//! can be exercised against deterministic, network-free fakes.
//!
//! # Example
//!
//! ```no_run
//! use gantry_runtime::{RuntimeClient, endpoint};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), gantry_runtime::RuntimeError> {
//!     let runtime = endpoint::resolve(std::env::var(endpoint::ENDPOINT_ENV).ok().as_deref()).await?;
//!     let images = runtime.list_images(true).await?;
//!     println!("daemon knows {} images", images.len());
//!     Ok(())
//! }
//! ```

mod client;
pub mod endpoint;
pub mod error;

pub use client::{DockerRuntime, ExecOutput, RuntimeClient, dockerfile_context};
pub use error::{Result, RuntimeError};

// Wire types used across the facade boundary, re-exported so callers do
// not need a direct dependency on the underlying client crate.
pub use bollard::exec::CreateExecOptions;
pub use bollard::models;
pub use bytes::Bytes;
