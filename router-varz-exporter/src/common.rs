use std::{future::Future, io, pin::Pin};

use thiserror::Error as ThisError;

/// Errors that could occur while building or installing a varz exporter.
#[derive(Debug, ThisError)]
pub enum BuildError {
    /// There was an issue when creating the necessary Tokio runtime to launch the exporter.
    #[error("failed to create Tokio runtime for exporter: {0}")]
    FailedToCreateRuntime(String),

    /// The given address could not be parsed successfully as an IP address/subnet.
    #[error("failed to parse address as a valid IP address/subnet: {0}")]
    InvalidAllowlistAddress(String),

    /// Binding to the listen address did not succeed.
    #[error("failed to create HTTP listener: {0}")]
    FailedToCreateHTTPListener(String),

    /// The configured document path was not an absolute path.
    #[error("document path must start with '/', got {0:?}")]
    InvalidPath(String),
}

/// Errors that could stop a running exporter.
#[derive(Debug, ThisError)]
pub enum ExporterError {
    /// The listener could not be registered with the Tokio runtime.
    #[error("failed to register HTTP listener with the runtime: {0}")]
    Io(#[from] io::Error),
}

/// Convenience type for the future driving an exporter.
pub type ExporterFuture = Pin<Box<dyn Future<Output = Result<(), ExporterError>> + Send + 'static>>;
