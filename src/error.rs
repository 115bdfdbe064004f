//! Error types. Startup failures are [`InitError`]s and are fatal, runtime
//! sink failures are [`SinkError`]s and are only ever logged.

use opentelemetry_sdk::error::OTelSdkError;

/// Errors that prevent the process from starting the sampling loop.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    /// Resource metadata or configuration values could not be built.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The metric exporter could not be constructed within the setup timeout.
    #[error("could not create metric exporter: {0}")]
    Connection(String),

    /// A gauge or counter could not be registered.
    #[error("could not register instrument: {0}")]
    Instrument(String),
}

/// A single sink failed to accept a sample. The loop logs these and moves on
/// to the next tick.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("failed to open log file: {0}")]
    Open(#[source] std::io::Error),

    #[error("failed to encode log record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to write log record: {0}")]
    Write(#[source] std::io::Error),
}

/// The meter provider failed to flush or shut down.
#[derive(Debug, thiserror::Error)]
#[error("meter provider {action} failed: {source}")]
pub struct EmitterError {
    action: &'static str,
    #[source]
    source: OTelSdkError,
}

impl EmitterError {
    pub(crate) fn new(action: &'static str, source: OTelSdkError) -> Self {
        Self { action, source }
    }
}
