//! Error types for graph-batch
//!
//! This module provides the library's error handling:
//! - Domain-specific error variants (construction, transport, response parsing)
//! - Machine-readable error codes used when failures are pushed to a
//!   [`ReportSink`](crate::report::ReportSink)
//!
//! Per-item server failures (4xx bodies, throttling) are deliberately NOT
//! modeled here: they are internal routing state, surfaced through the report
//! sink without ever aborting an invocation.

use thiserror::Error;

/// Result type alias for graph-batch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for graph-batch
///
/// These errors describe failures of the batching machinery itself. A value of
/// this type never escapes the control loop to the caller; it is converted into
/// a structured report and pushed to the configured sink.
#[derive(Debug, Error)]
pub enum Error {
    /// A request descriptor could not be turned into a task (e.g. missing url)
    #[error("invalid request descriptor: {0}")]
    Descriptor(String),

    /// A URL template or its arguments could not be expanded
    #[error("template expansion failed: {0}")]
    Template(String),

    /// Network error while submitting a batch
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The batch endpoint itself answered with a non-success status
    #[error("batch endpoint returned status {status}")]
    BatchStatus {
        /// HTTP status code of the whole-batch POST
        status: u16,
    },

    /// The batch endpoint answered 2xx but the envelope could not be parsed
    #[error("malformed batch response: {0}")]
    MalformedResponse(String),

    /// Invalid URL (endpoint construction)
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Machine-readable error code for sink reports
    ///
    /// Clients can use this for programmatic error handling; the human-readable
    /// message comes from the `Display` implementation.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Descriptor(_) => "invalid_descriptor",
            Error::Template(_) => "template_error",
            Error::Network(_) => "network_error",
            Error::BatchStatus { .. } => "batch_status_error",
            Error::MalformedResponse(_) => "malformed_response",
            Error::Url(_) => "invalid_url",
            Error::Serialization(_) => "serialization_error",
            Error::Other(_) => "internal_error",
        }
    }

    /// True for errors raised while building tasks from caller input
    pub fn is_construction(&self) -> bool {
        matches!(self, Error::Descriptor(_) | Error::Template(_))
    }
}
