//! Error and warning reporting sink
//!
//! Nothing that goes wrong during an invocation aborts it: every failure is
//! turned into a structured [`ErrorReport`] (or a plain warning string) and
//! pushed into a [`ReportSink`]. The caller decides what to do with them:
//! log, collect, or forward to its own error surface.
//!
//! Two implementations ship with the crate:
//! - [`TracingSink`] - logs through `tracing` (the default)
//! - [`MemorySink`] - collects reports in memory, for tests and callers that
//!   want to inspect failures after the run

use serde_json::Value;
use std::fmt;
use std::sync::Mutex;

/// Error code reported when a throttled task exhausts its retry budget
pub const THROTTLING_RETRIES_EXHAUSTED: &str = "ThrottlingRetriesExhausted";

/// Error code reported when a descriptor or template argument cannot be
/// turned into a task
pub const REQUEST_CONSTRUCTION_FAILED: &str = "RequestConstructionFailed";

/// Broad classification attached to every error report
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReportCategory {
    /// Caller-supplied input was unusable, or the server rejected a request
    InvalidArgument,
    /// The batch submission itself failed at the transport level
    ConnectionError,
    /// A server response could not be interpreted
    InvalidResult,
    /// A retry or rate-limit budget was exceeded
    LimitsExceeded,
    /// No more specific category applies
    NotSpecified,
}

impl fmt::Display for ReportCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReportCategory::InvalidArgument => "invalid argument",
            ReportCategory::ConnectionError => "connection error",
            ReportCategory::InvalidResult => "invalid result",
            ReportCategory::LimitsExceeded => "limits exceeded",
            ReportCategory::NotSpecified => "not specified",
        };
        write!(f, "{name}")
    }
}

/// One structured, non-fatal failure report
///
/// Carries enough context (original request payload or argument) for the
/// caller to retry the failed work manually.
#[derive(Clone, Debug)]
pub struct ErrorReport {
    /// Human-readable description of what failed
    pub message: String,
    /// Machine-readable error code (e.g. `ThrottlingRetriesExhausted`,
    /// `404|itemNotFound`)
    pub code: String,
    /// Broad failure classification
    pub category: ReportCategory,
    /// Identifying data for the failed task or sub-batch
    pub context: Option<Value>,
}

impl ErrorReport {
    /// Create a report without context data
    pub fn new(
        message: impl Into<String>,
        code: impl Into<String>,
        category: ReportCategory,
    ) -> Self {
        Self {
            message: message.into(),
            code: code.into(),
            category,
            context: None,
        }
    }

    /// Attach identifying context data
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }
}

/// Sink for non-fatal failures surfaced during an invocation
///
/// Implementations must never panic; the control loop keeps running after
/// every call.
pub trait ReportSink: Send + Sync {
    /// Report a recoverable error; execution continues
    fn error(&self, report: ErrorReport);

    /// Report an informational warning; execution continues
    fn warning(&self, message: &str);
}

/// Default sink: forwards reports to `tracing`
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl ReportSink for TracingSink {
    fn error(&self, report: ErrorReport) {
        tracing::error!(
            code = %report.code,
            category = %report.category,
            context = ?report.context,
            "{}",
            report.message
        );
    }

    fn warning(&self, message: &str) {
        tracing::warn!("{message}");
    }
}

/// In-memory sink collecting every report for later inspection
#[derive(Debug, Default)]
pub struct MemorySink {
    errors: Mutex<Vec<ErrorReport>>,
    warnings: Mutex<Vec<String>>,
}

impl MemorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all error reports received so far
    pub fn errors(&self) -> Vec<ErrorReport> {
        self.errors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Snapshot of all warnings received so far
    pub fn warnings(&self) -> Vec<String> {
        self.warnings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl ReportSink for MemorySink {
    fn error(&self, report: ErrorReport) {
        self.errors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(report);
    }

    fn warning(&self, message: &str) {
        self.warnings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(message.to_string());
    }
}
