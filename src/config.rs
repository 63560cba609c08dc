//! Configuration types for graph-batch

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Hard ceiling on requests per batch documented by the server
pub const MAX_BATCH_SIZE: usize = 20;

/// Output shaping mode for an invocation
///
/// Modes are mutually exclusive and fixed for the lifetime of a
/// [`BatchJob`](crate::invocation::BatchJob).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Emit the full per-item response envelope for every successful page
    Raw,
    /// Emit one record per input, correlated back to the original argument,
    /// with paginated results accumulated across pages
    Correlated,
    /// Emit just the result payload; list-shaped bodies (`{"value": [...]}`)
    /// are unwrapped to their inner list (default)
    #[default]
    Plain,
}

/// Configuration for one batching invocation
///
/// All fields have sensible defaults; `BatchConfig::default()` works out of
/// the box against a Graph-style `$batch` endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Maximum requests per outbound batch (default: 20, the server-documented
    /// ceiling; clamped to 1..=20)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Total time budget for throttling retries, measured from invocation
    /// start (default: 5 minutes)
    ///
    /// A value of zero disables retry entirely: a throttled task is pruned on
    /// its first 429.
    #[serde(default = "default_retry_timeout", with = "duration_serde")]
    pub retry_timeout: Duration,

    /// Cooldown applied when a 429 carries no parsable Retry-After header
    /// (default: 5 seconds)
    #[serde(default = "default_retry_after_fallback", with = "duration_serde")]
    pub retry_after_fallback: Duration,

    /// Pause between scheduling rounds when every pending task is still
    /// cooling down (default: 1 second)
    #[serde(default = "default_idle_interval", with = "duration_serde")]
    pub idle_interval: Duration,

    /// Output shaping mode (default: plain)
    #[serde(default)]
    pub output: OutputMode,

    /// Disable transparent pagination: next-page links in successful bodies
    /// are ignored and each task completes on its first page (default: false)
    #[serde(default)]
    pub disable_paging: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            retry_timeout: default_retry_timeout(),
            retry_after_fallback: default_retry_after_fallback(),
            idle_interval: default_idle_interval(),
            output: OutputMode::default(),
            disable_paging: false,
        }
    }
}

impl BatchConfig {
    /// Effective per-round selection cap: `batch_size` clamped to 1..=20
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.clamp(1, MAX_BATCH_SIZE)
    }
}

fn default_batch_size() -> usize {
    MAX_BATCH_SIZE
}

fn default_retry_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_retry_after_fallback() -> Duration {
    Duration::from_secs(5)
}

fn default_idle_interval() -> Duration {
    Duration::from_secs(1)
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
