//! # graph-batch
//!
//! Client-side batching layer for Graph-style `$batch` REST endpoints.
//!
//! ## Design Philosophy
//!
//! graph-batch is designed to be:
//! - **Batching-transparent** - Add any number of requests; they are split
//!   into capped sub-batches automatically
//! - **Throttle-aware** - 429 responses are retried per item with
//!   `Retry-After` cooldowns and a bounded retry budget
//! - **Non-aborting** - A failing item is reported and skipped, never
//!   taking the rest of the batch down with it
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use graph_batch::{BatchConfig, BatchJob, HttpTransport};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let base = url::Url::parse("https://graph.example.com/v1.0/")?;
//!     let transport = HttpTransport::new(reqwest::Client::new(), base)?;
//!
//!     let mut job = BatchJob::new(BatchConfig::default());
//!     job.add_requests(["me", "me/messages?$top=5", "users/ada@example.com"]);
//!
//!     let mut run = job.run(Arc::new(transport));
//!     while let Some(record) = run.next().await {
//!         println!("{record:?}");
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Request descriptors, templates, and task construction
pub mod builder;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Job assembly and the batching control loop
pub mod invocation;
/// Error-report sinks
pub mod report;
/// Response routing and output records
pub mod router;
/// Task model and the pending-task pool
pub mod task;
/// Batch wire format and HTTP transport
pub mod transport;

mod executor;
mod scheduler;

// Re-export commonly used types
pub use builder::{IdAllocator, RequestDefaults, RequestDescriptor, RequestSpec};
pub use config::{BatchConfig, OutputMode, MAX_BATCH_SIZE};
pub use error::{Error, Result};
pub use invocation::{BatchJob, BatchRun};
pub use report::{
    ErrorReport, MemorySink, ReportCategory, ReportSink, TracingSink,
    REQUEST_CONSTRUCTION_FAILED, THROTTLING_RETRIES_EXHAUSTED,
};
pub use router::{CorrelatedRecord, OutputRecord};
pub use task::{ResultAccumulator, Task, TaskId, TaskPool};
pub use transport::{
    BatchPayload, BatchRequestItem, BatchResponse, BatchResponseItem, BatchTransport,
    HttpTransport, DEFAULT_BATCH_ENDPOINT,
};
