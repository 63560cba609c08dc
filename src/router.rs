//! Result routing: per-item response dispatch and output shaping
//!
//! Given one per-item response envelope and its originating task, the router
//! decides the outcome by status code range (success with or without more
//! pages, throttled, client error, or unexpected), mutates task state, and
//! produces the output records for the caller per the invocation's output
//! mode.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use url::Url;

use crate::config::{BatchConfig, OutputMode};
use crate::report::{ErrorReport, ReportCategory, ReportSink};
use crate::task::{Task, TaskId};
use crate::transport::BatchResponseItem;

/// Key under which Graph-style APIs place the next-page link
const NEXT_LINK_KEY: &str = "@odata.nextLink";

/// Path prefixes stripped when rewriting an absolute next link to a
/// server-relative url
const VERSION_SEGMENTS: [&str; 2] = ["v1.0/", "beta/"];

/// One output record of an invocation
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutputRecord {
    /// Raw mode: the per-item response envelope exactly as received
    Raw(Value),
    /// Plain mode: the result payload, with `value` containers unwrapped
    Plain(Value),
    /// Correlated mode: one record per input, tied back to its argument
    Correlated(CorrelatedRecord),
}

/// Correlated-mode output record
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CorrelatedRecord {
    /// Task id this record resolves
    pub id: TaskId,

    /// The original caller-supplied value tied to this id
    pub argument: Option<Value>,

    /// Whether the task completed successfully
    pub success: bool,

    /// Accumulated result on success, the error payload on failure, or null
    /// for tasks that never resolved
    pub result: Option<Value>,

    /// Final HTTP status, when one was received
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

/// What the control loop should do with the task after routing
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Disposition {
    /// Task resolved; remove from pool
    Completed,
    /// More pages to fetch; task stays, url already rewritten
    MorePages,
    /// Task is cooling down; stays in pool for a later round
    Throttled,
    /// Task failed terminally; remove from pool
    Failed,
}

/// Routing result: the task's fate plus any output records to emit
#[derive(Debug)]
pub(crate) struct RouteOutcome {
    pub disposition: Disposition,
    pub records: Vec<OutputRecord>,
}

/// Route one per-item response envelope to its originating task
///
/// `run_start` anchors the retry deadline: a task first throttled at any
/// point gets `wait_limit = run_start + retry_timeout`.
pub(crate) fn route(
    task: &mut Task,
    item: &BatchResponseItem,
    config: &BatchConfig,
    now: Instant,
    run_start: Instant,
    sink: &dyn ReportSink,
) -> RouteOutcome {
    match item.status {
        200..=299 => route_success(task, item, config),
        429 => route_throttled(task, item, config, now, run_start),
        400..=499 => route_client_error(task, item, config, sink),
        _ => route_unexpected(task, item, config, sink),
    }
}

fn route_success(
    task: &mut Task,
    item: &BatchResponseItem,
    config: &BatchConfig,
) -> RouteOutcome {
    let next = if config.disable_paging {
        None
    } else {
        item.body
            .get(NEXT_LINK_KEY)
            .and_then(Value::as_str)
            .map(relative_next_link)
    };

    let mut records = Vec::new();
    match config.output {
        // Raw and plain emit every page as soon as it is received
        OutputMode::Raw => records.push(OutputRecord::Raw(item.raw.clone())),
        OutputMode::Plain => records.push(OutputRecord::Plain(plain_payload(&item.body))),
        OutputMode::Correlated => {
            task.result.absorb(&item.body);
            if next.is_none() {
                records.push(OutputRecord::Correlated(CorrelatedRecord {
                    id: task.id,
                    argument: task.argument.clone(),
                    success: true,
                    result: Some(std::mem::take(&mut task.result).into_value()),
                    status: Some(item.status),
                }));
            }
        }
    }

    match next {
        Some(url) => {
            tracing::debug!(task_id = %task.id, next = %url, "Following next-page link");
            task.url = url;
            RouteOutcome {
                disposition: Disposition::MorePages,
                records,
            }
        }
        None => RouteOutcome {
            disposition: Disposition::Completed,
            records,
        },
    }
}

fn route_throttled(
    task: &mut Task,
    item: &BatchResponseItem,
    config: &BatchConfig,
    now: Instant,
    run_start: Instant,
) -> RouteOutcome {
    let cooldown = item.retry_after().unwrap_or(config.retry_after_fallback);
    task.wait_until = Some(now + cooldown);
    task.wait_limit
        .get_or_insert(run_start + config.retry_timeout);

    tracing::debug!(
        task_id = %task.id,
        cooldown_secs = cooldown.as_secs(),
        "Task throttled, deferring"
    );

    // No output yet; the eventual resolution (or exhaustion) produces it
    RouteOutcome {
        disposition: Disposition::Throttled,
        records: Vec::new(),
    }
}

fn route_client_error(
    task: &mut Task,
    item: &BatchResponseItem,
    config: &BatchConfig,
    sink: &dyn ReportSink,
) -> RouteOutcome {
    let server_code = item.body["error"]["code"].as_str().unwrap_or_default();
    sink.error(
        ErrorReport::new(
            format!(
                "request {} {} failed with status {}",
                task.method, task.url, item.status
            ),
            format!("{}|{server_code}", item.status),
            ReportCategory::InvalidArgument,
        )
        .with_context(task.context()),
    );

    RouteOutcome {
        disposition: Disposition::Failed,
        records: failure_records(task, item, config),
    }
}

fn route_unexpected(
    task: &mut Task,
    item: &BatchResponseItem,
    config: &BatchConfig,
    sink: &dyn ReportSink,
) -> RouteOutcome {
    // Distinct from the hard-error path: a warning, not an error report
    sink.warning(&format!(
        "unexpected status {} for task {} ({} {})",
        item.status, task.id, task.method, task.url
    ));

    RouteOutcome {
        disposition: Disposition::Failed,
        records: failure_records(task, item, config),
    }
}

/// Failure output: only correlated mode emits a record for failed items
fn failure_records(
    task: &Task,
    item: &BatchResponseItem,
    config: &BatchConfig,
) -> Vec<OutputRecord> {
    match config.output {
        OutputMode::Correlated => vec![OutputRecord::Correlated(CorrelatedRecord {
            id: task.id,
            argument: task.argument.clone(),
            success: false,
            result: (!item.body.is_null()).then(|| item.body.clone()),
            status: Some(item.status),
        })],
        OutputMode::Raw | OutputMode::Plain => Vec::new(),
    }
}

/// Shape a successful body for plain output: unwrap list-shaped resources
fn plain_payload(body: &Value) -> Value {
    body.as_object()
        .and_then(|obj| obj.get("value"))
        .cloned()
        .unwrap_or_else(|| body.clone())
}

/// Rewrite a next-page link to a server-relative url
///
/// Absolute links lose their scheme/host and any leading `v1.0`/`beta`
/// version segment; already-relative links only lose a leading slash.
fn relative_next_link(link: &str) -> String {
    match Url::parse(link) {
        Ok(parsed) => {
            let mut path = parsed.path().trim_start_matches('/').to_string();
            for segment in VERSION_SEGMENTS {
                if let Some(rest) = path.strip_prefix(segment) {
                    path = rest.to_string();
                    break;
                }
            }
            match parsed.query() {
                Some(query) => format!("{path}?{query}"),
                None => path,
            }
        }
        Err(_) => link.trim_start_matches('/').to_string(),
    }
}
