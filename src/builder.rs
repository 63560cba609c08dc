//! Task construction from caller input
//!
//! Two ingestion paths feed the task pool:
//! - a list of [`RequestDescriptor`]s, either bare URL strings or structured
//!   request specs
//! - one or more URL templates expanded against an argument list, with
//!   optional property selectors for multi-value substitution
//!
//! A descriptor or argument that cannot be resolved into a url is reported
//! through the sink as a construction error and skipped; it never aborts the
//! remaining items, on either path.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::error::{Error, Result};
use crate::report::{ErrorReport, REQUEST_CONSTRUCTION_FAILED, ReportCategory, ReportSink};
use crate::task::{Task, TaskId, TaskPool};

/// One caller-supplied request, either a bare URL or a structured spec
///
/// Deserializes from a JSON string or object, so descriptor lists can be fed
/// straight from configuration or another API's output.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestDescriptor {
    /// A bare relative URL; method, body, and headers come from the defaults
    Url(String),
    /// A fully specified request
    Request(RequestSpec),
}

impl From<&str> for RequestDescriptor {
    fn from(url: &str) -> Self {
        RequestDescriptor::Url(url.to_string())
    }
}

impl From<String> for RequestDescriptor {
    fn from(url: String) -> Self {
        RequestDescriptor::Url(url)
    }
}

/// Structured request descriptor
///
/// Every field except `url` is optional; omitted fields fall back to the
/// invocation's [`RequestDefaults`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RequestSpec {
    /// Server-relative resource path
    #[serde(default)]
    pub url: Option<String>,

    /// HTTP verb (uppercased at ingestion)
    #[serde(default)]
    pub method: Option<String>,

    /// Opaque request payload
    #[serde(default)]
    pub body: Option<Value>,

    /// Request headers
    #[serde(default)]
    pub headers: Option<BTreeMap<String, String>>,

    /// Caller-chosen task id (positive; must not collide with a pending task)
    #[serde(default)]
    pub id: Option<u64>,

    /// Id of a task the server must complete first
    #[serde(default, rename = "dependsOn")]
    pub depends_on: Option<u64>,
}

/// Defaults applied when a descriptor omits method, body, or headers
#[derive(Clone, Debug)]
pub struct RequestDefaults {
    /// Default HTTP verb (default: GET)
    pub method: String,
    /// Default request payload
    pub body: Option<Value>,
    /// Default request headers
    pub headers: Option<BTreeMap<String, String>>,
}

impl Default for RequestDefaults {
    fn default() -> Self {
        Self {
            method: "GET".to_string(),
            body: None,
            headers: None,
        }
    }
}

/// Allocates task ids for one invocation
///
/// Keeps a running "next id" counter starting at 1. Explicit ids are used
/// verbatim and advance the counter past them; auto-assigned ids skip values
/// already held by a pending task (checked against pool membership, not just
/// the counter), so mixed explicit/implicit ordering never collides.
#[derive(Debug)]
pub struct IdAllocator {
    next: u64,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdAllocator {
    /// Create an allocator starting at id 1
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Record a caller-chosen id, advancing the counter to
    /// `max(counter, id + 1)`
    pub fn claim_explicit(&mut self, id: u64) {
        self.next = self.next.max(id.saturating_add(1));
    }

    /// Assign the next id not used by any pending task
    pub fn next_free(&mut self, pool: &TaskPool) -> TaskId {
        let mut candidate = self.next;
        while pool.contains(TaskId::new(candidate)) {
            candidate += 1;
        }
        self.next = candidate + 1;
        TaskId::new(candidate)
    }
}

/// Convert descriptors into tasks and append them to the pool
///
/// Returns the ids of the tasks created, in descriptor order. Malformed
/// descriptors are reported through the sink and skipped.
pub(crate) fn build_from_descriptors(
    pool: &mut TaskPool,
    alloc: &mut IdAllocator,
    descriptors: Vec<RequestDescriptor>,
    defaults: &RequestDefaults,
    sink: &dyn ReportSink,
) -> Vec<TaskId> {
    let mut created = Vec::new();
    for descriptor in descriptors {
        match task_from_descriptor(pool, alloc, &descriptor, defaults) {
            Ok(task) => {
                created.push(task.id);
                pool.push(task);
            }
            Err(e) => report_construction_error(sink, &e, descriptor_context(&descriptor)),
        }
    }
    created
}

/// Expand templates against an argument list and append one task per
/// template × argument combination
///
/// With `properties`, each (object) argument contributes the named properties
/// positionally to the template's `{0}`, `{1}`, ... placeholders; without,
/// the scalar argument itself fills `{0}`. Substituted values are
/// percent-encoded. Unresolvable arguments are reported and skipped.
pub(crate) fn build_from_templates(
    pool: &mut TaskPool,
    alloc: &mut IdAllocator,
    templates: &[String],
    arguments: &[Value],
    properties: Option<&[String]>,
    defaults: &RequestDefaults,
    sink: &dyn ReportSink,
) -> Vec<TaskId> {
    let mut created = Vec::new();
    for argument in arguments {
        let values = match substitution_values(argument, properties) {
            Ok(v) => v,
            Err(e) => {
                report_construction_error(sink, &e, argument.clone());
                continue;
            }
        };
        for template in templates {
            match format_template(template, &values) {
                Ok(url) => {
                    let id = alloc.next_free(pool);
                    let mut task = Task::new(id, defaults.method.clone(), url);
                    task.body = defaults.body.clone();
                    task.headers = defaults.headers.clone();
                    task.argument = Some(argument.clone());
                    created.push(id);
                    pool.push(task);
                }
                Err(e) => report_construction_error(sink, &e, argument.clone()),
            }
        }
    }
    created
}

fn task_from_descriptor(
    pool: &TaskPool,
    alloc: &mut IdAllocator,
    descriptor: &RequestDescriptor,
    defaults: &RequestDefaults,
) -> Result<Task> {
    match descriptor {
        RequestDescriptor::Url(url) => {
            let url = non_empty_url(url)?;
            let id = alloc.next_free(pool);
            let mut task = Task::new(id, defaults.method.clone(), url);
            task.body = defaults.body.clone();
            task.headers = defaults.headers.clone();
            task.argument = Some(Value::String(url.to_string()));
            Ok(task)
        }
        RequestDescriptor::Request(spec) => {
            let url = non_empty_url(spec.url.as_deref().unwrap_or(""))?;
            let id = match spec.id {
                Some(0) => {
                    return Err(Error::Descriptor("id must be a positive integer".into()));
                }
                Some(explicit) => {
                    if pool.contains(TaskId::new(explicit)) {
                        return Err(Error::Descriptor(format!(
                            "id {explicit} is already used by a pending task"
                        )));
                    }
                    alloc.claim_explicit(explicit);
                    TaskId::new(explicit)
                }
                None => alloc.next_free(pool),
            };

            let method = spec.method.clone().unwrap_or_else(|| defaults.method.clone());
            let mut task = Task::new(id, method, url);
            task.body = spec.body.clone().or_else(|| defaults.body.clone());
            task.headers = spec.headers.clone().or_else(|| defaults.headers.clone());
            task.depends_on = spec.depends_on.map(TaskId::new);
            task.argument = serde_json::to_value(spec).ok();
            Ok(task)
        }
    }
}

fn non_empty_url(url: &str) -> Result<&str> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(Error::Descriptor("descriptor has no resolvable url".into()));
    }
    Ok(trimmed)
}

/// Resolve the positional substitution values for one argument
fn substitution_values(argument: &Value, properties: Option<&[String]>) -> Result<Vec<String>> {
    match properties {
        Some(props) => {
            let object = argument.as_object().ok_or_else(|| {
                Error::Template("property selectors require an object argument".into())
            })?;
            props
                .iter()
                .map(|prop| {
                    let value = object.get(prop).ok_or_else(|| {
                        Error::Template(format!("argument has no property '{prop}'"))
                    })?;
                    scalar_to_string(value)
                        .ok_or_else(|| Error::Template(format!("property '{prop}' is not scalar")))
                })
                .collect()
        }
        None => {
            let value = scalar_to_string(argument)
                .ok_or_else(|| Error::Template("argument is not a scalar value".into()))?;
            Ok(vec![value])
        }
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

#[allow(clippy::expect_used)]
fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"\{(\d+)\}").expect("literal regex is valid"))
}

/// Substitute `{0}`, `{1}`, ... placeholders with percent-encoded values
fn format_template(template: &str, values: &[String]) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for caps in placeholder_regex().captures_iter(template) {
        let matched = caps.get(0).ok_or_else(|| {
            Error::Template("placeholder match without capture".into())
        })?;
        let index: usize = caps[1]
            .parse()
            .map_err(|_| Error::Template(format!("placeholder index too large in '{template}'")))?;
        let value = values.get(index).ok_or_else(|| {
            Error::Template(format!(
                "template '{template}' references {{{index}}} but only {} value(s) are available",
                values.len()
            ))
        })?;
        out.push_str(&template[last..matched.start()]);
        out.push_str(&urlencoding::encode(value));
        last = matched.end();
    }
    out.push_str(&template[last..]);
    Ok(out)
}

fn descriptor_context(descriptor: &RequestDescriptor) -> Value {
    serde_json::to_value(descriptor).unwrap_or(Value::Null)
}

fn report_construction_error(sink: &dyn ReportSink, error: &Error, context: Value) {
    sink.error(
        ErrorReport::new(
            error.to_string(),
            REQUEST_CONSTRUCTION_FAILED,
            ReportCategory::InvalidArgument,
        )
        .with_context(context),
    );
}
