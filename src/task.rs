//! Task model: one logical request tracked through batching, retry, and paging
//!
//! A [`Task`] is the in-memory unit of batched work. It is created by the
//! builder, drawn into sub-batches by the scheduler, rewritten by the router
//! when a response carries a next-page link, and removed from the [`TaskPool`]
//! when it completes, fails terminally, or exceeds its retry deadline.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tokio::time::Instant;

/// Unique identifier for a task within one invocation's pending pool
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl TaskId {
    /// Create a new TaskId
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the inner u64 value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for TaskId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<TaskId> for u64 {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Accumulated output of a task across paginated responses
///
/// Only populated in correlated output mode; in raw and plain modes each page
/// is emitted immediately and nothing is buffered here.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum ResultAccumulator {
    /// No page absorbed yet
    #[default]
    Empty,
    /// A single non-list body (no `value` container)
    Single(Value),
    /// Concatenated elements of `value`-array pages, in receipt order
    Items(Vec<Value>),
}

impl ResultAccumulator {
    /// Fold one successful page body into the accumulator
    ///
    /// List-shaped bodies (`{"value": [...]}`) contribute their elements;
    /// anything else is kept whole. A lone non-list body stays a single value
    /// so callers see the body itself rather than a one-element array.
    pub fn absorb(&mut self, body: &Value) {
        let items = body
            .as_object()
            .and_then(|obj| obj.get("value"))
            .and_then(Value::as_array);

        match items {
            Some(elements) => {
                let mut collected = match std::mem::take(self) {
                    ResultAccumulator::Empty => Vec::new(),
                    ResultAccumulator::Single(v) => vec![v],
                    ResultAccumulator::Items(v) => v,
                };
                collected.extend(elements.iter().cloned());
                *self = ResultAccumulator::Items(collected);
            }
            None => match std::mem::take(self) {
                ResultAccumulator::Empty => *self = ResultAccumulator::Single(body.clone()),
                ResultAccumulator::Single(v) => {
                    *self = ResultAccumulator::Items(vec![v, body.clone()]);
                }
                ResultAccumulator::Items(mut v) => {
                    v.push(body.clone());
                    *self = ResultAccumulator::Items(v);
                }
            },
        }
    }

    /// Consume the accumulator into a final result value
    pub fn into_value(self) -> Value {
        match self {
            ResultAccumulator::Empty => Value::Null,
            ResultAccumulator::Single(v) => v,
            ResultAccumulator::Items(v) => Value::Array(v),
        }
    }
}

/// One logical unit of batched work
#[derive(Clone, Debug)]
pub struct Task {
    /// Unique id among currently-pending tasks
    pub id: TaskId,

    /// HTTP verb, uppercased (default GET)
    pub method: String,

    /// Server-relative resource path; rewritten across pages
    pub url: String,

    /// Optional opaque payload, serialized as-is
    pub body: Option<Value>,

    /// Optional header map; keys compare case-insensitively
    pub headers: Option<BTreeMap<String, String>>,

    /// Server defers this item until the referenced task succeeds
    pub depends_on: Option<TaskId>,

    /// Original caller-supplied value, retained for output correlation only;
    /// never sent to the server
    pub argument: Option<Value>,

    /// Accumulated output across pages (correlated mode only)
    pub result: ResultAccumulator,

    /// Do not resend before this instant (set when throttled)
    pub wait_until: Option<Instant>,

    /// Stop retrying after this instant (invocation start + retry timeout,
    /// set when first throttled)
    pub wait_limit: Option<Instant>,
}

impl Task {
    /// Create a task with the given id, method, and url
    pub fn new(id: TaskId, method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id,
            method: method.into().to_ascii_uppercase(),
            url: url.into(),
            body: None,
            headers: None,
            depends_on: None,
            argument: None,
            result: ResultAccumulator::Empty,
            wait_until: None,
            wait_limit: None,
        }
    }

    /// True while the task is inside a throttle cooldown window at `now`
    pub fn is_cooling(&self, now: Instant) -> bool {
        self.wait_until.is_some_and(|until| until > now)
    }

    /// Identifying context for error reports: id, method, url, and the
    /// original argument or request body
    pub fn context(&self) -> Value {
        serde_json::json!({
            "id": self.id,
            "method": self.method,
            "url": self.url,
            "argument": self.argument,
            "body": self.body,
        })
    }
}

/// Mutable collection of all not-yet-resolved tasks for one invocation
///
/// Owned exclusively by the invocation; insertion order is preserved so the
/// scheduler's FIFO draw order matches the order tasks were added.
#[derive(Debug, Default)]
pub struct TaskPool {
    tasks: Vec<Task>,
}

impl TaskPool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pending tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// True when no tasks remain
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// True if a pending task already uses `id`
    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.iter().any(|t| t.id == id)
    }

    /// Append a task, preserving FIFO order
    pub fn push(&mut self, task: Task) {
        self.tasks.push(task);
    }

    /// Borrow a pending task by id
    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Mutably borrow a pending task by id
    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// Remove and return a task by id
    pub fn remove(&mut self, id: TaskId) -> Option<Task> {
        let index = self.tasks.iter().position(|t| t.id == id)?;
        Some(self.tasks.remove(index))
    }

    /// Iterate over pending tasks in FIFO order
    pub fn iter(&self) -> std::slice::Iter<'_, Task> {
        self.tasks.iter()
    }

    /// Remove every task matching the predicate, returning the removed tasks
    /// in pool order
    pub fn extract_where<F>(&mut self, mut predicate: F) -> Vec<Task>
    where
        F: FnMut(&Task) -> bool,
    {
        let mut removed = Vec::new();
        let mut index = 0;
        while index < self.tasks.len() {
            if predicate(&self.tasks[index]) {
                removed.push(self.tasks.remove(index));
            } else {
                index += 1;
            }
        }
        removed
    }

    /// Remove and return every remaining task
    pub fn drain_all(&mut self) -> Vec<Task> {
        std::mem::take(&mut self.tasks)
    }
}
