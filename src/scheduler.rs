//! Batch scheduling: per-round selection and deadline pruning
//!
//! Each round draws up to the configured cap of ready tasks from the pool in
//! FIFO order, skipping tasks still inside a throttle cooldown. As a side
//! effect the pool is pruned: waiting tasks whose window has elapsed past
//! their retry deadline, or can never complete within it, are removed and
//! reported as `ThrottlingRetriesExhausted`.

use tokio::time::Instant;

use crate::report::{ErrorReport, ReportCategory, ReportSink, THROTTLING_RETRIES_EXHAUSTED};
use crate::task::{Task, TaskId, TaskPool};

/// Select the next sub-batch of ready tasks, in pool order
///
/// A task is skipped when:
/// - `wait_until > now` (still cooling down)
/// - `wait_limit < now` (retry deadline already passed; pruning removes it)
/// - `wait_limit < wait_until` (the wait window can never complete)
///
/// Selection stops once `cap` tasks are chosen.
pub(crate) fn select_round(pool: &TaskPool, now: Instant, cap: usize) -> Vec<TaskId> {
    let mut selected = Vec::new();
    for task in pool.iter() {
        if selected.len() >= cap {
            break;
        }
        if selectable(task, now) {
            selected.push(task.id);
        }
    }
    selected
}

fn selectable(task: &Task, now: Instant) -> bool {
    let Some(wait_until) = task.wait_until else {
        return true;
    };
    if wait_until > now {
        return false;
    }
    match task.wait_limit {
        Some(limit) => limit >= now && limit >= wait_until,
        // wait_until without wait_limit cannot happen through the router;
        // treat it as ready rather than stranding the task
        None => true,
    }
}

/// Remove every waiting task whose retry budget is spent, reporting each as
/// `ThrottlingRetriesExhausted`
///
/// Returns the removed tasks in pool order. This never emits output records:
/// in correlated mode the end-of-invocation sweep covers pruned tasks.
pub(crate) fn prune_expired(
    pool: &mut TaskPool,
    now: Instant,
    sink: &dyn ReportSink,
) -> Vec<Task> {
    let expired = pool.extract_where(|task| {
        let (Some(wait_until), Some(wait_limit)) = (task.wait_until, task.wait_limit) else {
            return false;
        };
        wait_limit < now || wait_limit < wait_until
    });

    for task in &expired {
        tracing::debug!(task_id = %task.id, url = %task.url, "Throttling retries exhausted");
        sink.error(
            ErrorReport::new(
                format!("throttling retries exhausted for task {}", task.id),
                THROTTLING_RETRIES_EXHAUSTED,
                ReportCategory::LimitsExceeded,
            )
            .with_context(task.context()),
        );
    }
    expired
}
