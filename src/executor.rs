//! Batch execution: wire serialization and per-round submission
//!
//! Takes the scheduler's selection, regenerates each task's wire item from
//! its current state (the url changes across pages), sorts the request list
//! by numeric id for a stable server-side processing order, and submits the
//! whole round through the transport.

use crate::error::Result;
use crate::report::ReportSink;
use crate::task::{Task, TaskId, TaskPool};
use crate::transport::{BatchPayload, BatchRequestItem, BatchResponseItem, BatchTransport};

/// Serialize one task into its wire form
///
/// Derived, never stored: regenerated from the task's current `url` each
/// time it is scheduled. The caller-retained `argument` is never included.
pub(crate) fn wire_item(task: &Task) -> BatchRequestItem {
    BatchRequestItem {
        id: task.id.to_string(),
        method: task.method.clone(),
        url: task.url.clone(),
        body: task.body.clone(),
        headers: task.headers.clone(),
        depends_on: task.depends_on.map(|dep| vec![dep.to_string()]),
    }
}

/// Assemble the round's payload, sorted by numeric task id
pub(crate) fn build_payload(pool: &TaskPool, selected: &[TaskId]) -> BatchPayload {
    let mut ids: Vec<TaskId> = selected.to_vec();
    ids.sort_unstable();

    let requests = ids
        .iter()
        .filter_map(|id| pool.get(*id))
        .map(wire_item)
        .collect();
    BatchPayload { requests }
}

/// Submit one round and parse the per-item envelopes
///
/// A transport-level failure propagates to the caller (the whole sub-batch
/// is abandoned there). A single malformed item inside an otherwise valid
/// envelope is reported as a warning and skipped so the rest of the round
/// still routes.
pub(crate) async fn submit_round(
    transport: &dyn BatchTransport,
    payload: &BatchPayload,
    sink: &dyn ReportSink,
) -> Result<Vec<BatchResponseItem>> {
    let envelope = transport.submit(payload).await?;

    let mut items = Vec::with_capacity(envelope.responses.len());
    for raw in envelope.responses {
        match BatchResponseItem::from_value(raw) {
            Ok(item) => items.push(item),
            Err(e) => sink.warning(&format!("skipping unparsable batch item: {e}")),
        }
    }
    Ok(items)
}
