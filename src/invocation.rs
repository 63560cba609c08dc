//! Invocation surface: job assembly and the batching control loop
//!
//! A [`BatchJob`] collects requests (descriptors or template expansions),
//! then [`BatchJob::run`] hands the pool to a [`BatchRun`], a pull-based
//! driver that repeatedly selects up to a sub-batch of ready tasks, submits
//! them in one `$batch` call, routes the per-item responses, and yields
//! output records as they become available. The run ends when the pool is
//! empty; in correlated mode a final sweep emits a failure record for every
//! input that never resolved, so each input maps to exactly one record.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use futures::Stream;
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::builder::{
    self, IdAllocator, RequestDefaults, RequestDescriptor,
};
use crate::config::{BatchConfig, OutputMode};
use crate::error::Error;
use crate::executor;
use crate::report::{ErrorReport, ReportCategory, ReportSink, TracingSink};
use crate::router::{self, CorrelatedRecord, Disposition, OutputRecord};
use crate::scheduler;
use crate::task::{TaskId, TaskPool};
use crate::transport::BatchTransport;

/// Output correlation state for one input, kept after its task leaves the
/// pool
#[derive(Debug)]
struct CorrelationEntry {
    argument: Option<Value>,
    emitted: bool,
}

/// A batch job under assembly
///
/// Collects tasks from descriptors and templates, carries the configuration
/// and report sink, and turns into a [`BatchRun`] once all inputs are added.
pub struct BatchJob {
    config: BatchConfig,
    pool: TaskPool,
    alloc: IdAllocator,
    defaults: RequestDefaults,
    sink: Arc<dyn ReportSink>,
    correlation: BTreeMap<TaskId, CorrelationEntry>,
}

impl std::fmt::Debug for BatchJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchJob")
            .field("config", &self.config)
            .field("pending", &self.pool.len())
            .finish_non_exhaustive()
    }
}

impl BatchJob {
    /// Create a job with the given configuration, reporting to `tracing`
    pub fn new(config: BatchConfig) -> Self {
        Self::with_sink(config, Arc::new(TracingSink))
    }

    /// Create a job reporting construction and execution errors to `sink`
    pub fn with_sink(config: BatchConfig, sink: Arc<dyn ReportSink>) -> Self {
        Self {
            config,
            pool: TaskPool::new(),
            alloc: IdAllocator::new(),
            defaults: RequestDefaults::default(),
            sink,
            correlation: BTreeMap::new(),
        }
    }

    /// Replace the defaults applied to descriptors that omit method, body,
    /// or headers
    pub fn set_defaults(&mut self, defaults: RequestDefaults) {
        self.defaults = defaults;
    }

    /// Add requests from descriptors
    ///
    /// Malformed descriptors are reported through the sink and skipped; the
    /// rest of the batch proceeds. Returns the ids of the tasks created, in
    /// descriptor order.
    pub fn add_requests<D>(&mut self, descriptors: impl IntoIterator<Item = D>) -> Vec<TaskId>
    where
        D: Into<RequestDescriptor>,
    {
        let descriptors = descriptors.into_iter().map(Into::into).collect();
        let created = builder::build_from_descriptors(
            &mut self.pool,
            &mut self.alloc,
            descriptors,
            &self.defaults,
            self.sink.as_ref(),
        );
        self.record_correlation(&created);
        created
    }

    /// Add requests by expanding url templates against an argument list
    ///
    /// Each argument is combined with every template; `{0}`, `{1}`, ...
    /// placeholders are filled from the argument (or from the named
    /// `properties` of an object argument) and percent-encoded. Arguments
    /// that cannot be resolved are reported and skipped.
    pub fn add_from_templates(
        &mut self,
        templates: &[String],
        arguments: &[Value],
        properties: Option<&[String]>,
    ) -> Vec<TaskId> {
        let created = builder::build_from_templates(
            &mut self.pool,
            &mut self.alloc,
            templates,
            arguments,
            properties,
            &self.defaults,
            self.sink.as_ref(),
        );
        self.record_correlation(&created);
        created
    }

    /// Number of tasks waiting to be dispatched
    pub fn pending(&self) -> usize {
        self.pool.len()
    }

    /// Start executing against `transport`
    pub fn run(self, transport: Arc<dyn BatchTransport>) -> BatchRun {
        self.run_cancellable(transport, CancellationToken::new())
    }

    /// Start executing; cancelling `cancel` abandons all pending tasks at
    /// the next round boundary
    pub fn run_cancellable(
        self,
        transport: Arc<dyn BatchTransport>,
        cancel: CancellationToken,
    ) -> BatchRun {
        BatchRun {
            config: self.config,
            pool: self.pool,
            transport,
            sink: self.sink,
            cancel,
            correlation: self.correlation,
            buffer: VecDeque::new(),
            started: None,
            swept: false,
        }
    }

    fn record_correlation(&mut self, created: &[TaskId]) {
        for id in created {
            let argument = self.pool.get(*id).and_then(|task| task.argument.clone());
            self.correlation.insert(
                *id,
                CorrelationEntry {
                    argument,
                    emitted: false,
                },
            );
        }
    }
}

/// An executing batch invocation
///
/// Pull records with [`next`](BatchRun::next), drain them all with
/// [`collect`](BatchRun::collect), or adapt to a [`Stream`] with
/// [`into_stream`](BatchRun::into_stream). Nothing is sent until the first
/// record is requested.
pub struct BatchRun {
    config: BatchConfig,
    pool: TaskPool,
    transport: Arc<dyn BatchTransport>,
    sink: Arc<dyn ReportSink>,
    cancel: CancellationToken,
    correlation: BTreeMap<TaskId, CorrelationEntry>,
    buffer: VecDeque<OutputRecord>,
    started: Option<Instant>,
    swept: bool,
}

impl std::fmt::Debug for BatchRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchRun")
            .field("pending", &self.pool.len())
            .field("buffered", &self.buffer.len())
            .finish_non_exhaustive()
    }
}

impl BatchRun {
    /// Yield the next output record, driving rounds as needed
    ///
    /// Returns `None` once every task has resolved and, in correlated mode,
    /// the final sweep has run.
    pub async fn next(&mut self) -> Option<OutputRecord> {
        loop {
            if let Some(record) = self.buffer.pop_front() {
                return Some(record);
            }
            if self.pool.is_empty() {
                if self.swept {
                    return None;
                }
                self.swept = true;
                self.sweep_unresolved();
                continue;
            }
            self.round().await;
        }
    }

    /// Drain the run to completion and return all records in emission order
    pub async fn collect(mut self) -> Vec<OutputRecord> {
        let mut records = Vec::new();
        while let Some(record) = self.next().await {
            records.push(record);
        }
        records
    }

    /// Adapt the run into a [`Stream`] of output records
    pub fn into_stream(self) -> impl Stream<Item = OutputRecord> {
        futures::stream::unfold(self, |mut run| async move {
            run.next().await.map(|record| (record, run))
        })
    }

    /// Execute one round: prune, select, submit, route
    async fn round(&mut self) {
        let run_start = *self.started.get_or_insert_with(Instant::now);

        if self.cancel.is_cancelled() {
            let abandoned = self.pool.drain_all();
            tracing::debug!(count = abandoned.len(), "Run cancelled, abandoning tasks");
            self.sink
                .warning(&format!("cancelled with {} tasks pending", abandoned.len()));
            return;
        }

        let now = Instant::now();
        scheduler::prune_expired(&mut self.pool, now, self.sink.as_ref());

        let selected =
            scheduler::select_round(&self.pool, now, self.config.effective_batch_size());
        if selected.is_empty() {
            if !self.pool.is_empty() {
                // Everything still pending is cooling down
                tokio::time::sleep(self.config.idle_interval).await;
            }
            return;
        }

        // A selected task is being sent now; its cooldown no longer applies
        for id in &selected {
            if let Some(task) = self.pool.get_mut(*id) {
                task.wait_until = None;
            }
        }

        let payload = executor::build_payload(&self.pool, &selected);
        tracing::debug!(
            size = payload.requests.len(),
            pending = self.pool.len(),
            "Submitting sub-batch"
        );

        let items = match executor::submit_round(
            self.transport.as_ref(),
            &payload,
            self.sink.as_ref(),
        )
        .await
        {
            Ok(items) => items,
            Err(e) => {
                self.abandon_selected(&selected, &e);
                return;
            }
        };

        let mut answered = BTreeSet::new();
        for item in items {
            answered.insert(item.id);
            let Some(task) = self.pool.get_mut(item.id) else {
                self.sink.warning(&format!(
                    "response references unknown task id {}",
                    item.id
                ));
                continue;
            };

            let outcome = router::route(
                task,
                &item,
                &self.config,
                Instant::now(),
                run_start,
                self.sink.as_ref(),
            );

            for record in &outcome.records {
                if let OutputRecord::Correlated(correlated) = record {
                    self.mark_emitted(correlated.id);
                }
            }
            self.buffer.extend(outcome.records);

            match outcome.disposition {
                Disposition::Completed | Disposition::Failed => {
                    self.pool.remove(item.id);
                }
                Disposition::MorePages | Disposition::Throttled => {}
            }
        }

        // Items the server silently dropped would otherwise loop forever
        for id in selected {
            if !answered.contains(&id) && self.pool.contains(id) {
                self.sink
                    .warning(&format!("no response item for task {id}, dropping it"));
                self.pool.remove(id);
            }
        }
    }

    /// Whole-round transport failure: report once and drop every selected
    /// task; the rest of the pool is unaffected
    fn abandon_selected(&mut self, selected: &[TaskId], error: &Error) {
        self.sink.error(ErrorReport::new(
            format!("batch submission failed: {error}"),
            error.code(),
            ReportCategory::ConnectionError,
        ));
        for id in selected {
            self.pool.remove(*id);
        }
    }

    fn mark_emitted(&mut self, id: TaskId) {
        if let Some(entry) = self.correlation.get_mut(&id) {
            entry.emitted = true;
        }
    }

    /// End-of-run sweep (correlated mode): every input that never produced
    /// a record gets a failure record, keeping the one-record-per-input
    /// guarantee
    fn sweep_unresolved(&mut self) {
        if self.config.output != OutputMode::Correlated {
            return;
        }
        for (id, entry) in &mut self.correlation {
            if entry.emitted {
                continue;
            }
            entry.emitted = true;
            self.buffer
                .push_back(OutputRecord::Correlated(CorrelatedRecord {
                    id: *id,
                    argument: entry.argument.clone(),
                    success: false,
                    result: None,
                    status: None,
                }));
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputMode;
    use crate::report::{MemorySink, THROTTLING_RETRIES_EXHAUSTED};
    use crate::transport::{BatchPayload, BatchResponse};
    use async_trait::async_trait;
    use futures::StreamExt;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Plays back one scripted outcome per submission and records the
    /// payloads it saw
    struct ScriptedTransport {
        script: Mutex<VecDeque<crate::error::Result<Vec<Value>>>>,
        seen: Mutex<Vec<BatchPayload>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<crate::error::Result<Vec<Value>>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn payload_sizes(&self) -> Vec<usize> {
            self.seen
                .lock()
                .unwrap()
                .iter()
                .map(|p| p.requests.len())
                .collect()
        }

        fn requested_urls(&self) -> Vec<String> {
            self.seen
                .lock()
                .unwrap()
                .iter()
                .flat_map(|p| p.requests.iter().map(|r| r.url.clone()))
                .collect()
        }
    }

    #[async_trait]
    impl BatchTransport for ScriptedTransport {
        async fn submit(&self, payload: &BatchPayload) -> crate::error::Result<BatchResponse> {
            self.seen.lock().unwrap().push(payload.clone());
            match self.script.lock().unwrap().pop_front() {
                Some(Ok(responses)) => Ok(BatchResponse { responses }),
                Some(Err(e)) => Err(e),
                None => panic!("transport called more times than scripted"),
            }
        }
    }

    /// Answers every request in the payload with a 200 and the given body
    struct EchoTransport {
        body: Value,
        seen: Mutex<Vec<usize>>,
    }

    impl EchoTransport {
        fn new(body: Value) -> Arc<Self> {
            Arc::new(Self {
                body,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl BatchTransport for EchoTransport {
        async fn submit(&self, payload: &BatchPayload) -> crate::error::Result<BatchResponse> {
            self.seen.lock().unwrap().push(payload.requests.len());
            let responses = payload
                .requests
                .iter()
                .map(|r| json!({"id": r.id.clone(), "status": 200, "body": self.body.clone()}))
                .collect();
            Ok(BatchResponse { responses })
        }
    }

    fn job_with(mode: OutputMode, sink: Arc<MemorySink>) -> BatchJob {
        let config = BatchConfig {
            output: mode,
            ..Default::default()
        };
        BatchJob::with_sink(config, sink)
    }

    // ------------------------------------------------------------------
    // Basic flow
    // ------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn plain_run_emits_one_record_per_request() {
        let sink = Arc::new(MemorySink::new());
        let mut job = job_with(OutputMode::Plain, sink.clone());
        job.add_requests(["users/a", "users/b", "users/c"]);

        let transport = EchoTransport::new(json!({"value": [1]}));
        let records = job.run(transport.clone()).collect().await;

        assert_eq!(records.len(), 3);
        for record in records {
            assert_eq!(record, OutputRecord::Plain(json!([1])));
        }
        assert!(sink.errors().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_input_splits_into_capped_rounds() {
        let sink = Arc::new(MemorySink::new());
        let mut job = job_with(OutputMode::Plain, sink);
        let urls: Vec<String> = (0..25).map(|i| format!("users/{i}")).collect();
        job.add_requests(urls);

        let transport = EchoTransport::new(json!({"ok": true}));
        let records = job.run(transport.clone()).collect().await;

        assert_eq!(records.len(), 25);
        assert_eq!(*transport.seen.lock().unwrap(), vec![20, 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_is_sent_until_first_record_is_pulled() {
        let sink = Arc::new(MemorySink::new());
        let mut job = job_with(OutputMode::Plain, sink);
        job.add_requests(["users/a"]);

        let transport = EchoTransport::new(json!({}));
        let mut run = job.run(transport.clone());
        assert!(transport.seen.lock().unwrap().is_empty());

        run.next().await;
        assert_eq!(transport.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_works_as_a_stream() {
        let sink = Arc::new(MemorySink::new());
        let mut job = job_with(OutputMode::Plain, sink);
        job.add_requests(["users/a", "users/b"]);

        let transport = EchoTransport::new(json!({"n": 1}));
        let records: Vec<OutputRecord> = job.run(transport).into_stream().collect().await;
        assert_eq!(records.len(), 2);
    }

    // ------------------------------------------------------------------
    // Paging
    // ------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn paged_task_is_refetched_at_rewritten_url() {
        let sink = Arc::new(MemorySink::new());
        let mut job = job_with(OutputMode::Plain, sink);
        job.add_requests(["users"]);

        let transport = ScriptedTransport::new(vec![
            Ok(vec![json!({"id": "1", "status": 200, "body": {
                "value": [1, 2],
                "@odata.nextLink": "https://graph.example.com/v1.0/users?page=2"
            }})]),
            Ok(vec![json!({"id": "1", "status": 200, "body": {"value": [3]}})]),
        ]);

        let records = job.run(transport.clone()).collect().await;
        assert_eq!(
            records,
            vec![
                OutputRecord::Plain(json!([1, 2])),
                OutputRecord::Plain(json!([3])),
            ]
        );
        assert_eq!(
            transport.requested_urls(),
            vec!["users".to_string(), "users?page=2".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn correlated_paging_accumulates_into_one_record() {
        let sink = Arc::new(MemorySink::new());
        let mut job = job_with(OutputMode::Correlated, sink);
        job.add_from_templates(
            &["users?name={0}".to_string()],
            &[json!("ada")],
            None,
        );

        let transport = ScriptedTransport::new(vec![
            Ok(vec![json!({"id": "1", "status": 200, "body": {
                "value": [1],
                "@odata.nextLink": "users?name=ada&page=2"
            }})]),
            Ok(vec![json!({"id": "1", "status": 200, "body": {"value": [2]}})]),
        ]);

        let records = job.run(transport).collect().await;
        match &records[..] {
            [OutputRecord::Correlated(record)] => {
                assert!(record.success);
                assert_eq!(record.argument, Some(json!("ada")));
                assert_eq!(record.result, Some(json!([1, 2])));
            }
            other => panic!("expected one correlated record, got {other:?}"),
        }
    }

    // ------------------------------------------------------------------
    // Throttling
    // ------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn throttled_task_is_retried_after_cooldown() {
        let sink = Arc::new(MemorySink::new());
        let mut job = job_with(OutputMode::Plain, sink.clone());
        job.add_requests(["users/a"]);

        let transport = ScriptedTransport::new(vec![
            Ok(vec![json!({"id": "1", "status": 429, "headers": {"Retry-After": "3"}})]),
            Ok(vec![json!({"id": "1", "status": 200, "body": {"ok": true}})]),
        ]);

        let records = job.run(transport.clone()).collect().await;
        assert_eq!(records, vec![OutputRecord::Plain(json!({"ok": true}))]);
        assert_eq!(transport.payload_sizes(), vec![1, 1]);
        assert!(sink.errors().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retry_budget_reports_and_drops_the_task() {
        let sink = Arc::new(MemorySink::new());
        let config = BatchConfig {
            retry_timeout: Duration::ZERO,
            ..Default::default()
        };
        let mut job = BatchJob::with_sink(config, sink.clone());
        job.add_requests(["users/a"]);

        let transport = ScriptedTransport::new(vec![Ok(vec![
            json!({"id": "1", "status": 429, "headers": {"Retry-After": "60"}}),
        ])]);

        let records = job.run(transport).collect().await;
        assert!(records.is_empty());

        let errors = sink.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, THROTTLING_RETRIES_EXHAUSTED);
    }

    #[tokio::test(start_paused = true)]
    async fn only_the_throttled_task_waits() {
        let sink = Arc::new(MemorySink::new());
        let mut job = job_with(OutputMode::Plain, sink);
        job.add_requests(["users/a", "users/b"]);

        let transport = ScriptedTransport::new(vec![
            Ok(vec![
                json!({"id": "1", "status": 429, "headers": {"Retry-After": "2"}}),
                json!({"id": "2", "status": 200, "body": {"b": true}}),
            ]),
            Ok(vec![json!({"id": "1", "status": 200, "body": {"a": true}})]),
        ]);

        let mut run = job.run(transport.clone());
        // The completed task's record is available before the throttled
        // task's cooldown elapses
        assert_eq!(
            run.next().await,
            Some(OutputRecord::Plain(json!({"b": true})))
        );
        assert_eq!(
            run.next().await,
            Some(OutputRecord::Plain(json!({"a": true})))
        );
        assert_eq!(run.next().await, None);
        assert_eq!(transport.payload_sizes(), vec![2, 1]);
    }

    // ------------------------------------------------------------------
    // Failures
    // ------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn item_failure_never_aborts_the_rest_of_the_batch() {
        let sink = Arc::new(MemorySink::new());
        let mut job = job_with(OutputMode::Plain, sink.clone());
        job.add_requests(["users/ghost", "users/b"]);

        let transport = ScriptedTransport::new(vec![Ok(vec![
            json!({"id": "1", "status": 404, "body": {"error": {"code": "itemNotFound"}}}),
            json!({"id": "2", "status": 200, "body": {"ok": true}}),
        ])]);

        let records = job.run(transport).collect().await;
        assert_eq!(records, vec![OutputRecord::Plain(json!({"ok": true}))]);
        assert_eq!(sink.errors().len(), 1);
        assert_eq!(sink.errors()[0].code, "404|itemNotFound");
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_abandons_the_round_and_reports_once() {
        let sink = Arc::new(MemorySink::new());
        let mut job = job_with(OutputMode::Plain, sink.clone());
        job.add_requests(["users/a", "users/b"]);

        let transport =
            ScriptedTransport::new(vec![Err(Error::Other("connection refused".into()))]);

        let records = job.run(transport).collect().await;
        assert!(records.is_empty());

        let errors = sink.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].category, ReportCategory::ConnectionError);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_response_id_warns_and_unanswered_task_is_dropped() {
        let sink = Arc::new(MemorySink::new());
        let mut job = job_with(OutputMode::Plain, sink.clone());
        job.add_requests(["users/a"]);

        let transport = ScriptedTransport::new(vec![Ok(vec![
            json!({"id": "99", "status": 200, "body": {}}),
        ])]);

        let records = job.run(transport).collect().await;
        assert!(records.is_empty());

        let warnings = sink.warnings();
        assert!(warnings.iter().any(|w| w.contains("unknown task id 99")));
        assert!(warnings.iter().any(|w| w.contains("no response item for task 1")));
    }

    // ------------------------------------------------------------------
    // Correlated sweep
    // ------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn every_correlated_input_gets_exactly_one_record() {
        let sink = Arc::new(MemorySink::new());
        let mut job = job_with(OutputMode::Correlated, sink);
        job.add_from_templates(
            &["users/{0}".to_string()],
            &[json!("ada"), json!("ghost")],
            None,
        );

        let transport = ScriptedTransport::new(vec![Ok(vec![
            json!({"id": "1", "status": 200, "body": {"name": "ada"}}),
            json!({"id": "2", "status": 404, "body": {"error": {"code": "itemNotFound"}}}),
        ])]);

        let records = job.run(transport).collect().await;
        assert_eq!(records.len(), 2);

        let by_argument: BTreeMap<String, &CorrelatedRecord> = records
            .iter()
            .map(|record| match record {
                OutputRecord::Correlated(c) => {
                    (c.argument.as_ref().unwrap().as_str().unwrap().to_string(), c)
                }
                other => panic!("expected correlated records, got {other:?}"),
            })
            .collect();

        assert!(by_argument["ada"].success);
        assert!(!by_argument["ghost"].success);
        assert_eq!(by_argument["ghost"].status, Some(404));
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_tasks_surface_in_the_final_sweep() {
        let sink = Arc::new(MemorySink::new());
        let mut job = job_with(OutputMode::Correlated, sink);
        job.add_from_templates(&["users/{0}".to_string()], &[json!("ada")], None);

        let transport = ScriptedTransport::new(vec![Err(Error::Other("boom".into()))]);

        let records = job.run(transport).collect().await;
        match &records[..] {
            [OutputRecord::Correlated(record)] => {
                assert!(!record.success);
                assert_eq!(record.argument, Some(json!("ada")));
                assert_eq!(record.result, None);
                assert_eq!(record.status, None);
            }
            other => panic!("expected one sweep record, got {other:?}"),
        }
    }

    // ------------------------------------------------------------------
    // Cancellation
    // ------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn cancellation_abandons_pending_tasks() {
        let sink = Arc::new(MemorySink::new());
        let mut job = job_with(OutputMode::Plain, sink.clone());
        job.add_requests(["users/a", "users/b"]);

        let transport = EchoTransport::new(json!({}));
        let token = CancellationToken::new();
        token.cancel();

        let records = job.run_cancellable(transport.clone(), token).collect().await;
        assert!(records.is_empty());
        assert!(transport.seen.lock().unwrap().is_empty(), "nothing submitted");
        assert!(sink.warnings().iter().any(|w| w.contains("cancelled")));
    }
}
