/// Orchestrator tests driven by a scripted source and a recording sink.
///
/// Covers:
/// - Sequential windows and checkpoint advancement
/// - Empty windows
/// - Fail-fast and continue-on-error policies
/// - Sink failures and query timeouts
/// - At-least-once delivery across a failed checkpoint save

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sdc::artifact::CollectedArtifact;
use sdc::collector::{Collector, CollectorSettings, WindowError};
use sdc::config::types::OnWindowError;
use sdc::pipeline::{PipelineIdentity, SinkKind, SourceKind};
use sdc::sink::{Sink, SinkError, SinkPayload};
use sdc::source::{
    CollectError, PollPolicy, QueryId, QueryStatus, QueryTemplate, ScratchSpace, Source,
    SourceError, StatusReport, TimeFormat,
};
use sdc::storage::{CheckpointStore, MemoryCheckpointStore, StateError};
use sdc::timestamp::parse_instant;
use sdc::window::TimeWindow;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[cfg(test)]
mod tests {
    use super::*;

    /// How the scripted source answers for one window
    #[derive(Debug, Clone)]
    enum Script {
        Records(Vec<Value>),
        NoResults,
        Fails,
        NeverFinishes,
        Unreachable,
    }

    #[derive(Default)]
    struct SourceLog {
        submitted: Vec<TimeWindow>,
        queries: Vec<String>,
    }

    struct ScriptedSource {
        template: QueryTemplate,
        scripts: Mutex<VecDeque<Script>>,
        active: Mutex<HashMap<String, Script>>,
        log: Arc<Mutex<SourceLog>>,
    }

    impl ScriptedSource {
        fn new(scripts: Vec<Script>) -> (Self, Arc<Mutex<SourceLog>>) {
            let log = Arc::new(Mutex::new(SourceLog::default()));
            let source = Self {
                template: QueryTemplate::new("from {start_time} to {end_time}", TimeFormat::EpochMs)
                    .unwrap(),
                scripts: Mutex::new(scripts.into()),
                active: Mutex::new(HashMap::new()),
                log: log.clone(),
            };
            (source, log)
        }
    }

    #[async_trait]
    impl Source for ScriptedSource {
        fn kind(&self) -> SourceKind {
            SourceKind::CortexXdr
        }

        fn category(&self) -> &str {
            "api_alerts"
        }

        fn query_template(&self) -> &QueryTemplate {
            &self.template
        }

        async fn submit_query(&self, query: &str, window: &TimeWindow) -> Result<QueryId, SourceError> {
            let script = self
                .scripts
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Script::NoResults);

            let mut log = self.log.lock().unwrap();
            log.submitted.push(*window);
            log.queries.push(query.to_string());

            if let Script::Unreachable = script {
                return Err(SourceError::Api {
                    status: 503,
                    message: "service unavailable".to_string(),
                });
            }

            let id = format!("q{}", log.submitted.len());
            self.active.lock().unwrap().insert(id.clone(), script);
            Ok(QueryId(id))
        }

        async fn poll_status(&self, query_id: &QueryId) -> Result<StatusReport, SourceError> {
            let active = self.active.lock().unwrap();
            let report = match active.get(&query_id.0) {
                Some(Script::Records(records)) => {
                    StatusReport::new(QueryStatus::Success).with_count(records.len() as u64)
                }
                Some(Script::NoResults) => StatusReport::new(QueryStatus::Success).with_count(0),
                Some(Script::Fails) => StatusReport {
                    status: QueryStatus::Failed,
                    result_count: None,
                    detail: Some("syntax error".to_string()),
                },
                Some(Script::NeverFinishes) => StatusReport::new(QueryStatus::Running),
                _ => return Err(SourceError::UnknownQuery(query_id.0.clone())),
            };
            Ok(report)
        }

        async fn fetch_results(
            &self,
            query_id: &QueryId,
            _scratch: &ScratchSpace,
        ) -> Result<CollectedArtifact, SourceError> {
            match self.active.lock().unwrap().get(&query_id.0) {
                Some(Script::Records(records)) => Ok(CollectedArtifact::from_records(records)?),
                _ => Err(SourceError::UnknownQuery(query_id.0.clone())),
            }
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        writes: Arc<Mutex<Vec<(String, String, Vec<Value>)>>>,
        fail: bool,
    }

    #[async_trait]
    impl Sink for RecordingSink {
        fn kind(&self) -> SinkKind {
            SinkKind::LocalFile
        }

        async fn write(
            &self,
            payload: SinkPayload,
            source: &str,
            category: &str,
        ) -> Result<Vec<String>, SinkError> {
            if self.fail {
                return Err(SinkError::Io {
                    path: "/full/disk".into(),
                    source: std::io::Error::new(std::io::ErrorKind::Other, "no space left"),
                });
            }

            let records = match payload {
                SinkPayload::Artifact(artifact) => artifact.decode_records()?,
                SinkPayload::Records(records) => records,
            };
            let mut writes = self.writes.lock().unwrap();
            writes.push((source.to_string(), category.to_string(), records));
            Ok(vec![format!("file-{}", writes.len())])
        }
    }

    /// Delegates to a shared store but fails every save after the first `healthy_saves`.
    struct FlakyStore {
        inner: Arc<MemoryCheckpointStore>,
        healthy_saves: usize,
        saves: AtomicUsize,
    }

    impl CheckpointStore for FlakyStore {
        fn load(&self, pipeline: &PipelineIdentity) -> Result<Option<DateTime<Utc>>, StateError> {
            self.inner.load(pipeline)
        }

        fn save(&self, pipeline: &PipelineIdentity, instant: DateTime<Utc>) -> Result<(), StateError> {
            if self.saves.fetch_add(1, Ordering::SeqCst) >= self.healthy_saves {
                return Err(StateError::Unavailable("simulated crash".to_string()));
            }
            self.inner.save(pipeline, instant)
        }
    }

    fn pipeline() -> PipelineIdentity {
        PipelineIdentity::new(SourceKind::CortexXdr, SinkKind::LocalFile)
    }

    fn at(s: &str) -> DateTime<Utc> {
        parse_instant(s).unwrap()
    }

    fn settings(on_window_error: OnWindowError) -> CollectorSettings {
        CollectorSettings {
            window_minutes: 10,
            initial_timestamp: None,
            poll_policy: PollPolicy::new(Duration::from_secs(5), Duration::from_secs(30)),
            fetch_retries: 1,
            on_window_error,
        }
    }

    fn records(n: usize) -> Vec<Value> {
        (0..n).map(|i| json!({ "alert_id": i })).collect()
    }

    struct Harness {
        collector: Collector,
        store: Arc<MemoryCheckpointStore>,
        source_log: Arc<Mutex<SourceLog>>,
        writes: Arc<Mutex<Vec<(String, String, Vec<Value>)>>>,
        _scratch: tempfile::TempDir,
    }

    fn harness(scripts: Vec<Script>, on_window_error: OnWindowError, sink_fails: bool) -> Harness {
        let store = Arc::new(MemoryCheckpointStore::with_entry(
            &pipeline(),
            at("2024-01-01T00:00:00Z"),
        ));
        harness_with_store(scripts, settings(on_window_error), sink_fails, store.clone(), store)
    }

    fn harness_with_store(
        scripts: Vec<Script>,
        settings: CollectorSettings,
        sink_fails: bool,
        store: Arc<MemoryCheckpointStore>,
        checkpoint_store: Arc<dyn CheckpointStore>,
    ) -> Harness {
        let (source, source_log) = ScriptedSource::new(scripts);
        let sink = RecordingSink {
            fail: sink_fails,
            ..Default::default()
        };
        let writes = sink.writes.clone();
        let scratch = tempfile::TempDir::new().unwrap();

        let collector = Collector::new(
            pipeline(),
            Box::new(source),
            Box::new(sink),
            checkpoint_store,
            ScratchSpace::new(scratch.path()),
            settings,
        );

        Harness {
            collector,
            store,
            source_log,
            writes,
            _scratch: scratch,
        }
    }

    #[tokio::test]
    async fn test_three_windows_collected_in_order() {
        let mut h = harness(
            vec![
                Script::Records(records(2)),
                Script::Records(records(1)),
                Script::Records(records(3)),
            ],
            OnWindowError::Stop,
            false,
        );

        let summary = h.collector.run_at(at("2024-01-01T00:35:00Z")).await;

        assert!(summary.is_success());
        assert_eq!(summary.windows_planned, 3);
        assert_eq!(summary.windows_completed, 3);
        assert_eq!(summary.records, 6);
        assert_eq!(summary.files.len(), 3);
        assert_eq!(summary.checkpoint, Some(at("2024-01-01T00:30:00Z")));
        assert_eq!(
            h.store.load(&pipeline()).unwrap(),
            Some(at("2024-01-01T00:30:00Z"))
        );

        let log = h.source_log.lock().unwrap();
        let starts: Vec<i64> = log.submitted.iter().map(|w| w.start_ms).collect();
        assert_eq!(
            starts,
            vec![1_704_067_200_000, 1_704_067_800_000, 1_704_068_400_000]
        );
        assert_eq!(log.queries[0], "from 1704067200000 to 1704067800000");

        let writes = h.writes.lock().unwrap();
        assert_eq!(writes[0].0, "cortex_xdr");
        assert_eq!(writes[0].1, "api_alerts");
        assert_eq!(writes[2].2, records(3));
    }

    #[tokio::test]
    async fn test_empty_window_advances_without_write() {
        let mut h = harness(
            vec![Script::NoResults, Script::Records(records(1))],
            OnWindowError::Stop,
            false,
        );

        let summary = h.collector.run_at(at("2024-01-01T00:20:00Z")).await;

        assert!(summary.is_success());
        assert_eq!(summary.windows_completed, 2);
        assert_eq!(h.writes.lock().unwrap().len(), 1);
        assert_eq!(summary.checkpoint, Some(at("2024-01-01T00:20:00Z")));
    }

    #[tokio::test]
    async fn test_failed_window_stops_run() {
        let mut h = harness(
            vec![
                Script::Records(records(1)),
                Script::Fails,
                Script::Records(records(1)),
            ],
            OnWindowError::Stop,
            false,
        );

        let summary = h.collector.run_at(at("2024-01-01T00:30:00Z")).await;

        assert!(!summary.is_success());
        assert_eq!(summary.windows_completed, 1);
        assert_eq!(summary.windows_skipped(), 1);
        assert_eq!(summary.checkpoint, Some(at("2024-01-01T00:10:00Z")));
        assert_eq!(h.source_log.lock().unwrap().submitted.len(), 2);

        match &summary.failures[0].error {
            WindowError::Collect(CollectError::QueryFailed { query_id, detail }) => {
                assert_eq!(query_id.0, "q2");
                assert_eq!(detail.as_deref(), Some("syntax error"));
            }
            other => panic!("unexpected failure: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_next_run_retries_failed_window() {
        let mut h = harness(
            vec![Script::Unreachable, Script::Records(records(2))],
            OnWindowError::Stop,
            false,
        );

        let first = h.collector.run_at(at("2024-01-01T00:10:00Z")).await;
        assert!(matches!(
            first.failures[0].error,
            WindowError::Collect(CollectError::SourceUnavailable { stage: "submit", .. })
        ));
        assert_eq!(first.checkpoint, Some(at("2024-01-01T00:00:00Z")));

        let second = h.collector.run_at(at("2024-01-01T00:10:00Z")).await;
        assert!(second.is_success());
        assert_eq!(second.checkpoint, Some(at("2024-01-01T00:10:00Z")));

        let log = h.source_log.lock().unwrap();
        assert_eq!(log.submitted[0], log.submitted[1]);
    }

    #[tokio::test]
    async fn test_continue_mode_freezes_checkpoint() {
        let mut h = harness(
            vec![
                Script::Records(records(1)),
                Script::Fails,
                Script::Records(records(4)),
            ],
            OnWindowError::Continue,
            false,
        );

        let summary = h.collector.run_at(at("2024-01-01T00:30:00Z")).await;

        assert_eq!(summary.windows_completed, 2);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.records, 5);
        assert_eq!(h.writes.lock().unwrap().len(), 2);
        // Window 3 was delivered but the checkpoint stays before the failed window
        assert_eq!(
            h.store.load(&pipeline()).unwrap(),
            Some(at("2024-01-01T00:10:00Z"))
        );
    }

    #[tokio::test]
    async fn test_sink_failure_keeps_checkpoint() {
        let mut h = harness(vec![Script::Records(records(2))], OnWindowError::Stop, true);

        let summary = h.collector.run_at(at("2024-01-01T00:10:00Z")).await;

        assert!(matches!(summary.failures[0].error, WindowError::Sink(_)));
        assert_eq!(
            h.store.load(&pipeline()).unwrap(),
            Some(at("2024-01-01T00:00:00Z"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_timeout_after_max_wait() {
        let mut h = harness(vec![Script::NeverFinishes], OnWindowError::Stop, false);

        let started = tokio::time::Instant::now();
        let summary = h.collector.run_at(at("2024-01-01T00:10:00Z")).await;

        match &summary.failures[0].error {
            WindowError::Collect(CollectError::QueryTimeout { query_id, waited }) => {
                assert_eq!(query_id.0, "q1");
                assert_eq!(*waited, Duration::from_secs(30));
            }
            other => panic!("unexpected failure: {:?}", other),
        }
        assert_eq!(started.elapsed(), Duration::from_secs(30));
        assert_eq!(summary.checkpoint, Some(at("2024-01-01T00:00:00Z")));
    }

    #[tokio::test]
    async fn test_crash_before_checkpoint_save_recollects_window() {
        let shared = Arc::new(MemoryCheckpointStore::with_entry(
            &pipeline(),
            at("2024-01-01T00:00:00Z"),
        ));

        // Run 1: the sink write succeeds, then the checkpoint save "crashes"
        let flaky = Arc::new(FlakyStore {
            inner: shared.clone(),
            healthy_saves: 0,
            saves: AtomicUsize::new(0),
        });
        let mut first = harness_with_store(
            vec![Script::Records(records(2)), Script::Records(records(1))],
            settings(OnWindowError::Continue),
            false,
            shared.clone(),
            flaky,
        );
        let summary = first.collector.run_at(at("2024-01-01T00:20:00Z")).await;
        assert!(matches!(summary.failures[0].error, WindowError::Checkpoint(_)));
        // A checkpoint failure always stops the run, whatever the window policy
        assert_eq!(first.source_log.lock().unwrap().submitted.len(), 1);
        assert_eq!(first.writes.lock().unwrap().len(), 1);

        // Run 2: healthy store, same window collected and written again
        let mut second = harness_with_store(
            vec![Script::Records(records(2)), Script::Records(records(1))],
            settings(OnWindowError::Stop),
            false,
            shared.clone(),
            shared.clone(),
        );
        let summary = second.collector.run_at(at("2024-01-01T00:20:00Z")).await;
        assert!(summary.is_success());

        let first_window = first.source_log.lock().unwrap().submitted[0];
        assert_eq!(second.source_log.lock().unwrap().submitted[0], first_window);
        assert_eq!(
            first.writes.lock().unwrap()[0].2,
            second.writes.lock().unwrap()[0].2
        );
        assert_eq!(
            shared.load(&pipeline()).unwrap(),
            Some(at("2024-01-01T00:20:00Z"))
        );
    }

    #[tokio::test]
    async fn test_rerun_at_same_time_is_noop() {
        let mut h = harness(vec![Script::Records(records(1))], OnWindowError::Stop, false);

        let first = h.collector.run_at(at("2024-01-01T00:14:00Z")).await;
        assert_eq!(first.windows_completed, 1);

        let second = h.collector.run_at(at("2024-01-01T00:14:00Z")).await;
        assert_eq!(second.windows_planned, 0);
        assert_eq!(h.source_log.lock().unwrap().submitted.len(), 1);
    }

    #[tokio::test]
    async fn test_first_run_starts_at_initial_timestamp() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let mut settings = settings(OnWindowError::Stop);
        settings.initial_timestamp = Some(at("2024-01-01T00:00:00Z"));

        let mut h = harness_with_store(
            vec![Script::NoResults, Script::NoResults],
            settings,
            false,
            store.clone(),
            store,
        );
        let summary = h.collector.run_at(at("2024-01-01T00:25:00Z")).await;

        assert_eq!(summary.windows_planned, 2);
        assert_eq!(
            h.store.load(&pipeline()).unwrap(),
            Some(at("2024-01-01T00:20:00Z"))
        );
    }

    #[tokio::test]
    async fn test_checkpoint_ahead_of_now_plans_nothing() {
        let mut h = harness(vec![], OnWindowError::Stop, false);

        let summary = h.collector.run_at(at("2023-12-31T23:00:00Z")).await;

        assert_eq!(summary.windows_planned, 0);
        assert_eq!(
            h.store.load(&pipeline()).unwrap(),
            Some(at("2024-01-01T00:00:00Z"))
        );
    }
}
