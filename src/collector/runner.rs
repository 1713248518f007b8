use crate::config::types::OnWindowError;
use crate::pipeline::PipelineIdentity;
use crate::sink::{Sink, SinkError, SinkPayload};
use crate::source::{CollectError, PollPolicy, QueryId, QuerySession, ScratchSpace, Source};
use crate::storage::checkpoint::{CheckpointError, CheckpointManager, ResumePoint};
use crate::storage::traits::CheckpointStore;
use crate::timestamp::format_instant;
use crate::window::{plan_windows, TimeWindow, WindowPlan};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum WindowError {
    #[error(transparent)]
    Collect(#[from] CollectError),

    #[error("sink write failed: {0}")]
    Sink(#[from] SinkError),

    #[error("checkpoint save failed: {0}")]
    Checkpoint(#[from] CheckpointError),
}

/// Per-run knobs of the orchestrator.
#[derive(Debug, Clone)]
pub struct CollectorSettings {
    pub window_minutes: u32,
    pub initial_timestamp: Option<DateTime<Utc>>,
    pub poll_policy: PollPolicy,
    pub fetch_retries: u32,
    pub on_window_error: OnWindowError,
}

/// Result of one successfully collected window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowOutcome {
    pub window: TimeWindow,
    pub query_id: Option<QueryId>,
    pub records: u64,
    pub files: Vec<String>,
}

#[derive(Debug)]
pub struct WindowFailure {
    pub window: TimeWindow,
    pub error: WindowError,
}

#[derive(Debug)]
pub struct RunSummary {
    pub pipeline: PipelineIdentity,
    pub resume: ResumePoint,
    pub windows_planned: usize,
    pub windows_completed: usize,
    pub records: u64,
    pub files: Vec<String>,
    /// Checkpoint value once the run finished
    pub checkpoint: Option<DateTime<Utc>>,
    pub failures: Vec<WindowFailure>,
}

impl RunSummary {
    fn new(pipeline: PipelineIdentity, resume: ResumePoint, windows_planned: usize) -> Self {
        Self {
            pipeline,
            resume,
            windows_planned,
            windows_completed: 0,
            records: 0,
            files: Vec::new(),
            checkpoint: None,
            failures: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Windows neither completed nor failed, skipped after a stop.
    pub fn windows_skipped(&self) -> usize {
        self.windows_planned - self.windows_completed - self.failures.len()
    }
}

/// Runs one pipeline: resume from the checkpoint, collect each pending window
/// in order, hand results to the sink, then move the checkpoint forward.
///
/// The checkpoint is saved only after the sink confirmed a window, so every
/// window is delivered at least once.
pub struct Collector {
    pipeline: PipelineIdentity,
    source: Box<dyn Source>,
    sink: Box<dyn Sink>,
    checkpoints: CheckpointManager,
    scratch: ScratchSpace,
    settings: CollectorSettings,
}

impl Collector {
    pub fn new(
        pipeline: PipelineIdentity,
        source: Box<dyn Source>,
        sink: Box<dyn Sink>,
        store: Arc<dyn CheckpointStore>,
        scratch: ScratchSpace,
        settings: CollectorSettings,
    ) -> Self {
        Self {
            pipeline,
            source,
            sink,
            checkpoints: CheckpointManager::new(store, pipeline),
            scratch,
            settings,
        }
    }

    pub fn pipeline(&self) -> &PipelineIdentity {
        &self.pipeline
    }

    /// Resolve the resume point and the windows a run at `now` would collect.
    pub fn plan_at(&mut self, now: DateTime<Utc>) -> (ResumePoint, WindowPlan) {
        let resume = self.checkpoints.load(self.settings.initial_timestamp);
        let plan = plan_windows(resume.instant, self.settings.window_minutes, now);
        (resume, plan)
    }

    pub async fn run(&mut self) -> RunSummary {
        self.run_at(Utc::now()).await
    }

    pub async fn run_at(&mut self, now: DateTime<Utc>) -> RunSummary {
        let (resume, plan) = self.plan_at(now);
        let key = self.pipeline.checkpoint_key();
        let mut summary = RunSummary::new(self.pipeline, resume, plan.len());

        info!(
            pipeline = %key,
            windows = plan.len(),
            until = %format_instant(plan.boundary()),
            "Starting collection run"
        );

        // Set once a window failed under `continue`; later successes no longer move the checkpoint
        let mut frozen = false;

        for window in plan {
            match self.collect_window(window).await {
                Ok(outcome) => {
                    summary.windows_completed += 1;
                    summary.records += outcome.records;
                    summary.files.extend(outcome.files);

                    if frozen {
                        continue;
                    }
                    if let Err(e) = self.checkpoints.advance(window.end()) {
                        error!(
                            pipeline = %key,
                            window_start = %format_instant(window.start()),
                            window_end = %format_instant(window.end()),
                            error = %e,
                            "Failed to save checkpoint, stopping run"
                        );
                        // Counted as failed: the window will be collected again next run
                        summary.windows_completed -= 1;
                        summary.failures.push(WindowFailure {
                            window,
                            error: e.into(),
                        });
                        break;
                    }
                }
                Err(e) => {
                    error!(
                        pipeline = %key,
                        window_start = %format_instant(window.start()),
                        window_end = %format_instant(window.end()),
                        error = %e,
                        "Window collection failed"
                    );
                    summary.failures.push(WindowFailure { window, error: e });

                    match self.settings.on_window_error {
                        OnWindowError::Stop => break,
                        OnWindowError::Continue => {
                            if !frozen {
                                warn!(
                                    pipeline = %key,
                                    checkpoint = ?self.checkpoints.current().map(format_instant),
                                    "Continuing with later windows; checkpoint stays before the failed window"
                                );
                            }
                            frozen = true;
                        }
                    }
                }
            }
        }

        summary.checkpoint = self.checkpoints.current();
        log_summary(&key, &summary);
        summary
    }

    async fn collect_window(&self, window: TimeWindow) -> Result<WindowOutcome, WindowError> {
        info!(
            pipeline = %self.pipeline.checkpoint_key(),
            window_start = %format_instant(window.start()),
            window_end = %format_instant(window.end()),
            "Collecting window"
        );

        let mut session = QuerySession::new(
            self.source.as_ref(),
            self.settings.poll_policy,
            self.settings.fetch_retries,
            window,
        );
        let artifact = session.collect(&self.scratch).await?;
        let query_id = session.query_id().cloned();

        let Some(artifact) = artifact else {
            return Ok(WindowOutcome {
                window,
                query_id,
                records: 0,
                files: Vec::new(),
            });
        };

        let records = artifact.records();
        let files = self
            .sink
            .write(
                SinkPayload::Artifact(artifact),
                self.source.kind().as_str(),
                self.source.category(),
            )
            .await?;

        Ok(WindowOutcome {
            window,
            query_id,
            records,
            files,
        })
    }
}

fn log_summary(key: &str, summary: &RunSummary) {
    let checkpoint = summary.checkpoint.map(format_instant);
    if summary.is_success() {
        info!(
            pipeline = %key,
            windows = summary.windows_completed,
            records = summary.records,
            files = summary.files.len(),
            checkpoint = ?checkpoint,
            "Collection run finished"
        );
    } else {
        warn!(
            pipeline = %key,
            windows_planned = summary.windows_planned,
            windows_completed = summary.windows_completed,
            windows_failed = summary.failures.len(),
            windows_skipped = summary.windows_skipped(),
            records = summary.records,
            checkpoint = ?checkpoint,
            "Collection run finished with failures"
        );
    }
}
