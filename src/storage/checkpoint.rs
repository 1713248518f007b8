use super::traits::{CheckpointStore, StateError};
use crate::pipeline::PipelineIdentity;
use crate::timestamp::format_instant;
use crate::window::millis_to_datetime;
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("state error: {0}")]
    State(#[from] StateError),
}

pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Where the starting instant of a run came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeOrigin {
    Checkpoint,
    InitialTimestamp,
    EpochDefault,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumePoint {
    pub instant: DateTime<Utc>,
    pub origin: ResumeOrigin,
}

/// Owns checkpoint reads and writes for one pipeline during a run.
///
/// Keeps the last durable value in memory so that advancing is monotonic:
/// an instant at or before the current checkpoint is never written.
pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
    pipeline: PipelineIdentity,
    current: Option<DateTime<Utc>>,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn CheckpointStore>, pipeline: PipelineIdentity) -> Self {
        Self {
            store,
            pipeline,
            current: None,
        }
    }

    /// Resolve the instant this run starts from: the stored checkpoint, else
    /// the configured initial timestamp, else the Unix epoch.
    ///
    /// Never fails; an unreadable store is logged and treated as empty.
    pub fn load(&mut self, initial: Option<DateTime<Utc>>) -> ResumePoint {
        let key = self.pipeline.checkpoint_key();

        let stored = match self.store.load(&self.pipeline) {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(
                    pipeline = %key,
                    error = %e,
                    "Checkpoint store unreadable, falling back to initial timestamp"
                );
                None
            }
        };

        let resume = match (stored, initial) {
            (Some(instant), _) => ResumePoint {
                instant,
                origin: ResumeOrigin::Checkpoint,
            },
            (None, Some(instant)) => ResumePoint {
                instant,
                origin: ResumeOrigin::InitialTimestamp,
            },
            (None, None) => {
                tracing::warn!(
                    pipeline = %key,
                    "No checkpoint and no initial collection timestamp configured, starting from the epoch"
                );
                ResumePoint {
                    instant: millis_to_datetime(0),
                    origin: ResumeOrigin::EpochDefault,
                }
            }
        };

        self.current = stored;
        tracing::info!(
            pipeline = %key,
            resume_from = %format_instant(resume.instant),
            origin = ?resume.origin,
            "Resolved collection start"
        );
        resume
    }

    /// Durably record `to` as the last collected instant.
    ///
    /// Returns `Ok(false)` without touching the store when `to` does not move
    /// the checkpoint forward.
    pub fn advance(&mut self, to: DateTime<Utc>) -> Result<bool> {
        if let Some(current) = self.current {
            if to <= current {
                if to < current {
                    tracing::warn!(
                        pipeline = %self.pipeline.checkpoint_key(),
                        current = %format_instant(current),
                        requested = %format_instant(to),
                        "Refusing to move checkpoint backwards"
                    );
                }
                return Ok(false);
            }
        }

        self.store.save(&self.pipeline, to)?;
        self.current = Some(to);
        Ok(true)
    }

    /// Explicit manual reset; the only way to move a checkpoint backwards.
    pub fn reset(&mut self, to: DateTime<Utc>) -> Result<()> {
        tracing::warn!(
            pipeline = %self.pipeline.checkpoint_key(),
            previous = ?self.current.map(format_instant),
            reset_to = %format_instant(to),
            "Manually resetting checkpoint"
        );
        self.store.save(&self.pipeline, to)?;
        self.current = Some(to);
        Ok(())
    }

    pub fn current(&self) -> Option<DateTime<Utc>> {
        self.current
    }

    pub fn pipeline(&self) -> &PipelineIdentity {
        &self.pipeline
    }
}
