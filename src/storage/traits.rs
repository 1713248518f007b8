use crate::pipeline::PipelineIdentity;
use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// Durable mapping from pipeline identity to its last successfully collected instant.
///
/// Implementations must be `Send + Sync` for use behind `Arc<dyn CheckpointStore>`.
pub trait CheckpointStore: Send + Sync {
    /// Read the checkpoint for a pipeline.
    ///
    /// Returns `Ok(None)` when nothing has been saved yet. Unreadable or corrupt
    /// state is also reported as `Ok(None)` after logging a warning.
    fn load(&self, pipeline: &PipelineIdentity) -> Result<Option<DateTime<Utc>>, StateError>;

    /// Upsert the checkpoint for a pipeline, leaving other pipelines' entries intact.
    fn save(&self, pipeline: &PipelineIdentity, instant: DateTime<Utc>) -> Result<(), StateError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("state file I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("state file {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("state store unavailable: {0}")]
    Unavailable(String),
}
