//! Everything a run needs, built once from the loaded config.

use crate::collector::{Collector, CollectorSettings};
use crate::config::{Config, ConfigError};
use crate::pipeline::PipelineIdentity;
use crate::sink::{build_sink, SinkError};
use crate::source::{build_source, PollPolicy, ScratchSpace};
use crate::storage::checkpoint::CheckpointManager;
use crate::storage::json_file::JsonFileCheckpointStore;
use crate::storage::traits::CheckpointStore;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("sink setup failed: {0}")]
    Sink(#[from] SinkError),
}

pub struct RunContext {
    pub config: Config,
    pub pipeline: PipelineIdentity,
    pub store: Arc<dyn CheckpointStore>,
    pub scratch: ScratchSpace,
}

impl RunContext {
    /// Uses the JSON checkpoint file named by `general.state_file_path`.
    pub fn from_config(config: Config) -> Result<Self, ConfigError> {
        let store = Arc::new(JsonFileCheckpointStore::new(&config.general.state_file_path));
        Self::with_store(config, store)
    }

    pub fn with_store(config: Config, store: Arc<dyn CheckpointStore>) -> Result<Self, ConfigError> {
        let pipeline = config
            .pipeline_identity()
            .map_err(|e| ConfigError::Validation(format!("pipeline: {}", e)))?;

        let scratch_dir = config
            .general
            .scratch_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("sdc"));

        Ok(Self {
            config,
            pipeline,
            store,
            scratch: ScratchSpace::new(scratch_dir),
        })
    }

    pub fn settings(&self) -> Result<CollectorSettings, ConfigError> {
        let collection = self.config.collection_for(&self.pipeline).ok_or_else(|| {
            ConfigError::Validation(format!(
                "sources.{} section missing",
                self.pipeline.source
            ))
        })?;

        Ok(CollectorSettings {
            window_minutes: self.config.general.collection_window_minutes,
            initial_timestamp: collection.initial_collection_timestamp,
            poll_policy: PollPolicy::from(collection),
            fetch_retries: collection.fetch_retries,
            on_window_error: self.config.general.on_window_error,
        })
    }

    pub fn checkpoint_manager(&self) -> CheckpointManager {
        CheckpointManager::new(self.store.clone(), self.pipeline)
    }

    /// Construct the configured source and sink and wire them into a collector.
    pub async fn build_collector(&self) -> Result<Collector, RunError> {
        let source = build_source(&self.config, self.pipeline.source)?;
        let sink = build_sink(&self.config, self.pipeline.sink).await?;

        Ok(Collector::new(
            self.pipeline,
            source,
            sink,
            self.store.clone(),
            self.scratch.clone(),
            self.settings()?,
        ))
    }
}
