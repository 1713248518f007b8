use super::traits::{CheckpointStore, StateError};
use crate::pipeline::PipelineIdentity;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

/// In-process checkpoint store, used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    entries: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(pipeline: &PipelineIdentity, instant: DateTime<Utc>) -> Self {
        let store = Self::new();
        if let Ok(mut entries) = store.entries.lock() {
            entries.insert(pipeline.checkpoint_key(), instant);
        }
        store
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn load(&self, pipeline: &PipelineIdentity) -> Result<Option<DateTime<Utc>>, StateError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| StateError::Unavailable("memory store lock poisoned".to_string()))?;
        Ok(entries.get(&pipeline.checkpoint_key()).copied())
    }

    fn save(&self, pipeline: &PipelineIdentity, instant: DateTime<Utc>) -> Result<(), StateError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StateError::Unavailable("memory store lock poisoned".to_string()))?;
        entries.insert(pipeline.checkpoint_key(), instant);
        Ok(())
    }
}
