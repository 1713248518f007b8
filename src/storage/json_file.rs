use super::traits::{CheckpointStore, StateError};
use crate::pipeline::PipelineIdentity;
use crate::timestamp::{format_instant, parse_instant};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Checkpoint store backed by a single JSON object on disk:
///
/// ```json
/// { "cortex_xdr_local_file": "2024-01-01T00:30:00Z" }
/// ```
///
/// Every save re-reads the file, replaces one key and atomically renames a
/// fresh copy over the old one, so pipelines sharing the file keep their
/// entries. Concurrent runs of the *same* pipeline are not guarded against.
#[derive(Debug, Clone)]
pub struct JsonFileCheckpointStore {
    path: PathBuf,
}

impl JsonFileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole mapping. A missing file is an empty mapping; any other
    /// failure is returned so callers can decide whether to recover.
    ///
    /// Values are kept as raw JSON so entries written by other tools survive
    /// a save untouched.
    fn read_state(&self) -> Result<Map<String, Value>, StateError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => {
                return Err(StateError::Io {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };

        if raw.trim().is_empty() {
            return Ok(Map::new());
        }

        let value: Value =
            serde_json::from_str(&raw).map_err(|e| StateError::Corrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;

        let Value::Object(entries) = value else {
            return Err(StateError::Corrupt {
                path: self.path.clone(),
                reason: "top-level value is not a JSON object".to_string(),
            });
        };

        Ok(entries)
    }

    fn write_state(&self, state: &Map<String, Value>) -> Result<(), StateError> {
        let io_err = |source| StateError::Io {
            path: self.path.clone(),
            source,
        };

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(io_err)?;

        let body = serde_json::to_vec_pretty(state)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(io_err)?;
        tmp.write_all(&body).map_err(io_err)?;
        tmp.write_all(b"\n").map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;

        Ok(())
    }
}

impl CheckpointStore for JsonFileCheckpointStore {
    fn load(&self, pipeline: &PipelineIdentity) -> Result<Option<DateTime<Utc>>, StateError> {
        let key = pipeline.checkpoint_key();

        let state = match self.read_state() {
            Ok(state) => state,
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Could not read state file, treating as empty"
                );
                return Ok(None);
            }
        };

        let Some(entry) = state.get(&key) else {
            debug!(pipeline = %key, "No checkpoint stored for pipeline");
            return Ok(None);
        };
        let Some(raw) = entry.as_str() else {
            warn!(
                path = %self.path.display(),
                pipeline = %key,
                value = %entry,
                "Stored checkpoint is not a string, ignoring it"
            );
            return Ok(None);
        };

        match parse_instant(raw) {
            Ok(instant) => Ok(Some(instant)),
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    pipeline = %key,
                    error = %e,
                    "Stored checkpoint is not a valid timestamp, ignoring it"
                );
                Ok(None)
            }
        }
    }

    fn save(&self, pipeline: &PipelineIdentity, instant: DateTime<Utc>) -> Result<(), StateError> {
        let key = pipeline.checkpoint_key();

        let mut state = match self.read_state() {
            Ok(state) => state,
            Err(e @ StateError::Corrupt { .. }) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "State file is corrupt, overwriting"
                );
                Map::new()
            }
            Err(e) => return Err(e),
        };

        state.insert(key.clone(), Value::String(format_instant(instant)));
        self.write_state(&state)?;

        info!(
            pipeline = %key,
            checkpoint = %format_instant(instant),
            path = %self.path.display(),
            "Saved checkpoint"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{SinkKind, SourceKind};
    use tempfile::TempDir;

    fn xdr_local() -> PipelineIdentity {
        PipelineIdentity::new(SourceKind::CortexXdr, SinkKind::LocalFile)
    }

    fn qradar_hdfs() -> PipelineIdentity {
        PipelineIdentity::new(SourceKind::Qradar, SinkKind::Hdfs)
    }

    fn ts(s: &str) -> DateTime<Utc> {
        parse_instant(s).unwrap()
    }

    #[test]
    fn test_missing_file_loads_none() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileCheckpointStore::new(dir.path().join("state.json"));
        assert!(store.load(&xdr_local()).unwrap().is_none());
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileCheckpointStore::new(dir.path().join("nested/state.json"));

        store.save(&xdr_local(), ts("2024-01-01T00:10:00Z")).unwrap();
        assert_eq!(
            store.load(&xdr_local()).unwrap(),
            Some(ts("2024-01-01T00:10:00Z"))
        );

        let raw = std::fs::read_to_string(store.path()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["cortex_xdr_local_file"], "2024-01-01T00:10:00Z");
    }

    #[test]
    fn test_save_merges_other_pipelines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(
            &path,
            r#"{"qradar_hdfs": "2023-06-01T00:00:00", "legacy": 17, "audit": {"owner": "soc"}}"#,
        )
        .unwrap();

        let store = JsonFileCheckpointStore::new(&path);
        store.save(&xdr_local(), ts("2024-01-01T00:10:00Z")).unwrap();

        assert_eq!(
            store.load(&qradar_hdfs()).unwrap(),
            Some(ts("2023-06-01T00:00:00Z"))
        );
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["legacy"], 17);
        assert_eq!(json["audit"], serde_json::json!({"owner": "soc"}));
        assert_eq!(json["qradar_hdfs"], "2023-06-01T00:00:00");
        assert_eq!(json["cortex_xdr_local_file"], "2024-01-01T00:10:00Z");
    }

    #[test]
    fn test_corrupt_file_loads_none_and_is_overwritten() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = JsonFileCheckpointStore::new(&path);
        assert!(store.load(&xdr_local()).unwrap().is_none());

        store.save(&xdr_local(), ts("2024-01-01T00:20:00Z")).unwrap();
        assert_eq!(
            store.load(&xdr_local()).unwrap(),
            Some(ts("2024-01-01T00:20:00Z"))
        );
    }

    #[test]
    fn test_non_object_state_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "[1, 2, 3]").unwrap();

        let store = JsonFileCheckpointStore::new(&path);
        assert!(matches!(store.read_state(), Err(StateError::Corrupt { .. })));
        assert!(store.load(&xdr_local()).unwrap().is_none());
    }

    #[test]
    fn test_non_string_entry_loads_none() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, r#"{"cortex_xdr_local_file": 1704067200}"#).unwrap();

        let store = JsonFileCheckpointStore::new(&path);
        assert!(store.load(&xdr_local()).unwrap().is_none());
    }

    #[test]
    fn test_invalid_timestamp_entry_loads_none() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, r#"{"cortex_xdr_local_file": "soon"}"#).unwrap();

        let store = JsonFileCheckpointStore::new(&path);
        assert!(store.load(&xdr_local()).unwrap().is_none());
    }

    #[test]
    fn test_save_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileCheckpointStore::new(dir.path().join("state.json"));
        store.save(&xdr_local(), ts("2024-01-01T00:10:00Z")).unwrap();
        store.save(&xdr_local(), ts("2024-01-01T00:20:00Z")).unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }
}
