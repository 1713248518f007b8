use super::{prepare_chunks, CapacityLimits, PreparedChunk, Sink, SinkError, SinkPayload};
use crate::artifact::ArtifactData;
use crate::config::types::LocalFileSinkConfig;
use crate::pipeline::SinkKind;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::{NamedTempFile, TempPath};
use tracing::{debug, info};

/// Upper bound on `data_{HHMMSS}_{NNNN}` names tried within one second.
const MAX_COUNTER: u32 = 10_000;

/// Writes gzip NDJSON files under `{base_path}/{source}/{category}/{YYYYMMDD}/`.
///
/// Every file is staged next to its destination and moved into place with a
/// no-clobber rename, so readers never observe partial files and repeated
/// writes of the same window only add files.
pub struct LocalFileSink {
    base_path: PathBuf,
    limits: CapacityLimits,
}

impl LocalFileSink {
    pub fn new(config: &LocalFileSinkConfig) -> Self {
        Self {
            base_path: config.base_path.clone(),
            limits: CapacityLimits::from(&config.capacity),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Destination directory for one write.
    pub fn directory_for(&self, source: &str, category: &str, now: DateTime<Utc>) -> PathBuf {
        self.base_path
            .join(source)
            .join(category)
            .join(now.format("%Y%m%d").to_string())
    }

    fn write_at(
        &self,
        payload: SinkPayload,
        source: &str,
        category: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, SinkError> {
        let dir = self.directory_for(source, category, now);
        std::fs::create_dir_all(&dir).map_err(|source| SinkError::Io {
            path: dir.clone(),
            source,
        })?;

        let stamp = now.format("%H%M%S").to_string();
        let mut written = Vec::new();

        for chunk in prepare_chunks(payload, &self.limits)? {
            let records = chunk.records();
            let path = match chunk {
                PreparedChunk::Passthrough {
                    data: ArtifactData::File(scratch),
                    ..
                } => move_scratch_file(scratch, &dir, &stamp)?,
                PreparedChunk::Passthrough {
                    data: ArtifactData::Buffer(bytes),
                    ..
                }
                | PreparedChunk::Encoded { bytes, .. } => write_bytes(&bytes, &dir, &stamp)?,
            };

            info!(path = %path.display(), records = records, "Wrote output file");
            written.push(path.display().to_string());
        }

        Ok(written)
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> SinkError + '_ {
    move |source| SinkError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Try `data_{stamp}_0000.json.gz`, `_0001`, ... until one does not exist.
///
/// `persist` hands the pending item back on failure so the next name can be tried.
fn persist_unique<T>(
    mut pending: T,
    dir: &Path,
    stamp: &str,
    mut persist: impl FnMut(T, &Path) -> Result<(), (std::io::Error, T)>,
) -> Result<PathBuf, (std::io::Error, T)> {
    for counter in 0..MAX_COUNTER {
        let candidate = dir.join(format!("data_{}_{:04}.json.gz", stamp, counter));
        match persist(pending, &candidate) {
            Ok(()) => return Ok(candidate),
            Err((e, back)) if e.kind() == ErrorKind::AlreadyExists => pending = back,
            Err(err) => return Err(err),
        }
    }

    Err((
        std::io::Error::new(
            ErrorKind::AlreadyExists,
            format!("all {} file names for second {} are taken", MAX_COUNTER, stamp),
        ),
        pending,
    ))
}

fn write_bytes(bytes: &[u8], dir: &Path, stamp: &str) -> Result<PathBuf, SinkError> {
    let mut staged = NamedTempFile::new_in(dir).map_err(io_error(dir))?;
    staged.write_all(bytes).map_err(io_error(staged.path()))?;
    staged.as_file().sync_all().map_err(io_error(staged.path()))?;

    persist_unique(staged, dir, stamp, |file, path| {
        file.persist_noclobber(path)
            .map(|_| ())
            .map_err(|e| (e.error, e.file))
    })
    .map_err(|(source, _)| SinkError::Io {
        path: dir.to_path_buf(),
        source,
    })
}

/// Move a scratch file into place, copying when it lives on another filesystem.
fn move_scratch_file(scratch: TempPath, dir: &Path, stamp: &str) -> Result<PathBuf, SinkError> {
    let scratch = match persist_unique(scratch, dir, stamp, |temp, path| {
        temp.persist_noclobber(path).map_err(|e| (e.error, e.path))
    }) {
        Ok(path) => return Ok(path),
        Err((error, scratch)) => {
            debug!(
                scratch = %scratch.display(),
                error = %error,
                "Rename into sink directory failed, copying instead"
            );
            scratch
        }
    };

    let mut staged = NamedTempFile::new_in(dir).map_err(io_error(dir))?;
    let mut reader = std::fs::File::open(&scratch).map_err(io_error(&scratch))?;
    std::io::copy(&mut reader, &mut staged).map_err(io_error(staged.path()))?;
    staged.as_file().sync_all().map_err(io_error(staged.path()))?;

    let path = persist_unique(staged, dir, stamp, |file, path| {
        file.persist_noclobber(path)
            .map(|_| ())
            .map_err(|e| (e.error, e.file))
    })
    .map_err(|(source, _)| SinkError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    // Dropping the TempPath removes the scratch copy
    drop(scratch);
    Ok(path)
}

#[async_trait]
impl Sink for LocalFileSink {
    fn kind(&self) -> SinkKind {
        SinkKind::LocalFile
    }

    async fn write(
        &self,
        payload: SinkPayload,
        source: &str,
        category: &str,
    ) -> Result<Vec<String>, SinkError> {
        if payload.is_empty() {
            debug!(source = %source, category = %category, "Nothing to write");
            return Ok(Vec::new());
        }
        self.write_at(payload, source, category, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{decode_ndjson_gz, encode_ndjson_gz, CollectedArtifact};
    use crate::config::types::CapacityConfig;
    use chrono::TimeZone;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    fn sink(base: &Path, max_records: u64) -> LocalFileSink {
        LocalFileSink::new(&LocalFileSinkConfig {
            base_path: base.to_path_buf(),
            capacity: CapacityConfig {
                max_records_per_file: max_records,
                max_file_size_mb: 256,
            },
        })
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap()
    }

    fn read(path: &str) -> Vec<Value> {
        decode_ndjson_gz(std::fs::File::open(path).unwrap()).unwrap()
    }

    #[test]
    fn test_writes_under_dated_directory() {
        let base = TempDir::new().unwrap();
        let sink = sink(base.path(), 100);
        let payload = SinkPayload::Records(vec![json!({"a": 1}), json!({"a": 2})]);

        let written = sink.write_at(payload, "qradar", "api_events", now()).unwrap();
        let expected = base
            .path()
            .join("qradar/api_events/20240305/data_140709_0000.json.gz");
        assert_eq!(written, vec![expected.display().to_string()]);
        assert_eq!(read(&written[0]), vec![json!({"a": 1}), json!({"a": 2})]);
    }

    #[test]
    fn test_repeated_write_adds_file() {
        let base = TempDir::new().unwrap();
        let sink = sink(base.path(), 100);

        let first = sink
            .write_at(SinkPayload::Records(vec![json!(1)]), "cortex_xdr", "api_alerts", now())
            .unwrap();
        let second = sink
            .write_at(SinkPayload::Records(vec![json!(1)]), "cortex_xdr", "api_alerts", now())
            .unwrap();

        assert!(first[0].ends_with("data_140709_0000.json.gz"));
        assert!(second[0].ends_with("data_140709_0001.json.gz"));
        assert_eq!(read(&first[0]), read(&second[0]));
    }

    #[test]
    fn test_capacity_splits_files() {
        let base = TempDir::new().unwrap();
        let sink = sink(base.path(), 2);
        let records: Vec<Value> = (0..5).map(|i| json!({ "i": i })).collect();

        let written = sink
            .write_at(SinkPayload::Records(records.clone()), "qradar", "api_events", now())
            .unwrap();
        assert_eq!(written.len(), 3);

        let joined: Vec<Value> = written.iter().flat_map(|p| read(p)).collect();
        assert_eq!(joined, records);
    }

    #[test]
    fn test_scratch_file_is_moved() {
        let base = TempDir::new().unwrap();
        let scratch_dir = TempDir::new().unwrap();
        let sink = sink(base.path(), 100);

        let scratch = NamedTempFile::new_in(scratch_dir.path()).unwrap();
        std::fs::write(scratch.path(), encode_ndjson_gz(&[json!({"x": true})]).unwrap()).unwrap();
        let scratch = scratch.into_temp_path();
        let scratch_path = scratch.to_path_buf();

        let artifact = CollectedArtifact::from_scratch_file(scratch, 1);
        let written = sink
            .write_at(SinkPayload::Artifact(artifact), "cortex_xdr", "api_alerts", now())
            .unwrap();

        assert_eq!(read(&written[0]), vec![json!({"x": true})]);
        assert!(!scratch_path.exists());
    }

    #[tokio::test]
    async fn test_empty_payload_is_noop() {
        let base = TempDir::new().unwrap();
        let sink = sink(base.path(), 100);

        let written = sink
            .write(SinkPayload::Records(Vec::new()), "qradar", "api_events")
            .await
            .unwrap();
        assert!(written.is_empty());
        assert!(!base.path().join("qradar").exists());
    }
}
