pub mod hdfs;
pub mod local_file;

use crate::artifact::{encode_ndjson_gz, ArtifactData, ArtifactError, CollectedArtifact};
use crate::config::types::{CapacityConfig, Config};
use crate::pipeline::SinkKind;
use async_trait::async_trait;
use serde_json::Value;
use std::ops::Range;
use std::path::PathBuf;
use thiserror::Error;

pub use hdfs::HdfsSink;
pub use local_file::LocalFileSink;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("HDFS request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HDFS returned status {status} for {path}: {message}")]
    Api {
        status: u16,
        path: String,
        message: String,
    },

    #[error("no HDFS base path configured for '{0}'")]
    NoBasePath(String),

    #[error("kinit failed: {0}")]
    Kerberos(String),

    #[error("sinks.{0} is not configured")]
    NotConfigured(SinkKind),
}

/// What a sink is asked to persist.
#[derive(Debug)]
pub enum SinkPayload {
    Artifact(CollectedArtifact),
    /// Uncompressed records; the sink compresses them.
    Records(Vec<Value>),
}

impl SinkPayload {
    pub fn record_count(&self) -> u64 {
        match self {
            SinkPayload::Artifact(artifact) => artifact.records(),
            SinkPayload::Records(records) => records.len() as u64,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.record_count() == 0
    }
}

impl From<CollectedArtifact> for SinkPayload {
    fn from(artifact: CollectedArtifact) -> Self {
        SinkPayload::Artifact(artifact)
    }
}

/// Per-file limits; a payload over either one is split across several files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityLimits {
    pub max_records: u64,
    pub max_bytes: u64,
}

impl From<&CapacityConfig> for CapacityLimits {
    fn from(config: &CapacityConfig) -> Self {
        Self {
            max_records: config.max_records_per_file.max(1),
            max_bytes: config.max_file_size_mb.max(1).saturating_mul(1024 * 1024),
        }
    }
}

/// One output file's worth of compressed data.
#[derive(Debug)]
pub enum PreparedChunk {
    /// The artifact fits within the limits and is written as is.
    Passthrough { data: ArtifactData, records: u64 },
    Encoded { bytes: Vec<u8>, records: u64 },
}

impl PreparedChunk {
    pub fn records(&self) -> u64 {
        match self {
            PreparedChunk::Passthrough { records, .. } | PreparedChunk::Encoded { records, .. } => {
                *records
            }
        }
    }
}

/// Turn a payload into the chunks to write, one file each.
///
/// Artifacts within the limits (compressed size against `max_bytes`) pass
/// through untouched; larger ones are decoded and re-split.
pub fn prepare_chunks(
    payload: SinkPayload,
    limits: &CapacityLimits,
) -> Result<Vec<PreparedChunk>, SinkError> {
    let records = match payload {
        SinkPayload::Artifact(artifact) => {
            if artifact.records() <= limits.max_records
                && artifact.compressed_len()? <= limits.max_bytes
            {
                let records = artifact.records();
                return Ok(vec![PreparedChunk::Passthrough {
                    data: artifact.into_data(),
                    records,
                }]);
            }
            // Decoding drops the artifact afterwards, removing any scratch file
            artifact.decode_records()?
        }
        SinkPayload::Records(records) => records,
    };

    split_records(&records, limits)
        .into_iter()
        .map(|range| {
            let slice = &records[range];
            Ok(PreparedChunk::Encoded {
                bytes: encode_ndjson_gz(slice)?,
                records: slice.len() as u64,
            })
        })
        .collect()
}

/// Partition records into consecutive ranges honouring both limits.
///
/// Sizes are measured as uncompressed NDJSON bytes. A single record larger
/// than `max_bytes` still gets a range of its own.
pub fn split_records(records: &[Value], limits: &CapacityLimits) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut start = 0;
    let mut bytes = 0u64;

    for (idx, record) in records.iter().enumerate() {
        let size = serde_json::to_string(record).map(|s| s.len() as u64 + 1).unwrap_or(1);
        let count = (idx - start) as u64;
        if count > 0 && (count >= limits.max_records || bytes + size > limits.max_bytes) {
            ranges.push(start..idx);
            start = idx;
            bytes = 0;
        }
        bytes += size;
    }

    if start < records.len() {
        ranges.push(start..records.len());
    }
    ranges
}

/// Persists collected artifacts under `source/category`.
#[async_trait]
pub trait Sink: Send + Sync {
    fn kind(&self) -> SinkKind;

    /// Write the payload, returning the destination of every file created.
    ///
    /// Empty payloads are a no-op. Repeating a write only adds files.
    async fn write(
        &self,
        payload: SinkPayload,
        source: &str,
        category: &str,
    ) -> Result<Vec<String>, SinkError>;
}

/// Construct the sink named by the pipeline from its config section.
pub async fn build_sink(config: &Config, kind: SinkKind) -> Result<Box<dyn Sink>, SinkError> {
    match kind {
        SinkKind::LocalFile => {
            let section = config
                .sinks
                .local_file
                .as_ref()
                .ok_or(SinkError::NotConfigured(kind))?;
            Ok(Box::new(LocalFileSink::new(section)))
        }
        SinkKind::Hdfs => {
            let section = config
                .sinks
                .hdfs
                .as_ref()
                .ok_or(SinkError::NotConfigured(kind))?;
            Ok(Box::new(HdfsSink::new(section).await?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn limits(max_records: u64, max_bytes: u64) -> CapacityLimits {
        CapacityLimits {
            max_records,
            max_bytes,
        }
    }

    fn records(n: usize) -> Vec<Value> {
        (0..n).map(|i| json!({ "id": i })).collect()
    }

    #[test]
    fn test_split_by_record_count() {
        let ranges = split_records(&records(5), &limits(2, u64::MAX));
        assert_eq!(ranges, vec![0..2, 2..4, 4..5]);
    }

    #[test]
    fn test_split_by_bytes() {
        // {"id":0}\n is 9 bytes
        let ranges = split_records(&records(4), &limits(100, 18));
        assert_eq!(ranges, vec![0..2, 2..4]);
    }

    #[test]
    fn test_oversized_record_gets_own_chunk() {
        let ranges = split_records(&records(3), &limits(100, 4));
        assert_eq!(ranges, vec![0..1, 1..2, 2..3]);
    }

    #[test]
    fn test_split_empty() {
        assert!(split_records(&[], &limits(1, 1)).is_empty());
    }

    #[test]
    fn test_small_artifact_passes_through() {
        let artifact = CollectedArtifact::from_records(&records(3)).unwrap();
        let chunks = prepare_chunks(artifact.into(), &limits(10, 1024 * 1024)).unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(matches!(chunks[0], PreparedChunk::Passthrough { records: 3, .. }));
    }

    #[test]
    fn test_large_artifact_is_resplit() {
        let artifact = CollectedArtifact::from_records(&records(5)).unwrap();
        let chunks = prepare_chunks(artifact.into(), &limits(2, 1024 * 1024)).unwrap();
        let counts: Vec<u64> = chunks.iter().map(PreparedChunk::records).collect();
        assert_eq!(counts, vec![2, 2, 1]);
        assert!(chunks
            .iter()
            .all(|c| matches!(c, PreparedChunk::Encoded { .. })));
    }

    #[test]
    fn test_capacity_from_config() {
        let limits = CapacityLimits::from(&CapacityConfig {
            max_records_per_file: 10,
            max_file_size_mb: 2,
        });
        assert_eq!(limits.max_records, 10);
        assert_eq!(limits.max_bytes, 2 * 1024 * 1024);
    }
}
