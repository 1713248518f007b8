//! Compressed newline-delimited JSON produced by one window's collection.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::Value;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;
use tempfile::TempPath;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("artifact line {line} is not valid JSON: {source}")]
    Json {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Where the compressed bytes live.
#[derive(Debug)]
pub enum ArtifactData {
    Buffer(Vec<u8>),
    /// Scratch file removed when the `TempPath` is dropped, unless persisted first.
    File(TempPath),
}

/// Gzip-compressed NDJSON result set of one window.
///
/// Owned by the collector until handed to a sink, which then owns cleanup of
/// any scratch file.
#[derive(Debug)]
pub struct CollectedArtifact {
    data: ArtifactData,
    records: u64,
}

impl CollectedArtifact {
    pub fn from_records(records: &[Value]) -> Result<Self, ArtifactError> {
        Ok(Self {
            data: ArtifactData::Buffer(encode_ndjson_gz(records)?),
            records: records.len() as u64,
        })
    }

    pub fn from_gzip_bytes(bytes: Vec<u8>, records: u64) -> Self {
        Self {
            data: ArtifactData::Buffer(bytes),
            records,
        }
    }

    pub fn from_scratch_file(path: TempPath, records: u64) -> Self {
        Self {
            data: ArtifactData::File(path),
            records,
        }
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    pub fn data(&self) -> &ArtifactData {
        &self.data
    }

    pub fn into_data(self) -> ArtifactData {
        self.data
    }

    pub fn compressed_len(&self) -> Result<u64, ArtifactError> {
        match &self.data {
            ArtifactData::Buffer(bytes) => Ok(bytes.len() as u64),
            ArtifactData::File(path) => Ok(std::fs::metadata(path)?.len()),
        }
    }

    /// Compressed bytes, reading the scratch file if needed.
    pub fn read_bytes(&self) -> Result<Vec<u8>, ArtifactError> {
        match &self.data {
            ArtifactData::Buffer(bytes) => Ok(bytes.clone()),
            ArtifactData::File(path) => Ok(std::fs::read(path)?),
        }
    }

    /// Decompress and parse every record.
    pub fn decode_records(&self) -> Result<Vec<Value>, ArtifactError> {
        match &self.data {
            ArtifactData::Buffer(bytes) => decode_ndjson_gz(bytes.as_slice()),
            ArtifactData::File(path) => decode_ndjson_gz(std::fs::File::open(path)?),
        }
    }
}

/// Gzip a slice of records as NDJSON, one record per line.
pub fn encode_ndjson_gz(records: &[Value]) -> Result<Vec<u8>, ArtifactError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    write_ndjson(&mut encoder, records)?;
    Ok(encoder.finish()?)
}

/// Write records as NDJSON into an arbitrary writer (usually a `GzEncoder`).
pub fn write_ndjson<W: Write>(writer: &mut W, records: &[Value]) -> Result<(), ArtifactError> {
    for record in records {
        serde_json::to_writer(&mut *writer, record).map_err(|e| ArtifactError::Io(e.into()))?;
        writer.write_all(b"\n")?;
    }
    Ok(())
}

pub fn decode_ndjson_gz<R: Read>(reader: R) -> Result<Vec<Value>, ArtifactError> {
    let reader = BufReader::new(GzDecoder::new(reader));
    let mut records = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let value = serde_json::from_str(&line).map_err(|source| ArtifactError::Json {
            line: idx + 1,
            source,
        })?;
        records.push(value);
    }

    Ok(records)
}

/// Count non-blank lines of a gzip NDJSON file without parsing them.
pub fn count_ndjson_gz_records(path: &Path) -> Result<u64, ArtifactError> {
    let reader = BufReader::new(GzDecoder::new(std::fs::File::open(path)?));
    let mut count = 0u64;
    for line in reader.lines() {
        if !line?.trim().is_empty() {
            count += 1;
        }
    }
    Ok(count)
}
