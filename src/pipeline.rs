use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineParseError {
    #[error("pipeline definition must look like 'source > sink', got '{0}'")]
    Malformed(String),

    #[error("unsupported source identifier: {0}")]
    UnknownSource(String),

    #[error("unsupported sink identifier: {0}")]
    UnknownSink(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    CortexXdr,
    Qradar,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::CortexXdr => "cortex_xdr",
            SourceKind::Qradar => "qradar",
        }
    }
}

impl FromStr for SourceKind {
    type Err = PipelineParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cortex_xdr" => Ok(SourceKind::CortexXdr),
            "qradar" => Ok(SourceKind::Qradar),
            other => Err(PipelineParseError::UnknownSource(other.to_string())),
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    LocalFile,
    Hdfs,
}

impl SinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SinkKind::LocalFile => "local_file",
            SinkKind::Hdfs => "hdfs",
        }
    }
}

impl FromStr for SinkKind {
    type Err = PipelineParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local_file" => Ok(SinkKind::LocalFile),
            "hdfs" => Ok(SinkKind::Hdfs),
            other => Err(PipelineParseError::UnknownSink(other.to_string())),
        }
    }
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured (source, sink) pair. Fixed for the lifetime of a run and
/// used as the checkpoint key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineIdentity {
    pub source: SourceKind,
    pub sink: SinkKind,
}

impl PipelineIdentity {
    pub fn new(source: SourceKind, sink: SinkKind) -> Self {
        Self { source, sink }
    }

    /// Key under which this pipeline's checkpoint is stored, e.g. `cortex_xdr_local_file`
    pub fn checkpoint_key(&self) -> String {
        format!("{}_{}", self.source, self.sink)
    }
}

impl FromStr for PipelineIdentity {
    type Err = PipelineParseError;

    /// Parses `"cortex_xdr > local_file"`; whitespace around the parts is ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('>');
        let (Some(source), Some(sink), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(PipelineParseError::Malformed(s.to_string()));
        };

        let (source, sink) = (source.trim(), sink.trim());
        if source.is_empty() || sink.is_empty() {
            return Err(PipelineParseError::Malformed(s.to_string()));
        }

        Ok(Self {
            source: source.parse()?,
            sink: sink.parse()?,
        })
    }
}

impl fmt::Display for PipelineIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} > {}", self.source, self.sink)
    }
}
