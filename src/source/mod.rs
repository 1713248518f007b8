pub mod cortex_xdr;
pub mod qradar;
pub mod session;
pub mod template;

use crate::artifact::{ArtifactError, CollectedArtifact};
use crate::config::types::Config;
use crate::config::ConfigError;
use crate::pipeline::SourceKind;
use crate::window::TimeWindow;
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use cortex_xdr::CortexXdrSource;
pub use qradar::QradarSource;
pub use session::{CollectError, PollDecision, PollPolicy, QuerySession, SessionState};
pub use template::{QueryTemplate, TimeFormat};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API returned error status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("unexpected API response: {0}")]
    Protocol(String),

    #[error("unknown query id: {0}")]
    UnknownQuery(String),

    #[error("scratch file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("artifact error: {0}")]
    Artifact(#[from] ArtifactError),
}

/// Opaque identifier assigned by the remote API to a submitted query
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryId(pub String);

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryStatus {
    Pending,
    Running,
    Success,
    Failed,
    /// A status string the source does not recognise; treated as success.
    Unknown(String),
}

impl fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryStatus::Pending => f.write_str("PENDING"),
            QueryStatus::Running => f.write_str("RUNNING"),
            QueryStatus::Success => f.write_str("SUCCESS"),
            QueryStatus::Failed => f.write_str("FAILED"),
            QueryStatus::Unknown(raw) => write!(f, "UNKNOWN({})", raw),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub status: QueryStatus,
    pub result_count: Option<u64>,
    /// Vendor-supplied reason accompanying a failure, if any
    pub detail: Option<String>,
}

impl StatusReport {
    pub fn new(status: QueryStatus) -> Self {
        Self {
            status,
            result_count: None,
            detail: None,
        }
    }

    pub fn with_count(mut self, count: u64) -> Self {
        self.result_count = Some(count);
        self
    }
}

/// Local directory where fetched result streams are spooled before a sink takes them.
#[derive(Debug, Clone)]
pub struct ScratchSpace {
    dir: PathBuf,
}

impl ScratchSpace {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create an empty scratch file, deleted on drop unless persisted.
    pub fn create_file(&self) -> std::io::Result<tempfile::NamedTempFile> {
        std::fs::create_dir_all(&self.dir)?;
        tempfile::Builder::new()
            .prefix("sdc-")
            .suffix(".json.gz")
            .tempfile_in(&self.dir)
    }
}

/// Submit / poll / fetch capability of a remote query API.
#[async_trait]
pub trait Source: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Category tag attached to every artifact, e.g. `api_events`
    fn category(&self) -> &str;

    fn query_template(&self) -> &QueryTemplate;

    async fn submit_query(&self, query: &str, window: &TimeWindow) -> Result<QueryId, SourceError>;

    async fn poll_status(&self, query_id: &QueryId) -> Result<StatusReport, SourceError>;

    async fn fetch_results(
        &self,
        query_id: &QueryId,
        scratch: &ScratchSpace,
    ) -> Result<CollectedArtifact, SourceError>;

    /// Whether results can be fetched again by id after a failed fetch.
    fn supports_refetch(&self) -> bool {
        true
    }

    /// Drop anything still held for `query_id`. Called once per submitted
    /// query when its window's exchange is over, whatever the outcome.
    fn release(&self, _query_id: &QueryId) {}
}

/// Construct the source named by the pipeline from its config section.
pub fn build_source(config: &Config, kind: SourceKind) -> Result<Box<dyn Source>, ConfigError> {
    match kind {
        SourceKind::CortexXdr => {
            let section = config.sources.cortex_xdr.as_ref().ok_or_else(|| {
                ConfigError::Validation("sources.cortex_xdr section missing".to_string())
            })?;
            Ok(Box::new(CortexXdrSource::new(section)?))
        }
        SourceKind::Qradar => {
            let section = config.sources.qradar.as_ref().ok_or_else(|| {
                ConfigError::Validation("sources.qradar section missing".to_string())
            })?;
            Ok(Box::new(QradarSource::new(section)?))
        }
    }
}
