use crate::pipeline::{PipelineIdentity, PipelineParseError, SourceKind};
use crate::source::template::TimeFormat;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Pipeline definition, `sourceIdentifier > sinkIdentifier`
    pub pipeline: String,
    pub general: GeneralConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub sinks: SinksConfig,
}

impl Config {
    pub fn pipeline_identity(&self) -> Result<PipelineIdentity, PipelineParseError> {
        self.pipeline.parse()
    }

    /// Collection settings of whichever source section the pipeline names.
    pub fn collection_for(&self, identity: &PipelineIdentity) -> Option<&CollectionConfig> {
        match identity.source {
            SourceKind::CortexXdr => {
                self.sources.cortex_xdr.as_ref().map(|c| &c.collection)
            }
            SourceKind::Qradar => self.sources.qradar.as_ref().map(|c| &c.collection),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    pub state_file_path: PathBuf,
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
    #[serde(default)]
    pub log_file_path: Option<PathBuf>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_collection_window_minutes")]
    pub collection_window_minutes: u32,
    #[serde(default)]
    pub on_window_error: OnWindowError,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_collection_window_minutes() -> u32 {
    10
}

/// What a run does after a window fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnWindowError {
    /// Stop the run; the next run retries from the failed window.
    #[default]
    Stop,
    /// Keep collecting later windows without advancing the checkpoint past the failure.
    Continue,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub cortex_xdr: Option<CortexXdrConfig>,
    #[serde(default)]
    pub qradar: Option<QradarConfig>,
}

/// Settings shared by every query-based source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    #[serde(default, with = "instant_format")]
    pub initial_collection_timestamp: Option<DateTime<Utc>>,
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(default = "default_max_wait", with = "humantime_serde")]
    pub max_wait: Duration,
    #[serde(default = "default_fetch_retries")]
    pub fetch_retries: u32,
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            initial_collection_timestamp: None,
            poll_interval: default_poll_interval(),
            max_wait: default_max_wait(),
            fetch_retries: default_fetch_retries(),
            request_timeout: default_request_timeout(),
        }
    }
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_max_wait() -> Duration {
    Duration::from_secs(600)
}

fn default_fetch_retries() -> u32 {
    2
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CortexXdrConfig {
    /// Tenant FQDN; the API lives at `https://api-{fqdn}`
    #[serde(default)]
    pub fqdn: Option<String>,
    /// Overrides the URL derived from `fqdn`
    #[serde(default)]
    pub base_url: Option<String>,
    pub api_key_id: String,
    pub api_key: String,
    #[serde(default)]
    pub auth: XdrAuthMode,
    #[serde(default = "default_xdr_category")]
    pub category: String,
    pub query_template: String,
    #[serde(default = "default_xdr_time_format")]
    pub time_format: TimeFormat,
    /// Largest result set returned inline before the API switches to a stream
    #[serde(default = "default_xdr_inline_limit")]
    pub inline_limit: u32,
    #[serde(flatten)]
    pub collection: CollectionConfig,
}

impl CortexXdrConfig {
    pub fn api_base_url(&self) -> Option<String> {
        if let Some(url) = &self.base_url {
            return Some(url.trim_end_matches('/').to_string());
        }
        self.fqdn
            .as_ref()
            .map(|fqdn| format!("https://api-{}", fqdn.trim_end_matches('/')))
    }
}

fn default_xdr_category() -> String {
    "api_alerts".to_string()
}

fn default_xdr_time_format() -> TimeFormat {
    TimeFormat::EpochMs
}

fn default_xdr_inline_limit() -> u32 {
    1000
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum XdrAuthMode {
    #[default]
    Standard,
    Advanced,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QradarConfig {
    pub host: String,
    pub token: String,
    pub input_type: QradarInputType,
    #[serde(default = "default_true")]
    pub verify_tls: bool,
    #[serde(default = "default_qradar_api_version")]
    pub api_version: String,
    #[serde(default)]
    pub aql_query_template_events: Option<String>,
    #[serde(default)]
    pub offense_filter_template: Option<String>,
    #[serde(default = "default_qradar_time_format")]
    pub time_format: TimeFormat,
    #[serde(flatten)]
    pub collection: CollectionConfig,
}

fn default_true() -> bool {
    true
}

fn default_qradar_api_version() -> String {
    "12.0".to_string()
}

fn default_qradar_time_format() -> TimeFormat {
    TimeFormat::Strftime("%Y-%m-%d %H:%M:%S".to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QradarInputType {
    ApiEvents,
    ApiOffenses,
    /// Push-based feed; recognised only so validation can reject it clearly.
    Syslog,
}

impl QradarInputType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QradarInputType::ApiEvents => "api_events",
            QradarInputType::ApiOffenses => "api_offenses",
            QradarInputType::Syslog => "syslog",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SinksConfig {
    #[serde(default)]
    pub local_file: Option<LocalFileSinkConfig>,
    #[serde(default)]
    pub hdfs: Option<HdfsSinkConfig>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CapacityConfig {
    #[serde(default = "default_max_records_per_file")]
    pub max_records_per_file: u64,
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            max_records_per_file: default_max_records_per_file(),
            max_file_size_mb: default_max_file_size_mb(),
        }
    }
}

fn default_max_records_per_file() -> u64 {
    100_000
}

fn default_max_file_size_mb() -> u64 {
    256
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalFileSinkConfig {
    pub base_path: PathBuf,
    #[serde(flatten)]
    pub capacity: CapacityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HdfsSinkConfig {
    pub namenode_url: String,
    #[serde(default)]
    pub user: Option<String>,
    /// Destination directory per `source/category`, e.g. `qradar/api_events`
    #[serde(default)]
    pub base_paths: HashMap<String, String>,
    #[serde(default)]
    pub kerberos: Option<KerberosConfig>,
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
    #[serde(flatten)]
    pub capacity: CapacityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KerberosConfig {
    pub principal: String,
    pub keytab_path: PathBuf,
}

// ISO-8601 instants; naive values are taken as UTC
mod instant_format {
    use crate::timestamp::{format_instant, parse_instant};
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(instant: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match instant {
            Some(instant) => serializer.serialize_str(&format_instant(*instant)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        match raw {
            Some(s) if !s.trim().is_empty() => parse_instant(&s)
                .map(Some)
                .map_err(serde::de::Error::custom),
            _ => Ok(None),
        }
    }
}
