use super::{QueryId, QueryStatus, QueryTemplate, ScratchSpace, Source, SourceError, StatusReport};
use crate::artifact::{count_ndjson_gz_records, CollectedArtifact};
use crate::config::types::{CortexXdrConfig, XdrAuthMode};
use crate::config::ConfigError;
use crate::pipeline::SourceKind;
use crate::window::TimeWindow;
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::io::Write;
use uuid::Uuid;

const XQL_PATH: &str = "public_api/v1/xql";

/// Cortex XDR XQL query API
pub struct CortexXdrSource {
    client: reqwest::Client,
    base_url: String,
    api_key_id: String,
    api_key: String,
    auth: XdrAuthMode,
    category: String,
    template: QueryTemplate,
    inline_limit: u32,
}

impl CortexXdrSource {
    pub fn new(config: &CortexXdrConfig) -> Result<Self, ConfigError> {
        let base_url = config.api_base_url().ok_or_else(|| {
            ConfigError::Validation("sources.cortex_xdr needs either fqdn or base_url".to_string())
        })?;
        let template = QueryTemplate::new(&config.query_template, config.time_format.clone())?;
        let client = reqwest::Client::builder()
            .timeout(config.collection.request_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url,
            api_key_id: config.api_key_id.clone(),
            api_key: config.api_key.clone(),
            auth: config.auth,
            category: config.category.clone(),
            template,
            inline_limit: config.inline_limit,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn auth_headers(&self) -> Result<HeaderMap, SourceError> {
        let header = |value: &str| {
            HeaderValue::from_str(value)
                .map_err(|e| SourceError::Protocol(format!("invalid auth header value: {}", e)))
        };

        let mut headers = HeaderMap::new();
        headers.insert("x-xdr-auth-id", header(&self.api_key_id)?);

        match self.auth {
            XdrAuthMode::Standard => {
                headers.insert(AUTHORIZATION, header(&self.api_key)?);
            }
            XdrAuthMode::Advanced => {
                let nonce = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
                let timestamp = Utc::now().timestamp_millis().to_string();
                let signature = advanced_signature(&self.api_key, &nonce, &timestamp);
                headers.insert("x-xdr-nonce", header(&nonce)?);
                headers.insert("x-xdr-timestamp", header(&timestamp)?);
                headers.insert(AUTHORIZATION, header(&signature)?);
            }
        }

        Ok(headers)
    }

    async fn post(&self, endpoint: &str, body: Value) -> Result<reqwest::Response, SourceError> {
        let url = format!("{}/{}/{}/", self.base_url, XQL_PATH, endpoint);
        let response = self
            .client
            .post(&url)
            .headers(self.auth_headers()?)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SourceError::Api {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        Ok(response)
    }

    async fn get_query_results(&self, query_id: &QueryId, limit: u32) -> Result<ResultsReply, SourceError> {
        let body = json!({
            "request_data": {
                "query_id": query_id.0,
                "pending_flag": true,
                "limit": limit,
                "format": "json",
            }
        });
        let envelope: ResultsEnvelope = self.post("get_query_results", body).await?.json().await?;
        Ok(envelope.reply)
    }

    /// Spool a gzip result stream straight into a scratch file.
    async fn stream_to_scratch(
        &self,
        stream_id: &str,
        scratch: &ScratchSpace,
    ) -> Result<CollectedArtifact, SourceError> {
        let body = json!({
            "request_data": {
                "stream_id": stream_id,
                "is_gzip_compressed": true,
            }
        });
        let response = self.post("get_query_results_stream", body).await?;

        let mut file = scratch.create_file()?;
        let mut bytes = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = bytes.next().await {
            let chunk = chunk?;
            file.write_all(&chunk)?;
            written += chunk.len() as u64;
        }
        file.flush()?;

        let path = file.into_temp_path();
        let records = count_ndjson_gz_records(&path)?;
        tracing::debug!(
            stream_id = %stream_id,
            bytes = written,
            records = records,
            path = %path.display(),
            "Streamed XQL results to scratch file"
        );

        Ok(CollectedArtifact::from_scratch_file(path, records))
    }
}

fn advanced_signature(api_key: &str, nonce: &str, timestamp: &str) -> String {
    let digest = Sha256::digest(format!("{}{}{}", api_key, nonce, timestamp).as_bytes());
    format!("{:x}", digest)
}

pub(crate) fn parse_status(raw: &str) -> QueryStatus {
    match raw.to_ascii_uppercase().as_str() {
        "PENDING" => QueryStatus::Pending,
        "RUNNING" => QueryStatus::Running,
        "SUCCESS" | "PARTIAL_SUCCESS" => QueryStatus::Success,
        "FAIL" | "FAILED" => QueryStatus::Failed,
        _ => QueryStatus::Unknown(raw.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct StartReply {
    reply: Value,
}

#[derive(Debug, Deserialize)]
struct ResultsEnvelope {
    reply: ResultsReply,
}

#[derive(Debug, Deserialize)]
struct ResultsReply {
    status: String,
    #[serde(default)]
    number_of_results: Option<u64>,
    #[serde(default)]
    results: Option<XqlResults>,
}

#[derive(Debug, Deserialize)]
struct XqlResults {
    #[serde(default)]
    data: Option<Vec<Value>>,
    #[serde(default)]
    stream_id: Option<String>,
}

#[async_trait]
impl Source for CortexXdrSource {
    fn kind(&self) -> SourceKind {
        SourceKind::CortexXdr
    }

    fn category(&self) -> &str {
        &self.category
    }

    fn query_template(&self) -> &QueryTemplate {
        &self.template
    }

    async fn submit_query(&self, query: &str, window: &TimeWindow) -> Result<QueryId, SourceError> {
        let body = json!({
            "request_data": {
                "query": query,
                "tenants": [],
                "timeframe": { "from": window.start_ms, "to": window.end_ms },
            }
        });
        let start: StartReply = self.post("start_xql_query", body).await?.json().await?;

        match start.reply {
            Value::String(id) if !id.is_empty() => Ok(QueryId(id)),
            other => Err(SourceError::Protocol(format!(
                "start_xql_query returned no query id: {}",
                other
            ))),
        }
    }

    async fn poll_status(&self, query_id: &QueryId) -> Result<StatusReport, SourceError> {
        let reply = self.get_query_results(query_id, 0).await?;

        let mut report = StatusReport::new(parse_status(&reply.status));
        report.result_count = reply.number_of_results;
        if report.status == QueryStatus::Failed {
            report.detail = Some(format!("XQL query reported status {}", reply.status));
        }
        Ok(report)
    }

    async fn fetch_results(
        &self,
        query_id: &QueryId,
        scratch: &ScratchSpace,
    ) -> Result<CollectedArtifact, SourceError> {
        let reply = self.get_query_results(query_id, self.inline_limit).await?;
        let results = reply.results.ok_or_else(|| {
            SourceError::Protocol(format!(
                "get_query_results for {} returned no results (status {})",
                query_id, reply.status
            ))
        })?;

        if let Some(stream_id) = results.stream_id.as_deref() {
            return self.stream_to_scratch(stream_id, scratch).await;
        }

        let data = results.data.unwrap_or_default();
        Ok(CollectedArtifact::from_records(&data)?)
    }
}
