use super::{QueryId, QueryStatus, QueryTemplate, ScratchSpace, Source, SourceError, StatusReport};
use crate::artifact::CollectedArtifact;
use crate::config::types::{QradarConfig, QradarInputType};
use crate::config::ConfigError;
use crate::pipeline::SourceKind;
use crate::window::TimeWindow;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// IBM QRadar: asynchronous Ariel searches for events, synchronous offense listing.
pub struct QradarSource {
    client: reqwest::Client,
    host: String,
    input_type: QradarInputType,
    template: QueryTemplate,
    /// Offense results fetched at submit time, keyed by a generated query id
    offenses: Mutex<HashMap<String, Vec<Value>>>,
}

impl QradarSource {
    pub fn new(config: &QradarConfig) -> Result<Self, ConfigError> {
        let template_text = match config.input_type {
            QradarInputType::ApiEvents => config.aql_query_template_events.as_ref(),
            QradarInputType::ApiOffenses => config.offense_filter_template.as_ref(),
            QradarInputType::Syslog => {
                return Err(ConfigError::Validation(
                    "qradar input_type 'syslog' is push-based and not supported".to_string(),
                ))
            }
        }
        .ok_or_else(|| {
            ConfigError::Validation(format!(
                "sources.qradar has no query template for input_type '{}'",
                config.input_type.as_str()
            ))
        })?;
        let template = QueryTemplate::new(template_text, config.time_format.clone())?;

        let mut headers = HeaderMap::new();
        headers.insert(
            "sec",
            HeaderValue::from_str(&config.token)
                .map_err(|_| ConfigError::Validation("sources.qradar.token is not a valid header value".to_string()))?,
        );
        headers.insert(
            "version",
            HeaderValue::from_str(&config.api_version).map_err(|_| {
                ConfigError::Validation("sources.qradar.api_version is not a valid header value".to_string())
            })?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.collection.request_timeout)
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()?;

        Ok(Self {
            client,
            host: config.host.trim_end_matches('/').to_string(),
            input_type: config.input_type,
            template,
            offenses: Mutex::new(HashMap::new()),
        })
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, SourceError> {
        if !response.status().is_success() {
            return Err(SourceError::Api {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        Ok(response)
    }

    async fn submit_search(&self, query: &str) -> Result<QueryId, SourceError> {
        let url = format!("{}/api/ariel/searches", self.host);
        let response = self
            .client
            .post(&url)
            .query(&[("query_expression", query)])
            .send()
            .await?;
        let search: ArielSearch = Self::check(response).await?.json().await?;
        Ok(QueryId(search.search_id))
    }

    async fn submit_offenses(&self, filter: &str) -> Result<QueryId, SourceError> {
        let url = format!("{}/api/siem/offenses", self.host);
        let response = self
            .client
            .get(&url)
            .query(&[("filter", filter)])
            .send()
            .await?;
        let offenses: Vec<Value> = Self::check(response).await?.json().await?;

        let id = format!("offenses-{}", Uuid::new_v4());
        self.offenses
            .lock()
            .map_err(|_| SourceError::Protocol("offense cache lock poisoned".to_string()))?
            .insert(id.clone(), offenses);
        Ok(QueryId(id))
    }

    fn offense_count(&self, query_id: &QueryId) -> Result<u64, SourceError> {
        let cache = self
            .offenses
            .lock()
            .map_err(|_| SourceError::Protocol("offense cache lock poisoned".to_string()))?;
        cache
            .get(&query_id.0)
            .map(|records| records.len() as u64)
            .ok_or_else(|| SourceError::UnknownQuery(query_id.0.clone()))
    }

    /// Offense result sets fetched at submit and not yet taken or released.
    pub fn held_result_sets(&self) -> usize {
        self.offenses.lock().map(|cache| cache.len()).unwrap_or(0)
    }

    fn take_offenses(&self, query_id: &QueryId) -> Result<Vec<Value>, SourceError> {
        self.offenses
            .lock()
            .map_err(|_| SourceError::Protocol("offense cache lock poisoned".to_string()))?
            .remove(&query_id.0)
            .ok_or_else(|| SourceError::UnknownQuery(query_id.0.clone()))
    }
}

pub(crate) fn parse_search_status(raw: &str) -> QueryStatus {
    match raw.to_ascii_uppercase().as_str() {
        "WAIT" => QueryStatus::Pending,
        "EXECUTE" | "SORTING" => QueryStatus::Running,
        "COMPLETED" => QueryStatus::Success,
        "CANCELED" | "ERROR" => QueryStatus::Failed,
        _ => QueryStatus::Unknown(raw.to_string()),
    }
}

/// Results come back as `{"events": [...]}` (or `flows`); take the first array.
fn extract_result_rows(body: Value) -> Result<Vec<Value>, SourceError> {
    match body {
        Value::Array(rows) => Ok(rows),
        Value::Object(map) => map
            .into_iter()
            .find_map(|(_, value)| match value {
                Value::Array(rows) => Some(rows),
                _ => None,
            })
            .ok_or_else(|| SourceError::Protocol("Ariel results contain no array".to_string())),
        other => Err(SourceError::Protocol(format!(
            "unexpected Ariel results payload: {}",
            other
        ))),
    }
}

#[derive(Debug, Deserialize)]
struct ArielSearch {
    search_id: String,
    status: String,
    #[serde(default)]
    record_count: Option<u64>,
    #[serde(default)]
    error_messages: Vec<ArielMessage>,
}

#[derive(Debug, Deserialize)]
struct ArielMessage {
    #[serde(default)]
    message: String,
}

#[async_trait]
impl Source for QradarSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Qradar
    }

    fn category(&self) -> &str {
        self.input_type.as_str()
    }

    fn query_template(&self) -> &QueryTemplate {
        &self.template
    }

    async fn submit_query(&self, query: &str, _window: &TimeWindow) -> Result<QueryId, SourceError> {
        match self.input_type {
            QradarInputType::ApiOffenses => self.submit_offenses(query).await,
            _ => self.submit_search(query).await,
        }
    }

    async fn poll_status(&self, query_id: &QueryId) -> Result<StatusReport, SourceError> {
        if self.input_type == QradarInputType::ApiOffenses {
            return Ok(StatusReport::new(QueryStatus::Success).with_count(self.offense_count(query_id)?));
        }

        let url = format!("{}/api/ariel/searches/{}", self.host, query_id);
        let response = self.client.get(&url).send().await?;
        let search: ArielSearch = Self::check(response).await?.json().await?;

        let status = parse_search_status(&search.status);
        let detail = if status == QueryStatus::Failed {
            let messages: Vec<_> = search
                .error_messages
                .into_iter()
                .map(|m| m.message)
                .filter(|m| !m.is_empty())
                .collect();
            Some(if messages.is_empty() {
                format!("Ariel search {}", search.status)
            } else {
                messages.join("; ")
            })
        } else {
            None
        };

        Ok(StatusReport {
            status,
            // record_count is only final once the search has completed
            result_count: if search.status.eq_ignore_ascii_case("COMPLETED") {
                search.record_count
            } else {
                None
            },
            detail,
        })
    }

    async fn fetch_results(
        &self,
        query_id: &QueryId,
        _scratch: &ScratchSpace,
    ) -> Result<CollectedArtifact, SourceError> {
        let rows = if self.input_type == QradarInputType::ApiOffenses {
            self.take_offenses(query_id)?
        } else {
            let url = format!("{}/api/ariel/searches/{}/results", self.host, query_id);
            let response = self.client.get(&url).send().await?;
            extract_result_rows(Self::check(response).await?.json().await?)?
        };

        Ok(CollectedArtifact::from_records(&rows)?)
    }

    fn supports_refetch(&self) -> bool {
        // Offense rows are taken out of the cache on the first fetch
        self.input_type == QradarInputType::ApiEvents
    }

    fn release(&self, query_id: &QueryId) {
        if let Ok(mut cache) = self.offenses.lock() {
            if cache.remove(&query_id.0).is_some() {
                debug!(query_id = %query_id, "Dropped unfetched offense results");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::CollectionConfig;
    use crate::source::TimeFormat;
    use serde_json::json;

    fn config(input_type: QradarInputType) -> QradarConfig {
        QradarConfig {
            host: "https://qradar.example.com/".to_string(),
            token: "token".to_string(),
            input_type,
            verify_tls: true,
            api_version: "12.0".to_string(),
            aql_query_template_events: Some(
                "SELECT * FROM events START '{start_time}' STOP '{end_time}'".to_string(),
            ),
            offense_filter_template: None,
            time_format: TimeFormat::Strftime("%Y-%m-%d %H:%M:%S".to_string()),
            collection: CollectionConfig::default(),
        }
    }

    #[test]
    fn test_search_status_mapping() {
        assert_eq!(parse_search_status("WAIT"), QueryStatus::Pending);
        assert_eq!(parse_search_status("EXECUTE"), QueryStatus::Running);
        assert_eq!(parse_search_status("SORTING"), QueryStatus::Running);
        assert_eq!(parse_search_status("COMPLETED"), QueryStatus::Success);
        assert_eq!(parse_search_status("CANCELED"), QueryStatus::Failed);
        assert_eq!(parse_search_status("ERROR"), QueryStatus::Failed);
    }

    #[test]
    fn test_extract_rows_from_events_object() {
        let rows = extract_result_rows(json!({"events": [{"qid": 1}, {"qid": 2}]})).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(extract_result_rows(json!({"count": 3})).is_err());
    }

    #[test]
    fn test_category_follows_input_type() {
        let source = QradarSource::new(&config(QradarInputType::ApiEvents)).unwrap();
        assert_eq!(source.category(), "api_events");
        assert_eq!(source.host, "https://qradar.example.com");
    }

    #[test]
    fn test_offenses_require_filter_template() {
        assert!(QradarSource::new(&config(QradarInputType::ApiOffenses)).is_err());
    }

    #[test]
    fn test_syslog_rejected() {
        let err = QradarSource::new(&config(QradarInputType::Syslog))
            .err()
            .unwrap()
            .to_string();
        assert!(err.contains("syslog"));
    }
}
