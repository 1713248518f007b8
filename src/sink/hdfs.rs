use super::{prepare_chunks, CapacityLimits, PreparedChunk, Sink, SinkError, SinkPayload};
use crate::artifact::ArtifactData;
use crate::config::types::{HdfsSinkConfig, KerberosConfig};
use crate::pipeline::SinkKind;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Uploads gzip NDJSON files through the WebHDFS REST API.
///
/// File names carry host, pid and a per-process counter, so concurrent
/// writers and repeated writes never collide (`overwrite=false`).
pub struct HdfsSink {
    client: reqwest::Client,
    namenode_url: String,
    user: Option<String>,
    base_paths: HashMap<String, String>,
    limits: CapacityLimits,
    host: String,
    counter: AtomicU64,
}

impl HdfsSink {
    /// Obtains a Kerberos ticket first when a keytab is configured.
    pub async fn new(config: &HdfsSinkConfig) -> Result<Self, SinkError> {
        if let Some(kerberos) = &config.kerberos {
            kinit(kerberos).await?;
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());

        Ok(Self {
            client,
            namenode_url: config.namenode_url.trim_end_matches('/').to_string(),
            user: config.user.clone(),
            base_paths: config.base_paths.clone(),
            limits: CapacityLimits::from(&config.capacity),
            host,
            counter: AtomicU64::new(0),
        })
    }

    fn base_path(&self, source: &str, category: &str) -> Result<&str, SinkError> {
        let key = format!("{}/{}", source, category);
        self.base_paths
            .get(&key)
            .map(|path| path.trim_end_matches('/'))
            .ok_or(SinkError::NoBasePath(key))
    }

    fn next_file_path(&self, base: &str, now: DateTime<Utc>) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!(
            "{}/{}/data_{}_{}_{}_{}.json.gz",
            base,
            now.format("%Y%m%d"),
            now.format("%H%M%S"),
            self.host,
            std::process::id(),
            n
        )
    }

    async fn create_file(&self, path: &str, bytes: Vec<u8>) -> Result<(), SinkError> {
        let url = format!("{}/webhdfs/v1{}", self.namenode_url, path);
        let mut query = vec![("op", "CREATE"), ("overwrite", "false")];
        if let Some(user) = &self.user {
            query.push(("user.name", user.as_str()));
        }

        // The namenode answers with a 307 to a datanode; reqwest follows it with the body
        let response = self
            .client
            .put(&url)
            .query(&query)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SinkError::Api {
                status: response.status().as_u16(),
                path: path.to_string(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }
}

async fn kinit(kerberos: &KerberosConfig) -> Result<(), SinkError> {
    let output = tokio::process::Command::new("kinit")
        .arg("-kt")
        .arg(&kerberos.keytab_path)
        .arg(&kerberos.principal)
        .output()
        .await
        .map_err(|e| SinkError::Kerberos(format!("could not run kinit: {}", e)))?;

    if !output.status.success() {
        return Err(SinkError::Kerberos(format!(
            "kinit for {} exited with {}: {}",
            kerberos.principal,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    info!(principal = %kerberos.principal, "Obtained Kerberos ticket");
    Ok(())
}

#[async_trait]
impl Sink for HdfsSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Hdfs
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

        let base = self.base_path(source, category)?.to_string();
        let now = Utc::now();
        let mut written = Vec::new();

        for chunk in prepare_chunks(payload, &self.limits)? {
            let records = chunk.records();
            let bytes = match chunk {
                PreparedChunk::Passthrough {
                    data: ArtifactData::File(scratch),
                    ..
                } => std::fs::read(&scratch).map_err(|source| SinkError::Io {
                    path: scratch.to_path_buf(),
                    source,
                })?,
                PreparedChunk::Passthrough {
                    data: ArtifactData::Buffer(bytes),
                    ..
                }
                | PreparedChunk::Encoded { bytes, .. } => bytes,
            };

            let path = self.next_file_path(&base, now);
            self.create_file(&path, bytes).await?;
            info!(path = %path, records = records, "Uploaded file to HDFS");
            written.push(path);
        }

        Ok(written)
    }
}
