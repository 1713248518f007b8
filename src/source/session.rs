use super::{QueryId, QueryStatus, ScratchSpace, Source, SourceError, StatusReport};
use crate::artifact::CollectedArtifact;
use crate::config::types::CollectionConfig;
use crate::window::TimeWindow;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("source unavailable during {stage}: {source}")]
    SourceUnavailable {
        stage: &'static str,
        #[source]
        source: SourceError,
    },

    #[error("query {query_id} failed{}", .detail.as_deref().map(|d| format!(": {}", d)).unwrap_or_default())]
    QueryFailed {
        query_id: QueryId,
        detail: Option<String>,
    },

    #[error("query {query_id} did not complete within {}s", .waited.as_secs())]
    QueryTimeout { query_id: QueryId, waited: Duration },
}

/// Lifecycle of one window's query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Submitted,
    Polling(QueryStatus),
    Succeeded,
    Fetched,
    Failed,
    TimedOut,
}

/// What to do after observing a status at a given elapsed time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollDecision {
    /// Sleep this long, then poll again
    Wait(Duration),
    Fetch,
    Fail,
    GiveUp,
}

/// Fixed-interval polling with a bound on the total wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_wait: Duration,
}

impl PollPolicy {
    pub fn new(interval: Duration, max_wait: Duration) -> Self {
        Self { interval, max_wait }
    }

    /// Pure decision function of the last status and the time spent waiting so far.
    ///
    /// Unrecognised statuses are treated as success so an unfamiliar terminal
    /// state never stalls a window. The last sleep is shortened so the final
    /// poll lands exactly on `max_wait`.
    pub fn decide(&self, status: &QueryStatus, elapsed: Duration) -> PollDecision {
        match status {
            QueryStatus::Success | QueryStatus::Unknown(_) => PollDecision::Fetch,
            QueryStatus::Failed => PollDecision::Fail,
            QueryStatus::Pending | QueryStatus::Running => {
                if elapsed >= self.max_wait {
                    PollDecision::GiveUp
                } else {
                    PollDecision::Wait(self.interval.min(self.max_wait - elapsed))
                }
            }
        }
    }
}

impl From<&CollectionConfig> for PollPolicy {
    fn from(config: &CollectionConfig) -> Self {
        Self::new(config.poll_interval, config.max_wait)
    }
}

/// One window's submit -> poll -> fetch exchange with a [`Source`].
///
/// Created fresh per window and discarded afterwards.
pub struct QuerySession<'a> {
    source: &'a dyn Source,
    policy: PollPolicy,
    fetch_retries: u32,
    window: TimeWindow,
    query_id: Option<QueryId>,
    state: SessionState,
    polls: u32,
    waited: Duration,
}

impl<'a> QuerySession<'a> {
    pub fn new(
        source: &'a dyn Source,
        policy: PollPolicy,
        fetch_retries: u32,
        window: TimeWindow,
    ) -> Self {
        Self {
            source,
            policy,
            fetch_retries,
            window,
            query_id: None,
            state: SessionState::Created,
            polls: 0,
            waited: Duration::ZERO,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn query_id(&self) -> Option<&QueryId> {
        self.query_id.as_ref()
    }

    pub fn polls(&self) -> u32 {
        self.polls
    }

    pub fn waited(&self) -> Duration {
        self.waited
    }

    /// Run the whole exchange.
    ///
    /// Returns `Ok(None)` when the query succeeded with zero records.
    pub async fn collect(
        &mut self,
        scratch: &ScratchSpace,
    ) -> Result<Option<CollectedArtifact>, CollectError> {
        let query = self.source.query_template().render(&self.window);
        debug!(source = %self.source.kind(), query = %query, "Rendered query");

        let query_id = self
            .source
            .submit_query(&query, &self.window)
            .await
            .map_err(|source| CollectError::SourceUnavailable {
                stage: "submit",
                source,
            })?;
        info!(
            source = %self.source.kind(),
            query_id = %query_id,
            window = %self.window,
            "Submitted query"
        );
        self.query_id = Some(query_id.clone());
        self.state = SessionState::Submitted;

        let result = self.complete(&query_id, scratch).await;
        self.source.release(&query_id);
        result
    }

    async fn complete(
        &mut self,
        query_id: &QueryId,
        scratch: &ScratchSpace,
    ) -> Result<Option<CollectedArtifact>, CollectError> {
        let report = self.wait_for_completion(query_id).await?;
        self.state = SessionState::Succeeded;

        if report.result_count == Some(0) {
            info!(query_id = %query_id, "Query completed with no results");
            self.state = SessionState::Fetched;
            return Ok(None);
        }

        let artifact = self.fetch(query_id, scratch).await?;
        self.state = SessionState::Fetched;

        if artifact.is_empty() {
            info!(query_id = %query_id, "Fetched result set is empty");
            return Ok(None);
        }

        info!(
            query_id = %query_id,
            records = artifact.records(),
            "Fetched query results"
        );
        Ok(Some(artifact))
    }

    async fn wait_for_completion(&mut self, query_id: &QueryId) -> Result<StatusReport, CollectError> {
        let started = Instant::now();

        loop {
            let report = self.source.poll_status(query_id).await.map_err(|source| {
                CollectError::SourceUnavailable {
                    stage: "poll",
                    source,
                }
            })?;
            self.polls += 1;
            self.state = SessionState::Polling(report.status.clone());

            info!(
                query_id = %query_id,
                status = %report.status,
                results = ?report.result_count,
                "Query status"
            );

            match self.policy.decide(&report.status, started.elapsed()) {
                PollDecision::Fetch => {
                    if let QueryStatus::Unknown(raw) = &report.status {
                        warn!(
                            query_id = %query_id,
                            status = %raw,
                            "Unrecognised query status, treating as success"
                        );
                    }
                    return Ok(report);
                }
                PollDecision::Fail => {
                    self.state = SessionState::Failed;
                    return Err(CollectError::QueryFailed {
                        query_id: query_id.clone(),
                        detail: report.detail,
                    });
                }
                PollDecision::GiveUp => {
                    self.state = SessionState::TimedOut;
                    return Err(CollectError::QueryTimeout {
                        query_id: query_id.clone(),
                        waited: started.elapsed(),
                    });
                }
                PollDecision::Wait(delay) => {
                    tokio::time::sleep(delay).await;
                    self.waited += delay;
                }
            }
        }
    }

    async fn fetch(
        &mut self,
        query_id: &QueryId,
        scratch: &ScratchSpace,
    ) -> Result<CollectedArtifact, CollectError> {
        let attempts = if self.source.supports_refetch() {
            self.fetch_retries + 1
        } else {
            1
        };

        let mut attempt = 1;
        loop {
            match self.source.fetch_results(query_id, scratch).await {
                Ok(artifact) => return Ok(artifact),
                Err(e) if attempt < attempts => {
                    warn!(
                        query_id = %query_id,
                        attempt = attempt,
                        error = %e,
                        "Fetching results failed, retrying"
                    );
                    attempt += 1;
                    tokio::time::sleep(self.policy.interval).await;
                }
                Err(source) => {
                    return Err(CollectError::SourceUnavailable {
                        stage: "fetch",
                        source,
                    })
                }
            }
        }
    }
}
