//! Run summaries posted to a Log Analytics workspace.
//!
//! - [`signing`]: shared key signature for the HTTP Data Collector API
//! - [`LogAnalyticsClient`]: the signed POST itself
//! - [`SummaryEmitter`]: best-effort wrapper the workflow calls; failures are only logged
//!
//! Summaries are only sent under a managed identity, and only when both the workspace id
//! and the shared key are configured.

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::auth::AuthMode;
use crate::config::Config;
use crate::errors::{Error, Result};
use crate::inventory::ReservationSet;

pub mod signing;

const API_VERSION: &str = "2016-04-01";

/// Days-remaining window counted as "expiring soon", in days.
pub const EXPIRING_SOON: std::ops::RangeInclusive<i64> = 1..=180;

/// Counters for one completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SummaryMetrics {
    pub total_active: usize,
    pub total_expired: usize,
    pub expiring_within_180_days: usize,
    pub success: bool,
}

impl SummaryMetrics {
    pub fn from_set(set: &ReservationSet) -> Self {
        let expiring = set
            .active
            .iter()
            .filter(|r| EXPIRING_SOON.contains(&r.days_remaining(set.reference)))
            .count();
        Self {
            total_active: set.active.len(),
            total_expired: set.expired.len(),
            expiring_within_180_days: expiring,
            success: true,
        }
    }
}

/// Marker record for a run that aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct FailureRecord {
    pub success: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RunRecord {
    Summary(SummaryMetrics),
    Failure(FailureRecord),
}

impl RunRecord {
    pub fn failure() -> Self {
        RunRecord::Failure(FailureRecord { success: false })
    }
}

/// Destination for run records.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn publish(&self, record: &RunRecord) -> Result<()>;
}

pub struct LogAnalyticsClient {
    http: reqwest::Client,
    endpoint: Url,
    workspace_id: String,
    shared_key: String,
    log_type: String,
}

impl LogAnalyticsClient {
    pub fn new(http: reqwest::Client, endpoint: Url, workspace_id: String, shared_key: String, log_type: String) -> Self {
        Self {
            http,
            endpoint,
            workspace_id,
            shared_key,
            log_type,
        }
    }

    fn logs_url(&self) -> Result<Url> {
        let mut url = self.endpoint.join("api/logs").map_err(|e| Error::Telemetry {
            message: format!("invalid ingestion URL: {e}"),
        })?;
        url.query_pairs_mut().append_pair("api-version", API_VERSION);
        Ok(url)
    }
}

#[async_trait]
impl MetricsSink for LogAnalyticsClient {
    async fn publish(&self, record: &RunRecord) -> Result<()> {
        let body = serde_json::to_vec(&[record]).map_err(|e| Error::Telemetry {
            message: format!("serialize run record: {e}"),
        })?;
        let date = signing::rfc1123(Utc::now());
        let authorization = signing::authorization(&self.workspace_id, &self.shared_key, body.len(), &date).ok_or_else(|| {
            Error::Telemetry {
                message: "shared key is not valid base64".to_string(),
            }
        })?;

        let url = self.logs_url()?;
        debug!(url = %url, log_type = %self.log_type, "Posting run record");

        let response = self
            .http
            .post(url)
            .header("Content-Type", signing::CONTENT_TYPE)
            .header("Authorization", authorization)
            .header("Log-Type", &self.log_type)
            .header("x-ms-date", date)
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Telemetry {
                message: format!("request failed: {e}"),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Telemetry {
                message: format!("{status} - {body}"),
            });
        }

        Ok(())
    }
}

/// Build the sink for this run, if summaries are enabled.
///
/// Under a managed identity an incomplete or unusable workspace configuration logs one
/// warning here and disables summaries for the run; it never fails the run.
pub fn create_metrics_sink(config: &Config, http: reqwest::Client) -> Option<Box<dyn MetricsSink>> {
    let la = &config.log_analytics;

    if config.auth_mode() != AuthMode::ManagedIdentity {
        if la.credentials().is_some() {
            debug!("Log Analytics is configured but only used with a managed identity");
        }
        return None;
    }

    let Some((workspace_id, shared_key)) = la.credentials() else {
        warn!("Managed identity is in use but the Log Analytics workspace id or shared key is missing; run summaries will not be sent");
        return None;
    };

    if signing::decode_key(shared_key).is_none() {
        warn!("Log Analytics shared key is not valid base64; run summaries will not be sent");
        return None;
    }

    let endpoint = match la.endpoint_for(workspace_id) {
        Ok(endpoint) => endpoint,
        Err(e) => {
            warn!(error = %e, "Run summaries will not be sent");
            return None;
        }
    };

    Some(Box::new(LogAnalyticsClient::new(
        http,
        endpoint,
        workspace_id.to_string(),
        shared_key.to_string(),
        la.log_type.clone(),
    )))
}

/// Best-effort publisher used by the workflow.
pub struct SummaryEmitter {
    sink: Option<Box<dyn MetricsSink>>,
}

impl SummaryEmitter {
    pub fn new(sink: Option<Box<dyn MetricsSink>>) -> Self {
        Self { sink }
    }

    pub fn disabled() -> Self {
        Self { sink: None }
    }

    /// Publish a record. Never fails; the outcome is logged.
    pub async fn emit(&self, record: &RunRecord) {
        let Some(sink) = &self.sink else {
            return;
        };

        match sink.publish(record).await {
            Ok(()) => info!(record = ?record, "Run summary sent to Log Analytics"),
            Err(e) => warn!(error = %e, "Failed to send run summary to Log Analytics"),
        }
    }
}
