//! # resmon: Azure reservation expiry monitor
//!
//! `resmon` is a one-shot reporting tool for Azure capacity reservations. A run signs in to
//! Azure Resource Manager and Microsoft Graph, lists every reservation the identity can read,
//! prints them split into active and expired, emails a warning for reservations that are
//! exactly 180, 90, 30, 15, 10, 5 or 1 days from expiry, and, when running under a managed
//! identity, posts a summary of the run to a Log Analytics workspace.
//!
//! ## Running
//!
//! Interactively, the operator signs in with a device code and picks a subscription:
//!
//! ```bash
//! resmon --sender-email cloud-ops@contoso.com
//! ```
//!
//! Unattended, e.g. from an Automation account on a daily schedule:
//!
//! ```bash
//! resmon --use-managed-identity \
//!     --sender-email cloud-ops@contoso.com \
//!     --log-analytics-workspace-id "$WORKSPACE_ID" \
//!     --log-analytics-shared-key "$WORKSPACE_KEY"
//! ```
//!
//! ## Architecture
//!
//! The run is a single sequential pass, see [`workflow`]. Every external system sits behind
//! a trait so the pass can be exercised without a network:
//!
//! | Concern | Trait | Production implementation |
//! |---------|-------|---------------------------|
//! | tokens | [`auth::TokenCredential`] | device code or managed identity |
//! | subscriptions | [`auth::subscriptions::SubscriptionSource`] | ARM `/subscriptions` |
//! | reservations | [`inventory::ReservationInventory`] | ARM `Microsoft.Capacity` |
//! | mail | [`email::MailSender`] | Graph `sendMail` or `.eml` files |
//! | run summary | [`log_analytics::MetricsSink`] | HTTP Data Collector API |
//!
//! Exit status is 0 for a completed run (including an empty inventory) and 1 for any fatal
//! error. Failed mails and failed summaries are logged and do not change the exit status.

use tracing::{error, info, warn};

pub mod auth;
pub mod config;
pub mod email;
pub mod errors;
pub mod inventory;
pub mod log_analytics;
pub mod notifications;
pub mod report;
pub mod telemetry;
pub mod workflow;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::{Args, Config};
pub use errors::{Error, Result};
pub use workflow::{RunOutcome, Workflow};

use auth::SessionEstablisher;
use auth::subscriptions::{ArmSubscriptions, StdinPrompt};
use inventory::ArmReservationInventory;
use log_analytics::{RunRecord, SummaryEmitter};
use notifications::Notifier;
use report::{ReportFilter, ReportRenderer};

/// A fully wired run against the real services, printing to stdout.
pub struct Application {
    workflow: Workflow<std::io::Stdout>,
}

impl Application {
    /// Wire the run. A startup failure after the summary sink exists is reported to it
    /// before the error is returned.
    pub async fn new(config: Config, filter: ReportFilter) -> Result<Self> {
        let mode = config.auth_mode();
        info!(mode = %mode, filter = ?filter, "Starting reservation report");

        let http = reqwest::Client::builder()
            .timeout(config.azure.request_timeout)
            .build()
            .map_err(|e| Error::Internal {
                operation: format!("create HTTP client: {e}"),
            })?;

        // Built first so that the missing-configuration warning is logged at startup
        let emitter = SummaryEmitter::new(log_analytics::create_metrics_sink(&config, http.clone()));

        let mailer = match email::create_mail_sender(&config, http.clone()) {
            Ok(mailer) => mailer,
            Err(e) => {
                error!(error = %e, "Reservation report failed during startup");
                emitter.emit(&RunRecord::failure()).await;
                return Err(e);
            }
        };

        let sessions = SessionEstablisher::new(
            mode,
            auth::create_credential(&config, http.clone()),
            Box::new(ArmSubscriptions::new(http.clone(), config.azure.management_url.clone())),
            Box::new(StdinPrompt),
            config.azure.subscription_id.clone(),
        );

        let inventory = Box::new(ArmReservationInventory::new(
            http,
            config.azure.management_url.clone(),
            config.azure.reservations_api_version.clone(),
        ));

        let notifier = Notifier::new(mailer, config.recipients());
        let renderer = ReportRenderer::new(std::io::stdout(), config.color);

        Ok(Self {
            workflow: Workflow::new(filter, sessions, inventory, notifier, emitter, renderer),
        })
    }

    /// Resolve the report filter from the command line, warning on contradictory flags.
    pub fn filter_from_args(args: &Args) -> ReportFilter {
        if args.active_only && args.expired_only {
            warn!("--active-only and --expired-only were both given; reporting all reservations");
        }
        args.filter()
    }

    pub async fn run(mut self) -> Result<RunOutcome> {
        self.workflow.run().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MailTransportConfig;
    use crate::test_utils::{LogBuffer, buffer_subscriber, install_crypto_provider};
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const KEY: &str = "cmVzbW9uLXRlc3Qtc2hhcmVkLWtleS0wMTIzNDU2Nzg5";

    #[tokio::test]
    async fn test_managed_identity_without_workspace_warns_once_at_startup() {
        install_crypto_provider();
        let buffer = LogBuffer::default();
        let _guard = tracing::subscriber::set_default(buffer_subscriber(&buffer));

        let mut config = Config {
            use_managed_identity: true,
            ..Default::default()
        };
        config.log_analytics.workspace_id = Some("ws-123".to_string());

        let app = Application::new(config, ReportFilter::All).await;

        assert!(app.is_ok());
        let logs = buffer.contents();
        assert_eq!(logs.matches("run summaries will not be sent").count(), 1, "logs were: {logs}");
    }

    #[tokio::test]
    async fn test_startup_failure_sends_failure_record() {
        install_crypto_provider();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/logs"))
            .and(body_json(serde_json::json!([{"Success": false}])))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        // A regular file cannot hold the outbox directory
        let blocker = tempfile::NamedTempFile::new().unwrap();
        let outbox = blocker.path().join("outbox");

        let mut config = Config {
            use_managed_identity: true,
            ..Default::default()
        };
        config.log_analytics.workspace_id = Some("ws-1".to_string());
        config.log_analytics.shared_key = Some(KEY.to_string());
        config.log_analytics.endpoint = Some(url::Url::parse(&format!("{}/", server.uri())).unwrap());
        config.mail.transport = MailTransportConfig::File {
            path: outbox.to_string_lossy().into_owned(),
        };

        let result = Application::new(config, ReportFilter::All).await;

        assert!(result.is_err());
    }
}
