//! Run configuration.
//!
//! Configuration is loaded from an optional YAML file, then `RESMON_`-prefixed environment
//! variables, then the command line flags. Later sources override earlier ones:
//!
//! 1. **YAML config file** - defaults to `resmon.yaml`, selected with `-f` or `RESMON_CONFIG`.
//!    A missing file is not an error; every field has a default.
//! 2. **Environment variables** - nested keys use double underscores, e.g.
//!    `RESMON_AZURE__SUBSCRIPTION_ID=...` or `RESMON_LOG_ANALYTICS__SHARED_KEY=...`.
//! 3. **CLI flags** - `--sender-email`, `--use-managed-identity`, `--log-analytics-*`, `--no-color`.
//!
//! ## Example
//!
//! ```yaml
//! sender_email: cloud-ops@contoso.com
//! recipients:
//!   - finops@contoso.com
//! azure:
//!   tenant_id: contoso.onmicrosoft.com
//!   subscription_id: 00000000-0000-0000-0000-000000000000
//! mail:
//!   transport:
//!     type: file
//!     path: ./outbox
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use lettre::Address;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::auth::AuthMode;
use crate::errors::Error;
use crate::report::ReportFilter;

/// Default sender when neither the config file nor `--sender-email` names one.
pub const DEFAULT_SENDER_EMAIL: &str = "noreply@yourdomain.com";

/// Public client id of the Microsoft Graph command line tools, which may request both
/// Azure Resource Manager and `Mail.Send` scopes through the device code flow.
pub const DEFAULT_PUBLIC_CLIENT_ID: &str = "14d82eec-204b-4c2f-b7e8-296a70dab67e";

/// Report on Azure reservations and send expiry warnings.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "RESMON_CONFIG", default_value = "resmon.yaml")]
    pub config: String,

    /// Validate configuration and exit without contacting any service.
    #[arg(long)]
    pub validate: bool,

    /// Only report reservations that have not yet expired
    #[arg(long)]
    pub active_only: bool,

    /// Only report reservations that have already expired
    #[arg(long)]
    pub expired_only: bool,

    /// Mailbox that expiry warnings are sent from (and to, unless recipients are configured)
    #[arg(long)]
    pub sender_email: Option<String>,

    /// Authenticate with the platform managed identity instead of signing in interactively
    #[arg(long)]
    pub use_managed_identity: bool,

    /// Log Analytics workspace id for run summaries (managed identity only)
    #[arg(long)]
    pub log_analytics_workspace_id: Option<String>,

    /// Log Analytics primary or secondary shared key (base64)
    #[arg(long)]
    pub log_analytics_shared_key: Option<String>,

    /// Disable coloured output
    #[arg(long)]
    pub no_color: bool,
}

impl Args {
    pub fn filter(&self) -> ReportFilter {
        ReportFilter::from_flags(self.active_only, self.expired_only)
    }
}

/// Main configuration, deserialized from YAML and environment variables.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Mailbox expiry warnings are sent as
    pub sender_email: String,
    /// Warning recipients; empty means "send to the sender mailbox"
    pub recipients: Vec<String>,
    /// Authenticate with the managed identity instead of the device code flow
    pub use_managed_identity: bool,
    /// Colour the report by severity tier
    pub color: bool,
    /// Azure Resource Manager and Entra ID settings
    pub azure: AzureConfig,
    /// Microsoft Graph settings
    pub graph: GraphConfig,
    /// Where notification mails go
    pub mail: MailConfig,
    /// Run summary ingestion
    pub log_analytics: LogAnalyticsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AzureConfig {
    /// Azure Resource Manager base URL
    pub management_url: Url,
    /// Entra ID authority used for the device code flow
    pub authority_url: Url,
    /// Tenant to sign in to ("organizations" lets the user pick their home tenant)
    pub tenant_id: String,
    /// Public client application used for interactive sign-in
    pub client_id: String,
    /// Client id of a user-assigned managed identity; system-assigned when unset
    pub managed_identity_client_id: Option<String>,
    /// Subscription to use without prompting
    pub subscription_id: Option<String>,
    /// api-version for the Microsoft.Capacity reservation listing
    pub reservations_api_version: String,
    /// Timeout applied to every HTTP request
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct GraphConfig {
    /// Microsoft Graph base URL
    pub base_url: Url,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct MailConfig {
    pub transport: MailTransportConfig,
}

/// Mail transport configuration - Microsoft Graph or file-based for dry runs.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MailTransportConfig {
    /// Send through the Graph `sendMail` action
    #[default]
    Graph,
    /// Write `.eml` files to a directory instead of sending
    File {
        /// Directory path where email files will be written
        path: String,
    },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogAnalyticsConfig {
    /// Workspace (customer) id
    pub workspace_id: Option<String>,
    /// Base64 shared key of the workspace
    pub shared_key: Option<String>,
    /// Custom log record type, sent as the `Log-Type` header
    pub log_type: String,
    /// Override for the ingestion base URL; derived from the workspace id when unset
    pub endpoint: Option<Url>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sender_email: DEFAULT_SENDER_EMAIL.to_string(),
            recipients: Vec::new(),
            use_managed_identity: false,
            color: true,
            azure: AzureConfig::default(),
            graph: GraphConfig::default(),
            mail: MailConfig::default(),
            log_analytics: LogAnalyticsConfig::default(),
        }
    }
}

impl Default for AzureConfig {
    fn default() -> Self {
        Self {
            management_url: Url::parse("https://management.azure.com/").expect("static url"),
            authority_url: Url::parse("https://login.microsoftonline.com/").expect("static url"),
            tenant_id: "organizations".to_string(),
            client_id: DEFAULT_PUBLIC_CLIENT_ID.to_string(),
            managed_identity_client_id: None,
            subscription_id: None,
            reservations_api_version: "2022-11-01".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse("https://graph.microsoft.com/").expect("static url"),
        }
    }
}

impl Default for LogAnalyticsConfig {
    fn default() -> Self {
        Self {
            workspace_id: None,
            shared_key: None,
            log_type: "ReservationMonitor".to_string(),
            endpoint: None,
        }
    }
}

impl LogAnalyticsConfig {
    /// Workspace id and key, when both are present.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.workspace_id.as_deref(), self.shared_key.as_deref()) {
            (Some(id), Some(key)) if !id.is_empty() && !key.is_empty() => Some((id, key)),
            _ => None,
        }
    }

    /// Ingestion base URL for the configured workspace.
    pub fn endpoint_for(&self, workspace_id: &str) -> Result<Url, Error> {
        if let Some(endpoint) = &self.endpoint {
            return Ok(endpoint.clone());
        }
        Url::parse(&format!("https://{workspace_id}.ods.opinsights.azure.com/")).map_err(|e| Error::Config {
            message: format!("invalid Log Analytics workspace id {workspace_id:?}: {e}"),
        })
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let mut config: Self = Self::figment(args).extract()?;
        config.apply_args(args);
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            .merge(Yaml::file(&args.config))
            .merge(Env::prefixed("RESMON_").split("__").ignore(&["CONFIG"]))
    }

    /// CLI flags win over file and environment values. Switches only ever turn features on.
    fn apply_args(&mut self, args: &Args) {
        if let Some(sender) = &args.sender_email {
            self.sender_email = sender.clone();
        }
        if args.use_managed_identity {
            self.use_managed_identity = true;
        }
        if let Some(id) = &args.log_analytics_workspace_id {
            self.log_analytics.workspace_id = Some(id.clone());
        }
        if let Some(key) = &args.log_analytics_shared_key {
            self.log_analytics.shared_key = Some(key.clone());
        }
        if args.no_color {
            self.color = false;
        }
    }

    pub fn auth_mode(&self) -> AuthMode {
        if self.use_managed_identity {
            AuthMode::ManagedIdentity
        } else {
            AuthMode::Interactive
        }
    }

    /// Recipients of expiry warnings, falling back to the sender mailbox.
    pub fn recipients(&self) -> Vec<String> {
        if self.recipients.is_empty() {
            vec![self.sender_email.clone()]
        } else {
            self.recipients.clone()
        }
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        self.sender_email.parse::<Address>().map_err(|e| Error::Config {
            message: format!("sender_email {:?} is not a valid address: {e}", self.sender_email),
        })?;

        for recipient in &self.recipients {
            recipient.parse::<Address>().map_err(|e| Error::Config {
                message: format!("recipient {recipient:?} is not a valid address: {e}"),
            })?;
        }

        if self.azure.tenant_id.trim().is_empty() {
            return Err(Error::Config {
                message: "azure.tenant_id cannot be empty".to_string(),
            });
        }

        let la = &self.log_analytics;
        if la.log_type.is_empty() || !la.log_type.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(Error::Config {
                message: format!(
                    "log_analytics.log_type {:?} must be non-empty and contain only letters, digits and underscores",
                    la.log_type
                ),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    fn args(path: &str) -> Args {
        Args {
            config: path.to_string(),
            validate: false,
            active_only: false,
            expired_only: false,
            sender_email: None,
            use_managed_identity: false,
            log_analytics_workspace_id: None,
            log_analytics_shared_key: None,
            no_color: false,
        }
    }

    #[test]
    fn test_defaults_without_config_file() {
        Jail::expect_with(|_jail| {
            let config = Config::load(&args("missing.yaml"))?;

            assert_eq!(config.sender_email, DEFAULT_SENDER_EMAIL);
            assert_eq!(config.recipients(), vec![DEFAULT_SENDER_EMAIL.to_string()]);
            assert_eq!(config.auth_mode(), AuthMode::Interactive);
            assert!(config.color);
            assert_eq!(config.azure.request_timeout, Duration::from_secs(30));
            assert!(matches!(config.mail.transport, MailTransportConfig::Graph));
            assert!(config.log_analytics.credentials().is_none());

            Ok(())
        });
    }

    #[test]
    fn test_yaml_then_env_then_args() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
sender_email: ops@contoso.com
recipients:
  - finops@contoso.com
azure:
  subscription_id: sub-from-file
  request_timeout: 10s
mail:
  transport:
    type: file
    path: ./outbox
"#,
            )?;

            jail.set_env("RESMON_AZURE__SUBSCRIPTION_ID", "sub-from-env");

            let mut args = args("test.yaml");
            args.sender_email = Some("cli@contoso.com".to_string());
            args.no_color = true;

            let config = Config::load(&args)?;

            assert_eq!(config.sender_email, "cli@contoso.com");
            assert_eq!(config.recipients(), vec!["finops@contoso.com".to_string()]);
            assert_eq!(config.azure.subscription_id.as_deref(), Some("sub-from-env"));
            assert_eq!(config.azure.request_timeout, Duration::from_secs(10));
            assert!(!config.color);
            match config.mail.transport {
                MailTransportConfig::File { path } => assert_eq!(path, "./outbox"),
                other => panic!("unexpected transport {other:?}"),
            }

            Ok(())
        });
    }

    #[test]
    fn test_managed_identity_flag_and_workspace() {
        Jail::expect_with(|_jail| {
            let mut args = args("missing.yaml");
            args.use_managed_identity = true;
            args.log_analytics_workspace_id = Some("ws-123".to_string());
            args.log_analytics_shared_key = Some("c2VjcmV0".to_string());

            let config = Config::load(&args)?;

            assert_eq!(config.auth_mode(), AuthMode::ManagedIdentity);
            assert_eq!(config.log_analytics.credentials(), Some(("ws-123", "c2VjcmV0")));
            assert_eq!(
                config.log_analytics.endpoint_for("ws-123").unwrap().as_str(),
                "https://ws-123.ods.opinsights.azure.com/"
            );

            Ok(())
        });
    }

    #[test]
    fn test_unknown_field_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("test.yaml", "sender_emial: typo@contoso.com\n")?;
            assert!(Config::load(&args("test.yaml")).is_err());
            Ok(())
        });
    }

    #[test]
    fn test_validation_invalid_sender() {
        let config = Config {
            sender_email: "not an address".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config { .. })));
    }

    #[test]
    fn test_incomplete_log_analytics_is_not_fatal() {
        Jail::expect_with(|_jail| {
            let mut args = args("missing.yaml");
            args.use_managed_identity = true;
            args.log_analytics_workspace_id = Some("ws-123".to_string());

            let config = Config::load(&args)?;

            assert_eq!(config.auth_mode(), AuthMode::ManagedIdentity);
            assert!(config.log_analytics.credentials().is_none());
            Ok(())
        });
    }

    #[test]
    fn test_undecodable_shared_key_is_not_fatal() {
        let mut config = Config::default();
        config.log_analytics.workspace_id = Some("ws".to_string());
        config.log_analytics.shared_key = Some("not base64!!".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_log_type() {
        let mut config = Config::default();
        config.log_analytics.log_type = "bad-type".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_args_parsing() {
        let args = Args::parse_from([
            "resmon",
            "--active-only",
            "--sender-email",
            "ops@contoso.com",
            "--use-managed-identity",
            "--log-analytics-workspace-id",
            "ws",
            "--log-analytics-shared-key",
            "a2V5",
        ]);
        assert!(args.active_only);
        assert!(!args.expired_only);
        assert_eq!(args.filter(), ReportFilter::ActiveOnly);
        assert_eq!(args.sender_email.as_deref(), Some("ops@contoso.com"));
        assert!(args.use_managed_identity);
        assert_eq!(args.log_analytics_workspace_id.as_deref(), Some("ws"));
    }

    #[test]
    fn test_help_is_a_clean_exit() {
        let err = Args::try_parse_from(["resmon", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
        assert_eq!(err.exit_code(), 0);
    }
}
