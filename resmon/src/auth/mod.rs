//! Authentication against Entra ID for Azure Resource Manager and Microsoft Graph.
//!
//! Two credential sources are supported, selected once per run by [`AuthMode`]:
//!
//! - [`device_code::DeviceCodeCredential`]: interactive sign-in via the OAuth 2.0 device
//!   authorization grant. The user signs in once; the refresh token is reused for the
//!   Graph `Mail.Send` scope.
//! - [`managed_identity::ManagedIdentityCredential`]: the platform identity of the host
//!   (Automation account, App Service, VM).
//!
//! [`session::SessionEstablisher`] turns a credential into the explicit cloud and mail
//! session handles the rest of the run is given.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;

use crate::config::Config;
use crate::errors::Result;

pub mod device_code;
pub mod managed_identity;
pub mod session;
pub mod subscriptions;

pub use session::{CloudSession, MailSession, SessionEstablisher};
pub use subscriptions::Subscription;

/// How this run authenticates. Decides the token source for both sessions and how
/// notification mail is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// A person signs in through the device code flow
    Interactive,
    /// The host's managed identity is used without user interaction
    ManagedIdentity,
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMode::Interactive => write!(f, "interactive"),
            AuthMode::ManagedIdentity => write!(f, "managed identity"),
        }
    }
}

/// What a token is requested for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenAudience {
    /// Azure Resource Manager
    Management,
    /// Microsoft Graph, restricted to sending mail where the flow allows it
    Mail,
}

impl fmt::Display for TokenAudience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenAudience::Management => write!(f, "Azure Resource Manager"),
            TokenAudience::Mail => write!(f, "Microsoft Graph"),
        }
    }
}

/// A bearer token and its expiry.
#[derive(Clone)]
pub struct AccessToken {
    pub secret: String,
    pub expires_on: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(secret: impl Into<String>, expires_on: DateTime<Utc>) -> Self {
        Self {
            secret: secret.into(),
            expires_on,
        }
    }

    /// Whether the token is still usable at `now`, leaving a minute of headroom.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_on - chrono::Duration::minutes(1) > now
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.secret)
    }
}

// Never print the secret
impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"<redacted>")
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

/// Source of access tokens.
#[async_trait]
pub trait TokenCredential: Send + Sync {
    async fn get_token(&self, audience: TokenAudience) -> Result<AccessToken>;
}

/// Build the credential matching the configured auth mode.
pub fn create_credential(config: &Config, http: reqwest::Client) -> Arc<dyn TokenCredential> {
    match config.auth_mode() {
        AuthMode::Interactive => Arc::new(device_code::DeviceCodeCredential::new(http, &config.azure, &config.graph)),
        AuthMode::ManagedIdentity => Arc::new(managed_identity::ManagedIdentityCredential::from_env(
            http,
            &config.azure,
            &config.graph,
        )),
    }
}

/// Resource URL without a trailing slash, as identity endpoints expect it.
pub(crate) fn resource_id(url: &url::Url) -> String {
    url.as_str().trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_liveness_leaves_headroom() {
        let now = Utc::now();
        assert!(AccessToken::new("t", now + chrono::Duration::minutes(10)).is_live(now));
        assert!(!AccessToken::new("t", now + chrono::Duration::seconds(30)).is_live(now));
        assert!(!AccessToken::new("t", now - chrono::Duration::minutes(1)).is_live(now));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let token = AccessToken::new("super-secret", Utc::now());
        let printed = format!("{token:?}");
        assert!(!printed.contains("super-secret"));
        assert!(printed.contains("<redacted>"));
    }

    #[test]
    fn test_resource_id_strips_slash() {
        let url = url::Url::parse("https://management.azure.com/").unwrap();
        assert_eq!(resource_id(&url), "https://management.azure.com");
    }
}
