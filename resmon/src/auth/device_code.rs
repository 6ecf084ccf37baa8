//! Interactive sign-in through the OAuth 2.0 device authorization grant.
//!
//! The first token request shows a code for the user to enter at the verification URL and
//! polls until the sign-in completes. Subsequent requests for another audience redeem the
//! refresh token from the first sign-in, so the user is only prompted once per run.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::{AccessToken, TokenAudience, TokenCredential, resource_id};
use crate::config::{AzureConfig, GraphConfig};
use crate::errors::{Error, Result};

const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";

#[derive(Debug, Deserialize)]
struct DeviceCodeResponse {
    device_code: String,
    user_code: String,
    verification_uri: String,
    expires_in: u64,
    #[serde(default = "default_interval")]
    interval: u64,
    message: Option<String>,
}

fn default_interval() -> u64 {
    5
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    error_description: Option<String>,
}

pub struct DeviceCodeCredential {
    http: reqwest::Client,
    authority: Url,
    tenant_id: String,
    client_id: String,
    management_scope: String,
    mail_scope: String,
    refresh_token: Mutex<Option<String>>,
}

impl DeviceCodeCredential {
    pub fn new(http: reqwest::Client, azure: &AzureConfig, graph: &GraphConfig) -> Self {
        Self {
            http,
            authority: azure.authority_url.clone(),
            tenant_id: azure.tenant_id.clone(),
            client_id: azure.client_id.clone(),
            management_scope: format!("{}/user_impersonation", resource_id(&azure.management_url)),
            mail_scope: format!("{}/Mail.Send", resource_id(&graph.base_url)),
            refresh_token: Mutex::new(None),
        }
    }

    fn scope(&self, audience: TokenAudience) -> String {
        let scope = match audience {
            TokenAudience::Management => &self.management_scope,
            TokenAudience::Mail => &self.mail_scope,
        };
        format!("{scope} offline_access")
    }

    fn endpoint(&self, leaf: &str) -> Result<Url> {
        self.authority
            .join(&format!("{}/oauth2/v2.0/{leaf}", self.tenant_id))
            .map_err(|e| Error::Config {
                message: format!("invalid authority URL: {e}"),
            })
    }

    fn remember(&self, refresh_token: Option<String>) {
        if let Some(token) = refresh_token
            && let Ok(mut slot) = self.refresh_token.lock()
        {
            *slot = Some(token);
        }
    }

    fn cached_refresh_token(&self) -> Option<String> {
        self.refresh_token.lock().ok().and_then(|slot| slot.clone())
    }

    async fn redeem_refresh_token(&self, refresh_token: &str, audience: TokenAudience) -> Result<TokenResponse> {
        let scope = self.scope(audience);
        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", self.client_id.as_str()),
            ("refresh_token", refresh_token),
            ("scope", scope.as_str()),
        ];
        let response = self
            .http
            .post(self.endpoint("token")?)
            .form(&form)
            .send()
            .await
            .map_err(|e| auth_error(audience, format!("token endpoint unreachable: {e}")))?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(auth_error(audience, format!("refresh token rejected: {body}")));
        }

        response
            .json()
            .await
            .map_err(|e| auth_error(audience, format!("error decoding token response: {e}")))
    }

    async fn sign_in(&self, audience: TokenAudience) -> Result<TokenResponse> {
        let scope = self.scope(audience);
        let response = self
            .http
            .post(self.endpoint("devicecode")?)
            .form(&[("client_id", self.client_id.as_str()), ("scope", scope.as_str())])
            .send()
            .await
            .map_err(|e| auth_error(audience, format!("device code endpoint unreachable: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(auth_error(audience, format!("device code request failed with {status}: {body}")));
        }

        let device: DeviceCodeResponse = response
            .json()
            .await
            .map_err(|e| auth_error(audience, format!("error decoding device code response: {e}")))?;

        // The prompt is for the person at the terminal, not the log
        match &device.message {
            Some(message) => eprintln!("{message}"),
            None => eprintln!(
                "To sign in, open {} and enter the code {}",
                device.verification_uri, device.user_code
            ),
        }

        let deadline = tokio::time::Instant::now() + Duration::from_secs(device.expires_in);
        let mut interval = Duration::from_secs(device.interval);

        loop {
            tokio::time::sleep(interval).await;
            if tokio::time::Instant::now() > deadline {
                return Err(auth_error(audience, "device code expired before sign-in completed".to_string()));
            }

            let response = self
                .http
                .post(self.endpoint("token")?)
                .form(&[
                    ("grant_type", DEVICE_CODE_GRANT),
                    ("client_id", self.client_id.as_str()),
                    ("device_code", device.device_code.as_str()),
                ])
                .send()
                .await
                .map_err(|e| auth_error(audience, format!("token endpoint unreachable: {e}")))?;

            if response.status().is_success() {
                return response
                    .json()
                    .await
                    .map_err(|e| auth_error(audience, format!("error decoding token response: {e}")));
            }

            let body = response.text().await.unwrap_or_default();
            let error: TokenErrorResponse = serde_json::from_str(&body)
                .map_err(|_| auth_error(audience, format!("unexpected token endpoint response: {body}")))?;

            match error.error.as_str() {
                "authorization_pending" => debug!("Waiting for device code sign-in"),
                "slow_down" => interval += Duration::from_secs(5),
                _ => {
                    let detail = error.error_description.unwrap_or(error.error);
                    return Err(auth_error(audience, detail));
                }
            }
        }
    }
}

fn auth_error(audience: TokenAudience, message: String) -> Error {
    Error::Authentication {
        resource: audience.to_string(),
        message,
    }
}

#[async_trait]
impl TokenCredential for DeviceCodeCredential {
    #[instrument(skip(self))]
    async fn get_token(&self, audience: TokenAudience) -> Result<AccessToken> {
        let issued_at = Utc::now();

        let token = match self.cached_refresh_token() {
            Some(refresh) => match self.redeem_refresh_token(&refresh, audience).await {
                Ok(token) => token,
                Err(e) => {
                    warn!(error = %e, "Refresh token not accepted, signing in again");
                    self.sign_in(audience).await?
                }
            },
            None => self.sign_in(audience).await?,
        };

        info!(audience = %audience, "Signed in interactively");
        self.remember(token.refresh_token);

        Ok(AccessToken::new(
            token.access_token,
            issued_at + chrono::Duration::seconds(token.expires_in),
        ))
    }
}
