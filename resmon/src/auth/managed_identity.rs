//! Managed identity tokens.
//!
//! Automation accounts and App Service expose `IDENTITY_ENDPOINT` / `IDENTITY_HEADER`;
//! virtual machines answer on the instance metadata service. The first is preferred when
//! both are available.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

use super::{AccessToken, TokenAudience, TokenCredential, resource_id};
use crate::config::{AzureConfig, GraphConfig};
use crate::errors::{Error, Result};

const IMDS_TOKEN_URL: &str = "http://169.254.169.254/metadata/identity/oauth2/token";
const IMDS_API_VERSION: &str = "2018-02-01";
const APP_SERVICE_API_VERSION: &str = "2019-08-01";

#[derive(Debug, Clone)]
pub enum IdentityEndpoint {
    /// `IDENTITY_ENDPOINT` with its `X-IDENTITY-HEADER` secret
    AppService { endpoint: Url, header: String },
    /// Instance metadata service
    Imds { endpoint: Url },
}

impl IdentityEndpoint {
    /// Pick the endpoint advertised by the environment, falling back to IMDS.
    pub fn from_env() -> Self {
        let endpoint = std::env::var("IDENTITY_ENDPOINT").ok().and_then(|e| Url::parse(&e).ok());
        let header = std::env::var("IDENTITY_HEADER").ok();
        match (endpoint, header) {
            (Some(endpoint), Some(header)) => Self::AppService { endpoint, header },
            _ => Self::Imds {
                endpoint: Url::parse(IMDS_TOKEN_URL).expect("static url"),
            },
        }
    }
}

pub struct ManagedIdentityCredential {
    http: reqwest::Client,
    endpoint: IdentityEndpoint,
    client_id: Option<String>,
    management_resource: String,
    graph_resource: String,
}

impl ManagedIdentityCredential {
    pub fn new(http: reqwest::Client, endpoint: IdentityEndpoint, azure: &AzureConfig, graph: &GraphConfig) -> Self {
        Self {
            http,
            endpoint,
            client_id: azure.managed_identity_client_id.clone(),
            management_resource: resource_id(&azure.management_url),
            graph_resource: resource_id(&graph.base_url),
        }
    }

    pub fn from_env(http: reqwest::Client, azure: &AzureConfig, graph: &GraphConfig) -> Self {
        Self::new(http, IdentityEndpoint::from_env(), azure, graph)
    }

    fn resource(&self, audience: TokenAudience) -> &str {
        match audience {
            TokenAudience::Management => &self.management_resource,
            TokenAudience::Mail => &self.graph_resource,
        }
    }
}

/// Token response shared by both endpoint flavours.
#[derive(Debug, Deserialize)]
struct ManagedIdentityTokenResponse {
    access_token: String,
    expires_on: ExpiresOn,
}

/// `expires_on` is a unix timestamp, sent as a string by most hosts and as a number by some.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExpiresOn {
    Number(i64),
    Text(String),
}

impl ExpiresOn {
    fn to_datetime(&self) -> Option<DateTime<Utc>> {
        let secs = match self {
            ExpiresOn::Number(n) => *n,
            ExpiresOn::Text(s) => s.trim().parse().ok()?,
        };
        DateTime::from_timestamp(secs, 0)
    }
}

#[async_trait]
impl TokenCredential for ManagedIdentityCredential {
    #[instrument(skip(self))]
    async fn get_token(&self, audience: TokenAudience) -> Result<AccessToken> {
        let resource = self.resource(audience);
        let auth_error = |message: String| Error::Authentication {
            resource: audience.to_string(),
            message,
        };

        let mut query = vec![("resource", resource.to_string())];
        if let Some(client_id) = &self.client_id {
            query.push(("client_id", client_id.clone()));
        }

        let request = match &self.endpoint {
            IdentityEndpoint::AppService { endpoint, header } => {
                query.push(("api-version", APP_SERVICE_API_VERSION.to_string()));
                self.http.get(endpoint.clone()).header("X-IDENTITY-HEADER", header)
            }
            IdentityEndpoint::Imds { endpoint } => {
                query.push(("api-version", IMDS_API_VERSION.to_string()));
                self.http.get(endpoint.clone()).header("Metadata", "true")
            }
        };

        debug!(resource = %resource, "Requesting managed identity token");

        let response = request
            .query(&query)
            .send()
            .await
            .map_err(|e| auth_error(format!("identity endpoint unreachable: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(auth_error(format!("identity endpoint returned {status}: {body}")));
        }

        let token: ManagedIdentityTokenResponse = response
            .json()
            .await
            .map_err(|e| auth_error(format!("error decoding token response: {e}")))?;

        let expires_on = token
            .expires_on
            .to_datetime()
            .ok_or_else(|| auth_error("token response has an unreadable expires_on".to_string()))?;

        Ok(AccessToken::new(token.access_token, expires_on))
    }
}
