//! Subscription discovery and selection for the cloud session.

use async_trait::async_trait;
use serde::Deserialize;
use std::io::{BufRead, Write};
use tracing::{debug, info};
use url::Url;

use super::{AccessToken, AuthMode};
use crate::errors::{Error, Result};

const SUBSCRIPTIONS_API_VERSION: &str = "2022-12-01";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub subscription_id: String,
    pub display_name: String,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

/// Lists the subscriptions visible to a token.
#[async_trait]
pub trait SubscriptionSource: Send + Sync {
    async fn list_subscriptions(&self, token: &AccessToken) -> Result<Vec<Subscription>>;
}

/// Asks the operator which subscription to use. Returns the raw answer.
pub trait SubscriptionPrompt: Send + Sync {
    fn ask(&self, subscriptions: &[Subscription]) -> Result<String>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionPage {
    value: Vec<Subscription>,
    next_link: Option<Url>,
}

/// `GET /subscriptions` against Azure Resource Manager.
pub struct ArmSubscriptions {
    http: reqwest::Client,
    management_url: Url,
}

impl ArmSubscriptions {
    pub fn new(http: reqwest::Client, management_url: Url) -> Self {
        Self { http, management_url }
    }
}

#[async_trait]
impl SubscriptionSource for ArmSubscriptions {
    async fn list_subscriptions(&self, token: &AccessToken) -> Result<Vec<Subscription>> {
        let fail = |message: String| Error::Authentication {
            resource: "Azure Resource Manager".to_string(),
            message,
        };

        let mut url = self
            .management_url
            .join("subscriptions")
            .map_err(|e| fail(format!("invalid management URL: {e}")))?;
        url.query_pairs_mut().append_pair("api-version", SUBSCRIPTIONS_API_VERSION);

        let mut subscriptions = Vec::new();
        let mut next = Some(url);
        while let Some(url) = next.take() {
            debug!(url = %url, "Listing subscriptions");
            let response = self
                .http
                .get(url)
                .header("Authorization", token.bearer())
                .send()
                .await
                .map_err(|e| fail(format!("listing subscriptions: {e}")))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(fail(format!("listing subscriptions returned {status}: {body}")));
            }

            let page: SubscriptionPage = response
                .json()
                .await
                .map_err(|e| fail(format!("error decoding subscription list: {e}")))?;
            subscriptions.extend(page.value);
            next = page.next_link;
        }

        Ok(subscriptions)
    }
}

/// Numbered prompt on stderr, answer read from stdin.
pub struct StdinPrompt;

impl SubscriptionPrompt for StdinPrompt {
    fn ask(&self, subscriptions: &[Subscription]) -> Result<String> {
        let mut stderr = std::io::stderr().lock();
        let io_err = |e: std::io::Error| Error::Internal {
            operation: format!("prompt for subscription: {e}"),
        };

        writeln!(stderr, "Multiple subscriptions are available:").map_err(io_err)?;
        for (i, sub) in subscriptions.iter().enumerate() {
            writeln!(stderr, "  [{}] {} ({})", i + 1, sub.display_name, sub.subscription_id).map_err(io_err)?;
        }
        write!(stderr, "Select a subscription [1-{}]: ", subscriptions.len()).map_err(io_err)?;
        stderr.flush().map_err(io_err)?;

        let mut answer = String::new();
        std::io::stdin().lock().read_line(&mut answer).map_err(io_err)?;
        Ok(answer)
    }
}

/// Parse a 1-based answer into an index into a list of `max` entries.
pub fn parse_selection(input: &str, max: usize) -> Result<usize> {
    let trimmed = input.trim();
    match trimmed.parse::<usize>() {
        Ok(n) if (1..=max).contains(&n) => Ok(n - 1),
        _ => Err(Error::InvalidSelection {
            input: trimmed.to_string(),
            max,
        }),
    }
}

/// Decide which subscription the cloud session runs against.
///
/// A configured id must be visible. Otherwise interactive sign-in with no subscriptions is
/// an error, one subscription is taken as is and several are put to the operator. A managed
/// identity takes the first visible subscription, or none.
pub fn choose_subscription(
    mode: AuthMode,
    configured: Option<&str>,
    mut subscriptions: Vec<Subscription>,
    prompt: &dyn SubscriptionPrompt,
) -> Result<Option<Subscription>> {
    if let Some(id) = configured {
        return subscriptions
            .into_iter()
            .find(|s| s.subscription_id.eq_ignore_ascii_case(id))
            .map(Some)
            .ok_or_else(|| Error::UnknownSubscription { id: id.to_string() });
    }

    match mode {
        AuthMode::ManagedIdentity => Ok(subscriptions.into_iter().next()),
        AuthMode::Interactive => match subscriptions.len() {
            0 => Err(Error::NoSubscriptions),
            1 => Ok(subscriptions.pop()),
            n => {
                let answer = prompt.ask(&subscriptions)?;
                let index = parse_selection(&answer, n)?;
                let chosen = subscriptions.swap_remove(index);
                info!(subscription = %chosen.display_name, "Subscription selected");
                Ok(Some(chosen))
            }
        },
    }
}
