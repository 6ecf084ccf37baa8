use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument};

use super::subscriptions::{SubscriptionPrompt, SubscriptionSource, choose_subscription};
use super::{AccessToken, AuthMode, Subscription, TokenAudience, TokenCredential};
use crate::errors::{Error, Result};

/// Capability to call Azure Resource Manager.
#[derive(Debug, Clone)]
pub struct CloudSession {
    pub token: AccessToken,
    pub subscription: Option<Subscription>,
}

/// Capability to send mail through Microsoft Graph.
#[derive(Debug, Clone)]
pub struct MailSession {
    pub token: AccessToken,
    pub mode: AuthMode,
}

/// Establishes the cloud and mail sessions for a run.
///
/// Each `ensure_*` call reuses a live session and only connects when there is none.
pub struct SessionEstablisher {
    mode: AuthMode,
    credential: Arc<dyn TokenCredential>,
    subscriptions: Box<dyn SubscriptionSource>,
    prompt: Box<dyn SubscriptionPrompt>,
    configured_subscription: Option<String>,
    cloud: Option<CloudSession>,
    mail: Option<MailSession>,
}

impl SessionEstablisher {
    pub fn new(
        mode: AuthMode,
        credential: Arc<dyn TokenCredential>,
        subscriptions: Box<dyn SubscriptionSource>,
        prompt: Box<dyn SubscriptionPrompt>,
        configured_subscription: Option<String>,
    ) -> Self {
        Self {
            mode,
            credential,
            subscriptions,
            prompt,
            configured_subscription,
            cloud: None,
            mail: None,
        }
    }

    #[instrument(skip(self), fields(mode = %self.mode))]
    pub async fn ensure_cloud_session(&mut self) -> Result<CloudSession> {
        let live = self.cloud.as_ref().is_some_and(|s| s.token.is_live(Utc::now()));
        if live {
            info!("Already connected to Azure, reusing session");
        } else {
            let token = self.credential.get_token(TokenAudience::Management).await?;
            let visible = self.subscriptions.list_subscriptions(&token).await?;
            let subscription = choose_subscription(
                self.mode,
                self.configured_subscription.as_deref(),
                visible,
                self.prompt.as_ref(),
            )?;

            match &subscription {
                Some(sub) => info!(
                    subscription_id = %sub.subscription_id,
                    subscription = %sub.display_name,
                    "Connected to Azure"
                ),
                None => info!("Connected to Azure without a subscription context"),
            }

            self.cloud = Some(CloudSession { token, subscription });
        }

        self.cloud.clone().ok_or_else(|| Error::Internal {
            operation: "retain the Azure session".to_string(),
        })
    }

    #[instrument(skip(self), fields(mode = %self.mode))]
    pub async fn ensure_mail_session(&mut self) -> Result<MailSession> {
        let live = self.mail.as_ref().is_some_and(|s| s.token.is_live(Utc::now()));
        if live {
            info!("Already connected to Microsoft Graph, reusing session");
        } else {
            let token = self.credential.get_token(TokenAudience::Mail).await?;
            info!("Connected to Microsoft Graph");
            self.mail = Some(MailSession { token, mode: self.mode });
        }

        self.mail.clone().ok_or_else(|| Error::Internal {
            operation: "retain the Microsoft Graph session".to_string(),
        })
    }
}
