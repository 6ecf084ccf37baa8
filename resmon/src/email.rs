//! Mail delivery for expiry notices.
//!
//! The Graph transport calls `sendMail`: as the signed-in identity's own mailbox under a
//! managed identity, and explicitly as the configured sender mailbox when signed in
//! interactively. The file transport writes `.eml` files for dry runs.

use async_trait::async_trait;
use lettre::{AsyncFileTransport, AsyncTransport, Message, Tokio1Executor, message::Mailbox, message::header::ContentType};
use serde_json::json;
use std::path::Path;
use tracing::debug;
use url::Url;

use crate::auth::{AuthMode, MailSession};
use crate::config::{Config, MailTransportConfig};
use crate::errors::{Error, Result};

/// A plain-text message ready to send.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMail {
    pub subject: String,
    pub body: String,
    pub to: Vec<String>,
}

#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, session: &MailSession, mail: &OutgoingMail) -> Result<()>;
}

/// Build the sender for the configured transport.
pub fn create_mail_sender(config: &Config, http: reqwest::Client) -> Result<Box<dyn MailSender>> {
    match &config.mail.transport {
        MailTransportConfig::Graph => Ok(Box::new(GraphMailSender::new(
            http,
            config.graph.base_url.clone(),
            config.sender_email.clone(),
        ))),
        MailTransportConfig::File { path } => Ok(Box::new(FileMailSender::new(Path::new(path), &config.sender_email)?)),
    }
}

pub struct GraphMailSender {
    http: reqwest::Client,
    base_url: Url,
    sender: String,
}

impl GraphMailSender {
    pub fn new(http: reqwest::Client, base_url: Url, sender: String) -> Self {
        Self { http, base_url, sender }
    }

    /// `/me/sendMail` for the identity's own mailbox, `/users/{sender}/sendMail` otherwise.
    fn send_url(&self, mode: AuthMode) -> Result<Url> {
        let mut url = self.base_url.join("v1.0/").map_err(|e| Error::Internal {
            operation: format!("build Graph URL: {e}"),
        })?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| Error::Internal {
                operation: "build Graph URL: base URL cannot have a path".to_string(),
            })?;
            segments.pop_if_empty();
            match mode {
                AuthMode::ManagedIdentity => segments.extend(["me", "sendMail"]),
                AuthMode::Interactive => segments.extend(["users", self.sender.as_str(), "sendMail"]),
            };
        }
        Ok(url)
    }

    fn payload(mail: &OutgoingMail) -> serde_json::Value {
        let recipients: Vec<_> = mail
            .to
            .iter()
            .map(|address| json!({ "emailAddress": { "address": address } }))
            .collect();

        json!({
            "message": {
                "subject": mail.subject,
                "body": { "contentType": "Text", "content": mail.body },
                "toRecipients": recipients,
            },
            "saveToSentItems": false,
        })
    }
}

#[async_trait]
impl MailSender for GraphMailSender {
    async fn send(&self, session: &MailSession, mail: &OutgoingMail) -> Result<()> {
        let url = self.send_url(session.mode)?;
        debug!(url = %url, recipients = mail.to.len(), "Sending mail through Graph");

        let response = self
            .http
            .post(url)
            .header("Authorization", session.token.bearer())
            .json(&Self::payload(mail))
            .send()
            .await
            .map_err(|e| Error::Internal {
                operation: format!("send Graph mail: {e}"),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Internal {
                operation: format!("send Graph mail: {status} - {body}"),
            });
        }

        Ok(())
    }
}

pub struct FileMailSender {
    transport: AsyncFileTransport<Tokio1Executor>,
    from: Mailbox,
}

impl FileMailSender {
    pub fn new(dir: &Path, sender: &str) -> Result<Self> {
        if !dir.exists() {
            std::fs::create_dir_all(dir).map_err(|e| Error::Internal {
                operation: format!("create emails directory: {e}"),
            })?;
        }
        let from = sender.parse::<Mailbox>().map_err(|e| Error::Internal {
            operation: format!("parse from email: {e}"),
        })?;
        Ok(Self {
            transport: AsyncFileTransport::<Tokio1Executor>::new(dir),
            from,
        })
    }
}

#[async_trait]
impl MailSender for FileMailSender {
    async fn send(&self, _session: &MailSession, mail: &OutgoingMail) -> Result<()> {
        let mut builder = Message::builder().from(self.from.clone()).subject(mail.subject.as_str());
        for address in &mail.to {
            let to = address.parse::<Mailbox>().map_err(|e| Error::Internal {
                operation: format!("parse to email: {e}"),
            })?;
            builder = builder.to(to);
        }

        let message = builder
            .header(ContentType::TEXT_PLAIN)
            .body(mail.body.clone())
            .map_err(|e| Error::Internal {
                operation: format!("build email message: {e}"),
            })?;

        self.transport.send(message).await.map_err(|e| Error::Internal {
            operation: format!("send file email: {e}"),
        })?;

        Ok(())
    }
}
