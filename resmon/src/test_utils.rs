//! In-memory collaborators and fixtures shared by the unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use tracing_subscriber::fmt::MakeWriter;

use crate::auth::subscriptions::{SubscriptionPrompt, SubscriptionSource};
use crate::auth::{AccessToken, AuthMode, CloudSession, MailSession, Subscription, TokenAudience, TokenCredential};
use crate::email::{MailSender, OutgoingMail};
use crate::errors::{Error, Result};
use crate::inventory::{Reservation, ReservationInventory};
use crate::log_analytics::{MetricsSink, RunRecord};

pub fn reservation(id: &str, expiry_date: DateTime<Utc>) -> Reservation {
    Reservation {
        id: id.to_string(),
        sku_name: "Standard_D2s_v3".to_string(),
        display_name: None,
        effective_date: None,
        expiry_date,
        quantity: 1,
        provisioning_state: Some("Succeeded".to_string()),
        term: None,
    }
}

/// A reservation that is `days` whole days from expiry for a run starting now.
pub fn reservation_in_days(id: &str, days: i64) -> Reservation {
    // An hour of slack keeps the truncated day count stable for the length of a test
    let offset = if days >= 0 {
        Duration::days(days) + Duration::hours(1)
    } else {
        Duration::days(days) - Duration::hours(1)
    };
    reservation(id, Utc::now() + offset)
}

pub fn subscription(id: &str) -> Subscription {
    Subscription {
        subscription_id: id.to_string(),
        display_name: format!("Subscription {id}"),
        tenant_id: None,
        state: Some("Enabled".to_string()),
    }
}

fn live_token(secret: &str) -> AccessToken {
    AccessToken::new(secret, Utc::now() + Duration::hours(1))
}

pub fn test_cloud_session() -> CloudSession {
    CloudSession {
        token: live_token("arm-token"),
        subscription: Some(subscription("sub-1")),
    }
}

pub fn test_mail_session(mode: AuthMode) -> MailSession {
    MailSession {
        token: live_token("graph-token"),
        mode,
    }
}

/// Hands out tokens and counts requests per audience.
#[derive(Default)]
pub struct FakeCredential {
    fail: bool,
    management_calls: AtomicUsize,
    mail_calls: AtomicUsize,
}

impl FakeCredential {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn calls(&self, audience: TokenAudience) -> usize {
        match audience {
            TokenAudience::Management => self.management_calls.load(Ordering::SeqCst),
            TokenAudience::Mail => self.mail_calls.load(Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl TokenCredential for FakeCredential {
    async fn get_token(&self, audience: TokenAudience) -> Result<AccessToken> {
        match audience {
            TokenAudience::Management => self.management_calls.fetch_add(1, Ordering::SeqCst),
            TokenAudience::Mail => self.mail_calls.fetch_add(1, Ordering::SeqCst),
        };
        if self.fail {
            return Err(Error::Authentication {
                resource: audience.to_string(),
                message: "simulated sign-in failure".to_string(),
            });
        }
        Ok(live_token(&format!("{audience}-token")))
    }
}

pub struct StaticSubscriptions(pub Vec<Subscription>);

#[async_trait]
impl SubscriptionSource for StaticSubscriptions {
    async fn list_subscriptions(&self, _token: &AccessToken) -> Result<Vec<Subscription>> {
        Ok(self.0.clone())
    }
}

pub struct FixedPrompt(pub String);

impl SubscriptionPrompt for FixedPrompt {
    fn ask(&self, _subscriptions: &[Subscription]) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Returns a fixed list and counts how often it was asked.
#[derive(Clone, Default)]
pub struct StaticInventory {
    pub reservations: Vec<Reservation>,
    pub calls: Arc<AtomicUsize>,
}

impl StaticInventory {
    pub fn new(reservations: Vec<Reservation>) -> Self {
        Self {
            reservations,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl ReservationInventory for StaticInventory {
    async fn list_reservations(&self, _session: &CloudSession) -> Result<Vec<Reservation>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.reservations.clone())
    }
}

/// Records every message it is asked to send; optionally fails each send after recording.
#[derive(Clone, Default)]
pub struct RecordingMailer {
    pub sent: Arc<Mutex<Vec<OutgoingMail>>>,
    fail: bool,
}

impl RecordingMailer {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn count(&self) -> usize {
        self.sent.lock().map(|s| s.len()).unwrap_or_default()
    }
}

#[async_trait]
impl MailSender for RecordingMailer {
    async fn send(&self, _session: &MailSession, mail: &OutgoingMail) -> Result<()> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(mail.clone());
        }
        if self.fail {
            return Err(Error::Internal {
                operation: "send Graph mail: 503 Service Unavailable".to_string(),
            });
        }
        Ok(())
    }
}

/// Keeps published run records in memory.
#[derive(Clone, Default)]
pub struct RecordingSink {
    pub records: Arc<Mutex<Vec<RunRecord>>>,
}

impl RecordingSink {
    pub fn records(&self) -> Vec<RunRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl MetricsSink for RecordingSink {
    async fn publish(&self, record: &RunRecord) -> Result<()> {
        if let Ok(mut records) = self.records.lock() {
            records.push(*record);
        }
        Ok(())
    }
}

/// reqwest is built without a bundled crypto provider; install the one `main` uses.
pub fn install_crypto_provider() {
    static PROVIDER: Once = Once::new();
    PROVIDER.call_once(|| {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
}

/// HTTP client for tests against mock servers.
pub fn http_client() -> reqwest::Client {
    install_crypto_provider();
    reqwest::Client::new()
}

/// In-memory log sink for asserting on emitted events.
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        self.0
            .lock()
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .unwrap_or_default()
    }
}

impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Ok(mut b) = self.0.lock() {
            b.extend_from_slice(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Subscriber that writes plain text into `buffer`, for use with `with_default`.
pub fn buffer_subscriber(buffer: &LogBuffer) -> impl tracing::Subscriber + Send + Sync + 'static {
    tracing_subscriber::fmt()
        .with_writer(buffer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish()
}

/// Run `f` with a subscriber scoped to the current thread and return what it logged.
pub fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
    let buffer = LogBuffer::default();
    let result = tracing::subscriber::with_default(buffer_subscriber(&buffer), f);
    (result, buffer.contents())
}
