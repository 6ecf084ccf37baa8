//! Reservation inventory: fetching from Azure Resource Manager and splitting into active
//! and expired sets.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use tracing::{debug, error, instrument};
use url::Url;

use crate::auth::CloudSession;
use crate::errors::{Error, Result};

/// A capacity reservation as reported by the provider. Never modified by this crate.
#[derive(Debug, Clone, PartialEq)]
pub struct Reservation {
    pub id: String,
    pub sku_name: String,
    pub display_name: Option<String>,
    pub effective_date: Option<DateTime<Utc>>,
    pub expiry_date: DateTime<Utc>,
    pub quantity: i64,
    pub provisioning_state: Option<String>,
    pub term: Option<String>,
}

impl Reservation {
    /// Whole days from `reference` until expiry, truncated toward zero. Negative once expired.
    pub fn days_remaining(&self, reference: DateTime<Utc>) -> i64 {
        (self.expiry_date - reference).num_days()
    }

    pub fn is_expired(&self, reference: DateTime<Utc>) -> bool {
        self.expiry_date < reference
    }
}

/// Reservations split once against a single reference instant.
#[derive(Debug, Clone, Default)]
pub struct ReservationSet {
    pub reference: DateTime<Utc>,
    pub active: Vec<Reservation>,
    pub expired: Vec<Reservation>,
}

impl ReservationSet {
    /// Every reservation lands in exactly one of the two lists; order within each is kept.
    pub fn partition(reservations: Vec<Reservation>, reference: DateTime<Utc>) -> Self {
        let (expired, active): (Vec<_>, Vec<_>) = reservations.into_iter().partition(|r| r.is_expired(reference));
        Self {
            reference,
            active,
            expired,
        }
    }

    pub fn len(&self) -> usize {
        self.active.len() + self.expired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Source of the reservation list.
#[async_trait]
pub trait ReservationInventory: Send + Sync {
    async fn list_reservations(&self, session: &CloudSession) -> Result<Vec<Reservation>>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReservationPage {
    #[serde(default)]
    value: Vec<ReservationResponse>,
    next_link: Option<Url>,
}

#[derive(Debug, Deserialize)]
struct ReservationResponse {
    id: String,
    #[serde(default)]
    sku: Option<SkuResponse>,
    #[serde(default)]
    properties: ReservationProperties,
}

#[derive(Debug, Deserialize)]
struct SkuResponse {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ReservationProperties {
    display_name: Option<String>,
    quantity: Option<i64>,
    effective_date_time: Option<DateTime<Utc>>,
    expiry_date_time: Option<DateTime<Utc>>,
    expiry_date: Option<NaiveDate>,
    provisioning_state: Option<String>,
    term: Option<String>,
}

impl TryFrom<ReservationResponse> for Reservation {
    type Error = Error;

    fn try_from(raw: ReservationResponse) -> Result<Self> {
        let props = raw.properties;
        // Older reservations only carry the date; they expire at the start of that day (UTC)
        let expiry_date = props
            .expiry_date_time
            .or_else(|| props.expiry_date.and_then(|d| d.and_hms_opt(0, 0, 0)).map(|dt| dt.and_utc()))
            .ok_or_else(|| Error::Inventory {
                message: format!("reservation {} has no expiry date", raw.id),
            })?;

        Ok(Self {
            id: raw.id,
            sku_name: raw.sku.map(|s| s.name).unwrap_or_default(),
            display_name: props.display_name,
            effective_date: props.effective_date_time,
            expiry_date,
            quantity: props.quantity.unwrap_or_default(),
            provisioning_state: props.provisioning_state,
            term: props.term,
        })
    }
}

/// Lists every reservation the caller can read through `Microsoft.Capacity`.
pub struct ArmReservationInventory {
    http: reqwest::Client,
    management_url: Url,
    api_version: String,
}

impl ArmReservationInventory {
    pub fn new(http: reqwest::Client, management_url: Url, api_version: impl Into<String>) -> Self {
        Self {
            http,
            management_url,
            api_version: api_version.into(),
        }
    }

    fn list_url(&self) -> Result<Url> {
        let mut url = self
            .management_url
            .join("providers/Microsoft.Capacity/reservations")
            .map_err(|e| Error::Inventory {
                message: format!("invalid management URL: {e}"),
            })?;
        url.query_pairs_mut().append_pair("api-version", &self.api_version);
        Ok(url)
    }
}

#[async_trait]
impl ReservationInventory for ArmReservationInventory {
    #[instrument(skip_all)]
    async fn list_reservations(&self, session: &CloudSession) -> Result<Vec<Reservation>> {
        let mut reservations = Vec::new();
        let mut next = Some(self.list_url()?);

        while let Some(url) = next.take() {
            debug!(url = %url, "Fetching reservation page");
            let response = self
                .http
                .get(url)
                .header("Authorization", session.token.bearer())
                .send()
                .await
                .map_err(|e| Error::Inventory {
                    message: format!("request failed: {e}"),
                })?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(Error::Inventory {
                    message: format!("{status} - {body}"),
                });
            }

            let body_text = response.text().await.map_err(|e| Error::Inventory {
                message: format!("reading response body: {e}"),
            })?;
            let page: ReservationPage = serde_json::from_str(&body_text).map_err(|e| {
                error!(error = %e, "Failed to parse reservation list response");
                debug!(body = %body_text, "Unparseable reservation list response");
                Error::Inventory {
                    message: format!("error decoding response body: {e}"),
                }
            })?;

            for raw in page.value {
                reservations.push(Reservation::try_from(raw)?);
            }
            next = page.next_link;
        }

        debug!(count = reservations.len(), "Fetched reservations");
        Ok(reservations)
    }
}
