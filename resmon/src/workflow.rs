//! The reporting run.
//!
//! ```text
//! Workflow::run()
//!   ├─ sessions.ensure_cloud_session()     // sign in, pick subscription
//!   ├─ sessions.ensure_mail_session()
//!   ├─ inventory.list_reservations()       // empty -> "No reservations found.", done
//!   ├─ ReservationSet::partition(now)      // one reference instant for the whole run
//!   ├─ for each section in the filter:
//!   │    └─ for each reservation:
//!   │         ├─ renderer.reservation()
//!   │         └─ notifier.notify()         // only on threshold days; failures logged
//!   └─ emitter.emit(summary)
//!
//! on any fatal error: emitter.emit(failure), error returned
//! ```

use chrono::Utc;
use std::io::Write;
use tracing::{error, info, warn};

use crate::auth::{MailSession, SessionEstablisher};
use crate::errors::{Error, Result};
use crate::inventory::{ReservationInventory, ReservationSet};
use crate::log_analytics::{RunRecord, SummaryEmitter, SummaryMetrics};
use crate::notifications::{Notifier, is_notification_day};
use crate::report::{ReportFilter, ReportRenderer, Section};

/// How a run that did not fail ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Inventory was empty; nothing printed beyond a notice
    NothingToReport,
    Completed(SummaryMetrics),
}

pub struct Workflow<W: Write> {
    filter: ReportFilter,
    sessions: SessionEstablisher,
    inventory: Box<dyn ReservationInventory>,
    notifier: Notifier,
    emitter: SummaryEmitter,
    renderer: ReportRenderer<W>,
}

fn write_error(e: std::io::Error) -> Error {
    Error::Internal {
        operation: format!("write report: {e}"),
    }
}

impl<W: Write> Workflow<W> {
    pub fn new(
        filter: ReportFilter,
        sessions: SessionEstablisher,
        inventory: Box<dyn ReservationInventory>,
        notifier: Notifier,
        emitter: SummaryEmitter,
        renderer: ReportRenderer<W>,
    ) -> Self {
        Self {
            filter,
            sessions,
            inventory,
            notifier,
            emitter,
            renderer,
        }
    }

    /// Run once. A fatal error is reported to the summary sink before it is returned.
    pub async fn run(&mut self) -> Result<RunOutcome> {
        match self.execute().await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!(error = %e, "Reservation report failed");
                self.emitter.emit(&RunRecord::failure()).await;
                Err(e)
            }
        }
    }

    async fn execute(&mut self) -> Result<RunOutcome> {
        let cloud = self.sessions.ensure_cloud_session().await?;
        let mail = self.sessions.ensure_mail_session().await?;

        let reservations = self.inventory.list_reservations(&cloud).await?;
        let reference = Utc::now();

        if reservations.is_empty() {
            info!("Inventory is empty");
            self.renderer.line("No reservations found.").map_err(write_error)?;
            return Ok(RunOutcome::NothingToReport);
        }

        let set = ReservationSet::partition(reservations, reference);
        info!(
            active = set.active.len(),
            expired = set.expired.len(),
            reference = %set.reference,
            "Fetched reservations"
        );

        for section in self.filter.sections() {
            self.render_section(*section, &set, &mail).await?;
        }

        let metrics = SummaryMetrics::from_set(&set);
        self.renderer.line("").map_err(write_error)?;
        self.renderer
            .line(&format!(
                "Active: {}  Expired: {}  Expiring within 180 days: {}",
                metrics.total_active, metrics.total_expired, metrics.expiring_within_180_days
            ))
            .map_err(write_error)?;

        self.emitter.emit(&RunRecord::Summary(metrics)).await;
        Ok(RunOutcome::Completed(metrics))
    }

    async fn render_section(&mut self, section: Section, set: &ReservationSet, mail: &MailSession) -> Result<()> {
        let reservations = match section {
            Section::Active => &set.active,
            Section::Expired => &set.expired,
        };

        self.renderer.section_header(section, reservations.len()).map_err(write_error)?;
        if reservations.is_empty() {
            self.renderer.empty_section(section).map_err(write_error)?;
            return Ok(());
        }

        for reservation in reservations {
            let days = reservation.days_remaining(set.reference);
            self.renderer.reservation(reservation, days).map_err(write_error)?;

            if is_notification_day(days)
                && let Err(e) = self.notifier.notify(mail, reservation, days).await
            {
                warn!(error = %e, "Expiry notice not sent, continuing");
            }
        }

        Ok(())
    }

    pub fn into_output(self) -> W {
        self.renderer.into_inner()
    }
}
