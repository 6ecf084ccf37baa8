//! Expiry notices.
//!
//! A reservation gets one email per run when its days-remaining is exactly one of
//! [`NOTIFICATION_THRESHOLDS`]. Runs are expected daily, so each threshold fires once per
//! reservation over its lifetime.

use tracing::{info, instrument};

use crate::auth::MailSession;
use crate::email::{MailSender, OutgoingMail};
use crate::errors::{Error, Result};
use crate::inventory::Reservation;

pub const NOTIFICATION_THRESHOLDS: [i64; 7] = [1, 5, 10, 15, 30, 90, 180];

pub fn is_notification_day(days_remaining: i64) -> bool {
    NOTIFICATION_THRESHOLDS.contains(&days_remaining)
}

/// Human phrase for a threshold, e.g. 90 -> "3 months".
pub fn remaining_phrase(days_remaining: i64) -> String {
    match days_remaining {
        180 => "6 months".to_string(),
        90 => "3 months".to_string(),
        30 => "1 month".to_string(),
        1 => "1 day".to_string(),
        n => format!("{n} days"),
    }
}

pub fn compose_notice(reservation: &Reservation, days_remaining: i64, recipients: &[String]) -> OutgoingMail {
    let phrase = remaining_phrase(days_remaining);
    let name = reservation.display_name.as_deref().unwrap_or(&reservation.id);

    let subject = format!("Azure reservation {name} expires in {phrase}");
    let body = format!(
        "Hello,\n\
         \n\
         The Azure reservation below expires in {phrase}.\n\
         \n\
         Reservation:    {name}\n\
         Reservation ID: {id}\n\
         SKU:            {sku}\n\
         Quantity:       {quantity}\n\
         Expiry date:    {expiry} UTC\n\
         Days remaining: {days_remaining}\n\
         \n\
         Review renewal options under Reservations in the Azure portal before the expiry date \
         to keep the reserved pricing.\n\
         \n\
         This is an automated message, please do not reply to this email.\n",
        id = reservation.id,
        sku = reservation.sku_name,
        quantity = reservation.quantity,
        expiry = reservation.expiry_date.format("%Y-%m-%d %H:%M"),
    );

    OutgoingMail {
        subject,
        body,
        to: recipients.to_vec(),
    }
}

/// Sends expiry notices through a [`MailSender`].
pub struct Notifier {
    mailer: Box<dyn MailSender>,
    recipients: Vec<String>,
}

impl Notifier {
    pub fn new(mailer: Box<dyn MailSender>, recipients: Vec<String>) -> Self {
        Self { mailer, recipients }
    }

    /// Send one notice. Errors are returned for the caller to log; they never stop a run.
    #[instrument(skip_all, fields(reservation_id = %reservation.id, days_remaining = days_remaining))]
    pub async fn notify(&self, session: &MailSession, reservation: &Reservation, days_remaining: i64) -> Result<()> {
        let mail = compose_notice(reservation, days_remaining, &self.recipients);

        self.mailer.send(session, &mail).await.map_err(|e| Error::Mail {
            reservation_id: reservation.id.clone(),
            message: e.to_string(),
        })?;

        info!(
            recipients = ?self.recipients,
            phrase = %remaining_phrase(days_remaining),
            "Sent expiry notice"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthMode;
    use crate::test_utils::{RecordingMailer, reservation, test_mail_session};
    use chrono::{Duration, Utc};

    #[test]
    fn test_threshold_membership_is_exact() {
        for d in NOTIFICATION_THRESHOLDS {
            assert!(is_notification_day(d), "{d} should notify");
        }
        for d in [-180, -1, 0, 2, 4, 6, 9, 11, 29, 31, 89, 91, 179, 181, 365] {
            assert!(!is_notification_day(d), "{d} should not notify");
        }
    }

    #[test]
    fn test_phrases() {
        assert_eq!(remaining_phrase(180), "6 months");
        assert_eq!(remaining_phrase(90), "3 months");
        assert_eq!(remaining_phrase(30), "1 month");
        assert_eq!(remaining_phrase(15), "15 days");
        assert_eq!(remaining_phrase(10), "10 days");
        assert_eq!(remaining_phrase(5), "5 days");
        assert_eq!(remaining_phrase(1), "1 day");
        assert_eq!(remaining_phrase(42), "42 days");
    }

    #[test]
    fn test_compose_notice() {
        let mut r = reservation("/reservations/r1", Utc::now() + Duration::days(90));
        r.display_name = Some("prod-sql".to_string());
        r.quantity = 8;

        let mail = compose_notice(&r, 90, &["finops@contoso.com".to_string()]);

        assert_eq!(mail.subject, "Azure reservation prod-sql expires in 3 months");
        assert!(mail.body.contains("Reservation ID: /reservations/r1"));
        assert!(mail.body.contains("Quantity:       8"));
        assert!(mail.body.contains("Days remaining: 90"));
        assert_eq!(mail.to, vec!["finops@contoso.com".to_string()]);
    }

    #[tokio::test]
    async fn test_notify_sends_once() {
        let mailer = RecordingMailer::default();
        let sent = mailer.sent.clone();
        let notifier = Notifier::new(Box::new(mailer), vec!["ops@contoso.com".to_string()]);

        let r = reservation("r1", Utc::now() + Duration::days(181));
        notifier
            .notify(&test_mail_session(AuthMode::Interactive), &r, 180)
            .await
            .unwrap();

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].subject.ends_with("6 months"));
    }

    #[tokio::test]
    async fn test_notify_failure_names_reservation() {
        let notifier = Notifier::new(Box::new(RecordingMailer::failing()), vec!["ops@contoso.com".to_string()]);

        let r = reservation("r-broken", Utc::now() + Duration::days(6));
        let err = notifier
            .notify(&test_mail_session(AuthMode::Interactive), &r, 5)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Mail { ref reservation_id, .. } if reservation_id == "r-broken"));
    }
}
