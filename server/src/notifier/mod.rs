//! Alert and weekly digest notifications

mod templates;
mod transport;

pub use templates::{RenderedMail, Renderer};
pub use transport::{DisabledMailer, MailTransport, OutgoingMail, SmtpMailer};

#[cfg(test)]
pub(crate) use transport::testing;

use crate::reports::WeeklyStats;
use crate::storage::AlertWithReading;
use chrono::{DateTime, Local, Utc};
use model::{AlertKind, NotificationDestination, ReadingContext};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotificationError {
    #[error("Mail server connection failed: {0}")]
    Connection(String),

    #[error("Failed to send email: {0}")]
    Send(String),

    #[error("Failed to render email: {0}")]
    Render(String),

    #[error("Invalid email address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("No email recipients configured")]
    NoRecipients,
}

/// Everything an alert email needs
#[derive(Debug, Clone, PartialEq)]
pub struct AlertPayload {
    pub patient_name: String,
    pub glucose_level: f64,
    pub kind: AlertKind,
    pub timestamp: DateTime<Utc>,
    pub context: ReadingContext,
    pub high_threshold: f64,
    pub low_threshold: f64,
}

/// Everything a weekly digest needs
#[derive(Debug, Clone, PartialEq)]
pub struct DigestPayload {
    pub patient_name: String,
    pub week_start: DateTime<Local>,
    pub week_end: DateTime<Local>,
    pub stats: WeeklyStats,
    pub high_threshold: f64,
    pub low_threshold: f64,
    /// Unacknowledged alerts, newest first
    pub alerts: Vec<AlertWithReading>,
    pub generated_at: DateTime<Local>,
}

/// Outcome of one successful delivery
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeliveryReport {
    /// Addresses the message was sent to
    pub emailed: Vec<String>,
    /// Destinations without a transport
    pub skipped: Vec<NotificationDestination>,
}

pub struct Notifier {
    transport: Arc<dyn MailTransport>,
    renderer: Renderer,
}

impl Notifier {
    pub fn new(transport: Arc<dyn MailTransport>) -> Result<Self, NotificationError> {
        Ok(Self {
            transport,
            renderer: Renderer::try_new()?,
        })
    }

    pub async fn verify(&self) -> Result<(), NotificationError> {
        self.transport.verify().await?;
        info!("Email service connection verified");
        Ok(())
    }

    pub async fn send_alert(
        &self,
        destinations: &[NotificationDestination],
        payload: &AlertPayload,
    ) -> Result<DeliveryReport, NotificationError> {
        let mail = self.renderer.render_alert(payload)?;
        let report = self.deliver(destinations, mail).await?;

        info!(
            "Alert email sent to {} recipients for {} alert",
            report.emailed.len(),
            payload.kind.title()
        );
        Ok(report)
    }

    pub async fn send_weekly_digest(
        &self,
        destinations: &[NotificationDestination],
        digest: &DigestPayload,
    ) -> Result<DeliveryReport, NotificationError> {
        let mail = self.renderer.render_digest(digest)?;
        let report = self.deliver(destinations, mail).await?;

        info!(
            "Weekly digest sent to {} recipients for {}",
            report.emailed.len(),
            digest.patient_name
        );
        Ok(report)
    }

    async fn deliver(
        &self,
        destinations: &[NotificationDestination],
        mail: RenderedMail,
    ) -> Result<DeliveryReport, NotificationError> {
        let mut report = DeliveryReport::default();

        for destination in destinations {
            match destination.email_address() {
                Some(address) => report.emailed.push(address.to_string()),
                None => {
                    warn!("No transport for {} destination, skipping {}", destination.kind(), destination);
                    report.skipped.push(destination.clone());
                }
            }
        }

        if report.emailed.is_empty() {
            return Err(NotificationError::NoRecipients);
        }

        self.transport
            .send(OutgoingMail {
                to: report.emailed.clone(),
                subject: mail.subject,
                text: mail.text,
                html: mail.html,
            })
            .await?;

        Ok(report)
    }
}
