//! Glucose alert pipeline
//!
//! Runs after a reading is stored: look up the user's enabled thresholds,
//! classify the value, record at most one alert, then try to notify. The
//! alert row is written before any email attempt, and nothing here can fail
//! the reading that triggered it.

mod evaluator;
mod recorder;

pub use evaluator::evaluate;
pub use recorder::AlertRecorder;

use crate::audit::{AuditAction, AuditLog};
use crate::notifier::{AlertPayload, NotificationError, Notifier};
use crate::scheduler::Clock;
use crate::storage::Database;
use model::{AlertConfig, AlertHistory, ReadingContext};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub struct AlertPipeline {
    db: Arc<Database>,
    recorder: AlertRecorder,
    notifier: Arc<Notifier>,
    audit: Arc<AuditLog>,
    clock: Arc<dyn Clock>,
    notification_timeout: Duration,
}

impl AlertPipeline {
    pub fn new(
        db: Arc<Database>,
        notifier: Arc<Notifier>,
        audit: Arc<AuditLog>,
        clock: Arc<dyn Clock>,
        notification_timeout: Duration,
    ) -> Self {
        Self {
            recorder: AlertRecorder::new(db.clone()),
            db,
            notifier,
            audit,
            clock,
            notification_timeout,
        }
    }

    /// Evaluate a stored reading; returns the alert it fired, if any
    pub async fn check_reading(
        &self,
        user_id: &str,
        glucose_level: f64,
        reading_id: &str,
    ) -> Option<AlertHistory> {
        let config = match self.db.get_enabled_alert_config(user_id) {
            Ok(Some(config)) => config,
            Ok(None) => return None,
            Err(e) => {
                error!("Failed to load alert configuration for user {}: {:#}", user_id, e);
                return None;
            }
        };

        let kind = evaluate(glucose_level, &config)?;

        let alert = match self.recorder.record(
            user_id,
            reading_id,
            kind,
            glucose_level,
            self.clock.now_utc(),
        ) {
            Ok(alert) => alert,
            Err(e) => {
                error!("{:#}", e);
                return None;
            }
        };

        info!("{} for user {}", alert.message, user_id);

        if config.email_recipients().is_empty() {
            debug!("User {} has no email recipients, not notifying", user_id);
        } else {
            self.notify(&config, &alert, glucose_level).await;
        }

        self.audit.record(
            user_id,
            AuditAction::Alert,
            "glucose",
            Some(reading_id),
            Some(json!({
                "type": kind.as_str(),
                "glucose_level": glucose_level,
            })),
        );

        Some(alert)
    }

    async fn notify(&self, config: &AlertConfig, alert: &AlertHistory, glucose_level: f64) {
        let result = match self.build_payload(config, alert, glucose_level) {
            Ok(payload) => {
                let send = self.notifier.send_alert(&config.destinations, &payload);
                match tokio::time::timeout(self.notification_timeout, send).await {
                    Ok(result) => result,
                    Err(_) => Err(NotificationError::Send(format!(
                        "timed out after {}s",
                        self.notification_timeout.as_secs()
                    ))),
                }
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(report) => self.audit.record(
                &alert.user_id,
                AuditAction::EmailSent,
                "alert",
                Some(&alert.reading_id),
                Some(json!({
                    "type": alert.kind.as_str(),
                    "glucose_level": glucose_level,
                    "recipients": report.emailed.len(),
                })),
            ),
            Err(e) => {
                warn!("Failed to send alert email for user {}: {}", alert.user_id, e);
                self.audit.record(
                    &alert.user_id,
                    AuditAction::EmailFailed,
                    "alert",
                    Some(&alert.reading_id),
                    Some(json!({
                        "type": alert.kind.as_str(),
                        "glucose_level": glucose_level,
                        "error": e.to_string(),
                    })),
                );
            }
        }
    }

    fn build_payload(
        &self,
        config: &AlertConfig,
        alert: &AlertHistory,
        glucose_level: f64,
    ) -> Result<AlertPayload, NotificationError> {
        let user = self
            .db
            .get_user(&alert.user_id)
            .map_err(|e| NotificationError::Render(format!("loading user: {:#}", e)))?
            .ok_or_else(|| NotificationError::Render(format!("user {} not found", alert.user_id)))?;

        // Missing reading details fall back to the alert time and "Other"
        let reading = self.db.get_reading(&alert.reading_id).ok().flatten();
        let (timestamp, context) = match reading {
            Some(r) => (r.timestamp, r.context),
            None => (alert.created_at, ReadingContext::Other),
        };

        Ok(AlertPayload {
            patient_name: user.display_name(),
            glucose_level,
            kind: alert.kind,
            timestamp,
            context,
            high_threshold: config.high_threshold,
            low_threshold: config.low_threshold,
        })
    }
}
