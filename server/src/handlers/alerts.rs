//! Alert configuration, history and acknowledgment

use super::{ApiError, AppState, Caller};
use crate::audit::AuditAction;
use crate::notifier::AlertPayload;
use crate::storage::HistoryFilter;
use chrono::{DateTime, Utc};
use model::constants::{HISTORY_DEFAULT_LIMIT, HISTORY_MAX_LIMIT, TEST_ALERT_GLUCOSE};
use model::{
    AlertConfig, AlertConfigInput, AlertKind, NotificationDestination, ReadingContext,
    ValidationError,
};
use serde::{Deserialize, Serialize};
use tracing::info;

const NO_CONFIG: &str = "No alert configuration found";

/// Query parameters of the alert history listing
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub alert_type: Option<String>,
    pub acknowledged: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub id: String,
    pub alert_type: AlertKind,
    pub message: String,
    pub acknowledged: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub glucose_level: f64,
    pub reading_timestamp: DateTime<Utc>,
    pub context: ReadingContext,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pagination {
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryPage {
    pub alerts: Vec<HistoryEntry>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestEmailSent {
    pub message: String,
    pub recipients: usize,
}

/// Create or replace the caller's alert configuration
pub async fn save_config(
    state: &AppState,
    caller: &Caller,
    input: AlertConfigInput,
) -> Result<AlertConfig, ApiError> {
    let user = state
        .db
        .get_user(&caller.user_id)?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    let destinations = input.validate(&user.email)?;
    // Anything the mail transport would refuse fails the whole message later
    for address in destinations.iter().filter_map(NotificationDestination::email_address) {
        if address.parse::<lettre::Address>().is_err() {
            return Err(ValidationError::InvalidDestination(address.to_string()).into());
        }
    }
    let (config, created) = state.db.upsert_alert_config(
        &caller.user_id,
        input.high_threshold,
        input.low_threshold,
        &destinations,
        state.clock.now_utc(),
    )?;

    let action = if created {
        AuditAction::Create
    } else {
        AuditAction::Update
    };
    state
        .audit
        .record(&caller.user_id, action, "alert_config", Some(&config.id), None);

    info!(
        "Saved alert configuration for user {} (high {}, low {}, {} destinations)",
        caller.user_id,
        config.high_threshold,
        config.low_threshold,
        config.destinations.len()
    );
    Ok(config)
}

pub async fn get_config(state: &AppState, caller: &Caller) -> Result<AlertConfig, ApiError> {
    state
        .db
        .get_alert_config(&caller.user_id)?
        .ok_or_else(|| ApiError::NotFound(NO_CONFIG.to_string()))
}

/// Flip the enabled flag; returns the new value
pub async fn toggle_config(state: &AppState, caller: &Caller) -> Result<bool, ApiError> {
    let enabled = state
        .db
        .toggle_alert_config(&caller.user_id, state.clock.now_utc())?
        .ok_or_else(|| ApiError::NotFound(NO_CONFIG.to_string()))?;

    state
        .audit
        .record(&caller.user_id, AuditAction::Toggle, "alert_config", None, None);

    Ok(enabled)
}

pub async fn alert_history(
    state: &AppState,
    caller: &Caller,
    query: HistoryQuery,
) -> Result<HistoryPage, ApiError> {
    let limit = query.limit.unwrap_or(HISTORY_DEFAULT_LIMIT);
    if !(1..=HISTORY_MAX_LIMIT).contains(&limit) {
        return Err(ApiError::BadRequest(format!(
            "Limit must be an integer between 1 and {}",
            HISTORY_MAX_LIMIT
        )));
    }
    let offset = query.offset.unwrap_or(0);

    let kind = query
        .alert_type
        .as_deref()
        .map(str::parse::<AlertKind>)
        .transpose()
        .map_err(|_| {
            ApiError::BadRequest("Alert type must be one of: HIGH_GLUCOSE, LOW_GLUCOSE".to_string())
        })?;

    let filter = HistoryFilter {
        kind,
        acknowledged: query.acknowledged,
        limit,
        offset,
    };
    let (rows, total) = state.db.query_alert_history(&caller.user_id, &filter)?;

    let alerts = rows
        .into_iter()
        .map(|row| HistoryEntry {
            id: row.alert.id,
            alert_type: row.alert.kind,
            message: row.alert.message,
            acknowledged: row.alert.acknowledged,
            acknowledged_at: row.alert.acknowledged_at,
            created_at: row.alert.created_at,
            glucose_level: row.glucose_level,
            reading_timestamp: row.reading_timestamp,
            context: row.context,
        })
        .collect();

    Ok(HistoryPage {
        alerts,
        pagination: Pagination {
            total,
            limit,
            offset,
            has_more: total > offset as u64 + limit as u64,
        },
    })
}

/// Acknowledge one of the caller's open alerts
pub async fn acknowledge(state: &AppState, caller: &Caller, alert_id: &str) -> Result<(), ApiError> {
    let acknowledged = state
        .db
        .acknowledge_alert(alert_id, &caller.user_id, state.clock.now_utc())?;
    if !acknowledged {
        return Err(ApiError::NotFound(
            "Alert not found or already acknowledged".to_string(),
        ));
    }

    state
        .audit
        .record(&caller.user_id, AuditAction::Acknowledge, "alert", Some(alert_id), None);

    Ok(())
}

/// Check mail connectivity and send a sample HIGH alert to the caller's recipients
pub async fn test_email(state: &AppState, caller: &Caller) -> Result<TestEmailSent, ApiError> {
    let config = state
        .db
        .get_alert_config(&caller.user_id)?
        .ok_or_else(|| ApiError::NotFound(NO_CONFIG.to_string()))?;

    if config.email_recipients().is_empty() {
        return Err(ApiError::BadRequest(
            "No notification emails configured".to_string(),
        ));
    }

    let user = state
        .db
        .get_user(&caller.user_id)?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    state.notifier.verify().await?;

    let payload = AlertPayload {
        patient_name: user.display_name(),
        glucose_level: TEST_ALERT_GLUCOSE,
        kind: AlertKind::High,
        timestamp: state.clock.now_utc(),
        context: ReadingContext::Other,
        high_threshold: config.high_threshold,
        low_threshold: config.low_threshold,
    };
    let report = state.notifier.send_alert(&config.destinations, &payload).await?;

    state.audit.record(
        &caller.user_id,
        AuditAction::TestEmail,
        "alert_config",
        Some(&config.id),
        None,
    );

    Ok(TestEmailSent {
        message: "Test email sent successfully".to_string(),
        recipients: report.emailed.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::readings::create_reading;
    use crate::handlers::testing::{audit_actions, test_app, test_app_with, TestApp};
    use crate::notifier::testing::RecordingMailer;
    use crate::notifier::NotificationError;
    use model::{NewReading, NotificationDestination};
    use std::sync::atomic::Ordering;

    fn input(high: f64, low: f64, destinations: &[&str]) -> AlertConfigInput {
        AlertConfigInput {
            high_threshold: high,
            low_threshold: low,
            destinations: destinations.iter().map(|d| d.to_string()).collect(),
        }
    }

    async fn fire(app: &TestApp, level: f64) -> String {
        let created = create_reading(
            &app.state,
            &app.patient,
            NewReading::new(level, Utc::now(), ReadingContext::Fasting),
        )
        .await
        .unwrap();
        assert!(created.alert.is_some());
        created.id
    }

    #[tokio::test]
    async fn test_save_creates_then_updates() {
        let app = test_app();

        let first = save_config(&app.state, &app.patient, input(180.0, 70.0, &["care@x.com"]))
            .await
            .unwrap();
        assert_eq!(
            first.destinations,
            vec![
                NotificationDestination::Email("patient@example.com".to_string()),
                NotificationDestination::Email("care@x.com".to_string()),
            ]
        );

        let second = save_config(&app.state, &app.patient, input(200.0, 60.0, &[]))
            .await
            .unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.high_threshold, 200.0);

        assert_eq!(
            audit_actions(&app, "patient"),
            vec!["CREATE alert_config", "UPDATE alert_config"]
        );
    }

    #[tokio::test]
    async fn test_save_rejects_undeliverable_destination() {
        let app = test_app();

        let err = save_config(
            &app.state,
            &app.patient,
            input(180.0, 70.0, &["care@x.com", "mailto:nurse@x.com"]),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(matches!(
            get_config(&app.state, &app.patient).await,
            Err(ApiError::NotFound(_))
        ));
        assert!(audit_actions(&app, "patient").is_empty());
    }

    #[tokio::test]
    async fn test_save_rejects_inverted_thresholds() {
        let app = test_app();
        let err = save_config(&app.state, &app.patient, input(100.0, 100.0, &[]))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.to_string(), "High threshold must be greater than low threshold");

        let err = get_config(&app.state, &app.patient).await.unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn test_toggle() {
        let app = test_app();
        assert_eq!(
            toggle_config(&app.state, &app.patient).await.unwrap_err().status_code(),
            404
        );

        save_config(&app.state, &app.patient, input(180.0, 70.0, &[]))
            .await
            .unwrap();
        assert!(!toggle_config(&app.state, &app.patient).await.unwrap());
        assert!(!get_config(&app.state, &app.patient).await.unwrap().enabled);
        assert!(toggle_config(&app.state, &app.patient).await.unwrap());
    }

    #[tokio::test]
    async fn test_history_and_acknowledge() {
        let app = test_app();
        save_config(&app.state, &app.patient, input(180.0, 70.0, &[]))
            .await
            .unwrap();
        fire(&app, 250.0).await;
        fire(&app, 60.0).await;
        fire(&app, 300.0).await;

        let page = alert_history(&app.state, &app.patient, HistoryQuery::default())
            .await
            .unwrap();
        assert_eq!(page.pagination.total, 3);
        assert_eq!(page.pagination.limit, 50);
        assert!(!page.pagination.has_more);

        let highs = alert_history(
            &app.state,
            &app.patient,
            HistoryQuery {
                limit: Some(1),
                alert_type: Some("HIGH_GLUCOSE".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(highs.pagination.total, 2);
        assert_eq!(highs.alerts.len(), 1);
        assert!(highs.pagination.has_more);

        let alert_id = highs.alerts[0].id.clone();
        acknowledge(&app.state, &app.patient, &alert_id).await.unwrap();
        let err = acknowledge(&app.state, &app.patient, &alert_id).await.unwrap_err();
        assert_eq!(err.status_code(), 404);
        assert_eq!(err.to_string(), "Alert not found or already acknowledged");

        let open = alert_history(
            &app.state,
            &app.patient,
            HistoryQuery {
                acknowledged: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(open.pagination.total, 2);
        assert!(open.alerts.iter().all(|a| a.id != alert_id));
    }

    #[tokio::test]
    async fn test_acknowledge_foreign_alert() {
        let app = test_app();
        save_config(&app.state, &app.patient, input(180.0, 70.0, &[]))
            .await
            .unwrap();
        fire(&app, 250.0).await;
        let page = alert_history(&app.state, &app.patient, HistoryQuery::default())
            .await
            .unwrap();

        let err = acknowledge(&app.state, &app.admin, &page.alerts[0].id)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn test_history_rejects_bad_query() {
        let app = test_app();
        for limit in [0, 101] {
            let query = HistoryQuery {
                limit: Some(limit),
                ..Default::default()
            };
            let err = alert_history(&app.state, &app.patient, query).await.unwrap_err();
            assert_eq!(err.status_code(), 400);
        }

        let query = HistoryQuery {
            alert_type: Some("MEDIUM".to_string()),
            ..Default::default()
        };
        assert!(alert_history(&app.state, &app.patient, query).await.is_err());
    }

    #[tokio::test]
    async fn test_test_email_flow() {
        let app = test_app();
        assert_eq!(
            test_email(&app.state, &app.patient).await.unwrap_err().status_code(),
            404
        );

        save_config(&app.state, &app.patient, input(180.0, 70.0, &["care@x.com"]))
            .await
            .unwrap();
        let sent = test_email(&app.state, &app.patient).await.unwrap();
        assert_eq!(sent.recipients, 2);

        let mail = &app.mailer.sent()[0];
        assert_eq!(mail.subject, "🚨 High Glucose Alert - 200 mg/dL");
        assert!(mail.text.contains("Context: Other"));
        assert!(audit_actions(&app, "patient").contains(&"TEST_EMAIL alert_config".to_string()));
    }

    #[tokio::test]
    async fn test_test_email_without_email_destinations() {
        let app = test_app();
        app.state
            .db
            .upsert_alert_config(
                "patient",
                180.0,
                70.0,
                &[NotificationDestination::Sms("+15550001111".to_string())],
                Utc::now(),
            )
            .unwrap();

        let err = test_email(&app.state, &app.patient).await.unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn test_test_email_connection_failure() {
        let mailer = RecordingMailer::default();
        mailer.fail_verify.store(true, Ordering::SeqCst);
        let app = test_app_with(mailer);
        let saved = save_config(&app.state, &app.patient, input(180.0, 70.0, &[]))
            .await
            .unwrap();

        let err = test_email(&app.state, &app.patient).await.unwrap_err();
        assert_eq!(err.status_code(), 500);
        assert!(matches!(
            err,
            ApiError::Notification(NotificationError::Connection(_))
        ));
        assert!(app.mailer.sent().is_empty());

        // Nothing stored changes on a failed test email
        assert_eq!(get_config(&app.state, &app.patient).await.unwrap(), saved);
        let history = alert_history(&app.state, &app.patient, HistoryQuery::default())
            .await
            .unwrap();
        assert!(history.alerts.is_empty());
        assert_eq!(history.pagination.total, 0);
    }

    #[tokio::test]
    async fn test_test_email_send_failure_surfaced() {
        let app = test_app_with(RecordingMailer::failing_send());
        let saved = save_config(&app.state, &app.patient, input(180.0, 70.0, &[]))
            .await
            .unwrap();

        let err = test_email(&app.state, &app.patient).await.unwrap_err();
        assert!(matches!(err, ApiError::Notification(NotificationError::Send(_))));
        assert_eq!(get_config(&app.state, &app.patient).await.unwrap(), saved);
        let history = alert_history(&app.state, &app.patient, HistoryQuery::default())
            .await
            .unwrap();
        assert_eq!(history.pagination.total, 0);
        assert!(!audit_actions(&app, "patient").contains(&"TEST_EMAIL alert_config".to_string()));
    }
}
