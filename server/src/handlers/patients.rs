//! Provider access to patient data

use super::readings::readings_since;
use super::{ApiError, AppState, Caller};
use crate::analytics::ReadingStats;
use crate::audit::AuditAction;
use chrono::{DateTime, Duration, Utc};
use model::constants::{PATIENT_RECENT_ALERTS, PATIENT_SUMMARY_DAYS};
use model::{AlertKind, Role, User};
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatientProfile {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

impl From<User> for PatientProfile {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentAlert {
    pub alert_type: AlertKind,
    pub message: String,
    pub acknowledged: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatientSummary {
    pub patient: PatientProfile,
    /// Readings of the last 30 days
    pub stats: ReadingStats,
    pub recent_alerts: Vec<RecentAlert>,
}

/// Profile, 30-day statistics and latest alerts of a patient.
///
/// Open to providers and admins, and only for patients linked to the caller
/// through an active care relationship.
pub async fn patient_details(
    state: &AppState,
    caller: &Caller,
    patient_id: &str,
) -> Result<PatientSummary, ApiError> {
    if !matches!(caller.role, Role::Provider | Role::Admin) {
        return Err(ApiError::Forbidden("Insufficient permissions".to_string()));
    }

    if !state.db.has_active_provider_link(patient_id, &caller.user_id)? {
        warn!(
            "User {} requested patient {} without a care relationship",
            caller.user_id, patient_id
        );
        return Err(ApiError::Forbidden("Access denied to this patient".to_string()));
    }

    let patient = state
        .db
        .get_user(patient_id)?
        .filter(|user| user.role == Role::Patient)
        .ok_or_else(|| ApiError::NotFound("Patient not found".to_string()))?;

    let since = state.clock.now_utc() - Duration::days(PATIENT_SUMMARY_DAYS);
    let readings = readings_since(state, patient_id, since)?;

    let recent_alerts = state
        .db
        .recent_alerts(patient_id, PATIENT_RECENT_ALERTS)?
        .into_iter()
        .map(|alert| RecentAlert {
            alert_type: alert.kind,
            message: alert.message,
            acknowledged: alert.acknowledged,
            created_at: alert.created_at,
        })
        .collect();

    state.audit.record(
        &caller.user_id,
        AuditAction::View,
        "patient_details",
        Some(patient_id),
        None,
    );

    Ok(PatientSummary {
        patient: patient.into(),
        stats: ReadingStats::compute(&readings),
        recent_alerts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::{audit_actions, test_app};
    use crate::storage::tests::{seed_alert, seed_reading, seed_user};

    fn provider() -> Caller {
        Caller {
            user_id: "doc".to_string(),
            role: Role::Provider,
        }
    }

    #[tokio::test]
    async fn test_linked_provider_sees_summary() {
        let app = test_app();
        seed_user(&app.state.db, "doc", Role::Provider);
        let now = app.state.clock.now_utc();
        app.state.db.link_provider("patient", "doc", now).unwrap();

        seed_reading(&app.state.db, "patient", 150.0, now - Duration::days(40));
        for hours in 0..6 {
            let at = now - Duration::hours(hours + 1);
            let reading = seed_reading(&app.state.db, "patient", 250.0, at);
            seed_alert(&app.state.db, &reading, AlertKind::High, at, false);
        }

        let summary = patient_details(&app.state, &provider(), "patient")
            .await
            .unwrap();
        assert_eq!(summary.patient.id, "patient");
        assert_eq!(summary.patient.email, "patient@example.com");
        assert_eq!(summary.stats.total_readings, 6);
        assert_eq!(summary.stats.high_readings, 6);
        assert_eq!(summary.recent_alerts.len(), 5);
        assert_eq!(
            summary.recent_alerts[0].created_at.timestamp_millis(),
            (now - Duration::hours(1)).timestamp_millis()
        );
        assert_eq!(audit_actions(&app, "doc"), vec!["VIEW patient_details"]);
    }

    #[tokio::test]
    async fn test_unlinked_provider_denied() {
        let app = test_app();
        seed_user(&app.state.db, "doc", Role::Provider);

        let err = patient_details(&app.state, &provider(), "patient")
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 403);
        assert_eq!(err.to_string(), "Access denied to this patient");

        // An ended relationship no longer grants access
        let now = app.state.clock.now_utc();
        app.state.db.link_provider("patient", "doc", now).unwrap();
        app.state.db.unlink_provider("patient", "doc").unwrap();
        let err = patient_details(&app.state, &provider(), "patient")
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 403);
        assert!(audit_actions(&app, "doc").is_empty());
    }

    #[tokio::test]
    async fn test_patient_role_forbidden() {
        let app = test_app();
        let err = patient_details(&app.state, &app.patient, "patient")
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 403);
        assert_eq!(err.to_string(), "Insufficient permissions");
    }

    #[tokio::test]
    async fn test_linked_non_patient_not_found() {
        let app = test_app();
        seed_user(&app.state.db, "doc", Role::Provider);
        app.state
            .db
            .link_provider("admin", "doc", app.state.clock.now_utc())
            .unwrap();

        let err = patient_details(&app.state, &provider(), "admin")
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 404);
    }
}
