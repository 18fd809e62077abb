//! Manual weekly report trigger

use super::{ApiError, AppState, Caller};
use crate::audit::AuditAction;
use crate::reports::RunSummary;
use crate::scheduler::WEEKLY_REPORT_JOB;
use model::Role;
use tracing::warn;

/// Run the weekly report job now. Admins only.
pub async fn trigger_weekly_report(
    state: &AppState,
    caller: &Caller,
) -> Result<RunSummary, ApiError> {
    if caller.role != Role::Admin {
        warn!("User {} attempted to trigger weekly reports", caller.user_id);
        return Err(ApiError::Forbidden("Insufficient permissions".to_string()));
    }

    let summary = state.scheduler.trigger(WEEKLY_REPORT_JOB).await?;

    state.audit.record(
        &caller.user_id,
        AuditAction::TriggerWeeklyReport,
        "system",
        None,
        None,
    );

    Ok(summary)
}
