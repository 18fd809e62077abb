//! Audit trail of state-changing actions

use crate::scheduler::Clock;
use crate::storage::Database;
use model::AuditLogEntry;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

/// Action verbs written to the audit log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Toggle,
    Acknowledge,
    Read,
    View,
    Alert,
    EmailSent,
    EmailFailed,
    TestEmail,
    TriggerWeeklyReport,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::Create => "CREATE",
            AuditAction::Update => "UPDATE",
            AuditAction::Delete => "DELETE",
            AuditAction::Toggle => "TOGGLE",
            AuditAction::Acknowledge => "ACKNOWLEDGE",
            AuditAction::Read => "READ",
            AuditAction::View => "VIEW",
            AuditAction::Alert => "ALERT",
            AuditAction::EmailSent => "EMAIL_SENT",
            AuditAction::EmailFailed => "EMAIL_FAILED",
            AuditAction::TestEmail => "TEST_EMAIL",
            AuditAction::TriggerWeeklyReport => "TRIGGER_WEEKLY_REPORT",
        }
    }
}

pub struct AuditLog {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
}

impl AuditLog {
    pub fn new(db: Arc<Database>, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Append an entry. A failed write is logged and otherwise ignored so
    /// the action being audited is never undone by it.
    pub fn record(
        &self,
        user_id: &str,
        action: AuditAction,
        resource: &str,
        resource_id: Option<&str>,
        details: Option<Value>,
    ) {
        let entry = AuditLogEntry {
            id: model::new_id(),
            user_id: user_id.to_string(),
            action: action.as_str().to_string(),
            resource: resource.to_string(),
            resource_id: resource_id.map(str::to_string),
            details,
            created_at: self.clock.now_utc(),
        };

        if let Err(e) = self.db.store_audit_entry(&entry) {
            warn!(
                "Failed to write audit entry {} {} for user {}: {:#}",
                entry.action, entry.resource, user_id, e
            );
        }
    }
}
