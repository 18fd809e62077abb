//! Audit log entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One append-only record of a state-changing or security-relevant action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: String,

    /// Acting user
    pub user_id: String,

    /// Action verb, e.g. "CREATE", "ACKNOWLEDGE", "EMAIL_FAILED"
    pub action: String,

    /// Resource kind, e.g. "reading", "alert", "alert_config"
    pub resource: String,

    pub resource_id: Option<String>,

    /// Structured detail blob
    pub details: Option<Value>,

    pub created_at: DateTime<Utc>,
}
