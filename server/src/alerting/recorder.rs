//! Alert history persistence

use crate::storage::Database;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use model::{AlertHistory, AlertKind};
use std::sync::Arc;
use tracing::debug;

pub struct AlertRecorder {
    db: Arc<Database>,
}

impl AlertRecorder {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Store a new, unacknowledged alert for a reading
    pub fn record(
        &self,
        user_id: &str,
        reading_id: &str,
        kind: AlertKind,
        glucose_level: f64,
        created_at: DateTime<Utc>,
    ) -> Result<AlertHistory> {
        let alert = AlertHistory {
            id: model::new_id(),
            user_id: user_id.to_string(),
            reading_id: reading_id.to_string(),
            kind,
            message: kind.message(glucose_level),
            acknowledged: false,
            acknowledged_at: None,
            created_at,
        };

        self.db
            .store_alert(&alert)
            .with_context(|| format!("Failed to record {} alert for reading {}", kind.as_str(), reading_id))?;

        debug!("Recorded {} alert {} for user {}", kind.as_str(), alert.id, user_id);
        Ok(alert)
    }
}
