//! SQLite database storage

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use model::{
    AlertConfig, AlertHistory, AlertKind, AuditLogEntry, NotificationDestination, Reading,
    ReadingContext, User,
};
use rusqlite::{params, types::Type, Connection, OptionalExtension, Row};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

pub struct Database {
    conn: Mutex<Connection>,
}

/// Alert joined with the reading that fired it
#[derive(Debug, Clone, PartialEq)]
pub struct AlertWithReading {
    pub alert: AlertHistory,
    pub glucose_level: f64,
    pub context: ReadingContext,
    pub reading_timestamp: DateTime<Utc>,
}

/// Alert history query filters
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryFilter {
    pub kind: Option<AlertKind>,
    pub acknowledged: Option<bool>,
    pub limit: u32,
    pub offset: u32,
}

impl Database {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)
            .context("Failed to open database")?;

        // WAL keeps readers unblocked while the report job scans
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("Failed to enable WAL mode")?;

        conn.pragma_update(None, "busy_timeout", "5000")
            .context("Failed to set busy timeout")?;

        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        // Alert rows cascade with their reading
        conn.pragma_update(None, "foreign_keys", "ON")
            .context("Failed to enable foreign keys")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection lock poisoned"))
    }

    pub fn initialize(&self) -> Result<()> {
        info!("Initializing database schema");

        self.conn()?.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                first_name TEXT NOT NULL,
                last_name TEXT NOT NULL,
                role TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS readings (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                glucose_level REAL NOT NULL,
                timestamp INTEGER NOT NULL,
                context TEXT NOT NULL,
                notes TEXT,
                medication_taken INTEGER NOT NULL DEFAULT 0,
                carbs_consumed INTEGER NOT NULL DEFAULT 0,
                exercise_duration INTEGER NOT NULL DEFAULT 0,
                stress_level INTEGER,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_readings_user_timestamp
                ON readings(user_id, timestamp);

            CREATE TABLE IF NOT EXISTS alert_configs (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL UNIQUE REFERENCES users(id) ON DELETE CASCADE,
                high_threshold REAL NOT NULL,
                low_threshold REAL NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                destinations TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                CHECK (high_threshold > low_threshold)
            );

            CREATE TABLE IF NOT EXISTS alert_history (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                reading_id TEXT NOT NULL REFERENCES readings(id) ON DELETE CASCADE,
                kind TEXT NOT NULL,
                message TEXT NOT NULL,
                acknowledged INTEGER NOT NULL DEFAULT 0,
                acknowledged_at INTEGER,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_alert_history_user_created
                ON alert_history(user_id, created_at);

            CREATE INDEX IF NOT EXISTS idx_alert_history_reading
                ON alert_history(reading_id);

            CREATE TABLE IF NOT EXISTS patient_providers (
                patient_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                provider_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                active INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (patient_id, provider_id)
            );

            CREATE TABLE IF NOT EXISTS audit_logs (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                action TEXT NOT NULL,
                resource TEXT NOT NULL,
                resource_id TEXT,
                details TEXT,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_audit_logs_user
                ON audit_logs(user_id, created_at);",
        )?;

        info!("Database schema initialized");

        Ok(())
    }

    pub fn store_user(&self, user: &User) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO users (id, email, first_name, last_name, role)
            VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                &user.id,
                &user.email,
                &user.first_name,
                &user.last_name,
                user.role.as_str(),
            ],
        )
        .context("Failed to insert user")?;

        Ok(())
    }

    pub fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        let user = self
            .conn()?
            .query_row(
                "SELECT id, email, first_name, last_name, role FROM users WHERE id = ?1",
                params![user_id],
                row_to_user,
            )
            .optional()?;

        Ok(user)
    }

    pub fn store_reading(&self, r: &Reading) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO readings (
                id, user_id, glucose_level, timestamp, context, notes,
                medication_taken, carbs_consumed, exercise_duration, stress_level, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                &r.id,
                &r.user_id,
                r.glucose_level,
                r.timestamp.timestamp_millis(),
                r.context.as_str(),
                &r.notes,
                r.medication_taken,
                r.carbs_consumed,
                r.exercise_duration,
                r.stress_level,
                r.created_at.timestamp_millis(),
            ],
        )
        .context("Failed to insert reading")?;

        Ok(())
    }

    pub fn get_reading(&self, reading_id: &str) -> Result<Option<Reading>> {
        let reading = self
            .conn()?
            .query_row(
                "SELECT * FROM readings WHERE id = ?1",
                params![reading_id],
                row_to_reading,
            )
            .optional()?;

        Ok(reading)
    }

    /// Delete a reading owned by `user_id` together with its alerts.
    /// Returns false when no such reading exists for that owner.
    pub fn delete_reading(&self, user_id: &str, reading_id: &str) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let owned: Option<String> = tx
            .query_row(
                "SELECT id FROM readings WHERE id = ?1 AND user_id = ?2",
                params![reading_id, user_id],
                |row| row.get(0),
            )
            .optional()?;

        if owned.is_none() {
            return Ok(false);
        }

        let alerts_deleted = tx.execute(
            "DELETE FROM alert_history WHERE reading_id = ?1",
            params![reading_id],
        )?;
        tx.execute("DELETE FROM readings WHERE id = ?1", params![reading_id])?;
        tx.commit()?;

        debug!("Deleted reading {} and {} alert(s)", reading_id, alerts_deleted);
        Ok(true)
    }

    pub fn readings_in_range(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Reading>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM readings
            WHERE user_id = ?1 AND timestamp >= ?2 AND timestamp <= ?3
            ORDER BY timestamp ASC",
        )?;

        let readings = stmt
            .query_map(
                params![user_id, start.timestamp_millis(), end.timestamp_millis()],
                row_to_reading,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(readings)
    }

    /// Record that `provider_id` cares for `patient_id`, reactivating a
    /// previously ended relationship
    pub fn link_provider(
        &self,
        patient_id: &str,
        provider_id: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO patient_providers (patient_id, provider_id, active, created_at)
            VALUES (?1, ?2, 1, ?3)
            ON CONFLICT(patient_id, provider_id) DO UPDATE SET active = 1",
            params![patient_id, provider_id, now.timestamp_millis()],
        )
        .context("Failed to link provider")?;

        Ok(())
    }

    /// End a relationship; returns false when none was active
    pub fn unlink_provider(&self, patient_id: &str, provider_id: &str) -> Result<bool> {
        let updated = self.conn()?.execute(
            "UPDATE patient_providers SET active = 0
            WHERE patient_id = ?1 AND provider_id = ?2 AND active = 1",
            params![patient_id, provider_id],
        )?;

        Ok(updated > 0)
    }

    pub fn has_active_provider_link(&self, patient_id: &str, provider_id: &str) -> Result<bool> {
        let linked = self
            .conn()?
            .query_row(
                "SELECT 1 FROM patient_providers
                WHERE patient_id = ?1 AND provider_id = ?2 AND active = 1",
                params![patient_id, provider_id],
                |_| Ok(()),
            )
            .optional()?;

        Ok(linked.is_some())
    }

    /// Create or update the single alert configuration of a user.
    /// Returns the stored row and whether it was newly created.
    pub fn upsert_alert_config(
        &self,
        user_id: &str,
        high_threshold: f64,
        low_threshold: f64,
        destinations: &[NotificationDestination],
        now: DateTime<Utc>,
    ) -> Result<(AlertConfig, bool)> {
        let candidate_id = model::new_id();
        let destinations_json = serde_json::to_string(destinations)?;

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO alert_configs (
                id, user_id, high_threshold, low_threshold, enabled, destinations,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6, ?6)
            ON CONFLICT(user_id) DO UPDATE SET
                high_threshold = excluded.high_threshold,
                low_threshold = excluded.low_threshold,
                destinations = excluded.destinations,
                updated_at = excluded.updated_at",
            params![
                &candidate_id,
                user_id,
                high_threshold,
                low_threshold,
                &destinations_json,
                now.timestamp_millis(),
            ],
        )
        .context("Failed to save alert configuration")?;

        let stored = conn.query_row(
            "SELECT * FROM alert_configs WHERE user_id = ?1",
            params![user_id],
            row_to_alert_config,
        )?;
        let created = stored.id == candidate_id;

        Ok((stored, created))
    }

    pub fn get_alert_config(&self, user_id: &str) -> Result<Option<AlertConfig>> {
        let config = self
            .conn()?
            .query_row(
                "SELECT * FROM alert_configs WHERE user_id = ?1",
                params![user_id],
                row_to_alert_config,
            )
            .optional()?;

        Ok(config)
    }

    pub fn get_enabled_alert_config(&self, user_id: &str) -> Result<Option<AlertConfig>> {
        let config = self
            .conn()?
            .query_row(
                "SELECT * FROM alert_configs WHERE user_id = ?1 AND enabled = 1",
                params![user_id],
                row_to_alert_config,
            )
            .optional()?;

        Ok(config)
    }

    /// Flip the enabled flag; returns the new value, or None without a config
    pub fn toggle_alert_config(&self, user_id: &str, now: DateTime<Utc>) -> Result<Option<bool>> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE alert_configs SET enabled = NOT enabled, updated_at = ?2 WHERE user_id = ?1",
            params![user_id, now.timestamp_millis()],
        )?;

        if updated == 0 {
            return Ok(None);
        }

        let enabled: bool = conn.query_row(
            "SELECT enabled FROM alert_configs WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;

        Ok(Some(enabled))
    }

    pub fn store_alert(&self, a: &AlertHistory) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO alert_history (
                id, user_id, reading_id, kind, message, acknowledged, acknowledged_at, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                &a.id,
                &a.user_id,
                &a.reading_id,
                a.kind.as_str(),
                &a.message,
                a.acknowledged,
                a.acknowledged_at.map(|t| t.timestamp_millis()),
                a.created_at.timestamp_millis(),
            ],
        )
        .context("Failed to insert alert history")?;

        Ok(())
    }

    /// Mark an unacknowledged alert of `user_id` as acknowledged.
    /// Returns false for an unknown id, a foreign alert, or a repeat call.
    pub fn acknowledge_alert(
        &self,
        alert_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let updated = self.conn()?.execute(
            "UPDATE alert_history SET acknowledged = 1, acknowledged_at = ?3
            WHERE id = ?1 AND user_id = ?2 AND acknowledged = 0",
            params![alert_id, user_id, now.timestamp_millis()],
        )?;

        Ok(updated > 0)
    }

    /// Page of a user's alerts, newest first, with the total matching count
    pub fn query_alert_history(
        &self,
        user_id: &str,
        filter: &HistoryFilter,
    ) -> Result<(Vec<AlertWithReading>, u64)> {
        let conn = self.conn()?;
        let kind = filter.kind.map(AlertKind::as_str);

        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM alert_history a
            WHERE a.user_id = ?1
              AND (?2 IS NULL OR a.kind = ?2)
              AND (?3 IS NULL OR a.acknowledged = ?3)",
            params![user_id, kind, filter.acknowledged],
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(
            "SELECT a.*, r.glucose_level, r.context, r.timestamp AS reading_timestamp
            FROM alert_history a
            JOIN readings r ON r.id = a.reading_id
            WHERE a.user_id = ?1
              AND (?2 IS NULL OR a.kind = ?2)
              AND (?3 IS NULL OR a.acknowledged = ?3)
            ORDER BY a.created_at DESC
            LIMIT ?4 OFFSET ?5",
        )?;

        let alerts = stmt
            .query_map(
                params![user_id, kind, filter.acknowledged, filter.limit, filter.offset],
                row_to_alert_with_reading,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((alerts, total.max(0) as u64))
    }

    /// Users with an enabled config and an unacknowledged alert created since `since`
    /// Newest alerts of a user, acknowledged or not
    pub fn recent_alerts(&self, user_id: &str, limit: u32) -> Result<Vec<AlertHistory>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM alert_history WHERE user_id = ?1
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?2",
        )?;

        let alerts = stmt
            .query_map(params![user_id, limit], row_to_alert)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(alerts)
    }

    pub fn users_with_unacknowledged_alerts(&self, since: DateTime<Utc>) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT a.user_id
            FROM alert_history a
            JOIN alert_configs c ON c.user_id = a.user_id AND c.enabled = 1
            WHERE a.acknowledged = 0 AND a.created_at >= ?1
            ORDER BY a.user_id",
        )?;

        let users = stmt
            .query_map(params![since.timestamp_millis()], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;

        Ok(users)
    }

    pub fn unacknowledged_alerts_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<AlertWithReading>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT a.*, r.glucose_level, r.context, r.timestamp AS reading_timestamp
            FROM alert_history a
            JOIN readings r ON r.id = a.reading_id
            WHERE a.user_id = ?1 AND a.acknowledged = 0 AND a.created_at >= ?2
            ORDER BY a.created_at DESC",
        )?;

        let alerts = stmt
            .query_map(
                params![user_id, since.timestamp_millis()],
                row_to_alert_with_reading,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(alerts)
    }

    pub fn alerts_in_range(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AlertHistory>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM alert_history
            WHERE user_id = ?1 AND created_at >= ?2 AND created_at <= ?3
            ORDER BY created_at ASC",
        )?;

        let alerts = stmt
            .query_map(
                params![user_id, start.timestamp_millis(), end.timestamp_millis()],
                row_to_alert,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(alerts)
    }

    pub fn store_audit_entry(&self, e: &AuditLogEntry) -> Result<()> {
        let details = e.details.as_ref().map(serde_json::to_string).transpose()?;

        self.conn()?.execute(
            "INSERT INTO audit_logs (
                id, user_id, action, resource, resource_id, details, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                &e.id,
                &e.user_id,
                &e.action,
                &e.resource,
                &e.resource_id,
                details,
                e.created_at.timestamp_millis(),
            ],
        )?;

        Ok(())
    }
}

#[cfg(test)]
impl Database {
    pub fn get_alert(&self, alert_id: &str) -> Result<Option<AlertHistory>> {
        let alert = self
            .conn()?
            .query_row(
                "SELECT * FROM alert_history WHERE id = ?1",
                params![alert_id],
                row_to_alert,
            )
            .optional()?;

        Ok(alert)
    }

    /// Audit entries for a user, oldest first
    pub fn query_audit_log(&self, user_id: &str) -> Result<Vec<AuditLogEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM audit_logs WHERE user_id = ?1 ORDER BY created_at ASC, rowid ASC",
        )?;

        let entries = stmt
            .query_map(params![user_id], row_to_audit_entry)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(entries)
    }
}

fn millis_column(row: &Row, column: &str) -> rusqlite::Result<DateTime<Utc>> {
    let millis: i64 = row.get(column)?;
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        let idx = row.as_ref().column_index(column).unwrap_or_default();
        rusqlite::Error::IntegralValueOutOfRange(idx, millis)
    })
}

fn parsed_column<T>(row: &Row, column: &str) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.get(column)?;
    text.parse::<T>().map_err(|e| {
        let idx = row.as_ref().column_index(column).unwrap_or_default();
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
    })
}

fn row_to_user(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get("id")?,
        email: row.get("email")?,
        first_name: row.get("first_name")?,
        last_name: row.get("last_name")?,
        role: parsed_column(row, "role")?,
    })
}

fn row_to_reading(row: &Row) -> rusqlite::Result<Reading> {
    Ok(Reading {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        glucose_level: row.get("glucose_level")?,
        timestamp: millis_column(row, "timestamp")?,
        context: parsed_column(row, "context")?,
        notes: row.get("notes")?,
        medication_taken: row.get("medication_taken")?,
        carbs_consumed: row.get("carbs_consumed")?,
        exercise_duration: row.get("exercise_duration")?,
        stress_level: row.get("stress_level")?,
        created_at: millis_column(row, "created_at")?,
    })
}

fn row_to_alert_config(row: &Row) -> rusqlite::Result<AlertConfig> {
    let destinations: String = row.get("destinations")?;
    let destinations = serde_json::from_str(&destinations).map_err(|e| {
        let idx = row.as_ref().column_index("destinations").unwrap_or_default();
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
    })?;

    Ok(AlertConfig {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        high_threshold: row.get("high_threshold")?,
        low_threshold: row.get("low_threshold")?,
        enabled: row.get("enabled")?,
        destinations,
        created_at: millis_column(row, "created_at")?,
        updated_at: millis_column(row, "updated_at")?,
    })
}

fn row_to_alert(row: &Row) -> rusqlite::Result<AlertHistory> {
    let acknowledged_at: Option<i64> = row.get("acknowledged_at")?;

    Ok(AlertHistory {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        reading_id: row.get("reading_id")?,
        kind: parsed_column(row, "kind")?,
        message: row.get("message")?,
        acknowledged: row.get("acknowledged")?,
        acknowledged_at: match acknowledged_at {
            Some(_) => Some(millis_column(row, "acknowledged_at")?),
            None => None,
        },
        created_at: millis_column(row, "created_at")?,
    })
}

fn row_to_alert_with_reading(row: &Row) -> rusqlite::Result<AlertWithReading> {
    Ok(AlertWithReading {
        alert: row_to_alert(row)?,
        glucose_level: row.get("glucose_level")?,
        context: parsed_column(row, "context")?,
        reading_timestamp: millis_column(row, "reading_timestamp")?,
    })
}

#[cfg(test)]
fn row_to_audit_entry(row: &Row) -> rusqlite::Result<AuditLogEntry> {
    let details: Option<String> = row.get("details")?;
    let details = details
        .map(|d| serde_json::from_str(&d))
        .transpose()
        .map_err(|e| {
            let idx = row.as_ref().column_index("details").unwrap_or_default();
            rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
        })?;

    Ok(AuditLogEntry {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        action: row.get("action")?,
        resource: row.get("resource")?,
        resource_id: row.get("resource_id")?,
        details,
        created_at: millis_column(row, "created_at")?,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Duration;
    use model::{NewReading, Role};

    pub(crate) fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    pub(crate) fn seed_user(db: &Database, id: &str, role: Role) -> User {
        let user = User {
            id: id.to_string(),
            email: format!("{}@example.com", id),
            first_name: "Pat".to_string(),
            last_name: id.to_string(),
            role,
        };
        db.store_user(&user).unwrap();
        user
    }

    pub(crate) fn seed_reading(db: &Database, user_id: &str, level: f64, at: DateTime<Utc>) -> Reading {
        let input = NewReading::new(level, at, ReadingContext::PostMeal);
        let reading = Reading {
            id: model::new_id(),
            user_id: user_id.to_string(),
            glucose_level: input.glucose_level,
            timestamp: input.timestamp,
            context: input.context,
            notes: None,
            medication_taken: false,
            carbs_consumed: 0,
            exercise_duration: 0,
            stress_level: None,
            created_at: at,
        };
        db.store_reading(&reading).unwrap();
        reading
    }

    pub(crate) fn seed_alert(
        db: &Database,
        reading: &Reading,
        kind: AlertKind,
        created_at: DateTime<Utc>,
        acknowledged: bool,
    ) -> AlertHistory {
        let alert = AlertHistory {
            id: model::new_id(),
            user_id: reading.user_id.clone(),
            reading_id: reading.id.clone(),
            kind,
            message: kind.message(reading.glucose_level),
            acknowledged,
            acknowledged_at: acknowledged.then_some(created_at),
            created_at,
        };
        db.store_alert(&alert).unwrap();
        alert
    }

    fn email(address: &str) -> NotificationDestination {
        NotificationDestination::Email(address.to_string())
    }

    #[test]
    fn test_reading_round_trip_keeps_metadata() {
        let db = test_db();
        seed_user(&db, "u1", Role::Patient);
        let now = Utc::now();
        let mut reading = seed_reading(&db, "u1", 142.5, now);
        reading.notes = Some("after run".to_string());
        reading.id = model::new_id();
        reading.stress_level = Some(4);
        reading.carbs_consumed = 45;
        db.store_reading(&reading).unwrap();

        let loaded = db.get_reading(&reading.id).unwrap().unwrap();
        assert_eq!(loaded.notes.as_deref(), Some("after run"));
        assert_eq!(loaded.stress_level, Some(4));
        assert_eq!(loaded.carbs_consumed, 45);
        assert_eq!(loaded.timestamp.timestamp_millis(), now.timestamp_millis());
    }

    #[test]
    fn test_upsert_keeps_one_config_per_user() {
        let db = test_db();
        seed_user(&db, "u1", Role::Patient);
        let now = Utc::now();

        let (first, created) = db
            .upsert_alert_config("u1", 180.0, 70.0, &[email("a@x.com")], now)
            .unwrap();
        assert!(created);
        assert!(first.enabled);

        let later = now + Duration::minutes(5);
        let (second, created) = db
            .upsert_alert_config("u1", 200.0, 60.0, &[email("b@x.com")], later)
            .unwrap();
        assert!(!created);
        assert_eq!(second.id, first.id);
        assert_eq!(second.high_threshold, 200.0);
        assert_eq!(second.destinations, vec![email("b@x.com")]);
        assert_eq!(second.created_at.timestamp_millis(), now.timestamp_millis());
        assert_eq!(second.updated_at.timestamp_millis(), later.timestamp_millis());

        let count: i64 = db
            .conn()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM alert_configs", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_toggle_and_enabled_lookup() {
        let db = test_db();
        seed_user(&db, "u1", Role::Patient);
        assert_eq!(db.toggle_alert_config("u1", Utc::now()).unwrap(), None);

        db.upsert_alert_config("u1", 180.0, 70.0, &[], Utc::now()).unwrap();
        assert_eq!(db.toggle_alert_config("u1", Utc::now()).unwrap(), Some(false));
        assert!(db.get_enabled_alert_config("u1").unwrap().is_none());
        assert!(db.get_alert_config("u1").unwrap().is_some());

        assert_eq!(db.toggle_alert_config("u1", Utc::now()).unwrap(), Some(true));
        assert!(db.get_enabled_alert_config("u1").unwrap().is_some());
    }

    #[test]
    fn test_acknowledge_only_once() {
        let db = test_db();
        seed_user(&db, "u1", Role::Patient);
        seed_user(&db, "u2", Role::Patient);
        let now = Utc::now();
        let reading = seed_reading(&db, "u1", 210.0, now);
        let alert = seed_alert(&db, &reading, AlertKind::High, now, false);

        // Another user cannot acknowledge it
        assert!(!db.acknowledge_alert(&alert.id, "u2", now).unwrap());

        let first_ack = now + Duration::seconds(30);
        assert!(db.acknowledge_alert(&alert.id, "u1", first_ack).unwrap());
        assert!(!db
            .acknowledge_alert(&alert.id, "u1", first_ack + Duration::hours(1))
            .unwrap());

        let stored = db.get_alert(&alert.id).unwrap().unwrap();
        assert!(stored.acknowledged);
        assert_eq!(
            stored.acknowledged_at.map(|t| t.timestamp_millis()),
            Some(first_ack.timestamp_millis())
        );
    }

    #[test]
    fn test_delete_reading_removes_alerts() {
        let db = test_db();
        seed_user(&db, "u1", Role::Patient);
        seed_user(&db, "u2", Role::Patient);
        let now = Utc::now();
        let reading = seed_reading(&db, "u1", 50.0, now);
        let alert = seed_alert(&db, &reading, AlertKind::Low, now, false);

        assert!(!db.delete_reading("u2", &reading.id).unwrap());
        assert!(db.get_alert(&alert.id).unwrap().is_some());

        assert!(db.delete_reading("u1", &reading.id).unwrap());
        assert!(db.get_reading(&reading.id).unwrap().is_none());
        assert!(db.get_alert(&alert.id).unwrap().is_none());
        assert!(!db.delete_reading("u1", &reading.id).unwrap());
    }

    #[test]
    fn test_history_filters_and_paging() {
        let db = test_db();
        seed_user(&db, "u1", Role::Patient);
        let now = Utc::now();
        for i in 0..3 {
            let at = now - Duration::hours(i);
            let reading = seed_reading(&db, "u1", 250.0, at);
            seed_alert(&db, &reading, AlertKind::High, at, i == 0);
        }
        let reading = seed_reading(&db, "u1", 60.0, now - Duration::hours(5));
        seed_alert(&db, &reading, AlertKind::Low, now - Duration::hours(5), false);

        let all = HistoryFilter {
            kind: None,
            acknowledged: None,
            limit: 2,
            offset: 0,
        };
        let (page, total) = db.query_alert_history("u1", &all).unwrap();
        assert_eq!(total, 4);
        assert_eq!(page.len(), 2);
        assert!(page[0].alert.created_at >= page[1].alert.created_at);

        let open_high = HistoryFilter {
            kind: Some(AlertKind::High),
            acknowledged: Some(false),
            limit: 50,
            offset: 0,
        };
        let (page, total) = db.query_alert_history("u1", &open_high).unwrap();
        assert_eq!(total, 2);
        assert!(page.iter().all(|a| a.alert.kind == AlertKind::High && !a.alert.acknowledged));
        assert_eq!(page[0].glucose_level, 250.0);
        assert_eq!(page[0].context, ReadingContext::PostMeal);
    }

    #[test]
    fn test_unacknowledged_user_selection() {
        let db = test_db();
        let now = Utc::now();
        let since = now - Duration::days(7);
        for id in ["recent", "acked", "old", "disabled", "no_config"] {
            seed_user(&db, id, Role::Patient);
            if id != "no_config" {
                db.upsert_alert_config(id, 180.0, 70.0, &[], now).unwrap();
            }
        }
        db.toggle_alert_config("disabled", now).unwrap();

        let r = seed_reading(&db, "recent", 200.0, now - Duration::days(1));
        seed_alert(&db, &r, AlertKind::High, now - Duration::days(1), false);
        let r = seed_reading(&db, "acked", 200.0, now - Duration::days(1));
        seed_alert(&db, &r, AlertKind::High, now - Duration::days(1), true);
        let r = seed_reading(&db, "old", 200.0, now - Duration::days(9));
        seed_alert(&db, &r, AlertKind::High, now - Duration::days(9), false);
        let r = seed_reading(&db, "disabled", 200.0, now - Duration::days(1));
        seed_alert(&db, &r, AlertKind::High, now - Duration::days(1), false);
        let r = seed_reading(&db, "no_config", 200.0, now - Duration::days(1));
        seed_alert(&db, &r, AlertKind::High, now - Duration::days(1), false);

        assert_eq!(db.users_with_unacknowledged_alerts(since).unwrap(), vec!["recent"]);

        let open = db.unacknowledged_alerts_since("recent", since).unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].glucose_level, 200.0);
    }

    #[test]
    fn test_audit_entries_round_trip() {
        let db = test_db();
        let entry = AuditLogEntry {
            id: model::new_id(),
            user_id: "u1".to_string(),
            action: "EMAIL_FAILED".to_string(),
            resource: "alert".to_string(),
            resource_id: Some("r1".to_string()),
            details: Some(serde_json::json!({ "type": "HIGH_GLUCOSE", "error": "timeout" })),
            created_at: Utc::now(),
        };
        db.store_audit_entry(&entry).unwrap();

        let entries = db.query_audit_log("u1").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].details, entry.details);
        assert_eq!(entries[0].resource_id.as_deref(), Some("r1"));
    }

    #[test]
    fn test_provider_links() {
        let db = test_db();
        seed_user(&db, "p1", Role::Patient);
        seed_user(&db, "doc", Role::Provider);
        let now = Utc::now();

        assert!(!db.has_active_provider_link("p1", "doc").unwrap());
        db.link_provider("p1", "doc", now).unwrap();
        assert!(db.has_active_provider_link("p1", "doc").unwrap());
        assert!(!db.has_active_provider_link("doc", "p1").unwrap());

        assert!(db.unlink_provider("p1", "doc").unwrap());
        assert!(!db.unlink_provider("p1", "doc").unwrap());
        assert!(!db.has_active_provider_link("p1", "doc").unwrap());

        db.link_provider("p1", "doc", now).unwrap();
        assert!(db.has_active_provider_link("p1", "doc").unwrap());
    }

    #[test]
    fn test_recent_alerts_newest_first() {
        let db = test_db();
        seed_user(&db, "u1", Role::Patient);
        let now = Utc::now();

        for i in 0..7 {
            let at = now - Duration::hours(i);
            let reading = seed_reading(&db, "u1", 250.0, at);
            seed_alert(&db, &reading, AlertKind::High, at, i % 2 == 0);
        }

        let alerts = db.recent_alerts("u1", 5).unwrap();
        assert_eq!(alerts.len(), 5);
        assert!(alerts.windows(2).all(|w| w[0].created_at >= w[1].created_at));
        assert_eq!(alerts[0].created_at.timestamp_millis(), now.timestamp_millis());
        assert!(db.recent_alerts("nobody", 5).unwrap().is_empty());
    }
}
