//! Reading ingestion, removal and analytics

use super::{ApiError, AppState, Caller};
use crate::analytics::{self, ReadingStats, StatsPeriod, TrendBucket, TrendGrouping};
use crate::audit::AuditAction;
use chrono::{DateTime, Duration, Utc};
use model::constants::{TRENDS_DEFAULT_DAYS, TRENDS_MAX_DAYS};
use model::{AlertKind, NewReading, Reading};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadingCreated {
    pub id: String,
    pub message: String,
    /// Alert fired by this reading, if any
    pub alert: Option<AlertKind>,
}

/// Validate and store a reading, then run alert evaluation on it.
///
/// Notification problems never fail the request; only validation and the
/// reading write itself do.
pub async fn create_reading(
    state: &AppState,
    caller: &Caller,
    input: NewReading,
) -> Result<ReadingCreated, ApiError> {
    let input = input.validate()?;

    let reading = Reading {
        id: model::new_id(),
        user_id: caller.user_id.clone(),
        glucose_level: input.glucose_level,
        timestamp: input.timestamp,
        context: input.context,
        notes: input.notes,
        medication_taken: input.medication_taken,
        carbs_consumed: input.carbs_consumed,
        exercise_duration: input.exercise_duration,
        stress_level: input.stress_level,
        created_at: state.clock.now_utc(),
    };
    state.db.store_reading(&reading)?;

    let alert = state
        .pipeline
        .check_reading(&caller.user_id, reading.glucose_level, &reading.id)
        .await;

    state
        .audit
        .record(&caller.user_id, AuditAction::Create, "reading", Some(&reading.id), None);

    Ok(ReadingCreated {
        id: reading.id,
        message: "Reading recorded successfully".to_string(),
        alert: alert.map(|a| a.kind),
    })
}

/// Delete one of the caller's readings along with its alerts
pub async fn delete_reading(
    state: &AppState,
    caller: &Caller,
    reading_id: &str,
) -> Result<(), ApiError> {
    if !state.db.delete_reading(&caller.user_id, reading_id)? {
        return Err(ApiError::NotFound(
            "Reading not found or you don't have permission to delete it".to_string(),
        ));
    }

    info!("User {} deleted reading {}", caller.user_id, reading_id);
    state
        .audit
        .record(&caller.user_id, AuditAction::Delete, "reading", Some(reading_id), None);

    Ok(())
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatsQuery {
    pub period: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub stats: ReadingStats,
    pub period: StatsPeriod,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrendsQuery {
    pub days: Option<u32>,
    #[serde(rename = "groupBy")]
    pub group_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendsResponse {
    pub trends: Vec<TrendBucket>,
    #[serde(rename = "groupBy")]
    pub group_by: TrendGrouping,
    pub days: u32,
}

/// Readings of `user_id` taken at or after `since`, including any dated in the future
pub(crate) fn readings_since(
    state: &AppState,
    user_id: &str,
    since: DateTime<Utc>,
) -> Result<Vec<Reading>, ApiError> {
    Ok(state
        .db
        .readings_in_range(user_id, since, DateTime::<Utc>::MAX_UTC)?)
}

/// Statistics over the caller's readings in the requested period (default month)
pub async fn reading_stats(
    state: &AppState,
    caller: &Caller,
    query: StatsQuery,
) -> Result<StatsResponse, ApiError> {
    let period = match query.period.as_deref() {
        Some(raw) => raw.parse::<StatsPeriod>().map_err(|_| {
            ApiError::BadRequest("Period must be one of: week, month, quarter, year".to_string())
        })?,
        None => StatsPeriod::Month,
    };

    let since = state.clock.now_utc() - period.lookback();
    let readings = readings_since(state, &caller.user_id, since)?;

    state
        .audit
        .record(&caller.user_id, AuditAction::Read, "stats", None, None);

    Ok(StatsResponse {
        stats: ReadingStats::compute(&readings),
        period,
    })
}

/// Per-bucket glucose summary of the caller's last `days` days (default 30, grouped by day)
pub async fn reading_trends(
    state: &AppState,
    caller: &Caller,
    query: TrendsQuery,
) -> Result<TrendsResponse, ApiError> {
    let days = query.days.unwrap_or(TRENDS_DEFAULT_DAYS);
    if !(1..=TRENDS_MAX_DAYS).contains(&days) {
        return Err(ApiError::BadRequest(format!(
            "Days must be an integer between 1 and {}",
            TRENDS_MAX_DAYS
        )));
    }
    let group_by = match query.group_by.as_deref() {
        Some(raw) => raw.parse::<TrendGrouping>().map_err(|_| {
            ApiError::BadRequest("Group by must be one of: hour, day, week".to_string())
        })?,
        None => TrendGrouping::Day,
    };

    let since = state.clock.now_utc() - Duration::days(i64::from(days));
    let readings = readings_since(state, &caller.user_id, since)?;

    state
        .audit
        .record(&caller.user_id, AuditAction::Read, "trends", None, None);

    Ok(TrendsResponse {
        trends: analytics::trends(&readings, group_by),
        group_by,
        days,
    })
}
