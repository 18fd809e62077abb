//! Weekly digest of unacknowledged alerts
//!
//! Two windows are involved. Eligibility and the alert list use the rolling
//! seven days ending now. Summary statistics use whole calendar weeks, from
//! the Sunday starting the week seven days ago through the Saturday ending
//! the current week, in server-local time.

use crate::notifier::{DigestPayload, Notifier};
use crate::scheduler::{Clock, ScheduledTask};
use crate::storage::Database;
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use model::constants::REPORT_ROLLING_WINDOW_DAYS;
use model::{AlertHistory, AlertKind, Reading};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

/// Time ranges used by one report run
#[derive(Debug, Clone, PartialEq)]
pub struct ReportWindows<Tz: TimeZone> {
    pub rolling_start: DateTime<Tz>,
    pub rolling_end: DateTime<Tz>,
    pub week_start: DateTime<Tz>,
    pub week_end: DateTime<Tz>,
}

pub fn report_windows<Tz: TimeZone>(now: DateTime<Tz>) -> ReportWindows<Tz> {
    let tz = now.timezone();
    // Same wall-clock time seven calendar days back, not 168 hours
    let rolling_start = earliest_local(
        &tz,
        now.naive_local() - Duration::days(REPORT_ROLLING_WINDOW_DAYS),
    );

    let first_day = start_of_week(rolling_start.date_naive());
    let last_day = start_of_week(now.date_naive()) + Duration::days(6);

    let week_start = earliest_local(&tz, first_day.and_time(NaiveTime::MIN));
    let week_end = latest_local(
        &tz,
        (last_day + Duration::days(1)).and_time(NaiveTime::MIN) - Duration::milliseconds(1),
    );

    ReportWindows {
        rolling_start,
        rolling_end: now,
        week_start,
        week_end,
    }
}

/// Sunday on or before `date`
fn start_of_week(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_sunday() as i64)
}

// Local times that fall in a DST gap are read as UTC
fn earliest_local<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> DateTime<Tz> {
    tz.from_local_datetime(&naive)
        .earliest()
        .unwrap_or_else(|| tz.from_utc_datetime(&naive))
}

fn latest_local<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> DateTime<Tz> {
    tz.from_local_datetime(&naive)
        .latest()
        .unwrap_or_else(|| tz.from_utc_datetime(&naive))
}

/// Round to two decimals for display
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Statistics over the calendar-week window. Values are unrounded.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WeeklyStats {
    pub total_alerts: usize,
    pub high_alerts: usize,
    pub low_alerts: usize,
    /// Mean glucose in mg/dL; 0 without readings
    pub average_glucose: f64,
    pub total_readings: usize,
    /// Alerts per reading as a percentage; 0 without readings
    pub alert_rate: f64,
}

impl WeeklyStats {
    pub fn compute(readings: &[Reading], alerts: &[AlertHistory]) -> Self {
        let total_readings = readings.len();
        let total_alerts = alerts.len();

        let (average_glucose, alert_rate) = if total_readings == 0 {
            (0.0, 0.0)
        } else {
            let sum: f64 = readings.iter().map(|r| r.glucose_level).sum();
            (
                sum / total_readings as f64,
                total_alerts as f64 / total_readings as f64 * 100.0,
            )
        };

        Self {
            total_alerts,
            high_alerts: alerts.iter().filter(|a| a.kind == AlertKind::High).count(),
            low_alerts: alerts.iter().filter(|a| a.kind == AlertKind::Low).count(),
            average_glucose,
            total_readings,
            alert_rate,
        }
    }
}

/// Per-user outcomes of one report run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub eligible: usize,
    pub sent: usize,
    pub skipped: usize,
    /// (user id, reason)
    pub failures: Vec<(String, String)>,
}

enum UserOutcome {
    Sent,
    Skipped,
}

pub struct WeeklyReportAggregator {
    db: Arc<Database>,
    notifier: Arc<Notifier>,
    clock: Arc<dyn Clock>,
}

impl WeeklyReportAggregator {
    pub fn new(db: Arc<Database>, notifier: Arc<Notifier>, clock: Arc<dyn Clock>) -> Self {
        Self {
            db,
            notifier,
            clock,
        }
    }

    /// Send a digest to every eligible user. One user's failure never
    /// stops the others; it is collected in the summary instead.
    pub async fn generate_and_send(&self) -> Result<RunSummary> {
        info!("Starting weekly alert report generation");

        let now = self.clock.now();
        let windows = report_windows(now);

        let users = self
            .db
            .users_with_unacknowledged_alerts(windows.rolling_start.with_timezone(&Utc))?;
        info!("Found {} users with unacknowledged alerts", users.len());

        let mut summary = RunSummary {
            eligible: users.len(),
            ..Default::default()
        };

        for user_id in users {
            match self.report_user(&user_id, &windows).await {
                Ok(UserOutcome::Sent) => summary.sent += 1,
                Ok(UserOutcome::Skipped) => summary.skipped += 1,
                Err(e) => {
                    error!("Failed to generate report for user {}: {:#}", user_id, e);
                    summary.failures.push((user_id, format!("{:#}", e)));
                }
            }
        }

        info!("Weekly alert report generation completed");
        Ok(summary)
    }

    async fn report_user(
        &self,
        user_id: &str,
        windows: &ReportWindows<chrono::Local>,
    ) -> Result<UserOutcome> {
        let user = self
            .db
            .get_user(user_id)?
            .ok_or_else(|| anyhow!("user not found"))?;

        // Config or alerts may have changed since eligibility was computed
        let Some(config) = self.db.get_enabled_alert_config(user_id)? else {
            return Ok(UserOutcome::Skipped);
        };
        let alerts = self
            .db
            .unacknowledged_alerts_since(user_id, windows.rolling_start.with_timezone(&Utc))?;
        if alerts.is_empty() {
            return Ok(UserOutcome::Skipped);
        }

        if config.destinations.is_empty() {
            bail!("no notification destinations configured");
        }

        let week_start = windows.week_start.with_timezone(&Utc);
        let week_end = windows.week_end.with_timezone(&Utc);
        let readings = self.db.readings_in_range(user_id, week_start, week_end)?;
        let week_alerts = self.db.alerts_in_range(user_id, week_start, week_end)?;

        let digest = DigestPayload {
            patient_name: user.display_name(),
            week_start: windows.week_start,
            week_end: windows.week_end,
            stats: WeeklyStats::compute(&readings, &week_alerts),
            high_threshold: config.high_threshold,
            low_threshold: config.low_threshold,
            alerts,
            generated_at: windows.rolling_end,
        };

        self.notifier
            .send_weekly_digest(&config.destinations, &digest)
            .await?;

        info!("Weekly report sent to {}", user.email);
        Ok(UserOutcome::Sent)
    }
}

#[async_trait]
impl ScheduledTask for WeeklyReportAggregator {
    async fn run(&self) -> Result<RunSummary> {
        self.generate_and_send().await
    }
}
