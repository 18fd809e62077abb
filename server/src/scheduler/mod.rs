//! Weekly job scheduler
//!
//! Each registered job runs on its own tokio task that sleeps until the
//! next scheduled instant, runs the job to completion, and repeats. A job
//! loop only observes cancellation while sleeping, so `stop_all` lets an
//! in-flight run finish and then waits for every loop to exit.

mod clock;

pub use clock::{Clock, SystemClock};

use crate::reports::RunSummary;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveTime, TimeZone, Weekday};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Name of the weekly report job
pub const WEEKLY_REPORT_JOB: &str = "weekly_reports";

#[async_trait]
pub trait ScheduledTask: Send + Sync {
    async fn run(&self) -> Result<RunSummary>;
}

/// A weekday and a server-local time of day
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeeklySchedule {
    pub weekday: Weekday,
    pub time: NaiveTime,
}

impl WeeklySchedule {
    pub fn new(weekday: Weekday, hour: u32, minute: u32) -> Option<Self> {
        let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
        Some(Self { weekday, time })
    }

    /// First scheduled instant strictly after `now`
    pub fn next_after<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> DateTime<Tz> {
        let tz = now.timezone();
        let today = now.date_naive();

        for offset in 0..=14 {
            let date = today + ChronoDuration::days(offset);
            if date.weekday() != self.weekday {
                continue;
            }
            // A local time skipped by a DST jump has no instant; try next week
            let Some(candidate) = tz.from_local_datetime(&date.and_time(self.time)).earliest()
            else {
                continue;
            };
            if candidate > *now {
                return candidate;
            }
        }

        now.clone() + ChronoDuration::weeks(1)
    }

    /// One-line description of the configured job, with its next run when enabled
    pub fn status_line<Tz>(&self, name: &str, enabled: bool, now: &DateTime<Tz>) -> String
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        let mut line = format!(
            "{}: {}, every {} at {}",
            name,
            if enabled { "enabled" } else { "disabled" },
            self.weekday,
            self.time.format("%H:%M")
        );
        if enabled {
            let next = self.next_after(now);
            line.push_str(&format!(", next run {}", next.format("%Y-%m-%d %H:%M %:z")));
        }
        line
    }
}

struct Job {
    schedule: WeeklySchedule,
    task: Arc<dyn ScheduledTask>,
    running: Option<RunningJob>,
}

struct RunningJob {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct Scheduler {
    clock: Arc<dyn Clock>,
    jobs: Mutex<BTreeMap<String, Job>>,
}

impl Scheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            jobs: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn register(&mut self, name: &str, schedule: WeeklySchedule, task: Arc<dyn ScheduledTask>) {
        info!(
            "Registered job {} for every {} at {}",
            name,
            schedule.weekday,
            schedule.time.format("%H:%M")
        );
        self.jobs.get_mut().insert(
            name.to_string(),
            Job {
                schedule,
                task,
                running: None,
            },
        );
    }

    /// Start every job that is not already running
    pub async fn start_all(&self) {
        let mut jobs = self.jobs.lock().await;
        for (name, job) in jobs.iter_mut() {
            if job.running.is_none() {
                job.running = Some(self.spawn(name, job));
            }
        }
    }

    /// Stop every job and wait for its loop to exit
    pub async fn stop_all(&self) {
        info!("Stopping all scheduled jobs");

        let stopped: Vec<(String, RunningJob)> = {
            let mut jobs = self.jobs.lock().await;
            jobs.iter_mut()
                .filter_map(|(name, job)| job.running.take().map(|r| (name.clone(), r)))
                .collect()
        };

        for (name, running) in stopped {
            running.cancel.cancel();
            if let Err(e) = running.handle.await {
                warn!("Job {} ended abnormally: {}", name, e);
            }
            info!("Stopped job: {}", name);
        }
    }

    /// Stop and start a single job; false when no job has that name
    pub async fn restart(&self, name: &str) -> bool {
        let previous = {
            let mut jobs = self.jobs.lock().await;
            match jobs.get_mut(name) {
                Some(job) => job.running.take(),
                None => {
                    error!("Job not found: {}", name);
                    return false;
                }
            }
        };

        if let Some(running) = previous {
            running.cancel.cancel();
            if let Err(e) = running.handle.await {
                warn!("Job {} ended abnormally: {}", name, e);
            }
        }

        let mut jobs = self.jobs.lock().await;
        match jobs.get_mut(name) {
            Some(job) => {
                job.running = Some(self.spawn(name, job));
                info!("Restarted job: {}", name);
                true
            }
            None => false,
        }
    }

    /// Whether each registered job is currently scheduled
    pub async fn status(&self) -> BTreeMap<String, bool> {
        let jobs = self.jobs.lock().await;
        jobs.iter()
            .map(|(name, job)| {
                let running = job
                    .running
                    .as_ref()
                    .is_some_and(|r| !r.handle.is_finished());
                (name.clone(), running)
            })
            .collect()
    }

    /// Run a job immediately, whether or not it is scheduled
    pub async fn trigger(&self, name: &str) -> Result<RunSummary> {
        let task = {
            let jobs = self.jobs.lock().await;
            jobs.get(name)
                .map(|job| job.task.clone())
                .ok_or_else(|| anyhow!("Job not found: {}", name))?
        };

        info!("Manually triggering job {}", name);
        execute(name, task.as_ref()).await
    }

    fn spawn(&self, name: &str, job: &Job) -> RunningJob {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(job_loop(
            name.to_string(),
            job.schedule,
            job.task.clone(),
            self.clock.clone(),
            cancel.clone(),
        ));
        RunningJob { cancel, handle }
    }
}

async fn job_loop(
    name: String,
    schedule: WeeklySchedule,
    task: Arc<dyn ScheduledTask>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
) {
    // The wall clock may lag the timer; never pick a slot at or before the last one
    let mut last_slot: Option<DateTime<chrono::Local>> = None;

    loop {
        let now = clock.now();
        let from = match last_slot {
            Some(slot) if slot > now => slot,
            _ => now,
        };
        let next = schedule.next_after(&from);
        let wait = (next - now).to_std().unwrap_or_default();
        debug!("Job {} next runs at {}", name, next);

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }
        last_slot = Some(next);

        // Errors are logged by execute; the loop keeps its schedule
        let _ = execute(&name, task.as_ref()).await;
    }

    debug!("Job loop {} exited", name);
}

async fn execute(name: &str, task: &dyn ScheduledTask) -> Result<RunSummary> {
    info!("Starting job {}", name);

    match task.run().await {
        Ok(summary) => {
            info!(
                "Job {} completed: {} eligible, {} sent, {} skipped, {} failed",
                name,
                summary.eligible,
                summary.sent,
                summary.skipped,
                summary.failures.len()
            );
            Ok(summary)
        }
        Err(e) => {
            error!("Job {} failed: {:#}", name, e);
            Err(e)
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{LaggingClock, PausedClock};
    use super::*;
    use chrono::{Local, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingTask {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl ScheduledTask for CountingTask {
        async fn run(&self) -> Result<RunSummary> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(RunSummary::default())
        }
    }

    fn monday_nine() -> WeeklySchedule {
        WeeklySchedule::new(Weekday::Mon, 9, 0).unwrap()
    }

    fn local(day: u32, hour: u32, minute: u32) -> DateTime<Local> {
        // October 2026: the 18th is a Sunday, the 19th a Monday
        Local
            .with_ymd_and_hms(2026, 10, day, hour, minute, 0)
            .earliest()
            .unwrap()
    }

    fn scheduler_with_counter(base: DateTime<Local>) -> (Scheduler, Arc<CountingTask>) {
        let task = Arc::new(CountingTask {
            runs: AtomicUsize::new(0),
        });
        let mut scheduler = Scheduler::new(Arc::new(PausedClock::new(base)));
        scheduler.register(WEEKLY_REPORT_JOB, monday_nine(), task.clone());
        (scheduler, task)
    }

    #[test]
    fn test_next_after() {
        let schedule = monday_nine();
        let at = |day, hour, minute| Utc.with_ymd_and_hms(2026, 10, day, hour, minute, 0).unwrap();

        assert_eq!(schedule.next_after(&at(19, 8, 59)), at(19, 9, 0));
        assert_eq!(schedule.next_after(&at(19, 9, 0)), at(26, 9, 0));
        assert_eq!(schedule.next_after(&at(20, 12, 0)), at(26, 9, 0));
        assert_eq!(schedule.next_after(&at(18, 23, 0)), at(19, 9, 0));
    }

    #[test]
    fn test_status_line_reports_configuration() {
        let schedule = monday_nine();
        let now = Utc.with_ymd_and_hms(2026, 10, 20, 12, 0, 0).unwrap();

        assert_eq!(
            schedule.status_line(WEEKLY_REPORT_JOB, true, &now),
            "weekly_reports: enabled, every Mon at 09:00, next run 2026-10-26 09:00 +00:00"
        );
        assert_eq!(
            schedule.status_line(WEEKLY_REPORT_JOB, false, &now),
            "weekly_reports: disabled, every Mon at 09:00"
        );
    }

    #[test]
    fn test_schedule_rejects_invalid_time() {
        assert!(WeeklySchedule::new(Weekday::Mon, 24, 0).is_none());
        assert!(WeeklySchedule::new(Weekday::Mon, 9, 60).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_fires_at_scheduled_instant() {
        let (scheduler, task) = scheduler_with_counter(local(19, 8, 59));
        scheduler.start_all().await;

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(task.runs.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(task.runs.load(Ordering::SeqCst), 1);

        // Next run is a week away
        tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
        assert_eq!(task.runs.load(Ordering::SeqCst), 1);

        scheduler.stop_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_lagging_clock_fires_slot_once() {
        let task = Arc::new(CountingTask {
            runs: AtomicUsize::new(0),
        });
        let clock = LaggingClock(PausedClock::new(local(19, 8, 59)));
        let mut scheduler = Scheduler::new(Arc::new(clock));
        scheduler.register(WEEKLY_REPORT_JOB, monday_nine(), task.clone());
        scheduler.start_all().await;

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(task.runs.load(Ordering::SeqCst), 1);

        scheduler.stop_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_all_prevents_further_runs() {
        let (scheduler, task) = scheduler_with_counter(local(19, 8, 0));
        scheduler.start_all().await;
        assert_eq!(scheduler.status().await.get(WEEKLY_REPORT_JOB), Some(&true));

        scheduler.stop_all().await;
        scheduler.stop_all().await;
        assert_eq!(scheduler.status().await.get(WEEKLY_REPORT_JOB), Some(&false));

        tokio::time::sleep(Duration::from_secs(2 * 3600)).await;
        assert_eq!(task.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_all_is_idempotent() {
        let (scheduler, task) = scheduler_with_counter(local(19, 8, 59));
        scheduler.start_all().await;
        scheduler.start_all().await;

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(task.runs.load(Ordering::SeqCst), 1);

        scheduler.stop_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_and_trigger() {
        let (scheduler, task) = scheduler_with_counter(local(20, 10, 0));

        assert!(!scheduler.restart("missing").await);
        assert!(scheduler.trigger("missing").await.is_err());

        // Trigger works while the job is stopped
        scheduler.trigger(WEEKLY_REPORT_JOB).await.unwrap();
        assert_eq!(task.runs.load(Ordering::SeqCst), 1);

        assert!(scheduler.restart(WEEKLY_REPORT_JOB).await);
        assert_eq!(scheduler.status().await.get(WEEKLY_REPORT_JOB), Some(&true));

        scheduler.stop_all().await;
        assert_eq!(task.runs.load(Ordering::SeqCst), 1);
    }
}
