//! Glucowatch Server - glucose alerting and weekly reports

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use glucowatch_server::alerting::AlertPipeline;
use glucowatch_server::audit::AuditLog;
use glucowatch_server::config;
use glucowatch_server::handlers::{self, AppState, Caller};
use glucowatch_server::notifier::{DisabledMailer, MailTransport, Notifier, SmtpMailer};
use glucowatch_server::reports::WeeklyReportAggregator;
use glucowatch_server::scheduler::{
    Clock, Scheduler, SystemClock, WeeklySchedule, WEEKLY_REPORT_JOB,
};
use glucowatch_server::storage::Database;
use model::Role;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(version)]
#[command(about = "Glucowatch server - glucose alerts and weekly reports", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "server.conf")]
    config: String,

    /// Run the weekly report once, print the summary and exit
    #[arg(long)]
    trigger_report: bool,

    /// Check the SMTP connection and exit
    #[arg(long)]
    verify_smtp: bool,

    /// Show the configured report schedule and exit
    #[arg(long)]
    status: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration
    let config = config::Config::load(&args.config)
        .context("Failed to load configuration")?;

    // Initialize logging; RUST_LOG wins over the configured level
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .init();

    info!("Starting Glucowatch server v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded configuration from: {}", args.config);

    // Open database
    let db = Arc::new(
        Database::new(&config.general.database_path)
            .context("Failed to open database")?,
    );
    db.initialize()?;
    info!("Database: {}", config.general.database_path);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let notifier = Arc::new(Notifier::new(build_transport(&config.smtp)?)?);
    let audit = Arc::new(AuditLog::new(db.clone(), clock.clone()));
    let pipeline = Arc::new(AlertPipeline::new(
        db.clone(),
        notifier.clone(),
        audit.clone(),
        clock.clone(),
        Duration::from_secs(config.alerts.notification_timeout_sec),
    ));

    // Register the weekly report job
    let (weekday, hour, minute) = config.reports.schedule()?;
    let schedule = WeeklySchedule::new(weekday, hour, minute)
        .ok_or_else(|| anyhow!("Invalid report time {:02}:{:02}", hour, minute))?;
    let mut scheduler = Scheduler::new(clock.clone());
    scheduler.register(
        WEEKLY_REPORT_JOB,
        schedule,
        Arc::new(WeeklyReportAggregator::new(db.clone(), notifier.clone(), clock.clone())),
    );
    let scheduler = Arc::new(scheduler);

    let state = AppState {
        db,
        pipeline,
        notifier,
        audit,
        scheduler,
        clock,
    };

    if args.verify_smtp {
        state.notifier.verify().await.context("SMTP verification failed")?;
        println!("SMTP connection OK");
        return Ok(());
    }

    if args.status {
        println!(
            "{}",
            schedule.status_line(WEEKLY_REPORT_JOB, config.reports.enabled, &state.clock.now())
        );
        return Ok(());
    }

    if args.trigger_report {
        let operator = Caller {
            user_id: "system".to_string(),
            role: Role::Admin,
        };
        let summary = handlers::reports::trigger_weekly_report(&state, &operator).await?;
        println!(
            "Weekly reports: {} eligible, {} sent, {} skipped, {} failed",
            summary.eligible,
            summary.sent,
            summary.skipped,
            summary.failures.len()
        );
        for (user_id, reason) in &summary.failures {
            println!("  {}: {}", user_id, reason);
        }
        return Ok(());
    }

    if config.reports.enabled {
        state.scheduler.start_all().await;
        info!(
            "Weekly report job scheduled for every {} at {}",
            schedule.weekday,
            schedule.time.format("%H:%M")
        );
    } else {
        warn!("Weekly reports are disabled in configuration");
    }

    shutdown_signal().await?;

    info!("Shutting down");
    state.scheduler.stop_all().await;
    info!("Shutdown complete");

    Ok(())
}

/// SMTP transport when fully configured, otherwise a disabled one unless
/// the configuration marks SMTP as required
fn build_transport(smtp: &config::SmtpConfig) -> Result<Arc<dyn MailTransport>> {
    match smtp.settings() {
        Ok(settings) => {
            let mailer = SmtpMailer::new(&settings).context("Failed to configure SMTP transport")?;
            info!("SMTP relay: {}:{}", settings.host, settings.port);
            Ok(Arc::new(mailer))
        }
        Err(e) if smtp.required => Err(e).context("SMTP settings are required"),
        Err(e) => {
            warn!("{}; email notifications are disabled", e);
            Ok(Arc::new(DisabledMailer))
        }
    }
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .context("Failed to install SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("Failed to listen for Ctrl-C")?,
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    Ok(())
}
