//! Server configuration

use anyhow::{Context, Result};
use chrono::Weekday;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Missing required setting: {0}")]
    MissingSetting(&'static str),

    #[error("Invalid setting {key}: {reason}")]
    InvalidSetting { key: &'static str, reason: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub general: GeneralConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub reports: ReportsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    pub database_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    #[serde(default = "default_from_name")]
    pub from_name: String,
    #[serde(default = "default_smtp_timeout_sec")]
    pub timeout_sec: u64,
    /// Refuse to start without complete SMTP settings
    #[serde(default)]
    pub required: bool,
}

/// Complete SMTP settings, ready to build a transport from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub from_name: String,
    pub timeout_sec: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertsConfig {
    /// Upper bound on the email attempt made while ingesting a reading
    #[serde(default = "default_notification_timeout_sec")]
    pub notification_timeout_sec: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_report_weekday")]
    pub weekday: String,
    #[serde(default = "default_report_hour")]
    pub hour: u32,
    #[serde(default)]
    pub minute: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_from_name() -> String {
    "Blood Sugar Monitor".to_string()
}

fn default_smtp_timeout_sec() -> u64 {
    30
}

fn default_notification_timeout_sec() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_report_weekday() -> String {
    "Mon".to_string()
}

fn default_report_hour() -> u32 {
    9
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            user: None,
            password: None,
            from_name: default_from_name(),
            timeout_sec: default_smtp_timeout_sec(),
            required: false,
        }
    }
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            notification_timeout_sec: default_notification_timeout_sec(),
        }
    }
}

impl Default for ReportsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            weekday: default_report_weekday(),
            hour: default_report_hour(),
            minute: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let mut config = Self::parse(&content)?;
        config
            .smtp
            .apply_overrides(|key| std::env::var(key).ok())
            .context("Invalid SMTP environment override")?;

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config file")?;

        config.reports.schedule()?;

        Ok(config)
    }
}

impl SmtpConfig {
    /// Override file settings with SMTP_HOST, SMTP_PORT, SMTP_USER and SMTP_PASS
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("SMTP_HOST") {
            self.host = Some(host);
        }
        if let Some(port) = lookup("SMTP_PORT") {
            let port = port
                .trim()
                .parse::<u16>()
                .map_err(|e| ConfigurationError::InvalidSetting {
                    key: "SMTP_PORT",
                    reason: e.to_string(),
                })?;
            self.port = Some(port);
        }
        if let Some(user) = lookup("SMTP_USER") {
            self.user = Some(user);
        }
        if let Some(password) = lookup("SMTP_PASS") {
            self.password = Some(password);
        }
        Ok(())
    }

    pub fn settings(&self) -> Result<SmtpSettings, ConfigurationError> {
        fn present(value: &Option<String>, key: &'static str) -> Result<String, ConfigurationError> {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or(ConfigurationError::MissingSetting(key))
        }

        Ok(SmtpSettings {
            host: present(&self.host, "smtp.host")?,
            port: self.port.ok_or(ConfigurationError::MissingSetting("smtp.port"))?,
            user: present(&self.user, "smtp.user")?,
            password: present(&self.password, "smtp.password")?,
            from_name: self.from_name.clone(),
            timeout_sec: self.timeout_sec,
        })
    }
}

impl ReportsConfig {
    /// Weekday, hour and minute of the weekly report run
    pub fn schedule(&self) -> Result<(Weekday, u32, u32), ConfigurationError> {
        let weekday = self
            .weekday
            .parse::<Weekday>()
            .map_err(|_| ConfigurationError::InvalidSetting {
                key: "reports.weekday",
                reason: format!("unknown weekday '{}'", self.weekday),
            })?;
        if self.hour > 23 {
            return Err(ConfigurationError::InvalidSetting {
                key: "reports.hour",
                reason: format!("{} is not an hour of the day", self.hour),
            });
        }
        if self.minute > 59 {
            return Err(ConfigurationError::InvalidSetting {
                key: "reports.minute",
                reason: format!("{} is not a minute of the hour", self.minute),
            });
        }
        Ok((weekday, self.hour, self.minute))
    }
}
