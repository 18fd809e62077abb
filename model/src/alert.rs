//! Alert configuration, destinations and history

use crate::constants::*;
use crate::error::{ParseError, ValidationError};
use crate::reading::check_range;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which threshold a reading breached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertKind {
    #[serde(rename = "HIGH_GLUCOSE")]
    High,
    #[serde(rename = "LOW_GLUCOSE")]
    Low,
}

impl AlertKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertKind::High => "HIGH_GLUCOSE",
            AlertKind::Low => "LOW_GLUCOSE",
        }
    }

    /// "High Glucose" / "Low Glucose"
    pub fn title(self) -> &'static str {
        match self {
            AlertKind::High => "High Glucose",
            AlertKind::Low => "Low Glucose",
        }
    }

    /// History message stored with the alert
    pub fn message(self, glucose_level: f64) -> String {
        match self {
            AlertKind::High => format!("High glucose reading: {} mg/dL", glucose_level),
            AlertKind::Low => format!("Low glucose reading: {} mg/dL", glucose_level),
        }
    }
}

impl FromStr for AlertKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HIGH_GLUCOSE" => Ok(AlertKind::High),
            "LOW_GLUCOSE" => Ok(AlertKind::Low),
            other => Err(ParseError::UnknownAlertKind(other.to_string())),
        }
    }
}

/// Where a caregiver wants to be notified
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "target", rename_all = "snake_case")]
pub enum NotificationDestination {
    Email(String),
    Sms(String),
    Push(String),
}

impl NotificationDestination {
    pub fn email_address(&self) -> Option<&str> {
        match self {
            NotificationDestination::Email(address) => Some(address),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            NotificationDestination::Email(_) => "email",
            NotificationDestination::Sms(_) => "sms",
            NotificationDestination::Push(_) => "push",
        }
    }
}

impl fmt::Display for NotificationDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationDestination::Email(address) => write!(f, "email:{}", address),
            NotificationDestination::Sms(number) => write!(f, "sms:{}", number),
            NotificationDestination::Push(token) => write!(f, "push:{}", token),
        }
    }
}

/// Accepts `email:`, `sms:` and `push:` prefixes in any case; a bare value is an
/// email address and any other prefix is rejected
impl FromStr for NotificationDestination {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let invalid = || ValidationError::InvalidDestination(s.to_string());

        let destination = match raw.split_once(':') {
            Some((scheme, value)) => match scheme.trim().to_ascii_lowercase().as_str() {
                "email" => NotificationDestination::Email(value.trim().to_lowercase()),
                "sms" => {
                    let number = value.trim();
                    let digits = number.strip_prefix('+').unwrap_or(number);
                    if digits.len() < 7 || !digits.chars().all(|c| c.is_ascii_digit()) {
                        return Err(invalid());
                    }
                    NotificationDestination::Sms(number.to_string())
                }
                "push" => {
                    let token = value.trim();
                    if token.is_empty() {
                        return Err(invalid());
                    }
                    NotificationDestination::Push(token.to_string())
                }
                _ => return Err(invalid()),
            },
            None => NotificationDestination::Email(raw.to_lowercase()),
        };

        if let NotificationDestination::Email(address) = &destination {
            if !is_valid_email(address) {
                return Err(invalid());
            }
        }

        Ok(destination)
    }
}

/// Dot-atom local part and a dotted hostname, the subset SMTP relays accept
fn is_valid_email(address: &str) -> bool {
    let Some((local, domain)) = address.split_once('@') else {
        return false;
    };
    is_dot_atom(local) && is_hostname(domain)
}

fn is_dot_atom(local: &str) -> bool {
    const ATEXT_SPECIALS: &str = "!#$%&'*+-/=?^_`{|}~";
    !local.is_empty()
        && local.split('.').all(|atom| {
            !atom.is_empty()
                && atom
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || ATEXT_SPECIALS.contains(c))
        })
}

fn is_hostname(domain: &str) -> bool {
    let labels: Vec<&str> = domain.split('.').collect();
    labels.len() >= 2
        && labels.iter().all(|label| {
            !label.is_empty()
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

/// Per-user alert thresholds, one row per user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertConfig {
    pub id: String,
    pub user_id: String,

    /// Readings at or above this value fire a HIGH alert (mg/dL)
    pub high_threshold: f64,

    /// Readings at or below this value fire a LOW alert (mg/dL)
    pub low_threshold: f64,

    pub enabled: bool,
    pub destinations: Vec<NotificationDestination>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AlertConfig {
    pub fn email_recipients(&self) -> Vec<&str> {
        self.destinations
            .iter()
            .filter_map(NotificationDestination::email_address)
            .collect()
    }
}

/// Alert configuration as submitted by a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertConfigInput {
    pub high_threshold: f64,
    pub low_threshold: f64,
    #[serde(default)]
    pub destinations: Vec<String>,
}

impl AlertConfigInput {
    /// Validate thresholds and destinations.
    ///
    /// The owner's own address is always included; blank entries are dropped
    /// and duplicates collapse while keeping first-seen order.
    pub fn validate(
        &self,
        owner_email: &str,
    ) -> Result<Vec<NotificationDestination>, ValidationError> {
        check_range(
            "high_threshold",
            self.high_threshold,
            HIGH_THRESHOLD_MIN,
            HIGH_THRESHOLD_MAX,
        )?;
        check_range(
            "low_threshold",
            self.low_threshold,
            LOW_THRESHOLD_MIN,
            LOW_THRESHOLD_MAX,
        )?;
        if self.high_threshold <= self.low_threshold {
            return Err(ValidationError::ThresholdOrder {
                high: self.high_threshold,
                low: self.low_threshold,
            });
        }

        let mut destinations: Vec<NotificationDestination> = Vec::new();
        let owner = std::iter::once(owner_email);
        for raw in owner.chain(self.destinations.iter().map(String::as_str)) {
            if raw.trim().is_empty() {
                continue;
            }
            let destination = raw.parse::<NotificationDestination>()?;
            if !destinations.contains(&destination) {
                destinations.push(destination);
            }
        }

        Ok(destinations)
    }
}

/// A fired alert. Only `acknowledged` / `acknowledged_at` ever change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertHistory {
    pub id: String,
    pub user_id: String,
    pub reading_id: String,
    pub kind: AlertKind,
    pub message: String,
    pub acknowledged: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
