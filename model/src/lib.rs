//! Glucowatch Model Library
//!
//! Shared domain definitions for the Glucowatch service.
//! This includes readings, alert configuration and history, audit entries,
//! validation limits, and the errors raised when input violates them.

pub mod alert;
pub mod audit;
pub mod constants;
pub mod error;
pub mod reading;
pub mod user;

pub use alert::{AlertConfig, AlertConfigInput, AlertHistory, AlertKind, NotificationDestination};
pub use audit::AuditLogEntry;
pub use error::{ParseError, ValidationError};
pub use reading::{NewReading, Reading, ReadingContext};
pub use user::{Role, User};

/// Generate a fresh record identifier
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
