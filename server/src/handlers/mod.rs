//! Request handlers
//!
//! Transport-agnostic entry points for the alerting features. Each takes
//! the authenticated `Caller` and returns a typed response or an `ApiError`
//! carrying the status code to report.

pub mod alerts;
pub mod patients;
pub mod readings;
pub mod reports;

use crate::alerting::AlertPipeline;
use crate::audit::AuditLog;
use crate::notifier::{NotificationError, Notifier};
use crate::scheduler::{Clock, Scheduler};
use crate::storage::Database;
use model::{Role, ValidationError};
use std::sync::Arc;
use thiserror::Error;

/// Identity established by the upstream auth layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: String,
    pub role: Role,
}

/// Shared services the handlers operate on
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub pipeline: Arc<AlertPipeline>,
    pub notifier: Arc<Notifier>,
    pub audit: Arc<AuditLog>,
    pub scheduler: Arc<Scheduler>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Notification(#[from] NotificationError),

    #[error("Internal error: {0:#}")]
    Persistence(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::Validation(_) | ApiError::BadRequest(_) => 400,
            ApiError::Forbidden(_) => 403,
            ApiError::NotFound(_) => 404,
            ApiError::Notification(_) | ApiError::Persistence(_) => 500,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let validation = ApiError::from(ValidationError::ThresholdOrder {
            high: 90.0,
            low: 95.0,
        });
        assert_eq!(validation.status_code(), 400);
        assert_eq!(
            validation.to_string(),
            "High threshold must be greater than low threshold"
        );
        assert_eq!(ApiError::Forbidden("Insufficient permissions".into()).status_code(), 403);
        assert_eq!(ApiError::NotFound("x".into()).status_code(), 404);
        assert_eq!(
            ApiError::from(NotificationError::Connection("refused".into())).status_code(),
            500
        );
        assert_eq!(ApiError::from(anyhow::anyhow!("disk full")).status_code(), 500);
    }
}
