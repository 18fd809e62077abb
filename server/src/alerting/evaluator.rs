//! Threshold classification

use model::{AlertConfig, AlertKind};

/// Classify a reading against a user's thresholds.
///
/// HIGH is checked first, so it wins if a value satisfies both conditions.
pub fn evaluate(glucose_level: f64, config: &AlertConfig) -> Option<AlertKind> {
    if glucose_level >= config.high_threshold {
        Some(AlertKind::High)
    } else if glucose_level <= config.low_threshold {
        Some(AlertKind::Low)
    } else {
        None
    }
}
