//! Validation limits and reporting constants

/// Accepted glucose range for a new reading (mg/dL)
pub const GLUCOSE_MIN_MG_DL: f64 = 20.0;
pub const GLUCOSE_MAX_MG_DL: f64 = 800.0;

/// Accepted range for the high alert threshold (mg/dL)
pub const HIGH_THRESHOLD_MIN: f64 = 100.0;
pub const HIGH_THRESHOLD_MAX: f64 = 500.0;

/// Accepted range for the low alert threshold (mg/dL)
pub const LOW_THRESHOLD_MIN: f64 = 30.0;
pub const LOW_THRESHOLD_MAX: f64 = 100.0;

/// Maximum length of a reading note, in characters
pub const MAX_NOTE_CHARS: usize = 500;

/// Carbohydrates consumed, grams
pub const MAX_CARBS_GRAMS: u32 = 500;

/// Exercise duration, minutes
pub const MAX_EXERCISE_MINUTES: u32 = 480;

/// Self-reported stress level
pub const STRESS_LEVEL_MIN: u8 = 1;
pub const STRESS_LEVEL_MAX: u8 = 10;

/// Days covered by the rolling "unacknowledged" window of the weekly report
pub const REPORT_ROLLING_WINDOW_DAYS: i64 = 7;

/// Alert history page size bounds
pub const HISTORY_DEFAULT_LIMIT: u32 = 50;
pub const HISTORY_MAX_LIMIT: u32 = 100;

/// Glucose value used by the test notification
pub const TEST_ALERT_GLUCOSE: f64 = 200.0;

/// Target glucose range used for reading statistics (mg/dL, inclusive)
pub const TARGET_RANGE_LOW_MG_DL: f64 = 70.0;
pub const TARGET_RANGE_HIGH_MG_DL: f64 = 180.0;

/// Trend lookback bounds, days
pub const TRENDS_DEFAULT_DAYS: u32 = 30;
pub const TRENDS_MAX_DAYS: u32 = 365;

/// Provider patient summary: statistics window and number of recent alerts
pub const PATIENT_SUMMARY_DAYS: i64 = 30;
pub const PATIENT_RECENT_ALERTS: u32 = 5;
