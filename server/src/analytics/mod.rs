//! Reading statistics and trends
//!
//! Statistics classify each reading against the target range. Trends bucket
//! readings by UTC hour, UTC day or ISO week and summarise each bucket.

use crate::reports::round2;
use chrono::{Datelike, Duration};
use model::constants::{TARGET_RANGE_HIGH_MG_DL, TARGET_RANGE_LOW_MG_DL};
use model::{ParseError, Reading};
use serde::Serialize;
use std::collections::BTreeMap;
use std::str::FromStr;

/// Lookback of the statistics endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatsPeriod {
    Week,
    Month,
    Quarter,
    Year,
}

impl StatsPeriod {
    pub fn lookback(self) -> Duration {
        match self {
            StatsPeriod::Week => Duration::days(7),
            StatsPeriod::Month => Duration::days(30),
            StatsPeriod::Quarter => Duration::days(90),
            StatsPeriod::Year => Duration::days(365),
        }
    }
}

impl FromStr for StatsPeriod {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "week" => Ok(StatsPeriod::Week),
            "month" => Ok(StatsPeriod::Month),
            "quarter" => Ok(StatsPeriod::Quarter),
            "year" => Ok(StatsPeriod::Year),
            other => Err(ParseError::UnknownPeriod(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendGrouping {
    Hour,
    Day,
    Week,
}

impl TrendGrouping {
    /// Bucket label; labels sort in chronological order
    fn label(self, reading: &Reading) -> String {
        let at = reading.timestamp;
        match self {
            TrendGrouping::Hour => at.format("%Y-%m-%dT%H:00:00").to_string(),
            TrendGrouping::Day => at.format("%Y-%m-%d").to_string(),
            TrendGrouping::Week => {
                let week = at.iso_week();
                format!("{}-W{:02}", week.year(), week.week())
            }
        }
    }
}

impl FromStr for TrendGrouping {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hour" => Ok(TrendGrouping::Hour),
            "day" => Ok(TrendGrouping::Day),
            "week" => Ok(TrendGrouping::Week),
            other => Err(ParseError::UnknownGrouping(other.to_string())),
        }
    }
}

/// Summary of a set of readings against the target range
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReadingStats {
    pub total_readings: usize,
    /// None without readings
    pub average_glucose: Option<f64>,
    pub min_glucose: Option<f64>,
    pub max_glucose: Option<f64>,
    /// Below the target range
    pub low_readings: usize,
    /// Above the target range
    pub high_readings: usize,
    pub normal_readings: usize,
    /// Percentage of readings in range, two decimals; 0 without readings
    pub time_in_range: f64,
}

impl ReadingStats {
    pub fn compute(readings: &[Reading]) -> Self {
        let total_readings = readings.len();
        if total_readings == 0 {
            return Self::default();
        }

        let levels = || readings.iter().map(|r| r.glucose_level);
        let low_readings = levels().filter(|&v| v < TARGET_RANGE_LOW_MG_DL).count();
        let high_readings = levels().filter(|&v| v > TARGET_RANGE_HIGH_MG_DL).count();
        let normal_readings = total_readings - low_readings - high_readings;

        Self {
            total_readings,
            average_glucose: Some(levels().sum::<f64>() / total_readings as f64),
            min_glucose: levels().reduce(f64::min),
            max_glucose: levels().reduce(f64::max),
            low_readings,
            high_readings,
            normal_readings,
            time_in_range: round2(normal_readings as f64 / total_readings as f64 * 100.0),
        }
    }
}

/// One trend bucket
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendBucket {
    pub period: String,
    pub avg_glucose: f64,
    pub min_glucose: f64,
    pub max_glucose: f64,
    pub reading_count: usize,
}

/// Bucket readings by `grouping`, oldest bucket first. Empty buckets are omitted.
pub fn trends(readings: &[Reading], grouping: TrendGrouping) -> Vec<TrendBucket> {
    let mut buckets: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for reading in readings {
        buckets
            .entry(grouping.label(reading))
            .or_default()
            .push(reading.glucose_level);
    }

    buckets
        .into_iter()
        .map(|(period, values)| TrendBucket {
            avg_glucose: values.iter().sum::<f64>() / values.len() as f64,
            min_glucose: values.iter().copied().fold(f64::INFINITY, f64::min),
            max_glucose: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            reading_count: values.len(),
            period,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use model::ReadingContext;

    fn reading(level: f64, at: DateTime<Utc>) -> Reading {
        Reading {
            id: model::new_id(),
            user_id: "u1".to_string(),
            glucose_level: level,
            timestamp: at,
            context: ReadingContext::Other,
            notes: None,
            medication_taken: false,
            carbs_consumed: 0,
            exercise_duration: 0,
            stress_level: None,
            created_at: at,
        }
    }

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, day, hour, minute, 0).unwrap()
    }

    #[test]
    fn test_stats_classify_against_target_range() {
        let readings: Vec<Reading> = [65.0, 70.0, 120.0, 180.0, 181.0, 250.0]
            .into_iter()
            .map(|v| reading(v, at(19, 8, 0)))
            .collect();

        let stats = ReadingStats::compute(&readings);
        assert_eq!(stats.total_readings, 6);
        assert_eq!(stats.low_readings, 1);
        assert_eq!(stats.high_readings, 2);
        assert_eq!(stats.normal_readings, 3);
        assert_eq!(stats.min_glucose, Some(65.0));
        assert_eq!(stats.max_glucose, Some(250.0));
        assert_eq!(stats.average_glucose, Some(866.0 / 6.0));
        assert_eq!(stats.time_in_range, 50.0);
    }

    #[test]
    fn test_stats_without_readings() {
        let stats = ReadingStats::compute(&[]);
        assert_eq!(stats.total_readings, 0);
        assert_eq!(stats.average_glucose, None);
        assert_eq!(stats.min_glucose, None);
        assert_eq!(stats.time_in_range, 0.0);
    }

    #[test]
    fn test_time_in_range_rounded() {
        let readings = vec![
            reading(100.0, at(19, 8, 0)),
            reading(100.0, at(19, 9, 0)),
            reading(300.0, at(19, 10, 0)),
        ];
        assert_eq!(ReadingStats::compute(&readings).time_in_range, 66.67);
    }

    #[test]
    fn test_trends_by_hour_and_day() {
        let readings = vec![
            reading(100.0, at(19, 8, 5)),
            reading(140.0, at(19, 8, 55)),
            reading(200.0, at(19, 9, 10)),
            reading(90.0, at(20, 7, 0)),
        ];

        let hourly = trends(&readings, TrendGrouping::Hour);
        assert_eq!(hourly.len(), 3);
        assert_eq!(hourly[0].period, "2026-10-19T08:00:00");
        assert_eq!(hourly[0].reading_count, 2);
        assert_eq!(hourly[0].avg_glucose, 120.0);
        assert_eq!(hourly[0].min_glucose, 100.0);
        assert_eq!(hourly[0].max_glucose, 140.0);

        let daily = trends(&readings, TrendGrouping::Day);
        let periods: Vec<&str> = daily.iter().map(|b| b.period.as_str()).collect();
        assert_eq!(periods, vec!["2026-10-19", "2026-10-20"]);
        assert_eq!(daily[0].reading_count, 3);
    }

    #[test]
    fn test_trends_by_iso_week() {
        // Sunday the 18th closes ISO week 42; Monday the 19th opens week 43
        let readings = vec![
            reading(100.0, at(18, 23, 0)),
            reading(150.0, at(19, 0, 30)),
            reading(170.0, at(25, 12, 0)),
        ];

        let weekly = trends(&readings, TrendGrouping::Week);
        let periods: Vec<&str> = weekly.iter().map(|b| b.period.as_str()).collect();
        assert_eq!(periods, vec!["2026-W42", "2026-W43"]);
        assert_eq!(weekly[1].reading_count, 2);
        assert_eq!(weekly[1].avg_glucose, 160.0);
    }

    #[test]
    fn test_query_values_parse() {
        assert_eq!("quarter".parse::<StatsPeriod>(), Ok(StatsPeriod::Quarter));
        assert_eq!(StatsPeriod::Week.lookback(), Duration::days(7));
        assert!("decade".parse::<StatsPeriod>().is_err());
        assert_eq!("week".parse::<TrendGrouping>(), Ok(TrendGrouping::Week));
        assert!("minute".parse::<TrendGrouping>().is_err());
    }
}
