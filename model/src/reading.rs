//! Glucose readings

use crate::constants::*;
use crate::error::{ParseError, ValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Situation in which a reading was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReadingContext {
    Fasting,
    PreMeal,
    PostMeal,
    Exercise,
    Other,
}

impl ReadingContext {
    pub fn as_str(self) -> &'static str {
        match self {
            ReadingContext::Fasting => "FASTING",
            ReadingContext::PreMeal => "PRE_MEAL",
            ReadingContext::PostMeal => "POST_MEAL",
            ReadingContext::Exercise => "EXERCISE",
            ReadingContext::Other => "OTHER",
        }
    }

    /// Human readable label used in notification bodies
    pub fn label(self) -> &'static str {
        match self {
            ReadingContext::Fasting => "Fasting",
            ReadingContext::PreMeal => "Before Meal",
            ReadingContext::PostMeal => "After Meal",
            ReadingContext::Exercise => "During Exercise",
            ReadingContext::Other => "Other",
        }
    }
}

impl FromStr for ReadingContext {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "FASTING" => Ok(ReadingContext::Fasting),
            "PRE_MEAL" => Ok(ReadingContext::PreMeal),
            "POST_MEAL" => Ok(ReadingContext::PostMeal),
            "EXERCISE" => Ok(ReadingContext::Exercise),
            "OTHER" => Ok(ReadingContext::Other),
            _ => Err(ParseError::UnknownContext(s.to_string())),
        }
    }
}

/// A stored glucose reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub id: String,
    pub user_id: String,

    /// Glucose level in mg/dL
    pub glucose_level: f64,

    /// When the reading was taken
    pub timestamp: DateTime<Utc>,

    pub context: ReadingContext,
    pub notes: Option<String>,

    pub medication_taken: bool,

    /// Carbohydrates consumed, grams
    pub carbs_consumed: u32,

    /// Exercise duration, minutes
    pub exercise_duration: u32,

    /// Self-reported stress, 1-10
    pub stress_level: Option<u8>,

    pub created_at: DateTime<Utc>,
}

/// Reading as submitted by a patient, before it is stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewReading {
    pub glucose_level: f64,
    pub timestamp: DateTime<Utc>,
    pub context: ReadingContext,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub medication_taken: bool,
    #[serde(default)]
    pub carbs_consumed: u32,
    #[serde(default)]
    pub exercise_duration: u32,
    #[serde(default)]
    pub stress_level: Option<u8>,
}

impl NewReading {
    pub fn new(glucose_level: f64, timestamp: DateTime<Utc>, context: ReadingContext) -> Self {
        Self {
            glucose_level,
            timestamp,
            context,
            notes: None,
            medication_taken: false,
            carbs_consumed: 0,
            exercise_duration: 0,
            stress_level: None,
        }
    }

    /// Check field ranges and normalise the note (trimmed, empty becomes None)
    pub fn validate(mut self) -> Result<Self, ValidationError> {
        if !(GLUCOSE_MIN_MG_DL..=GLUCOSE_MAX_MG_DL).contains(&self.glucose_level) {
            return Err(ValidationError::OutOfRange {
                field: "glucose_level",
                min: GLUCOSE_MIN_MG_DL,
                max: GLUCOSE_MAX_MG_DL,
                value: self.glucose_level,
            });
        }

        self.notes = self
            .notes
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        if let Some(notes) = &self.notes {
            if notes.chars().count() > MAX_NOTE_CHARS {
                return Err(ValidationError::TooLong {
                    field: "notes",
                    max: MAX_NOTE_CHARS,
                });
            }
        }

        check_range("carbs_consumed", self.carbs_consumed as f64, 0.0, MAX_CARBS_GRAMS as f64)?;
        check_range(
            "exercise_duration",
            self.exercise_duration as f64,
            0.0,
            MAX_EXERCISE_MINUTES as f64,
        )?;
        if let Some(stress) = self.stress_level {
            check_range(
                "stress_level",
                stress as f64,
                STRESS_LEVEL_MIN as f64,
                STRESS_LEVEL_MAX as f64,
            )?;
        }

        Ok(self)
    }
}

pub(crate) fn check_range(
    field: &'static str,
    value: f64,
    min: f64,
    max: f64,
) -> Result<(), ValidationError> {
    if value.is_nan() || value < min || value > max {
        return Err(ValidationError::OutOfRange {
            field,
            min,
            max,
            value,
        });
    }
    Ok(())
}
