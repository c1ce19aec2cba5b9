//! Recurring schedule definitions

use chrono::{DateTime, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::errors::ScheduleConfigError;
use crate::models::{hhmm, validate_duration};

/// Recurrence pattern; weekly carries its days so that "days iff weekly" holds by construction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SchedulePattern {
    Daily,
    Weekly { days: HashSet<Weekday> },
}

impl SchedulePattern {
    pub fn weekly<I: IntoIterator<Item = Weekday>>(days: I) -> Self {
        SchedulePattern::Weekly {
            days: days.into_iter().collect(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulePattern::Daily => "daily",
            SchedulePattern::Weekly { .. } => "weekly",
        }
    }
}

/// What to create every time a definition fires
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastTemplate {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_privacy")]
    pub privacy_status: String,
    pub input_source: String,
    pub duration_minutes: i64,
    #[serde(default)]
    pub loop_input: bool,
}

fn default_privacy() -> String {
    "unlisted".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleDefinition {
    pub id: Uuid,
    pub name: String,
    pub pattern: SchedulePattern,
    #[serde(with = "hhmm")]
    pub time_of_day: NaiveTime,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
    pub template: BroadcastTemplate,
}

fn default_enabled() -> bool {
    true
}

impl ScheduleDefinition {
    pub fn new(
        name: impl Into<String>,
        pattern: SchedulePattern,
        time_of_day: NaiveTime,
        template: BroadcastTemplate,
    ) -> Result<Self, ScheduleConfigError> {
        let definition = Self {
            id: Uuid::new_v4(),
            name: name.into(),
            pattern,
            time_of_day,
            enabled: true,
            last_run_at: None,
            next_run_at: None,
            last_error: None,
            template,
        };
        definition.validate()?;
        Ok(definition)
    }

    /// Save-time validation; a definition that fails never reaches the engine
    pub fn validate(&self) -> Result<(), ScheduleConfigError> {
        if let SchedulePattern::Weekly { days } = &self.pattern
            && days.is_empty()
        {
            return Err(ScheduleConfigError::EmptyWeeklyDays);
        }

        validate_duration(self.template.duration_minutes)
    }
}
