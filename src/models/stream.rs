//! Stream model: one broadcastable input with its schedule and lifecycle state

use chrono::{DateTime, Duration, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

use crate::errors::ScheduleConfigError;
use crate::models::{option_hhmm, validate_duration};
use crate::models::schedule::SchedulePattern;

/// Lifecycle status of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    #[default]
    Offline,
    Scheduled,
    Live,
    Errored,
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StreamStatus::Offline => "offline",
            StreamStatus::Scheduled => "scheduled",
            StreamStatus::Live => "live",
            StreamStatus::Errored => "errored",
        };
        f.write_str(s)
    }
}

/// How a stream is scheduled to go live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleType {
    #[default]
    Once,
    Daily,
    Weekly,
}

impl ScheduleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleType::Once => "once",
            ScheduleType::Daily => "daily",
            ScheduleType::Weekly => "weekly",
        }
    }

    pub fn is_recurring(&self) -> bool {
        !matches!(self, ScheduleType::Once)
    }
}

/// Why a live stream left the `live` state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopReason {
    Manual,
    DurationComplete,
    DurationCompleteWithError,
    RetriesExhausted,
    BackupTimer,
    OverdueSweep,
    Shutdown,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Manual => "manual",
            StopReason::DurationComplete => "duration-complete",
            StopReason::DurationCompleteWithError => "duration-complete-with-error",
            StopReason::RetriesExhausted => "retries-exhausted",
            StopReason::BackupTimer => "backup-timer",
            StopReason::OverdueSweep => "overdue-sweep",
            StopReason::Shutdown => "shutdown",
        }
    }

    /// Stops issued by a backup mechanism rather than the encoder or a user
    pub fn is_force_stop(&self) -> bool {
        matches!(self, StopReason::BackupTimer | StopReason::OverdueSweep)
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stream {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub status: StreamStatus,

    // Schedule
    #[serde(default)]
    pub schedule_type: ScheduleType,
    #[serde(default)]
    pub schedule_time: Option<DateTime<Utc>>,
    #[serde(default, with = "option_hhmm")]
    pub recurring_time: Option<NaiveTime>,
    #[serde(default)]
    pub schedule_days: HashSet<Weekday>,
    pub duration_minutes: i64,

    // Encoder invocation
    pub input_source: String,
    pub output_url: String,
    #[serde(default)]
    pub loop_input: bool,

    // Runtime state
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub stop_reason: Option<StopReason>,

    // Origin when created from a recurring definition
    #[serde(default)]
    pub broadcast_id: Option<String>,
    #[serde(default)]
    pub schedule_definition_id: Option<Uuid>,
}

impl Stream {
    /// A manually started stream with no schedule
    pub fn new(
        title: impl Into<String>,
        input_source: impl Into<String>,
        output_url: impl Into<String>,
        duration_minutes: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            status: StreamStatus::Offline,
            schedule_type: ScheduleType::Once,
            schedule_time: None,
            recurring_time: None,
            schedule_days: HashSet::new(),
            duration_minutes,
            input_source: input_source.into(),
            output_url: output_url.into(),
            loop_input: false,
            start_time: None,
            end_time: None,
            retry_count: 0,
            last_error: None,
            stop_reason: None,
            broadcast_id: None,
            schedule_definition_id: None,
        }
    }

    /// Expected end reconstructed from persisted fields, used after a service restart.
    /// `None` if the stream never started or the end is not representable.
    pub fn expected_end(&self) -> Option<DateTime<Utc>> {
        let length = Duration::try_minutes(self.duration_minutes)?;
        self.start_time?.checked_add_signed(length)
    }

    /// Recurrence of a daily/weekly stream, `None` for one-off streams
    pub fn recurrence(&self) -> Option<(SchedulePattern, NaiveTime)> {
        let time = self.recurring_time?;
        match self.schedule_type {
            ScheduleType::Once => None,
            ScheduleType::Daily => Some((SchedulePattern::Daily, time)),
            ScheduleType::Weekly => Some((
                SchedulePattern::Weekly {
                    days: self.schedule_days.clone(),
                },
                time,
            )),
        }
    }

    /// Check the schedule fields are consistent with `schedule_type`
    pub fn validate_schedule(&self) -> Result<(), ScheduleConfigError> {
        validate_duration(self.duration_minutes)?;

        match self.schedule_type {
            ScheduleType::Once => {
                if self.status == StreamStatus::Scheduled && self.schedule_time.is_none() {
                    return Err(ScheduleConfigError::MissingField {
                        schedule_type: "once",
                        field: "schedule_time",
                    });
                }
            }
            ScheduleType::Daily => {
                if self.recurring_time.is_none() {
                    return Err(ScheduleConfigError::MissingField {
                        schedule_type: "daily",
                        field: "recurring_time",
                    });
                }
                if !self.schedule_days.is_empty() {
                    return Err(ScheduleConfigError::DaysOnDailyPattern);
                }
            }
            ScheduleType::Weekly => {
                if self.recurring_time.is_none() {
                    return Err(ScheduleConfigError::MissingField {
                        schedule_type: "weekly",
                        field: "recurring_time",
                    });
                }
                if self.schedule_days.is_empty() {
                    return Err(ScheduleConfigError::EmptyWeeklyDays);
                }
            }
        }

        Ok(())
    }
}
