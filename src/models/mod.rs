//! Domain models for streams, recurring schedule definitions and broadcasts

pub mod broadcast;
pub mod schedule;
pub mod stream;

pub use broadcast::{BroadcastCreated, BroadcastRequest};
pub use schedule::{BroadcastTemplate, ScheduleDefinition, SchedulePattern};
pub use stream::{ScheduleType, StopReason, Stream, StreamStatus};

use chrono::NaiveTime;

use crate::errors::ScheduleConfigError;

/// Longest run a stream or template may ask for (one week)
pub const MAX_DURATION_MINUTES: i64 = 7 * 24 * 60;

/// Durations must be positive and no longer than [`MAX_DURATION_MINUTES`]
pub fn validate_duration(minutes: i64) -> Result<(), ScheduleConfigError> {
    if minutes <= 0 {
        return Err(ScheduleConfigError::NonPositiveDuration(minutes));
    }
    if minutes > MAX_DURATION_MINUTES {
        return Err(ScheduleConfigError::DurationTooLong {
            minutes,
            max: MAX_DURATION_MINUTES,
        });
    }
    Ok(())
}

/// Parse a wall-clock time written as `HH:MM` or `HH:MM:SS`
pub fn parse_time_of_day(value: &str) -> Result<NaiveTime, ScheduleConfigError> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .map_err(|_| ScheduleConfigError::InvalidTimeOfDay(value.to_string()))
}

/// Serde for `NaiveTime` as `HH:MM`
pub(crate) mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        super::parse_time_of_day(&raw).map_err(de::Error::custom)
    }
}

/// Serde for `Option<NaiveTime>` as `HH:MM`
pub(crate) mod option_hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S>(time: &Option<NaiveTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match time {
            Some(t) => serializer.serialize_some(&t.format("%H:%M").to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        raw.map(|value| super::parse_time_of_day(&value).map_err(de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_time_of_day() {
        assert_eq!(
            parse_time_of_day("08:00").unwrap(),
            NaiveTime::from_hms_opt(8, 0, 0).unwrap()
        );
        assert_eq!(
            parse_time_of_day(" 23:59:30 ").unwrap(),
            NaiveTime::from_hms_opt(23, 59, 30).unwrap()
        );
        assert!(matches!(
            parse_time_of_day("25:00"),
            Err(ScheduleConfigError::InvalidTimeOfDay(_))
        ));
    }
}
