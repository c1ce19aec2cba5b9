//! Serde helpers for human-readable durations in configuration.
//!
//! Accepts either a number of seconds or a `humantime` string such as `"30s"`,
//! `"2m"` or `"1h30m"`, and always serializes back to the string form.

use serde::de::{self, Visitor};
use serde::{Deserializer, Serializer};
use std::{fmt, time::Duration};

/// `#[serde(with = "duration")]` for `std::time::Duration` fields
pub mod duration {
    use super::*;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let duration_str = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&duration_str)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DurationVisitor;

        impl<'de> Visitor<'de> for DurationVisitor {
            type Value = Duration;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("seconds or a duration string such as '30s' or '1h30m'")
            }

            fn visit_u64<E>(self, seconds: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(Duration::from_secs(seconds))
            }

            fn visit_i64<E>(self, seconds: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                u64::try_from(seconds)
                    .map(Duration::from_secs)
                    .map_err(|_| de::Error::custom(format!("negative duration: {seconds}")))
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                humantime::parse_duration(value)
                    .map_err(|e| de::Error::custom(format!("Invalid duration '{value}': {e}")))
            }
        }

        deserializer.deserialize_any(DurationVisitor)
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Holder {
        #[serde(with = "super::duration")]
        value: Duration,
    }

    #[test]
    fn test_parses_strings_and_numbers() {
        let from_str: Holder = toml::from_str("value = \"2m\"").unwrap();
        assert_eq!(from_str.value, Duration::from_secs(120));

        let from_num: Holder = toml::from_str("value = 45").unwrap();
        assert_eq!(from_num.value, Duration::from_secs(45));

        assert!(toml::from_str::<Holder>("value = \"soon\"").is_err());
    }

    #[test]
    fn test_serializes_human_readable() {
        let holder = Holder {
            value: Duration::from_secs(90),
        };
        let out = toml::to_string(&holder).unwrap();
        assert_eq!(out.trim(), "value = \"1m 30s\"");
    }
}
