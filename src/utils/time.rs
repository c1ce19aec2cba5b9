//! Timezone helpers for wall-clock schedule evaluation

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::debug;

use crate::errors::ScheduleConfigError;

/// Parse and validate an IANA timezone name such as `Europe/London` or `UTC`
pub fn parse_timezone(tz_str: &str) -> Result<Tz, ScheduleConfigError> {
    let name = tz_str.trim();
    name.parse::<Tz>().map_err(|_| ScheduleConfigError::InvalidTimezone(name.to_string()))
}

/// Resolve a local calendar date and wall-clock time in `tz` to a UTC instant.
///
/// Ambiguous local times (the repeated hour when clocks go back) resolve to the
/// earlier instant. Local times that do not exist (the skipped hour when clocks
/// go forward) are moved forward by one hour.
pub fn resolve_local(tz: &Tz, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    let naive = NaiveDateTime::new(date, time);

    if let Some(local) = tz.from_local_datetime(&naive).earliest() {
        return local.with_timezone(&Utc);
    }

    let shifted = naive + Duration::hours(1);
    debug!(
        "Local time {} does not exist in {}, using {}",
        naive,
        tz.name(),
        shifted
    );
    tz.from_local_datetime(&shifted)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        // Gaps longer than an hour: read the wall time as UTC
        .unwrap_or_else(|| Utc.from_utc_datetime(&shifted))
}

/// Local calendar date of `instant` in `tz`
pub fn local_date(tz: &Tz, instant: DateTime<Utc>) -> NaiveDate {
    instant.with_timezone(tz).date_naive()
}

/// Format a UTC instant for logs in the configured timezone
pub fn format_for_display(instant: DateTime<Utc>, tz: &Tz) -> String {
    let local = instant.with_timezone(tz);
    format!("{} {}", local.format("%Y-%m-%d %H:%M:%S"), tz.name())
}

/// Convert a configured `std` duration for arithmetic on timestamps
pub fn to_chrono(duration: std::time::Duration) -> Duration {
    Duration::from_std(duration).unwrap_or_else(|_| Duration::days(365 * 100))
}

/// Time from `now` until `target`, zero if `target` has passed
pub fn until(now: DateTime<Utc>, target: DateTime<Utc>) -> std::time::Duration {
    (target - now).to_std().unwrap_or(std::time::Duration::ZERO)
}
