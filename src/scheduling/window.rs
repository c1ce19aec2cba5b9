//! Trigger windows and next-run computation
//!
//! Pure functions over a [`SchedulePattern`]; nothing here reads a clock or a
//! repository. Wall-clock times are interpreted in the configured timezone,
//! with DST gaps shifted forward an hour and repeated hours resolved to their
//! first occurrence (see [`resolve_local`]).

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use std::collections::HashSet;

use crate::models::SchedulePattern;
use crate::utils::time::{local_date, resolve_local};

/// Longest gap between two occurrences of any pattern, plus slack
const SEARCH_DAYS: i64 = 8;

/// How far around a nominal time firing is accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerWindow {
    pub early: Duration,
    pub late: Duration,
}

impl TriggerWindow {
    pub fn new(early: Duration, late: Duration) -> Self {
        Self { early, late }
    }

    pub fn contains(&self, occurrence: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now >= occurrence - self.early && now <= occurrence + self.late
    }
}

/// Whether a one-off schedule at `scheduled_time` is within its window at `now`
pub fn once_in_window(
    scheduled_time: DateTime<Utc>,
    now: DateTime<Utc>,
    window: &TriggerWindow,
) -> bool {
    window.contains(scheduled_time, now)
}

/// The occurrence whose trigger window contains `now`, if any
pub fn occurrence_in_window(
    pattern: &SchedulePattern,
    time_of_day: NaiveTime,
    tz: &Tz,
    now: DateTime<Utc>,
    window: &TriggerWindow,
) -> Option<DateTime<Utc>> {
    match pattern {
        SchedulePattern::Daily => daily_occurrence_in_window(time_of_day, tz, now, window),
        SchedulePattern::Weekly { days } => {
            weekly_occurrence_in_window(days, time_of_day, tz, now, window)
        }
    }
}

/// First occurrence strictly after `after`. `None` only for a weekly pattern
/// without days, which validation rejects before evaluation.
pub fn next_occurrence(
    pattern: &SchedulePattern,
    time_of_day: NaiveTime,
    tz: &Tz,
    after: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match pattern {
        SchedulePattern::Daily => next_daily(time_of_day, tz, after),
        SchedulePattern::Weekly { days } => next_weekly(days, time_of_day, tz, after),
    }
}

/// An occurrence counts as handled once a run was recorded at or after its window opened
pub fn already_ran(
    last_run_at: Option<DateTime<Utc>>,
    occurrence: DateTime<Utc>,
    window: &TriggerWindow,
) -> bool {
    last_run_at.is_some_and(|last| last >= occurrence - window.early)
}

fn daily_occurrence_in_window(
    time_of_day: NaiveTime,
    tz: &Tz,
    now: DateTime<Utc>,
    window: &TriggerWindow,
) -> Option<DateTime<Utc>> {
    candidate_dates(tz, now)
        .map(|date| resolve_local(tz, date, time_of_day))
        .find(|occurrence| window.contains(*occurrence, now))
}

fn weekly_occurrence_in_window(
    days: &HashSet<Weekday>,
    time_of_day: NaiveTime,
    tz: &Tz,
    now: DateTime<Utc>,
    window: &TriggerWindow,
) -> Option<DateTime<Utc>> {
    candidate_dates(tz, now)
        .filter(|date| days.contains(&date.weekday()))
        .map(|date| resolve_local(tz, date, time_of_day))
        .find(|occurrence| window.contains(*occurrence, now))
}

fn next_daily(time_of_day: NaiveTime, tz: &Tz, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    dates_from(local_date(tz, after))
        .map(|date| resolve_local(tz, date, time_of_day))
        .find(|occurrence| *occurrence > after)
}

fn next_weekly(
    days: &HashSet<Weekday>,
    time_of_day: NaiveTime,
    tz: &Tz,
    after: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    dates_from(local_date(tz, after))
        .filter(|date| days.contains(&date.weekday()))
        .map(|date| resolve_local(tz, date, time_of_day))
        .find(|occurrence| *occurrence > after)
}

/// Yesterday, today and tomorrow in local time; windows near midnight can
/// belong to an occurrence on either neighbouring date
fn candidate_dates(tz: &Tz, now: DateTime<Utc>) -> impl Iterator<Item = NaiveDate> {
    let today = local_date(tz, now);
    [-1, 0, 1]
        .into_iter()
        .filter_map(move |offset| today.checked_add_signed(Duration::days(offset)))
}

fn dates_from(start: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    (0..=SEARCH_DAYS).filter_map(move |offset| start.checked_add_signed(Duration::days(offset)))
}
