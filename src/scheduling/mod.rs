//! Recurring broadcast scheduling
//!
//! [`window`] holds the pure trigger and next-run computations; [`engine`]
//! drives them from a periodic tick against the repositories.

pub mod engine;
pub mod window;

pub use engine::{
    Decision, EngineSettings, Outcome, RecurringScheduleEngine, SchedulePolicy, SkipReason,
    TickSummary, decide, stream_is_due,
};
pub use window::{TriggerWindow, already_ran, next_occurrence, occurrence_in_window, once_in_window};
