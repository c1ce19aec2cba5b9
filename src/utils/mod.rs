//! Utility modules shared across the supervisor and the schedule engine

pub mod clock;
pub mod jitter;
pub mod retry;
pub mod time;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock, TokioClock};
pub use retry::{RetryConfig, Retryable, with_retry};
