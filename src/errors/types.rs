//! Error type definitions for the stream scheduler
//!
//! Errors are grouped by the layer that raises them. Each enum implements
//! `thiserror::Error`, and [`AppError`] unifies them for callers that do not
//! care which layer failed.

use thiserror::Error;
use uuid::Uuid;

use crate::utils::retry::Retryable;

/// Top-level application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Repository layer errors
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Process supervision errors
    #[error("Supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),

    /// Broadcast creation errors
    #[error("Broadcast error: {0}")]
    Broadcast(#[from] BroadcastError),

    /// Invalid schedule definitions
    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleConfigError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

/// Repository layer specific errors
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// Record not found
    #[error("Not found: {resource} with id {id}")]
    NotFound { resource: String, id: String },

    /// Rejected on save
    #[error("Validation failed: {0}")]
    Validation(#[from] ScheduleConfigError),
}

impl RepositoryError {
    pub fn not_found<R: Into<String>>(resource: R, id: Uuid) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.to_string(),
        }
    }
}

/// Schedule definitions or stream schedules that can never be evaluated
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleConfigError {
    #[error("weekly schedule requires at least one day")]
    EmptyWeeklyDays,

    #[error("daily schedule must not list days")]
    DaysOnDailyPattern,

    #[error("invalid time of day '{0}', expected HH:MM")]
    InvalidTimeOfDay(String),

    #[error("invalid timezone '{0}', expected an IANA name such as Europe/London or UTC")]
    InvalidTimezone(String),

    #[error("duration must be a positive number of minutes, got {0}")]
    NonPositiveDuration(i64),

    #[error("duration of {minutes} minutes exceeds the maximum of {max}")]
    DurationTooLong { minutes: i64, max: i64 },

    #[error("{schedule_type} stream is missing {field}")]
    MissingField {
        schedule_type: &'static str,
        field: &'static str,
    },
}

/// Failures reported by the broadcast creation collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BroadcastError {
    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("quota exceeded: {0}")]
    Quota(String),

    #[error("invalid broadcast configuration: {0}")]
    InvalidConfig(String),

    #[error("transient network failure: {0}")]
    TransientNetwork(String),
}

impl BroadcastError {
    /// Short classification used in logs and persisted errors
    pub fn kind(&self) -> &'static str {
        match self {
            BroadcastError::Auth(_) => "auth",
            BroadcastError::Quota(_) => "quota",
            BroadcastError::InvalidConfig(_) => "invalid-config",
            BroadcastError::TransientNetwork(_) => "transient-network",
        }
    }
}

impl Retryable for BroadcastError {
    fn is_retryable(&self) -> bool {
        matches!(self, BroadcastError::TransientNetwork(_))
    }
}

/// Process supervision errors
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Stream not found: {0}")]
    StreamNotFound(Uuid),

    #[error("Stream {0} already has a live encoder")]
    AlreadyLive(Uuid),

    #[error("Stream {stream_id} has invalid duration: {minutes} minutes")]
    InvalidDuration { stream_id: Uuid, minutes: i64 },

    #[error("Failed to spawn encoder for stream {stream_id}: {message}")]
    SpawnFailed { stream_id: Uuid, message: String },

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
}
