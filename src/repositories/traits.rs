//! Persistence collaborator interfaces consumed by the supervisor and the engine

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::RepositoryResult;
use crate::models::{ScheduleDefinition, StopReason, Stream, StreamStatus};

/// Stream persistence
#[async_trait]
pub trait StreamRepository: Send + Sync {
    /// Insert or replace a stream; scheduled streams are validated first
    async fn save(&self, stream: Stream) -> RepositoryResult<Stream>;

    async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<Stream>>;

    async fn find_by_status(&self, status: StreamStatus) -> RepositoryResult<Vec<Stream>>;

    /// Enter `live` for a fresh run: records the start time, clears the previous
    /// end and stop reason, resets the retry count
    async fn mark_live(&self, id: Uuid, start_time: DateTime<Utc>) -> RepositoryResult<()>;

    /// Leave `live` (or any other transition driven by the supervisor)
    async fn update_status(
        &self,
        id: Uuid,
        status: StreamStatus,
        end_time: Option<DateTime<Utc>>,
        reason: Option<StopReason>,
    ) -> RepositoryResult<()>;

    async fn record_retry(
        &self,
        id: Uuid,
        retry_count: u32,
        last_error: Option<String>,
    ) -> RepositoryResult<()>;

    async fn record_error(&self, id: Uuid, error: String) -> RepositoryResult<()>;
}

/// Schedule definition persistence
#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    /// Insert or replace a definition; invalid definitions are rejected
    async fn save(&self, definition: ScheduleDefinition) -> RepositoryResult<ScheduleDefinition>;

    async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<ScheduleDefinition>>;

    async fn find_enabled(&self) -> RepositoryResult<Vec<ScheduleDefinition>>;

    /// Record a firing. `last_run_at` never moves backwards.
    async fn update_run(
        &self,
        id: Uuid,
        last_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> RepositoryResult<()>;

    async fn set_next_run(&self, id: Uuid, next_run_at: DateTime<Utc>) -> RepositoryResult<()>;

    /// Toggle `enabled` without touching pattern, time, days or run timestamps
    async fn set_enabled(&self, id: Uuid, enabled: bool) -> RepositoryResult<()>;

    async fn record_error(&self, id: Uuid, error: Option<String>) -> RepositoryResult<()>;
}
