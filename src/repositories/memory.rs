//! In-memory repositories backed by `RwLock<HashMap>`
//!
//! Used by the binary (seeded from a JSON file) and by tests. Every method
//! holds the lock only for the duration of the map access.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::traits::{ScheduleRepository, StreamRepository};
use crate::errors::{RepositoryError, RepositoryResult};
use crate::models::{ScheduleDefinition, StopReason, Stream, StreamStatus};

#[derive(Debug, Clone, Default)]
pub struct InMemoryStreamRepository {
    streams: Arc<RwLock<HashMap<Uuid, Stream>>>,
}

impl InMemoryStreamRepository {
    pub fn new() -> Self {
        Self::default()
    }

    async fn modify<F>(&self, id: Uuid, apply: F) -> RepositoryResult<()>
    where
        F: FnOnce(&mut Stream) + Send,
    {
        let mut streams = self.streams.write().await;
        let stream = streams
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::not_found("stream", id))?;
        apply(stream);
        Ok(())
    }
}

#[async_trait]
impl StreamRepository for InMemoryStreamRepository {
    async fn save(&self, stream: Stream) -> RepositoryResult<Stream> {
        if stream.status == StreamStatus::Scheduled {
            stream.validate_schedule()?;
        }
        self.streams.write().await.insert(stream.id, stream.clone());
        Ok(stream)
    }

    async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<Stream>> {
        Ok(self.streams.read().await.get(&id).cloned())
    }

    async fn find_by_status(&self, status: StreamStatus) -> RepositoryResult<Vec<Stream>> {
        Ok(self
            .streams
            .read()
            .await
            .values()
            .filter(|s| s.status == status)
            .cloned()
            .collect())
    }

    async fn mark_live(&self, id: Uuid, start_time: DateTime<Utc>) -> RepositoryResult<()> {
        self.modify(id, |stream| {
            stream.status = StreamStatus::Live;
            stream.start_time = Some(start_time);
            stream.end_time = None;
            stream.stop_reason = None;
            stream.retry_count = 0;
        })
        .await
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: StreamStatus,
        end_time: Option<DateTime<Utc>>,
        reason: Option<StopReason>,
    ) -> RepositoryResult<()> {
        self.modify(id, |stream| {
            stream.status = status;
            if end_time.is_some() {
                stream.end_time = end_time;
            }
            if reason.is_some() {
                stream.stop_reason = reason;
            }
        })
        .await
    }

    async fn record_retry(
        &self,
        id: Uuid,
        retry_count: u32,
        last_error: Option<String>,
    ) -> RepositoryResult<()> {
        self.modify(id, |stream| {
            stream.retry_count = retry_count;
            if last_error.is_some() {
                stream.last_error = last_error;
            }
        })
        .await
    }

    async fn record_error(&self, id: Uuid, error: String) -> RepositoryResult<()> {
        self.modify(id, |stream| stream.last_error = Some(error)).await
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryScheduleRepository {
    definitions: Arc<RwLock<HashMap<Uuid, ScheduleDefinition>>>,
}

impl InMemoryScheduleRepository {
    pub fn new() -> Self {
        Self::default()
    }

    async fn modify<F>(&self, id: Uuid, apply: F) -> RepositoryResult<()>
    where
        F: FnOnce(&mut ScheduleDefinition) + Send,
    {
        let mut definitions = self.definitions.write().await;
        let definition = definitions
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::not_found("schedule definition", id))?;
        apply(definition);
        Ok(())
    }
}

#[async_trait]
impl ScheduleRepository for InMemoryScheduleRepository {
    async fn save(&self, definition: ScheduleDefinition) -> RepositoryResult<ScheduleDefinition> {
        definition.validate()?;
        self.definitions
            .write()
            .await
            .insert(definition.id, definition.clone());
        Ok(definition)
    }

    async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<ScheduleDefinition>> {
        Ok(self.definitions.read().await.get(&id).cloned())
    }

    async fn find_enabled(&self) -> RepositoryResult<Vec<ScheduleDefinition>> {
        Ok(self
            .definitions
            .read()
            .await
            .values()
            .filter(|d| d.enabled)
            .cloned()
            .collect())
    }

    async fn update_run(
        &self,
        id: Uuid,
        last_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> RepositoryResult<()> {
        self.modify(id, |definition| {
            definition.last_run_at = Some(match definition.last_run_at {
                Some(previous) if previous > last_run_at => previous,
                _ => last_run_at,
            });
            definition.next_run_at = Some(next_run_at);
            definition.last_error = None;
        })
        .await
    }

    async fn set_next_run(&self, id: Uuid, next_run_at: DateTime<Utc>) -> RepositoryResult<()> {
        self.modify(id, |definition| definition.next_run_at = Some(next_run_at))
            .await
    }

    async fn set_enabled(&self, id: Uuid, enabled: bool) -> RepositoryResult<()> {
        self.modify(id, |definition| definition.enabled = enabled).await
    }

    async fn record_error(&self, id: Uuid, error: Option<String>) -> RepositoryResult<()> {
        self.modify(id, |definition| definition.last_error = error).await
    }
}
