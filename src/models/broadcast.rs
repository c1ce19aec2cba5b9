//! Broadcast creation request/response exchanged with the remote platform

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::schedule::BroadcastTemplate;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastRequest {
    pub title: String,
    pub description: Option<String>,
    pub privacy_status: String,
    pub scheduled_start: DateTime<Utc>,
    pub duration_minutes: i64,
    /// Definition that requested the broadcast, for idempotency on the remote side
    pub schedule_definition_id: Uuid,
}

impl BroadcastRequest {
    pub fn from_template(
        template: &BroadcastTemplate,
        schedule_definition_id: Uuid,
        scheduled_start: DateTime<Utc>,
    ) -> Self {
        Self {
            title: template.title.clone(),
            description: template.description.clone(),
            privacy_status: template.privacy_status.clone(),
            scheduled_start,
            duration_minutes: template.duration_minutes,
            schedule_definition_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastCreated {
    pub broadcast_id: String,
    pub stream_key: String,
}
