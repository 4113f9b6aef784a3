use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboundKind {
    Message,
    ConnectRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboundStatus {
    Pending,
    PendingConnection,
    Completed,
    Deferred,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundPayload {
    pub text: String,
    pub language: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundAction {
    pub id: Uuid,
    pub job_id: Uuid,
    pub candidate_id: Uuid,
    pub conversation_id: Uuid,
    pub kind: OutboundKind,
    pub payload: OutboundPayload,
    pub status: OutboundStatus,
    pub last_error: Option<String>,
    pub assigned_account_id: Option<Uuid>,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

