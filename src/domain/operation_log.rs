use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationLog {
    pub id: Uuid,
    pub operation: String,
    pub status: String,
    pub entity_type: String,
    pub entity_id: String,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl OperationLog {
    pub fn new(operation: impl Into<String>, status: impl Into<String>, entity_type: impl Into<String>, entity_id: impl Into<String>, details: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            operation: operation.into(),
            status: status.into(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            details,
            created_at: Utc::now(),
        }
    }
}
