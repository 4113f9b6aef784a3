use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub route: String,
    pub key: String,
    pub payload_hash: String,
    pub status_code: u16,
    pub response: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
