use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStepProgress {
    pub job_id: Uuid,
    pub step: String,
    pub status: String,
    pub output: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}
