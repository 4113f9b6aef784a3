use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Connected,
    Pending,
    Error,
    Disconnected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenderAccount {
    pub id: Uuid,
    pub provider_account_id: String,
    pub status: AccountStatus,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub provider_user_id: Option<String>,
    pub label: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AccountCounters {
    pub new_threads_sent: u32,
    pub connect_sent: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobAccountAssignment {
    pub job_id: Uuid,
    pub account_id: Uuid,
}
