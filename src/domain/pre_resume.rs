use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const TERMINAL_STATUSES: &[&str] = &["resume_received", "not_interested", "unreachable", "stalled"];

pub fn is_terminal(status: &str) -> bool {
    TERMINAL_STATUSES.contains(&status)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreResumeSession {
    pub id: String,
    pub conversation_id: Uuid,
    pub job_id: Uuid,
    pub candidate_id: Uuid,
    pub candidate_name: String,
    pub job_title: String,
    pub scope_summary: String,
    pub core_profile_summary: String,
    pub language: String,
    pub status: String,
    pub followups_sent: u32,
    pub turns: u32,
    pub last_intent: String,
    pub last_error: Option<String>,
    pub resume_links: Vec<String>,
    pub next_followup_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreResumeEventType {
    SessionStarted,
    InboundProcessed,
    FollowupSent,
    SessionUnreachable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreResumeEvent {
    pub id: Uuid,
    pub session_id: String,
    pub event_type: PreResumeEventType,
    pub intent: Option<String>,
    pub inbound_text: Option<String>,
    pub outbound_text: Option<String>,
    pub resulting_status: String,
    pub created_at: DateTime<Utc>,
}
