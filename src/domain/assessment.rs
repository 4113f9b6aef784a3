use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const AGENT_SOURCING_VETTING: &str = "sourcing_vetting";
pub const AGENT_COMMUNICATION: &str = "communication";
pub const AGENT_INTERVIEW_EVALUATION: &str = "interview_evaluation";
pub const AGENT_CULTURE_ANALYST: &str = "culture_analyst";
pub const AGENT_JOB_ARCHITECT: &str = "job_architect";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentAssessment {
    pub id: Uuid,
    pub job_id: Uuid,
    pub candidate_id: Uuid,
    pub agent_key: String,
    pub stage_key: String,
    pub score: Option<f64>,
    pub status: String,
    pub reason: Option<String>,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
