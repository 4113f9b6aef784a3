use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status values observed across the lifecycle of a (job, candidate) match.
/// Kept as an open string (rather than a closed enum) because the source
/// lifecycle includes provider- and interview-specific variants
/// (`interview_*`) that are not enumerable in the core.
pub type MatchStatus = String;

pub const STATUS_VERIFIED: &str = "verified";
pub const STATUS_NEEDS_RESUME: &str = "needs_resume";
pub const STATUS_RESUME_RECEIVED: &str = "resume_received";
pub const STATUS_REJECTED: &str = "rejected";
pub const STATUS_OUTREACHED: &str = "outreached";
pub const STATUS_HIRED: &str = "hired";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VerificationNotes {
    pub reason: Option<String>,
    pub missing: Vec<String>,
    pub required_skills: Vec<String>,
    pub matched_skills: Vec<String>,
    pub component_scores: serde_json::Value,
    pub explanation: Option<String>,
    pub rules_version: String,
    /// Additional fields appended additively across the lifecycle
    /// (e.g. interview status written later by the interview adjunct).
    pub extra: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Match {
    pub id: Uuid,
    pub job_id: Uuid,
    pub candidate_id: Uuid,
    pub score: f64,
    pub status: MatchStatus,
    pub verification_notes: VerificationNotes,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
