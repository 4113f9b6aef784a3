use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub id: Uuid,
    pub provider_id: String,
    pub full_name: String,
    pub headline: Option<String>,
    pub location: Option<String>,
    pub languages: Vec<String>,
    pub skills: Vec<String>,
    pub years_experience: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields refreshed on each sourcing pass; identity (`provider_id`) is the
/// upsert key and is never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateUpsert {
    /// Set by a mirror or backfill write that must land under the primary's
    /// already-assigned id on first insert rather than mint its own; `None`
    /// for a normal primary-side upsert. Ignored on a conflict update, where
    /// the existing row's id always wins.
    #[serde(default)]
    pub id: Option<Uuid>,
    pub provider_id: String,
    pub full_name: String,
    pub headline: Option<String>,
    pub location: Option<String>,
    pub languages: Vec<String>,
    pub skills: Vec<String>,
    pub years_experience: Option<f64>,
}
