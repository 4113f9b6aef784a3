use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    Auto,
    Manual,
}

impl Default for RoutingMode {
    fn default() -> Self {
        Self::Auto
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub title: String,
    pub jd_text: String,
    pub location: Option<String>,
    pub preferred_languages: Vec<String>,
    pub seniority: Option<String>,
    pub routing_mode: RoutingMode,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    /// Set by a mirror or backfill write that must land under the primary's
    /// already-assigned id rather than mint its own; `None` for a normal
    /// primary-side creation.
    #[serde(default)]
    pub id: Option<Uuid>,
    pub title: String,
    pub jd_text: String,
    pub location: Option<String>,
    pub preferred_languages: Vec<String>,
    pub seniority: Option<String>,
    pub routing_mode: RoutingMode,
}
