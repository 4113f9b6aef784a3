use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Assessment,
    PreResumeEvent,
    OperationLog,
    MatchSnapshot,
}

impl SourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Assessment => "assessment",
            Self::PreResumeEvent => "pre_resume_event",
            Self::OperationLog => "operation_log",
            Self::MatchSnapshot => "match_snapshot",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalRole {
    Evaluative,
    Administrative,
    Governance,
}

impl Default for SignalRole {
    fn default() -> Self {
        Self::Administrative
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Detector {
    Algorithmic,
    Llm,
    Hybrid,
}

impl Default for Detector {
    fn default() -> Self {
        Self::Algorithmic
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalMeta {
    pub role: SignalRole,
    pub detector: Detector,
    pub signal_key: Option<String>,
    pub score_weight: f64,
    pub rule_id: Option<String>,
    pub rules_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateSignal {
    pub id: Uuid,
    pub job_id: Uuid,
    pub candidate_id: Uuid,
    pub source_type: SourceType,
    pub source_id: String,
    pub signal_type: String,
    pub category: String,
    pub title: String,
    pub detail: String,
    pub impact_score: f64,
    pub confidence: Option<f64>,
    pub signal_meta: SignalMeta,
    pub observed_at: DateTime<Utc>,
}
