//! Candidate scoring policy: a weighted blend of the three evaluation
//! agents' latest output into one overall score and pipeline status.
//! Pure function of its inputs, same shape as [`crate::matching`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::ScoringConfig;
use crate::error::ScoringError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScoringAgent {
    SourcingVetting,
    Communication,
    InterviewEvaluation,
}

#[derive(Debug, Clone)]
pub struct AgentInput {
    pub latest_score: Option<f64>,
    pub latest_status: String,
}

#[derive(Debug, Clone, Default)]
pub struct ScoringInputs {
    /// The candidate's current match status, e.g. `"verified"` or
    /// `"not_interested"` — gates `blocked` independently of any agent.
    pub candidate_status: String,
    pub sourcing_vetting: Option<AgentInput>,
    /// Only counted when `stage` is `"dialogue"` — the communication agent
    /// also reports from earlier stages, whose scores don't reflect a
    /// finished conversation yet.
    pub communication: Option<AgentInput>,
    pub communication_stage: Option<String>,
    pub interview_evaluation: Option<AgentInput>,
}

/// Match statuses for which a CV is considered already in hand, mirroring
/// the gate the sourcing/interview pipeline statuses imply on their own,
/// without requiring a `sourcing_vetting` agent run to have landed.
const CV_RECEIVED_STATUSES: &[&str] = &["cv_received", "interview_invited", "interview_in_progress", "interview_completed", "interview_scored"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverallStatus {
    Blocked,
    Review,
    Pipeline,
    Shortlist,
}

impl OverallStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Blocked => "blocked",
            Self::Review => "review",
            Self::Pipeline => "pipeline",
            Self::Shortlist => "shortlist",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringResult {
    pub overall_score: Option<f64>,
    pub overall_status: String,
    pub block_reason: Option<String>,
    pub inputs_present: Vec<String>,
}

fn present_agents(inputs: &ScoringInputs) -> HashMap<&'static str, &AgentInput> {
    let mut present = HashMap::new();
    if let Some(a) = &inputs.sourcing_vetting {
        present.insert("sourcing_vetting", a);
    }
    let communication_counts = inputs.communication_stage.as_deref() == Some("dialogue");
    if communication_counts {
        if let Some(a) = &inputs.communication {
            present.insert("communication", a);
        }
    }
    if let Some(a) = &inputs.interview_evaluation {
        present.insert("interview_evaluation", a);
    }
    present
}

fn blocked_reason(inputs: &ScoringInputs, config: &ScoringConfig) -> Option<String> {
    let candidate_status = inputs.candidate_status.trim().to_lowercase();
    if config.blocked_statuses.iter().any(|s| s == &candidate_status) {
        return Some(format!("candidate_status:{candidate_status}"));
    }
    let communication_status = inputs.communication.as_ref().map(|a| a.latest_status.trim().to_lowercase()).unwrap_or_default();
    if config.blocked_statuses.iter().any(|s| s == &communication_status) {
        return Some(format!("communication_status:{communication_status}"));
    }
    None
}

/// Computes `overall_score` and `overall_status` from the three agents'
/// latest output, applying the blocked-status gate and score caps in order.
pub fn score(inputs: &ScoringInputs, config: &ScoringConfig) -> Result<ScoringResult, ScoringError> {
    let weight_sum = config.weight_sourcing_vetting + config.weight_communication + config.weight_interview_evaluation;
    if weight_sum <= 0.0 {
        return Err(ScoringError::InvalidConfig("scoring weights must sum to a positive value".into()));
    }

    if let Some(reason) = blocked_reason(inputs, config) {
        return Ok(ScoringResult { overall_score: Some(0.0), overall_status: OverallStatus::Blocked.as_str().to_string(), block_reason: Some(reason), inputs_present: Vec::new() });
    }

    let present = present_agents(inputs);
    let mut inputs_present: Vec<String> = present.keys().map(|k| k.to_string()).collect();
    inputs_present.sort();

    if present.is_empty() {
        return Ok(ScoringResult { overall_score: None, overall_status: OverallStatus::Review.as_str().to_string(), block_reason: None, inputs_present });
    }

    let weights: HashMap<&'static str, f64> =
        [("sourcing_vetting", config.weight_sourcing_vetting), ("communication", config.weight_communication), ("interview_evaluation", config.weight_interview_evaluation)]
            .into_iter()
            .collect();

    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    for (key, agent) in &present {
        let Some(agent_score) = agent.latest_score else { continue };
        let w = weights.get(key).copied().unwrap_or(0.0);
        weighted_sum += agent_score * w;
        weight_total += w;
    }

    let all_three_present = present.contains_key("sourcing_vetting") && present.contains_key("communication") && present.contains_key("interview_evaluation");

    let mut overall_score = if weight_total > 0.0 { Some(weighted_sum / weight_total) } else { None };

    if !all_three_present {
        if let Some(s) = overall_score {
            let candidate_status = inputs.candidate_status.trim().to_lowercase();
            let communication_status = inputs.communication.as_ref().map(|a| a.latest_status.trim().to_lowercase()).unwrap_or_default();
            let cv_received = CV_RECEIVED_STATUSES.contains(&candidate_status.as_str()) || communication_status == "cv_received";
            let has_interview_score = present.get("interview_evaluation").map(|a| a.latest_score.is_some()).unwrap_or(false);
            let mut capped = s;
            if !cv_received && capped > config.cap_without_cv {
                capped = config.cap_without_cv;
            }
            if !has_interview_score && capped > config.cap_without_interview_score {
                capped = config.cap_without_interview_score;
            }
            overall_score = Some(capped);
        }
    }

    let status = if !all_three_present {
        OverallStatus::Review
    } else {
        match overall_score {
            Some(s) if s >= config.shortlist_min => OverallStatus::Shortlist,
            Some(s) if s >= config.pipeline_min => OverallStatus::Pipeline,
            _ => OverallStatus::Review,
        }
    };

    let reported_score = if all_three_present { overall_score } else { None };

    Ok(ScoringResult { overall_score: reported_score, overall_status: status.as_str().to_string(), block_reason: None, inputs_present })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ScoringConfig {
        ScoringConfig::default()
    }

    #[test]
    fn missing_interview_score_caps_and_reviews() {
        let inputs = ScoringInputs {
            candidate_status: "verified".into(),
            sourcing_vetting: Some(AgentInput { latest_score: Some(90.0), latest_status: "verified".into() }),
            communication: Some(AgentInput { latest_score: Some(85.0), latest_status: "engaged".into() }),
            communication_stage: Some("dialogue".into()),
            interview_evaluation: None,
        };
        let result = score(&inputs, &config()).unwrap();
        assert_eq!(result.overall_status, "review");
        assert!(result.overall_score.is_none());
    }

    #[test]
    fn blocked_candidate_status_zeroes_score() {
        let inputs = ScoringInputs {
            candidate_status: "not_interested".into(),
            sourcing_vetting: Some(AgentInput { latest_score: Some(90.0), latest_status: "verified".into() }),
            communication: Some(AgentInput { latest_score: Some(85.0), latest_status: "engaged".into() }),
            communication_stage: Some("dialogue".into()),
            interview_evaluation: None,
        };
        let result = score(&inputs, &config()).unwrap();
        assert_eq!(result.overall_status, "blocked");
        assert_eq!(result.overall_score, Some(0.0));
        assert_eq!(result.block_reason.as_deref(), Some("candidate_status:not_interested"));
    }

    #[test]
    fn blocked_communication_status_zeroes_score_even_outside_dialogue_stage() {
        let inputs = ScoringInputs {
            candidate_status: "verified".into(),
            sourcing_vetting: Some(AgentInput { latest_score: Some(90.0), latest_status: "verified".into() }),
            communication: Some(AgentInput { latest_score: Some(10.0), latest_status: "unreachable".into() }),
            communication_stage: Some("pre_resume".into()),
            interview_evaluation: None,
        };
        let result = score(&inputs, &config()).unwrap();
        assert_eq!(result.overall_status, "blocked");
        assert_eq!(result.overall_score, Some(0.0));
        assert_eq!(result.block_reason.as_deref(), Some("communication_status:unreachable"));
    }

    #[test]
    fn sourcing_vetting_or_interview_agent_status_alone_does_not_block() {
        let inputs = ScoringInputs {
            candidate_status: "verified".into(),
            sourcing_vetting: Some(AgentInput { latest_score: Some(90.0), latest_status: "unreachable".into() }),
            communication: None,
            communication_stage: None,
            interview_evaluation: Some(AgentInput { latest_score: Some(80.0), latest_status: "not_interested".into() }),
        };
        let result = score(&inputs, &config()).unwrap();
        assert_ne!(result.overall_status, "blocked");
    }

    #[test]
    fn cv_received_status_lifts_the_cap_without_sourcing_vetting_agent() {
        let inputs = ScoringInputs {
            candidate_status: "interview_invited".into(),
            sourcing_vetting: None,
            communication: Some(AgentInput { latest_score: Some(85.0), latest_status: "engaged".into() }),
            communication_stage: Some("dialogue".into()),
            interview_evaluation: None,
        };
        let result = score(&inputs, &config()).unwrap();
        assert!(result.overall_score.unwrap() > config().cap_without_cv);
    }

    #[test]
    fn no_cv_evidence_caps_the_score() {
        let inputs = ScoringInputs {
            candidate_status: "new".into(),
            sourcing_vetting: None,
            communication: Some(AgentInput { latest_score: Some(95.0), latest_status: "engaged".into() }),
            communication_stage: Some("dialogue".into()),
            interview_evaluation: None,
        };
        let result = score(&inputs, &config()).unwrap();
        assert_eq!(result.overall_score, Some(config().cap_without_cv));
    }

    #[test]
    fn communication_ignored_outside_dialogue_stage() {
        let inputs = ScoringInputs {
            candidate_status: "verified".into(),
            sourcing_vetting: Some(AgentInput { latest_score: Some(90.0), latest_status: "verified".into() }),
            communication: Some(AgentInput { latest_score: Some(95.0), latest_status: "engaged".into() }),
            communication_stage: Some("pre_resume".into()),
            interview_evaluation: Some(AgentInput { latest_score: Some(88.0), latest_status: "completed".into() }),
        };
        let result = score(&inputs, &config()).unwrap();
        assert!(!result.inputs_present.contains(&"communication".to_string()));
    }

    #[test]
    fn all_three_present_yields_reported_score_and_shortlist() {
        let inputs = ScoringInputs {
            candidate_status: "verified".into(),
            sourcing_vetting: Some(AgentInput { latest_score: Some(90.0), latest_status: "verified".into() }),
            communication: Some(AgentInput { latest_score: Some(85.0), latest_status: "engaged".into() }),
            communication_stage: Some("dialogue".into()),
            interview_evaluation: Some(AgentInput { latest_score: Some(88.0), latest_status: "completed".into() }),
        };
        let result = score(&inputs, &config()).unwrap();
        assert!(result.overall_score.is_some());
        assert_eq!(result.overall_status, "shortlist");
    }
}
