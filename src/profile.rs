//! Candidate profile aggregation: folds matches, assessments, pre-resume
//! sessions/events, operation logs, and signals for one (job, candidate)
//! pair into a single view, plus an LLM-backed fit explanation and culture
//! fit summary. Both LLM calls are cached by a content-derived key and fall
//! back to a deterministic rendering when the responder is absent or fails
//! — a profile view must never 500 because an adjunct is down.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha1::{Digest, Sha1};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::Config;
use crate::domain::{AgentAssessment, CandidateSignal, Match};
use crate::error::CoreError;
use crate::providers::{LlmResponder, ReplyMode};
use crate::repository::Repository;
use crate::scoring::{self, AgentInput, ScoringInputs};

#[derive(Debug, Clone, Serialize)]
pub struct CandidateProfileView {
    pub candidate_id: Uuid,
    pub job_id: Uuid,
    pub match_score: f64,
    pub match_status: String,
    pub overall_score: Option<f64>,
    pub overall_status: String,
    pub block_reason: Option<String>,
    pub inputs_present: Vec<String>,
    pub assessments: Vec<AgentAssessment>,
    pub signals: Vec<CandidateSignal>,
    pub fit_explanation: String,
    pub culture_fit: Option<CultureFit>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CultureFit {
    pub summary: String,
    pub score: Option<f64>,
}

/// Caches LLM-derived text by a content hash so repeat views of an
/// unchanged profile don't re-invoke the responder. Entries expire after
/// `ttl_secs` rather than being invalidated explicitly — the content hash
/// already changes whenever the underlying data does.
pub struct ExplanationCache {
    entries: Mutex<HashMap<String, (String, DateTime<Utc>)>>,
    ttl_secs: u64,
}

impl ExplanationCache {
    pub fn new(ttl_secs: u64) -> Self {
        Self { entries: Mutex::new(HashMap::new()), ttl_secs }
    }

    async fn get(&self, key: &str, now: DateTime<Utc>) -> Option<String> {
        let entries = self.entries.lock().await;
        let (value, cached_at) = entries.get(key)?;
        if (now - *cached_at).num_seconds() as u64 > self.ttl_secs {
            return None;
        }
        Some(value.clone())
    }

    async fn put(&self, key: String, value: String, now: DateTime<Utc>) {
        self.entries.lock().await.insert(key, (value, now));
    }
}

fn cache_key(parts: &[&str]) -> String {
    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(b"\u{1}");
    }
    format!("{:x}", hasher.finalize())
}

fn agent_input(assessments: &[AgentAssessment], agent_key: &str) -> Option<AgentInput> {
    assessments.iter().filter(|a| a.agent_key == agent_key).max_by_key(|a| a.created_at).map(|a| AgentInput { latest_score: a.score, latest_status: a.status.clone() })
}

fn communication_stage(assessments: &[AgentAssessment]) -> Option<String> {
    assessments
        .iter()
        .filter(|a| a.agent_key == crate::domain::AGENT_COMMUNICATION)
        .max_by_key(|a| a.created_at)
        .and_then(|a| a.details.get("stage").and_then(|v| v.as_str()).map(|s| s.to_string()))
}

fn deterministic_explanation(m: &Match, inputs_present: &[String]) -> String {
    let skills = if m.verification_notes.matched_skills.is_empty() { "no listed skills overlap".to_string() } else { m.verification_notes.matched_skills.join(", ") };
    format!("Match score {:.0}/100 ({}). Matched skills: {}. Agent inputs so far: {}.", m.score * 100.0, m.status, skills, if inputs_present.is_empty() { "none".to_string() } else { inputs_present.join(", ") })
}

fn deterministic_culture_fit(notes_explanation: Option<&str>) -> CultureFit {
    CultureFit { summary: notes_explanation.map(|s| s.to_string()).unwrap_or_else(|| "No culture signal available yet.".to_string()), score: None }
}

/// Builds the aggregated view for one (job, candidate) pair, calling the
/// responder for a fit explanation and a culture fit summary when one is
/// configured. `cache` is shared across requests to avoid re-deriving text
/// for a profile that hasn't changed.
pub async fn build_candidate_profile(
    repo: &dyn Repository,
    responder: Option<&dyn LlmResponder>,
    cache: &ExplanationCache,
    config: &Config,
    job_id: Uuid,
    candidate_id: Uuid,
    now: DateTime<Utc>,
) -> Result<CandidateProfileView, CoreError> {
    let m = repo.get_match(job_id, candidate_id).await?.ok_or_else(|| CoreError::NotFound(format!("no match for job {job_id} candidate {candidate_id}")))?;
    let assessments = repo.latest_assessments_for_candidate(job_id, candidate_id).await?;
    let signals = repo.list_signals_for_job(job_id).await?.into_iter().filter(|s| s.candidate_id == candidate_id).collect::<Vec<_>>();

    let scoring_inputs = ScoringInputs {
        candidate_status: m.status.clone(),
        sourcing_vetting: agent_input(&assessments, crate::domain::AGENT_SOURCING_VETTING),
        communication: agent_input(&assessments, crate::domain::AGENT_COMMUNICATION),
        communication_stage: communication_stage(&assessments),
        interview_evaluation: agent_input(&assessments, crate::domain::AGENT_INTERVIEW_EVALUATION),
    };
    let scored = scoring::score(&scoring_inputs, &config.scoring)?;

    let signal_summaries: Vec<String> = signals.iter().take(20).map(|s| format!("{}:{}:{:.2}", s.category, s.signal_type, s.impact_score)).collect();
    let explanation_key = cache_key(&[
        &candidate_id.to_string(),
        &job_id.to_string(),
        &scored.overall_score.map(|s| s.to_string()).unwrap_or_default(),
        &serde_json::to_string(&m.verification_notes).unwrap_or_default(),
        &signal_summaries.join(","),
    ]);

    let fit_explanation = match cache.get(&explanation_key, now).await {
        Some(cached) => cached,
        None => {
            let rendered = render_explanation(responder, &m, &scored.inputs_present, &signal_summaries).await;
            cache.put(explanation_key, rendered.clone(), now).await;
            rendered
        }
    };

    let culture_fit_key = cache_key(&[&candidate_id.to_string(), &job_id.to_string(), "culture", &m.verification_notes.explanation.clone().unwrap_or_default()]);
    let culture_fit = match cache.get(&culture_fit_key, now).await {
        Some(cached) => Some(CultureFit { summary: cached, score: agent_input(&assessments, crate::domain::AGENT_CULTURE_ANALYST).and_then(|a| a.latest_score) }),
        None => {
            let fit = render_culture_fit(responder, &m, &assessments).await;
            cache.put(culture_fit_key, fit.summary.clone(), now).await;
            Some(fit)
        }
    };

    Ok(CandidateProfileView {
        candidate_id,
        job_id,
        match_score: m.score,
        match_status: m.status.clone(),
        overall_score: scored.overall_score,
        overall_status: scored.overall_status,
        block_reason: scored.block_reason,
        inputs_present: scored.inputs_present,
        assessments,
        signals,
        fit_explanation,
        culture_fit,
    })
}

async fn render_explanation(responder: Option<&dyn LlmResponder>, m: &Match, inputs_present: &[String], signal_summaries: &[String]) -> String {
    let fallback = deterministic_explanation(m, inputs_present);
    let Some(responder) = responder else { return fallback };

    let candidate_context = format!("match_status={} matched_skills={}", m.status, m.verification_notes.matched_skills.join(","));
    let job_context = format!("inputs_present={} signals={}", inputs_present.join(","), signal_summaries.join(";"));

    match responder
        .generate_candidate_reply(ReplyMode::Faq, "Explain this candidate's fit for the role in two sentences.", &job_context, &candidate_context, "", &[], &fallback, "en", serde_json::json!({}))
        .await
    {
        Ok(text) if !text.trim().is_empty() => text,
        _ => fallback,
    }
}

async fn render_culture_fit(responder: Option<&dyn LlmResponder>, m: &Match, assessments: &[AgentAssessment]) -> CultureFit {
    let fallback = deterministic_culture_fit(m.verification_notes.explanation.as_deref());
    let Some(responder) = responder else { return fallback };

    let score = agent_input(assessments, crate::domain::AGENT_CULTURE_ANALYST).and_then(|a| a.latest_score);
    let candidate_context = m.verification_notes.explanation.clone().unwrap_or_default();

    match responder
        .generate_candidate_reply(ReplyMode::Faq, "Summarize this candidate's likely culture fit in one sentence.", "", &candidate_context, "", &[], &fallback.summary, "en", serde_json::json!({}))
        .await
    {
        Ok(text) if !text.trim().is_empty() => CultureFit { summary: text, score },
        _ => CultureFit { score, ..fallback },
    }
}

/// Convenience wrapper bundling the `Arc`-held collaborators, handed to
/// orchestrator handlers so they don't juggle four separate references.
pub struct ProfileService {
    pub repo: Arc<dyn Repository>,
    pub responder: Option<Arc<dyn LlmResponder>>,
    pub cache: Arc<ExplanationCache>,
    pub config: Arc<Config>,
}

impl ProfileService {
    pub async fn get(&self, job_id: Uuid, candidate_id: Uuid, now: DateTime<Utc>) -> Result<CandidateProfileView, CoreError> {
        build_candidate_profile(self.repo.as_ref(), self.responder.as_deref(), &self.cache, &self.config, job_id, candidate_id, now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_is_stable_for_same_inputs() {
        let a = cache_key(&["x", "y"]);
        let b = cache_key(&["x", "y"]);
        assert_eq!(a, b);
    }

    #[test]
    fn cache_key_differs_when_inputs_differ() {
        let a = cache_key(&["x", "y"]);
        let b = cache_key(&["x", "z"]);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn cache_expires_entries_past_ttl() {
        let cache = ExplanationCache::new(0);
        let now = Utc::now();
        cache.put("k".to_string(), "v".to_string(), now).await;
        assert!(cache.get("k", now + chrono::Duration::seconds(1)).await.is_none());
    }
}
