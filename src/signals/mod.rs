//! Signal ingestion and live candidate ranking.
//!
//! Four source kinds (assessments, pre-resume events, operation logs, match
//! snapshots) each produce a raw impact/confidence pair via a fixed rule
//! table; a declarative [`rules::SignalRulesEngine`] then classifies the
//! signal's role and weight, producing the `effective_impact` the live view
//! consumes.

pub mod rules;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::{CandidateSignal, SignalMeta, SourceType};
use rules::SignalRulesEngine;

/// Qualifying operation-log prefixes for signal ingestion; anything else is
/// ignored as noise (e.g. HTTP-layer audit logs).
const OPERATION_PREFIXES: &[&str] = &["agent.", "scheduler.", "poll.", "interview."];

pub struct AssessmentSignalInput<'a> {
    pub score_0_100: Option<f64>,
    pub status: &'a str,
}

pub fn assessment_impact(input: &AssessmentSignalInput) -> (f64, f64) {
    if let Some(score) = input.score_0_100 {
        return ((score - 50.0) / 25.0, 0.8);
    }
    let impact = match input.status {
        "qualified" | "verified" | "scored" | "resume_received" => 1.0,
        "rejected" | "failed" | "not_interested" => -1.5,
        _ => 0.0,
    };
    (impact, 0.6)
}

pub fn pre_resume_event_impact(event_type_or_status: &str) -> (f64, f64) {
    let impact = match event_type_or_status {
        "resume_shared" | "resume_received" => 2.0,
        "not_interested" => -2.0,
        "unreachable" => -1.8,
        "followup_sent" => -0.4,
        "session_started" => 0.4,
        _ => 0.0,
    };
    (impact, 0.75)
}

pub fn operation_log_impact(operation: &str, status: &str) -> Option<(f64, f64)> {
    if !OPERATION_PREFIXES.iter().any(|prefix| operation.starts_with(prefix)) {
        return None;
    }
    let impact = match status {
        "error" | "failed" => -1.2,
        "warning" | "partial" => -0.5,
        "ok" | "sent" | "connected" | "created" => 0.6,
        "skipped" => -0.2,
        _ => 0.0,
    };
    Some((impact, 0.55))
}

pub struct MatchSnapshotInput<'a> {
    pub status: &'a str,
    pub score_0_100: Option<f64>,
    pub interview_status: Option<&'a str>,
}

const MATCH_STATUS_IMPACT: &[(&str, f64)] =
    &[("verified", 0.5), ("rejected", -1.0), ("outreached", 0.2), ("resume_received", 0.8), ("needs_resume", 0.0), ("hired", 1.5)];

pub fn match_snapshot_impact(input: &MatchSnapshotInput) -> (f64, f64) {
    let mut impact = MATCH_STATUS_IMPACT.iter().find(|(s, _)| *s == input.status).map(|(_, v)| *v).unwrap_or(0.0);
    if let Some(score) = input.score_0_100 {
        impact += (score - 50.0) / 35.0;
    }
    if let Some(interview_status) = input.interview_status {
        match interview_status {
            "scored" | "completed" => impact += 0.8,
            "failed" | "expired" | "canceled" => impact -= 0.8,
            _ => {}
        }
    }
    (impact, 0.65)
}

/// Builds a [`CandidateSignal`], running it through `engine` for
/// classification. `source_id` must be the stable identifier of the
/// originating row so ingestion re-runs upsert instead of duplicating rows.
#[allow(clippy::too_many_arguments)]
pub fn build_signal(
    engine: &SignalRulesEngine,
    job_id: Uuid,
    candidate_id: Uuid,
    source_type: SourceType,
    source_id: String,
    signal_type: String,
    category: String,
    title: String,
    detail: String,
    raw_impact: f64,
    raw_confidence: Option<f64>,
    observed_at: DateTime<Utc>,
) -> CandidateSignal {
    let classification_input = serde_json::json!({
        "source_type": source_type.as_str(),
        "signal_type": signal_type,
        "category": category,
        "title": title,
        "detail": detail,
        "impact_score": raw_impact,
        "confidence": raw_confidence,
    });
    let classification = engine.classify(&classification_input, raw_impact, raw_confidence);

    CandidateSignal {
        id: Uuid::new_v4(),
        job_id,
        candidate_id,
        source_type,
        source_id,
        signal_type,
        category,
        title,
        detail,
        impact_score: classification.normalized_impact,
        confidence: classification.normalized_confidence,
        signal_meta: SignalMeta {
            role: classification.role,
            detector: classification.detector,
            signal_key: classification.signal_key,
            score_weight: classification.score_weight,
            rule_id: classification.rule_id,
            rules_version: classification.rules_version,
        },
        observed_at,
    }
}

fn effective_impact(signal: &CandidateSignal) -> f64 {
    if matches!(signal.signal_meta.role, crate::domain::SignalRole::Evaluative) {
        signal.impact_score * signal.signal_meta.score_weight
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CandidateRankEntry {
    pub candidate_id: Uuid,
    pub base_score: f64,
    pub live_score: f64,
    pub impact_points: f64,
    pub rank: usize,
    pub previous_rank: usize,
    pub rank_delta: i64,
    pub signal_count_total: usize,
    pub evaluative_signal_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignalTimelineEntry {
    pub candidate_id: Uuid,
    pub signal: CandidateSignal,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub rankings: Vec<CandidateRankEntry>,
    pub timeline: Vec<SignalTimelineEntry>,
    pub category_counts: HashMap<String, usize>,
}

const TIMELINE_LIMIT: usize = 1000;

/// `BuildJobView`: folds every candidate's signals into a live score,
/// re-ranks against the static base score, and returns a capped timeline.
pub fn build_job_view(base_scores: &HashMap<Uuid, f64>, signals: &[CandidateSignal]) -> JobView {
    let mut by_candidate: HashMap<Uuid, Vec<&CandidateSignal>> = HashMap::new();
    for signal in signals {
        by_candidate.entry(signal.candidate_id).or_default().push(signal);
    }

    let mut rankings: Vec<CandidateRankEntry> = base_scores
        .iter()
        .map(|(candidate_id, base_score)| {
            let candidate_signals = by_candidate.get(candidate_id).map(|v| v.as_slice()).unwrap_or(&[]);
            let sum_effective: f64 = candidate_signals.iter().map(|s| effective_impact(s)).sum();
            let impact_points = (sum_effective * 4.0).clamp(-30.0, 30.0);
            let live_score = (base_score + impact_points).clamp(0.0, 100.0);
            let evaluative_count = candidate_signals.iter().filter(|s| matches!(s.signal_meta.role, crate::domain::SignalRole::Evaluative)).count();
            CandidateRankEntry {
                candidate_id: *candidate_id,
                base_score: *base_score,
                live_score,
                impact_points,
                rank: 0,
                previous_rank: 0,
                rank_delta: 0,
                signal_count_total: candidate_signals.len(),
                evaluative_signal_count: evaluative_count,
            }
        })
        .collect();

    let mut previous_order: Vec<Uuid> = rankings.iter().map(|r| r.candidate_id).collect();
    previous_order.sort_by(|a, b| {
        let sa = rankings.iter().find(|r| r.candidate_id == *a).unwrap().base_score;
        let sb = rankings.iter().find(|r| r.candidate_id == *b).unwrap().base_score;
        sb.partial_cmp(&sa).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.cmp(b))
    });
    let previous_rank_of: HashMap<Uuid, usize> = previous_order.iter().enumerate().map(|(i, id)| (*id, i + 1)).collect();

    rankings.sort_by(|a, b| {
        b.live_score
            .partial_cmp(&a.live_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.base_score.partial_cmp(&a.base_score).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| a.candidate_id.cmp(&b.candidate_id))
    });

    for (index, entry) in rankings.iter_mut().enumerate() {
        entry.rank = index + 1;
        entry.previous_rank = previous_rank_of.get(&entry.candidate_id).copied().unwrap_or(entry.rank);
        entry.rank_delta = entry.previous_rank as i64 - entry.rank as i64;
    }

    let mut timeline: Vec<SignalTimelineEntry> = signals.iter().map(|s| SignalTimelineEntry { candidate_id: s.candidate_id, signal: s.clone() }).collect();
    timeline.sort_by(|a, b| b.signal.observed_at.cmp(&a.signal.observed_at));
    timeline.truncate(TIMELINE_LIMIT);

    let mut category_counts: HashMap<String, usize> = HashMap::new();
    for signal in signals {
        *category_counts.entry(signal.category.clone()).or_insert(0) += 1;
    }

    JobView { rankings, timeline, category_counts }
}

#[derive(Debug, Clone, Serialize)]
pub struct SignalCoverageReport {
    pub evaluative_count: usize,
    pub administrative_count: usize,
    pub uncovered_candidates: Vec<Uuid>,
    pub last_observed_at_by_source: HashMap<String, DateTime<Utc>>,
}

/// Diagnostic companion to [`build_job_view`]: raw counts by role and source
/// rather than a ranked view, plus which candidates (of `all_candidates`)
/// have no signal recorded at all.
pub fn signals_coverage(all_candidates: &[Uuid], signals: &[CandidateSignal]) -> SignalCoverageReport {
    let mut evaluative_count = 0;
    let mut administrative_count = 0;
    let mut last_observed_at_by_source: HashMap<String, DateTime<Utc>> = HashMap::new();
    let mut covered: std::collections::HashSet<Uuid> = std::collections::HashSet::new();

    for signal in signals {
        match signal.signal_meta.role {
            crate::domain::SignalRole::Evaluative => evaluative_count += 1,
            crate::domain::SignalRole::Administrative => administrative_count += 1,
        }
        covered.insert(signal.candidate_id);
        let key = signal.source_type.as_str().to_string();
        last_observed_at_by_source
            .entry(key)
            .and_modify(|existing| {
                if signal.observed_at > *existing {
                    *existing = signal.observed_at;
                }
            })
            .or_insert(signal.observed_at);
    }

    let uncovered_candidates = all_candidates.iter().filter(|c| !covered.contains(c)).copied().collect();

    SignalCoverageReport { evaluative_count, administrative_count, uncovered_candidates, last_observed_at_by_source }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Detector, SignalRole};

    fn signal(candidate_id: Uuid, role: SignalRole, impact: f64, weight: f64) -> CandidateSignal {
        CandidateSignal {
            id: Uuid::new_v4(),
            job_id: Uuid::new_v4(),
            candidate_id,
            source_type: SourceType::Assessment,
            source_id: "s1".to_string(),
            signal_type: "score".to_string(),
            category: "vetting".to_string(),
            title: "t".to_string(),
            detail: "d".to_string(),
            impact_score: impact,
            confidence: Some(0.8),
            signal_meta: SignalMeta { role, detector: Detector::Algorithmic, signal_key: None, score_weight: weight, rule_id: None, rules_version: "builtin".to_string() },
            observed_at: Utc::now(),
        }
    }

    #[test]
    fn administrative_signal_is_ignored_in_live_score() {
        let candidate_id = Uuid::new_v4();
        let signals = vec![signal(candidate_id, SignalRole::Administrative, 2.0, 1.0), signal(candidate_id, SignalRole::Evaluative, 1.5, 1.0)];
        let mut base_scores = HashMap::new();
        base_scores.insert(candidate_id, 80.0);

        let view = build_job_view(&base_scores, &signals);
        let entry = &view.rankings[0];
        assert_eq!(entry.live_score, 86.0);
        assert_eq!(entry.signal_count_total, 2);
        assert_eq!(entry.evaluative_signal_count, 1);
    }

    #[test]
    fn assessment_impact_uses_score_when_present() {
        let (impact, confidence) = assessment_impact(&AssessmentSignalInput { score_0_100: Some(75.0), status: "verified" });
        assert_eq!(impact, 1.0);
        assert_eq!(confidence, 0.8);
    }

    #[test]
    fn operation_log_impact_filters_unqualified_operations() {
        assert!(operation_log_impact("http.request", "ok").is_none());
        assert_eq!(operation_log_impact("agent.sourcing_vetting", "ok"), Some((0.6, 0.55)));
    }

    #[test]
    fn coverage_report_flags_uncovered_candidates() {
        let covered = Uuid::new_v4();
        let uncovered = Uuid::new_v4();
        let signals = vec![signal(covered, SignalRole::Evaluative, 1.0, 1.0), signal(covered, SignalRole::Administrative, 0.5, 1.0)];

        let report = signals_coverage(&[covered, uncovered], &signals);
        assert_eq!(report.evaluative_count, 1);
        assert_eq!(report.administrative_count, 1);
        assert_eq!(report.uncovered_candidates, vec![uncovered]);
        assert!(report.last_observed_at_by_source.contains_key("assessment"));
    }
}
