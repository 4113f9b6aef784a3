//! Deterministic fit computation: skill/seniority/location/language scoring
//! into a single `(score, status, notes)` verdict. Pure function of its
//! inputs — no I/O, no clock reads beyond what the caller supplies.

use serde::{Deserialize, Serialize};

use crate::config::MatchingConfig;
use crate::domain::VerificationNotes;
use crate::error::MatchingError;

pub const RULES_VERSION: &str = "matching-v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequirements {
    pub jd_text: String,
    pub location: Option<String>,
    pub preferred_languages: Vec<String>,
    pub seniority: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateProfile {
    pub full_name: String,
    pub headline: Option<String>,
    pub location: Option<String>,
    pub languages: Vec<String>,
    pub skills: Vec<String>,
    pub years_experience: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchVerdict {
    Verified,
    Rejected,
}

impl MatchVerdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Verified => "verified",
            Self::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone)]
pub struct MatchResult {
    pub score: f64,
    pub verdict: MatchVerdict,
    pub notes: VerificationNotes,
}

/// Curated skill dictionary intersected against lowercased JD text to derive
/// the set of "required" skills for a role. A small, fixed vocabulary rather
/// than an external taxonomy — exactly the scope the matching engine needs.
const SKILL_DICTIONARY: &[&str] = &[
    "rust", "go", "golang", "python", "java", "kotlin", "typescript", "javascript", "c++", "c#",
    "postgres", "postgresql", "mysql", "sqlite", "redis", "kafka", "grpc", "graphql", "rest",
    "kubernetes", "docker", "terraform", "aws", "gcp", "azure", "linux", "react", "vue", "node",
    "tokio", "async", "distributed systems", "microservices", "ci/cd", "sql", "nosql",
];

const SENIORITY_BANDS: &[(&str, &[&str])] = &[
    ("lead", &["lead", "staff", "principal"]),
    ("senior", &["senior", "sr.", "sr "]),
    ("middle", &["mid-level", "intermediate"]),
    ("junior", &["junior", "jr.", "jr ", "entry level", "entry-level"]),
];

fn band_years_range(band: &str) -> (f64, f64) {
    match band {
        "lead" => (8.0, f64::MAX),
        "senior" => (5.0, 8.0),
        "middle" => (2.0, 5.0),
        "junior" => (0.0, 2.0),
        _ => (2.0, 5.0),
    }
}

fn infer_seniority_band(jd_text: &str) -> &'static str {
    let lowered = jd_text.to_lowercase();
    for (band, keywords) in SENIORITY_BANDS {
        if keywords.iter().any(|kw| lowered.contains(kw)) {
            return band;
        }
    }
    "middle"
}

fn required_skills(jd_text: &str) -> Vec<String> {
    let lowered = jd_text.to_lowercase();
    SKILL_DICTIONARY.iter().filter(|skill| lowered.contains(*skill)).map(|s| s.to_string()).collect()
}

fn skills_match(required: &[String], candidate_skills: &[String]) -> (f64, Vec<String>) {
    if required.is_empty() {
        return (0.6, Vec::new());
    }
    let candidate_lower: Vec<String> = candidate_skills.iter().map(|s| s.to_lowercase()).collect();
    let matched: Vec<String> = required.iter().filter(|r| candidate_lower.iter().any(|c| c == *r)).cloned().collect();
    (matched.len() as f64 / required.len() as f64, matched)
}

fn seniority_match(band: &str, years_experience: Option<f64>) -> f64 {
    let Some(years) = years_experience else { return 0.3 };
    let (lo, hi) = band_years_range(band);
    if years >= lo && years <= hi {
        1.0
    } else if years >= lo - 1.0 && years <= hi + 1.0 {
        0.7
    } else {
        0.3
    }
}

fn normalize_location_tokens(location: &str) -> Vec<String> {
    location.to_lowercase().split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()).map(|t| t.to_string()).collect()
}

fn location_match(job_location: Option<&str>, candidate_location: Option<&str>) -> f64 {
    let Some(job_loc) = job_location else { return 1.0 };
    let Some(cand_loc) = candidate_location else { return 0.4 };
    let job_lower = job_loc.to_lowercase();
    let cand_lower = cand_loc.to_lowercase();
    if job_lower.contains(&cand_lower) || cand_lower.contains(&job_lower) {
        return 1.0;
    }
    let job_tokens = normalize_location_tokens(job_loc);
    let cand_tokens = normalize_location_tokens(cand_loc);
    if job_tokens.iter().any(|t| cand_tokens.contains(t)) {
        0.8
    } else {
        0.4
    }
}

fn language_match(preferred: &[String], candidate_languages: &[String]) -> f64 {
    if preferred.is_empty() {
        return 1.0;
    }
    let candidate_lower: Vec<String> = candidate_languages.iter().map(|s| s.to_lowercase()).collect();
    if preferred.iter().any(|p| candidate_lower.contains(&p.to_lowercase())) {
        1.0
    } else {
        0.3
    }
}

/// `Verify(job, profile) -> (score, status, notes)`.
pub fn verify(job: &JobRequirements, profile: &CandidateProfile, config: &MatchingConfig) -> Result<MatchResult, MatchingError> {
    let weight_sum = config.weight_skills + config.weight_seniority + config.weight_location + config.weight_language;
    if weight_sum <= 0.0 {
        return Err(MatchingError::InvalidConfig("matching weights must sum to a positive value".into()));
    }

    if profile.full_name.trim().is_empty() {
        let mut notes = VerificationNotes::default();
        notes.reason = Some("missing_mandatory_fields".into());
        notes.missing = vec!["full_name".into()];
        notes.rules_version = RULES_VERSION.into();
        return Ok(MatchResult { score: 0.0, verdict: MatchVerdict::Rejected, notes });
    }

    let required = required_skills(&job.jd_text);
    let (skills_score, matched_skills) = skills_match(&required, &profile.skills);

    let band = job.seniority.clone().unwrap_or_else(|| infer_seniority_band(&job.jd_text).to_string());
    let seniority_score = seniority_match(&band, profile.years_experience);

    let location_score = location_match(job.location.as_deref(), profile.location.as_deref());
    let lang_score = language_match(&job.preferred_languages, &profile.languages);

    let raw_score = skills_score * config.weight_skills
        + seniority_score * config.weight_seniority
        + location_score * config.weight_location
        + lang_score * config.weight_language;
    let score = raw_score / weight_sum;

    let verdict = if score >= config.verified_threshold { MatchVerdict::Verified } else { MatchVerdict::Rejected };

    let component_scores = serde_json::json!({
        "skills_match": skills_score,
        "seniority_match": seniority_score,
        "location_match": location_score,
        "language_match": lang_score,
        "seniority_band": band,
    });

    let explanation = format!(
        "score {:.2} from skills={:.2}, seniority={:.2}, location={:.2}, language={:.2} against band '{}'",
        score, skills_score, seniority_score, location_score, lang_score, band
    );

    let notes = VerificationNotes {
        reason: None,
        missing: Vec::new(),
        required_skills: required,
        matched_skills,
        component_scores,
        explanation: Some(explanation),
        rules_version: RULES_VERSION.into(),
        extra: serde_json::json!({}),
    };

    Ok(MatchResult { score, verdict, notes })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_config() -> MatchingConfig {
        MatchingConfig::default()
    }

    #[test]
    fn empty_skill_dictionary_yields_broad_role_score() {
        let job = JobRequirements { jd_text: "We need someone great.".into(), location: None, preferred_languages: vec![], seniority: None };
        let candidate = CandidateProfile { full_name: "Alex".into(), headline: None, location: None, languages: vec![], skills: vec![], years_experience: Some(3.0) };
        let result = verify(&job, &candidate, &default_config()).unwrap();
        let component_scores = result.notes.component_scores;
        assert_eq!(component_scores["skills_match"], 0.6);
    }

    #[test]
    fn job_with_no_location_matches_fully() {
        let job = JobRequirements { jd_text: "Rust backend role".into(), location: None, preferred_languages: vec![], seniority: None };
        let candidate = CandidateProfile { full_name: "Alex".into(), headline: None, location: Some("Berlin".into()), languages: vec![], skills: vec!["rust".into()], years_experience: Some(3.0) };
        let result = verify(&job, &candidate, &default_config()).unwrap();
        assert_eq!(result.notes.component_scores["location_match"], 1.0);
    }

    #[test]
    fn missing_full_name_is_rejected_with_reason() {
        let job = JobRequirements { jd_text: "Rust backend role".into(), location: None, preferred_languages: vec![], seniority: None };
        let candidate = CandidateProfile { full_name: "  ".into(), headline: None, location: None, languages: vec![], skills: vec![], years_experience: None };
        let result = verify(&job, &candidate, &default_config()).unwrap();
        assert_eq!(result.verdict, MatchVerdict::Rejected);
        assert_eq!(result.notes.reason.as_deref(), Some("missing_mandatory_fields"));
    }

    #[test]
    fn matched_skills_raise_score_above_threshold() {
        let job = JobRequirements { jd_text: "Senior Rust and Postgres engineer".into(), location: None, preferred_languages: vec![], seniority: None };
        let candidate = CandidateProfile {
            full_name: "Jamie".into(),
            headline: None,
            location: None,
            languages: vec![],
            skills: vec!["rust".into(), "postgres".into()],
            years_experience: Some(6.0),
        };
        let result = verify(&job, &candidate, &default_config()).unwrap();
        assert_eq!(result.verdict, MatchVerdict::Verified);
        assert!(result.notes.explanation.unwrap().contains("score"));
    }
}
