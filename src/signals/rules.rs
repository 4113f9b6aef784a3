//! Declarative signal classification: a small ruleset of
//! `{when: {path: value-or-list}, then: {...}}` entries, matched in order,
//! first hit wins. Unmatched signals fall back to configured defaults.

use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::domain::{Detector, SignalRole};
use crate::error::SignalError;

#[derive(Debug, Clone, Copy)]
pub struct Range(pub f64, pub f64);

impl Range {
    fn clamp(self, value: f64) -> f64 {
        value.clamp(self.0.min(self.1), self.0.max(self.1))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RuleFragmentRaw {
    role: Option<String>,
    detector: Option<String>,
    signal_key: Option<String>,
    score_weight: Option<f64>,
    impact_range: Option<[f64; 2]>,
    confidence_range: Option<[f64; 2]>,
}

#[derive(Debug, Clone, Default)]
struct RuleFragment {
    role: Option<SignalRole>,
    detector: Option<Detector>,
    signal_key: Option<String>,
    score_weight: Option<f64>,
    impact_range: Option<Range>,
    confidence_range: Option<Range>,
}

impl From<RuleFragmentRaw> for RuleFragment {
    fn from(raw: RuleFragmentRaw) -> Self {
        Self {
            role: raw.role.as_deref().map(normalize_role).flatten(),
            detector: raw.detector.as_deref().map(normalize_detector).flatten(),
            signal_key: raw.signal_key,
            score_weight: raw.score_weight,
            impact_range: raw.impact_range.map(|r| Range(r[0], r[1])),
            confidence_range: raw.confidence_range.map(|r| Range(r[0], r[1])),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RuleRaw {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    when: serde_json::Map<String, Value>,
    #[serde(flatten)]
    fragment: RuleFragmentRaw,
}

#[derive(Debug, Clone)]
struct Rule {
    id: String,
    when: Vec<(String, Value)>,
    fragment: RuleFragment,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct RulesFile {
    version: Option<String>,
    defaults: Option<RuleFragmentRaw>,
    rules: Option<Vec<RuleRaw>>,
}

/// Outcome of classifying one signal against the ruleset.
#[derive(Debug, Clone)]
pub struct Classification {
    pub role: SignalRole,
    pub detector: Detector,
    pub signal_key: Option<String>,
    pub rule_id: Option<String>,
    pub rules_version: String,
    pub score_weight: f64,
    pub normalized_impact: f64,
    pub normalized_confidence: Option<f64>,
    pub effective_impact: f64,
}

pub struct SignalRulesEngine {
    rules_version: String,
    defaults: RuleFragment,
    rules: Vec<Rule>,
}

fn normalize_role(value: &str) -> Option<SignalRole> {
    match value.trim().to_lowercase().as_str() {
        "evaluative" => Some(SignalRole::Evaluative),
        "administrative" => Some(SignalRole::Administrative),
        "governance" => Some(SignalRole::Governance),
        _ => None,
    }
}

fn normalize_detector(value: &str) -> Option<Detector> {
    match value.trim().to_lowercase().as_str() {
        "algorithmic" => Some(Detector::Algorithmic),
        "llm" => Some(Detector::Llm),
        "hybrid" => Some(Detector::Hybrid),
        _ => None,
    }
}

impl SignalRulesEngine {
    /// Built-in engine with no configured rules: every signal classifies as
    /// administrative with zero weight until a rules file says otherwise.
    pub fn builtin() -> Self {
        Self { rules_version: "builtin".to_string(), defaults: RuleFragment::default(), rules: Vec::new() }
    }

    /// Loads a rules file of the documented shape. Falls back to
    /// [`SignalRulesEngine::builtin`] on any read or parse failure.
    pub fn load(path: &Path) -> Self {
        let Ok(contents) = std::fs::read_to_string(path) else { return Self::builtin() };
        match Self::parse(&contents) {
            Ok(engine) => engine,
            Err(_) => Self::builtin(),
        }
    }

    fn parse(contents: &str) -> Result<Self, SignalError> {
        let file: RulesFile = serde_json::from_str(contents).map_err(|e| SignalError::InvalidRules(e.to_string()))?;
        let rules_version = file.version.filter(|v| !v.trim().is_empty()).unwrap_or_else(|| "builtin".to_string());
        let defaults = file.defaults.map(RuleFragment::from).unwrap_or_default();
        let rules = file
            .rules
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(index, raw)| Rule {
                id: raw.id.filter(|v| !v.trim().is_empty()).unwrap_or_else(|| format!("rule_{}", index + 1)),
                when: raw.when.into_iter().collect(),
                fragment: RuleFragment::from(raw.fragment),
            })
            .collect();
        Ok(Self { rules_version, defaults, rules })
    }

    /// `signal` is the JSON shape described in the classification rules
    /// ({source_type, signal_type, category, title, detail, signal_meta:
    /// {...}, impact_score, confidence}) prior to any rule being applied.
    pub fn classify(&self, signal: &Value, raw_impact: f64, raw_confidence: Option<f64>) -> Classification {
        let mut role = self.defaults.role.unwrap_or(SignalRole::Administrative);
        let mut detector = self.defaults.detector.unwrap_or(Detector::Algorithmic);
        let mut signal_key = self.defaults.signal_key.clone();
        let mut score_weight = self.defaults.score_weight.unwrap_or(0.0).clamp(0.0, 1.0);
        let mut impact_range = self.defaults.impact_range;
        let mut confidence_range = self.defaults.confidence_range;
        let mut matched_rule_id = None;

        for rule in &self.rules {
            if rule_matches(&rule.when, signal) {
                matched_rule_id = Some(rule.id.clone());
                if let Some(r) = rule.fragment.role {
                    role = r;
                }
                if let Some(d) = rule.fragment.detector {
                    detector = d;
                }
                if rule.fragment.signal_key.is_some() {
                    signal_key = rule.fragment.signal_key.clone();
                }
                if let Some(w) = rule.fragment.score_weight {
                    score_weight = w.clamp(0.0, 1.0);
                }
                if rule.fragment.impact_range.is_some() {
                    impact_range = rule.fragment.impact_range;
                }
                if rule.fragment.confidence_range.is_some() {
                    confidence_range = rule.fragment.confidence_range;
                }
                break;
            }
        }

        let normalized_impact = impact_range.map(|r| r.clamp(raw_impact)).unwrap_or(raw_impact);
        let normalized_confidence = raw_confidence.map(|c| confidence_range.map(|r| r.clamp(c)).unwrap_or(c));
        let effective_weight = if matches!(role, SignalRole::Evaluative) { score_weight } else { 0.0 };
        let effective_impact = normalized_impact * effective_weight;

        Classification {
            role,
            detector,
            signal_key,
            rule_id: matched_rule_id,
            rules_version: self.rules_version.clone(),
            score_weight: effective_weight,
            normalized_impact,
            normalized_confidence,
            effective_impact,
        }
    }
}

fn rule_matches(when: &[(String, Value)], signal: &Value) -> bool {
    when.iter().all(|(path, expected)| {
        let actual = extract_value(signal, path);
        match expected {
            Value::Array(items) => items.iter().any(|item| value_matches(&actual, item)),
            other => value_matches(&actual, other),
        }
    })
}

fn extract_value(signal: &Value, path: &str) -> Value {
    let mut parts: Vec<&str> = path.split('.').collect();
    let mut current = if parts.first() == Some(&"meta") {
        parts.remove(0);
        signal.get("signal_meta").cloned().unwrap_or(Value::Null)
    } else {
        signal.clone()
    };
    for part in parts {
        current = current.get(part).cloned().unwrap_or(Value::Null);
    }
    current
}

fn value_matches(actual: &Value, expected: &Value) -> bool {
    match expected {
        Value::String(expected_text) => {
            let expected_lower = expected_text.trim().to_lowercase();
            if let Value::Array(items) = actual {
                return items.iter().any(|item| value_matches(item, expected));
            }
            let actual_text = match actual {
                Value::String(s) => s.to_lowercase(),
                Value::Null => String::new(),
                other => other.to_string().to_lowercase(),
            };
            if let Some(prefix) = expected_lower.strip_suffix('*') {
                actual_text.starts_with(prefix)
            } else {
                actual_text == expected_lower
            }
        }
        Value::Number(n) => actual.as_f64().map(|a| a == n.as_f64().unwrap_or(f64::NAN)).unwrap_or(false),
        Value::Bool(b) => actual.as_bool().map(|a| a == *b).unwrap_or(false),
        _ => actual == expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_engine_defaults_to_administrative() {
        let engine = SignalRulesEngine::builtin();
        let signal = serde_json::json!({"source_type": "assessment", "signal_type": "score", "category": "vetting"});
        let classification = engine.classify(&signal, 2.0, Some(0.8));
        assert!(matches!(classification.role, SignalRole::Administrative));
        assert_eq!(classification.effective_impact, 0.0);
    }

    #[test]
    fn wildcard_rule_matches_prefixed_operation() {
        let file = r#"{
            "version": "v1",
            "rules": [
                {"id": "agent_ops", "when": {"signal_type": "agent.*"}, "role": "evaluative", "score_weight": 0.5}
            ]
        }"#;
        let engine = SignalRulesEngine::parse(file).unwrap();
        let signal = serde_json::json!({"signal_type": "agent.sourcing_vetting"});
        let classification = engine.classify(&signal, 1.0, None);
        assert!(matches!(classification.role, SignalRole::Evaluative));
        assert_eq!(classification.effective_impact, 0.5);
    }
}
