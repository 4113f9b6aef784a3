//! Process configuration, loaded once at start from the environment.
//!
//! Every other component receives its configuration by value through its
//! constructor; nothing outside this module reads `std::env` directly.

use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadSource {
    Sqlite,
    Postgres,
}

impl ReadSource {
    fn from_str(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "postgres" | "pg" => Self::Postgres,
            _ => Self::Sqlite,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub postgres_url: Option<String>,
    pub pool_size: usize,
    pub sqlite_path: PathBuf,
}

impl DatabaseConfig {
    pub fn url(&self) -> Option<&str> {
        self.postgres_url.as_deref()
    }
}

#[derive(Debug, Clone)]
pub struct MatchingConfig {
    pub weight_skills: f64,
    pub weight_seniority: f64,
    pub weight_location: f64,
    pub weight_language: f64,
    pub verified_threshold: f64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            weight_skills: 0.4,
            weight_seniority: 0.25,
            weight_location: 0.2,
            weight_language: 0.15,
            verified_threshold: 0.65,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FsmConfig {
    pub max_followups: u32,
    pub followup_delay_hours: Vec<i64>,
    pub default_language: String,
}

impl Default for FsmConfig {
    fn default() -> Self {
        Self {
            max_followups: 3,
            followup_delay_hours: vec![48, 72, 72],
            default_language: "en".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScoringConfig {
    pub weight_sourcing_vetting: f64,
    pub weight_communication: f64,
    pub weight_interview_evaluation: f64,
    pub cap_without_cv: f64,
    pub cap_without_interview_score: f64,
    pub shortlist_min: f64,
    pub pipeline_min: f64,
    pub blocked_statuses: Vec<String>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weight_sourcing_vetting: 0.45,
            weight_communication: 0.20,
            weight_interview_evaluation: 0.35,
            cap_without_cv: 70.0,
            cap_without_interview_score: 80.0,
            shortlist_min: 80.0,
            pipeline_min: 65.0,
            blocked_statuses: vec!["not_interested".to_string(), "unreachable".to_string()],
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub daily_new_thread_cap: u32,
    pub weekly_connect_cap: u32,
    pub warmup_days: u32,
    pub warmup_connect_cap: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            daily_new_thread_cap: 20,
            weekly_connect_cap: 25,
            warmup_days: 14,
            warmup_connect_cap: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// `key -> scopes` pairs bootstrapped from the environment.
    pub api_keys: Vec<(String, Vec<String>)>,
    pub admin_keys: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub read_source: ReadSource,
    pub dual_write_strict: bool,
    pub matching: MatchingConfig,
    pub fsm: FsmConfig,
    pub scoring: ScoringConfig,
    pub dispatch: DispatchConfig,
    pub auth: AuthConfig,
    pub signal_rules_path: Option<PathBuf>,
    pub explanation_cache_ttl_secs: u64,
    pub log_format_json: bool,
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    /// Load configuration from `.env` (if present) and the process environment.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let sqlite_path = env::var("SQLITE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::data_local_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("tener-core")
                    .join("store.sqlite3")
            });

        let database = DatabaseConfig {
            postgres_url: env::var("DATABASE_URL").ok(),
            pool_size: env_usize("DATABASE_POOL_SIZE", 8),
            sqlite_path,
        };

        let read_source = env::var("READ_SOURCE")
            .map(|v| ReadSource::from_str(&v))
            .unwrap_or(ReadSource::Sqlite);

        let api_keys = env::var("AUTH_API_KEYS")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .filter(|s| !s.trim().is_empty())
                    .map(|pair| {
                        let mut parts = pair.splitn(2, ':');
                        let key = parts.next().unwrap_or("").trim().to_string();
                        let scopes = parts
                            .next()
                            .unwrap_or("*")
                            .split('|')
                            .map(|s| s.trim().to_string())
                            .filter(|s| !s.is_empty())
                            .collect::<Vec<_>>();
                        (key, scopes)
                    })
                    .collect()
            })
            .unwrap_or_default();

        let admin_keys = env::var("AUTH_ADMIN_KEYS")
            .ok()
            .map(|raw| raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();

        Self {
            database,
            read_source,
            dual_write_strict: env_bool("DUAL_WRITE_STRICT", false),
            matching: MatchingConfig::default(),
            fsm: FsmConfig::default(),
            scoring: ScoringConfig::default(),
            dispatch: DispatchConfig::default(),
            auth: AuthConfig { api_keys, admin_keys },
            signal_rules_path: env::var("SIGNAL_RULES_PATH").ok().map(PathBuf::from),
            explanation_cache_ttl_secs: env_u64("EXPLANATION_CACHE_TTL_SECS", 900),
            log_format_json: env_bool("LOG_FORMAT_JSON", false) || env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_source_defaults_to_sqlite() {
        assert_eq!(ReadSource::from_str("nonsense"), ReadSource::Sqlite);
        assert_eq!(ReadSource::from_str("POSTGRES"), ReadSource::Postgres);
    }

    #[test]
    fn scoring_defaults_match_configured_values() {
        let cfg = ScoringConfig::default();
        assert_eq!(cfg.shortlist_min, 80.0);
        assert_eq!(cfg.pipeline_min, 65.0);
    }
}
