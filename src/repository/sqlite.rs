//! Embedded, file-backed repository.
//!
//! `rusqlite` (bundled) driven off the blocking pool via `spawn_blocking`,
//! since the rest of this trait is async. Same entity shapes as the Postgres
//! backend; SQLite has no native JSON type so open-ended fields are stored as
//! serialized TEXT and parsed back out at the boundary.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::domain::*;
use crate::error::RepositoryError;

use super::{JobFilter, Repository, Result};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    jd_text TEXT NOT NULL,
    location TEXT,
    preferred_languages TEXT NOT NULL DEFAULT '[]',
    seniority TEXT,
    routing_mode TEXT NOT NULL DEFAULT 'auto',
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS candidates (
    id TEXT PRIMARY KEY,
    provider_id TEXT NOT NULL UNIQUE,
    full_name TEXT NOT NULL,
    headline TEXT,
    location TEXT,
    languages TEXT NOT NULL DEFAULT '[]',
    skills TEXT NOT NULL DEFAULT '[]',
    years_experience REAL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS matches (
    job_id TEXT NOT NULL,
    candidate_id TEXT NOT NULL,
    score REAL NOT NULL,
    status TEXT NOT NULL,
    verification_notes TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (job_id, candidate_id)
);

CREATE TABLE IF NOT EXISTS conversations (
    id TEXT PRIMARY KEY,
    job_id TEXT NOT NULL,
    candidate_id TEXT NOT NULL,
    channel TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    external_chat_id TEXT UNIQUE,
    assigned_account_id TEXT,
    last_message_at TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL,
    direction TEXT NOT NULL,
    language TEXT,
    content TEXT NOT NULL,
    meta TEXT NOT NULL DEFAULT '{}',
    seq INTEGER NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_conversation_seq ON messages(conversation_id, seq);

CREATE TABLE IF NOT EXISTS pre_resume_sessions (
    id TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL UNIQUE,
    job_id TEXT NOT NULL,
    candidate_id TEXT NOT NULL,
    state TEXT NOT NULL,
    status TEXT NOT NULL,
    next_followup_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS pre_resume_events (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    intent TEXT,
    inbound_text TEXT,
    outbound_text TEXT,
    resulting_status TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS agent_assessments (
    id TEXT PRIMARY KEY,
    job_id TEXT NOT NULL,
    candidate_id TEXT NOT NULL,
    agent_key TEXT NOT NULL,
    stage_key TEXT NOT NULL,
    score REAL,
    status TEXT NOT NULL,
    reason TEXT,
    details TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    UNIQUE (job_id, candidate_id, agent_key, stage_key)
);

CREATE TABLE IF NOT EXISTS outbound_actions (
    id TEXT PRIMARY KEY,
    job_id TEXT NOT NULL,
    candidate_id TEXT NOT NULL,
    conversation_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    payload TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    last_error TEXT,
    assigned_account_id TEXT,
    attempts INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_outbound_actions_pending ON outbound_actions(status, job_id);

CREATE TABLE IF NOT EXISTS sender_accounts (
    id TEXT PRIMARY KEY,
    provider_account_id TEXT NOT NULL UNIQUE,
    status TEXT NOT NULL DEFAULT 'pending',
    connected_at TEXT,
    last_synced_at TEXT,
    provider_user_id TEXT,
    label TEXT
);

CREATE TABLE IF NOT EXISTS account_day_counters (
    account_id TEXT NOT NULL,
    day TEXT NOT NULL,
    new_threads_sent INTEGER NOT NULL DEFAULT 0,
    connect_sent INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (account_id, day)
);

CREATE TABLE IF NOT EXISTS account_week_counters (
    account_id TEXT NOT NULL,
    week_start TEXT NOT NULL,
    new_threads_sent INTEGER NOT NULL DEFAULT 0,
    connect_sent INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (account_id, week_start)
);

CREATE TABLE IF NOT EXISTS job_account_assignments (
    job_id TEXT NOT NULL,
    account_id TEXT NOT NULL,
    PRIMARY KEY (job_id, account_id)
);

CREATE TABLE IF NOT EXISTS operation_logs (
    id TEXT PRIMARY KEY,
    operation TEXT NOT NULL,
    status TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    details TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS candidate_signals (
    id TEXT PRIMARY KEY,
    job_id TEXT NOT NULL,
    candidate_id TEXT NOT NULL,
    source_type TEXT NOT NULL,
    source_id TEXT NOT NULL,
    signal_type TEXT NOT NULL,
    category TEXT NOT NULL,
    title TEXT NOT NULL,
    detail TEXT NOT NULL,
    impact_score REAL NOT NULL,
    confidence REAL,
    signal_meta TEXT NOT NULL DEFAULT '{}',
    observed_at TEXT NOT NULL,
    UNIQUE (job_id, candidate_id, source_type, source_id)
);

CREATE TABLE IF NOT EXISTS job_step_progress (
    job_id TEXT NOT NULL,
    step TEXT NOT NULL,
    status TEXT NOT NULL,
    output TEXT NOT NULL DEFAULT '{}',
    updated_at TEXT NOT NULL,
    PRIMARY KEY (job_id, step)
);

CREATE TABLE IF NOT EXISTS idempotency_records (
    route TEXT NOT NULL,
    key TEXT NOT NULL,
    payload_hash TEXT NOT NULL,
    status_code INTEGER NOT NULL,
    response TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (route, key)
);
"#;

pub struct SqliteRepository {
    conn: Arc<Mutex<Connection>>,
}

fn map_db_err(e: rusqlite::Error) -> RepositoryError {
    RepositoryError::Query(e.to_string())
}

fn map_ser_err(e: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Serialization(e.to_string())
}

fn now_str() -> String {
    Utc::now().to_rfc3339()
}

fn parse_dt(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).map(|d| d.with_timezone(&Utc)).map_err(map_ser_err)
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(map_ser_err)
}

impl SqliteRepository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RepositoryError::Pool(e.to_string()))?;
        }
        let conn = Connection::open(path).map_err(map_db_err)?;
        conn.execute_batch(SCHEMA_SQL).map_err(map_db_err)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(map_db_err)?;
        conn.execute_batch(SCHEMA_SQL).map_err(map_db_err)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().expect("sqlite connection mutex poisoned");
            f(&guard)
        })
        .await
        .map_err(|e| RepositoryError::Query(format!("blocking task panicked: {e}")))?
    }

    fn job_from_row(row: &Row) -> Result<Job> {
        Ok(Job {
            id: parse_uuid(&row.get::<_, String>("id")?)?,
            title: row.get("title")?,
            jd_text: row.get("jd_text")?,
            location: row.get("location")?,
            preferred_languages: serde_json::from_str(&row.get::<_, String>("preferred_languages")?).map_err(map_ser_err)?,
            seniority: row.get("seniority")?,
            routing_mode: match row.get::<_, String>("routing_mode")?.as_str() {
                "manual" => RoutingMode::Manual,
                _ => RoutingMode::Auto,
            },
            created_at: parse_dt(&row.get::<_, String>("created_at")?)?,
        })
    }

    fn candidate_from_row(row: &Row) -> Result<Candidate> {
        Ok(Candidate {
            id: parse_uuid(&row.get::<_, String>("id")?)?,
            provider_id: row.get("provider_id")?,
            full_name: row.get("full_name")?,
            headline: row.get("headline")?,
            location: row.get("location")?,
            languages: serde_json::from_str(&row.get::<_, String>("languages")?).map_err(map_ser_err)?,
            skills: serde_json::from_str(&row.get::<_, String>("skills")?).map_err(map_ser_err)?,
            years_experience: row.get("years_experience")?,
            created_at: parse_dt(&row.get::<_, String>("created_at")?)?,
            updated_at: parse_dt(&row.get::<_, String>("updated_at")?)?,
        })
    }

    fn match_from_row(row: &Row) -> Result<Match> {
        Ok(Match {
            id: Uuid::new_v4(),
            job_id: parse_uuid(&row.get::<_, String>("job_id")?)?,
            candidate_id: parse_uuid(&row.get::<_, String>("candidate_id")?)?,
            score: row.get("score")?,
            status: row.get("status")?,
            verification_notes: serde_json::from_str(&row.get::<_, String>("verification_notes")?).map_err(map_ser_err)?,
            created_at: parse_dt(&row.get::<_, String>("created_at")?)?,
            updated_at: parse_dt(&row.get::<_, String>("updated_at")?)?,
        })
    }

    fn conversation_from_row(row: &Row) -> Result<Conversation> {
        let status: String = row.get("status")?;
        Ok(Conversation {
            id: parse_uuid(&row.get::<_, String>("id")?)?,
            job_id: parse_uuid(&row.get::<_, String>("job_id")?)?,
            candidate_id: parse_uuid(&row.get::<_, String>("candidate_id")?)?,
            channel: row.get("channel")?,
            status: match status.as_str() {
                "waiting_connection" => ConversationStatus::WaitingConnection,
                "closed" => ConversationStatus::Closed,
                _ => ConversationStatus::Active,
            },
            external_chat_id: row.get("external_chat_id")?,
            assigned_account_id: row.get::<_, Option<String>>("assigned_account_id")?.map(|s| parse_uuid(&s)).transpose()?,
            last_message_at: row.get::<_, Option<String>>("last_message_at")?.map(|s| parse_dt(&s)).transpose()?,
            created_at: parse_dt(&row.get::<_, String>("created_at")?)?,
        })
    }

    fn message_from_row(row: &Row) -> Result<Message> {
        let direction: String = row.get("direction")?;
        Ok(Message {
            id: parse_uuid(&row.get::<_, String>("id")?)?,
            conversation_id: parse_uuid(&row.get::<_, String>("conversation_id")?)?,
            direction: if direction == "outbound" { Direction::Outbound } else { Direction::Inbound },
            language: row.get("language")?,
            content: row.get("content")?,
            meta: serde_json::from_str(&row.get::<_, String>("meta")?).map_err(map_ser_err)?,
            created_at: parse_dt(&row.get::<_, String>("created_at")?)?,
            seq: row.get("seq")?,
        })
    }

    fn pre_resume_session_from_row(row: &Row) -> Result<PreResumeSession> {
        let state: String = row.get("state")?;
        serde_json::from_str(&state).map_err(map_ser_err)
    }

    fn assessment_from_row(row: &Row) -> Result<AgentAssessment> {
        let details: String = row.get("details")?;
        Ok(AgentAssessment {
            id: parse_uuid(&row.get::<_, String>("id")?)?,
            job_id: parse_uuid(&row.get::<_, String>("job_id")?)?,
            candidate_id: parse_uuid(&row.get::<_, String>("candidate_id")?)?,
            agent_key: row.get("agent_key")?,
            stage_key: row.get("stage_key")?,
            score: row.get("score")?,
            status: row.get("status")?,
            reason: row.get("reason")?,
            details: serde_json::from_str(&details).map_err(map_ser_err)?,
            created_at: parse_dt(&row.get::<_, String>("created_at")?)?,
        })
    }

    fn outbound_action_from_row(row: &Row) -> Result<OutboundAction> {
        let kind: String = row.get("kind")?;
        let status: String = row.get("status")?;
        let payload: String = row.get("payload")?;
        Ok(OutboundAction {
            id: parse_uuid(&row.get::<_, String>("id")?)?,
            job_id: parse_uuid(&row.get::<_, String>("job_id")?)?,
            candidate_id: parse_uuid(&row.get::<_, String>("candidate_id")?)?,
            conversation_id: parse_uuid(&row.get::<_, String>("conversation_id")?)?,
            kind: if kind == "connect_request" { OutboundKind::ConnectRequest } else { OutboundKind::Message },
            payload: serde_json::from_str(&payload).map_err(map_ser_err)?,
            status: match status.as_str() {
                "pending_connection" => OutboundStatus::PendingConnection,
                "completed" => OutboundStatus::Completed,
                "deferred" => OutboundStatus::Deferred,
                "failed" => OutboundStatus::Failed,
                _ => OutboundStatus::Pending,
            },
            last_error: row.get("last_error")?,
            assigned_account_id: row.get::<_, Option<String>>("assigned_account_id")?.map(|s| parse_uuid(&s)).transpose()?,
            attempts: row.get::<_, i64>("attempts")? as u32,
            created_at: parse_dt(&row.get::<_, String>("created_at")?)?,
            updated_at: parse_dt(&row.get::<_, String>("updated_at")?)?,
        })
    }

    fn account_from_row(row: &Row) -> Result<SenderAccount> {
        let status: String = row.get("status")?;
        Ok(SenderAccount {
            id: parse_uuid(&row.get::<_, String>("id")?)?,
            provider_account_id: row.get("provider_account_id")?,
            status: match status.as_str() {
                "connected" => AccountStatus::Connected,
                "error" => AccountStatus::Error,
                "disconnected" => AccountStatus::Disconnected,
                _ => AccountStatus::Pending,
            },
            connected_at: row.get::<_, Option<String>>("connected_at")?.map(|s| parse_dt(&s)).transpose()?,
            last_synced_at: row.get::<_, Option<String>>("last_synced_at")?.map(|s| parse_dt(&s)).transpose()?,
            provider_user_id: row.get("provider_user_id")?,
            label: row.get("label")?,
        })
    }

    fn signal_from_row(row: &Row) -> Result<CandidateSignal> {
        let source_type: String = row.get("source_type")?;
        let signal_meta: String = row.get("signal_meta")?;
        Ok(CandidateSignal {
            id: parse_uuid(&row.get::<_, String>("id")?)?,
            job_id: parse_uuid(&row.get::<_, String>("job_id")?)?,
            candidate_id: parse_uuid(&row.get::<_, String>("candidate_id")?)?,
            source_type: match source_type.as_str() {
                "pre_resume_event" => SourceType::PreResumeEvent,
                "operation_log" => SourceType::OperationLog,
                "match_snapshot" => SourceType::MatchSnapshot,
                _ => SourceType::Assessment,
            },
            source_id: row.get("source_id")?,
            signal_type: row.get("signal_type")?,
            category: row.get("category")?,
            title: row.get("title")?,
            detail: row.get("detail")?,
            impact_score: row.get("impact_score")?,
            confidence: row.get("confidence")?,
            signal_meta: serde_json::from_str(&signal_meta).map_err(map_ser_err)?,
            observed_at: parse_dt(&row.get::<_, String>("observed_at")?)?,
        })
    }
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn create_job(&self, job: NewJob) -> Result<Job> {
        self.with_conn(move |conn| {
            let id = job.id.unwrap_or_else(Uuid::new_v4);
            let created_at = now_str();
            let routing_mode = match job.routing_mode {
                RoutingMode::Auto => "auto",
                RoutingMode::Manual => "manual",
            };
            conn.execute(
                "INSERT INTO jobs (id, title, jd_text, location, preferred_languages, seniority, routing_mode, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    id.to_string(),
                    job.title,
                    job.jd_text,
                    job.location,
                    serde_json::to_string(&job.preferred_languages).map_err(map_ser_err)?,
                    job.seniority,
                    routing_mode,
                    created_at,
                ],
            )
            .map_err(map_db_err)?;
            let row = conn.query_row("SELECT * FROM jobs WHERE id = ?1", params![id.to_string()], Self::job_from_row_raw).map_err(map_db_err)?;
            row
        })
        .await
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>> {
        self.with_conn(move |conn| {
            conn.query_row("SELECT * FROM jobs WHERE id = ?1", params![id.to_string()], Self::job_from_row_raw)
                .optional()
                .map_err(map_db_err)?
                .transpose()
        })
        .await
    }

    async fn list_jobs(&self, filter: JobFilter) -> Result<Vec<Job>> {
        self.with_conn(move |conn| {
            let mut rows = Vec::new();
            if let Some(needle) = filter.title_contains {
                let mut stmt = conn.prepare("SELECT * FROM jobs WHERE title LIKE ?1 ORDER BY created_at DESC").map_err(map_db_err)?;
                let pattern = format!("%{needle}%");
                let mut mapped = stmt.query_map(params![pattern], Self::job_from_row_raw).map_err(map_db_err)?;
                while let Some(row) = mapped.next() {
                    rows.push(row.map_err(map_db_err)??);
                }
            } else {
                let mut stmt = conn.prepare("SELECT * FROM jobs ORDER BY created_at DESC").map_err(map_db_err)?;
                let mut mapped = stmt.query_map([], Self::job_from_row_raw).map_err(map_db_err)?;
                while let Some(row) = mapped.next() {
                    rows.push(row.map_err(map_db_err)??);
                }
            }
            Ok(rows)
        })
        .await
    }

    async fn update_job_jd_text(&self, id: Uuid, jd_text: &str) -> Result<Job> {
        let jd_text = jd_text.to_string();
        self.with_conn(move |conn| {
            let updated = conn.execute("UPDATE jobs SET jd_text = ?2 WHERE id = ?1", params![id.to_string(), jd_text]).map_err(map_db_err)?;
            if updated == 0 {
                return Err(RepositoryError::NotFound(format!("job {id}")));
            }
            conn.query_row("SELECT * FROM jobs WHERE id = ?1", params![id.to_string()], Self::job_from_row_raw).map_err(map_db_err)?
        })
        .await
    }

    async fn upsert_candidate(&self, candidate: CandidateUpsert) -> Result<Candidate> {
        self.with_conn(move |conn| {
            let now = now_str();
            let languages = serde_json::to_string(&candidate.languages).map_err(map_ser_err)?;
            let skills = serde_json::to_string(&candidate.skills).map_err(map_ser_err)?;
            let existing: Option<String> = conn
                .query_row("SELECT id FROM candidates WHERE provider_id = ?1", params![candidate.provider_id], |r| r.get(0))
                .optional()
                .map_err(map_db_err)?;
            let id = match &existing {
                Some(id) => id.clone(),
                None => candidate.id.map(|u| u.to_string()).unwrap_or_else(|| Uuid::new_v4().to_string()),
            };
            conn.execute(
                "INSERT INTO candidates (id, provider_id, full_name, headline, location, languages, skills, years_experience, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
                 ON CONFLICT (provider_id) DO UPDATE SET
                    full_name = excluded.full_name, headline = excluded.headline, location = excluded.location,
                    languages = excluded.languages, skills = excluded.skills, years_experience = excluded.years_experience,
                    updated_at = excluded.updated_at",
                params![id, candidate.provider_id, candidate.full_name, candidate.headline, candidate.location, languages, skills, candidate.years_experience, now],
            )
            .map_err(map_db_err)?;
            conn.query_row("SELECT * FROM candidates WHERE provider_id = ?1", params![candidate.provider_id], Self::candidate_from_row_raw)
                .map_err(map_db_err)?
        })
        .await
    }

    async fn get_candidate(&self, id: Uuid) -> Result<Option<Candidate>> {
        self.with_conn(move |conn| {
            conn.query_row("SELECT * FROM candidates WHERE id = ?1", params![id.to_string()], Self::candidate_from_row_raw)
                .optional()
                .map_err(map_db_err)?
                .transpose()
        })
        .await
    }

    async fn get_candidate_by_provider_id(&self, provider_id: &str) -> Result<Option<Candidate>> {
        let provider_id = provider_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row("SELECT * FROM candidates WHERE provider_id = ?1", params![provider_id], Self::candidate_from_row_raw)
                .optional()
                .map_err(map_db_err)?
                .transpose()
        })
        .await
    }

    async fn list_candidates_for_job(&self, job_id: Uuid) -> Result<Vec<(Candidate, Match)>> {
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT c.*, m.score AS m_score, m.status AS m_status, m.verification_notes AS m_notes,
                            m.created_at AS m_created_at, m.updated_at AS m_updated_at, m.job_id AS m_job_id, m.candidate_id AS m_candidate_id
                     FROM matches m JOIN candidates c ON c.id = m.candidate_id
                     WHERE m.job_id = ?1",
                )
                .map_err(map_db_err)?;
            let mut rows = stmt.query(params![job_id.to_string()]).map_err(map_db_err)?;
            let mut out = Vec::new();
            while let Some(row) = rows.next().map_err(map_db_err)? {
                let candidate = Self::candidate_from_row(row)?;
                let m = Match {
                    id: Uuid::new_v4(),
                    job_id: parse_uuid(&row.get::<_, String>("m_job_id")?)?,
                    candidate_id: parse_uuid(&row.get::<_, String>("m_candidate_id")?)?,
                    score: row.get("m_score")?,
                    status: row.get("m_status")?,
                    verification_notes: serde_json::from_str(&row.get::<_, String>("m_notes")?).map_err(map_ser_err)?,
                    created_at: parse_dt(&row.get::<_, String>("m_created_at")?)?,
                    updated_at: parse_dt(&row.get::<_, String>("m_updated_at")?)?,
                };
                out.push((candidate, m));
            }
            Ok(out)
        })
        .await
    }

    async fn upsert_match(&self, job_id: Uuid, candidate_id: Uuid, score: f64, status: &str, notes: VerificationNotes) -> Result<Match> {
        let status = status.to_string();
        self.with_conn(move |conn| {
            let now = now_str();
            let notes_json = serde_json::to_string(&notes).map_err(map_ser_err)?;
            conn.execute(
                "INSERT INTO matches (job_id, candidate_id, score, status, verification_notes, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                 ON CONFLICT (job_id, candidate_id) DO UPDATE SET
                    score = excluded.score, status = excluded.status, verification_notes = excluded.verification_notes, updated_at = excluded.updated_at",
                params![job_id.to_string(), candidate_id.to_string(), score, status, notes_json, now],
            )
            .map_err(map_db_err)?;
            conn.query_row(
                "SELECT * FROM matches WHERE job_id = ?1 AND candidate_id = ?2",
                params![job_id.to_string(), candidate_id.to_string()],
                Self::match_from_row_raw,
            )
            .map_err(map_db_err)?
        })
        .await
    }

    async fn get_match(&self, job_id: Uuid, candidate_id: Uuid) -> Result<Option<Match>> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT * FROM matches WHERE job_id = ?1 AND candidate_id = ?2",
                params![job_id.to_string(), candidate_id.to_string()],
                Self::match_from_row_raw,
            )
            .optional()
            .map_err(map_db_err)?
            .transpose()
        })
        .await
    }

    async fn update_match_status(&self, job_id: Uuid, candidate_id: Uuid, status: &str) -> Result<Match> {
        let status = status.to_string();
        self.with_conn(move |conn| {
            let now = now_str();
            let updated = conn
                .execute(
                    "UPDATE matches SET status = ?3, updated_at = ?4 WHERE job_id = ?1 AND candidate_id = ?2",
                    params![job_id.to_string(), candidate_id.to_string(), status, now],
                )
                .map_err(map_db_err)?;
            if updated == 0 {
                return Err(RepositoryError::NotFound(format!("match {job_id}/{candidate_id}")));
            }
            conn.query_row(
                "SELECT * FROM matches WHERE job_id = ?1 AND candidate_id = ?2",
                params![job_id.to_string(), candidate_id.to_string()],
                Self::match_from_row_raw,
            )
            .map_err(map_db_err)?
        })
        .await
    }

    async fn append_match_notes(&self, job_id: Uuid, candidate_id: Uuid, extra: serde_json::Value) -> Result<Match> {
        self.with_conn(move |conn| {
            let existing = conn
                .query_row(
                    "SELECT * FROM matches WHERE job_id = ?1 AND candidate_id = ?2",
                    params![job_id.to_string(), candidate_id.to_string()],
                    Self::match_from_row_raw,
                )
                .optional()
                .map_err(map_db_err)?
                .transpose()?
                .ok_or_else(|| RepositoryError::NotFound(format!("match {job_id}/{candidate_id}")))?;
            let mut notes = existing.verification_notes;
            match (notes.extra.as_object_mut(), extra.as_object()) {
                (Some(existing_obj), Some(new_obj)) => {
                    for (k, v) in new_obj {
                        existing_obj.insert(k.clone(), v.clone());
                    }
                }
                _ => notes.extra = extra,
            }
            let now = now_str();
            let notes_json = serde_json::to_string(&notes).map_err(map_ser_err)?;
            conn.execute(
                "UPDATE matches SET verification_notes = ?3, updated_at = ?4 WHERE job_id = ?1 AND candidate_id = ?2",
                params![job_id.to_string(), candidate_id.to_string(), notes_json, now],
            )
            .map_err(map_db_err)?;
            conn.query_row(
                "SELECT * FROM matches WHERE job_id = ?1 AND candidate_id = ?2",
                params![job_id.to_string(), candidate_id.to_string()],
                Self::match_from_row_raw,
            )
            .map_err(map_db_err)?
        })
        .await
    }

    async fn get_or_create_conversation(&self, job_id: Uuid, candidate_id: Uuid, channel: &str) -> Result<Conversation> {
        let channel = channel.to_string();
        self.with_conn(move |conn| {
            let existing = conn
                .query_row(
                    "SELECT * FROM conversations WHERE job_id = ?1 AND candidate_id = ?2 AND channel = ?3",
                    params![job_id.to_string(), candidate_id.to_string(), channel],
                    Self::conversation_from_row_raw,
                )
                .optional()
                .map_err(map_db_err)?;
            if let Some(row) = existing {
                return row;
            }
            let id = Uuid::new_v4();
            let created_at = now_str();
            conn.execute(
                "INSERT INTO conversations (id, job_id, candidate_id, channel, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id.to_string(), job_id.to_string(), candidate_id.to_string(), channel, created_at],
            )
            .map_err(map_db_err)?;
            conn.query_row("SELECT * FROM conversations WHERE id = ?1", params![id.to_string()], Self::conversation_from_row_raw).map_err(map_db_err)?
        })
        .await
    }

    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>> {
        self.with_conn(move |conn| {
            conn.query_row("SELECT * FROM conversations WHERE id = ?1", params![id.to_string()], Self::conversation_from_row_raw)
                .optional()
                .map_err(map_db_err)?
                .transpose()
        })
        .await
    }

    async fn get_conversation_by_external_chat_id(&self, external_chat_id: &str) -> Result<Option<Conversation>> {
        let external_chat_id = external_chat_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT * FROM conversations WHERE external_chat_id = ?1",
                params![external_chat_id],
                Self::conversation_from_row_raw,
            )
            .optional()
            .map_err(map_db_err)?
            .transpose()
        })
        .await
    }

    async fn bind_external_chat_id(&self, conversation_id: Uuid, external_chat_id: &str) -> Result<Conversation> {
        let external_chat_id = external_chat_id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction().map_err(map_db_err)?;
            tx.execute(
                "UPDATE conversations SET external_chat_id = NULL WHERE external_chat_id = ?1 AND id <> ?2",
                params![external_chat_id, conversation_id.to_string()],
            )
            .map_err(map_db_err)?;
            let updated = tx
                .execute(
                    "UPDATE conversations SET external_chat_id = ?2 WHERE id = ?1",
                    params![conversation_id.to_string(), external_chat_id],
                )
                .map_err(map_db_err)?;
            if updated == 0 {
                return Err(RepositoryError::NotFound(format!("conversation {conversation_id}")));
            }
            let result = tx.query_row("SELECT * FROM conversations WHERE id = ?1", params![conversation_id.to_string()], Self::conversation_from_row_raw).map_err(map_db_err)??;
            tx.commit().map_err(map_db_err)?;
            Ok(result)
        })
        .await
    }

    async fn set_conversation_status(&self, conversation_id: Uuid, status: ConversationStatus) -> Result<Conversation> {
        self.with_conn(move |conn| {
            let status_str = match status {
                ConversationStatus::Active => "active",
                ConversationStatus::WaitingConnection => "waiting_connection",
                ConversationStatus::Closed => "closed",
            };
            let updated = conn
                .execute("UPDATE conversations SET status = ?2 WHERE id = ?1", params![conversation_id.to_string(), status_str])
                .map_err(map_db_err)?;
            if updated == 0 {
                return Err(RepositoryError::NotFound(format!("conversation {conversation_id}")));
            }
            conn.query_row("SELECT * FROM conversations WHERE id = ?1", params![conversation_id.to_string()], Self::conversation_from_row_raw).map_err(map_db_err)?
        })
        .await
    }

    async fn assign_conversation_account(&self, conversation_id: Uuid, account_id: Uuid) -> Result<Conversation> {
        self.with_conn(move |conn| {
            let updated = conn
                .execute(
                    "UPDATE conversations SET assigned_account_id = ?2 WHERE id = ?1",
                    params![conversation_id.to_string(), account_id.to_string()],
                )
                .map_err(map_db_err)?;
            if updated == 0 {
                return Err(RepositoryError::NotFound(format!("conversation {conversation_id}")));
            }
            conn.query_row("SELECT * FROM conversations WHERE id = ?1", params![conversation_id.to_string()], Self::conversation_from_row_raw).map_err(map_db_err)?
        })
        .await
    }

    async fn add_message(&self, conversation_id: Uuid, direction: Direction, content: &str, language: Option<&str>, meta: MessageMeta) -> Result<Message> {
        let content = content.to_string();
        let language = language.map(|s| s.to_string());
        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction().map_err(map_db_err)?;
            let next_seq: i64 = tx
                .query_row(
                    "SELECT COALESCE(MAX(seq), 0) + 1 FROM messages WHERE conversation_id = ?1",
                    params![conversation_id.to_string()],
                    |r| r.get(0),
                )
                .map_err(map_db_err)?;
            let id = Uuid::new_v4();
            let direction_str = match direction {
                Direction::Inbound => "inbound",
                Direction::Outbound => "outbound",
            };
            let created_at = now_str();
            let meta_json = serde_json::to_string(&meta).map_err(map_ser_err)?;
            tx.execute(
                "INSERT INTO messages (id, conversation_id, direction, language, content, meta, seq, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![id.to_string(), conversation_id.to_string(), direction_str, language, content, meta_json, next_seq, created_at],
            )
            .map_err(map_db_err)?;
            tx.execute("UPDATE conversations SET last_message_at = ?2 WHERE id = ?1", params![conversation_id.to_string(), created_at])
                .map_err(map_db_err)?;
            let message = tx.query_row("SELECT * FROM messages WHERE id = ?1", params![id.to_string()], Self::message_from_row_raw).map_err(map_db_err)??;
            tx.commit().map_err(map_db_err)?;
            Ok(message)
        })
        .await
    }

    async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare("SELECT * FROM messages WHERE conversation_id = ?1 ORDER BY seq ASC").map_err(map_db_err)?;
            let mut rows = stmt.query(params![conversation_id.to_string()]).map_err(map_db_err)?;
            let mut out = Vec::new();
            while let Some(row) = rows.next().map_err(map_db_err)? {
                out.push(Self::message_from_row(row)?);
            }
            Ok(out)
        })
        .await
    }

    async fn insert_pre_resume_session(&self, session: PreResumeSession) -> Result<PreResumeSession> {
        self.with_conn(move |conn| {
            let existing: Option<String> =
                conn.query_row("SELECT id FROM pre_resume_sessions WHERE id = ?1", params![session.id], |r| r.get(0)).optional().map_err(map_db_err)?;
            if existing.is_some() {
                return Err(RepositoryError::Conflict(format!("pre-resume session {} already exists", session.id)));
            }
            let state = serde_json::to_string(&session).map_err(map_ser_err)?;
            let created_at = now_str();
            conn.execute(
                "INSERT INTO pre_resume_sessions (id, conversation_id, job_id, candidate_id, state, status, next_followup_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                params![
                    session.id,
                    session.conversation_id.to_string(),
                    session.job_id.to_string(),
                    session.candidate_id.to_string(),
                    state,
                    session.status,
                    session.next_followup_at.map(|d| d.to_rfc3339()),
                    created_at,
                ],
            )
            .map_err(map_db_err)?;
            conn.query_row("SELECT * FROM pre_resume_sessions WHERE id = ?1", params![session.id], Self::pre_resume_session_from_row_raw).map_err(map_db_err)?
        })
        .await
    }

    async fn get_pre_resume_session(&self, id: &str) -> Result<Option<PreResumeSession>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.query_row("SELECT * FROM pre_resume_sessions WHERE id = ?1", params![id], Self::pre_resume_session_from_row_raw)
                .optional()
                .map_err(map_db_err)?
                .transpose()
        })
        .await
    }

    async fn get_pre_resume_session_by_conversation(&self, conversation_id: Uuid) -> Result<Option<PreResumeSession>> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT * FROM pre_resume_sessions WHERE conversation_id = ?1",
                params![conversation_id.to_string()],
                Self::pre_resume_session_from_row_raw,
            )
            .optional()
            .map_err(map_db_err)?
            .transpose()
        })
        .await
    }

    async fn update_pre_resume_session(&self, session: PreResumeSession) -> Result<PreResumeSession> {
        self.with_conn(move |conn| {
            let state = serde_json::to_string(&session).map_err(map_ser_err)?;
            let updated = conn
                .execute(
                    "UPDATE pre_resume_sessions SET state = ?2, status = ?3, next_followup_at = ?4, updated_at = ?5 WHERE id = ?1",
                    params![session.id, state, session.status, session.next_followup_at.map(|d| d.to_rfc3339()), now_str()],
                )
                .map_err(map_db_err)?;
            if updated == 0 {
                return Err(RepositoryError::NotFound(format!("pre-resume session {}", session.id)));
            }
            conn.query_row("SELECT * FROM pre_resume_sessions WHERE id = ?1", params![session.id], Self::pre_resume_session_from_row_raw).map_err(map_db_err)?
        })
        .await
    }

    async fn list_due_pre_resume_sessions(&self, now: DateTime<Utc>) -> Result<Vec<PreResumeSession>> {
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT * FROM pre_resume_sessions WHERE next_followup_at IS NOT NULL AND next_followup_at <= ?1
                     AND status NOT IN ('resume_received', 'not_interested', 'unreachable', 'stalled')",
                )
                .map_err(map_db_err)?;
            let mut rows = stmt.query(params![now.to_rfc3339()]).map_err(map_db_err)?;
            let mut out = Vec::new();
            while let Some(row) = rows.next().map_err(map_db_err)? {
                out.push(Self::pre_resume_session_from_row(row)?);
            }
            Ok(out)
        })
        .await
    }

    async fn append_pre_resume_event(&self, event: PreResumeEvent) -> Result<PreResumeEvent> {
        self.with_conn(move |conn| {
            let event_type = serde_json::to_value(event.event_type).map_err(map_ser_err)?;
            let event_type = event_type.as_str().unwrap_or("inbound_processed").to_string();
            let created_at = now_str();
            conn.execute(
                "INSERT INTO pre_resume_events (id, session_id, event_type, intent, inbound_text, outbound_text, resulting_status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![event.id.to_string(), event.session_id, event_type, event.intent, event.inbound_text, event.outbound_text, event.resulting_status, created_at],
            )
            .map_err(map_db_err)?;
            Ok(PreResumeEvent { created_at: parse_dt(&created_at)?, ..event })
        })
        .await
    }

    async fn upsert_assessment(&self, assessment: AgentAssessment) -> Result<AgentAssessment> {
        self.with_conn(move |conn| {
            let id = Uuid::new_v4();
            let details = serde_json::to_string(&assessment.details).map_err(map_ser_err)?;
            let created_at = now_str();
            conn.execute(
                "INSERT INTO agent_assessments (id, job_id, candidate_id, agent_key, stage_key, score, status, reason, details, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT (job_id, candidate_id, agent_key, stage_key) DO UPDATE SET
                    score = excluded.score, status = excluded.status, reason = excluded.reason, details = excluded.details, created_at = excluded.created_at",
                params![id.to_string(), assessment.job_id.to_string(), assessment.candidate_id.to_string(), assessment.agent_key, assessment.stage_key, assessment.score, assessment.status, assessment.reason, details, created_at],
            )
            .map_err(map_db_err)?;
            conn.query_row(
                "SELECT * FROM agent_assessments WHERE job_id = ?1 AND candidate_id = ?2 AND agent_key = ?3 AND stage_key = ?4",
                params![assessment.job_id.to_string(), assessment.candidate_id.to_string(), assessment.agent_key, assessment.stage_key],
                Self::assessment_from_row_raw,
            )
            .map_err(map_db_err)?
        })
        .await
    }

    async fn latest_assessments_for_candidate(&self, job_id: Uuid, candidate_id: Uuid) -> Result<Vec<AgentAssessment>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare("SELECT * FROM agent_assessments WHERE job_id = ?1 AND candidate_id = ?2").map_err(map_db_err)?;
            let mut rows = stmt.query(params![job_id.to_string(), candidate_id.to_string()]).map_err(map_db_err)?;
            let mut out = Vec::new();
            while let Some(row) = rows.next().map_err(map_db_err)? {
                out.push(Self::assessment_from_row(row)?);
            }
            Ok(out)
        })
        .await
    }

    async fn enqueue_outbound_action(&self, action: OutboundAction) -> Result<OutboundAction> {
        self.with_conn(move |conn| {
            let kind = match action.kind {
                OutboundKind::Message => "message",
                OutboundKind::ConnectRequest => "connect_request",
            };
            let payload = serde_json::to_string(&action.payload).map_err(map_ser_err)?;
            let created_at = now_str();
            conn.execute(
                "INSERT INTO outbound_actions (id, job_id, candidate_id, conversation_id, kind, payload, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                params![action.id.to_string(), action.job_id.to_string(), action.candidate_id.to_string(), action.conversation_id.to_string(), kind, payload, created_at],
            )
            .map_err(map_db_err)?;
            conn.query_row("SELECT * FROM outbound_actions WHERE id = ?1", params![action.id.to_string()], Self::outbound_action_from_row_raw).map_err(map_db_err)?
        })
        .await
    }

    async fn claim_pending_outbound_actions(&self, job_id: Option<Uuid>, limit: usize) -> Result<Vec<OutboundAction>> {
        self.with_conn(move |conn| {
            let mut out = Vec::new();
            if let Some(job_id) = job_id {
                let mut stmt = conn
                    .prepare("SELECT * FROM outbound_actions WHERE status = 'pending' AND job_id = ?1 ORDER BY created_at ASC LIMIT ?2")
                    .map_err(map_db_err)?;
                let mut rows = stmt.query(params![job_id.to_string(), limit as i64]).map_err(map_db_err)?;
                while let Some(row) = rows.next().map_err(map_db_err)? {
                    out.push(Self::outbound_action_from_row(row)?);
                }
            } else {
                let mut stmt = conn.prepare("SELECT * FROM outbound_actions WHERE status = 'pending' ORDER BY created_at ASC LIMIT ?1").map_err(map_db_err)?;
                let mut rows = stmt.query(params![limit as i64]).map_err(map_db_err)?;
                while let Some(row) = rows.next().map_err(map_db_err)? {
                    out.push(Self::outbound_action_from_row(row)?);
                }
            }
            Ok(out)
        })
        .await
    }

    async fn update_outbound_action(&self, action: OutboundAction) -> Result<OutboundAction> {
        self.with_conn(move |conn| {
            let status = match action.status {
                OutboundStatus::Pending => "pending",
                OutboundStatus::PendingConnection => "pending_connection",
                OutboundStatus::Completed => "completed",
                OutboundStatus::Deferred => "deferred",
                OutboundStatus::Failed => "failed",
            };
            let updated = conn
                .execute(
                    "UPDATE outbound_actions SET status = ?2, last_error = ?3, assigned_account_id = ?4, attempts = ?5, updated_at = ?6 WHERE id = ?1",
                    params![
                        action.id.to_string(),
                        status,
                        action.last_error,
                        action.assigned_account_id.map(|a| a.to_string()),
                        action.attempts as i64,
                        now_str(),
                    ],
                )
                .map_err(map_db_err)?;
            if updated == 0 {
                return Err(RepositoryError::NotFound(format!("outbound action {}", action.id)));
            }
            conn.query_row("SELECT * FROM outbound_actions WHERE id = ?1", params![action.id.to_string()], Self::outbound_action_from_row_raw).map_err(map_db_err)?
        })
        .await
    }

    async fn list_connected_accounts(&self) -> Result<Vec<SenderAccount>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare("SELECT * FROM sender_accounts WHERE status = 'connected'").map_err(map_db_err)?;
            let mut rows = stmt.query([]).map_err(map_db_err)?;
            let mut out = Vec::new();
            while let Some(row) = rows.next().map_err(map_db_err)? {
                out.push(Self::account_from_row(row)?);
            }
            Ok(out)
        })
        .await
    }

    async fn get_account(&self, id: Uuid) -> Result<Option<SenderAccount>> {
        self.with_conn(move |conn| {
            conn.query_row("SELECT * FROM sender_accounts WHERE id = ?1", params![id.to_string()], Self::account_from_row_raw)
                .optional()
                .map_err(map_db_err)?
                .transpose()
        })
        .await
    }

    async fn list_job_assigned_accounts(&self, job_id: Uuid) -> Result<Vec<SenderAccount>> {
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT sa.* FROM sender_accounts sa JOIN job_account_assignments j ON j.account_id = sa.id
                     WHERE j.job_id = ?1 AND sa.status = 'connected'",
                )
                .map_err(map_db_err)?;
            let mut rows = stmt.query(params![job_id.to_string()]).map_err(map_db_err)?;
            let mut out = Vec::new();
            while let Some(row) = rows.next().map_err(map_db_err)? {
                out.push(Self::account_from_row(row)?);
            }
            Ok(out)
        })
        .await
    }

    async fn get_day_counters(&self, account_id: Uuid, day: NaiveDate) -> Result<AccountCounters> {
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT new_threads_sent, connect_sent FROM account_day_counters WHERE account_id = ?1 AND day = ?2",
                    params![account_id.to_string(), day.to_string()],
                    |r| Ok(AccountCounters { new_threads_sent: r.get::<_, i64>(0)? as u32, connect_sent: r.get::<_, i64>(1)? as u32 }),
                )
                .optional()
                .map_err(map_db_err)?;
            Ok(row.unwrap_or_default())
        })
        .await
    }

    async fn get_week_counters(&self, account_id: Uuid, week_start: NaiveDate) -> Result<AccountCounters> {
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT new_threads_sent, connect_sent FROM account_week_counters WHERE account_id = ?1 AND week_start = ?2",
                    params![account_id.to_string(), week_start.to_string()],
                    |r| Ok(AccountCounters { new_threads_sent: r.get::<_, i64>(0)? as u32, connect_sent: r.get::<_, i64>(1)? as u32 }),
                )
                .optional()
                .map_err(map_db_err)?;
            Ok(row.unwrap_or_default())
        })
        .await
    }

    async fn increment_counters(&self, account_id: Uuid, day: NaiveDate, week_start: NaiveDate, new_threads_sent: u32, connect_sent: u32) -> Result<()> {
        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction().map_err(map_db_err)?;
            tx.execute(
                "INSERT INTO account_day_counters (account_id, day, new_threads_sent, connect_sent) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (account_id, day) DO UPDATE SET
                    new_threads_sent = new_threads_sent + excluded.new_threads_sent,
                    connect_sent = connect_sent + excluded.connect_sent",
                params![account_id.to_string(), day.to_string(), new_threads_sent as i64, connect_sent as i64],
            )
            .map_err(map_db_err)?;
            tx.execute(
                "INSERT INTO account_week_counters (account_id, week_start, new_threads_sent, connect_sent) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (account_id, week_start) DO UPDATE SET
                    new_threads_sent = new_threads_sent + excluded.new_threads_sent,
                    connect_sent = connect_sent + excluded.connect_sent",
                params![account_id.to_string(), week_start.to_string(), new_threads_sent as i64, connect_sent as i64],
            )
            .map_err(map_db_err)?;
            tx.commit().map_err(map_db_err)?;
            Ok(())
        })
        .await
    }

    async fn log_operation(&self, entry: OperationLog) -> Result<OperationLog> {
        self.with_conn(move |conn| {
            let details = entry.details.clone();
            conn.execute(
                "INSERT INTO operation_logs (id, operation, status, entity_type, entity_id, details, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![entry.id.to_string(), entry.operation, entry.status, entry.entity_type, entry.entity_id, details, entry.created_at.to_rfc3339()],
            )
            .map_err(map_db_err)?;
            Ok(entry)
        })
        .await
    }

    async fn upsert_signal(&self, signal: CandidateSignal) -> Result<Option<CandidateSignal>> {
        self.with_conn(move |conn| {
            let signal_meta = serde_json::to_string(&signal.signal_meta).map_err(map_ser_err)?;
            conn.execute(
                "INSERT INTO candidate_signals (id, job_id, candidate_id, source_type, source_id, signal_type, category, title, detail, impact_score, confidence, signal_meta, observed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                 ON CONFLICT (job_id, candidate_id, source_type, source_id) DO UPDATE SET
                    signal_type = excluded.signal_type, category = excluded.category, title = excluded.title, detail = excluded.detail,
                    impact_score = excluded.impact_score, confidence = excluded.confidence, signal_meta = excluded.signal_meta, observed_at = excluded.observed_at",
                params![
                    signal.id.to_string(),
                    signal.job_id.to_string(),
                    signal.candidate_id.to_string(),
                    signal.source_type.as_str(),
                    signal.source_id,
                    signal.signal_type,
                    signal.category,
                    signal.title,
                    signal.detail,
                    signal.impact_score,
                    signal.confidence,
                    signal_meta,
                    signal.observed_at.to_rfc3339(),
                ],
            )
            .map_err(map_db_err)?;
            conn.query_row(
                "SELECT * FROM candidate_signals WHERE job_id = ?1 AND candidate_id = ?2 AND source_type = ?3 AND source_id = ?4",
                params![signal.job_id.to_string(), signal.candidate_id.to_string(), signal.source_type.as_str(), signal.source_id],
                Self::signal_from_row_raw,
            )
            .optional()
            .map_err(map_db_err)?
            .transpose()
        })
        .await
    }

    async fn list_signals_for_job(&self, job_id: Uuid) -> Result<Vec<CandidateSignal>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare("SELECT * FROM candidate_signals WHERE job_id = ?1 ORDER BY observed_at DESC").map_err(map_db_err)?;
            let mut rows = stmt.query(params![job_id.to_string()]).map_err(map_db_err)?;
            let mut out = Vec::new();
            while let Some(row) = rows.next().map_err(map_db_err)? {
                out.push(Self::signal_from_row(row)?);
            }
            Ok(out)
        })
        .await
    }

    async fn upsert_step_progress(&self, progress: JobStepProgress) -> Result<JobStepProgress> {
        self.with_conn(move |conn| {
            let output = progress.output.clone();
            let updated_at = now_str();
            conn.execute(
                "INSERT INTO job_step_progress (job_id, step, status, output, updated_at) VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (job_id, step) DO UPDATE SET status = excluded.status, output = excluded.output, updated_at = excluded.updated_at",
                params![progress.job_id.to_string(), progress.step, progress.status, output, updated_at],
            )
            .map_err(map_db_err)?;
            Ok(JobStepProgress { updated_at: parse_dt(&updated_at)?, ..progress })
        })
        .await
    }

    async fn get_step_progress(&self, job_id: Uuid, step: &str) -> Result<Option<JobStepProgress>> {
        let step = step.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT job_id, step, status, output, updated_at FROM job_step_progress WHERE job_id = ?1 AND step = ?2",
                params![job_id.to_string(), step],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, serde_json::Value>(3)?,
                        r.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()
            .map_err(map_db_err)?
            .map(|(job_id, step, status, output, updated_at)| {
                Ok(JobStepProgress { job_id: parse_uuid(&job_id)?, step, status, output, updated_at: parse_dt(&updated_at)? })
            })
            .transpose()
        })
        .await
    }

    async fn get_idempotency_record(&self, route: &str, key: &str) -> Result<Option<IdempotencyRecord>> {
        let route = route.to_string();
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT route, key, payload_hash, status_code, response, created_at FROM idempotency_records WHERE route = ?1 AND key = ?2",
                params![route, key],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, i64>(3)?,
                        r.get::<_, serde_json::Value>(4)?,
                        r.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()
            .map_err(map_db_err)?
            .map(|(route, key, payload_hash, status_code, response, created_at)| {
                Ok(IdempotencyRecord { route, key, payload_hash, status_code: status_code as u16, response, created_at: parse_dt(&created_at)? })
            })
            .transpose()
        })
        .await
    }

    async fn put_idempotency_record(&self, record: IdempotencyRecord) -> Result<IdempotencyRecord> {
        self.with_conn(move |conn| {
            let created_at = now_str();
            conn.execute(
                "INSERT INTO idempotency_records (route, key, payload_hash, status_code, response, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (route, key) DO NOTHING",
                params![record.route, record.key, record.payload_hash, record.status_code as i64, record.response, created_at],
            )
            .map_err(map_db_err)?;
            conn.query_row(
                "SELECT route, key, payload_hash, status_code, response, created_at FROM idempotency_records WHERE route = ?1 AND key = ?2",
                params![record.route, record.key],
                |r| {
                    Ok(IdempotencyRecord {
                        route: r.get(0)?,
                        key: r.get(1)?,
                        payload_hash: r.get(2)?,
                        status_code: r.get::<_, i64>(3)? as u16,
                        response: r.get(4)?,
                        created_at: Utc::now(),
                    })
                },
            )
            .map_err(map_db_err)
        })
        .await
    }
}

// `query_row`/`query_map` closures must return `rusqlite::Result<T>`, so the
// `*_from_row` mappers above (which return our own `Result<T>`) are wrapped
// one level deeper here to flatten the double result at call sites.
impl SqliteRepository {
    fn job_from_row_raw(row: &Row) -> rusqlite::Result<Result<Job>> {
        Ok(Self::job_from_row(row))
    }
    fn candidate_from_row_raw(row: &Row) -> rusqlite::Result<Result<Candidate>> {
        Ok(Self::candidate_from_row(row))
    }
    fn match_from_row_raw(row: &Row) -> rusqlite::Result<Result<Match>> {
        Ok(Self::match_from_row(row))
    }
    fn conversation_from_row_raw(row: &Row) -> rusqlite::Result<Result<Conversation>> {
        Ok(Self::conversation_from_row(row))
    }
    fn message_from_row_raw(row: &Row) -> rusqlite::Result<Result<Message>> {
        Ok(Self::message_from_row(row))
    }
    fn pre_resume_session_from_row_raw(row: &Row) -> rusqlite::Result<Result<PreResumeSession>> {
        Ok(Self::pre_resume_session_from_row(row))
    }
    fn assessment_from_row_raw(row: &Row) -> rusqlite::Result<Result<AgentAssessment>> {
        Ok(Self::assessment_from_row(row))
    }
    fn outbound_action_from_row_raw(row: &Row) -> rusqlite::Result<Result<OutboundAction>> {
        Ok(Self::outbound_action_from_row(row))
    }
    fn account_from_row_raw(row: &Row) -> rusqlite::Result<Result<SenderAccount>> {
        Ok(Self::account_from_row(row))
    }
    fn signal_from_row_raw(row: &Row) -> rusqlite::Result<Result<CandidateSignal>> {
        Ok(Self::signal_from_row(row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_and_fetch_job_round_trips() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let created = repo
            .create_job(NewJob {
                id: None,
                title: "Senior Rust Engineer".into(),
                jd_text: "Build the core.".into(),
                location: Some("Remote".into()),
                preferred_languages: vec!["en".into()],
                seniority: Some("senior".into()),
                routing_mode: RoutingMode::Auto,
            })
            .await
            .unwrap();
        let fetched = repo.get_job(created.id).await.unwrap().unwrap();
        assert_eq!(fetched.title, "Senior Rust Engineer");
        assert_eq!(fetched.preferred_languages, vec!["en".to_string()]);
    }

    #[tokio::test]
    async fn message_seq_is_strictly_increasing() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let job = repo
            .create_job(NewJob { id: None, title: "J".into(), jd_text: "d".into(), location: None, preferred_languages: vec![], seniority: None, routing_mode: RoutingMode::Auto })
            .await
            .unwrap();
        let candidate = repo
            .upsert_candidate(CandidateUpsert {
                id: None,
                provider_id: "p1".into(),
                full_name: "A B".into(),
                headline: None,
                location: None,
                languages: vec![],
                skills: vec![],
                years_experience: None,
            })
            .await
            .unwrap();
        let conversation = repo.get_or_create_conversation(job.id, candidate.id, "linkedin").await.unwrap();
        let m1 = repo.add_message(conversation.id, Direction::Outbound, "hi", Some("en"), MessageMeta::default()).await.unwrap();
        let m2 = repo.add_message(conversation.id, Direction::Inbound, "hello", Some("en"), MessageMeta::default()).await.unwrap();
        assert!(m2.seq > m1.seq);
        let all = repo.list_messages(conversation.id).await.unwrap();
        assert_eq!(all.last().unwrap().id, m2.id);
    }

    #[tokio::test]
    async fn bind_external_chat_id_steals_from_older_conversation() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let job = repo
            .create_job(NewJob { id: None, title: "J".into(), jd_text: "d".into(), location: None, preferred_languages: vec![], seniority: None, routing_mode: RoutingMode::Auto })
            .await
            .unwrap();
        let c1 = repo
            .upsert_candidate(CandidateUpsert { id: None, provider_id: "p1".into(), full_name: "A".into(), headline: None, location: None, languages: vec![], skills: vec![], years_experience: None })
            .await
            .unwrap();
        let c2 = repo
            .upsert_candidate(CandidateUpsert { id: None, provider_id: "p2".into(), full_name: "B".into(), headline: None, location: None, languages: vec![], skills: vec![], years_experience: None })
            .await
            .unwrap();
        let conv1 = repo.get_or_create_conversation(job.id, c1.id, "linkedin").await.unwrap();
        let conv2 = repo.get_or_create_conversation(job.id, c2.id, "linkedin").await.unwrap();
        repo.bind_external_chat_id(conv1.id, "chat-1").await.unwrap();
        repo.bind_external_chat_id(conv2.id, "chat-1").await.unwrap();
        let refetched1 = repo.get_conversation(conv1.id).await.unwrap().unwrap();
        assert_eq!(refetched1.external_chat_id, None);
    }
}
