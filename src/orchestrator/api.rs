//! HTTP surface: jobs, candidates, conversations, outbound dispatch,
//! signals, and the dual-write admin controls, all behind
//! [`super::auth::auth_middleware`].

use std::future::Future;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha1::{Digest, Sha1};
use uuid::Uuid;

use crate::config::ReadSource;
use crate::dispatcher;
use crate::domain::{IdempotencyRecord, NewJob, RoutingMode};
use crate::error::CoreError;
use crate::repository::JobFilter;
use crate::signals::{self, AssessmentSignalInput, MatchSnapshotInput};

use super::auth::{auth_middleware, AuthState};
use super::stages;
use super::OrchestratorState;

struct ApiError(CoreError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.kind().http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(json!({"error": self.0.code(), "message": self.0.to_string()}))).into_response()
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self(err)
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn idempotency_key(headers: &HeaderMap) -> Option<String> {
    headers.get("idempotency-key").and_then(|v| v.to_str().ok()).map(|s| s.to_string())
}

/// Replays a prior response for the same (route, key, payload hash) rather
/// than re-running `f`; a reused key with a different payload is a conflict.
async fn with_idempotency<F, Fut>(state: &OrchestratorState, route: &str, key: Option<String>, payload: &Value, f: F) -> ApiResult<Value>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Value, CoreError>>,
{
    let payload_hash = format!("{:x}", Sha1::digest(serde_json::to_vec(payload).unwrap_or_default()));

    if let Some(key) = &key {
        if let Some(existing) = state.repo.get_idempotency_record(route, key).await.map_err(CoreError::from)? {
            if existing.payload_hash != payload_hash {
                return Err(ApiError(CoreError::Conflict("idempotency key reused with a different payload".to_string())));
            }
            return Ok(existing.response);
        }
    }

    let response = f().await?;

    if let Some(key) = key {
        let record = IdempotencyRecord { route: route.to_string(), key, payload_hash, status_code: 200, response: response.clone(), created_at: Utc::now() };
        let _ = state.repo.put_idempotency_record(record).await;
    }

    Ok(response)
}

pub fn router(state: OrchestratorState) -> Router {
    let auth_state = AuthState { decision: state.auth.clone() };

    Router::new()
        .route("/jobs", post(create_job).get(list_jobs))
        .route("/jobs/{job_id}", get(get_job))
        .route("/jobs/{job_id}/stages/{stage}", post(run_stage))
        .route("/jobs/{job_id}/candidates", get(list_candidates))
        .route("/jobs/{job_id}/candidates/{candidate_id}/profile", get(candidate_profile))
        .route("/conversations/{conversation_id}/inbound", post(inbound))
        .route("/jobs/{job_id}/candidates/{candidate_id}/pre_resume/start", post(pre_resume_start))
        .route("/conversations/{conversation_id}/pre_resume", get(pre_resume_get))
        .route("/conversations/{conversation_id}/pre_resume/unreachable", post(pre_resume_unreachable))
        .route("/pre_resume/tick", post(pre_resume_tick))
        .route("/dispatch", post(dispatch_outbound))
        .route("/jobs/{job_id}/signals", post(ingest_signals))
        .route("/jobs/{job_id}/signals/view", get(signals_view))
        .route("/jobs/{job_id}/signals/coverage", get(signals_coverage))
        .route("/admin/read_source", post(switch_read_source))
        .route("/admin/dual_write_strict", post(set_dual_write_strict))
        .route("/admin/parity_report", get(parity_report))
        .route("/admin/backfill", post(backfill_run))
        .route_layer(axum::middleware::from_fn_with_state(auth_state, auth_middleware))
        .route("/health", get(health))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize, Serialize)]
struct CreateJobRequest {
    title: String,
    jd_text: String,
    location: Option<String>,
    #[serde(default)]
    preferred_languages: Vec<String>,
    seniority: Option<String>,
    #[serde(default)]
    routing_mode: RoutingMode,
}

async fn create_job(State(state): State<OrchestratorState>, headers: HeaderMap, Json(req): Json<CreateJobRequest>) -> ApiResult<Json<Value>> {
    let payload = serde_json::to_value(&req).unwrap_or(json!({}));
    let response = with_idempotency(&state, "create_job", idempotency_key(&headers), &payload, || async {
        let job = state
            .repo
            .create_job(NewJob {
                id: None,
                title: req.title,
                jd_text: req.jd_text,
                location: req.location,
                preferred_languages: req.preferred_languages,
                seniority: req.seniority,
                routing_mode: req.routing_mode,
            })
            .await?;
        Ok(serde_json::to_value(job).unwrap_or(json!({})))
    })
    .await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct ListJobsQuery {
    title_contains: Option<String>,
}

async fn list_jobs(State(state): State<OrchestratorState>, Query(q): Query<ListJobsQuery>) -> ApiResult<Json<Value>> {
    let jobs = state.repo.list_jobs(JobFilter { title_contains: q.title_contains }).await.map_err(CoreError::from)?;
    Ok(Json(serde_json::to_value(jobs).unwrap_or(json!([]))))
}

async fn get_job(State(state): State<OrchestratorState>, Path(job_id): Path<Uuid>) -> ApiResult<Json<Value>> {
    let job = state.repo.get_job(job_id).await.map_err(CoreError::from)?.ok_or_else(|| CoreError::NotFound(format!("job {job_id} not found")))?;
    Ok(Json(serde_json::to_value(job).unwrap_or(json!({}))))
}

#[derive(Debug, Deserialize, Serialize)]
struct RunStageRequest {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    candidate_id: Option<Uuid>,
}

async fn run_stage(State(state): State<OrchestratorState>, Path((job_id, stage)): Path<(Uuid, String)>, headers: HeaderMap, Json(req): Json<RunStageRequest>) -> ApiResult<Json<Value>> {
    let payload = serde_json::to_value(&req).unwrap_or(json!({}));
    let route = format!("jobs.{job_id}.stages.{stage}");
    let ctx = state.stage_context();

    let response = with_idempotency(&state, &route, idempotency_key(&headers), &payload, || async move {
        let summary = match stage.as_str() {
            "source" => {
                let query = req.query.ok_or_else(|| CoreError::Validation("source stage requires query".to_string()))?;
                stages::run_source(&ctx, job_id, &query, req.limit.unwrap_or(25)).await?
            }
            "enrich" => stages::run_enrich(&ctx, job_id).await?,
            "verify" => stages::run_verify(&ctx, job_id).await?,
            "add" => {
                let candidate_id = req.candidate_id.ok_or_else(|| CoreError::Validation("add stage requires candidate_id".to_string()))?;
                stages::run_add(&ctx, job_id, candidate_id).await?
            }
            "outreach" => stages::run_outreach(&ctx, job_id).await?,
            other => return Err(CoreError::Validation(format!("unknown stage: {other}"))),
        };
        Ok(serde_json::to_value(summary).unwrap_or(json!({})))
    })
    .await?;

    Ok(Json(response))
}

async fn list_candidates(State(state): State<OrchestratorState>, Path(job_id): Path<Uuid>) -> ApiResult<Json<Value>> {
    let pairs = state.repo.list_candidates_for_job(job_id).await.map_err(CoreError::from)?;
    Ok(Json(serde_json::to_value(pairs).unwrap_or(json!([]))))
}

async fn candidate_profile(State(state): State<OrchestratorState>, Path((job_id, candidate_id)): Path<(Uuid, Uuid)>) -> ApiResult<Json<Value>> {
    let view = state.profile.get(job_id, candidate_id, Utc::now()).await?;
    Ok(Json(serde_json::to_value(view).unwrap_or(json!({}))))
}

#[derive(Debug, Deserialize, Serialize)]
struct InboundRequest {
    text: String,
}

async fn inbound(State(state): State<OrchestratorState>, Path(conversation_id): Path<Uuid>, headers: HeaderMap, Json(req): Json<InboundRequest>) -> ApiResult<Json<Value>> {
    let payload = serde_json::to_value(&req).unwrap_or(json!({}));
    let route = format!("conversations.{conversation_id}.inbound");
    let ctx = state.stage_context();

    let response = with_idempotency(&state, &route, idempotency_key(&headers), &payload, || async move {
        let outcome = stages::process_inbound(&ctx, conversation_id, &req.text).await?;
        Ok(json!({"mode": outcome.mode, "reply": outcome.reply}))
    })
    .await?;

    Ok(Json(response))
}

async fn pre_resume_start(State(state): State<OrchestratorState>, Path((job_id, candidate_id)): Path<(Uuid, Uuid)>) -> ApiResult<Json<Value>> {
    let ctx = state.stage_context();
    let session = stages::run_pre_resume_start(&ctx, job_id, candidate_id).await?;
    Ok(Json(serde_json::to_value(session).unwrap_or(json!({}))))
}

async fn pre_resume_get(State(state): State<OrchestratorState>, Path(conversation_id): Path<Uuid>) -> ApiResult<Json<Value>> {
    let ctx = state.stage_context();
    let session = stages::get_pre_resume(&ctx, conversation_id).await?;
    match session {
        Some(session) => Ok(Json(serde_json::to_value(session).unwrap_or(json!({})))),
        None => Err(ApiError(CoreError::NotFound(format!("no pre_resume session for conversation {conversation_id}")))),
    }
}

#[derive(Debug, Deserialize)]
struct PreResumeUnreachableRequest {
    error: String,
}

async fn pre_resume_unreachable(State(state): State<OrchestratorState>, Path(conversation_id): Path<Uuid>, Json(req): Json<PreResumeUnreachableRequest>) -> ApiResult<Json<Value>> {
    let ctx = state.stage_context();
    let session = stages::mark_pre_resume_unreachable(&ctx, conversation_id, req.error).await?;
    match session {
        Some(session) => Ok(Json(serde_json::to_value(session).unwrap_or(json!({})))),
        None => Err(ApiError(CoreError::NotFound(format!("no pre_resume session for conversation {conversation_id}")))),
    }
}

async fn pre_resume_tick(State(state): State<OrchestratorState>) -> ApiResult<Json<Value>> {
    let ctx = state.stage_context();
    let summary = stages::run_followup_tick(&ctx).await?;
    Ok(Json(serde_json::to_value(summary).unwrap_or(json!({}))))
}

#[derive(Debug, Deserialize)]
struct DispatchRequest {
    job_id: Option<Uuid>,
    #[serde(default = "default_dispatch_limit")]
    limit: usize,
}

fn default_dispatch_limit() -> usize {
    50
}

async fn dispatch_outbound(State(state): State<OrchestratorState>, Json(req): Json<DispatchRequest>) -> ApiResult<Json<Value>> {
    let summary = dispatcher::dispatch(state.repo.clone(), state.messaging.clone(), &state.config.dispatch, req.job_id, req.limit, Utc::now()).await.map_err(|e| CoreError::Dispatch(e))?;
    Ok(Json(serde_json::to_value(summary).unwrap_or(json!({}))))
}

#[derive(Debug, Deserialize, Serialize)]
struct IngestSignalRequest {
    candidate_id: Uuid,
    source_type: String,
    source_id: String,
    signal_type: String,
    category: String,
    title: String,
    detail: String,
    payload: Value,
}

fn raw_impact_for(req: &IngestSignalRequest) -> Option<(f64, Option<f64>)> {
    match req.source_type.as_str() {
        "assessment" => {
            let score = req.payload.get("score_0_100").and_then(|v| v.as_f64());
            let status = req.payload.get("status").and_then(|v| v.as_str()).unwrap_or("");
            let (impact, confidence) = signals::assessment_impact(&AssessmentSignalInput { score_0_100: score, status });
            Some((impact, Some(confidence)))
        }
        "pre_resume_event" => {
            let key = req.payload.get("event_type_or_status").and_then(|v| v.as_str()).unwrap_or("");
            let (impact, confidence) = signals::pre_resume_event_impact(key);
            Some((impact, Some(confidence)))
        }
        "operation_log" => {
            let operation = req.payload.get("operation").and_then(|v| v.as_str()).unwrap_or("");
            let status = req.payload.get("status").and_then(|v| v.as_str()).unwrap_or("");
            signals::operation_log_impact(operation, status).map(|(i, c)| (i, Some(c)))
        }
        "match_snapshot" => {
            let status = req.payload.get("status").and_then(|v| v.as_str()).unwrap_or("");
            let score = req.payload.get("score_0_100").and_then(|v| v.as_f64());
            let interview_status = req.payload.get("interview_status").and_then(|v| v.as_str());
            let (impact, confidence) = signals::match_snapshot_impact(&MatchSnapshotInput { status, score_0_100: score, interview_status });
            Some((impact, Some(confidence)))
        }
        _ => None,
    }
}

fn source_type_of(value: &str) -> Option<crate::domain::SourceType> {
    match value {
        "assessment" => Some(crate::domain::SourceType::Assessment),
        "pre_resume_event" => Some(crate::domain::SourceType::PreResumeEvent),
        "operation_log" => Some(crate::domain::SourceType::OperationLog),
        "match_snapshot" => Some(crate::domain::SourceType::MatchSnapshot),
        _ => None,
    }
}

async fn ingest_signals(State(state): State<OrchestratorState>, Path(job_id): Path<Uuid>, headers: HeaderMap, Json(req): Json<IngestSignalRequest>) -> ApiResult<Json<Value>> {
    let payload = serde_json::to_value(&req).unwrap_or(json!({}));
    let route = format!("jobs.{job_id}.signals");

    let response = with_idempotency(&state, &route, idempotency_key(&headers), &payload, || async move {
        let source_type = source_type_of(&req.source_type).ok_or_else(|| CoreError::Validation(format!("unknown source_type: {}", req.source_type)))?;
        let Some((raw_impact, raw_confidence)) = raw_impact_for(&req) else {
            return Ok(json!({"ingested": false, "reason": "operation not qualified for signal ingestion"}));
        };

        let signal = signals::build_signal(&state.rules_engine, job_id, req.candidate_id, source_type, req.source_id, req.signal_type, req.category, req.title, req.detail, raw_impact, raw_confidence, Utc::now());
        let stored = state.repo.upsert_signal(signal).await.map_err(CoreError::from)?;
        Ok(json!({"ingested": true, "signal": stored}))
    })
    .await?;

    Ok(Json(response))
}

async fn signals_view(State(state): State<OrchestratorState>, Path(job_id): Path<Uuid>) -> ApiResult<Json<Value>> {
    let pairs = state.repo.list_candidates_for_job(job_id).await.map_err(CoreError::from)?;
    let base_scores = pairs.into_iter().map(|(c, m)| (c.id, m.score * 100.0)).collect();
    let signals = state.repo.list_signals_for_job(job_id).await.map_err(CoreError::from)?;
    let view = signals::build_job_view(&base_scores, &signals);
    Ok(Json(serde_json::to_value(view).unwrap_or(json!({}))))
}

/// Operational diagnostic, not a product-facing ranking: raw signal counts
/// by role and source, plus which candidates have no signal at all.
async fn signals_coverage(State(state): State<OrchestratorState>, Path(job_id): Path<Uuid>) -> ApiResult<Json<Value>> {
    let pairs = state.repo.list_candidates_for_job(job_id).await.map_err(CoreError::from)?;
    let all_candidates: Vec<Uuid> = pairs.into_iter().map(|(c, _)| c.id).collect();
    let signals = state.repo.list_signals_for_job(job_id).await.map_err(CoreError::from)?;
    let report = signals::signals_coverage(&all_candidates, &signals);
    Ok(Json(serde_json::to_value(report).unwrap_or(json!({}))))
}

#[derive(Debug, Deserialize)]
struct ReadSourceRequest {
    source: String,
}

async fn switch_read_source(State(state): State<OrchestratorState>, Json(req): Json<ReadSourceRequest>) -> ApiResult<Json<Value>> {
    let source = match req.source.to_ascii_lowercase().as_str() {
        "postgres" | "pg" => ReadSource::Postgres,
        "sqlite" => ReadSource::Sqlite,
        other => return Err(ApiError(CoreError::Validation(format!("unknown read source: {other}")))),
    };
    *state.read_source.write().await = source;
    Ok(Json(json!({"read_source": req.source})))
}

#[derive(Debug, Deserialize)]
struct DualWriteStrictRequest {
    strict: bool,
}

async fn set_dual_write_strict(State(state): State<OrchestratorState>, Json(req): Json<DualWriteStrictRequest>) -> ApiResult<Json<Value>> {
    let Some(dual_write) = &state.dual_write else {
        return Err(ApiError(CoreError::Validation("dual-write is not configured for this deployment".to_string())));
    };
    dual_write.set_strict(req.strict);
    Ok(Json(json!({"strict": dual_write.is_strict()})))
}

async fn parity_report(State(state): State<OrchestratorState>) -> ApiResult<Json<Value>> {
    let Some(dual_write) = &state.dual_write else {
        return Err(ApiError(CoreError::Validation("dual-write is not configured for this deployment".to_string())));
    };
    let report = crate::repository::migration::parity_report(dual_write.primary(), dual_write.mirror(), 20).await.map_err(CoreError::from)?;
    Ok(Json(serde_json::to_value(report).unwrap_or(json!({}))))
}

async fn backfill_run(State(state): State<OrchestratorState>) -> ApiResult<Json<Value>> {
    let Some(dual_write) = &state.dual_write else {
        return Err(ApiError(CoreError::Validation("dual-write is not configured for this deployment".to_string())));
    };
    let report = crate::repository::migration::backfill_run(dual_write.primary(), dual_write.mirror()).await.map_err(CoreError::from)?;
    Ok(Json(serde_json::to_value(report).unwrap_or(json!({}))))
}
