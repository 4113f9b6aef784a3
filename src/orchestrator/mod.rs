//! Workflow orchestration: the eight idempotent stages plus the HTTP
//! surface that drives them, gated by scope-based auth and replay-safe
//! idempotency keys.

pub mod api;
pub mod auth;
pub mod stages;

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::config::{Config, ReadSource};
use crate::fsm::templates::TemplateSet;
use crate::profile::{ExplanationCache, ProfileService};
use crate::providers::{AuthDecision, InterviewProvider, LlmResponder, MessagingProvider};
use crate::repository::dual_write::DualWriteRepository;
use crate::repository::Repository;
use crate::signals::rules::SignalRulesEngine;

/// Everything an orchestrator HTTP handler needs, cloneable per the usual
/// axum `State` convention (every field is an `Arc` or cheaply cloneable).
#[derive(Clone)]
pub struct OrchestratorState {
    pub repo: Arc<dyn Repository>,
    pub dual_write: Option<Arc<DualWriteRepository>>,
    pub messaging: Arc<dyn MessagingProvider>,
    pub interview: Arc<dyn InterviewProvider>,
    pub responder: Option<Arc<dyn LlmResponder>>,
    pub auth: Arc<dyn AuthDecision>,
    pub config: Arc<Config>,
    pub templates: Arc<TemplateSet>,
    pub rules_engine: Arc<SignalRulesEngine>,
    pub profile: Arc<ProfileService>,
    pub read_source: Arc<RwLock<ReadSource>>,
}

impl OrchestratorState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repo: Arc<dyn Repository>,
        dual_write: Option<Arc<DualWriteRepository>>,
        messaging: Arc<dyn MessagingProvider>,
        interview: Arc<dyn InterviewProvider>,
        responder: Option<Arc<dyn LlmResponder>>,
        auth: Arc<dyn AuthDecision>,
        config: Arc<Config>,
        templates: Arc<TemplateSet>,
        rules_engine: Arc<SignalRulesEngine>,
    ) -> Self {
        let profile = Arc::new(ProfileService {
            repo: repo.clone(),
            responder: responder.clone(),
            cache: Arc::new(ExplanationCache::new(config.explanation_cache_ttl_secs)),
            config: config.clone(),
        });
        let read_source = Arc::new(RwLock::new(config.read_source));
        Self { repo, dual_write, messaging, interview, responder, auth, config, templates, rules_engine, profile, read_source }
    }

    fn stage_context(&self) -> stages::StageContext {
        stages::StageContext { repo: self.repo.clone(), messaging: self.messaging.clone(), config: self.config.clone(), templates: self.templates.clone() }
    }
}
