//! API-key bearer authentication for the HTTP surface.
//!
//! Unlike a per-job worker token, every route here is guarded by a
//! configured API key carrying one or more wildcard-aware scopes (see
//! [`crate::providers::scope_satisfies`]). The decision itself is delegated
//! to an [`AuthDecision`] implementation so a deployment can swap in an
//! external identity provider without touching routing.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use subtle::ConstantTimeEq;

use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::providers::{AuthDecision, AuthDecisionResult, Principal};

/// Looks up a bearer token against the statically configured key table.
/// Intended as the default [`AuthDecision`] for deployments that don't run a
/// separate identity service.
pub struct EnvAuthDecision {
    config: AuthConfig,
}

impl EnvAuthDecision {
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    fn lookup(&self, token: &str) -> Option<(Vec<String>, bool)> {
        let is_admin = self.config.admin_keys.iter().any(|k| constant_time_eq(k, token));
        if is_admin {
            return Some((vec!["*".to_string()], true));
        }
        self.config
            .api_keys
            .iter()
            .find(|(key, _)| constant_time_eq(key, token))
            .map(|(_, scopes)| (scopes.clone(), false))
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.len() == b.len() && a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[async_trait::async_trait]
impl AuthDecision for EnvAuthDecision {
    async fn decide(&self, authorization_header: Option<&str>, required_scopes: &[String], require_admin: bool) -> Result<AuthDecisionResult, AuthError> {
        let header = authorization_header.ok_or(AuthError::MissingHeader)?;
        let token = header.strip_prefix("Bearer ").ok_or(AuthError::Malformed)?;
        let Some((scopes, is_admin)) = self.lookup(token) else {
            return Err(AuthError::InvalidToken);
        };

        if require_admin && !is_admin {
            return Ok(AuthDecisionResult { allowed: false, status_code: 403, principal: None });
        }
        let satisfies_all = required_scopes.iter().all(|s| crate::providers::scope_satisfies(&scopes, s));
        if !satisfies_all {
            return Ok(AuthDecisionResult { allowed: false, status_code: 403, principal: None });
        }

        Ok(AuthDecisionResult { allowed: true, status_code: 200, principal: Some(Principal { subject: token.to_string(), scopes, is_admin }) })
    }
}

/// Routes matched by prefix to the scopes (and admin requirement) they need.
/// Checked in order; the first match wins. A route with no match requires no
/// scope beyond a valid key (covers read-only views like `/health`).
const ROUTE_SCOPES: &[(&str, &[&str], bool)] = &[
    ("/jobs", &["jobs:read"], false),
    ("/candidates", &["candidates:read"], false),
    ("/signals", &["signals:read"], false),
    ("/dispatch", &["outbound:write"], false),
    ("/pre_resume", &["conversations:write"], false),
    ("/conversations", &["conversations:write"], false),
    ("/inbound", &["conversations:write"], false),
    ("/admin", &[], true),
];

fn required_scopes_for(path: &str) -> (Vec<String>, bool) {
    for (prefix, scopes, admin) in ROUTE_SCOPES {
        if path.starts_with(prefix) {
            return (scopes.iter().map(|s| s.to_string()).collect(), *admin);
        }
    }
    (Vec::new(), false)
}

/// Shared auth state for the middleware, holding the configured decision
/// backend behind an `Arc` so it's cheap to clone into axum's `State`.
#[derive(Clone)]
pub struct AuthState {
    pub decision: Arc<dyn AuthDecision>,
}

/// Authenticates every request against the route's required scopes and
/// stashes the resulting [`Principal`] as a request extension for handlers
/// that want to log or further narrow on it.
pub async fn auth_middleware(State(auth): State<AuthState>, mut request: Request, next: Next) -> Result<Response, StatusCode> {
    let path = request.uri().path().to_string();
    if path == "/health" {
        return Ok(next.run(request).await);
    }

    let (scopes, require_admin) = required_scopes_for(&path);
    let header = request.headers().get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok());

    match auth.decision.decide(header, &scopes, require_admin).await {
        Ok(result) if result.allowed => {
            if let Some(principal) = result.principal {
                request.extensions_mut().insert(principal);
            }
            Ok(next.run(request).await)
        }
        Ok(result) => Err(StatusCode::from_u16(result.status_code).unwrap_or(StatusCode::FORBIDDEN)),
        Err(AuthError::MissingHeader) | Err(AuthError::Malformed) | Err(AuthError::InvalidToken) => Err(StatusCode::UNAUTHORIZED),
        Err(AuthError::InsufficientScope(_)) => Err(StatusCode::FORBIDDEN),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AuthConfig {
        AuthConfig { api_keys: vec![("key-1".to_string(), vec!["jobs:read".to_string()])], admin_keys: vec!["root-key".to_string()] }
    }

    #[tokio::test]
    async fn admin_key_bypasses_scope_check() {
        let decision = EnvAuthDecision::new(config());
        let result = decision.decide(Some("Bearer root-key"), &["jobs:write".to_string()], true).await.unwrap();
        assert!(result.allowed);
        assert!(result.principal.unwrap().is_admin);
    }

    #[tokio::test]
    async fn scoped_key_rejected_outside_its_scope() {
        let decision = EnvAuthDecision::new(config());
        let result = decision.decide(Some("Bearer key-1"), &["jobs:write".to_string()], false).await.unwrap();
        assert!(!result.allowed);
    }

    #[tokio::test]
    async fn missing_header_errors() {
        let decision = EnvAuthDecision::new(config());
        assert!(matches!(decision.decide(None, &[], false).await, Err(AuthError::MissingHeader)));
    }
}
