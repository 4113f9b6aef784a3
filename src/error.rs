//! Error taxonomy shared across components.
//!
//! Component modules define their own narrow error enum; each converts into
//! [`CoreError`] via `#[from]` so the HTTP boundary maps errors to a status
//! code and a stable machine-readable code with a single `match`, rather than
//! scattering string inspection across handlers.

use thiserror::Error;

/// The kind of failure, independent of which component raised it.
///
/// Mirrors the taxonomy every caller-facing surface must report: a stable
/// code plus a human message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    PreconditionFailed,
    ProviderError,
    BudgetExhausted,
    MirrorError,
    Internal,
}

impl ErrorKind {
    /// Stable machine-readable code surfaced to callers alongside the message.
    pub fn code(self) -> &'static str {
        match self {
            Self::Validation => "validation_error",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::PreconditionFailed => "precondition_failed",
            Self::ProviderError => "provider_error",
            Self::BudgetExhausted => "budget_exhausted",
            Self::MirrorError => "mirror_error",
            Self::Internal => "internal",
        }
    }

    /// HTTP status equivalent, for transports that want one.
    pub fn http_status(self) -> u16 {
        match self {
            Self::Validation => 400,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::PreconditionFailed => 422,
            Self::ProviderError => 502,
            Self::BudgetExhausted => 200,
            Self::MirrorError => 500,
            Self::Internal => 500,
        }
    }
}

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("pool error: {0}")]
    Pool(String),
    #[error("query error: {0}")]
    Query(String),
}

#[derive(Debug, Error)]
pub enum MatchingError {
    #[error("invalid matching configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Error)]
pub enum FsmError {
    #[error("session {0} already exists")]
    AlreadyExists(String),
    #[error("session {0} not found")]
    NotFound(String),
}

#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("invalid scoring configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("invalid rules configuration: {0}")]
    InvalidRules(String),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("provider error: {0}")]
    Provider(String),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing authorization header")]
    MissingHeader,
    #[error("malformed authorization header")]
    Malformed,
    #[error("invalid token")]
    InvalidToken,
    #[error("insufficient scope: required {0}")]
    InsufficientScope(String),
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    RequestFailed(String),
    #[error("provider returned malformed payload: {0}")]
    MalformedPayload(String),
}

/// Top-level error type consumed by the HTTP boundary.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    PreconditionFailed(String),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("budget exhausted: {0}")]
    BudgetExhausted(String),
    #[error("mirror write failed: {0}")]
    Mirror(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Fsm(#[from] FsmError),
    #[error(transparent)]
    Scoring(#[from] ScoringError),
    #[error(transparent)]
    Signal(#[from] SignalError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Matching(#[from] MatchingError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::PreconditionFailed(_) => ErrorKind::PreconditionFailed,
            Self::Provider(_) => ErrorKind::ProviderError,
            Self::BudgetExhausted(_) => ErrorKind::BudgetExhausted,
            Self::Mirror(_) => ErrorKind::MirrorError,
            Self::Repository(RepositoryError::NotFound(_)) => ErrorKind::NotFound,
            Self::Repository(RepositoryError::Conflict(_)) => ErrorKind::Conflict,
            Self::Repository(_) => ErrorKind::Internal,
            Self::Fsm(FsmError::AlreadyExists(_)) => ErrorKind::Conflict,
            Self::Fsm(FsmError::NotFound(_)) => ErrorKind::NotFound,
            Self::Scoring(_) => ErrorKind::Internal,
            Self::Signal(_) => ErrorKind::Internal,
            Self::Dispatch(_) => ErrorKind::ProviderError,
            Self::Auth(_) => ErrorKind::Validation,
            Self::Matching(_) => ErrorKind::Internal,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn code(&self) -> &'static str {
        self.kind().code()
    }
}
