//! Error taxonomy for the resync and reconciliation engine.
//!
//! Mirrors the policy table in the specification: each variant names the
//! subsystem it originates from and carries enough context for the
//! orchestrator to decide whether to retry, record, or abort.

use thiserror::Error;

/// Errors raised while compiling or evaluating a mapping/selector expression.
#[derive(Debug, Error, Clone)]
pub enum ExpressionError {
    #[error("failed to compile expression `{expr}`: {reason}")]
    Compile { expr: String, reason: String },

    #[error("failed to evaluate expression: {0}")]
    Eval(String),
}

/// Errors surfaced by the Portal Client.
#[derive(Debug, Error)]
pub enum PortalError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("rate limited, retry after {retry_after_secs:?}s")]
    RateLimit { retry_after_secs: Option<u64> },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("server error: {0}")]
    Server(String),

    #[error("request timed out")]
    Timeout,
}

impl PortalError {
    /// Whether this error is worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PortalError::Transport(_)
                | PortalError::RateLimit { .. }
                | PortalError::Server(_)
                | PortalError::Timeout
        )
    }
}

/// Per-entity or per-subgraph errors raised by the State Applier.
#[derive(Debug, Error, Clone)]
pub enum ApplyError {
    #[error("mapping error on field `{field}`: {reason}")]
    Mapping { field: String, reason: String },

    #[error("cyclic dependency detected among entities: {0:?}")]
    CyclicDependency(Vec<String>),

    #[error("entity deletion threshold exceeded: {to_delete}/{existing} > {threshold}")]
    DeletionThresholdExceeded {
        to_delete: usize,
        existing: usize,
        threshold: f64,
    },

    #[error("unresolved relation `{relation}` on entity `{identifier}`")]
    UnresolvedRelation { identifier: String, relation: String },

    #[error("search query for relation `{relation}` on entity `{identifier}` matched {matches} entities")]
    AmbiguousSearchQuery {
        identifier: String,
        relation: String,
        matches: usize,
    },
}

/// Top-level engine error, accumulated non-fatally during a resync or
/// surfaced immediately when fatal (see the specification's propagation
/// policy).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Portal(#[from] PortalError),

    #[error(transparent)]
    Apply(#[from] ApplyError),

    #[error(transparent)]
    Expression(#[from] ExpressionError),

    #[error("adapter error: {0}")]
    Adapter(String),

    #[error("no active event on this execution path")]
    NoActiveEvent,

    #[error("resync aborted")]
    AbortRequested,

    #[error("webhook authentication failed")]
    WebhookAuthFailed,

    #[error("webhook payload validation failed")]
    WebhookValidationFailed,
}

impl EngineError {
    /// Fatal errors abort the current resync immediately instead of being
    /// accumulated and reported at event close.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::Config(_) | EngineError::Portal(PortalError::Auth(_))
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
