//! Engine-level error taxonomy.

pub use crate::model::ParseError;

/// Rejected configuration. Fatal, surfaced before any analysis runs.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown fault model '{0}' (expected crash or byzantine)")]
    UnknownFaultModel(String),

    #[error("{model} fault model needs at least {minimum} replicas, got {replicas}")]
    TooFewReplicas {
        model: String,
        replicas: usize,
        minimum: usize,
    },

    #[error("cap '{name}' must be between {min} and {max}, got {value}")]
    CapOutOfRange {
        name: String,
        value: u64,
        min: u64,
        max: u64,
    },

    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("invalid cost spec '{spec}': {reason}")]
    InvalidCostSpec { spec: String, reason: String },

    #[error("config file {path}: {reason}")]
    File { path: String, reason: String },
}

/// Failure reported by a [`ConsensusChannel`](crate::capability::ConsensusChannel).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AgreementFailed {
    #[error("no quorum: needed {needed} replicas, got {got}")]
    NoQuorum { needed: usize, got: usize },

    #[error("proposal rejected: {0}")]
    Rejected(String),
}

/// Dispatch through a routing table that does not match the descriptor.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RouteError {
    #[error("effect '{0}' is not part of the descriptor")]
    UnknownEffect(String),

    #[error("effect '{effect_ref}' is routed to {mode}")]
    WrongMode { effect_ref: String, mode: String },

    #[error(transparent)]
    Agreement(#[from] AgreementFailed),
}

/// Umbrella error for library entry points.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("canonicalization error: {0}")]
    Canonical(String),

    #[error("analysis task failed: {0}")]
    Task(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Parse and config errors are the user's to fix; everything else is an
    /// environment failure.
    pub fn is_user_error(&self) -> bool {
        matches!(self, EngineError::Parse(_) | EngineError::Config(_))
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
