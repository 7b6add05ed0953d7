//! Error types for the multi-agent orchestrator

use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Error, Debug)]
pub enum OrchestratorError {

    // =============================
    // Protocol Errors
    // =============================

    #[error("Model call failed: {0}")]
    ModelCallFailed(String),

    #[error("Action execution failed: {0}")]
    ActionExecutionFailed(String),

    #[error("Agent '{agent}' is not allowed to invoke '{action}'")]
    UnauthorizedAction { agent: String, action: String },

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Turn exceeded the step limit of {0}")]
    TurnStepLimitExceeded(usize),

    #[error("State persistence failed: {0}")]
    PersistenceFailed(String),

    #[error("Invalid action input: {0}")]
    InvalidActionInput(String),

    #[error("Invalid profile field value: {0}")]
    InvalidProfileValue(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
