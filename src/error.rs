//! Error kinds surfaced by public operations, per §7.

use thiserror::Error;

/// Top-level error type for the agent session lifecycle engine.
///
/// Public operations (`createAgentSession`, `sendMessageToAgent`, ...) match
/// on this to render the wire-level `{success: false, error, sessionName?}`
/// shape; internal plumbing composes with `anyhow::Result` the way the rest
/// of the stack does and converts at the boundary.
#[derive(Debug, Error)]
pub enum AgentMuxError {
    #[error("no such session: {0}")]
    NoSuchSession(String),

    #[error("session already exists: {0}")]
    AlreadyExists(String),

    #[error("failed to spawn session: {0}")]
    SpawnFailed(String),

    #[error("failed to write to session: {0}")]
    WriteFailed(String),

    #[error("runtime did not become ready within the deadline for session {session_name}")]
    RuntimeNotReady { session_name: String },

    #[error("failed to deliver message to {session_name} after {attempts} attempts")]
    PromptDeliveryFailed { session_name: String, attempts: u32 },

    #[error("registration for {session_name} timed out after {elapsed_secs}s")]
    RegistrationTimedOut {
        session_name: String,
        elapsed_secs: u64,
    },

    #[error("operation on {session_name} was aborted")]
    Aborted { session_name: String },

    #[error("storage error: {0}")]
    StorageIOError(String),

    #[error("config missing: {0}")]
    ConfigMissing(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<ai_session::SessionError> for AgentMuxError {
    fn from(e: ai_session::SessionError) -> Self {
        match e {
            ai_session::SessionError::NoSuchSession(n) => AgentMuxError::NoSuchSession(n),
            ai_session::SessionError::AlreadyExists(n) => AgentMuxError::AlreadyExists(n),
            ai_session::SessionError::SpawnFailed(m) => AgentMuxError::SpawnFailed(m),
            ai_session::SessionError::WriteFailed(m) => AgentMuxError::WriteFailed(m),
            ai_session::SessionError::Io(io) => AgentMuxError::Other(io.into()),
        }
    }
}

/// The wire-level error shape for public operations: `{success: false,
/// error, sessionName?}`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_name: Option<String>,
}

impl ErrorResponse {
    pub fn new(err: &AgentMuxError, session_name: Option<String>) -> Self {
        Self {
            success: false,
            error: err.to_string(),
            session_name,
        }
    }
}
