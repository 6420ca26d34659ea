//! agentmux-core - supervises a fleet of long-lived interactive AI-CLI
//! processes (Claude Code, Gemini CLI, Codex CLI) as registered agents,
//! from creation through escalation, registration, message delivery,
//! monitoring, and teardown.

pub mod config;
pub mod continuation;
pub mod delivery;
pub mod error;
pub mod events;
pub mod model;
pub mod registration;
pub mod runtime;
pub mod storage;

pub use config::AgentMuxConfig;
pub use error::{AgentMuxError, ErrorResponse};
pub use registration::{
    AgentHealth, CreateAgentSessionOutcome, CreateAgentSessionRequest, RegistrationEngine,
};

/// Initializes the `RUST_LOG`-driven `tracing` subscriber. Delegates to
/// `ai_session`'s setup so both crates share one global subscriber.
pub fn init_logging() {
    ai_session::init_logging();
}
