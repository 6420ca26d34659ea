//! # ai-session
//!
//! PTY-backed session management for a fleet of supervised, long-lived
//! interactive AI-CLI processes. Sessions are addressed by a caller-chosen
//! name rather than a generated id, so higher layers can talk about "the
//! session for agent X" directly.
//!
//! ## Modules
//!
//! - [`cleanup`] - pure ANSI/CSI/OSC/TUI-border text cleaners.
//! - [`patterns`] - shared terminal-state constants and `is_at_prompt`.
//! - [`core`] - the Session Backend: spawn, write, capture, subscribe, kill.
//! - [`command`] - the Session Command Helper's keystroke semantics.
//! - [`persistence`] - durable `{sessionName -> RegisteredSession}` records.
//! - [`exit_monitor`] - watches backend exit notifications.
//! - [`atomic`] - the write-temp-then-rename protocol used across the crate.

pub mod atomic;
pub mod cleanup;
pub mod command;
pub mod core;
pub mod exit_monitor;
pub mod patterns;
pub mod persistence;

pub use command::{SessionCommandHelper, TimingProfile};
pub use core::{
    Session, SessionConfig, SessionError, SessionInfo, SessionManager, SessionResult,
    SessionStatus, SymbolicKey, TerminalHandle,
};
pub use exit_monitor::RuntimeExitMonitor;
pub use persistence::{PersistedSessionStore, RegisteredSession};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the logging system (`RUST_LOG`-driven `tracing` subscriber).
pub fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
