//! Runtime Adapter (§4.4): a polymorphic capability set over the three
//! supported interactive AI CLIs.

mod claude_code;
mod codex_cli;
mod flags;
mod gemini_cli;

pub use claude_code::ClaudeCodeRuntime;
pub use codex_cli::CodexCliRuntime;
pub use flags::{resolve_skill_flags, Skill};
pub use gemini_cli::{GeminiCliRuntime, MAX_ESCAPE_ATTEMPTS};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ai_session::SessionCommandHelper;

use crate::error::AgentMuxError;
use crate::model::RuntimeType;

/// Capability set every runtime flavor implements. Methods act on a
/// session by name through the shared command helper rather than owning
/// any session state themselves, since one adapter instance is reused
/// across every session of its runtime type.
#[async_trait]
pub trait RuntimeAdapter: Send + Sync {
    fn runtime_type(&self) -> RuntimeType;

    /// Writes the runtime's launch command, composed from the configured
    /// template plus resolved skill flags, and returns without waiting
    /// for readiness.
    async fn execute_runtime_init_script(
        &self,
        helper: &SessionCommandHelper,
        session_name: &str,
        cwd: &std::path::Path,
        flags: &[String],
    ) -> Result<(), AgentMuxError>;

    /// Sends a probe and inspects the pane for a completion/menu
    /// signature, caching the result per session for a short TTL.
    async fn detect_runtime_with_command(
        &self,
        helper: &SessionCommandHelper,
        session_name: &str,
        force_refresh: bool,
    ) -> Result<bool, AgentMuxError>;

    fn clear_detection_cache(&self, session_name: &str);

    /// Polls `capturePane` until the prompt appears or timeout elapses.
    async fn wait_for_runtime_ready(
        &self,
        helper: &SessionCommandHelper,
        session_name: &str,
        timeout: Duration,
        interval: Duration,
    ) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Ok(pane) = helper.capture_pane(session_name, Some(20)) {
                if ai_session::patterns::is_at_prompt(&pane) {
                    return true;
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Runtime-specific hooks run once the session is ready. Failure is
    /// non-fatal; callers log and continue.
    async fn post_initialize(
        &self,
        helper: &SessionCommandHelper,
        session_name: &str,
    ) -> anyhow::Result<()>;
}

/// Picks the adapter for a resolved runtime type.
pub fn adapter_for(runtime_type: RuntimeType) -> Arc<dyn RuntimeAdapter> {
    match runtime_type {
        RuntimeType::ClaudeCode => Arc::new(ClaudeCodeRuntime::new()),
        RuntimeType::GeminiCli => Arc::new(GeminiCliRuntime::new()),
        RuntimeType::CodexCli => Arc::new(CodexCliRuntime::new()),
    }
}
