use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;
use std::time::Duration;

use ai_session::{patterns, SessionCommandHelper, SymbolicKey};
use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::RuntimeAdapter;
use crate::error::AgentMuxError;
use crate::model::RuntimeType;

const DETECTION_CACHE_TTL: Duration = Duration::from_secs(5);

/// Maximum Escape retries to recover from an unexpected shell-mode prompt.
pub const MAX_ESCAPE_ATTEMPTS: u32 = 3;

/// `gemini-cli`: a full-screen TUI. Escape permanently defocuses the
/// input, Ctrl-C on an empty prompt triggers `/quit`, and Ctrl-U is
/// ignored — callers must never rely on those as safe no-ops here.
pub struct GeminiCliRuntime {
    detection_cache: RwLock<HashMap<String, (bool, std::time::Instant)>>,
}

impl GeminiCliRuntime {
    pub fn new() -> Self {
        Self {
            detection_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Recovers from shell-mode by sending Escape up to
    /// `MAX_ESCAPE_ATTEMPTS` times, re-checking the prompt after each.
    /// Returns true once the shell-mode prompt is gone.
    pub async fn recover_from_shell_mode(
        &self,
        helper: &SessionCommandHelper,
        session_name: &str,
    ) -> bool {
        for attempt in 1..=MAX_ESCAPE_ATTEMPTS {
            let pane = match helper.capture_pane(session_name, Some(5)) {
                Ok(p) => p,
                Err(_) => return false,
            };
            if !patterns::SHELL_MODE_PROMPT_PATTERNS.is_match(&pane) {
                return true;
            }
            debug!(%session_name, attempt, "sending Escape to recover from shell mode");
            if helper
                .send_key(session_name, SymbolicKey::Escape)
                .await
                .is_err()
            {
                return false;
            }
            sleep(Duration::from_millis(300)).await;
        }
        match helper.capture_pane(session_name, Some(5)) {
            Ok(p) => !patterns::SHELL_MODE_PROMPT_PATTERNS.is_match(&p),
            Err(_) => false,
        }
    }
}

impl Default for GeminiCliRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RuntimeAdapter for GeminiCliRuntime {
    fn runtime_type(&self) -> RuntimeType {
        RuntimeType::GeminiCli
    }

    async fn execute_runtime_init_script(
        &self,
        helper: &SessionCommandHelper,
        session_name: &str,
        cwd: &Path,
        flags: &[String],
    ) -> Result<(), AgentMuxError> {
        let mut command = String::from("gemini");
        for flag in flags {
            command.push(' ');
            command.push_str(flag);
        }
        debug!(%session_name, cwd = %cwd.display(), %command, "launching gemini-cli");
        helper
            .send_message(session_name, &command)
            .await
            .map_err(|e| AgentMuxError::WriteFailed(e.to_string()))
    }

    async fn detect_runtime_with_command(
        &self,
        helper: &SessionCommandHelper,
        session_name: &str,
        force_refresh: bool,
    ) -> Result<bool, AgentMuxError> {
        if !force_refresh {
            if let Some((detected, at)) = self.detection_cache.read().unwrap().get(session_name) {
                if at.elapsed() < DETECTION_CACHE_TTL {
                    return Ok(*detected);
                }
            }
        }

        helper
            .send_message(session_name, "/")
            .await
            .map_err(|e| AgentMuxError::WriteFailed(e.to_string()))?;
        sleep(Duration::from_millis(300)).await;

        let pane = helper
            .capture_pane(session_name, Some(20))
            .map_err(AgentMuxError::from)?;
        let detected = pane.contains("gemini") || patterns::is_at_prompt(&pane);

        self.detection_cache
            .write()
            .unwrap()
            .insert(session_name.to_string(), (detected, std::time::Instant::now()));
        Ok(detected)
    }

    fn clear_detection_cache(&self, session_name: &str) {
        self.detection_cache.write().unwrap().remove(session_name);
    }

    /// Runs the workspace allowlist command so the runtime can read its
    /// own registration prompt file from `{projectPath}/.agentmux/prompts`.
    async fn post_initialize(
        &self,
        helper: &SessionCommandHelper,
        session_name: &str,
    ) -> anyhow::Result<()> {
        if let Err(e) = helper.send_message(session_name, "/directory add .agentmux").await {
            warn!(%session_name, error = %e, "gemini-cli postInitialize hook failed, continuing");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_escape_attempts_is_bounded() {
        assert!(MAX_ESCAPE_ATTEMPTS > 0 && MAX_ESCAPE_ATTEMPTS <= 5);
    }
}
