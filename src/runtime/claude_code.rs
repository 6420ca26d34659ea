use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;
use std::time::Duration;

use ai_session::{SessionCommandHelper, SymbolicKey};
use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::RuntimeAdapter;
use crate::error::AgentMuxError;
use crate::model::RuntimeType;

const DETECTION_CACHE_TTL: Duration = Duration::from_secs(5);

/// `claude-code`: a single-line prompt runtime. `/resume` selects the most
/// recent session when restoring (§4.7.4).
pub struct ClaudeCodeRuntime {
    detection_cache: RwLock<HashMap<String, (bool, std::time::Instant)>>,
}

impl ClaudeCodeRuntime {
    pub fn new() -> Self {
        Self {
            detection_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Sends `/resume`, waits for the session picker, selects the most
    /// recent entry, and re-waits for readiness. Failure is non-fatal.
    pub async fn resume(&self, helper: &SessionCommandHelper, session_name: &str) {
        if let Err(e) = helper.send_message(session_name, "/resume").await {
            warn!(%session_name, error = %e, "resume: failed to send /resume");
            return;
        }
        sleep(Duration::from_secs(2)).await;
        if let Err(e) = helper.send_key(session_name, SymbolicKey::Enter).await {
            warn!(%session_name, error = %e, "resume: failed to confirm picker");
            return;
        }
        sleep(Duration::from_secs(1)).await;
        let ready = self
            .wait_for_runtime_ready(
                helper,
                session_name,
                Duration::from_secs(30),
                Duration::from_secs(1),
            )
            .await;
        if !ready {
            warn!(%session_name, "resume: runtime not ready after /resume, continuing with fresh session state");
        }
    }
}

impl Default for ClaudeCodeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RuntimeAdapter for ClaudeCodeRuntime {
    fn runtime_type(&self) -> RuntimeType {
        RuntimeType::ClaudeCode
    }

    async fn execute_runtime_init_script(
        &self,
        helper: &SessionCommandHelper,
        session_name: &str,
        cwd: &Path,
        flags: &[String],
    ) -> Result<(), AgentMuxError> {
        let mut command = String::from("claude");
        for flag in flags {
            command.push(' ');
            command.push_str(flag);
        }
        debug!(%session_name, cwd = %cwd.display(), %command, "launching claude-code");
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
        let detected = pane.contains("/resume") || pane.contains("/help") || ai_session::patterns::is_at_prompt(&pane);

        self.detection_cache
            .write()
            .unwrap()
            .insert(session_name.to_string(), (detected, std::time::Instant::now()));
        Ok(detected)
    }

    fn clear_detection_cache(&self, session_name: &str) {
        self.detection_cache.write().unwrap().remove(session_name);
    }

    async fn post_initialize(
        &self,
        _helper: &SessionCommandHelper,
        _session_name: &str,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_cache_round_trips() {
        let runtime = ClaudeCodeRuntime::new();
        assert!(runtime
            .detection_cache
            .read()
            .unwrap()
            .get("s1")
            .is_none());
        runtime
            .detection_cache
            .write()
            .unwrap()
            .insert("s1".to_string(), (true, std::time::Instant::now()));
        runtime.clear_detection_cache("s1");
        assert!(runtime
            .detection_cache
            .read()
            .unwrap()
            .get("s1")
            .is_none());
    }
}
