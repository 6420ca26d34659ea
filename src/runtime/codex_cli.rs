use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;
use std::time::Duration;

use ai_session::{patterns, SessionCommandHelper};
use async_trait::async_trait;
use tokio::time::sleep;
use tracing::debug;

use super::RuntimeAdapter;
use crate::error::AgentMuxError;
use crate::model::RuntimeType;

const DETECTION_CACHE_TTL: Duration = Duration::from_secs(5);

/// `codex-cli`: single-line prompt runtime, no shell-mode or `/resume`
/// quirks of its own.
pub struct CodexCliRuntime {
    detection_cache: RwLock<HashMap<String, (bool, std::time::Instant)>>,
}

impl CodexCliRuntime {
    pub fn new() -> Self {
        Self {
            detection_cache: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for CodexCliRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RuntimeAdapter for CodexCliRuntime {
    fn runtime_type(&self) -> RuntimeType {
        RuntimeType::CodexCli
    }

    async fn execute_runtime_init_script(
        &self,
        helper: &SessionCommandHelper,
        session_name: &str,
        cwd: &Path,
        flags: &[String],
    ) -> Result<(), AgentMuxError> {
        let mut command = String::from("codex");
        for flag in flags {
            command.push(' ');
            command.push_str(flag);
        }
        debug!(%session_name, cwd = %cwd.display(), %command, "launching codex-cli");
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
        let detected = pane.contains("codex") || patterns::is_at_prompt(&pane);

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
