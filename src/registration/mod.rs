//! Agent Registration Engine (§4.7): session creation with intelligent
//! recovery, two-step progressive escalation, and registration-prompt
//! delivery.

mod escalation;
mod prompt;

pub use prompt::PromptCache;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ai_session::{
    PersistedSessionStore, RegisteredSession, RuntimeExitMonitor, SessionCommandHelper,
    SessionConfig,
};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::AgentMuxConfig;
use crate::error::AgentMuxError;
use crate::model::{AgentStatus, RuntimeType};
use crate::runtime::{adapter_for, resolve_skill_flags, RuntimeAdapter, Skill};
use crate::storage::Storage;

/// Output of a successful `createAgentSession`.
#[derive(Debug, Clone)]
pub struct CreateAgentSessionOutcome {
    pub session_name: String,
    pub message: String,
}

/// Inputs to `createAgentSession`.
#[derive(Debug, Clone)]
pub struct CreateAgentSessionRequest {
    pub session_name: String,
    pub role: String,
    pub project_path: PathBuf,
    pub member_id: Option<String>,
    /// If absent, the engine reads the effective runtime type from
    /// storage for this session before doing anything else (§4.7.1).
    pub runtime_type: Option<RuntimeType>,
    pub team_id: Option<String>,
    pub skill_overrides: Vec<String>,
    pub excluded_role_skills: Vec<String>,
}

/// `CreateAgentSessionRequest` with its runtime type resolved to a
/// concrete value. Escalation and prompt delivery work against this
/// rather than the public request so they never re-derive §4.7.1's
/// storage fallback themselves.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedSessionRequest {
    pub session_name: String,
    pub role: String,
    pub project_path: PathBuf,
    pub member_id: Option<String>,
    pub runtime_type: RuntimeType,
    pub team_id: Option<String>,
    pub skill_overrides: Vec<String>,
    pub excluded_role_skills: Vec<String>,
}

/// Health snapshot returned by `checkAgentHealth`.
#[derive(Debug, Clone)]
pub struct AgentHealth {
    pub running: bool,
    pub status: AgentStatus,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// The registration engine, owning the per-session cancellation tokens
/// that implement P7 (cancellation completeness).
pub struct RegistrationEngine {
    helper: Arc<SessionCommandHelper>,
    exit_monitor: Arc<RuntimeExitMonitor>,
    storage: Arc<Storage>,
    persisted: Arc<PersistedSessionStore>,
    prompt_cache: PromptCache,
    skill_catalog: Vec<Skill>,
    cancellation: DashMap<String, CancellationToken>,
    config: AgentMuxConfig,
}

impl RegistrationEngine {
    pub fn new(
        helper: Arc<SessionCommandHelper>,
        exit_monitor: Arc<RuntimeExitMonitor>,
        storage: Arc<Storage>,
        persisted: Arc<PersistedSessionStore>,
        skill_catalog: Vec<Skill>,
    ) -> Self {
        Self::with_config(
            helper,
            exit_monitor,
            storage,
            persisted,
            skill_catalog,
            AgentMuxConfig::default(),
        )
    }

    /// Like [`RegistrationEngine::new`], but configured explicitly (§10.3)
    /// rather than from `AgentMuxConfig::default()` — the regular-role
    /// escalation budget and the delivery retry count come from `config`.
    pub fn with_config(
        helper: Arc<SessionCommandHelper>,
        exit_monitor: Arc<RuntimeExitMonitor>,
        storage: Arc<Storage>,
        persisted: Arc<PersistedSessionStore>,
        skill_catalog: Vec<Skill>,
        config: AgentMuxConfig,
    ) -> Self {
        Self {
            helper,
            exit_monitor,
            storage,
            persisted,
            prompt_cache: PromptCache::new(),
            skill_catalog,
            cancellation: DashMap::new(),
            config,
        }
    }

    fn token_for(&self, session_name: &str) -> CancellationToken {
        self.cancellation
            .entry(session_name.to_string())
            .or_insert_with(CancellationToken::new)
            .clone()
    }

    /// Fires the session's abort signal and removes it. P7: every loop in
    /// this module checks the token at the top of each iteration and
    /// after any suspension, so no further keystrokes follow.
    pub fn cancel_pending_registration(&self, session_name: &str) {
        if let Some((_, token)) = self.cancellation.remove(session_name) {
            token.cancel();
        }
    }

    pub async fn create_agent_session(
        &self,
        request: CreateAgentSessionRequest,
    ) -> Result<CreateAgentSessionOutcome, AgentMuxError> {
        let runtime_type = match request.runtime_type {
            Some(rt) => rt,
            None => self
                .storage
                .runtime_type_for_session(&request.session_name)
                .await?
                .ok_or_else(|| {
                    AgentMuxError::ConfigMissing(format!(
                        "no runtime type recorded for session {}",
                        request.session_name
                    ))
                })?,
        };
        let request = ResolvedSessionRequest {
            session_name: request.session_name,
            role: request.role,
            project_path: request.project_path,
            member_id: request.member_id,
            runtime_type,
            team_id: request.team_id,
            skill_overrides: request.skill_overrides,
            excluded_role_skills: request.excluded_role_skills,
        };

        let token = self.token_for(&request.session_name);
        let adapter = adapter_for(request.runtime_type);
        let backend = self.helper.backend();

        if backend.session_exists(&request.session_name) {
            if let Some(outcome) = self
                .try_intelligent_recovery(&request, adapter.as_ref(), &token)
                .await?
            {
                return Ok(outcome);
            }
            warn!(session = %request.session_name, "recovery failed, falling through to fresh creation");
            let _ = self.helper.kill_session(&request.session_name).await;
        }

        self.fresh_create(&request, adapter.as_ref()).await?;

        let timeout = if request.role == crate::model::ORCHESTRATOR_ROLE {
            Duration::from_secs(300)
        } else {
            self.config.default_role_timeout()
        };

        escalation::run_progressive_escalation(
            self,
            &request,
            adapter.as_ref(),
            &token,
            timeout,
        )
        .await
    }

    async fn try_intelligent_recovery(
        &self,
        request: &ResolvedSessionRequest,
        adapter: &dyn RuntimeAdapter,
        token: &CancellationToken,
    ) -> Result<Option<CreateAgentSessionOutcome>, AgentMuxError> {
        if token.is_cancelled() {
            return Ok(None);
        }

        let probed = adapter
            .detect_runtime_with_command(&self.helper, &request.session_name, false)
            .await?;

        if probed {
            if escalation::verify_registration_once(self, request, token).await? {
                self.storage
                    .update_agent_status(&request.session_name, AgentStatus::Active)
                    .await?;
                return Ok(Some(CreateAgentSessionOutcome {
                    session_name: request.session_name.clone(),
                    message: "recovered existing session".to_string(),
                }));
            }
            return Ok(None);
        }

        self.helper.send_ctrl_c(&request.session_name).await.ok();
        tokio::time::sleep(Duration::from_millis(300)).await;
        self.helper.send_ctrl_c(&request.session_name).await.ok();
        tokio::time::sleep(Duration::from_millis(300)).await;
        adapter.clear_detection_cache(&request.session_name);

        if token.is_cancelled() {
            return Ok(None);
        }

        if escalation::verify_registration_once(self, request, token).await? {
            self.storage
                .update_agent_status(&request.session_name, AgentStatus::Active)
                .await?;
            return Ok(Some(CreateAgentSessionOutcome {
                session_name: request.session_name.clone(),
                message: "recovered existing session after cleanup".to_string(),
            }));
        }

        Ok(None)
    }

    async fn fresh_create(
        &self,
        request: &ResolvedSessionRequest,
        _adapter: &dyn RuntimeAdapter,
    ) -> Result<(), AgentMuxError> {
        let backend = self.helper.backend();
        let mut config = SessionConfig::new(request.session_name.clone(), request.project_path.clone());
        config.environment.insert("TMUX_SESSION_NAME".to_string(), request.session_name.clone());
        config.environment.insert("AGENTMUX_ROLE".to_string(), request.role.clone());
        config
            .environment
            .insert("AGENTMUX_API_URL".to_string(), self.api_url());

        backend
            .create_session(config)
            .await
            .map_err(AgentMuxError::from)?;

        if !backend.session_exists(&request.session_name) {
            return Err(AgentMuxError::SpawnFailed(request.session_name.clone()));
        }

        self.persisted.mark_created_fresh(&request.session_name);
        self.persisted
            .register(RegisteredSession {
                session_name: request.session_name.clone(),
                cwd: request.project_path.clone(),
                command: request.runtime_type.as_str().to_string(),
                args: vec![],
                runtime_type: request.runtime_type.as_str().to_string(),
                role: request.role.clone(),
                team_id: request.team_id.clone(),
                created_at: chrono::Utc::now(),
            })
            .await
            .map_err(|e| AgentMuxError::StorageIOError(e.to_string()))?;

        info!(session = %request.session_name, "created fresh session");
        Ok(())
    }

    pub(crate) fn flags_for(&self, request: &ResolvedSessionRequest) -> Vec<String> {
        resolve_skill_flags(
            &[],
            &request.skill_overrides,
            &request.excluded_role_skills,
            &self.skill_catalog,
            request.runtime_type,
        )
    }

    pub(crate) fn helper(&self) -> &Arc<SessionCommandHelper> {
        &self.helper
    }

    pub(crate) fn exit_monitor(&self) -> &Arc<RuntimeExitMonitor> {
        &self.exit_monitor
    }

    pub(crate) fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub(crate) fn persisted(&self) -> &Arc<PersistedSessionStore> {
        &self.persisted
    }

    pub(crate) fn prompt_cache(&self) -> &PromptCache {
        &self.prompt_cache
    }

    /// §6: the `AGENTMUX_API_URL` exported into every agent session,
    /// rendered from `AgentMuxConfig` rather than a hardcoded port.
    pub(crate) fn api_url(&self) -> String {
        self.config.api_url()
    }

    pub async fn terminate_agent_session(
        &self,
        session_name: &str,
    ) -> Result<(), AgentMuxError> {
        self.cancel_pending_registration(session_name);
        self.exit_monitor.stop_monitoring(session_name);
        self.helper.kill_session(session_name).await?;
        self.storage
            .update_agent_status(session_name, AgentStatus::Inactive)
            .await
    }

    pub async fn send_message_to_agent(
        &self,
        session_name: &str,
        message: &str,
        runtime_type: RuntimeType,
    ) -> Result<(), AgentMuxError> {
        let attempts = self.config.delivery_max_retries;
        crate::delivery::send_message_with_retry(&self.helper, session_name, message, attempts, runtime_type)
            .await
            .map_err(|_| {
                warn!(session = %session_name, "delivery exhausted retries");
                AgentMuxError::PromptDeliveryFailed {
                    session_name: session_name.to_string(),
                    attempts,
                }
            })
    }

    pub async fn send_key_to_agent(
        &self,
        session_name: &str,
        key: ai_session::SymbolicKey,
    ) -> Result<(), AgentMuxError> {
        self.helper
            .send_key(session_name, key)
            .await
            .map_err(AgentMuxError::from)
    }

    pub async fn wait_for_agent_ready(&self, session_name: &str, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut data_rx = match self.helper.backend().on_data(session_name) {
            Ok(rx) => Some(rx),
            Err(_) => None,
        };

        loop {
            if let Ok(pane) = self.helper.capture_pane(session_name, Some(20)) {
                if ai_session::patterns::PROMPT_STREAM.is_match(&pane)
                    && ai_session::patterns::is_at_prompt(&pane)
                {
                    return true;
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return false;
            }

            if let Some(rx) = data_rx.as_mut() {
                tokio::select! {
                    _ = rx.recv() => {}
                    _ = tokio::time::sleep(Duration::from_millis(500)) => {}
                }
            } else {
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
    }

    pub async fn check_agent_health(
        &self,
        session_name: &str,
        timeout: Duration,
    ) -> AgentHealth {
        let result = tokio::time::timeout(timeout, async {
            self.helper.backend().session_exists(session_name)
        })
        .await;

        let running = matches!(result, Ok(true));
        let status = if running {
            AgentStatus::Active
        } else {
            AgentStatus::Inactive
        };

        AgentHealth {
            running,
            status,
            timestamp: chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ai_session::{PersistedSessionStore, SessionManager};
    use tempfile::tempdir;

    async fn engine() -> (RegistrationEngine, tempfile::TempDir) {
        let backend = Arc::new(SessionManager::new());
        let helper = Arc::new(SessionCommandHelper::new(backend.clone()));
        let exit_monitor = Arc::new(RuntimeExitMonitor::new(backend.clone()));
        let dir = tempdir().unwrap();
        let storage = Arc::new(Storage::new(dir.path()));
        let persisted = Arc::new(
            PersistedSessionStore::load(dir.path().join("runtime.json"))
                .await
                .unwrap(),
        );
        (
            RegistrationEngine::new(helper, exit_monitor, storage, persisted, vec![]),
            dir,
        )
    }

    /// `delivery_max_retries` from `AgentMuxConfig` is what the engine
    /// actually passes to `send_message_with_retry`, not a hardcoded 3.
    #[tokio::test]
    async fn send_message_to_agent_honors_configured_retry_count() {
        let backend = Arc::new(SessionManager::new());
        let helper = Arc::new(SessionCommandHelper::new(backend.clone()));
        let exit_monitor = Arc::new(RuntimeExitMonitor::new(backend.clone()));
        let dir = tempdir().unwrap();
        let storage = Arc::new(Storage::new(dir.path()));
        let persisted = Arc::new(
            PersistedSessionStore::load(dir.path().join("runtime.json"))
                .await
                .unwrap(),
        );
        let mut config = crate::config::AgentMuxConfig::default();
        config.delivery_max_retries = 1;
        let engine = RegistrationEngine::with_config(
            helper,
            exit_monitor,
            storage,
            persisted,
            vec![],
            config,
        );

        let session_name = "retry-count";
        let mut session_config = SessionConfig::new(session_name, std::env::temp_dir());
        session_config.shell = Some("/bin/sh".to_string());
        engine
            .helper
            .backend()
            .create_session(session_config)
            .await
            .unwrap();
        wait_for_prompt(&engine, session_name).await;

        let err = engine
            .send_message_to_agent(session_name, "[CHAT:abc] hi", RuntimeType::ClaudeCode)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AgentMuxError::PromptDeliveryFailed { attempts: 1, .. }
        ));

        engine.helper.kill_session(session_name).await.ok();
    }

    #[tokio::test]
    async fn cancel_pending_registration_removes_token() {
        let (engine, _dir) = engine().await;
        let token = engine.token_for("s1");
        assert!(!token.is_cancelled());
        engine.cancel_pending_registration("s1");
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn check_agent_health_reports_not_running_for_unknown_session() {
        let (engine, _dir) = engine().await;
        let health = engine
            .check_agent_health("never-created", Duration::from_millis(100))
            .await;
        assert!(!health.running);
        assert_eq!(health.status, AgentStatus::Inactive);
    }

    async fn wait_for_prompt(engine: &RegistrationEngine, session_name: &str) {
        for _ in 0..40 {
            if let Ok(pane) = engine.helper.capture_pane(session_name, Some(5)) {
                if ai_session::patterns::is_at_prompt(&pane) {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Scenario 2 (recovery on existing session): a live session already
    /// answers prompts, so `createAgentSession` recovers it in place
    /// rather than killing and recreating it.
    #[tokio::test]
    async fn recovers_existing_session_without_kill() {
        let (engine, _dir) = engine().await;
        let session_name = "s2";

        let mut config = SessionConfig::new(session_name, std::env::temp_dir());
        config.shell = Some("/bin/sh".to_string());
        engine
            .helper
            .backend()
            .create_session(config)
            .await
            .unwrap();
        wait_for_prompt(&engine, session_name).await;

        engine
            .storage
            .save_team(&crate::storage::Team {
                id: "team-2".to_string(),
                name: "Core".to_string(),
                members: vec![crate::storage::TeamMemberRecord {
                    member_id: "m2".to_string(),
                    session_name: session_name.to_string(),
                    role: "developer".to_string(),
                    runtime_type: RuntimeType::ClaudeCode,
                    agent_status: AgentStatus::Inactive,
                    working_status: crate::model::WorkingStatus::Idle,
                }],
            })
            .await
            .unwrap();

        let outcome = engine
            .create_agent_session(CreateAgentSessionRequest {
                session_name: session_name.to_string(),
                role: "developer".to_string(),
                project_path: std::env::temp_dir(),
                member_id: Some("m2".to_string()),
                runtime_type: Some(RuntimeType::ClaudeCode),
                team_id: Some("team-2".to_string()),
                skill_overrides: vec![],
                excluded_role_skills: vec![],
            })
            .await
            .unwrap();

        assert!(outcome.message.contains("recovered"));
        assert!(engine.helper.backend().session_exists(session_name));

        engine.helper.kill_session(session_name).await.ok();
    }

    /// Scenario 3 (exit during registration): an exit detected mid
    /// registration cancels the session's token, the same mechanism
    /// `finish_step` wires up via the exit monitor.
    #[tokio::test]
    async fn exit_during_registration_cancels_pending_token() {
        let (engine, _dir) = engine().await;
        let session_name = "s3";

        engine
            .helper
            .backend()
            .create_session(SessionConfig::new(session_name, std::env::temp_dir()))
            .await
            .unwrap();

        let token = engine.token_for(session_name);
        let watched = token.clone();
        engine.exit_monitor.start_monitoring(
            session_name,
            RuntimeType::ClaudeCode.as_str(),
            "developer",
            std::sync::Arc::new(move |_name| watched.cancel()),
        );

        engine.helper.kill_session(session_name).await.unwrap();

        for _ in 0..40 {
            if token.is_cancelled() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(token.is_cancelled());
    }
}
