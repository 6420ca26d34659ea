//! Two-step progressive escalation (§4.7.2) and the single-attempt
//! registration-verification loop it (and intelligent recovery) share.

use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::AgentMuxError;
use crate::model::{AgentStatus, RuntimeType, ORCHESTRATOR_ROLE};
use crate::runtime::RuntimeAdapter;

use super::{CreateAgentSessionOutcome, ResolvedSessionRequest, RegistrationEngine};

const STEP_A_BUDGET: Duration = Duration::from_secs(40);
const STEP_B_BUDGET: Duration = Duration::from_secs(30);
const STEP_B_MIN_REMAINING: Duration = Duration::from_secs(35);

/// Runs Step A, then Step B if Step A fails and enough budget remains
/// (P9: Step B is never attempted once Step A has already succeeded —
/// the early return below is what gives that guarantee).
pub async fn run_progressive_escalation(
    engine: &RegistrationEngine,
    request: &ResolvedSessionRequest,
    adapter: &dyn RuntimeAdapter,
    token: &CancellationToken,
    total_budget: Duration,
) -> Result<CreateAgentSessionOutcome, AgentMuxError> {
    let start = tokio::time::Instant::now();

    if let Some(outcome) = step_a(engine, request, adapter, token).await? {
        return Ok(outcome);
    }

    let elapsed = start.elapsed();
    let remaining = total_budget.saturating_sub(elapsed);
    if remaining <= STEP_B_MIN_REMAINING {
        return Err(AgentMuxError::RegistrationTimedOut {
            session_name: request.session_name.clone(),
            elapsed_secs: elapsed.as_secs(),
        });
    }

    if let Some(outcome) = step_b(engine, request, adapter, token).await? {
        return Ok(outcome);
    }

    Err(AgentMuxError::RegistrationTimedOut {
        session_name: request.session_name.clone(),
        elapsed_secs: start.elapsed().as_secs(),
    })
}

async fn step_a(
    engine: &RegistrationEngine,
    request: &ResolvedSessionRequest,
    adapter: &dyn RuntimeAdapter,
    token: &CancellationToken,
) -> Result<Option<CreateAgentSessionOutcome>, AgentMuxError> {
    if token.is_cancelled() {
        return Ok(None);
    }
    info!(session = %request.session_name, "escalation step A: cleanup + reinit");

    engine
        .helper()
        .clear_current_command_line(&request.session_name)
        .await
        .ok();

    let flags = engine.flags_for(request);
    adapter
        .execute_runtime_init_script(
            engine.helper(),
            &request.session_name,
            &request.project_path,
            &flags,
        )
        .await?;

    if token.is_cancelled() {
        return Ok(None);
    }

    let (ready_timeout, ready_interval) = ready_timing();
    let ready = tokio::time::timeout(
        STEP_A_BUDGET,
        adapter.wait_for_runtime_ready(
            engine.helper(),
            &request.session_name,
            ready_timeout,
            ready_interval,
        ),
    )
    .await
    .unwrap_or(false);

    if !ready || token.is_cancelled() {
        return Ok(None);
    }

    finish_step(engine, request, adapter, token).await?;
    Ok(Some(CreateAgentSessionOutcome {
        session_name: request.session_name.clone(),
        message: "session ready after cleanup + reinit".to_string(),
    }))
}

async fn step_b(
    engine: &RegistrationEngine,
    request: &ResolvedSessionRequest,
    adapter: &dyn RuntimeAdapter,
    token: &CancellationToken,
) -> Result<Option<CreateAgentSessionOutcome>, AgentMuxError> {
    if token.is_cancelled() {
        return Ok(None);
    }
    info!(session = %request.session_name, "escalation step B: full recreation");

    engine.helper().kill_session(&request.session_name).await.ok();
    sleep(Duration::from_secs(1)).await;

    if token.is_cancelled() {
        return Ok(None);
    }

    let outcome = tokio::time::timeout(STEP_B_BUDGET, async {
        let backend = engine.helper().backend();
        let mut config = ai_session::SessionConfig::new(
            request.session_name.clone(),
            request.project_path.clone(),
        );
        config
            .environment
            .insert("TMUX_SESSION_NAME".to_string(), request.session_name.clone());
        config
            .environment
            .insert("AGENTMUX_ROLE".to_string(), request.role.clone());
        config
            .environment
            .insert("AGENTMUX_API_URL".to_string(), engine.api_url());
        backend
            .create_session(config)
            .await
            .map_err(AgentMuxError::from)?;

        let flags = engine.flags_for(request);
        adapter
            .execute_runtime_init_script(
                engine.helper(),
                &request.session_name,
                &request.project_path,
                &flags,
            )
            .await?;

        let is_orchestrator = request.role == ORCHESTRATOR_ROLE;
        let (base_timeout, interval) = if is_orchestrator {
            (Duration::from_secs(45), Duration::from_secs(2))
        } else {
            (Duration::from_secs(25), Duration::from_secs(1))
        };

        let ready = adapter
            .wait_for_runtime_ready(engine.helper(), &request.session_name, base_timeout, interval)
            .await;
        if !ready {
            return Ok::<bool, AgentMuxError>(false);
        }

        if is_orchestrator {
            sleep(Duration::from_secs(5)).await;
            let reprobe = adapter
                .detect_runtime_with_command(engine.helper(), &request.session_name, true)
                .await?;
            if !reprobe {
                return Ok(false);
            }
        }

        Ok(true)
    })
    .await
    .unwrap_or(Ok(false))?;

    if !outcome || token.is_cancelled() {
        return Ok(None);
    }

    finish_step(engine, request, adapter, token).await?;
    Ok(Some(CreateAgentSessionOutcome {
        session_name: request.session_name.clone(),
        message: "session ready after full recreation".to_string(),
    }))
}

/// Common tail of both steps once readiness is confirmed: start the exit
/// monitor, run post-init, drain residual escapes, optionally resume, and
/// fire the registration prompt without blocking on it.
async fn finish_step(
    engine: &RegistrationEngine,
    request: &ResolvedSessionRequest,
    adapter: &dyn RuntimeAdapter,
    token: &CancellationToken,
) -> Result<(), AgentMuxError> {
    let session_name = request.session_name.clone();
    let engine_token = token.clone();
    engine.exit_monitor().start_monitoring(
        &session_name,
        request.runtime_type.as_str(),
        &request.role,
        std::sync::Arc::new(move |name| {
            warn!(session = %name, "pty exit detected during/after registration, cancelling pending work");
            engine_token.cancel();
        }),
    );

    if let Err(e) = adapter.post_initialize(engine.helper(), &session_name).await {
        warn!(session = %session_name, error = %e, "postInitialize hook failed, continuing");
    }

    sleep(Duration::from_millis(500)).await;

    if request.runtime_type == RuntimeType::ClaudeCode {
        engine.helper().clear_current_command_line(&session_name).await.ok();
    }

    if request.runtime_type == RuntimeType::ClaudeCode
        && engine.persisted().is_restored_session(&session_name)
    {
        crate::runtime::ClaudeCodeRuntime::new()
            .resume(engine.helper(), &session_name)
            .await;
    }

    engine
        .storage()
        .update_agent_status(&session_name, AgentStatus::Started)
        .await?;

    spawn_registration_prompt(engine, request, token);
    Ok(())
}

fn spawn_registration_prompt(
    engine: &RegistrationEngine,
    request: &ResolvedSessionRequest,
    token: &CancellationToken,
) {
    let helper = engine.helper().clone();
    let storage = engine.storage().clone();
    let prompt_cache = engine.prompt_cache().clone();
    let request = request.clone();
    let token = token.clone();

    tokio::spawn(async move {
        if let Err(e) = super::prompt::deliver_registration_prompt(
            &helper,
            &storage,
            &prompt_cache,
            &request,
            &token,
        )
        .await
        {
            warn!(session = %request.session_name, error = %e, "registration prompt delivery failed");
        }
    });
}

/// Single-attempt verification used by intelligent recovery: send a
/// lightweight re-confirmation and check the pane is at an idle prompt.
pub async fn verify_registration_once(
    engine: &RegistrationEngine,
    request: &ResolvedSessionRequest,
    token: &CancellationToken,
) -> Result<bool, AgentMuxError> {
    if token.is_cancelled() {
        return Ok(false);
    }
    let pane = engine
        .helper()
        .capture_pane(&request.session_name, Some(20))
        .map_err(AgentMuxError::from)?;
    Ok(ai_session::patterns::is_at_prompt(&pane))
}

fn ready_timing() -> (Duration, Duration) {
    if ai_session::TimingProfile::from_env().key_processing_delay < Duration::from_millis(50) {
        (Duration::from_secs(15), Duration::from_secs(1))
    } else {
        (Duration::from_secs(30), Duration::from_secs(2))
    }
}
