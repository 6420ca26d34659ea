//! Message Delivery Engine (§4.8): `sendMessageWithRetry` and its
//! per-runtime verification logic.

use std::time::Duration;

use ai_session::patterns::{PROCESSING_INDICATOR_RE, SHELL_MODE_PROMPT_PATTERNS};
use ai_session::{SessionCommandHelper, SymbolicKey};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::model::RuntimeType;
use crate::runtime::MAX_ESCAPE_ATTEMPTS;

const BETWEEN_ATTEMPT_DELAY: Duration = Duration::from_secs(1);

/// Strips a leading `[CHAT:<uuid>]` tag and takes the first 40 chars, the
/// token searched for in the pane tail to detect a stuck Claude-Code
/// prompt.
fn stuck_token(message: &str) -> String {
    let re = regex::Regex::new(r"^\[CHAT:[0-9a-fA-F-]+\]\s*").unwrap();
    let stripped = re.replace(message, "");
    stripped.chars().take(40).collect()
}

/// True iff `token` is still visible in the last 20 non-empty lines of
/// `pane` after TUI-border stripping — i.e. Enter was not accepted.
fn is_stuck(pane: &str, token: &str) -> bool {
    if token.trim().is_empty() {
        return false;
    }
    let cleaned = ai_session::cleanup::strip_tui_borders(pane);
    let tail: Vec<&str> = cleaned
        .lines()
        .rev()
        .filter(|l| !l.trim().is_empty())
        .take(20)
        .collect();
    tail.iter().any(|line| line.contains(token))
}

fn tui_delivered(before: &str, after: &str) -> bool {
    let grew = after.len() as i64 - before.len() as i64;
    if grew > 20 {
        return true;
    }
    if before != after && grew.unsigned_abs() > 10 {
        return true;
    }
    if PROCESSING_INDICATOR_RE.is_match(after) {
        return true;
    }
    false
}

/// Attempts to deliver `message` to `session_name`, retrying up to
/// `max_attempts` times. Returns `Ok(())` on the first verified delivery.
pub async fn send_message_with_retry(
    helper: &SessionCommandHelper,
    session_name: &str,
    message: &str,
    max_attempts: u32,
    runtime_type: RuntimeType,
) -> Result<(), String> {
    let token = stuck_token(message);

    for attempt in 1..=max_attempts {
        debug!(%session_name, attempt, "delivery attempt");

        let pane = match helper.capture_pane(session_name, Some(5)) {
            Ok(p) => p,
            Err(e) => return Err(e.to_string()),
        };
        if !ai_session::patterns::is_at_prompt(&pane) {
            sleep(BETWEEN_ATTEMPT_DELAY).await;
            continue;
        }

        if runtime_type == RuntimeType::GeminiCli && SHELL_MODE_PROMPT_PATTERNS.is_match(&pane) {
            if !recover_shell_mode(helper, session_name).await {
                sleep(BETWEEN_ATTEMPT_DELAY).await;
                continue;
            }
        }

        match runtime_type {
            RuntimeType::ClaudeCode => {
                let _ = helper.send_ctrl_c(session_name).await;
                sleep(Duration::from_millis(300)).await;
            }
            RuntimeType::GeminiCli | RuntimeType::CodexCli => {
                let _ = helper.send_enter(session_name).await;
                sleep(Duration::from_millis(500)).await;
            }
        }

        let before = if runtime_type == RuntimeType::ClaudeCode {
            String::new()
        } else {
            helper.capture_pane(session_name, Some(20)).unwrap_or_default()
        };

        if let Err(e) = helper.send_message(session_name, message).await {
            return Err(e.to_string());
        }

        let processing_delay = if runtime_type == RuntimeType::ClaudeCode {
            Duration::from_millis(800)
        } else {
            Duration::from_millis(3000)
        };
        sleep(processing_delay).await;

        let delivered = match runtime_type {
            RuntimeType::ClaudeCode => {
                let pane = helper.capture_pane(session_name, Some(20)).unwrap_or_default();
                !is_stuck(&pane, &token)
            }
            RuntimeType::GeminiCli | RuntimeType::CodexCli => {
                let after = helper.capture_pane(session_name, Some(20)).unwrap_or_default();
                tui_delivered(&before, &after)
            }
        };

        if delivered {
            return Ok(());
        }

        warn!(%session_name, attempt, "delivery not verified, recovering");
        match runtime_type {
            RuntimeType::ClaudeCode => {
                let _ = helper.clear_current_command_line(session_name).await;
            }
            RuntimeType::GeminiCli => {
                let after = helper.capture_pane(session_name, Some(20)).unwrap_or_default();
                if after == before {
                    let _ = helper.send_enter(session_name).await;
                } else {
                    let _ = helper.send_ctrl_c(session_name).await;
                }
            }
            RuntimeType::CodexCli => {
                let _ = helper.send_ctrl_c(session_name).await;
            }
        }

        if attempt < max_attempts {
            sleep(BETWEEN_ATTEMPT_DELAY).await;
        }
    }

    Err(format!(
        "failed to deliver message to {session_name} after {max_attempts} attempts"
    ))
}

async fn recover_shell_mode(helper: &SessionCommandHelper, session_name: &str) -> bool {
    for _ in 1..=MAX_ESCAPE_ATTEMPTS {
        let pane = match helper.capture_pane(session_name, Some(5)) {
            Ok(p) => p,
            Err(_) => return false,
        };
        if !SHELL_MODE_PROMPT_PATTERNS.is_match(&pane) {
            return true;
        }
        if helper
            .send_key(session_name, SymbolicKey::Escape)
            .await
            .is_err()
        {
            return false;
        }
        sleep(Duration::from_millis(300)).await;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use ai_session::{SessionConfig, SessionManager};
    use std::sync::Arc;

    async fn sh_session(name: &str) -> (Arc<SessionManager>, Arc<SessionCommandHelper>) {
        let backend = Arc::new(SessionManager::new());
        let mut config = SessionConfig::new(name, std::env::temp_dir());
        config.shell = Some("/bin/sh".to_string());
        backend.create_session(config).await.unwrap();
        let helper = Arc::new(SessionCommandHelper::new(backend.clone()));
        for _ in 0..40 {
            if let Ok(pane) = helper.capture_pane(name, Some(5)) {
                if ai_session::patterns::is_at_prompt(&pane) {
                    break;
                }
            }
            sleep(Duration::from_millis(100)).await;
        }
        (backend, helper)
    }

    /// Scenario 4 (Gemini shell-mode guard): a persistent `! `-prefixed
    /// line in the pane tail is never cleared by Escape alone, so recovery
    /// gives up after `MAX_ESCAPE_ATTEMPTS` rather than looping forever.
    #[tokio::test]
    async fn shell_mode_recovery_gives_up_after_max_attempts() {
        let (backend, helper) = sh_session("delivery-shell-mode").await;
        helper
            .send_message("delivery-shell-mode", "printf '! search foo\\n'")
            .await
            .unwrap();
        sleep(Duration::from_millis(500)).await;

        let recovered = recover_shell_mode(&helper, "delivery-shell-mode").await;
        assert!(!recovered);

        backend.kill_session("delivery-shell-mode").await.unwrap();
    }

    /// Scenario 5 (stuck prompt detection): the shell echoes the message
    /// text back into the pane, so the 40-char token search keeps finding
    /// it and every attempt is treated as unverified until they're
    /// exhausted.
    #[tokio::test]
    async fn stuck_message_exhausts_retries() {
        let (backend, helper) = sh_session("delivery-stuck").await;

        let result = send_message_with_retry(
            &helper,
            "delivery-stuck",
            "[CHAT:abc] hello team",
            3,
            RuntimeType::ClaudeCode,
        )
        .await;

        assert!(result.is_err());
        assert!(result.unwrap_err().contains("after 3 attempts"));

        backend.kill_session("delivery-stuck").await.unwrap();
    }

    #[test]
    fn stuck_token_strips_chat_prefix_and_truncates() {
        let message = format!("[CHAT:{}] {}", uuid::Uuid::new_v4(), "x".repeat(60));
        let token = stuck_token(&message);
        assert_eq!(token.chars().count(), 40);
        assert!(!token.starts_with("[CHAT"));
    }

    #[test]
    fn is_stuck_detects_token_in_tail() {
        let pane = "irrelevant\nhello world still here\n$ ";
        assert!(is_stuck(pane, "hello world"));
    }

    #[test]
    fn is_stuck_false_when_prompt_clean() {
        let pane = "hello world\n$ ";
        assert!(!is_stuck(pane, "goodbye"));
    }

    #[test]
    fn tui_delivered_detects_growth() {
        assert!(tui_delivered("short", &"x".repeat(30)));
        assert!(!tui_delivered("same", "same"));
    }
}
