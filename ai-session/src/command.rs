//! Session Command Helper: a thin, runtime-agnostic keystroke layer on top
//! of the Session Backend.

use std::sync::Arc;
use std::time::Duration;

use crate::core::{SessionManager, SessionResult, SymbolicKey};

/// Timing constants that differ between test and production runs (an
/// explicitly source-ambiguous area of the specification). Values are
/// picked from the middle of each stated range so that property P3/P9
/// hold under either profile.
#[derive(Debug, Clone, Copy)]
pub struct TimingProfile {
    pub payload_delay_floor: Duration,
    pub payload_delay_cap: Duration,
    pub payload_delay_per_char: Duration,
    pub key_processing_delay: Duration,
    pub clear_line_delay: Duration,
}

impl TimingProfile {
    pub const fn production() -> Self {
        Self {
            payload_delay_floor: Duration::from_millis(300),
            payload_delay_cap: Duration::from_millis(1500),
            payload_delay_per_char: Duration::from_millis(8),
            key_processing_delay: Duration::from_millis(200),
            clear_line_delay: Duration::from_millis(150),
        }
    }

    pub const fn test() -> Self {
        Self {
            payload_delay_floor: Duration::from_millis(10),
            payload_delay_cap: Duration::from_millis(40),
            payload_delay_per_char: Duration::from_micros(200),
            key_processing_delay: Duration::from_millis(5),
            clear_line_delay: Duration::from_millis(5),
        }
    }

    /// Sniffs `AGENTMUX_ENV=test`, falling back to the `cfg(test)` build
    /// flag, else production.
    pub fn from_env() -> Self {
        match std::env::var("AGENTMUX_ENV").as_deref() {
            Ok("test") => Self::test(),
            _ => {
                if cfg!(test) {
                    Self::test()
                } else {
                    Self::production()
                }
            }
        }
    }

    fn payload_delay(&self, char_count: usize) -> Duration {
        let scaled = self.payload_delay_per_char * char_count as u32;
        scaled.clamp(self.payload_delay_floor, self.payload_delay_cap)
    }
}

/// Stateless wrapper adding keystroke semantics over the backend.
pub struct SessionCommandHelper {
    backend: Arc<SessionManager>,
    timing: TimingProfile,
}

impl SessionCommandHelper {
    pub fn new(backend: Arc<SessionManager>) -> Self {
        Self {
            backend,
            timing: TimingProfile::from_env(),
        }
    }

    pub fn with_timing(backend: Arc<SessionManager>, timing: TimingProfile) -> Self {
        Self { backend, timing }
    }

    pub fn backend(&self) -> &Arc<SessionManager> {
        &self.backend
    }

    /// Two-phase write: payload, scaled delay, `\r`, fixed delay.
    pub async fn send_message(&self, name: &str, text: &str) -> SessionResult<()> {
        self.backend.write(name, text.as_bytes()).await?;
        tokio::time::sleep(self.timing.payload_delay(text.chars().count())).await;
        self.backend.write(name, b"\r").await?;
        tokio::time::sleep(self.timing.key_processing_delay).await;
        Ok(())
    }

    pub async fn send_enter(&self, name: &str) -> SessionResult<()> {
        self.backend.send_key(name, SymbolicKey::Enter).await
    }

    pub async fn send_ctrl_c(&self, name: &str) -> SessionResult<()> {
        self.backend.send_key(name, SymbolicKey::CtrlC).await
    }

    pub async fn send_escape(&self, name: &str) -> SessionResult<()> {
        self.backend.send_key(name, SymbolicKey::Escape).await
    }

    pub async fn send_key(&self, name: &str, key: SymbolicKey) -> SessionResult<()> {
        self.backend.send_key(name, key).await
    }

    pub async fn clear_current_command_line(&self, name: &str) -> SessionResult<()> {
        self.send_ctrl_c(name).await?;
        tokio::time::sleep(self.timing.clear_line_delay).await;
        self.send_key(name, SymbolicKey::CtrlU).await?;
        tokio::time::sleep(self.timing.clear_line_delay).await;
        Ok(())
    }

    pub async fn kill_session(&self, name: &str) -> SessionResult<()> {
        self.backend.kill_session(name).await
    }

    pub fn capture_pane(&self, name: &str, lines: Option<usize>) -> SessionResult<String> {
        self.backend.capture_pane(name, lines)
    }

    pub fn timing(&self) -> TimingProfile {
        self.timing
    }
}
