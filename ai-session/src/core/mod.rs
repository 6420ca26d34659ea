//! Core session management: the Session Backend.
//!
//! A [`SessionManager`] spawns a shell inside a PTY (or, when the host denies
//! PTY allocation, a headless pipe-backed child) and tracks it by session
//! name rather than by a generated identifier, so the rest of the stack can
//! address agents by the name their caller chose.

pub mod headless;
pub mod lifecycle;
pub mod pty;
pub mod scrollback;
pub mod terminal;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

pub use scrollback::Scrollback;
pub use terminal::TerminalHandle;

/// Default minimum scrollback size: 200 lines at a typical 80-column width.
pub const DEFAULT_SCROLLBACK_BYTES: usize = 200 * 80 * 4;
const KILL_GRACE: Duration = Duration::from_millis(500);
const DATA_CHANNEL_CAPACITY: usize = 256;

/// Failure modes surfaced by the backend.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no such session: {0}")]
    NoSuchSession(String),

    #[error("session already exists: {0}")]
    AlreadyExists(String),

    #[error("failed to spawn session: {0}")]
    SpawnFailed(String),

    #[error("failed to write to session: {0}")]
    WriteFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;

/// Lifecycle state of a backend session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Starting,
    Running,
    Terminating,
    Terminated,
}

/// Inputs needed to spawn a new session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub name: String,
    pub working_directory: PathBuf,
    pub environment: HashMap<String, String>,
    pub shell: Option<String>,
    pub pty_size: (u16, u16),
    pub scrollback_bytes: usize,
}

impl SessionConfig {
    pub fn new(name: impl Into<String>, working_directory: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            working_directory: working_directory.into(),
            environment: HashMap::new(),
            shell: None,
            pty_size: (50, 220),
            scrollback_bytes: DEFAULT_SCROLLBACK_BYTES,
        }
    }
}

/// Symbolic keys the command helper can send without knowing byte encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolicKey {
    Enter,
    Escape,
    CtrlC,
    CtrlU,
    ArrowUp,
    ArrowDown,
    ArrowLeft,
    ArrowRight,
}

impl SymbolicKey {
    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            SymbolicKey::Enter => b"\r",
            SymbolicKey::Escape => b"\x1b",
            SymbolicKey::CtrlC => b"\x03",
            SymbolicKey::CtrlU => b"\x15",
            SymbolicKey::ArrowUp => b"\x1b[A",
            SymbolicKey::ArrowDown => b"\x1b[B",
            SymbolicKey::ArrowLeft => b"\x1b[D",
            SymbolicKey::ArrowRight => b"\x1b[C",
        }
    }
}

/// A live backend session: the spawned shell, its scrollback, and its
/// subscribers.
pub struct Session {
    pub name: String,
    pub cwd: PathBuf,
    pub command: String,
    pub args: Vec<String>,
    pub pid: u32,
    pub created_at: DateTime<Utc>,
    status: RwLock<SessionStatus>,
    terminal: RwLock<Option<TerminalHandle>>,
    scrollback: Arc<Scrollback>,
    data_tx: broadcast::Sender<Vec<u8>>,
}

impl Session {
    pub async fn status(&self) -> SessionStatus {
        *self.status.read().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Vec<u8>> {
        self.data_tx.subscribe()
    }

    pub fn capture_pane(&self, lines: Option<usize>) -> String {
        self.scrollback.capture(lines.unwrap_or(200))
    }

    pub async fn is_running(&self) -> bool {
        matches!(
            *self.status.read().await,
            SessionStatus::Starting | SessionStatus::Running
        )
    }
}

/// Information returned to callers when a session is created.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub pid: u32,
    pub cwd: PathBuf,
}

/// The Session Backend: an in-memory table of live sessions keyed by name,
/// plus a global exit-notification channel for the Runtime Exit Monitor.
pub struct SessionManager {
    sessions: DashMap<String, Arc<Session>>,
    exit_tx: broadcast::Sender<String>,
}

impl SessionManager {
    pub fn new() -> Self {
        let (exit_tx, _) = broadcast::channel(DATA_CHANNEL_CAPACITY);
        Self {
            sessions: DashMap::new(),
            exit_tx,
        }
    }

    /// Subscribe to session-exit notifications (session name of the exited
    /// session). Used by the Runtime Exit Monitor.
    pub fn subscribe_exits(&self) -> broadcast::Receiver<String> {
        self.exit_tx.subscribe()
    }

    pub fn session_exists(&self, name: &str) -> bool {
        self.sessions.contains_key(name)
    }

    pub fn get(&self, name: &str) -> SessionResult<Arc<Session>> {
        self.sessions
            .get(name)
            .map(|e| e.clone())
            .ok_or_else(|| SessionError::NoSuchSession(name.to_string()))
    }

    /// Spawn a shell in a PTY (falling back to a headless child if the host
    /// denies PTY allocation) and register it under `config.name`.
    pub async fn create_session(&self, config: SessionConfig) -> SessionResult<SessionInfo> {
        if self.sessions.contains_key(&config.name) {
            return Err(SessionError::AlreadyExists(config.name));
        }

        let shell = config
            .shell
            .clone()
            .unwrap_or_else(|| std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string()));

        let (terminal, pid) = lifecycle::spawn_session(
            &shell,
            &config.working_directory,
            &config.environment,
            config.pty_size,
        )
        .await
        .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        let scrollback = Arc::new(Scrollback::new(config.scrollback_bytes));
        let (data_tx, _) = broadcast::channel(DATA_CHANNEL_CAPACITY);

        let session = Arc::new(Session {
            name: config.name.clone(),
            cwd: config.working_directory.clone(),
            command: shell,
            args: Vec::new(),
            pid,
            created_at: Utc::now(),
            status: RwLock::new(SessionStatus::Starting),
            terminal: RwLock::new(Some(terminal)),
            scrollback: scrollback.clone(),
            data_tx: data_tx.clone(),
        });

        *session.status.write().await = SessionStatus::Running;
        self.sessions.insert(config.name.clone(), session.clone());

        self.spawn_reader_task(session.clone());
        self.spawn_exit_watcher(session);

        info!(session = %config.name, pid, "session created");
        Ok(SessionInfo {
            pid,
            cwd: config.working_directory,
        })
    }

    fn spawn_reader_task(&self, session: Arc<Session>) {
        let scrollback = session.scrollback.clone();
        let data_tx = session.data_tx.clone();
        tokio::spawn(async move {
            loop {
                let terminal_guard = session.terminal.read().await;
                let terminal = match terminal_guard.as_ref() {
                    Some(t) => t.clone_handle(),
                    None => break,
                };
                drop(terminal_guard);

                match terminal.read().await {
                    Ok(chunk) if !chunk.is_empty() => {
                        scrollback.push(&chunk);
                        let _ = data_tx.send(chunk);
                    }
                    Ok(_) => {
                        tokio::time::sleep(Duration::from_millis(30)).await;
                    }
                    Err(_) => break,
                }

                if !session.is_running().await {
                    break;
                }
            }
        });
    }

    fn spawn_exit_watcher(&self, session: Arc<Session>) {
        let exit_tx = self.exit_tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(250)).await;
                let terminal_guard = session.terminal.read().await;
                let still_running = match terminal_guard.as_ref() {
                    Some(t) => t.is_running().await,
                    None => false,
                };
                drop(terminal_guard);

                if !still_running {
                    *session.status.write().await = SessionStatus::Terminated;
                    let _ = exit_tx.send(session.name.clone());
                    debug!(session = %session.name, "session exit observed");
                    break;
                }
            }
        });
    }

    pub async fn write(&self, name: &str, bytes: &[u8]) -> SessionResult<()> {
        let session = self.get(name)?;
        let terminal_guard = session.terminal.read().await;
        let terminal = terminal_guard
            .as_ref()
            .ok_or_else(|| SessionError::NoSuchSession(name.to_string()))?;
        terminal
            .write(bytes)
            .await
            .map_err(|e| SessionError::WriteFailed(e.to_string()))
    }

    pub async fn send_key(&self, name: &str, key: SymbolicKey) -> SessionResult<()> {
        self.write(name, key.as_bytes()).await
    }

    pub fn capture_pane(&self, name: &str, lines: Option<usize>) -> SessionResult<String> {
        Ok(self.get(name)?.capture_pane(lines))
    }

    pub fn on_data(&self, name: &str) -> SessionResult<broadcast::Receiver<Vec<u8>>> {
        Ok(self.get(name)?.subscribe())
    }

    /// Advisory: takes effect via shell command injection before subsequent
    /// interactive traffic, per the backend contract.
    pub async fn set_environment_variable(
        &self,
        name: &str,
        key: &str,
        value: &str,
    ) -> SessionResult<()> {
        let cmd = format!("export {}={}\r", key, shell_quote(value));
        self.write(name, cmd.as_bytes()).await
    }

    pub async fn kill_session(&self, name: &str) -> SessionResult<()> {
        let session = self.get(name)?;
        *session.status.write().await = SessionStatus::Terminating;

        let terminal_guard = session.terminal.read().await;
        if let Some(terminal) = terminal_guard.as_ref() {
            if let Err(e) = terminal.terminate().await {
                warn!(session = %name, error = %e, "SIGTERM failed during kill_session");
            }
        }
        drop(terminal_guard);

        tokio::time::sleep(KILL_GRACE).await;

        let terminal_guard = session.terminal.read().await;
        if let Some(terminal) = terminal_guard.as_ref() {
            if terminal.is_running().await {
                if let Err(e) = terminal.kill().await {
                    warn!(session = %name, error = %e, "SIGKILL failed during kill_session");
                }
            }
        }
        drop(terminal_guard);

        *session.status.write().await = SessionStatus::Terminated;
        self.sessions.remove(name);
        let _ = self.exit_tx.send(name.to_string());
        Ok(())
    }

    pub fn list_sessions(&self) -> Vec<String> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_and_kill_session() {
        let manager = SessionManager::new();
        let tmp = std::env::temp_dir();
        let config = SessionConfig::new("test-session-1", tmp);
        let info = manager.create_session(config).await.unwrap();
        assert!(info.pid > 0);
        assert!(manager.session_exists("test-session-1"));

        manager.kill_session("test-session-1").await.unwrap();
        assert!(!manager.session_exists("test-session-1"));
    }

    #[tokio::test]
    async fn duplicate_name_rejected() {
        let manager = SessionManager::new();
        let tmp = std::env::temp_dir();
        manager
            .create_session(SessionConfig::new("dup", tmp.clone()))
            .await
            .unwrap();
        let err = manager
            .create_session(SessionConfig::new("dup", tmp))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::AlreadyExists(_)));
        manager.kill_session("dup").await.unwrap();
    }

    #[tokio::test]
    async fn no_such_session_on_unknown_name() {
        let manager = SessionManager::new();
        let err = manager.write("ghost", b"x").await.unwrap_err();
        assert!(matches!(err, SessionError::NoSuchSession(_)));
    }
}
