//! Runtime Exit Monitor (§4.6): a singleton watcher over backend child-exit
//! notifications.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::core::SessionManager;

type ExitCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Watches the backend's exit-notification channel and invokes a
/// per-session callback exactly once when that session's child exits.
///
/// `startMonitoring`/`stopMonitoring` are idempotent: starting again on an
/// already-monitored name replaces the previous subscription.
pub struct RuntimeExitMonitor {
    backend: Arc<SessionManager>,
    subscriptions: DashMap<String, JoinHandle<()>>,
}

impl RuntimeExitMonitor {
    pub fn new(backend: Arc<SessionManager>) -> Self {
        Self {
            backend,
            subscriptions: DashMap::new(),
        }
    }

    /// `runtime_type`/`role` are accepted for parity with the spec's
    /// signature (future quirk-specific exit handling); the monitor itself
    /// is runtime-agnostic.
    pub fn start_monitoring(
        &self,
        session_name: &str,
        _runtime_type: &str,
        _role: &str,
        on_exit: ExitCallback,
    ) {
        self.stop_monitoring(session_name);

        let mut exits = self.backend.subscribe_exits();
        let watched = session_name.to_string();
        let handle = tokio::spawn(async move {
            loop {
                match exits.recv().await {
                    Ok(exited) if exited == watched => {
                        debug!(session = %watched, "exit monitor firing onExitDetected");
                        on_exit(watched);
                        break;
                    }
                    Ok(_) => continue,
                    Err(_) => break,
                }
            }
        });

        self.subscriptions.insert(session_name.to_string(), handle);
    }

    pub fn stop_monitoring(&self, session_name: &str) {
        if let Some((_, handle)) = self.subscriptions.remove(session_name) {
            handle.abort();
        }
    }

    pub fn is_monitoring(&self, session_name: &str) -> bool {
        self.subscriptions.contains_key(session_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SessionConfig;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn fires_callback_on_kill() {
        let backend = Arc::new(SessionManager::new());
        backend
            .create_session(SessionConfig::new("exit-mon-1", std::env::temp_dir()))
            .await
            .unwrap();

        let monitor = RuntimeExitMonitor::new(backend.clone());
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        monitor.start_monitoring(
            "exit-mon-1",
            "claude-code",
            "developer",
            Arc::new(move |_name| fired_clone.store(true, Ordering::SeqCst)),
        );

        backend.kill_session("exit-mon-1").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn stop_monitoring_is_idempotent() {
        let backend = Arc::new(SessionManager::new());
        let monitor = RuntimeExitMonitor::new(backend);
        monitor.stop_monitoring("never-started");
        monitor.stop_monitoring("never-started");
    }
}
