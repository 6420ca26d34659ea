//! Session State Persistence (§4.5): records running sessions so a restart
//! can offer resume.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::atomic::write_atomic;

/// A registered, persisted session. Runtime type and role are kept as plain
/// strings here so this crate has no dependency on the higher-level
/// orchestration vocabulary that defines their closed sets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisteredSession {
    pub session_name: String,
    pub cwd: PathBuf,
    pub command: String,
    pub args: Vec<String>,
    pub runtime_type: String,
    pub role: String,
    pub team_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Default, Serialize, Deserialize)]
struct Document {
    sessions: HashMap<String, RegisteredSession>,
}

/// Durable `{sessionName -> RegisteredSession}` store backed by an
/// atomically-written JSON document.
pub struct PersistedSessionStore {
    path: PathBuf,
    sessions: RwLock<HashMap<String, RegisteredSession>>,
    seen_at_start: HashSet<String>,
    created_fresh_this_start: RwLock<HashSet<String>>,
}

impl PersistedSessionStore {
    /// Loads `path` if it exists (treating a missing file as an empty
    /// document), recording which names existed at this process start.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let document = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<Document>(&bytes).unwrap_or_default(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Document::default(),
            Err(e) => return Err(e.into()),
        };

        let seen_at_start = document.sessions.keys().cloned().collect();
        Ok(Self {
            path,
            sessions: RwLock::new(document.sessions),
            seen_at_start,
            created_fresh_this_start: RwLock::new(HashSet::new()),
        })
    }

    /// Marks `name` as created fresh during this process's lifetime, so
    /// `is_restored_session` reports it correctly even if it shares a name
    /// with a prior-start entry that was cleaned up and recreated.
    pub fn mark_created_fresh(&self, name: &str) {
        self.created_fresh_this_start
            .write()
            .unwrap()
            .insert(name.to_string());
    }

    /// True iff `name` existed at last process start but was not created
    /// fresh during this one.
    pub fn is_restored_session(&self, name: &str) -> bool {
        self.seen_at_start.contains(name)
            && !self.created_fresh_this_start.read().unwrap().contains(name)
    }

    pub async fn register(&self, session: RegisteredSession) -> Result<()> {
        {
            let mut guard = self.sessions.write().unwrap();
            guard.insert(session.session_name.clone(), session);
        }
        self.flush().await
    }

    pub async fn unregister(&self, name: &str) -> Result<()> {
        {
            let mut guard = self.sessions.write().unwrap();
            guard.remove(name);
        }
        self.flush().await
    }

    pub fn get(&self, name: &str) -> Option<RegisteredSession> {
        self.sessions.read().unwrap().get(name).cloned()
    }

    pub fn list(&self) -> Vec<RegisteredSession> {
        self.sessions.read().unwrap().values().cloned().collect()
    }

    async fn flush(&self) -> Result<()> {
        let document = {
            let guard = self.sessions.read().unwrap();
            Document {
                sessions: guard.clone(),
            }
        };
        let bytes = serde_json::to_vec_pretty(&document)?;
        write_atomic(&self.path, &bytes).await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample(name: &str) -> RegisteredSession {
        RegisteredSession {
            session_name: name.to_string(),
            cwd: PathBuf::from("/tmp"),
            command: "/bin/bash".to_string(),
            args: vec![],
            runtime_type: "claude-code".to_string(),
            role: "developer".to_string(),
            team_id: Some("team-1".to_string()),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn register_persists_and_reload_sees_it() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("runtime.json");

        let store = PersistedSessionStore::load(&path).await.unwrap();
        store.register(sample("s1")).await.unwrap();
        assert!(store.get("s1").is_some());

        let reloaded = PersistedSessionStore::load(&path).await.unwrap();
        assert!(reloaded.get("s1").is_some());
        assert!(reloaded.is_restored_session("s1"));
    }

    #[tokio::test]
    async fn fresh_creation_is_not_restored() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("runtime.json");

        let store = PersistedSessionStore::load(&path).await.unwrap();
        store.mark_created_fresh("new-session");
        store.register(sample("new-session")).await.unwrap();
        assert!(!store.is_restored_session("new-session"));
    }

    #[tokio::test]
    async fn unregister_removes_entry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("runtime.json");
        let store = PersistedSessionStore::load(&path).await.unwrap();
        store.register(sample("s1")).await.unwrap();
        store.unregister("s1").await.unwrap();
        assert!(store.get("s1").is_none());
    }
}
