//! Storage Facade (§4.11): the minimum interface the core consumes,
//! backed by the filesystem layout in §6.

mod team;

pub use team::{OrchestratorStatus, Team, TeamMemberRecord};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ai_session::atomic::write_atomic;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::AgentMuxError;
use crate::model::{AgentStatus, RuntimeType};

/// Filesystem-backed implementation of the storage contract. Per-path
/// locks serialize concurrent writers to the same file; distinct files
/// proceed in parallel.
pub struct Storage {
    home: PathBuf,
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl Storage {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            locks: DashMap::new(),
        }
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    fn teams_dir(&self) -> PathBuf {
        self.home.join("teams")
    }

    fn team_config_path(&self, team_id: &str) -> PathBuf {
        self.teams_dir().join(team_id).join("config.json")
    }

    fn orchestrator_config_path(&self) -> PathBuf {
        self.teams_dir().join("orchestrator").join("config.json")
    }

    fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        self.locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn write_json<T: serde::Serialize>(
        &self,
        path: &Path,
        value: &T,
    ) -> Result<(), AgentMuxError> {
        let lock = self.lock_for(path);
        let _guard = lock.lock().await;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AgentMuxError::StorageIOError(e.to_string()))?;
        }
        let bytes = serde_json::to_vec_pretty(value)
            .map_err(|e| AgentMuxError::StorageIOError(e.to_string()))?;
        write_atomic(path, &bytes)
            .await
            .map_err(|e| AgentMuxError::StorageIOError(e.to_string()))
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &Path,
    ) -> Result<Option<T>, AgentMuxError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| AgentMuxError::StorageIOError(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AgentMuxError::StorageIOError(e.to_string())),
        }
    }

    pub async fn get_teams(&self) -> Result<Vec<Team>, AgentMuxError> {
        let dir = self.teams_dir();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AgentMuxError::StorageIOError(e.to_string())),
        };

        let mut teams = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AgentMuxError::StorageIOError(e.to_string()))?
        {
            if entry.file_name() == "orchestrator" {
                continue;
            }
            let config_path = entry.path().join("config.json");
            if let Some(team) = self.read_json::<Team>(&config_path).await? {
                teams.push(team);
            }
        }
        Ok(teams)
    }

    pub async fn save_team(&self, team: &Team) -> Result<(), AgentMuxError> {
        let path = self.team_config_path(&team.id);
        self.write_json(&path, team).await
    }

    pub async fn delete_team(&self, id: &str) -> Result<(), AgentMuxError> {
        let dir = self.teams_dir().join(id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AgentMuxError::StorageIOError(e.to_string())),
        }
    }

    pub async fn get_orchestrator_status(&self) -> Result<Option<OrchestratorStatus>, AgentMuxError> {
        self.read_json(&self.orchestrator_config_path()).await
    }

    async fn save_orchestrator_status(
        &self,
        status: &OrchestratorStatus,
    ) -> Result<(), AgentMuxError> {
        self.write_json(&self.orchestrator_config_path(), status)
            .await
    }

    /// Updates the named session's `AgentStatus`, whether it is the
    /// orchestrator or a regular team member.
    pub async fn update_agent_status(
        &self,
        session_name: &str,
        status: AgentStatus,
    ) -> Result<(), AgentMuxError> {
        if let Some(mut orch) = self.get_orchestrator_status().await? {
            if orch.session_name == session_name {
                orch.agent_status = status;
                return self.save_orchestrator_status(&orch).await;
            }
        }

        let mut teams = self.get_teams().await?;
        let mut found = false;
        for team in &mut teams {
            for member in &mut team.members {
                if member.session_name == session_name {
                    member.agent_status = status;
                    found = true;
                }
            }
        }
        if !found {
            return Err(AgentMuxError::NoSuchSession(session_name.to_string()));
        }
        for team in &teams {
            self.save_team(team).await?;
        }
        Ok(())
    }

    pub async fn update_orchestrator_runtime_type(
        &self,
        runtime: RuntimeType,
    ) -> Result<(), AgentMuxError> {
        let mut orch = self
            .get_orchestrator_status()
            .await?
            .ok_or_else(|| AgentMuxError::StorageIOError("orchestrator not registered".to_string()))?;
        orch.runtime_type = runtime;
        self.save_orchestrator_status(&orch).await
    }

    pub async fn update_team_member_runtime_type(
        &self,
        team_id: &str,
        member_id: &str,
        runtime: RuntimeType,
    ) -> Result<(), AgentMuxError> {
        let path = self.team_config_path(team_id);
        let mut team: Team = self
            .read_json(&path)
            .await?
            .ok_or_else(|| AgentMuxError::StorageIOError(format!("no such team: {team_id}")))?;
        let member = team
            .members
            .iter_mut()
            .find(|m| m.member_id == member_id)
            .ok_or_else(|| AgentMuxError::StorageIOError(format!("no such member: {member_id}")))?;
        member.runtime_type = runtime;
        self.save_team(&team).await
    }

    /// Resolves the runtime type registered for a session name, checking
    /// the orchestrator record first and then every team's members.
    pub async fn runtime_type_for_session(
        &self,
        session_name: &str,
    ) -> Result<Option<RuntimeType>, AgentMuxError> {
        if let Some(orch) = self.get_orchestrator_status().await? {
            if orch.session_name == session_name {
                return Ok(Some(orch.runtime_type));
            }
        }
        Ok(self
            .find_member_by_session_name(session_name)
            .await?
            .map(|m| m.runtime_type))
    }

    pub async fn find_member_by_session_name(
        &self,
        session_name: &str,
    ) -> Result<Option<TeamMemberRecord>, AgentMuxError> {
        for team in self.get_teams().await? {
            if let Some(member) = team
                .members
                .into_iter()
                .find(|m| m.session_name == session_name)
            {
                return Ok(Some(member));
            }
        }
        Ok(None)
    }

    /// Per-member system prompt (`teams/<id>/prompts/<memberId>.md`), or
    /// `teams/orchestrator/prompt.md` for the orchestrator.
    pub async fn get_prompt_file(
        &self,
        team_id: Option<&str>,
        member_id: &str,
    ) -> Result<Option<String>, AgentMuxError> {
        let path = match team_id {
            Some(id) => self.teams_dir().join(id).join("prompts").join(format!("{member_id}.md")),
            None => self.teams_dir().join("orchestrator").join("prompt.md"),
        };
        match tokio::fs::read_to_string(&path).await {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AgentMuxError::StorageIOError(e.to_string())),
        }
    }

    /// Migrates a legacy single-file `teams.json` bulk layout into
    /// per-team directories, leaving a timestamped backup of the original.
    pub async fn migrate_legacy_bulk_file(&self, legacy_path: &Path) -> Result<(), AgentMuxError> {
        let bytes = match tokio::fs::read(legacy_path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(AgentMuxError::StorageIOError(e.to_string())),
        };
        let teams: Vec<Team> = serde_json::from_slice(&bytes)
            .map_err(|e| AgentMuxError::StorageIOError(e.to_string()))?;
        for team in &teams {
            self.save_team(team).await?;
        }

        let backup = legacy_path.with_extension(format!("json.bak.{}", now_suffix()));
        if let Err(e) = tokio::fs::rename(legacy_path, &backup).await {
            warn!(error = %e, "failed to back up legacy teams file after migration");
        }
        Ok(())
    }
}

fn now_suffix() -> String {
    chrono::Utc::now().format("%Y%m%dT%H%M%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn sample_team() -> Team {
        Team {
            id: "team-1".to_string(),
            name: "Core".to_string(),
            members: vec![TeamMemberRecord {
                member_id: "m1".to_string(),
                session_name: "agent-m1".to_string(),
                role: "developer".to_string(),
                runtime_type: RuntimeType::ClaudeCode,
                agent_status: AgentStatus::Inactive,
                working_status: crate::model::WorkingStatus::Idle,
            }],
        }
    }

    #[tokio::test]
    async fn save_and_list_teams_round_trips() {
        let dir = tempdir().unwrap();
        let storage = Storage::new(dir.path());
        storage.save_team(&sample_team()).await.unwrap();

        let teams = storage.get_teams().await.unwrap();
        assert_eq!(teams.len(), 1);
        assert_eq!(teams[0], sample_team());
    }

    #[tokio::test]
    async fn update_agent_status_mutates_matching_member() {
        let dir = tempdir().unwrap();
        let storage = Storage::new(dir.path());
        storage.save_team(&sample_team()).await.unwrap();

        storage
            .update_agent_status("agent-m1", AgentStatus::Active)
            .await
            .unwrap();

        let teams = storage.get_teams().await.unwrap();
        assert_eq!(teams[0].members[0].agent_status, AgentStatus::Active);
    }

    #[tokio::test]
    async fn update_agent_status_unknown_session_errors() {
        let dir = tempdir().unwrap();
        let storage = Storage::new(dir.path());
        let result = storage
            .update_agent_status("no-such-agent", AgentStatus::Active)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn find_member_by_session_name() {
        let dir = tempdir().unwrap();
        let storage = Storage::new(dir.path());
        storage.save_team(&sample_team()).await.unwrap();

        let found = storage.find_member_by_session_name("agent-m1").await.unwrap();
        assert!(found.is_some());
        assert_eq!(found.unwrap().member_id, "m1");
    }

    #[tokio::test]
    async fn delete_team_removes_its_directory() {
        let dir = tempdir().unwrap();
        let storage = Storage::new(dir.path());
        storage.save_team(&sample_team()).await.unwrap();
        storage.delete_team("team-1").await.unwrap();
        assert!(storage.get_teams().await.unwrap().is_empty());
    }
}
