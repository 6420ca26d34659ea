//! On-disk record shapes for `teams/<id>/config.json` and
//! `teams/orchestrator/config.json`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{AgentStatus, RuntimeType, WorkingStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamMemberRecord {
    pub member_id: String,
    pub session_name: String,
    pub role: String,
    pub runtime_type: RuntimeType,
    pub agent_status: AgentStatus,
    pub working_status: WorkingStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub name: String,
    pub members: Vec<TeamMemberRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    pub session_name: String,
    pub agent_status: AgentStatus,
    pub working_status: WorkingStatus,
    pub runtime_type: RuntimeType,
    pub updated_at: DateTime<Utc>,
}
