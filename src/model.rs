//! §3 Data Model: explicit structs and typed enums in place of the dynamic
//! objects the source language would use.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wire-level runtime vocabulary (exact strings, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuntimeType {
    ClaudeCode,
    GeminiCli,
    CodexCli,
}

impl RuntimeType {
    pub fn as_str(self) -> &'static str {
        match self {
            RuntimeType::ClaudeCode => "claude-code",
            RuntimeType::GeminiCli => "gemini-cli",
            RuntimeType::CodexCli => "codex-cli",
        }
    }

    pub fn is_claude_code(self) -> bool {
        matches!(self, RuntimeType::ClaudeCode)
    }
}

impl std::fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RuntimeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "claude-code" => Ok(RuntimeType::ClaudeCode),
            "gemini-cli" => Ok(RuntimeType::GeminiCli),
            "codex-cli" => Ok(RuntimeType::CodexCli),
            other => Err(format!("unknown runtime type: {other}")),
        }
    }
}

/// Reserved role value for the orchestrator agent.
pub const ORCHESTRATOR_ROLE: &str = "orchestrator";

/// `AgentStatus` transitions: `inactive -> activating -> started -> active`,
/// any -> `inactive` on termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Inactive,
    Activating,
    Started,
    Active,
}

impl AgentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentStatus::Inactive => "inactive",
            AgentStatus::Activating => "activating",
            AgentStatus::Started => "started",
            AgentStatus::Active => "active",
        }
    }
}

/// `WorkingStatus`, orthogonal to `AgentStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkingStatus {
    Idle,
    Busy,
}

impl WorkingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkingStatus::Idle => "idle",
            WorkingStatus::Busy => "busy",
        }
    }
}

/// Opaque team-member fields the core reads but does not own; it mutates
/// only the status fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamMember {
    pub session_name: String,
    pub role: String,
    pub runtime_type: RuntimeType,
    pub skill_overrides: Vec<String>,
    pub excluded_role_skills: Vec<String>,
    pub agent_status: AgentStatus,
    pub working_status: WorkingStatus,
}

/// A field an `AgentEvent` may record a transition of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangedField {
    AgentStatus,
    WorkingStatus,
    ContextUsage,
}

/// Event type a subscription may filter on. Mirrors the fields the core
/// actually publishes transitions for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    AgentStatusChanged,
    WorkingStatusChanged,
    ContextUsageChanged,
}

/// Immutable once published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub team_id: Option<String>,
    pub member_id: Option<String>,
    pub session_name: String,
    pub previous_value: String,
    pub new_value: String,
    pub changed_field: ChangedField,
}

/// Trigger that fed a `ContinuationEvent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContinuationTrigger {
    PtyExit,
    ActivityIdle,
    HeartbeatStale,
    ExplicitRequest,
}

/// Input to the Continuation Analyzer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContinuationEvent {
    pub trigger: ContinuationTrigger,
    pub session_name: String,
    pub agent_id: Option<String>,
    pub project_path: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

/// The analyzer's classification of the last pane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentConclusion {
    TaskComplete,
    WaitingInput,
    StuckOrError,
    Incomplete,
    MaxIterations,
    Unknown,
}

/// The advisory action the analyzer recommends; a handler executes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContinuationAction {
    InjectPrompt,
    AssignNextTask,
    NotifyOwner,
    RetryWithHints,
    PauseAgent,
    NoAction,
}

/// The analyzer's full verdict for one `ContinuationEvent`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub conclusion: AgentConclusion,
    pub confidence: f64,
    pub evidence: Vec<String>,
    pub recommended_action: ContinuationAction,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn runtime_type_round_trips_through_wire_strings() {
        for rt in [
            RuntimeType::ClaudeCode,
            RuntimeType::GeminiCli,
            RuntimeType::CodexCli,
        ] {
            assert_eq!(RuntimeType::from_str(rt.as_str()).unwrap(), rt);
        }
    }

    #[test]
    fn status_vocabulary_matches_spec_strings() {
        assert_eq!(AgentStatus::Inactive.as_str(), "inactive");
        assert_eq!(AgentStatus::Activating.as_str(), "activating");
        assert_eq!(AgentStatus::Started.as_str(), "started");
        assert_eq!(AgentStatus::Active.as_str(), "active");
        assert_eq!(WorkingStatus::Idle.as_str(), "idle");
        assert_eq!(WorkingStatus::Busy.as_str(), "busy");
    }
}
