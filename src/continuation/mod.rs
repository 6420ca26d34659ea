//! Continuation / Output Analyzer (§4.9): classifies a session's last
//! pane into an `Analysis` and tracks per-task iteration counters.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::warn;

use ai_session::patterns::{PROCESSING_INDICATOR_RE, PROMPT_CHARS};

use crate::model::{AgentConclusion, Analysis, ContinuationAction, ContinuationEvent};

const STUCK_ERROR_MARKERS: &[&str] = &["error", "exception", "traceback", "panic"];
const COMPLETION_MARKERS: &[&str] = &["task complete", "done.", "finished", "all tests pass"];

/// Tracks iteration counts per (`sessionName`, task) pair, capping at
/// `max_iterations` before forcing `MAX_ITERATIONS`.
pub struct ContinuationAnalyzer {
    max_iterations: u32,
    iterations: RwLock<HashMap<(String, String), u32>>,
}

impl ContinuationAnalyzer {
    pub fn new(max_iterations: u32) -> Self {
        Self {
            max_iterations,
            iterations: RwLock::new(HashMap::new()),
        }
    }

    /// The task identity within `event.session_name`: `metadata.task` if
    /// present, else `agent_id`, else a shared default so events that
    /// never identify a task still get a per-session counter.
    fn task_key(event: &ContinuationEvent) -> String {
        event
            .metadata
            .get("task")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| event.agent_id.clone())
            .unwrap_or_else(|| "default".to_string())
    }

    fn bump_iteration(&self, session_name: &str, task: &str) -> u32 {
        let mut guard = self.iterations.write().unwrap();
        let count = guard
            .entry((session_name.to_string(), task.to_string()))
            .or_insert(0);
        *count += 1;
        *count
    }

    pub fn reset_iterations(&self, session_name: &str, task: &str) {
        self.iterations
            .write()
            .unwrap()
            .remove(&(session_name.to_string(), task.to_string()));
    }

    /// Classifies `pane` (the last captured pane text for
    /// `event.session_name`) into an [`Analysis`].
    pub fn analyze(&self, event: &ContinuationEvent, pane: &str) -> Analysis {
        let task = Self::task_key(event);
        let iteration = self.bump_iteration(&event.session_name, &task);
        if iteration > self.max_iterations {
            warn!(session_name = %event.session_name, iteration, "iteration cap exceeded");
            return Analysis {
                conclusion: AgentConclusion::MaxIterations,
                confidence: 1.0,
                evidence: vec![format!(
                    "iteration {iteration} exceeds cap {}",
                    self.max_iterations
                )],
                recommended_action: ContinuationAction::NotifyOwner,
            };
        }

        let lowered = pane.to_lowercase();

        if let Some(marker) = COMPLETION_MARKERS.iter().find(|m| lowered.contains(**m)) {
            return Analysis {
                conclusion: AgentConclusion::TaskComplete,
                confidence: 0.85,
                evidence: vec![format!("pane contains completion marker {marker:?}")],
                recommended_action: ContinuationAction::AssignNextTask,
            };
        }

        if let Some(marker) = STUCK_ERROR_MARKERS.iter().find(|m| lowered.contains(**m)) {
            return Analysis {
                conclusion: AgentConclusion::StuckOrError,
                confidence: 0.7,
                evidence: vec![format!("pane contains error marker {marker:?}")],
                recommended_action: ContinuationAction::RetryWithHints,
            };
        }

        if ends_at_idle_prompt(pane) {
            return Analysis {
                conclusion: AgentConclusion::WaitingInput,
                confidence: 0.6,
                evidence: vec!["pane ends at an idle prompt".to_string()],
                recommended_action: ContinuationAction::InjectPrompt,
            };
        }

        if PROCESSING_INDICATOR_RE.is_match(pane) {
            return Analysis {
                conclusion: AgentConclusion::Incomplete,
                confidence: 0.5,
                evidence: vec!["pane shows an active processing indicator".to_string()],
                recommended_action: ContinuationAction::NoAction,
            };
        }

        Analysis {
            conclusion: AgentConclusion::Unknown,
            confidence: 0.2,
            evidence: vec!["no recognizable signal in pane".to_string()],
            recommended_action: ContinuationAction::NoAction,
        }
    }
}

fn ends_at_idle_prompt(pane: &str) -> bool {
    let last_non_empty = pane.lines().rev().map(str::trim).find(|l| !l.is_empty());
    matches!(last_non_empty, Some(line) if line.chars().count() == 1
        && PROMPT_CHARS.contains(&line.chars().next().unwrap()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ContinuationTrigger;
    use chrono::Utc;

    fn event(session_name: &str) -> ContinuationEvent {
        event_with_task(session_name, "default")
    }

    fn event_with_task(session_name: &str, task: &str) -> ContinuationEvent {
        ContinuationEvent {
            trigger: ContinuationTrigger::ActivityIdle,
            session_name: session_name.to_string(),
            agent_id: None,
            project_path: None,
            timestamp: Utc::now(),
            metadata: serde_json::json!({ "task": task }),
        }
    }

    #[test]
    fn classifies_completion_marker() {
        let analyzer = ContinuationAnalyzer::new(10);
        let analysis = analyzer.analyze(&event("s1"), "Running tests...\nAll tests pass");
        assert_eq!(analysis.conclusion, AgentConclusion::TaskComplete);
    }

    #[test]
    fn classifies_error_marker() {
        let analyzer = ContinuationAnalyzer::new(10);
        let analysis = analyzer.analyze(&event("s1"), "Traceback (most recent call last)");
        assert_eq!(analysis.conclusion, AgentConclusion::StuckOrError);
    }

    #[test]
    fn classifies_idle_prompt_as_waiting_input() {
        let analyzer = ContinuationAnalyzer::new(10);
        let analysis = analyzer.analyze(&event("s1"), "some output\n$");
        assert_eq!(analysis.conclusion, AgentConclusion::WaitingInput);
    }

    #[test]
    fn iteration_cap_forces_max_iterations() {
        let analyzer = ContinuationAnalyzer::new(2);
        let _ = analyzer.analyze(&event("s1"), "$");
        let _ = analyzer.analyze(&event("s1"), "$");
        let analysis = analyzer.analyze(&event("s1"), "$");
        assert_eq!(analysis.conclusion, AgentConclusion::MaxIterations);
        assert_eq!(analysis.recommended_action, ContinuationAction::NotifyOwner);
    }

    #[test]
    fn reset_iterations_clears_the_counter() {
        let analyzer = ContinuationAnalyzer::new(1);
        let _ = analyzer.analyze(&event("s1"), "$");
        analyzer.reset_iterations("s1", "default");
        let analysis = analyzer.analyze(&event("s1"), "$");
        assert_ne!(analysis.conclusion, AgentConclusion::MaxIterations);
    }

    /// P8: distinct tasks on one session get independent counters, so
    /// exhausting one task's budget doesn't affect another's.
    #[test]
    fn distinct_tasks_on_one_session_have_independent_counters() {
        let analyzer = ContinuationAnalyzer::new(1);
        let _ = analyzer.analyze(&event_with_task("s1", "task-a"), "$");
        let exhausted = analyzer.analyze(&event_with_task("s1", "task-a"), "$");
        assert_eq!(exhausted.conclusion, AgentConclusion::MaxIterations);

        let fresh = analyzer.analyze(&event_with_task("s1", "task-b"), "$");
        assert_ne!(fresh.conclusion, AgentConclusion::MaxIterations);
    }
}
