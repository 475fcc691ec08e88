// Run state
//
// Session-scoped progress tracking for one install run. Persisted alongside
// the staged data so a run survives process restarts; cleared after a
// successful commit (or an explicit reset in dev mode).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    pub current_step: Option<String>,
    #[serde(default)]
    pub completed_steps: Vec<String>,
    #[serde(default)]
    pub finalized: bool,
}

impl RunState {
    pub fn is_completed(&self, step_id: &str) -> bool {
        self.completed_steps.iter().any(|s| s == step_id)
    }

    /// Append a step id, keeping the list ordered by first completion.
    /// Re-executing a step (navigating back and resubmitting) is idempotent.
    pub fn mark_completed(&mut self, step_id: &str) {
        if !self.is_completed(step_id) {
            self.completed_steps.push(step_id.to_string());
        }
    }
}
