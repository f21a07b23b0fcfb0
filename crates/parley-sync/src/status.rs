use chrono::{DateTime, Utc};
use parley_core::{AgentState, AgentStatus, StatusPatch};

/// Folds status snapshots and partial patches into the current agent status.
#[derive(Debug, Default)]
pub struct StatusReducer {
    status: AgentStatus,
}

impl StatusReducer {
    pub fn status(&self) -> &AgentStatus {
        &self.status
    }

    pub fn apply_snapshot(&mut self, status: AgentStatus) {
        self.status = status;
    }

    /// Merges a patch field by field. A patch that moves the agent out of
    /// idle without naming last_activity_at stamps it with `now`; an explicit
    /// timestamp in the patch always wins.
    pub fn apply_patch(&mut self, patch: StatusPatch, now: DateTime<Utc>) {
        let leaves_idle = self.status.state == AgentState::Idle
            && matches!(patch.state, Some(state) if state != AgentState::Idle);
        if leaves_idle && patch.last_activity_at.is_none() {
            self.status.last_activity_at = Some(now);
        }
        if let Some(state) = patch.state {
            self.status.state = state;
        }
        if let Some(task) = patch.current_task {
            self.status.current_task = task;
        }
        if let Some(count) = patch.message_count {
            self.status.message_count = count;
        }
        if let Some(at) = patch.last_activity_at {
            self.status.last_activity_at = Some(at);
        }
    }
}
