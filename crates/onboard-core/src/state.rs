// ── Task state ──

use uuid::Uuid;

use crate::model::Declaration;
use crate::rollback::RollbackInfo;

/// Per-request state shared by the reconcilers of one onboarding task.
#[derive(Debug, Clone)]
pub struct TaskState {
    /// Correlates log lines and emitted events.
    pub id: Uuid,
    /// Device state recorded after the previous run; the diff baseline.
    pub current_config: Declaration,
    pub rollback_info: RollbackInfo,
}

impl TaskState {
    pub fn new(current_config: Declaration) -> Self {
        Self {
            id: Uuid::new_v4(),
            current_config,
            rollback_info: RollbackInfo::default(),
        }
    }

    pub fn with_rollback(mut self, rollback_info: RollbackInfo) -> Self {
        self.rollback_info = rollback_info;
        self
    }
}

impl Default for TaskState {
    fn default() -> Self {
        Self::new(Declaration::default())
    }
}
