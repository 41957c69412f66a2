//! Stats views over the kernel's in-memory state.

use serde::{Deserialize, Serialize};

use crate::domain::state::TaskState;

/// Task counts by lifecycle state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStats {
    pub total: usize,
    pub created: usize,
    pub active: usize,
    pub suspended: usize,
    pub terminated: usize,
}

impl TaskStats {
    pub fn count(&mut self, state: TaskState) {
        self.total += 1;
        match state {
            TaskState::Created => self.created += 1,
            TaskState::Active => self.active += 1,
            TaskState::Suspended => self.suspended += 1,
            TaskState::Terminated => self.terminated += 1,
        }
    }

    pub fn get(&self, state: TaskState) -> usize {
        match state {
            TaskState::Created => self.created,
            TaskState::Active => self.active,
            TaskState::Suspended => self.suspended,
            TaskState::Terminated => self.terminated,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationStats {
    pub total_observations: usize,
    pub correlations: usize,
    pub unique_msg_ids: usize,
    pub temporal_index_size: usize,
    pub max_per_correlation: Option<usize>,
}
