//! Task lifecycle state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical task state.
///
/// State transitions:
/// - Created -> Active | Terminated
/// - Active -> Suspended | Terminated
/// - Suspended -> Active | Terminated
/// - Terminated is absorbing
///
/// Design note: the enum plus `allowed_targets` is the whole table; nothing
/// else in the crate decides legality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Registered, not yet running.
    Created,

    /// Being driven by the automation surface.
    Active,

    /// Paused by a decision; may resume.
    Suspended,

    /// Finished for good.
    Terminated,
}

impl TaskState {
    pub const ALL: [TaskState; 4] = [
        TaskState::Created,
        TaskState::Active,
        TaskState::Suspended,
        TaskState::Terminated,
    ];

    /// States reachable from `self` in one transition.
    pub fn allowed_targets(self) -> &'static [TaskState] {
        match self {
            TaskState::Created => &[TaskState::Active, TaskState::Terminated],
            TaskState::Active => &[TaskState::Suspended, TaskState::Terminated],
            TaskState::Suspended => &[TaskState::Active, TaskState::Terminated],
            TaskState::Terminated => &[],
        }
    }

    pub fn can_transition_to(self, next: TaskState) -> bool {
        self.allowed_targets().contains(&next)
    }

    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Terminated)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Created => "CREATED",
            TaskState::Active => "ACTIVE",
            TaskState::Suspended => "SUSPENDED",
            TaskState::Terminated => "TERMINATED",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
