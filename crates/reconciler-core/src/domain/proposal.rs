//! Proposal model: what the kernel suggests doing next with a task.
//!
//! Proposals are transient. The kernel produces them, the effector layer
//! consumes them; nothing stores them.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{CorrelationId, TaskId};
use super::policy::{PolicyAlert, PolicyLevel};
use super::state::TaskState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProposalKind {
    ActivateTask,
    SuspendTask,
    TerminateTask,
}

impl ProposalKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProposalKind::ActivateTask => "ACTIVATE_TASK",
            ProposalKind::SuspendTask => "SUSPEND_TASK",
            ProposalKind::TerminateTask => "TERMINATE_TASK",
        }
    }

    /// Lifecycle state the task ends up in if the proposal is applied.
    pub fn target_state(self) -> TaskState {
        match self {
            ProposalKind::ActivateTask => TaskState::Active,
            ProposalKind::SuspendTask => TaskState::Suspended,
            ProposalKind::TerminateTask => TaskState::Terminated,
        }
    }
}

impl fmt::Display for ProposalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    pub kind: ProposalKind,
    pub task_id: TaskId,
    pub reason: String,
    pub at: i64,
    pub tick_id: u64,
    /// Observation stream of the task, when its metadata declares one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
    /// Set only by the critical-assessment rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_level: Option<PolicyLevel>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alerts: Vec<PolicyAlert>,
}

impl Proposal {
    pub fn new(kind: ProposalKind, task_id: TaskId, reason: impl Into<String>, tick: Tick) -> Self {
        Self {
            kind,
            task_id,
            reason: reason.into(),
            at: tick.at,
            tick_id: tick.id,
            correlation_id: None,
            policy_level: None,
            alerts: Vec::new(),
        }
    }

    pub fn with_correlation(mut self, correlation_id: Option<CorrelationId>) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    pub fn with_policy(mut self, level: PolicyLevel, alerts: Vec<PolicyAlert>) -> Self {
        self.policy_level = Some(level);
        self.alerts = alerts;
        self
    }
}

/// One evaluation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub id: u64,
    pub at: i64,
}

impl Tick {
    pub fn new(id: u64, at: i64) -> Self {
        Self { id, at }
    }
}

/// Signals extracted from a task's observations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObservationSignals {
    pub completion: bool,
    pub error: bool,
    pub progress: bool,
    pub last_observation_at: Option<i64>,
}
