//! Task record, history and snapshots.

use serde::{Deserialize, Serialize};

use super::ids::{CorrelationId, MsgId, TaskId};
use super::state::TaskState;

/// Free-form task metadata. The kernel only reads a few well-known keys.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Metadata key binding a task to its observation stream.
pub const META_CORRELATION_ID: &str = "correlationId";
/// Metadata flag: the task is legitimately waiting for human input.
pub const META_WAITING_FOR_INPUT: &str = "waitingForInput";
/// Metadata hint: declared duration of a long-running operation, in ms.
pub const META_EXPECTED_DURATION: &str = "expectedDuration";

/// Reference to an emitted intent (COMMAND). Never interpreted by the runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentReference {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<MsgId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl IntentReference {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            msg_id: None,
            detail: None,
        }
    }

    pub fn with_msg_id(mut self, msg_id: MsgId) -> Self {
        self.msg_id = Some(msg_id);
        self
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// One append-only history entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryEntry {
    TaskCreated {
        at: i64,
    },
    StateTransition {
        from: TaskState,
        to: TaskState,
        reason: String,
        at: i64,
    },
    IntentReferenced {
        intent: IntentReference,
        at: i64,
    },
    ObservationReferenced {
        msg_id: MsgId,
        at: i64,
    },
    MetadataUpdated {
        at: i64,
    },
}

impl HistoryEntry {
    pub fn at(&self) -> i64 {
        match self {
            HistoryEntry::TaskCreated { at }
            | HistoryEntry::StateTransition { at, .. }
            | HistoryEntry::IntentReferenced { at, .. }
            | HistoryEntry::ObservationReferenced { at, .. }
            | HistoryEntry::MetadataUpdated { at } => *at,
        }
    }
}

fn declared_correlation(metadata: &Metadata) -> Option<CorrelationId> {
    metadata
        .get(META_CORRELATION_ID)
        .and_then(|v| v.as_str())
        .and_then(CorrelationId::parse_v4)
}

/// Owned, read-only copy of a task handed to every reader.
///
/// Mutating a snapshot never touches the runtime; it is a value, not a view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    pub task_id: TaskId,
    pub state: TaskState,
    pub created_at: i64,
    pub updated_at: i64,
    pub history: Vec<HistoryEntry>,
    pub stalled_cycle_count: u32,
    pub metadata: Metadata,
}

impl TaskSnapshot {
    /// Correlation id declared in metadata, if it is a valid UUIDv4 string.
    pub fn correlation_id(&self) -> Option<CorrelationId> {
        declared_correlation(&self.metadata)
    }

    pub fn age_ms(&self, at: i64) -> i64 {
        at - self.created_at
    }

    pub fn is_waiting_for_input(&self) -> bool {
        self.metadata
            .get(META_WAITING_FOR_INPUT)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn expected_duration_ms(&self) -> Option<f64> {
        self.metadata
            .get(META_EXPECTED_DURATION)
            .and_then(|v| v.as_f64())
    }
}

/// Mutable record owned by `TaskRuntime`.
///
/// Design:
/// - Single source of truth for one task.
/// - All state transitions happen through methods here.
#[derive(Debug, Clone)]
pub(crate) struct TaskRecord {
    pub task_id: TaskId,
    pub state: TaskState,
    pub created_at: i64,
    pub updated_at: i64,
    pub history: Vec<HistoryEntry>,
    pub stalled_cycle_count: u32,
    pub metadata: Metadata,

    /// Observation count seen at the previous cycle (stall accounting).
    pub last_observation_count: Option<usize>,
}

impl TaskRecord {
    pub fn correlation_id(&self) -> Option<CorrelationId> {
        declared_correlation(&self.metadata)
    }

    pub fn new(task_id: TaskId, metadata: Metadata, now: i64) -> Self {
        Self {
            task_id,
            state: TaskState::Created,
            created_at: now,
            updated_at: now,
            history: vec![HistoryEntry::TaskCreated { at: now }],
            stalled_cycle_count: 0,
            metadata,
            last_observation_count: None,
        }
    }

    /// Compare-and-set on the lifecycle state.
    ///
    /// This is the single write point for `state`. On mismatch the actual
    /// state is returned and nothing changes.
    pub fn compare_and_set_state(
        &mut self,
        expected: TaskState,
        next: TaskState,
        now: i64,
    ) -> Result<(), TaskState> {
        if self.state != expected {
            return Err(self.state);
        }
        self.state = next;
        self.updated_at = now;
        Ok(())
    }

    pub fn push_history(&mut self, entry: HistoryEntry) {
        self.history.push(entry);
    }

    pub fn merge_metadata(&mut self, metadata: Metadata, now: i64) {
        self.metadata.extend(metadata);
        self.updated_at = now;
        self.history.push(HistoryEntry::MetadataUpdated { at: now });
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            task_id: self.task_id.clone(),
            state: self.state,
            created_at: self.created_at,
            updated_at: self.updated_at,
            history: self.history.clone(),
            stalled_cycle_count: self.stalled_cycle_count,
            metadata: self.metadata.clone(),
        }
    }
}
