//! TaskRuntime - the authoritative task lifecycle.
//!
//! Design:
//! - The only owner of task records. Every reader gets an owned
//!   `TaskSnapshot`.
//! - History is append-only: nothing here removes or rewrites an entry.
//! - Every state write goes through `TaskRecord::compare_and_set_state`.

use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::errors::KernelError;
use crate::domain::ids::{CorrelationId, TaskId};
use crate::domain::observation::ObservationRecord;
use crate::domain::state::TaskState;
use crate::domain::task::{HistoryEntry, IntentReference, Metadata, TaskRecord, TaskSnapshot};
use crate::observability::TaskStats;
use crate::ports::{Clock, TelemetrySink};

pub struct TaskRuntime {
    telemetry: Arc<dyn TelemetrySink>,
    clock: Arc<dyn Clock>,
    tasks: HashMap<TaskId, TaskRecord>,
    /// Task ids in creation order.
    order: Vec<TaskId>,
}

impl TaskRuntime {
    pub fn new(telemetry: Arc<dyn TelemetrySink>, clock: Arc<dyn Clock>) -> Self {
        Self {
            telemetry,
            clock,
            tasks: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Register a new task in `CREATED`.
    pub fn create_task(
        &mut self,
        task_id: TaskId,
        metadata: Metadata,
    ) -> Result<TaskSnapshot, KernelError> {
        if task_id.is_empty() {
            return Err(KernelError::InvalidTaskId);
        }
        if self.tasks.contains_key(&task_id) {
            return Err(KernelError::TaskAlreadyExists(task_id));
        }

        let now = self.clock.now_ms();
        let record = TaskRecord::new(task_id.clone(), metadata, now);
        let snapshot = record.snapshot();
        self.tasks.insert(task_id.clone(), record);
        self.order.push(task_id.clone());

        self.telemetry.info(
            "task_runtime_task_created",
            json!({ "task_id": task_id.as_str(), "at": now }),
        );
        Ok(snapshot)
    }

    /// Move a task to `new_state`.
    ///
    /// The current state is captured before validation and the write is a
    /// compare-and-set against it; `RaceDetected` means the state moved in
    /// between.
    pub fn apply_state_transition(
        &mut self,
        task_id: &TaskId,
        new_state: TaskState,
        reason: &str,
    ) -> Result<TaskSnapshot, KernelError> {
        let now = self.clock.now_ms();
        let record = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| KernelError::TaskNotFound(task_id.clone()))?;

        let expected = record.state;
        if !expected.can_transition_to(new_state) {
            self.telemetry.warning(
                "task_runtime_transition_rejected",
                json!({
                    "task_id": task_id.as_str(),
                    "from": expected.as_str(),
                    "to": new_state.as_str(),
                }),
            );
            return Err(KernelError::InvalidTransition {
                task_id: task_id.clone(),
                from: expected,
                to: new_state,
            });
        }

        if let Err(found) = record.compare_and_set_state(expected, new_state, now) {
            self.telemetry.critical(
                "task_runtime_race_detected",
                json!({
                    "task_id": task_id.as_str(),
                    "expected": expected.as_str(),
                    "found": found.as_str(),
                }),
            );
            return Err(KernelError::RaceDetected {
                task_id: task_id.clone(),
                expected,
                found,
            });
        }

        record.push_history(HistoryEntry::StateTransition {
            from: expected,
            to: new_state,
            reason: reason.to_string(),
            at: now,
        });
        // stall accounting restarts whenever the lifecycle moves
        record.stalled_cycle_count = 0;
        record.last_observation_count = None;

        self.telemetry.info(
            "task_runtime_state_changed",
            json!({
                "task_id": task_id.as_str(),
                "from": expected.as_str(),
                "to": new_state.as_str(),
                "reason": reason,
            }),
        );
        Ok(record.snapshot())
    }

    /// Remember that an intent was emitted for this task.
    pub fn record_intent_reference(
        &mut self,
        task_id: &TaskId,
        intent: IntentReference,
    ) -> Result<TaskSnapshot, KernelError> {
        let now = self.clock.now_ms();
        let record = self.record_mut(task_id)?;
        let kind = intent.kind.clone();
        record.push_history(HistoryEntry::IntentReferenced { intent, at: now });
        record.updated_at = now;
        let snapshot = record.snapshot();

        self.telemetry.info(
            "task_runtime_intent_recorded",
            json!({ "task_id": task_id.as_str(), "intent": kind }),
        );
        Ok(snapshot)
    }

    /// Link an observation to the task's provenance.
    pub fn record_observation_reference(
        &mut self,
        task_id: &TaskId,
        observation: &ObservationRecord,
    ) -> Result<TaskSnapshot, KernelError> {
        let now = self.clock.now_ms();
        let record = self.record_mut(task_id)?;
        record.push_history(HistoryEntry::ObservationReferenced {
            msg_id: observation.msg_id,
            at: now,
        });
        record.updated_at = now;
        let snapshot = record.snapshot();

        self.telemetry.info(
            "task_runtime_observation_recorded",
            json!({
                "task_id": task_id.as_str(),
                "msg_id": observation.msg_id.to_string(),
            }),
        );
        Ok(snapshot)
    }

    /// Merge `metadata` into the task's metadata (new keys win).
    pub fn update_metadata(
        &mut self,
        task_id: &TaskId,
        metadata: Metadata,
    ) -> Result<TaskSnapshot, KernelError> {
        let now = self.clock.now_ms();
        let keys: Vec<String> = metadata.keys().cloned().collect();
        let record = self.record_mut(task_id)?;
        record.merge_metadata(metadata, now);
        let snapshot = record.snapshot();

        self.telemetry.info(
            "task_runtime_metadata_updated",
            json!({ "task_id": task_id.as_str(), "keys": keys }),
        );
        Ok(snapshot)
    }

    /// Stall accounting for one evaluation cycle.
    ///
    /// Only `ACTIVE` tasks are counted. The first cycle after activation sets
    /// the baseline; afterwards an unchanged observation count increments
    /// `stalled_cycle_count` and any change resets it. Returns the count.
    pub fn record_cycle(
        &mut self,
        task_id: &TaskId,
        observation_count: usize,
    ) -> Result<u32, KernelError> {
        let record = self.record_mut(task_id)?;
        if record.state != TaskState::Active {
            return Ok(record.stalled_cycle_count);
        }

        match record.last_observation_count {
            Some(previous) if previous == observation_count => {
                record.stalled_cycle_count += 1;
            }
            _ => record.stalled_cycle_count = 0,
        }
        record.last_observation_count = Some(observation_count);

        let stalled = record.stalled_cycle_count;
        if stalled > 0 {
            self.telemetry.info(
                "task_runtime_cycle_stalled",
                json!({ "task_id": task_id.as_str(), "stalled_cycle_count": stalled }),
            );
        }
        Ok(stalled)
    }

    pub fn get_task(&self, task_id: &TaskId) -> Option<TaskSnapshot> {
        self.tasks.get(task_id).map(TaskRecord::snapshot)
    }

    /// All tasks in creation order.
    pub fn list_tasks(&self) -> Vec<TaskSnapshot> {
        self.records().map(TaskRecord::snapshot).collect()
    }

    pub fn list_tasks_by_state(&self, state: TaskState) -> Vec<TaskSnapshot> {
        self.records()
            .filter(|r| r.state == state)
            .map(TaskRecord::snapshot)
            .collect()
    }

    /// Tasks bound to `correlation_id`, in creation order.
    pub fn tasks_for_correlation(&self, correlation_id: &CorrelationId) -> Vec<TaskId> {
        self.records()
            .filter(|r| r.correlation_id().as_ref() == Some(correlation_id))
            .map(|r| r.task_id.clone())
            .collect()
    }

    /// `ACTIVE` tasks together with the correlation they are bound to.
    pub fn active_correlations(&self) -> Vec<(TaskId, CorrelationId)> {
        self.records()
            .filter(|r| r.state == TaskState::Active)
            .filter_map(|r| Some((r.task_id.clone(), r.correlation_id()?)))
            .collect()
    }

    pub fn stats(&self) -> TaskStats {
        let mut stats = TaskStats::default();
        for record in self.tasks.values() {
            stats.count(record.state);
        }
        stats
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn records(&self) -> impl Iterator<Item = &TaskRecord> {
        self.order.iter().filter_map(|id| self.tasks.get(id))
    }

    fn record_mut(&mut self, task_id: &TaskId) -> Result<&mut TaskRecord, KernelError> {
        self.tasks
            .get_mut(task_id)
            .ok_or_else(|| KernelError::TaskNotFound(task_id.clone()))
    }
}
