//! ExecutionEngine - one decision per task per tick.
//!
//! Design:
//! - Pure with respect to kernel state: it only receives shared borrows
//!   (`KernelView`), so it cannot mutate the runtime or the store. Its only
//!   side effect is telemetry.
//! - Every rule is evaluated against the tick time, never the wall clock,
//!   so the same view and tick always produce the same proposals.

use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Arc;

use crate::domain::observation::ObservationRecord;
use crate::domain::policy::{PolicyAssessment, PolicyLevel};
use crate::domain::proposal::{ObservationSignals, Proposal, ProposalKind, Tick};
use crate::domain::state::TaskState;
use crate::domain::task::TaskSnapshot;
use crate::policy::PolicyEngine;
use crate::ports::TelemetrySink;
use crate::runtime::TaskRuntime;
use crate::store::ObservationStore;

/// Minimum age of a CREATED task before activation is proposed.
pub const DEFAULT_ACTIVATION_DELAY_MS: i64 = 100;

/// Read-only view of the kernel handed to the engine for one evaluation.
#[derive(Clone, Copy)]
pub struct KernelView<'a> {
    pub runtime: &'a TaskRuntime,
    pub store: &'a ObservationStore,
    pub policy: &'a PolicyEngine,
}

pub struct ExecutionEngine {
    telemetry: Arc<dyn TelemetrySink>,
    activation_delay_ms: i64,
}

impl ExecutionEngine {
    pub fn new(telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self {
            telemetry,
            activation_delay_ms: DEFAULT_ACTIVATION_DELAY_MS,
        }
    }

    pub fn with_activation_delay(mut self, delay_ms: i64) -> Self {
        self.activation_delay_ms = delay_ms;
        self
    }

    pub fn activation_delay_ms(&self) -> i64 {
        self.activation_delay_ms
    }

    /// Evaluate every task. At most one proposal per task.
    pub fn evaluate(&self, view: KernelView<'_>, tick: Tick) -> Vec<Proposal> {
        let tasks = view.runtime.list_tasks();
        self.telemetry.info(
            "execution_engine_evaluation_start",
            json!({ "tick_id": tick.id, "at": tick.at, "tasks": tasks.len() }),
        );

        let mut proposed = HashSet::new();
        let mut proposals = Vec::new();
        for task in &tasks {
            if !proposed.insert(task.task_id.clone()) {
                continue;
            }
            if let Some(proposal) = self.evaluate_task(view, task, tick) {
                self.telemetry.info(
                    "execution_engine_proposal_created",
                    json!({
                        "tick_id": tick.id,
                        "task_id": proposal.task_id.as_str(),
                        "kind": proposal.kind.as_str(),
                        "reason": proposal.reason,
                    }),
                );
                proposals.push(proposal);
            }
        }

        self.telemetry.info(
            "execution_engine_evaluation_complete",
            json!({ "tick_id": tick.id, "proposals": proposals.len() }),
        );
        proposals
    }

    /// Gather, assess, interpret, synthesize for one task.
    pub fn evaluate_task(
        &self,
        view: KernelView<'_>,
        task: &TaskSnapshot,
        tick: Tick,
    ) -> Option<Proposal> {
        let correlation_id = task.correlation_id();
        let observations = correlation_id
            .map(|c| view.store.get_by_correlation(&c))
            .unwrap_or_default();

        let assessment = view.policy.assess(task, &observations, tick.at);
        let signals = Self::interpret_observations(&observations);

        self.synthesize(task, &assessment, &signals, tick)
            .map(|p| p.with_correlation(correlation_id))
    }

    /// Scan observations (oldest first) for completion, error and progress.
    pub fn interpret_observations(observations: &[ObservationRecord]) -> ObservationSignals {
        let mut sorted: Vec<&ObservationRecord> = observations.iter().collect();
        sorted.sort_by_key(|o| o.ingested_at);

        let mut signals = ObservationSignals::default();
        for observation in sorted {
            let payload = &observation.payload;
            if payload.get("status").and_then(Value::as_str) == Some("completed")
                || payload.get("done").and_then(Value::as_bool) == Some(true)
            {
                signals.completion = true;
            }
            if payload.get("status").and_then(Value::as_str) == Some("error")
                || payload.get("error").is_some_and(is_truthy)
            {
                signals.error = true;
            }
            if payload.contains_key("progress") {
                signals.progress = true;
            }
            signals.last_observation_at = Some(observation.ingested_at);
        }
        signals
    }

    /// Ordered rules; the first that matches wins.
    pub fn synthesize(
        &self,
        task: &TaskSnapshot,
        assessment: &PolicyAssessment,
        signals: &ObservationSignals,
        tick: Tick,
    ) -> Option<Proposal> {
        let task_id = task.task_id.clone();
        match task.state {
            TaskState::Active if assessment.level == PolicyLevel::Critical => Some(
                Proposal::new(
                    ProposalKind::SuspendTask,
                    task_id,
                    "critical policy assessment",
                    tick,
                )
                .with_policy(assessment.level, assessment.alerts.clone()),
            ),
            TaskState::Active if signals.completion => Some(Proposal::new(
                ProposalKind::TerminateTask,
                task_id,
                "completion observed",
                tick,
            )),
            TaskState::Active if signals.error => Some(Proposal::new(
                ProposalKind::SuspendTask,
                task_id,
                "error observed",
                tick,
            )),
            TaskState::Created if task.age_ms(tick.at) > self.activation_delay_ms => {
                Some(Proposal::new(
                    ProposalKind::ActivateTask,
                    task_id,
                    "minimum initialization reached",
                    tick,
                ))
            }
            _ => None,
        }
    }
}

/// Loose truthiness: null, false, 0, "" and missing are false.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::envelope::{ActionCode, ActorRole, Payload};
    use crate::domain::ids::{CorrelationId, MsgId, TaskId};
    use crate::domain::policy::{PolicyAlert, PolicyAlertType};
    use crate::domain::task::Metadata;
    use crate::impls::RecordingTelemetry;
    use rstest::rstest;

    fn engine() -> ExecutionEngine {
        ExecutionEngine::new(Arc::new(RecordingTelemetry::default()))
    }

    fn task(state: TaskState, created_at: i64) -> TaskSnapshot {
        TaskSnapshot {
            task_id: TaskId::new("t"),
            state,
            created_at,
            updated_at: created_at,
            history: Vec::new(),
            stalled_cycle_count: 0,
            metadata: Metadata::new(),
        }
    }

    fn observation(payload: Value, ingested_at: i64) -> ObservationRecord {
        ObservationRecord {
            msg_id: MsgId::from_uuid(uuid::Uuid::new_v4()),
            correlation_id: CorrelationId::from_uuid(uuid::Uuid::nil()),
            source: ActorRole::Driver,
            action_code: ActionCode::DriverTaskCompleted,
            payload: payload.as_object().cloned().unwrap_or_else(Payload::new),
            original_timestamp: ingested_at,
            ingested_at,
        }
    }

    fn assessment(level: PolicyLevel) -> PolicyAssessment {
        let alerts = if level == PolicyLevel::Low {
            Vec::new()
        } else {
            vec![PolicyAlert::new(
                PolicyAlertType::TaskAgeExceeded,
                level,
                1.0,
                None,
                "x",
            )]
        };
        PolicyAssessment {
            level,
            alerts,
            at: 0,
        }
    }

    #[rstest]
    #[case::status_completed(json!({"status": "completed"}), true, false, false)]
    #[case::done_flag(json!({"done": true}), true, false, false)]
    #[case::done_false(json!({"done": false}), false, false, false)]
    #[case::status_error(json!({"status": "error"}), false, true, false)]
    #[case::error_message(json!({"error": "timeout"}), false, true, false)]
    #[case::error_empty(json!({"error": ""}), false, false, false)]
    #[case::error_null(json!({"error": null}), false, false, false)]
    #[case::progress(json!({"progress": 0.4}), false, false, true)]
    #[case::nothing(json!({"url": "https://example.com"}), false, false, false)]
    fn signal_interpretation(
        #[case] payload: Value,
        #[case] completion: bool,
        #[case] error: bool,
        #[case] progress: bool,
    ) {
        let signals = ExecutionEngine::interpret_observations(&[observation(payload, 7)]);
        assert_eq!(signals.completion, completion);
        assert_eq!(signals.error, error);
        assert_eq!(signals.progress, progress);
        assert_eq!(signals.last_observation_at, Some(7));
    }

    #[test]
    fn last_observation_is_by_ingestion_time() {
        let signals = ExecutionEngine::interpret_observations(&[
            observation(json!({}), 30),
            observation(json!({}), 10),
        ]);
        assert_eq!(signals.last_observation_at, Some(30));
        assert_eq!(
            ExecutionEngine::interpret_observations(&[]),
            ObservationSignals::default()
        );
    }

    #[test]
    fn critical_assessment_outranks_completion() {
        let signals = ObservationSignals {
            completion: true,
            error: true,
            ..Default::default()
        };
        let proposal = engine()
            .synthesize(
                &task(TaskState::Active, 0),
                &assessment(PolicyLevel::Critical),
                &signals,
                Tick::new(1, 10),
            )
            .unwrap();
        assert_eq!(proposal.kind, ProposalKind::SuspendTask);
        assert_eq!(proposal.policy_level, Some(PolicyLevel::Critical));
        assert_eq!(proposal.alerts.len(), 1);
    }

    #[test]
    fn completion_outranks_error() {
        let signals = ObservationSignals {
            completion: true,
            error: true,
            ..Default::default()
        };
        let proposal = engine()
            .synthesize(
                &task(TaskState::Active, 0),
                &assessment(PolicyLevel::High),
                &signals,
                Tick::new(1, 10),
            )
            .unwrap();
        assert_eq!(proposal.kind, ProposalKind::TerminateTask);
        assert_eq!(proposal.reason, "completion observed");
        assert_eq!(proposal.policy_level, None);
    }

    #[test]
    fn error_on_active_task_suspends() {
        let signals = ObservationSignals {
            error: true,
            ..Default::default()
        };
        let proposal = engine()
            .synthesize(
                &task(TaskState::Active, 0),
                &assessment(PolicyLevel::Low),
                &signals,
                Tick::new(4, 10),
            )
            .unwrap();
        assert_eq!(proposal.kind, ProposalKind::SuspendTask);
        assert_eq!(proposal.tick_id, 4);
        assert_eq!(proposal.at, 10);
    }

    #[rstest]
    #[case::too_young(1_100, None)]
    #[case::just_old_enough(1_101, Some(ProposalKind::ActivateTask))]
    fn created_tasks_activate_after_the_delay(
        #[case] at: i64,
        #[case] expected: Option<ProposalKind>,
    ) {
        let proposal = engine().synthesize(
            &task(TaskState::Created, 1_000),
            &assessment(PolicyLevel::Low),
            &ObservationSignals::default(),
            Tick::new(1, at),
        );
        assert_eq!(proposal.map(|p| p.kind), expected);
    }

    #[rstest]
    fn suspended_and_terminated_tasks_get_nothing(
        #[values(TaskState::Suspended, TaskState::Terminated)] state: TaskState,
        #[values(PolicyLevel::Low, PolicyLevel::Critical)] level: PolicyLevel,
    ) {
        let signals = ObservationSignals {
            completion: true,
            error: true,
            ..Default::default()
        };
        assert!(
            engine()
                .synthesize(&task(state, 0), &assessment(level), &signals, Tick::new(1, 1_000_000))
                .is_none()
        );
    }

    #[test]
    fn critical_created_task_still_activates() {
        let proposal = engine()
            .synthesize(
                &task(TaskState::Created, 0),
                &assessment(PolicyLevel::Critical),
                &ObservationSignals::default(),
                Tick::new(1, 400_000),
            )
            .unwrap();
        assert_eq!(proposal.kind, ProposalKind::ActivateTask);
    }
}
