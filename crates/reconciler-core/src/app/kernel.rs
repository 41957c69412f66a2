//! Kernel - the aggregate that owns every component.
//!
//! Design:
//! - One value, one owner. Every mutation of the runtime and the store goes
//!   through `&mut Kernel`, so there is exactly one serial path and no locks.
//! - Inbound traffic is validated here; a rejected envelope never reaches
//!   the store or the runtime.
//! - Evaluation borrows the kernel immutably (`KernelView`).

use serde_json::{Value, json};
use std::sync::Arc;

use super::status::KernelStatus;
use crate::domain::envelope::{ActionCode, ActorRole, Envelope, MessageType};
use crate::domain::errors::{EnvelopeRejected, KernelError};
use crate::domain::ids::{CorrelationId, MsgId, TaskId};
use crate::domain::observation::ObservationRecord;
use crate::domain::policy::{LimitsUpdate, PolicyLimits};
use crate::domain::proposal::{Proposal, Tick};
use crate::domain::state::TaskState;
use crate::domain::task::{IntentReference, Metadata, TaskSnapshot};
use crate::execution::{ExecutionEngine, KernelView};
use crate::impls::RecordingTelemetry;
use crate::policy::PolicyEngine;
use crate::ports::{Clock, Delivery, TelemetrySink};
use crate::protocol::EnvelopeCodec;
use crate::runtime::TaskRuntime;
use crate::store::ObservationStore;

fn is_own_telemetry(envelope: &Envelope) -> bool {
    envelope.identity.actor == ActorRole::Kernel
        && matches!(
            envelope.action_code(),
            ActionCode::KernelTelemetry | ActionCode::TelemetryDiscarded
        )
}

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundOutcome {
    /// EVENT stored as a fact and linked to the tasks that follow its correlation.
    Observed {
        msg_id: MsgId,
        correlation_id: CorrelationId,
        duplicate: bool,
        linked_tasks: usize,
    },
    /// COMMAND naming a known task, kept as an intent reference.
    IntentRecorded { msg_id: MsgId, task_id: TaskId },
    Acknowledged { msg_id: MsgId },
    /// Valid, but nothing to do with it.
    Ignored { msg_id: MsgId, reason: String },
    Rejected(EnvelopeRejected),
}

pub struct Kernel {
    codec: EnvelopeCodec,
    runtime: TaskRuntime,
    store: ObservationStore,
    policy: PolicyEngine,
    engine: ExecutionEngine,
    telemetry: Arc<dyn TelemetrySink>,
    recorder: Arc<RecordingTelemetry>,
    clock: Arc<dyn Clock>,
    track_stalls: bool,
    ticks: u64,
    last_tick: Option<Tick>,
}

/// Everything `KernelBuilder` wires together.
pub(crate) struct KernelParts {
    pub codec: EnvelopeCodec,
    pub runtime: TaskRuntime,
    pub store: ObservationStore,
    pub policy: PolicyEngine,
    pub engine: ExecutionEngine,
    pub telemetry: Arc<dyn TelemetrySink>,
    pub recorder: Arc<RecordingTelemetry>,
    pub clock: Arc<dyn Clock>,
    pub track_stalls: bool,
}

impl Kernel {
    pub(crate) fn from_parts(parts: KernelParts) -> Self {
        Self {
            codec: parts.codec,
            runtime: parts.runtime,
            store: parts.store,
            policy: parts.policy,
            engine: parts.engine,
            telemetry: parts.telemetry,
            recorder: parts.recorder,
            clock: parts.clock,
            track_stalls: parts.track_stalls,
            ticks: 0,
            last_tick: None,
        }
    }

    /// Validate and route one raw inbound message.
    pub fn accept_inbound(&mut self, raw: &Value) -> InboundOutcome {
        match self.codec.validate(raw) {
            Ok(envelope) => self.route(&envelope),
            Err(rejected) => InboundOutcome::Rejected(rejected),
        }
    }

    fn route(&mut self, envelope: &Envelope) -> InboundOutcome {
        let msg_id = envelope.msg_id();
        if is_own_telemetry(envelope) {
            // echoed back by the transport; storing it would feed on itself
            return InboundOutcome::Ignored {
                msg_id,
                reason: "kernel telemetry is not an observation".into(),
            };
        }
        match envelope.message_type() {
            MessageType::Event => match self.store.ingest_event(envelope) {
                Ok(receipt) => {
                    let linked_tasks = self.link_observation(&receipt.record);
                    InboundOutcome::Observed {
                        msg_id,
                        correlation_id: receipt.record.correlation_id,
                        duplicate: receipt.duplicate,
                        linked_tasks,
                    }
                }
                Err(e) => InboundOutcome::Ignored {
                    msg_id,
                    reason: e.to_string(),
                },
            },
            MessageType::Command => self.record_inbound_command(envelope),
            MessageType::Ack => {
                self.telemetry.info(
                    "kernel_ack_received",
                    json!({
                        "msg_id": msg_id.to_string(),
                        "correlation_id": envelope.correlation_id().to_string(),
                        "action_code": envelope.action_code().as_str(),
                    }),
                );
                InboundOutcome::Acknowledged { msg_id }
            }
        }
    }

    /// Add an observation reference to every task bound to its correlation.
    fn link_observation(&mut self, record: &ObservationRecord) -> usize {
        let task_ids = self.runtime.tasks_for_correlation(&record.correlation_id);
        let mut linked = 0;
        for task_id in &task_ids {
            match self.runtime.record_observation_reference(task_id, record) {
                Ok(_) => linked += 1,
                Err(e) => self.telemetry.warning(
                    "kernel_observation_link_failed",
                    json!({ "task_id": task_id.as_str(), "cause": e.to_string() }),
                ),
            }
        }
        linked
    }

    fn record_inbound_command(&mut self, envelope: &Envelope) -> InboundOutcome {
        let msg_id = envelope.msg_id();
        let task_id = envelope
            .payload
            .get("taskId")
            .and_then(Value::as_str)
            .map(TaskId::new)
            .filter(|id| self.runtime.get_task(id).is_some());

        let Some(task_id) = task_id else {
            self.telemetry.warning(
                "kernel_command_ignored",
                json!({
                    "msg_id": msg_id.to_string(),
                    "action_code": envelope.action_code().as_str(),
                }),
            );
            return InboundOutcome::Ignored {
                msg_id,
                reason: "command does not name a known task".into(),
            };
        };

        let intent = IntentReference::new(envelope.action_code().as_str())
            .with_msg_id(msg_id)
            .with_detail(json!({ "actor": envelope.identity.actor.as_str() }));
        match self.runtime.record_intent_reference(&task_id, intent) {
            Ok(_) => InboundOutcome::IntentRecorded { msg_id, task_id },
            Err(e) => InboundOutcome::Ignored {
                msg_id,
                reason: e.to_string(),
            },
        }
    }

    /// Advance to the next tick and evaluate every task.
    pub fn tick(&mut self) -> (Tick, Vec<Proposal>) {
        self.ticks += 1;
        let tick = Tick::new(self.ticks, self.clock.now_ms());
        if self.track_stalls {
            self.record_stall_cycles();
        }
        let proposals = self.evaluate(tick);
        self.last_tick = Some(tick);
        (tick, proposals)
    }

    pub fn evaluate(&self, tick: Tick) -> Vec<Proposal> {
        self.engine.evaluate(self.view(), tick)
    }

    pub fn view(&self) -> KernelView<'_> {
        KernelView {
            runtime: &self.runtime,
            store: &self.store,
            policy: &self.policy,
        }
    }

    /// Stall accounting for ACTIVE tasks bound to an observation stream.
    pub fn record_stall_cycles(&mut self) {
        for (task_id, correlation_id) in self.runtime.active_correlations() {
            let count = self.store.count_observations(&correlation_id);
            if let Err(e) = self.runtime.record_cycle(&task_id, count) {
                self.telemetry.warning(
                    "kernel_stall_cycle_failed",
                    json!({ "task_id": task_id.as_str(), "cause": e.to_string() }),
                );
            }
        }
    }

    /// Apply a proposal to the lifecycle.
    pub fn apply_proposal(&mut self, proposal: &Proposal) -> Result<TaskSnapshot, KernelError> {
        self.runtime.apply_state_transition(
            &proposal.task_id,
            proposal.kind.target_state(),
            &proposal.reason,
        )
    }

    /// Record what an effector emitted for a proposal.
    pub fn record_delivery(
        &mut self,
        proposal: &Proposal,
        delivery: Delivery,
    ) -> Result<Option<TaskSnapshot>, KernelError> {
        delivery
            .intent
            .map(|intent| self.runtime.record_intent_reference(&proposal.task_id, intent))
            .transpose()
    }

    pub fn create_task(
        &mut self,
        task_id: TaskId,
        metadata: Metadata,
    ) -> Result<TaskSnapshot, KernelError> {
        self.runtime.create_task(task_id, metadata)
    }

    pub fn transition_task(
        &mut self,
        task_id: &TaskId,
        state: TaskState,
        reason: &str,
    ) -> Result<TaskSnapshot, KernelError> {
        self.runtime.apply_state_transition(task_id, state, reason)
    }

    pub fn update_metadata(
        &mut self,
        task_id: &TaskId,
        metadata: Metadata,
    ) -> Result<TaskSnapshot, KernelError> {
        self.runtime.update_metadata(task_id, metadata)
    }

    pub fn get_task(&self, task_id: &TaskId) -> Option<TaskSnapshot> {
        self.runtime.get_task(task_id)
    }

    pub fn list_tasks(&self) -> Vec<TaskSnapshot> {
        self.runtime.list_tasks()
    }

    pub fn update_limits(&self, update: &LimitsUpdate) -> PolicyLimits {
        self.policy.update_limits(update)
    }

    pub fn replace_limits(&self, limits: PolicyLimits) {
        self.policy.replace_limits(limits);
    }

    pub fn limits(&self) -> PolicyLimits {
        self.policy.limits()
    }

    pub fn purge_correlation(&mut self, correlation_id: &CorrelationId) -> bool {
        self.store.purge_correlation(correlation_id)
    }

    pub fn purge_older_than(&mut self, cutoff: i64) -> usize {
        self.store.purge_older_than(cutoff)
    }

    pub fn status(&self, tick_interval_ms: u64) -> KernelStatus {
        KernelStatus {
            ticks: self.ticks,
            last_tick_at: self.last_tick.map(|t| t.at),
            tick_interval_ms,
            tasks: self.runtime.stats(),
            observations: self.store.stats(),
            limits: self.policy.limits(),
            telemetry: self.recorder.counters().into_iter().collect(),
        }
    }

    pub fn runtime(&self) -> &TaskRuntime {
        &self.runtime
    }

    pub fn store(&self) -> &ObservationStore {
        &self.store
    }

    pub fn policy(&self) -> &PolicyEngine {
        &self.policy
    }

    pub fn codec(&self) -> &EnvelopeCodec {
        &self.codec
    }

    pub fn telemetry(&self) -> &Arc<dyn TelemetrySink> {
        &self.telemetry
    }

    /// In-memory telemetry buffer (always part of the sink fan-out).
    pub fn recorder(&self) -> &Arc<RecordingTelemetry> {
        &self.recorder
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}
