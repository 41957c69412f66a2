use serde_json::{Value, json};
use std::sync::Arc;

use reconciler_core::app::{InboundOutcome, Kernel, KernelBuilder};
use reconciler_core::config::KernelConfig;
use reconciler_core::domain::task::META_CORRELATION_ID;
use reconciler_core::domain::{
    ActionCode, ActorRole, CorrelationId, HistoryEntry, Metadata, Payload, PolicyAlertType,
    PolicyLevel, ProposalKind, TaskId, TaskState, Tick,
};
use reconciler_core::impls::InMemoryTransport;
use reconciler_core::ports::{
    Clock, IdGenerator, ManualClock, NoopTelemetry, SequenceIdGenerator,
};
use reconciler_core::protocol::EnvelopeDraft;

struct Harness {
    kernel: Kernel,
    clock: Arc<ManualClock>,
    ids: Arc<SequenceIdGenerator>,
}

impl Harness {
    fn new(config: KernelConfig) -> Self {
        let clock = Arc::new(ManualClock::new(1_000));
        let ids = Arc::new(SequenceIdGenerator::new());
        let kernel = KernelBuilder::new()
            .config(config)
            .clock(clock.clone())
            .id_generator(ids.clone())
            .telemetry(Arc::new(NoopTelemetry))
            .build_kernel()
            .unwrap();
        Self { kernel, clock, ids }
    }

    fn correlation(&self) -> CorrelationId {
        CorrelationId::from_uuid(self.ids.next_uuid())
    }

    fn bound_task(&mut self, name: &str, state: TaskState) -> (TaskId, CorrelationId) {
        let correlation_id = self.correlation();
        let mut metadata = Metadata::new();
        metadata.insert(META_CORRELATION_ID.into(), json!(correlation_id.to_string()));
        let task_id = TaskId::new(name);
        self.kernel.create_task(task_id.clone(), metadata).unwrap();
        if state != TaskState::Created {
            self.kernel
                .transition_task(&task_id, state, "test setup")
                .unwrap();
        }
        (task_id, correlation_id)
    }

    fn driver_event(&self, correlation_id: CorrelationId, payload: Value) -> Value {
        self.kernel
            .codec()
            .build(
                EnvelopeDraft::event(ActorRole::Driver, ActionCode::DriverStateObserved)
                    .with_correlation(correlation_id)
                    .with_payload(payload.as_object().cloned().unwrap_or_else(Payload::new)),
            )
            .unwrap()
            .to_value()
    }
}

#[test]
fn new_tasks_activate_after_the_initialization_delay() {
    let mut h = Harness::new(KernelConfig::default());
    h.kernel
        .create_task(TaskId::new("t1"), Metadata::new())
        .unwrap();

    assert!(h.kernel.evaluate(Tick::new(1, 1_050)).is_empty());

    let proposals = h.kernel.evaluate(Tick::new(2, 1_101));
    assert_eq!(proposals.len(), 1);
    assert_eq!(proposals[0].kind, ProposalKind::ActivateTask);
    assert_eq!(proposals[0].task_id, TaskId::new("t1"));
    assert_eq!(proposals[0].tick_id, 2);
    assert_eq!(proposals[0].at, 1_101);
}

#[test]
fn observed_completion_terminates_an_active_task() {
    let mut h = Harness::new(KernelConfig::default());
    let (task_id, correlation_id) = h.bound_task("t2", TaskState::Active);

    let raw = h.driver_event(correlation_id, json!({ "done": true }));
    assert!(matches!(
        h.kernel.accept_inbound(&raw),
        InboundOutcome::Observed { linked_tasks: 1, .. }
    ));

    let (_, proposals) = h.kernel.tick();
    assert_eq!(proposals.len(), 1);
    assert_eq!(proposals[0].kind, ProposalKind::TerminateTask);
    assert_eq!(proposals[0].task_id, task_id);
    assert_eq!(proposals[0].correlation_id, Some(correlation_id));

    let terminated = h.kernel.apply_proposal(&proposals[0]).unwrap();
    assert_eq!(terminated.state, TaskState::Terminated);
    assert!(h.kernel.tick().1.is_empty());
}

#[test]
fn observation_volume_alone_never_suspends() {
    let mut h = Harness::new(KernelConfig::default());
    let (task_id, correlation_id) = h.bound_task("t3", TaskState::Active);

    for i in 0..1_001 {
        let raw = h.driver_event(correlation_id, json!({ "progress": i }));
        h.kernel.accept_inbound(&raw);
    }
    assert_eq!(h.kernel.store().count_observations(&correlation_id), 1_001);

    let task = h.kernel.get_task(&task_id).unwrap();
    let observations = h.kernel.store().get_by_correlation(&correlation_id);
    let assessment = h
        .kernel
        .policy()
        .assess(&task, &observations, h.clock.now_ms());
    assert_eq!(assessment.level, PolicyLevel::High);
    assert!(assessment.has_alert(PolicyAlertType::ObservationVolume));

    assert!(h.kernel.tick().1.is_empty());
}

#[test]
fn verdict_fields_are_refused_before_they_reach_a_task() {
    let mut h = Harness::new(KernelConfig::default());
    let (task_id, correlation_id) = h.bound_task("t1", TaskState::Active);

    let mut raw = h.driver_event(correlation_id, json!({ "progress": 0.9 }));
    raw["payload"]["items"] = json!([{ "ok": 1 }, { "completed": true }]);
    match h.kernel.accept_inbound(&raw) {
        InboundOutcome::Rejected(rejected) => {
            assert_eq!(rejected.detail, "forbidden field `payload.items[1].completed`");
        }
        other => panic!("expected a rejection, got {other:?}"),
    }

    assert!(!h.kernel.store().has_correlation(&correlation_id));
    assert_eq!(h.kernel.get_task(&task_id).unwrap().history.len(), 2);
    assert!(h.kernel.tick().1.is_empty());
}

#[test]
fn critical_age_outranks_completion() {
    let mut h = Harness::new(KernelConfig::default());
    let (task_id, correlation_id) = h.bound_task("stale", TaskState::Active);

    let done = h.driver_event(correlation_id, json!({ "done": true }));
    h.kernel.accept_inbound(&done);
    h.clock.advance(300_001);

    let (_, proposals) = h.kernel.tick();
    assert_eq!(proposals.len(), 1);
    assert_eq!(proposals[0].task_id, task_id);
    assert_eq!(proposals[0].kind, ProposalKind::SuspendTask);
    assert_eq!(proposals[0].policy_level, Some(PolicyLevel::Critical));
    assert!(
        proposals[0]
            .alerts
            .iter()
            .any(|a| a.alert_type == PolicyAlertType::TaskAgeExceeded)
    );
}

#[test]
fn one_proposal_per_task_per_tick() {
    let mut h = Harness::new(KernelConfig::default());
    for name in ["a", "b", "c"] {
        h.kernel.create_task(TaskId::new(name), Metadata::new()).unwrap();
    }
    h.clock.advance(500);

    let (_, proposals) = h.kernel.tick();
    let mut ids: Vec<&str> = proposals.iter().map(|p| p.task_id.as_str()).collect();
    ids.sort_unstable();
    assert_eq!(ids, ["a", "b", "c"]);
}

#[test]
fn history_records_the_full_provenance() {
    let mut h = Harness::new(KernelConfig::default());
    let (task_id, correlation_id) = h.bound_task("t1", TaskState::Created);
    h.clock.advance(200);

    let (_, proposals) = h.kernel.tick();
    h.kernel.apply_proposal(&proposals[0]).unwrap();
    let raw = h.driver_event(correlation_id, json!({ "progress": 0.5 }));
    h.kernel.accept_inbound(&raw);

    let history = h.kernel.get_task(&task_id).unwrap().history;
    assert!(matches!(history[0], HistoryEntry::TaskCreated { at: 1_000 }));
    assert!(matches!(
        history[1],
        HistoryEntry::StateTransition {
            from: TaskState::Created,
            to: TaskState::Active,
            ..
        }
    ));
    assert!(matches!(history[2], HistoryEntry::ObservationReferenced { .. }));
    let times: Vec<i64> = history.iter().map(HistoryEntry::at).collect();
    assert!(times.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test]
async fn the_loop_drives_a_task_to_completion_over_a_transport() {
    let clock = Arc::new(ManualClock::new(1_000));
    let ids = Arc::new(SequenceIdGenerator::new());
    let transport = InMemoryTransport::new();
    let config = KernelConfig {
        tick_interval_ms: 3_600_000,
        apply_proposals: true,
        ..KernelConfig::default()
    };
    let mut kernel_loop = KernelBuilder::new()
        .config(config)
        .clock(clock.clone())
        .id_generator(ids.clone())
        .telemetry(Arc::new(NoopTelemetry))
        .transport(Arc::new(transport.clone()))
        .build()
        .unwrap();
    let codec = kernel_loop.kernel_mut().codec().clone();
    let running = kernel_loop.spawn();
    let handle = running.handle();

    let correlation_id = CorrelationId::from_uuid(ids.next_uuid());
    let mut metadata = Metadata::new();
    metadata.insert(META_CORRELATION_ID.into(), json!(correlation_id.to_string()));
    handle
        .create_task(TaskId::new("job"), metadata)
        .await
        .unwrap();

    clock.advance(150);
    let report = handle.tick_now().await.unwrap();
    assert_eq!(report.applied, 1);
    let start = transport.sent_commands().pop().unwrap();
    assert_eq!(start.action_code(), ActionCode::TaskStart);
    assert_eq!(start.correlation_id(), correlation_id);

    let ack = codec.ack_for(&start, ActorRole::Driver).unwrap();
    assert_eq!(
        handle.submit(ack.to_value()).await.unwrap(),
        InboundOutcome::Acknowledged { msg_id: ack.msg_id() }
    );

    let mut payload = Payload::new();
    payload.insert("done".into(), json!(true));
    let completed = codec
        .build(
            EnvelopeDraft::event(ActorRole::Driver, ActionCode::DriverTaskCompleted)
                .with_correlation(correlation_id)
                .with_payload(payload),
        )
        .unwrap();
    transport.inject(completed.to_value());

    clock.advance(50);
    let report = handle.tick_now().await.unwrap();
    assert_eq!(report.proposals[0].kind, ProposalKind::TerminateTask);
    let cancel = transport.sent_commands().pop().unwrap();
    assert_eq!(cancel.action_code(), ActionCode::TaskCancel);

    let kernel = running.shutdown_and_join().await.unwrap();
    let task = kernel.get_task(&TaskId::new("job")).unwrap();
    assert_eq!(task.state, TaskState::Terminated);
    let status = kernel.status(3_600_000);
    assert_eq!(status.tasks.terminated, 1);
    assert_eq!(status.observations.total_observations, 1);
    assert_eq!(status.telemetry.get("kernel_ack_received"), Some(&1));
}
