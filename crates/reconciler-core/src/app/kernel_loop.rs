//! KernelLoop - the cooperative scheduler around a `Kernel`.
//!
//! One tokio task owns the kernel. Everything that touches it arrives over a
//! channel and is handled in turn inside a single biased `select!`:
//!
//! 1. shutdown (`watch`), checked first
//! 2. the tick interval
//! 3. `KernelHandle` commands (bounded mpsc, oneshot replies)
//! 4. raw inbound messages forwarded by the transport handler
//!
//! Inbound traffic comes last so a busy transport cannot starve the cadence.
//! Its queue holds `inbound_capacity` messages; the handler drops anything
//! beyond that and reports `kernel_loop_inbound_dropped`.
//!
//! With a transport, published telemetry is drained by a second task that
//! outlives the loop just long enough to flush it.
//! A tick runs stall accounting and evaluation, optionally applies each
//! proposal, then hands it to the effector exactly once. Failed deliveries
//! are reported as CRITICAL telemetry and dropped.

use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use super::kernel::{InboundOutcome, Kernel};
use super::status::KernelStatus;
use crate::config::{ConfigError, KernelConfig};
use crate::domain::errors::KernelError;
use crate::domain::ids::{CorrelationId, TaskId};
use crate::domain::policy::{LimitsUpdate, PolicyLimits};
use crate::domain::proposal::{Proposal, Tick};
use crate::domain::state::TaskState;
use crate::domain::task::{Metadata, TaskSnapshot};
use crate::impls::TelemetryPump;
use crate::policy::LimitsHandle;
use crate::ports::{Effector, Subscription, Transport};

/// Pending `KernelHandle` requests before senders wait.
pub const COMMAND_BUFFER: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    #[error("kernel loop is not running")]
    Closed,

    #[error("kernel loop stopped before replying")]
    ReplyDropped,

    #[error("inbound queue is full")]
    InboundFull,

    #[error("kernel loop task failed: {0}")]
    Join(String),

    #[error(transparent)]
    Kernel(#[from] KernelError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// What one tick produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub tick: Tick,
    pub proposals: Vec<Proposal>,
    /// Proposals applied to the runtime (`apply_proposals` only).
    pub applied: usize,
    pub delivered: usize,
    pub failed: usize,
}

enum Command {
    CreateTask {
        task_id: TaskId,
        metadata: Metadata,
        reply: oneshot::Sender<Result<TaskSnapshot, KernelError>>,
    },
    Transition {
        task_id: TaskId,
        state: TaskState,
        reason: String,
        reply: oneshot::Sender<Result<TaskSnapshot, KernelError>>,
    },
    UpdateMetadata {
        task_id: TaskId,
        metadata: Metadata,
        reply: oneshot::Sender<Result<TaskSnapshot, KernelError>>,
    },
    GetTask {
        task_id: TaskId,
        reply: oneshot::Sender<Option<TaskSnapshot>>,
    },
    ListTasks {
        reply: oneshot::Sender<Vec<TaskSnapshot>>,
    },
    UpdateLimits {
        update: LimitsUpdate,
        reply: oneshot::Sender<PolicyLimits>,
    },
    SetTickInterval {
        interval_ms: u64,
        reply: oneshot::Sender<Result<(), ConfigError>>,
    },
    Status {
        reply: oneshot::Sender<KernelStatus>,
    },
    PurgeCorrelation {
        correlation_id: CorrelationId,
        reply: oneshot::Sender<bool>,
    },
    PurgeOlderThan {
        cutoff: i64,
        reply: oneshot::Sender<usize>,
    },
    Submit {
        raw: Value,
        reply: oneshot::Sender<InboundOutcome>,
    },
    TickNow {
        reply: oneshot::Sender<TickReport>,
    },
}

/// A built kernel that has not started yet.
pub struct KernelLoop {
    kernel: Kernel,
    config: KernelConfig,
    transport: Option<Arc<dyn Transport>>,
    effector: Arc<dyn Effector>,
    pump: Option<TelemetryPump>,
}

impl KernelLoop {
    pub(crate) fn new(
        kernel: Kernel,
        config: KernelConfig,
        transport: Option<Arc<dyn Transport>>,
        effector: Arc<dyn Effector>,
        pump: Option<TelemetryPump>,
    ) -> Self {
        Self {
            kernel,
            config,
            transport,
            effector,
            pump,
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Seed or inspect the kernel before the loop takes it over.
    pub fn kernel_mut(&mut self) -> &mut Kernel {
        &mut self.kernel
    }

    /// Start the loop on the current tokio runtime.
    pub fn spawn(self) -> RunningKernel {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let capacity = self.config.inbound_capacity;
        let (inbound_tx, inbound_rx) = mpsc::channel::<Value>(capacity);

        let subscription = self.transport.as_ref().map(|transport| {
            let tx = inbound_tx.clone();
            let telemetry = self.kernel.telemetry().clone();
            // the handler only forwards; validation happens on the loop task
            transport.on_receive(Arc::new(move |raw: Value| {
                if let Err(TrySendError::Full(raw)) = tx.try_send(raw) {
                    telemetry.warning(
                        "kernel_loop_inbound_dropped",
                        json!({
                            "capacity": capacity,
                            "msg_id": raw.pointer("/causality/msg_id").cloned(),
                        }),
                    );
                }
            }))
        });

        let pump = self.pump.map(|pump| {
            let (stop_tx, stop_rx) = watch::channel(false);
            (stop_tx, tokio::spawn(pump.run(stop_rx)))
        });

        let handle = KernelHandle {
            commands: command_tx,
            inbound: inbound_tx,
            limits: self.kernel.policy().limits_handle(),
        };

        let state = LoopState {
            kernel: self.kernel,
            config: self.config,
            effector: self.effector,
        };
        let join = tokio::spawn(run_loop(state, command_rx, inbound_rx, shutdown_rx));

        RunningKernel {
            handle,
            shutdown_tx,
            join,
            subscription,
            pump,
        }
    }
}

/// A spawned loop. Dropping it stops the loop without waiting.
pub struct RunningKernel {
    handle: KernelHandle,
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<Kernel>,
    subscription: Option<Subscription>,
    pump: Option<(watch::Sender<bool>, JoinHandle<()>)>,
}

impl RunningKernel {
    pub fn handle(&self) -> KernelHandle {
        self.handle.clone()
    }

    pub fn request_shutdown(&self) {
        // ignore send error: the loop may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Stop the loop and take the kernel back.
    ///
    /// Inbound messages already forwarded are processed first; telemetry
    /// still queued for the transport is flushed last.
    pub async fn shutdown_and_join(self) -> Result<Kernel, LoopError> {
        let RunningKernel {
            handle: _,
            shutdown_tx,
            join,
            subscription,
            pump,
        } = self;
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
        let _ = shutdown_tx.send(true);
        let kernel = join.await.map_err(|e| LoopError::Join(e.to_string()))?;

        if let Some((stop_tx, pump)) = pump {
            let _ = stop_tx.send(true);
            pump.await.map_err(|e| LoopError::Join(e.to_string()))?;
        }
        Ok(kernel)
    }
}

/// Cloneable client for a running loop.
#[derive(Clone)]
pub struct KernelHandle {
    commands: mpsc::Sender<Command>,
    inbound: mpsc::Sender<Value>,
    limits: LimitsHandle,
}

impl KernelHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, LoopError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| LoopError::Closed)?;
        rx.await.map_err(|_| LoopError::ReplyDropped)
    }

    pub async fn create_task(
        &self,
        task_id: TaskId,
        metadata: Metadata,
    ) -> Result<TaskSnapshot, LoopError> {
        Ok(self
            .request(|reply| Command::CreateTask {
                task_id,
                metadata,
                reply,
            })
            .await??)
    }

    pub async fn transition(
        &self,
        task_id: TaskId,
        state: TaskState,
        reason: impl Into<String>,
    ) -> Result<TaskSnapshot, LoopError> {
        let reason = reason.into();
        Ok(self
            .request(|reply| Command::Transition {
                task_id,
                state,
                reason,
                reply,
            })
            .await??)
    }

    pub async fn update_metadata(
        &self,
        task_id: TaskId,
        metadata: Metadata,
    ) -> Result<TaskSnapshot, LoopError> {
        Ok(self
            .request(|reply| Command::UpdateMetadata {
                task_id,
                metadata,
                reply,
            })
            .await??)
    }

    pub async fn get_task(&self, task_id: TaskId) -> Result<Option<TaskSnapshot>, LoopError> {
        self.request(|reply| Command::GetTask { task_id, reply })
            .await
    }

    pub async fn list_tasks(&self) -> Result<Vec<TaskSnapshot>, LoopError> {
        self.request(|reply| Command::ListTasks { reply }).await
    }

    /// Hot-reload policy limits; the next tick sees them.
    pub async fn update_limits(&self, update: LimitsUpdate) -> Result<PolicyLimits, LoopError> {
        self.request(|reply| Command::UpdateLimits { update, reply })
            .await
    }

    /// Limits in force, read without a round trip.
    pub fn limits(&self) -> PolicyLimits {
        (*self.limits.load()).clone()
    }

    pub async fn set_tick_interval(&self, interval_ms: u64) -> Result<(), LoopError> {
        Ok(self
            .request(|reply| Command::SetTickInterval { interval_ms, reply })
            .await??)
    }

    pub async fn status(&self) -> Result<KernelStatus, LoopError> {
        self.request(|reply| Command::Status { reply }).await
    }

    pub async fn purge_correlation(&self, correlation_id: CorrelationId) -> Result<bool, LoopError> {
        self.request(|reply| Command::PurgeCorrelation {
            correlation_id,
            reply,
        })
        .await
    }

    pub async fn purge_older_than(&self, cutoff: i64) -> Result<usize, LoopError> {
        self.request(|reply| Command::PurgeOlderThan { cutoff, reply })
            .await
    }

    /// Route one raw message and wait for the outcome.
    pub async fn submit(&self, raw: Value) -> Result<InboundOutcome, LoopError> {
        self.request(|reply| Command::Submit { raw, reply }).await
    }

    /// Queue one raw message, as a transport handler would. Never waits.
    pub fn push(&self, raw: Value) -> Result<(), LoopError> {
        self.inbound.try_send(raw).map_err(|e| match e {
            TrySendError::Full(_) => LoopError::InboundFull,
            TrySendError::Closed(_) => LoopError::Closed,
        })
    }

    /// Run a tick now, outside the cadence.
    pub async fn tick_now(&self) -> Result<TickReport, LoopError> {
        self.request(|reply| Command::TickNow { reply }).await
    }
}

struct LoopState {
    kernel: Kernel,
    config: KernelConfig,
    effector: Arc<dyn Effector>,
}

fn ticker(period: Duration) -> Interval {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

async fn run_loop(
    mut state: LoopState,
    mut commands: mpsc::Receiver<Command>,
    mut inbound: mpsc::Receiver<Value>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Kernel {
    let mut ticker = ticker(state.config.tick_interval());
    state.kernel.telemetry().info(
        "kernel_loop_started",
        json!({
            "tick_interval_ms": state.config.tick_interval_ms,
            "apply_proposals": state.config.apply_proposals,
        }),
    );

    loop {
        tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                state.run_tick().await;
            }
            command = commands.recv() => match command {
                Some(command) => {
                    if let Some(period) = state.handle(command).await {
                        ticker = self::ticker(period);
                    }
                }
                None => break,
            },
            Some(raw) = inbound.recv() => {
                state.kernel.accept_inbound(&raw);
            }
        }
    }

    while let Ok(raw) = inbound.try_recv() {
        state.kernel.accept_inbound(&raw);
    }
    state.kernel.telemetry().info(
        "kernel_loop_stopped",
        json!({ "ticks": state.kernel.status(state.config.tick_interval_ms).ticks }),
    );
    state.kernel
}

impl LoopState {
    /// Handle one command. Returns the new tick period when it changed.
    async fn handle(&mut self, command: Command) -> Option<Duration> {
        let kernel = &mut self.kernel;
        // a dropped receiver means the caller stopped waiting; nothing to do
        match command {
            Command::CreateTask {
                task_id,
                metadata,
                reply,
            } => {
                let _ = reply.send(kernel.create_task(task_id, metadata));
            }
            Command::Transition {
                task_id,
                state,
                reason,
                reply,
            } => {
                let _ = reply.send(kernel.transition_task(&task_id, state, &reason));
            }
            Command::UpdateMetadata {
                task_id,
                metadata,
                reply,
            } => {
                let _ = reply.send(kernel.update_metadata(&task_id, metadata));
            }
            Command::GetTask { task_id, reply } => {
                let _ = reply.send(kernel.get_task(&task_id));
            }
            Command::ListTasks { reply } => {
                let _ = reply.send(kernel.list_tasks());
            }
            Command::UpdateLimits { update, reply } => {
                let _ = reply.send(kernel.update_limits(&update));
            }
            Command::SetTickInterval { interval_ms, reply } => {
                if interval_ms == 0 {
                    let _ = reply.send(Err(ConfigError::Invalid(
                        "tick_interval_ms must be greater than zero".into(),
                    )));
                    return None;
                }
                self.config.tick_interval_ms = interval_ms;
                kernel.telemetry().info(
                    "kernel_loop_interval_changed",
                    json!({ "tick_interval_ms": interval_ms }),
                );
                let _ = reply.send(Ok(()));
                return Some(self.config.tick_interval());
            }
            Command::Status { reply } => {
                let _ = reply.send(kernel.status(self.config.tick_interval_ms));
            }
            Command::PurgeCorrelation {
                correlation_id,
                reply,
            } => {
                let _ = reply.send(kernel.purge_correlation(&correlation_id));
            }
            Command::PurgeOlderThan { cutoff, reply } => {
                let _ = reply.send(kernel.purge_older_than(cutoff));
            }
            Command::Submit { raw, reply } => {
                let _ = reply.send(kernel.accept_inbound(&raw));
            }
            Command::TickNow { reply } => {
                let report = self.run_tick().await;
                let _ = reply.send(report);
            }
        }
        None
    }

    async fn run_tick(&mut self) -> TickReport {
        let (tick, proposals) = self.kernel.tick();
        let mut report = TickReport {
            tick,
            proposals: proposals.clone(),
            applied: 0,
            delivered: 0,
            failed: 0,
        };

        for proposal in &proposals {
            if self.config.apply_proposals {
                match self.kernel.apply_proposal(proposal) {
                    Ok(_) => report.applied += 1,
                    Err(e) => {
                        self.kernel.telemetry().warning(
                            "kernel_loop_proposal_not_applied",
                            json!({
                                "tick_id": tick.id,
                                "task_id": proposal.task_id.as_str(),
                                "kind": proposal.kind.as_str(),
                                "cause": e.to_string(),
                            }),
                        );
                        continue;
                    }
                }
            }

            match self.effector.deliver(proposal).await {
                Ok(delivery) => {
                    report.delivered += 1;
                    if let Err(e) = self.kernel.record_delivery(proposal, delivery) {
                        self.kernel.telemetry().warning(
                            "kernel_loop_intent_not_recorded",
                            json!({
                                "task_id": proposal.task_id.as_str(),
                                "cause": e.to_string(),
                            }),
                        );
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    self.kernel.telemetry().critical(
                        "kernel_loop_delivery_failed",
                        json!({
                            "tick_id": tick.id,
                            "task_id": proposal.task_id.as_str(),
                            "kind": proposal.kind.as_str(),
                            "cause": e.to_string(),
                        }),
                    );
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::KernelBuilder;
    use crate::domain::envelope::{ActionCode, ActorRole, Payload};
    use crate::domain::proposal::ProposalKind;
    use crate::domain::task::HistoryEntry;
    use crate::impls::InMemoryTransport;
    use crate::ports::{
        Delivery, EffectorError, ManualClock, NoopTelemetry, SequenceIdGenerator,
    };
    use crate::protocol::EnvelopeDraft;
    use async_trait::async_trait;

    /// Long enough that only `tick_now` drives evaluation.
    const MANUAL_CADENCE_MS: u64 = 3_600_000;

    fn config(apply_proposals: bool) -> KernelConfig {
        KernelConfig {
            tick_interval_ms: MANUAL_CADENCE_MS,
            apply_proposals,
            ..KernelConfig::default()
        }
    }

    fn builder(clock: Arc<ManualClock>, config: KernelConfig) -> KernelBuilder {
        KernelBuilder::new()
            .config(config)
            .clock(clock)
            .id_generator(Arc::new(SequenceIdGenerator::new()))
            .telemetry(Arc::new(NoopTelemetry))
    }

    struct FailingEffector;

    #[async_trait]
    impl Effector for FailingEffector {
        async fn deliver(&self, _proposal: &Proposal) -> Result<Delivery, EffectorError> {
            Err(EffectorError::Delivery("driver unreachable".into()))
        }
    }

    #[tokio::test]
    async fn commands_are_served_by_the_loop() {
        let clock = Arc::new(ManualClock::new(1_000));
        let running = builder(clock, config(false)).build().unwrap().spawn();
        let handle = running.handle();

        let created = handle
            .create_task(TaskId::new("t1"), Metadata::new())
            .await
            .unwrap();
        assert_eq!(created.state, TaskState::Created);
        assert!(matches!(
            handle.create_task(TaskId::new("t1"), Metadata::new()).await,
            Err(LoopError::Kernel(KernelError::TaskAlreadyExists(_)))
        ));

        handle
            .transition(TaskId::new("t1"), TaskState::Active, "operator")
            .await
            .unwrap();
        let task = handle.get_task(TaskId::new("t1")).await.unwrap().unwrap();
        assert_eq!(task.state, TaskState::Active);
        assert_eq!(handle.list_tasks().await.unwrap().len(), 1);

        let kernel = running.shutdown_and_join().await.unwrap();
        assert_eq!(kernel.list_tasks().len(), 1);
        assert!(matches!(handle.status().await, Err(LoopError::Closed)));
    }

    #[tokio::test]
    async fn applied_proposals_are_delivered_as_commands() {
        let clock = Arc::new(ManualClock::new(1_000));
        let transport = InMemoryTransport::new();
        let running = builder(clock.clone(), config(true))
            .transport(Arc::new(transport.clone()))
            .build()
            .unwrap()
            .spawn();
        let handle = running.handle();

        handle
            .create_task(TaskId::new("t1"), Metadata::new())
            .await
            .unwrap();
        clock.advance(150);

        let report = handle.tick_now().await.unwrap();
        assert_eq!(report.proposals.len(), 1);
        assert_eq!(report.proposals[0].kind, ProposalKind::ActivateTask);
        assert_eq!((report.applied, report.delivered, report.failed), (1, 1, 0));

        let commands = transport.sent_commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].action_code(), ActionCode::TaskStart);
        assert_eq!(commands[0].identity.target, Some(ActorRole::Driver));

        let task = handle.get_task(TaskId::new("t1")).await.unwrap().unwrap();
        assert_eq!(task.state, TaskState::Active);
        assert!(matches!(
            task.history.last(),
            Some(HistoryEntry::IntentReferenced { .. })
        ));

        running.shutdown_and_join().await.unwrap();
    }

    #[tokio::test]
    async fn delivery_failures_are_reported_and_not_retried() {
        let clock = Arc::new(ManualClock::new(1_000));
        let running = builder(clock.clone(), config(false))
            .effector(Arc::new(FailingEffector))
            .build()
            .unwrap()
            .spawn();
        let handle = running.handle();

        handle
            .create_task(TaskId::new("t1"), Metadata::new())
            .await
            .unwrap();
        clock.advance(150);
        let report = handle.tick_now().await.unwrap();
        assert_eq!((report.delivered, report.failed), (0, 1));

        let kernel = running.shutdown_and_join().await.unwrap();
        assert_eq!(kernel.recorder().count("kernel_loop_delivery_failed"), 1);
        assert_eq!(
            kernel.get_task(&TaskId::new("t1")).unwrap().state,
            TaskState::Created
        );
    }

    #[tokio::test]
    async fn transport_traffic_reaches_the_store() {
        let clock = Arc::new(ManualClock::new(1_000));
        let transport = InMemoryTransport::new();
        let mut kernel_loop = builder(clock, config(false))
            .transport(Arc::new(transport.clone()))
            .build()
            .unwrap();
        let event = kernel_loop
            .kernel_mut()
            .codec()
            .build(EnvelopeDraft::event(ActorRole::Driver, ActionCode::DriverVital))
            .unwrap();
        let running = kernel_loop.spawn();
        assert_eq!(transport.handler_count(), 1);

        assert_eq!(transport.inject(event.to_value()), 1);
        assert_eq!(transport.inject(json!({"garbage": true})), 1);

        let kernel = running.shutdown_and_join().await.unwrap();
        assert_eq!(transport.handler_count(), 0);
        assert_eq!(kernel.store().count_observations(&event.correlation_id()), 1);
        assert_eq!(kernel.recorder().count("envelope_rejected"), 1);
    }

    #[tokio::test]
    async fn submit_returns_the_routing_outcome() {
        let clock = Arc::new(ManualClock::new(1_000));
        let kernel_loop = builder(clock, config(false)).build().unwrap();
        let mut payload = Payload::new();
        payload.insert("status".into(), json!("done"));
        let raw = json!({
            "protocol": {"version": "2.0.0", "timestamp": 1},
            "identity": {"actor": "DRIVER", "target": null},
            "causality": {
                "msg_id": "4f9d1c2e-8a7b-4c3d-9e2f-1a2b3c4d5e6f",
                "correlation_id": "4f9d1c2e-8a7b-4c3d-9e2f-1a2b3c4d5e6f",
            },
            "type": {"message_type": "EVENT", "action_code": "DRIVER_VITAL"},
            "payload": payload,
        });
        let running = kernel_loop.spawn();

        let outcome = running.handle().submit(raw).await.unwrap();
        assert!(matches!(outcome, InboundOutcome::Rejected(_)));

        running.shutdown_and_join().await.unwrap();
    }

    #[tokio::test]
    async fn limits_and_interval_are_hot_reloaded() {
        let clock = Arc::new(ManualClock::new(1_000));
        let running = builder(clock, config(false)).build().unwrap().spawn();
        let handle = running.handle();

        let limits = handle
            .update_limits(LimitsUpdate {
                max_stalled_cycles: Some(3),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(limits.max_stalled_cycles, 3);
        assert_eq!(handle.limits().max_stalled_cycles, 3);

        handle.set_tick_interval(250).await.unwrap();
        assert!(matches!(
            handle.set_tick_interval(0).await,
            Err(LoopError::Config(ConfigError::Invalid(_)))
        ));
        let status = handle.status().await.unwrap();
        assert_eq!(status.tick_interval_ms, 250);
        assert_eq!(status.limits.max_stalled_cycles, 3);

        running.shutdown_and_join().await.unwrap();
    }

    #[tokio::test]
    async fn the_interval_drives_ticks() {
        let clock = Arc::new(ManualClock::new(1_000));
        let config = KernelConfig {
            tick_interval_ms: 5,
            ..KernelConfig::default()
        };
        let running = builder(clock, config).build().unwrap().spawn();
        let handle = running.handle();

        let mut ticks = 0;
        for _ in 0..200 {
            ticks = handle.status().await.unwrap().ticks;
            if ticks >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(ticks >= 2, "only {ticks} ticks observed");

        running.shutdown_and_join().await.unwrap();
    }

    fn driver_vital(kernel_loop: &mut KernelLoop) -> crate::domain::envelope::Envelope {
        kernel_loop
            .kernel_mut()
            .codec()
            .build(EnvelopeDraft::event(ActorRole::Driver, ActionCode::DriverVital))
            .unwrap()
    }

    #[tokio::test]
    async fn a_full_inbound_queue_drops_and_reports() {
        let clock = Arc::new(ManualClock::new(1_000));
        let transport = InMemoryTransport::new();
        let config = KernelConfig {
            inbound_capacity: 2,
            ..config(false)
        };
        let mut kernel_loop = builder(clock, config)
            .transport(Arc::new(transport.clone()))
            .build()
            .unwrap();
        let event = driver_vital(&mut kernel_loop);
        let running = kernel_loop.spawn();
        let handle = running.handle();

        // the loop has not been polled yet, so nothing drains the queue
        for _ in 0..3 {
            transport.inject(event.to_value());
        }
        assert!(matches!(
            handle.push(event.to_value()),
            Err(LoopError::InboundFull)
        ));

        let kernel = running.shutdown_and_join().await.unwrap();
        assert_eq!(kernel.store().count_observations(&event.correlation_id()), 2);
        assert_eq!(kernel.recorder().count("kernel_loop_inbound_dropped"), 1);
    }

    #[tokio::test]
    async fn ticks_keep_their_cadence_under_an_inbound_flood() {
        let clock = Arc::new(ManualClock::new(1_000));
        let mut config = KernelConfig {
            tick_interval_ms: 5,
            inbound_capacity: 8,
            ..KernelConfig::default()
        };
        config.observations.max_per_correlation = Some(100);
        let mut kernel_loop = builder(clock, config).build().unwrap();
        let event = driver_vital(&mut kernel_loop).to_value();
        let running = kernel_loop.spawn();
        let handle = running.handle();

        let flooder = handle.clone();
        let flood = tokio::spawn(async move {
            loop {
                match flooder.push(event.clone()) {
                    Ok(()) => {}
                    Err(LoopError::InboundFull) => tokio::task::yield_now().await,
                    Err(_) => break,
                }
            }
        });

        let ticks = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let ticks = handle.status().await.unwrap().ticks;
                if ticks >= 3 {
                    break ticks;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("ticks stalled behind inbound traffic");
        assert!(ticks >= 3);

        flood.abort();
        let kernel = running.shutdown_and_join().await.unwrap();
        assert!(kernel.store().stats().total_observations > 0);
    }

    #[tokio::test]
    async fn telemetry_is_published_on_the_transport() {
        let clock = Arc::new(ManualClock::new(1_000));
        let transport = InMemoryTransport::new();
        let running = builder(clock, config(false))
            .transport(Arc::new(transport.clone()))
            .build()
            .unwrap()
            .spawn();
        running
            .handle()
            .create_task(TaskId::new("t1"), Metadata::new())
            .await
            .unwrap();
        running.shutdown_and_join().await.unwrap();

        let published: Vec<String> = transport
            .sent()
            .into_iter()
            .filter(|m| m.envelope.action_code() == ActionCode::KernelTelemetry)
            .filter_map(|m| m.envelope.payload["type"].as_str().map(str::to_string))
            .collect();
        assert!(published.iter().any(|kind| kind == "kernel_loop_started"));
        assert!(published.iter().any(|kind| kind == "task_runtime_task_created"));
        assert_eq!(published.last().map(String::as_str), Some("kernel_loop_stopped"));
    }

    #[tokio::test]
    async fn publishing_can_be_switched_off() {
        let clock = Arc::new(ManualClock::new(1_000));
        let transport = InMemoryTransport::new();
        let mut config = config(false);
        config.telemetry.publish = false;
        let kernel_loop = builder(clock, config)
            .transport(Arc::new(transport.clone()))
            .build()
            .unwrap();
        assert!(kernel_loop.pump.is_none());

        let running = kernel_loop.spawn();
        running
            .handle()
            .create_task(TaskId::new("t1"), Metadata::new())
            .await
            .unwrap();
        let kernel = running.shutdown_and_join().await.unwrap();
        assert!(transport.sent().is_empty());
        assert_eq!(kernel.recorder().count("task_runtime_task_created"), 1);
    }
}
