//! PolicyEngine - aggregates heuristic alerts into one risk level.
//!
//! Design:
//! - Read-only: `assess` borrows its inputs and returns a fresh assessment.
//! - Limits live behind an `ArcSwap`, so a reload from the control loop (or
//!   anyone holding a `LimitsHandle`) never blocks an assessment in flight.

use arc_swap::ArcSwap;
use serde_json::json;
use std::sync::Arc;

use super::heuristics::{self, Context};
use crate::domain::observation::ObservationRecord;
use crate::domain::policy::{
    LimitsUpdate, PolicyAlert, PolicyAssessment, PolicyLevel, PolicyLimits,
};
use crate::domain::task::TaskSnapshot;
use crate::ports::TelemetrySink;

/// Shared, hot-swappable policy limits.
#[derive(Clone)]
pub struct LimitsHandle {
    inner: Arc<ArcSwap<PolicyLimits>>,
}

impl LimitsHandle {
    pub fn new(limits: PolicyLimits) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(limits)),
        }
    }

    /// Current snapshot. Lock-free.
    pub fn load(&self) -> Arc<PolicyLimits> {
        self.inner.load_full()
    }

    pub fn store(&self, limits: PolicyLimits) {
        self.inner.store(Arc::new(limits));
    }

    /// Apply a partial update atomically and return the new limits.
    pub fn update(&self, update: &LimitsUpdate) -> PolicyLimits {
        // rcu hands back the value its winning attempt replaced
        let replaced = self
            .inner
            .rcu(|current| Arc::new(update.apply_to(current)));
        update.apply_to(&replaced)
    }
}

/// Level aggregation over all alerts.
///
/// Any CRITICAL wins; then any HIGH; three or more MEDIUM escalate to HIGH;
/// then any MEDIUM; otherwise LOW.
pub fn aggregate_level(alerts: &[PolicyAlert]) -> PolicyLevel {
    let count = |level: PolicyLevel| alerts.iter().filter(|a| a.severity == level).count();

    if count(PolicyLevel::Critical) > 0 {
        PolicyLevel::Critical
    } else if count(PolicyLevel::High) > 0 {
        PolicyLevel::High
    } else if count(PolicyLevel::Medium) >= 3 {
        PolicyLevel::High
    } else if count(PolicyLevel::Medium) > 0 {
        PolicyLevel::Medium
    } else {
        PolicyLevel::Low
    }
}

pub struct PolicyEngine {
    telemetry: Arc<dyn TelemetrySink>,
    limits: LimitsHandle,
}

impl PolicyEngine {
    pub fn new(telemetry: Arc<dyn TelemetrySink>, limits: PolicyLimits) -> Self {
        Self::with_handle(telemetry, LimitsHandle::new(limits))
    }

    pub fn with_handle(telemetry: Arc<dyn TelemetrySink>, limits: LimitsHandle) -> Self {
        Self { telemetry, limits }
    }

    pub fn limits_handle(&self) -> LimitsHandle {
        self.limits.clone()
    }

    pub fn limits(&self) -> PolicyLimits {
        (*self.limits.load()).clone()
    }

    pub fn update_limits(&self, update: &LimitsUpdate) -> PolicyLimits {
        let next = self.limits.update(update);
        self.report_limits(&next);
        next
    }

    pub fn replace_limits(&self, limits: PolicyLimits) {
        self.report_limits(&limits);
        self.limits.store(limits);
    }

    /// Assess one task against its observations at time `at`.
    pub fn assess(
        &self,
        task: &TaskSnapshot,
        observations: &[ObservationRecord],
        at: i64,
    ) -> PolicyAssessment {
        let limits = self.limits.load();
        let alerts = heuristics::run_all(&Context {
            task,
            observations,
            limits: &limits,
            at,
        });
        let level = aggregate_level(&alerts);

        self.telemetry.info(
            "policy_engine_assessment_complete",
            json!({
                "task_id": task.task_id.as_str(),
                "level": level.as_str(),
                "alerts": alerts.iter().map(|a| a.alert_type.as_str()).collect::<Vec<_>>(),
            }),
        );

        PolicyAssessment { level, alerts, at }
    }

    fn report_limits(&self, limits: &PolicyLimits) {
        self.telemetry.info(
            "policy_engine_limits_updated",
            serde_json::to_value(limits).unwrap_or_default(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::envelope::{ActionCode, ActorRole};
    use crate::domain::ids::{CorrelationId, MsgId, TaskId};
    use crate::domain::policy::PolicyAlertType;
    use crate::domain::state::TaskState;
    use crate::domain::task::Metadata;
    use crate::impls::RecordingTelemetry;
    use rstest::rstest;

    fn alert(severity: PolicyLevel) -> PolicyAlert {
        PolicyAlert::new(PolicyAlertType::ObservationGap, severity, 0.0, None, "test")
    }

    fn task(state: TaskState) -> TaskSnapshot {
        TaskSnapshot {
            task_id: TaskId::new("t"),
            state,
            created_at: 0,
            updated_at: 0,
            history: Vec::new(),
            stalled_cycle_count: 0,
            metadata: Metadata::new(),
        }
    }

    fn observations(n: usize, ingested_at: i64) -> Vec<ObservationRecord> {
        (0..n)
            .map(|_| ObservationRecord {
                msg_id: MsgId::from_uuid(uuid::Uuid::new_v4()),
                correlation_id: CorrelationId::from_uuid(uuid::Uuid::nil()),
                source: ActorRole::Driver,
                action_code: ActionCode::DriverVital,
                payload: Default::default(),
                original_timestamp: ingested_at,
                ingested_at,
            })
            .collect()
    }

    #[rstest]
    #[case::none(vec![], PolicyLevel::Low)]
    #[case::only_low(vec![PolicyLevel::Low, PolicyLevel::Low], PolicyLevel::Low)]
    #[case::one_medium(vec![PolicyLevel::Medium], PolicyLevel::Medium)]
    #[case::two_medium(vec![PolicyLevel::Medium, PolicyLevel::Medium], PolicyLevel::Medium)]
    #[case::three_medium(vec![PolicyLevel::Medium; 3], PolicyLevel::High)]
    #[case::one_high(vec![PolicyLevel::Low, PolicyLevel::High], PolicyLevel::High)]
    #[case::critical_dominates(vec![PolicyLevel::Medium, PolicyLevel::High, PolicyLevel::Critical], PolicyLevel::Critical)]
    fn level_aggregation(#[case] severities: Vec<PolicyLevel>, #[case] expected: PolicyLevel) {
        let alerts: Vec<PolicyAlert> = severities.into_iter().map(alert).collect();
        assert_eq!(aggregate_level(&alerts), expected);
    }

    #[test]
    fn quiet_new_task_is_low() {
        let telemetry = Arc::new(RecordingTelemetry::default());
        let engine = PolicyEngine::new(telemetry.clone(), PolicyLimits::default());
        let assessment = engine.assess(&task(TaskState::Active), &[], 10);

        assert_eq!(assessment.level, PolicyLevel::Low);
        assert!(assessment.alerts.is_empty());
        assert_eq!(assessment.at, 10);
        assert_eq!(telemetry.count("policy_engine_assessment_complete"), 1);
    }

    #[test]
    fn volume_over_limit_is_high() {
        let engine = PolicyEngine::new(
            Arc::new(RecordingTelemetry::default()),
            PolicyLimits::default(),
        );
        let observations = observations(1_001, 5);
        let assessment = engine.assess(&task(TaskState::Active), &observations, 10);
        assert_eq!(assessment.level, PolicyLevel::High);
        assert!(assessment.has_alert(PolicyAlertType::ObservationVolume));
    }

    #[test]
    fn old_task_is_critical() {
        let engine = PolicyEngine::new(
            Arc::new(RecordingTelemetry::default()),
            PolicyLimits::default(),
        );
        let assessment = engine.assess(&task(TaskState::Active), &[], 300_001);
        assert_eq!(assessment.level, PolicyLevel::Critical);
        assert!(assessment.has_alert(PolicyAlertType::TaskAgeExceeded));
    }

    #[test]
    fn limits_can_be_reloaded_through_a_shared_handle() {
        let telemetry = Arc::new(RecordingTelemetry::default());
        let engine = PolicyEngine::new(telemetry.clone(), PolicyLimits::default());
        let handle = engine.limits_handle();

        let next = engine.update_limits(&LimitsUpdate {
            max_observations_per_task: Some(2),
            ..Default::default()
        });
        assert_eq!(next.max_observations_per_task, 2);
        assert_eq!(handle.load().max_observations_per_task, 2);

        handle.store(PolicyLimits {
            max_stalled_cycles: 1,
            ..PolicyLimits::default()
        });
        assert_eq!(engine.limits().max_stalled_cycles, 1);
        assert_eq!(engine.limits().max_observations_per_task, 1000);

        engine.replace_limits(PolicyLimits::default());
        assert_eq!(telemetry.count("policy_engine_limits_updated"), 2);

        let observations = observations(3, 5);
        engine.update_limits(&LimitsUpdate {
            max_observations_per_task: Some(2),
            ..Default::default()
        });
        let assessment = engine.assess(&task(TaskState::Active), &observations, 10);
        assert!(assessment.has_alert(PolicyAlertType::ObservationVolume));
    }

    #[test]
    fn concurrent_updates_each_see_their_own_result() {
        let handle = LimitsHandle::new(PolicyLimits::default());
        std::thread::scope(|scope| {
            for worker in 0..4u32 {
                let handle = handle.clone();
                scope.spawn(move || {
                    for round in 0..250u32 {
                        let cycles = worker * 1_000 + round;
                        let applied = handle.update(&LimitsUpdate {
                            max_stalled_cycles: Some(cycles),
                            ..Default::default()
                        });
                        assert_eq!(applied.max_stalled_cycles, cycles);
                    }
                });
            }
        });
        assert_eq!(
            handle.load().max_observations_per_task,
            PolicyLimits::default().max_observations_per_task
        );
    }
}
