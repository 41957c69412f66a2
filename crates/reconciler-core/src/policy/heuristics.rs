//! The six risk heuristics.
//!
//! Each one looks at a task snapshot, its observations and the limits in
//! force, and reports zero or more alerts. None of them mutate anything.
//! Time is always the `at` passed in, never the wall clock.

use crate::domain::observation::ObservationRecord;
use crate::domain::policy::{PolicyAlert, PolicyAlertType, PolicyLevel, PolicyLimits};
use crate::domain::state::TaskState;
use crate::domain::task::TaskSnapshot;
use std::collections::HashSet;

/// A CREATED task older than this is a configuration risk.
pub const CREATED_STALE_MS: i64 = 60_000;

/// Silence after which an ACTIVE task with observations is stagnating.
pub const STAGNATION_SILENCE_MS: i64 = 120_000;

/// Inputs shared by every heuristic.
pub struct Context<'a> {
    pub task: &'a TaskSnapshot,
    pub observations: &'a [ObservationRecord],
    pub limits: &'a PolicyLimits,
    pub at: i64,
}

impl Context<'_> {
    fn last_ingested_at(&self) -> Option<i64> {
        self.observations.iter().map(|o| o.ingested_at).max()
    }
}

/// Run every heuristic, in a fixed order.
pub fn run_all(ctx: &Context<'_>) -> Vec<PolicyAlert> {
    let mut alerts = Vec::new();
    alerts.extend(observation_volume(ctx));
    alerts.extend(task_age(ctx));
    alerts.extend(observation_gap(ctx));
    alerts.extend(duplicate_ratio(ctx));
    alerts.extend(configuration_risk(ctx));
    alerts.extend(stagnation(ctx));
    alerts
}

pub fn observation_volume(ctx: &Context<'_>) -> Option<PolicyAlert> {
    let count = ctx.observations.len();
    let limit = ctx.limits.max_observations_per_task;
    (count > limit).then(|| {
        PolicyAlert::new(
            PolicyAlertType::ObservationVolume,
            PolicyLevel::High,
            count as f64,
            Some(limit as f64),
            format!("{count} observations exceed the limit of {limit}"),
        )
    })
}

pub fn task_age(ctx: &Context<'_>) -> Option<PolicyAlert> {
    let limit = ctx.limits.max_task_age_ms?;
    let age = ctx.task.age_ms(ctx.at);
    (age > limit).then(|| {
        PolicyAlert::new(
            PolicyAlertType::TaskAgeExceeded,
            PolicyLevel::Critical,
            age as f64,
            Some(limit as f64),
            format!("task age {age}ms exceeds {limit}ms"),
        )
    })
}

pub fn observation_gap(ctx: &Context<'_>) -> Option<PolicyAlert> {
    if ctx.task.state != TaskState::Active {
        return None;
    }
    let limit = ctx.limits.max_observation_gap_ms?;
    let gap = ctx.at - ctx.last_ingested_at()?;
    (gap > limit).then(|| {
        PolicyAlert::new(
            PolicyAlertType::ObservationGap,
            PolicyLevel::Medium,
            gap as f64,
            Some(limit as f64),
            format!("no observation for {gap}ms (limit {limit}ms)"),
        )
    })
}

pub fn duplicate_ratio(ctx: &Context<'_>) -> Option<PolicyAlert> {
    let limit = ctx.limits.max_duplicate_ratio?;
    let total = ctx.observations.len();
    if total == 0 {
        return None;
    }
    let unique: HashSet<_> = ctx.observations.iter().map(|o| o.msg_id).collect();
    let ratio = (total - unique.len()) as f64 / total as f64;
    (ratio > limit).then(|| {
        PolicyAlert::new(
            PolicyAlertType::DuplicateObservations,
            PolicyLevel::Medium,
            ratio,
            Some(limit),
            format!("duplicate ratio {ratio:.2} exceeds {limit:.2}"),
        )
    })
}

pub fn configuration_risk(ctx: &Context<'_>) -> Option<PolicyAlert> {
    match ctx.task.state {
        TaskState::Suspended if !ctx.observations.is_empty() => Some(PolicyAlert::new(
            PolicyAlertType::ConfigurationRisk,
            PolicyLevel::Low,
            ctx.observations.len() as f64,
            None,
            "suspended task is still receiving observations",
        )),
        TaskState::Created => {
            let age = ctx.task.age_ms(ctx.at);
            (age > CREATED_STALE_MS).then(|| {
                PolicyAlert::new(
                    PolicyAlertType::ConfigurationRisk,
                    PolicyLevel::Medium,
                    age as f64,
                    Some(CREATED_STALE_MS as f64),
                    format!("task still CREATED after {age}ms"),
                )
            })
        }
        _ => None,
    }
}

/// Silence-based stagnation and stalled-cycle stagnation, independently.
pub fn stagnation(ctx: &Context<'_>) -> Vec<PolicyAlert> {
    let mut alerts = Vec::new();
    if ctx.task.state != TaskState::Active {
        return alerts;
    }

    if let Some(last) = ctx.last_ingested_at() {
        let silence = ctx.at - last;
        if silence > STAGNATION_SILENCE_MS && !legitimately_quiet(ctx.task) {
            alerts.push(PolicyAlert::new(
                PolicyAlertType::TaskStagnation,
                PolicyLevel::High,
                silence as f64,
                Some(STAGNATION_SILENCE_MS as f64),
                format!("active task silent for {silence}ms"),
            ));
        }
    }

    let stalled = ctx.task.stalled_cycle_count;
    let limit = ctx.limits.max_stalled_cycles;
    if stalled > limit {
        alerts.push(PolicyAlert::new(
            PolicyAlertType::TaskStagnation,
            PolicyLevel::Critical,
            f64::from(stalled),
            Some(f64::from(limit)),
            format!("{stalled} stalled cycles exceed {limit}"),
        ));
    }
    alerts
}

/// Waiting for a human, or inside a declared long operation.
fn legitimately_quiet(task: &TaskSnapshot) -> bool {
    task.is_waiting_for_input()
        || task
            .expected_duration_ms()
            .is_some_and(|d| d > STAGNATION_SILENCE_MS as f64)
}
