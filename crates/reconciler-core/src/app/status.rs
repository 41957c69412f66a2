//! Status - point-in-time summary of a running kernel.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::policy::PolicyLimits;
use crate::observability::{ObservationStats, TaskStats};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelStatus {
    /// Ticks evaluated since start.
    pub ticks: u64,
    pub last_tick_at: Option<i64>,
    pub tick_interval_ms: u64,
    pub tasks: TaskStats,
    pub observations: ObservationStats,
    pub limits: PolicyLimits,
    /// Telemetry event counts by kind, since start.
    pub telemetry: BTreeMap<String, u64>,
}
