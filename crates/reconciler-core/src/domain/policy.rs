//! Policy model: risk levels, alerts, assessments and limits.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Normative risk level. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl PolicyLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            PolicyLevel::Low => "LOW",
            PolicyLevel::Medium => "MEDIUM",
            PolicyLevel::High => "HIGH",
            PolicyLevel::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for PolicyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyAlertType {
    ObservationVolume,
    TaskAgeExceeded,
    ObservationGap,
    DuplicateObservations,
    ConfigurationRisk,
    TaskStagnation,
}

impl PolicyAlertType {
    pub fn as_str(self) -> &'static str {
        match self {
            PolicyAlertType::ObservationVolume => "OBSERVATION_VOLUME",
            PolicyAlertType::TaskAgeExceeded => "TASK_AGE_EXCEEDED",
            PolicyAlertType::ObservationGap => "OBSERVATION_GAP",
            PolicyAlertType::DuplicateObservations => "DUPLICATE_OBSERVATIONS",
            PolicyAlertType::ConfigurationRisk => "CONFIGURATION_RISK",
            PolicyAlertType::TaskStagnation => "TASK_STAGNATION",
        }
    }
}

impl fmt::Display for PolicyAlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single heuristic finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyAlert {
    #[serde(rename = "type")]
    pub alert_type: PolicyAlertType,
    pub message: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<f64>,
    pub severity: PolicyLevel,
}

impl PolicyAlert {
    pub fn new(
        alert_type: PolicyAlertType,
        severity: PolicyLevel,
        value: f64,
        limit: Option<f64>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            alert_type,
            message: message.into(),
            value,
            limit,
            severity,
        }
    }
}

/// Output of `PolicyEngine::assess`. Computed fresh on every call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyAssessment {
    pub level: PolicyLevel,
    pub alerts: Vec<PolicyAlert>,
    pub at: i64,
}

impl PolicyAssessment {
    pub fn has_alert(&self, alert_type: PolicyAlertType) -> bool {
        self.alerts.iter().any(|a| a.alert_type == alert_type)
    }
}

/// Tunable thresholds. `None` disables the corresponding heuristic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyLimits {
    pub max_observations_per_task: usize,
    pub max_task_age_ms: Option<i64>,
    pub max_stalled_cycles: u32,
    pub max_observation_gap_ms: Option<i64>,
    pub max_duplicate_ratio: Option<f64>,
}

impl Default for PolicyLimits {
    fn default() -> Self {
        Self {
            max_observations_per_task: 1000,
            max_task_age_ms: Some(300_000),
            max_stalled_cycles: 10,
            max_observation_gap_ms: Some(30_000),
            max_duplicate_ratio: Some(0.3),
        }
    }
}

/// Partial limits update. Absent fields keep their current value.
///
/// The nullable limits take `Some(None)` to disable a heuristic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LimitsUpdate {
    pub max_observations_per_task: Option<usize>,
    pub max_task_age_ms: Option<Option<i64>>,
    pub max_stalled_cycles: Option<u32>,
    pub max_observation_gap_ms: Option<Option<i64>>,
    pub max_duplicate_ratio: Option<Option<f64>>,
}

impl LimitsUpdate {
    pub fn apply_to(&self, current: &PolicyLimits) -> PolicyLimits {
        PolicyLimits {
            max_observations_per_task: self
                .max_observations_per_task
                .unwrap_or(current.max_observations_per_task),
            max_task_age_ms: self.max_task_age_ms.unwrap_or(current.max_task_age_ms),
            max_stalled_cycles: self
                .max_stalled_cycles
                .unwrap_or(current.max_stalled_cycles),
            max_observation_gap_ms: self
                .max_observation_gap_ms
                .unwrap_or(current.max_observation_gap_ms),
            max_duplicate_ratio: self
                .max_duplicate_ratio
                .unwrap_or(current.max_duplicate_ratio),
        }
    }
}
