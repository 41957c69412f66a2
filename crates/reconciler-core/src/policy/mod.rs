//! Policy - normative risk assessment of a task.

pub mod engine;
pub mod heuristics;

pub use engine::{LimitsHandle, PolicyEngine, aggregate_level};
