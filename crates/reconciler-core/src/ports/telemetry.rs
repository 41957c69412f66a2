//! TelemetrySink port - domain telemetry.
//!
//! Library components never log directly; they report structured events
//! (`kind` + JSON payload + severity) through this port. Emission is
//! infallible: a sink that cannot record an event drops it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TelemetrySeverity {
    Info,
    Warning,
    Critical,
}

impl TelemetrySeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            TelemetrySeverity::Info => "INFO",
            TelemetrySeverity::Warning => "WARNING",
            TelemetrySeverity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for TelemetrySeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait TelemetrySink: Send + Sync {
    fn emit(&self, kind: &str, payload: Value, severity: TelemetrySeverity);

    fn info(&self, kind: &str, payload: Value) {
        self.emit(kind, payload, TelemetrySeverity::Info);
    }

    fn warning(&self, kind: &str, payload: Value) {
        self.emit(kind, payload, TelemetrySeverity::Warning);
    }

    fn critical(&self, kind: &str, payload: Value) {
        self.emit(kind, payload, TelemetrySeverity::Critical);
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn emit(&self, _kind: &str, _payload: Value, _severity: TelemetrySeverity) {}
}
