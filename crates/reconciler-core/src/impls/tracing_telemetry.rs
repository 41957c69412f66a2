//! TracingTelemetry - domain telemetry as structured `tracing` events.

use serde_json::Value;

use crate::ports::{TelemetrySeverity, TelemetrySink};

/// Forwards every event to `tracing` under the `reconciler::telemetry` target.
///
/// Severity mapping: INFO -> `info!`, WARNING -> `warn!`, CRITICAL -> `error!`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn emit(&self, kind: &str, payload: Value, severity: TelemetrySeverity) {
        match severity {
            TelemetrySeverity::Info => {
                tracing::info!(target: "reconciler::telemetry", event = kind, payload = %payload)
            }
            TelemetrySeverity::Warning => {
                tracing::warn!(target: "reconciler::telemetry", event = kind, payload = %payload)
            }
            TelemetrySeverity::Critical => {
                tracing::error!(target: "reconciler::telemetry", event = kind, payload = %payload)
            }
        }
    }
}
