//! FanoutTelemetry - one event, several sinks.

use serde_json::Value;
use std::sync::Arc;

use crate::ports::{TelemetrySeverity, TelemetrySink};

#[derive(Clone, Default)]
pub struct FanoutTelemetry {
    sinks: Vec<Arc<dyn TelemetrySink>>,
}

impl FanoutTelemetry {
    pub fn new(sinks: Vec<Arc<dyn TelemetrySink>>) -> Self {
        Self { sinks }
    }

    pub fn with(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl TelemetrySink for FanoutTelemetry {
    fn emit(&self, kind: &str, payload: Value, severity: TelemetrySeverity) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.emit(kind, payload.clone(), severity);
            }
            last.emit(kind, payload, severity);
        }
    }
}
