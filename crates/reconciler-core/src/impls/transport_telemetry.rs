//! TransportTelemetry - telemetry published as protocol traffic.
//!
//! Every event leaves as an untargeted KERNEL EVENT:
//!
//! | telemetry kind        | action code           | payload                                        |
//! |-----------------------|-----------------------|------------------------------------------------|
//! | `telemetry_discarded` | `TELEMETRY_DISCARDED` | the notice as emitted                          |
//! | anything else         | `KERNEL_TELEMETRY`    | `{ type, at, source, severity, payload }`      |
//!
//! `emit` is synchronous while transports are async, so envelopes wait in a
//! bounded queue that a `TelemetryPump` task drains. A full or closed queue
//! drops the event.

use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use super::recording_telemetry::TELEMETRY_DISCARDED;
use crate::domain::envelope::{ActionCode, ActorRole, Envelope, Payload};
use crate::domain::errors::EnvelopeRejected;
use crate::ports::{Clock, TelemetrySeverity, TelemetrySink, Transport};
use crate::protocol::{EnvelopeCodec, EnvelopeDraft};

/// Envelopes waiting for the pump.
pub const TELEMETRY_QUEUE: usize = 1024;

/// `source` field of every published event.
pub const TELEMETRY_SOURCE: &str = "kernel";

pub struct TransportTelemetry {
    codec: EnvelopeCodec,
    clock: Arc<dyn Clock>,
    queue: mpsc::Sender<Envelope>,
}

impl TransportTelemetry {
    /// The codec should not report into a sink that leads back here.
    pub fn new(
        codec: EnvelopeCodec,
        clock: Arc<dyn Clock>,
        transport: Arc<dyn Transport>,
    ) -> (Self, TelemetryPump) {
        let (queue, pending) = mpsc::channel(TELEMETRY_QUEUE);
        (
            Self {
                codec,
                clock,
                queue,
            },
            TelemetryPump { pending, transport },
        )
    }

    fn envelope(
        &self,
        kind: &str,
        payload: Value,
        severity: TelemetrySeverity,
    ) -> Result<Envelope, EnvelopeRejected> {
        let (action_code, body) = if kind == TELEMETRY_DISCARDED {
            (ActionCode::TelemetryDiscarded, payload)
        } else {
            (
                ActionCode::KernelTelemetry,
                json!({
                    "type": kind,
                    "at": self.clock.now_ms(),
                    "source": TELEMETRY_SOURCE,
                    "severity": severity.as_str(),
                    "payload": payload,
                }),
            )
        };
        let body = match body {
            Value::Object(map) => map,
            other => {
                let mut map = Payload::new();
                map.insert("value".into(), other);
                map
            }
        };
        self.codec
            .build(EnvelopeDraft::event(ActorRole::Kernel, action_code).with_payload(body))
    }
}

impl TelemetrySink for TransportTelemetry {
    fn emit(&self, kind: &str, payload: Value, severity: TelemetrySeverity) {
        match self.envelope(kind, payload, severity) {
            Ok(envelope) => {
                if self.queue.try_send(envelope).is_err() {
                    tracing::debug!(target: "reconciler::telemetry", event = kind, "telemetry queue unavailable, event not published");
                }
            }
            Err(e) => {
                tracing::warn!(target: "reconciler::telemetry", event = kind, "telemetry not publishable: {e}");
            }
        }
    }
}

/// Drains the queue of a `TransportTelemetry` onto its transport.
pub struct TelemetryPump {
    pending: mpsc::Receiver<Envelope>,
    transport: Arc<dyn Transport>,
}

impl TelemetryPump {
    /// Publish until `stop` turns true (or its sender goes away), then flush
    /// whatever is still queued.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                biased;

                Some(envelope) = self.pending.recv() => self.publish(&envelope).await,
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }
        while let Ok(envelope) = self.pending.try_recv() {
            self.publish(&envelope).await;
        }
    }

    async fn publish(&self, envelope: &Envelope) {
        if let Err(e) = self.transport.emit_event(envelope).await {
            tracing::warn!(target: "reconciler::telemetry", msg_id = %envelope.msg_id(), "telemetry publish failed: {e}");
        }
    }
}
