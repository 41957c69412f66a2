//! InMemoryTransport - process-local transport for tests and demos.
//!
//! - `inject` plays the remote side: a raw JSON value is handed to every
//!   registered handler.
//! - Outbound envelopes are recorded in order and can be inspected.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::domain::envelope::{Envelope, MessageType};
use crate::ports::{InboundHandler, Subscription, Transport, TransportError};

#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub message_type: MessageType,
    pub envelope: Envelope,
}

#[derive(Default)]
struct TransportState {
    /// Registered handlers keyed by registration number.
    handlers: BTreeMap<u64, InboundHandler>,
    next_handler: u64,
    outbound: Vec<OutboundMessage>,
    closed: bool,
}

#[derive(Clone, Default)]
pub struct InMemoryTransport {
    state: Arc<Mutex<TransportState>>,
}

fn lock(state: &Mutex<TransportState>) -> MutexGuard<'_, TransportState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `raw` to every handler. Returns how many handlers saw it.
    pub fn inject(&self, raw: Value) -> usize {
        // Handlers run outside the lock: they may call back into the transport.
        let handlers: Vec<InboundHandler> = {
            let state = lock(&self.state);
            if state.closed {
                return 0;
            }
            state.handlers.values().cloned().collect()
        };
        for handler in &handlers {
            handler(raw.clone());
        }
        handlers.len()
    }

    pub fn handler_count(&self) -> usize {
        lock(&self.state).handlers.len()
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        lock(&self.state).outbound.clone()
    }

    pub fn sent_commands(&self) -> Vec<Envelope> {
        lock(&self.state)
            .outbound
            .iter()
            .filter(|m| m.message_type == MessageType::Command)
            .map(|m| m.envelope.clone())
            .collect()
    }

    /// Refuse further traffic in both directions.
    pub fn close(&self) {
        let mut state = lock(&self.state);
        state.closed = true;
        state.handlers.clear();
    }

    fn record(&self, expected: MessageType, envelope: &Envelope) -> Result<(), TransportError> {
        if envelope.message_type() != expected {
            return Err(TransportError::SendFailed(format!(
                "expected a {expected}, got a {}",
                envelope.message_type()
            )));
        }
        let mut state = lock(&self.state);
        if state.closed {
            return Err(TransportError::Closed);
        }
        state.outbound.push(OutboundMessage {
            message_type: expected,
            envelope: envelope.clone(),
        });
        Ok(())
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    fn on_receive(&self, handler: InboundHandler) -> Subscription {
        let id = {
            let mut state = lock(&self.state);
            if state.closed {
                return Subscription::detached();
            }
            let id = state.next_handler;
            state.next_handler += 1;
            state.handlers.insert(id, handler);
            id
        };
        let state = Arc::clone(&self.state);
        Subscription::new(move || {
            lock(&state).handlers.remove(&id);
        })
    }

    async fn emit_command(&self, envelope: &Envelope) -> Result<(), TransportError> {
        self.record(MessageType::Command, envelope)
    }

    async fn emit_event(&self, envelope: &Envelope) -> Result<(), TransportError> {
        self.record(MessageType::Event, envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::envelope::{ActionCode, ActorRole};
    use crate::impls::RecordingTelemetry;
    use crate::ports::{ManualClock, SequenceIdGenerator};
    use crate::protocol::{EnvelopeCodec, EnvelopeDraft};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn codec() -> EnvelopeCodec {
        EnvelopeCodec::new(
            Arc::new(RecordingTelemetry::default()),
            Arc::new(ManualClock::new(0)),
            Arc::new(SequenceIdGenerator::new()),
        )
    }

    #[test]
    fn dropping_the_subscription_removes_the_handler() {
        let transport = InMemoryTransport::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&seen);
        let sub = transport.on_receive(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(transport.inject(json!({})), 1);
        assert_eq!(transport.handler_count(), 1);

        drop(sub);
        assert_eq!(transport.handler_count(), 0);
        assert_eq!(transport.inject(json!({})), 0);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn explicit_unsubscribe_only_removes_its_own_handler() {
        let transport = InMemoryTransport::new();
        let a = transport.on_receive(Arc::new(|_| {}));
        let _b = transport.on_receive(Arc::new(|_| {}));
        a.unsubscribe();
        assert_eq!(transport.handler_count(), 1);
    }

    #[tokio::test]
    async fn outbound_is_recorded_by_kind() {
        let transport = InMemoryTransport::new();
        let codec = codec();
        let command = codec
            .build(EnvelopeDraft::command(
                ActorRole::Kernel,
                ActorRole::Driver,
                ActionCode::TaskStart,
            ))
            .unwrap();
        let event = codec
            .build(EnvelopeDraft::event(ActorRole::Kernel, ActionCode::KernelTelemetry))
            .unwrap();

        transport.emit_command(&command).await.unwrap();
        transport.emit_event(&event).await.unwrap();
        assert!(matches!(
            transport.emit_event(&command).await,
            Err(TransportError::SendFailed(_))
        ));

        assert_eq!(transport.sent().len(), 2);
        assert_eq!(transport.sent_commands(), vec![command.clone()]);

        transport.close();
        assert_eq!(
            transport.emit_command(&command).await,
            Err(TransportError::Closed)
        );
    }
}
