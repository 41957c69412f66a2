//! Transport port - the wire boundary.
//!
//! Inbound: raw JSON values are pushed to registered handlers. The transport
//! does not validate; the kernel does. Outbound: already-validated envelopes.
//!
//! Design:
//! - Handlers live in an explicit table owned by the transport.
//! - `on_receive` returns a `Subscription`; dropping it (or calling
//!   `unsubscribe`) removes the handler.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::domain::envelope::Envelope;

pub type InboundHandler = Arc<dyn Fn(Value) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,

    #[error("transport send failed: {0}")]
    SendFailed(String),
}

/// Handle to a registered inbound handler.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription with nothing to remove.
    pub fn detached() -> Self {
        Self { cancel: None }
    }

    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    fn on_receive(&self, handler: InboundHandler) -> Subscription;

    async fn emit_command(&self, envelope: &Envelope) -> Result<(), TransportError>;

    async fn emit_event(&self, envelope: &Envelope) -> Result<(), TransportError>;
}
