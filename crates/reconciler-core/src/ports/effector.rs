//! Effector port - where proposals leave the kernel.
//!
//! The kernel decides; an effector acts. Delivery is attempted once per
//! proposal; the loop reports failures and never retries.

use async_trait::async_trait;

use crate::domain::proposal::Proposal;
use crate::domain::task::IntentReference;

/// What an effector did with a proposal.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Delivery {
    /// Intent emitted on behalf of the task, recorded in its history.
    pub intent: Option<IntentReference>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EffectorError {
    #[error("proposal could not be encoded: {0}")]
    Encoding(String),

    #[error("delivery failed: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait Effector: Send + Sync {
    async fn deliver(&self, proposal: &Proposal) -> Result<Delivery, EffectorError>;
}

/// Accepts every proposal and does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEffector;

#[async_trait]
impl Effector for NoopEffector {
    async fn deliver(&self, _proposal: &Proposal) -> Result<Delivery, EffectorError> {
        Ok(Delivery::default())
    }
}
