//! TransportEffector - turns proposals into COMMAND envelopes on a transport.
//!
//! KERNEL -> DRIVER, one command per proposal:
//!
//! | proposal         | action code     |
//! |------------------|-----------------|
//! | `ACTIVATE_TASK`  | `TASK_START`    |
//! | `SUSPEND_TASK`   | `DRIVER_ABORT`  |
//! | `TERMINATE_TASK` | `TASK_CANCEL`   |

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use crate::domain::envelope::{ActionCode, ActorRole, Payload};
use crate::domain::proposal::{Proposal, ProposalKind};
use crate::domain::task::IntentReference;
use crate::ports::{Delivery, Effector, EffectorError, Transport};
use crate::protocol::{EnvelopeCodec, EnvelopeDraft};

pub fn action_code_for(kind: ProposalKind) -> ActionCode {
    match kind {
        ProposalKind::ActivateTask => ActionCode::TaskStart,
        ProposalKind::SuspendTask => ActionCode::DriverAbort,
        ProposalKind::TerminateTask => ActionCode::TaskCancel,
    }
}

pub struct TransportEffector {
    codec: EnvelopeCodec,
    transport: Arc<dyn Transport>,
}

impl TransportEffector {
    pub fn new(codec: EnvelopeCodec, transport: Arc<dyn Transport>) -> Self {
        Self { codec, transport }
    }

    fn draft(proposal: &Proposal) -> EnvelopeDraft {
        let mut payload = Payload::new();
        payload.insert("taskId".into(), json!(proposal.task_id.as_str()));
        payload.insert("proposal".into(), json!(proposal.kind.as_str()));
        payload.insert("reason".into(), json!(proposal.reason));
        payload.insert("tickId".into(), json!(proposal.tick_id));
        if let Some(level) = proposal.policy_level {
            payload.insert("policyLevel".into(), json!(level.as_str()));
        }

        let draft = EnvelopeDraft::command(
            ActorRole::Kernel,
            ActorRole::Driver,
            action_code_for(proposal.kind),
        )
        .with_payload(payload);
        match proposal.correlation_id {
            Some(correlation_id) => draft.with_correlation(correlation_id),
            None => draft,
        }
    }
}

#[async_trait]
impl Effector for TransportEffector {
    async fn deliver(&self, proposal: &Proposal) -> Result<Delivery, EffectorError> {
        let envelope = self
            .codec
            .build(Self::draft(proposal))
            .map_err(|e| EffectorError::Encoding(e.to_string()))?;

        self.transport
            .emit_command(&envelope)
            .await
            .map_err(|e| EffectorError::Delivery(e.to_string()))?;

        let intent = IntentReference::new(envelope.action_code().as_str())
            .with_msg_id(envelope.msg_id())
            .with_detail(json!({ "proposal": proposal.kind.as_str() }));
        Ok(Delivery {
            intent: Some(intent),
        })
    }
}
