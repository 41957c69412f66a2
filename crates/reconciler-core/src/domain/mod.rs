//! Domain model (ids, envelope, task lifecycle, observations, policy, proposals).
//!
//! Plain values only: nothing in here does I/O or holds a clock.

pub mod envelope;
pub mod errors;
pub mod ids;
pub mod observation;
pub mod policy;
pub mod proposal;
pub mod state;
pub mod task;

pub use envelope::{
    ActionCode, ActorRole, CausalityBlock, Envelope, IdentityBlock, MessageType, Payload,
    ProtocolBlock, TypeBlock,
};
pub use errors::{EnvelopeRejected, KernelError, RejectionRule};
pub use ids::{CorrelationId, Id, IdMarker, MsgId, TaskId};
pub use observation::{IngestReceipt, ObservationRecord};
pub use policy::{
    LimitsUpdate, PolicyAlert, PolicyAlertType, PolicyAssessment, PolicyLevel, PolicyLimits,
};
pub use proposal::{ObservationSignals, Proposal, ProposalKind, Tick};
pub use state::TaskState;
pub use task::{HistoryEntry, IntentReference, Metadata, TaskSnapshot};
pub(crate) use task::TaskRecord;
