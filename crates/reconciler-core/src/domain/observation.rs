//! Observation records: immutable facts ingested from EVENT envelopes.

use serde::{Deserialize, Serialize};

use super::envelope::{ActionCode, ActorRole, Payload};
use super::ids::{CorrelationId, MsgId};

/// One observed fact.
///
/// Once stored it is never modified. Readers get clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationRecord {
    pub msg_id: MsgId,
    pub correlation_id: CorrelationId,
    pub source: ActorRole,
    pub action_code: ActionCode,
    pub payload: Payload,
    /// `protocol.timestamp` of the envelope (sender clock).
    pub original_timestamp: i64,
    /// Kernel clock at ingestion. Ordering and gap heuristics use this.
    pub ingested_at: i64,
}

impl ObservationRecord {
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(|v| v.as_str())
    }
}

/// Result of `ObservationStore::ingest_event`.
///
/// Duplicates are stored, not rejected; `duplicate` just says the `msg_id`
/// had been seen before.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestReceipt {
    pub record: ObservationRecord,
    pub duplicate: bool,
    /// Oldest record dropped to respect the per-correlation cap.
    pub evicted: Option<MsgId>,
}
