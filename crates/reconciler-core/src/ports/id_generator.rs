//! IdGenerator port - UUIDv4 generation.
//!
//! The codec asks this port for every new `msg_id`. Production uses random
//! v4 UUIDs; tests can swap in `SequenceIdGenerator` to get predictable ids
//! that are still valid v4 on the wire.

use std::sync::atomic::{AtomicU64, Ordering};
use uuid::{Builder, Uuid};

use crate::domain::ids::MsgId;

pub trait IdGenerator: Send + Sync {
    /// A fresh version-4 UUID.
    fn next_uuid(&self) -> Uuid;

    fn generate_msg_id(&self) -> MsgId {
        MsgId::from_uuid(self.next_uuid())
    }
}

/// Random v4 UUIDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn next_uuid(&self) -> Uuid {
        Uuid::new_v4()
    }
}

/// Deterministic v4 UUIDs built from a counter.
#[derive(Debug, Default)]
pub struct SequenceIdGenerator {
    next: AtomicU64,
}

impl SequenceIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdGenerator for SequenceIdGenerator {
    fn next_uuid(&self) -> Uuid {
        let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        let mut bytes = [0u8; 16];
        bytes[8..].copy_from_slice(&n.to_be_bytes());
        // sets the version nibble to 4 and the RFC 4122 variant bits
        Builder::from_random_bytes(bytes).into_uuid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_generator_generates_unique_v4_ids() {
        let id_gen = UuidGenerator;
        let id1 = id_gen.generate_msg_id();
        let id2 = id_gen.generate_msg_id();
        assert_ne!(id1, id2);
        assert_eq!(id1.as_uuid().get_version_num(), 4);
    }

    #[test]
    fn sequence_generator_is_deterministic_and_wire_valid() {
        let a = SequenceIdGenerator::new();
        let b = SequenceIdGenerator::new();
        let first = a.generate_msg_id();
        assert_eq!(first, b.generate_msg_id());
        assert_ne!(first, a.generate_msg_id());
        assert!(MsgId::parse_v4(&first.to_string()).is_some());
    }
}
