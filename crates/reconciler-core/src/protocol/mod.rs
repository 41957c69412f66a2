//! Protocol - envelope vocabulary and the codec that enforces it.

pub mod codec;
pub mod vocabulary;

pub use codec::{EnvelopeCodec, EnvelopeDraft};
pub use vocabulary::{FORBIDDEN_PAYLOAD_FIELDS, PROTOCOL_VERSION};
