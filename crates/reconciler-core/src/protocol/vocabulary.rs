//! Protocol constants shared by every producer and consumer.

/// Running protocol version. Envelopes carrying any other version are refused.
pub const PROTOCOL_VERSION: &str = "2.0.0";

/// Top-level blocks every envelope must carry, in validation order.
pub const REQUIRED_BLOCKS: [&str; 5] = ["protocol", "identity", "causality", "type", "payload"];

/// Payload field names that would smuggle an outcome verdict into a message.
///
/// Messages describe intents and observations. Whether something "succeeded"
/// is the kernel's conclusion, never a sender's claim.
pub const FORBIDDEN_PAYLOAD_FIELDS: [&str; 8] = [
    "status",
    "result",
    "success",
    "error",
    "response",
    "return_value",
    "exception",
    "completed",
];

pub fn is_forbidden_field(name: &str) -> bool {
    FORBIDDEN_PAYLOAD_FIELDS.contains(&name)
}
