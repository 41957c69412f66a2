//! Envelope - the only wire-level message unit.
//!
//! The field names below are bit-exact with every producer and consumer on the
//! other side of the transport:
//!
//! ```text
//! { protocol:  { version, timestamp },
//!   identity:  { actor, target | null },
//!   causality: { msg_id, correlation_id },
//!   type:      { message_type, action_code },
//!   payload:   { ... } }
//! ```
//!
//! Constructing an `Envelope` by hand does not make it valid. Only values that
//! went through `protocol::EnvelopeCodec` are guaranteed to respect the
//! protocol invariants.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{CorrelationId, MsgId};

/// JSON object carried by an envelope.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// What the message *is*. Closed set, never extended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    /// Declared intent of a future action.
    Command,
    /// Recorded observation of something that happened.
    Event,
    /// Technical transport confirmation.
    Ack,
}

impl MessageType {
    pub const ALL: [MessageType; 3] = [MessageType::Command, MessageType::Event, MessageType::Ack];

    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Command => "COMMAND",
            MessageType::Event => "EVENT",
            MessageType::Ack => "ACK",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == raw)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who emits (or is addressed by) a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActorRole {
    Kernel,
    Server,
    Infra,
    Observer,
    /// Policy side of the control plane.
    Maestro,
    /// Browser driver adapters.
    Driver,
}

impl ActorRole {
    pub const ALL: [ActorRole; 6] = [
        ActorRole::Kernel,
        ActorRole::Server,
        ActorRole::Infra,
        ActorRole::Observer,
        ActorRole::Maestro,
        ActorRole::Driver,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActorRole::Kernel => "KERNEL",
            ActorRole::Server => "SERVER",
            ActorRole::Infra => "INFRA",
            ActorRole::Observer => "OBSERVER",
            ActorRole::Maestro => "MAESTRO",
            ActorRole::Driver => "DRIVER",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.as_str() == raw)
    }
}

impl fmt::Display for ActorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! action_codes {
    ($($variant:ident => $wire:literal,)+) => {
        /// What the message talks about. Extensible only by explicit addition.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum ActionCode {
            $(
                #[serde(rename = $wire)]
                $variant,
            )+
        }

        impl ActionCode {
            pub const ALL: &'static [ActionCode] = &[$(ActionCode::$variant,)+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $(ActionCode::$variant => $wire,)+
                }
            }
        }
    };
}

action_codes! {
    // task / execution
    TaskStart => "TASK_START",
    TaskCancel => "TASK_CANCEL",
    TaskRetry => "TASK_RETRY",
    TaskFailed => "TASK_FAILED",
    TaskRejected => "TASK_REJECTED",
    TaskObserved => "TASK_OBSERVED",
    TaskFailedObserved => "TASK_FAILED_OBSERVED",
    // proposal / policy
    ProposeTask => "PROPOSE_TASK",
    // engine control
    EnginePause => "ENGINE_PAUSE",
    EngineResume => "ENGINE_RESUME",
    EngineStop => "ENGINE_STOP",
    // driver / task execution
    DriverExecuteTask => "DRIVER_EXECUTE_TASK",
    DriverAbort => "DRIVER_ABORT",
    DriverTaskStarted => "DRIVER_TASK_STARTED",
    DriverTaskCompleted => "DRIVER_TASK_COMPLETED",
    DriverTaskFailed => "DRIVER_TASK_FAILED",
    DriverTaskAborted => "DRIVER_TASK_ABORTED",
    // driver / health
    DriverHealthCheck => "DRIVER_HEALTH_CHECK",
    DriverHealthReport => "DRIVER_HEALTH_REPORT",
    DriverStateObserved => "DRIVER_STATE_OBSERVED",
    DriverVital => "DRIVER_VITAL",
    DriverAnomaly => "DRIVER_ANOMALY",
    DriverError => "DRIVER_ERROR",
    // kernel / system
    KernelHealthCheck => "KERNEL_HEALTH_CHECK",
    KernelTelemetry => "KERNEL_TELEMETRY",
    KernelInternalError => "KERNEL_INTERNAL_ERROR",
    // browser / infra
    BrowserReboot => "BROWSER_REBOOT",
    CacheClear => "CACHE_CLEAR",
    StallDetected => "STALL_DETECTED",
    // security
    SecurityViolation => "SECURITY_VIOLATION",
    // telemetry
    TelemetryDiscarded => "TELEMETRY_DISCARDED",
    // transport
    TransportTimeout => "TRANSPORT_TIMEOUT",
    TransportRetrying => "TRANSPORT_RETRYING",
    ChannelDegraded => "CHANNEL_DEGRADED",
    // acknowledgement of an acknowledgement; never valid on an ACK
    AckReceived => "ACK_RECEIVED",
}

impl ActionCode {
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.as_str() == raw)
    }
}

impl fmt::Display for ActionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolBlock {
    pub version: String,
    /// Emission time, Unix epoch milliseconds.
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityBlock {
    pub actor: ActorRole,
    pub target: Option<ActorRole>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CausalityBlock {
    pub msg_id: MsgId,
    pub correlation_id: CorrelationId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeBlock {
    pub message_type: MessageType,
    pub action_code: ActionCode,
}

/// A decoded, typed envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub protocol: ProtocolBlock,
    pub identity: IdentityBlock,
    pub causality: CausalityBlock,
    #[serde(rename = "type")]
    pub kind: TypeBlock,
    pub payload: Payload,
}

impl Envelope {
    pub fn msg_id(&self) -> MsgId {
        self.causality.msg_id
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.causality.correlation_id
    }

    pub fn message_type(&self) -> MessageType {
        self.kind.message_type
    }

    pub fn action_code(&self) -> ActionCode {
        self.kind.action_code
    }

    pub fn is_event(&self) -> bool {
        self.kind.message_type == MessageType::Event
    }

    /// Wire representation.
    pub fn to_value(&self) -> serde_json::Value {
        // Every field is a string, number, map or unit enum: serialization
        // into a `Value` cannot fail.
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
