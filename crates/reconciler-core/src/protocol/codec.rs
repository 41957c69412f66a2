//! EnvelopeCodec - builds and validates protocol envelopes.
//!
//! Validation runs two ordered passes and stops at the first failure:
//!
//! 1. structural: the value has the wire shape (blocks are objects, fields
//!    have the right JSON types, ids are UUIDv4 strings);
//! 2. ontological: the words are legal (version, roles, message type, action
//!    code) and the message respects the causality rules (no ACK of an ACK,
//!    ACK payload empty, EVENT untargeted, no verdict fields in payloads).
//!
//! Rejections are reported to telemetry as `envelope_rejected` (WARNING).

use serde_json::{Map, Value, json};
use std::sync::Arc;

use super::vocabulary::{PROTOCOL_VERSION, REQUIRED_BLOCKS, is_forbidden_field};
use crate::domain::envelope::{
    ActionCode, ActorRole, CausalityBlock, Envelope, IdentityBlock, MessageType, Payload,
    ProtocolBlock, TypeBlock,
};
use crate::domain::errors::{EnvelopeRejected, RejectionRule};
use crate::domain::ids::{CorrelationId, Id, IdMarker, MsgId};
use crate::ports::{Clock, IdGenerator, TelemetrySink};

/// Everything a sender chooses; the codec fills in id, time and version.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvelopeDraft {
    pub actor: ActorRole,
    pub target: Option<ActorRole>,
    pub message_type: MessageType,
    pub action_code: ActionCode,
    pub payload: Payload,
    /// `None` opens a new causal chain: correlation id = the new msg id.
    pub correlation_id: Option<CorrelationId>,
}

impl EnvelopeDraft {
    pub fn command(actor: ActorRole, target: ActorRole, action_code: ActionCode) -> Self {
        Self {
            actor,
            target: Some(target),
            message_type: MessageType::Command,
            action_code,
            payload: Payload::new(),
            correlation_id: None,
        }
    }

    pub fn event(actor: ActorRole, action_code: ActionCode) -> Self {
        Self {
            actor,
            target: None,
            message_type: MessageType::Event,
            action_code,
            payload: Payload::new(),
            correlation_id: None,
        }
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_correlation(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}

#[derive(Clone)]
pub struct EnvelopeCodec {
    telemetry: Arc<dyn TelemetrySink>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl EnvelopeCodec {
    pub fn new(
        telemetry: Arc<dyn TelemetrySink>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            telemetry,
            clock,
            ids,
        }
    }

    /// Validate an untrusted JSON value and return the typed envelope.
    pub fn validate(&self, raw: &Value) -> Result<Envelope, EnvelopeRejected> {
        validate_envelope(raw).inspect_err(|err| self.report(raw, err))
    }

    /// Parse and validate a JSON text. Unparseable input is `MALFORMED_JSON`.
    pub fn decode_str(&self, raw: &str) -> Result<Envelope, EnvelopeRejected> {
        let value: Value = serde_json::from_str(raw).map_err(|e| {
            let err = EnvelopeRejected::new(RejectionRule::MalformedJson, e.to_string());
            self.report(&Value::Null, &err);
            err
        })?;
        self.validate(&value)
    }

    /// Build a new envelope from a draft.
    ///
    /// The result is run through `validate`, so a draft that breaks a rule
    /// (say, a targeted EVENT) is refused here rather than on the far side.
    pub fn build(&self, draft: EnvelopeDraft) -> Result<Envelope, EnvelopeRejected> {
        let msg_id = self.ids.generate_msg_id();
        let envelope = Envelope {
            protocol: ProtocolBlock {
                version: PROTOCOL_VERSION.to_string(),
                timestamp: self.clock.now_ms(),
            },
            identity: IdentityBlock {
                actor: draft.actor,
                target: draft.target,
            },
            causality: CausalityBlock {
                msg_id,
                correlation_id: draft.correlation_id.unwrap_or_else(|| msg_id.cast()),
            },
            kind: TypeBlock {
                message_type: draft.message_type,
                action_code: draft.action_code,
            },
            payload: draft.payload,
        };
        self.validate(&envelope.to_value())
    }

    /// Technical acknowledgement of `original`, sent by `actor`.
    ///
    /// Same correlation id and action code, addressed back to the original
    /// sender, empty payload. An ACK is never acknowledged.
    pub fn ack_for(
        &self,
        original: &Envelope,
        actor: ActorRole,
    ) -> Result<Envelope, EnvelopeRejected> {
        if original.message_type() == MessageType::Ack {
            let err = EnvelopeRejected::new(
                RejectionRule::AckLoop,
                format!("refusing to acknowledge ACK {}", original.msg_id()),
            );
            self.report(&original.to_value(), &err);
            return Err(err);
        }
        self.build(EnvelopeDraft {
            actor,
            target: Some(original.identity.actor),
            message_type: MessageType::Ack,
            action_code: original.action_code(),
            payload: Payload::new(),
            correlation_id: Some(original.correlation_id()),
        })
    }

    fn report(&self, raw: &Value, err: &EnvelopeRejected) {
        let msg_id = raw
            .pointer("/causality/msg_id")
            .cloned()
            .unwrap_or(Value::Null);
        self.telemetry.warning(
            "envelope_rejected",
            json!({
                "rule": err.rule.as_str(),
                "detail": err.detail,
                "msg_id": msg_id,
            }),
        );
    }
}

/// Stateless validation (no telemetry).
pub fn validate_envelope(raw: &Value) -> Result<Envelope, EnvelopeRejected> {
    let fields = structural_pass(raw)?;
    ontological_pass(fields)
}

/// Borrowed view of a structurally valid envelope.
struct RawFields<'a> {
    version: &'a str,
    timestamp: i64,
    actor: &'a str,
    target: Option<&'a str>,
    msg_id: MsgId,
    correlation_id: CorrelationId,
    message_type: &'a str,
    action_code: &'a str,
    payload: &'a Map<String, Value>,
}

fn structural_pass(raw: &Value) -> Result<RawFields<'_>, EnvelopeRejected> {
    let root = raw.as_object().ok_or_else(|| {
        EnvelopeRejected::new(RejectionRule::NotAnObject, "envelope must be a JSON object")
    })?;

    let [protocol, identity, causality, kind, payload] =
        REQUIRED_BLOCKS.map(|name| block(root, name));
    let (protocol, identity, causality, kind, payload) =
        (protocol?, identity?, causality?, kind?, payload?);

    let version = string_field(protocol, "protocol", "version")?;
    let timestamp = protocol
        .get("timestamp")
        .and_then(whole_millis)
        .ok_or_else(|| {
            EnvelopeRejected::new(
                RejectionRule::InvalidField,
                "`protocol.timestamp` must be an integer number of milliseconds",
            )
        })?;

    let actor = string_field(identity, "identity", "actor")?;
    let target = match identity.get("target") {
        Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.as_str()),
        _ => {
            return Err(EnvelopeRejected::new(
                RejectionRule::InvalidField,
                "`identity.target` must be a string or null",
            ));
        }
    };

    let message_type = string_field(kind, "type", "message_type")?;
    let action_code = string_field(kind, "type", "action_code")?;

    let msg_id = uuid_field(causality, "msg_id")?;
    let correlation_id = uuid_field(causality, "correlation_id")?;

    Ok(RawFields {
        version,
        timestamp,
        actor,
        target,
        msg_id,
        correlation_id,
        message_type,
        action_code,
        payload,
    })
}

fn ontological_pass(raw: RawFields<'_>) -> Result<Envelope, EnvelopeRejected> {
    if raw.version != PROTOCOL_VERSION {
        return Err(EnvelopeRejected::new(
            RejectionRule::VersionMismatch,
            format!("expected protocol {PROTOCOL_VERSION}, got {}", raw.version),
        ));
    }

    let actor = ActorRole::parse(raw.actor).ok_or_else(|| {
        EnvelopeRejected::new(
            RejectionRule::UnknownActor,
            format!("unknown actor `{}`", raw.actor),
        )
    })?;
    let target = raw
        .target
        .map(|t| {
            ActorRole::parse(t).ok_or_else(|| {
                EnvelopeRejected::new(RejectionRule::UnknownTarget, format!("unknown target `{t}`"))
            })
        })
        .transpose()?;

    let message_type = MessageType::parse(raw.message_type).ok_or_else(|| {
        EnvelopeRejected::new(
            RejectionRule::UnknownMessageType,
            format!("unknown message type `{}`", raw.message_type),
        )
    })?;

    if message_type == MessageType::Ack && raw.action_code == ActionCode::AckReceived.as_str() {
        return Err(EnvelopeRejected::new(
            RejectionRule::AckLoop,
            "an ACK cannot acknowledge another ACK",
        ));
    }

    let action_code = ActionCode::parse(raw.action_code).ok_or_else(|| {
        EnvelopeRejected::new(
            RejectionRule::UnregisteredActionCode,
            format!("action code `{}` is not registered", raw.action_code),
        )
    })?;

    if message_type == MessageType::Ack && !raw.payload.is_empty() {
        return Err(EnvelopeRejected::new(
            RejectionRule::AckWithPayload,
            "ACK payload must be empty",
        ));
    }

    if message_type == MessageType::Event && target.is_some() {
        return Err(EnvelopeRejected::new(
            RejectionRule::TargetedEvent,
            "EVENT must not carry a target",
        ));
    }

    if let Some(path) = find_forbidden_field(raw.payload, "payload") {
        return Err(EnvelopeRejected::new(
            RejectionRule::ForbiddenField,
            format!("forbidden field `{path}`"),
        ));
    }

    Ok(Envelope {
        protocol: ProtocolBlock {
            version: raw.version.to_string(),
            timestamp: raw.timestamp,
        },
        identity: IdentityBlock { actor, target },
        causality: CausalityBlock {
            msg_id: raw.msg_id,
            correlation_id: raw.correlation_id,
        },
        kind: TypeBlock {
            message_type,
            action_code,
        },
        payload: raw.payload.clone(),
    })
}

fn block<'a>(
    root: &'a Map<String, Value>,
    name: &str,
) -> Result<&'a Map<String, Value>, EnvelopeRejected> {
    root.get(name).and_then(Value::as_object).ok_or_else(|| {
        EnvelopeRejected::new(
            RejectionRule::MissingBlock,
            format!("`{name}` block is missing or not an object"),
        )
    })
}

/// Integral milliseconds. `1000.0` passes; `1000.5` and out-of-range values do not.
fn whole_millis(value: &Value) -> Option<i64> {
    const LIMIT: f64 = 9_223_372_036_854_775_808.0; // 2^63
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.fract() == 0.0 && (-LIMIT..LIMIT).contains(f))
            .map(|f| f as i64)
    })
}

fn string_field<'a>(
    block: &'a Map<String, Value>,
    block_name: &str,
    key: &str,
) -> Result<&'a str, EnvelopeRejected> {
    block.get(key).and_then(Value::as_str).ok_or_else(|| {
        EnvelopeRejected::new(
            RejectionRule::InvalidField,
            format!("`{block_name}.{key}` must be a string"),
        )
    })
}

fn uuid_field<T: IdMarker>(
    causality: &Map<String, Value>,
    key: &str,
) -> Result<Id<T>, EnvelopeRejected> {
    causality
        .get(key)
        .and_then(Value::as_str)
        .and_then(Id::<T>::parse_v4)
        .ok_or_else(|| {
            EnvelopeRejected::new(
                RejectionRule::InvalidUuid,
                format!("`causality.{key}` must be a UUIDv4"),
            )
        })
}

/// Path of the first denylisted key anywhere under `map`, arrays included.
fn find_forbidden_field(map: &Map<String, Value>, path: &str) -> Option<String> {
    map.iter().find_map(|(key, value)| {
        let here = format!("{path}.{key}");
        if is_forbidden_field(key) {
            Some(here)
        } else {
            find_in_value(value, &here)
        }
    })
}

fn find_in_value(value: &Value, path: &str) -> Option<String> {
    match value {
        Value::Object(map) => find_forbidden_field(map, path),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .find_map(|(i, item)| find_in_value(item, &format!("{path}[{i}]"))),
        _ => None,
    }
}
