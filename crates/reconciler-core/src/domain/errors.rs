//! Errors - kernel error taxonomy.
//!
//! - `EnvelopeRejected`: a message failed protocol validation. Absorbed at the
//!   protocol boundary; never reaches a store.
//! - `KernelError`: lifecycle and ingestion failures, returned to the
//!   immediate caller.
//!
//! Duplicate and late observations are not errors.

use std::fmt;

use super::ids::{MsgId, TaskId};
use super::state::TaskState;

/// Which protocol rule an envelope broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectionRule {
    MalformedJson,
    NotAnObject,
    MissingBlock,
    InvalidField,
    InvalidUuid,
    VersionMismatch,
    UnknownActor,
    UnknownTarget,
    UnknownMessageType,
    UnregisteredActionCode,
    AckLoop,
    AckWithPayload,
    TargetedEvent,
    ForbiddenField,
}

impl RejectionRule {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectionRule::MalformedJson => "MALFORMED_JSON",
            RejectionRule::NotAnObject => "NOT_AN_OBJECT",
            RejectionRule::MissingBlock => "MISSING_BLOCK",
            RejectionRule::InvalidField => "INVALID_FIELD",
            RejectionRule::InvalidUuid => "INVALID_UUID",
            RejectionRule::VersionMismatch => "VERSION_MISMATCH",
            RejectionRule::UnknownActor => "UNKNOWN_ACTOR",
            RejectionRule::UnknownTarget => "UNKNOWN_TARGET",
            RejectionRule::UnknownMessageType => "UNKNOWN_MESSAGE_TYPE",
            RejectionRule::UnregisteredActionCode => "UNREGISTERED_ACTION_CODE",
            RejectionRule::AckLoop => "ACK_LOOP",
            RejectionRule::AckWithPayload => "ACK_WITH_PAYLOAD",
            RejectionRule::TargetedEvent => "TARGETED_EVENT",
            RejectionRule::ForbiddenField => "FORBIDDEN_FIELD",
        }
    }

    /// Structural rules are checked before any ontological rule.
    pub fn is_structural(self) -> bool {
        matches!(
            self,
            RejectionRule::MalformedJson
                | RejectionRule::NotAnObject
                | RejectionRule::MissingBlock
                | RejectionRule::InvalidField
                | RejectionRule::InvalidUuid
        )
    }
}

impl fmt::Display for RejectionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An envelope failed validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("envelope rejected ({rule}): {detail}")]
pub struct EnvelopeRejected {
    pub rule: RejectionRule,
    pub detail: String,
}

impl EnvelopeRejected {
    pub fn new(rule: RejectionRule, detail: impl Into<String>) -> Self {
        Self {
            rule,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum KernelError {
    #[error(transparent)]
    EnvelopeRejected(#[from] EnvelopeRejected),

    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("task already exists: {0}")]
    TaskAlreadyExists(TaskId),

    #[error("task id must be a non-empty string")]
    InvalidTaskId,

    #[error("invalid transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskState,
        to: TaskState,
    },

    #[error("race detected on task {task_id}: expected {expected}, found {found}")]
    RaceDetected {
        task_id: TaskId,
        expected: TaskState,
        found: TaskState,
    },

    #[error("only EVENT envelopes can be ingested as observations (msg_id {0})")]
    NotAnEvent(MsgId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_display_names_the_rule() {
        let err = EnvelopeRejected::new(RejectionRule::ForbiddenField, "payload.status");
        assert_eq!(
            err.to_string(),
            "envelope rejected (FORBIDDEN_FIELD): payload.status"
        );
    }

    #[test]
    fn rejection_converts_into_kernel_error() {
        let err: KernelError = EnvelopeRejected::new(RejectionRule::AckLoop, "x").into();
        assert!(matches!(
            err,
            KernelError::EnvelopeRejected(EnvelopeRejected {
                rule: RejectionRule::AckLoop,
                ..
            })
        ));
    }

    #[test]
    fn invalid_transition_message() {
        let err = KernelError::InvalidTransition {
            task_id: TaskId::new("t1"),
            from: TaskState::Terminated,
            to: TaskState::Active,
        };
        assert_eq!(
            err.to_string(),
            "invalid transition for task t1: TERMINATED -> ACTIVE"
        );
    }
}
