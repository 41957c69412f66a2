//! Domain identifiers (strongly-typed IDs).
//!
//! Message and correlation ids travel on the wire as bare UUIDv4 strings, so
//! they share one generic `Id<T>` over `uuid::Uuid`. The marker type `T` only
//! exists at compile time (PhantomData): a `MsgId` can never be passed where a
//! `CorrelationId` is expected, even though both are 16 bytes at runtime.
//!
//! Task ids are chosen by the control plane (`"t1"`, `"checkout-42"`, ...), so
//! `TaskId` is a plain string newtype instead.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::marker::PhantomData;
use uuid::Uuid;

/// Marker trait for each id kind. `label()` is only used in diagnostics.
pub trait IdMarker: Send + Sync + 'static {
    fn label() -> &'static str;
}

/// Generic UUID-backed id.
#[repr(transparent)]
pub struct Id<T: IdMarker> {
    uuid: Uuid,
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self {
            uuid,
            _marker: PhantomData,
        }
    }

    /// Parse the canonical hyphenated form and require a version-4 UUID.
    ///
    /// `uuid::Uuid::parse_str` also accepts the simple, braced and urn forms;
    /// the wire protocol only allows `xxxxxxxx-xxxx-4xxx-xxxx-xxxxxxxxxxxx`.
    pub fn parse_v4(raw: &str) -> Option<Self> {
        if raw.len() != 36 {
            return None;
        }
        let uuid = Uuid::parse_str(raw).ok()?;
        (uuid.get_version_num() == 4).then(|| Self::from_uuid(uuid))
    }

    pub fn as_uuid(&self) -> Uuid {
        self.uuid
    }

    /// Reinterpret the same UUID as another id kind.
    ///
    /// Used when a message opens a causal chain: its correlation id is its own
    /// message id.
    pub fn cast<U: IdMarker>(self) -> Id<U> {
        Id::from_uuid(self.uuid)
    }
}

// Manual impls: derives would put bounds on `T`, which is an uninhabited marker.
impl<T: IdMarker> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: IdMarker> Copy for Id<T> {}

impl<T: IdMarker> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.uuid == other.uuid
    }
}

impl<T: IdMarker> Eq for Id<T> {}

impl<T: IdMarker> std::hash::Hash for Id<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.uuid.hash(state);
    }
}

impl<T: IdMarker> PartialOrd for Id<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: IdMarker> Ord for Id<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.uuid.cmp(&other.uuid)
    }
}

impl<T: IdMarker> From<Uuid> for Id<T> {
    fn from(uuid: Uuid) -> Self {
        Self::from_uuid(uuid)
    }
}

impl<T: IdMarker> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", T::label(), self.uuid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.uuid.hyphenated().fmt(f)
    }
}

impl<T: IdMarker> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.uuid.hyphenated())
    }
}

impl<'de, T: IdMarker> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse_v4(&raw).ok_or_else(|| {
            serde::de::Error::custom(format!("{} must be a UUIDv4: {raw}", T::label()))
        })
    }
}

/// Marker for a single envelope instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Msg {}

impl IdMarker for Msg {
    fn label() -> &'static str {
        "msg_id"
    }
}

/// Marker for a causal chain (one task's lifecycle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Correlation {}

impl IdMarker for Correlation {
    fn label() -> &'static str {
        "correlation_id"
    }
}

/// Unique per envelope; used for duplicate detection only.
pub type MsgId = Id<Msg>;

/// Groups every message belonging to one task's lifecycle.
pub type CorrelationId = Id<Correlation>;

/// Identifier of a task, chosen by whoever creates it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_v4_accepts_only_hyphenated_v4() {
        let v4 = Uuid::new_v4();
        assert!(MsgId::parse_v4(&v4.hyphenated().to_string()).is_some());
        assert!(MsgId::parse_v4(&v4.simple().to_string()).is_none());

        // version nibble 1
        assert!(MsgId::parse_v4("6fa459ea-ee8a-1ca4-894e-db77e160355e").is_none());
        assert!(MsgId::parse_v4("not-a-uuid").is_none());
        assert!(MsgId::parse_v4("").is_none());
    }

    #[test]
    fn ids_serialize_as_bare_strings() {
        let uuid = Uuid::new_v4();
        let id = CorrelationId::from_uuid(uuid);

        let serialized = serde_json::to_string(&id).unwrap();
        assert_eq!(serialized, format!("\"{}\"", uuid.hyphenated()));

        let back: CorrelationId = serde_json::from_str(&serialized).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn deserialize_rejects_non_v4() {
        let err = serde_json::from_str::<MsgId>("\"6fa459ea-ee8a-1ca4-894e-db77e160355e\"")
            .unwrap_err();
        assert!(err.to_string().contains("msg_id"));
    }

    #[test]
    fn cast_keeps_the_same_uuid() {
        let msg = MsgId::from_uuid(Uuid::new_v4());
        let corr: CorrelationId = msg.cast();
        assert_eq!(msg.as_uuid(), corr.as_uuid());
        assert_eq!(msg.to_string(), corr.to_string());
    }

    #[test]
    fn phantom_data_does_not_consume_memory() {
        use std::mem::size_of;
        assert_eq!(size_of::<MsgId>(), size_of::<Uuid>());
        assert_eq!(size_of::<CorrelationId>(), 16);
    }

    #[test]
    fn blank_task_ids_are_empty() {
        assert!(TaskId::new("  ").is_empty());
        assert!(!TaskId::from("t1").is_empty());
    }
}
