//! Identifier types shared across the protocol.

use rkyv::{Archive, Deserialize, Serialize};

/// Unique identifier of a resource offer, assigned by the master.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[rkyv(compare(PartialEq))]
pub struct OfferId(pub String);

impl OfferId {
    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OfferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OfferId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Identifier of the agent (machine daemon) backing an offer.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[rkyv(compare(PartialEq))]
pub struct AgentId(pub String);

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Identifier of a task as assigned by the job manager.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[rkyv(compare(PartialEq))]
pub struct TaskId(pub String);

impl TaskId {
    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Framework registration identifier issued by the master.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[rkyv(compare(PartialEq))]
pub struct FrameworkId(pub String);

impl std::fmt::Display for FrameworkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FrameworkId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Identifier of an event stream session with the master.
///
/// A fresh stream id is minted on every (re)subscription; outbound calls
/// must carry the id of the stream they were decided on so the master can
/// reject calls from stale sessions. Uses ULID format (128-bit,
/// lexicographically sortable).
#[derive(Archive, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[rkyv(compare(PartialEq))]
pub struct StreamId(pub [u8; 16]);

impl StreamId {
    /// Mints a new stream id from the current timestamp.
    #[must_use]
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_bytes())
    }

    /// Creates a stream id from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", ulid::Ulid::from_bytes(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_id_roundtrip() {
        let id = StreamId::new();
        let restored = StreamId::from_bytes(id.0);
        assert_eq!(id, restored);
    }

    #[test]
    fn stream_id_display_is_ulid() {
        let id = StreamId::new();
        assert_eq!(id.to_string().len(), 26);
    }

    #[test]
    fn offer_id_display() {
        let id = OfferId::from("offer-1");
        assert_eq!(id.to_string(), "offer-1");
        assert_eq!(id.as_str(), "offer-1");
    }
}
