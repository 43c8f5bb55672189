use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable participant identifier (account id). Ordering is lexicographic and
/// identical on both peers, which is what authority assignment relies on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Transport-session-local handle. Changes on every connection; never used
/// to decide message ownership.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransportHandle(String);

impl TransportHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    /// Fresh random handle (used by the in-memory transport)
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Logical player slot. The session authority plays index 0, the other
/// participant index 1. Payloads carry it as the entity owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct PlayerIndex(u8);

impl PlayerIndex {
    pub const HOST: PlayerIndex = PlayerIndex(0);
    pub const GUEST: PlayerIndex = PlayerIndex(1);

    /// Slot for a participant given its authority role
    pub fn for_role(is_authority: bool) -> Self {
        if is_authority {
            Self::HOST
        } else {
            Self::GUEST
        }
    }

    /// The opposing slot
    pub fn other(self) -> Self {
        if self == Self::HOST {
            Self::GUEST
        } else {
            Self::HOST
        }
    }

    /// Array slot for per-player tables
    pub fn slot(self) -> usize {
        self.0 as usize
    }

    /// Validate a raw index from the wire
    pub fn try_from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::HOST),
            1 => Some(Self::GUEST),
            _ => None,
        }
    }
}

impl TryFrom<u8> for PlayerIndex {
    type Error = String;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        Self::try_from_raw(raw).ok_or_else(|| format!("invalid player index {}", raw))
    }
}

impl From<PlayerIndex> for u8 {
    fn from(index: PlayerIndex) -> u8 {
        index.0
    }
}

impl fmt::Display for PlayerIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0 + 1)
    }
}

/// A session member as reported by the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub display_name: String,
    pub handle: TransportHandle,
}

impl Participant {
    pub fn new(id: ParticipantId, display_name: impl Into<String>, handle: TransportHandle) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            handle,
        }
    }
}
