use crate::session::participant::{ParticipantId, PlayerIndex};

/// Result of authority resolution for the local participant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Authority {
    pub is_authority: bool,
    pub local_index: PlayerIndex,
}

impl Authority {
    pub fn new(is_authority: bool) -> Self {
        Self {
            is_authority,
            local_index: PlayerIndex::for_role(is_authority),
        }
    }

    pub fn remote_index(&self) -> PlayerIndex {
        self.local_index.other()
    }
}

/// The lexicographically first participant id is the authority. The local id
/// always takes part, so an empty or lagging snapshot resolves to self.
pub fn resolve(local: &ParticipantId, snapshot: &[ParticipantId]) -> Authority {
    let first = snapshot.iter().chain(std::iter::once(local)).min();
    Authority::new(first == Some(local))
}

/// Tracks the authority decision across membership changes until it is
/// frozen at match start.
#[derive(Debug, Clone)]
pub struct AuthorityResolver {
    local: ParticipantId,
    current: Authority,
    frozen: bool,
}

impl AuthorityResolver {
    pub fn new(local: ParticipantId) -> Self {
        Self {
            local,
            current: Authority::new(true),
            frozen: false,
        }
    }

    /// Re-resolve from a membership snapshot. Returns the new decision when it
    /// changed; frozen resolvers never change.
    pub fn update(&mut self, snapshot: &[ParticipantId]) -> Option<Authority> {
        if self.frozen {
            return None;
        }
        let next = resolve(&self.local, snapshot);
        if next == self.current {
            return None;
        }
        self.current = next;
        Some(next)
    }

    pub fn freeze(&mut self) -> Authority {
        self.frozen = true;
        self.current
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn current(&self) -> Authority {
        self.current
    }

    pub fn is_authority(&self) -> bool {
        self.current.is_authority
    }
}
