use std::collections::BTreeMap;

use crate::game::constants::net::MAX_PARTICIPANTS;
use crate::session::error::ProtocolError;
use crate::session::participant::{Participant, ParticipantId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Redelivered presence for someone already known
    Duplicate,
    Joined,
    /// The join completed the pair
    BothPresent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// Leave for an id we never saw, or for ourselves
    Ignored,
    Left,
    /// The opponent left an active match
    PeerLost(ParticipantId),
}

/// Canonical participant set for one session
///
/// Keyed by participant id, so iteration order is the lexicographic order
/// both peers agree on without coordination.
#[derive(Debug, Clone)]
pub struct MembershipTracker {
    local: ParticipantId,
    members: BTreeMap<ParticipantId, Participant>,
}

impl MembershipTracker {
    /// The local participant is a member from the start
    pub fn new(local: Participant) -> Self {
        let local_id = local.id.clone();
        let mut members = BTreeMap::new();
        members.insert(local_id.clone(), local);
        Self {
            local: local_id,
            members,
        }
    }

    pub fn on_join(&mut self, participant: Participant) -> Result<JoinOutcome, ProtocolError> {
        if let Some(known) = self.members.get_mut(&participant.id) {
            // Keep the freshest handle; identity is the id
            known.handle = participant.handle;
            return Ok(JoinOutcome::Duplicate);
        }
        if self.members.len() >= MAX_PARTICIPANTS {
            return Err(ProtocolError::SessionFull(participant.id));
        }

        self.members.insert(participant.id.clone(), participant);
        if self.members.len() == MAX_PARTICIPANTS {
            Ok(JoinOutcome::BothPresent)
        } else {
            Ok(JoinOutcome::Joined)
        }
    }

    pub fn on_leave(&mut self, id: &ParticipantId, session_active: bool) -> LeaveOutcome {
        if *id == self.local || self.members.remove(id).is_none() {
            return LeaveOutcome::Ignored;
        }
        if session_active && self.members.len() < MAX_PARTICIPANTS {
            LeaveOutcome::PeerLost(id.clone())
        } else {
            LeaveOutcome::Left
        }
    }

    pub fn current_count(&self) -> usize {
        self.members.len()
    }

    /// Participant ids in lexicographic order
    pub fn snapshot(&self) -> Vec<ParticipantId> {
        self.members.keys().cloned().collect()
    }

    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.members.contains_key(id)
    }

    pub fn local_id(&self) -> &ParticipantId {
        &self.local
    }

    /// The opponent, once known
    pub fn remote(&self) -> Option<&Participant> {
        self.members.values().find(|p| p.id != self.local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::participant::TransportHandle;

    fn participant(id: &str) -> Participant {
        Participant::new(ParticipantId::new(id), id.to_uppercase(), TransportHandle::generate())
    }

    #[test]
    fn test_local_is_member() {
        let tracker = MembershipTracker::new(participant("bob"));
        assert_eq!(tracker.current_count(), 1);
        assert!(tracker.remote().is_none());
    }

    #[test]
    fn test_duplicate_joins_are_deduped() {
        let mut tracker = MembershipTracker::new(participant("bob"));
        assert_eq!(tracker.on_join(participant("alice")).unwrap(), JoinOutcome::BothPresent);
        assert_eq!(tracker.on_join(participant("alice")).unwrap(), JoinOutcome::Duplicate);
        assert_eq!(tracker.on_join(participant("bob")).unwrap(), JoinOutcome::Duplicate);
        assert_eq!(tracker.current_count(), 2);
    }

    #[test]
    fn test_snapshot_is_lexicographic() {
        let mut tracker = MembershipTracker::new(participant("zed"));
        tracker.on_join(participant("amy")).unwrap();
        let ids: Vec<String> = tracker.snapshot().iter().map(|id| id.to_string()).collect();
        assert_eq!(ids, vec!["amy", "zed"]);
    }

    #[test]
    fn test_third_participant_rejected() {
        let mut tracker = MembershipTracker::new(participant("bob"));
        tracker.on_join(participant("alice")).unwrap();
        let err = tracker.on_join(participant("carol")).unwrap_err();
        assert!(matches!(err, ProtocolError::SessionFull(id) if id.as_str() == "carol"));
        assert!(!tracker.contains(&ParticipantId::new("carol")));
    }

    #[test]
    fn test_leave_while_active_is_peer_lost() {
        let mut tracker = MembershipTracker::new(participant("bob"));
        tracker.on_join(participant("alice")).unwrap();
        assert_eq!(
            tracker.on_leave(&ParticipantId::new("alice"), true),
            LeaveOutcome::PeerLost(ParticipantId::new("alice"))
        );
        // A redelivered leave is ignored, so PeerLost fires once
        assert_eq!(tracker.on_leave(&ParticipantId::new("alice"), true), LeaveOutcome::Ignored);
    }

    #[test]
    fn test_leave_before_active() {
        let mut tracker = MembershipTracker::new(participant("bob"));
        tracker.on_join(participant("alice")).unwrap();
        assert_eq!(tracker.on_leave(&ParticipantId::new("alice"), false), LeaveOutcome::Left);
        assert_eq!(tracker.on_leave(&ParticipantId::new("bob"), false), LeaveOutcome::Ignored);
        assert_eq!(tracker.current_count(), 1);
    }
}
