//! Discrete event relay
//!
//! Outbound events are stamped with the local player index and the next
//! sequence number. Inbound messages go through, in order: opcode lookup,
//! loopback drop (sender id is ourselves), decode, self-origin suppression by
//! logical owner index, authority check, and per-(origin, opcode) dedupe.

use hashbrown::HashMap;

use crate::net::protocol::{EncodeError, NetEvent, OpCode};
use crate::session::error::ProtocolError;
use crate::session::participant::{ParticipantId, PlayerIndex};

/// An encoded message waiting for the transport
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub op: OpCode,
    pub payload: Vec<u8>,
}

/// What the relay decided about an inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    Accepted {
        origin: PlayerIndex,
        seq: u64,
        event: NetEvent,
    },
    /// The transport looped our own broadcast back to us
    Loopback,
    /// About an entity the local peer owns and already applied
    SelfOrigin,
    /// Redelivered or overtaken by a newer message on the same opcode
    Duplicate,
}

#[derive(Debug, Clone)]
pub struct EventRelay {
    local_id: ParticipantId,
    /// Index stamped on outbound messages
    origin: PlayerIndex,
    /// Set once authority is frozen; enables owner-index suppression
    bound_index: Option<PlayerIndex>,
    next_seq: u64,
    last_seen: HashMap<(PlayerIndex, OpCode), u64>,
}

impl EventRelay {
    pub fn new(local_id: ParticipantId, origin: PlayerIndex) -> Self {
        Self {
            local_id,
            origin,
            bound_index: None,
            next_seq: 1,
            last_seen: HashMap::new(),
        }
    }

    /// Tentative index while authority can still change
    pub fn set_origin(&mut self, origin: PlayerIndex) {
        if self.bound_index.is_none() {
            self.origin = origin;
        }
    }

    /// Fix the local index for the rest of the session
    pub fn bind_index(&mut self, index: PlayerIndex) {
        self.origin = index;
        self.bound_index = Some(index);
    }

    pub fn origin(&self) -> PlayerIndex {
        self.origin
    }

    /// Forget what the opponent sent (it left before the match started)
    pub fn forget_peer(&mut self) {
        let origin = self.origin;
        self.last_seen.retain(|(index, _), _| *index == origin);
    }

    pub fn send(&mut self, event: &NetEvent) -> Result<Outbound, EncodeError> {
        let seq = self.next_seq;
        let payload = event.encode(self.origin, seq)?;
        self.next_seq += 1;
        Ok(Outbound {
            op: event.op_code(),
            payload,
        })
    }

    pub fn receive(
        &mut self,
        op: i64,
        sender: &ParticipantId,
        payload: &[u8],
    ) -> Result<Disposition, ProtocolError> {
        let op = OpCode::from_code(op).ok_or(ProtocolError::UnknownOpCode(op))?;

        if *sender == self.local_id {
            return Ok(Disposition::Loopback);
        }

        let (origin, seq, event) = NetEvent::decode(op, payload)?;

        if let Some(local) = self.bound_index {
            if origin == local || event.entity_owner() == Some(local) {
                return Ok(Disposition::SelfOrigin);
            }
            if op.is_authority_only() && origin != PlayerIndex::HOST {
                return Err(ProtocolError::Unauthorized {
                    origin: origin.to_string(),
                    op: op.to_string(),
                });
            }
        }

        let key = (origin, op);
        if self.last_seen.get(&key).is_some_and(|last| seq <= *last) {
            return Ok(Disposition::Duplicate);
        }
        self.last_seen.insert(key, seq);

        Ok(Disposition::Accepted { origin, seq, event })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::protocol::{
        ArrowSpawnData, HitTargetData, LevelChangeData, RotationControlData, ShotId,
    };
    use crate::util::vec3::Vec3;

    fn pair() -> (EventRelay, EventRelay) {
        let mut alice = EventRelay::new(ParticipantId::new("alice"), PlayerIndex::HOST);
        let mut bob = EventRelay::new(ParticipantId::new("bob"), PlayerIndex::GUEST);
        alice.bind_index(PlayerIndex::HOST);
        bob.bind_index(PlayerIndex::GUEST);
        (alice, bob)
    }

    fn hit(owner: PlayerIndex, shot_seq: u32) -> NetEvent {
        NetEvent::HitTarget(HitTargetData {
            shot: ShotId { owner, shot_seq },
        })
    }

    fn spawn(owner: PlayerIndex) -> NetEvent {
        NetEvent::ArrowSpawn(ArrowSpawnData {
            shot: ShotId { owner, shot_seq: 1 },
            position: Vec3::new(0.0, 1.0, 0.0),
            rotation_z: 100.0,
            shoot_force: 12.0,
            is_bomb: false,
            current_force: 12.0,
        })
    }

    #[test]
    fn test_accepts_remote_event() {
        let (mut alice, mut bob) = pair();
        let out = alice.send(&hit(PlayerIndex::HOST, 1)).unwrap();
        let alice_id = ParticipantId::new("alice");
        match bob.receive(out.op.code(), &alice_id, &out.payload).unwrap() {
            Disposition::Accepted { origin, seq, event } => {
                assert_eq!(origin, PlayerIndex::HOST);
                assert_eq!(seq, 1);
                assert_eq!(event, hit(PlayerIndex::HOST, 1));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_delivery_dropped() {
        let (mut alice, mut bob) = pair();
        let out = alice.send(&hit(PlayerIndex::HOST, 1)).unwrap();
        let alice_id = ParticipantId::new("alice");
        bob.receive(out.op.code(), &alice_id, &out.payload).unwrap();
        for _ in 0..4 {
            assert_eq!(
                bob.receive(out.op.code(), &alice_id, &out.payload).unwrap(),
                Disposition::Duplicate
            );
        }
    }

    #[test]
    fn test_loopback_dropped_by_participant_id() {
        let (mut alice, _) = pair();
        let out = alice.send(&spawn(PlayerIndex::HOST)).unwrap();
        let alice_id = ParticipantId::new("alice");
        assert_eq!(
            alice.receive(out.op.code(), &alice_id, &out.payload).unwrap(),
            Disposition::Loopback
        );
    }

    #[test]
    fn test_self_owned_entity_suppressed_by_index() {
        let (mut alice, mut bob) = pair();
        // A relay that re-stamps alice's arrow under bob's id still names alice as owner
        let echoed = bob.send(&spawn(PlayerIndex::HOST)).unwrap();
        let bob_id = ParticipantId::new("bob");
        assert_eq!(
            alice.receive(echoed.op.code(), &bob_id, &echoed.payload).unwrap(),
            Disposition::SelfOrigin
        );
    }

    #[test]
    fn test_authority_only_from_guest_rejected() {
        let (mut alice, mut bob) = pair();
        let out = bob
            .send(&NetEvent::LevelChange(LevelChangeData {
                current_level: 1,
                last_level: 0,
                current_theme: 2,
                last_theme: 0,
            }))
            .unwrap();
        let err = alice
            .receive(out.op.code(), &ParticipantId::new("bob"), &out.payload)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Unauthorized { .. }));
    }

    #[test]
    fn test_unknown_opcode_and_garbage() {
        let (_, mut bob) = pair();
        let alice_id = ParticipantId::new("alice");
        assert!(matches!(
            bob.receive(99, &alice_id, &[1, 2, 3]),
            Err(ProtocolError::UnknownOpCode(99))
        ));
        assert!(matches!(
            bob.receive(OpCode::ArrowSpawn.code(), &alice_id, &[1, 2, 3]),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_stale_message_on_same_opcode_dropped() {
        let (mut alice, mut bob) = pair();
        let alice_id = ParticipantId::new("alice");
        let stop = NetEvent::RotationStop(RotationControlData {
            owner: PlayerIndex::HOST,
            angle: 10.0,
        });
        let first = alice.send(&stop).unwrap();
        let second = alice.send(&stop).unwrap();
        bob.receive(second.op.code(), &alice_id, &second.payload).unwrap();
        assert_eq!(
            bob.receive(first.op.code(), &alice_id, &first.payload).unwrap(),
            Disposition::Duplicate
        );
    }

    #[test]
    fn test_opcodes_dedupe_independently() {
        let (mut alice, mut bob) = pair();
        let alice_id = ParticipantId::new("alice");
        let spawn_msg = alice.send(&spawn(PlayerIndex::HOST)).unwrap();
        let hit_msg = alice.send(&hit(PlayerIndex::HOST, 1)).unwrap();
        // Different opcodes carry no ordering between them
        assert!(matches!(
            bob.receive(hit_msg.op.code(), &alice_id, &hit_msg.payload).unwrap(),
            Disposition::Accepted { .. }
        ));
        assert!(matches!(
            bob.receive(spawn_msg.op.code(), &alice_id, &spawn_msg.payload).unwrap(),
            Disposition::Accepted { .. }
        ));
    }

    #[test]
    fn test_forget_peer_allows_restarted_sequence() {
        let (mut alice, mut bob) = pair();
        let alice_id = ParticipantId::new("alice");
        let out = alice.send(&hit(PlayerIndex::HOST, 1)).unwrap();
        bob.receive(out.op.code(), &alice_id, &out.payload).unwrap();
        bob.forget_peer();
        assert!(matches!(
            bob.receive(out.op.code(), &alice_id, &out.payload).unwrap(),
            Disposition::Accepted { .. }
        ));
    }
}
