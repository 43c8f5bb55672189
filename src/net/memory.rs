//! In-process pub/sub transport
//!
//! A [`MemoryHub`] plays the relay server: it groups participants into
//! sessions of two, fans messages out to the other members and emits
//! presence joins/leaves. Fault injection covers the delivery quirks the
//! engine must tolerate (loopback, redelivery, failed connects).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::smallvec;
use tracing::{debug, info, warn};

use crate::game::constants::net::{MAX_PARTICIPANTS, MAX_PAYLOAD_SIZE};
use crate::net::inbound::{InboundError, InboundEvent, InboundSender, PresenceList};
use crate::net::transport::{
    Credentials, MatchCriteria, SessionHandle, Transport, TransportError,
};
use crate::session::participant::{Participant, ParticipantId, TransportHandle};

/// Fault injection knobs
#[derive(Debug, Clone, Default)]
pub struct HubOptions {
    /// Deliver every message back to its sender as well
    pub echo_to_sender: bool,
    /// Extra copies of every message delivered to each recipient
    pub duplicate_deliveries: u32,
    /// Number of connect attempts (across all clients) that fail first
    pub fail_connects: u32,
}

struct Member {
    participant: Participant,
    inbound: InboundSender,
}

#[derive(Default)]
struct HubState {
    sessions: HashMap<String, Vec<Member>>,
    failed_connects: u32,
}

struct HubInner {
    options: HubOptions,
    state: Mutex<HubState>,
}

#[derive(Clone)]
pub struct MemoryHub {
    inner: Arc<HubInner>,
}

fn deliver(member: &Member, event: InboundEvent) {
    match member.inbound.try_send(event) {
        Ok(()) => {}
        Err(InboundError::Full) => {
            warn!("Inbound queue full for {}, event dropped", member.participant.id);
        }
        Err(InboundError::Disconnected) => {
            debug!("Inbound queue gone for {}", member.participant.id);
        }
    }
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::with_options(HubOptions::default())
    }

    pub fn with_options(options: HubOptions) -> Self {
        Self {
            inner: Arc::new(HubInner {
                options,
                state: Mutex::new(HubState::default()),
            }),
        }
    }

    /// A client endpoint bound to this hub
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            hub: self.clone(),
            local: Mutex::new(None),
            session: Mutex::new(None),
        }
    }

    pub fn session_count(&self) -> usize {
        self.inner.state.lock().sessions.len()
    }

    pub fn members(&self, session_id: &str) -> Vec<ParticipantId> {
        self.inner
            .state
            .lock()
            .sessions
            .get(session_id)
            .map(|members| members.iter().map(|m| m.participant.id.clone()).collect())
            .unwrap_or_default()
    }

    /// Server-side disconnect: the participant's socket closes and the rest of
    /// the session sees a leave.
    pub fn drop_participant(&self, session_id: &str, id: &ParticipantId, reason: &str) {
        let mut state = self.inner.state.lock();
        let Some(members) = state.sessions.get_mut(session_id) else {
            return;
        };
        let Some(pos) = members.iter().position(|m| m.participant.id == *id) else {
            return;
        };
        let dropped = members.remove(pos);
        deliver(
            &dropped,
            InboundEvent::Closed {
                reason: reason.to_string(),
            },
        );
        for member in members.iter() {
            deliver(
                member,
                InboundEvent::Presence {
                    joins: PresenceList::new(),
                    leaves: smallvec![dropped.participant.clone()],
                },
            );
        }
        if members.is_empty() {
            state.sessions.remove(session_id);
        }
        info!("Hub dropped {} from session {}", id, session_id);
    }

    fn try_connect(&self) -> Result<(), TransportError> {
        let mut state = self.inner.state.lock();
        if state.failed_connects < self.inner.options.fail_connects {
            state.failed_connects += 1;
            return Err(TransportError::ConnectFailed(format!(
                "injected failure {}/{}",
                state.failed_connects, self.inner.options.fail_connects
            )));
        }
        Ok(())
    }

    fn join(
        &self,
        participant: Participant,
        criteria: &MatchCriteria,
        inbound: InboundSender,
    ) -> Result<String, TransportError> {
        let mut state = self.inner.state.lock();

        let session_id = match criteria {
            MatchCriteria::Session(id) => id.clone(),
            MatchCriteria::AnyOpen => state
                .sessions
                .iter()
                .find(|(_, members)| {
                    members.len() < MAX_PARTICIPANTS
                        && members.iter().all(|m| m.participant.id != participant.id)
                })
                .map(|(id, _)| id.clone())
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        };

        let members = state.sessions.entry(session_id.clone()).or_default();
        if members.iter().any(|m| m.participant.id == participant.id) {
            return Err(TransportError::JoinFailed(format!(
                "{} already in session {}",
                participant.id, session_id
            )));
        }
        if members.len() >= MAX_PARTICIPANTS {
            return Err(TransportError::JoinFailed(format!("session {} is full", session_id)));
        }

        let joiner = Member {
            participant,
            inbound,
        };
        let existing: PresenceList = members.iter().map(|m| m.participant.clone()).collect();
        if !existing.is_empty() {
            deliver(
                &joiner,
                InboundEvent::Presence {
                    joins: existing,
                    leaves: PresenceList::new(),
                },
            );
        }
        for member in members.iter() {
            deliver(
                member,
                InboundEvent::Presence {
                    joins: smallvec![joiner.participant.clone()],
                    leaves: PresenceList::new(),
                },
            );
        }
        debug!("{} joined session {}", joiner.participant.id, session_id);
        members.push(joiner);
        Ok(session_id)
    }

    fn publish(
        &self,
        session_id: &str,
        sender: &Participant,
        op: i64,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(TransportError::SendFailed(format!(
                "payload of {} bytes exceeds {}",
                payload.len(),
                MAX_PAYLOAD_SIZE
            )));
        }
        let state = self.inner.state.lock();
        let members = state
            .sessions
            .get(session_id)
            .filter(|members| members.iter().any(|m| m.participant.id == sender.id))
            .ok_or_else(|| TransportError::SocketClosed(format!("not in session {}", session_id)))?;

        let copies = 1 + self.inner.options.duplicate_deliveries;
        for member in members.iter() {
            if member.participant.id == sender.id && !self.inner.options.echo_to_sender {
                continue;
            }
            for _ in 0..copies {
                deliver(
                    member,
                    InboundEvent::Message {
                        op,
                        sender: sender.clone(),
                        payload: payload.clone(),
                    },
                );
            }
        }
        Ok(())
    }

    fn remove(&self, session_id: &str, id: &ParticipantId) {
        let mut state = self.inner.state.lock();
        let Some(members) = state.sessions.get_mut(session_id) else {
            return;
        };
        let Some(pos) = members.iter().position(|m| m.participant.id == *id) else {
            return;
        };
        let left = members.remove(pos);
        for member in members.iter() {
            deliver(
                member,
                InboundEvent::Presence {
                    joins: PresenceList::new(),
                    leaves: smallvec![left.participant.clone()],
                },
            );
        }
        if members.is_empty() {
            state.sessions.remove(session_id);
        }
    }
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

/// One client's connection to a [`MemoryHub`]
pub struct MemoryTransport {
    hub: MemoryHub,
    local: Mutex<Option<Participant>>,
    session: Mutex<Option<String>>,
}

impl MemoryTransport {
    fn local(&self) -> Result<Participant, TransportError> {
        self.local.lock().clone().ok_or(TransportError::NotConnected)
    }
}

impl Transport for MemoryTransport {
    async fn connect(&self, credentials: &Credentials) -> Result<Participant, TransportError> {
        self.hub.try_connect()?;
        let participant = Participant::new(
            credentials.participant.clone(),
            credentials.display_name.clone(),
            TransportHandle::generate(),
        );
        *self.local.lock() = Some(participant.clone());
        Ok(participant)
    }

    async fn join_or_match(
        &self,
        criteria: &MatchCriteria,
        inbound: InboundSender,
    ) -> Result<SessionHandle, TransportError> {
        let local = self.local()?;
        let session_id = self.hub.join(local.clone(), criteria, inbound)?;
        *self.session.lock() = Some(session_id.clone());
        Ok(SessionHandle { session_id, local })
    }

    async fn send(&self, session_id: &str, op: i64, payload: Vec<u8>) -> Result<(), TransportError> {
        let local = self.local()?;
        self.hub.publish(session_id, &local, op, payload)
    }

    async fn leave(&self, session_id: &str) -> Result<(), TransportError> {
        let local = self.local()?;
        self.hub.remove(session_id, &local.id);
        let mut session = self.session.lock();
        if session.as_deref() == Some(session_id) {
            *session = None;
        }
        Ok(())
    }
}
