//! Pub/sub session transport seam
//!
//! The engine only needs: connect, join or match into a session, send an
//! opaque tagged payload to the session, leave. Presence changes, messages and
//! socket closure arrive through the [`InboundSender`] handed over at join
//! time.

use std::future::Future;

use thiserror::Error;

use crate::net::inbound::InboundSender;
use crate::session::participant::{Participant, ParticipantId};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("not connected")]
    NotConnected,

    #[error("socket closed: {0}")]
    SocketClosed(String),

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("join failed: {0}")]
    JoinFailed(String),

    #[error("operation timed out")]
    Timeout,
}

/// Account credentials presented at connect time
#[derive(Debug, Clone)]
pub struct Credentials {
    pub participant: ParticipantId,
    pub display_name: String,
}

impl Credentials {
    pub fn new(participant: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            participant: ParticipantId::new(participant),
            display_name: display_name.into(),
        }
    }
}

/// How to find a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchCriteria {
    /// Join a known session id
    Session(String),
    /// Join any open session, or create one
    AnyOpen,
}

/// A joined session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub session_id: String,
    /// The local participant as the transport knows it
    pub local: Participant,
}

pub trait Transport: Send + Sync + 'static {
    /// Authenticate and open the socket
    fn connect(
        &self,
        credentials: &Credentials,
    ) -> impl Future<Output = Result<Participant, TransportError>> + Send;

    /// Join or create a session. Every presence change, message and closure for
    /// that session is pushed to `inbound` from then on.
    fn join_or_match(
        &self,
        criteria: &MatchCriteria,
        inbound: InboundSender,
    ) -> impl Future<Output = Result<SessionHandle, TransportError>> + Send;

    fn send(
        &self,
        session_id: &str,
        op: i64,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn leave(&self, session_id: &str) -> impl Future<Output = Result<(), TransportError>> + Send;
}
