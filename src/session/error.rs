use thiserror::Error;

use crate::net::protocol::{DecodeError, EncodeError};
use crate::net::transport::TransportError;
use crate::session::participant::ParticipantId;

/// A message the relay refused. Logged and dropped, never fatal.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown opcode {0}")]
    UnknownOpCode(i64),

    #[error("malformed payload: {0}")]
    Malformed(#[from] DecodeError),

    #[error("message from unknown sender {0}")]
    UnknownSender(ParticipantId),

    #[error("session already has two participants, rejected {0}")]
    SessionFull(ParticipantId),

    #[error("origin {origin} not allowed to send {op}")]
    Unauthorized { origin: String, op: String },
}

/// What the player should be offered after a session failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    Retry,
    Wait,
    AbortToMenu,
}

/// User-facing session failures
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("server unreachable after {attempts} attempts: {source}")]
    ServerUnreachable {
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("no opponent found")]
    NoOpponentFound,

    #[error("opponent disconnected mid-match")]
    OpponentDisconnected,

    #[error("session cancelled")]
    Cancelled,

    #[error("only the session authority may do this")]
    NotAuthority,

    #[error("match has not started")]
    NotActive,

    #[error("session is closed")]
    SessionClosed,

    #[error("encode failed: {0}")]
    Encode(#[from] EncodeError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl SessionError {
    /// Text suitable for a dialog
    pub fn user_message(&self) -> &'static str {
        match self {
            SessionError::ServerUnreachable { .. } | SessionError::Transport(_) => {
                "Cannot reach the game server. Check your connection and try again."
            }
            SessionError::NoOpponentFound => "No opponent found. Try again in a moment.",
            SessionError::OpponentDisconnected => "Your opponent left the match.",
            SessionError::Cancelled => "Matchmaking cancelled.",
            SessionError::NotAuthority
            | SessionError::NotActive
            | SessionError::SessionClosed
            | SessionError::Encode(_) => {
                "Something went wrong with this match."
            }
        }
    }

    pub fn recovery(&self) -> Recovery {
        match self {
            SessionError::ServerUnreachable { .. } | SessionError::Transport(_) => Recovery::Retry,
            SessionError::NoOpponentFound => Recovery::Wait,
            _ => Recovery::AbortToMenu,
        }
    }
}
