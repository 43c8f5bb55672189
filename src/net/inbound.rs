//! Lock-free inbound queue between the transport and the tick loop
//!
//! Transport callbacks run on a background I/O context and only ever push
//! here. The session tick drains everything that has arrived at the start of
//! each tick, so all session state is mutated from a single thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use smallvec::SmallVec;

use crate::session::participant::Participant;

/// Presence lists are almost always a single participant
pub type PresenceList = SmallVec<[Participant; 2]>;

/// Something the transport observed for this session
#[derive(Debug, Clone)]
pub enum InboundEvent {
    Presence {
        joins: PresenceList,
        leaves: PresenceList,
    },
    Message {
        op: i64,
        sender: Participant,
        payload: Vec<u8>,
    },
    Closed {
        reason: String,
    },
}

/// Bounded queue owned by the session tick loop
pub struct InboundQueue {
    sender: Sender<InboundEvent>,
    receiver: Receiver<InboundEvent>,
    capacity: usize,
    /// Events rejected because the queue was full
    overflow: Arc<AtomicU64>,
}

impl InboundQueue {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self {
            sender,
            receiver,
            capacity,
            overflow: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Create a new sender handle for a transport subscription
    pub fn sender(&self) -> InboundSender {
        InboundSender {
            sender: self.sender.clone(),
            overflow: self.overflow.clone(),
        }
    }

    /// Drain all pending events for this tick
    pub fn drain(&self) -> Vec<InboundEvent> {
        self.receiver.try_iter().collect()
    }

    /// Drop everything queued; returns how many events were discarded
    pub fn discard(&self) -> usize {
        self.receiver.try_iter().count()
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        self.receiver.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Overflowed events since the last call
    pub fn take_overflow(&self) -> u64 {
        self.overflow.swap(0, Ordering::Relaxed)
    }
}

/// Clonable producer handle given to the transport
#[derive(Clone)]
pub struct InboundSender {
    sender: Sender<InboundEvent>,
    overflow: Arc<AtomicU64>,
}

impl InboundSender {
    /// Push an event (non-blocking)
    #[inline]
    pub fn try_send(&self, event: InboundEvent) -> Result<(), InboundError> {
        self.sender.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => {
                self.overflow.fetch_add(1, Ordering::Relaxed);
                InboundError::Full
            }
            TrySendError::Disconnected(_) => InboundError::Disconnected,
        })
    }
}

/// Inbound queue errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundError {
    /// Queue is full (the tick loop is falling behind)
    Full,
    /// Queue dropped (session torn down)
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::participant::{ParticipantId, TransportHandle};

    fn message(op: i64) -> InboundEvent {
        InboundEvent::Message {
            op,
            sender: Participant::new(ParticipantId::new("bob"), "Bob", TransportHandle::new("h1")),
            payload: vec![op as u8],
        }
    }

    fn op_of(event: &InboundEvent) -> i64 {
        match event {
            InboundEvent::Message { op, .. } => *op,
            _ => -1,
        }
    }

    #[test]
    fn test_drain_preserves_arrival_order() {
        let queue = InboundQueue::new(10);
        let sender = queue.sender();
        for op in [12, 7, 12] {
            sender.try_send(message(op)).unwrap();
        }
        assert_eq!(queue.pending_count(), 3);

        let drained: Vec<i64> = queue.drain().iter().map(op_of).collect();
        assert_eq!(drained, vec![12, 7, 12]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_backpressure() {
        let queue = InboundQueue::new(2);
        let sender = queue.sender();
        assert!(sender.try_send(message(1)).is_ok());
        assert!(sender.try_send(message(2)).is_ok());
        assert_eq!(sender.try_send(message(3)), Err(InboundError::Full));
        assert_eq!(queue.take_overflow(), 1);
        assert_eq!(queue.take_overflow(), 0);

        queue.drain();
        assert!(sender.try_send(message(3)).is_ok());
    }

    #[test]
    fn test_disconnected_after_queue_dropped() {
        let queue = InboundQueue::new(2);
        let sender = queue.sender();
        drop(queue);
        assert_eq!(
            sender.try_send(InboundEvent::Closed { reason: "bye".into() }),
            Err(InboundError::Disconnected)
        );
    }

    #[test]
    fn test_discard() {
        let queue = InboundQueue::new(8);
        let sender = queue.sender();
        sender.try_send(message(1)).unwrap();
        sender.try_send(message(2)).unwrap();
        assert_eq!(queue.discard(), 2);
        assert!(queue.is_empty());
        assert_eq!(queue.capacity(), 8);
    }
}
