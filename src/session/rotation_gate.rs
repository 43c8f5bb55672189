//! Rotation gate: whether a bow's auto-rotation is running or held
//!
//! STOP and START are best-effort signals on different opcodes, so they can
//! overtake each other. Each transition carries the sender's sequence number;
//! a transition older than the last one applied is ignored.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GateState {
    #[default]
    Rotating,
    Held,
}

#[derive(Debug, Clone, Default)]
pub struct RotationGate {
    state: GateState,
    last_seq: Option<u64>,
}

impl RotationGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn is_held(&self) -> bool {
        self.state == GateState::Held
    }

    /// Whether a message with this sequence is newer than the last transition
    pub fn is_current(&self, seq: u64) -> bool {
        self.last_seq.map_or(true, |last| seq > last)
    }

    /// Rotating -> Held. Returns true if the state changed.
    pub fn stop(&mut self, seq: u64) -> bool {
        self.transition(GateState::Held, seq)
    }

    /// Held -> Rotating. A START with no matching STOP is a no-op.
    pub fn start(&mut self, seq: u64) -> bool {
        self.transition(GateState::Rotating, seq)
    }

    fn transition(&mut self, next: GateState, seq: u64) -> bool {
        if !self.is_current(seq) {
            return false;
        }
        self.last_seq = Some(seq);
        let changed = self.state != next;
        self.state = next;
        changed
    }
}
