//! Two-phase readiness rendezvous
//!
//! Both participants announce PLAYER_READY once they are listening. Gameplay
//! starts when the ReadySet holds both ids, or when the wait armed at
//! both-present expires (liveness wins over a lost ready signal).

use std::collections::BTreeSet;

use crate::session::participant::ParticipantId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    NotReady,
    SelfReady,
    BothReady,
}

/// How the barrier completed. Reported exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierOutcome {
    Rendezvous,
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct ReadinessBarrier {
    local: ParticipantId,
    remote: Option<ParticipantId>,
    ready_set: BTreeSet<ParticipantId>,
    sent: bool,
    timeout: f32,
    /// Countdown, armed once both participants are known
    remaining: Option<f32>,
    outcome: Option<BarrierOutcome>,
}

impl ReadinessBarrier {
    pub fn new(local: ParticipantId, timeout: f32) -> Self {
        Self {
            local,
            remote: None,
            ready_set: BTreeSet::new(),
            sent: false,
            timeout,
            remaining: None,
            outcome: None,
        }
    }

    pub fn state(&self) -> ReadyState {
        if self.both_in_set() {
            ReadyState::BothReady
        } else if self.sent {
            ReadyState::SelfReady
        } else {
            ReadyState::NotReady
        }
    }

    pub fn is_both_ready(&self) -> bool {
        self.state() == ReadyState::BothReady
    }

    pub fn outcome(&self) -> Option<BarrierOutcome> {
        self.outcome
    }

    /// Mark the local ready as sent. Returns false if it already was, in which
    /// case nothing must go on the wire.
    pub fn send_ready(&mut self) -> (bool, Option<BarrierOutcome>) {
        if self.sent {
            return (false, None);
        }
        self.sent = true;
        self.ready_set.insert(self.local.clone());
        (true, self.check())
    }

    pub fn on_ready_received(&mut self, id: ParticipantId) -> Option<BarrierOutcome> {
        if !self.ready_set.insert(id) {
            return None;
        }
        self.check()
    }

    /// Both participants are present: remember the opponent and arm the wait
    pub fn on_both_present(&mut self, remote: ParticipantId) -> Option<BarrierOutcome> {
        self.remote = Some(remote);
        if self.remaining.is_none() && self.outcome.is_none() {
            self.remaining = Some(self.timeout);
        }
        self.check()
    }

    pub fn tick(&mut self, dt: f32) -> Option<BarrierOutcome> {
        if self.outcome.is_some() {
            return None;
        }
        let remaining = self.remaining.as_mut()?;
        *remaining -= dt;
        if *remaining <= 0.0 {
            self.remaining = None;
            self.outcome = Some(BarrierOutcome::TimedOut);
            return self.outcome;
        }
        None
    }

    /// Stop waiting because the authority already started the match
    pub fn give_up(&mut self) -> Option<BarrierOutcome> {
        if self.outcome.is_some() {
            return None;
        }
        self.remaining = None;
        self.outcome = Some(BarrierOutcome::TimedOut);
        self.outcome
    }

    /// Opponent left before the match started
    pub fn reset(&mut self) {
        self.remote = None;
        self.ready_set.clear();
        self.sent = false;
        self.remaining = None;
        self.outcome = None;
    }

    fn both_in_set(&self) -> bool {
        match &self.remote {
            Some(remote) => self.ready_set.contains(&self.local) && self.ready_set.contains(remote),
            None => false,
        }
    }

    fn check(&mut self) -> Option<BarrierOutcome> {
        if self.outcome.is_none() && self.both_in_set() {
            self.remaining = None;
            self.outcome = Some(BarrierOutcome::Rendezvous);
            return self.outcome;
        }
        None
    }
}
