//! Low-frequency continuous state of the two bows
//!
//! The sender side broadcasts POSITION_ROTATION on a fixed interval. The
//! receiver side interpolates position over a short window and keeps the
//! remote bow swinging between updates with a local oscillator that each new
//! sample corrects.

use crate::game::constants::bow;
use crate::net::protocol::{InputData, PositionRotationData};
use crate::session::rotation_gate::{GateState, RotationGate};
use crate::util::vec3::Vec3;

/// Fixed-interval broadcast timer
#[derive(Debug, Clone)]
pub struct StateSyncSender {
    interval: f32,
    elapsed: f32,
}

impl StateSyncSender {
    pub fn new(interval: f32) -> Self {
        Self {
            interval,
            elapsed: 0.0,
        }
    }

    /// Advance the timer; true when a broadcast is due
    pub fn tick(&mut self, dt: f32) -> bool {
        self.elapsed += dt;
        if self.elapsed >= self.interval {
            // Keep the remainder so the average rate matches the interval
            self.elapsed = (self.elapsed - self.interval).min(self.interval);
            return true;
        }
        false
    }
}

/// Decides when an INPUT sample is worth sending
#[derive(Debug, Clone, Default)]
pub struct InputTracker {
    last_sent: Option<InputData>,
}

impl InputTracker {
    /// True when the charge state flipped or the force moved noticeably
    pub fn should_send(&mut self, input: InputData) -> bool {
        let changed = match self.last_sent {
            None => true,
            Some(last) => {
                last.is_charging != input.is_charging
                    || (last.current_force - input.current_force).abs() > bow::FORCE_EPSILON
                    || last.fill_direction != input.fill_direction
            }
        };
        if changed {
            self.last_sent = Some(input);
        }
        changed
    }
}

/// Triangle-wave estimate of a bow's auto-rotation angle
#[derive(Debug, Clone, Copy)]
pub struct Oscillator {
    pub angle: f32,
    /// +1.0 rising, -1.0 falling
    pub direction: f32,
    speed: f32,
    min: f32,
    max: f32,
}

impl Oscillator {
    pub fn new(speed: f32, min: f32, max: f32) -> Self {
        Self {
            angle: 0.0,
            direction: 1.0,
            speed,
            min,
            max,
        }
    }

    pub fn advance(&mut self, dt: f32) {
        self.angle += self.direction * self.speed * dt;
        // Bounce off the limits; loop covers dt spanning more than one sweep
        loop {
            if self.angle > self.max {
                self.angle = self.max - (self.angle - self.max);
                self.direction = -1.0;
            } else if self.angle < self.min {
                self.angle = self.min + (self.min - self.angle);
                self.direction = 1.0;
            } else {
                break;
            }
        }
    }

    /// Move to a ground-truth sample
    pub fn correct(&mut self, angle: f32, direction: f32) {
        self.angle = angle.clamp(self.min, self.max);
        if direction != 0.0 {
            self.direction = direction.signum();
        }
    }
}

/// What happened to an incoming state sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateApply {
    /// Position and angle applied
    Applied,
    /// Position applied; angle ignored because the gate is held
    AngleDropped,
    /// The sample's held bit closed a gate whose STOP never arrived
    EnteredHeld,
}

/// Receiver-side copy of the opponent's bow. Mutated only by sync traffic.
#[derive(Debug, Clone)]
pub struct RemoteBow {
    position: Vec3,
    lerp_from: Vec3,
    lerp_to: Vec3,
    lerp_elapsed: f32,
    lerp_time: f32,
    oscillator: Oscillator,
    gate: RotationGate,
    last_sample_angle: Option<f32>,
    last_update: Option<f32>,
}

impl RemoteBow {
    pub fn new(lerp_time: f32, speed: f32, min: f32, max: f32) -> Self {
        Self {
            position: Vec3::ZERO,
            lerp_from: Vec3::ZERO,
            lerp_to: Vec3::ZERO,
            lerp_elapsed: 0.0,
            lerp_time,
            oscillator: Oscillator::new(speed, min, max),
            gate: RotationGate::new(),
            last_sample_angle: None,
            last_update: None,
        }
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    /// Current phase angle (degrees)
    pub fn angle(&self) -> f32 {
        self.oscillator.angle
    }

    pub fn direction(&self) -> f32 {
        self.oscillator.direction
    }

    pub fn gate_state(&self) -> GateState {
        self.gate.state()
    }

    /// Session clock time of the last accepted sample
    pub fn last_update(&self) -> Option<f32> {
        self.last_update
    }

    pub fn apply_state(&mut self, data: &PositionRotationData, seq: u64, now: f32) -> StateApply {
        if data.position.is_finite() {
            self.lerp_from = self.position;
            self.lerp_to = data.position;
            self.lerp_elapsed = 0.0;
            if self.last_update.is_none() || self.lerp_time <= 0.0 {
                self.position = data.position;
                self.lerp_from = data.position;
            }
        }
        self.last_update = Some(now);

        if self.gate.is_held() {
            return StateApply::AngleDropped;
        }
        if !data.auto_rotation_angle.is_finite() {
            return StateApply::AngleDropped;
        }

        let direction = match data.auto_rotation_direction {
            d if d > 0 => 1.0,
            d if d < 0 => -1.0,
            _ => self
                .last_sample_angle
                .map(|last| data.auto_rotation_angle - last)
                .filter(|delta| *delta != 0.0)
                .map(f32::signum)
                .unwrap_or(0.0),
        };
        self.last_sample_angle = Some(data.auto_rotation_angle);
        self.oscillator.correct(data.auto_rotation_angle, direction);

        if data.is_held && self.gate.is_current(seq) {
            self.gate.stop(seq);
            return StateApply::EnteredHeld;
        }
        StateApply::Applied
    }

    /// ROTATION_STOP: freeze at the sender's angle. Returns false if stale.
    pub fn stop(&mut self, angle: f32, seq: u64) -> bool {
        if !self.gate.is_current(seq) {
            return false;
        }
        let was_held = self.gate.is_held();
        self.gate.stop(seq);
        if !was_held && angle.is_finite() {
            self.oscillator.correct(angle, 0.0);
            self.last_sample_angle = Some(angle);
        }
        true
    }

    /// ROTATION_START: resume from the frozen angle and last direction
    pub fn start(&mut self, seq: u64) -> bool {
        self.gate.start(seq)
    }

    pub fn tick(&mut self, dt: f32) {
        if self.position != self.lerp_to {
            self.lerp_elapsed += dt;
            let t = if self.lerp_time > 0.0 {
                self.lerp_elapsed / self.lerp_time
            } else {
                1.0
            };
            self.position = self.lerp_from.lerp(self.lerp_to, t);
        }
        if !self.gate.is_held() {
            self.oscillator.advance(dt);
        }
    }
}

/// The local bow as last reported by gameplay
#[derive(Debug, Clone)]
pub struct LocalBow {
    pub position: Vec3,
    pub angle: f32,
    pub direction: i8,
    gate: RotationGate,
}

impl LocalBow {
    pub fn new() -> Self {
        Self {
            position: Vec3::ZERO,
            angle: 0.0,
            direction: 1,
            gate: RotationGate::new(),
        }
    }

    pub fn update(&mut self, position: Vec3, angle: f32) {
        if !self.gate.is_held() {
            let delta = angle - self.angle;
            if delta > 0.0 {
                self.direction = 1;
            } else if delta < 0.0 {
                self.direction = -1;
            }
            self.angle = angle;
        }
        self.position = position;
    }

    pub fn gate(&mut self) -> &mut RotationGate {
        &mut self.gate
    }

    pub fn is_held(&self) -> bool {
        self.gate.is_held()
    }

    pub fn snapshot(&self) -> PositionRotationData {
        PositionRotationData {
            position: self.position,
            rotation_z: self.angle + bow::ROTATION_OFFSET,
            auto_rotation_angle: self.angle,
            auto_rotation_direction: self.direction,
            is_held: self.gate.is_held(),
        }
    }
}

impl Default for LocalBow {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote() -> RemoteBow {
        RemoteBow::new(0.05, bow::AUTO_ROTATION_SPEED, bow::MAX_DOWN_ANGLE, bow::MAX_UP_ANGLE)
    }

    fn sample(angle: f32, direction: i8) -> PositionRotationData {
        PositionRotationData {
            position: Vec3::new(3.0, 1.0, 0.0),
            rotation_z: angle + bow::ROTATION_OFFSET,
            auto_rotation_angle: angle,
            auto_rotation_direction: direction,
            is_held: false,
        }
    }

    #[test]
    fn test_sender_interval() {
        let mut sender = StateSyncSender::new(0.1);
        let sends = (0..60).filter(|_| sender.tick(1.0 / 60.0)).count();
        assert!((9..=10).contains(&sends));
    }

    #[test]
    fn test_input_tracker() {
        let mut tracker = InputTracker::default();
        let mut input = InputData {
            is_charging: true,
            current_force: 5.0,
            fill_direction: 1,
        };
        assert!(tracker.should_send(input));
        input.current_force = 5.005;
        assert!(!tracker.should_send(input));
        input.current_force = 5.5;
        assert!(tracker.should_send(input));
        input.is_charging = false;
        assert!(tracker.should_send(input));
    }

    #[test]
    fn test_oscillator_bounces() {
        let mut osc = Oscillator::new(45.0, -90.0, 90.0);
        osc.correct(85.0, 1.0);
        osc.advance(0.2);
        assert!((osc.angle - 86.0).abs() < 1e-4);
        assert_eq!(osc.direction, -1.0);

        osc.correct(-85.0, -1.0);
        osc.advance(0.2);
        assert!((osc.angle + 86.0).abs() < 1e-4);
        assert_eq!(osc.direction, 1.0);
    }

    #[test]
    fn test_estimate_between_samples() {
        let mut bow = remote();
        bow.apply_state(&sample(10.0, 1), 1, 0.0);
        bow.tick(0.05);
        let mid = bow.angle();
        assert!(mid > 10.0 && mid < 14.0, "angle {}", mid);
        bow.tick(0.05);
        bow.apply_state(&sample(14.0, 1), 2, 0.1);
        assert_eq!(bow.angle(), 14.0);
    }

    #[test]
    fn test_direction_estimated_from_delta() {
        let mut bow = remote();
        bow.apply_state(&sample(20.0, 0), 1, 0.0);
        bow.apply_state(&sample(15.0, 0), 2, 0.1);
        assert_eq!(bow.direction(), -1.0);
    }

    #[test]
    fn test_held_gate_freezes_angle() {
        let mut bow = remote();
        bow.apply_state(&sample(30.0, 1), 1, 0.0);
        assert!(bow.stop(32.0, 2));

        for (i, angle) in [40.0, -70.0, 5.0].iter().enumerate() {
            let result = bow.apply_state(&sample(*angle, 1), 3 + i as u64, 0.1);
            assert_eq!(result, StateApply::AngleDropped);
            bow.tick(0.1);
            assert_eq!(bow.angle(), 32.0);
        }

        assert!(bow.start(10));
        assert_eq!(bow.angle(), 32.0);
        bow.tick(0.02);
        // Resumes from the frozen angle with the last direction
        assert!((bow.angle() - 32.9).abs() < 1e-3);
    }

    #[test]
    fn test_position_interpolates() {
        let mut bow = remote();
        bow.apply_state(&sample(0.0, 1), 1, 0.0);
        assert_eq!(bow.position(), Vec3::new(3.0, 1.0, 0.0));

        let mut next = sample(0.0, 1);
        next.position = Vec3::new(5.0, 1.0, 0.0);
        bow.apply_state(&next, 2, 0.1);
        bow.tick(0.025);
        assert!((bow.position().x - 4.0).abs() < 1e-4);
        bow.tick(0.05);
        assert_eq!(bow.position(), Vec3::new(5.0, 1.0, 0.0));
    }

    #[test]
    fn test_held_bit_recovers_lost_stop() {
        let mut bow = remote();
        let mut held = sample(12.0, 1);
        held.is_held = true;
        assert_eq!(bow.apply_state(&held, 4, 0.0), StateApply::EnteredHeld);
        assert_eq!(bow.gate_state(), GateState::Held);
        bow.tick(0.5);
        assert_eq!(bow.angle(), 12.0);
        // The late STOP with an older sequence is ignored
        assert!(!bow.stop(50.0, 3));
        assert_eq!(bow.angle(), 12.0);
    }

    #[test]
    fn test_local_bow_snapshot() {
        let mut local = LocalBow::new();
        local.update(Vec3::new(1.0, 0.0, 0.0), 20.0);
        local.update(Vec3::new(1.0, 0.0, 0.0), 18.0);
        local.gate().stop(1);
        local.update(Vec3::new(2.0, 0.0, 0.0), 50.0);
        let snapshot = local.snapshot();
        assert_eq!(snapshot.auto_rotation_angle, 18.0);
        assert_eq!(snapshot.auto_rotation_direction, -1);
        assert!(snapshot.is_held);
        assert_eq!(snapshot.position.x, 2.0);
    }
}
