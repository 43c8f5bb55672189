//! Explicit per-session context
//!
//! Owns every piece of mutable session state. The transport only pushes into
//! the inbound queue; everything here is mutated from [`SessionContext::tick`]
//! or from the local action methods, both called on the tick loop.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::game::level::LevelSelection;
use crate::game::match_state::{GamePhase, MatchState};
use crate::game::scoreboard::ScoreUpdate;
use crate::game::world::{WorldAction, WorldScheduler};
use crate::metrics::Metrics;
use crate::net::inbound::{InboundEvent, InboundQueue, InboundSender};
use crate::net::protocol::{
    ArrowDespawnData, ArrowSpawnData, GameCompletedData, GameStateData, HitTargetData, InputData,
    NetEvent, OpCode, PlayerReadyData, PowerUpData, RotationControlData, ShotId, WindData,
};
use crate::net::transport::{SessionHandle, TransportError};
use crate::session::authority::{Authority, AuthorityResolver};
use crate::session::error::{ProtocolError, SessionError};
use crate::session::membership::{JoinOutcome, LeaveOutcome, MembershipTracker};
use crate::session::participant::{Participant, ParticipantId, PlayerIndex};
use crate::session::readiness::{BarrierOutcome, ReadinessBarrier, ReadyState};
use crate::session::relay::{Disposition, EventRelay, Outbound};
use crate::session::rotation_gate::GateState;
use crate::session::state_sync::{InputTracker, LocalBow, RemoteBow, StateApply, StateSyncSender};
use crate::util::vec3::Vec3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Joined, waiting for the opponent
    Forming,
    /// Both present, readiness rendezvous in progress
    Ready,
    Active,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    LocalLeave,
    PeerLost,
    NoOpponent,
    Cancelled,
    TransportClosed(String),
    /// A send kept failing after every retry
    SendFailed { attempts: u32, error: TransportError },
}

impl CloseReason {
    /// The user-facing failure behind this close, if any
    pub fn to_error(&self) -> Option<SessionError> {
        match self {
            CloseReason::LocalLeave => None,
            CloseReason::PeerLost => Some(SessionError::OpponentDisconnected),
            CloseReason::NoOpponent => Some(SessionError::NoOpponentFound),
            CloseReason::Cancelled => Some(SessionError::Cancelled),
            CloseReason::TransportClosed(reason) => Some(SessionError::Transport(
                TransportError::SocketClosed(reason.clone()),
            )),
            CloseReason::SendFailed { attempts, error } => Some(SessionError::ServerUnreachable {
                attempts: *attempts,
                source: error.clone(),
            }),
        }
    }
}

/// Everything gameplay needs to react to, in the order it happened
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    OpponentJoined(ParticipantId),
    OpponentLeft(ParticipantId),
    BothPresent(Authority),
    /// Ready -> Active. Fired exactly once per session.
    MatchStarted {
        authority: Authority,
        outcome: BarrierOutcome,
    },
    PeerLost(ParticipantId),
    FallbackToAi,
    Closed(CloseReason),
    GameStarted,
    PhaseChanged(GamePhase),
    LevelChanged(LevelSelection),
    ThemeChanged(LevelSelection),
    WindChanged(WindData),
    WindStopped,
    PowerUpSpawned(PowerUpData),
    PowerUpExpired(PowerUpData),
    ArrowSpawned(ArrowSpawnData),
    ArrowDespawned(ShotId),
    TargetHit {
        shot: ShotId,
        update: ScoreUpdate,
    },
    MatchCompleted {
        winner: PlayerIndex,
        phase: GamePhase,
    },
    RemoteInput(InputData),
    RotationHeld {
        owner: PlayerIndex,
        angle: f32,
    },
    RotationResumed {
        owner: PlayerIndex,
        angle: f32,
    },
}

pub struct SessionContext {
    config: SessionConfig,
    session_id: String,
    local: Participant,
    lifecycle: Lifecycle,
    close_reason: Option<CloseReason>,
    membership: MembershipTracker,
    authority: AuthorityResolver,
    readiness: ReadinessBarrier,
    relay: EventRelay,
    sync: StateSyncSender,
    inputs: InputTracker,
    local_bow: LocalBow,
    local_gate_seq: u64,
    remote_bow: RemoteBow,
    match_state: MatchState,
    world: WorldScheduler,
    inbound: InboundQueue,
    outbound: Vec<Outbound>,
    events: Vec<SessionEvent>,
    opponent_wait: Option<f32>,
    ready_declared: bool,
    clock: f32,
    next_shot_seq: u32,
    cancel: CancellationToken,
    metrics: Arc<Metrics>,
}

impl SessionContext {
    pub fn new(
        config: SessionConfig,
        handle: SessionHandle,
        inbound: InboundQueue,
        cancel: CancellationToken,
        metrics: Arc<Metrics>,
    ) -> Self {
        let local = handle.local;
        let local_id = local.id.clone();
        metrics.session_opened();
        info!("Session {} forming for {}", handle.session_id, local_id);

        Self {
            session_id: handle.session_id,
            lifecycle: Lifecycle::Forming,
            close_reason: None,
            membership: MembershipTracker::new(local.clone()),
            authority: AuthorityResolver::new(local_id.clone()),
            readiness: ReadinessBarrier::new(local_id.clone(), config.ready_timeout),
            relay: EventRelay::new(local_id, PlayerIndex::HOST),
            sync: StateSyncSender::new(config.state_sync_interval),
            inputs: InputTracker::default(),
            local_bow: LocalBow::new(),
            local_gate_seq: 0,
            remote_bow: RemoteBow::new(
                config.position_lerp_time,
                config.auto_rotation_speed,
                config.max_down_angle,
                config.max_up_angle,
            ),
            match_state: MatchState::new(PlayerIndex::HOST, config.points_to_win, config.theme_change_score),
            world: WorldScheduler::new(),
            inbound,
            outbound: Vec::new(),
            events: Vec::new(),
            opponent_wait: Some(config.opponent_wait_timeout),
            ready_declared: false,
            clock: 0.0,
            next_shot_seq: 1,
            cancel,
            metrics,
            local,
            config,
        }
    }

    /// Replace the world scheduler (seeded randomness for tests and replays)
    pub fn with_world(mut self, world: WorldScheduler) -> Self {
        self.world = world;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn local(&self) -> &Participant {
        &self.local
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn is_closed(&self) -> bool {
        self.lifecycle == Lifecycle::Closed
    }

    pub fn close_reason(&self) -> Option<&CloseReason> {
        self.close_reason.as_ref()
    }

    pub fn authority(&self) -> Authority {
        self.authority.current()
    }

    pub fn is_authority(&self) -> bool {
        self.authority.is_authority()
    }

    pub fn ready_state(&self) -> ReadyState {
        self.readiness.state()
    }

    pub fn participants(&self) -> Vec<ParticipantId> {
        self.membership.snapshot()
    }

    pub fn remote_bow(&self) -> &RemoteBow {
        &self.remote_bow
    }

    pub fn match_state(&self) -> &MatchState {
        &self.match_state
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Producer handle for the transport
    pub fn inbound_sender(&self) -> InboundSender {
        self.inbound.sender()
    }

    /// Messages produced since the last call, in send order
    pub fn take_outbound(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outbound)
    }

    /// Advance the session by `dt` seconds: drain inbound traffic, run timers,
    /// and return what happened.
    pub fn tick(&mut self, dt: f32) -> Vec<SessionEvent> {
        if self.cancel.is_cancelled() {
            self.close(CloseReason::Cancelled);
        }

        let overflow = self.inbound.take_overflow();
        if overflow > 0 {
            Metrics::add(&self.metrics.inbound_overflow, overflow);
            warn!("Inbound queue overflowed, {} events lost in session {}", overflow, self.session_id);
        }

        if self.lifecycle != Lifecycle::Closed {
            self.clock += dt;
            for event in self.inbound.drain() {
                if self.lifecycle == Lifecycle::Closed {
                    debug!("Discarding inbound event after close");
                    continue;
                }
                self.handle_inbound(event);
            }
        }

        if self.lifecycle == Lifecycle::Closed {
            let dropped = self.inbound.discard();
            if dropped > 0 {
                debug!("Discarded {} inbound events for closed session {}", dropped, self.session_id);
            }
        } else {
            self.advance_timers(dt);
        }

        std::mem::take(&mut self.events)
    }

    // --- local actions ---

    /// Gameplay is initialized and listening. Sends PLAYER_READY as soon as
    /// the opponent is present.
    pub fn declare_ready(&mut self) {
        self.ready_declared = true;
        if self.lifecycle == Lifecycle::Ready {
            self.send_ready();
        }
    }

    pub fn leave(&mut self) {
        self.close(CloseReason::LocalLeave);
    }

    /// The transport gave up on an outbound message
    pub fn transport_failed(&mut self, attempts: u32, error: TransportError) {
        error!(
            "Session {} lost its transport after {} send attempts: {}",
            self.session_id, attempts, error
        );
        self.outbound.clear();
        self.close(CloseReason::SendFailed { attempts, error });
    }

    pub fn update_local_bow(&mut self, position: Vec3, angle: f32) {
        self.local_bow.update(position, angle);
    }

    /// Send INPUT when the charge state or force changed enough
    pub fn update_local_input(&mut self, input: InputData) -> Result<bool, SessionError> {
        self.require_active()?;
        if !self.inputs.should_send(input) {
            return Ok(false);
        }
        self.broadcast(NetEvent::Input(input))?;
        Ok(true)
    }

    pub fn fire_arrow(
        &mut self,
        position: Vec3,
        rotation_z: f32,
        shoot_force: f32,
        is_bomb: bool,
    ) -> Result<ShotId, SessionError> {
        self.require_active()?;
        let shot = ShotId {
            owner: self.authority.current().local_index,
            shot_seq: self.next_shot_seq,
        };
        self.next_shot_seq += 1;
        self.broadcast(NetEvent::ArrowSpawn(ArrowSpawnData {
            shot,
            position,
            rotation_z,
            shoot_force,
            is_bomb,
            current_force: shoot_force,
        }))?;
        Ok(shot)
    }

    pub fn despawn_arrow(&mut self, shot: ShotId) -> Result<(), SessionError> {
        self.require_active()?;
        self.broadcast(NetEvent::ArrowDespawn(ArrowDespawnData { shot }))
    }

    /// One of our arrows hit. Scores locally and tells the opponent; a shot
    /// that already scored is ignored.
    pub fn report_hit(&mut self, shot: ShotId) -> Result<Option<ScoreUpdate>, SessionError> {
        self.require_active()?;
        let update = self.apply_hit(shot);
        if update.is_some() {
            self.broadcast(NetEvent::HitTarget(HitTargetData { shot }))?;
        }
        Ok(update)
    }

    /// Freeze the local bow's auto-rotation (player started charging)
    pub fn hold_rotation(&mut self) -> Result<(), SessionError> {
        self.require_active()?;
        self.local_gate_seq += 1;
        if !self.local_bow.gate().stop(self.local_gate_seq) {
            return Ok(());
        }
        let data = RotationControlData {
            owner: self.authority.current().local_index,
            angle: self.local_bow.angle,
        };
        self.broadcast(NetEvent::RotationStop(data))
    }

    pub fn release_rotation(&mut self) -> Result<(), SessionError> {
        self.require_active()?;
        self.local_gate_seq += 1;
        if !self.local_bow.gate().start(self.local_gate_seq) {
            return Ok(());
        }
        let data = RotationControlData {
            owner: self.authority.current().local_index,
            angle: self.local_bow.angle,
        };
        self.broadcast(NetEvent::RotationStart(data))
    }

    // --- authority-only actions ---

    pub fn change_level(&mut self) -> Result<LevelSelection, SessionError> {
        self.require_authority()?;
        let selection = self.world.roll_level();
        self.publish_level(selection)?;
        Ok(selection)
    }

    /// Broadcast an explicit level/theme pair
    pub fn set_level(&mut self, level: u32, theme: u32) -> Result<LevelSelection, SessionError> {
        self.require_authority()?;
        let selection = self.world.set_level(level, theme);
        self.publish_level(selection)?;
        Ok(selection)
    }

    pub fn change_theme(&mut self) -> Result<LevelSelection, SessionError> {
        self.require_authority()?;
        if self.world.reset_for_level() && self.match_state.stop_wind() {
            self.broadcast(NetEvent::WindStop)?;
            self.events.push(SessionEvent::WindStopped);
        }
        let selection = self.world.roll_level();
        self.match_state.apply_level(selection);
        self.broadcast(NetEvent::ThemeChange(selection.to_wire()))?;
        self.events.push(SessionEvent::ThemeChanged(selection));
        Ok(selection)
    }

    pub fn start_wind(&mut self) -> Result<WindData, SessionError> {
        self.require_authority()?;
        let wind = self.world.roll_wind();
        self.match_state.apply_wind(wind);
        self.broadcast(NetEvent::Wind(wind))?;
        self.events.push(SessionEvent::WindChanged(wind));
        Ok(wind)
    }

    pub fn spawn_power_up(&mut self) -> Result<PowerUpData, SessionError> {
        self.require_authority()?;
        let data = self.world.roll_power_up();
        if self.match_state.spawn_power_up(data) {
            self.broadcast(NetEvent::PowerUp(data))?;
            self.events.push(SessionEvent::PowerUpSpawned(data));
        }
        Ok(data)
    }

    pub fn set_phase(&mut self, phase: GamePhase) -> Result<(), SessionError> {
        self.require_authority()?;
        self.match_state.set_phase(phase);
        self.broadcast(NetEvent::GameState(GameStateData { phase }))?;
        self.events.push(SessionEvent::PhaseChanged(self.match_state.phase()));
        Ok(())
    }

    // --- internals ---

    fn require_active(&self) -> Result<(), SessionError> {
        match self.lifecycle {
            Lifecycle::Active => Ok(()),
            Lifecycle::Closed => Err(SessionError::SessionClosed),
            Lifecycle::Forming | Lifecycle::Ready => Err(SessionError::NotActive),
        }
    }

    fn require_authority(&self) -> Result<(), SessionError> {
        self.require_active()?;
        if !self.authority.is_authority() {
            return Err(SessionError::NotAuthority);
        }
        Ok(())
    }

    fn broadcast(&mut self, event: NetEvent) -> Result<(), SessionError> {
        let out = self.relay.send(&event)?;
        Metrics::incr(&self.metrics.messages_sent);
        Metrics::add(&self.metrics.bytes_sent, out.payload.len() as u64);
        debug!("Queued {} ({} bytes)", out.op, out.payload.len());
        self.outbound.push(out);
        Ok(())
    }

    /// Broadcast from a timer, where there is no caller to return an error to
    fn emit(&mut self, event: NetEvent) {
        let op = event.op_code();
        if let Err(e) = self.broadcast(event) {
            error!("Failed to queue {}: {}", op, e);
        }
    }

    fn publish_level(&mut self, selection: LevelSelection) -> Result<(), SessionError> {
        // Receivers drop wind and power-up on any level change
        self.world.reset_for_level();
        self.match_state.apply_level(selection);
        self.broadcast(NetEvent::LevelChange(selection.to_wire()))?;
        self.events.push(SessionEvent::LevelChanged(selection));
        Ok(())
    }

    fn protocol_fault(&self, what: &str, sender: &ParticipantId, err: ProtocolError) {
        Metrics::incr(&self.metrics.protocol_faults);
        warn!("Dropped {} from {}: {}", what, sender, err);
    }

    fn handle_inbound(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::Presence { joins, leaves } => {
                for participant in leaves {
                    self.on_leave(participant);
                    if self.lifecycle == Lifecycle::Closed {
                        return;
                    }
                }
                for participant in joins {
                    self.on_join(participant);
                }
            }
            InboundEvent::Message { op, sender, payload } => self.on_message(op, sender, payload),
            InboundEvent::Closed { reason } => {
                warn!("Transport closed session {}: {}", self.session_id, reason);
                self.close(CloseReason::TransportClosed(reason));
            }
        }
    }

    fn on_join(&mut self, participant: Participant) {
        let id = participant.id.clone();
        match self.membership.on_join(participant) {
            Err(e) => self.protocol_fault("presence", &id, e),
            Ok(JoinOutcome::Duplicate) => debug!("Duplicate join for {}", id),
            Ok(JoinOutcome::Joined) => {
                debug!("{} joined session {}", id, self.session_id);
                self.reresolve_authority();
            }
            Ok(JoinOutcome::BothPresent) => self.on_both_present(id),
        }
    }

    fn on_both_present(&mut self, remote: ParticipantId) {
        info!("Opponent {} joined session {}", remote, self.session_id);
        self.opponent_wait = None;
        self.reresolve_authority();
        if self.lifecycle == Lifecycle::Forming {
            self.lifecycle = Lifecycle::Ready;
        }
        self.events.push(SessionEvent::OpponentJoined(remote.clone()));
        self.events.push(SessionEvent::BothPresent(self.authority.current()));

        if let Some(outcome) = self.readiness.on_both_present(remote) {
            self.activate(outcome);
        } else if self.ready_declared {
            self.send_ready();
        }
    }

    fn on_leave(&mut self, participant: Participant) {
        // Leaving after the result is in is a normal exit
        let in_play = self.lifecycle == Lifecycle::Active && !self.match_state.phase().is_finished();
        match self.membership.on_leave(&participant.id, in_play) {
            LeaveOutcome::Ignored => debug!("Ignoring leave for {}", participant.id),
            LeaveOutcome::Left => {
                info!("{} left session {} before the match", participant.id, self.session_id);
                if self.lifecycle == Lifecycle::Ready {
                    self.lifecycle = Lifecycle::Forming;
                    self.readiness.reset();
                    self.relay.forget_peer();
                    self.remote_bow = RemoteBow::new(
                        self.config.position_lerp_time,
                        self.config.auto_rotation_speed,
                        self.config.max_down_angle,
                        self.config.max_up_angle,
                    );
                    self.opponent_wait = Some(self.config.opponent_wait_timeout);
                }
                self.reresolve_authority();
                self.events.push(SessionEvent::OpponentLeft(participant.id));
            }
            LeaveOutcome::PeerLost(id) => {
                warn!("Opponent {} lost mid-match in session {}", id, self.session_id);
                Metrics::incr(&self.metrics.peers_lost);
                self.events.push(SessionEvent::PeerLost(id));
                self.close(CloseReason::PeerLost);
            }
        }
    }

    fn reresolve_authority(&mut self) {
        if let Some(authority) = self.authority.update(&self.membership.snapshot()) {
            debug!(
                "Authority now {} (local index {})",
                authority.is_authority, authority.local_index
            );
            self.relay.set_origin(authority.local_index);
            self.match_state.set_local(authority.local_index);
        }
    }

    fn send_ready(&mut self) {
        let (send, outcome) = self.readiness.send_ready();
        if send {
            self.emit(NetEvent::PlayerReady(PlayerReadyData {
                participant: self.local.id.clone(),
            }));
        }
        if let Some(outcome) = outcome {
            self.activate(outcome);
        }
    }

    fn activate(&mut self, outcome: BarrierOutcome) {
        if self.lifecycle != Lifecycle::Ready {
            return;
        }
        let authority = self.authority.freeze();
        self.relay.bind_index(authority.local_index);
        self.match_state.set_local(authority.local_index);
        self.lifecycle = Lifecycle::Active;

        match outcome {
            BarrierOutcome::Rendezvous => info!(
                "Session {} active, authority={} index={}",
                self.session_id, authority.is_authority, authority.local_index
            ),
            BarrierOutcome::TimedOut => {
                Metrics::incr(&self.metrics.ready_timeouts);
                warn!(
                    "Session {} active without full rendezvous, authority={}",
                    self.session_id, authority.is_authority
                );
            }
        }
        self.events.push(SessionEvent::MatchStarted { authority, outcome });

        if authority.is_authority {
            self.begin_match();
        }
    }

    /// Authority kicks off gameplay and picks the first level
    fn begin_match(&mut self) {
        self.match_state.start();
        self.emit(NetEvent::GameStart);
        self.emit(NetEvent::GameState(GameStateData {
            phase: GamePhase::Gameplay,
        }));
        self.events.push(SessionEvent::GameStarted);
        self.events.push(SessionEvent::PhaseChanged(GamePhase::Gameplay));

        let selection = self.world.roll_level();
        if let Err(e) = self.publish_level(selection) {
            error!("Failed to publish first level: {}", e);
        }
    }

    fn on_message(&mut self, op: i64, sender: Participant, payload: Vec<u8>) {
        Metrics::incr(&self.metrics.messages_received);
        Metrics::add(&self.metrics.bytes_received, payload.len() as u64);

        // A peer's PLAYER_READY can overtake its presence event; the barrier
        // keeps it until the join lands
        let early_ready = op == OpCode::PlayerReady.code();
        if sender.id != self.local.id && !early_ready && !self.membership.contains(&sender.id) {
            self.protocol_fault("message", &sender.id, ProtocolError::UnknownSender(sender.id.clone()));
            return;
        }

        let disposition = match self.relay.receive(op, &sender.id, &payload) {
            Ok(disposition) => disposition,
            Err(e) => {
                self.protocol_fault(&format!("opcode {}", op), &sender.id, e);
                return;
            }
        };

        match disposition {
            Disposition::Accepted { origin, seq, event } => self.dispatch(&sender, origin, seq, event),
            Disposition::Loopback | Disposition::SelfOrigin => {
                Metrics::incr(&self.metrics.self_origin_suppressed);
                debug!("Suppressed self-originated opcode {} via {}", op, sender.id);
            }
            Disposition::Duplicate => {
                Metrics::incr(&self.metrics.duplicates_dropped);
                debug!("Dropped duplicate opcode {} from {}", op, sender.id);
            }
        }
    }

    fn dispatch(&mut self, sender: &Participant, origin: PlayerIndex, seq: u64, event: NetEvent) {
        if let NetEvent::PlayerReady(data) = &event {
            if data.participant != sender.id {
                warn!("PLAYER_READY for {} sent by {}, dropped", data.participant, sender.id);
                Metrics::incr(&self.metrics.protocol_faults);
                return;
            }
            if let Some(outcome) = self.readiness.on_ready_received(data.participant.clone()) {
                self.activate(outcome);
            }
            return;
        }

        if self.lifecycle != Lifecycle::Active {
            // The authority started without our rendezvous completing: follow it
            let authority_started = matches!(event, NetEvent::GameStart)
                && self.lifecycle == Lifecycle::Ready
                && !self.authority.is_authority();
            if !authority_started {
                debug!("Dropping {} from {} before match start", event.op_code(), sender.id);
                return;
            }
            let outcome = self
                .readiness
                .on_ready_received(sender.id.clone())
                .or_else(|| self.readiness.give_up());
            if let Some(outcome) = outcome {
                self.activate(outcome);
            }
        }

        match event {
            NetEvent::PlayerReady(_) => {}
            NetEvent::GameStart => {
                self.match_state.start();
                self.events.push(SessionEvent::GameStarted);
            }
            NetEvent::GameState(data) => {
                self.match_state.set_phase(data.phase);
                self.events.push(SessionEvent::PhaseChanged(self.match_state.phase()));
            }
            NetEvent::LevelChange(data) => {
                let selection = LevelSelection::from_wire(&data);
                self.match_state.apply_level(selection);
                self.events.push(SessionEvent::LevelChanged(selection));
            }
            NetEvent::ThemeChange(data) => {
                let selection = LevelSelection::from_wire(&data);
                self.match_state.apply_level(selection);
                self.events.push(SessionEvent::ThemeChanged(selection));
            }
            NetEvent::Wind(data) => {
                self.match_state.apply_wind(data);
                self.events.push(SessionEvent::WindChanged(data));
            }
            NetEvent::WindStop => {
                if self.match_state.stop_wind() {
                    self.events.push(SessionEvent::WindStopped);
                }
            }
            NetEvent::PowerUp(data) => {
                if self.match_state.spawn_power_up(data) {
                    self.events.push(SessionEvent::PowerUpSpawned(data));
                }
            }
            NetEvent::HitTarget(data) => {
                self.apply_hit(data.shot);
            }
            NetEvent::ArrowSpawn(data) => self.events.push(SessionEvent::ArrowSpawned(data)),
            NetEvent::ArrowDespawn(data) => self.events.push(SessionEvent::ArrowDespawned(data.shot)),
            NetEvent::GameCompleted(data) => {
                if self.match_state.phase().is_finished() {
                    return;
                }
                let phase = self.match_state.complete(data.winner);
                info!("Match in session {} completed, winner {}", self.session_id, data.winner);
                self.events.push(SessionEvent::MatchCompleted {
                    winner: data.winner,
                    phase,
                });
            }
            NetEvent::PositionRotation(data) => {
                let expected = self.membership.remote().map(|p| &p.id);
                if expected != Some(&sender.id) {
                    self.protocol_fault(
                        "state sync",
                        &sender.id,
                        ProtocolError::UnknownSender(sender.id.clone()),
                    );
                    return;
                }
                match self.remote_bow.apply_state(&data, seq, self.clock) {
                    StateApply::Applied => {}
                    StateApply::AngleDropped => {
                        Metrics::incr(&self.metrics.held_angle_updates_dropped);
                    }
                    StateApply::EnteredHeld => {
                        debug!("State sync closed the rotation gate for {}", origin);
                        self.events.push(SessionEvent::RotationHeld {
                            owner: origin,
                            angle: self.remote_bow.angle(),
                        });
                    }
                }
            }
            NetEvent::Input(data) => self.events.push(SessionEvent::RemoteInput(data)),
            NetEvent::RotationStop(data) => {
                let was_held = self.remote_bow.gate_state() == GateState::Held;
                if self.remote_bow.stop(data.angle, seq) && !was_held {
                    self.events.push(SessionEvent::RotationHeld {
                        owner: data.owner,
                        angle: self.remote_bow.angle(),
                    });
                }
            }
            NetEvent::RotationStart(data) => {
                if self.remote_bow.start(seq) {
                    self.events.push(SessionEvent::RotationResumed {
                        owner: data.owner,
                        angle: self.remote_bow.angle(),
                    });
                }
            }
        }
    }

    /// Count a hit from either side and run the authority's follow-ups
    fn apply_hit(&mut self, shot: ShotId) -> Option<ScoreUpdate> {
        let Some(update) = self.match_state.record_hit(shot) else {
            Metrics::incr(&self.metrics.duplicates_dropped);
            debug!("Hit for {:?} already counted", shot);
            return None;
        };
        self.events.push(SessionEvent::TargetHit { shot, update });

        let is_authority = self.authority.is_authority();
        if update.theme_change && update.winner.is_none() {
            self.events.push(SessionEvent::PhaseChanged(GamePhase::WaitForLevelChange));
            if is_authority {
                self.world.schedule_theme_change();
            }
        }
        if let Some(winner) = update.winner {
            if is_authority {
                self.emit(NetEvent::GameCompleted(GameCompletedData { winner }));
                let phase = self.match_state.complete(winner);
                info!("Match in session {} completed, winner {}", self.session_id, winner);
                self.events.push(SessionEvent::MatchCompleted { winner, phase });
            }
        }
        Some(update)
    }

    fn advance_timers(&mut self, dt: f32) {
        match self.lifecycle {
            Lifecycle::Forming => {
                let Some(remaining) = self.opponent_wait.as_mut() else {
                    return;
                };
                *remaining -= dt;
                if *remaining <= 0.0 {
                    self.opponent_wait = None;
                    warn!("No opponent joined session {}, falling back to AI", self.session_id);
                    Metrics::incr(&self.metrics.ai_fallbacks);
                    self.events.push(SessionEvent::FallbackToAi);
                    self.close(CloseReason::NoOpponent);
                }
            }
            Lifecycle::Ready => {
                if let Some(outcome) = self.readiness.tick(dt) {
                    self.activate(outcome);
                }
            }
            Lifecycle::Active => {
                self.remote_bow.tick(dt);
                if self.sync.tick(dt) {
                    let snapshot = self.local_bow.snapshot();
                    self.emit(NetEvent::PositionRotation(snapshot));
                }
                if let Some(expired) = self.match_state.tick(dt) {
                    self.events.push(SessionEvent::PowerUpExpired(expired));
                }
                let phase = self.match_state.phase();
                if self.authority.is_authority() && !phase.is_finished() {
                    for action in self.world.tick(dt, phase) {
                        self.apply_world_action(action);
                    }
                }
            }
            Lifecycle::Closed => {}
        }
    }

    fn apply_world_action(&mut self, action: WorldAction) {
        match action {
            WorldAction::Wind(wind) => {
                self.match_state.apply_wind(wind);
                self.emit(NetEvent::Wind(wind));
                self.events.push(SessionEvent::WindChanged(wind));
            }
            WorldAction::WindStop => {
                self.match_state.stop_wind();
                self.emit(NetEvent::WindStop);
                self.events.push(SessionEvent::WindStopped);
            }
            WorldAction::PowerUp(data) => {
                if self.match_state.spawn_power_up(data) {
                    self.emit(NetEvent::PowerUp(data));
                    self.events.push(SessionEvent::PowerUpSpawned(data));
                }
            }
            WorldAction::ThemeChange(selection) => {
                self.match_state.apply_level(selection);
                self.emit(NetEvent::ThemeChange(selection.to_wire()));
                self.events.push(SessionEvent::ThemeChanged(selection));
            }
        }
    }

    fn close(&mut self, reason: CloseReason) {
        if self.lifecycle == Lifecycle::Closed {
            return;
        }
        info!("Session {} closed: {:?}", self.session_id, reason);
        self.lifecycle = Lifecycle::Closed;
        self.opponent_wait = None;
        self.close_reason = Some(reason.clone());
        self.metrics.session_closed();
        self.events.push(SessionEvent::Closed(reason));
    }
}
