//! Wire protocol: opcodes, per-opcode payloads and the bincode codec.
//!
//! Every payload travels as a [`Tagged`] envelope carrying the sender's
//! logical player index and a per-sender sequence number. The opcode itself is
//! carried out-of-band by the transport, so each payload decodes on its own.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::game::match_state::GamePhase;
use crate::session::participant::{ParticipantId, PlayerIndex};
use crate::util::vec3::Vec3;

/// Operation codes. Stable integers: never renumber once deployed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i64)]
pub enum OpCode {
    GameStart = 1,
    GameState = 2,
    LevelChange = 3,
    ThemeChange = 4,
    Wind = 5,
    PowerUp = 6,
    HitTarget = 7,
    ArrowSpawn = 8,
    ArrowDespawn = 9,
    GameCompleted = 10,
    WindStop = 11,
    PositionRotation = 12,
    Input = 13,
    PlayerReady = 14,
    RotationStop = 15,
    RotationStart = 16,
}

impl OpCode {
    pub const ALL: [OpCode; 16] = [
        OpCode::GameStart,
        OpCode::GameState,
        OpCode::LevelChange,
        OpCode::ThemeChange,
        OpCode::Wind,
        OpCode::PowerUp,
        OpCode::HitTarget,
        OpCode::ArrowSpawn,
        OpCode::ArrowDespawn,
        OpCode::GameCompleted,
        OpCode::WindStop,
        OpCode::PositionRotation,
        OpCode::Input,
        OpCode::PlayerReady,
        OpCode::RotationStop,
        OpCode::RotationStart,
    ];

    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.code() == code)
    }

    /// World-state events only the session authority may originate
    pub fn is_authority_only(self) -> bool {
        matches!(
            self,
            OpCode::GameStart
                | OpCode::GameState
                | OpCode::LevelChange
                | OpCode::ThemeChange
                | OpCode::Wind
                | OpCode::WindStop
                | OpCode::PowerUp
                | OpCode::GameCompleted
        )
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}

/// Envelope around every payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tagged<T> {
    /// Logical player index of the sender
    pub origin: PlayerIndex,
    /// Per-sender monotonic sequence, shared by all opcodes
    pub seq: u64,
    pub body: T,
}

/// Identifies one shot for the lifetime of a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShotId {
    pub owner: PlayerIndex,
    pub shot_seq: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Empty;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GameStateData {
    pub phase: GamePhase,
}

/// Shared by LEVEL_CHANGE and THEME_CHANGE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelChangeData {
    pub current_level: u32,
    pub last_level: u32,
    pub current_theme: u32,
    pub last_theme: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindData {
    pub direction_right: bool,
    pub strength: f32,
    /// Seconds until the authority stops the gust
    pub duration: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerUpData {
    pub spawn_point_index: u32,
    pub data_index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitTargetData {
    pub shot: ShotId,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArrowSpawnData {
    pub shot: ShotId,
    pub position: Vec3,
    pub rotation_z: f32,
    pub shoot_force: f32,
    pub is_bomb: bool,
    pub current_force: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrowDespawnData {
    pub shot: ShotId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameCompletedData {
    pub winner: PlayerIndex,
}

/// Low-frequency continuous state of one bow
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionRotationData {
    pub position: Vec3,
    /// Rendered z rotation (auto-rotation angle plus offset)
    pub rotation_z: f32,
    /// Oscillation phase angle in degrees
    pub auto_rotation_angle: f32,
    /// +1 rising, -1 falling, 0 unknown
    pub auto_rotation_direction: i8,
    /// Redundant copy of the rotation gate, in case ROTATION_STOP was lost
    pub is_held: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InputData {
    pub is_charging: bool,
    pub current_force: f32,
    pub fill_direction: i8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerReadyData {
    pub participant: ParticipantId,
}

/// Shared by ROTATION_STOP and ROTATION_START
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RotationControlData {
    pub owner: PlayerIndex,
    pub angle: f32,
}

/// A decoded inbound event, one variant per opcode
#[derive(Debug, Clone, PartialEq)]
pub enum NetEvent {
    GameStart,
    GameState(GameStateData),
    LevelChange(LevelChangeData),
    ThemeChange(LevelChangeData),
    Wind(WindData),
    WindStop,
    PowerUp(PowerUpData),
    HitTarget(HitTargetData),
    ArrowSpawn(ArrowSpawnData),
    ArrowDespawn(ArrowDespawnData),
    GameCompleted(GameCompletedData),
    PositionRotation(PositionRotationData),
    Input(InputData),
    PlayerReady(PlayerReadyData),
    RotationStop(RotationControlData),
    RotationStart(RotationControlData),
}

impl NetEvent {
    pub fn op_code(&self) -> OpCode {
        match self {
            NetEvent::GameStart => OpCode::GameStart,
            NetEvent::GameState(_) => OpCode::GameState,
            NetEvent::LevelChange(_) => OpCode::LevelChange,
            NetEvent::ThemeChange(_) => OpCode::ThemeChange,
            NetEvent::Wind(_) => OpCode::Wind,
            NetEvent::WindStop => OpCode::WindStop,
            NetEvent::PowerUp(_) => OpCode::PowerUp,
            NetEvent::HitTarget(_) => OpCode::HitTarget,
            NetEvent::ArrowSpawn(_) => OpCode::ArrowSpawn,
            NetEvent::ArrowDespawn(_) => OpCode::ArrowDespawn,
            NetEvent::GameCompleted(_) => OpCode::GameCompleted,
            NetEvent::PositionRotation(_) => OpCode::PositionRotation,
            NetEvent::Input(_) => OpCode::Input,
            NetEvent::PlayerReady(_) => OpCode::PlayerReady,
            NetEvent::RotationStop(_) => OpCode::RotationStop,
            NetEvent::RotationStart(_) => OpCode::RotationStart,
        }
    }

    /// Logical owner of the entity this event is about, when it names one
    pub fn entity_owner(&self) -> Option<PlayerIndex> {
        match self {
            NetEvent::HitTarget(data) => Some(data.shot.owner),
            NetEvent::ArrowSpawn(data) => Some(data.shot.owner),
            NetEvent::ArrowDespawn(data) => Some(data.shot.owner),
            NetEvent::RotationStop(data) | NetEvent::RotationStart(data) => Some(data.owner),
            _ => None,
        }
    }

    /// Decode the payload of `op` into its typed envelope
    pub fn decode(op: OpCode, payload: &[u8]) -> Result<(PlayerIndex, u64, NetEvent), DecodeError> {
        fn open<T: for<'de> Deserialize<'de>>(payload: &[u8]) -> Result<Tagged<T>, DecodeError> {
            decode::<Tagged<T>>(payload)
        }

        macro_rules! tagged {
            ($ty:ty, $variant:expr) => {{
                let t = open::<$ty>(payload)?;
                (t.origin, t.seq, $variant(t.body))
            }};
        }

        let decoded = match op {
            OpCode::GameStart => {
                let t = open::<Empty>(payload)?;
                (t.origin, t.seq, NetEvent::GameStart)
            }
            OpCode::WindStop => {
                let t = open::<Empty>(payload)?;
                (t.origin, t.seq, NetEvent::WindStop)
            }
            OpCode::GameState => tagged!(GameStateData, NetEvent::GameState),
            OpCode::LevelChange => tagged!(LevelChangeData, NetEvent::LevelChange),
            OpCode::ThemeChange => tagged!(LevelChangeData, NetEvent::ThemeChange),
            OpCode::Wind => tagged!(WindData, NetEvent::Wind),
            OpCode::PowerUp => tagged!(PowerUpData, NetEvent::PowerUp),
            OpCode::HitTarget => tagged!(HitTargetData, NetEvent::HitTarget),
            OpCode::ArrowSpawn => tagged!(ArrowSpawnData, NetEvent::ArrowSpawn),
            OpCode::ArrowDespawn => tagged!(ArrowDespawnData, NetEvent::ArrowDespawn),
            OpCode::GameCompleted => tagged!(GameCompletedData, NetEvent::GameCompleted),
            OpCode::PositionRotation => tagged!(PositionRotationData, NetEvent::PositionRotation),
            OpCode::Input => tagged!(InputData, NetEvent::Input),
            OpCode::PlayerReady => tagged!(PlayerReadyData, NetEvent::PlayerReady),
            OpCode::RotationStop => tagged!(RotationControlData, NetEvent::RotationStop),
            OpCode::RotationStart => tagged!(RotationControlData, NetEvent::RotationStart),
        };
        Ok(decoded)
    }

    /// Encode this event as a tagged payload
    pub fn encode(&self, origin: PlayerIndex, seq: u64) -> Result<Vec<u8>, EncodeError> {
        fn wrap<T: Serialize>(origin: PlayerIndex, seq: u64, body: T) -> Result<Vec<u8>, EncodeError> {
            encode(&Tagged { origin, seq, body })
        }

        match self {
            NetEvent::GameStart | NetEvent::WindStop => wrap(origin, seq, Empty),
            NetEvent::GameState(data) => wrap(origin, seq, data),
            NetEvent::LevelChange(data) | NetEvent::ThemeChange(data) => wrap(origin, seq, data),
            NetEvent::Wind(data) => wrap(origin, seq, data),
            NetEvent::PowerUp(data) => wrap(origin, seq, data),
            NetEvent::HitTarget(data) => wrap(origin, seq, data),
            NetEvent::ArrowSpawn(data) => wrap(origin, seq, data),
            NetEvent::ArrowDespawn(data) => wrap(origin, seq, data),
            NetEvent::GameCompleted(data) => wrap(origin, seq, data),
            NetEvent::PositionRotation(data) => wrap(origin, seq, data),
            NetEvent::Input(data) => wrap(origin, seq, data),
            NetEvent::PlayerReady(data) => wrap(origin, seq, data),
            NetEvent::RotationStop(data) | NetEvent::RotationStart(data) => wrap(origin, seq, data),
        }
    }
}

/// Encode a message using bincode
/// Uses legacy config for fixed-size integers
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, EncodeError> {
    bincode::serde::encode_to_vec(message, bincode::config::legacy())
        .map_err(|e| EncodeError(e.to_string()))
}

/// Decode a message using bincode
/// Uses legacy config for fixed-size integers
pub fn decode<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, DecodeError> {
    bincode::serde::decode_from_slice(data, bincode::config::legacy())
        .map(|(msg, _)| msg)
        .map_err(|e| DecodeError(e.to_string()))
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("Encode error: {0}")]
pub struct EncodeError(String);

#[derive(Debug, Clone, thiserror::Error)]
#[error("Decode error: {0}")]
pub struct DecodeError(String);
