/// Session timing constants (seconds unless noted)
pub mod timing {
    /// Local engine tick rate in Hz
    pub const TICK_RATE: u32 = 60;
    /// Interval between position/rotation broadcasts
    pub const STATE_SYNC_INTERVAL: f32 = 0.1;
    /// Window over which a received remote position is interpolated
    pub const POSITION_LERP_TIME: f32 = 0.05;
    /// Readiness rendezvous wait once both participants are known
    pub const READY_TIMEOUT: f32 = 15.0;
    /// Wait for an opponent to appear after joining a session
    pub const OPPONENT_WAIT_TIMEOUT: f32 = 20.0;
    /// Matchmaking / join timeout
    pub const MATCHMAKING_TIMEOUT: f32 = 60.0;
    /// Per-attempt socket connect timeout
    pub const CONNECT_TIMEOUT: f32 = 10.0;
    /// Delay between the theme-change score being reached and the authority rolling a new theme
    pub const THEME_CHANGE_DELAY: f32 = 1.0;
}

/// Transport retry policy
pub mod retry {
    /// Maximum connect attempts before surfacing a session failure
    pub const MAX_ATTEMPTS: u32 = 3;
    /// Base delay between attempts in milliseconds (doubled per attempt)
    pub const BASE_DELAY_MS: u64 = 2000;
    /// Upper bound on a single backoff delay in milliseconds
    pub const MAX_DELAY_MS: u64 = 16_000;
}

/// Bow auto-rotation (the oscillating aim of each player-controlled bow)
pub mod bow {
    /// Degrees per second
    pub const AUTO_ROTATION_SPEED: f32 = 45.0;
    pub const MAX_UP_ANGLE: f32 = 90.0;
    pub const MAX_DOWN_ANGLE: f32 = -90.0;
    /// Offset between the auto-rotation angle and the rendered z rotation
    pub const ROTATION_OFFSET: f32 = 90.0;
    /// Minimum shot force change that counts as a new input sample
    pub const FORCE_EPSILON: f32 = 0.01;
    pub const MIN_FORCE: f32 = 5.0;
    pub const MAX_FORCE: f32 = 20.0;
}

/// Scoring rules
pub mod score {
    pub const POINTS_TO_WIN: u32 = 10;
    /// Either player reaching this score triggers a theme change
    pub const THEME_CHANGE_SCORE: u32 = 5;
    pub const STARTING_HEARTS: f32 = 5.0;
    /// Each hit taken removes half a heart
    pub const DAMAGE_PER_HIT: f32 = 0.5;
}

/// Authority-scheduled world events
pub mod world {
    /// Number of selectable levels
    pub const LEVEL_COUNT: u32 = 4;
    /// Number of selectable themes
    pub const THEME_COUNT: u32 = 4;
    pub const MAX_WIND_STRENGTH: f32 = 5.0;
    /// How long a gust lasts before the authority broadcasts WIND_STOP
    pub const WIND_DURATION: f32 = 10.0;
    /// Calm period of gameplay before the next gust
    pub const WIND_INTERVAL: f32 = 8.0;
    /// Delay before the first power-up appears
    pub const INITIAL_POWER_UP_DELAY: f32 = 5.0;
    pub const MIN_POWER_UP_DELAY: f32 = 8.0;
    pub const MAX_POWER_UP_DELAY: f32 = 15.0;
    /// Time a spawned power-up stays collectible
    pub const POWER_UP_DISPLAY_DURATION: f32 = 13.0;
    pub const POWER_UP_SPAWN_POINTS: u32 = 3;
    pub const POWER_UP_KINDS: u32 = 4;
}

/// Session limits
pub mod net {
    /// A duel has exactly two participants
    pub const MAX_PARTICIPANTS: usize = 2;
    /// Capacity of the transport -> tick loop queue
    pub const INBOUND_CAPACITY: usize = 1024;
    /// Largest payload accepted from the transport
    pub const MAX_PAYLOAD_SIZE: usize = 4 * 1024;
}
