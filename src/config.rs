use std::time::Duration;

use crate::game::constants::{bow, net, retry, score, timing};

/// Session engine configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Local tick rate in Hz
    pub tick_rate: u32,
    /// Seconds between position/rotation broadcasts
    pub state_sync_interval: f32,
    /// Seconds over which remote positions are interpolated
    pub position_lerp_time: f32,
    /// Readiness rendezvous timeout (seconds) once both participants are known
    pub ready_timeout: f32,
    /// Seconds to wait for an opponent before falling back to an AI match
    pub opponent_wait_timeout: f32,
    /// Matchmaking / join timeout
    pub matchmaking_timeout: Duration,
    /// Per-attempt connect timeout
    pub connect_timeout: Duration,
    /// Maximum connect attempts
    pub max_retry_attempts: u32,
    /// Base backoff between connect attempts
    pub retry_delay: Duration,
    /// Capacity of the inbound queue between transport and tick loop
    pub inbound_capacity: usize,
    /// Points needed to win the duel
    pub points_to_win: u32,
    /// Score at which the authority rolls a new theme
    pub theme_change_score: u32,
    /// Remote bow oscillation speed (degrees per second)
    pub auto_rotation_speed: f32,
    pub max_up_angle: f32,
    pub max_down_angle: f32,
    /// Port for the Prometheus endpoint (binary only)
    pub metrics_port: Option<u16>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_rate: timing::TICK_RATE,
            state_sync_interval: timing::STATE_SYNC_INTERVAL,
            position_lerp_time: timing::POSITION_LERP_TIME,
            ready_timeout: timing::READY_TIMEOUT,
            opponent_wait_timeout: timing::OPPONENT_WAIT_TIMEOUT,
            matchmaking_timeout: Duration::from_secs_f32(timing::MATCHMAKING_TIMEOUT),
            connect_timeout: Duration::from_secs_f32(timing::CONNECT_TIMEOUT),
            max_retry_attempts: retry::MAX_ATTEMPTS,
            retry_delay: Duration::from_millis(retry::BASE_DELAY_MS),
            inbound_capacity: net::INBOUND_CAPACITY,
            points_to_win: score::POINTS_TO_WIN,
            theme_change_score: score::THEME_CHANGE_SCORE,
            auto_rotation_speed: bow::AUTO_ROTATION_SPEED,
            max_up_angle: bow::MAX_UP_ANGLE,
            max_down_angle: bow::MAX_DOWN_ANGLE,
            metrics_port: None,
        }
    }
}

/// Parse an environment variable, warning and returning None on bad input
fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Invalid {} '{}', using default", key, raw);
            None
        }
    }
}

impl SessionConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        if let Some(ms) = env_parse::<u64>("STATE_SYNC_INTERVAL_MS") {
            if (10..=1000).contains(&ms) {
                config.state_sync_interval = ms as f32 / 1000.0;
            } else {
                tracing::warn!("STATE_SYNC_INTERVAL_MS must be 10-1000, using default");
            }
        }

        if let Some(ms) = env_parse::<u64>("POSITION_LERP_MS") {
            config.position_lerp_time = ms as f32 / 1000.0;
        }

        if let Some(secs) = env_parse::<f32>("READY_TIMEOUT_SECS") {
            if secs > 0.0 {
                config.ready_timeout = secs;
            } else {
                tracing::warn!("READY_TIMEOUT_SECS must be > 0, using default");
            }
        }

        if let Some(secs) = env_parse::<f32>("OPPONENT_WAIT_SECS") {
            if secs > 0.0 {
                config.opponent_wait_timeout = secs;
            } else {
                tracing::warn!("OPPONENT_WAIT_SECS must be > 0, using default");
            }
        }

        if let Some(secs) = env_parse::<u64>("MATCHMAKING_TIMEOUT_SECS") {
            config.matchmaking_timeout = Duration::from_secs(secs);
        }

        if let Some(secs) = env_parse::<u64>("CONNECT_TIMEOUT_SECS") {
            config.connect_timeout = Duration::from_secs(secs);
        }

        if let Some(attempts) = env_parse::<u32>("MAX_RETRY_ATTEMPTS") {
            config.max_retry_attempts = attempts;
        }

        if let Some(ms) = env_parse::<u64>("RETRY_DELAY_MS") {
            config.retry_delay = Duration::from_millis(ms);
        }

        if let Some(rate) = env_parse::<u32>("TICK_RATE") {
            if (1..=240).contains(&rate) {
                config.tick_rate = rate;
            } else {
                tracing::warn!("TICK_RATE must be 1-240, using default");
            }
        }

        if let Some(capacity) = env_parse::<usize>("INBOUND_CAPACITY") {
            config.inbound_capacity = capacity;
        }

        if let Some(points) = env_parse::<u32>("POINTS_TO_WIN") {
            config.points_to_win = points;
        }

        if let Some(port) = env_parse::<u16>("METRICS_PORT") {
            config.metrics_port = Some(port);
        }

        config
    }

    /// Tick duration derived from the tick rate
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if self.tick_rate == 0 {
            return Err("tick_rate must be at least 1".to_string());
        }
        if self.state_sync_interval <= 0.0 {
            return Err("state_sync_interval must be positive".to_string());
        }
        if self.position_lerp_time < 0.0 {
            return Err("position_lerp_time cannot be negative".to_string());
        }
        if self.max_retry_attempts == 0 {
            return Err("max_retry_attempts must be at least 1".to_string());
        }
        if self.inbound_capacity == 0 {
            return Err("inbound_capacity must be at least 1".to_string());
        }
        if self.points_to_win == 0 {
            return Err("points_to_win must be at least 1".to_string());
        }
        if self.max_down_angle >= self.max_up_angle {
            return Err("max_down_angle must be below max_up_angle".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert!((config.state_sync_interval - 0.1).abs() < f32::EPSILON);
        assert!((config.position_lerp_time - 0.05).abs() < f32::EPSILON);
        assert!((config.ready_timeout - 15.0).abs() < f32::EPSILON);
        assert_eq!(config.max_retry_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_or_default() {
        let config = SessionConfig::load_or_default();
        assert!(config.tick_rate > 0);
    }

    #[test]
    fn test_tick_interval() {
        let config = SessionConfig {
            tick_rate: 50,
            ..Default::default()
        };
        assert_eq!(config.tick_interval(), Duration::from_millis(20));
    }

    #[test]
    fn test_validate_rejects_inverted_angles() {
        let config = SessionConfig {
            max_up_angle: -10.0,
            max_down_angle: 10.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
