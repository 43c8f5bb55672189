//! Authority-side scheduling of world events
//!
//! All match randomness lives here. Only the session authority ticks a
//! scheduler; the other peer applies whatever the authority broadcasts.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use smallvec::SmallVec;

use crate::game::constants::{timing, world};
use crate::game::level::{LevelRoller, LevelSelection};
use crate::game::match_state::GamePhase;
use crate::net::protocol::{PowerUpData, WindData};

/// Something the authority must broadcast
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WorldAction {
    Wind(WindData),
    WindStop,
    PowerUp(PowerUpData),
    ThemeChange(LevelSelection),
}

pub type WorldActions = SmallVec<[WorldAction; 2]>;

#[derive(Debug)]
pub struct WorldScheduler {
    rng: StdRng,
    levels: LevelRoller,
    /// Calm time left before the next gust
    wind_wait: f32,
    /// Gust time left while wind blows
    wind_remaining: Option<f32>,
    power_up_wait: f32,
    theme_change_in: Option<f32>,
}

impl WorldScheduler {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic scheduler for tests and replays
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            rng,
            levels: LevelRoller::new(world::LEVEL_COUNT, world::THEME_COUNT),
            wind_wait: world::WIND_INTERVAL,
            wind_remaining: None,
            power_up_wait: world::INITIAL_POWER_UP_DELAY,
            theme_change_in: None,
        }
    }

    pub fn roll_level(&mut self) -> LevelSelection {
        self.levels.roll(&mut self.rng)
    }

    pub fn set_level(&mut self, level: u32, theme: u32) -> LevelSelection {
        self.levels.set(level, theme)
    }

    pub fn roll_wind(&mut self) -> WindData {
        let wind = WindData {
            direction_right: self.rng.gen_bool(0.5),
            strength: world::MAX_WIND_STRENGTH,
            duration: world::WIND_DURATION,
        };
        self.wind_remaining = Some(wind.duration);
        wind
    }

    pub fn roll_power_up(&mut self) -> PowerUpData {
        let data = PowerUpData {
            spawn_point_index: self.rng.gen_range(0..world::POWER_UP_SPAWN_POINTS),
            data_index: self.rng.gen_range(0..world::POWER_UP_KINDS),
        };
        self.power_up_wait = world::POWER_UP_DISPLAY_DURATION
            + self
                .rng
                .gen_range(world::MIN_POWER_UP_DELAY..=world::MAX_POWER_UP_DELAY);
        data
    }

    /// Arm the delayed theme change after a player reached the theme score
    pub fn schedule_theme_change(&mut self) {
        if self.theme_change_in.is_none() {
            self.theme_change_in = Some(timing::THEME_CHANGE_DELAY);
        }
    }

    pub fn theme_change_pending(&self) -> bool {
        self.theme_change_in.is_some()
    }

    pub fn wind_active(&self) -> bool {
        self.wind_remaining.is_some()
    }

    /// Restart the per-level timers. Returns true if a gust was cut short.
    pub fn reset_for_level(&mut self) -> bool {
        self.wind_wait = world::WIND_INTERVAL;
        self.power_up_wait = world::INITIAL_POWER_UP_DELAY;
        self.wind_remaining.take().is_some()
    }

    pub fn tick(&mut self, dt: f32, phase: GamePhase) -> WorldActions {
        let mut actions = WorldActions::new();

        if let Some(remaining) = self.theme_change_in.as_mut() {
            *remaining -= dt;
            if *remaining <= 0.0 {
                self.theme_change_in = None;
                if self.reset_for_level() {
                    actions.push(WorldAction::WindStop);
                }
                let selection = self.roll_level();
                actions.push(WorldAction::ThemeChange(selection));
                return actions;
            }
        }

        if phase != GamePhase::Gameplay {
            return actions;
        }

        match self.wind_remaining.as_mut() {
            Some(remaining) => {
                *remaining -= dt;
                if *remaining <= 0.0 {
                    self.wind_remaining = None;
                    self.wind_wait = world::WIND_INTERVAL;
                    actions.push(WorldAction::WindStop);
                }
            }
            None => {
                self.wind_wait -= dt;
                if self.wind_wait <= 0.0 {
                    let wind = self.roll_wind();
                    actions.push(WorldAction::Wind(wind));
                }
            }
        }

        self.power_up_wait -= dt;
        if self.power_up_wait <= 0.0 {
            let data = self.roll_power_up();
            actions.push(WorldAction::PowerUp(data));
        }

        actions
    }
}

impl Default for WorldScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(scheduler: &mut WorldScheduler, seconds: f32, phase: GamePhase) -> Vec<WorldAction> {
        let dt = 0.1;
        let steps = (seconds / dt).round() as usize;
        (0..steps)
            .flat_map(|_| scheduler.tick(dt, phase).into_iter())
            .collect()
    }

    #[test]
    fn test_first_power_up_after_initial_delay() {
        let mut scheduler = WorldScheduler::with_seed(1);
        let early = run(&mut scheduler, 4.8, GamePhase::Gameplay);
        assert!(!early.iter().any(|a| matches!(a, WorldAction::PowerUp(_))));
        let later = run(&mut scheduler, 0.4, GamePhase::Gameplay);
        assert!(later.iter().any(|a| matches!(a, WorldAction::PowerUp(_))));
    }

    #[test]
    fn test_power_up_interval_bounds() {
        let mut scheduler = WorldScheduler::with_seed(2);
        scheduler.roll_power_up();
        let min = world::POWER_UP_DISPLAY_DURATION + world::MIN_POWER_UP_DELAY;
        let max = world::POWER_UP_DISPLAY_DURATION + world::MAX_POWER_UP_DELAY;
        assert!(scheduler.power_up_wait >= min && scheduler.power_up_wait <= max);
    }

    #[test]
    fn test_wind_gusts_then_stops() {
        let mut scheduler = WorldScheduler::with_seed(3);
        let actions = run(&mut scheduler, world::WIND_INTERVAL + 0.5, GamePhase::Gameplay);
        let wind = actions.iter().find_map(|a| match a {
            WorldAction::Wind(w) => Some(*w),
            _ => None,
        });
        let wind = wind.unwrap();
        assert_eq!(wind.strength, world::MAX_WIND_STRENGTH);
        assert!(scheduler.wind_active());

        let actions = run(&mut scheduler, world::WIND_DURATION + 0.5, GamePhase::Gameplay);
        assert!(actions.contains(&WorldAction::WindStop));
        assert!(!scheduler.wind_active());
    }

    #[test]
    fn test_nothing_scheduled_outside_gameplay() {
        let mut scheduler = WorldScheduler::with_seed(4);
        let actions = run(&mut scheduler, 60.0, GamePhase::WaitForOtherPlayer);
        assert!(actions.is_empty());
    }

    #[test]
    fn test_theme_change_after_delay() {
        let mut scheduler = WorldScheduler::with_seed(5);
        scheduler.roll_level();
        scheduler.schedule_theme_change();
        scheduler.schedule_theme_change();
        assert!(scheduler.tick(0.5, GamePhase::WaitForLevelChange).is_empty());
        let actions = scheduler.tick(0.6, GamePhase::WaitForLevelChange);
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0], WorldAction::ThemeChange(_)));
        assert!(!scheduler.theme_change_pending());
    }
}
