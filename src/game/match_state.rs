use serde::{Deserialize, Serialize};

use crate::game::constants::world;
use crate::game::level::LevelSelection;
use crate::game::scoreboard::{ScoreUpdate, Scoreboard};
use crate::net::protocol::{PowerUpData, ShotId, WindData};
use crate::session::participant::PlayerIndex;

/// Match phase as seen by one peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GamePhase {
    #[default]
    None,
    WaitForOtherPlayer,
    Gameplay,
    GameWon,
    GameOver,
    WaitForLevelChange,
}

impl GamePhase {
    pub fn is_finished(self) -> bool {
        matches!(self, GamePhase::GameWon | GamePhase::GameOver)
    }
}

/// Replicated match state. Both peers hold one; only what the authority
/// broadcasts (or what a peer did itself) ever changes it.
#[derive(Debug, Clone)]
pub struct MatchState {
    local: PlayerIndex,
    phase: GamePhase,
    selection: Option<LevelSelection>,
    scoreboard: Scoreboard,
    wind: Option<WindData>,
    /// Visible power-up and its remaining display time
    power_up: Option<(PowerUpData, f32)>,
}

impl MatchState {
    pub fn new(local: PlayerIndex, points_to_win: u32, theme_change_score: u32) -> Self {
        Self {
            local,
            phase: GamePhase::WaitForOtherPlayer,
            selection: None,
            scoreboard: Scoreboard::new(points_to_win, theme_change_score),
            wind: None,
            power_up: None,
        }
    }

    /// Rebind the local slot once authority is frozen
    pub fn set_local(&mut self, local: PlayerIndex) {
        self.local = local;
    }

    pub fn phase(&self) -> GamePhase {
        self.phase
    }

    pub fn selection(&self) -> Option<LevelSelection> {
        self.selection
    }

    pub fn scoreboard(&self) -> &Scoreboard {
        &self.scoreboard
    }

    pub fn wind(&self) -> Option<WindData> {
        self.wind
    }

    pub fn power_up(&self) -> Option<PowerUpData> {
        self.power_up.map(|(data, _)| data)
    }

    pub fn set_phase(&mut self, phase: GamePhase) {
        if !self.phase.is_finished() {
            self.phase = phase;
        }
    }

    pub fn start(&mut self) {
        self.set_phase(GamePhase::Gameplay);
    }

    /// Apply a new level/theme. Leaving WaitForLevelChange also clears the
    /// per-level world state (wind and power-up).
    pub fn apply_level(&mut self, selection: LevelSelection) {
        self.selection = Some(selection);
        self.wind = None;
        self.power_up = None;
        if self.phase == GamePhase::WaitForLevelChange {
            self.phase = GamePhase::Gameplay;
        }
    }

    pub fn apply_wind(&mut self, wind: WindData) {
        self.wind = Some(wind);
    }

    pub fn stop_wind(&mut self) -> bool {
        self.wind.take().is_some()
    }

    /// Show a power-up. Ignored while a level change is pending.
    pub fn spawn_power_up(&mut self, data: PowerUpData) -> bool {
        if self.phase == GamePhase::WaitForLevelChange {
            return false;
        }
        self.power_up = Some((data, world::POWER_UP_DISPLAY_DURATION));
        true
    }

    /// Count a hit and move to WaitForLevelChange when a player reaches the
    /// theme-change score.
    pub fn record_hit(&mut self, shot: ShotId) -> Option<ScoreUpdate> {
        if self.phase.is_finished() {
            return None;
        }
        let update = self.scoreboard.record_hit(shot)?;
        if update.theme_change && update.winner.is_none() {
            self.phase = GamePhase::WaitForLevelChange;
        }
        Some(update)
    }

    /// Finish the match from the local point of view
    pub fn complete(&mut self, winner: PlayerIndex) -> GamePhase {
        self.scoreboard.set_winner(winner);
        self.phase = if winner == self.local {
            GamePhase::GameWon
        } else {
            GamePhase::GameOver
        };
        self.wind = None;
        self.power_up = None;
        self.phase
    }

    /// Advance local display timers; returns a power-up that just expired
    pub fn tick(&mut self, dt: f32) -> Option<PowerUpData> {
        let (data, remaining) = self.power_up.as_mut()?;
        *remaining -= dt;
        if *remaining <= 0.0 {
            let expired = *data;
            self.power_up = None;
            return Some(expired);
        }
        None
    }
}
