use hashbrown::HashSet;

use crate::game::constants::score;
use crate::net::protocol::ShotId;
use crate::session::participant::PlayerIndex;

/// Result of a hit that counted
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreUpdate {
    pub shooter: PlayerIndex,
    /// Shooter's points after this hit
    pub points: u32,
    /// Victim's hearts after this hit
    pub victim_hearts: f32,
    /// The shooter just reached the theme-change score
    pub theme_change: bool,
    /// Set once a player reaches points-to-win
    pub winner: Option<PlayerIndex>,
}

/// Points and hearts for both players
///
/// Hits are keyed by shot so a redelivered HIT_TARGET never scores twice.
#[derive(Debug, Clone)]
pub struct Scoreboard {
    points: [u32; 2],
    hearts: [f32; 2],
    scored: HashSet<ShotId>,
    points_to_win: u32,
    theme_change_score: u32,
    winner: Option<PlayerIndex>,
}

impl Scoreboard {
    pub fn new(points_to_win: u32, theme_change_score: u32) -> Self {
        Self {
            points: [0; 2],
            hearts: [score::STARTING_HEARTS; 2],
            scored: HashSet::new(),
            points_to_win,
            theme_change_score,
            winner: None,
        }
    }

    pub fn points(&self, player: PlayerIndex) -> u32 {
        self.points[player.slot()]
    }

    pub fn hearts(&self, player: PlayerIndex) -> f32 {
        self.hearts[player.slot()]
    }

    pub fn winner(&self) -> Option<PlayerIndex> {
        self.winner
    }

    pub fn has_scored(&self, shot: &ShotId) -> bool {
        self.scored.contains(shot)
    }

    /// Count a hit. Returns None for a shot that already scored or once the
    /// match has a winner.
    pub fn record_hit(&mut self, shot: ShotId) -> Option<ScoreUpdate> {
        if self.winner.is_some() || !self.scored.insert(shot) {
            return None;
        }

        let shooter = shot.owner;
        let victim = shooter.other();
        self.points[shooter.slot()] += 1;
        let hearts = &mut self.hearts[victim.slot()];
        *hearts = (*hearts - score::DAMAGE_PER_HIT).max(0.0);

        let points = self.points[shooter.slot()];
        if points >= self.points_to_win {
            self.winner = Some(shooter);
        }

        Some(ScoreUpdate {
            shooter,
            points,
            victim_hearts: self.hearts[victim.slot()],
            theme_change: points == self.theme_change_score,
            winner: self.winner,
        })
    }

    /// Adopt the authority's verdict
    pub fn set_winner(&mut self, winner: PlayerIndex) {
        self.winner = Some(winner);
    }
}

impl Default for Scoreboard {
    fn default() -> Self {
        Self::new(score::POINTS_TO_WIN, score::THEME_CHANGE_SCORE)
    }
}
