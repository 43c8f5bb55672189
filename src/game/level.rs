//! Level and theme selection
//!
//! Selection is a shuffle bag: every index is drawn once before any repeats,
//! and a refilled bag never starts with the index that is currently shown.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::net::protocol::LevelChangeData;

/// Level/theme pair currently shown, plus the previous pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LevelSelection {
    pub current_level: u32,
    pub last_level: u32,
    pub current_theme: u32,
    pub last_theme: u32,
}

impl LevelSelection {
    pub fn to_wire(self) -> LevelChangeData {
        LevelChangeData {
            current_level: self.current_level,
            last_level: self.last_level,
            current_theme: self.current_theme,
            last_theme: self.last_theme,
        }
    }

    pub fn from_wire(data: &LevelChangeData) -> Self {
        Self {
            current_level: data.current_level,
            last_level: data.last_level,
            current_theme: data.current_theme,
            last_theme: data.last_theme,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShuffleBag {
    count: u32,
    available: Vec<u32>,
    current: Option<u32>,
}

impl ShuffleBag {
    pub fn new(count: u32) -> Self {
        Self {
            count,
            available: (0..count).collect(),
            current: None,
        }
    }

    pub fn current(&self) -> Option<u32> {
        self.current
    }

    /// Draw the next index. Returns None only for an empty bag.
    pub fn draw<R: Rng>(&mut self, rng: &mut R) -> Option<u32> {
        if self.count == 0 {
            return None;
        }
        if self.available.is_empty() {
            let current = self.current;
            self.available = (0..self.count).filter(|i| Some(*i) != current).collect();
            if self.available.is_empty() {
                // Single-entry bag: repeating is the only option
                self.available.push(0);
            }
        }
        let slot = rng.gen_range(0..self.available.len());
        let index = self.available.swap_remove(slot);
        self.current = Some(index);
        Some(index)
    }
}

/// Rolls new level/theme pairs. Only the session authority owns one.
#[derive(Debug, Clone)]
pub struct LevelRoller {
    levels: ShuffleBag,
    themes: ShuffleBag,
    selection: LevelSelection,
}

impl LevelRoller {
    pub fn new(level_count: u32, theme_count: u32) -> Self {
        Self {
            levels: ShuffleBag::new(level_count),
            themes: ShuffleBag::new(theme_count),
            selection: LevelSelection::default(),
        }
    }

    pub fn selection(&self) -> LevelSelection {
        self.selection
    }

    /// Roll both a new level and a new theme
    pub fn roll<R: Rng>(&mut self, rng: &mut R) -> LevelSelection {
        let last = self.selection;
        let level = self.levels.draw(rng).unwrap_or(0);
        let theme = self.themes.draw(rng).unwrap_or(0);
        self.selection = LevelSelection {
            current_level: level,
            last_level: last.current_level,
            current_theme: theme,
            last_theme: last.current_theme,
        };
        self.selection
    }

    /// Force an explicit pair (authority override)
    pub fn set(&mut self, level: u32, theme: u32) -> LevelSelection {
        let last = self.selection;
        self.levels.current = Some(level);
        self.themes.current = Some(theme);
        self.levels.available.retain(|i| *i != level);
        self.themes.available.retain(|i| *i != theme);
        self.selection = LevelSelection {
            current_level: level,
            last_level: last.current_level,
            current_theme: theme,
            last_theme: last.current_theme,
        };
        self.selection
    }
}
