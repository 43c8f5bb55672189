pub mod constants;
pub mod level;
pub mod match_state;
pub mod scoreboard;
pub mod world;
