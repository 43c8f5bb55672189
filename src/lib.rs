//! Arrow Duel Session Library
//!
//! Authoritative session engine for a two-player archery duel over a
//! pub/sub relay transport.
//!
//! # Features
//!
//! - `memory_transport` - In-process relay hub for tests, benchmarks and the demo binary (enabled by default)

pub mod config;
pub mod util;
pub mod game;
pub mod net;
pub mod session;
pub mod metrics;
