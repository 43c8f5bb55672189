//! Two-participant session engine
//!
//! Membership, authority, readiness, event relay and state sync, all owned by
//! a single [`context::SessionContext`] and mutated from its tick.

pub mod authority;
pub mod context;
pub mod error;
pub mod membership;
pub mod participant;
pub mod readiness;
pub mod relay;
pub mod rotation_gate;
pub mod state_sync;
