//! Transport seam, wire protocol and the session tick loop

pub mod connector;
pub mod driver;
pub mod inbound;
pub mod protocol;
pub mod transport;

#[cfg(feature = "memory_transport")]
pub mod memory;
