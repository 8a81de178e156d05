//! `storm_server`
//!
//! Server-side systems:
//! - Accepts any number of TCP clients
//! - Tracks each session's latest reported energy
//! - Aggregates energies into storm parameters on a fixed period
//! - Broadcasts a `StormPacket` to every live session
//!
//! A failing session is removed without disturbing the others.

pub mod registry;
pub mod server;
pub mod weather;

pub use server::{ServerHandle, StormServer};
