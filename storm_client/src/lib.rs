//! `storm_client`
//!
//! Client-side systems:
//! - Connection to the storm server
//! - Energy sampling and the periodic send loop
//! - Receive loop publishing the latest storm parameters
//!
//! The particle simulation itself lives in `storm_shared::particles`; the
//! `client` binary wires it to the received parameters.

pub mod client;
pub mod input;

pub use client::{ClientHandle, StormClient};
