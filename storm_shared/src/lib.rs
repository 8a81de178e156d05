//! `storm_shared`
//!
//! Shared libraries used by both client and server.
//!
//! Design goals:
//! - Wire protocol and config in one place so both ends agree.
//! - Particle simulation independent of networking.
//! - Deterministic where a seed is given.
//! - No `unsafe`.

pub mod config;
pub mod math;
pub mod net;
pub mod noise;
pub mod particles;
pub mod storm;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::math::*;
    pub use crate::net::*;
    pub use crate::particles::*;
    pub use crate::storm::*;
}
