//! Storm generation.
//!
//! Turns the registered energies into one `StormParameters` per broadcast
//! tick: intensity is the mean energy plus a small random jitter, clamped to
//! `[0, 1]`; wind is `(r1, 0, r2)` with both components drawn from `[0, 1)`.
//! The random source is a type parameter so tests can pin it down.

use rand::{rngs::StdRng, Rng, SeedableRng};
use storm_shared::{config::ServerConfig, math::Vec3, storm::StormParameters};

/// Mean of `energies`, or `fallback` when there are none.
pub fn mean_energy(energies: &[f32], fallback: f32) -> f32 {
    if energies.is_empty() {
        return fallback;
    }
    let sum: f64 = energies.iter().map(|&e| f64::from(e)).sum();
    (sum / energies.len() as f64) as f32
}

pub fn storm_intensity(avg_energy: f32, jitter: f32) -> f32 {
    (avg_energy + jitter).clamp(0.0, 1.0)
}

#[derive(Debug)]
pub struct StormGenerator<R = StdRng> {
    rng: R,
    fallback_energy: f32,
    jitter_max: f32,
}

impl StormGenerator<StdRng> {
    /// Seeded from `cfg.seed` when present, from OS entropy otherwise.
    pub fn from_config(cfg: &ServerConfig) -> Self {
        let rng = match cfg.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::new(rng, cfg.fallback_energy, cfg.jitter_max)
    }
}

impl<R: Rng> StormGenerator<R> {
    pub fn new(rng: R, fallback_energy: f32, jitter_max: f32) -> Self {
        Self {
            rng,
            fallback_energy,
            jitter_max,
        }
    }

    /// Draws the jitter for one tick; zero when `jitter_max` is not positive.
    fn jitter(&mut self) -> f32 {
        if self.jitter_max > 0.0 {
            self.rng.gen_range(0.0..self.jitter_max)
        } else {
            0.0
        }
    }

    pub fn next_storm(&mut self, energies: &[f32]) -> StormParameters {
        let avg = mean_energy(energies, self.fallback_energy);
        let intensity = storm_intensity(avg, self.jitter());
        let wind = Vec3::new(self.rng.gen::<f32>(), 0.0, self.rng.gen::<f32>());
        StormParameters::new(intensity, wind)
    }
}
