//! Storm particle simulation.
//!
//! A fixed pool of particles lives in two equal-length buffers (positions and
//! velocities). Every tick the pool is split into disjoint chunks that rayon
//! workers update in parallel; particles never read each other, so the result
//! does not depend on the chunk size or the number of workers.
//!
//! The boundary rule redirects velocity toward the origin once a particle is
//! farther than `BOUNDARY_RADIUS`. Position is not clamped, so a fast
//! particle may overshoot for a tick before the redirect pulls it back.

use rand::Rng;
use rayon::prelude::*;

use crate::{math::Vec3, noise::Perlin, storm::StormParameters};

/// Particles farther than this from the origin are sent back inward.
pub const BOUNDARY_RADIUS: f32 = 10.0;
/// Initial positions are drawn uniformly inside this sphere.
pub const SPAWN_RADIUS: f32 = 5.0;
/// Speed of the inward redirect.
pub const BOUNCE_SPEED: f32 = 5.0;
/// Per-tick velocity damping.
pub const DAMPING: f32 = 0.98;
pub const FORCE_SCALE: f32 = 2.0;
pub const DEFAULT_CHUNK_SIZE: usize = 128;
pub const DEFAULT_PARTICLE_COUNT: usize = 5000;

/// Summary used for logging; not part of the update.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ParticleStats {
    pub mean_radius: f32,
    pub max_radius: f32,
    /// Particles currently past the boundary radius.
    pub outside: usize,
}

#[derive(Debug)]
pub struct ParticleSimulation {
    positions: Vec<Vec3>,
    velocities: Vec<Vec3>,
    chunk_size: usize,
    noise: Perlin,
}

impl ParticleSimulation {
    /// Allocates `count` particles inside the spawn sphere, at rest.
    pub fn new<R: Rng>(count: usize, chunk_size: usize, rng: &mut R) -> Self {
        let positions = (0..count)
            .map(|_| random_in_unit_sphere(rng) * SPAWN_RADIUS)
            .collect();
        Self::with_state(positions, vec![Vec3::ZERO; count], chunk_size)
    }

    /// Builds a simulation from explicit buffers.
    ///
    /// # Panics
    /// If the buffers differ in length.
    pub fn with_state(positions: Vec<Vec3>, velocities: Vec<Vec3>, chunk_size: usize) -> Self {
        assert_eq!(
            positions.len(),
            velocities.len(),
            "position and velocity buffers must have equal length"
        );
        Self {
            positions,
            velocities,
            chunk_size: chunk_size.max(1),
            noise: Perlin::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    pub fn velocities(&self) -> &[Vec3] {
        &self.velocities
    }

    /// Advances every particle by `dt` seconds under `storm`.
    pub fn step(&mut self, dt: f32, storm: &StormParameters) {
        let chunk = self.chunk_size;
        let noise = &self.noise;

        self.positions
            .par_chunks_mut(chunk)
            .zip(self.velocities.par_chunks_mut(chunk))
            .enumerate()
            .for_each(|(c, (positions, velocities))| {
                let base = c * chunk;
                for (j, (pos, vel)) in positions.iter_mut().zip(velocities.iter_mut()).enumerate() {
                    integrate(base + j, pos, vel, dt, storm, noise);
                }
            });
    }

    pub fn stats(&self) -> ParticleStats {
        if self.positions.is_empty() {
            return ParticleStats::default();
        }
        let (sum, max, outside) = self
            .positions
            .iter()
            .map(|p| p.length())
            .fold((0.0f32, 0.0f32, 0usize), |(sum, max, outside), r| {
                (sum + r, max.max(r), outside + usize::from(r > BOUNDARY_RADIUS))
            });
        ParticleStats {
            mean_radius: sum / self.positions.len() as f32,
            max_radius: max,
            outside,
        }
    }
}

/// Turbulence for particle `index`: three noise samples shifted to about `[-0.5, 0.5]`.
pub fn turbulence(noise: &Perlin, index: usize, intensity: f32) -> Vec3 {
    let i = index as f32;
    Vec3::new(
        noise.sample(i * 0.01, intensity) - 0.5,
        noise.sample(i * 0.02, intensity + 1.0) - 0.5,
        noise.sample(i * 0.03, intensity + 2.0) - 0.5,
    )
}

fn integrate(
    index: usize,
    pos: &mut Vec3,
    vel: &mut Vec3,
    dt: f32,
    storm: &StormParameters,
    noise: &Perlin,
) {
    let force = (storm.wind() + turbulence(noise, index, storm.intensity()))
        * storm.intensity()
        * FORCE_SCALE;

    *vel += force * dt;
    *vel *= DAMPING;
    *pos += *vel * dt;

    if pos.length() > BOUNDARY_RADIUS {
        *vel = -pos.normalize_or_zero() * BOUNCE_SPEED;
    }
}

fn random_in_unit_sphere<R: Rng>(rng: &mut R) -> Vec3 {
    loop {
        let v = Vec3::new(
            rng.gen_range(-1.0..=1.0),
            rng.gen_range(-1.0..=1.0),
            rng.gen_range(-1.0..=1.0),
        );
        if v.len_sq() <= 1.0 {
            return v;
        }
    }
}
