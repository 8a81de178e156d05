//! Smooth 2D gradient noise.
//!
//! Classic Perlin noise over a seeded permutation table, remapped to
//! roughly `[0, 1]`. Given the same seed, samples are identical on every
//! platform and every run. The table is read-only after construction so one
//! instance can be shared by every simulation worker.

/// Seed used by `Perlin::default()`.
pub const DEFAULT_NOISE_SEED: u64 = 0x5EED_57_0A11;

/// 2D Perlin noise generator.
#[derive(Clone)]
pub struct Perlin {
    /// 256 shuffled entries, doubled so lattice lookups never wrap.
    perm: [u8; 512],
}

impl Perlin {
    pub fn new(seed: u64) -> Self {
        let mut perm = [0u8; 512];
        for (i, p) in perm.iter_mut().take(256).enumerate() {
            *p = i as u8;
        }

        // Fisher-Yates with xorshift64; zero would stall the generator.
        let mut state = if seed == 0 { DEFAULT_NOISE_SEED } else { seed };
        for i in (1..256).rev() {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let j = (state % (i as u64 + 1)) as usize;
            perm.swap(i, j);
        }

        perm.copy_within(0..256, 256);

        Self { perm }
    }

    /// Samples the noise field. Output lies in `[0, 1]`, 0.5 on lattice points.
    pub fn sample(&self, x: f32, y: f32) -> f32 {
        let x0 = x.floor();
        let y0 = y.floor();
        let xi = (x0 as i32 & 255) as usize;
        let yi = (y0 as i32 & 255) as usize;
        let fx = x - x0;
        let fy = y - y0;

        let u = fade(fx);
        let v = fade(fy);

        let p = &self.perm;
        let aa = p[p[xi] as usize + yi];
        let ab = p[p[xi] as usize + yi + 1];
        let ba = p[p[xi + 1] as usize + yi];
        let bb = p[p[xi + 1] as usize + yi + 1];

        let n = lerp(
            v,
            lerp(u, grad(aa, fx, fy), grad(ba, fx - 1.0, fy)),
            lerp(u, grad(ab, fx, fy - 1.0), grad(bb, fx - 1.0, fy - 1.0)),
        );

        ((n + 1.0) * 0.5).clamp(0.0, 1.0)
    }
}

impl Default for Perlin {
    fn default() -> Self {
        Self::new(DEFAULT_NOISE_SEED)
    }
}

impl std::fmt::Debug for Perlin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Perlin").finish_non_exhaustive()
    }
}

#[inline]
fn fade(t: f32) -> f32 {
    t * t * t * (t * (t * 6.0 - 15.0) + 10.0)
}

#[inline]
fn lerp(t: f32, a: f32, b: f32) -> f32 {
    a + t * (b - a)
}

#[inline]
fn grad(hash: u8, x: f32, y: f32) -> f32 {
    match hash & 3 {
        0 => x + y,
        1 => -x + y,
        2 => x - y,
        _ => -x - y,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_stay_in_unit_range() {
        let noise = Perlin::default();
        for i in 0..2000 {
            let x = i as f32 * 0.037 - 20.0;
            let y = i as f32 * 0.011 + 0.3;
            let n = noise.sample(x, y);
            assert!((0.0..=1.0).contains(&n), "sample {n} out of range at ({x}, {y})");
        }
    }

    #[test]
    fn lattice_points_are_midpoint() {
        let noise = Perlin::new(42);
        assert_eq!(noise.sample(3.0, 7.0), 0.5);
        assert_eq!(noise.sample(-2.0, 0.0), 0.5);
    }

    #[test]
    fn same_seed_same_field() {
        let a = Perlin::new(7);
        let b = Perlin::new(7);
        for i in 0..100 {
            let x = i as f32 * 0.13;
            assert_eq!(a.sample(x, 1.5), b.sample(x, 1.5));
        }
    }

    #[test]
    fn field_is_smooth() {
        let noise = Perlin::default();
        for i in 0..500 {
            let x = i as f32 * 0.01;
            let d = (noise.sample(x, 0.25) - noise.sample(x + 1e-3, 0.25)).abs();
            assert!(d < 0.01, "jump of {d} at x={x}");
        }
    }
}
