//! Domain-warped layered noise used to classify the plane into buckets.
//!
//! The field is a pure function of (seed, parameters, x, y): generators are built
//! once from the seed and sampled at world coordinates, so the same world point
//! always yields the same value regardless of view, zoom or grid alignment.

use noise::{NoiseFn, Perlin, Simplex};

use crate::config::{LayerMix, NoiseParams};
use crate::seeds::OverlaySeeds;

// Coordinate offset between the two decorrelated warp channels
const WARP_CHANNEL_OFFSET: f64 = 173.31;

/// Seeded noise field. Cheap to sample, `Sync`, so rows can be sampled in parallel.
pub struct NoiseField {
    params: NoiseParams,
    warp_x: Simplex,
    warp_y: Simplex,
    perlin_layers: Vec<Perlin>,
    simplex_layers: Vec<Simplex>,
    fine: Perlin,
}

impl NoiseField {
    pub fn new(params: &NoiseParams) -> Self {
        let seeds = OverlaySeeds::from_master(params.seed);
        let layers = params.octaves.max(1);

        let perlin_layers = (0..layers)
            .map(|i| Perlin::new(seeds.base.wrapping_add(i.wrapping_mul(7919))))
            .collect();
        let simplex_layers = (0..layers)
            .map(|i| Simplex::new(seeds.base.wrapping_add(i.wrapping_mul(7919)).wrapping_add(1111)))
            .collect();

        Self {
            params: params.clone(),
            warp_x: Simplex::new(seeds.warp),
            warp_y: Simplex::new(seeds.warp.wrapping_add(1)),
            perlin_layers,
            simplex_layers,
            fine: Perlin::new(seeds.fine),
        }
    }

    pub fn params(&self) -> &NoiseParams {
        &self.params
    }

    /// Sample the classification noise at a world point. Returns a value in [0, 1],
    /// or NaN for non-finite input.
    pub fn sample(&self, x: f64, y: f64) -> f64 {
        if !x.is_finite() || !y.is_finite() {
            return f64::NAN;
        }

        let p = &self.params;
        let (wx, wy) = self.warp(x * p.base_scale, y * p.base_scale);

        let mut total = 0.0;
        let mut weight = 0.0;
        let mut amplitude = 1.0;
        let mut frequency = 1.0;

        for (perlin, simplex) in self.perlin_layers.iter().zip(&self.simplex_layers) {
            let point = [wx * frequency, wy * frequency];
            let layer = mix_layer(&p.layer_mix, perlin.get(point), simplex.get(point));
            total += layer * amplitude;
            weight += amplitude;
            amplitude *= p.gain;
            frequency *= p.lacunarity;
        }

        let v = if weight > 0.0 { total / weight } else { 0.0 };
        (v * 0.5 + 0.5).clamp(0.0, 1.0)
    }

    /// Single-octave detail noise in [0, 1] (NaN for non-finite input).
    pub fn sample_fine(&self, x: f64, y: f64) -> f64 {
        if !x.is_finite() || !y.is_finite() {
            return f64::NAN;
        }
        let s = self.params.fine_scale;
        (self.fine.get([x * s, y * s]) * 0.5 + 0.5).clamp(0.0, 1.0)
    }

    /// Iterated domain warp in noise space.
    fn warp(&self, x: f64, y: f64) -> (f64, f64) {
        let warp = &self.params.warp;
        if warp.strength <= 0.0 {
            return (x, y);
        }

        let mut px = x;
        let mut py = y;
        let mut amplitude = warp.strength;
        let mut frequency = warp.scale;

        for _ in 0..self.params.warp_octaves() {
            let dx = self.warp_x.get([px * frequency, py * frequency]);
            let dy = self.warp_y.get([
                px * frequency + WARP_CHANNEL_OFFSET,
                py * frequency + WARP_CHANNEL_OFFSET,
            ]);
            px += dx * amplitude;
            py += dy * amplitude;
            amplitude *= warp.gain;
            frequency *= warp.lacunarity;
        }

        (px, py)
    }
}

/// Combine one octave's perlin and simplex samples with the ridge transform.
/// Inputs and output are in [-1, 1]; the ridge term itself stays in [0, 1].
fn mix_layer(mix: &LayerMix, perlin: f64, simplex: f64) -> f64 {
    let ridge = 1.0 - perlin.abs();
    let total = mix.total();
    if total <= 0.0 {
        return perlin;
    }
    (perlin * mix.perlin + simplex * mix.simplex + ridge * mix.ridge) / total
}

/// One-shot sample without keeping the field around.
pub fn sample(params: &NoiseParams, x: f64, y: f64) -> f64 {
    NoiseField::new(params).sample(x, y)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(seed: u32) -> NoiseParams {
        NoiseParams { seed, ..NoiseParams::default() }
    }

    #[test]
    fn test_sample_is_bit_identical() {
        let field = NoiseField::new(&params(42));
        let other = NoiseField::new(&params(42));
        for i in 0..50 {
            let x = i as f64 * 37.3 - 500.0;
            let y = i as f64 * -11.9 + 80.0;
            assert_eq!(field.sample(x, y).to_bits(), field.sample(x, y).to_bits());
            assert_eq!(field.sample(x, y).to_bits(), other.sample(x, y).to_bits());
        }
    }

    #[test]
    fn test_sample_in_unit_range() {
        let field = NoiseField::new(&params(7));
        for i in 0..400 {
            let x = (i % 20) as f64 * 123.4;
            let y = (i / 20) as f64 * 98.7;
            let v = field.sample(x, y);
            assert!((0.0..=1.0).contains(&v), "sample {} out of range", v);
            let f = field.sample_fine(x, y);
            assert!((0.0..=1.0).contains(&f));
        }
    }

    #[test]
    fn test_non_finite_input_gives_nan() {
        let field = NoiseField::new(&params(1));
        assert!(field.sample(f64::NAN, 0.0).is_nan());
        assert!(field.sample(0.0, f64::INFINITY).is_nan());
        assert!(field.sample_fine(f64::NEG_INFINITY, 0.0).is_nan());
    }

    #[test]
    fn test_continuous_across_integer_boundaries() {
        let field = NoiseField::new(&params(3));
        let scale = field.params().base_scale;
        // Step across an integer lattice line in noise space
        let x = 5.0 / scale;
        let a = field.sample(x - 1e-4, 17.0);
        let b = field.sample(x + 1e-4, 17.0);
        assert!((a - b).abs() < 1e-3);
    }

    #[test]
    fn test_seed_changes_field() {
        let a = NoiseField::new(&params(1));
        let b = NoiseField::new(&params(2));
        let differs = (0..20).any(|i| {
            let x = i as f64 * 71.0;
            a.sample(x, x * 0.5) != b.sample(x, x * 0.5)
        });
        assert!(differs);
    }

    #[test]
    fn test_mix_layer_stays_in_range() {
        let mix = LayerMix::default();
        for &(p, s) in &[(1.0, 1.0), (-1.0, -1.0), (0.0, 0.0), (1.0, -1.0)] {
            let v = mix_layer(&mix, p, s);
            assert!((-1.0..=1.0).contains(&v));
        }
    }

    #[test]
    fn test_ridge_term_peaks_at_perlin_zero() {
        let mix = LayerMix::default();
        let total = mix.total();
        // perlin 0 gives a full ridge, |perlin| 1 gives none
        assert!((mix_layer(&mix, 0.0, 0.0) - mix.ridge / total).abs() < 1e-12);
        assert!((mix_layer(&mix, 1.0, 0.0) - mix.perlin / total).abs() < 1e-12);
        assert!((mix_layer(&mix, -1.0, 0.0) + mix.perlin / total).abs() < 1e-12);
    }

    #[test]
    fn test_one_shot_matches_field() {
        let p = params(11);
        let field = NoiseField::new(&p);
        assert_eq!(sample(&p, 12.5, -3.0), field.sample(12.5, -3.0));
    }
}
