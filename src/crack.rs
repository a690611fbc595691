//! Procedural crack rasters along active road intervals
//!
//! Cracks are the boundaries of a Voronoi diagram over jittered seed points:
//! a pixel is "on a crack" when the gap between its nearest and second-nearest
//! seed distances is small. Seeds are only accepted where the intersection mask
//! says the region is active, so the pattern follows the classification at
//! generation time instead of being masked afterwards.
//!
//! Tiles are rasterized in the footprint's local frame (u along the segment,
//! v across it) and carry a [`TilePlacement`] mapping them back to world space.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::{CrackSettings, MAX_RESOLUTION};
use crate::geometry::{Point, RoadSegment};
use crate::seeds::SeedHasher;

// =============================================================================
// CONSTANTS
// =============================================================================

/// Floor for the Voronoi gap threshold (world units).
pub const MIN_EPSILON: f64 = 0.05;
/// Floor for the stamp radius (raster pixels).
pub const MIN_STROKE_RADIUS: f64 = 0.35;
/// Fewest seeds scattered in any footprint.
pub const MIN_SEEDS: usize = 3;
/// Below this downscale factor a coarse placeholder replaces the real raster.
pub const MIN_DOWNSCALE: f64 = 1.0 / 16.0;
/// Per-axis size of placeholder tiles.
pub const PLACEHOLDER_MAX_DIM: usize = 64;
pub const PLACEHOLDER_ALPHA: u8 = 48;

const SCATTER_ATTEMPTS_PER_SEED: usize = 8;
const MIN_INTERVAL_LENGTH: f64 = 1e-6;
const MAX_INDEX_CELLS_PER_AXIS: usize = 1024;

// =============================================================================
// PATTERNS
// =============================================================================

/// Per-pattern scale factors applied on top of [`CrackSettings`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternMultipliers {
    pub seed_density: f64,
    pub sample_along: f64,
    pub sample_across: f64,
    pub min_length: f64,
    pub max_seeds: f64,
    pub stroke_width: f64,
    pub alpha: f64,
    pub resolution: f64,
}

impl Default for PatternMultipliers {
    fn default() -> Self {
        Self {
            seed_density: 1.0,
            sample_along: 1.0,
            sample_across: 1.0,
            min_length: 1.0,
            max_seeds: 1.0,
            stroke_width: 1.0,
            alpha: 1.0,
            resolution: 1.0,
        }
    }
}

/// A visual variant of the crack pattern.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrackPattern {
    pub id: u32,
    /// Mixed into the per-interval RNG seed
    pub seed_offset: u64,
    pub multipliers: PatternMultipliers,
    /// Added to the fine-noise threshold
    pub threshold_offset: f64,
    /// Overrides the configured crack colour
    pub color: Option<[u8; 3]>,
}

impl CrackPattern {
    /// Built-in variants: plain, hairline, web and fractured.
    pub fn variants() -> Vec<CrackPattern> {
        vec![
            CrackPattern::default(),
            CrackPattern {
                id: 1,
                seed_offset: 0x51ed,
                multipliers: PatternMultipliers {
                    seed_density: 1.6,
                    stroke_width: 0.6,
                    alpha: 0.7,
                    ..Default::default()
                },
                threshold_offset: -0.05,
                color: None,
            },
            CrackPattern {
                id: 2,
                seed_offset: 0xa11ce,
                multipliers: PatternMultipliers {
                    seed_density: 2.5,
                    max_seeds: 1.5,
                    stroke_width: 0.8,
                    ..Default::default()
                },
                threshold_offset: -0.1,
                color: None,
            },
            CrackPattern {
                id: 3,
                seed_offset: 0xf7ac,
                multipliers: PatternMultipliers {
                    seed_density: 0.6,
                    stroke_width: 1.6,
                    alpha: 1.1,
                    min_length: 2.0,
                    ..Default::default()
                },
                threshold_offset: 0.05,
                color: Some([52, 44, 36]),
            },
        ]
    }

    /// Deterministically pick a pattern for a segment.
    pub fn for_segment(patterns: &[CrackPattern], seed: u64, segment_index: usize) -> Option<&CrackPattern> {
        if patterns.is_empty() {
            return None;
        }
        let mut hasher = SeedHasher::new();
        hasher.write_u64(seed);
        hasher.write_u64(segment_index as u64);
        patterns.get((hasher.finish() % patterns.len() as u64) as usize)
    }
}

// =============================================================================
// REQUESTS AND TILES
// =============================================================================

/// A sub-range of a segment, in segment parameter space, where the mask is active.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActiveInterval {
    /// Position of the interval among the segment's intervals
    pub index: usize,
    pub t_start: f64,
    pub t_end: f64,
}

impl ActiveInterval {
    pub fn new(index: usize, t_start: f64, t_end: f64) -> Self {
        Self { index, t_start, t_end }
    }

    /// Interval length in world units along `segment`.
    pub fn length_on(&self, segment: &RoadSegment) -> f64 {
        (self.t_end - self.t_start).abs() * segment.length()
    }
}

/// Affine placement of a tile in world space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TilePlacement {
    /// World position of the tile's pixel-space origin
    pub origin: Point,
    /// Unit vector along the segment (tile x axis)
    pub axis_u: Point,
    /// Unit vector across the segment (tile y axis)
    pub axis_v: Point,
    pub px_per_unit_u: f64,
    pub px_per_unit_v: f64,
}

impl TilePlacement {
    pub fn pixel_to_world(&self, px: f64, py: f64) -> Point {
        self.origin
            .add(self.axis_u.scale(px / self.px_per_unit_u))
            .add(self.axis_v.scale(py / self.px_per_unit_v))
    }

    pub fn world_to_pixel(&self, p: Point) -> (f64, f64) {
        let d = p.sub(self.origin);
        (d.dot(self.axis_u) * self.px_per_unit_u, d.dot(self.axis_v) * self.px_per_unit_v)
    }
}

/// An RGBA8 crack raster owned by the caller.
#[derive(Clone, Debug, PartialEq)]
pub struct RasterTile {
    pub width: usize,
    pub height: usize,
    /// Row-major RGBA, straight alpha
    pub pixels: Vec<u8>,
    pub placement: TilePlacement,
    /// Coarse stand-in produced when the real raster would blow the budget
    pub degraded: bool,
    /// False when the unfiltered fallback pattern was used
    pub filtered: bool,
    /// Pixels with non-zero alpha
    pub coverage: usize,
    pub pattern_id: u32,
}

impl RasterTile {
    /// RGBA at pixel `(x, y)`, or `None` outside the tile.
    pub fn pixel(&self, x: usize, y: usize) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y * self.width + x) * 4;
        match self.pixels.get(i..i + 4)? {
            &[r, g, b, a] => Some([r, g, b, a]),
            _ => None,
        }
    }

    /// Colour of the tile at a world point, or `None` outside the tile.
    pub fn sample_world(&self, p: Point) -> Option<[u8; 4]> {
        let (px, py) = self.placement.world_to_pixel(p);
        if !(px >= 0.0 && py >= 0.0 && px < self.width as f64 && py < self.height as f64) {
            return None;
        }
        self.pixel(px as usize, py as usize)
    }
}

/// Everything identifying one crack raster.
#[derive(Clone, Copy, Debug)]
pub struct CrackRequest<'a> {
    pub segment: &'a RoadSegment,
    pub segment_index: usize,
    pub interval: ActiveInterval,
    pub pattern: &'a CrackPattern,
    /// Global crack seed
    pub seed: u64,
}

/// Mask coupling for generation: seeds and pixels must pass `inside`, pixels must
/// also have fine noise at or above `threshold` (plus the pattern offset).
#[derive(Clone, Copy)]
pub struct CrackFilter<'a> {
    pub inside: &'a (dyn Fn(Point) -> bool + Sync),
    pub noise: Option<&'a (dyn Fn(Point) -> f64 + Sync)>,
    pub threshold: f64,
}

fn accept_all(_: Point) -> bool {
    true
}

static ACCEPT_ALL: fn(Point) -> bool = accept_all;

impl CrackFilter<'static> {
    /// Filter that accepts everything.
    pub fn none() -> Self {
        CrackFilter {
            inside: &ACCEPT_ALL,
            noise: None,
            threshold: 0.0,
        }
    }
}

// =============================================================================
// GENERATOR
// =============================================================================

/// Settings resolved against one pattern.
#[derive(Clone, Debug)]
struct Resolved {
    density: f64,
    max_seeds: usize,
    min_length: f64,
    px_along: f64,
    px_across: f64,
    stroke_radius: f64,
    alpha: f64,
    epsilon: f64,
    falloff: f64,
    alpha_exponent: f64,
    threshold_offset: f64,
    color: [u8; 3],
}

fn factor(v: f64) -> f64 {
    if v.is_finite() && v >= 0.0 { v } else { 1.0 }
}

/// Local rectangular footprint of an interval.
#[derive(Clone, Copy, Debug)]
struct Footprint {
    length: f64,
    width: f64,
    /// World position of local (0, 0): interval start, right-hand road edge
    origin: Point,
    axis_u: Point,
    axis_v: Point,
}

impl Footprint {
    fn to_world(&self, u: f64, v: f64) -> Point {
        self.origin.add(self.axis_u.scale(u)).add(self.axis_v.scale(v))
    }
}

/// Produces crack rasters from [`CrackSettings`].
#[derive(Clone, Debug)]
pub struct CrackRasterGenerator {
    settings: CrackSettings,
}

impl CrackRasterGenerator {
    pub fn new(settings: CrackSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &CrackSettings {
        &self.settings
    }

    fn resolve(&self, pattern: &CrackPattern) -> Resolved {
        let s = &self.settings;
        let m = &pattern.multipliers;
        let resolution = (s.resolution as f64 * factor(m.resolution))
            .round()
            .clamp(1.0, MAX_RESOLUTION as f64);
        Resolved {
            density: s.seed_density * factor(m.seed_density),
            max_seeds: ((s.max_seeds as f64 * factor(m.max_seeds)).round() as usize).max(MIN_SEEDS),
            min_length: s.min_length * factor(m.min_length),
            px_along: s.sample_along * factor(m.sample_along) * resolution,
            px_across: s.sample_across * factor(m.sample_across) * resolution,
            stroke_radius: (s.stroke_width * factor(m.stroke_width) * 0.5 * resolution).max(MIN_STROKE_RADIUS),
            alpha: (s.alpha * factor(m.alpha)).clamp(0.0, 1.0),
            epsilon: s.epsilon.max(MIN_EPSILON),
            falloff: s.falloff_exponent,
            alpha_exponent: s.alpha_exponent,
            threshold_offset: if pattern.threshold_offset.is_finite() { pattern.threshold_offset } else { 0.0 },
            color: pattern.color.unwrap_or(s.color),
        }
    }

    /// Generate the crack raster for one interval.
    ///
    /// Returns `None` for degenerate or too-short intervals and when even the
    /// unfiltered pattern covers no pixel.
    pub fn generate(&self, request: &CrackRequest<'_>, filter: &CrackFilter<'_>) -> Option<RasterTile> {
        let segment = request.segment;
        if !segment.is_drawable() {
            return None;
        }
        let interval = request.interval;
        if !interval.t_start.is_finite() || !interval.t_end.is_finite() {
            return None;
        }
        let t0 = interval.t_start.min(interval.t_end).clamp(0.0, 1.0);
        let t1 = interval.t_start.max(interval.t_end).clamp(0.0, 1.0);

        let params = self.resolve(request.pattern);
        let length = (t1 - t0) * segment.length();
        if length <= MIN_INTERVAL_LENGTH || length < params.min_length {
            return None;
        }

        let footprint = Footprint {
            length,
            width: segment.width,
            origin: segment.point_at(t0).sub(segment.normal().scale(segment.width * 0.5)),
            axis_u: segment.direction(),
            axis_v: segment.normal(),
        };

        // Size the raster before allocating anything
        let w_real = length * params.px_along;
        let h_real = segment.width * params.px_across;
        let scale = fit_scale(w_real, h_real, self.settings.max_pixels, self.settings.max_dimension);
        if scale < MIN_DOWNSCALE {
            warn!(
                segment = request.segment_index,
                interval = interval.index,
                scale,
                "crack raster exceeds budget; emitting placeholder"
            );
            return Some(self.placeholder(&footprint, &params, request.pattern.id));
        }
        if scale < 1.0 {
            warn!(segment = request.segment_index, scale, "downscaling crack raster to fit budget");
        }
        let width = ((w_real * scale).floor() as usize).max(1);
        let height = ((h_real * scale).floor() as usize).max(1);
        let placement = TilePlacement {
            origin: footprint.origin,
            axis_u: footprint.axis_u,
            axis_v: footprint.axis_v,
            px_per_unit_u: width as f64 / length,
            px_per_unit_v: height as f64 / segment.width,
        };

        let mut hasher = SeedHasher::new();
        hasher.write_u64(request.seed);
        hasher.write_u64(request.segment_index as u64);
        hasher.write_u64(interval.index as u64);
        hasher.write_f64(t0);
        hasher.write_f64(t1);
        hasher.write_f64(segment.width);
        hasher.write_u64(request.pattern.seed_offset);
        let rng_seed = hasher.finish();

        let pass = RasterPass {
            footprint: &footprint,
            params: &params,
            placement: &placement,
            width,
            height,
            rng_seed,
        };

        let threshold = filter.threshold + params.threshold_offset;
        let (pixels, coverage, filtered) = match pass.run(Some((filter, threshold))) {
            (pixels, coverage) if coverage > 0 => (pixels, coverage, true),
            _ => {
                // Mask or noise filtering removed everything: show the base pattern
                let (pixels, coverage) = pass.run(None);
                (pixels, coverage, false)
            }
        };
        if coverage == 0 {
            return None;
        }

        Some(RasterTile {
            width,
            height,
            pixels,
            placement,
            degraded: false,
            filtered,
            coverage,
            pattern_id: request.pattern.id,
        })
    }

    /// Coarse translucent stand-in covering the footprint.
    fn placeholder(&self, footprint: &Footprint, params: &Resolved, pattern_id: u32) -> RasterTile {
        let max_dim = PLACEHOLDER_MAX_DIM.min(self.settings.max_dimension);
        let scale = fit_scale(footprint.length, footprint.width, self.settings.max_pixels, max_dim);
        let width = ((footprint.length * scale).floor() as usize).max(1);
        let height = ((footprint.width * scale).floor() as usize).max(1);
        let [r, g, b] = params.color;
        let pixels = [r, g, b, PLACEHOLDER_ALPHA].repeat(width * height);

        RasterTile {
            width,
            height,
            pixels,
            placement: TilePlacement {
                origin: footprint.origin,
                axis_u: footprint.axis_u,
                axis_v: footprint.axis_v,
                px_per_unit_u: width as f64 / footprint.length,
                px_per_unit_v: height as f64 / footprint.width,
            },
            degraded: true,
            filtered: false,
            coverage: width * height,
            pattern_id,
        }
    }
}

/// Largest factor <= 1 that brings a `w x h` raster within both budgets.
fn fit_scale(w: f64, h: f64, max_pixels: usize, max_dim: usize) -> f64 {
    let mut scale = 1.0f64;
    if w * h > max_pixels as f64 {
        scale = scale.min((max_pixels as f64 / (w * h)).sqrt());
    }
    if w > max_dim as f64 {
        scale = scale.min(max_dim as f64 / w);
    }
    if h > max_dim as f64 {
        scale = scale.min(max_dim as f64 / h);
    }
    scale
}

/// One rasterization attempt, filtered or not.
struct RasterPass<'a> {
    footprint: &'a Footprint,
    params: &'a Resolved,
    placement: &'a TilePlacement,
    width: usize,
    height: usize,
    rng_seed: u64,
}

impl RasterPass<'_> {
    /// Returns RGBA pixels and the count of covered pixels.
    fn run(&self, filter: Option<(&CrackFilter<'_>, f64)>) -> (Vec<u8>, usize) {
        let fp = self.footprint;
        let params = self.params;

        let seeds = self.scatter(filter.map(|(f, _)| f.inside));
        if seeds.len() < 2 {
            return (Vec::new(), 0);
        }
        let index = SeedIndex::new(seeds, fp.length, fp.width);

        let (w, h) = (self.width, self.height);
        let eps = params.epsilon;
        let rows: Vec<Vec<f32>> = (0..h)
            .into_par_iter()
            .map(|j| {
                let v = (j as f64 + 0.5) / self.placement.px_per_unit_v;
                (0..w)
                    .map(|i| {
                        let u = (i as f64 + 0.5) / self.placement.px_per_unit_u;
                        if u > fp.length || v > fp.width {
                            return 0.0;
                        }
                        if let Some((f, threshold)) = filter {
                            let world = fp.to_world(u, v);
                            if !(f.inside)(world) {
                                return 0.0;
                            }
                            if let Some(noise) = f.noise {
                                let n = noise(world);
                                if n.is_nan() || n < threshold {
                                    return 0.0;
                                }
                            }
                        }
                        match index.nearest_two(u, v) {
                            Some((d1, d2)) => {
                                let delta = d2.sqrt() - d1.sqrt();
                                if delta <= eps {
                                    ((eps - delta) / eps).powf(params.falloff) as f32
                                } else {
                                    0.0
                                }
                            }
                            None => 0.0,
                        }
                    })
                    .collect()
            })
            .collect();

        let alpha = stamp(&rows, w, h, params);

        let [r, g, b] = params.color;
        let mut pixels = vec![0u8; w * h * 4];
        let mut coverage = 0;
        for (i, &a) in alpha.iter().enumerate() {
            let a8 = (a.clamp(0.0, 1.0) * 255.0).round() as u8;
            if a8 > 0 {
                coverage += 1;
                pixels[i * 4..i * 4 + 4].copy_from_slice(&[r, g, b, a8]);
            }
        }
        (pixels, coverage)
    }

    /// Uniformly scatter seeds in local (u, v), rejecting those failing `inside`.
    fn scatter(&self, inside: Option<&(dyn Fn(Point) -> bool + Sync)>) -> Vec<(f64, f64)> {
        let fp = self.footprint;
        let params = self.params;
        let wanted = ((fp.length * fp.width * params.density).round() as usize)
            .clamp(MIN_SEEDS, params.max_seeds.max(MIN_SEEDS));

        let mut rng = ChaCha8Rng::seed_from_u64(self.rng_seed);
        let mut seeds = Vec::with_capacity(wanted);
        for _ in 0..wanted * SCATTER_ATTEMPTS_PER_SEED {
            if seeds.len() == wanted {
                break;
            }
            let u = rng.gen::<f64>() * fp.length;
            let v = rng.gen::<f64>() * fp.width;
            if inside.map_or(true, |f| f(fp.to_world(u, v))) {
                seeds.push((u, v));
            }
        }
        seeds
    }
}

/// Max-blend anti-aliased discs at every crack pixel; returns per-pixel opacity.
fn stamp(rows: &[Vec<f32>], w: usize, h: usize, params: &Resolved) -> Vec<f32> {
    let mut alpha = vec![0f32; w * h];
    let radius = params.stroke_radius;
    let reach = (radius + 0.5).ceil() as i64;

    for (j, row) in rows.iter().enumerate() {
        for (i, &intensity) in row.iter().enumerate() {
            if intensity <= 0.0 {
                continue;
            }
            let peak = params.alpha * (intensity as f64).powf(params.alpha_exponent);
            for dy in -reach..=reach {
                let y = j as i64 + dy;
                if y < 0 || y >= h as i64 {
                    continue;
                }
                for dx in -reach..=reach {
                    let x = i as i64 + dx;
                    if x < 0 || x >= w as i64 {
                        continue;
                    }
                    let dist = ((dx * dx + dy * dy) as f64).sqrt();
                    let cover = (radius + 0.5 - dist).clamp(0.0, 1.0);
                    if cover <= 0.0 {
                        continue;
                    }
                    let idx = y as usize * w + x as usize;
                    let value = (peak * cover) as f32;
                    if value > alpha[idx] {
                        alpha[idx] = value;
                    }
                }
            }
        }
    }

    alpha
}

// =============================================================================
// SPATIAL INDEX
// =============================================================================

/// Uniform bucket grid over the footprint for nearest-seed queries.
struct SeedIndex {
    seeds: Vec<(f64, f64)>,
    cols: usize,
    rows: usize,
    cell_w: f64,
    cell_h: f64,
    cells: Vec<Vec<u32>>,
}

impl SeedIndex {
    fn new(seeds: Vec<(f64, f64)>, length: f64, width: f64) -> Self {
        let n = seeds.len().max(1) as f64;
        // About sqrt(n) cells per axis, stretched so cells stay roughly square
        let cols = ((n * length / width).sqrt().ceil() as usize).clamp(1, MAX_INDEX_CELLS_PER_AXIS);
        let rows = ((n * width / length).sqrt().ceil() as usize).clamp(1, MAX_INDEX_CELLS_PER_AXIS);
        let cell_w = length / cols as f64;
        let cell_h = width / rows as f64;

        let mut cells = vec![Vec::new(); cols * rows];
        for (i, &(u, v)) in seeds.iter().enumerate() {
            let cx = ((u / cell_w) as usize).min(cols - 1);
            let cy = ((v / cell_h) as usize).min(rows - 1);
            cells[cy * cols + cx].push(i as u32);
        }

        Self { seeds, cols, rows, cell_w, cell_h, cells }
    }

    /// Squared distances to the nearest and second-nearest seed.
    fn nearest_two(&self, u: f64, v: f64) -> Option<(f64, f64)> {
        let cx = ((u / self.cell_w) as i64).clamp(0, self.cols as i64 - 1);
        let cy = ((v / self.cell_h) as i64).clamp(0, self.rows as i64 - 1);

        for radius in 1..=2i64 {
            let mut best = (f64::INFINITY, f64::INFINITY);
            let mut found = 0;
            for y in (cy - radius).max(0)..=(cy + radius).min(self.rows as i64 - 1) {
                for x in (cx - radius).max(0)..=(cx + radius).min(self.cols as i64 - 1) {
                    for &i in &self.cells[y as usize * self.cols + x as usize] {
                        best = push_best(best, self.dist2(i as usize, u, v));
                        found += 1;
                    }
                }
            }
            if found >= 2 {
                return Some(best);
            }
        }

        if self.seeds.len() < 2 {
            return None;
        }
        let best = (0..self.seeds.len())
            .fold((f64::INFINITY, f64::INFINITY), |best, i| push_best(best, self.dist2(i, u, v)));
        Some(best)
    }

    fn dist2(&self, i: usize, u: f64, v: f64) -> f64 {
        let (su, sv) = self.seeds[i];
        (su - u) * (su - u) + (sv - v) * (sv - v)
    }
}

fn push_best((d1, d2): (f64, f64), d: f64) -> (f64, f64) {
    if d < d1 {
        (d, d1)
    } else if d < d2 {
        (d1, d)
    } else {
        (d1, d2)
    }
}
