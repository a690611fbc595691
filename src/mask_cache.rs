//! Coarse classification grid and its cache
//!
//! The visible viewport is covered by a lattice of coarse cells anchored at
//! integer multiples of the world cell size, so small camera moves map onto the
//! same lattice and the grid can be reused. Each cell carries the noise bucket,
//! base/fine noise samples, a road-presence flag and the final intersection flag.
//!
//! Two caches live here:
//! - the full grid, keyed on grid layout + classifier settings + road revision
//! - the road-presence sub-mask, keyed on grid layout + road revision only, so
//!   pure noise-parameter edits do not re-rasterize the road network

use std::collections::BTreeMap;
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::classify::{bucket_for, in_band, select_active_buckets, ActiveBuckets, BucketSelector};
use crate::config::{NoiseParams, OverlayConfig, SelectionStrategy};
use crate::geometry::{Point, RoadSegment, Viewport};
use crate::grid::Grid;
use crate::noise_field::NoiseField;
use crate::projection::ViewProjector;
use crate::roads::rasterize_roads;

// =============================================================================
// GRID PLANNING
// =============================================================================

/// Viewport diagonal (pixels) at which the base sample step is one pixel.
pub const STEP_REFERENCE_PX: f64 = 720.0;
/// Zoom exponent keeping perceived block size roughly constant.
pub const STEP_ZOOM_EXPONENT: f64 = 0.35;
pub const MIN_STEP_PX: f64 = 1.0;
pub const MAX_STEP_PX: f64 = 5.0;
/// Extra cells added around the snapped bounding box.
pub const GRID_PAD_CELLS: f64 = 2.0;

const MAX_PLAN_ITERATIONS: usize = 64;

/// Identity of a grid layout for cache lookups.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GridKey {
    pub min_cell_x: i64,
    pub min_cell_y: i64,
    pub width: usize,
    pub height: usize,
    world_step_bits: u64,
}

/// Placement and resolution of a coarse grid in world space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GridLayout {
    /// Sample step in screen pixels
    pub step_px: f64,
    /// Cell size in world units (`step_px / zoom`)
    pub world_step: f64,
    /// Lattice index of cell (0, 0)
    pub min_cell_x: i64,
    pub min_cell_y: i64,
    pub width: usize,
    pub height: usize,
}

/// Base sample step for a viewport and zoom, before the cell ceiling applies.
pub fn sample_step(viewport: &Viewport, zoom: f64) -> f64 {
    let diag = (viewport.width * viewport.height).sqrt();
    ((diag / STEP_REFERENCE_PX) / zoom.powf(STEP_ZOOM_EXPONENT))
        .round()
        .clamp(MIN_STEP_PX, MAX_STEP_PX)
}

impl GridLayout {
    /// Plan the grid covering `viewport` (padded by `pad_px`) under `projector`.
    ///
    /// Returns `None` when the view is degenerate (non-positive zoom, non-finite
    /// world step or bounds), which callers treat as "no mask".
    pub fn plan(
        projector: &ViewProjector,
        viewport: &Viewport,
        pad_px: f64,
        max_cells: usize,
    ) -> Option<GridLayout> {
        let zoom = projector.zoom();
        if !viewport.is_valid() || !zoom.is_finite() || zoom <= 0.0 || max_cells == 0 {
            return None;
        }

        let corners = viewport.padded(pad_px.max(0.0)).corners().map(|c| projector.screen_to_world(c));
        let mut min = Point::new(f64::INFINITY, f64::INFINITY);
        let mut max = Point::new(f64::NEG_INFINITY, f64::NEG_INFINITY);
        for c in corners {
            if !c.is_finite() {
                return None;
            }
            min = Point::new(min.x.min(c.x), min.y.min(c.y));
            max = Point::new(max.x.max(c.x), max.y.max(c.y));
        }

        let mut step = sample_step(viewport, zoom);
        for _ in 0..MAX_PLAN_ITERATIONS {
            let world_step = step / zoom;
            if !world_step.is_finite() || world_step <= 0.0 {
                return None;
            }

            let min_cx = (min.x / world_step).floor() - GRID_PAD_CELLS;
            let min_cy = (min.y / world_step).floor() - GRID_PAD_CELLS;
            let max_cx = (max.x / world_step).ceil() + GRID_PAD_CELLS;
            let max_cy = (max.y / world_step).ceil() + GRID_PAD_CELLS;
            let w = max_cx - min_cx;
            let h = max_cy - min_cy;
            if !w.is_finite() || !h.is_finite() {
                return None;
            }

            let total = w * h;
            if total <= max_cells as f64 {
                return Some(GridLayout {
                    step_px: step,
                    world_step,
                    min_cell_x: min_cx as i64,
                    min_cell_y: min_cy as i64,
                    width: w as usize,
                    height: h as usize,
                });
            }

            // Grow the step by the minimal factor; padding may need another pass
            step *= (total / max_cells as f64).sqrt().max(1.0 + 1e-9);
        }

        warn!(max_cells, "grid planning did not converge; skipping mask");
        None
    }

    pub fn key(&self) -> GridKey {
        GridKey {
            min_cell_x: self.min_cell_x,
            min_cell_y: self.min_cell_y,
            width: self.width,
            height: self.height,
            world_step_bits: self.world_step.to_bits(),
        }
    }

    pub fn cell_count(&self) -> usize {
        self.width * self.height
    }

    /// World position of the lower corner of cell (0, 0).
    pub fn origin(&self) -> Point {
        Point::new(
            self.min_cell_x as f64 * self.world_step,
            self.min_cell_y as f64 * self.world_step,
        )
    }

    pub fn cell_center(&self, x: usize, y: usize) -> Point {
        Point::new(
            (self.min_cell_x as f64 + x as f64 + 0.5) * self.world_step,
            (self.min_cell_y as f64 + y as f64 + 0.5) * self.world_step,
        )
    }

    /// Cell containing a world point, if inside the grid.
    pub fn cell_of(&self, p: Point) -> Option<(usize, usize)> {
        if !p.is_finite() {
            return None;
        }
        let cx = (p.x / self.world_step).floor() - self.min_cell_x as f64;
        let cy = (p.y / self.world_step).floor() - self.min_cell_y as f64;
        if cx < 0.0 || cy < 0.0 || cx >= self.width as f64 || cy >= self.height as f64 {
            return None;
        }
        Some((cx as usize, cy as usize))
    }
}

// =============================================================================
// CLASSIFIER SETTINGS
// =============================================================================

/// Everything besides layout and roads that determines the grid contents.
#[derive(Clone, Debug, PartialEq)]
pub struct ClassifierSettings {
    pub noise: NoiseParams,
    pub bucket_count: u32,
    pub max_active_buckets: u32,
    pub strategy: SelectionStrategy,
    pub band_width: f64,
    pub forced_active_bucket_ids: Option<Vec<u32>>,
    /// Bumped whenever a custom selector is installed
    pub selector_revision: u64,
}

impl ClassifierSettings {
    pub fn from_config(config: &OverlayConfig, selector_revision: u64) -> Self {
        Self {
            noise: config.noise.clone(),
            bucket_count: config.bucket_count,
            max_active_buckets: config.max_active_buckets,
            strategy: config.selection_strategy,
            band_width: config.band_width,
            forced_active_bucket_ids: config.forced_active_bucket_ids.clone(),
            selector_revision,
        }
    }
}

// =============================================================================
// COARSE GRID
// =============================================================================

/// A fully classified coarse grid. Immutable once built; shared via `Arc`.
#[derive(Clone, Debug)]
pub struct CoarseGrid {
    pub layout: GridLayout,
    /// Bucket id per cell (0 for cells whose noise was NaN)
    pub buckets: Grid<u8>,
    pub base: Grid<f32>,
    pub fine: Grid<f32>,
    pub road: Grid<bool>,
    pub intersection: Grid<bool>,
    pub active: ActiveBuckets,
    /// True when road rasterization came back empty and every cell was marked road
    pub road_fail_open: bool,
    /// Monotonic build counter of the owning cache
    pub generation: u64,
}

/// Debug view of the intersection mask.
#[derive(Clone, Debug, PartialEq)]
pub struct MaskSnapshot {
    pub origin: Point,
    pub cell_size: f64,
    pub width: usize,
    pub height: usize,
    /// Row-major intersection flags
    pub bitmap: Vec<bool>,
}

impl MaskSnapshot {
    pub fn active_cells(&self) -> usize {
        self.bitmap.iter().filter(|&&b| b).count()
    }
}

impl CoarseGrid {
    /// O(1) intersection lookup at a world point; false outside the grid.
    pub fn is_active(&self, x: f64, y: f64) -> bool {
        match self.layout.cell_of(Point::new(x, y)) {
            Some((cx, cy)) => *self.intersection.get(cx, cy),
            None => false,
        }
    }

    pub fn active_cells(&self) -> usize {
        self.intersection.count_true()
    }

    pub fn active_counts(&self) -> BTreeMap<u8, usize> {
        self.active.active_counts()
    }

    pub fn snapshot(&self) -> MaskSnapshot {
        MaskSnapshot {
            origin: self.layout.origin(),
            cell_size: self.layout.world_step,
            width: self.layout.width,
            height: self.layout.height,
            bitmap: self.intersection.as_slice().to_vec(),
        }
    }

    /// Fine noise of the cell containing `p` (NaN outside the grid).
    pub fn fine_at(&self, p: Point) -> f64 {
        match self.layout.cell_of(p) {
            Some((cx, cy)) => *self.fine.get(cx, cy) as f64,
            None => f64::NAN,
        }
    }
}

/// Snapshot predicate over a grid's intersection mask, valid until the next
/// invalidation replaces the grid.
#[derive(Clone, Debug)]
pub struct MaskTester {
    grid: Arc<CoarseGrid>,
}

impl MaskTester {
    pub fn new(grid: Arc<CoarseGrid>) -> Self {
        Self { grid }
    }

    pub fn contains(&self, p: Point) -> bool {
        self.grid.is_active(p.x, p.y)
    }

    pub fn grid(&self) -> &CoarseGrid {
        &self.grid
    }
}

// =============================================================================
// CACHE
// =============================================================================

/// Cache statistics for monitoring (and for asserting reuse in tests)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Grid requests served from cache
    pub hits: usize,
    /// Grid rebuilds
    pub misses: usize,
    /// Road sub-mask reuses
    pub road_hits: usize,
    /// Road sub-mask rasterizations
    pub road_misses: usize,
    /// Contour requests served from cache
    pub contour_hits: usize,
    /// Contour extractions
    pub contour_misses: usize,
}

impl CacheStats {
    /// Grid hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f32 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f32 / total as f32
        }
    }

    /// Format as human-readable string
    pub fn summary(&self) -> String {
        format!(
            "Grid hits: {} | misses: {} | Rate: {:.1}% | Road hits: {} | misses: {} | Contours: {}/{}",
            self.hits,
            self.misses,
            self.hit_rate() * 100.0,
            self.road_hits,
            self.road_misses,
            self.contour_hits,
            self.contour_hits + self.contour_misses,
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
struct MaskKey {
    grid: GridKey,
    settings: ClassifierSettings,
    roads_revision: u64,
}

struct RoadMaskEntry {
    grid: GridKey,
    roads_revision: u64,
    mask: Grid<bool>,
    fail_open: bool,
}

/// Inputs for one classification pass.
pub struct MaskInputs<'a> {
    pub layout: GridLayout,
    pub settings: &'a ClassifierSettings,
    pub noise: &'a NoiseField,
    pub roads: &'a [RoadSegment],
    pub roads_revision: u64,
    pub selector: &'a dyn BucketSelector,
}

/// Outcome of [`MaskCache::ensure`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MaskRefresh {
    /// Existing grid reused
    Hit,
    /// Grid recomputed
    Rebuilt,
}

/// Owns the current coarse grid and its road sub-mask.
#[derive(Default)]
pub struct MaskCache {
    grid: Option<Arc<CoarseGrid>>,
    key: Option<MaskKey>,
    roads: Option<RoadMaskEntry>,
    stats: CacheStats,
    generation: u64,
}

impl MaskCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure the cached grid matches `inputs`, rebuilding it if not.
    pub fn ensure(&mut self, inputs: &MaskInputs<'_>) -> MaskRefresh {
        let key = MaskKey {
            grid: inputs.layout.key(),
            settings: inputs.settings.clone(),
            roads_revision: inputs.roads_revision,
        };

        if self.grid.is_some() && self.key.as_ref() == Some(&key) {
            self.stats.hits += 1;
            return MaskRefresh::Hit;
        }

        self.stats.misses += 1;
        self.generation += 1;
        let (road, road_fail_open) = self.road_mask(inputs);
        let grid = classify_grid(inputs, road, road_fail_open, self.generation);
        debug!(
            generation = self.generation,
            width = grid.layout.width,
            height = grid.layout.height,
            active_cells = grid.active_cells(),
            "rebuilt coarse mask"
        );

        self.grid = Some(Arc::new(grid));
        self.key = Some(key);
        MaskRefresh::Rebuilt
    }

    /// Road-presence mask for the layout, reusing the previous one when only noise
    /// parameters changed.
    fn road_mask(&mut self, inputs: &MaskInputs<'_>) -> (Grid<bool>, bool) {
        let grid_key = inputs.layout.key();
        if let Some(entry) = &self.roads {
            if entry.grid == grid_key && entry.roads_revision == inputs.roads_revision {
                self.stats.road_hits += 1;
                return (entry.mask.clone(), entry.fail_open);
            }
        }

        self.stats.road_misses += 1;
        let layout = &inputs.layout;
        let mut mask = rasterize_roads(
            inputs.roads,
            layout.origin(),
            layout.world_step,
            layout.width,
            layout.height,
        );
        let fail_open = mask.count_true() == 0;
        if fail_open {
            if !inputs.roads.is_empty() {
                warn!(segments = inputs.roads.len(), "road mask empty; treating every cell as road");
            }
            mask.fill(true);
        }

        self.roads = Some(RoadMaskEntry {
            grid: grid_key,
            roads_revision: inputs.roads_revision,
            mask: mask.clone(),
            fail_open,
        });
        (mask, fail_open)
    }

    pub fn grid(&self) -> Option<&Arc<CoarseGrid>> {
        self.grid.as_ref()
    }

    /// Drop the current grid ("no mask"). The road sub-mask is kept.
    pub fn clear(&mut self) {
        self.grid = None;
        self.key = None;
    }

    /// Drop everything, including the road sub-mask.
    pub fn invalidate_all(&mut self) {
        self.clear();
        self.roads = None;
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut CacheStats {
        &mut self.stats
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Sample noise for every cell, pick active buckets and build the intersection.
fn classify_grid(
    inputs: &MaskInputs<'_>,
    road: Grid<bool>,
    road_fail_open: bool,
    generation: u64,
) -> CoarseGrid {
    let layout = inputs.layout;
    let settings = inputs.settings;
    let (w, h) = (layout.width, layout.height);
    let noise = inputs.noise;

    let rows: Vec<(Vec<f32>, Vec<f32>)> = (0..h)
        .into_par_iter()
        .map(|y| {
            let mut base_row = Vec::with_capacity(w);
            let mut fine_row = Vec::with_capacity(w);
            for x in 0..w {
                let c = layout.cell_center(x, y);
                base_row.push(noise.sample(c.x, c.y) as f32);
                fine_row.push(noise.sample_fine(c.x, c.y) as f32);
            }
            (base_row, fine_row)
        })
        .collect();

    let mut base_data = Vec::with_capacity(w * h);
    let mut fine_data = Vec::with_capacity(w * h);
    for (base_row, fine_row) in rows {
        base_data.extend(base_row);
        fine_data.extend(fine_row);
    }

    let n = settings.bucket_count;
    let mut counts = vec![0usize; n.min(256) as usize];
    let bucket_data: Vec<u8> = base_data
        .iter()
        .map(|&v| match bucket_for(v as f64, n) {
            Some(id) => {
                counts[id as usize] += 1;
                id
            }
            None => 0,
        })
        .collect();

    let active = select_active_buckets(
        &counts,
        settings.max_active_buckets as usize,
        inputs.selector,
        settings.forced_active_bucket_ids.as_deref(),
    );

    let intersection_data: Vec<bool> = (0..w * h)
        .map(|i| {
            let v = base_data[i] as f64;
            let id = bucket_data[i];
            road.as_slice()[i]
                && !v.is_nan()
                && active.contains(id)
                && in_band(v, id, n, settings.band_width)
        })
        .collect();

    CoarseGrid {
        layout,
        buckets: Grid::from_vec(w, h, bucket_data).unwrap_or_else(|| Grid::new(w, h)),
        base: Grid::from_vec(w, h, base_data).unwrap_or_else(|| Grid::new(w, h)),
        fine: Grid::from_vec(w, h, fine_data).unwrap_or_else(|| Grid::new(w, h)),
        road,
        intersection: Grid::from_vec(w, h, intersection_data).unwrap_or_else(|| Grid::new(w, h)),
        active,
        road_fail_open,
        generation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::StrategySelector;
    use crate::projection::{ProjectionMatrix, ViewState};

    fn settings(config: &OverlayConfig) -> ClassifierSettings {
        ClassifierSettings::from_config(config, 0)
    }

    fn layout_for(zoom: f64) -> GridLayout {
        let projector = ViewProjector::new(ViewState::new(0.0, 0.0, zoom), None);
        GridLayout::plan(&projector, &Viewport::sized(800.0, 600.0), 64.0, 20_000).unwrap()
    }

    fn road() -> Vec<RoadSegment> {
        vec![RoadSegment::new(Point::new(-500.0, 100.0), Point::new(900.0, 100.0), 40.0)]
    }

    fn build(cache: &mut MaskCache, config: &OverlayConfig, layout: GridLayout, roads: &[RoadSegment], rev: u64) -> MaskRefresh {
        let noise = NoiseField::new(&config.noise);
        let settings = settings(config);
        let selector = StrategySelector::new(config.selection_strategy, 1);
        cache.ensure(&MaskInputs {
            layout,
            settings: &settings,
            noise: &noise,
            roads,
            roads_revision: rev,
            selector: &selector,
        })
    }

    #[test]
    fn test_sample_step_formula() {
        assert_eq!(sample_step(&Viewport::sized(720.0, 720.0), 1.0), 1.0);
        assert_eq!(sample_step(&Viewport::sized(2160.0, 2160.0), 1.0), 3.0);
        assert_eq!(sample_step(&Viewport::sized(4096.0, 4096.0), 0.001), 5.0);
        assert_eq!(sample_step(&Viewport::sized(100.0, 100.0), 1000.0), 1.0);
    }

    #[test]
    fn test_cell_count_bounded_for_all_zooms() {
        let zooms = [0.001, 0.01, 0.1, 0.5, 1.0, 3.7, 10.0, 100.0, 1000.0];
        let sizes = [(320.0, 240.0), (1920.0, 1080.0), (4096.0, 4096.0)];
        for projection in [None, Some(ProjectionMatrix::isometric())] {
            for &zoom in &zooms {
                for &(w, h) in &sizes {
                    let projector = ViewProjector::new(ViewState::new(1234.5, -987.0, zoom), projection);
                    let layout = GridLayout::plan(&projector, &Viewport::sized(w, h), 64.0, 20_000)
                        .expect("plan");
                    assert!(
                        layout.cell_count() <= 20_000,
                        "zoom {} size {}x{}: {} cells",
                        zoom, w, h, layout.cell_count()
                    );
                }
            }
        }
    }

    #[test]
    fn test_degenerate_zoom_gives_no_layout() {
        for zoom in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let projector = ViewProjector::new(ViewState::new(0.0, 0.0, zoom), None);
            assert!(GridLayout::plan(&projector, &Viewport::sized(800.0, 600.0), 64.0, 20_000).is_none());
        }
    }

    #[test]
    fn test_layout_is_lattice_anchored() {
        let plan_at = |cam: f64| {
            let projector = ViewProjector::new(ViewState::new(cam, cam, 1.0), None);
            GridLayout::plan(&projector, &Viewport::sized(800.0, 600.0), 64.0, 1_000_000).unwrap()
        };
        // sub-cell camera move keeps the same lattice
        let a = plan_at(0.3);
        let b = plan_at(0.5);
        assert_eq!(a.world_step, 1.0);
        assert_eq!(a.key(), b.key());
        assert_ne!(a.key(), plan_at(3.0).key());
        let origin = a.origin();
        assert_eq!(origin.x / a.world_step, a.min_cell_x as f64);
        assert_eq!(a.cell_of(a.cell_center(3, 4)), Some((3, 4)));
    }

    #[test]
    fn test_grid_reuse_and_invalidation() {
        let config = OverlayConfig::default();
        let layout = layout_for(1.0);
        let roads = road();
        let mut cache = MaskCache::new();

        assert_eq!(build(&mut cache, &config, layout, &roads, 1), MaskRefresh::Rebuilt);
        assert_eq!(build(&mut cache, &config, layout, &roads, 1), MaskRefresh::Hit);
        assert_eq!(cache.stats().misses, 1);
        assert_eq!(cache.stats().hits, 1);

        // road revision change rebuilds
        assert_eq!(build(&mut cache, &config, layout, &roads, 2), MaskRefresh::Rebuilt);
        assert_eq!(cache.stats().road_misses, 2);

        // noise edit rebuilds the grid but reuses the road mask
        let mut reseeded = config.clone();
        reseeded.noise.seed += 1;
        assert_eq!(build(&mut cache, &reseeded, layout, &roads, 2), MaskRefresh::Rebuilt);
        assert_eq!(cache.stats().road_misses, 2);
        assert_eq!(cache.stats().road_hits, 1);
        assert_eq!(cache.generation(), 3);
    }

    #[test]
    fn test_active_set_and_intersection_rules() {
        let config = OverlayConfig::default();
        let mut cache = MaskCache::new();
        build(&mut cache, &config, layout_for(1.0), &road(), 1);
        let grid = cache.grid().unwrap();

        assert_eq!(grid.active.len(), config.max_active_buckets as usize);
        for (x, y, &hit) in grid.intersection.iter() {
            if hit {
                let id = *grid.buckets.get(x, y);
                assert!(*grid.road.get(x, y));
                assert!(grid.active.contains(id));
                assert!(in_band(*grid.base.get(x, y) as f64, id, config.bucket_count, config.band_width));
            }
        }
        // cells far from the road are never active
        assert!(!grid.road_fail_open);
        assert!(!grid.is_active(0.0, 400.0));
    }

    #[test]
    fn test_wider_band_never_shrinks_mask() {
        let layout = layout_for(0.5);
        let roads = road();
        let mut previous = 0;
        for band in [0.0, 0.02, 0.05, 0.1, 0.2, 0.5] {
            let mut config = OverlayConfig::default();
            config.band_width = band;
            let mut cache = MaskCache::new();
            build(&mut cache, &config, layout, &roads, 1);
            let cells = cache.grid().unwrap().active_cells();
            assert!(cells >= previous, "band {} gave {} < {}", band, cells, previous);
            previous = cells;
        }
    }

    #[test]
    fn test_empty_road_mask_fails_open() {
        let config = OverlayConfig::default();
        let mut cache = MaskCache::new();
        build(&mut cache, &config, layout_for(1.0), &[], 1);
        let grid = cache.grid().unwrap();
        assert!(grid.road_fail_open);
        assert_eq!(grid.road.count_true(), grid.layout.cell_count());
    }

    #[test]
    fn test_snapshot_matches_grid() {
        let config = OverlayConfig::default();
        let mut cache = MaskCache::new();
        build(&mut cache, &config, layout_for(1.0), &road(), 1);
        let grid = cache.grid().unwrap().clone();
        let snap = grid.snapshot();
        assert_eq!(snap.bitmap.len(), snap.width * snap.height);
        assert_eq!(snap.active_cells(), grid.active_cells());
        assert_eq!(snap.cell_size, grid.layout.world_step);

        let tester = MaskTester::new(grid.clone());
        let c = grid.layout.cell_center(5, 5);
        assert_eq!(tester.contains(c), *grid.intersection.get(5, 5));
        assert!(!tester.contains(Point::new(f64::NAN, 0.0)));
    }

    #[test]
    fn test_fine_noise_is_cached_per_cell() {
        let config = OverlayConfig::default();
        let noise = NoiseField::new(&config.noise);
        let mut cache = MaskCache::new();
        build(&mut cache, &config, layout_for(1.0), &road(), 1);
        let grid = cache.grid().unwrap();

        let c = grid.layout.cell_center(7, 3);
        assert_eq!(grid.fine_at(c), noise.sample_fine(c.x, c.y) as f32 as f64);
        // any point in the cell reads the same cached sample
        let nudged = Point::new(c.x + grid.layout.world_step * 0.25, c.y - grid.layout.world_step * 0.25);
        assert_eq!(grid.fine_at(nudged), grid.fine_at(c));
        assert!(grid.fine_at(Point::new(1e9, 0.0)).is_nan());
    }
}
