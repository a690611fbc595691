//! Overlay engine: the public entry point
//!
//! One `OverlayEngine` per view/session owns configuration, camera state,
//! road geometry and every cache. Inputs only mark the overlay dirty through the
//! [`RedrawScheduler`]; the host drives recomputation by calling [`OverlayEngine::frame`]
//! from its display-refresh callback (or [`OverlayEngine::refresh`] directly).

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::classify::{ActiveBuckets, BucketSelector, StrategySelector};
use crate::config::{ConfigError, ConfigPatch, OverlayConfig};
use crate::contour::{self, ContourMode, ContourPolyline};
use crate::crack::{ActiveInterval, CrackFilter, CrackPattern, CrackRasterGenerator, CrackRequest, RasterTile};
use crate::geometry::{Point, RoadSegment, Viewport};
use crate::mask_cache::{ClassifierSettings, GridLayout, MaskCache, MaskInputs, MaskRefresh, MaskSnapshot, MaskTester, CacheStats};
use crate::noise_field::NoiseField;
use crate::projection::{ProjectionMatrix, ViewProjector, ViewState};
use crate::scheduler::RedrawScheduler;
use crate::seeds::OverlaySeeds;

/// Centreline samples per coarse cell when searching for active intervals.
pub const CENTRELINE_SAMPLES_PER_CELL: f64 = 2.0;
/// Interval padding, in coarse cells, converted to parametric space per segment.
pub const INTERVAL_PADDING_CELLS: f64 = 1.0;

/// Notifications delivered to subscribers.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum OverlayEvent {
    Toggled(bool),
    MaskUpdated { generation: u64, active_cells: usize },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Observer = Box<dyn FnMut(&OverlayEvent)>;

#[derive(Clone, Debug, PartialEq)]
struct ContourKey {
    generation: u64,
    view: ViewState,
    projection: ProjectionMatrix,
    threshold_bits: u64,
    mode: ContourMode,
}

pub struct OverlayEngine {
    config: OverlayConfig,
    seeds: OverlaySeeds,
    noise: NoiseField,
    generator: CrackRasterGenerator,
    patterns: Vec<CrackPattern>,

    view: ViewState,
    projection: Option<ProjectionMatrix>,
    viewport: Viewport,
    roads: Vec<RoadSegment>,
    roads_revision: u64,

    selector: Box<dyn BucketSelector>,
    custom_selector: bool,
    selector_revision: u64,

    cache: MaskCache,
    contours: Vec<(ContourKey, Arc<Vec<ContourPolyline>>)>,
    scheduler: RedrawScheduler,

    observers: Vec<(SubscriptionId, Observer)>,
    next_subscription: u64,
    published_generation: Option<u64>,
}

impl OverlayEngine {
    pub fn new(config: OverlayConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let seeds = OverlaySeeds::from_master(config.noise.seed);
        let mut scheduler = RedrawScheduler::new();
        scheduler.request();

        Ok(Self {
            noise: NoiseField::new(&config.noise),
            generator: CrackRasterGenerator::new(config.crack.clone()),
            patterns: CrackPattern::variants(),
            selector: Box::new(StrategySelector::new(config.selection_strategy, seeds.selection)),
            seeds,
            config,
            view: ViewState::default(),
            projection: None,
            viewport: Viewport::sized(800.0, 600.0),
            roads: Vec::new(),
            roads_revision: 0,
            custom_selector: false,
            selector_revision: 0,
            cache: MaskCache::new(),
            contours: Vec::new(),
            scheduler,
            observers: Vec::new(),
            next_subscription: 0,
            published_generation: None,
        })
    }

    // =========================================================================
    // INPUTS
    // =========================================================================

    pub fn config(&self) -> &OverlayConfig {
        &self.config
    }

    /// Apply a validated partial update. On error nothing changes.
    pub fn update_config(&mut self, patch: &ConfigPatch) -> Result<(), ConfigError> {
        let next = self.config.update(patch)?;
        let toggled = next.enabled != self.config.enabled;

        if next.noise != self.config.noise {
            self.noise = NoiseField::new(&next.noise);
            self.seeds = OverlaySeeds::from_master(next.noise.seed);
        }
        if next.crack != self.config.crack {
            self.generator = CrackRasterGenerator::new(next.crack.clone());
        }
        self.config = next;
        if !self.custom_selector {
            self.selector = Box::new(StrategySelector::new(self.config.selection_strategy, self.seeds.selection));
        }

        if toggled {
            self.on_toggle();
        } else if !patch.is_toggle_only() {
            self.request_redraw();
        }
        Ok(())
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if enabled != self.config.enabled {
            self.config.enabled = enabled;
            self.on_toggle();
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn on_toggle(&mut self) {
        let enabled = self.config.enabled;
        if enabled {
            self.request_redraw();
        } else {
            self.scheduler.cancel();
        }
        self.emit(OverlayEvent::Toggled(enabled));
    }

    pub fn set_view(&mut self, view: ViewState) {
        if view != self.view {
            self.view = view;
            self.request_redraw();
        }
    }

    pub fn view(&self) -> ViewState {
        self.view
    }

    pub fn set_projection(&mut self, projection: Option<ProjectionMatrix>) {
        if projection != self.projection {
            self.projection = projection;
            self.request_redraw();
        }
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        if viewport != self.viewport {
            self.viewport = viewport;
            self.request_redraw();
        }
    }

    /// Replace the road network. Always counts as a new revision.
    pub fn set_roads(&mut self, roads: Vec<RoadSegment>) {
        self.roads = roads;
        self.roads_revision += 1;
        self.request_redraw();
    }

    pub fn roads(&self) -> &[RoadSegment] {
        &self.roads
    }

    /// Install a custom active-bucket selector in place of the configured strategy.
    pub fn set_selector(&mut self, selector: Box<dyn BucketSelector>) {
        debug!(selector = selector.name(), "installing bucket selector");
        self.selector = selector;
        self.custom_selector = true;
        self.selector_revision += 1;
        self.request_redraw();
    }

    /// Go back to the configured strategy.
    pub fn reset_selector(&mut self) {
        self.selector = Box::new(StrategySelector::new(self.config.selection_strategy, self.seeds.selection));
        self.custom_selector = false;
        self.selector_revision += 1;
        self.request_redraw();
    }

    pub fn set_patterns(&mut self, patterns: Vec<CrackPattern>) {
        self.patterns = patterns;
    }

    pub fn patterns(&self) -> &[CrackPattern] {
        &self.patterns
    }

    /// Drop every cached result and schedule a redraw.
    pub fn invalidate(&mut self) {
        self.cache.invalidate_all();
        self.contours.clear();
        self.request_redraw();
    }

    fn request_redraw(&mut self) {
        if !self.config.enabled {
            return;
        }
        if !self.scheduler.request() {
            debug!(generation = self.scheduler.generation(), "redraw already pending");
        }
    }

    pub fn redraw_pending(&self) -> bool {
        self.scheduler.is_pending()
    }

    /// Drop a pending redraw, e.g. when the owning view is torn down.
    pub fn cancel_redraw(&mut self) -> bool {
        self.scheduler.cancel()
    }

    // =========================================================================
    // OBSERVERS
    // =========================================================================

    pub fn subscribe(&mut self, observer: impl FnMut(&OverlayEvent) + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.observers.push((id, Box::new(observer)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(sid, _)| *sid != id);
        self.observers.len() != before
    }

    fn emit(&mut self, event: OverlayEvent) {
        for (_, observer) in &mut self.observers {
            observer(&event);
        }
    }

    // =========================================================================
    // RECOMPUTE
    // =========================================================================

    /// Run the pending redraw, if any. Returns true if a redraw ran.
    pub fn frame(&mut self) -> bool {
        let Some(ticket) = self.scheduler.take() else {
            return false;
        };
        debug!(generation = ticket.generation, "running redraw");
        self.refresh();
        true
    }

    pub fn projector(&self) -> ViewProjector {
        ViewProjector::new(self.view, self.projection)
    }

    /// Grid layout for the current view, or `None` for a degenerate view.
    pub fn layout(&self) -> Option<GridLayout> {
        GridLayout::plan(&self.projector(), &self.viewport, self.config.pad_px, self.config.max_cells)
    }

    /// Bring the mask up to date with the current inputs.
    ///
    /// Returns `None` when disabled or when the view is degenerate (the mask is
    /// then cleared and every point reads as inactive).
    pub fn refresh(&mut self) -> Option<MaskRefresh> {
        if !self.config.enabled {
            return None;
        }
        let Some(layout) = self.layout() else {
            debug!(zoom = self.view.zoom, "degenerate view; clearing mask");
            self.cache.clear();
            return None;
        };

        let settings = ClassifierSettings::from_config(&self.config, self.selector_revision);
        let refresh = self.cache.ensure(&MaskInputs {
            layout,
            settings: &settings,
            noise: &self.noise,
            roads: &self.roads,
            roads_revision: self.roads_revision,
            selector: self.selector.as_ref(),
        });

        let update = self.cache.grid().and_then(|grid| {
            (self.published_generation != Some(grid.generation))
                .then(|| (grid.generation, grid.active_cells()))
        });
        if let Some((generation, active_cells)) = update {
            self.published_generation = Some(generation);
            self.contours.retain(|(key, _)| key.generation == generation);
            self.emit(OverlayEvent::MaskUpdated { generation, active_cells });
        }

        Some(refresh)
    }

    // =========================================================================
    // OUTPUTS
    // =========================================================================

    /// Whether the last computed mask covers a world point. Fails closed: false
    /// when disabled, before the first refresh and outside the grid.
    pub fn is_point_active(&self, x: f64, y: f64) -> bool {
        self.config.enabled && self.cache.grid().map_or(false, |grid| grid.is_active(x, y))
    }

    pub fn mask_snapshot(&self) -> Option<MaskSnapshot> {
        self.cache.grid().map(|grid| grid.snapshot())
    }

    /// `{bucket id: coarse sample count}` for the active buckets.
    pub fn active_buckets(&self) -> BTreeMap<u8, usize> {
        self.cache.grid().map(|grid| grid.active_counts()).unwrap_or_default()
    }

    pub fn active_bucket_set(&self) -> Option<&ActiveBuckets> {
        self.cache.grid().map(|grid| &grid.active)
    }

    /// Point-in-mask predicate over the current grid snapshot.
    pub fn tester(&self) -> Option<MaskTester> {
        self.cache.grid().cloned().map(MaskTester::new)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Deterministic pattern choice for a road segment.
    pub fn pattern_for_segment(&self, segment_index: usize) -> Option<&CrackPattern> {
        CrackPattern::for_segment(&self.patterns, self.seeds.cracks, segment_index)
    }

    /// Parametric intervals of a segment where the mask is on.
    pub fn active_intervals(&self, segment_index: usize) -> Vec<ActiveInterval> {
        let (Some(segment), Some(grid)) = (self.roads.get(segment_index), self.cache.grid()) else {
            return Vec::new();
        };
        if !self.config.enabled || !segment.is_drawable() {
            return Vec::new();
        }
        let step = grid.layout.world_step;
        contour::active_intervals(
            segment,
            |p| grid.is_active(p.x, p.y),
            step / CENTRELINE_SAMPLES_PER_CELL,
            INTERVAL_PADDING_CELLS * step / segment.length(),
        )
    }

    /// Crack raster for one interval of one segment, or `None` when there is
    /// nothing to draw.
    pub fn generate_crack_raster(
        &self,
        segment_index: usize,
        interval: &ActiveInterval,
        pattern: &CrackPattern,
    ) -> Option<RasterTile> {
        let segment = self.roads.get(segment_index)?;
        let grid = self.cache.grid()?;
        if !self.config.enabled {
            return None;
        }

        // Fine noise comes from the cached per-cell samples, not the live field
        let inside = |p: Point| grid.is_active(p.x, p.y);
        let fine = |p: Point| grid.fine_at(p);
        let filter = CrackFilter {
            inside: &inside,
            noise: Some(&fine),
            threshold: self.config.noise_threshold,
        };
        self.generator.generate(
            &CrackRequest {
                segment,
                segment_index,
                interval: *interval,
                pattern,
                seed: self.seeds.cracks,
            },
            &filter,
        )
    }

    /// Rasters for every active interval of every road, each with its segment's pattern.
    pub fn generate_all_cracks(&self) -> Vec<RasterTile> {
        (0..self.roads.len())
            .flat_map(|index| {
                let pattern = self.pattern_for_segment(index).cloned().unwrap_or_default();
                self.active_intervals(index)
                    .into_iter()
                    .filter_map(move |interval| self.generate_crack_raster(index, &interval, &pattern))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Screen-space outlines of the current mask. Cached per mask generation,
    /// view, projection, band threshold and mode.
    pub fn extract_contours(&mut self, mode: ContourMode) -> Arc<Vec<ContourPolyline>> {
        let Some(grid) = self.cache.grid().cloned() else {
            return Arc::new(Vec::new());
        };
        if !self.config.enabled {
            return Arc::new(Vec::new());
        }
        let projector = self.projector();
        let key = ContourKey {
            generation: grid.generation,
            view: self.view,
            projection: projector.projection(),
            threshold_bits: self.config.band_width.to_bits(),
            mode,
        };

        if let Some((_, cached)) = self.contours.iter().find(|(k, _)| *k == key) {
            let cached = cached.clone();
            self.cache.stats_mut().contour_hits += 1;
            return cached;
        }
        self.cache.stats_mut().contour_misses += 1;

        let polylines = match mode {
            ContourMode::Mask => contour::mask_contours(&grid.intersection, &grid.layout, &projector),
            ContourMode::RoadHugging => {
                let intervals: Vec<Vec<ActiveInterval>> =
                    (0..self.roads.len()).map(|i| self.active_intervals(i)).collect();
                contour::road_contours(&self.roads, &intervals, &projector)
            }
        };
        debug!(?mode, polylines = polylines.len(), generation = grid.generation, "extracted contours");

        let polylines = Arc::new(polylines);
        self.contours.retain(|(k, _)| k.mode != mode);
        self.contours.push((key, polylines.clone()));
        polylines
    }
}
