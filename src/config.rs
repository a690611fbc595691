//! Overlay configuration, validation and partial updates
//!
//! All tunables live in [`OverlayConfig`]. The struct is validated once at the
//! boundary ([`OverlayConfig::validate`], [`OverlayConfig::update`]) so the hot
//! paths (per-cell sampling, per-pixel rasterization) never re-check invariants.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bucket ids are stored as `u8` in the coarse grid.
pub const MAX_BUCKETS: u32 = 256;

/// Smallest accepted coarse cell ceiling (grid padding alone needs a few cells).
pub const MIN_CELL_CEILING: usize = 64;

/// Largest supersampling factor for crack rasters.
pub const MAX_RESOLUTION: u32 = 8;

// =============================================================================
// ERRORS
// =============================================================================

/// Configuration errors. These are programmer errors and are rejected once,
/// when a configuration is built or patched.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("bucket_count must be in 1..={max}, got {0}", max = MAX_BUCKETS)]
    InvalidBucketCount(u32),
    #[error("max_active_buckets must be in 1..=bucket_count ({bucket_count}), got {max_active}")]
    InvalidActiveCount { max_active: u32, bucket_count: u32 },
    #[error("forced bucket id {id} is out of range for bucket_count {bucket_count}")]
    ForcedBucketOutOfRange { id: u32, bucket_count: u32 },
    #[error("{field} must be at least 1, got {value}")]
    ZeroCount { field: &'static str, value: u64 },
    #[error("{field} = {value} is invalid, expected {expected}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        expected: &'static str,
    },
    #[error("max_cells must be at least {min}, got {0}", min = MIN_CELL_CEILING)]
    InvalidCellCeiling(usize),
    #[error("crack resolution must be in 1..={max}, got {0}", max = MAX_RESOLUTION)]
    InvalidResolution(u32),
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

// =============================================================================
// NOISE PARAMETERS
// =============================================================================

/// Domain warp applied before sampling the base layers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarpParams {
    /// Displacement amplitude in noise-space units (0 disables the warp)
    pub strength: f64,
    /// Frequency of the first warp round relative to the base frequency
    pub scale: f64,
    /// Warp rounds (None = same as the base octaves)
    pub octaves: Option<u32>,
    /// Frequency multiplier per warp round
    pub lacunarity: f64,
    /// Amplitude decay per warp round
    pub gain: f64,
}

impl Default for WarpParams {
    fn default() -> Self {
        Self {
            strength: 0.6,
            scale: 0.5,
            octaves: None,
            lacunarity: 2.0,
            gain: 0.5,
        }
    }
}

/// Weights of the three base-noise flavours inside each octave.
///
/// The defaults are tuned visually; there is no derivation behind them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerMix {
    pub perlin: f64,
    pub simplex: f64,
    /// Weight of the `1 - |perlin|` ridge transform
    pub ridge: f64,
}

impl Default for LayerMix {
    fn default() -> Self {
        Self {
            perlin: 0.5,
            simplex: 0.35,
            ridge: 0.15,
        }
    }
}

impl LayerMix {
    pub fn total(&self) -> f64 {
        self.perlin + self.simplex + self.ridge
    }
}

/// Parameters of the classification noise field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseParams {
    pub seed: u32,
    /// World-to-noise frequency (lower = larger regions)
    pub base_scale: f64,
    /// Number of base layers
    pub octaves: u32,
    /// Frequency multiplier per octave
    pub lacunarity: f64,
    /// Amplitude decay per octave
    pub gain: f64,
    pub warp: WarpParams,
    /// Frequency of the fine detail noise (world units)
    pub fine_scale: f64,
    pub layer_mix: LayerMix,
}

impl Default for NoiseParams {
    fn default() -> Self {
        Self {
            seed: 1337,
            base_scale: 0.004,
            octaves: 4,
            lacunarity: 2.0,
            gain: 0.5,
            warp: WarpParams::default(),
            fine_scale: 0.08,
            layer_mix: LayerMix::default(),
        }
    }
}

impl NoiseParams {
    /// Number of warp rounds actually applied.
    pub fn warp_octaves(&self) -> u32 {
        self.warp.octaves.unwrap_or(self.octaves)
    }
}

// =============================================================================
// BUCKET SELECTION
// =============================================================================

/// How active buckets are chosen from per-bucket sample counts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionStrategy {
    /// Buckets with the fewest coarse samples first
    #[default]
    Smallest,
    /// Buckets with the most coarse samples first
    Largest,
    /// Seeded shuffle
    Random,
}

impl std::fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Smallest => write!(f, "smallest"),
            Self::Largest => write!(f, "largest"),
            Self::Random => write!(f, "random"),
        }
    }
}

impl std::str::FromStr for SelectionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "smallest" => Ok(Self::Smallest),
            "largest" => Ok(Self::Largest),
            "random" => Ok(Self::Random),
            other => Err(format!("unknown selection strategy '{}'", other)),
        }
    }
}

// =============================================================================
// CRACK SETTINGS
// =============================================================================

/// Base values for crack raster synthesis; patterns scale these per interval.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrackSettings {
    /// Voronoi seeds per square world unit
    pub seed_density: f64,
    pub max_seeds: usize,
    /// Intervals shorter than this (world units) produce no raster
    pub min_length: f64,
    /// Raster pixels per world unit along the segment
    pub sample_along: f64,
    /// Raster pixels per world unit across the segment
    pub sample_across: f64,
    /// Supersampling factor (1..=8)
    pub resolution: u32,
    /// Crack stroke width in raster pixels
    pub stroke_width: f64,
    /// Peak crack opacity (0..1)
    pub alpha: f64,
    /// Voronoi boundary gap (world units) below which a pixel is a crack
    pub epsilon: f64,
    /// Exponent of the `(eps - delta) / eps` intensity falloff
    pub falloff_exponent: f64,
    /// Exponent applied to intensity when converting to opacity
    pub alpha_exponent: f64,
    /// Pixel budget for a single tile
    pub max_pixels: usize,
    /// Per-axis budget for a single tile
    pub max_dimension: usize,
    pub color: [u8; 3],
}

impl Default for CrackSettings {
    fn default() -> Self {
        Self {
            seed_density: 0.05,
            max_seeds: 600,
            min_length: 1.0,
            sample_along: 2.0,
            sample_across: 2.0,
            resolution: 2,
            stroke_width: 1.2,
            alpha: 0.85,
            epsilon: 0.35,
            falloff_exponent: 1.5,
            alpha_exponent: 1.15,
            max_pixels: 4_194_304,
            max_dimension: 4096,
            color: [38, 34, 30],
        }
    }
}

// =============================================================================
// OVERLAY CONFIG
// =============================================================================

/// Complete overlay configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    pub enabled: bool,
    pub noise: NoiseParams,
    pub bucket_count: u32,
    pub max_active_buckets: u32,
    pub selection_strategy: SelectionStrategy,
    /// Maximum distance of a cell's base noise from its bucket centre
    pub band_width: f64,
    /// Fine-noise threshold for crack pixels and mask contours
    pub noise_threshold: f64,
    /// Explicit active buckets; bypasses the selection strategy
    pub forced_active_bucket_ids: Option<Vec<u32>>,
    /// Screen padding around the viewport before gridding (pixels)
    pub pad_px: f64,
    /// Hard ceiling on coarse cells per grid
    pub max_cells: usize,
    pub crack: CrackSettings,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            noise: NoiseParams::default(),
            bucket_count: 3,
            max_active_buckets: 2,
            selection_strategy: SelectionStrategy::Smallest,
            band_width: 0.12,
            noise_threshold: 0.5,
            forced_active_bucket_ids: None,
            pad_px: 64.0,
            max_cells: 20_000,
            crack: CrackSettings::default(),
        }
    }
}

fn check_positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { field, value, expected: "a finite value > 0" })
    }
}

fn check_non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { field, value, expected: "a finite value >= 0" })
    }
}

fn check_open_unit(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value < 1.0 {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { field, value, expected: "a value in (0, 1)" })
    }
}

fn check_lacunarity(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 1.0 {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { field, value, expected: "a finite value > 1" })
    }
}

impl OverlayConfig {
    /// Check every invariant the engine relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bucket_count == 0 || self.bucket_count > MAX_BUCKETS {
            return Err(ConfigError::InvalidBucketCount(self.bucket_count));
        }
        if self.max_active_buckets == 0 || self.max_active_buckets > self.bucket_count {
            return Err(ConfigError::InvalidActiveCount {
                max_active: self.max_active_buckets,
                bucket_count: self.bucket_count,
            });
        }
        if let Some(ids) = &self.forced_active_bucket_ids {
            if let Some(&id) = ids.iter().find(|&&id| id >= self.bucket_count) {
                return Err(ConfigError::ForcedBucketOutOfRange {
                    id,
                    bucket_count: self.bucket_count,
                });
            }
        }

        let noise = &self.noise;
        if noise.octaves == 0 {
            return Err(ConfigError::ZeroCount { field: "noise.octaves", value: 0 });
        }
        if noise.warp.octaves == Some(0) {
            return Err(ConfigError::ZeroCount { field: "noise.warp.octaves", value: 0 });
        }
        check_positive("noise.base_scale", noise.base_scale)?;
        check_lacunarity("noise.lacunarity", noise.lacunarity)?;
        check_open_unit("noise.gain", noise.gain)?;
        check_non_negative("noise.warp.strength", noise.warp.strength)?;
        check_positive("noise.warp.scale", noise.warp.scale)?;
        check_lacunarity("noise.warp.lacunarity", noise.warp.lacunarity)?;
        check_open_unit("noise.warp.gain", noise.warp.gain)?;
        check_positive("noise.fine_scale", noise.fine_scale)?;
        check_non_negative("noise.layer_mix.perlin", noise.layer_mix.perlin)?;
        check_non_negative("noise.layer_mix.simplex", noise.layer_mix.simplex)?;
        check_non_negative("noise.layer_mix.ridge", noise.layer_mix.ridge)?;
        check_positive("noise.layer_mix total", noise.layer_mix.total())?;

        check_non_negative("band_width", self.band_width)?;
        if !self.noise_threshold.is_finite() {
            return Err(ConfigError::OutOfRange {
                field: "noise_threshold",
                value: self.noise_threshold,
                expected: "a finite value",
            });
        }
        check_non_negative("pad_px", self.pad_px)?;
        if self.max_cells < MIN_CELL_CEILING {
            return Err(ConfigError::InvalidCellCeiling(self.max_cells));
        }

        let crack = &self.crack;
        check_non_negative("crack.seed_density", crack.seed_density)?;
        if crack.max_seeds == 0 {
            return Err(ConfigError::ZeroCount { field: "crack.max_seeds", value: 0 });
        }
        check_non_negative("crack.min_length", crack.min_length)?;
        check_positive("crack.sample_along", crack.sample_along)?;
        check_positive("crack.sample_across", crack.sample_across)?;
        if crack.resolution == 0 || crack.resolution > MAX_RESOLUTION {
            return Err(ConfigError::InvalidResolution(crack.resolution));
        }
        check_non_negative("crack.stroke_width", crack.stroke_width)?;
        if !(0.0..=1.0).contains(&crack.alpha) {
            return Err(ConfigError::OutOfRange {
                field: "crack.alpha",
                value: crack.alpha,
                expected: "a value in [0, 1]",
            });
        }
        check_non_negative("crack.epsilon", crack.epsilon)?;
        check_positive("crack.falloff_exponent", crack.falloff_exponent)?;
        check_positive("crack.alpha_exponent", crack.alpha_exponent)?;
        if crack.max_pixels == 0 {
            return Err(ConfigError::ZeroCount { field: "crack.max_pixels", value: 0 });
        }
        if crack.max_dimension == 0 {
            return Err(ConfigError::ZeroCount { field: "crack.max_dimension", value: 0 });
        }
        Ok(())
    }

    /// Apply a partial update, returning the new validated configuration.
    /// `self` is left untouched when the result is rejected.
    pub fn update(&self, patch: &ConfigPatch) -> Result<OverlayConfig, ConfigError> {
        let mut next = self.clone();
        patch.apply_to(&mut next);
        next.validate()?;
        Ok(next)
    }

    /// Parse and validate a JSON configuration. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: OverlayConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

// =============================================================================
// PARTIAL UPDATES
// =============================================================================

/// Partial configuration update. `None` fields keep their current value.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigPatch {
    pub enabled: Option<bool>,
    pub seed: Option<u32>,
    pub base_scale: Option<f64>,
    pub octaves: Option<u32>,
    pub lacunarity: Option<f64>,
    pub gain: Option<f64>,
    pub warp: Option<WarpParams>,
    pub fine_scale: Option<f64>,
    pub layer_mix: Option<LayerMix>,
    pub bucket_count: Option<u32>,
    pub max_active_buckets: Option<u32>,
    pub selection_strategy: Option<SelectionStrategy>,
    pub band_width: Option<f64>,
    pub noise_threshold: Option<f64>,
    /// `Some(None)` clears a forced list
    pub forced_active_bucket_ids: Option<Option<Vec<u32>>>,
    pub pad_px: Option<f64>,
    pub max_cells: Option<usize>,
    pub crack: Option<CrackSettings>,
}

impl ConfigPatch {
    fn apply_to(&self, config: &mut OverlayConfig) {
        if let Some(v) = self.enabled { config.enabled = v; }
        if let Some(v) = self.seed { config.noise.seed = v; }
        if let Some(v) = self.base_scale { config.noise.base_scale = v; }
        if let Some(v) = self.octaves { config.noise.octaves = v; }
        if let Some(v) = self.lacunarity { config.noise.lacunarity = v; }
        if let Some(v) = self.gain { config.noise.gain = v; }
        if let Some(v) = &self.warp { config.noise.warp = v.clone(); }
        if let Some(v) = self.fine_scale { config.noise.fine_scale = v; }
        if let Some(v) = &self.layer_mix { config.noise.layer_mix = v.clone(); }
        if let Some(v) = self.bucket_count { config.bucket_count = v; }
        if let Some(v) = self.max_active_buckets { config.max_active_buckets = v; }
        if let Some(v) = self.selection_strategy { config.selection_strategy = v; }
        if let Some(v) = self.band_width { config.band_width = v; }
        if let Some(v) = self.noise_threshold { config.noise_threshold = v; }
        if let Some(v) = &self.forced_active_bucket_ids { config.forced_active_bucket_ids = v.clone(); }
        if let Some(v) = self.pad_px { config.pad_px = v; }
        if let Some(v) = self.max_cells { config.max_cells = v; }
        if let Some(v) = &self.crack { config.crack = v.clone(); }
    }

    /// True when nothing but the enable toggle is touched.
    pub fn is_toggle_only(&self) -> bool {
        let toggle_free = ConfigPatch { enabled: None, ..self.clone() };
        toggle_free == ConfigPatch::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        OverlayConfig::default().validate().unwrap();
    }

    #[test]
    fn test_rejects_too_many_active_buckets() {
        let patch = ConfigPatch {
            bucket_count: Some(3),
            max_active_buckets: Some(4),
            ..Default::default()
        };
        let err = OverlayConfig::default().update(&patch).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidActiveCount { max_active: 4, bucket_count: 3 }));
    }

    #[test]
    fn test_rejects_zero_buckets_and_bad_noise() {
        let base = OverlayConfig::default();
        let zero = ConfigPatch { bucket_count: Some(0), ..Default::default() };
        assert!(matches!(base.update(&zero), Err(ConfigError::InvalidBucketCount(0))));

        let gain = ConfigPatch { gain: Some(1.0), ..Default::default() };
        assert!(base.update(&gain).is_err());

        let lac = ConfigPatch { lacunarity: Some(f64::NAN), ..Default::default() };
        assert!(base.update(&lac).is_err());

        let octaves = ConfigPatch { octaves: Some(0), ..Default::default() };
        assert!(base.update(&octaves).is_err());
    }

    #[test]
    fn test_rejects_forced_id_out_of_range() {
        let patch = ConfigPatch {
            forced_active_bucket_ids: Some(Some(vec![0, 3])),
            ..Default::default()
        };
        let err = OverlayConfig::default().update(&patch).unwrap_err();
        assert!(matches!(err, ConfigError::ForcedBucketOutOfRange { id: 3, .. }));
    }

    #[test]
    fn test_update_applies_fields() {
        let patch = ConfigPatch {
            seed: Some(42),
            selection_strategy: Some(SelectionStrategy::Random),
            forced_active_bucket_ids: Some(Some(vec![1])),
            ..Default::default()
        };
        let next = OverlayConfig::default().update(&patch).unwrap();
        assert_eq!(next.noise.seed, 42);
        assert_eq!(next.selection_strategy, SelectionStrategy::Random);
        assert_eq!(next.forced_active_bucket_ids, Some(vec![1]));

        let clear = ConfigPatch { forced_active_bucket_ids: Some(None), ..Default::default() };
        assert_eq!(next.update(&clear).unwrap().forced_active_bucket_ids, None);
    }

    #[test]
    fn test_toggle_only_patch() {
        assert!(ConfigPatch { enabled: Some(false), ..Default::default() }.is_toggle_only());
        assert!(!ConfigPatch { seed: Some(1), ..Default::default() }.is_toggle_only());
    }

    #[test]
    fn test_json_partial_config_takes_defaults() {
        let config = OverlayConfig::from_json_str(
            r#"{ "bucket_count": 5, "selection_strategy": "largest", "noise": { "seed": 9 } }"#,
        )
        .unwrap();
        assert_eq!(config.bucket_count, 5);
        assert_eq!(config.selection_strategy, SelectionStrategy::Largest);
        assert_eq!(config.noise.seed, 9);
        assert_eq!(config.noise.octaves, NoiseParams::default().octaves);
    }

    #[test]
    fn test_json_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("overlay.json");
        let mut config = OverlayConfig::default();
        config.noise.seed = 77;
        std::fs::write(&path, config.to_json().unwrap()).unwrap();
        assert_eq!(OverlayConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("Largest".parse::<SelectionStrategy>(), Ok(SelectionStrategy::Largest));
        assert!("biggest".parse::<SelectionStrategy>().is_err());
    }
}
