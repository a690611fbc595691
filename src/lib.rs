//! Procedural crack overlay for road networks
//!
//! Re-exports modules for use by binaries and tools.

pub mod classify;
pub mod config;
pub mod contour;
pub mod crack;
pub mod engine;
pub mod export;
pub mod geometry;
pub mod grid;
pub mod mask_cache;
pub mod noise_field;
pub mod projection;
pub mod roads;
pub mod scheduler;
pub mod seeds;

pub use config::{ConfigError, ConfigPatch, OverlayConfig};
pub use engine::{OverlayEngine, OverlayEvent};
pub use geometry::{Point, RoadSegment, Viewport};
pub use projection::{ProjectionMatrix, ViewState};
