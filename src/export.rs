//! PNG export of masks, noise, crack tiles and composited screen views

use std::path::Path;

use image::{ImageBuffer, Rgb, RgbImage, Rgba, RgbaImage};
use thiserror::Error;

use crate::contour::ContourPolyline;
use crate::crack::RasterTile;
use crate::geometry::{Point, Viewport};
use crate::grid::Grid;
use crate::mask_cache::{CoarseGrid, MaskSnapshot};
use crate::projection::ViewProjector;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("image has zero size")]
    EmptyImage,
    #[error("image is {width}x{height}, larger than the {max} px export limit")]
    TooLarge { width: usize, height: usize, max: u32 },
    #[error("failed to write image: {0}")]
    Image(#[from] image::ImageError),
}

const MAX_EXPORT_DIM: u32 = 16_384;

fn image_dims(width: usize, height: usize) -> Result<(u32, u32), ExportError> {
    if width == 0 || height == 0 {
        return Err(ExportError::EmptyImage);
    }
    if width > MAX_EXPORT_DIM as usize || height > MAX_EXPORT_DIM as usize {
        return Err(ExportError::TooLarge { width, height, max: MAX_EXPORT_DIM });
    }
    Ok((width as u32, height as u32))
}

/// Spectral colormap (matplotlib style): dark blue -> cyan -> green -> yellow -> orange -> red
fn spectral_colormap(t: f32) -> [u8; 3] {
    let colors: [[f32; 3]; 11] = [
        [0.37, 0.31, 0.64],
        [0.20, 0.53, 0.74],
        [0.40, 0.76, 0.65],
        [0.67, 0.87, 0.64],
        [0.90, 0.96, 0.60],
        [1.00, 1.00, 0.75],
        [1.00, 0.88, 0.55],
        [0.99, 0.68, 0.38],
        [0.96, 0.43, 0.26],
        [0.84, 0.24, 0.31],
        [0.62, 0.00, 0.26],
    ];

    let t_scaled = t * 10.0;
    let idx = (t_scaled as usize).min(9);
    let frac = t_scaled - idx as f32;
    let c1 = colors[idx];
    let c2 = colors[idx + 1];

    [
        ((c1[0] + (c2[0] - c1[0]) * frac) * 255.0) as u8,
        ((c1[1] + (c2[1] - c1[1]) * frac) * 255.0) as u8,
        ((c1[2] + (c2[2] - c1[2]) * frac) * 255.0) as u8,
    ]
}

fn lerp_color(a: [u8; 3], b: [u8; 3], t: f32) -> [u8; 3] {
    let t = t.clamp(0.0, 1.0);
    [
        (a[0] as f32 + (b[0] as f32 - a[0] as f32) * t) as u8,
        (a[1] as f32 + (b[1] as f32 - a[1] as f32) * t) as u8,
        (a[2] as f32 + (b[2] as f32 - a[2] as f32) * t) as u8,
    ]
}

/// Base noise as a spectral heat map, one pixel per coarse cell. NaN cells are black.
pub fn render_noise(noise: &Grid<f32>) -> Result<RgbImage, ExportError> {
    let (w, h) = image_dims(noise.width, noise.height)?;
    let mut img: RgbImage = ImageBuffer::new(w, h);
    for (x, y, &v) in noise.iter() {
        let color = if v.is_nan() { [0, 0, 0] } else { spectral_colormap(v.clamp(0.0, 1.0)) };
        img.put_pixel(x as u32, y as u32, Rgb(color));
    }
    Ok(img)
}

/// Debug view of a classified grid: buckets shaded, active buckets tinted,
/// roads darkened and intersection cells in white.
pub fn render_classification(grid: &CoarseGrid) -> Result<RgbImage, ExportError> {
    let layout = &grid.layout;
    let (w, h) = image_dims(layout.width, layout.height)?;
    let buckets = grid.active.all_counts().len().max(1);
    let mut img: RgbImage = ImageBuffer::new(w, h);

    for (x, y, &bucket) in grid.buckets.iter() {
        let shade = (bucket as f32 + 0.5) / buckets as f32;
        let mut color = lerp_color([30, 30, 40], [120, 120, 140], shade);
        if grid.active.contains(bucket) {
            color = lerp_color(color, [200, 120, 40], 0.5);
        }
        if *grid.road.get(x, y) && !grid.road_fail_open {
            color = lerp_color(color, [0, 0, 0], 0.4);
        }
        if *grid.intersection.get(x, y) {
            color = [255, 255, 255];
        }
        img.put_pixel(x as u32, y as u32, Rgb(color));
    }
    Ok(img)
}

/// Intersection mask as an opaque black/white image.
pub fn render_mask(snapshot: &MaskSnapshot) -> Result<RgbImage, ExportError> {
    let (w, h) = image_dims(snapshot.width, snapshot.height)?;
    let mut img: RgbImage = ImageBuffer::new(w, h);
    for (i, &on) in snapshot.bitmap.iter().enumerate() {
        let v = if on { 255 } else { 0 };
        img.put_pixel((i % snapshot.width) as u32, (i / snapshot.width) as u32, Rgb([v, v, v]));
    }
    Ok(img)
}

/// A crack tile in its own (along, across) frame.
pub fn render_tile(tile: &RasterTile) -> Result<RgbaImage, ExportError> {
    let (w, h) = image_dims(tile.width, tile.height)?;
    ImageBuffer::from_raw(w, h, tile.pixels.clone()).ok_or(ExportError::EmptyImage)
}

/// Straight-alpha "over" blend of `src` onto an opaque `dst`.
fn blend_over(dst: &mut Rgba<u8>, src: [u8; 4]) {
    let a = src[3] as f32 / 255.0;
    if a <= 0.0 {
        return;
    }
    let rgb = lerp_color([dst[0], dst[1], dst[2]], [src[0], src[1], src[2]], a);
    *dst = Rgba([rgb[0], rgb[1], rgb[2], 255]);
}

/// Composite crack tiles into a screen-space image of `viewport` on a flat
/// background.
pub fn compose_screen(
    viewport: &Viewport,
    projector: &ViewProjector,
    tiles: &[RasterTile],
    background: [u8; 3],
) -> Result<RgbaImage, ExportError> {
    let (w, h) = image_dims(viewport.width.max(0.0) as usize, viewport.height.max(0.0) as usize)?;
    let [r, g, b] = background;
    let mut img: RgbaImage = ImageBuffer::from_pixel(w, h, Rgba([r, g, b, 255]));

    for tile in tiles {
        // Screen bounding box of the tile's four corners
        let tw = tile.width as f64;
        let th = tile.height as f64;
        let corners = [(0.0, 0.0), (tw, 0.0), (tw, th), (0.0, th)]
            .map(|(px, py)| projector.world_to_screen(tile.placement.pixel_to_world(px, py)));
        let min_x = corners.iter().map(|c| c.x).fold(f64::INFINITY, f64::min) - viewport.x;
        let max_x = corners.iter().map(|c| c.x).fold(f64::NEG_INFINITY, f64::max) - viewport.x;
        let min_y = corners.iter().map(|c| c.y).fold(f64::INFINITY, f64::min) - viewport.y;
        let max_y = corners.iter().map(|c| c.y).fold(f64::NEG_INFINITY, f64::max) - viewport.y;
        if !(min_x.is_finite() && max_x.is_finite() && min_y.is_finite() && max_y.is_finite()) {
            continue;
        }

        let x0 = min_x.floor().max(0.0) as u32;
        let y0 = min_y.floor().max(0.0) as u32;
        let x1 = (max_x.ceil().max(0.0) as u32).min(w);
        let y1 = (max_y.ceil().max(0.0) as u32).min(h);

        for y in y0..y1 {
            for x in x0..x1 {
                let screen = Point::new(viewport.x + x as f64 + 0.5, viewport.y + y as f64 + 0.5);
                if let Some(src) = tile.sample_world(projector.screen_to_world(screen)) {
                    blend_over(img.get_pixel_mut(x, y), src);
                }
            }
        }
    }

    Ok(img)
}

/// Stroke screen-space polylines (one pixel wide) onto an image.
pub fn draw_polylines(img: &mut RgbaImage, viewport: &Viewport, polylines: &[ContourPolyline], color: [u8; 4]) {
    let (w, h) = (img.width() as i64, img.height() as i64);
    for polyline in polylines {
        let n = polyline.points.len();
        let edges = if polyline.closed { n } else { n.saturating_sub(1) };
        for i in 0..edges {
            let a = polyline.points[i];
            let b = polyline.points[(i + 1) % n];
            let (ax, ay) = (a.x - viewport.x, a.y - viewport.y);
            let (bx, by) = (b.x - viewport.x, b.y - viewport.y);
            let steps = (bx - ax).abs().max((by - ay).abs()).ceil().min(1e5) as usize;
            for s in 0..=steps {
                let t = if steps == 0 { 0.0 } else { s as f64 / steps as f64 };
                let x = (ax + (bx - ax) * t).floor() as i64;
                let y = (ay + (by - ay) * t).floor() as i64;
                if x >= 0 && y >= 0 && x < w && y < h {
                    blend_over(img.get_pixel_mut(x as u32, y as u32), color);
                }
            }
        }
    }
}

pub fn save_rgb(img: &RgbImage, path: impl AsRef<Path>) -> Result<(), ExportError> {
    img.save(path)?;
    Ok(())
}

pub fn save_rgba(img: &RgbaImage, path: impl AsRef<Path>) -> Result<(), ExportError> {
    img.save(path)?;
    Ok(())
}
