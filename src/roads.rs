//! Road-presence rasterization into the coarse grid
//!
//! Each segment is scan-converted analytically as a capsule (centreline swept by
//! half the road width) straight into a boolean grid at coarse-cell resolution.
//! Only cells inside the capsule's bounding box are visited.

use std::f64::consts::FRAC_1_SQRT_2;

use crate::geometry::{Point, RoadSegment};
use crate::grid::Grid;

/// Minimum capsule radius in cells. A cell whose centre lies within this distance
/// of the centreline is always marked, so hairline roads still register.
pub const MIN_RADIUS_CELLS: f64 = FRAC_1_SQRT_2;

/// Rasterize `segments` into a `width x height` grid whose cell (0, 0) has its
/// lower corner at `origin` and cells are `cell_size` world units wide.
///
/// Degenerate segments are skipped. Returns an all-false grid if nothing lands.
pub fn rasterize_roads(
    segments: &[RoadSegment],
    origin: Point,
    cell_size: f64,
    width: usize,
    height: usize,
) -> Grid<bool> {
    let mut mask = Grid::new_with(width, height, false);
    if !(cell_size.is_finite() && cell_size > 0.0) || width == 0 || height == 0 {
        return mask;
    }

    for segment in segments.iter().filter(|s| s.is_drawable()) {
        stroke_segment(&mut mask, segment, origin, cell_size);
    }

    mask
}

/// Stroke one segment, in grid units, into the mask.
fn stroke_segment(mask: &mut Grid<bool>, segment: &RoadSegment, origin: Point, cell_size: f64) {
    let to_grid = |p: Point| p.sub(origin).scale(1.0 / cell_size);
    let a = to_grid(segment.start);
    let b = to_grid(segment.end);
    let radius = (segment.width * 0.5 / cell_size).max(MIN_RADIUS_CELLS);

    let min_x = (a.x.min(b.x) - radius).floor().max(0.0);
    let min_y = (a.y.min(b.y) - radius).floor().max(0.0);
    let max_x = (a.x.max(b.x) + radius).ceil().min(mask.width as f64 - 1.0);
    let max_y = (a.y.max(b.y) + radius).ceil().min(mask.height as f64 - 1.0);
    if min_x > max_x || min_y > max_y {
        return;
    }

    let ab = b.sub(a);
    let len2 = ab.dot(ab);
    let r2 = radius * radius;

    for y in min_y as usize..=max_y as usize {
        for x in min_x as usize..=max_x as usize {
            if *mask.get(x, y) {
                continue;
            }
            let c = Point::new(x as f64 + 0.5, y as f64 + 0.5);
            let t = (c.sub(a).dot(ab) / len2).clamp(0.0, 1.0);
            let d = c.sub(a.add(ab.scale(t)));
            if d.dot(d) <= r2 {
                mask.set(x, y, true);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_horizontal_road_marks_its_band() {
        let road = RoadSegment::new(Point::new(0.0, 10.0), Point::new(40.0, 10.0), 4.0);
        let mask = rasterize_roads(&[road], Point::new(0.0, 0.0), 1.0, 50, 20);
        // cells whose centres are within 2 units of y = 10
        assert!(*mask.get(10, 9));
        assert!(*mask.get(10, 10));
        assert!(!*mask.get(10, 12));
        assert!(!*mask.get(10, 5));
        // capsule end cap
        assert!(*mask.get(41, 10));
        assert!(!*mask.get(45, 10));
    }

    #[test]
    fn test_thin_road_still_registers() {
        let road = RoadSegment::new(Point::new(0.0, 0.0), Point::new(100.0, 100.0), 0.01);
        let mask = rasterize_roads(&[road], Point::new(0.0, 0.0), 10.0, 10, 10);
        for i in 0..10 {
            assert!(*mask.get(i, i));
        }
    }

    #[test]
    fn test_degenerate_and_offscreen_segments_skipped() {
        let p = Point::new(5.0, 5.0);
        let zero = RoadSegment::new(p, p, 3.0);
        let far = RoadSegment::new(Point::new(1e6, 1e6), Point::new(1e6 + 5.0, 1e6), 3.0);
        let mask = rasterize_roads(&[zero, far], Point::new(0.0, 0.0), 1.0, 16, 16);
        assert_eq!(mask.count_true(), 0);
    }

    #[test]
    fn test_invalid_cell_size_gives_empty_mask() {
        let road = RoadSegment::new(Point::new(0.0, 0.0), Point::new(5.0, 0.0), 2.0);
        assert_eq!(rasterize_roads(&[road], Point::default(), 0.0, 4, 4).count_true(), 0);
        assert_eq!(rasterize_roads(&[road], Point::default(), f64::NAN, 4, 4).count_true(), 0);
    }
}
