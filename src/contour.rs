//! Outline extraction from the intersection mask
//!
//! Two flavours:
//! - [`ContourMode::Mask`] traces the coarse mask itself with marching squares
//! - [`ContourMode::RoadHugging`] walks each road centreline, finds where the
//!   mask is on, and outlines that stretch of road as a rectangle
//!
//! All output points are in screen space.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::crack::ActiveInterval;
use crate::geometry::{Point, RoadSegment};
use crate::grid::Grid;
use crate::mask_cache::GridLayout;
use crate::projection::ViewProjector;

/// Endpoint keys are coordinates rounded to 1 / KEY_SCALE.
pub const KEY_SCALE: f64 = 1e4;
/// Upper bound on centreline samples per segment.
pub const MAX_CENTRELINE_SAMPLES: usize = 100_000;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContourMode {
    #[default]
    Mask,
    RoadHugging,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ContourPolyline {
    pub points: Vec<Point>,
    pub closed: bool,
}

impl ContourPolyline {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Unsigned shoelace area; zero for open polylines.
    pub fn area(&self) -> f64 {
        if !self.closed || self.points.len() < 3 {
            return 0.0;
        }
        let n = self.points.len();
        let twice: f64 = (0..n)
            .map(|i| {
                let a = self.points[i];
                let b = self.points[(i + 1) % n];
                a.x * b.y - b.x * a.y
            })
            .sum();
        twice.abs() * 0.5
    }
}

// =============================================================================
// MARCHING SQUARES
// =============================================================================

#[derive(Clone, Copy)]
enum Edge {
    Top,
    Right,
    Bottom,
    Left,
}

/// Edge pairs per case, corner bits TL=8 TR=4 BR=2 BL=1.
fn case_edges(case: u8) -> &'static [(Edge, Edge)] {
    use Edge::*;
    match case {
        1 => &[(Left, Bottom)],
        2 => &[(Bottom, Right)],
        3 => &[(Left, Right)],
        4 => &[(Top, Right)],
        5 => &[(Top, Right), (Left, Bottom)],
        6 => &[(Top, Bottom)],
        7 => &[(Top, Left)],
        8 => &[(Left, Top)],
        9 => &[(Top, Bottom)],
        10 => &[(Left, Top), (Bottom, Right)],
        11 => &[(Top, Right)],
        12 => &[(Left, Right)],
        13 => &[(Bottom, Right)],
        14 => &[(Left, Bottom)],
        _ => &[],
    }
}

/// Boundary segments of `mask` in grid coordinates (cell `(x, y)` spans
/// `[x, x+1] x [y, y+1]`). The mask is treated as surrounded by false cells, so
/// every boundary closes.
pub fn marching_squares(mask: &Grid<bool>) -> Vec<(Point, Point)> {
    let (w, h) = (mask.width as i64, mask.height as i64);
    let at = |x: i64, y: i64| -> bool { mask.try_get(x, y).copied().unwrap_or(false) };

    let mut segments = Vec::new();
    // Square (i, j) has corner samples at padded cells (i-1..=i, j-1..=j)
    for j in 0..=h {
        for i in 0..=w {
            let tl = at(i - 1, j - 1);
            let tr = at(i, j - 1);
            let br = at(i, j);
            let bl = at(i - 1, j);
            let case = (tl as u8) << 3 | (tr as u8) << 2 | (br as u8) << 1 | bl as u8;

            // Sample centres sit at half-cell offsets in grid coordinates
            let left = i as f64 - 0.5;
            let top = j as f64 - 0.5;
            let midpoint = |edge: Edge| match edge {
                Edge::Top => Point::new(left + 0.5, top),
                Edge::Right => Point::new(left + 1.0, top + 0.5),
                Edge::Bottom => Point::new(left + 0.5, top + 1.0),
                Edge::Left => Point::new(left, top + 0.5),
            };

            for &(a, b) in case_edges(case) {
                segments.push((midpoint(a), midpoint(b)));
            }
        }
    }
    segments
}

type Key = (i64, i64);

fn key_of(p: Point) -> Key {
    ((p.x * KEY_SCALE).round() as i64, (p.y * KEY_SCALE).round() as i64)
}

/// Join segments sharing endpoints into polylines.
pub fn chain_segments(segments: &[(Point, Point)]) -> Vec<ContourPolyline> {
    let mut by_key: HashMap<Key, Vec<usize>> = HashMap::new();
    for (i, &(a, b)) in segments.iter().enumerate() {
        by_key.entry(key_of(a)).or_default().push(i);
        by_key.entry(key_of(b)).or_default().push(i);
    }

    let mut used = vec![false; segments.len()];
    let mut polylines = Vec::new();

    for start in 0..segments.len() {
        if used[start] {
            continue;
        }
        used[start] = true;
        let (a, b) = segments[start];
        let mut forward = vec![a, b];
        extend_chain(&mut forward, segments, &by_key, &mut used);

        let closed_early = key_of(forward[0]) == key_of(forward[forward.len() - 1]);
        if !closed_early {
            let mut backward = vec![a];
            extend_chain(&mut backward, segments, &by_key, &mut used);
            if backward.len() > 1 {
                backward.reverse();
                backward.pop();
                backward.extend(forward);
                forward = backward;
            }
        }

        let closed = forward.len() > 2 && key_of(forward[0]) == key_of(forward[forward.len() - 1]);
        if closed {
            forward.pop();
        }
        polylines.push(ContourPolyline { points: forward, closed });
    }

    polylines
}

/// Follow unused segments from the last point of `chain`.
fn extend_chain(
    chain: &mut Vec<Point>,
    segments: &[(Point, Point)],
    by_key: &HashMap<Key, Vec<usize>>,
    used: &mut [bool],
) {
    loop {
        let Some(&tail) = chain.last() else { return };
        let tail_key = key_of(tail);
        let next = by_key
            .get(&tail_key)
            .and_then(|ids| ids.iter().copied().find(|&i| !used[i]));
        let Some(i) = next else { return };
        used[i] = true;
        let (a, b) = segments[i];
        chain.push(if key_of(a) == tail_key { b } else { a });
    }
}

/// Trace the mask and map the outlines to screen space.
pub fn mask_contours(mask: &Grid<bool>, layout: &GridLayout, projector: &ViewProjector) -> Vec<ContourPolyline> {
    let origin = layout.origin();
    let step = layout.world_step;
    let mut polylines = chain_segments(&marching_squares(mask));
    for polyline in &mut polylines {
        for p in &mut polyline.points {
            let world = Point::new(origin.x + p.x * step, origin.y + p.y * step);
            *p = projector.world_to_screen(world);
        }
    }
    polylines
}

// =============================================================================
// ROAD HUGGING
// =============================================================================

/// Parametric sub-ranges of `segment` where `inside` holds along the centreline.
///
/// The centreline is sampled every `spacing` world units; each run of hits is
/// widened by `padding` (parametric) on both ends, clamped to [0, 1], and
/// overlapping runs are merged.
pub fn active_intervals(
    segment: &RoadSegment,
    inside: impl Fn(Point) -> bool,
    spacing: f64,
    padding: f64,
) -> Vec<ActiveInterval> {
    if !segment.is_drawable() || !(spacing.is_finite() && spacing > 0.0) {
        return Vec::new();
    }
    let padding = if padding.is_finite() { padding.max(0.0) } else { 0.0 };
    let steps = ((segment.length() / spacing).ceil() as usize).clamp(1, MAX_CENTRELINE_SAMPLES);

    let mut runs: Vec<(f64, f64)> = Vec::new();
    let mut run_start: Option<f64> = None;
    let mut last_hit = 0.0;
    for k in 0..=steps {
        let t = k as f64 / steps as f64;
        if inside(segment.point_at(t)) {
            run_start.get_or_insert(t);
            last_hit = t;
        } else if let Some(s) = run_start.take() {
            runs.push((s, last_hit));
        }
    }
    if let Some(s) = run_start {
        runs.push((s, last_hit));
    }

    let mut merged: Vec<(f64, f64)> = Vec::with_capacity(runs.len());
    for (s, e) in runs {
        let (s, e) = ((s - padding).max(0.0), (e + padding).min(1.0));
        match merged.last_mut() {
            Some(last) if s <= last.1 => last.1 = last.1.max(e),
            _ => merged.push((s, e)),
        }
    }

    merged
        .into_iter()
        .enumerate()
        .map(|(index, (s, e))| ActiveInterval::new(index, s, e))
        .collect()
}

/// Road-width rectangle over one interval, world space, counter-clockwise
/// from the start's right-hand corner.
pub fn interval_rectangle(segment: &RoadSegment, interval: &ActiveInterval) -> [Point; 4] {
    let half = segment.normal().scale(segment.width * 0.5);
    let a = segment.point_at(interval.t_start);
    let b = segment.point_at(interval.t_end);
    [a.sub(half), b.sub(half), b.add(half), a.add(half)]
}

/// One closed screen-space rectangle per non-empty interval.
pub fn road_contours(
    segments: &[RoadSegment],
    intervals: &[Vec<ActiveInterval>],
    projector: &ViewProjector,
) -> Vec<ContourPolyline> {
    segments
        .iter()
        .zip(intervals)
        .flat_map(|(segment, list)| {
            list.iter()
                .filter(|iv| iv.t_end > iv.t_start)
                .map(move |iv| ContourPolyline {
                    points: interval_rectangle(segment, iv)
                        .iter()
                        .map(|&p| projector.world_to_screen(p))
                        .collect(),
                    closed: true,
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Viewport;
    use crate::projection::ViewState;

    fn mask_from(rows: &[&str]) -> Grid<bool> {
        let h = rows.len();
        let w = rows[0].len();
        let data = rows.iter().flat_map(|r| r.chars().map(|c| c == '#')).collect();
        Grid::from_vec(w, h, data).unwrap()
    }

    #[test]
    fn test_single_cell_gives_closed_diamond() {
        let mask = mask_from(&["#"]);
        let polylines = chain_segments(&marching_squares(&mask));
        assert_eq!(polylines.len(), 1);
        let diamond = &polylines[0];
        assert!(diamond.closed);
        assert_eq!(diamond.len(), 4);
        assert!((diamond.area() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_block_outline_is_closed() {
        let mask = mask_from(&["....", ".##.", ".##.", "...."]);
        let polylines = chain_segments(&marching_squares(&mask));
        assert_eq!(polylines.len(), 1);
        assert!(polylines[0].closed);
        // octagon around a 2x2 block: 4 full cells minus four half-corner triangles
        assert!((polylines[0].area() - 3.5).abs() < 1e-9);
    }

    #[test]
    fn test_saddle_emits_two_segments() {
        let mask = mask_from(&["#.", ".#"]);
        let segments = marching_squares(&mask);
        // centre square is case 10 (TL + BR)
        let centre: Vec<_> = segments
            .iter()
            .filter(|(a, b)| [a, b].iter().all(|p| (p.x - 1.0).abs() <= 0.5 && (p.y - 1.0).abs() <= 0.5))
            .collect();
        assert_eq!(centre.len(), 2);
        // saddles split into two separate closed loops
        let polylines = chain_segments(&segments);
        assert_eq!(polylines.len(), 2);
        assert!(polylines.iter().all(|p| p.closed));
    }

    #[test]
    fn test_empty_mask_has_no_contours() {
        let mask = mask_from(&["...", "..."]);
        assert!(marching_squares(&mask).is_empty());
    }

    #[test]
    fn test_open_chain_joins_both_directions() {
        let p = |x: f64| Point::new(x, 0.0);
        let segments = [(p(1.0), p(2.0)), (p(0.0), p(1.0)), (p(2.0), p(3.0))];
        let polylines = chain_segments(&segments);
        assert_eq!(polylines.len(), 1);
        assert!(!polylines[0].closed);
        assert_eq!(polylines[0].points, vec![p(0.0), p(1.0), p(2.0), p(3.0)]);
    }

    #[test]
    fn test_near_duplicate_endpoints_are_joined() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(1.0, 0.0);
        let b_jitter = Point::new(1.0 + 1e-9, 0.0);
        let c = Point::new(1.0, 1.0);
        let polylines = chain_segments(&[(a, b), (b_jitter, c)]);
        assert_eq!(polylines.len(), 1);
        assert_eq!(polylines[0].len(), 3);
    }

    #[test]
    fn test_mask_contours_in_screen_space() {
        let projector = ViewProjector::new(ViewState::new(0.0, 0.0, 2.0), None);
        let layout = GridLayout::plan(&projector, &Viewport::sized(40.0, 40.0), 0.0, 1_000_000).unwrap();
        let mut mask = Grid::new_with(layout.width, layout.height, false);
        mask.set(4, 4, true);
        let polylines = mask_contours(&mask, &layout, &projector);
        assert_eq!(polylines.len(), 1);
        // half a cell in world units, scaled by the zoom
        let cell_px = layout.world_step * 2.0;
        assert!((polylines[0].area() - 0.5 * cell_px * cell_px).abs() < 1e-6);
    }

    #[test]
    fn test_active_intervals_find_and_merge_runs() {
        let road = RoadSegment::new(Point::new(0.0, 0.0), Point::new(100.0, 0.0), 10.0);
        let inside = |p: Point| (19.5..=40.5).contains(&p.x) || (43.5..=60.5).contains(&p.x) || p.x >= 89.5;

        let raw = active_intervals(&road, inside, 1.0, 0.0);
        assert_eq!(raw.len(), 3);
        assert!((raw[0].t_start - 0.2).abs() < 1e-9 && (raw[0].t_end - 0.4).abs() < 1e-9);
        assert_eq!(raw[2].t_end, 1.0);

        // padding closes the 4 m gap
        let padded = active_intervals(&road, inside, 1.0, 0.03);
        assert_eq!(padded.len(), 2);
        assert!((padded[0].t_start - 0.17).abs() < 1e-9);
        assert_eq!(padded[1].t_end, 1.0);
        assert_eq!(padded[1].index, 1);
    }

    #[test]
    fn test_active_intervals_degenerate_inputs() {
        let p = Point::new(1.0, 1.0);
        assert!(active_intervals(&RoadSegment::new(p, p, 5.0), |_| true, 1.0, 0.0).is_empty());
        let road = RoadSegment::new(Point::new(0.0, 0.0), Point::new(10.0, 0.0), 2.0);
        assert!(active_intervals(&road, |_| true, 0.0, 0.0).is_empty());
        assert!(active_intervals(&road, |_| false, 1.0, 0.1).is_empty());
        let all = active_intervals(&road, |_| true, 1.0, 0.1);
        assert_eq!(all, vec![ActiveInterval::new(0, 0.0, 1.0)]);
    }

    #[test]
    fn test_road_rectangle_matches_width() {
        let road = RoadSegment::new(Point::new(0.0, 0.0), Point::new(100.0, 0.0), 10.0);
        let projector = ViewProjector::new(ViewState::default(), None);
        let intervals = vec![vec![ActiveInterval::new(0, 0.25, 0.75), ActiveInterval::new(1, 0.9, 0.9)]];
        let polylines = road_contours(&[road], &intervals, &projector);
        assert_eq!(polylines.len(), 1);
        assert!(polylines[0].closed);
        assert!((polylines[0].area() - 50.0 * 10.0).abs() < 1e-9);
    }
}
