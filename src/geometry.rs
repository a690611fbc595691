//! Plain geometry shared by every overlay stage.

use serde::{Deserialize, Serialize};

/// A 2D point or vector. World points are in meters, screen points in pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn add(self, other: Point) -> Point {
        Point::new(self.x + other.x, self.y + other.y)
    }

    pub fn sub(self, other: Point) -> Point {
        Point::new(self.x - other.x, self.y - other.y)
    }

    pub fn scale(self, s: f64) -> Point {
        Point::new(self.x * s, self.y * s)
    }

    pub fn dot(self, other: Point) -> f64 {
        self.x * other.x + self.y * other.y
    }

    pub fn length(self) -> f64 {
        self.dot(self).sqrt()
    }

    pub fn distance(self, other: Point) -> f64 {
        self.sub(other).length()
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// One road centreline piece supplied by the road network generator.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoadSegment {
    pub start: Point,
    pub end: Point,
    /// Full road width in world units
    pub width: f64,
}

/// Segments shorter than this are treated as degenerate and skipped.
pub const MIN_SEGMENT_LENGTH: f64 = 1e-9;

impl RoadSegment {
    pub fn new(start: Point, end: Point, width: f64) -> Self {
        Self { start, end, width }
    }

    pub fn length(&self) -> f64 {
        self.start.distance(self.end)
    }

    /// False for zero-length, zero-width or non-finite segments.
    pub fn is_drawable(&self) -> bool {
        self.start.is_finite()
            && self.end.is_finite()
            && self.width.is_finite()
            && self.width > 0.0
            && self.length() > MIN_SEGMENT_LENGTH
    }

    /// Unit direction from start to end (zero vector for degenerate segments).
    pub fn direction(&self) -> Point {
        let len = self.length();
        if len <= MIN_SEGMENT_LENGTH || !len.is_finite() {
            return Point::default();
        }
        self.end.sub(self.start).scale(1.0 / len)
    }

    /// Left-hand unit normal.
    pub fn normal(&self) -> Point {
        let d = self.direction();
        Point::new(-d.y, d.x)
    }

    /// Point on the centreline at parameter `t` in [0, 1].
    pub fn point_at(&self, t: f64) -> Point {
        self.start.add(self.end.sub(self.start).scale(t))
    }
}

/// Screen-space rectangle (pixels) describing the visible area.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    /// Viewport anchored at the screen origin.
    pub fn sized(width: f64, height: f64) -> Self {
        Self::new(0.0, 0.0, width, height)
    }

    /// Grow the rectangle by `pad` pixels on every side.
    pub fn padded(&self, pad: f64) -> Self {
        Self::new(
            self.x - pad,
            self.y - pad,
            self.width + 2.0 * pad,
            self.height + 2.0 * pad,
        )
    }

    pub fn corners(&self) -> [Point; 4] {
        [
            Point::new(self.x, self.y),
            Point::new(self.x + self.width, self.y),
            Point::new(self.x + self.width, self.y + self.height),
            Point::new(self.x, self.y + self.height),
        ]
    }

    pub fn is_valid(&self) -> bool {
        self.x.is_finite()
            && self.y.is_finite()
            && self.width.is_finite()
            && self.height.is_finite()
            && self.width > 0.0
            && self.height > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_frame() {
        let seg = RoadSegment::new(Point::new(0.0, 0.0), Point::new(10.0, 0.0), 4.0);
        assert_eq!(seg.length(), 10.0);
        assert_eq!(seg.direction(), Point::new(1.0, 0.0));
        assert_eq!(seg.normal(), Point::new(0.0, 1.0));
        assert_eq!(seg.point_at(0.5), Point::new(5.0, 0.0));
    }

    #[test]
    fn test_degenerate_segments_not_drawable() {
        let p = Point::new(1.0, 1.0);
        assert!(!RoadSegment::new(p, p, 5.0).is_drawable());
        assert!(!RoadSegment::new(p, Point::new(2.0, 1.0), 0.0).is_drawable());
        assert!(!RoadSegment::new(p, Point::new(f64::NAN, 1.0), 1.0).is_drawable());
        assert_eq!(RoadSegment::new(p, p, 5.0).direction(), Point::default());
    }

    #[test]
    fn test_viewport_padding() {
        let vp = Viewport::sized(100.0, 50.0).padded(10.0);
        assert_eq!(vp.corners()[0], Point::new(-10.0, -10.0));
        assert_eq!(vp.corners()[2], Point::new(110.0, 60.0));
    }
}
