//! Screen <-> world coordinate mapping
//!
//! World space is the fixed plane the roads live in. An optional linear
//! projection `[A C; B D]` maps world into the renderer's projection space
//! (identity for top-down, dimetric for isometric views); the camera then
//! translates and uniformly zooms that space onto screen pixels:
//!
//! ```text
//! screen = (M * world - camera) * zoom
//! world  = M^-1 * (screen / zoom + camera)
//! ```

use serde::{Deserialize, Serialize};

use crate::geometry::Point;

/// Determinant magnitude below which a projection is treated as singular.
pub const SINGULAR_EPSILON: f64 = 1e-8;

/// Camera state pushed by the host whenever the view changes.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViewState {
    pub camera_x: f64,
    pub camera_y: f64,
    pub zoom: f64,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            camera_x: 0.0,
            camera_y: 0.0,
            zoom: 1.0,
        }
    }
}

impl ViewState {
    pub fn new(camera_x: f64, camera_y: f64, zoom: f64) -> Self {
        Self { camera_x, camera_y, zoom }
    }
}

/// Linear world-to-projection matrix `[a c; b d]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProjectionMatrix {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
}

impl ProjectionMatrix {
    pub const fn identity() -> Self {
        Self { a: 1.0, b: 0.0, c: 0.0, d: 1.0 }
    }

    /// Classic 2:1 isometric (dimetric) tile projection.
    pub const fn isometric() -> Self {
        Self { a: 1.0, b: 0.5, c: -1.0, d: 0.5 }
    }

    pub fn determinant(&self) -> f64 {
        self.a * self.d - self.c * self.b
    }

    pub fn is_singular(&self) -> bool {
        let det = self.determinant();
        !det.is_finite() || det.abs() < SINGULAR_EPSILON
    }

    pub fn apply(&self, p: Point) -> Point {
        Point::new(self.a * p.x + self.c * p.y, self.b * p.x + self.d * p.y)
    }

    /// Inverse matrix, or `None` when singular.
    pub fn inverse(&self) -> Option<ProjectionMatrix> {
        if self.is_singular() {
            return None;
        }
        let inv = 1.0 / self.determinant();
        Some(Self {
            a: self.d * inv,
            b: -self.b * inv,
            c: -self.c * inv,
            d: self.a * inv,
        })
    }
}

impl Default for ProjectionMatrix {
    fn default() -> Self {
        Self::identity()
    }
}

/// Stateless coordinate converter for one (camera, zoom, projection) tuple.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewProjector {
    view: ViewState,
    forward: ProjectionMatrix,
    inverse: ProjectionMatrix,
}

impl ViewProjector {
    /// A singular (or absent) projection falls back to identity math in both
    /// directions, so the pair stays a true inverse.
    pub fn new(view: ViewState, projection: Option<ProjectionMatrix>) -> Self {
        let (forward, inverse) = match projection.and_then(|m| m.inverse().map(|inv| (m, inv))) {
            Some(pair) => pair,
            None => (ProjectionMatrix::identity(), ProjectionMatrix::identity()),
        };
        Self { view, forward, inverse }
    }

    pub fn view(&self) -> ViewState {
        self.view
    }

    pub fn zoom(&self) -> f64 {
        self.view.zoom
    }

    /// Matrix actually in effect (identity when the requested one was singular).
    pub fn projection(&self) -> ProjectionMatrix {
        self.forward
    }

    pub fn world_to_screen(&self, p: Point) -> Point {
        let q = self.forward.apply(p);
        Point::new(
            (q.x - self.view.camera_x) * self.view.zoom,
            (q.y - self.view.camera_y) * self.view.zoom,
        )
    }

    pub fn screen_to_world(&self, s: Point) -> Point {
        let q = Point::new(
            s.x / self.view.zoom + self.view.camera_x,
            s.y / self.view.zoom + self.view.camera_y,
        );
        self.inverse.apply(q)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Point, b: Point, tol: f64) -> bool {
        (a.x - b.x).abs() <= tol && (a.y - b.y).abs() <= tol
    }

    #[test]
    fn test_isometric_round_trip() {
        let projector = ViewProjector::new(
            ViewState::new(-120.5, 33.25, 1.75),
            Some(ProjectionMatrix::isometric()),
        );
        for i in 0..100 {
            let p = Point::new(i as f64 * 13.7 - 600.0, (i * i) as f64 * 0.37 - 250.0);
            let back = projector.screen_to_world(projector.world_to_screen(p));
            assert!(close(p, back, 1e-6), "{:?} -> {:?}", p, back);
        }
    }

    #[test]
    fn test_identity_projection_is_translate_and_zoom() {
        let projector = ViewProjector::new(ViewState::new(10.0, 20.0, 2.0), None);
        let s = projector.world_to_screen(Point::new(15.0, 25.0));
        assert_eq!(s, Point::new(10.0, 10.0));
        assert_eq!(projector.screen_to_world(s), Point::new(15.0, 25.0));
    }

    #[test]
    fn test_singular_matrix_falls_back_to_identity() {
        let singular = ProjectionMatrix { a: 1.0, b: 2.0, c: 2.0, d: 4.0 };
        assert!(singular.is_singular());
        let projector = ViewProjector::new(ViewState::default(), Some(singular));
        assert_eq!(projector.projection(), ProjectionMatrix::identity());
        let p = Point::new(3.0, -4.0);
        assert_eq!(projector.world_to_screen(p), p);
        assert_eq!(projector.screen_to_world(p), p);
    }

    #[test]
    fn test_inverse_matrix() {
        let m = ProjectionMatrix::isometric();
        let inv = m.inverse().unwrap();
        let p = Point::new(7.0, -2.0);
        assert!(close(inv.apply(m.apply(p)), p, 1e-12));
    }
}
