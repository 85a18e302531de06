//! Document ↔ screen projection.
//!
//! Presence coordinates travel in document (world) space. Every render maps
//! them through the viewer's current camera, since pan and zoom change
//! between frames.

use serde::{Deserialize, Serialize};

/// 2D point in document or screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Both components are finite numbers.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    /// Linear interpolation toward `target` by factor `t` ∈ [0, 1].
    pub fn lerp(&self, target: &Vec2, t: f64) -> Vec2 {
        Vec2 {
            x: self.x + (target.x - self.x) * t,
            y: self.y + (target.y - self.y) * t,
        }
    }
}

impl Default for Vec2 {
    fn default() -> Self {
        Self::ZERO
    }
}

const MIN_ZOOM: f64 = 0.1;
const MAX_ZOOM: f64 = 50.0;

/// Viewer camera: pan offset in document units, plus zoom.
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub pan_x: f64,
    pub pan_y: f64,
    zoom: f64,
    pub viewport_width: f64,
    pub viewport_height: f64,
}

impl Camera {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            pan_x: 0.0,
            pan_y: 0.0,
            zoom: 1.0,
            viewport_width: width,
            viewport_height: height,
        }
    }

    /// Document point → screen pixel.
    pub fn world_to_screen(&self, world: Vec2) -> Vec2 {
        Vec2 {
            x: (world.x - self.pan_x) * self.zoom,
            y: (world.y - self.pan_y) * self.zoom,
        }
    }

    /// Screen pixel → document point.
    pub fn screen_to_world(&self, screen: Vec2) -> Vec2 {
        Vec2 {
            x: screen.x / self.zoom + self.pan_x,
            y: screen.y / self.zoom + self.pan_y,
        }
    }

    /// Whether a screen point falls inside the viewport.
    pub fn contains_screen(&self, screen: Vec2) -> bool {
        (0.0..=self.viewport_width).contains(&screen.x)
            && (0.0..=self.viewport_height).contains(&screen.y)
    }

    /// Pan by delta pixels (in screen space).
    pub fn pan(&mut self, dx: f64, dy: f64) {
        self.pan_x -= dx / self.zoom;
        self.pan_y -= dy / self.zoom;
    }

    /// Zoom by `factor` around screen point (sx, sy).
    pub fn zoom_at(&mut self, sx: f64, sy: f64, factor: f64) {
        // World point under cursor before zoom.
        let anchor = self.screen_to_world(Vec2::new(sx, sy));

        self.zoom = (self.zoom * factor).clamp(MIN_ZOOM, MAX_ZOOM);

        // Keep the same world point under the cursor.
        self.pan_x = anchor.x - sx / self.zoom;
        self.pan_y = anchor.y - sy / self.zoom;
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    /// Set an absolute zoom level, clamped to the supported range.
    pub fn set_zoom(&mut self, zoom: f64) {
        self.zoom = zoom.clamp(MIN_ZOOM, MAX_ZOOM);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_vec2_lerp() {
        let a = Vec2::new(0.0, 0.0);
        let b = Vec2::new(10.0, 20.0);

        let mid = a.lerp(&b, 0.5);
        assert!(approx(mid.x, 5.0));
        assert!(approx(mid.y, 10.0));
        assert_eq!(a.lerp(&b, 1.0), b);
    }

    #[test]
    fn test_vec2_finite() {
        assert!(Vec2::new(1.0, -2.0).is_finite());
        assert!(!Vec2::new(f64::NAN, 0.0).is_finite());
        assert!(!Vec2::new(0.0, f64::INFINITY).is_finite());
    }

    #[test]
    fn test_identity_camera() {
        let camera = Camera::new(800.0, 600.0);
        let p = Vec2::new(120.0, 45.0);
        assert_eq!(camera.world_to_screen(p), p);
    }

    #[test]
    fn test_pan_and_zoom_projection() {
        let mut camera = Camera::new(800.0, 600.0);
        camera.pan_x = 100.0;
        camera.pan_y = 50.0;
        camera.set_zoom(2.0);

        let screen = camera.world_to_screen(Vec2::new(150.0, 75.0));
        assert!(approx(screen.x, 100.0));
        assert!(approx(screen.y, 50.0));
    }

    #[test]
    fn test_screen_world_inverse() {
        let mut camera = Camera::new(800.0, 600.0);
        camera.pan(-37.0, 12.0);
        camera.zoom_at(200.0, 150.0, 1.7);

        let world = Vec2::new(321.5, -44.25);
        let back = camera.screen_to_world(camera.world_to_screen(world));
        assert!(approx(back.x, world.x));
        assert!(approx(back.y, world.y));
    }

    #[test]
    fn test_zoom_at_keeps_anchor() {
        let mut camera = Camera::new(800.0, 600.0);
        let anchor_screen = Vec2::new(400.0, 300.0);
        let before = camera.screen_to_world(anchor_screen);

        camera.zoom_at(anchor_screen.x, anchor_screen.y, 3.0);
        let after = camera.screen_to_world(anchor_screen);
        assert!(approx(before.x, after.x));
        assert!(approx(before.y, after.y));
        assert!(approx(camera.zoom(), 3.0));
    }

    #[test]
    fn test_zoom_clamped() {
        let mut camera = Camera::new(800.0, 600.0);
        camera.zoom_at(0.0, 0.0, 1000.0);
        assert!(approx(camera.zoom(), MAX_ZOOM));
        camera.zoom_at(0.0, 0.0, 1e-6);
        assert!(approx(camera.zoom(), MIN_ZOOM));
    }

    #[test]
    fn test_set_zoom_clamped() {
        let mut camera = Camera::new(800.0, 600.0);
        camera.set_zoom(0.5);
        assert!(approx(camera.zoom(), 0.5));
        camera.set_zoom(0.0);
        assert!(approx(camera.zoom(), MIN_ZOOM));
        camera.set_zoom(f64::MAX);
        assert!(approx(camera.zoom(), MAX_ZOOM));
    }

    #[test]
    fn test_contains_screen() {
        let camera = Camera::new(800.0, 600.0);
        assert!(camera.contains_screen(Vec2::new(10.0, 10.0)));
        assert!(!camera.contains_screen(Vec2::new(-1.0, 10.0)));
        assert!(!camera.contains_screen(Vec2::new(10.0, 601.0)));
    }
}
