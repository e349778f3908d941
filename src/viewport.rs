//! Visible area of the target surface.

use serde::{Deserialize, Serialize};

use crate::types::Rectangle;

/// Current visible rectangle with scale and rotation.
///
/// Replaced wholesale every frame; the pipeline never mutates individual
/// fields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    #[serde(default = "default_scale_factor")]
    pub scale_factor: f32,
    #[serde(default)]
    pub rotation: f32,
}

fn default_scale_factor() -> f32 {
    1.0
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(0.0, 0.0, 0.0, 0.0)
    }
}

impl Viewport {
    /// Unscaled, unrotated viewport.
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            scale_factor: 1.0,
            rotation: 0.0,
        }
    }

    pub fn with_scale(mut self, scale_factor: f32) -> Self {
        self.scale_factor = scale_factor;
        self
    }

    pub fn with_rotation(mut self, rotation: f32) -> Self {
        self.rotation = rotation;
        self
    }

    #[inline]
    pub fn bounds(&self) -> Rectangle {
        Rectangle::new(self.x, self.y, self.width, self.height)
    }

    /// Bounds grown by `margin` on every side, used for culling.
    #[inline]
    pub fn culling_bounds(&self, margin: f32) -> Rectangle {
        self.bounds().expand(margin)
    }

    pub fn contains_point(&self, x: f32, y: f32) -> bool {
        self.bounds().contains(x, y)
    }

    pub fn contains_rect(&self, rect: &Rectangle) -> bool {
        self.bounds().contains_rect(rect)
    }

    /// Pixel dimensions of surfaces that back this viewport.
    ///
    /// Fractional sizes round up so a surface always covers the visible area.
    pub fn surface_size(&self) -> (u32, u32) {
        (
            self.width.max(0.0).ceil() as u32,
            self.height.max(0.0).ceil() as u32,
        )
    }

    /// Whether the pixel size differs from `other`, which invalidates every
    /// surface sized to the viewport.
    pub fn size_changed(&self, other: &Viewport) -> bool {
        self.surface_size() != other.surface_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_culling_bounds() {
        let vp = Viewport::new(0.0, 0.0, 800.0, 600.0);
        assert_eq!(vp.culling_bounds(50.0), Rectangle::new(-50.0, -50.0, 900.0, 700.0));
    }

    #[test]
    fn test_surface_size_rounds_up() {
        let vp = Viewport::new(0.0, 0.0, 799.5, 600.0);
        assert_eq!(vp.surface_size(), (800, 600));
        assert_eq!(Viewport::default().surface_size(), (0, 0));
    }

    #[test]
    fn test_size_changed_ignores_offset() {
        let a = Viewport::new(0.0, 0.0, 800.0, 600.0);
        let moved = Viewport::new(100.0, 40.0, 800.0, 600.0);
        let resized = Viewport::new(0.0, 0.0, 1024.0, 768.0);
        assert!(!a.size_changed(&moved));
        assert!(a.size_changed(&resized));
    }

    #[test]
    fn test_containment() {
        let vp = Viewport::new(0.0, 0.0, 100.0, 100.0).with_scale(2.0);
        assert!(vp.contains_point(50.0, 50.0));
        assert!(!vp.contains_point(150.0, 50.0));
        assert!(vp.contains_rect(&Rectangle::new(10.0, 10.0, 10.0, 10.0)));
        assert_eq!(vp.scale_factor, 2.0);
    }
}
