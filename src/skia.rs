//! CPU raster surfaces backed by `tiny-skia`.

use tiny_skia::{
    BlendMode, FillRule, Mask, Paint, PathBuilder, Pixmap, PixmapPaint, Rect as SkiaRect, Stroke,
    Transform,
};

use crate::error::{RenderError, RenderResult};
use crate::surface::{Surface, SurfaceBackend};
use crate::types::{Color, Rectangle};

struct Clip {
    rect: Rectangle,
    mask: Mask,
}

/// `Pixmap` plus a stack of rectangular clip masks.
pub struct SkiaSurface {
    pixmap: Pixmap,
    clips: Vec<Clip>,
}

impl std::fmt::Debug for SkiaSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkiaSurface")
            .field("width", &self.pixmap.width())
            .field("height", &self.pixmap.height())
            .field("clip_depth", &self.clips.len())
            .finish()
    }
}

impl SkiaSurface {
    /// `None` for zero or oversized dimensions.
    pub fn new(width: u32, height: u32) -> Option<Self> {
        Pixmap::new(width, height).map(Self::from_pixmap)
    }

    pub fn from_pixmap(pixmap: Pixmap) -> Self {
        Self {
            pixmap,
            clips: Vec::new(),
        }
    }

    pub fn pixmap(&self) -> &Pixmap {
        &self.pixmap
    }

    pub fn pixmap_mut(&mut self) -> &mut Pixmap {
        &mut self.pixmap
    }

    pub fn into_pixmap(self) -> Pixmap {
        self.pixmap
    }

    /// Mask for the innermost clip, to pass to raw `tiny-skia` draw calls.
    pub fn clip_mask(&self) -> Option<&Mask> {
        self.clips.last().map(|clip| &clip.mask)
    }

    /// Premultiplied RGBA of one pixel.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        self.pixmap
            .pixel(x, y)
            .map(|p| [p.red(), p.green(), p.blue(), p.alpha()])
    }

    /// Fill `rect` with a solid color, honoring the clip stack.
    pub fn fill_rect(&mut self, rect: Rectangle, color: Color) {
        let Some(rect) = to_skia_rect(&rect) else {
            return;
        };
        let paint = solid_paint(color);
        let mask = self.clips.last().map(|clip| &clip.mask);
        self.pixmap
            .fill_rect(rect, &paint, Transform::identity(), mask);
    }

    fn full_rect(&self) -> Rectangle {
        Rectangle::new(
            0.0,
            0.0,
            self.pixmap.width() as f32,
            self.pixmap.height() as f32,
        )
    }
}

impl Surface for SkiaSurface {
    fn width(&self) -> u32 {
        self.pixmap.width()
    }

    fn height(&self) -> u32 {
        self.pixmap.height()
    }

    fn clear(&mut self) {
        self.pixmap.fill(tiny_skia::Color::TRANSPARENT);
    }

    fn clear_rect(&mut self, rect: Rectangle) -> RenderResult<()> {
        let Some(rect) = to_skia_rect(&rect) else {
            return Ok(());
        };
        let paint = Paint {
            blend_mode: BlendMode::Clear,
            ..Paint::default()
        };
        let mask = self.clips.last().map(|clip| &clip.mask);
        self.pixmap
            .fill_rect(rect, &paint, Transform::identity(), mask);
        Ok(())
    }

    fn push_clip_rect(&mut self, rect: Rectangle) -> RenderResult<()> {
        let current = self
            .clips
            .last()
            .map_or_else(|| self.full_rect(), |clip| clip.rect);
        let effective = current.intersection(&rect).unwrap_or(Rectangle::ZERO);

        // An all-zero mask clips everything away.
        let mut mask = Mask::new(self.pixmap.width(), self.pixmap.height()).ok_or_else(|| {
            RenderError::Surface(format!(
                "cannot allocate {}x{} clip mask",
                self.pixmap.width(),
                self.pixmap.height()
            ))
        })?;
        if let Some(skia_rect) = to_skia_rect(&effective) {
            let path = PathBuilder::from_rect(skia_rect);
            mask.fill_path(&path, FillRule::Winding, false, Transform::identity());
        }

        self.clips.push(Clip {
            rect: effective,
            mask,
        });
        Ok(())
    }

    fn pop_clip_rect(&mut self) -> RenderResult<()> {
        self.clips
            .pop()
            .map(|_| ())
            .ok_or_else(|| RenderError::Surface("clip stack underflow".into()))
    }

    fn composite(&mut self, source: &Self, opacity: f32) -> RenderResult<()> {
        let paint = PixmapPaint {
            opacity: opacity.clamp(0.0, 1.0),
            ..PixmapPaint::default()
        };
        let mask = self.clips.last().map(|clip| &clip.mask);
        self.pixmap.draw_pixmap(
            0,
            0,
            source.pixmap.as_ref(),
            &paint,
            Transform::identity(),
            mask,
        );
        Ok(())
    }

    fn stroke_rect(&mut self, rect: Rectangle, color: Color, width: f32) -> RenderResult<()> {
        let Some(skia_rect) = to_skia_rect(&rect) else {
            return Ok(());
        };
        let path = PathBuilder::from_rect(skia_rect);
        let stroke = Stroke {
            width,
            ..Stroke::default()
        };
        let paint = solid_paint(color);
        let mask = self.clips.last().map(|clip| &clip.mask);
        self.pixmap
            .stroke_path(&path, &paint, &stroke, Transform::identity(), mask);
        Ok(())
    }
}

/// Allocates [`SkiaSurface`]s.
///
/// `without_offscreen` models a host that refuses off-screen allocation, so
/// every request goes through the fallback path.
#[derive(Debug, Clone)]
pub struct SkiaBackend {
    offscreen: bool,
}

impl Default for SkiaBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SkiaBackend {
    pub fn new() -> Self {
        Self { offscreen: true }
    }

    pub fn without_offscreen() -> Self {
        Self { offscreen: false }
    }
}

impl SurfaceBackend for SkiaBackend {
    type Surface = SkiaSurface;

    fn create_offscreen(&mut self, width: u32, height: u32) -> Option<SkiaSurface> {
        if !self.offscreen {
            return None;
        }
        SkiaSurface::new(width, height)
    }

    fn create_fallback(&mut self, width: u32, height: u32) -> RenderResult<SkiaSurface> {
        SkiaSurface::new(width, height).ok_or(RenderError::Allocation { width, height })
    }
}

fn to_skia_rect(rect: &Rectangle) -> Option<SkiaRect> {
    SkiaRect::from_xywh(rect.x, rect.y, rect.width, rect.height)
}

fn solid_paint(color: Color) -> Paint<'static> {
    let mut paint = Paint::default();
    let color = tiny_skia::Color::from_rgba(
        color.r.clamp(0.0, 1.0),
        color.g.clamp(0.0, 1.0),
        color.b.clamp(0.0, 1.0),
        color.a.clamp(0.0, 1.0),
    )
    .unwrap_or(tiny_skia::Color::BLACK);
    paint.set_color(color);
    paint.anti_alias = false;
    paint
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Color = Color::rgb(1.0, 0.0, 0.0);

    #[test]
    fn test_zero_size_is_rejected() {
        assert!(SkiaSurface::new(0, 10).is_none());
        let mut backend = SkiaBackend::new();
        assert!(matches!(
            backend.create_fallback(0, 0),
            Err(RenderError::Allocation { width: 0, height: 0 })
        ));
    }

    #[test]
    fn test_clip_limits_fill() {
        let mut surface = SkiaSurface::new(20, 20).unwrap();
        surface.push_clip_rect(Rectangle::new(0.0, 0.0, 10.0, 10.0)).unwrap();
        surface.fill_rect(Rectangle::new(0.0, 0.0, 20.0, 20.0), RED);
        surface.pop_clip_rect().unwrap();

        assert_eq!(surface.pixel(5, 5), Some([255, 0, 0, 255]));
        assert_eq!(surface.pixel(15, 15), Some([0, 0, 0, 0]));
    }

    #[test]
    fn test_nested_clips_intersect() {
        let mut surface = SkiaSurface::new(20, 20).unwrap();
        surface.push_clip_rect(Rectangle::new(0.0, 0.0, 10.0, 10.0)).unwrap();
        surface.push_clip_rect(Rectangle::new(5.0, 5.0, 10.0, 10.0)).unwrap();
        surface.fill_rect(Rectangle::new(0.0, 0.0, 20.0, 20.0), RED);

        assert_eq!(surface.pixel(7, 7), Some([255, 0, 0, 255]));
        assert_eq!(surface.pixel(2, 2), Some([0, 0, 0, 0]));
        assert_eq!(surface.pixel(12, 12), Some([0, 0, 0, 0]));
    }

    #[test]
    fn test_pop_underflow_is_error() {
        let mut surface = SkiaSurface::new(4, 4).unwrap();
        assert!(surface.pop_clip_rect().is_err());
    }

    #[test]
    fn test_clear_rect_only_clears_region() {
        let mut surface = SkiaSurface::new(10, 10).unwrap();
        surface.fill_rect(Rectangle::new(0.0, 0.0, 10.0, 10.0), RED);
        surface.clear_rect(Rectangle::new(0.0, 0.0, 5.0, 10.0)).unwrap();

        assert_eq!(surface.pixel(2, 2), Some([0, 0, 0, 0]));
        assert_eq!(surface.pixel(7, 2), Some([255, 0, 0, 255]));
    }

    #[test]
    fn test_composite_with_opacity() {
        let mut target = SkiaSurface::new(4, 4).unwrap();
        let mut layer = SkiaSurface::new(4, 4).unwrap();
        layer.fill_rect(Rectangle::new(0.0, 0.0, 4.0, 4.0), RED);

        target.composite(&layer, 1.0).unwrap();
        assert_eq!(target.pixel(1, 1), Some([255, 0, 0, 255]));

        let mut faded = SkiaSurface::new(4, 4).unwrap();
        faded.composite(&layer, 0.5).unwrap();
        let alpha = faded.pixel(1, 1).unwrap()[3];
        assert!((120..=135).contains(&alpha), "alpha was {alpha}");
    }

    #[test]
    fn test_backend_without_offscreen() {
        let mut backend = SkiaBackend::without_offscreen();
        assert!(backend.create_offscreen(8, 8).is_none());
        assert!(backend.create_fallback(8, 8).is_ok());
    }
}
