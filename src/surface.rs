use crate::error::RenderResult;
use crate::types::{Color, Rectangle};

/// Raster surface the pipeline draws and composites onto.
///
/// Clip rectangles nest: every draw between `push_clip_rect` and the matching
/// `pop_clip_rect` is limited to the intersection of all pushed rectangles.
pub trait Surface {
    fn width(&self) -> u32;
    fn height(&self) -> u32;

    /// A zero-sized surface cannot be drawn to.
    fn is_usable(&self) -> bool {
        self.width() > 0 && self.height() > 0
    }

    /// Reset every pixel to transparent, ignoring the clip stack.
    fn clear(&mut self);

    /// Reset the pixels of `rect` (within the current clip) to transparent.
    fn clear_rect(&mut self, rect: Rectangle) -> RenderResult<()>;

    fn push_clip_rect(&mut self, rect: Rectangle) -> RenderResult<()>;
    fn pop_clip_rect(&mut self) -> RenderResult<()>;

    /// Blend `source` over this surface at the origin with `opacity`.
    fn composite(&mut self, source: &Self, opacity: f32) -> RenderResult<()>;

    /// Outline a rectangle, used by the debug overlay.
    fn stroke_rect(&mut self, rect: Rectangle, color: Color, width: f32) -> RenderResult<()>;
}

/// Host capability for allocating surfaces.
pub trait SurfaceBackend {
    type Surface: Surface;

    /// Allocate an off-screen raster surface. `None` means the host has no
    /// off-screen support.
    fn create_offscreen(&mut self, width: u32, height: u32) -> Option<Self::Surface>;

    /// Allocate a regular surface when off-screen allocation is unavailable.
    fn create_fallback(&mut self, width: u32, height: u32) -> RenderResult<Self::Surface>;
}
