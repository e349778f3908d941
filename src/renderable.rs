//! Objects supplied by the game/UI layer.
//!
//! The pipeline never owns renderables. It borrows them for one frame, reads
//! their metadata and asks them to draw themselves onto a surface.

use serde::{Deserialize, Serialize};

use crate::types::Rectangle;
use crate::viewport::Viewport;

/// Stable identity of a renderable across frames.
pub type RenderableId = u64;

/// Type tag used to route renderables without an explicit layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderableKind {
    Background,
    /// Buttons, menus and other interactive controls.
    Control,
    Overlay,
    Debug,
    /// Anything else (game entities, effects, text).
    Content,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// Quality level forwarded to draw calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
    Full,
    /// Emergency mode: draw cheaply, skip animation and effects.
    Reduced,
}

/// Per-draw parameters.
#[derive(Debug, Clone, Copy)]
pub struct DrawContext {
    pub viewport: Viewport,
    pub quality: Quality,
    pub animations: bool,
    pub effects: bool,
}

impl DrawContext {
    pub fn full(viewport: Viewport) -> Self {
        Self {
            viewport,
            quality: Quality::Full,
            animations: true,
            effects: true,
        }
    }

    pub fn reduced(viewport: Viewport) -> Self {
        Self {
            viewport,
            quality: Quality::Reduced,
            animations: false,
            effects: false,
        }
    }
}

/// Something that can draw itself onto a surface of type `S`.
pub trait Renderable<S> {
    fn id(&self) -> RenderableId;

    /// Axis-aligned bounds. `None` means the extent is unknown and the
    /// renderable is treated as always visible.
    fn bounds(&self) -> Option<Rectangle>;

    /// Explicit layer name; overrides kind-based routing.
    fn layer(&self) -> Option<&str> {
        None
    }

    fn kind(&self) -> RenderableKind {
        RenderableKind::Content
    }

    /// Essential renderables are still drawn in emergency mode.
    fn is_essential(&self) -> bool {
        false
    }

    fn priority(&self) -> Priority {
        Priority::Normal
    }

    /// Monotonically increasing; bumped by the owner on every visual change.
    fn version(&self) -> u64 {
        0
    }

    /// Draw onto `surface`. Errors are logged by the pipeline and do not
    /// stop the frame.
    fn draw(&self, surface: &mut S, ctx: &DrawContext) -> anyhow::Result<()>;
}

/// Whether a renderable survives emergency mode.
pub fn survives_emergency<S>(renderable: &dyn Renderable<S>) -> bool {
    renderable.is_essential() || renderable.priority() == Priority::High
}

/// Draw the renderables at `indices` in order.
///
/// A failing draw is logged and skipped; the rest still draw. Returns
/// `(drawn, failed)`.
pub(crate) fn draw_each<S>(
    surface: &mut S,
    renderables: &[&dyn Renderable<S>],
    indices: &[usize],
    ctx: &DrawContext,
) -> (usize, usize) {
    let mut drawn = 0;
    let mut failed = 0;

    for renderable in indices.iter().filter_map(|&i| renderables.get(i)) {
        match renderable.draw(surface, ctx) {
            Ok(()) => drawn += 1,
            Err(e) => {
                failed += 1;
                log::warn!(target: "adaptive_render", "renderable {} failed to draw: {e:#}", renderable.id());
            }
        }
    }

    (drawn, failed)
}
