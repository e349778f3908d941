//! Viewport and occlusion culling.
//!
//! Both tests are conservative: unknown bounds are always visible, and
//! occlusion only removes a renderable that another occluder covers
//! completely.

use std::collections::HashMap;

use crate::renderable::{Renderable, RenderableId};
use crate::types::Rectangle;
use crate::viewport::Viewport;

pub const DEFAULT_MARGIN: f32 = 50.0;

/// Bounds of renderables registered as potential occluders.
///
/// Maintained by the caller; the pipeline never derives occluders from
/// draw order.
#[derive(Debug, Default, Clone)]
pub struct OcclusionMap {
    occluders: HashMap<RenderableId, Rectangle>,
}

impl OcclusionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or move an occluder.
    pub fn register(&mut self, id: RenderableId, bounds: Rectangle) {
        self.occluders.insert(id, bounds);
    }

    pub fn remove(&mut self, id: RenderableId) -> Option<Rectangle> {
        self.occluders.remove(&id)
    }

    pub fn clear(&mut self) {
        self.occluders.clear();
    }

    pub fn len(&self) -> usize {
        self.occluders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.occluders.is_empty()
    }

    /// Whether `bounds` lies entirely inside an occluder other than `id`.
    ///
    /// An occluder with exactly the same bounds never hides it, so two
    /// coincident occluders both stay visible.
    pub fn is_occluded(&self, id: RenderableId, bounds: &Rectangle) -> bool {
        self.occluders.iter().any(|(&other, occluder)| {
            other != id && occluder != bounds && occluder.contains_rect(bounds)
        })
    }
}

/// Result of a culling pass. `visible` holds indices into the input slice.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CullOutcome {
    pub visible: Vec<usize>,
    /// Removed for any reason, occlusion included.
    pub culled: usize,
    pub occluded: usize,
}

#[derive(Debug, Default)]
pub struct Culler {
    occlusion: OcclusionMap,
    occlusion_enabled: bool,
}

impl Culler {
    pub fn new(occlusion_enabled: bool) -> Self {
        Self {
            occlusion: OcclusionMap::new(),
            occlusion_enabled,
        }
    }

    pub fn set_occlusion_enabled(&mut self, enabled: bool) {
        self.occlusion_enabled = enabled;
    }

    pub fn occlusion(&self) -> &OcclusionMap {
        &self.occlusion
    }

    pub fn occlusion_mut(&mut self) -> &mut OcclusionMap {
        &mut self.occlusion
    }

    /// Open-interval test against `area`; unknown extent is visible.
    #[inline]
    pub fn is_visible(bounds: Option<&Rectangle>, area: &Rectangle) -> bool {
        bounds.is_none_or(|b| b.intersects(area))
    }

    pub fn is_occluded(&self, id: RenderableId, bounds: Option<&Rectangle>) -> bool {
        match bounds {
            Some(bounds) if self.occlusion_enabled => self.occlusion.is_occluded(id, bounds),
            _ => false,
        }
    }

    /// Keep every renderable that intersects the viewport grown by `margin`
    /// and is not occluded.
    pub fn cull<S>(
        &self,
        renderables: &[&dyn Renderable<S>],
        viewport: &Viewport,
        margin: f32,
    ) -> CullOutcome {
        let area = viewport.culling_bounds(margin);
        self.cull_subset(renderables, 0..renderables.len(), &area)
    }

    /// Cull the renderables at `indices` against an arbitrary area.
    pub fn cull_subset<S>(
        &self,
        renderables: &[&dyn Renderable<S>],
        indices: impl IntoIterator<Item = usize>,
        area: &Rectangle,
    ) -> CullOutcome {
        let mut outcome = CullOutcome::default();

        for index in indices {
            let Some(renderable) = renderables.get(index) else {
                continue;
            };
            let bounds = renderable.bounds();

            if !Self::is_visible(bounds.as_ref(), area) {
                outcome.culled += 1;
            } else if self.is_occluded(renderable.id(), bounds.as_ref()) {
                outcome.culled += 1;
                outcome.occluded += 1;
            } else {
                outcome.visible.push(index);
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::testing::{Marker, RecordingSurface};

    fn as_dyn(markers: &[Marker]) -> Vec<&dyn Renderable<RecordingSurface>> {
        markers.iter().map(|p| p as &dyn Renderable<RecordingSurface>).collect()
    }

    #[test]
    fn test_viewport_margin() {
        let markers = vec![
            Marker::at(1, 900.0, 0.0, 10.0, 10.0),
            Marker::at(2, 840.0, 0.0, 10.0, 10.0),
            Marker::new(3, None),
        ];
        let renderables = as_dyn(&markers);
        let culler = Culler::new(true);
        let viewport = Viewport::new(0.0, 0.0, 800.0, 600.0);

        let outcome = culler.cull(&renderables, &viewport, DEFAULT_MARGIN);

        assert_eq!(outcome.visible, vec![1, 2]);
        assert_eq!(outcome.culled, 1);
    }

    #[test]
    fn test_touching_margin_edge_is_culled() {
        // The expanded viewport ends at x = 850.
        let markers = vec![Marker::at(1, 850.0, 0.0, 10.0, 10.0)];
        let renderables = as_dyn(&markers);
        let outcome = Culler::new(false).cull(
            &renderables,
            &Viewport::new(0.0, 0.0, 800.0, 600.0),
            50.0,
        );
        assert!(outcome.visible.is_empty());
    }

    #[test]
    fn test_full_containment_occludes() {
        let markers = vec![
            Marker::at(1, 0.0, 0.0, 200.0, 200.0),
            Marker::at(2, 50.0, 50.0, 20.0, 20.0),
        ];
        let renderables = as_dyn(&markers);
        let mut culler = Culler::new(true);
        culler.occlusion_mut().register(1, Rectangle::new(0.0, 0.0, 200.0, 200.0));

        let outcome = culler.cull(&renderables, &Viewport::new(0.0, 0.0, 800.0, 600.0), 50.0);

        // The occluder itself is never hidden by its own bounds.
        assert_eq!(outcome.visible, vec![0]);
        assert_eq!(outcome.occluded, 1);
    }

    #[test]
    fn test_coincident_occluders_stay_visible() {
        let markers = vec![
            Marker::at(1, 0.0, 0.0, 100.0, 100.0),
            Marker::at(2, 0.0, 0.0, 100.0, 100.0),
            Marker::at(3, 10.0, 10.0, 10.0, 10.0),
        ];
        let renderables = as_dyn(&markers);
        let mut culler = Culler::new(true);
        culler.occlusion_mut().register(1, Rectangle::new(0.0, 0.0, 100.0, 100.0));
        culler.occlusion_mut().register(2, Rectangle::new(0.0, 0.0, 100.0, 100.0));

        let outcome = culler.cull(&renderables, &Viewport::new(0.0, 0.0, 800.0, 600.0), 50.0);

        assert_eq!(outcome.visible, vec![0, 1]);
        assert_eq!(outcome.occluded, 1);
    }

    #[test]
    fn test_partial_overlap_is_kept() {
        let mut map = OcclusionMap::new();
        map.register(1, Rectangle::new(0.0, 0.0, 100.0, 100.0));

        // 90% of this rectangle is covered.
        let mostly_hidden = Rectangle::new(10.0, 0.0, 100.0, 100.0);
        assert!(!map.is_occluded(2, &mostly_hidden));
        assert!(map.is_occluded(2, &Rectangle::new(10.0, 10.0, 80.0, 80.0)));
    }

    #[test]
    fn test_occlusion_disabled() {
        let mut culler = Culler::new(false);
        culler.occlusion_mut().register(1, Rectangle::new(0.0, 0.0, 100.0, 100.0));
        assert!(!culler.is_occluded(2, Some(&Rectangle::new(10.0, 10.0, 10.0, 10.0))));
        assert!(!culler.is_occluded(2, None));
    }

    #[test]
    fn test_cull_subset_against_region() {
        let markers = vec![
            Marker::at(1, 15.0, 15.0, 5.0, 5.0),
            Marker::at(2, 100.0, 100.0, 5.0, 5.0),
            Marker::at(3, 25.0, 25.0, 10.0, 10.0),
        ];
        let renderables = as_dyn(&markers);
        let region = Rectangle::new(10.0, 10.0, 20.0, 20.0);

        let outcome = Culler::new(true).cull_subset(&renderables, [0, 1, 2], &region);
        assert_eq!(outcome.visible, vec![0, 2]);
    }
}
