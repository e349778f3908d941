//! Frame orchestration.
//!
//! [`RenderingPipeline`] owns every subsystem and picks one strategy per
//! frame:
//!
//! 1. **Emergency** when the degradation controller says so: essential
//!    renderables only, reduced quality.
//! 2. **Differential** when dirty regions are pending: redraw inside each
//!    merged region only.
//! 3. **Layered** when layering is enabled: composite cached layer surfaces
//!    in z-order, redrawing dirty layers.
//! 4. **Direct** otherwise: cull once and draw everything that survives.
//!
//! Regions, renderable bounds and the viewport share the target surface's
//! coordinate space. Layer surfaces match the target, so every strategy puts
//! a renderable at the same pixels. Differential, direct and emergency frames
//! still honour layer order, visibility and opacity.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;

use crate::config::{ConfigUpdate, LayerSpec, PipelineConfig};
use crate::culling::{Culler, OcclusionMap};
use crate::dirty_rect::DirtyRectTracker;
use crate::error::{RenderError, RenderResult};
use crate::layer_cache::{LayerFrame, LayerRegistry};
use crate::monitor::{DegradationState, MonitorThresholds, PerformanceMetrics, PerformanceMonitor};
use crate::pool::{PoolStats, SurfacePool};
use crate::renderable::{DrawContext, Renderable, RenderableId, survives_emergency};
use crate::surface::{Surface, SurfaceBackend};
use crate::types::{Color, Rectangle};
use crate::viewport::Viewport;

/// Outline colour of the debug region overlay.
const DEBUG_REGION_COLOR: Color = Color::MAGENTA;
const DEBUG_REGION_WIDTH: f32 = 1.0;

/// Strategy used for a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderStrategy {
    Emergency,
    Differential,
    Layered,
    Direct,
}

/// Per-frame overrides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameOptions {
    /// Overrides `PipelineConfig::layering` for this frame.
    pub layering: Option<bool>,
    /// Treat the whole viewport as dirty.
    pub force_full_redraw: bool,
}

/// Diagnostics for one frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderReport {
    pub strategy: RenderStrategy,
    /// Successful draw calls. A renderable spanning two regions counts twice.
    pub objects_drawn: usize,
    pub objects_culled: usize,
    /// Visible but dropped by emergency mode.
    pub objects_skipped: usize,
    pub regions_updated: usize,
    pub layers_rendered: usize,
    pub layers_cached: usize,
    pub draw_failures: usize,
    pub frame_time: Duration,
    pub warning_raised: bool,
    /// Emergency mode ended after this frame.
    pub recovered: bool,
}

impl RenderReport {
    fn new(strategy: RenderStrategy) -> Self {
        Self {
            strategy,
            objects_drawn: 0,
            objects_culled: 0,
            objects_skipped: 0,
            regions_updated: 0,
            layers_rendered: 0,
            layers_cached: 0,
            draw_failures: 0,
            frame_time: Duration::ZERO,
            warning_raised: false,
            recovered: false,
        }
    }
}

/// Re-entrancy guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Rendering,
}

/// Returns the pipeline to [`PipelineState::Idle`] when dropped, also when a
/// renderable panics mid-frame.
struct FrameGuard<'p, B: SurfaceBackend> {
    pipeline: &'p mut RenderingPipeline<B>,
}

impl<B: SurfaceBackend> Drop for FrameGuard<'_, B> {
    fn drop(&mut self) {
        self.pipeline.state = PipelineState::Idle;
    }
}

pub struct RenderingPipeline<B: SurfaceBackend> {
    config: PipelineConfig,
    tracker: DirtyRectTracker,
    culler: Culler,
    layers: LayerRegistry<B::Surface>,
    pool: SurfacePool<B>,
    monitor: PerformanceMonitor,
    viewport: Viewport,
    state: PipelineState,
    /// Last seen version and bounds per renderable, when version tracking
    /// is on.
    versions: HashMap<RenderableId, (u64, Option<Rectangle>)>,
}

impl<B: SurfaceBackend> RenderingPipeline<B> {
    pub fn new(backend: B, config: PipelineConfig) -> RenderResult<Self> {
        config.validate()?;

        let pipeline = Self {
            tracker: DirtyRectTracker::default()
                .with_limits(config.max_dirty_regions, config.merge_threshold),
            culler: Culler::new(config.occlusion_culling),
            layers: LayerRegistry::new(&config.layers),
            pool: SurfacePool::new(backend, config.surface_cache_size),
            monitor: PerformanceMonitor::new(MonitorThresholds::from(&config)),
            viewport: Viewport::default(),
            state: PipelineState::Idle,
            versions: HashMap::new(),
            config,
        };

        log::info!(
            target: "adaptive_render",
            "rendering pipeline created: {} layers, pool capacity {}",
            pipeline.layers.len(),
            pipeline.pool.capacity()
        );
        Ok(pipeline)
    }

    pub fn with_defaults(backend: B) -> RenderResult<Self> {
        Self::new(backend, PipelineConfig::default())
    }

    /// Render one frame onto `target`.
    ///
    /// Fails with [`RenderError::Busy`] while another frame is in flight and
    /// with [`RenderError::TargetUnusable`] for a zero-sized target or
    /// viewport. Individual draw failures never fail the frame.
    pub fn render_frame(
        &mut self,
        target: &mut B::Surface,
        renderables: &[&dyn Renderable<B::Surface>],
        viewport: Viewport,
        options: &FrameOptions,
    ) -> RenderResult<RenderReport> {
        if self.state == PipelineState::Rendering {
            return Err(RenderError::Busy);
        }
        if !target.is_usable() {
            return Err(RenderError::TargetUnusable(format!(
                "target surface is {}x{}",
                target.width(),
                target.height()
            )));
        }
        let (width, height) = viewport.surface_size();
        if width == 0 || height == 0 {
            return Err(RenderError::TargetUnusable(format!(
                "viewport {}x{} has no area",
                viewport.width, viewport.height
            )));
        }

        self.state = PipelineState::Rendering;
        let guard = FrameGuard { pipeline: self };
        guard.pipeline.run_frame(target, renderables, viewport, options)
    }

    fn run_frame(
        &mut self,
        target: &mut B::Surface,
        renderables: &[&dyn Renderable<B::Surface>],
        viewport: Viewport,
        options: &FrameOptions,
    ) -> RenderResult<RenderReport> {
        let started = Instant::now();

        self.set_viewport(viewport);
        self.layers.set_size(target.width(), target.height());
        if options.force_full_redraw {
            self.tracker.mark_full_redraw();
        }
        if self.config.track_versions {
            self.track_versions(renderables);
        }

        let layering = options.layering.unwrap_or(self.config.layering);
        let mut report = if self.monitor.check_emergency() == DegradationState::Emergency {
            self.render_emergency(target, renderables)?
        } else if self.tracker.has_dirty_regions() {
            self.render_differential(target, renderables)?
        } else if layering {
            self.render_layered(target, renderables)?
        } else {
            self.render_direct(target, renderables)?
        };

        report.frame_time = started.elapsed();
        let record = self.monitor.record_frame(report.frame_time);
        report.warning_raised = record.warning_raised;
        report.recovered = record.recovered;
        if record.recovered {
            // Non-essential content is missing from the target.
            self.tracker.mark_full_redraw();
        }

        self.monitor.set_culled_object_count(report.objects_culled);
        let metrics = self.monitor.metrics_mut();
        match report.strategy {
            RenderStrategy::Emergency => metrics.emergency_frames += 1,
            RenderStrategy::Differential => metrics.differential_frames += 1,
            RenderStrategy::Layered => metrics.layered_frames += 1,
            RenderStrategy::Direct => metrics.direct_frames += 1,
        }

        log::debug!(
            target: "adaptive_render",
            "{:?} frame: drawn={} culled={} regions={} layers={}/{} in {:?}",
            report.strategy,
            report.objects_drawn,
            report.objects_culled,
            report.regions_updated,
            report.layers_rendered,
            report.layers_rendered + report.layers_cached,
            report.frame_time
        );
        Ok(report)
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        if viewport.size_changed(&self.viewport) {
            let (width, height) = viewport.surface_size();
            log::info!(target: "adaptive_render", "viewport resized to {width}x{height}");
        }
        if viewport != self.viewport {
            self.layers.invalidate_all();
        }
        self.viewport = viewport;
        self.tracker.set_screen_bounds(viewport.bounds());
    }

    /// Mark old and new bounds of every new, changed or vanished renderable.
    fn track_versions(&mut self, renderables: &[&dyn Renderable<B::Surface>]) {
        let mut seen = HashSet::with_capacity(renderables.len());

        for renderable in renderables {
            let id = renderable.id();
            let current = (renderable.version(), renderable.bounds());
            seen.insert(id);

            match self.versions.insert(id, current) {
                Some(previous) if previous == current => {}
                Some((_, old_bounds)) => {
                    mark_bounds(&mut self.tracker, old_bounds);
                    mark_bounds(&mut self.tracker, current.1);
                }
                None => mark_bounds(&mut self.tracker, current.1),
            }
        }

        let tracker = &mut self.tracker;
        self.versions.retain(|id, (_, bounds)| {
            let keep = seen.contains(id);
            if !keep {
                mark_bounds(tracker, *bounds);
            }
            keep
        });
    }

    fn render_emergency(
        &mut self,
        target: &mut B::Surface,
        renderables: &[&dyn Renderable<B::Surface>],
    ) -> RenderResult<RenderReport> {
        let mut report = RenderReport::new(RenderStrategy::Emergency);
        let outcome = self
            .culler
            .cull(renderables, &self.viewport, self.config.culling_margin);

        let (essential, skipped): (Vec<usize>, Vec<usize>) = outcome
            .visible
            .into_iter()
            .partition(|&i| survives_emergency(renderables[i]));

        let frame = LayerFrame {
            renderables,
            culler: &self.culler,
            viewport: self.viewport,
            margin: self.config.culling_margin,
            ctx: DrawContext::reduced(self.viewport),
        };
        target.clear();
        let (drawn, failed) =
            self.layers
                .draw_stacked(target, &frame, &essential, None, &self.config.routes, &mut self.pool)?;

        // The whole target was redrawn.
        self.tracker.clear();

        report.objects_drawn = drawn;
        report.draw_failures = failed;
        report.objects_culled = outcome.culled;
        report.objects_skipped = skipped.len();
        Ok(report)
    }

    fn render_differential(
        &mut self,
        target: &mut B::Surface,
        renderables: &[&dyn Renderable<B::Surface>],
    ) -> RenderResult<RenderReport> {
        let mut report = RenderReport::new(RenderStrategy::Differential);
        let regions: Vec<Rectangle> = self
            .tracker
            .merged_regions()
            .into_iter()
            .map(|region| self.tracker.clip_to_screen(region))
            .filter(|region| !region.is_empty())
            .collect();

        let frame = LayerFrame {
            renderables,
            culler: &self.culler,
            viewport: self.viewport,
            margin: self.config.culling_margin,
            ctx: DrawContext::full(self.viewport),
        };
        let mut touched = vec![false; renderables.len()];
        let mut covered = 0.0;

        for region in &regions {
            let outcome = self
                .culler
                .cull_subset(renderables, 0..renderables.len(), region);
            for &index in &outcome.visible {
                touched[index] = true;
            }

            target.push_clip_rect(*region)?;
            let drawn = target.clear_rect(*region).and_then(|()| {
                self.layers.draw_stacked(
                    target,
                    &frame,
                    &outcome.visible,
                    Some(*region),
                    &self.config.routes,
                    &mut self.pool,
                )
            });
            target.pop_clip_rect()?;
            let (drawn, failed) = drawn?;

            report.objects_drawn += drawn;
            report.draw_failures += failed;
            covered += region.area();
        }

        if self.config.debug_regions {
            for region in &regions {
                target.stroke_rect(*region, DEBUG_REGION_COLOR, DEBUG_REGION_WIDTH)?;
            }
        }

        self.tracker.clear();

        report.regions_updated = regions.len();
        report.objects_culled = touched.iter().filter(|&&t| !t).count();

        let viewport_area = self.viewport.bounds().area();
        self.monitor.set_dirty_region_count(regions.len());
        self.monitor.metrics_mut().pixels_saved = if viewport_area > 0.0 {
            (1.0 - covered / viewport_area).clamp(0.0, 1.0)
        } else {
            0.0
        };

        Ok(report)
    }

    fn render_layered(
        &mut self,
        target: &mut B::Surface,
        renderables: &[&dyn Renderable<B::Surface>],
    ) -> RenderResult<RenderReport> {
        let mut report = RenderReport::new(RenderStrategy::Layered);

        self.layers.assign(renderables, &self.config.routes);
        let frame = LayerFrame {
            renderables,
            culler: &self.culler,
            viewport: self.viewport,
            margin: self.config.culling_margin,
            ctx: DrawContext::full(self.viewport),
        };

        target.clear();
        let outcome = self.layers.render_all(target, &frame, &mut self.pool)?;

        report.objects_drawn = outcome.drawn;
        report.objects_culled = outcome.culled;
        report.draw_failures = outcome.failures;
        report.layers_rendered = outcome.layers_rendered;
        report.layers_cached = outcome.layers_cached;
        Ok(report)
    }

    fn render_direct(
        &mut self,
        target: &mut B::Surface,
        renderables: &[&dyn Renderable<B::Surface>],
    ) -> RenderResult<RenderReport> {
        let mut report = RenderReport::new(RenderStrategy::Direct);
        let outcome = self
            .culler
            .cull(renderables, &self.viewport, self.config.culling_margin);

        let frame = LayerFrame {
            renderables,
            culler: &self.culler,
            viewport: self.viewport,
            margin: self.config.culling_margin,
            ctx: DrawContext::full(self.viewport),
        };
        target.clear();
        let (drawn, failed) = self.layers.draw_stacked(
            target,
            &frame,
            &outcome.visible,
            None,
            &self.config.routes,
            &mut self.pool,
        )?;

        report.objects_drawn = drawn;
        report.draw_failures = failed;
        report.objects_culled = outcome.culled;
        Ok(report)
    }

    /// Invalidate an area for the next frame.
    pub fn add_dirty_region(&mut self, rect: Rectangle) {
        self.tracker.add_region(rect);
    }

    /// Redraw the whole viewport on the next frame.
    pub fn mark_full_redraw(&mut self) {
        self.tracker.mark_full_redraw();
    }

    pub fn dirty_tracker(&self) -> &DirtyRectTracker {
        &self.tracker
    }

    /// Borrow a pooled surface, e.g. for pre-rendering sprites.
    ///
    /// The surface keeps whatever was drawn on it last time.
    pub fn offscreen_surface(&mut self, width: u32, height: u32, id: Option<&str>) -> RenderResult<&mut B::Surface> {
        self.pool.get(width, height, id)
    }

    pub fn performance_statistics(&self) -> PerformanceMetrics {
        self.monitor.metrics()
    }

    pub fn monitor(&self) -> &PerformanceMonitor {
        &self.monitor
    }

    pub fn degradation_state(&self) -> DegradationState {
        self.monitor.state()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.get_stats()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn is_rendering(&self) -> bool {
        self.state == PipelineState::Rendering
    }

    /// Apply a partial update. Nothing changes if the result is invalid.
    pub fn update_config(&mut self, update: ConfigUpdate) -> RenderResult<()> {
        let config = update.apply_to(&self.config);
        config.validate()?;

        self.tracker.set_max_regions(config.max_dirty_regions);
        self.tracker.set_merge_threshold(config.merge_threshold);
        self.culler.set_occlusion_enabled(config.occlusion_culling);
        self.pool.set_capacity(config.surface_cache_size);
        self.monitor.set_thresholds(MonitorThresholds::from(&config));
        if config.layers != self.config.layers {
            self.layers.sync(&config.layers);
        }
        if config.routes != self.config.routes {
            self.layers.invalidate_all();
        }
        if !config.track_versions {
            self.versions.clear();
        }

        self.config = config;
        log::info!(target: "adaptive_render", "pipeline configuration updated");
        Ok(())
    }

    pub fn occlusion(&self) -> &OcclusionMap {
        self.culler.occlusion()
    }

    pub fn occlusion_mut(&mut self) -> &mut OcclusionMap {
        self.culler.occlusion_mut()
    }

    pub fn layers(&self) -> &LayerRegistry<B::Surface> {
        &self.layers
    }

    /// Add a layer or update an existing one.
    pub fn register_layer(&mut self, spec: LayerSpec) {
        self.layers.register(&spec);
        match self.config.layers.iter_mut().find(|l| l.name == spec.name) {
            Some(existing) => *existing = spec,
            None => self.config.layers.push(spec),
        }
    }

    pub fn remove_layer(&mut self, name: &str) -> bool {
        self.config.layers.retain(|l| l.name != name);
        self.layers.remove(name)
    }

    pub fn mark_layer_dirty(&mut self, name: &str) -> bool {
        self.layers.mark_dirty(name)
    }

    pub fn set_layer_visible(&mut self, name: &str, visible: bool) -> bool {
        self.layers.set_visible(name, visible)
    }

    /// Release every pooled and layer surface.
    pub fn clear_cache(&mut self) {
        self.pool.clear();
        self.layers.release_surfaces();
        log::info!(target: "adaptive_render", "surface caches cleared");
    }

    /// Release all surfaces and layer state.
    pub fn destroy(mut self) {
        self.clear_cache();
        self.versions.clear();
        self.culler.occlusion_mut().clear();
        log::info!(target: "adaptive_render", "rendering pipeline destroyed");
    }
}

fn mark_bounds(tracker: &mut DirtyRectTracker, bounds: Option<Rectangle>) {
    match bounds {
        Some(bounds) => tracker.add_region(bounds),
        // Unknown extent: anything may have changed.
        None => tracker.mark_full_redraw(),
    }
}

/// Cloneable handle for hosts that pass the pipeline around.
pub struct SharedPipeline<B: SurfaceBackend> {
    inner: Arc<Mutex<RenderingPipeline<B>>>,
}

impl<B: SurfaceBackend> Clone for SharedPipeline<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: SurfaceBackend> SharedPipeline<B> {
    pub fn new(pipeline: RenderingPipeline<B>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(pipeline)),
        }
    }

    /// Lock the pipeline, blocking until it is free.
    pub fn lock(&self) -> MutexGuard<'_, RenderingPipeline<B>> {
        self.inner.lock()
    }

    /// Render unless another frame is in flight, in which case
    /// [`RenderError::Busy`] is returned immediately.
    pub fn try_render_frame(
        &self,
        target: &mut B::Surface,
        renderables: &[&dyn Renderable<B::Surface>],
        viewport: Viewport,
        options: &FrameOptions,
    ) -> RenderResult<RenderReport> {
        let mut pipeline = self.inner.try_lock().ok_or(RenderError::Busy)?;
        pipeline.render_frame(target, renderables, viewport, options)
    }

    pub fn add_dirty_region(&self, rect: Rectangle) {
        self.inner.lock().add_dirty_region(rect);
    }

    pub fn performance_statistics(&self) -> PerformanceMetrics {
        self.inner.lock().performance_statistics()
    }
}

// ==================== Tests ====================
