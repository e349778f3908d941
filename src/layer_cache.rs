use std::time::Instant;

use crate::config::{LayerRoutes, LayerSpec};
use crate::culling::Culler;
use crate::error::{RenderError, RenderResult};
use crate::pool::SurfacePool;
use crate::renderable::{DrawContext, Renderable, draw_each};
use crate::surface::{Surface, SurfaceBackend};
use crate::types::Rectangle;
use crate::viewport::Viewport;

/// 图层缓存状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// 缓存有效
    Valid,
    /// 缓存无效，需要重绘
    Invalid,
    /// 尚未分配表面
    Missing,
}

/// 命名图层：z 顺序、不透明度以及按需分配的缓存表面
#[derive(Debug)]
pub struct Layer<S> {
    name: String,
    z_index: i32,
    opacity: f32,
    visible: bool,
    surface: Option<S>,
    dirty: bool,
    /// 当前帧可渲染对象切片中的索引
    renderables: Vec<usize>,
    last_update: Option<Instant>,
}

impl<S> Layer<S> {
    fn from_spec(spec: &LayerSpec) -> Self {
        Self {
            name: spec.name.clone(),
            z_index: spec.z_index,
            opacity: spec.opacity.clamp(0.0, 1.0),
            visible: true,
            surface: None,
            dirty: true,
            renderables: Vec::new(),
            last_update: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn z_index(&self) -> i32 {
        self.z_index
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn has_surface(&self) -> bool {
        self.surface.is_some()
    }

    pub fn surface(&self) -> Option<&S> {
        self.surface.as_ref()
    }

    pub fn renderables(&self) -> &[usize] {
        &self.renderables
    }

    pub fn last_update(&self) -> Option<Instant> {
        self.last_update
    }

    pub fn state(&self) -> CacheState {
        match (&self.surface, self.dirty) {
            (Some(_), false) => CacheState::Valid,
            (Some(_), true) => CacheState::Invalid,
            (None, _) => CacheState::Missing,
        }
    }
}

impl<S: Surface> Layer<S> {
    /// 获取指定尺寸的图层表面，尺寸不符时从池中重新分配
    fn surface_for<B>(&mut self, width: u32, height: u32, pool: &mut SurfacePool<B>) -> RenderResult<&mut S>
    where
        B: SurfaceBackend<Surface = S>,
    {
        if self
            .surface
            .as_ref()
            .is_none_or(|s| s.width() != width || s.height() != height)
        {
            self.surface = Some(pool.allocate(width, height)?);
        }
        self.surface
            .as_mut()
            .ok_or(RenderError::Allocation { width, height })
    }
}

/// 每帧所有图层共享的输入
pub struct LayerFrame<'a, 'r, S> {
    pub renderables: &'a [&'r dyn Renderable<S>],
    pub culler: &'a Culler,
    pub viewport: Viewport,
    pub margin: f32,
    pub ctx: DrawContext,
}

/// 单个图层本帧的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerOutcome {
    /// 直接合成缓存表面时为 `false`
    pub redrawn: bool,
    pub drawn: usize,
    pub culled: usize,
    pub failures: usize,
}

/// 整个分层合成的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompositeOutcome {
    pub layers_rendered: usize,
    pub layers_cached: usize,
    pub drawn: usize,
    pub culled: usize,
    pub failures: usize,
}

/// 图层注册表与合成器
///
/// 图层按 z-index 升序保存（相同 z-index 保持注册顺序），
/// 合成时始终按此顺序进行。
#[derive(Debug)]
pub struct LayerRegistry<S> {
    layers: Vec<Layer<S>>,
    /// 所有图层表面的尺寸，跟随目标表面
    size: (u32, u32),
}

impl<S> Default for LayerRegistry<S> {
    fn default() -> Self {
        Self {
            layers: Vec::new(),
            size: (0, 0),
        }
    }
}

impl<S: Surface> LayerRegistry<S> {
    pub fn new(specs: &[LayerSpec]) -> Self {
        let mut registry = Self::default();
        for spec in specs {
            registry.register(spec);
        }
        registry
    }

    /// 添加图层，已存在时更新 z-index 和不透明度
    pub fn register(&mut self, spec: &LayerSpec) {
        match self.layers.iter_mut().find(|l| l.name == spec.name) {
            Some(layer) => {
                layer.z_index = spec.z_index;
                layer.opacity = spec.opacity.clamp(0.0, 1.0);
                layer.dirty = true;
            }
            None => self.layers.push(Layer::from_spec(spec)),
        }
        self.layers.sort_by_key(|l| l.z_index);
    }

    /// 使注册表与 `specs` 完全一致，保留下来的图层保留缓存表面
    pub fn sync(&mut self, specs: &[LayerSpec]) {
        self.layers
            .retain(|l| specs.iter().any(|spec| spec.name == l.name));
        for spec in specs {
            let unchanged = self.get(&spec.name).is_some_and(|l| {
                l.z_index == spec.z_index && l.opacity == spec.opacity.clamp(0.0, 1.0)
            });
            if !unchanged {
                self.register(spec);
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.layers.len();
        self.layers.retain(|l| l.name != name);
        self.layers.len() != before
    }

    pub fn get(&self, name: &str) -> Option<&Layer<S>> {
        self.layers.iter().find(|l| l.name == name)
    }

    fn get_mut(&mut self, name: &str) -> Option<&mut Layer<S>> {
        self.layers.iter_mut().find(|l| l.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// 按合成顺序返回图层名称
    pub fn composite_order(&self) -> Vec<&str> {
        self.layers.iter().map(|l| l.name.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Layer<S>> {
        self.layers.iter()
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    /// 设置图层尺寸，尺寸变化时所有缓存失效
    pub fn set_size(&mut self, width: u32, height: u32) {
        if self.size != (width, height) {
            self.size = (width, height);
            self.invalidate_all();
        }
    }

    pub fn mark_dirty(&mut self, name: &str) -> bool {
        match self.get_mut(name) {
            Some(layer) => {
                layer.dirty = true;
                true
            }
            None => false,
        }
    }

    pub fn invalidate_all(&mut self) {
        for layer in &mut self.layers {
            layer.dirty = true;
        }
    }

    pub fn set_visible(&mut self, name: &str, visible: bool) -> bool {
        match self.get_mut(name) {
            Some(layer) => {
                layer.visible = visible;
                true
            }
            None => false,
        }
    }

    /// 释放所有缓存表面并标记为脏
    pub fn release_surfaces(&mut self) {
        for layer in &mut self.layers {
            layer.surface = None;
            layer.dirty = true;
            layer.renderables.clear();
        }
    }

    /// 可渲染对象所属的图层
    ///
    /// 显式指定但不存在的图层名称，以及指向缺失图层的路由，
    /// 都回退到路由表的回退图层。
    pub fn resolve<'a>(&'a self, renderable: &'a dyn Renderable<S>, routes: &'a LayerRoutes) -> &'a str {
        let requested = match renderable.layer() {
            Some(name) => name,
            None => routes.route(renderable.kind()),
        };
        if self.contains(requested) {
            requested
        } else {
            log::debug!(
                target: "adaptive_render",
                "renderable {} references unknown layer `{requested}`, using `{}`",
                renderable.id(),
                routes.fallback
            );
            &routes.fallback
        }
    }

    /// 可渲染对象所属图层在合成顺序中的位置，回退图层缺失时为 `None`
    fn position_of(&self, renderable: &dyn Renderable<S>, routes: &LayerRoutes) -> Option<usize> {
        let name = self.resolve(renderable, routes);
        self.layers.iter().position(|l| l.name == name)
    }

    /// 为本帧重建每个图层的可渲染对象列表
    ///
    /// 分配到对象的图层标记为脏，上一帧有内容而本帧为空的图层也标记为脏。
    /// 返回无处可去的可渲染对象数量。
    pub fn assign(&mut self, renderables: &[&dyn Renderable<S>], routes: &LayerRoutes) -> usize {
        let mut emptied: Vec<bool> = self
            .layers
            .iter_mut()
            .map(|layer| {
                let had_content = !layer.renderables.is_empty();
                layer.renderables.clear();
                had_content
            })
            .collect();

        let mut unassigned = 0;
        for (index, renderable) in renderables.iter().enumerate() {
            match self.position_of(*renderable, routes) {
                Some(position) => {
                    let layer = &mut self.layers[position];
                    layer.renderables.push(index);
                    layer.dirty = true;
                    emptied[position] = false;
                }
                None => unassigned += 1,
            }
        }

        for (layer, emptied) in self.layers.iter_mut().zip(emptied) {
            if emptied {
                layer.dirty = true;
            }
        }

        if unassigned > 0 {
            log::warn!(
                target: "adaptive_render",
                "{unassigned} renderables dropped: fallback layer `{}` is not registered",
                routes.fallback
            );
        }
        unassigned
    }

    /// 按需重绘 `index` 处的图层并合成到 `target`
    pub fn render_layer<B>(
        &mut self,
        index: usize,
        target: &mut S,
        frame: &LayerFrame<'_, '_, S>,
        pool: &mut SurfacePool<B>,
    ) -> RenderResult<LayerOutcome>
    where
        B: SurfaceBackend<Surface = S>,
    {
        let (width, height) = self.size;
        let layer = self
            .layers
            .get_mut(index)
            .ok_or_else(|| RenderError::Surface(format!("no layer at index {index}")))?;

        if !layer.dirty
            && let Some(cached) = layer.surface.as_ref()
        {
            target.composite(cached, layer.opacity)?;
            return Ok(LayerOutcome::default());
        }

        let area = frame.viewport.culling_bounds(frame.margin);
        let culled = frame
            .culler
            .cull_subset(frame.renderables, layer.renderables.iter().copied(), &area);

        let opacity = layer.opacity;
        let surface = layer.surface_for(width, height, pool)?;
        surface.clear();
        let (drawn, failures) = draw_each(surface, frame.renderables, &culled.visible, &frame.ctx);
        target.composite(surface, opacity)?;

        layer.dirty = false;
        layer.last_update = Some(Instant::now());

        Ok(LayerOutcome {
            redrawn: true,
            drawn,
            culled: culled.culled,
            failures,
        })
    }

    /// 按 z 顺序升序渲染所有可见图层
    pub fn render_all<B>(
        &mut self,
        target: &mut S,
        frame: &LayerFrame<'_, '_, S>,
        pool: &mut SurfacePool<B>,
    ) -> RenderResult<CompositeOutcome>
    where
        B: SurfaceBackend<Surface = S>,
    {
        let mut total = CompositeOutcome::default();

        for index in 0..self.layers.len() {
            if !self.layers[index].visible {
                continue;
            }
            let outcome = self.render_layer(index, target, frame, pool)?;
            if outcome.redrawn {
                total.layers_rendered += 1;
            } else {
                total.layers_cached += 1;
            }
            total.drawn += outcome.drawn;
            total.culled += outcome.culled;
            total.failures += outcome.failures;
        }

        Ok(total)
    }

    /// 不经过图层缓存，把 `indices` 按图层顺序直接绘制到 `target`
    ///
    /// 隐藏图层中的对象不绘制，找不到图层的对象被丢弃。不透明图层直接
    /// 绘制到 `target`；半透明图层先在自己的表面上重绘 `clip` 范围
    /// （`None` 表示整个表面），再按不透明度合成，该图层随后标记为脏。
    /// 调用方负责 `target` 上的裁剪。返回 (成功绘制数, 失败数)。
    pub fn draw_stacked<B>(
        &mut self,
        target: &mut S,
        frame: &LayerFrame<'_, '_, S>,
        indices: &[usize],
        clip: Option<Rectangle>,
        routes: &LayerRoutes,
        pool: &mut SurfacePool<B>,
    ) -> RenderResult<(usize, usize)>
    where
        B: SurfaceBackend<Surface = S>,
    {
        let slots: Vec<Option<usize>> = indices
            .iter()
            .map(|&i| {
                frame
                    .renderables
                    .get(i)
                    .and_then(|renderable| self.position_of(*renderable, routes))
            })
            .collect();

        let (width, height) = self.size;
        let mut drawn = 0;
        let mut failed = 0;

        for (position, layer) in self.layers.iter_mut().enumerate() {
            if !layer.visible {
                continue;
            }
            let members: Vec<usize> = indices
                .iter()
                .zip(&slots)
                .filter(|(_, slot)| **slot == Some(position))
                .map(|(&i, _)| i)
                .collect();
            if members.is_empty() {
                continue;
            }

            let (d, f) = if layer.opacity >= 1.0 {
                draw_each(target, frame.renderables, &members, &frame.ctx)
            } else {
                let opacity = layer.opacity;
                let surface = layer.surface_for(width, height, pool)?;
                let counts = match clip {
                    Some(clip) => {
                        surface.push_clip_rect(clip)?;
                        let counts = surface
                            .clear_rect(clip)
                            .map(|()| draw_each(surface, frame.renderables, &members, &frame.ctx));
                        surface.pop_clip_rect()?;
                        counts?
                    }
                    None => {
                        surface.clear();
                        draw_each(surface, frame.renderables, &members, &frame.ctx)
                    }
                };
                target.composite(surface, opacity)?;
                // 表面只有部分内容是最新的
                layer.dirty = true;
                counts
            };
            drawn += d;
            failed += f;
        }

        Ok((drawn, failed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FALLBACK_LAYER, default_layers};
    use crate::renderable::{Quality, RenderableKind};
    use crate::surface::testing::{Op, Marker, RecordingBackend, RecordingSurface};

    fn as_dyn(markers: &[Marker]) -> Vec<&dyn Renderable<RecordingSurface>> {
        markers.iter().map(|p| p as &dyn Renderable<RecordingSurface>).collect()
    }

    fn frame<'a, 'r>(
        renderables: &'a [&'r dyn Renderable<RecordingSurface>],
        culler: &'a Culler,
    ) -> LayerFrame<'a, 'r, RecordingSurface> {
        let viewport = Viewport::new(0.0, 0.0, 100.0, 100.0);
        LayerFrame {
            renderables,
            culler,
            viewport,
            margin: 0.0,
            ctx: DrawContext::full(viewport),
        }
    }

    #[test]
    fn test_composite_order_follows_z_index() {
        let registry: LayerRegistry<RecordingSurface> = LayerRegistry::new(&[
            LayerSpec::new("top", 2),
            LayerSpec::new("bottom", 0),
            LayerSpec::new("middle", 1),
        ]);
        assert_eq!(registry.composite_order(), vec!["bottom", "middle", "top"]);
    }

    #[test]
    fn test_register_existing_moves_layer() {
        let mut registry: LayerRegistry<RecordingSurface> = LayerRegistry::new(&default_layers());
        registry.register(&LayerSpec::new("background", 10));
        assert_eq!(registry.composite_order().last(), Some(&"background"));
        assert_eq!(registry.len(), 5);
    }

    #[test]
    fn test_assign_routes_by_layer_then_kind() {
        let markers = vec![
            Marker::at(1, 0.0, 0.0, 10.0, 10.0).kind(RenderableKind::Background),
            Marker::at(2, 0.0, 0.0, 10.0, 10.0).kind(RenderableKind::Control),
            Marker::at(3, 0.0, 0.0, 10.0, 10.0).kind(RenderableKind::Background).layer("overlay"),
            Marker::at(4, 0.0, 0.0, 10.0, 10.0).layer("nonexistent"),
            Marker::at(5, 0.0, 0.0, 10.0, 10.0),
        ];
        let renderables = as_dyn(&markers);
        let mut registry: LayerRegistry<RecordingSurface> = LayerRegistry::new(&default_layers());

        let unassigned = registry.assign(&renderables, &LayerRoutes::default());

        assert_eq!(unassigned, 0);
        assert_eq!(registry.get("background").unwrap().renderables(), &[0]);
        assert_eq!(registry.get("ui").unwrap().renderables(), &[1]);
        assert_eq!(registry.get("overlay").unwrap().renderables(), &[2]);
        assert_eq!(registry.get(FALLBACK_LAYER).unwrap().renderables(), &[3, 4]);
    }

    #[test]
    fn test_missing_fallback_layer_drops_renderables() {
        let markers = vec![Marker::at(1, 0.0, 0.0, 1.0, 1.0)];
        let renderables = as_dyn(&markers);
        let mut registry: LayerRegistry<RecordingSurface> =
            LayerRegistry::new(&[LayerSpec::new("background", 0)]);
        assert_eq!(registry.assign(&renderables, &LayerRoutes::default()), 1);
    }

    #[test]
    fn test_clean_layer_is_blitted_without_redraw() {
        let markers = vec![Marker::at(1, 0.0, 0.0, 10.0, 10.0)];
        let renderables = as_dyn(&markers);
        let culler = Culler::new(false);
        let mut pool = SurfacePool::new(RecordingBackend::new(), 4);
        let mut registry: LayerRegistry<RecordingSurface> =
            LayerRegistry::new(&[LayerSpec::new("game", 0).with_opacity(0.5)]);
        registry.set_size(100, 100);
        let mut target = RecordingSurface::new(0, 100, 100);

        registry.assign(&renderables, &LayerRoutes::default());
        let first = registry.render_layer(0, &mut target, &frame(&renderables, &culler), &mut pool).unwrap();
        assert!(first.redrawn);
        assert_eq!(first.drawn, 1);
        assert_eq!(registry.get("game").unwrap().state(), CacheState::Valid);
        assert!(registry.get("game").unwrap().last_update().is_some());

        let second = registry.render_layer(0, &mut target, &frame(&renderables, &culler), &mut pool).unwrap();
        assert!(!second.redrawn);

        let serial = registry.get("game").unwrap().surface().unwrap().serial;
        assert_eq!(target.composited(), vec![serial, serial]);
        assert!(target.ops.iter().all(|op| match op {
            Op::Composite { opacity, .. } => *opacity == 0.5,
            _ => true,
        }));
    }

    #[test]
    fn test_redraw_clears_and_culls() {
        let markers = vec![
            Marker::at(1, 10.0, 10.0, 10.0, 10.0),
            Marker::at(2, 500.0, 500.0, 10.0, 10.0),
        ];
        let renderables = as_dyn(&markers);
        let culler = Culler::new(false);
        let mut pool = SurfacePool::new(RecordingBackend::new(), 4);
        let mut registry: LayerRegistry<RecordingSurface> =
            LayerRegistry::new(&[LayerSpec::new("game", 0)]);
        registry.set_size(100, 100);
        let mut target = RecordingSurface::new(0, 100, 100);

        registry.assign(&renderables, &LayerRoutes::default());
        let outcome = registry.render_layer(0, &mut target, &frame(&renderables, &culler), &mut pool).unwrap();

        assert_eq!(outcome.drawn, 1);
        assert_eq!(outcome.culled, 1);
        let surface = registry.get("game").unwrap().surface().unwrap();
        assert_eq!(surface.ops.first(), Some(&Op::Clear));
        assert_eq!(surface.drawn(), vec![1]);
    }

    #[test]
    fn test_resize_reallocates_surface() {
        let culler = Culler::new(false);
        let mut pool = SurfacePool::new(RecordingBackend::new(), 4);
        let mut registry: LayerRegistry<RecordingSurface> =
            LayerRegistry::new(&[LayerSpec::new("game", 0)]);
        let mut target = RecordingSurface::new(0, 100, 100);
        let renderables: Vec<&dyn Renderable<RecordingSurface>> = Vec::new();

        registry.set_size(100, 100);
        registry.render_layer(0, &mut target, &frame(&renderables, &culler), &mut pool).unwrap();
        registry.set_size(200, 150);
        assert_eq!(registry.get("game").unwrap().state(), CacheState::Invalid);
        registry.render_layer(0, &mut target, &frame(&renderables, &culler), &mut pool).unwrap();

        let surface = registry.get("game").unwrap().surface().unwrap();
        assert_eq!((surface.width, surface.height), (200, 150));
    }

    #[test]
    fn test_emptied_layer_becomes_dirty() {
        let markers = vec![Marker::at(1, 0.0, 0.0, 10.0, 10.0)];
        let culler = Culler::new(false);
        let mut pool = SurfacePool::new(RecordingBackend::new(), 4);
        let mut registry: LayerRegistry<RecordingSurface> =
            LayerRegistry::new(&[LayerSpec::new("game", 0)]);
        registry.set_size(100, 100);
        let mut target = RecordingSurface::new(0, 100, 100);

        let renderables = as_dyn(&markers);
        registry.assign(&renderables, &LayerRoutes::default());
        registry.render_layer(0, &mut target, &frame(&renderables, &culler), &mut pool).unwrap();
        assert!(!registry.get("game").unwrap().is_dirty());

        let nothing: Vec<&dyn Renderable<RecordingSurface>> = Vec::new();
        registry.assign(&nothing, &LayerRoutes::default());
        assert!(registry.get("game").unwrap().is_dirty());
    }

    #[test]
    fn test_render_all_skips_hidden_layers() {
        let markers = vec![
            Marker::at(1, 0.0, 0.0, 10.0, 10.0).kind(RenderableKind::Background),
            Marker::at(2, 0.0, 0.0, 10.0, 10.0).kind(RenderableKind::Debug),
        ];
        let renderables = as_dyn(&markers);
        let culler = Culler::new(false);
        let mut pool = SurfacePool::new(RecordingBackend::new(), 4);
        let mut registry: LayerRegistry<RecordingSurface> = LayerRegistry::new(&default_layers());
        registry.set_size(100, 100);
        registry.set_visible("debug", false);
        let mut target = RecordingSurface::new(0, 100, 100);

        registry.assign(&renderables, &LayerRoutes::default());
        let outcome = registry.render_all(&mut target, &frame(&renderables, &culler), &mut pool).unwrap();

        assert_eq!(outcome.layers_rendered, 4);
        assert_eq!(outcome.drawn, 1);
        assert_eq!(target.composited().len(), 4);
    }

    #[test]
    fn test_sync_keeps_unchanged_surfaces() {
        let culler = Culler::new(false);
        let mut pool = SurfacePool::new(RecordingBackend::new(), 4);
        let mut registry: LayerRegistry<RecordingSurface> = LayerRegistry::new(&default_layers());
        registry.set_size(10, 10);
        let mut target = RecordingSurface::new(0, 10, 10);
        let renderables: Vec<&dyn Renderable<RecordingSurface>> = Vec::new();
        registry.render_all(&mut target, &frame(&renderables, &culler), &mut pool).unwrap();

        let mut specs = default_layers();
        specs.retain(|s| s.name != "debug");
        registry.sync(&specs);

        assert!(!registry.contains("debug"));
        assert_eq!(registry.get("ui").unwrap().state(), CacheState::Valid);
    }

    #[test]
    fn test_draw_stacked_follows_layer_order() {
        let markers = vec![
            Marker::at(1, 0.0, 0.0, 10.0, 10.0),
            Marker::at(2, 0.0, 0.0, 10.0, 10.0).kind(RenderableKind::Background),
            Marker::at(3, 0.0, 0.0, 10.0, 10.0).kind(RenderableKind::Debug),
        ];
        let renderables = as_dyn(&markers);
        let culler = Culler::new(false);
        let mut pool = SurfacePool::new(RecordingBackend::new(), 4);
        let mut registry: LayerRegistry<RecordingSurface> = LayerRegistry::new(&default_layers());
        registry.set_size(100, 100);
        registry.set_visible("debug", false);
        let mut target = RecordingSurface::new(0, 100, 100);

        let counts = registry
            .draw_stacked(
                &mut target,
                &frame(&renderables, &culler),
                &[0, 1, 2],
                None,
                &LayerRoutes::default(),
                &mut pool,
            )
            .unwrap();

        assert_eq!(counts, (2, 0));
        assert_eq!(target.drawn(), vec![2, 1]);
        assert!(target.composited().is_empty());
    }

    #[test]
    fn test_draw_stacked_composites_translucent_layer() {
        let markers = vec![Marker::at(1, 0.0, 0.0, 10.0, 10.0)];
        let renderables = as_dyn(&markers);
        let culler = Culler::new(false);
        let mut pool = SurfacePool::new(RecordingBackend::new(), 4);
        let mut registry: LayerRegistry<RecordingSurface> =
            LayerRegistry::new(&[LayerSpec::new("game", 0).with_opacity(0.5)]);
        registry.set_size(100, 100);
        let mut target = RecordingSurface::new(0, 100, 100);
        let clip = Rectangle::new(0.0, 0.0, 20.0, 20.0);

        registry
            .draw_stacked(
                &mut target,
                &frame(&renderables, &culler),
                &[0],
                Some(clip),
                &LayerRoutes::default(),
                &mut pool,
            )
            .unwrap();

        let layer = registry.get("game").unwrap();
        let surface = layer.surface().unwrap();
        assert_eq!(
            surface.ops,
            vec![
                Op::PushClip(clip),
                Op::ClearRect(clip),
                Op::Draw { id: 1, quality: Quality::Full },
                Op::PopClip,
            ]
        );
        assert_eq!(
            target.ops,
            vec![Op::Composite { source: surface.serial, opacity: 0.5 }]
        );
        assert!(target.drawn().is_empty());
        assert!(layer.is_dirty());
    }
}
