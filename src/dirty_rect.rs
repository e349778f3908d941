use crate::types::Rectangle;

/// 默认最大脏区域数量，超过后回退到全屏重绘
pub const DEFAULT_MAX_REGIONS: usize = 20;
/// 默认合并阈值（重叠比例）
pub const DEFAULT_MERGE_THRESHOLD: f32 = 0.3;

/// 脏矩形追踪器
///
/// 收集自上一帧以来发生变化的区域。区域在调用
/// [`merged_regions`](Self::merged_regions) 之前保持未合并状态；
/// 追踪数量超过 `max_regions` 时整个屏幕视为脏区域。
#[derive(Debug)]
pub struct DirtyRectTracker {
    dirty_regions: Vec<Rectangle>,
    full_redraw: bool,
    /// 屏幕区域，全屏重绘和 `clip_to_screen` 使用
    screen: Rectangle,
    max_regions: usize,
    merge_threshold: f32,
}

impl Default for DirtyRectTracker {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

impl DirtyRectTracker {
    pub fn new(screen_width: f32, screen_height: f32) -> Self {
        Self {
            dirty_regions: Vec::new(),
            full_redraw: false,
            screen: Rectangle::new(0.0, 0.0, screen_width, screen_height),
            max_regions: DEFAULT_MAX_REGIONS,
            merge_threshold: DEFAULT_MERGE_THRESHOLD,
        }
    }

    pub fn with_limits(mut self, max_regions: usize, merge_threshold: f32) -> Self {
        self.max_regions = max_regions;
        self.merge_threshold = merge_threshold;
        self
    }

    pub fn set_screen_size(&mut self, width: f32, height: f32) {
        self.screen.width = width;
        self.screen.height = height;
    }

    /// 设置屏幕区域（当前视口边界）
    pub fn set_screen_bounds(&mut self, bounds: Rectangle) {
        self.screen = bounds;
    }

    pub fn screen_bounds(&self) -> Rectangle {
        self.screen
    }

    pub fn set_max_regions(&mut self, max_regions: usize) {
        self.max_regions = max_regions;
    }

    pub fn set_merge_threshold(&mut self, merge_threshold: f32) {
        self.merge_threshold = merge_threshold;
    }

    pub fn merge_threshold(&self) -> f32 {
        self.merge_threshold
    }

    /// 添加脏区域
    ///
    /// 超过区域上限时丢弃所有已追踪区域，改为单个全屏区域。
    pub fn add_region(&mut self, rect: Rectangle) {
        if self.full_redraw {
            return;
        }

        if rect.is_empty() {
            log::trace!(target: "adaptive_render", "ignoring empty dirty region {rect:?}");
            return;
        }

        if self.dirty_regions.len() + 1 > self.max_regions {
            log::debug!(
                target: "adaptive_render",
                "dirty region cap {} exceeded, falling back to full redraw",
                self.max_regions
            );
            self.mark_full_redraw();
            return;
        }

        self.dirty_regions.push(rect);
    }

    pub fn mark_full_redraw(&mut self) {
        self.full_redraw = true;
        self.dirty_regions.clear();
    }

    pub fn needs_full_redraw(&self) -> bool {
        self.full_redraw
    }

    /// 未合并的脏区域，全屏重绘时只返回屏幕区域
    pub fn regions(&self) -> Vec<Rectangle> {
        if self.full_redraw {
            return vec![self.screen];
        }
        self.dirty_regions.clone()
    }

    /// 已追踪的区域数量
    pub fn len(&self) -> usize {
        if self.full_redraw {
            1
        } else {
            self.dirty_regions.len()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 按配置阈值合并一遍后的区域
    pub fn merged_regions(&self) -> Vec<Rectangle> {
        merge_regions(&self.regions(), self.merge_threshold)
    }

    /// 所有脏区域的外接矩形
    pub fn combined_dirty_rect(&self) -> Option<Rectangle> {
        if self.full_redraw {
            return Some(self.screen);
        }

        let (first, rest) = self.dirty_regions.split_first()?;
        Some(rest.iter().fold(*first, |acc, rect| acc.union(rect)))
    }

    pub fn has_dirty_regions(&self) -> bool {
        self.full_redraw || !self.dirty_regions.is_empty()
    }

    /// 清除所有脏区域，差异渲染完成后调用
    pub fn clear(&mut self) {
        self.dirty_regions.clear();
        self.full_redraw = false;
    }

    /// 将矩形裁剪到屏幕区域内
    pub fn clip_to_screen(&self, rect: Rectangle) -> Rectangle {
        let left = rect.x.max(self.screen.x);
        let top = rect.y.max(self.screen.y);
        let right = rect.right().min(self.screen.right());
        let bottom = rect.bottom().min(self.screen.bottom());

        Rectangle {
            x: left,
            y: top,
            width: (right - left).max(0.0),
            height: (bottom - top).max(0.0),
        }
    }

    pub fn dirty_type(&self) -> DirtyType {
        if self.full_redraw {
            DirtyType::Full
        } else if !self.dirty_regions.is_empty() {
            DirtyType::Partial
        } else {
            DirtyType::None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyType {
    Full,
    Partial,
    None,
}

/// 两个区域的重叠是否足以合并重绘
///
/// 比例为重叠面积除以两者面积之和，最大为 0.5（两个相同矩形）。
pub fn should_merge(a: &Rectangle, b: &Rectangle, threshold: f32) -> bool {
    let combined = a.area() + b.area();
    if combined <= 0.0 {
        return false;
    }
    let overlap = a.intersection(b).map_or(0.0, |r| r.area());
    overlap / combined >= threshold
}

/// 单遍两两合并
///
/// 每个区域并入第一个重叠足够的累积区域，否则成为新的累积区域。
/// 这是矩形并集的近似：累积区域在本遍中变大后不会再与之前的累积区域比较。
pub fn merge_regions(regions: &[Rectangle], threshold: f32) -> Vec<Rectangle> {
    let mut merged: Vec<Rectangle> = Vec::with_capacity(regions.len());

    for region in regions {
        match merged
            .iter_mut()
            .find(|acc| should_merge(acc, region, threshold))
        {
            Some(acc) => *acc = acc.union(region),
            None => merged.push(*region),
        }
    }

    merged
}
