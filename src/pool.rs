//! 离屏表面池
//!
//! 可复用光栅表面的有界缓存，键为调用方提供的 id 或 `"{width}x{height}"`。
//! 按插入顺序 FIFO 淘汰，读取不会刷新条目位置。
//!
//! # 示例
//! ```
//! use adaptive_render::pool::SurfacePool;
//! use adaptive_render::skia::SkiaBackend;
//! use adaptive_render::surface::Surface;
//!
//! let mut pool = SurfacePool::new(SkiaBackend::new(), 4);
//! let sprite = pool.get(64, 64, Some("player")).unwrap();
//! assert_eq!(sprite.width(), 64);
//! ```

use std::collections::{HashMap, VecDeque};

use crate::error::{RenderError, RenderResult};
use crate::surface::{Surface, SurfaceBackend};

pub const DEFAULT_CAPACITY: usize = 10;

/// FIFO 淘汰的表面池
///
/// 表面按上次留下的内容返回，调用方在复用前自行清除。
pub struct SurfacePool<B: SurfaceBackend> {
    backend: B,
    entries: HashMap<String, B::Surface>,
    /// 按插入顺序排列的键，最旧的在前
    order: VecDeque<String>,
    capacity: usize,
    /// 离屏分配曾失败且已记录警告
    fallback_warned: bool,
    hit_count: u64,
    miss_count: u64,
    eviction_count: u64,
    fallback_count: u64,
}

impl<B: SurfaceBackend> SurfacePool<B> {
    pub fn new(backend: B, capacity: usize) -> Self {
        Self {
            backend,
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            fallback_warned: false,
            hit_count: 0,
            miss_count: 0,
            eviction_count: 0,
            fallback_count: 0,
        }
    }

    /// 未提供 id 时使用的缓存键
    pub fn size_key(width: u32, height: u32) -> String {
        format!("{width}x{height}")
    }

    /// 获取缓存的表面，不存在时分配
    ///
    /// 尺寸不匹配的缓存条目原地重新分配，保留淘汰位置。
    pub fn get(&mut self, width: u32, height: u32, id: Option<&str>) -> RenderResult<&mut B::Surface> {
        let key = id.map_or_else(|| Self::size_key(width, height), str::to_owned);
        let cached_size = self.entries.get(&key).map(|s| (s.width(), s.height()));

        match cached_size {
            Some(size) if size == (width, height) => {
                self.hit_count += 1;
            }
            Some(_) => {
                self.miss_count += 1;
                let surface = self.allocate(width, height)?;
                self.entries.insert(key.clone(), surface);
            }
            None => {
                self.miss_count += 1;
                let surface = self.allocate(width, height)?;
                while self.entries.len() >= self.capacity {
                    self.evict_oldest();
                }
                self.order.push_back(key.clone());
                self.entries.insert(key.clone(), surface);
            }
        }

        self.entries
            .get_mut(&key)
            .ok_or_else(|| RenderError::Surface(format!("surface `{key}` missing from pool")))
    }

    /// 分配不缓存的表面，宿主不支持离屏表面时回退到普通表面
    pub fn allocate(&mut self, width: u32, height: u32) -> RenderResult<B::Surface> {
        if let Some(surface) = self.backend.create_offscreen(width, height) {
            return Ok(surface);
        }

        if !self.fallback_warned {
            self.fallback_warned = true;
            log::warn!(
                target: "adaptive_render",
                "off-screen surfaces unavailable, falling back to regular surface allocation"
            );
        }
        self.fallback_count += 1;
        self.backend.create_fallback(width, height)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// 缓存的键，最旧的在前
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 缩小容量会立即淘汰最旧的条目
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.entries.len() > self.capacity {
            self.evict_oldest();
        }
    }

    /// 清空所有缓存表面
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn get_stats(&self) -> PoolStats {
        let lookups = self.hit_count + self.miss_count;
        PoolStats {
            entries: self.entries.len(),
            capacity: self.capacity,
            hit_count: self.hit_count,
            miss_count: self.miss_count,
            eviction_count: self.eviction_count,
            fallback_count: self.fallback_count,
            hit_rate: if lookups > 0 {
                self.hit_count as f64 / lookups as f64
            } else {
                0.0
            },
        }
    }

    pub fn reset_stats(&mut self) {
        self.hit_count = 0;
        self.miss_count = 0;
        self.eviction_count = 0;
        self.fallback_count = 0;
    }

    fn evict_oldest(&mut self) {
        if let Some(key) = self.order.pop_front() {
            self.entries.remove(&key);
            self.eviction_count += 1;
            log::debug!(target: "adaptive_render", "surface pool evicted `{key}`");
        }
    }
}

/// 表面池统计
#[derive(Debug, Clone, PartialEq)]
pub struct PoolStats {
    pub entries: usize,
    pub capacity: usize,
    pub hit_count: u64,
    pub miss_count: u64,
    pub eviction_count: u64,
    /// 通过回退路径完成的分配次数
    pub fallback_count: u64,
    /// 0.0 - 1.0
    pub hit_rate: f64,
}

impl std::fmt::Display for PoolStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "SurfacePool: entries={}/{}, hits={}, misses={}, evictions={}, fallbacks={}, rate={:.1}%",
            self.entries,
            self.capacity,
            self.hit_count,
            self.miss_count,
            self.eviction_count,
            self.fallback_count,
            self.hit_rate * 100.0
        )
    }
}

// ==================== Tests ====================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::testing::RecordingBackend;

    fn pool(capacity: usize) -> SurfacePool<RecordingBackend> {
        SurfacePool::new(RecordingBackend::new(), capacity)
    }

    #[test]
    fn test_size_key() {
        assert_eq!(SurfacePool::<RecordingBackend>::size_key(64, 32), "64x32");
    }

    #[test]
    fn test_hit_returns_same_surface() {
        let mut pool = pool(4);
        let first = pool.get(10, 10, None).unwrap().serial;
        let second = pool.get(10, 10, None).unwrap().serial;
        assert_eq!(first, second);

        let stats = pool.get_stats();
        assert_eq!(stats.hit_count, 1);
        assert_eq!(stats.miss_count, 1);
    }

    #[test]
    fn test_id_key_overrides_size() {
        let mut pool = pool(4);
        let a = pool.get(10, 10, Some("a")).unwrap().serial;
        let b = pool.get(10, 10, Some("b")).unwrap().serial;
        assert_ne!(a, b);
        assert!(pool.contains("a"));
        assert!(!pool.contains("10x10"));
    }

    #[test]
    fn test_fifo_eviction_removes_only_first_inserted() {
        let mut pool = pool(3);
        pool.get(1, 1, Some("first")).unwrap();
        pool.get(1, 1, Some("second")).unwrap();
        pool.get(1, 1, Some("third")).unwrap();

        // 读取不会刷新插入顺序
        pool.get(1, 1, Some("first")).unwrap();
        pool.get(1, 1, Some("fourth")).unwrap();

        assert_eq!(pool.keys().collect::<Vec<_>>(), vec!["second", "third", "fourth"]);
        assert_eq!(pool.get_stats().eviction_count, 1);
    }

    #[test]
    fn test_resized_entry_is_reallocated_in_place() {
        let mut pool = pool(2);
        let old = pool.get(10, 10, Some("sprite")).unwrap().serial;
        let new = pool.get(20, 20, Some("sprite")).unwrap();
        assert_ne!(old, new.serial);
        assert_eq!((new.width, new.height), (20, 20));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_fallback_when_offscreen_unsupported() {
        let mut backend = RecordingBackend::new();
        backend.offscreen_supported = false;
        let mut pool = SurfacePool::new(backend, 2);

        pool.get(5, 5, None).unwrap();
        pool.get(6, 6, None).unwrap();

        let stats = pool.get_stats();
        assert_eq!(stats.fallback_count, 2);
        assert!(pool.fallback_warned);
    }

    #[test]
    fn test_shrinking_capacity_evicts_oldest() {
        let mut pool = pool(4);
        for id in ["a", "b", "c", "d"] {
            pool.get(1, 1, Some(id)).unwrap();
        }
        pool.set_capacity(2);
        assert_eq!(pool.keys().collect::<Vec<_>>(), vec!["c", "d"]);
    }

    #[test]
    fn test_clear() {
        let mut pool = pool(4);
        pool.get(1, 1, None).unwrap();
        pool.clear();
        assert!(pool.is_empty());
        assert_eq!(pool.keys().count(), 0);
    }

    #[test]
    fn test_stats_display() {
        let mut pool = pool(4);
        pool.get(1, 1, None).unwrap();
        pool.get(1, 1, None).unwrap();
        let text = pool.get_stats().to_string();
        assert!(text.contains("hits=1"));
        assert!(text.contains("rate=50.0%"));
    }
}
