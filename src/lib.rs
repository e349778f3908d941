pub mod config;
pub mod culling;
pub mod dirty_rect;
pub mod error;
pub mod layer_cache;
pub mod monitor;
pub mod pipeline;
pub mod pool;
pub mod renderable;
pub mod skia;
pub mod surface;
pub mod types;
pub mod viewport;

// 重新导出常用类型
pub use config::{ConfigUpdate, LayerRoutes, LayerSpec, PipelineConfig};
pub use culling::{CullOutcome, Culler, OcclusionMap};
pub use dirty_rect::{DirtyRectTracker, DirtyType, merge_regions};
pub use error::{RenderError, RenderResult};
pub use layer_cache::{CacheState, Layer, LayerRegistry};
pub use monitor::{DegradationState, PerformanceMetrics, PerformanceMonitor};
pub use pipeline::{FrameOptions, RenderReport, RenderStrategy, RenderingPipeline, SharedPipeline};
pub use pool::{PoolStats, SurfacePool};
pub use renderable::{DrawContext, Priority, Quality, Renderable, RenderableId, RenderableKind};
pub use skia::{SkiaBackend, SkiaSurface};
pub use surface::{Surface, SurfaceBackend};
pub use types::{Color, Rectangle};
pub use viewport::Viewport;
