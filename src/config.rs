//! Pipeline tuning.
//!
//! Everything is serde-enabled so hosts can keep the tuning next to their
//! other settings; missing fields take their defaults.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::dirty_rect::{DEFAULT_MAX_REGIONS, DEFAULT_MERGE_THRESHOLD};
use crate::error::{RenderError, RenderResult};
use crate::renderable::RenderableKind;

/// Layer that receives renderables with no usable layer name.
pub const FALLBACK_LAYER: &str = "game";

/// One layer in the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSpec {
    pub name: String,
    pub z_index: i32,
    #[serde(default = "default_opacity")]
    pub opacity: f32,
}

fn default_opacity() -> f32 {
    1.0
}

impl LayerSpec {
    pub fn new(name: impl Into<String>, z_index: i32) -> Self {
        Self {
            name: name.into(),
            z_index,
            opacity: 1.0,
        }
    }

    pub fn with_opacity(mut self, opacity: f32) -> Self {
        self.opacity = opacity;
        self
    }
}

/// Lookup table from renderable kind to layer name.
///
/// Kinds missing from the table go to `fallback`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerRoutes {
    pub table: BTreeMap<RenderableKind, String>,
    pub fallback: String,
}

impl Default for LayerRoutes {
    fn default() -> Self {
        let table = [
            (RenderableKind::Background, "background"),
            (RenderableKind::Control, "ui"),
            (RenderableKind::Overlay, "overlay"),
            (RenderableKind::Debug, "debug"),
        ]
        .into_iter()
        .map(|(kind, layer)| (kind, layer.to_string()))
        .collect();

        Self {
            table,
            fallback: FALLBACK_LAYER.to_string(),
        }
    }
}

impl LayerRoutes {
    pub fn route(&self, kind: RenderableKind) -> &str {
        self.table.get(&kind).unwrap_or(&self.fallback)
    }
}

pub fn default_layers() -> Vec<LayerSpec> {
    vec![
        LayerSpec::new("background", 0),
        LayerSpec::new(FALLBACK_LAYER, 1),
        LayerSpec::new("ui", 2),
        LayerSpec::new("overlay", 3),
        LayerSpec::new("debug", 4),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub max_dirty_regions: usize,
    /// Overlap ratio (overlap / sum of areas) at which regions merge.
    pub merge_threshold: f32,
    pub culling_margin: f32,
    pub occlusion_culling: bool,
    pub surface_cache_size: usize,

    pub target_frame_time_ms: f64,
    pub warning_threshold_ms: f64,
    pub emergency_threshold_ms: f64,
    /// How long a performance warning stays active.
    pub warning_clear_ms: u64,
    pub history_size: usize,
    /// Samples averaged for the emergency check.
    pub emergency_window: usize,

    /// Use the layered strategy when no dirty regions are pending.
    pub layering: bool,
    /// Derive dirty regions from renderable version changes.
    pub track_versions: bool,
    /// Outline merged regions after a differential pass.
    pub debug_regions: bool,

    pub layers: Vec<LayerSpec>,
    pub routes: LayerRoutes,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_dirty_regions: DEFAULT_MAX_REGIONS,
            merge_threshold: DEFAULT_MERGE_THRESHOLD,
            culling_margin: crate::culling::DEFAULT_MARGIN,
            occlusion_culling: true,
            surface_cache_size: crate::pool::DEFAULT_CAPACITY,

            target_frame_time_ms: 16.67,
            warning_threshold_ms: 20.0,
            emergency_threshold_ms: 33.0,
            warning_clear_ms: 5000,
            history_size: 100,
            emergency_window: 5,

            layering: true,
            track_versions: false,
            debug_regions: false,

            layers: default_layers(),
            routes: LayerRoutes::default(),
        }
    }
}

impl PipelineConfig {
    /// Parse and validate a (possibly partial) JSON document.
    pub fn from_json(json: &str) -> RenderResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> RenderResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject values the pipeline cannot work with. Unknown layer names are
    /// not errors; they route to the fallback layer.
    pub fn validate(&self) -> RenderResult<()> {
        if self.max_dirty_regions == 0 {
            return Err(RenderError::Config("max_dirty_regions must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.merge_threshold) {
            return Err(RenderError::Config(format!(
                "merge_threshold {} outside 0.0..=1.0",
                self.merge_threshold
            )));
        }
        if !self.culling_margin.is_finite() || self.culling_margin < 0.0 {
            return Err(RenderError::Config(format!(
                "culling_margin {} must be a non-negative number",
                self.culling_margin
            )));
        }
        if self.surface_cache_size == 0 {
            return Err(RenderError::Config("surface_cache_size must be at least 1".into()));
        }
        for (name, value) in [
            ("target_frame_time_ms", self.target_frame_time_ms),
            ("warning_threshold_ms", self.warning_threshold_ms),
            ("emergency_threshold_ms", self.emergency_threshold_ms),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(RenderError::Config(format!("{name} must be positive, got {value}")));
            }
        }
        if self.history_size == 0 || self.emergency_window == 0 {
            return Err(RenderError::Config(
                "history_size and emergency_window must be at least 1".into(),
            ));
        }
        if self.emergency_window > self.history_size {
            return Err(RenderError::Config(format!(
                "emergency_window {} exceeds history_size {}",
                self.emergency_window, self.history_size
            )));
        }
        Ok(())
    }
}

/// Partial update for [`PipelineConfig`]; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigUpdate {
    pub max_dirty_regions: Option<usize>,
    pub merge_threshold: Option<f32>,
    pub culling_margin: Option<f32>,
    pub occlusion_culling: Option<bool>,
    pub surface_cache_size: Option<usize>,
    pub target_frame_time_ms: Option<f64>,
    pub warning_threshold_ms: Option<f64>,
    pub emergency_threshold_ms: Option<f64>,
    pub warning_clear_ms: Option<u64>,
    pub history_size: Option<usize>,
    pub emergency_window: Option<usize>,
    pub layering: Option<bool>,
    pub track_versions: Option<bool>,
    pub debug_regions: Option<bool>,
    pub layers: Option<Vec<LayerSpec>>,
    pub routes: Option<LayerRoutes>,
}

impl ConfigUpdate {
    pub fn from_json(json: &str) -> RenderResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Return `base` with every present field replaced.
    pub fn apply_to(self, base: &PipelineConfig) -> PipelineConfig {
        let mut config = base.clone();

        set(&mut config.max_dirty_regions, self.max_dirty_regions);
        set(&mut config.merge_threshold, self.merge_threshold);
        set(&mut config.culling_margin, self.culling_margin);
        set(&mut config.occlusion_culling, self.occlusion_culling);
        set(&mut config.surface_cache_size, self.surface_cache_size);
        set(&mut config.target_frame_time_ms, self.target_frame_time_ms);
        set(&mut config.warning_threshold_ms, self.warning_threshold_ms);
        set(&mut config.emergency_threshold_ms, self.emergency_threshold_ms);
        set(&mut config.warning_clear_ms, self.warning_clear_ms);
        set(&mut config.history_size, self.history_size);
        set(&mut config.emergency_window, self.emergency_window);
        set(&mut config.layering, self.layering);
        set(&mut config.track_versions, self.track_versions);
        set(&mut config.debug_regions, self.debug_regions);
        set(&mut config.layers, self.layers);
        set(&mut config.routes, self.routes);

        config
    }
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}
