// Unified error handling for the rendering pipeline.
//
// Expected operating conditions (performance warnings, emergency mode, a
// single renderable failing to draw) are reported through logs and the frame
// report, never through this type.

use thiserror::Error;

/// Errors that abort a pipeline operation.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("A frame is already being rendered")]
    Busy,

    #[error("Target surface unusable: {0}")]
    TargetUnusable(String),

    #[error("Surface operation failed: {0}")]
    Surface(String),

    #[error("Surface allocation failed for {width}x{height}")]
    Allocation { width: u32, height: u32 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for convenience
pub type RenderResult<T> = Result<T, RenderError>;
