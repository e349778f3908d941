//! Frame-time monitoring and quality degradation.
//!
//! Keeps a rolling window of frame times and drives a two-state controller:
//!
//! - **Normal → Emergency** before a frame, when the average of the last
//!   `emergency_window` samples exceeds the emergency threshold.
//! - **Emergency → Normal** after a frame, when that frame alone came in
//!   under the target frame time.
//!
//! Slow single frames additionally raise a warning that clears itself after
//! `warning_clear` and is never stacked.
//!
//! ## Example
//! ```
//! use std::time::Duration;
//! use adaptive_render::monitor::{DegradationState, MonitorThresholds, PerformanceMonitor};
//!
//! let mut monitor = PerformanceMonitor::new(MonitorThresholds::default());
//! for _ in 0..5 {
//!     monitor.record_frame(Duration::from_millis(40));
//! }
//! assert_eq!(monitor.check_emergency(), DegradationState::Emergency);
//! ```

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::PipelineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationState {
    #[default]
    Normal,
    Emergency,
}

/// Thresholds in milliseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorThresholds {
    pub target_frame_time_ms: f64,
    pub warning_threshold_ms: f64,
    pub emergency_threshold_ms: f64,
    pub warning_clear: Duration,
    pub history_size: usize,
    pub emergency_window: usize,
}

impl Default for MonitorThresholds {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

impl From<&PipelineConfig> for MonitorThresholds {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            target_frame_time_ms: config.target_frame_time_ms,
            warning_threshold_ms: config.warning_threshold_ms,
            emergency_threshold_ms: config.emergency_threshold_ms,
            warning_clear: Duration::from_millis(config.warning_clear_ms),
            history_size: config.history_size.max(1),
            emergency_window: config.emergency_window.max(1),
        }
    }
}

/// An outstanding slow-frame warning.
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceWarning {
    pub frame_time_ms: f64,
    pub threshold_ms: f64,
    pub raised_at: Instant,
}

/// Read-only snapshot handed to diagnostics consumers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceMetrics {
    pub frame_count: u64,
    /// Mean over the rolling window.
    pub average_frame_time_ms: f64,
    /// Maximum over the rolling window.
    pub max_frame_time_ms: f64,
    /// Display refreshes missed because a frame overran the target.
    pub skipped_frames: u64,
    /// Regions redrawn by the most recent differential pass.
    pub dirty_region_count: usize,
    /// Renderables culled in the most recent frame.
    pub culled_object_count: usize,
    pub warnings_raised: u64,
    pub emergency_entries: u64,
    pub state: DegradationState,
    pub differential_frames: u64,
    pub layered_frames: u64,
    pub direct_frames: u64,
    pub emergency_frames: u64,
    /// Fraction of the viewport left untouched by the last differential pass.
    pub pixels_saved: f32,
}

/// Outcome of recording one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameRecord {
    pub warning_raised: bool,
    /// Emergency mode ended with this frame.
    pub recovered: bool,
}

pub struct PerformanceMonitor {
    thresholds: MonitorThresholds,
    /// Frame times in milliseconds, oldest first.
    history: VecDeque<f64>,
    state: DegradationState,
    warning: Option<PerformanceWarning>,
    metrics: PerformanceMetrics,
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(MonitorThresholds::default())
    }
}

impl PerformanceMonitor {
    pub fn new(thresholds: MonitorThresholds) -> Self {
        Self {
            history: VecDeque::with_capacity(thresholds.history_size),
            thresholds,
            state: DegradationState::Normal,
            warning: None,
            metrics: PerformanceMetrics::default(),
        }
    }

    pub fn thresholds(&self) -> &MonitorThresholds {
        &self.thresholds
    }

    /// Replace thresholds; a smaller history drops the oldest samples.
    pub fn set_thresholds(&mut self, thresholds: MonitorThresholds) {
        self.thresholds = thresholds;
        while self.history.len() > self.thresholds.history_size {
            self.history.pop_front();
        }
        self.refresh_window_stats();
    }

    pub fn state(&self) -> DegradationState {
        self.state
    }

    pub fn is_emergency(&self) -> bool {
        self.state == DegradationState::Emergency
    }

    /// Pre-frame check. Requires a full window of samples.
    pub fn check_emergency(&mut self) -> DegradationState {
        if self.state == DegradationState::Normal
            && let Some(recent) = self.recent_average()
            && recent > self.thresholds.emergency_threshold_ms
        {
            self.state = DegradationState::Emergency;
            self.metrics.emergency_entries += 1;
            log::warn!(
                target: "adaptive_render",
                "entering emergency mode: last {} frames averaged {:.2}ms (threshold {:.2}ms)",
                self.thresholds.emergency_window,
                recent,
                self.thresholds.emergency_threshold_ms
            );
        }
        self.metrics.state = self.state;
        self.state
    }

    /// Average of the last `emergency_window` samples, if that many exist.
    pub fn recent_average(&self) -> Option<f64> {
        let window = self.thresholds.emergency_window;
        if self.history.len() < window {
            return None;
        }
        let sum: f64 = self.history.iter().rev().take(window).sum();
        Some(sum / window as f64)
    }

    pub fn record_frame(&mut self, frame_time: Duration) -> FrameRecord {
        self.record_frame_at(frame_time, Instant::now())
    }

    /// Record a frame measured at `now`.
    pub fn record_frame_at(&mut self, frame_time: Duration, now: Instant) -> FrameRecord {
        let ms = frame_time.as_secs_f64() * 1000.0;
        let mut record = FrameRecord::default();

        self.history.push_back(ms);
        while self.history.len() > self.thresholds.history_size {
            self.history.pop_front();
        }
        self.metrics.frame_count += 1;
        self.refresh_window_stats();

        let target = self.thresholds.target_frame_time_ms;
        if ms > target {
            let missed = (ms / target).floor() as u64;
            self.metrics.skipped_frames = self.metrics.skipped_frames.saturating_add(missed);
        }

        if self.state == DegradationState::Emergency && ms < target {
            self.state = DegradationState::Normal;
            record.recovered = true;
            log::info!(
                target: "adaptive_render",
                "leaving emergency mode: frame took {ms:.2}ms (target {target:.2}ms)"
            );
        }
        self.metrics.state = self.state;

        self.expire_warning(now);
        if ms > self.thresholds.warning_threshold_ms && self.warning.is_none() {
            self.warning = Some(PerformanceWarning {
                frame_time_ms: ms,
                threshold_ms: self.thresholds.warning_threshold_ms,
                raised_at: now,
            });
            self.metrics.warnings_raised += 1;
            record.warning_raised = true;
            log::warn!(
                target: "adaptive_render",
                "slow frame: {ms:.2}ms exceeds warning threshold {:.2}ms",
                self.thresholds.warning_threshold_ms
            );
        }

        record
    }

    /// Warning still outstanding at `now`.
    pub fn active_warning(&mut self, now: Instant) -> Option<&PerformanceWarning> {
        self.expire_warning(now);
        self.warning.as_ref()
    }

    pub fn warning_active(&mut self) -> bool {
        self.active_warning(Instant::now()).is_some()
    }

    pub fn set_dirty_region_count(&mut self, count: usize) {
        self.metrics.dirty_region_count = count;
    }

    pub fn set_culled_object_count(&mut self, count: usize) {
        self.metrics.culled_object_count = count;
    }

    pub(crate) fn metrics_mut(&mut self) -> &mut PerformanceMetrics {
        &mut self.metrics
    }

    pub fn metrics(&self) -> PerformanceMetrics {
        self.metrics.clone()
    }

    pub fn sample_count(&self) -> usize {
        self.history.len()
    }

    /// Forget samples, counters, state and any warning.
    pub fn reset(&mut self) {
        self.history.clear();
        self.state = DegradationState::Normal;
        self.warning = None;
        self.metrics = PerformanceMetrics::default();
    }

    fn expire_warning(&mut self, now: Instant) {
        if let Some(warning) = &self.warning
            && now.saturating_duration_since(warning.raised_at) >= self.thresholds.warning_clear
        {
            self.warning = None;
        }
    }

    fn refresh_window_stats(&mut self) {
        let count = self.history.len();
        if count == 0 {
            self.metrics.average_frame_time_ms = 0.0;
            self.metrics.max_frame_time_ms = 0.0;
            return;
        }
        self.metrics.average_frame_time_ms = self.history.iter().sum::<f64>() / count as f64;
        self.metrics.max_frame_time_ms = self.history.iter().copied().fold(0.0, f64::max);
    }
}

// ==================== Tests ====================

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn test_hysteresis() {
        let mut monitor = PerformanceMonitor::default();

        for _ in 0..5 {
            monitor.record_frame(ms(40));
        }
        assert_eq!(monitor.state(), DegradationState::Normal);
        assert_eq!(monitor.check_emergency(), DegradationState::Emergency);

        let record = monitor.record_frame(ms(10));
        assert!(record.recovered);
        assert_eq!(monitor.state(), DegradationState::Normal);
        assert_eq!(monitor.metrics().emergency_entries, 1);
    }

    #[test]
    fn test_needs_full_window() {
        let mut monitor = PerformanceMonitor::default();
        for _ in 0..4 {
            monitor.record_frame(ms(100));
        }
        assert_eq!(monitor.check_emergency(), DegradationState::Normal);
    }

    #[test]
    fn test_only_recent_window_counts() {
        let mut monitor = PerformanceMonitor::default();
        for _ in 0..10 {
            monitor.record_frame(ms(100));
        }
        for _ in 0..5 {
            monitor.record_frame(ms(10));
        }
        assert_eq!(monitor.check_emergency(), DegradationState::Normal);
    }

    #[test]
    fn test_slow_frame_in_emergency_stays() {
        let mut monitor = PerformanceMonitor::default();
        for _ in 0..5 {
            monitor.record_frame(ms(40));
        }
        monitor.check_emergency();
        let record = monitor.record_frame(ms(20));
        assert!(!record.recovered);
        assert!(monitor.is_emergency());
    }

    #[test]
    fn test_history_is_bounded() {
        let mut monitor = PerformanceMonitor::default();
        for _ in 0..150 {
            monitor.record_frame(ms(5));
        }
        assert_eq!(monitor.sample_count(), 100);
        assert_eq!(monitor.metrics().frame_count, 150);
    }

    #[test]
    fn test_rolling_average_and_max() {
        let mut monitor = PerformanceMonitor::default();
        monitor.record_frame(ms(10));
        monitor.record_frame(ms(20));
        monitor.record_frame(ms(30));

        let metrics = monitor.metrics();
        assert!((metrics.average_frame_time_ms - 20.0).abs() < 1e-9);
        assert!((metrics.max_frame_time_ms - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_skipped_frames() {
        let mut monitor = PerformanceMonitor::default();
        monitor.record_frame(ms(10));
        monitor.record_frame(ms(40));
        assert_eq!(monitor.metrics().skipped_frames, 2);
    }

    #[test]
    fn test_skipped_frames_saturate() {
        let mut monitor = PerformanceMonitor::new(MonitorThresholds {
            target_frame_time_ms: 1e-300,
            ..MonitorThresholds::default()
        });
        monitor.record_frame(Duration::from_secs(1));
        monitor.record_frame(Duration::from_secs(1));
        assert_eq!(monitor.metrics().skipped_frames, u64::MAX);
    }

    #[test]
    fn test_warning_deduplicated_and_self_clearing() {
        let mut monitor = PerformanceMonitor::default();
        let start = Instant::now();

        assert!(monitor.record_frame_at(ms(25), start).warning_raised);
        assert!(!monitor.record_frame_at(ms(25), start + Duration::from_secs(1)).warning_raised);
        assert!(monitor.active_warning(start + Duration::from_secs(2)).is_some());
        assert!(monitor.active_warning(start + Duration::from_secs(5)).is_none());
        assert!(monitor.record_frame_at(ms(25), start + Duration::from_secs(6)).warning_raised);

        assert_eq!(monitor.metrics().warnings_raised, 2);
    }

    #[test]
    fn test_fast_frames_never_warn() {
        let mut monitor = PerformanceMonitor::default();
        assert!(!monitor.record_frame(ms(19)).warning_raised);
        assert!(!monitor.warning_active());
    }

    #[test]
    fn test_reset() {
        let mut monitor = PerformanceMonitor::default();
        for _ in 0..5 {
            monitor.record_frame(ms(40));
        }
        monitor.check_emergency();
        monitor.reset();
        assert_eq!(monitor.state(), DegradationState::Normal);
        assert_eq!(monitor.sample_count(), 0);
        assert_eq!(monitor.metrics(), PerformanceMetrics::default());
    }
}
