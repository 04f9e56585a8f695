// src/pipeline/metrics.rs
//
// Production observability. Tracks frame, inference, and feedback counts
// across all sessions. Export via /metrics endpoint or logs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    pub sessions_opened: Arc<AtomicU64>,
    pub sessions_closed: Arc<AtomicU64>,
    pub total_frames: Arc<AtomicU64>,
    pub live_detections: Arc<AtomicU64>,
    pub cached_reuses: Arc<AtomicU64>,
    pub empty_detections: Arc<AtomicU64>,
    pub classifications: Arc<AtomicU64>,
    pub feedback_published: Arc<AtomicU64>,
    pub feedback_dropped: Arc<AtomicU64>,
    pub frame_errors: Arc<AtomicU64>,
    pub detection_time_us: Arc<AtomicU64>,
    pub classification_time_us: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            sessions_opened: Arc::new(AtomicU64::new(0)),
            sessions_closed: Arc::new(AtomicU64::new(0)),
            total_frames: Arc::new(AtomicU64::new(0)),
            live_detections: Arc::new(AtomicU64::new(0)),
            cached_reuses: Arc::new(AtomicU64::new(0)),
            empty_detections: Arc::new(AtomicU64::new(0)),
            classifications: Arc::new(AtomicU64::new(0)),
            feedback_published: Arc::new(AtomicU64::new(0)),
            feedback_dropped: Arc::new(AtomicU64::new(0)),
            frame_errors: Arc::new(AtomicU64::new(0)),
            detection_time_us: Arc::new(AtomicU64::new(0)),
            classification_time_us: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_timing(&self, counter: &AtomicU64, duration_us: u64) {
        counter.store(duration_us, Ordering::Relaxed);
    }

    pub fn fps(&self) -> f64 {
        let frames = self.total_frames.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.01 {
            frames as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),
            total_frames: self.total_frames.load(Ordering::Relaxed),
            fps: self.fps(),
            live_detections: self.live_detections.load(Ordering::Relaxed),
            cached_reuses: self.cached_reuses.load(Ordering::Relaxed),
            empty_detections: self.empty_detections.load(Ordering::Relaxed),
            classifications: self.classifications.load(Ordering::Relaxed),
            feedback_published: self.feedback_published.load(Ordering::Relaxed),
            feedback_dropped: self.feedback_dropped.load(Ordering::Relaxed),
            frame_errors: self.frame_errors.load(Ordering::Relaxed),
            last_detection_us: self.detection_time_us.load(Ordering::Relaxed),
            last_classification_us: self.classification_time_us.load(Ordering::Relaxed),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    pub total_frames: u64,
    pub fps: f64,
    pub live_detections: u64,
    pub cached_reuses: u64,
    pub empty_detections: u64,
    pub classifications: u64,
    pub feedback_published: u64,
    pub feedback_dropped: u64,
    pub frame_errors: u64,
    pub last_detection_us: u64,
    pub last_classification_us: u64,
    pub elapsed_secs: f64,
}
