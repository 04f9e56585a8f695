// src/pipeline/throttle.rs
//
// Rate control for the two inference cost centers. Detection is throttled
// by frame index; classification by a full-buffer check counter with an
// edge trigger on phase changes.

use crate::types::PoseDetection;
use std::time::{Duration, Instant};
use tracing::debug;

/// The cached last detection with its staleness marker. `detection` is
/// None when the last live run found no subject (the empty outcome still
/// refreshes the marker).
pub struct CachedDetection {
    pub detection: Option<PoseDetection>,
    pub at: Instant,
}

/// Live-detect every Nth frame (indices 0, N, 2N, …); in between, callers
/// reuse the cached result.
pub struct DetectionThrottle {
    interval: u32,
    cached: Option<CachedDetection>,
    invocations: u64,
}

impl DetectionThrottle {
    pub fn new(interval: u32) -> Self {
        Self {
            interval: interval.max(1),
            cached: None,
            invocations: 0,
        }
    }

    pub fn should_detect(&self, frame_index: u64) -> bool {
        frame_index % u64::from(self.interval) == 0
    }

    /// Record a live detection outcome, subject or not.
    pub fn store(&mut self, detection: Option<PoseDetection>) {
        self.invocations += 1;
        self.cached = Some(CachedDetection {
            detection,
            at: Instant::now(),
        });
    }

    /// Last known subject detection, live or cached.
    pub fn last_detection(&self) -> Option<&PoseDetection> {
        self.cached.as_ref().and_then(|c| c.detection.as_ref())
    }

    /// Age of the cached entry, for callers preferring a validity window
    /// over strict frame counting.
    pub fn staleness(&self) -> Option<Duration> {
        self.cached.as_ref().map(|c| c.at.elapsed())
    }

    pub fn invocations(&self) -> u64 {
        self.invocations
    }
}

/// Classify on every Mth full-buffer check, or immediately when the phase
/// changed since the last check. Phase changes latch until consumed so an
/// edge observed before the buffer fills is not lost.
pub struct ClassificationThrottle {
    interval: u32,
    checks: u64,
    pending_phase_change: bool,
    invocations: u64,
}

impl ClassificationThrottle {
    pub fn new(interval: u32) -> Self {
        Self {
            interval: interval.max(1),
            checks: 0,
            pending_phase_change: false,
            invocations: 0,
        }
    }

    pub fn note_phase_change(&mut self) {
        self.pending_phase_change = true;
    }

    pub fn should_classify(&mut self, buffer_full: bool) -> bool {
        if !buffer_full {
            return false;
        }
        let periodic = self.checks % u64::from(self.interval) == 0;
        let fire = periodic || self.pending_phase_change;
        self.checks += 1;
        if fire {
            self.pending_phase_change = false;
            self.invocations += 1;
            debug!(
                "Classification scheduled (check={}, periodic={})",
                self.checks, periodic
            );
        }
        fire
    }

    pub fn invocations(&self) -> u64 {
        self.invocations
    }
}
