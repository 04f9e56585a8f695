// src/pipeline/phase.rs
//
// Discrete exercise phase from the joint angle versus the profile's
// thresholds. The tracker keeps current and previous so the
// classification throttle can edge-trigger on transitions.

use crate::exercise::PhaseThresholds;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Below,
    Above,
    Neutral,
}

impl Phase {
    pub fn from_angle(angle: f32, thresholds: &PhaseThresholds) -> Phase {
        if angle < thresholds.below {
            Phase::Below
        } else if angle > thresholds.above {
            Phase::Above
        } else {
            Phase::Neutral
        }
    }
}

/// None until the first observation; mutated once per processed frame.
#[derive(Debug, Default)]
pub struct PhaseTracker {
    current: Option<Phase>,
    previous: Option<Phase>,
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, phase: Phase) {
        self.previous = self.current;
        self.current = Some(phase);
    }

    pub fn current(&self) -> Option<Phase> {
        self.current
    }

    /// True when the last observation differed from the one before it.
    /// The first observation counts as a change (None → phase).
    pub fn changed(&self) -> bool {
        self.current != self.previous
    }
}
