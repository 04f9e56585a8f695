// src/pipeline/feedback.rs
//
// One-way, best-effort feedback path. Classification results are pushed
// into a bounded queue; a full or closed queue drops the event instead of
// blocking the frame loop.

use crate::types::FeedbackEvent;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Clone)]
pub struct FeedbackChannel {
    tx: mpsc::Sender<FeedbackEvent>,
}

pub fn channel(capacity: usize) -> (FeedbackChannel, mpsc::Receiver<FeedbackEvent>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (FeedbackChannel { tx }, rx)
}

impl FeedbackChannel {
    /// Returns whether the event was accepted. Never blocks.
    pub fn publish(&self, event: FeedbackEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Feedback queue full, dropping event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Feedback receiver gone, dropping event");
                false
            }
        }
    }
}
