// src/pipeline/mod.rs

pub mod feedback;
pub mod history;
pub mod metrics;
pub mod phase;
pub mod session;
pub mod throttle;
