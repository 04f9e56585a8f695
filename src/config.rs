// src/config.rs

use crate::types::Config;
use anyhow::Result;
use std::fs;

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Environment variables override the file, CLI flags override both.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(exercise) = std::env::var("DEFAULT_EXERCISE") {
            self.pipeline.default_exercise = exercise;
        }
        if let Ok(val) = std::env::var("DETECTION_INTERVAL") {
            if let Ok(n) = val.parse() {
                self.pipeline.detection_interval = n;
            }
        }
        if let Ok(val) = std::env::var("PREDICTION_INTERVAL") {
            if let Ok(n) = val.parse() {
                self.pipeline.prediction_interval = n;
            }
        }
        if let Ok(val) = std::env::var("DEBUG_MODE") {
            self.pipeline.debug = val.eq_ignore_ascii_case("true");
        }
    }
}
