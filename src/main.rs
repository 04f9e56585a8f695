// src/main.rs

mod classifier;
mod config;
mod detector;
mod exercise;
mod geometry;
mod offload;
mod overlay;
mod pipeline;
mod server;
mod signaling;
mod transport;
mod types;

use anyhow::Result;
use clap::Parser;
use detector::{OnnxPoseDetector, PoseDetector};
use exercise::ExerciseRegistry;
use offload::DetectionPool;
use pipeline::metrics::PipelineMetrics;
use server::AppState;
use std::sync::Arc;
use tracing::{info, warn};
use types::Config;

#[derive(Parser, Debug)]
#[command(name = "gym-form-server", about = "Real-time exercise form feedback server")]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Bind address, overriding the configuration file
    #[arg(short, long)]
    bind: Option<String>,

    /// Verbose pipeline logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!(
                "Config '{}' not usable ({:#}), falling back to defaults",
                args.config, err
            );
            Config::default()
        }
    };
    config.apply_env_overrides();
    if let Some(bind) = args.bind {
        config.server.bind_addr = bind;
    }
    if args.debug {
        config.pipeline.debug = true;
    }

    let level = if config.pipeline.debug {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    tracing_subscriber::fmt()
        .with_env_filter(format!("gym_form_server={},ort=warn", level))
        .init();

    info!("🏋 Exercise Form Feedback Server Starting");
    info!("✓ Configuration loaded");
    info!(
        "Pipeline intervals: detection every {} frames, prediction every {} checks",
        config.pipeline.detection_interval, config.pipeline.prediction_interval
    );

    let exercises = Arc::new(ExerciseRegistry::builtin()?);
    if exercises.get(&config.pipeline.default_exercise).is_none() {
        warn!(
            "Default exercise '{}' is not registered",
            config.pipeline.default_exercise
        );
    }

    let detector: Arc<dyn PoseDetector> = Arc::new(OnnxPoseDetector::new(&config.model)?);
    let pool = DetectionPool::new(config.pipeline.offload_workers);
    let metrics = PipelineMetrics::new();

    let state = AppState {
        config: Arc::new(config),
        exercises,
        detector,
        pool,
        metrics,
    };

    server::serve(state).await
}
