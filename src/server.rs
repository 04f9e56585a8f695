// src/server.rs
//
// HTTP surface: one WebSocket signaling endpoint per client plus health
// and metrics routes. Each accepted socket owns its exchange, feedback
// channel, and (once the transport connects and yields a track) its
// pipeline task. A client failure tears down that session only.

use crate::classifier::OnnxSequenceClassifier;
use crate::detector::PoseDetector;
use crate::offload::DetectionPool;
use crate::pipeline::feedback::{self, FeedbackChannel};
use crate::pipeline::metrics::{MetricsSummary, PipelineMetrics};
use crate::pipeline::session::{run_track, Session};
use crate::exercise::ExerciseRegistry;
use crate::signaling::{ExchangeState, SignalMessage, SignalingExchange};
use crate::transport::{LoopbackTransport, PeerTransport};
use crate::types::Config;
use anyhow::Result;
use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use futures::{sink::SinkExt, stream::StreamExt};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub exercises: Arc<ExerciseRegistry>,
    pub detector: Arc<dyn PoseDetector>,
    pub pool: DetectionPool,
    pub metrics: PipelineMetrics,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/signaling", get(signaling_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn metrics_handler(State(state): State<AppState>) -> Json<MetricsSummary> {
    Json(state.metrics.summary())
}

async fn signaling_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Drive one client: signaling messages inbound, answer and feedback
/// outbound, pipeline spawned on track arrival. Returning from here is
/// the session teardown path.
async fn handle_socket(socket: WebSocket, state: AppState) {
    state.metrics.inc(&state.metrics.sessions_opened);
    info!("Signaling peer connected");

    let (mut ws_tx, mut ws_rx) = socket.split();
    // Held for the whole connection so the receiver never reports closed
    // while the socket is alive.
    let (feedback_tx, mut feedback_rx) =
        feedback::channel(state.config.pipeline.feedback_queue);

    let mut exchange = SignalingExchange::new(
        LoopbackTransport::new(),
        state.exercises.clone(),
        state.config.pipeline.default_exercise.clone(),
    );
    let mut pipeline_task: Option<JoinHandle<()>> = None;

    loop {
        tokio::select! {
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = exchange.handle_text(text.as_str()).await {
                            if send_signal(&mut ws_tx, &reply).await.is_err() {
                                break;
                            }
                        }
                        if exchange.state() == ExchangeState::Connected
                            && pipeline_task.is_none()
                        {
                            pipeline_task =
                                attach_pipeline(&state, &mut exchange, &feedback_tx);
                        }
                        if exchange.is_closed() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Signaling socket closed by peer");
                        break;
                    }
                    Some(Ok(_)) => {} // binary and ping/pong frames are ignored
                    Some(Err(err)) => {
                        warn!("Signaling socket error: {}", err);
                        break;
                    }
                }
            }
            event = feedback_rx.recv() => {
                match event {
                    Some(event) if exchange.can_send() => {
                        let msg = SignalMessage::Feedback { message: event.message() };
                        if send_signal(&mut ws_tx, &msg).await.is_err() {
                            break;
                        }
                    }
                    Some(_) => {
                        debug!("Feedback ready but exchange cannot send, dropping");
                    }
                    None => break,
                }
            }
        }
    }

    exchange.close().await;
    if let Some(task) = pipeline_task {
        // In-flight detection calls drain inside the pool; only the frame
        // loop is cut short here.
        task.abort();
    }
    drop(feedback_tx);
    state.metrics.inc(&state.metrics.sessions_closed);
    info!("Signaling peer disconnected");
}

async fn send_signal(
    ws_tx: &mut (impl futures::Sink<Message, Error = axum::Error> + Unpin),
    msg: &SignalMessage,
) -> Result<()> {
    let json = serde_json::to_string(msg)?;
    ws_tx.send(Message::Text(json.into())).await?;
    Ok(())
}

/// Bind the negotiated exercise profile to a classifier and start the
/// frame loop for the transport's video pair. Any bind failure is logged
/// and leaves the exchange signaling-only.
fn attach_pipeline(
    state: &AppState,
    exchange: &mut SignalingExchange<LoopbackTransport>,
    feedback: &FeedbackChannel,
) -> Option<JoinHandle<()>> {
    let profile = match exchange.profile() {
        Some(profile) => profile,
        None => {
            warn!("Connected without an exercise profile, no pipeline");
            return None;
        }
    };
    let (source, sink) = match exchange.transport_mut().take_video() {
        Some(pair) => pair,
        None => {
            debug!("Transport has no video track yet");
            return None;
        }
    };

    let model_path = std::path::Path::new(&profile.model_path);
    let classifier = match OnnxSequenceClassifier::load(model_path, profile.labels.len()) {
        Ok(classifier) => classifier,
        Err(err) => {
            warn!(
                "Classifier for '{}' failed to load: {:#}",
                profile.id, err
            );
            return None;
        }
    };

    let session = match Session::new(
        profile.clone(),
        state.detector.clone(),
        Box::new(classifier),
        state.pool.clone(),
        feedback.clone(),
        state.metrics.clone(),
        &state.config.pipeline,
    ) {
        Ok(session) => session,
        Err(err) => {
            warn!("Session rejected for '{}': {:#}", profile.id, err);
            return None;
        }
    };

    info!("Pipeline attached for exercise '{}'", profile.id);
    Some(tokio::spawn(run_track(session, source, sink)))
}

/// Bind and serve until the listener fails.
pub async fn serve(state: AppState) -> Result<()> {
    let addr = state.config.server.bind_addr.clone();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("✓ Listening on {}", addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}
