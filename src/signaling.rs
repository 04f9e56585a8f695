// src/signaling.rs
//
// Per-connection signaling state machine: awaiting-offer → negotiating →
// connected → closed. Driven by received-message dispatch; malformed input
// is logged and dropped without touching the exchange state, while a
// failed negotiation closes the exchange (session-local, never fatal to
// the process).

use crate::exercise::{ExerciseProfile, ExerciseRegistry};
use crate::transport::PeerTransport;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

// ============================================================================
// WIRE FORMAT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalMessage {
    Offer {
        sdp: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exercise: Option<String>,
    },
    Answer {
        sdp: String,
    },
    Ice {
        candidate: IceCandidateInit,
    },
    Bye,
    Feedback {
        message: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceCandidateInit {
    pub candidate: String,
    #[serde(rename = "sdpMid")]
    pub sdp_mid: String,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: u32,
}

/// Structured fields of a candidate string:
/// `<foundation> <component> <protocol> <priority> <ip> <port> ... [<type>]`
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateFields {
    pub foundation: String,
    pub component: u16,
    pub protocol: String,
    pub priority: u32,
    pub ip: String,
    pub port: u16,
    pub kind: String,
}

/// Requires at least 6 whitespace-separated tokens; the 8th token, when
/// present, is the candidate type (default "host").
pub fn parse_candidate(raw: &str) -> Result<CandidateFields> {
    let parts: Vec<&str> = raw.split_whitespace().collect();
    if parts.len() < 6 {
        bail!(
            "candidate has {} tokens, need at least 6: '{}'",
            parts.len(),
            raw
        );
    }

    let foundation = parts[0].trim_start_matches("candidate:").to_string();
    let component: u16 = parts[1].parse().context("bad component")?;
    let protocol = parts[2].to_string();
    let priority: u32 = parts[3].parse().context("bad priority")?;
    let ip = parts[4].to_string();
    let port: u16 = parts[5].parse().context("bad port")?;
    let kind = if parts.len() > 7 {
        parts[7].to_string()
    } else {
        "host".to_string()
    };

    Ok(CandidateFields {
        foundation,
        component,
        protocol,
        priority,
        ip,
        port,
        kind,
    })
}

// ============================================================================
// EXCHANGE STATE MACHINE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    AwaitingOffer,
    Negotiating,
    Connected,
    Closed,
}

pub struct SignalingExchange<T: PeerTransport> {
    state: ExchangeState,
    transport: T,
    registry: Arc<ExerciseRegistry>,
    default_exercise: String,
    profile: Option<Arc<ExerciseProfile>>,
}

impl<T: PeerTransport> SignalingExchange<T> {
    pub fn new(transport: T, registry: Arc<ExerciseRegistry>, default_exercise: String) -> Self {
        Self {
            state: ExchangeState::AwaitingOffer,
            transport,
            registry,
            default_exercise,
            profile: None,
        }
    }

    pub fn state(&self) -> ExchangeState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == ExchangeState::Closed
    }

    /// The exercise selected by the accepted offer, if any.
    pub fn profile(&self) -> Option<Arc<ExerciseProfile>> {
        self.profile.clone()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Outgoing sends are only valid while the transport reports itself
    /// connected; callers suppress (not retry) sends after closure.
    pub fn can_send(&self) -> bool {
        !self.is_closed() && self.transport.is_connected()
    }

    /// Dispatch one raw text message. Unparseable input is logged and
    /// dropped; the exchange state is untouched.
    pub async fn handle_text(&mut self, raw: &str) -> Option<SignalMessage> {
        match serde_json::from_str::<SignalMessage>(raw) {
            Ok(msg) => self.handle_message(msg).await,
            Err(err) => {
                warn!("Dropping malformed signaling message: {}", err);
                None
            }
        }
    }

    /// Dispatch one parsed message, returning the reply to send (if any).
    pub async fn handle_message(&mut self, msg: SignalMessage) -> Option<SignalMessage> {
        if self.is_closed() {
            debug!("Exchange closed, ignoring message");
            return None;
        }

        match msg {
            SignalMessage::Offer { sdp, exercise } => self.on_offer(&sdp, exercise).await,
            SignalMessage::Ice { candidate } => {
                self.on_candidate(candidate).await;
                None
            }
            SignalMessage::Bye => {
                info!("Client sent bye, closing exchange");
                self.close().await;
                None
            }
            SignalMessage::Answer { .. } | SignalMessage::Feedback { .. } => {
                warn!("Dropping unexpected client message");
                None
            }
        }
    }

    async fn on_offer(&mut self, sdp: &str, exercise: Option<String>) -> Option<SignalMessage> {
        let profile = self
            .registry
            .resolve(exercise.as_deref(), &self.default_exercise);
        match &profile {
            Some(profile) => info!("Offer received for exercise: {}", profile.id),
            None => warn!(
                "No profile for default exercise '{}'",
                self.default_exercise
            ),
        }
        self.profile = profile;

        match self.transport.apply_offer(sdp).await {
            Ok(answer) => {
                self.state = ExchangeState::Negotiating;
                debug!("Answer synthesized, negotiating");
                Some(SignalMessage::Answer { sdp: answer })
            }
            Err(err) => {
                warn!("Negotiation failed, closing exchange: {:#}", err);
                self.close().await;
                None
            }
        }
    }

    async fn on_candidate(&mut self, candidate: IceCandidateInit) {
        let fields = match parse_candidate(&candidate.candidate) {
            Ok(fields) => fields,
            Err(err) => {
                warn!("Dropping malformed ICE candidate: {:#}", err);
                return;
            }
        };

        match self
            .transport
            .add_candidate(&fields, &candidate.sdp_mid, candidate.sdp_mline_index)
            .await
        {
            Ok(()) => {
                if self.transport.is_connected() && self.state == ExchangeState::Negotiating {
                    info!("Transport connected");
                    self.state = ExchangeState::Connected;
                }
            }
            Err(err) => {
                warn!("Transport rejected candidate: {:#}", err);
            }
        }
    }

    /// Tear down the transport. Safe to call repeatedly.
    pub async fn close(&mut self) {
        if self.state != ExchangeState::Closed {
            self.transport.close().await;
            self.state = ExchangeState::Closed;
        }
    }
}
