// src/transport.rs
//
// Peer-connection and media seams. The signaling state machine drives a
// PeerTransport; the session pipeline pulls frames from a VideoSource and
// pushes annotated frames into a VideoSink. A WebRTC stack plugs in by
// implementing these traits; the loopback implementation below moves
// frames over channels and is what the tests and demo wiring use.

use crate::signaling::CandidateFields;
use crate::types::VideoFrame;
use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;

#[async_trait]
pub trait PeerTransport: Send {
    /// Apply the remote offer and synthesize the local answer SDP.
    async fn apply_offer(&mut self, sdp: &str) -> Result<String>;

    /// Register a remote connectivity candidate.
    async fn add_candidate(
        &mut self,
        candidate: &CandidateFields,
        sdp_mid: &str,
        sdp_mline_index: u32,
    ) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Hand over the negotiated video pair once, on track arrival.
    fn take_video(&mut self) -> Option<(Box<dyn VideoSource>, Box<dyn VideoSink>)>;

    /// Idempotent.
    async fn close(&mut self);
}

#[async_trait]
pub trait VideoSource: Send {
    /// Next frame in arrival order; None when the track ended.
    async fn recv(&mut self) -> Option<VideoFrame>;
}

#[async_trait]
pub trait VideoSink: Send {
    async fn send(&mut self, frame: VideoFrame) -> Result<()>;
}

// ============================================================================
// CHANNEL-BACKED MEDIA
// ============================================================================

pub struct ChannelVideoSource {
    rx: mpsc::Receiver<VideoFrame>,
}

pub struct ChannelVideoSink {
    tx: mpsc::Sender<VideoFrame>,
}

/// A connected (sink, source) pair: frames sent into the sink come out of
/// the source in order.
pub fn video_channel(capacity: usize) -> (ChannelVideoSink, ChannelVideoSource) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ChannelVideoSink { tx }, ChannelVideoSource { rx })
}

#[async_trait]
impl VideoSource for ChannelVideoSource {
    async fn recv(&mut self) -> Option<VideoFrame> {
        self.rx.recv().await
    }
}

#[async_trait]
impl VideoSink for ChannelVideoSink {
    async fn send(&mut self, frame: VideoFrame) -> Result<()> {
        if self.tx.send(frame).await.is_err() {
            bail!("video sink closed");
        }
        Ok(())
    }
}

// ============================================================================
// LOOPBACK TRANSPORT
// ============================================================================

/// Accepts any offer, reports connected once a candidate lands, and hands
/// out whatever video pair it was seeded with.
pub struct LoopbackTransport {
    connected: bool,
    closed: bool,
    video: Option<(Box<dyn VideoSource>, Box<dyn VideoSink>)>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self {
            connected: false,
            closed: false,
            video: None,
        }
    }

    pub fn with_video(source: Box<dyn VideoSource>, sink: Box<dyn VideoSink>) -> Self {
        Self {
            connected: false,
            closed: false,
            video: Some((source, sink)),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PeerTransport for LoopbackTransport {
    async fn apply_offer(&mut self, sdp: &str) -> Result<String> {
        if self.closed {
            bail!("transport closed");
        }
        if sdp.trim().is_empty() {
            bail!("empty offer sdp");
        }
        Ok("v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=loopback\r\nt=0 0\r\n".to_string())
    }

    async fn add_candidate(
        &mut self,
        _candidate: &CandidateFields,
        _sdp_mid: &str,
        _sdp_mline_index: u32,
    ) -> Result<()> {
        if self.closed {
            bail!("transport closed");
        }
        self.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected && !self.closed
    }

    fn take_video(&mut self) -> Option<(Box<dyn VideoSource>, Box<dyn VideoSink>)> {
        self.video.take()
    }

    async fn close(&mut self) {
        self.connected = false;
        self.closed = true;
        self.video = None;
    }
}
