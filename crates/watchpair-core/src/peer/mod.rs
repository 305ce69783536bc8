//! Capability boundary to the peer-connection primitive.
//!
//! The core never touches NAT traversal, SDP internals or codecs. It drives a
//! [`PeerConnection`] through async calls and receives everything the
//! primitive reports as tagged [`PeerEvent`]s on a channel handed over at
//! construction time.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::PeerError;
use crate::protocol::{IceCandidate, SessionDescription};

pub mod mock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerLinkState {
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    LocalCandidate(IceCandidate),
    LinkState(PeerLinkState),
    RemoteTrack { track_id: String, stream_id: String },
    DataChannelOpen,
    DataChannelClosed,
    DataMessage(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTrack {
    pub id: String,
    pub kind: TrackKind,
}

/// Locally captured media, acquired outside the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalMedia {
    pub stream_id: String,
    pub tracks: Vec<MediaTrack>,
}

impl LocalMedia {
    /// One audio and one video track, the usual camera + microphone pair.
    pub fn camera(stream_id: impl Into<String>) -> Self {
        let stream_id = stream_id.into();
        Self {
            tracks: vec![
                MediaTrack {
                    id: format!("{stream_id}-audio"),
                    kind: TrackKind::Audio,
                },
                MediaTrack {
                    id: format!("{stream_id}-video"),
                    kind: TrackKind::Video,
                },
            ],
            stream_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PeerConfig {
    pub ice_servers: Vec<String>,
}

pub type PeerEventSender = mpsc::UnboundedSender<PeerEvent>;

#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn add_local_track(&self, stream_id: &str, track: &MediaTrack) -> Result<(), PeerError>;
    /// Creates the sync data channel. Only the offering side calls this; the
    /// answering side learns about the channel through [`PeerEvent`]s.
    async fn create_data_channel(&self, label: &str) -> Result<(), PeerError>;
    async fn create_offer(&self) -> Result<SessionDescription, PeerError>;
    async fn create_answer(&self) -> Result<SessionDescription, PeerError>;
    async fn set_local_description(&self, description: SessionDescription) -> Result<(), PeerError>;
    async fn set_remote_description(&self, description: SessionDescription)
        -> Result<(), PeerError>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError>;
    async fn send_data(&self, text: String) -> Result<(), PeerError>;
    async fn close(&self);
}

/// Factory for peer connections (`createConnection(config)`).
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn create_connection(
        &self,
        config: &PeerConfig,
        events: PeerEventSender,
    ) -> Result<Arc<dyn PeerConnection>, PeerError>;
}
