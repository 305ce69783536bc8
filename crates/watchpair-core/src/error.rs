use thiserror::Error;

use crate::room::RoomIdError;

/// Failure reported by the peer-connection capability.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PeerError {
    #[error("peer connection setup failed: {0}")]
    Setup(String),
    #[error("session description rejected: {0}")]
    Description(String),
    #[error("ice candidate rejected: {0}")]
    Candidate(String),
    #[error("data channel unavailable: {0}")]
    DataChannel(String),
    #[error("peer connection closed")]
    Closed,
}

/// Rejections from `create_room` / `join_room`. All of them are recoverable:
/// satisfy the precondition and call again.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("local media has not been acquired")]
    MissingLocalMedia,
    #[error("invalid room code: {0}")]
    InvalidRoom(#[from] RoomIdError),
    #[error(transparent)]
    Peer(#[from] PeerError),
}

/// Errors on the playback path. Surfaced to the user, never fatal to the
/// session.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PlaybackError {
    #[error("media source is empty")]
    EmptySource,
    #[error("nothing is loaded")]
    NothingLoaded,
    #[error("player error: {0}")]
    Player(String),
}

/// Malformed payload on the signaling or data path.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),
}
