//! Watchpair core: two-party room negotiation over a broadcast signaling bus
//! plus synchronized playback over the peers' data channel.
//!
//! Responsibilities:
//! - validating room ids and minting per-instance identities
//! - the caller/callee offer, answer and candidate exchange
//! - the sync protocol (load, control, sync-now) with echo suppression
//! - status events for whatever renders the session

pub mod config;
pub mod error;
pub mod events;
pub mod negotiator;
pub mod participant;
pub mod peer;
pub mod playback;
pub mod protocol;
pub mod room;
pub mod signaling;

pub use config::SessionConfig;
pub use error::{PeerError, PlaybackError, SessionError, WireError};
pub use events::{ConnectionState, DataChannelState, EventSink, StatusEvent};
pub use negotiator::{EndReason, Negotiator, NegotiatorInput, Outcome, Role, Session};
pub use participant::Participant;
pub use peer::{
    LocalMedia, MediaTrack, PeerConfig, PeerConnection, PeerConnector, PeerEvent, PeerEventSender,
    PeerLinkState, TrackKind,
};
pub use playback::{
    ClockPlayer, MediaPlayer, MediaSource, PlaybackMode, PlaybackSnapshot, PlaybackState,
    PlaybackSync, PlayerEvent, Provider,
};
pub use protocol::{
    ControlAction, IceCandidate, SdpKind, SessionDescription, SignalBody, SignalEnvelope,
    SyncMessage,
};
pub use room::{LocalIdentity, RoomId, RoomIdError};
pub use signaling::{Inbound, SignalingAdapter};
