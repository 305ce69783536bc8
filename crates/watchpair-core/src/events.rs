//! State-change notifications for presentation layers.
//!
//! The core never renders anything; observers subscribe to a broadcast of
//! [`StatusEvent`]s and draw from those.

use tokio::sync::broadcast;

use crate::peer::PeerLinkState;
use crate::playback::PlaybackSnapshot;
use crate::room::RoomId;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Negotiating,
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataChannelState {
    Closed,
    Open,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    Connection {
        room: Option<RoomId>,
        state: ConnectionState,
    },
    /// Raw link report from the peer-connection; does not imply teardown.
    PeerLink(PeerLinkState),
    DataChannel(DataChannelState),
    RemoteMedia {
        stream_id: String,
    },
    SignalingSendFailed {
        reason: String,
    },
    SignalingLagged {
        skipped: u64,
    },
    Playback(PlaybackSnapshot),
    MediaError {
        reason: String,
    },
    /// Short human readable progress line.
    Notice(String),
}

#[derive(Debug, Clone)]
pub struct EventSink {
    tx: broadcast::Sender<StatusEvent>,
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink {
    pub fn new() -> Self {
        Self {
            tx: broadcast::channel(EVENT_CAPACITY).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: StatusEvent) {
        // Nobody listening is fine.
        let _ = self.tx.send(event);
    }

    pub fn notice(&self, text: impl Into<String>) {
        self.emit(StatusEvent::Notice(text.into()));
    }
}
