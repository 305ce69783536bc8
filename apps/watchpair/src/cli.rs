use clap::{Parser, ValueEnum};

use crate::config::DEFAULT_LOG_FILTER;

#[derive(Parser, Debug)]
#[command(
    name = "watchpair",
    about = "Two participants, one room, one movie: negotiates a peer session and keeps playback in sync",
    version
)]
pub struct Cli {
    #[arg(
        long,
        env = "WATCHPAIR_ROOM",
        default_value = "movie-night",
        help = "Room both participants meet in"
    )]
    pub room: String,

    #[arg(
        long,
        help = "Media to load once connected: a direct media URL or a YouTube/Vimeo link"
    )]
    pub source: Option<String>,

    #[arg(long, value_enum, env = "WATCHPAIR_PEER_BACKEND", default_value_t = PeerBackend::Webrtc)]
    pub backend: PeerBackend,

    #[arg(
        long,
        help = "Comma separated STUN/TURN urls; overrides WATCHPAIR_ICE_SERVERS, empty for host candidates only"
    )]
    pub ice_servers: Option<String>,

    #[arg(long, help = "Echo guard window in milliseconds")]
    pub echo_guard_ms: Option<u64>,

    #[arg(long, help = "Seconds moved by seek forward/back")]
    pub seek_step: Option<f64>,

    #[arg(long, default_value_t = 15, help = "Seconds to wait for the data channel")]
    pub connect_timeout: u64,

    #[arg(long, env = "RUST_LOG", default_value = DEFAULT_LOG_FILTER)]
    pub log_filter: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum PeerBackend {
    /// Real peer connections through the `webrtc` crate.
    Webrtc,
    /// In-memory peers; signaling only, sync travels in envelopes.
    Mock,
}
