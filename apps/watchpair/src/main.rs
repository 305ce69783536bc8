mod cli;
mod config;
mod driver;
mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};
use transport_bus::{Bus, LocalBus};
use transport_webrtc::WebRtcConnector;
use watchpair_core::peer::mock::MockConnector;
use watchpair_core::{
    ClockPlayer, DataChannelState, LocalIdentity, LocalMedia, Participant, PeerConnector,
    StatusEvent,
};

use crate::cli::{Cli, PeerBackend};
use crate::config::AppConfig;
use crate::driver::ParticipantHandle;
use crate::telemetry::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = AppConfig::from_cli(Cli::parse());
    init_tracing(&cfg.log_filter);
    info!(
        room = %cfg.room,
        backend = ?cfg.backend,
        ice_servers = ?cfg.session.ice_servers,
        echo_guard_ms = cfg.session.echo_guard_window.as_millis() as u64,
        seek_step_secs = cfg.session.seek_step_secs,
        "starting watchpair"
    );

    let bus: Arc<dyn Bus> = Arc::new(LocalBus::new());
    let alice = build_participant("alice", &cfg, bus.clone())?;
    let bob = build_participant("bob", &cfg, bus)?;
    let mut alice_events = alice.subscribe();
    let mut bob_events = bob.subscribe();
    let alice = driver::spawn("alice", alice);
    let bob = driver::spawn("bob", bob);

    alice.create_room(&cfg.room).await?;
    bob.join_room(&cfg.room).await?;

    let both_open = async {
        let (a, b) = tokio::join!(
            wait_for_data_channel(&mut alice_events),
            wait_for_data_channel(&mut bob_events)
        );
        a && b
    };
    match timeout(cfg.connect_timeout, both_open).await {
        Ok(true) => info!(room = %cfg.room, "data channel open on both sides"),
        _ => warn!(
            room = %cfg.room,
            "data channel not open yet; sync messages travel over signaling"
        ),
    }

    match cfg.source.as_deref() {
        Some(source) => play_through(&alice, &bob, source).await?,
        None => {
            info!("no --source given; press ctrl-c to hang up");
            tokio::signal::ctrl_c().await?;
        }
    }

    alice.hangup().await?;
    sleep(Duration::from_millis(200)).await;
    alice.shutdown().await;
    bob.shutdown().await;
    Ok(())
}

fn build_participant(name: &str, cfg: &AppConfig, bus: Arc<dyn Bus>) -> Result<Participant> {
    let connector: Arc<dyn PeerConnector> = match cfg.backend {
        PeerBackend::Webrtc => Arc::new(WebRtcConnector::new()?),
        PeerBackend::Mock => Arc::new(MockConnector::new()),
    };
    let identity = LocalIdentity::generate();
    info!(participant = name, %identity, "participant created");
    let mut participant = Participant::with_identity(
        identity,
        cfg.session.clone(),
        bus,
        connector,
        Box::new(ClockPlayer::new()),
        Box::new(ClockPlayer::new()),
    );
    participant.acquire_local_media(LocalMedia::camera(format!("{name}-camera")));
    Ok(participant)
}

/// True once the data channel reports open; false if the session ends first.
async fn wait_for_data_channel(events: &mut broadcast::Receiver<StatusEvent>) -> bool {
    loop {
        match events.recv().await {
            Ok(StatusEvent::DataChannel(DataChannelState::Open)) => return true,
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return false,
        }
    }
}

/// Loads `source` on Alice's side, drives a few controls from both ends and
/// prints where each player ended up.
async fn play_through(alice: &ParticipantHandle, bob: &ParticipantHandle, source: &str) -> Result<()> {
    alice.load(source).await?;
    sleep(Duration::from_millis(500)).await;
    alice.play().await?;
    sleep(Duration::from_secs(2)).await;
    bob.seek_forward().await?;
    sleep(Duration::from_secs(1)).await;
    bob.pause().await?;
    sleep(Duration::from_millis(700)).await;
    alice.seek_back().await?;
    sleep(Duration::from_millis(700)).await;
    alice.sync_now().await?;
    sleep(Duration::from_millis(300)).await;

    let (a, b) = (alice.snapshot().await?, bob.snapshot().await?);
    println!(
        "alice: {:?} {} at {:.1}s ({})",
        a.mode,
        a.source.as_deref().unwrap_or("-"),
        a.position,
        if a.paused { "paused" } else { "playing" }
    );
    println!(
        "bob:   {:?} {} at {:.1}s ({})",
        b.mode,
        b.source.as_deref().unwrap_or("-"),
        b.position,
        if b.paused { "paused" } else { "playing" }
    );
    Ok(())
}
