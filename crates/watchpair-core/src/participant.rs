//! One participant instance: negotiation plus shared playback.
//!
//! `Participant` owns the single [`Negotiator`] and [`PlaybackSync`] of the
//! local instance and is driven from one task. It routes sync messages
//! between the two, resets playback when a session ends, and turns playback
//! errors into status events without touching the session.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use transport_bus::Bus;

use crate::config::SessionConfig;
use crate::error::{PlaybackError, SessionError};
use crate::events::{ConnectionState, EventSink, StatusEvent};
use crate::negotiator::{EndReason, Negotiator, NegotiatorInput, Outcome, Session};
use crate::peer::{LocalMedia, PeerConnector};
use crate::playback::{MediaPlayer, PlaybackSnapshot, PlaybackState, PlaybackSync, PlayerEvent};
use crate::protocol::{ControlAction, SyncMessage};
use crate::room::LocalIdentity;

pub struct Participant {
    negotiator: Negotiator,
    playback: PlaybackSync,
    events: EventSink,
    seek_step_secs: f64,
}

impl Participant {
    pub fn new(
        config: SessionConfig,
        bus: Arc<dyn Bus>,
        connector: Arc<dyn PeerConnector>,
        direct_player: Box<dyn MediaPlayer>,
        embedded_player: Box<dyn MediaPlayer>,
    ) -> Self {
        Self::with_identity(
            LocalIdentity::generate(),
            config,
            bus,
            connector,
            direct_player,
            embedded_player,
        )
    }

    pub fn with_identity(
        identity: LocalIdentity,
        config: SessionConfig,
        bus: Arc<dyn Bus>,
        connector: Arc<dyn PeerConnector>,
        direct_player: Box<dyn MediaPlayer>,
        embedded_player: Box<dyn MediaPlayer>,
    ) -> Self {
        let events = EventSink::new();
        let playback = PlaybackSync::new(direct_player, embedded_player, config.echo_guard_window);
        let seek_step_secs = config.seek_step_secs;
        let negotiator = Negotiator::new(identity, config, bus, connector, events.clone());
        Self {
            negotiator,
            playback,
            events,
            seek_step_secs,
        }
    }

    pub fn identity(&self) -> &LocalIdentity {
        self.negotiator.identity()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.events.subscribe()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.negotiator.connection_state()
    }

    pub fn session(&self) -> Option<Session> {
        self.negotiator.session()
    }

    pub fn playback(&self) -> &PlaybackState {
        self.playback.state()
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        self.playback.snapshot()
    }

    pub fn acquire_local_media(&mut self, media: LocalMedia) {
        info!(stream_id = %media.stream_id, tracks = media.tracks.len(), "local media acquired");
        self.negotiator.set_local_media(Some(media));
        self.events.notice("Camera active. Create or join a room.");
    }

    /// Affects the next session only; a live one keeps its tracks.
    pub fn release_local_media(&mut self) {
        self.negotiator.set_local_media(None);
    }

    /// Replaces any live session with a new one as Caller.
    pub async fn create_room(&mut self, room: &str) -> Result<(), SessionError> {
        self.negotiator.create_room(room).await
    }

    /// Replaces any live session with a new one as Callee.
    pub async fn join_room(&mut self, room: &str) -> Result<(), SessionError> {
        self.negotiator.join_room(room).await
    }

    /// Notifies the partner, tears the session down and unloads playback.
    /// Does nothing without a live session.
    pub async fn hangup(&mut self) {
        if !self.negotiator.hangup().await {
            debug!(identity = %self.identity(), "no session to hang up");
            return;
        }
        info!(identity = %self.identity(), "hung up");
        self.playback.reset();
        self.publish_playback();
        self.events.notice("Call ended.");
    }

    pub async fn load(&mut self, source: &str) -> Result<(), PlaybackError> {
        let message = self.playback.load(source);
        let message = self.surface(message)?;
        self.publish_playback();
        self.negotiator.send_sync(message).await;
        Ok(())
    }

    /// Applies a local control action. Suppressed, without error, while a
    /// remote change is being applied.
    pub async fn act(
        &mut self,
        action: ControlAction,
        delta: Option<f64>,
    ) -> Result<(), PlaybackError> {
        let outcome = self.playback.act(action, delta);
        if let Some(message) = self.surface(outcome)? {
            self.publish_playback();
            self.negotiator.send_sync(message).await;
        }
        Ok(())
    }

    pub async fn play(&mut self) -> Result<(), PlaybackError> {
        self.act(ControlAction::Play, None).await
    }

    pub async fn pause(&mut self) -> Result<(), PlaybackError> {
        self.act(ControlAction::Pause, None).await
    }

    pub async fn seek_forward(&mut self) -> Result<(), PlaybackError> {
        let step = self.seek_step_secs;
        self.act(ControlAction::Seek, Some(step)).await
    }

    pub async fn seek_back(&mut self) -> Result<(), PlaybackError> {
        let step = self.seek_step_secs;
        self.act(ControlAction::Seek, Some(-step)).await
    }

    /// Pushes the local position and paused flag to the partner.
    pub async fn sync_now(&mut self) -> Result<(), PlaybackError> {
        let message = self.playback.sync_now();
        let message = self.surface(message)?;
        self.negotiator.send_sync(message).await;
        Ok(())
    }

    /// Feeds an event observed on the underlying player.
    pub async fn on_player_event(&mut self, event: PlayerEvent) -> Result<(), PlaybackError> {
        let outcome = self.playback.on_player_event(event);
        if let Some(message) = self.surface(outcome)? {
            self.publish_playback();
            self.negotiator.send_sync(message).await;
        }
        Ok(())
    }

    /// Waits for and processes one signaling or peer input. Returns false
    /// right away when there is no live session.
    pub async fn step(&mut self) -> bool {
        match self.next_input().await {
            Some(input) => {
                self.handle_input(input).await;
                true
            }
            None => false,
        }
    }

    /// Cancel-safe half of [`Participant::step`], for use inside `select!`.
    pub async fn next_input(&mut self) -> Option<NegotiatorInput> {
        self.negotiator.next_input().await
    }

    pub async fn handle_input(&mut self, input: NegotiatorInput) {
        match self.negotiator.handle(input).await {
            Outcome::Continue => {}
            Outcome::Sync(message) => self.apply_remote(message),
            Outcome::Ended(reason) => {
                debug!(?reason, "session ended remotely");
                self.playback.reset();
                self.publish_playback();
                if reason == EndReason::SignalingLost {
                    self.events.notice("Signaling lost. Create or join the room again.");
                }
            }
        }
    }

    fn apply_remote(&mut self, message: SyncMessage) {
        match self.playback.apply_remote(&message) {
            Ok(()) => self.publish_playback(),
            Err(err) => {
                warn!(error = %err, ?message, "unable to apply partner's playback change");
                self.events.emit(StatusEvent::MediaError {
                    reason: err.to_string(),
                });
            }
        }
    }

    fn surface<T>(&self, result: Result<T, PlaybackError>) -> Result<T, PlaybackError> {
        if let Err(err) = &result {
            warn!(error = %err, "playback error");
            self.events.emit(StatusEvent::MediaError {
                reason: err.to_string(),
            });
        }
        result
    }

    fn publish_playback(&self) {
        self.events.emit(StatusEvent::Playback(self.playback.snapshot()));
    }
}
