//! Shared playback state and the sync protocol on top of it.
//!
//! [`PlaybackSync`] turns local actions into [`SyncMessage`]s for the partner
//! and applies the partner's messages to the local players. It does not send
//! anything itself; callers route the returned messages.

use std::time::Duration;

use tracing::{debug, trace};

use crate::error::PlaybackError;
use crate::protocol::{ControlAction, SyncMessage};

mod echo;
mod player;
mod source;

pub use echo::EchoGuard;
pub use player::{ClockPlayer, MediaPlayer, PlayerEvent};
pub use source::{MediaSource, PlaybackMode, Provider};

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackState {
    pub mode: PlaybackMode,
    pub source: Option<String>,
    pub position: f64,
    pub paused: bool,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            mode: PlaybackMode::None,
            source: None,
            position: 0.0,
            paused: true,
        }
    }
}

/// Point-in-time view for observers.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSnapshot {
    pub mode: PlaybackMode,
    pub source: Option<String>,
    pub position: f64,
    pub paused: bool,
    pub echo_guard: bool,
}

/// Target buffered for an embedded player that has not reported ready.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct PendingTarget {
    position: Option<f64>,
    paused: Option<bool>,
}

/// Clamps to `[0, duration]`, or to `[0, inf)` while duration is unknown.
pub fn clamp_position(position: f64, duration: Option<f64>) -> f64 {
    if !position.is_finite() {
        return 0.0;
    }
    let floored = position.max(0.0);
    match duration {
        Some(duration) if duration.is_finite() && duration > 0.0 => floored.min(duration),
        _ => floored,
    }
}

pub struct PlaybackSync {
    state: PlaybackState,
    guard: EchoGuard,
    direct: Box<dyn MediaPlayer>,
    embedded: Box<dyn MediaPlayer>,
    pending: Option<PendingTarget>,
}

impl PlaybackSync {
    pub fn new(
        direct: Box<dyn MediaPlayer>,
        embedded: Box<dyn MediaPlayer>,
        echo_guard_window: Duration,
    ) -> Self {
        Self {
            state: PlaybackState::default(),
            guard: EchoGuard::new(echo_guard_window),
            direct,
            embedded,
            pending: None,
        }
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn echo_guard_active(&self) -> bool {
        self.guard.is_active()
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        PlaybackSnapshot {
            mode: self.state.mode,
            source: self.state.source.clone(),
            position: self.current_position(),
            paused: self.state.paused,
            echo_guard: self.guard.is_active(),
        }
    }

    /// Loads `raw` locally and returns the Load message for the partner.
    /// Runs regardless of the echo guard.
    pub fn load(&mut self, raw: &str) -> Result<SyncMessage, PlaybackError> {
        let source = MediaSource::classify(raw)?;
        self.switch_to(&source)?;
        debug!(mode = ?self.state.mode, source = %source.reference(), "media loaded");
        Ok(SyncMessage::Load {
            source: source.reference().to_string(),
        })
    }

    /// Applies a local Play/Pause/Seek. `delta` is the relative offset for
    /// Seek. Returns `Ok(None)` while the echo guard is up.
    pub fn act(
        &mut self,
        action: ControlAction,
        delta: Option<f64>,
    ) -> Result<Option<SyncMessage>, PlaybackError> {
        if self.guard.is_active() {
            trace!(?action, "local action suppressed by echo guard");
            return Ok(None);
        }
        if self.state.mode == PlaybackMode::None {
            return Err(PlaybackError::NothingLoaded);
        }
        let position = match action {
            ControlAction::Seek => {
                let target = clamp_position(
                    self.current_position() + delta.unwrap_or(0.0),
                    self.duration(),
                );
                self.seek_active(target);
                target
            }
            ControlAction::Play => {
                self.play_active()?;
                self.current_position()
            }
            ControlAction::Pause => {
                self.pause_active();
                self.current_position()
            }
        };
        self.state.position = position;
        Ok(Some(SyncMessage::Control { action, position }))
    }

    /// Snapshot of the local position and paused flag for the partner.
    pub fn sync_now(&mut self) -> Result<SyncMessage, PlaybackError> {
        if self.state.mode == PlaybackMode::None {
            return Err(PlaybackError::NothingLoaded);
        }
        let position = self.current_position();
        self.state.position = position;
        Ok(SyncMessage::SyncNow {
            position,
            paused: self.state.paused,
        })
    }

    /// Applies a message from the partner without producing one in return.
    pub fn apply_remote(&mut self, message: &SyncMessage) -> Result<(), PlaybackError> {
        self.guard.arm();
        match message {
            SyncMessage::Load { source } => {
                let source = MediaSource::classify(source)?;
                self.switch_to(&source)
            }
            SyncMessage::Control { action, position } => {
                self.require_loaded()?;
                let target = clamp_position(*position, self.duration());
                self.seek_active(target);
                match action {
                    ControlAction::Play => self.play_active()?,
                    ControlAction::Pause => self.pause_active(),
                    ControlAction::Seek => {}
                }
                Ok(())
            }
            SyncMessage::SyncNow { position, paused } => {
                self.require_loaded()?;
                let target = clamp_position(*position, self.duration());
                self.seek_active(target);
                if *paused {
                    self.pause_active();
                } else {
                    self.play_active()?;
                }
                Ok(())
            }
        }
    }

    /// Handles an event raised by the active player. Play/pause changes the
    /// state does not already reflect are reported to the partner, unless the
    /// echo guard is up.
    pub fn on_player_event(
        &mut self,
        event: PlayerEvent,
    ) -> Result<Option<SyncMessage>, PlaybackError> {
        match event {
            PlayerEvent::Ready => {
                self.flush_pending()?;
                Ok(None)
            }
            PlayerEvent::Failed(reason) => Err(PlaybackError::Player(reason)),
            PlayerEvent::Played | PlayerEvent::Paused => {
                let paused = event == PlayerEvent::Paused;
                if self.guard.is_active() {
                    trace!(?event, "player event suppressed by echo guard");
                    return Ok(None);
                }
                if self.state.mode == PlaybackMode::None || self.state.paused == paused {
                    return Ok(None);
                }
                self.state.paused = paused;
                let position = self.current_position();
                self.state.position = position;
                let action = if paused {
                    ControlAction::Pause
                } else {
                    ControlAction::Play
                };
                Ok(Some(SyncMessage::Control { action, position }))
            }
        }
    }

    /// Unloads everything and returns to `PlaybackMode::None`.
    pub fn reset(&mut self) {
        match self.state.mode {
            PlaybackMode::DirectMedia => self.direct.unload(),
            PlaybackMode::EmbeddedProvider => self.embedded.unload(),
            PlaybackMode::None => {}
        }
        self.state = PlaybackState::default();
        self.pending = None;
        self.guard.clear();
    }

    fn switch_to(&mut self, source: &MediaSource) -> Result<(), PlaybackError> {
        if self.state.mode == PlaybackMode::EmbeddedProvider {
            // A new embed always replaces the previous provider player.
            self.embedded.unload();
        } else if self.state.mode == PlaybackMode::DirectMedia
            && source.mode() != PlaybackMode::DirectMedia
        {
            self.direct.unload();
        }
        self.pending = None;
        self.state = PlaybackState::default();

        let player = match source.mode() {
            PlaybackMode::EmbeddedProvider => &mut self.embedded,
            _ => &mut self.direct,
        };
        player.load(source)?;
        self.state.mode = source.mode();
        self.state.source = Some(source.reference().to_string());
        Ok(())
    }

    fn require_loaded(&self) -> Result<(), PlaybackError> {
        if self.state.mode == PlaybackMode::None {
            Err(PlaybackError::NothingLoaded)
        } else {
            Ok(())
        }
    }

    fn active(&self) -> Option<&dyn MediaPlayer> {
        match self.state.mode {
            PlaybackMode::DirectMedia => Some(&*self.direct),
            PlaybackMode::EmbeddedProvider => Some(&*self.embedded),
            PlaybackMode::None => None,
        }
    }

    fn active_mut(&mut self) -> Option<&mut Box<dyn MediaPlayer>> {
        match self.state.mode {
            PlaybackMode::DirectMedia => Some(&mut self.direct),
            PlaybackMode::EmbeddedProvider => Some(&mut self.embedded),
            PlaybackMode::None => None,
        }
    }

    /// True when the active player cannot take commands yet.
    fn awaiting_ready(&self) -> bool {
        self.state.mode == PlaybackMode::EmbeddedProvider && !self.embedded.is_ready()
    }

    fn current_position(&self) -> f64 {
        if self.awaiting_ready() {
            return self
                .pending
                .and_then(|pending| pending.position)
                .unwrap_or(self.state.position);
        }
        self.active()
            .map(|player| player.position())
            .unwrap_or(self.state.position)
    }

    fn duration(&self) -> Option<f64> {
        if self.awaiting_ready() {
            return None;
        }
        self.active().and_then(|player| player.duration())
    }

    fn seek_active(&mut self, target: f64) {
        self.state.position = target;
        if self.awaiting_ready() {
            self.pending.get_or_insert_with(PendingTarget::default).position = Some(target);
            return;
        }
        if let Some(player) = self.active_mut() {
            player.seek(target);
        }
    }

    fn play_active(&mut self) -> Result<(), PlaybackError> {
        if self.awaiting_ready() {
            self.pending.get_or_insert_with(PendingTarget::default).paused = Some(false);
        } else if let Some(player) = self.active_mut() {
            player.play()?;
        }
        self.state.paused = false;
        Ok(())
    }

    fn pause_active(&mut self) {
        if self.awaiting_ready() {
            self.pending.get_or_insert_with(PendingTarget::default).paused = Some(true);
        } else if let Some(player) = self.active_mut() {
            player.pause();
        }
        self.state.paused = true;
    }

    fn flush_pending(&mut self) -> Result<(), PlaybackError> {
        if self.state.mode != PlaybackMode::EmbeddedProvider || !self.embedded.is_ready() {
            return Ok(());
        }
        let Some(pending) = self.pending.take() else {
            return Ok(());
        };
        debug!(?pending, "applying target buffered before player ready");
        if let Some(position) = pending.position {
            self.embedded.seek(position);
        }
        match pending.paused {
            Some(false) => self.embedded.play()?,
            Some(true) => self.embedded.pause(),
            None => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VIDEO: &str = "https://example.com/video.mp4";
    const EMBED: &str = "https://youtu.be/dQw4w9WgXcQ";

    struct Harness {
        sync: PlaybackSync,
        direct: ClockPlayer,
        embedded: ClockPlayer,
    }

    fn harness() -> Harness {
        let direct = ClockPlayer::new();
        let embedded = ClockPlayer::deferred();
        let sync = PlaybackSync::new(
            Box::new(direct.clone()),
            Box::new(embedded.clone()),
            Duration::from_millis(500),
        );
        Harness {
            sync,
            direct,
            embedded,
        }
    }

    #[test]
    fn clamps_to_known_duration() {
        assert_eq!(clamp_position(145.0, Some(100.0)), 100.0);
        assert_eq!(clamp_position(-5.0, Some(100.0)), 0.0);
        assert_eq!(clamp_position(145.0, None), 145.0);
        assert_eq!(clamp_position(f64::NAN, None), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn seek_forward_clamps_at_duration() {
        let mut h = harness();
        h.sync.load(VIDEO).unwrap();
        h.direct.set_duration(Some(100.0));
        h.sync.act(ControlAction::Seek, Some(95.0)).unwrap();
        let msg = h.sync.act(ControlAction::Seek, Some(50.0)).unwrap();
        assert_eq!(
            msg,
            Some(SyncMessage::Control {
                action: ControlAction::Seek,
                position: 100.0
            })
        );
        assert_eq!(h.direct.position(), 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn seek_backward_floors_at_zero_without_duration() {
        let mut h = harness();
        h.sync.load(VIDEO).unwrap();
        let msg = h.sync.act(ControlAction::Seek, Some(-10.0)).unwrap();
        assert_eq!(
            msg,
            Some(SyncMessage::Control {
                action: ControlAction::Seek,
                position: 0.0
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn load_switches_mode_and_resets_position() {
        let mut h = harness();
        h.sync.load(VIDEO).unwrap();
        h.sync.act(ControlAction::Seek, Some(30.0)).unwrap();
        let msg = h.sync.load(EMBED).unwrap();
        assert_eq!(msg, SyncMessage::Load { source: EMBED.into() });
        assert_eq!(h.sync.state().mode, PlaybackMode::EmbeddedProvider);
        assert_eq!(h.sync.state().position, 0.0);
        assert!(h.direct.source().is_none(), "direct player torn down");
        assert!(h.embedded.source().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn embedded_seek_is_buffered_until_ready_and_applied_once() {
        let mut h = harness();
        h.sync.load(EMBED).unwrap();
        h.sync.act(ControlAction::Seek, Some(10.0)).unwrap();
        let msg = h.sync.act(ControlAction::Seek, Some(10.0)).unwrap();
        assert_eq!(
            msg,
            Some(SyncMessage::Control {
                action: ControlAction::Seek,
                position: 20.0
            })
        );
        assert_eq!(h.embedded.seek_count(), 0);

        h.embedded.mark_ready();
        h.sync.on_player_event(PlayerEvent::Ready).unwrap();
        h.sync.on_player_event(PlayerEvent::Ready).unwrap();
        assert_eq!(h.embedded.seek_count(), 1);
        assert_eq!(h.embedded.position(), 20.0);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_messages_are_not_re_emitted() {
        let mut h = harness();
        h.sync.load(VIDEO).unwrap();
        h.sync
            .apply_remote(&SyncMessage::Control {
                action: ControlAction::Play,
                position: 12.0,
            })
            .unwrap();
        assert!(!h.direct.is_paused());
        assert_eq!(h.direct.position(), 12.0);
        assert!(h.sync.echo_guard_active());
        assert_eq!(h.sync.on_player_event(PlayerEvent::Played).unwrap(), None);
        assert_eq!(h.sync.act(ControlAction::Pause, None).unwrap(), None);

        tokio::time::advance(Duration::from_millis(501)).await;
        assert!(!h.sync.echo_guard_active());
        assert!(h.sync.act(ControlAction::Pause, None).unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn player_events_already_reflected_in_state_are_quiet() {
        let mut h = harness();
        h.sync.load(VIDEO).unwrap();
        let play = h.sync.act(ControlAction::Play, None).unwrap();
        assert!(matches!(
            play,
            Some(SyncMessage::Control {
                action: ControlAction::Play,
                ..
            })
        ));
        assert_eq!(h.sync.on_player_event(PlayerEvent::Played).unwrap(), None);
        let paused = h.sync.on_player_event(PlayerEvent::Paused).unwrap();
        assert!(matches!(
            paused,
            Some(SyncMessage::Control {
                action: ControlAction::Pause,
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn sync_now_reports_position_and_paused() {
        let mut h = harness();
        assert_eq!(h.sync.sync_now(), Err(PlaybackError::NothingLoaded));
        h.sync.load(VIDEO).unwrap();
        h.sync.act(ControlAction::Play, None).unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(
            h.sync.sync_now().unwrap(),
            SyncMessage::SyncNow {
                position: 4.0,
                paused: false
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_load_leaves_nothing_loaded() {
        let mut h = harness();
        h.direct.refuse_loads(true);
        assert!(matches!(h.sync.load(VIDEO), Err(PlaybackError::Player(_))));
        assert_eq!(h.sync.state().mode, PlaybackMode::None);
        assert_eq!(
            h.sync.act(ControlAction::Play, None),
            Err(PlaybackError::NothingLoaded)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reset_returns_to_none() {
        let mut h = harness();
        h.sync.load(EMBED).unwrap();
        h.sync.reset();
        assert_eq!(h.sync.state(), &PlaybackState::default());
        assert!(h.embedded.source().is_none());
    }
}
