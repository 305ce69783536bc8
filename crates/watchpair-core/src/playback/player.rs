use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::Instant;

use super::source::MediaSource;
use crate::error::PlaybackError;

/// Notifications raised by the underlying player, independent of who caused
/// the change.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    Ready,
    Played,
    Paused,
    Failed(String),
}

/// The player primitive that actually renders media. Positions are seconds.
pub trait MediaPlayer: Send {
    fn load(&mut self, source: &MediaSource) -> Result<(), PlaybackError>;
    fn unload(&mut self);
    fn play(&mut self) -> Result<(), PlaybackError>;
    fn pause(&mut self);
    fn seek(&mut self, position: f64);
    fn position(&self) -> f64;
    /// `None` until metadata is known.
    fn duration(&self) -> Option<f64>;
    fn is_paused(&self) -> bool;
    /// Embedded players become ready asynchronously after `load`.
    fn is_ready(&self) -> bool;
}

#[derive(Debug)]
struct ClockState {
    source: Option<MediaSource>,
    duration: Option<f64>,
    anchor_position: f64,
    playing_since: Option<Instant>,
    ready: bool,
    defer_ready: bool,
    refuse_loads: bool,
    seeks: usize,
}

impl ClockState {
    fn position(&self) -> f64 {
        let elapsed = self
            .playing_since
            .map(|since| since.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        let position = self.anchor_position + elapsed;
        match self.duration {
            Some(duration) => position.min(duration),
            None => position,
        }
    }

    fn freeze(&mut self) {
        self.anchor_position = self.position();
        self.playing_since = None;
    }
}

/// Headless player driven by the tokio clock.
///
/// Clones share state, so a test or a UI can keep a handle while the
/// synchronizer owns another.
#[derive(Debug, Clone)]
pub struct ClockPlayer {
    state: Arc<Mutex<ClockState>>,
}

impl Default for ClockPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockPlayer {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ClockState {
                source: None,
                duration: None,
                anchor_position: 0.0,
                playing_since: None,
                ready: false,
                defer_ready: false,
                refuse_loads: false,
                seeks: 0,
            })),
        }
    }

    /// Readiness is reported only after [`ClockPlayer::mark_ready`], the way
    /// an embedded provider player boots.
    pub fn deferred() -> Self {
        let player = Self::new();
        player.state.lock().defer_ready = true;
        player
    }

    pub fn set_duration(&self, duration: Option<f64>) {
        self.state.lock().duration = duration;
    }

    pub fn mark_ready(&self) {
        self.state.lock().ready = true;
    }

    pub fn refuse_loads(&self, refuse: bool) {
        self.state.lock().refuse_loads = refuse;
    }

    pub fn source(&self) -> Option<MediaSource> {
        self.state.lock().source.clone()
    }

    /// Number of seeks applied to the underlying media.
    pub fn seek_count(&self) -> usize {
        self.state.lock().seeks
    }
}

impl MediaPlayer for ClockPlayer {
    fn load(&mut self, source: &MediaSource) -> Result<(), PlaybackError> {
        let mut state = self.state.lock();
        if state.refuse_loads {
            return Err(PlaybackError::Player(format!(
                "unsupported source {}",
                source.reference()
            )));
        }
        state.source = Some(source.clone());
        state.anchor_position = 0.0;
        state.playing_since = None;
        state.ready = !state.defer_ready;
        Ok(())
    }

    fn unload(&mut self) {
        let mut state = self.state.lock();
        state.source = None;
        state.anchor_position = 0.0;
        state.playing_since = None;
        state.ready = false;
    }

    fn play(&mut self) -> Result<(), PlaybackError> {
        let mut state = self.state.lock();
        if state.source.is_none() {
            return Err(PlaybackError::NothingLoaded);
        }
        if state.playing_since.is_none() {
            state.playing_since = Some(Instant::now());
        }
        Ok(())
    }

    fn pause(&mut self) {
        self.state.lock().freeze();
    }

    fn seek(&mut self, position: f64) {
        let mut state = self.state.lock();
        state.anchor_position = position.max(0.0);
        state.seeks += 1;
        if state.playing_since.is_some() {
            state.playing_since = Some(Instant::now());
        }
    }

    fn position(&self) -> f64 {
        self.state.lock().position()
    }

    fn duration(&self) -> Option<f64> {
        self.state.lock().duration
    }

    fn is_paused(&self) -> bool {
        self.state.lock().playing_since.is_none()
    }

    fn is_ready(&self) -> bool {
        self.state.lock().ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn direct() -> MediaSource {
        MediaSource::classify("https://example.com/video.mp4").unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn position_follows_the_clock_while_playing() {
        let mut player = ClockPlayer::new();
        player.load(&direct()).unwrap();
        player.play().unwrap();
        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(player.position(), 3.0);
        player.pause();
        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(player.position(), 3.0);
        assert!(player.is_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn position_stops_at_duration() {
        let mut player = ClockPlayer::new();
        player.set_duration(Some(5.0));
        player.load(&direct()).unwrap();
        player.seek(4.0);
        player.play().unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(player.position(), 5.0);
    }

    #[test]
    fn deferred_player_waits_for_ready() {
        let mut player = ClockPlayer::deferred();
        player.load(&direct()).unwrap();
        assert!(!player.is_ready());
        player.mark_ready();
        assert!(player.is_ready());
    }
}
