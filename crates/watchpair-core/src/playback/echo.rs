use std::time::Duration;

use tokio::time::Instant;

/// Suppresses local re-emission while a remote mutation is being applied.
///
/// Arming sets a single deadline; arming again replaces it instead of
/// stacking windows, and the guard lapses on its own once the deadline
/// passes whether or not the player ever confirmed the change.
#[derive(Debug, Clone)]
pub struct EchoGuard {
    window: Duration,
    until: Option<Instant>,
}

impl EchoGuard {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            until: None,
        }
    }

    pub fn arm(&mut self) {
        self.until = Some(Instant::now() + self.window);
    }

    pub fn is_active(&self) -> bool {
        self.until
            .map(|deadline| Instant::now() <= deadline)
            .unwrap_or(false)
    }

    pub fn remaining(&self) -> Duration {
        self.until
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::ZERO)
    }

    pub fn clear(&mut self) {
        self.until = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn lapses_after_the_window() {
        let mut guard = EchoGuard::new(Duration::from_millis(500));
        assert!(!guard.is_active());
        guard.arm();
        assert!(guard.is_active());
        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(guard.is_active(), "still inside the window at the boundary");
        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(!guard.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_reschedules_instead_of_stacking() {
        let mut guard = EchoGuard::new(Duration::from_millis(500));
        guard.arm();
        tokio::time::advance(Duration::from_millis(300)).await;
        guard.arm();
        assert_eq!(guard.remaining(), Duration::from_millis(500));
        tokio::time::advance(Duration::from_millis(501)).await;
        assert!(!guard.is_active());
    }
}
