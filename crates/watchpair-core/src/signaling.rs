//! Room-scoped adapter over the signaling bus.
//!
//! Outbound envelopes are stamped with the local identity and room; inbound
//! envelopes from ourselves or from another room never reach the caller.
//! Publish failures stop here and become a status event.

use std::sync::Arc;

use tracing::{debug, trace, warn};
use transport_bus::{Bus, BusError, Subscription};

use crate::events::{EventSink, StatusEvent};
use crate::protocol::{SignalBody, SignalEnvelope};
use crate::room::{LocalIdentity, RoomId};

/// What [`SignalingAdapter::recv`] hands back.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Signal(SignalEnvelope),
    /// The subscriber fell behind and `skipped` envelopes were lost.
    Lagged(u64),
}

pub struct SignalingAdapter {
    bus: Arc<dyn Bus>,
    room: RoomId,
    identity: LocalIdentity,
    channel: String,
    subscription: Subscription,
    events: EventSink,
}

impl SignalingAdapter {
    pub fn open(
        bus: Arc<dyn Bus>,
        room: RoomId,
        identity: LocalIdentity,
        events: EventSink,
    ) -> Self {
        let channel = room.channel_name();
        let subscription = bus.subscribe(&channel);
        debug!(%room, %identity, channel = %channel, "signaling channel opened");
        Self {
            bus,
            room,
            identity,
            channel,
            subscription,
            events,
        }
    }

    /// Publishes `body` to the room. Returns whether the publish went out.
    pub fn send(&self, body: SignalBody) -> bool {
        let kind = body.label();
        let envelope = SignalEnvelope {
            room: self.room.clone(),
            sender: self.identity.clone(),
            body,
        };
        let result = if self.subscription.is_closed() {
            Err(BusError::Closed)
        } else {
            envelope
                .to_bytes()
                .map_err(|err| BusError::Transport(err.to_string()))
                .and_then(|payload| self.bus.publish(&self.channel, payload))
        };
        match result {
            Ok(delivered) => {
                trace!(room = %self.room, kind, delivered, "signal published");
                true
            }
            Err(err) => {
                warn!(room = %self.room, kind, error = %err, "signal publish failed");
                self.events.emit(StatusEvent::SignalingSendFailed {
                    reason: format!("{kind}: {err}"),
                });
                false
            }
        }
    }

    /// Next envelope addressed to this participant, a lag report, or `None`
    /// once the subscription is closed.
    pub async fn recv(&mut self) -> Option<Inbound> {
        loop {
            let message = match self.subscription.recv().await {
                Ok(message) => message,
                Err(BusError::Lagged(skipped)) => {
                    warn!(room = %self.room, skipped, "signaling subscriber lagged");
                    self.events.emit(StatusEvent::SignalingLagged { skipped });
                    return Some(Inbound::Lagged(skipped));
                }
                Err(_) => return None,
            };
            let envelope = match SignalEnvelope::from_slice(&message.payload) {
                Ok(envelope) => envelope,
                Err(err) => {
                    warn!(room = %self.room, error = %err, "dropping malformed signal");
                    continue;
                }
            };
            if envelope.sender == self.identity {
                continue;
            }
            if envelope.room != self.room {
                trace!(expected = %self.room, got = %envelope.room, "ignoring signal for another room");
                continue;
            }
            return Some(Inbound::Signal(envelope));
        }
    }

    /// Unsubscribes. Idempotent.
    pub fn close(&mut self) {
        if !self.subscription.is_closed() {
            debug!(room = %self.room, "signaling channel closed");
        }
        self.subscription.close();
    }
}

impl Drop for SignalingAdapter {
    fn drop(&mut self) {
        self.subscription.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Duration;
    use tokio::time::timeout;
    use transport_bus::LocalBus;

    fn adapter(bus: &Arc<LocalBus>, room: &str, id: &str) -> SignalingAdapter {
        SignalingAdapter::open(
            bus.clone(),
            RoomId::parse(room).unwrap(),
            LocalIdentity::from_string(id),
            EventSink::new(),
        )
    }

    #[tokio::test]
    async fn own_envelopes_are_never_delivered_back() {
        let bus = Arc::new(LocalBus::new());
        let mut a = adapter(&bus, "abc", "peer_a");
        let mut b = adapter(&bus, "abc", "peer_b");

        assert!(a.send(SignalBody::JoinRequest));

        let got = timeout(Duration::from_millis(50), b.recv()).await.unwrap();
        assert!(matches!(
            got,
            Some(Inbound::Signal(SignalEnvelope {
                body: SignalBody::JoinRequest,
                ..
            }))
        ));
        assert!(timeout(Duration::from_millis(50), a.recv()).await.is_err());
    }

    #[tokio::test]
    async fn envelopes_for_another_room_are_ignored() {
        let bus = Arc::new(LocalBus::new());
        let mut b = adapter(&bus, "abc", "peer_b");
        let stray = SignalEnvelope {
            room: RoomId::parse("xyz").unwrap(),
            sender: LocalIdentity::from_string("peer_a"),
            body: SignalBody::Hangup,
        };
        bus.publish("room-abc", stray.to_bytes().unwrap()).unwrap();
        bus.publish("room-abc", Bytes::from_static(b"not json")).unwrap();
        assert!(timeout(Duration::from_millis(50), b.recv()).await.is_err());
    }

    #[tokio::test]
    async fn send_after_close_surfaces_a_status_event() {
        let bus = Arc::new(LocalBus::new());
        let events = EventSink::new();
        let mut statuses = events.subscribe();
        let mut a = SignalingAdapter::open(
            bus.clone(),
            RoomId::parse("abc").unwrap(),
            LocalIdentity::from_string("peer_a"),
            events,
        );
        a.close();
        a.close();
        assert!(!a.send(SignalBody::Hangup));
        assert!(matches!(
            statuses.recv().await.unwrap(),
            StatusEvent::SignalingSendFailed { .. }
        ));
        assert_eq!(a.recv().await, None);
    }

    #[tokio::test]
    async fn falling_behind_is_reported_once_then_delivery_resumes() {
        let bus = Arc::new(LocalBus::new());
        let events = EventSink::new();
        let mut statuses = events.subscribe();
        let mut b = SignalingAdapter::open(
            bus.clone(),
            RoomId::parse("abc").unwrap(),
            LocalIdentity::from_string("peer_b"),
            events,
        );
        let a = adapter(&bus, "abc", "peer_a");
        for _ in 0..70 {
            assert!(a.send(SignalBody::JoinRequest));
        }

        assert_eq!(b.recv().await, Some(Inbound::Lagged(6)));
        assert_eq!(
            statuses.recv().await.unwrap(),
            StatusEvent::SignalingLagged { skipped: 6 }
        );
        assert!(matches!(b.recv().await, Some(Inbound::Signal(_))));
    }
}
