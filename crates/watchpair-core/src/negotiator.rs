//! Session negotiation: role assignment and the offer/answer/candidate
//! exchange over the room's signaling channel.
//!
//! One [`Negotiator`] owns at most one live session. Starting a new one
//! always releases the previous peer connection and subscription first.
//!
//! Remote descriptions are accepted at most once per session instance. A
//! Caller re-offers whenever a JoinRequest arrives, which covers both "caller
//! first" and "callee first" orderings. When both sides offered, the side
//! with the smaller identity yields and answers instead, and the larger one
//! offers again in case its first offer went out before the partner listened.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use transport_bus::Bus;

use crate::config::SessionConfig;
use crate::error::{PeerError, SessionError};
use crate::events::{ConnectionState, DataChannelState, EventSink, StatusEvent};
use crate::peer::{
    LocalMedia, PeerConfig, PeerConnection, PeerConnector, PeerEvent, PeerLinkState,
};
use crate::protocol::{SessionDescription, SignalBody, SignalEnvelope, SyncMessage};
use crate::room::{LocalIdentity, RoomId};
use crate::signaling::{Inbound, SignalingAdapter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Caller,
    Callee,
}

/// Public view of the live session.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub identity: LocalIdentity,
    pub role: Role,
    pub room: RoomId,
    pub connection_state: ConnectionState,
    pub data_channel_state: DataChannelState,
}

/// Something the negotiator has to react to.
#[derive(Debug)]
pub enum NegotiatorInput {
    Signal(SignalEnvelope),
    Peer(PeerEvent),
    /// Some envelopes were lost to a slow subscription.
    SignalingLagged(u64),
    SignalingClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    PeerHangup,
    SignalingLost,
}

/// What the caller of [`Negotiator::handle`] has to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Continue,
    Sync(SyncMessage),
    Ended(EndReason),
}

struct ActiveSession {
    room: RoomId,
    role: Role,
    state: ConnectionState,
    data_channel: DataChannelState,
    peer: Arc<dyn PeerConnection>,
    peer_events: mpsc::UnboundedReceiver<PeerEvent>,
    signaling: SignalingAdapter,
    remote_applied: bool,
    remote_media_attached: bool,
}

pub struct Negotiator {
    identity: LocalIdentity,
    config: SessionConfig,
    bus: Arc<dyn Bus>,
    connector: Arc<dyn PeerConnector>,
    events: EventSink,
    local_media: Option<LocalMedia>,
    session: Option<ActiveSession>,
    last_state: ConnectionState,
}

impl Negotiator {
    pub fn new(
        identity: LocalIdentity,
        config: SessionConfig,
        bus: Arc<dyn Bus>,
        connector: Arc<dyn PeerConnector>,
        events: EventSink,
    ) -> Self {
        Self {
            identity,
            config,
            bus,
            connector,
            events,
            local_media: None,
            session: None,
            last_state: ConnectionState::Idle,
        }
    }

    pub fn identity(&self) -> &LocalIdentity {
        &self.identity
    }

    pub fn set_local_media(&mut self, media: Option<LocalMedia>) {
        self.local_media = media;
    }

    pub fn has_local_media(&self) -> bool {
        self.local_media.is_some()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.session
            .as_ref()
            .map(|session| session.state)
            .unwrap_or(self.last_state)
    }

    pub fn data_channel_open(&self) -> bool {
        self.session
            .as_ref()
            .map(|session| session.data_channel == DataChannelState::Open)
            .unwrap_or(false)
    }

    pub fn session(&self) -> Option<Session> {
        self.session.as_ref().map(|session| Session {
            identity: self.identity.clone(),
            role: session.role,
            room: session.room.clone(),
            connection_state: session.state,
            data_channel_state: session.data_channel,
        })
    }

    /// Starts a session as Caller and publishes the first Offer.
    pub async fn create_room(&mut self, raw_room: &str) -> Result<(), SessionError> {
        if self.local_media.is_none() {
            return Err(SessionError::MissingLocalMedia);
        }
        let room = RoomId::parse_bounded(raw_room, self.config.room_id_max_len)?;
        self.teardown().await;
        self.start(room.clone(), Role::Caller).await?;
        if let Err(err) = self.send_offer().await {
            self.teardown().await;
            return Err(err.into());
        }
        info!(%room, identity = %self.identity, "room created");
        self.events.notice("Room created. Waiting for partner...");
        Ok(())
    }

    /// Starts a session as Callee and announces it with a JoinRequest.
    pub async fn join_room(&mut self, raw_room: &str) -> Result<(), SessionError> {
        let room = RoomId::parse_bounded(raw_room, self.config.room_id_max_len)?;
        self.teardown().await;
        self.start(room.clone(), Role::Callee).await?;
        self.signal(SignalBody::JoinRequest);
        info!(%room, identity = %self.identity, "joining room");
        self.events.notice("Joining...");
        Ok(())
    }

    /// Notifies the partner, then tears the session down. Returns false when
    /// there was nothing to hang up.
    pub async fn hangup(&mut self) -> bool {
        if self.session.is_none() {
            return false;
        }
        self.signal(SignalBody::Hangup);
        self.teardown().await;
        true
    }

    /// Releases the peer connection and the subscription, leaving the
    /// negotiator Disconnected. No-op without a session.
    pub async fn teardown(&mut self) {
        let Some(room) = self.release().await else {
            return;
        };
        self.last_state = ConnectionState::Disconnected;
        self.events.emit(StatusEvent::Connection {
            room: Some(room),
            state: ConnectionState::Disconnected,
        });
    }

    /// Waits for the next signal or peer event of the live session. Returns
    /// `None` immediately when there is no session.
    pub async fn next_input(&mut self) -> Option<NegotiatorInput> {
        let session = self.session.as_mut()?;
        tokio::select! {
            inbound = session.signaling.recv() => Some(match inbound {
                Some(Inbound::Signal(envelope)) => NegotiatorInput::Signal(envelope),
                Some(Inbound::Lagged(skipped)) => NegotiatorInput::SignalingLagged(skipped),
                None => NegotiatorInput::SignalingClosed,
            }),
            Some(event) = session.peer_events.recv() => Some(NegotiatorInput::Peer(event)),
        }
    }

    pub async fn handle(&mut self, input: NegotiatorInput) -> Outcome {
        match input {
            NegotiatorInput::Signal(envelope) => self.handle_envelope(envelope).await,
            NegotiatorInput::Peer(event) => self.handle_peer_event(event),
            NegotiatorInput::SignalingLagged(skipped) => {
                self.announce_again(skipped).await;
                Outcome::Continue
            }
            NegotiatorInput::SignalingClosed => {
                if self.session.is_none() {
                    return Outcome::Continue;
                }
                warn!(identity = %self.identity, "signaling channel lost; ending session");
                self.teardown().await;
                Outcome::Ended(EndReason::SignalingLost)
            }
        }
    }

    /// Sends a sync message over the data channel, or over signaling while
    /// the data channel is not open. Returns whether it went out.
    pub async fn send_sync(&mut self, message: SyncMessage) -> bool {
        let (peer, channel_open) = match self.session.as_ref() {
            Some(session) => (
                session.peer.clone(),
                session.data_channel == DataChannelState::Open,
            ),
            None => {
                trace!("no session; sync message stays local");
                return false;
            }
        };
        if channel_open {
            match message.to_json() {
                Ok(text) => match peer.send_data(text).await {
                    Ok(()) => return true,
                    Err(err) => {
                        warn!(error = %err, "data channel send failed; falling back to signaling")
                    }
                },
                Err(err) => {
                    warn!(error = %err, "unable to encode sync message");
                    return false;
                }
            }
        }
        self.signal(SignalBody::Sync { message })
    }

    /// Repeats our half of the handshake after signals were lost, so a
    /// dropped Offer or Answer gets produced again.
    async fn announce_again(&mut self, skipped: u64) {
        let Some((role, remote_applied)) = self
            .session
            .as_ref()
            .map(|session| (session.role, session.remote_applied))
        else {
            return;
        };
        if remote_applied {
            debug!(skipped, ?role, "signals lost after negotiation; nothing to repeat");
            return;
        }
        info!(skipped, ?role, "signals lost during negotiation; announcing again");
        match role {
            Role::Caller => {
                if let Err(err) = self.send_offer().await {
                    warn!(error = %err, "re-offer failed");
                }
            }
            Role::Callee => {
                self.signal(SignalBody::JoinRequest);
            }
        }
    }

    async fn handle_envelope(&mut self, envelope: SignalEnvelope) -> Outcome {
        let Some((role, remote_applied)) = self
            .session
            .as_ref()
            .map(|session| (session.role, session.remote_applied))
        else {
            return Outcome::Continue;
        };
        trace!(kind = envelope.body.label(), sender = %envelope.sender, ?role, "signal received");

        match envelope.body {
            SignalBody::JoinRequest => {
                if role != Role::Caller {
                    return Outcome::Continue;
                }
                if remote_applied {
                    info!(sender = %envelope.sender, "partner rejoined; rebuilding peer connection");
                    if let Err(err) = self.restart(Role::Caller).await {
                        warn!(error = %err, "unable to rebuild peer connection");
                        return Outcome::Continue;
                    }
                }
                if let Err(err) = self.send_offer().await {
                    warn!(error = %err, "re-offer failed");
                }
            }
            SignalBody::Offer { description } => match role {
                Role::Callee if remote_applied => {
                    debug!(sender = %envelope.sender, "ignoring offer; remote description already set")
                }
                Role::Callee => self.answer_offer(description).await,
                Role::Caller if self.identity < envelope.sender => {
                    info!(sender = %envelope.sender, "offer collision; yielding to partner");
                    match self.restart(Role::Callee).await {
                        Ok(()) => self.answer_offer(description).await,
                        Err(err) => warn!(error = %err, "unable to switch to callee"),
                    }
                }
                Role::Caller => {
                    // Our earlier offer may have reached nobody; the partner
                    // yields to this one.
                    debug!(sender = %envelope.sender, "ignoring offer while calling; re-offering");
                    if remote_applied {
                        if let Err(err) = self.restart(Role::Caller).await {
                            warn!(error = %err, "unable to rebuild peer connection");
                            return Outcome::Continue;
                        }
                    }
                    if let Err(err) = self.send_offer().await {
                        warn!(error = %err, "re-offer failed");
                    }
                }
            },
            SignalBody::Answer { description } => {
                if role != Role::Caller || remote_applied {
                    debug!(sender = %envelope.sender, "ignoring unexpected answer");
                    return Outcome::Continue;
                }
                let Some(peer) = self.peer() else {
                    return Outcome::Continue;
                };
                match peer.set_remote_description(description).await {
                    Ok(()) => self.mark_remote_applied(),
                    Err(err) => warn!(error = %err, "answer rejected"),
                }
            }
            SignalBody::IceCandidate { candidate } => {
                let Some(peer) = self.peer() else {
                    return Outcome::Continue;
                };
                if let Err(err) = peer.add_ice_candidate(candidate).await {
                    trace!(error = %err, "ignoring rejected ice candidate");
                }
            }
            SignalBody::Hangup => {
                info!(sender = %envelope.sender, "partner hung up");
                self.teardown().await;
                self.events.notice("Partner hung up.");
                return Outcome::Ended(EndReason::PeerHangup);
            }
            SignalBody::Sync { message } => return Outcome::Sync(message),
        }
        Outcome::Continue
    }

    fn handle_peer_event(&mut self, event: PeerEvent) -> Outcome {
        let Some(session) = self.session.as_mut() else {
            return Outcome::Continue;
        };
        match event {
            PeerEvent::LocalCandidate(candidate) => {
                session.signaling.send(SignalBody::IceCandidate { candidate });
            }
            PeerEvent::LinkState(link) => {
                debug!(room = %session.room, ?link, "peer link state changed");
                self.events.emit(StatusEvent::PeerLink(link));
                let next = match link {
                    PeerLinkState::Connected => Some(ConnectionState::Connected),
                    // No teardown here; only a Hangup ends the session.
                    PeerLinkState::Failed => Some(ConnectionState::Disconnected),
                    _ => None,
                };
                if let Some(state) = next.filter(|state| *state != session.state) {
                    session.state = state;
                    self.last_state = state;
                    self.events.emit(StatusEvent::Connection {
                        room: Some(session.room.clone()),
                        state,
                    });
                    if state == ConnectionState::Connected {
                        info!(room = %session.room, role = ?session.role, "peer connected");
                        self.events.notice("Connected to partner.");
                    }
                }
            }
            PeerEvent::RemoteTrack {
                track_id,
                stream_id,
            } => {
                if session.remote_media_attached {
                    trace!(%track_id, "remote media already attached");
                } else {
                    session.remote_media_attached = true;
                    debug!(%track_id, %stream_id, "remote media attached");
                    self.events.emit(StatusEvent::RemoteMedia { stream_id });
                }
            }
            PeerEvent::DataChannelOpen => {
                session.data_channel = DataChannelState::Open;
                self.events
                    .emit(StatusEvent::DataChannel(DataChannelState::Open));
                self.events.notice("Data sync connected!");
            }
            PeerEvent::DataChannelClosed => {
                session.data_channel = DataChannelState::Closed;
                self.events
                    .emit(StatusEvent::DataChannel(DataChannelState::Closed));
            }
            PeerEvent::DataMessage(text) => match SyncMessage::from_json(&text) {
                Ok(message) => return Outcome::Sync(message),
                Err(err) => warn!(error = %err, "dropping malformed data channel message"),
            },
        }
        Outcome::Continue
    }

    async fn start(&mut self, room: RoomId, role: Role) -> Result<(), SessionError> {
        let signaling = SignalingAdapter::open(
            self.bus.clone(),
            room.clone(),
            self.identity.clone(),
            self.events.clone(),
        );
        let (events_tx, peer_events) = mpsc::unbounded_channel();
        let peer_config = PeerConfig {
            ice_servers: self.config.ice_servers.clone(),
        };
        let peer = self
            .connector
            .create_connection(&peer_config, events_tx)
            .await?;
        let prepared = prepare_peer(
            peer.as_ref(),
            self.local_media.as_ref(),
            role,
            &self.config.data_channel_label,
        )
        .await;
        if let Err(err) = prepared {
            peer.close().await;
            return Err(err.into());
        }

        debug!(%room, ?role, identity = %self.identity, "session started");
        self.session = Some(ActiveSession {
            room: room.clone(),
            role,
            state: ConnectionState::Negotiating,
            data_channel: DataChannelState::Closed,
            peer,
            peer_events,
            signaling,
            remote_applied: false,
            remote_media_attached: false,
        });
        self.last_state = ConnectionState::Negotiating;
        self.events.emit(StatusEvent::Connection {
            room: Some(room),
            state: ConnectionState::Negotiating,
        });
        Ok(())
    }

    /// Replaces the live session with a fresh instance in the same room.
    async fn restart(&mut self, role: Role) -> Result<(), SessionError> {
        let Some(room) = self.release().await else {
            return Ok(());
        };
        self.start(room, role).await
    }

    async fn release(&mut self) -> Option<RoomId> {
        let mut session = self.session.take()?;
        session.signaling.close();
        session.peer.close().await;
        if session.data_channel == DataChannelState::Open {
            self.events
                .emit(StatusEvent::DataChannel(DataChannelState::Closed));
        }
        debug!(room = %session.room, role = ?session.role, "session released");
        Some(session.room)
    }

    async fn send_offer(&mut self) -> Result<(), PeerError> {
        let Some(peer) = self.peer() else {
            return Ok(());
        };
        let offer = peer.create_offer().await?;
        peer.set_local_description(offer.clone()).await?;
        self.signal(SignalBody::Offer { description: offer });
        Ok(())
    }

    async fn answer_offer(&mut self, offer: SessionDescription) {
        if let Err(err) = self.try_answer_offer(offer).await {
            warn!(error = %err, "unable to answer offer");
            self.events.notice(format!("Negotiation failed: {err}"));
        }
    }

    async fn try_answer_offer(&mut self, offer: SessionDescription) -> Result<(), PeerError> {
        let Some(peer) = self.peer() else {
            return Ok(());
        };
        peer.set_remote_description(offer).await?;
        self.mark_remote_applied();
        let answer = peer.create_answer().await?;
        peer.set_local_description(answer.clone()).await?;
        self.signal(SignalBody::Answer {
            description: answer,
        });
        Ok(())
    }

    fn mark_remote_applied(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.remote_applied = true;
        }
    }

    fn peer(&self) -> Option<Arc<dyn PeerConnection>> {
        self.session.as_ref().map(|session| session.peer.clone())
    }

    fn signal(&self, body: SignalBody) -> bool {
        self.session
            .as_ref()
            .map(|session| session.signaling.send(body))
            .unwrap_or(false)
    }
}

async fn prepare_peer(
    peer: &dyn PeerConnection,
    media: Option<&LocalMedia>,
    role: Role,
    data_channel_label: &str,
) -> Result<(), PeerError> {
    if let Some(media) = media {
        for track in &media.tracks {
            peer.add_local_track(&media.stream_id, track).await?;
        }
    }
    if role == Role::Caller {
        peer.create_data_channel(data_channel_label).await?;
    }
    Ok(())
}
