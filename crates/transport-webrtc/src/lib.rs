//! `PeerConnector` backed by the `webrtc` crate.
//!
//! Every callback the peer connection raises is forwarded as a
//! [`PeerEvent`] on the channel handed over at construction. The answering
//! side adopts whatever data channel the offering side opens.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};
use watchpair_core::peer::{
    MediaTrack, PeerConfig, PeerConnection, PeerConnector, PeerEvent, PeerEventSender,
    PeerLinkState, TrackKind,
};
use watchpair_core::{IceCandidate, PeerError, SdpKind, SessionDescription};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8, MediaEngine};
use webrtc::api::{API, APIBuilder};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

fn build_api() -> Result<API, PeerError> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(|err| PeerError::Setup(err.to_string()))?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)
        .map_err(|err| PeerError::Setup(err.to_string()))?;

    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

fn rtc_configuration(config: &PeerConfig) -> RTCConfiguration {
    let ice_servers = if config.ice_servers.is_empty() {
        Vec::new()
    } else {
        vec![RTCIceServer {
            urls: config.ice_servers.clone(),
            ..Default::default()
        }]
    };
    RTCConfiguration {
        ice_servers,
        ..Default::default()
    }
}

pub(crate) fn to_rtc_description(
    description: &SessionDescription,
) -> Result<RTCSessionDescription, PeerError> {
    let sdp = description.sdp.clone();
    match description.kind {
        SdpKind::Offer => RTCSessionDescription::offer(sdp),
        SdpKind::Answer => RTCSessionDescription::answer(sdp),
    }
    .map_err(|err| PeerError::Description(err.to_string()))
}

pub(crate) fn from_rtc_description(
    description: &RTCSessionDescription,
) -> Result<SessionDescription, PeerError> {
    let kind = match description.sdp_type {
        RTCSdpType::Offer => SdpKind::Offer,
        RTCSdpType::Answer => SdpKind::Answer,
        other => {
            return Err(PeerError::Description(format!(
                "unsupported description type {other}"
            )));
        }
    };
    Ok(SessionDescription {
        kind,
        sdp: description.sdp.clone(),
    })
}

pub(crate) fn to_candidate_init(candidate: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_mline_index,
        username_fragment: candidate.username_fragment,
    }
}

pub(crate) fn from_candidate_init(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

pub(crate) fn link_state(state: RTCPeerConnectionState) -> Option<PeerLinkState> {
    match state {
        RTCPeerConnectionState::Connecting => Some(PeerLinkState::Connecting),
        RTCPeerConnectionState::Connected => Some(PeerLinkState::Connected),
        RTCPeerConnectionState::Disconnected => Some(PeerLinkState::Disconnected),
        RTCPeerConnectionState::Failed => Some(PeerLinkState::Failed),
        RTCPeerConnectionState::Closed => Some(PeerLinkState::Closed),
        RTCPeerConnectionState::New | RTCPeerConnectionState::Unspecified => None,
    }
}

fn codec_for(kind: TrackKind) -> RTCRtpCodecCapability {
    match kind {
        TrackKind::Audio => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: 48_000,
            channels: 2,
            ..Default::default()
        },
        TrackKind::Video => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_owned(),
            clock_rate: 90_000,
            ..Default::default()
        },
    }
}

/// Hooks a data channel's lifecycle and messages up to `events`.
fn wire_data_channel(channel: &Arc<RTCDataChannel>, events: &PeerEventSender) {
    let label = channel.label().to_string();

    let open_events = events.clone();
    let open_label = label.clone();
    channel.on_open(Box::new(move || {
        Box::pin(async move {
            debug!(label = %open_label, "data channel open");
            let _ = open_events.send(PeerEvent::DataChannelOpen);
        })
    }));

    let close_events = events.clone();
    channel.on_close(Box::new(move || {
        let events = close_events.clone();
        let label = label.clone();
        Box::pin(async move {
            debug!(%label, "data channel closed");
            let _ = events.send(PeerEvent::DataChannelClosed);
        })
    }));

    let message_events = events.clone();
    channel.on_message(Box::new(move |message: DataChannelMessage| {
        let events = message_events.clone();
        Box::pin(async move {
            if !message.is_string {
                trace!(bytes = message.data.len(), "ignoring binary data channel message");
                return;
            }
            match String::from_utf8(message.data.to_vec()) {
                Ok(text) => {
                    let _ = events.send(PeerEvent::DataMessage(text));
                }
                Err(err) => warn!(error = %err, "dropping non utf-8 data channel message"),
            }
        })
    }));
}

/// One `RTCPeerConnection` plus the data channel it created or adopted.
pub struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
    channel: Arc<Mutex<Option<Arc<RTCDataChannel>>>>,
    events: PeerEventSender,
}

impl WebRtcPeer {
    fn new(pc: RTCPeerConnection, events: PeerEventSender) -> Self {
        let peer = Self {
            pc: Arc::new(pc),
            channel: Arc::new(Mutex::new(None)),
            events,
        };
        peer.install_handlers();
        peer
    }

    fn install_handlers(&self) {
        let candidate_events = self.events.clone();
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let events = candidate_events.clone();
                Box::pin(async move {
                    // `None` marks the end of gathering.
                    let Some(candidate) = candidate else {
                        return;
                    };
                    match candidate.to_json() {
                        Ok(init) => {
                            let _ = events.send(PeerEvent::LocalCandidate(from_candidate_init(init)));
                        }
                        Err(err) => warn!(error = %err, "unable to serialize local candidate"),
                    }
                })
            }));

        let state_events = self.events.clone();
        self.pc
            .on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                let events = state_events.clone();
                Box::pin(async move {
                    debug!(?state, "peer connection state changed");
                    if let Some(link) = link_state(state) {
                        let _ = events.send(PeerEvent::LinkState(link));
                    }
                })
            }));

        let track_events = self.events.clone();
        self.pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let events = track_events.clone();
                Box::pin(async move {
                    let _ = events.send(PeerEvent::RemoteTrack {
                        track_id: track.id(),
                        stream_id: track.stream_id(),
                    });
                })
            },
        ));

        let adopt_events = self.events.clone();
        let adopted = self.channel.clone();
        self.pc
            .on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
                let events = adopt_events.clone();
                let adopted = adopted.clone();
                Box::pin(async move {
                    debug!(label = %channel.label(), "adopting remote data channel");
                    wire_data_channel(&channel, &events);
                    *adopted.lock() = Some(channel);
                })
            }));
    }

    fn open_channel(&self) -> Result<Arc<RTCDataChannel>, PeerError> {
        let channel = self
            .channel
            .lock()
            .clone()
            .ok_or_else(|| PeerError::DataChannel("no data channel".into()))?;
        if channel.ready_state() != RTCDataChannelState::Open {
            return Err(PeerError::DataChannel(format!(
                "data channel is {}",
                channel.ready_state()
            )));
        }
        Ok(channel)
    }
}

#[async_trait]
impl PeerConnection for WebRtcPeer {
    async fn add_local_track(&self, stream_id: &str, track: &MediaTrack) -> Result<(), PeerError> {
        let local = Arc::new(TrackLocalStaticSample::new(
            codec_for(track.kind),
            track.id.clone(),
            stream_id.to_string(),
        ));
        self.pc
            .add_track(local as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|err| PeerError::Setup(err.to_string()))?;
        Ok(())
    }

    async fn create_data_channel(&self, label: &str) -> Result<(), PeerError> {
        let init = RTCDataChannelInit {
            ordered: Some(true),
            ..Default::default()
        };
        let channel = self
            .pc
            .create_data_channel(label, Some(init))
            .await
            .map_err(|err| PeerError::DataChannel(err.to_string()))?;
        wire_data_channel(&channel, &self.events);
        *self.channel.lock() = Some(channel);
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|err| PeerError::Description(err.to_string()))?;
        from_rtc_description(&offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|err| PeerError::Description(err.to_string()))?;
        from_rtc_description(&answer)
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), PeerError> {
        self.pc
            .set_local_description(to_rtc_description(&description)?)
            .await
            .map_err(|err| PeerError::Description(err.to_string()))
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), PeerError> {
        self.pc
            .set_remote_description(to_rtc_description(&description)?)
            .await
            .map_err(|err| PeerError::Description(err.to_string()))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        self.pc
            .add_ice_candidate(to_candidate_init(candidate))
            .await
            .map_err(|err| PeerError::Candidate(err.to_string()))
    }

    async fn send_data(&self, text: String) -> Result<(), PeerError> {
        let channel = self.open_channel()?;
        channel
            .send_text(text)
            .await
            .map(|_| ())
            .map_err(|err| PeerError::DataChannel(err.to_string()))
    }

    async fn close(&self) {
        let channel = self.channel.lock().take();
        if let Some(channel) = channel {
            if let Err(err) = channel.close().await {
                trace!(error = %err, "data channel close");
            }
        }
        if let Err(err) = self.pc.close().await {
            debug!(error = %err, "peer connection close");
        }
    }
}

/// Builds [`WebRtcPeer`]s from one shared `webrtc` API instance.
pub struct WebRtcConnector {
    api: API,
}

impl WebRtcConnector {
    pub fn new() -> Result<Self, PeerError> {
        Ok(Self { api: build_api()? })
    }
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    async fn create_connection(
        &self,
        config: &PeerConfig,
        events: PeerEventSender,
    ) -> Result<Arc<dyn PeerConnection>, PeerError> {
        let pc = self
            .api
            .new_peer_connection(rtc_configuration(config))
            .await
            .map_err(|err| PeerError::Setup(err.to_string()))?;
        debug!(ice_servers = config.ice_servers.len(), "peer connection created");
        Ok(Arc::new(WebRtcPeer::new(pc, events)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    const MINIMAL_SDP: &str = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n";

    #[test]
    fn descriptions_keep_kind_and_sdp() {
        let offer = SessionDescription::offer(MINIMAL_SDP);
        let rtc = to_rtc_description(&offer).unwrap();
        assert_eq!(rtc.sdp_type, RTCSdpType::Offer);
        assert_eq!(from_rtc_description(&rtc).unwrap(), offer);

        let answer = to_rtc_description(&SessionDescription::answer(MINIMAL_SDP)).unwrap();
        assert_eq!(answer.sdp_type, RTCSdpType::Answer);
    }

    #[test]
    fn pranswer_is_not_a_session_description() {
        let rtc = RTCSessionDescription::pranswer(MINIMAL_SDP.into()).unwrap();
        assert!(matches!(
            from_rtc_description(&rtc),
            Err(PeerError::Description(_))
        ));
    }

    #[test]
    fn candidates_keep_every_field() {
        let candidate = IceCandidate {
            candidate: "candidate:1 1 udp 2122260223 10.0.0.2 50000 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: Some("abcd".into()),
        };
        assert_eq!(
            from_candidate_init(to_candidate_init(candidate.clone())),
            candidate
        );
    }

    #[test]
    fn only_meaningful_link_states_are_reported() {
        assert_eq!(link_state(RTCPeerConnectionState::New), None);
        assert_eq!(
            link_state(RTCPeerConnectionState::Failed),
            Some(PeerLinkState::Failed)
        );
        assert_eq!(
            link_state(RTCPeerConnectionState::Connected),
            Some(PeerLinkState::Connected)
        );
    }

    #[test]
    fn empty_server_list_means_host_candidates_only() {
        assert!(rtc_configuration(&PeerConfig::default()).ice_servers.is_empty());
        let config = rtc_configuration(&PeerConfig {
            ice_servers: vec!["stun:stun.example.org:3478".into()],
        });
        assert_eq!(config.ice_servers[0].urls, vec!["stun:stun.example.org:3478"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    #[ignore = "opens UDP sockets"]
    async fn data_channel_opens_between_two_local_peers() {
        let connector = WebRtcConnector::new().unwrap();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let a = connector
            .create_connection(&PeerConfig::default(), tx_a)
            .await
            .unwrap();
        let b = connector
            .create_connection(&PeerConfig::default(), tx_b)
            .await
            .unwrap();

        a.create_data_channel("movie-sync").await.unwrap();
        let offer = a.create_offer().await.unwrap();
        a.set_local_description(offer.clone()).await.unwrap();
        b.set_remote_description(offer).await.unwrap();
        let answer = b.create_answer().await.unwrap();
        b.set_local_description(answer.clone()).await.unwrap();
        a.set_remote_description(answer).await.unwrap();

        let (mut a_open, mut b_open) = (false, false);
        let exchange = async {
            while !(a_open && b_open) {
                tokio::select! {
                    Some(event) = rx_a.recv() => match event {
                        PeerEvent::LocalCandidate(c) => { let _ = b.add_ice_candidate(c).await; }
                        PeerEvent::DataChannelOpen => a_open = true,
                        _ => {}
                    },
                    Some(event) = rx_b.recv() => match event {
                        PeerEvent::LocalCandidate(c) => { let _ = a.add_ice_candidate(c).await; }
                        PeerEvent::DataChannelOpen => b_open = true,
                        _ => {}
                    },
                }
            }
        };
        timeout(Duration::from_secs(10), exchange).await.unwrap();

        a.send_data("{\"type\":\"sync_now\",\"position\":1.0,\"paused\":true}".into())
            .await
            .unwrap();
        let received = timeout(Duration::from_secs(5), async {
            loop {
                if let Some(PeerEvent::DataMessage(text)) = rx_b.recv().await {
                    return text;
                }
            }
        })
        .await
        .unwrap();
        assert!(received.contains("sync_now"));

        a.close().await;
        b.close().await;
    }
}
