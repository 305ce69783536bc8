//! Scriptable in-memory peer connection that records every call.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{MediaTrack, PeerConfig, PeerConnection, PeerConnector, PeerEvent, PeerEventSender};
use crate::error::PeerError;
use crate::protocol::{IceCandidate, SessionDescription};

#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    AddLocalTrack(String),
    CreateDataChannel(String),
    CreateOffer,
    CreateAnswer,
    SetLocalDescription(SessionDescription),
    SetRemoteDescription(SessionDescription),
    AddIceCandidate(IceCandidate),
    SendData(String),
    Close,
}

pub struct MockPeer {
    index: usize,
    config: PeerConfig,
    events: PeerEventSender,
    calls: Mutex<Vec<MockCall>>,
    descriptions: AtomicUsize,
    closed: AtomicBool,
    reject_candidates: AtomicBool,
    fail_sends: AtomicBool,
}

impl MockPeer {
    fn new(index: usize, config: PeerConfig, events: PeerEventSender) -> Self {
        Self {
            index,
            config,
            events,
            calls: Mutex::new(Vec::new()),
            descriptions: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            reject_candidates: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &PeerConfig {
        &self.config
    }

    /// Reports `event` as if the underlying primitive had raised it.
    pub fn emit(&self, event: PeerEvent) -> bool {
        self.events.send(event).is_ok()
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    pub fn remote_descriptions(&self) -> Vec<SessionDescription> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                MockCall::SetRemoteDescription(desc) => Some(desc.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn sent_data(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                MockCall::SendData(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, matcher: impl Fn(&MockCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|call| matcher(call)).count()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Makes `add_ice_candidate` fail the way stale or duplicate candidates do.
    pub fn reject_candidates(&self, reject: bool) {
        self.reject_candidates.store(reject, Ordering::SeqCst);
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    fn record(&self, call: MockCall) {
        self.calls.lock().push(call);
    }

    fn next_sdp(&self, kind: &str) -> String {
        let n = self.descriptions.fetch_add(1, Ordering::SeqCst);
        format!("mock-{kind}-{}-{n}", self.index)
    }

    fn ensure_open(&self) -> Result<(), PeerError> {
        if self.is_closed() {
            Err(PeerError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PeerConnection for MockPeer {
    async fn add_local_track(&self, _stream_id: &str, track: &MediaTrack) -> Result<(), PeerError> {
        self.ensure_open()?;
        self.record(MockCall::AddLocalTrack(track.id.clone()));
        Ok(())
    }

    async fn create_data_channel(&self, label: &str) -> Result<(), PeerError> {
        self.ensure_open()?;
        self.record(MockCall::CreateDataChannel(label.to_string()));
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
        self.ensure_open()?;
        self.record(MockCall::CreateOffer);
        Ok(SessionDescription::offer(self.next_sdp("offer")))
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
        self.ensure_open()?;
        self.record(MockCall::CreateAnswer);
        Ok(SessionDescription::answer(self.next_sdp("answer")))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), PeerError> {
        self.ensure_open()?;
        self.record(MockCall::SetLocalDescription(description));
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), PeerError> {
        self.ensure_open()?;
        self.record(MockCall::SetRemoteDescription(description));
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        self.ensure_open()?;
        self.record(MockCall::AddIceCandidate(candidate.clone()));
        if self.reject_candidates.load(Ordering::SeqCst) {
            return Err(PeerError::Candidate(format!(
                "duplicate candidate {}",
                candidate.candidate
            )));
        }
        Ok(())
    }

    async fn send_data(&self, text: String) -> Result<(), PeerError> {
        self.ensure_open()?;
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(PeerError::DataChannel("send rejected".into()));
        }
        self.record(MockCall::SendData(text));
        Ok(())
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.record(MockCall::Close);
        }
    }
}

/// Hands out [`MockPeer`]s and keeps every one it created.
#[derive(Clone, Default)]
pub struct MockConnector {
    peers: Arc<Mutex<Vec<Arc<MockPeer>>>>,
    fail_next: Arc<AtomicBool>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn peers(&self) -> Vec<Arc<MockPeer>> {
        self.peers.lock().clone()
    }

    pub fn last(&self) -> Option<Arc<MockPeer>> {
        self.peers.lock().last().cloned()
    }

    pub fn live_count(&self) -> usize {
        self.peers.lock().iter().filter(|peer| !peer.is_closed()).count()
    }

    /// The next `create_connection` fails once.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl PeerConnector for MockConnector {
    async fn create_connection(
        &self,
        config: &PeerConfig,
        events: PeerEventSender,
    ) -> Result<Arc<dyn PeerConnection>, PeerError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(PeerError::Setup("mock connector refused".into()));
        }
        let mut peers = self.peers.lock();
        let peer = Arc::new(MockPeer::new(peers.len(), config.clone(), events));
        peers.push(peer.clone());
        Ok(peer)
    }
}
