//! Room session test harness
//!
//! Scripted stand-ins for every collaborator of a session:
//! - `MockPeerLink`: records each call, fails on demand
//! - `MockMediaSource`: hands out track descriptors, can refuse capture
//! - `MockConnector` + `RecordingSink`: an in-memory relay
//! - `RecordingObserver`: keeps every UI notification
//!
//! `TestRoom` wires them into a `Session` and keeps handles to all of them so
//! tests can drive events and inspect what happened.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use huddle_webrtc::config::MediaConstraints;
use huddle_webrtc::media::{LocalMedia, LocalTrack, MediaSource, RemoteStreamEntry, TrackKind};
use huddle_webrtc::negotiation::LocalMediaAttacher;
use huddle_webrtc::peer::{ConnectionState, PeerEvent, PeerLink, PeerLinkFactory, SenderId, SenderInfo};
use huddle_webrtc::session::{
    Collaborators, Session, SessionCommand, SessionEvent, SessionHandle, SessionObserver,
    SessionState,
};
use huddle_webrtc::signaling::{
    ChatMessage, IceCandidate, InboundMessage, ParticipantInfo, RoomInfo, SessionDescription,
    SignalingChannel, SignalingConnector, SignalingMessage, SignalingSink,
};
use huddle_webrtc::{Error, Result, SessionConfig};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;

pub const ROOM: &str = "room-1";

/// Valid configuration for a test room
pub fn test_config() -> SessionConfig {
    SessionConfig::new("ws://relay.test/ws", ROOM, "alice")
}

/// Wrap `message` as if the relay had forwarded it from `sender`
pub fn inbound(sender: Option<&str>, message: SignalingMessage) -> InboundMessage {
    InboundMessage {
        sender_id: sender.map(str::to_string),
        room_id: ROOM.to_string(),
        message,
    }
}

pub fn offer(sdp: &str) -> SignalingMessage {
    SignalingMessage::Offer(SessionDescription::offer(sdp))
}

pub fn answer(sdp: &str) -> SignalingMessage {
    SignalingMessage::Answer(SessionDescription::answer(sdp))
}

pub fn candidate(c: &str) -> SignalingMessage {
    SignalingMessage::IceCandidate(IceCandidate::new(c))
}

pub fn joined(id: &str, username: &str) -> SignalingMessage {
    SignalingMessage::ParticipantJoined(ParticipantInfo {
        username: username.to_string(),
        participant_id: Some(id.to_string()),
        is_broadcaster: false,
        is_screen_share: false,
    })
}

// ---------------------------------------------------------------------------
// Peer link
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct LinkState {
    pub calls: Vec<String>,
    pub senders: Vec<SenderInfo>,
    pub offers: u32,
    pub fail_remote_description: bool,
    pub fail_add_track: bool,
    pub fail_replace: bool,
    pub fail_close: bool,
}

/// Clones share state, so a test keeps one while the session owns another
#[derive(Debug, Clone, Default)]
pub struct MockPeerLink {
    state: Arc<Mutex<LinkState>>,
}

impl MockPeerLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut LinkState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn calls(&self) -> Vec<String> {
        self.with(|s| s.calls.clone())
    }

    /// Number of calls starting with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        self.with(|s| s.calls.iter().filter(|c| c.starts_with(prefix)).count())
    }

    pub fn last_call(&self) -> Option<String> {
        self.with(|s| s.calls.last().cloned())
    }

    fn record(&self, call: String) {
        self.with(|s| s.calls.push(call));
    }
}

#[async_trait]
impl PeerLink for MockPeerLink {
    async fn create_offer(&self) -> Result<SessionDescription> {
        self.record("create_offer".to_string());
        let n = self.with(|s| {
            s.offers += 1;
            s.offers
        });
        Ok(SessionDescription::offer(format!("offer-{}", n)))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.record("create_answer".to_string());
        Ok(SessionDescription::answer("answer"))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.record(format!("set_local:{}", description.sdp));
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        self.record(format!("set_remote:{}", description.sdp));
        if self.with(|s| s.fail_remote_description) {
            return Err(Error::SdpError("unparseable description".to_string()));
        }
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        self.record("rollback".to_string());
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.record(format!("add_candidate:{}", candidate.candidate));
        Ok(())
    }

    async fn add_track(&self, track: &LocalTrack) -> Result<SenderId> {
        self.record(format!("add_track:{}", track.id));
        if self.with(|s| s.fail_add_track) {
            return Err(Error::MediaTrackError("transceiver limit reached".to_string()));
        }
        let id = format!("sender-{}", track.kind);
        self.with(|s| {
            s.senders.push(SenderInfo {
                id: id.clone(),
                kind: track.kind,
                track_id: Some(track.id.clone()),
            })
        });
        Ok(id)
    }

    async fn senders(&self) -> Vec<SenderInfo> {
        self.with(|s| s.senders.clone())
    }

    async fn replace_track(&self, sender: &SenderId, track: Option<&LocalTrack>) -> Result<()> {
        let track_id = track.map(|t| t.id.clone());
        self.record(format!(
            "replace_track:{}:{}",
            sender,
            track_id.as_deref().unwrap_or("none")
        ));
        if self.with(|s| s.fail_replace) {
            return Err(Error::MediaTrackError("sender is gone".to_string()));
        }
        self.with(|s| match s.senders.iter_mut().find(|info| &info.id == sender) {
            Some(info) => {
                info.track_id = track_id;
                Ok(())
            }
            None => Err(Error::MediaTrackError(format!("unknown sender {}", sender))),
        })
    }

    async fn close(&self) -> Result<()> {
        self.record("close".to_string());
        if self.with(|s| s.fail_close) {
            return Err(Error::WebRtcError("transport already gone".to_string()));
        }
        Ok(())
    }
}

/// Hands out the shared mock link and keeps the session handle it was given
#[derive(Default)]
pub struct MockLinkFactory {
    pub link: MockPeerLink,
    pub handle: Arc<Mutex<Option<SessionHandle>>>,
}

#[async_trait]
impl PeerLinkFactory for MockLinkFactory {
    async fn create(&self, _config: &SessionConfig, events: SessionHandle) -> Result<Box<dyn PeerLink>> {
        *self.handle.lock().unwrap() = Some(events);
        Ok(Box::new(self.link.clone()))
    }
}

// ---------------------------------------------------------------------------
// Media
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MediaState {
    pub deny_user_media: bool,
    pub deny_display: bool,
    pub user_media_requests: u32,
    pub enabled: HashMap<String, bool>,
    pub stopped: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MockMediaSource {
    state: Arc<Mutex<MediaState>>,
}

impl MockMediaSource {
    pub fn with<R>(&self, f: impl FnOnce(&mut MediaState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn stopped(&self) -> Vec<String> {
        self.with(|s| s.stopped.clone())
    }

    pub fn is_enabled(&self, track_id: &str) -> Option<bool> {
        self.with(|s| s.enabled.get(track_id).copied())
    }
}

#[async_trait]
impl MediaSource for MockMediaSource {
    async fn acquire_user_media(&self, constraints: &MediaConstraints) -> Result<LocalMedia> {
        self.with(|s| s.user_media_requests += 1);
        if self.with(|s| s.deny_user_media) {
            return Err(Error::PermissionDenied("camera and microphone blocked".to_string()));
        }

        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(LocalTrack::new(TrackKind::Audio, "mock microphone"));
        }
        if constraints.video.is_some() {
            tracks.push(LocalTrack::new(TrackKind::Video, "mock camera"));
        }
        self.with(|s| {
            for track in &tracks {
                s.enabled.insert(track.id.clone(), true);
            }
        });

        Ok(LocalMedia {
            stream_id: "local-stream".to_string(),
            tracks,
        })
    }

    async fn acquire_display_media(&self) -> Result<LocalTrack> {
        if self.with(|s| s.deny_display) {
            return Err(Error::PermissionDenied("screen capture cancelled".to_string()));
        }
        let track = LocalTrack::new(TrackKind::Video, "mock screen");
        self.with(|s| s.enabled.insert(track.id.clone(), true));
        Ok(track)
    }

    fn set_enabled(&self, track: &LocalTrack, enabled: bool) -> Result<()> {
        self.with(|s| s.enabled.insert(track.id.clone(), enabled));
        Ok(())
    }

    fn stop_track(&self, track: &LocalTrack) -> Result<()> {
        self.with(|s| s.stopped.push(track.id.clone()));
        Ok(())
    }
}

/// Attacher for driving the engine directly; counts the calls it gets
#[derive(Debug, Default)]
pub struct CountingAttacher {
    pub calls: u32,
    pub fail: bool,
}

#[async_trait]
impl LocalMediaAttacher for CountingAttacher {
    async fn ensure_local_media(&mut self, _link: &dyn PeerLink) -> Result<()> {
        self.calls += 1;
        if self.fail {
            return Err(Error::PermissionDenied("no devices".to_string()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Relay
// ---------------------------------------------------------------------------

/// Outbound half of the in-memory relay
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    sent: Arc<Mutex<Vec<SignalingMessage>>>,
    closed: Arc<AtomicBool>,
}

impl RecordingSink {
    pub fn sent(&self) -> Vec<SignalingMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.sent.lock().unwrap().iter().map(|m| m.kind()).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl SignalingSink for RecordingSink {
    fn send(&self, message: SignalingMessage) -> Result<()> {
        if self.is_closed() {
            return Err(Error::SignalingLost("channel closed".to_string()));
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub type RelayTx = mpsc::UnboundedSender<Result<InboundMessage>>;

/// Connects to the in-memory relay
pub struct MockConnector {
    sink: RecordingSink,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<Result<InboundMessage>>>>,
    refuse: bool,
    pub connects: Arc<AtomicU32>,
}

impl MockConnector {
    pub fn new(sink: RecordingSink) -> (Self, RelayTx) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Self {
            sink,
            inbound: Mutex::new(Some(rx)),
            refuse: false,
            connects: Arc::new(AtomicU32::new(0)),
        };
        (connector, tx)
    }

    pub fn refusing(mut self) -> Self {
        self.refuse = true;
        self
    }
}

#[async_trait]
impl SignalingConnector for MockConnector {
    async fn connect(&self, _config: &SessionConfig) -> Result<SignalingChannel> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.refuse {
            return Err(Error::ConnectionError("connection refused".to_string()));
        }
        let rx = self
            .inbound
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| Error::ConnectionError("already connected".to_string()))?;

        Ok(SignalingChannel {
            sink: Box::new(self.sink.clone()),
            inbound: Box::pin(UnboundedReceiverStream::new(rx)),
        })
    }
}

// ---------------------------------------------------------------------------
// Observer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Observed {
    LocalStreamReady(usize),
    RemoteStreamAdded {
        stream_id: String,
        participant: Option<String>,
    },
    RemoteStreamRemoved(String),
    State(SessionState),
    ParticipantJoined(String),
    ParticipantLeft(String),
    RoomInfo(String),
    Chat { from: String, content: String },
    RemoteScreenShare(Option<String>, bool),
    ScreenShare(bool),
    Connection(ConnectionState),
}

#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<Observed>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<Observed> {
        self.events.lock().unwrap().clone()
    }

    pub fn states(&self) -> Vec<SessionState> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Observed::State(state) => Some(state),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&Observed) -> bool) -> usize {
        self.events().iter().filter(|e| pred(e)).count()
    }

    fn push(&self, event: Observed) {
        self.events.lock().unwrap().push(event);
    }
}

impl SessionObserver for RecordingObserver {
    fn on_local_stream_ready(&self, media: &LocalMedia) {
        self.push(Observed::LocalStreamReady(media.tracks.len()));
    }

    fn on_remote_stream_added(&self, entry: &RemoteStreamEntry) {
        self.push(Observed::RemoteStreamAdded {
            stream_id: entry.stream_id.clone(),
            participant: entry.participant_id.clone(),
        });
    }

    fn on_remote_stream_removed(&self, stream_id: &str) {
        self.push(Observed::RemoteStreamRemoved(stream_id.to_string()));
    }

    fn on_state_changed(&self, state: SessionState) {
        self.push(Observed::State(state));
    }

    fn on_participant_joined(&self, info: &ParticipantInfo) {
        self.push(Observed::ParticipantJoined(info.username.clone()));
    }

    fn on_participant_left(&self, participant_id: &str) {
        self.push(Observed::ParticipantLeft(participant_id.to_string()));
    }

    fn on_room_info(&self, info: &RoomInfo) {
        self.push(Observed::RoomInfo(info.room_id.clone()));
    }

    fn on_chat_message(&self, message: &ChatMessage) {
        self.push(Observed::Chat {
            from: message.sender_name.clone(),
            content: message.content.clone(),
        });
    }

    fn on_remote_screen_share(&self, participant_id: Option<&str>, active: bool) {
        self.push(Observed::RemoteScreenShare(
            participant_id.map(str::to_string),
            active,
        ));
    }

    fn on_screen_share_changed(&self, active: bool) {
        self.push(Observed::ScreenShare(active));
    }

    fn on_connection_state(&self, state: ConnectionState) {
        self.push(Observed::Connection(state));
    }
}

// ---------------------------------------------------------------------------
// Test room
// ---------------------------------------------------------------------------

/// A session wired to mocks, plus handles to every mock
pub struct TestRoom {
    pub session: Session,
    pub link: MockPeerLink,
    pub media: MockMediaSource,
    pub sink: RecordingSink,
    pub observer: Arc<RecordingObserver>,
    pub relay: Option<RelayTx>,
    pub connects: Arc<AtomicU32>,
}

pub struct TestRoomBuilder {
    config: SessionConfig,
    media: MockMediaSource,
    link: MockPeerLink,
    refuse_connect: bool,
}

impl TestRoomBuilder {
    pub fn config(mut self, f: impl FnOnce(&mut SessionConfig)) -> Self {
        f(&mut self.config);
        self
    }

    pub fn deny_user_media(self) -> Self {
        self.media.with(|s| s.deny_user_media = true);
        self
    }

    pub fn deny_display(self) -> Self {
        self.media.with(|s| s.deny_display = true);
        self
    }

    pub fn fail_add_track(self) -> Self {
        self.link.with(|s| s.fail_add_track = true);
        self
    }

    pub fn refuse_connect(mut self) -> Self {
        self.refuse_connect = true;
        self
    }

    pub fn build(self) -> TestRoom {
        let sink = RecordingSink::default();
        let (connector, relay) = MockConnector::new(sink.clone());
        let connector = if self.refuse_connect {
            connector.refusing()
        } else {
            connector
        };
        let connects = connector.connects.clone();
        let observer = Arc::new(RecordingObserver::default());

        let session = Session::new(
            self.config,
            Collaborators {
                connector: Box::new(connector),
                links: Box::new(MockLinkFactory {
                    link: self.link.clone(),
                    ..Default::default()
                }),
                media: Arc::new(self.media.clone()),
                observer: observer.clone(),
            },
        );

        TestRoom {
            session,
            link: self.link,
            media: self.media,
            sink,
            observer,
            relay: Some(relay),
            connects,
        }
    }

    /// Build and join; panics if the join fails
    pub async fn joined(self) -> TestRoom {
        let mut room = self.build();
        room.session.join().await.expect("join failed");
        room
    }
}

impl TestRoom {
    pub fn builder() -> TestRoomBuilder {
        TestRoomBuilder {
            config: test_config(),
            media: MockMediaSource::default(),
            link: MockPeerLink::new(),
            refuse_connect: false,
        }
    }

    /// Dispatch a relay message from `sender`
    pub async fn deliver(&mut self, sender: Option<&str>, message: SignalingMessage) -> Result<()> {
        self.session
            .dispatch(SessionEvent::Signaling(inbound(sender, message)))
            .await
    }

    /// Dispatch a peer link event
    pub async fn peer(&mut self, event: PeerEvent) -> Result<()> {
        self.session.dispatch(SessionEvent::Peer(event)).await
    }

    /// Dispatch a command that replies, and return the reply
    pub async fn request<T>(&mut self, command: impl FnOnce(oneshot::Sender<T>) -> SessionCommand) -> T {
        let (tx, rx) = oneshot::channel();
        self.session
            .dispatch(SessionEvent::Command(command(tx)))
            .await
            .expect("command failed");
        rx.await.expect("no reply")
    }

    /// Dispatch a command without a reply
    pub async fn command(&mut self, command: SessionCommand) -> Result<()> {
        self.session.dispatch(SessionEvent::Command(command)).await
    }

    /// Push a message onto the relay's inbound stream
    pub fn relay_send(&self, sender: Option<&str>, message: SignalingMessage) {
        if let Some(relay) = &self.relay {
            relay.send(Ok(inbound(sender, message))).expect("relay closed");
        }
    }

    /// Drop the relay side, ending the inbound stream
    pub fn hang_up(&mut self) {
        self.relay = None;
    }

    /// Id of the track bound to a role
    pub fn track_id(&self, role: huddle_webrtc::TrackRole) -> Option<String> {
        self.session.registry().binding(role).map(|b| b.track.id.clone())
    }
}
