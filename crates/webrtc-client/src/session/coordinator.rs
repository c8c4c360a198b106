//! Session coordinator
//!
//! Owns everything a room session needs (signaling channel, peer link,
//! negotiation engine, track registry) and handles one event at a time on a
//! single task. Collaborators never call into the session directly: relay
//! messages arrive on the inbound stream, everything else is posted to the
//! session's event channel through a [`SessionHandle`].

use super::observer::SessionObserver;
use crate::config::{MediaConstraints, SessionConfig};
use crate::media::{LocalMedia, LocalTrack, MediaSource, TrackRegistry, TrackRole};
use crate::negotiation::{GlarePolicy, LocalMediaAttacher, NegotiationEngine, NegotiationState};
use crate::peer::{ConnectionState, PeerEvent, PeerLink, PeerLinkFactory};
use crate::signaling::{
    ChatMessage, ChatPayload, InboundMessage, InboundStream, SignalingConnector, SignalingMessage,
    SignalingSink,
};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, instrument, warn};

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, not joined yet
    Uninitialized,
    /// Join in progress
    Joining,
    /// In the room
    Active,
    /// Left or failed; terminal
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Joining => "joining",
            SessionState::Active => "active",
            SessionState::Closed => "closed",
        })
    }
}

/// Request from the UI
#[derive(Debug)]
pub enum SessionCommand {
    /// Mute or unmute the microphone; replies with the new enabled flag
    ToggleAudio(oneshot::Sender<Option<bool>>),
    /// Turn the camera off or on; replies with the new enabled flag
    ToggleVideo(oneshot::Sender<Option<bool>>),
    /// Send the screen instead of the camera; replies whether it worked
    ShareScreen(oneshot::Sender<bool>),
    /// Go back to the camera
    StopScreenShare,
    /// Post a chat line to the room
    SendChat(String),
    /// Leave the room
    Leave,
}

/// Everything the session reacts to
#[derive(Debug)]
pub enum SessionEvent {
    /// Message from the relay
    Signaling(InboundMessage),
    /// The relay connection is gone
    SignalingLost(String),
    /// Report from the peer link
    Peer(PeerEvent),
    /// A local track ended outside our control
    TrackEnded {
        /// Id of the ended track
        track_id: String,
    },
    /// UI request
    Command(SessionCommand),
}

/// Cloneable handle for posting events to a session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionHandle {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: SessionEvent) -> Result<()> {
        self.tx
            .send(event)
            .map_err(|_| Error::InvalidState("session has ended".to_string()))
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> SessionCommand) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionEvent::Command(command(tx)))?;
        rx.await
            .map_err(|_| Error::InvalidState("session closed before replying".to_string()))
    }

    /// Post a peer link event; returns false once the session is gone
    pub fn peer_event(&self, event: PeerEvent) -> bool {
        self.send(SessionEvent::Peer(event)).is_ok()
    }

    /// Report a local track that ended on its own
    pub fn track_ended(&self, track_id: impl Into<String>) -> bool {
        self.send(SessionEvent::TrackEnded {
            track_id: track_id.into(),
        })
        .is_ok()
    }

    /// Mute or unmute the microphone
    ///
    /// Returns the new enabled flag, or `None` without a microphone.
    pub async fn toggle_audio(&self) -> Result<Option<bool>> {
        self.request(SessionCommand::ToggleAudio).await
    }

    /// Turn the camera off or on
    pub async fn toggle_video(&self) -> Result<Option<bool>> {
        self.request(SessionCommand::ToggleVideo).await
    }

    /// Share the screen in place of the camera
    ///
    /// `Ok(false)` when capture was refused or there is no video sender.
    pub async fn share_screen(&self) -> Result<bool> {
        self.request(SessionCommand::ShareScreen).await
    }

    /// Stop sharing and go back to the camera
    pub fn stop_screen_share(&self) -> Result<()> {
        self.send(SessionEvent::Command(SessionCommand::StopScreenShare))
    }

    /// Post a chat line to the room
    pub fn send_chat(&self, text: impl Into<String>) -> Result<()> {
        self.send(SessionEvent::Command(SessionCommand::SendChat(text.into())))
    }

    /// Leave the room; `run` returns `Ok(())` once teardown is done
    pub fn leave(&self) -> Result<()> {
        self.send(SessionEvent::Command(SessionCommand::Leave))
    }
}

/// External collaborators of a session
pub struct Collaborators {
    /// Opens the relay connection
    pub connector: Box<dyn SignalingConnector>,
    /// Creates the peer link
    pub links: Box<dyn PeerLinkFactory>,
    /// Captures local media
    pub media: Arc<dyn MediaSource>,
    /// Receives UI notifications
    pub observer: Arc<dyn SessionObserver>,
}

/// Attaches user media on demand while answering
struct LocalMediaBinder<'a> {
    registry: &'a mut TrackRegistry,
    local_media: &'a mut Option<LocalMedia>,
    media: &'a dyn MediaSource,
    observer: &'a dyn SessionObserver,
    constraints: &'a MediaConstraints,
}

#[async_trait]
impl LocalMediaAttacher for LocalMediaBinder<'_> {
    async fn ensure_local_media(&mut self, link: &dyn PeerLink) -> Result<()> {
        if self.local_media.is_some() {
            return Ok(());
        }

        let media = self.media.acquire_user_media(self.constraints).await?;
        attach_user_media(self.registry, link, &media).await?;
        self.observer.on_local_stream_ready(&media);
        *self.local_media = Some(media);
        Ok(())
    }
}

async fn attach_user_media(
    registry: &mut TrackRegistry,
    link: &dyn PeerLink,
    media: &LocalMedia,
) -> Result<()> {
    for track in &media.tracks {
        let role = TrackRole::for_user_media(track.kind);
        if let Some(previous) = registry.attach_local_track(link, role, track.clone()).await? {
            debug!(%role, track_id = %previous.id, "Second user-media track replaced the first");
        }
    }
    Ok(())
}

/// Borrow the link and the sink together, leaving the other fields free
fn connected<'a>(
    link: &'a Option<Box<dyn PeerLink>>,
    sink: &'a Option<Box<dyn SignalingSink>>,
) -> Result<(&'a dyn PeerLink, &'a dyn SignalingSink)> {
    match (link.as_deref(), sink.as_deref()) {
        (Some(link), Some(sink)) => Ok((link, sink)),
        _ => Err(Error::InvalidState(
            "no peer link or signaling channel".to_string(),
        )),
    }
}

/// A participant's session in one room
pub struct Session {
    config: SessionConfig,
    connection_id: String,
    state: SessionState,

    connector: Box<dyn SignalingConnector>,
    links: Box<dyn PeerLinkFactory>,
    media: Arc<dyn MediaSource>,
    observer: Arc<dyn SessionObserver>,

    sink: Option<Box<dyn SignalingSink>>,
    inbound: Option<InboundStream>,
    link: Option<Box<dyn PeerLink>>,
    engine: NegotiationEngine,
    registry: TrackRegistry,
    local_media: Option<LocalMedia>,

    /// Participant whose description was applied last; remote streams are attributed to it
    remote_participant: Option<String>,
    /// Participants that joined after us; their offers win a collision
    late_joiners: HashSet<String>,

    handle: SessionHandle,
    events: mpsc::UnboundedReceiver<SessionEvent>,
}

impl Session {
    /// New session; nothing is connected until [`Session::join`]
    pub fn new(config: SessionConfig, collaborators: Collaborators) -> Self {
        let (handle, events) = SessionHandle::channel();
        let engine = NegotiationEngine::new(config.max_apply_failures);

        Self {
            config,
            connection_id: uuid::Uuid::new_v4().to_string(),
            state: SessionState::Uninitialized,
            connector: collaborators.connector,
            links: collaborators.links,
            media: collaborators.media,
            observer: collaborators.observer,
            sink: None,
            inbound: None,
            link: None,
            engine,
            registry: TrackRegistry::new(),
            local_media: None,
            remote_participant: None,
            late_joiners: HashSet::new(),
            handle,
            events,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// State of the offer/answer exchange
    pub fn negotiation_state(&self) -> NegotiationState {
        self.engine.state()
    }

    /// Negotiation engine, for inspection
    pub fn negotiation(&self) -> &NegotiationEngine {
        &self.engine
    }

    /// Track registry, for inspection
    pub fn registry(&self) -> &TrackRegistry {
        &self.registry
    }

    /// Id generated for this session, used in log fields
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Configuration the session was created with
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Handle for posting events to this session
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state == next {
            return;
        }
        info!(room_id = %self.config.room_id, from = %self.state, to = %next, "Session state transition");
        self.state = next;
        self.observer.on_state_changed(next);
    }

    /// Join the room
    ///
    /// Acquires local media, connects to the relay, creates the peer link,
    /// attaches the local tracks and sends the first offer. On any failure
    /// the session is torn down, ends `Closed` and the error is returned.
    #[instrument(skip(self), fields(room_id = %self.config.room_id, connection_id = %self.connection_id))]
    pub async fn join(&mut self) -> Result<()> {
        if self.state != SessionState::Uninitialized {
            return Err(Error::InvalidState(format!(
                "cannot join from state {}",
                self.state
            )));
        }
        self.set_state(SessionState::Joining);

        match self.try_join().await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!("Join failed: {}", e);
                self.teardown().await;
                Err(e)
            }
        }
    }

    async fn try_join(&mut self) -> Result<()> {
        self.config.validate()?;

        let media = self.media.acquire_user_media(&self.config.media).await?;
        self.local_media = Some(media.clone());

        let channel = self.connector.connect(&self.config).await?;
        self.sink = Some(channel.sink);
        self.inbound = Some(channel.inbound);

        // Stored before attaching tracks; teardown closes whatever is stored
        self.link = Some(self.links.create(&self.config, self.handle.clone()).await?);
        let Some(link) = self.link.as_deref() else {
            return Err(Error::InvalidState("no peer link".to_string()));
        };
        attach_user_media(&mut self.registry, link, &media).await?;

        self.observer.on_local_stream_ready(&media);
        self.set_state(SessionState::Active);

        let (link, sink) = connected(&self.link, &self.sink)?;
        self.engine.on_negotiation_needed(link, sink).await
    }

    /// Handle events until the session closes
    ///
    /// Returns `Ok(())` after a requested leave and the error that ended the
    /// session otherwise.
    #[instrument(skip(self), fields(room_id = %self.config.room_id, connection_id = %self.connection_id))]
    pub async fn run(&mut self) -> Result<()> {
        if self.state != SessionState::Active {
            return Err(Error::InvalidState(format!(
                "cannot run from state {}",
                self.state
            )));
        }
        let mut inbound = self
            .inbound
            .take()
            .ok_or_else(|| Error::InvalidState("inbound stream already taken".to_string()))?;

        loop {
            let event = tokio::select! {
                biased;
                Some(event) = self.events.recv() => event,
                message = inbound.next() => match message {
                    Some(Ok(message)) => SessionEvent::Signaling(message),
                    Some(Err(e)) => SessionEvent::SignalingLost(e.to_string()),
                    None => SessionEvent::SignalingLost("relay closed the connection".to_string()),
                },
            };

            self.dispatch(event).await?;
            if self.state == SessionState::Closed {
                return Ok(());
            }
        }
    }

    /// Handle one event to completion
    ///
    /// Fatal errors tear the session down and are returned; anything else is
    /// logged and absorbed. Events reaching a closed session are ignored.
    pub async fn dispatch(&mut self, event: SessionEvent) -> Result<()> {
        if self.state == SessionState::Closed {
            debug!(?event, "Session closed; ignoring event");
            return Ok(());
        }

        let result = match event {
            SessionEvent::Signaling(message) => self.handle_signaling(message).await,
            SessionEvent::SignalingLost(reason) => Err(Error::SignalingLost(reason)),
            SessionEvent::Peer(event) => self.handle_peer_event(event).await,
            SessionEvent::TrackEnded { track_id } => self.handle_track_ended(&track_id).await,
            SessionEvent::Command(command) => self.handle_command(command).await,
        };

        match result {
            Err(e) if e.is_fatal() => {
                error!(room_id = %self.config.room_id, "Session failed: {}", e);
                self.teardown().await;
                Err(e)
            }
            Err(e) => {
                warn!("Event handling failed: {}", e);
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    async fn handle_signaling(&mut self, inbound: InboundMessage) -> Result<()> {
        let InboundMessage {
            sender_id, message, ..
        } = inbound;
        debug!(kind = message.kind(), sender = ?sender_id, "Handling signaling message");

        match message {
            SignalingMessage::Offer(offer) => {
                let glare = match &sender_id {
                    Some(sender) if self.late_joiners.contains(sender) => GlarePolicy::Yield,
                    _ => GlarePolicy::Drop,
                };
                let answered = self.engine.stats().answers_sent;

                let (link, sink) = connected(&self.link, &self.sink)?;
                let mut binder = LocalMediaBinder {
                    registry: &mut self.registry,
                    local_media: &mut self.local_media,
                    media: self.media.as_ref(),
                    observer: self.observer.as_ref(),
                    constraints: &self.config.media,
                };
                self.engine
                    .on_remote_offer(link, sink, &mut binder, offer, glare)
                    .await?;

                if self.engine.stats().answers_sent > answered {
                    self.remote_participant = sender_id;
                }
                Ok(())
            }
            SignalingMessage::Answer(answer) => {
                let applied = self.engine.stats().answers_received;
                let (link, _) = connected(&self.link, &self.sink)?;
                self.engine.on_remote_answer(link, answer).await?;

                if self.engine.stats().answers_received > applied {
                    self.remote_participant = sender_id;
                }
                Ok(())
            }
            SignalingMessage::IceCandidate(candidate) => {
                let (link, _) = connected(&self.link, &self.sink)?;
                self.engine.on_remote_candidate(link, candidate).await
            }
            SignalingMessage::ParticipantJoined(info) => {
                self.observer.on_participant_joined(&info);
                if let Some(id) = &info.participant_id {
                    self.late_joiners.insert(id.clone());
                }
                let (link, sink) = connected(&self.link, &self.sink)?;
                self.engine.on_participant_joined(link, sink, &info).await
            }
            SignalingMessage::ParticipantLeft(participant) => {
                let id = participant.sender_id;
                self.late_joiners.remove(&id);
                if self.remote_participant.as_deref() == Some(id.as_str()) {
                    self.remote_participant = None;
                }
                for stream_id in self.registry.on_participant_left(&id) {
                    self.observer.on_remote_stream_removed(&stream_id);
                }
                self.observer.on_participant_left(&id);
                Ok(())
            }
            SignalingMessage::RoomInfo(info) => {
                self.observer.on_room_info(&info);
                Ok(())
            }
            SignalingMessage::Chat(ChatPayload::Message(message)) => {
                self.observer.on_chat_message(&message);
                Ok(())
            }
            SignalingMessage::Chat(ChatPayload::Text(content)) => {
                let sender_id = sender_id.unwrap_or_default();
                self.observer.on_chat_message(&ChatMessage {
                    sender_name: sender_id.clone(),
                    sender_id,
                    content,
                    timestamp: 0,
                });
                Ok(())
            }
            SignalingMessage::ScreenShareStart => {
                self.observer
                    .on_remote_screen_share(sender_id.as_deref(), true);
                Ok(())
            }
            SignalingMessage::ScreenShareStop => {
                self.observer
                    .on_remote_screen_share(sender_id.as_deref(), false);
                Ok(())
            }
            SignalingMessage::Error(reason) => Err(Error::RelayRejected(reason)),
        }
    }

    async fn handle_peer_event(&mut self, event: PeerEvent) -> Result<()> {
        match event {
            PeerEvent::LocalCandidate(candidate) => {
                let Some(sink) = self.sink.as_deref() else {
                    return Err(Error::InvalidState("no signaling channel".to_string()));
                };
                self.engine.on_local_candidate(sink, candidate)
            }
            PeerEvent::NegotiationNeeded => {
                let (link, sink) = connected(&self.link, &self.sink)?;
                self.engine.on_negotiation_needed(link, sink).await
            }
            PeerEvent::RemoteTrack { stream_id, track } => {
                let participant = self.remote_participant.clone();
                if self
                    .registry
                    .register_remote_track(&stream_id, track, participant)
                {
                    if let Some(entry) = self.registry.remote_stream(&stream_id) {
                        self.observer.on_remote_stream_added(entry);
                    }
                }
                Ok(())
            }
            PeerEvent::ConnectionStateChanged(state) => {
                if state == ConnectionState::Failed {
                    warn!(room_id = %self.config.room_id, "Peer connection failed");
                }
                self.observer.on_connection_state(state);
                Ok(())
            }
        }
    }

    async fn handle_track_ended(&mut self, track_id: &str) -> Result<()> {
        let Some(link) = self.link.as_deref() else {
            return Ok(());
        };
        if let Some(screen) = self.registry.on_track_ended(link, track_id).await? {
            self.screen_share_stopped(screen)?;
        }
        Ok(())
    }

    fn screen_share_stopped(&self, screen: LocalTrack) -> Result<()> {
        if let Err(e) = self.media.stop_track(&screen) {
            warn!(track_id = %screen.id, "Failed to stop screen track: {}", e);
        }
        self.observer.on_screen_share_changed(false);
        let (_, sink) = connected(&self.link, &self.sink)?;
        sink.send(SignalingMessage::ScreenShareStop)
    }

    async fn handle_command(&mut self, command: SessionCommand) -> Result<()> {
        match command {
            SessionCommand::ToggleAudio(reply) => {
                let _ = reply.send(self.toggle(TrackRole::MicrophoneAudio));
                Ok(())
            }
            SessionCommand::ToggleVideo(reply) => {
                let _ = reply.send(self.toggle(TrackRole::CameraVideo));
                Ok(())
            }
            SessionCommand::ShareScreen(reply) => {
                let result = self.share_screen().await;
                let _ = reply.send(result.is_ok());
                match result {
                    Err(e @ Error::SignalingLost(_)) => Err(e),
                    Err(e) => {
                        warn!("Screen share not started: {}", e);
                        Ok(())
                    }
                    Ok(()) => Ok(()),
                }
            }
            SessionCommand::StopScreenShare => {
                let Some(link) = self.link.as_deref() else {
                    return Ok(());
                };
                if let Some(screen) = self.registry.stop_screen_share(link).await? {
                    self.screen_share_stopped(screen)?;
                }
                Ok(())
            }
            SessionCommand::SendChat(text) => {
                let (_, sink) = connected(&self.link, &self.sink)?;
                sink.send(SignalingMessage::Chat(ChatPayload::Text(text)))
            }
            SessionCommand::Leave => {
                info!(room_id = %self.config.room_id, "Leaving room");
                self.teardown().await;
                Ok(())
            }
        }
    }

    fn toggle(&mut self, role: TrackRole) -> Option<bool> {
        let (track, enabled) = {
            let binding = self.registry.toggle(role)?;
            (binding.track.clone(), binding.enabled)
        };
        if let Err(e) = self.media.set_enabled(&track, enabled) {
            warn!(%role, "Failed to update track: {}", e);
        }
        Some(enabled)
    }

    async fn share_screen(&mut self) -> Result<()> {
        let screen = self.media.acquire_display_media().await?;
        let replaced = self
            .registry
            .binding(TrackRole::ScreenVideo)
            .map(|b| b.track.clone());

        let Some(link) = self.link.as_deref() else {
            let _ = self.media.stop_track(&screen);
            return Err(Error::InvalidState("no peer link".to_string()));
        };
        if let Err(e) = self
            .registry
            .replace_track(link, TrackRole::ScreenVideo, screen.clone())
            .await
        {
            if let Err(stop) = self.media.stop_track(&screen) {
                warn!("Failed to release unused screen track: {}", stop);
            }
            return Err(e);
        }

        if let Some(old) = replaced {
            if let Err(e) = self.media.stop_track(&old) {
                warn!(track_id = %old.id, "Failed to stop previous screen track: {}", e);
            }
        }

        self.observer.on_screen_share_changed(true);
        let (_, sink) = connected(&self.link, &self.sink)?;
        sink.send(SignalingMessage::ScreenShareStart)
    }

    /// Leave without running the event loop
    pub async fn close(&mut self) {
        self.teardown().await;
    }

    /// Release everything; each step is attempted even if an earlier one fails
    async fn teardown(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }

        self.engine.close();

        let mut tracks = self.registry.clear_local();
        if let Some(media) = self.local_media.take() {
            for track in media.tracks {
                if !tracks.iter().any(|t| t.id == track.id) {
                    tracks.push(track);
                }
            }
        }
        for track in &tracks {
            if let Err(e) = self.media.stop_track(track) {
                warn!(track_id = %track.id, "Failed to stop local track: {}", e);
            }
        }

        if let Some(link) = self.link.take() {
            if let Err(e) = link.close().await {
                warn!("Failed to close peer link: {}", e);
            }
        }

        if let Some(sink) = self.sink.take() {
            if let Err(e) = sink.close() {
                warn!("Failed to close signaling channel: {}", e);
            }
        }
        self.inbound = None;

        for entry in self.registry.drain_remote() {
            self.observer.on_remote_stream_removed(&entry.stream_id);
        }
        self.remote_participant = None;
        self.late_joiners.clear();

        self.set_state(SessionState::Closed);
    }
}
