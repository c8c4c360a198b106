//! Peer link abstraction
//!
//! The session drives one [`PeerLink`] per room. The link wraps a media
//! engine (webrtc-rs in [`connection`]) and reports what happens inside it
//! as [`PeerEvent`]s through the session handle.

pub mod connection;

pub use connection::{RtcPeerLink, RtcPeerLinkFactory};

use crate::config::SessionConfig;
use crate::media::{LocalTrack, RemoteTrack, TrackKind};
use crate::session::SessionHandle;
use crate::signaling::{IceCandidate, SessionDescription};
use crate::Result;
use async_trait::async_trait;

/// Identifier of an outbound sender on the link
pub type SenderId = String;

/// An outbound sender and the track it currently carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderInfo {
    /// Sender id
    pub id: SenderId,
    /// Media kind of the sender
    pub kind: TrackKind,
    /// Id of the track being sent (None while detached)
    pub track_id: Option<String>,
}

/// Transport-level state of the link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not started
    New,
    /// Connectivity checks running
    Connecting,
    /// Media can flow
    Connected,
    /// Connectivity lost, may recover
    Disconnected,
    /// Connectivity checks failed
    Failed,
    /// Link closed
    Closed,
}

/// Something the link reports to the session
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// A local candidate was gathered
    LocalCandidate(IceCandidate),
    /// The media engine wants a new offer (tracks added or removed)
    NegotiationNeeded,
    /// A remote track arrived
    RemoteTrack {
        /// Id of the remote stream the track belongs to
        stream_id: String,
        /// The track
        track: RemoteTrack,
    },
    /// Transport state changed
    ConnectionStateChanged(ConnectionState),
}

/// Media engine collaborator
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Generate an offer
    async fn create_offer(&self) -> Result<SessionDescription>;

    /// Generate an answer to the applied remote offer
    async fn create_answer(&self) -> Result<SessionDescription>;

    /// Apply a local description
    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;

    /// Apply a remote description
    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    /// Withdraw the outstanding local offer
    async fn rollback(&self) -> Result<()>;

    /// Apply a remote candidate
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Start sending `track`; returns the new sender
    async fn add_track(&self, track: &LocalTrack) -> Result<SenderId>;

    /// Current senders
    async fn senders(&self) -> Vec<SenderInfo>;

    /// Swap the track carried by `sender` without renegotiating
    ///
    /// `None` detaches the sender.
    async fn replace_track(&self, sender: &SenderId, track: Option<&LocalTrack>) -> Result<()>;

    /// Tear the link down
    async fn close(&self) -> Result<()>;
}

/// Creates the link for a session
#[async_trait]
pub trait PeerLinkFactory: Send + Sync {
    /// Build a link; its events go to `events`
    async fn create(&self, config: &SessionConfig, events: SessionHandle) -> Result<Box<dyn PeerLink>>;
}
