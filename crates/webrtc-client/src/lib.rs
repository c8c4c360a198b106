//! WebRTC room client
//!
//! Joins a room on a WebSocket relay, negotiates one peer link with the other
//! participants and keeps track of local and remote media.
//!
//! # Features
//!
//! - **Relay signaling**: JSON envelopes over WebSocket (offer, answer,
//!   candidates, room events, chat, screen-share announcements)
//! - **Negotiation engine**: explicit offer/answer state machine with collision
//!   handling and candidate queueing
//! - **Track registry**: one track per role, screen sharing that reverts to the
//!   camera, remote streams keyed by stream id
//! - **Session**: single-task event loop driving all of the above
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  UI (SessionObserver / SessionHandle)                │
//! │  ↑ notifications            ↓ commands               │
//! │  Session (one task, one event at a time)             │
//! │  ├─ SignalingClient (WebSocket relay)                │
//! │  ├─ NegotiationEngine                                │
//! │  │   └─ CandidateQueue (remote, local)               │
//! │  ├─ TrackRegistry                                    │
//! │  └─ PeerLink (webrtc-rs RTCPeerConnection)           │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use huddle_webrtc::SessionConfig;
//!
//! let config = SessionConfig::new("wss://relay.example.com/ws", "standup", "alice");
//! assert!(config.validate().is_ok());
//! assert_eq!(config.max_apply_failures, 5);
//! ```
//!
//! ## Async Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use huddle_webrtc::{
//!     Collaborators, HeadlessMediaSource, LoggingObserver, RtcPeerLinkFactory, Session,
//!     SessionConfig, WsConnector,
//! };
//!
//! # async fn example() -> huddle_webrtc::Result<()> {
//! let config = SessionConfig::new("wss://relay.example.com/ws", "standup", "alice");
//! let mut session = Session::new(
//!     config,
//!     Collaborators {
//!         connector: Box::new(WsConnector),
//!         links: Box::new(RtcPeerLinkFactory),
//!         media: Arc::new(HeadlessMediaSource::new()),
//!         observer: Arc::new(LoggingObserver),
//!     },
//! );
//!
//! session.join().await?;
//! session.run().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod media;
pub mod negotiation;
pub mod peer;
pub mod session;
pub mod signaling;

pub use config::{MediaConstraints, RoomType, SessionConfig, TurnServerConfig, VideoConstraints};
pub use error::{Error, Result};
pub use media::{
    HeadlessMediaSource, LocalMedia, LocalTrack, MediaSource, RemoteStreamEntry, RemoteTrack,
    TrackKind, TrackRegistry, TrackRole,
};
pub use negotiation::{GlarePolicy, NegotiationEngine, NegotiationState};
pub use peer::{ConnectionState, PeerEvent, PeerLink, PeerLinkFactory, RtcPeerLinkFactory};
pub use session::{
    Collaborators, LoggingObserver, Session, SessionCommand, SessionEvent, SessionHandle,
    SessionObserver, SessionState,
};
pub use signaling::{SignalingConnector, SignalingMessage, SignalingSink, WsConnector};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
