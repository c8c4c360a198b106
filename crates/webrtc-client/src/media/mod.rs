//! Local and remote media bookkeeping
//!
//! Capture itself lives behind [`MediaSource`]; this module only tracks which
//! track is bound to which role and which remote streams are on screen.

pub mod headless;
pub mod track_registry;

pub use headless::HeadlessMediaSource;
pub use track_registry::{RemoteStreamEntry, TrackBinding, TrackRegistry};

use crate::config::MediaConstraints;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Media kind of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    /// Audio
    Audio,
    /// Video
    Video,
}

impl TrackKind {
    /// Name as used by the media engine ("audio" / "video")
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a local track is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrackRole {
    /// Camera capture
    CameraVideo,
    /// Microphone capture
    MicrophoneAudio,
    /// Screen capture, sent in place of the camera
    ScreenVideo,
}

impl TrackRole {
    /// Media kind carried by this role
    pub fn kind(&self) -> TrackKind {
        match self {
            TrackRole::CameraVideo | TrackRole::ScreenVideo => TrackKind::Video,
            TrackRole::MicrophoneAudio => TrackKind::Audio,
        }
    }

    /// Role of a user-media track of `kind`
    pub fn for_user_media(kind: TrackKind) -> Self {
        match kind {
            TrackKind::Audio => TrackRole::MicrophoneAudio,
            TrackKind::Video => TrackRole::CameraVideo,
        }
    }

    /// Kebab-case name, as used in logs and error messages
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackRole::CameraVideo => "camera-video",
            TrackRole::MicrophoneAudio => "microphone-audio",
            TrackRole::ScreenVideo => "screen-video",
        }
    }
}

impl fmt::Display for TrackRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle to a locally captured track
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocalTrack {
    /// Track id (unique per capture)
    pub id: String,
    /// Media kind
    pub kind: TrackKind,
    /// Human-readable device label
    pub label: String,
}

impl LocalTrack {
    /// New track with a generated id
    pub fn new(kind: TrackKind, label: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            label: label.into(),
        }
    }
}

/// Result of a user-media request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalMedia {
    /// Id of the local stream the tracks belong to
    pub stream_id: String,
    /// Captured tracks
    pub tracks: Vec<LocalTrack>,
}

impl LocalMedia {
    /// First track of `kind`, if any
    pub fn track(&self, kind: TrackKind) -> Option<&LocalTrack> {
        self.tracks.iter().find(|t| t.kind == kind)
    }
}

/// Track received from the remote side
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteTrack {
    /// Track id as signaled by the remote side
    pub id: String,
    /// Media kind
    pub kind: TrackKind,
}

/// Capture collaborator
///
/// Implementations report tracks that end on their own (the user stops a
/// screen share from the system UI, a device is unplugged) through
/// [`crate::session::SessionHandle::track_ended`].
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Capture camera and/or microphone
    ///
    /// Fails with [`crate::Error::PermissionDenied`] when access is refused.
    async fn acquire_user_media(&self, constraints: &MediaConstraints) -> Result<LocalMedia>;

    /// Capture a display surface
    async fn acquire_display_media(&self) -> Result<LocalTrack>;

    /// Enable or disable (mute) a track without stopping it
    fn set_enabled(&self, track: &LocalTrack, enabled: bool) -> Result<()>;

    /// Stop a track and release the device
    fn stop_track(&self, track: &LocalTrack) -> Result<()>;
}
