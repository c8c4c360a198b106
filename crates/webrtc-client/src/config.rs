//! Configuration types for the room client

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration for a room session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Relay WebSocket endpoint (ws:// or wss://)
    pub signaling_url: String,

    /// Room to join
    pub room_id: String,

    /// Local display name
    pub username: String,

    /// Room topology requested from the relay (default: one_to_one)
    pub room_type: RoomType,

    /// Join as the room broadcaster (broadcasting rooms only)
    pub broadcaster: bool,

    /// Announce this participant as a screen-share source
    pub screen_share: bool,

    /// STUN server URLs (at least one required)
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional)
    pub turn_servers: Vec<TurnServerConfig>,

    /// Local media to request on join
    pub media: MediaConstraints,

    /// Consecutive apply failures tolerated before the session gives up (default: 5)
    pub max_apply_failures: u32,

    /// Signaling connect timeout in seconds (default: 10)
    pub connect_timeout_secs: u64,
}

/// TURN server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn: or turns:)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

/// Room topology understood by the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomType {
    /// Two participants at most
    OneToOne,
    /// One broadcaster, many viewers
    Broadcasting,
    /// Screen-sharing room
    ScreenSharing,
}

impl RoomType {
    /// Value of the `type` query parameter
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomType::OneToOne => "one_to_one",
            RoomType::Broadcasting => "broadcasting",
            RoomType::ScreenSharing => "screen_sharing",
        }
    }
}

/// Local media request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConstraints {
    /// Capture microphone audio
    pub audio: bool,

    /// Capture camera video (None disables video)
    pub video: Option<VideoConstraints>,
}

/// Ideal camera resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoConstraints {
    /// Ideal width in pixels
    pub width: u32,
    /// Ideal height in pixels
    pub height: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            signaling_url: "wss://localhost:8443/ws".to_string(),
            room_id: String::new(),
            username: String::new(),
            room_type: RoomType::OneToOne,
            broadcaster: false,
            screen_share: false,
            stun_servers: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
                "stun:stun2.l.google.com:19302".to_string(),
                "stun:stun3.l.google.com:19302".to_string(),
                "stun:stun4.l.google.com:19302".to_string(),
            ],
            turn_servers: Vec::new(),
            media: MediaConstraints::default(),
            max_apply_failures: 5,
            connect_timeout_secs: 10,
        }
    }
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: Some(VideoConstraints {
                width: 1280,
                height: 720,
            }),
        }
    }
}

impl SessionConfig {
    /// Create a configuration for joining `room_id` as `username`
    pub fn new(signaling_url: impl Into<String>, room_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            signaling_url: signaling_url.into(),
            room_id: room_id.into(),
            username: username.into(),
            ..Default::default()
        }
    }

    /// Load a configuration from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        serde_json::from_str(&text).map_err(|e| {
            crate::Error::InvalidConfig(format!(
                "Failed to parse {}: {}",
                path.as_ref().display(),
                e
            ))
        })
    }

    /// Signaling connect timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `signaling_url` is not a WebSocket URL
    /// - `room_id` or `username` is empty
    /// - `stun_servers` is empty or holds a non-STUN URL
    /// - a TURN URL does not start with `turn:`/`turns:`
    /// - `connect_timeout_secs` is zero
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if !self.signaling_url.starts_with("ws://") && !self.signaling_url.starts_with("wss://") {
            return Err(Error::InvalidConfig(format!(
                "signaling_url must start with ws:// or wss://, got {}",
                self.signaling_url
            )));
        }

        if self.room_id.trim().is_empty() {
            return Err(Error::InvalidConfig("room_id is required".to_string()));
        }

        if self.username.trim().is_empty() {
            return Err(Error::InvalidConfig("username is required".to_string()));
        }

        if self.stun_servers.is_empty() {
            return Err(Error::InvalidConfig(
                "At least one STUN server is required".to_string(),
            ));
        }

        if let Some(bad) = self
            .stun_servers
            .iter()
            .find(|url| !url.starts_with("stun:") && !url.starts_with("stuns:"))
        {
            return Err(Error::InvalidConfig(format!(
                "STUN server must start with stun: or stuns:, got {}",
                bad
            )));
        }

        if let Some(bad) = self
            .turn_servers
            .iter()
            .find(|turn| !turn.url.starts_with("turn:") && !turn.url.starts_with("turns:"))
        {
            return Err(Error::InvalidConfig(format!(
                "TURN server must start with turn: or turns:, got {}",
                bad.url
            )));
        }

        if self.connect_timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "connect_timeout_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
