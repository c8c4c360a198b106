//! Error types for the room client

use crate::media::TrackRole;
use crate::negotiation::NegotiationState;

/// Result type alias using the room client Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while joining a room or negotiating the peer link
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Media access was refused by the capture layer
    #[error("Media permission denied: {0}")]
    PermissionDenied(String),

    /// The signaling channel could not be opened
    #[error("Signaling connection failed: {0}")]
    ConnectionError(String),

    /// The signaling channel was lost after it had been opened
    #[error("Signaling channel lost: {0}")]
    SignalingLost(String),

    /// A negotiation message arrived in a state that cannot accept it
    #[error("Negotiation collision: {operation} while {state}")]
    NegotiationCollision {
        /// Operation that was refused
        operation: &'static str,
        /// Negotiation state at the time
        state: NegotiationState,
    },

    /// A session description from the remote side could not be applied
    #[error("Failed to apply session description: {0}")]
    ApplyDescriptionFailed(String),

    /// An address candidate from the remote side could not be applied
    #[error("Failed to apply ICE candidate: {0}")]
    ApplyCandidateFailed(String),

    /// Too many consecutive apply failures; the link is considered unusable
    #[error("Giving up after {0} consecutive negotiation failures")]
    ApplyFailuresExceeded(u32),

    /// Track replacement requested with no sender for that kind of track
    #[error("No active sender for {0}")]
    NoActiveSender(TrackRole),

    /// The relay refused the participant (room full, broadcaster taken, ...)
    #[error("Relay rejected participant: {0}")]
    RelayRejected(String),

    /// Operation not valid in the current session state
    #[error("Invalid session state: {0}")]
    InvalidState(String),

    /// SDP negotiation error reported by the media engine
    #[error("SDP negotiation error: {0}")]
    SdpError(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    /// Media track error
    #[error("Media track error: {0}")]
    MediaTrackError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error ends the session
    ///
    /// Join-time and transport failures are fatal; negotiation anomalies are
    /// absorbed by the negotiation engine and never reach this check.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::PermissionDenied(_)
                | Error::ConnectionError(_)
                | Error::SignalingLost(_)
                | Error::ApplyFailuresExceeded(_)
                | Error::RelayRejected(_)
        )
    }

    /// Check if the session can carry on after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::NegotiationCollision { .. }
                | Error::ApplyDescriptionFailed(_)
                | Error::ApplyCandidateFailed(_)
                | Error::NoActiveSender(_)
                | Error::SdpError(_)
                | Error::MediaTrackError(_)
                | Error::SerializationError(_)
        )
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }
}
