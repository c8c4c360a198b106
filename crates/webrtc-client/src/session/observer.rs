//! Notifications from the session to the user interface

use super::SessionState;
use crate::media::{LocalMedia, RemoteStreamEntry};
use crate::peer::ConnectionState;
use crate::signaling::{ChatMessage, ParticipantInfo, RoomInfo};
use tracing::info;

/// Receives what the UI needs to render
///
/// Called on the session task, one notification at a time; implementations
/// should hand work off rather than block.
pub trait SessionObserver: Send + Sync {
    /// Local media is attached and can be previewed
    fn on_local_stream_ready(&self, media: &LocalMedia);

    /// A new remote stream appeared
    fn on_remote_stream_added(&self, entry: &RemoteStreamEntry);

    /// A remote stream went away
    fn on_remote_stream_removed(&self, stream_id: &str);

    /// Session lifecycle moved to `_state`
    fn on_state_changed(&self, _state: SessionState) {}

    /// Someone entered the room
    fn on_participant_joined(&self, _info: &ParticipantInfo) {}

    /// Someone left; their streams are already gone
    fn on_participant_left(&self, _participant_id: &str) {}

    /// Room snapshot received right after joining
    fn on_room_info(&self, _info: &RoomInfo) {}

    /// Chat line from the room
    fn on_chat_message(&self, _message: &ChatMessage) {}

    /// A remote participant started or stopped sharing its screen
    fn on_remote_screen_share(&self, _participant_id: Option<&str>, _active: bool) {}

    /// Our own screen share started or stopped
    fn on_screen_share_changed(&self, _active: bool) {}

    /// Transport state reported by the peer link
    fn on_connection_state(&self, _state: ConnectionState) {}
}

/// Observer that writes every notification to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl SessionObserver for LoggingObserver {
    fn on_local_stream_ready(&self, media: &LocalMedia) {
        info!(stream_id = %media.stream_id, tracks = media.tracks.len(), "Local stream ready");
    }

    fn on_remote_stream_added(&self, entry: &RemoteStreamEntry) {
        info!(
            stream_id = %entry.stream_id,
            participant = ?entry.participant_id,
            "Remote stream added"
        );
    }

    fn on_remote_stream_removed(&self, stream_id: &str) {
        info!(stream_id, "Remote stream removed");
    }

    fn on_state_changed(&self, state: SessionState) {
        info!(%state, "Session state changed");
    }

    fn on_participant_joined(&self, info: &ParticipantInfo) {
        info!(
            username = %info.username,
            participant = ?info.participant_id,
            broadcaster = info.is_broadcaster,
            "Participant joined"
        );
    }

    fn on_participant_left(&self, participant_id: &str) {
        info!(participant = participant_id, "Participant left");
    }

    fn on_room_info(&self, info: &RoomInfo) {
        info!(
            room_id = %info.room_id,
            participants = info.participants.len(),
            "Joined room"
        );
        for message in &info.chat_history {
            self.on_chat_message(message);
        }
    }

    fn on_chat_message(&self, message: &ChatMessage) {
        info!(from = %message.sender_name, "{}", message.content);
    }

    fn on_remote_screen_share(&self, participant_id: Option<&str>, active: bool) {
        info!(participant = ?participant_id, active, "Remote screen share");
    }

    fn on_screen_share_changed(&self, active: bool) {
        info!(active, "Screen share");
    }

    fn on_connection_state(&self, state: ConnectionState) {
        info!(?state, "Peer connection state");
    }
}
