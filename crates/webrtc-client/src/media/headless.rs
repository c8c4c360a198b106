//! Capture source for participants without devices
//!
//! Hands out track descriptors so a headless participant (bots, recorders,
//! the command-line client) can join and negotiate like any other.

use super::{LocalMedia, LocalTrack, MediaSource, TrackKind};
use crate::config::MediaConstraints;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

/// Device-less [`MediaSource`]
#[derive(Debug, Default)]
pub struct HeadlessMediaSource {
    /// Live tracks and their enabled flag
    live: Mutex<HashMap<String, bool>>,
    /// Refuse display capture
    deny_display: bool,
}

impl HeadlessMediaSource {
    /// Source that grants every capture request
    pub fn new() -> Self {
        Self::default()
    }

    /// Source that refuses screen capture
    pub fn without_display() -> Self {
        Self {
            deny_display: true,
            ..Self::default()
        }
    }

    /// Whether a track is live (acquired and not stopped)
    pub fn is_live(&self, track_id: &str) -> bool {
        self.live
            .lock()
            .map(|live| live.contains_key(track_id))
            .unwrap_or(false)
    }

    /// Enabled flag of a live track
    pub fn is_enabled(&self, track_id: &str) -> Option<bool> {
        self.live
            .lock()
            .ok()
            .and_then(|live| live.get(track_id).copied())
    }

    fn register(&self, track: &LocalTrack) -> Result<()> {
        self.live
            .lock()
            .map_err(|_| Error::MediaTrackError("track table poisoned".to_string()))?
            .insert(track.id.clone(), true);
        Ok(())
    }
}

#[async_trait]
impl MediaSource for HeadlessMediaSource {
    async fn acquire_user_media(&self, constraints: &MediaConstraints) -> Result<LocalMedia> {
        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(LocalTrack::new(TrackKind::Audio, "headless microphone"));
        }
        if let Some(video) = constraints.video {
            tracks.push(LocalTrack::new(
                TrackKind::Video,
                format!("headless camera {}x{}", video.width, video.height),
            ));
        }

        for track in &tracks {
            self.register(track)?;
        }
        debug!(tracks = tracks.len(), "Acquired headless user media");

        Ok(LocalMedia {
            stream_id: uuid::Uuid::new_v4().to_string(),
            tracks,
        })
    }

    async fn acquire_display_media(&self) -> Result<LocalTrack> {
        if self.deny_display {
            return Err(Error::PermissionDenied(
                "display capture unavailable".to_string(),
            ));
        }
        let track = LocalTrack::new(TrackKind::Video, "headless screen");
        self.register(&track)?;
        Ok(track)
    }

    fn set_enabled(&self, track: &LocalTrack, enabled: bool) -> Result<()> {
        let mut live = self
            .live
            .lock()
            .map_err(|_| Error::MediaTrackError("track table poisoned".to_string()))?;
        match live.get_mut(&track.id) {
            Some(flag) => {
                *flag = enabled;
                Ok(())
            }
            None => Err(Error::MediaTrackError(format!(
                "Track {} is not live",
                track.id
            ))),
        }
    }

    fn stop_track(&self, track: &LocalTrack) -> Result<()> {
        self.live
            .lock()
            .map_err(|_| Error::MediaTrackError("track table poisoned".to_string()))?
            .remove(&track.id);
        Ok(())
    }
}
