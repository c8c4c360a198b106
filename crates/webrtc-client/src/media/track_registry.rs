//! Local track bindings and remote stream entries
//!
//! Local side: at most one active track per [`TrackRole`], each bound to the
//! link sender that carries it. Screen sharing borrows the camera's sender and
//! remembers the camera track so it can be put back when the share ends.
//!
//! Remote side: one [`RemoteStreamEntry`] per remote stream id, created on the
//! first track of that stream and removed when its participant leaves.

use super::{LocalTrack, RemoteTrack, TrackRole};
use crate::peer::{PeerLink, SenderId};
use crate::{Error, Result};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Active local track for a role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackBinding {
    /// Role the track plays
    pub role: TrackRole,
    /// The track
    pub track: LocalTrack,
    /// Link sender carrying the track
    pub sender: SenderId,
    /// Cleared while muted
    pub enabled: bool,
}

/// A remote stream shown to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStreamEntry {
    /// Remote stream id
    pub stream_id: String,
    /// Participant the stream is attributed to, when known
    pub participant_id: Option<String>,
    /// Tracks received for the stream
    pub tracks: Vec<RemoteTrack>,
}

#[derive(Debug, Clone)]
struct ScreenShare {
    screen: LocalTrack,
    previous: Option<LocalTrack>,
    sender: SenderId,
}

/// Track/stream registry, owned by the session
#[derive(Debug, Default)]
pub struct TrackRegistry {
    bindings: HashMap<TrackRole, TrackBinding>,
    remote: HashMap<String, RemoteStreamEntry>,
    screen_share: Option<ScreenShare>,
}

impl TrackRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `track` to `role`, sending it over `link`
    ///
    /// An existing binding for the role is replaced in place on its sender;
    /// otherwise the track is added to the link. Returns the track that was
    /// bound before, if any.
    pub async fn attach_local_track(
        &mut self,
        link: &dyn PeerLink,
        role: TrackRole,
        track: LocalTrack,
    ) -> Result<Option<LocalTrack>> {
        if let Some(binding) = self.bindings.get_mut(&role) {
            link.replace_track(&binding.sender, Some(&track)).await?;
            debug!(%role, track_id = %track.id, "Replaced bound track");
            let previous = std::mem::replace(&mut binding.track, track);
            binding.enabled = true;
            return Ok(Some(previous));
        }

        let sender = link.add_track(&track).await?;
        debug!(%role, track_id = %track.id, sender = %sender, "Bound local track");
        self.bindings.insert(
            role,
            TrackBinding {
                role,
                track,
                sender,
                enabled: true,
            },
        );
        Ok(None)
    }

    async fn sender_for(&self, link: &dyn PeerLink, role: TrackRole) -> Option<SenderId> {
        let kind = role.kind();
        if let Some(binding) = self.bindings.get(&role) {
            return Some(binding.sender.clone());
        }
        if let Some(binding) = self.bindings.values().find(|b| b.role.kind() == kind) {
            return Some(binding.sender.clone());
        }
        link.senders()
            .await
            .into_iter()
            .find(|s| s.kind == kind)
            .map(|s| s.id)
    }

    /// Swap the track sent for `role`'s kind without renegotiating
    ///
    /// Fails with [`Error::NoActiveSender`] when the link has no sender of
    /// that kind. A `ScreenVideo` replacement remembers the track the sender
    /// carried so [`TrackRegistry::on_track_ended`] can restore it.
    pub async fn replace_track(
        &mut self,
        link: &dyn PeerLink,
        role: TrackRole,
        new_track: LocalTrack,
    ) -> Result<()> {
        let sender = self
            .sender_for(link, role)
            .await
            .ok_or(Error::NoActiveSender(role))?;

        link.replace_track(&sender, Some(&new_track)).await?;
        info!(%role, track_id = %new_track.id, "Replaced outbound track");

        if role == TrackRole::ScreenVideo {
            let previous = match self.screen_share.take() {
                // Sharing again: the camera is still the track to go back to
                Some(share) => share.previous,
                None => self
                    .bindings
                    .values()
                    .find(|b| b.sender == sender && b.role != TrackRole::ScreenVideo)
                    .map(|b| b.track.clone()),
            };
            self.screen_share = Some(ScreenShare {
                screen: new_track.clone(),
                previous,
                sender: sender.clone(),
            });
        }

        self.bindings.insert(
            role,
            TrackBinding {
                role,
                track: new_track,
                sender,
                enabled: true,
            },
        );
        Ok(())
    }

    /// Handle a local track that ended on its own
    ///
    /// When the ended track is the active screen share the sender goes back to
    /// the remembered camera track. Returns the screen track in that case.
    pub async fn on_track_ended(
        &mut self,
        link: &dyn PeerLink,
        track_id: &str,
    ) -> Result<Option<LocalTrack>> {
        match &self.screen_share {
            Some(share) if share.screen.id == track_id => self.stop_screen_share(link).await,
            _ => {
                debug!(track_id, "Ended track is not a screen share; ignoring");
                Ok(None)
            }
        }
    }

    /// End the active screen share, restoring the previous track
    ///
    /// Returns the screen track that was being sent, or `None` when nothing
    /// was shared. The share ends even when the link refuses the restore: the
    /// failure is logged and the screen track is still returned so the caller
    /// can release it.
    pub async fn stop_screen_share(&mut self, link: &dyn PeerLink) -> Result<Option<LocalTrack>> {
        let Some(share) = self.screen_share.take() else {
            return Ok(None);
        };
        self.bindings.remove(&TrackRole::ScreenVideo);

        match link
            .replace_track(&share.sender, share.previous.as_ref())
            .await
        {
            Ok(()) => info!(
                track_id = %share.screen.id,
                restored = ?share.previous.as_ref().map(|t| &t.id),
                "Screen share ended"
            ),
            Err(e) => warn!(
                track_id = %share.screen.id,
                sender = %share.sender,
                "Screen share ended without restoring the previous track: {}",
                e
            ),
        }

        Ok(Some(share.screen))
    }

    /// Whether a screen share is active
    pub fn is_screen_sharing(&self) -> bool {
        self.screen_share.is_some()
    }

    /// Binding for `role`
    pub fn binding(&self, role: TrackRole) -> Option<&TrackBinding> {
        self.bindings.get(&role)
    }

    /// Whether any local track is bound
    pub fn has_local_tracks(&self) -> bool {
        !self.bindings.is_empty()
    }

    /// Flip the enabled flag of `role`'s binding
    ///
    /// Returns the updated binding, or `None` when nothing is bound.
    pub fn toggle(&mut self, role: TrackRole) -> Option<&TrackBinding> {
        let binding = self.bindings.get_mut(&role)?;
        binding.enabled = !binding.enabled;
        debug!(%role, enabled = binding.enabled, "Toggled track");
        Some(binding)
    }

    /// Record an inbound track
    ///
    /// Returns `true` when this created a new entry. Further tracks for a
    /// known stream join its entry.
    pub fn register_remote_track(
        &mut self,
        stream_id: &str,
        track: RemoteTrack,
        participant_id: Option<String>,
    ) -> bool {
        if let Some(entry) = self.remote.get_mut(stream_id) {
            if !entry.tracks.contains(&track) {
                entry.tracks.push(track);
            }
            if entry.participant_id.is_none() {
                entry.participant_id = participant_id;
            }
            return false;
        }

        debug!(stream_id, ?participant_id, "New remote stream");
        self.remote.insert(
            stream_id.to_string(),
            RemoteStreamEntry {
                stream_id: stream_id.to_string(),
                participant_id,
                tracks: vec![track],
            },
        );
        true
    }

    /// Drop the streams of a participant that left
    ///
    /// Matches entries attributed to `participant_id` and the entry whose
    /// stream id equals it. Returns the removed stream ids.
    pub fn on_participant_left(&mut self, participant_id: &str) -> Vec<String> {
        let removed: Vec<String> = self
            .remote
            .values()
            .filter(|entry| {
                entry.stream_id == participant_id
                    || entry.participant_id.as_deref() == Some(participant_id)
            })
            .map(|entry| entry.stream_id.clone())
            .collect();

        for stream_id in &removed {
            self.remote.remove(stream_id);
        }
        removed
    }

    /// Remote stream entry by id
    pub fn remote_stream(&self, stream_id: &str) -> Option<&RemoteStreamEntry> {
        self.remote.get(stream_id)
    }

    /// Number of remote stream entries
    pub fn remote_stream_count(&self) -> usize {
        self.remote.len()
    }

    /// Remove and return every remote stream entry
    pub fn drain_remote(&mut self) -> Vec<RemoteStreamEntry> {
        self.remote.drain().map(|(_, entry)| entry).collect()
    }

    /// Remove every local binding, returning each distinct track once
    pub fn clear_local(&mut self) -> Vec<LocalTrack> {
        let mut tracks: Vec<LocalTrack> = Vec::new();
        let share = self.screen_share.take();
        let share_tracks = share
            .into_iter()
            .flat_map(|s| std::iter::once(s.screen).chain(s.previous));

        for track in self
            .bindings
            .drain()
            .map(|(_, binding)| binding.track)
            .chain(share_tracks)
        {
            if !tracks.iter().any(|t| t.id == track.id) {
                tracks.push(track);
            }
        }
        tracks
    }
}
