//! Offer/answer state machine for the single peer link
//!
//! The engine decides whether a negotiation step may run in the current
//! state, drives the link through it and emits the resulting messages. It
//! never holds the link or the signaling sink itself; the session lends them
//! for each call, which keeps every step on the session's task.
//!
//! Collisions (an offer while one is already in flight, an answer nobody
//! asked for) are dropped and logged. Failures to apply or generate a
//! description or candidate are absorbed too, until more than
//! `max_apply_failures` of them happen in a row.

use super::candidates::{CandidateOrigin, CandidateQueue};
use super::state::NegotiationState;
use crate::peer::PeerLink;
use crate::signaling::{IceCandidate, ParticipantInfo, SessionDescription, SignalingMessage, SignalingSink};
use crate::{Error, Result};
use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

/// Makes sure local media is sending before an answer is generated
#[async_trait]
pub trait LocalMediaAttacher: Send {
    /// Acquire and attach local media if none is attached yet
    async fn ensure_local_media(&mut self, link: &dyn PeerLink) -> Result<()>;
}

/// What to do with a remote offer that collides with our own outstanding offer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlarePolicy {
    /// Keep our offer and drop theirs
    Drop,
    /// Roll our offer back and answer theirs
    Yield,
}

/// Counters for one session's negotiation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NegotiationStats {
    /// Offers sent
    pub offers_sent: u32,
    /// Answers sent
    pub answers_sent: u32,
    /// Remote answers applied
    pub answers_received: u32,
    /// Offers and answers dropped because of the current state
    pub collisions: u32,
    /// Own offers rolled back in favour of a remote one
    pub rollbacks: u32,
    /// Remote candidates applied to the link
    pub candidates_applied: u32,
    /// Local candidates sent to the relay
    pub candidates_sent: u32,
}

/// Negotiation engine
#[derive(Debug)]
pub struct NegotiationEngine {
    state: NegotiationState,
    has_local_description: bool,
    has_remote_description: bool,
    pending_remote: CandidateQueue,
    pending_local: CandidateQueue,
    consecutive_failures: u32,
    max_apply_failures: u32,
    last_transition: Option<(NegotiationState, NegotiationState)>,
    stats: NegotiationStats,
}

impl NegotiationEngine {
    /// New engine in `Stable`
    pub fn new(max_apply_failures: u32) -> Self {
        Self {
            state: NegotiationState::Stable,
            has_local_description: false,
            has_remote_description: false,
            pending_remote: CandidateQueue::new(CandidateOrigin::Remote),
            pending_local: CandidateQueue::new(CandidateOrigin::Local),
            consecutive_failures: 0,
            max_apply_failures,
            last_transition: None,
            stats: NegotiationStats::default(),
        }
    }

    /// Current state
    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// Most recent state change
    pub fn last_transition(&self) -> Option<(NegotiationState, NegotiationState)> {
        self.last_transition
    }

    /// Counters since the engine was created
    pub fn stats(&self) -> NegotiationStats {
        self.stats
    }

    /// Whether a remote description has been applied
    pub fn has_remote_description(&self) -> bool {
        self.has_remote_description
    }

    /// Whether a local description has been applied
    pub fn has_local_description(&self) -> bool {
        self.has_local_description
    }

    /// Remote candidates waiting for a remote description
    pub fn pending_remote_candidates(&self) -> usize {
        self.pending_remote.len()
    }

    /// Local candidates waiting for a local description
    pub fn pending_local_candidates(&self) -> usize {
        self.pending_local.len()
    }

    /// Consecutive failed steps since the last successful description
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    fn transition(&mut self, next: NegotiationState) {
        if !self.state.can_transition_to(next) {
            warn!(from = %self.state, to = %next, "Refusing illegal negotiation transition");
            return;
        }
        debug!(from = %self.state, to = %next, "Negotiation state transition");
        self.last_transition = Some((self.state, next));
        self.state = next;
    }

    fn record_failure(&mut self, err: Error) -> Result<()> {
        self.consecutive_failures += 1;
        warn!(
            error = %err,
            failures = self.consecutive_failures,
            "Negotiation step failed"
        );
        if self.consecutive_failures > self.max_apply_failures {
            return Err(Error::ApplyFailuresExceeded(self.consecutive_failures));
        }
        Ok(())
    }

    fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    fn collision(&mut self, operation: &'static str) {
        self.stats.collisions += 1;
        let err = Error::NegotiationCollision {
            operation,
            state: self.state,
        };
        warn!("{}; dropping", err);
    }

    /// The link wants a (re)negotiation
    ///
    /// Only acted on from `Stable`; anything else is dropped, not queued.
    #[instrument(skip_all, fields(state = %self.state))]
    pub async fn on_negotiation_needed(
        &mut self,
        link: &dyn PeerLink,
        out: &dyn SignalingSink,
    ) -> Result<()> {
        if !self.state.is_stable() {
            debug!("Negotiation already in progress; dropping request");
            return Ok(());
        }
        self.send_offer(link, out).await
    }

    /// Another participant joined; offer to it from `Stable`
    #[instrument(skip_all, fields(state = %self.state, username = %info.username))]
    pub async fn on_participant_joined(
        &mut self,
        link: &dyn PeerLink,
        out: &dyn SignalingSink,
        info: &ParticipantInfo,
    ) -> Result<()> {
        if !self.state.is_stable() {
            debug!("Negotiation in progress; not offering to new participant");
            return Ok(());
        }
        info!(participant = ?info.participant_id, "Offering to new participant");
        self.send_offer(link, out).await
    }

    async fn send_offer(&mut self, link: &dyn PeerLink, out: &dyn SignalingSink) -> Result<()> {
        let offer = match link.create_offer().await {
            Ok(offer) => offer,
            Err(e) => return self.record_failure(e),
        };

        if let Err(e) = link.set_local_description(offer.clone()).await {
            return self.record_failure(e);
        }
        self.record_success();
        self.has_local_description = true;
        self.transition(NegotiationState::HaveLocalOffer);

        out.send(SignalingMessage::Offer(offer))?;
        self.stats.offers_sent += 1;
        info!("Sent offer");

        self.flush_local(out)
    }

    /// Apply a remote offer and answer it
    ///
    /// Accepted in `Stable`. In `HaveLocalOffer` the offer is dropped unless
    /// `glare` is [`GlarePolicy::Yield`], in which case our own offer is
    /// rolled back first. Local media is attached before answering so the
    /// answer carries it; failing to get media is logged and the answer goes
    /// out without it.
    #[instrument(skip_all, fields(state = %self.state, ?glare))]
    pub async fn on_remote_offer(
        &mut self,
        link: &dyn PeerLink,
        out: &dyn SignalingSink,
        media: &mut dyn LocalMediaAttacher,
        offer: SessionDescription,
        glare: GlarePolicy,
    ) -> Result<()> {
        if self.state.is_closed() {
            debug!("Closed; ignoring remote offer");
            return Ok(());
        }
        if self.state == NegotiationState::HaveLocalOffer && glare == GlarePolicy::Yield {
            if let Err(e) = link.rollback().await {
                return self.record_failure(e);
            }
            self.stats.rollbacks += 1;
            info!("Rolled back local offer in favour of remote offer");
            self.transition(NegotiationState::Stable);
        }
        if !self.state.is_stable() {
            self.collision("remote offer");
            return Ok(());
        }

        if let Err(e) = link.set_remote_description(offer).await {
            return self.record_failure(Error::ApplyDescriptionFailed(e.to_string()));
        }
        self.record_success();
        self.has_remote_description = true;
        self.transition(NegotiationState::HaveRemoteOffer);

        self.flush_remote(link).await?;

        if let Err(e) = media.ensure_local_media(link).await {
            warn!(error = %e, "Answering without local media");
        }

        let answer = match link.create_answer().await {
            Ok(answer) => answer,
            Err(e) => return self.abandon_remote_offer(e),
        };
        if let Err(e) = link.set_local_description(answer.clone()).await {
            return self.abandon_remote_offer(e);
        }
        self.has_local_description = true;
        self.transition(NegotiationState::Stable);

        out.send(SignalingMessage::Answer(answer))?;
        self.stats.answers_sent += 1;
        info!("Sent answer");

        self.flush_local(out)
    }

    /// Back to `Stable` after failing to answer, so the next offer can be taken
    fn abandon_remote_offer(&mut self, err: Error) -> Result<()> {
        self.transition(NegotiationState::Stable);
        self.record_failure(err)
    }

    /// Apply the answer to our outstanding offer
    #[instrument(skip_all, fields(state = %self.state))]
    pub async fn on_remote_answer(
        &mut self,
        link: &dyn PeerLink,
        answer: SessionDescription,
    ) -> Result<()> {
        if self.state.is_closed() {
            debug!("Closed; ignoring remote answer");
            return Ok(());
        }
        if self.state != NegotiationState::HaveLocalOffer {
            self.collision("remote answer");
            return Ok(());
        }

        if let Err(e) = link.set_remote_description(answer).await {
            // Give up on this offer; the next negotiation starts over
            self.transition(NegotiationState::Stable);
            return self.record_failure(Error::ApplyDescriptionFailed(e.to_string()));
        }
        self.record_success();
        self.has_remote_description = true;
        self.transition(NegotiationState::Stable);
        self.stats.answers_received += 1;
        info!("Applied answer");

        self.flush_remote(link).await
    }

    /// Apply a remote candidate, or hold it until a remote description is set
    pub async fn on_remote_candidate(
        &mut self,
        link: &dyn PeerLink,
        candidate: IceCandidate,
    ) -> Result<()> {
        if self.state.is_closed() {
            return Ok(());
        }
        if !self.has_remote_description {
            debug!(held = self.pending_remote.len() + 1, "Holding remote candidate");
            self.pending_remote.enqueue(candidate);
            return Ok(());
        }
        self.apply_remote_candidate(link, candidate).await
    }

    /// Send a local candidate, or hold it until a local description is set
    pub fn on_local_candidate(
        &mut self,
        out: &dyn SignalingSink,
        candidate: IceCandidate,
    ) -> Result<()> {
        if self.state.is_closed() {
            return Ok(());
        }
        if !self.has_local_description {
            debug!(held = self.pending_local.len() + 1, "Holding local candidate");
            self.pending_local.enqueue(candidate);
            return Ok(());
        }
        out.send(SignalingMessage::IceCandidate(candidate))?;
        self.stats.candidates_sent += 1;
        Ok(())
    }

    async fn apply_remote_candidate(
        &mut self,
        link: &dyn PeerLink,
        candidate: IceCandidate,
    ) -> Result<()> {
        match link.add_ice_candidate(candidate).await {
            Ok(()) => {
                self.stats.candidates_applied += 1;
                Ok(())
            }
            Err(e) => self.record_failure(Error::ApplyCandidateFailed(e.to_string())),
        }
    }

    async fn flush_remote(&mut self, link: &dyn PeerLink) -> Result<()> {
        if self.pending_remote.is_empty() {
            return Ok(());
        }
        let held: Vec<_> = self.pending_remote.flush().collect();
        debug!(count = held.len(), "Applying held remote candidates");

        let before = self.stats.candidates_applied;
        for record in held {
            self.apply_remote_candidate(link, record.candidate).await?;
        }
        debug!(
            applied = self.stats.candidates_applied - before,
            "Held remote candidates flushed"
        );
        Ok(())
    }

    fn flush_local(&mut self, out: &dyn SignalingSink) -> Result<()> {
        if self.pending_local.is_empty() {
            return Ok(());
        }
        debug!(count = self.pending_local.len(), "Sending held local candidates");

        let mut sent = 0;
        for record in self.pending_local.flush() {
            out.send(SignalingMessage::IceCandidate(record.candidate))?;
            sent += 1;
        }
        self.stats.candidates_sent += sent;
        Ok(())
    }

    /// Tear down; every later call is a no-op
    pub fn close(&mut self) {
        if self.state.is_closed() {
            return;
        }
        self.transition(NegotiationState::Closed);
        self.pending_remote.clear();
        self.pending_local.clear();
    }
}
