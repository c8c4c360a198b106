//! Offer/answer negotiation states

use serde::{Deserialize, Serialize};
use std::fmt;

/// Negotiation state of the single peer link
///
/// An offer may only be created from `Stable` and an answer only from
/// `HaveRemoteOffer`. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NegotiationState {
    /// No exchange in progress
    #[default]
    Stable,
    /// Local offer sent, waiting for the answer
    HaveLocalOffer,
    /// Remote offer applied, answer not yet sent
    HaveRemoteOffer,
    /// Link torn down
    Closed,
}

impl NegotiationState {
    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(self, next: NegotiationState) -> bool {
        use NegotiationState::*;

        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Stable, HaveLocalOffer) | (Stable, HaveRemoteOffer) => true,
            (HaveLocalOffer, Stable) | (HaveRemoteOffer, Stable) => true,
            _ => false,
        }
    }

    /// Whether a new exchange may start
    pub fn is_stable(self) -> bool {
        self == NegotiationState::Stable
    }

    /// Whether the link has been torn down
    pub fn is_closed(self) -> bool {
        self == NegotiationState::Closed
    }

    /// Wire-style name of the state
    pub fn as_str(self) -> &'static str {
        match self {
            NegotiationState::Stable => "stable",
            NegotiationState::HaveLocalOffer => "have-local-offer",
            NegotiationState::HaveRemoteOffer => "have-remote-offer",
            NegotiationState::Closed => "closed",
        }
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
