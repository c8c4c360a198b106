//! Offer/answer negotiation for the session's peer link

pub mod candidates;
pub mod engine;
pub mod state;

pub use candidates::{CandidateOrigin, CandidateQueue, CandidateRecord};
pub use engine::{GlarePolicy, LocalMediaAttacher, NegotiationEngine, NegotiationStats};
pub use state::NegotiationState;
