//! Relay signaling
//!
//! Envelope codec and the WebSocket client that carries offers, answers,
//! candidates and room events between participants.

pub mod client;
pub mod protocol;

pub use client::{
    endpoint_url, InboundStream, SignalingChannel, SignalingClient, SignalingConnector,
    SignalingSink, WsConnector,
};
pub use protocol::{
    ChatMessage, ChatPayload, Envelope, IceCandidate, InboundMessage, ParticipantInfo,
    ParticipantRef, RoomInfo, RoomParticipant, SdpType, SessionDescription, SignalingMessage,
};
