//! Relay envelope and typed signaling messages
//!
//! Every frame on the relay channel is a JSON envelope
//! `{"type": ..., "data": ..., "roomId": ..., "senderId": ...}`. The relay
//! stamps `senderId` on everything it forwards; clients leave it out.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw relay envelope
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    /// Message type discriminator
    #[serde(rename = "type")]
    pub kind: String,

    /// Type-specific payload
    #[serde(default)]
    pub data: Value,

    /// Room the message belongs to
    #[serde(rename = "roomId", default)]
    pub room_id: String,

    /// Relay-assigned id of the originating participant
    #[serde(rename = "senderId", default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
}

/// Session description type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// Offer
    Offer,
    /// Provisional answer
    Pranswer,
    /// Answer
    Answer,
    /// Rollback
    Rollback,
}

/// Session description, in the browser's JSON shape
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionDescription {
    /// Description type
    #[serde(rename = "type")]
    pub sdp_type: SdpType,

    /// SDP body
    pub sdp: String,
}

impl SessionDescription {
    /// Build an offer description
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    /// Build an answer description
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Address candidate, in the browser's JSON shape
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct IceCandidate {
    /// Candidate attribute line
    pub candidate: String,

    /// Media stream identification tag
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,

    /// Media line index
    #[serde(rename = "sdpMLineIndex", default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,

    /// ICE username fragment
    #[serde(rename = "usernameFragment", default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    /// Candidate with only the attribute line set
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            ..Default::default()
        }
    }
}

/// Payload of `participant_joined`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantInfo {
    /// Display name of the new participant
    #[serde(default)]
    pub username: String,

    /// Relay id of the new participant (falls back to the envelope sender)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant_id: Option<String>,

    /// Joined as the room broadcaster
    #[serde(default)]
    pub is_broadcaster: bool,

    /// Joined as a screen-share source
    #[serde(default)]
    pub is_screen_share: bool,
}

/// Payload of `participant_left`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParticipantRef {
    /// Relay id of the participant that left
    #[serde(rename = "senderId")]
    pub sender_id: String,
}

/// Chat message as stored and forwarded by the relay
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    /// Relay id of the author
    pub sender_id: String,
    /// Display name of the author
    pub sender_name: String,
    /// Message text
    pub content: String,
    /// Unix timestamp (seconds)
    pub timestamp: i64,
}

/// Chat payload: plain text going out, a stamped message coming in
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ChatPayload {
    /// Outbound text
    Text(String),
    /// Inbound relay-stamped message
    Message(ChatMessage),
}

/// Participant entry inside `room_info`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomParticipant {
    /// Relay id
    #[serde(rename = "ID", default)]
    pub id: String,

    /// Display name
    #[serde(rename = "Username", default)]
    pub username: String,
}

/// Payload of `room_info`, sent by the relay to a participant right after it joins
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    /// Room id
    #[serde(default)]
    pub room_id: String,

    /// Room topology
    #[serde(default)]
    pub room_type: Option<String>,

    /// Participants already present (including the receiver)
    #[serde(default)]
    pub participants: Vec<RoomParticipant>,

    /// Chat backlog
    #[serde(default)]
    pub chat_history: Vec<ChatMessage>,
}

/// Typed signaling message
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingMessage {
    /// SDP offer
    Offer(SessionDescription),
    /// SDP answer
    Answer(SessionDescription),
    /// Trickled address candidate
    IceCandidate(IceCandidate),
    /// Another participant entered the room
    ParticipantJoined(ParticipantInfo),
    /// A participant left the room
    ParticipantLeft(ParticipantRef),
    /// Room snapshot for a newly joined participant
    RoomInfo(RoomInfo),
    /// Chat line
    Chat(ChatPayload),
    /// Sender started sharing its screen
    ScreenShareStart,
    /// Sender stopped sharing its screen
    ScreenShareStop,
    /// Relay refused the participant
    Error(String),
}

/// A decoded inbound message with its envelope metadata
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Relay id of the originating participant
    pub sender_id: Option<String>,
    /// Room the message was routed through
    pub room_id: String,
    /// Typed message
    pub message: SignalingMessage,
}

fn decode_payload<T: serde::de::DeserializeOwned>(kind: &str, data: Value) -> crate::Result<T> {
    serde_json::from_value(data).map_err(|e| {
        crate::Error::SerializationError(format!("Invalid {} payload: {}", kind, e))
    })
}

impl SignalingMessage {
    /// Wire `type` of this message
    pub fn kind(&self) -> &'static str {
        match self {
            SignalingMessage::Offer(_) => "offer",
            SignalingMessage::Answer(_) => "answer",
            SignalingMessage::IceCandidate(_) => "ice_candidate",
            SignalingMessage::ParticipantJoined(_) => "participant_joined",
            SignalingMessage::ParticipantLeft(_) => "participant_left",
            SignalingMessage::RoomInfo(_) => "room_info",
            SignalingMessage::Chat(_) => "chat",
            SignalingMessage::ScreenShareStart => "screen_share_start",
            SignalingMessage::ScreenShareStop => "screen_share_stop",
            SignalingMessage::Error(_) => "error",
        }
    }

    /// Wrap this message in an envelope for `room_id`
    pub fn to_envelope(&self, room_id: &str) -> crate::Result<Envelope> {
        let data = match self {
            SignalingMessage::Offer(desc) | SignalingMessage::Answer(desc) => {
                serde_json::to_value(desc)
            }
            SignalingMessage::IceCandidate(candidate) => serde_json::to_value(candidate),
            SignalingMessage::ParticipantJoined(info) => serde_json::to_value(info),
            SignalingMessage::ParticipantLeft(participant) => serde_json::to_value(participant),
            SignalingMessage::RoomInfo(info) => serde_json::to_value(info),
            SignalingMessage::Chat(payload) => serde_json::to_value(payload),
            SignalingMessage::ScreenShareStart | SignalingMessage::ScreenShareStop => {
                Ok(Value::Null)
            }
            SignalingMessage::Error(reason) => Ok(Value::String(reason.clone())),
        }
        .map_err(|e| {
            crate::Error::SerializationError(format!(
                "Failed to serialize {} payload: {}",
                self.kind(),
                e
            ))
        })?;

        Ok(Envelope {
            kind: self.kind().to_string(),
            data,
            room_id: room_id.to_string(),
            sender_id: None,
        })
    }

    /// Serialize this message as an envelope JSON string
    pub fn to_json(&self, room_id: &str) -> crate::Result<String> {
        let envelope = self.to_envelope(room_id)?;
        serde_json::to_string(&envelope).map_err(|e| {
            crate::Error::SerializationError(format!("Failed to serialize envelope: {}", e))
        })
    }

    /// Decode an envelope
    ///
    /// Returns `Ok(None)` for message types this client does not understand,
    /// so newer relays can add types without breaking older clients.
    pub fn from_envelope(envelope: Envelope) -> crate::Result<Option<InboundMessage>> {
        let Envelope {
            kind,
            data,
            room_id,
            sender_id,
        } = envelope;

        let message = match kind.as_str() {
            "offer" => SignalingMessage::Offer(decode_payload(&kind, data)?),
            "answer" => SignalingMessage::Answer(decode_payload(&kind, data)?),
            "ice_candidate" => SignalingMessage::IceCandidate(decode_payload(&kind, data)?),
            "participant_joined" => {
                let mut info: ParticipantInfo = if data.is_null() {
                    ParticipantInfo {
                        username: String::new(),
                        participant_id: None,
                        is_broadcaster: false,
                        is_screen_share: false,
                    }
                } else {
                    decode_payload(&kind, data)?
                };
                if info.participant_id.is_none() {
                    info.participant_id = sender_id.clone();
                }
                SignalingMessage::ParticipantJoined(info)
            }
            "participant_left" => {
                let from_data = data
                    .get("senderId")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let sender = from_data.or_else(|| sender_id.clone()).ok_or_else(|| {
                    crate::Error::SerializationError(
                        "participant_left without a sender id".to_string(),
                    )
                })?;
                SignalingMessage::ParticipantLeft(ParticipantRef { sender_id: sender })
            }
            "room_info" => SignalingMessage::RoomInfo(decode_payload(&kind, data)?),
            "chat" => SignalingMessage::Chat(decode_payload(&kind, data)?),
            "screen_share_start" => SignalingMessage::ScreenShareStart,
            "screen_share_stop" => SignalingMessage::ScreenShareStop,
            "error" => SignalingMessage::Error(match data {
                Value::String(reason) => reason,
                other => other.to_string(),
            }),
            _ => return Ok(None),
        };

        Ok(Some(InboundMessage {
            sender_id,
            room_id,
            message,
        }))
    }

    /// Parse an envelope JSON string
    pub fn from_json(json: &str) -> crate::Result<Option<InboundMessage>> {
        let envelope: Envelope = serde_json::from_str(json).map_err(|e| {
            crate::Error::SerializationError(format!("Failed to deserialize envelope: {}", e))
        })?;
        Self::from_envelope(envelope)
    }
}
