//! Wire vocabulary of the rendezvous server.
//!
//! Every frame is one JSON text message. Membership events use an `event`
//! tag; negotiation payloads travel inside a `{cmd, data}` envelope, either
//! wrapped in a `message` event or as a bare relay frame.

use crate::error::SignalingError;
use crate::peer::types::{IceCandidate, SessionDescription};
use serde::{Deserialize, Serialize};

pub const CMD_WEBRTC: &str = "CMD_WEBRTC";
pub const CMD_HANGUP: &str = "CMD_HANGUP";

/// Negotiation payload carried in a `CMD_WEBRTC` envelope.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalingMessage {
    Offer {
        sdp: String,
    },
    Answer {
        sdp: String,
    },
    Candidate {
        #[serde(rename = "label")]
        sdp_mline_index: u16,
        #[serde(rename = "id")]
        sdp_mid: String,
        candidate: String,
    },
}

impl SignalingMessage {
    pub fn from_description(desc: &SessionDescription) -> Self {
        match desc.kind {
            crate::peer::types::SdpType::Offer => Self::Offer {
                sdp: desc.sdp.clone(),
            },
            crate::peer::types::SdpType::Answer => Self::Answer {
                sdp: desc.sdp.clone(),
            },
        }
    }

    pub fn from_candidate(candidate: &IceCandidate) -> Self {
        Self::Candidate {
            sdp_mline_index: candidate.sdp_mline_index.unwrap_or(0),
            sdp_mid: candidate.sdp_mid.clone().unwrap_or_default(),
            candidate: candidate.candidate.clone(),
        }
    }

    /// Returns the candidate if this message carries one.
    pub fn into_candidate(self) -> Option<IceCandidate> {
        match self {
            Self::Candidate {
                sdp_mline_index,
                sdp_mid,
                candidate,
            } => Some(IceCandidate {
                candidate,
                sdp_mid: (!sdp_mid.is_empty()).then_some(sdp_mid),
                sdp_mline_index: Some(sdp_mline_index),
            }),
            _ => None,
        }
    }
}

/// `{cmd, data}` envelope exchanged between the two peers.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "cmd")]
pub enum Envelope {
    #[serde(rename = "CMD_WEBRTC")]
    WebRtc { data: SignalingMessage },
    #[serde(rename = "CMD_HANGUP")]
    Hangup,
}

impl Envelope {
    pub fn webrtc(data: SignalingMessage) -> Self {
        Self::WebRtc { data }
    }
}

/// Frames the client sends to the rendezvous server.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientFrame {
    Join { room: String },
    Leave { room: String },
    Message { room: String, data: Envelope },
}

/// Frames the rendezvous server sends to the client.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerFrame {
    Joined {
        room: String,
        #[serde(default)]
        id: Option<String>,
    },
    OtherJoin {
        room: String,
        #[serde(default)]
        id: Option<String>,
    },
    Full {
        room: String,
        #[serde(default)]
        id: Option<String>,
    },
    Left {
        room: String,
        #[serde(default)]
        id: Option<String>,
    },
    Bye {
        room: String,
        #[serde(default)]
        id: Option<String>,
    },
    Disconnect,
    Message {
        room: String,
        #[serde(default)]
        from: Option<String>,
        data: Envelope,
    },
}

/// Room-membership lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipEvent {
    Joined {
        room_id: String,
        peer_id: Option<String>,
    },
    OtherJoined {
        room_id: String,
        peer_id: Option<String>,
    },
    Full {
        room_id: String,
        peer_id: Option<String>,
    },
    Left {
        room_id: String,
        peer_id: Option<String>,
    },
    Bye {
        room_id: String,
        peer_id: Option<String>,
    },
    /// The transport to the rendezvous server is gone.
    Disconnected,
}

impl MembershipEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Joined { .. } => "joined",
            Self::OtherJoined { .. } => "other_join",
            Self::Full { .. } => "full",
            Self::Left { .. } => "left",
            Self::Bye { .. } => "bye",
            Self::Disconnected => "disconnect",
        }
    }

    pub fn room_id(&self) -> Option<&str> {
        match self {
            Self::Joined { room_id, .. }
            | Self::OtherJoined { room_id, .. }
            | Self::Full { room_id, .. }
            | Self::Left { room_id, .. }
            | Self::Bye { room_id, .. } => Some(room_id),
            Self::Disconnected => None,
        }
    }
}

/// Everything a signaling channel can deliver to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Membership(MembershipEvent),
    Signal {
        room_id: Option<String>,
        from: Option<String>,
        envelope: Envelope,
    },
}

impl From<ServerFrame> for InboundEvent {
    fn from(frame: ServerFrame) -> Self {
        use MembershipEvent as M;
        match frame {
            ServerFrame::Joined { room, id } => Self::Membership(M::Joined {
                room_id: room,
                peer_id: id,
            }),
            ServerFrame::OtherJoin { room, id } => Self::Membership(M::OtherJoined {
                room_id: room,
                peer_id: id,
            }),
            ServerFrame::Full { room, id } => Self::Membership(M::Full {
                room_id: room,
                peer_id: id,
            }),
            ServerFrame::Left { room, id } => Self::Membership(M::Left {
                room_id: room,
                peer_id: id,
            }),
            ServerFrame::Bye { room, id } => Self::Membership(M::Bye {
                room_id: room,
                peer_id: id,
            }),
            ServerFrame::Disconnect => Self::Membership(M::Disconnected),
            ServerFrame::Message { room, from, data } => Self::Signal {
                room_id: Some(room),
                from,
                envelope: data,
            },
        }
    }
}

pub fn encode(frame: &ClientFrame) -> Result<String, SignalingError> {
    Ok(serde_json::to_string(frame)?)
}

/// Decodes one inbound text frame. Unknown tags are protocol errors.
pub fn decode(text: &str) -> Result<InboundEvent, SignalingError> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| SignalingError::protocol(format!("not json: {e}")))?;

    if value.get("cmd").is_some() {
        let envelope: Envelope = serde_json::from_value(value)
            .map_err(|e| SignalingError::protocol(format!("bad envelope: {e}")))?;
        return Ok(InboundEvent::Signal {
            room_id: None,
            from: None,
            envelope,
        });
    }

    if value.get("event").is_some() {
        let frame: ServerFrame = serde_json::from_value(value)
            .map_err(|e| SignalingError::protocol(format!("bad event: {e}")))?;
        return Ok(frame.into());
    }

    Err(SignalingError::protocol("frame has neither `event` nor `cmd`"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn offer_envelope_matches_wire_shape() {
        let frame = ClientFrame::Message {
            room: "room42".into(),
            data: Envelope::webrtc(SignalingMessage::Offer { sdp: "v=0...".into() }),
        };
        let value: serde_json::Value = serde_json::from_str(&encode(&frame).unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "message",
                "room": "room42",
                "data": {"cmd": "CMD_WEBRTC", "data": {"type": "offer", "sdp": "v=0..."}}
            })
        );
    }

    #[test]
    fn candidate_uses_label_and_id() {
        let msg = SignalingMessage::Candidate {
            sdp_mline_index: 0,
            sdp_mid: "0".into(),
            candidate: "candidate:1 1 udp 1 1.2.3.4 5 typ host".into(),
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "candidate", "label": 0, "id": "0", "candidate": "candidate:1 1 udp 1 1.2.3.4 5 typ host"})
        );
    }

    #[test]
    fn hangup_has_no_data() {
        assert_eq!(
            serde_json::to_value(Envelope::Hangup).unwrap(),
            json!({"cmd": "CMD_HANGUP"})
        );
    }

    #[test]
    fn decodes_membership_events() {
        assert_eq!(
            decode(r#"{"event":"joined","room":"room42","id":"u1"}"#).unwrap(),
            InboundEvent::Membership(MembershipEvent::Joined {
                room_id: "room42".into(),
                peer_id: Some("u1".into()),
            })
        );
        assert_eq!(
            decode(r#"{"event":"other_join","room":"room42"}"#).unwrap(),
            InboundEvent::Membership(MembershipEvent::OtherJoined {
                room_id: "room42".into(),
                peer_id: None,
            })
        );
        assert_eq!(
            decode(r#"{"event":"disconnect"}"#).unwrap(),
            InboundEvent::Membership(MembershipEvent::Disconnected)
        );
    }

    #[test]
    fn decodes_bare_relay_envelope() {
        let event =
            decode(r#"{"cmd":"CMD_WEBRTC","data":{"type":"answer","sdp":"v=0..."}}"#).unwrap();
        assert_eq!(
            event,
            InboundEvent::Signal {
                room_id: None,
                from: None,
                envelope: Envelope::webrtc(SignalingMessage::Answer { sdp: "v=0...".into() }),
            }
        );
    }

    #[test]
    fn unknown_tags_are_protocol_errors() {
        for bad in [
            r#"{"event":"teleport","room":"r"}"#,
            r#"{"cmd":"CMD_WEBRTC","data":{"type":"pranswer","sdp":""}}"#,
            r#"{"cmd":"CMD_CHAT","text":"hi"}"#,
            r#"{"hello":1}"#,
            "not json",
        ] {
            assert!(
                matches!(decode(bad), Err(SignalingError::Protocol(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn candidate_round_trips_through_ice_type() {
        let c = IceCandidate {
            candidate: "candidate:1 1 udp 1 1.2.3.4 5 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
        };
        assert_eq!(
            SignalingMessage::from_candidate(&c).into_candidate(),
            Some(c)
        );
    }
}
