use crate::{AgentStatus, MessageRecord, StatusPatch};
use chrono::{DateTime, Utc};
use serde::de::{self, DeserializeOwned, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 256 * 1024;
pub const CURRENT_PROTOCOL_VERSION: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolVersion(pub u16);

impl ProtocolVersion {
    pub const CURRENT: Self = Self(CURRENT_PROTOCOL_VERSION);
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl Serialize for ProtocolVersion {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for ProtocolVersion {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ProtocolVersionVisitor;

        impl<'de> Visitor<'de> for ProtocolVersionVisitor {
            type Value = ProtocolVersion;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a protocol version as string or integer")
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                let version = u16::try_from(value)
                    .map_err(|_| E::custom(format!("protocol version too large: {value}")))?;
                Ok(ProtocolVersion(version))
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                if value < 0 {
                    return Err(E::custom(format!(
                        "protocol version cannot be negative: {value}"
                    )));
                }
                self.visit_u64(value as u64)
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                let cleaned = value.trim().trim_start_matches('v');
                let version = cleaned.parse::<u16>().map_err(|err| {
                    E::custom(format!("invalid protocol version '{value}': {err}"))
                })?;
                Ok(ProtocolVersion(version))
            }

            fn visit_string<E>(self, value: String) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                self.visit_str(&value)
            }
        }

        deserializer.deserialize_any(ProtocolVersionVisitor)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    #[serde(default)]
    pub version: ProtocolVersion,
    pub conversation_id: String,
    pub sent_at: DateTime<Utc>,
    #[serde(flatten)]
    pub frame: Frame,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Frame {
    ConnectionAck,
    MessageConfirmed(MessageConfirmedPayload),
    MessageReceived(MessageReceivedPayload),
    HistorySnapshot(HistorySnapshotPayload),
    StatusSnapshot(StatusSnapshotPayload),
    StatusPatch(StatusPatch),
    HistoryCleared(HistoryClearedPayload),
    ServerError(ServerErrorPayload),
    SendMessage(SendMessagePayload),
    RequestHistory,
    RequestStatus,
    ClearHistory,
    Unknown,
}

/// Unknown discriminators decode to `Frame::Unknown`, payload or not; known
/// discriminators decode their payload strictly.
impl<'de> Deserialize<'de> for Frame {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Repr {
            #[serde(rename = "type")]
            kind: String,
            #[serde(default)]
            payload: Option<serde_json::Value>,
        }

        fn decode_payload<T, E>(payload: Option<serde_json::Value>) -> Result<T, E>
        where
            T: DeserializeOwned,
            E: de::Error,
        {
            let value = payload.ok_or_else(|| E::missing_field("payload"))?;
            serde_json::from_value(value).map_err(E::custom)
        }

        let repr = Repr::deserialize(deserializer)?;
        let frame = match repr.kind.as_str() {
            "connection_ack" => Frame::ConnectionAck,
            "message_confirmed" => Frame::MessageConfirmed(decode_payload(repr.payload)?),
            "message_received" => Frame::MessageReceived(decode_payload(repr.payload)?),
            "history_snapshot" => Frame::HistorySnapshot(decode_payload(repr.payload)?),
            "status_snapshot" => Frame::StatusSnapshot(decode_payload(repr.payload)?),
            "status_patch" => Frame::StatusPatch(decode_payload(repr.payload)?),
            "history_cleared" => Frame::HistoryCleared(decode_payload(repr.payload)?),
            "server_error" => Frame::ServerError(decode_payload(repr.payload)?),
            "send_message" => Frame::SendMessage(decode_payload(repr.payload)?),
            "request_history" => Frame::RequestHistory,
            "request_status" => Frame::RequestStatus,
            "clear_history" => Frame::ClearHistory,
            _ => Frame::Unknown,
        };
        Ok(frame)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageConfirmedPayload {
    pub local_id: u64,
    pub message: MessageRecord,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageReceivedPayload {
    pub message: MessageRecord,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistorySnapshotPayload {
    #[serde(default)]
    pub messages: Vec<MessageRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusSnapshotPayload {
    pub status: AgentStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryClearedPayload {
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerErrorPayload {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendMessagePayload {
    pub local_id: u64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("frame encode failed: {0}")]
    Encode(String),
    #[error("frame decode failed: {0}")]
    Decode(String),
}

pub fn encode_frame<T: Serialize>(value: &T, max_frame_bytes: usize) -> Result<String, FrameError> {
    let encoded =
        serde_json::to_string(value).map_err(|err| FrameError::Encode(err.to_string()))?;
    if encoded.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: encoded.len(),
            max: max_frame_bytes,
        });
    }
    Ok(encoded)
}

pub fn decode_frame<T: DeserializeOwned>(
    text: &str,
    max_frame_bytes: usize,
) -> Result<T, FrameError> {
    if text.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: text.len(),
            max: max_frame_bytes,
        });
    }
    serde_json::from_str(text).map_err(|err| FrameError::Decode(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AgentState, MessageAuthor};

    fn sent_at() -> DateTime<Utc> {
        "2026-08-20T09:30:00Z".parse().expect("timestamp")
    }

    fn record(id: u64, author: MessageAuthor, content: &str) -> MessageRecord {
        MessageRecord {
            id,
            author,
            content: content.to_string(),
            timestamp: sent_at(),
        }
    }

    fn ack_envelope() -> Envelope {
        Envelope {
            version: ProtocolVersion::CURRENT,
            conversation_id: "conv-alpha".to_string(),
            sent_at: sent_at(),
            frame: Frame::ConnectionAck,
        }
    }

    #[test]
    fn encode_decode_round_trip_for_all_variants() {
        let confirmed = Envelope {
            frame: Frame::MessageConfirmed(MessageConfirmedPayload {
                local_id: 3,
                message: record(42, MessageAuthor::User, "hi"),
            }),
            ..ack_envelope()
        };
        let received = Envelope {
            frame: Frame::MessageReceived(MessageReceivedPayload {
                message: record(43, MessageAuthor::Agent, "hello back"),
            }),
            ..ack_envelope()
        };
        let history = Envelope {
            frame: Frame::HistorySnapshot(HistorySnapshotPayload {
                messages: vec![
                    record(1, MessageAuthor::User, "first"),
                    record(2, MessageAuthor::Agent, "second"),
                ],
            }),
            ..ack_envelope()
        };
        let status = Envelope {
            frame: Frame::StatusSnapshot(StatusSnapshotPayload {
                status: AgentStatus {
                    state: AgentState::Thinking,
                    current_task: Some("summarize thread".to_string()),
                    message_count: 2,
                    last_activity_at: Some(sent_at()),
                },
            }),
            ..ack_envelope()
        };
        let patch = Envelope {
            frame: Frame::StatusPatch(StatusPatch {
                state: Some(AgentState::Acting),
                current_task: Some(Some("browse docs".to_string())),
                ..StatusPatch::default()
            }),
            ..ack_envelope()
        };
        let cleared = Envelope {
            frame: Frame::HistoryCleared(HistoryClearedPayload { success: true }),
            ..ack_envelope()
        };
        let server_error = Envelope {
            frame: Frame::ServerError(ServerErrorPayload {
                message: "model unavailable".to_string(),
            }),
            ..ack_envelope()
        };
        let send = Envelope {
            frame: Frame::SendMessage(SendMessagePayload {
                local_id: 3,
                text: "hi".to_string(),
            }),
            ..ack_envelope()
        };
        let request_history = Envelope {
            frame: Frame::RequestHistory,
            ..ack_envelope()
        };
        let request_status = Envelope {
            frame: Frame::RequestStatus,
            ..ack_envelope()
        };
        let clear = Envelope {
            frame: Frame::ClearHistory,
            ..ack_envelope()
        };

        for envelope in [
            ack_envelope(),
            confirmed,
            received,
            history,
            status,
            patch,
            cleared,
            server_error,
            send,
            request_history,
            request_status,
            clear,
        ] {
            let frame = encode_frame(&envelope, DEFAULT_MAX_FRAME_BYTES).expect("encode");
            let decoded: Envelope =
                decode_frame(&frame, DEFAULT_MAX_FRAME_BYTES).expect("decode");
            assert_eq!(decoded, envelope);
        }
    }

    #[test]
    fn request_frames_carry_no_payload_key() {
        let encoded =
            encode_frame(&ack_envelope(), DEFAULT_MAX_FRAME_BYTES).expect("encode");
        assert!(encoded.contains(r#""type":"connection_ack""#));
        assert!(!encoded.contains("payload"));
    }

    #[test]
    fn unknown_discriminator_decodes_to_catch_all() {
        let envelope: Envelope = decode_frame(
            r#"{
                "version": "1",
                "conversation_id": "conv-alpha",
                "sent_at": "2026-08-20T09:30:00Z",
                "type": "presence_blip",
                "payload": {"who": "someone"}
            }"#,
            DEFAULT_MAX_FRAME_BYTES,
        )
        .expect("decode");
        assert_eq!(envelope.frame, Frame::Unknown);
    }

    #[test]
    fn unknown_discriminator_without_payload_decodes_to_catch_all() {
        let envelope: Envelope = decode_frame(
            r#"{
                "version": "1",
                "conversation_id": "conv-alpha",
                "sent_at": "2026-08-20T09:30:00Z",
                "type": "presence_blip"
            }"#,
            DEFAULT_MAX_FRAME_BYTES,
        )
        .expect("decode");
        assert_eq!(envelope.frame, Frame::Unknown);
    }

    #[test]
    fn known_discriminator_without_payload_is_a_decode_error() {
        let result: Result<Envelope, FrameError> = decode_frame(
            r#"{
                "version": "1",
                "conversation_id": "conv-alpha",
                "sent_at": "2026-08-20T09:30:00Z",
                "type": "send_message"
            }"#,
            DEFAULT_MAX_FRAME_BYTES,
        );
        assert!(matches!(result, Err(FrameError::Decode(_))));
    }

    #[test]
    fn encoder_rejects_oversized_payload() {
        let envelope = Envelope {
            frame: Frame::SendMessage(SendMessagePayload {
                local_id: 1,
                text: "x".repeat(256),
            }),
            ..ack_envelope()
        };

        let result = encode_frame(&envelope, 64);
        assert!(matches!(result, Err(FrameError::OversizedFrame { .. })));
    }

    #[test]
    fn decoder_rejects_oversized_text() {
        let oversized = format!("{{\"blob\":\"{}\"}}", "x".repeat(2_000));
        let result: Result<Envelope, FrameError> = decode_frame(&oversized, 1_024);
        assert!(matches!(result, Err(FrameError::OversizedFrame { .. })));
    }

    #[test]
    fn malformed_json_reports_decode_error() {
        let result: Result<Envelope, FrameError> =
            decode_frame("{\"type\":", DEFAULT_MAX_FRAME_BYTES);
        assert!(matches!(result, Err(FrameError::Decode(_))));
    }

    #[test]
    fn version_field_accepts_string_number_and_missing() {
        let string_version: Envelope = serde_json::from_str(
            r#"{
                "version": "1",
                "conversation_id": "conv-alpha",
                "sent_at": "2026-08-20T09:30:00Z",
                "type": "request_status"
            }"#,
        )
        .expect("parse string version");
        assert_eq!(string_version.version, ProtocolVersion(1));

        let numeric_version: Envelope = serde_json::from_str(
            r#"{
                "version": 1,
                "conversation_id": "conv-alpha",
                "sent_at": "2026-08-20T09:30:00Z",
                "type": "request_status"
            }"#,
        )
        .expect("parse numeric version");
        assert_eq!(numeric_version.version, ProtocolVersion(1));

        let missing_version: Envelope = serde_json::from_str(
            r#"{
                "conversation_id": "conv-alpha",
                "sent_at": "2026-08-20T09:30:00Z",
                "type": "request_status"
            }"#,
        )
        .expect("parse missing version");
        assert_eq!(missing_version.version, ProtocolVersion::CURRENT);
    }
}
