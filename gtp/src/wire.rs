//! On-the-wire representation of MPC messages: a line of JSON-like object
//! text with string keys and string/integer values, per `type`.

use serde::{Deserialize, Serialize};

use crate::error::GtpError;
use crate::field::FieldConfig;

/// The classifier tag used for `Demultiplexer::await_message`. Distinct
/// from `MpcMessage` so callers can match on type without destructuring.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Share,
    GuessShare,
    DiffShare,
    StartCheck,
    Barrier,
}

/// A single MPC protocol message, tagged on `type` in its wire form.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum MpcMessage {
    #[serde(rename = "share")]
    Share { from: String, sx: u64, sy: u64 },

    #[serde(rename = "guess_share")]
    GuessShare {
        from: String,
        guesser: String,
        sx: u64,
        sy: u64,
    },

    #[serde(rename = "diff_share")]
    DiffShare {
        from: String,
        guesser: String,
        dx: u64,
        dy: u64,
    },

    #[serde(rename = "start_check")]
    StartCheck { guesser: String },

    #[serde(rename = "barrier")]
    Barrier { from: String, name: String },
}

impl MpcMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            MpcMessage::Share { .. } => MessageKind::Share,
            MpcMessage::GuessShare { .. } => MessageKind::GuessShare,
            MpcMessage::DiffShare { .. } => MessageKind::DiffShare,
            MpcMessage::StartCheck { .. } => MessageKind::StartCheck,
            MpcMessage::Barrier { .. } => MessageKind::Barrier,
        }
    }

    /// Field-valued payloads carried by this message, for range validation.
    fn field_values(&self) -> Vec<u64> {
        match self {
            MpcMessage::Share { sx, sy, .. } => vec![*sx, *sy],
            MpcMessage::GuessShare { sx, sy, .. } => vec![*sx, *sy],
            MpcMessage::DiffShare { dx, dy, .. } => vec![*dx, *dy],
            MpcMessage::StartCheck { .. } => vec![],
            MpcMessage::Barrier { .. } => vec![],
        }
    }
}

/// Encode a message to its wire line (without relay framing).
pub fn encode(msg: &MpcMessage) -> Result<String, GtpError> {
    serde_json::to_string(msg).map_err(|e| GtpError::Malformed(e.to_string()))
}

/// Result of classifying one raw, already-deframed line from the relay.
pub enum Frame {
    /// A well-formed MPC message with all field values in range.
    Message(MpcMessage),
    /// Something that isn't an MPC payload at all (relay chatter): logged
    /// and dropped by the caller, not an error.
    Chatter,
}

/// Classify a raw line: relay chatter, a valid MPC message, or a parse
/// failure (`malformed`/`out_of_range`).
pub fn classify(raw: &str, field: &FieldConfig) -> Result<Frame, GtpError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || !trimmed.starts_with('{') {
        return Ok(Frame::Chatter);
    }

    let value: serde_json::Value =
        serde_json::from_str(trimmed).map_err(|e| GtpError::Malformed(e.to_string()))?;

    if value.get("type").and_then(|t| t.as_str()).is_none() {
        return Err(GtpError::Malformed(
            "frame missing or has unrecognized 'type' field".to_string(),
        ));
    }

    let msg: MpcMessage = serde_json::from_value(value)
        .map_err(|e| GtpError::Malformed(format!("unrecognized message shape: {e}")))?;

    for v in msg.field_values() {
        if v >= field.prime() {
            return Err(GtpError::OutOfRange(format!(
                "{v} is not in [0, {})",
                field.prime()
            )));
        }
    }

    Ok(Frame::Message(msg))
}

/// Decode a raw line directly into an `MpcMessage`, treating relay chatter
/// as malformed. Used where a caller already knows the line is a payload.
pub fn decode(raw: &str, field: &FieldConfig) -> Result<MpcMessage, GtpError> {
    match classify(raw, field)? {
        Frame::Message(msg) => Ok(msg),
        Frame::Chatter => Err(GtpError::Malformed("not an MPC payload".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field() -> FieldConfig {
        FieldConfig::new(2_147_483_647)
    }

    #[test]
    fn round_trips_every_message_shape() {
        let field = field();
        let messages = vec![
            MpcMessage::Share {
                from: "alice".into(),
                sx: 1,
                sy: 2,
            },
            MpcMessage::GuessShare {
                from: "alice".into(),
                guesser: "bob".into(),
                sx: 3,
                sy: 4,
            },
            MpcMessage::DiffShare {
                from: "alice".into(),
                guesser: "bob".into(),
                dx: 5,
                dy: 6,
            },
            MpcMessage::StartCheck {
                guesser: "carol".into(),
            },
            MpcMessage::Barrier {
                from: "alice".into(),
                name: "game_start".into(),
            },
        ];

        for msg in messages {
            let line = encode(&msg).unwrap();
            let decoded = decode(&line, &field).unwrap();
            assert_eq!(decoded, msg);
        }
    }

    #[test]
    fn missing_type_is_malformed() {
        let field = field();
        let err = decode(r#"{"from":"alice","sx":1,"sy":2}"#, &field).unwrap_err();
        assert!(matches!(err, GtpError::Malformed(_)));
    }

    #[test]
    fn unknown_type_is_malformed() {
        let field = field();
        let err = decode(r#"{"type":"teleport","from":"alice"}"#, &field).unwrap_err();
        assert!(matches!(err, GtpError::Malformed(_)));
    }

    #[test]
    fn out_of_range_field_value_is_rejected() {
        let field = FieldConfig::new(10);
        let err = decode(r#"{"type":"share","from":"a","sx":50,"sy":1}"#, &field).unwrap_err();
        assert!(matches!(err, GtpError::OutOfRange(_)));
    }

    #[test]
    fn plain_text_is_classified_as_chatter() {
        let field = field();
        match classify("available connections: alice, bob", &field).unwrap() {
            Frame::Chatter => {}
            Frame::Message(_) => panic!("expected chatter"),
        }
    }
}
