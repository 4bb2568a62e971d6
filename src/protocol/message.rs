//! Message Types
//!
//! Defines the application message, its kinds and typed payloads, and the
//! JSON frame that carries them over the wire.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::validator::{validate_frame, ValidationError, ValidationReport};

/// Kind of a liveness frame
pub const PING: &str = "ping";

/// Kind of a liveness reply frame
pub const PONG: &str = "pong";

/// Closed set of application message kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// User question sent to the server
    Question,
    /// Progress update for a question being processed
    Status,
    /// Answer to a question
    Response,
    /// Error report
    Error,
}

impl MessageKind {
    pub const ALL: [MessageKind; 4] = [
        MessageKind::Question,
        MessageKind::Status,
        MessageKind::Response,
        MessageKind::Error,
    ];

    /// Wire name of this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Question => "question",
            MessageKind::Status => "status",
            MessageKind::Response => "response",
            MessageKind::Error => "error",
        }
    }

    /// Parse a wire name, returning `None` for anything outside the closed set
    pub fn parse(kind: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == kind)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON envelope exchanged over the persistent connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    /// Message kind, possibly unknown or a control kind
    pub kind: String,
    /// Kind-specific payload
    #[serde(default)]
    pub payload: Value,
    /// ISO-8601 send timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<String>,
}

impl Frame {
    /// Heartbeat ping
    pub fn ping() -> Self {
        Self::control(PING)
    }

    /// Heartbeat reply
    pub fn pong() -> Self {
        Self::control(PONG)
    }

    fn control(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            payload: Value::Object(Default::default()),
            sent_at: Some(Utc::now().to_rfc3339()),
        }
    }

    /// Whether this is a `ping`/`pong` liveness frame
    pub fn is_control(&self) -> bool {
        self.kind == PING || self.kind == PONG
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// An immutable application message
///
/// Fields are private; use the constructors and accessors. Anything that
/// changes a message produces a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    kind: MessageKind,
    payload: Value,
    sent_at: DateTime<Utc>,
}

impl Message {
    /// Create a message stamped with the current time
    pub fn new(kind: MessageKind, payload: Value) -> Self {
        Self::with_timestamp(kind, payload, Utc::now())
    }

    /// Create a message with an explicit send time
    pub fn with_timestamp(kind: MessageKind, payload: Value, sent_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            payload,
            sent_at,
        }
    }

    /// Build a `question` message
    pub fn question(question: impl Into<String>, conversation_id: Option<&str>) -> Self {
        let payload = QuestionPayload {
            question: question.into(),
            conversation_id: conversation_id.map(str::to_string),
        };
        Self::typed(MessageKind::Question, &payload)
    }

    /// Build a `status` message
    pub fn status(stage: StatusStage, progress: Option<f64>) -> Self {
        let payload = StatusPayload {
            status: stage,
            progress,
            message: None,
        };
        Self::typed(MessageKind::Status, &payload)
    }

    /// Build a `response` message
    pub fn response(payload: &ResponsePayload) -> Self {
        Self::typed(MessageKind::Response, payload)
    }

    /// Build an `error` message
    pub fn error(message: impl Into<String>) -> Self {
        let payload = ErrorPayload {
            message: message.into(),
            code: None,
            details: Vec::new(),
        };
        Self::typed(MessageKind::Error, &payload)
    }

    /// Build the `error` message emitted in place of a message that failed validation
    pub fn validation_failure(report: &ValidationReport) -> Self {
        let payload = ErrorPayload {
            message: format!("Invalid message: {}", report.errors.join("; ")),
            code: Some("VALIDATION_ERROR".to_string()),
            details: report.errors.clone(),
        };
        Self::typed(MessageKind::Error, &payload)
    }

    fn typed<T: Serialize>(kind: MessageKind, payload: &T) -> Self {
        // Payload structs only hold strings, numbers and options
        let payload = serde_json::to_value(payload).unwrap_or(Value::Null);
        Self::new(kind, payload)
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn sent_at(&self) -> DateTime<Utc> {
        self.sent_at
    }

    /// Decode the payload into one of the typed payload structs
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }

    /// Convenience accessor for the `question` text of a question message
    pub fn question_text(&self) -> Option<&str> {
        self.payload.get("question").and_then(Value::as_str)
    }

    /// Convenience accessor for the `conversationId` field
    pub fn conversation_id(&self) -> Option<&str> {
        self.payload.get("conversationId").and_then(Value::as_str)
    }

    /// Wire envelope for this message
    pub fn to_frame(&self) -> Frame {
        Frame {
            kind: self.kind.as_str().to_string(),
            payload: self.payload.clone(),
            sent_at: Some(self.sent_at.to_rfc3339()),
        }
    }
}

impl TryFrom<Frame> for Message {
    type Error = ValidationError;

    fn try_from(frame: Frame) -> Result<Self, Self::Error> {
        validate_frame(&frame).into_result()?;

        let kind = MessageKind::parse(&frame.kind).ok_or_else(|| ValidationError {
            errors: vec![format!("Unknown message type: {}", frame.kind)],
        })?;
        let sent_at = frame
            .sent_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
            .ok_or_else(|| ValidationError {
                errors: vec!["sentAt must be an ISO-8601 timestamp".to_string()],
            })?;

        Ok(Self::with_timestamp(kind, frame.payload, sent_at))
    }
}

/// Payload of a `question` message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionPayload {
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

/// Payload of a `response` message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsePayload {
    pub conversation_id: String,
    pub response: String,
    /// Model confidence in [0, 1]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<f64>,
    /// Server-side processing time in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieved_documents: Option<Vec<Value>>,
}

/// Stage reported by a `status` message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusStage {
    Processing,
    Generating,
    Complete,
}

/// Payload of a `status` message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPayload {
    pub status: StatusStage,
    /// Percentage in [0, 100]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Payload of an `error` message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_parse() {
        assert_eq!(MessageKind::parse("question"), Some(MessageKind::Question));
        assert_eq!(MessageKind::parse("error"), Some(MessageKind::Error));
        assert_eq!(MessageKind::parse("ping"), None);
        assert_eq!(MessageKind::parse("Question"), None);
    }

    #[test]
    fn test_message_serialize_uses_wire_names() {
        let msg = Message::question("hi", Some("conv-1"));
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"kind\":\"question\""));
        assert!(json.contains("\"conversationId\":\"conv-1\""));
        assert!(json.contains("\"sentAt\""));
    }

    #[test]
    fn test_question_without_conversation_omits_field() {
        let msg = Message::question("hi", None);
        assert_eq!(msg.payload(), &json!({"question": "hi"}));
        assert_eq!(msg.conversation_id(), None);
        assert_eq!(msg.question_text(), Some("hi"));
    }

    #[test]
    fn test_frame_deserialize_unknown_kind() {
        let frame = Frame::from_json(r#"{"kind":"telemetry","payload":{}}"#).unwrap();
        assert_eq!(frame.kind, "telemetry");
        assert!(frame.sent_at.is_none());

        let err = Message::try_from(frame).unwrap_err();
        assert!(err.errors.iter().any(|e| e.contains("Unknown message type")));
    }

    #[test]
    fn test_frame_into_message() {
        let frame = Frame::from_json(
            r#"{"kind":"status","payload":{"status":"generating","progress":40},"sentAt":"2024-05-01T12:00:00Z"}"#,
        )
        .unwrap();
        let msg = Message::try_from(frame).unwrap();
        assert_eq!(msg.kind(), MessageKind::Status);

        let status: StatusPayload = msg.payload_as().unwrap();
        assert_eq!(status.status, StatusStage::Generating);
        assert_eq!(status.progress, Some(40.0));
        assert_eq!(msg.sent_at().to_rfc3339(), "2024-05-01T12:00:00+00:00");
    }

    #[test]
    fn test_control_frames() {
        assert!(Frame::ping().is_control());
        assert!(Frame::pong().is_control());
        let json = Frame::ping().to_json().unwrap();
        assert!(json.contains("\"kind\":\"ping\""));
    }

    #[test]
    fn test_validation_failure_message() {
        let report = ValidationReport::from_errors(vec!["a".into(), "b".into()]);
        let msg = Message::validation_failure(&report);
        assert_eq!(msg.kind(), MessageKind::Error);

        let payload: ErrorPayload = msg.payload_as().unwrap();
        assert_eq!(payload.message, "Invalid message: a; b");
        assert_eq!(payload.code.as_deref(), Some("VALIDATION_ERROR"));
        assert_eq!(payload.details.len(), 2);
    }

    #[test]
    fn test_to_frame_round_trips_into_equal_message() {
        let original = Message::error("boom");
        let restored = Message::try_from(original.to_frame()).unwrap();
        assert_eq!(restored, original);
    }
}
