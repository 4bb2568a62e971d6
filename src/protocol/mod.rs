//! Wire Protocol
//!
//! Message model shared by the live connection and the HTTP fallback path,
//! plus the structural validator applied before anything is dispatched or sent.
//!
//! ## Frames
//!
//! Every WebSocket text frame is a JSON envelope:
//!
//! ```json
//! {"kind": "question", "payload": {"question": "hi"}, "sentAt": "2024-05-01T12:00:00Z"}
//! ```
//!
//! - `question` / `status` / `response` / `error` - application messages
//! - `ping` / `pong` - liveness control frames, never exposed to listeners
//!
//! A [`Frame`] carries any kind string. It only becomes a [`Message`] after
//! it passes [`validate_frame`].

mod message;
mod validator;

pub use message::{
    ErrorPayload, Frame, Message, MessageKind, QuestionPayload, ResponsePayload, StatusPayload,
    StatusStage, PING, PONG,
};
pub use validator::{
    validate, validate_frame, validate_payload, ValidationError, ValidationReport,
    MAX_QUESTION_CHARS,
};
