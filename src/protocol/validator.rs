//! Message Validation
//!
//! Per-kind structural rules checked at the transport boundary. Every rule
//! collects all of its errors instead of stopping at the first one.

use chrono::DateTime;
use serde_json::Value;
use thiserror::Error;

use super::message::{Frame, Message, MessageKind};

/// Maximum length of a question, in characters
pub const MAX_QUESTION_CHARS: usize = 1000;

const STATUS_STAGES: [&str; 3] = ["processing", "generating", "complete"];

/// Outcome of validating one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn into_result(self) -> Result<(), ValidationError> {
        if self.valid {
            Ok(())
        } else {
            Err(ValidationError {
                errors: self.errors,
            })
        }
    }
}

/// A message failed structural validation
#[derive(Debug, Clone, Error)]
#[error("Invalid message: {}", .errors.join("; "))]
pub struct ValidationError {
    pub errors: Vec<String>,
}

/// Validate a constructed message
pub fn validate(message: &Message) -> ValidationReport {
    validate_payload(message.kind().as_str(), message.payload())
}

/// Validate an inbound frame, including its `sentAt` timestamp
pub fn validate_frame(frame: &Frame) -> ValidationReport {
    let mut errors = validate_payload(&frame.kind, &frame.payload).errors;

    match frame.sent_at.as_deref() {
        None => errors.push("sentAt is required".to_string()),
        Some(ts) if DateTime::parse_from_rfc3339(ts).is_err() => {
            errors.push("sentAt must be an ISO-8601 timestamp".to_string())
        }
        Some(_) => {}
    }

    ValidationReport::from_errors(errors)
}

/// Validate a payload against the rules of the named kind
pub fn validate_payload(kind: &str, payload: &Value) -> ValidationReport {
    let errors = match MessageKind::parse(kind) {
        Some(MessageKind::Question) => question_errors(payload),
        Some(MessageKind::Response) => response_errors(payload),
        Some(MessageKind::Status) => status_errors(payload),
        Some(MessageKind::Error) => error_errors(payload),
        None => vec![format!("Unknown message type: {}", kind)],
    };
    ValidationReport::from_errors(errors)
}

/// Field lookup that treats an explicit `null` as absent
fn field<'a>(payload: &'a Value, name: &str) -> Option<&'a Value> {
    payload.get(name).filter(|v| !v.is_null())
}

fn question_errors(payload: &Value) -> Vec<String> {
    if !payload.is_object() {
        return vec!["Question payload is required".to_string()];
    }

    let mut errors = Vec::new();
    match field(payload, "question") {
        Some(Value::String(q)) => {
            if q.trim().is_empty() {
                errors.push("Question cannot be empty".to_string());
            }
            if q.chars().count() > MAX_QUESTION_CHARS {
                errors.push(format!(
                    "Question cannot exceed {} characters",
                    MAX_QUESTION_CHARS
                ));
            }
        }
        Some(_) => errors.push("Question must be a string".to_string()),
        None => errors.push("Question is required".to_string()),
    }

    if let Some(id) = field(payload, "conversationId") {
        if !id.is_string() {
            errors.push("conversationId must be a string".to_string());
        }
    }

    errors
}

fn response_errors(payload: &Value) -> Vec<String> {
    let mut errors = Vec::new();

    if field(payload, "conversationId").is_none() {
        errors.push("conversationId is required".to_string());
    }

    match field(payload, "response") {
        Some(Value::String(_)) => {}
        Some(_) => errors.push("response must be a string".to_string()),
        None => errors.push("response is required".to_string()),
    }

    if let Some(score) = field(payload, "confidenceScore") {
        match score.as_f64() {
            Some(s) if (0.0..=1.0).contains(&s) => {}
            _ => errors.push("confidenceScore must be a number between 0 and 1".to_string()),
        }
    }

    if let Some(time) = field(payload, "processingTime") {
        match time.as_f64() {
            Some(t) if t >= 0.0 => {}
            _ => errors.push("processingTime must be a non-negative number".to_string()),
        }
    }

    errors
}

fn status_errors(payload: &Value) -> Vec<String> {
    let mut errors = Vec::new();

    match field(payload, "status").and_then(Value::as_str) {
        Some(s) if STATUS_STAGES.contains(&s) => {}
        _ => errors.push(format!("status must be one of: {}", STATUS_STAGES.join(", "))),
    }

    if let Some(progress) = field(payload, "progress") {
        match progress.as_f64() {
            Some(p) if (0.0..=100.0).contains(&p) => {}
            _ => errors.push("progress must be a number between 0 and 100".to_string()),
        }
    }

    errors
}

fn error_errors(payload: &Value) -> Vec<String> {
    match field(payload, "message") {
        Some(Value::String(_)) => Vec::new(),
        Some(_) => vec!["Error message must be a string".to_string()],
        None => vec!["Error message is required".to_string()],
    }
}
