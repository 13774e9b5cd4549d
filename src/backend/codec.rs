//! Klippy wire codec.
//!
//! Every message on the Unix socket is a JSON document followed by a
//! single `0x03` terminator byte. There is no length prefix; JSON text
//! never contains a raw `0x03`, so the terminator is unambiguous.
//!
//! ```text
//! {"id": 7, "method": "info", "params": {}}\x03
//! {"id": 7, "result": {"state": "ready"}}\x03
//! {"method": "process_gcode_response", "params": {"response": "ok"}}\x03
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::RequestId;

/// Frame terminator byte.
pub const FRAME_TERMINATOR: u8 = 0x03;

/// Error text used when a response carries neither `result` nor `error`.
pub const MALFORMED_RESPONSE: &str = "Malformed Klippy Response";

/// Reasons a frame could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The frame body is not valid JSON.
    #[error("invalid json in frame: {0}")]
    Json(#[from] serde_json::Error),

    /// The frame is valid JSON but not an object.
    #[error("frame is not a json object")]
    NotAnObject,
}

/// Outbound request frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundRequest {
    /// Correlation id echoed back in the response.
    pub id: RequestId,
    /// Backend endpoint, e.g. `objects/subscribe`.
    pub method: String,
    /// Named parameters.
    pub params: Map<String, Value>,
}

/// Decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Backend-initiated call with no correlation id.
    Notification {
        /// Remote method name.
        method: String,
        /// Named parameters.
        params: Map<String, Value>,
    },
    /// Answer to an outbound request.
    Response {
        /// Correlation id, if the backend sent a usable one.
        id: Option<RequestId>,
        /// `result` payload or `error` message.
        outcome: Result<Value, String>,
    },
}

/// Serializes `request` and appends the terminator.
///
/// # Errors
///
/// Returns the `serde_json` error if the params cannot be serialized.
pub fn encode_frame(request: &OutboundRequest) -> Result<Vec<u8>, serde_json::Error> {
    let mut frame = serde_json::to_vec(request)?;
    frame.push(FRAME_TERMINATOR);
    Ok(frame)
}

/// Parses one frame. A single trailing terminator, if present, is
/// stripped first.
///
/// # Errors
///
/// Returns [`CodecError`] if the body is not a JSON object.
pub fn decode_frame(frame: &[u8]) -> Result<InboundMessage, CodecError> {
    let body = frame.strip_suffix(&[FRAME_TERMINATOR]).unwrap_or(frame);
    let Value::Object(mut doc) = serde_json::from_slice::<Value>(body)? else {
        return Err(CodecError::NotAnObject);
    };

    if let Some(Value::String(method)) = doc.remove("method") {
        let params = match doc.remove("params") {
            Some(Value::Object(params)) => params,
            _ => Map::new(),
        };
        return Ok(InboundMessage::Notification { method, params });
    }

    let id = doc.get("id").and_then(Value::as_u64).map(RequestId::new);
    let outcome = match (doc.remove("result"), doc.remove("error")) {
        (Some(result), _) => Ok(result),
        (None, Some(error)) => Err(error_message(error)),
        (None, None) => Err(MALFORMED_RESPONSE.to_string()),
    };
    Ok(InboundMessage::Response { id, outcome })
}

/// Extracts a human-readable message from an `error` field, which is a
/// plain string in the classic protocol and an object with `message` in
/// newer backends.
fn error_message(error: Value) -> String {
    match error {
        Value::String(message) => message,
        Value::Object(mut obj) => match obj.remove("message") {
            Some(Value::String(message)) => message,
            _ => Value::Object(obj).to_string(),
        },
        other => other.to_string(),
    }
}
