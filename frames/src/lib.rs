//! Event frame model and JSON codec for the realtime websocket protocol.
//!
//! This crate owns the wire representation used by both connection roles.
//! A frame names an event and carries positional arguments. Function-typed
//! arguments never travel as values: the sender writes `null` in their slot
//! and lists the slot in `callbacks` together with a correlation id. When the
//! receiver invokes the callback, it sends a new frame whose `reply_to` holds
//! that id, so the origin can match the reply without inspecting event names.
//!
//! ```text
//! { "event": "sum", "args": [2, 3, null], "callbacks": [{"index": 2, "id": 7}] }
//! { "event": "__sum:callback_2", "args": [5], "reply_to": 7 }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Per-connection correlation id assigned to a callback argument.
pub type CallbackId = u64;

/// Error returned by [`decode_frame`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The text is not parseable JSON.
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// The JSON document is not an object.
    #[error("frame is not a JSON object")]
    NotAnObject,
    /// The object has no `event` field.
    #[error("frame has no `event` field")]
    MissingEvent,
    /// A known field is present with the wrong JSON type.
    #[error("frame field `{0}` has the wrong type")]
    InvalidField(&'static str),
    /// A callback slot points past the end of `args`.
    #[error("callback slot {index} is out of range for {len} args")]
    CallbackOutOfRange { index: usize, len: usize },
    /// The same argument position is listed twice in `callbacks`.
    #[error("callback slot {0} is listed more than once")]
    DuplicateCallback(usize),
}

/// One positional argument as it exists on the wire.
#[derive(Clone, Debug, PartialEq)]
pub enum WireArg {
    /// Structural JSON data, passed through untouched.
    Value(Value),
    /// Placeholder for a function owned by the sender.
    Callback(CallbackId),
}

impl From<Value> for WireArg {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

/// A single message on the event protocol.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    /// Application event name, or the informational correlation name on replies.
    pub event: String,
    /// Ordered positional arguments.
    pub args: Vec<WireArg>,
    /// Correlation id of the callback this frame resolves, if it is a reply.
    pub reply_to: Option<CallbackId>,
}

impl Frame {
    /// Create an application event frame.
    pub fn new(event: impl Into<String>, args: Vec<WireArg>) -> Self {
        Self { event: event.into(), args, reply_to: None }
    }

    /// Create a correlation reply for the callback registered as `reply_to`.
    pub fn reply(reply_to: CallbackId, event: impl Into<String>, args: Vec<WireArg>) -> Self {
        Self { event: event.into(), args, reply_to: Some(reply_to) }
    }

    #[must_use]
    pub fn is_reply(&self) -> bool {
        self.reply_to.is_some()
    }

    /// Positions and ids of every callback placeholder, in argument order.
    pub fn callback_slots(&self) -> impl Iterator<Item = (usize, CallbackId)> + '_ {
        self.args.iter().enumerate().filter_map(|(index, arg)| match arg {
            WireArg::Callback(id) => Some((index, *id)),
            WireArg::Value(_) => None,
        })
    }
}

/// Human-readable event name for a reply to the callback at `index` of `event`.
#[must_use]
pub fn correlation_event_name(event: &str, index: usize) -> String {
    format!("__{event}:callback_{index}")
}

/// Encode a frame as one JSON text message.
#[must_use]
pub fn encode_frame(frame: &Frame) -> String {
    let wire = frame_to_wire(frame);
    // Serializing plain strings, integers and `Value`s cannot fail; the only
    // serde_json error source for this shape would be non-string map keys.
    serde_json::to_string(&wire).unwrap_or_default()
}

/// Decode one JSON text message into a frame.
///
/// # Errors
///
/// Returns [`CodecError::Json`] for unparseable text, [`CodecError::NotAnObject`]
/// and [`CodecError::MissingEvent`] for structurally invalid frames, and the
/// remaining variants for malformed optional fields.
pub fn decode_frame(text: &str) -> Result<Frame, CodecError> {
    let Value::Object(map) = serde_json::from_str::<Value>(text)? else {
        return Err(CodecError::NotAnObject);
    };
    let wire = object_to_wire(map)?;
    wire_to_frame(wire)
}

// =============================================================================
// WIRE CONVERSION
// =============================================================================

#[derive(Debug, Serialize)]
struct WireFrame {
    event: String,
    args: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    callbacks: Vec<WireCallback>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<CallbackId>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireCallback {
    index: usize,
    id: CallbackId,
}

fn frame_to_wire(frame: &Frame) -> WireFrame {
    WireFrame {
        event: frame.event.clone(),
        args: frame
            .args
            .iter()
            .map(|arg| match arg {
                WireArg::Value(v) => v.clone(),
                WireArg::Callback(_) => Value::Null,
            })
            .collect(),
        callbacks: frame
            .callback_slots()
            .map(|(index, id)| WireCallback { index, id })
            .collect(),
        reply_to: frame.reply_to,
    }
}

fn object_to_wire(mut map: Map<String, Value>) -> Result<WireFrame, CodecError> {
    let event = match map.remove("event") {
        None => return Err(CodecError::MissingEvent),
        Some(Value::String(event)) => event,
        Some(_) => return Err(CodecError::InvalidField("event")),
    };

    let args = match map.remove("args") {
        None => Vec::new(),
        Some(Value::Array(args)) => args,
        Some(_) => return Err(CodecError::InvalidField("args")),
    };

    let callbacks = match map.remove("callbacks") {
        None => Vec::new(),
        Some(v) => serde_json::from_value::<Vec<WireCallback>>(v)
            .map_err(|_| CodecError::InvalidField("callbacks"))?,
    };

    let reply_to = match map.remove("reply_to") {
        None | Some(Value::Null) => None,
        Some(v) => Some(v.as_u64().ok_or(CodecError::InvalidField("reply_to"))?),
    };

    Ok(WireFrame { event, args, callbacks, reply_to })
}

fn wire_to_frame(wire: WireFrame) -> Result<Frame, CodecError> {
    let len = wire.args.len();
    let mut args: Vec<WireArg> = wire.args.into_iter().map(WireArg::Value).collect();

    for slot in wire.callbacks {
        let Some(arg) = args.get_mut(slot.index) else {
            return Err(CodecError::CallbackOutOfRange { index: slot.index, len });
        };
        if matches!(arg, WireArg::Callback(_)) {
            return Err(CodecError::DuplicateCallback(slot.index));
        }
        *arg = WireArg::Callback(slot.id);
    }

    Ok(Frame { event: wire.event, args, reply_to: wire.reply_to })
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
