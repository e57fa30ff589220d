//! The envelope wire format: `{event, meta, data}`.
//!
//! Every CWDTP frame is a single UTF-8 text frame carrying exactly this
//! JSON shape. `meta` carries control-plane fields (`req_key`, `res_key`,
//! `cid`, `reason`, `error`); `data` carries the application payload and is
//! passed through [`crate::codec`] for typed-binary values.

use crate::error::InvalidEventNameCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Event names reserved for the control plane. Application code may never
/// `send`/`on` any of these directly; the connection state machine
/// generates and consumes them internally.
pub const RESERVED_EVENTS: &[&str] = &[
    "cwdtp::client-hello",
    "cwdtp::server-hello",
    "cwdtp::server-hello-ack",
    "cwdtp::ping",
    "cwdtp::pong",
    "cwdtp::close",
    "cwdtp::close-ack",
    "cwdtp::error",
];

pub const EVENT_CLIENT_HELLO: &str = "cwdtp::client-hello";
pub const EVENT_SERVER_HELLO: &str = "cwdtp::server-hello";
pub const EVENT_SERVER_HELLO_ACK: &str = "cwdtp::server-hello-ack";
pub const EVENT_PING: &str = "cwdtp::ping";
pub const EVENT_PONG: &str = "cwdtp::pong";
pub const EVENT_CLOSE: &str = "cwdtp::close";
pub const EVENT_CLOSE_ACK: &str = "cwdtp::close-ack";
pub const EVENT_ERROR: &str = "cwdtp::error";

/// Prefix that marks an event name as reserved, independent of the
/// enumerated list above (kept for symmetry with the specification's
/// definition: "names beginning with `cwdtp::` are reserved").
const RESERVED_PREFIX: &str = "cwdtp::";

/// Returns whether `event` is a reserved (control-plane) event name.
pub fn is_reserved(event: &str) -> bool {
    event.starts_with(RESERVED_PREFIX)
}

/// Validates an event name an application wants to use with `send`/`on`.
pub fn validate_event_name(event: &str) -> Result<(), InvalidEventNameCode> {
    if event.is_empty() {
        return Err(InvalidEventNameCode::EmptyEventName);
    }
    if is_reserved(event) {
        return Err(InvalidEventNameCode::ReservedEvent);
    }
    Ok(())
}

/// The wire envelope. `meta` is a free-form JSON object; `data` is a JSON
/// array whose elements may already contain typed-binary marker objects
/// (see [`crate::codec`]) — this type does not itself decode them, so that
/// envelope (de)serialization stays independent of the codec.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub event: String,
    pub meta: Map<String, Value>,
    pub data: Vec<Value>,
}

impl Envelope {
    pub fn new(event: impl Into<String>, meta: Map<String, Value>, data: Vec<Value>) -> Self {
        Envelope {
            event: event.into(),
            meta,
            data,
        }
    }

    /// Builds an envelope with empty `meta`/`data`, used for the bare
    /// control-plane handshakes/acks that carry no payload.
    pub fn bare(event: &str) -> Self {
        Envelope {
            event: event.to_string(),
            meta: Map::new(),
            data: Vec::new(),
        }
    }

    pub fn to_json_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parses a raw text frame into an [`Envelope`], enforcing the
    /// `event`/`meta`/`data` shape — missing fields or an empty/non-string
    /// `event` is `INVALID_CWDTP`. Presence checking of `event` as
    /// non-empty is *not* done here (that rule applies to outgoing
    /// `send`/`on` calls, per §4.C, not to inbound parsing); an inbound
    /// envelope with an empty `event` is accepted and simply never matches
    /// a reserved name nor a registered handler.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_events_are_rejected() {
        for event in RESERVED_EVENTS {
            assert_eq!(
                validate_event_name(event),
                Err(InvalidEventNameCode::ReservedEvent)
            );
        }
    }

    #[test]
    fn empty_event_name_is_rejected() {
        assert_eq!(
            validate_event_name(""),
            Err(InvalidEventNameCode::EmptyEventName)
        );
    }

    #[test]
    fn ordinary_event_is_accepted() {
        assert_eq!(validate_event_name("player-move"), Ok(()));
    }

    #[test]
    fn round_trips_through_json() {
        let mut meta = Map::new();
        meta.insert("req_key".to_string(), Value::String("abc".to_string()));
        let envelope = Envelope::new("cwdtp::client-hello", meta, vec![]);
        let text = envelope.to_json_text().unwrap();
        let parsed = Envelope::parse(&text).unwrap();
        assert_eq!(envelope, parsed);
    }

    #[test]
    fn missing_fields_fail_to_parse() {
        assert!(Envelope::parse(r#"{"event":"x"}"#).is_err()); // missing meta/data
        assert!(Envelope::parse(r#"{"meta":{},"data":[]}"#).is_err()); // no event
        assert!(Envelope::parse("not json").is_err());
    }
}
