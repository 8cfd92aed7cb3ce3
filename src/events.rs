//! Typed gateway events.
//!
//! The gateway module deserialises dispatch payloads into [`GatewayEvent`] so
//! the event loop can pattern-match on strongly-typed data instead of raw
//! `(op, t, serde_json::Value)` tuples.

use tracing::warn;

use crate::gateway::GatewayError;
use crate::types::*;

// ---------------------------------------------------------------------------
// The top-level event enum
// ---------------------------------------------------------------------------

/// A fully-parsed event coming off the Discord gateway.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// We've successfully identified, the bot is ready.
    Ready(ReadyEvent),

    /// A message was created in a channel we can see.
    MessageCreate(Message),

    /// Heartbeat ACK from the gateway (op 11).
    HeartbeatAck,

    /// The gateway is asking us to heartbeat immediately (op 1).
    HeartbeatRequest,

    /// Gateway told us to reconnect (op 7).
    Reconnect,

    /// Session has been invalidated (op 9). The inner bool indicates whether
    /// the session is resumable.
    InvalidSession(bool),

    /// The connection is going away for good. Carries the reason when the
    /// gateway rejected us; `None` for an orderly shutdown.
    Closing(Option<GatewayError>),

    /// An event we received but don't have a typed variant for.
    Unknown {
        event_name: Option<String>,
        op: u8,
    },
}

// ---------------------------------------------------------------------------
// Parsing from a raw GatewayPayload
// ---------------------------------------------------------------------------

impl GatewayEvent {
    /// Convert a raw [`GatewayPayload`] into a typed event.
    ///
    /// This never fails. Unrecognised or unparseable events become
    /// [`GatewayEvent::Unknown`].
    pub fn from_payload(payload: GatewayPayload) -> Self {
        match payload.op {
            0 => Self::parse_dispatch(payload.t, payload.d),
            1 => GatewayEvent::HeartbeatRequest,
            7 => GatewayEvent::Reconnect,
            9 => {
                let resumable = payload
                    .d
                    .as_ref()
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                GatewayEvent::InvalidSession(resumable)
            }
            11 => GatewayEvent::HeartbeatAck,
            op => GatewayEvent::Unknown {
                event_name: payload.t,
                op,
            },
        }
    }

    /// Parse an op-0 DISPATCH event by its `t` name.
    fn parse_dispatch(event_name: Option<String>, data: Option<serde_json::Value>) -> Self {
        let unknown = |event_name| GatewayEvent::Unknown { event_name, op: 0 };

        let Some(d) = data else {
            return unknown(event_name);
        };
        let Some(name) = event_name.as_deref() else {
            return unknown(None);
        };

        match name {
            "READY" => match serde_json::from_value::<ReadyEvent>(d) {
                Ok(ready) => GatewayEvent::Ready(ready),
                Err(e) => {
                    warn!(event = name, error = %e, "failed to parse READY payload");
                    unknown(Some(name.to_string()))
                }
            },

            "MESSAGE_CREATE" => match serde_json::from_value::<Message>(d) {
                Ok(msg) => GatewayEvent::MessageCreate(msg),
                Err(e) => {
                    warn!(event = name, error = %e, "failed to parse MESSAGE_CREATE payload");
                    unknown(Some(name.to_string()))
                }
            },

            _ => unknown(Some(name.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
