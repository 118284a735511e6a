//! Typed gateway events.
//!
//! The gateway module deserialises payloads into [`GatewayEvent`] so the bot
//! loop can pattern-match on typed data instead of raw JSON.

use serde::de::DeserializeOwned;
use tracing::warn;

use crate::types::*;

/// A parsed event coming off the Discord gateway.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// We've identified successfully; the bot is ready.
    Ready(ReadyEvent),

    /// A resumed session has replayed everything it missed.
    Resumed,

    /// A slash command (or other interaction) was used.
    InteractionCreate(Box<Interaction>),

    /// Heartbeat ACK from the gateway (op 11).
    HeartbeatAck,

    /// The gateway is asking us to heartbeat immediately (op 1).
    HeartbeatRequest,

    /// Gateway told us to reconnect (op 7).
    Reconnect,

    /// Session has been invalidated (op 9). `true` when it can be resumed.
    InvalidSession(bool),

    /// Anything we don't act on.
    Unknown {
        event_name: Option<String>,
        op: u8,
    },
}

impl GatewayEvent {
    /// Convert a raw [`GatewayPayload`]. Never fails: anything unrecognised
    /// or malformed becomes [`GatewayEvent::Unknown`].
    pub fn from_payload(payload: GatewayPayload) -> Self {
        match payload.op {
            0 => Self::parse_dispatch(payload.t, payload.d),
            1 => GatewayEvent::HeartbeatRequest,
            7 => GatewayEvent::Reconnect,
            9 => GatewayEvent::InvalidSession(
                payload.d.as_ref().and_then(|v| v.as_bool()).unwrap_or(false),
            ),
            11 => GatewayEvent::HeartbeatAck,
            op => GatewayEvent::Unknown {
                event_name: payload.t,
                op,
            },
        }
    }

    fn parse_dispatch(event_name: Option<String>, data: Option<serde_json::Value>) -> Self {
        let unknown = |event_name: Option<String>| GatewayEvent::Unknown { event_name, op: 0 };

        match (event_name.as_deref(), data) {
            (Some("READY"), Some(d)) => {
                parse::<ReadyEvent>("READY", d).map_or_else(|| unknown(event_name), Self::Ready)
            }
            (Some("RESUMED"), _) => GatewayEvent::Resumed,
            (Some("INTERACTION_CREATE"), Some(d)) => parse::<Interaction>("INTERACTION_CREATE", d)
                .map_or_else(
                    || unknown(event_name),
                    |i| Self::InteractionCreate(Box::new(i)),
                ),
            _ => unknown(event_name),
        }
    }
}

fn parse<T: DeserializeOwned>(name: &str, data: serde_json::Value) -> Option<T> {
    match serde_json::from_value(data) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(event = name, error = %e, "failed to parse gateway payload");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: serde_json::Value) -> GatewayPayload {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn parses_ready() {
        let event = GatewayEvent::from_payload(payload(json!({
            "op": 0, "s": 1, "t": "READY",
            "d": {
                "v": 10,
                "user": { "id": "1", "username": "heist-bot" },
                "session_id": "abc",
                "resume_gateway_url": "wss://resume.discord.gg",
                "application": { "id": "99", "flags": 0 }
            }
        })));
        match event {
            GatewayEvent::Ready(ready) => {
                assert_eq!(ready.session_id, "abc");
                assert_eq!(ready.application.id, "99");
            }
            other => panic!("expected Ready, got {:?}", other),
        }
    }

    #[test]
    fn parses_interaction() {
        let event = GatewayEvent::from_payload(payload(json!({
            "op": 0, "s": 2, "t": "INTERACTION_CREATE",
            "d": {
                "id": "5", "application_id": "99", "type": 2, "token": "t",
                "guild_id": "10", "channel_id": "20",
                "data": { "name": "heist", "options": [] }
            }
        })));
        assert!(matches!(
            event,
            GatewayEvent::InteractionCreate(ref i) if i.command_name() == Some("heist")
        ));
    }

    #[test]
    fn malformed_dispatch_is_unknown() {
        let event = GatewayEvent::from_payload(payload(json!({
            "op": 0, "t": "READY", "d": { "nope": true }
        })));
        assert!(matches!(
            event,
            GatewayEvent::Unknown { event_name: Some(ref n), op: 0 } if n == "READY"
        ));
    }

    #[test]
    fn control_ops() {
        let op = |n: u8, d: serde_json::Value| {
            GatewayEvent::from_payload(payload(json!({ "op": n, "d": d })))
        };
        assert!(matches!(op(1, json!(null)), GatewayEvent::HeartbeatRequest));
        assert!(matches!(op(7, json!(null)), GatewayEvent::Reconnect));
        assert!(matches!(op(9, json!(true)), GatewayEvent::InvalidSession(true)));
        assert!(matches!(op(11, json!(null)), GatewayEvent::HeartbeatAck));
        assert!(matches!(op(42, json!(null)), GatewayEvent::Unknown { op: 42, .. }));
    }
}
