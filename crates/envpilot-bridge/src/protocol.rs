//! NDJSON wire protocol spoken with the host process
//!
//! Outbound: one request object per line, `{"id", "method", "params"}`.
//! Inbound: either a response `{"id", "result"?, "error"?}` or a named
//! event `{"event", "payload"}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use envpilot_core::BridgeEvent;

/// A raw host message (before parsing into typed events)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawMessage {
    /// A response to a request we sent
    Response {
        id: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<Value>,
    },
    /// An unsolicited named event
    Event {
        event: String,
        #[serde(default)]
        payload: Value,
    },
}

/// A parsed line from the host
#[derive(Debug, Clone, PartialEq)]
pub enum HostMessage {
    Response {
        id: u64,
        result: Option<Value>,
        error: Option<Value>,
    },
    Event(BridgeEvent),
}

impl HostMessage {
    /// Get a human-readable summary of this message
    pub fn summary(&self) -> String {
        match self {
            HostMessage::Response { id, error, .. } => {
                if error.as_ref().is_some_and(|e| !e.is_null()) {
                    format!("Response #{}: error", id)
                } else {
                    format!("Response #{}: ok", id)
                }
            }
            HostMessage::Event(event) => format!("Event: {}", event.name()),
        }
    }
}

/// Parse one stdout line from the host.
///
/// Returns `None` for blank lines, non-JSON chatter, and responses whose id
/// is not an unsigned integer.
pub fn parse_host_line(line: &str) -> Option<HostMessage> {
    let line = line.trim();
    if !line.starts_with('{') {
        return None;
    }

    match serde_json::from_str::<RawMessage>(line).ok()? {
        RawMessage::Response { id, result, error } => {
            let id = match &id {
                Value::Number(n) => n.as_u64()?,
                Value::String(s) => s.parse().ok()?,
                _ => return None,
            };
            Some(HostMessage::Response { id, result, error })
        }
        RawMessage::Event { event, payload } => {
            Some(HostMessage::Event(BridgeEvent::from_named(&event, payload)))
        }
    }
}

/// Encode an event the way the host would emit it (used by fakes and tests)
pub fn encode_event(name: &str, payload: &Value) -> String {
    serde_json::json!({ "event": name, "payload": payload }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use envpilot_core::events::InstallProgress;
    use serde_json::json;

    #[test]
    fn test_parse_success_response() {
        let msg = parse_host_line(r#"{"id": 3, "result": [{"name": "base"}]}"#).unwrap();
        assert_eq!(
            msg,
            HostMessage::Response {
                id: 3,
                result: Some(json!([{"name": "base"}])),
                error: None
            }
        );
        assert_eq!(msg.summary(), "Response #3: ok");
    }

    #[test]
    fn test_parse_error_response() {
        let msg = parse_host_line(r#"{"id": "4", "error": "Environment not found"}"#).unwrap();
        match msg {
            HostMessage::Response { id, error, .. } => {
                assert_eq!(id, 4);
                assert_eq!(error, Some(json!("Environment not found")));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_event() {
        let line = encode_event(
            "install-progress",
            &json!({"step": "install", "progress": 0.8, "message": "Installing Miniforge"}),
        );
        let msg = parse_host_line(&line).unwrap();
        assert_eq!(
            msg,
            HostMessage::Event(BridgeEvent::InstallProgress(InstallProgress::new(
                "install",
                0.8,
                "Installing Miniforge"
            )))
        );
        assert_eq!(msg.summary(), "Event: install-progress");
    }

    #[test]
    fn test_non_json_lines_ignored() {
        assert_eq!(parse_host_line(""), None);
        assert_eq!(parse_host_line("host starting..."), None);
        assert_eq!(parse_host_line("{not json"), None);
    }

    #[test]
    fn test_negative_id_rejected() {
        assert_eq!(parse_host_line(r#"{"id": -1, "result": null}"#), None);
    }
}
