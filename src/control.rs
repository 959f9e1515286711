//! Messages exchanged with connected clients.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;

/// A directive sent to the worker by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
  /// `{ "type": "SKIP_WAITING" }` - promote the waiting version now
  SkipWaiting,
  /// `{ "type": "GET_VERSION" }` - reply with the version tag
  GetVersion,
}

impl ControlMessage {
  /// Decode a message body. Anything that is not a known directive is `None`.
  pub fn parse(data: &Value) -> Option<Self> {
    match data.get("type").and_then(Value::as_str)? {
      "SKIP_WAITING" => Some(Self::SkipWaiting),
      "GET_VERSION" => Some(Self::GetVersion),
      _ => None,
    }
  }
}

/// Reply to `GET_VERSION`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionReply {
  pub version: String,
}

/// The reply channel a client hands over with its message.
pub type ReplyPort = oneshot::Sender<VersionReply>;

/// Events the worker pushes to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundEvent {
  BackgroundSyncComplete,
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_parse_known_directives() {
    assert_eq!(
      ControlMessage::parse(&json!({"type": "SKIP_WAITING"})),
      Some(ControlMessage::SkipWaiting)
    );
    assert_eq!(
      ControlMessage::parse(&json!({"type": "GET_VERSION", "extra": 1})),
      Some(ControlMessage::GetVersion)
    );
  }

  #[test]
  fn test_parse_ignores_everything_else() {
    assert_eq!(ControlMessage::parse(&json!({"type": "skip_waiting"})), None);
    assert_eq!(ControlMessage::parse(&json!({"kind": "GET_VERSION"})), None);
    assert_eq!(ControlMessage::parse(&json!("SKIP_WAITING")), None);
    assert_eq!(ControlMessage::parse(&Value::Null), None);
  }

  #[test]
  fn test_outbound_event_wire_format() {
    let value = serde_json::to_value(OutboundEvent::BackgroundSyncComplete).unwrap();
    assert_eq!(value, json!({"type": "BACKGROUND_SYNC_COMPLETE"}));
  }

  #[test]
  fn test_version_reply_wire_format() {
    let reply = VersionReply {
      version: "okapichat-v1.0.0".to_string(),
    };
    assert_eq!(
      serde_json::to_value(reply).unwrap(),
      json!({"version": "okapichat-v1.0.0"})
    );
  }
}
