use base64::Engine as _;
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::{error, warn};
use url::Url;

use crate::clients::ClientInfo;
use crate::notify::NotificationDescriptor;
use crate::request::{Destination, Request};

/// A signal from the host, one JSON object per line tagged by `signal`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "signal", rename_all = "lowercase")]
pub enum Signal {
  Install,
  Activate,
  Fetch(FetchSignal),
  Push {
    /// A string is used as the raw payload; anything else is re-encoded
    #[serde(default)]
    payload: Option<Value>,
  },
  NotificationClick {
    notification: NotificationDescriptor,
    #[serde(default)]
    action: Option<String>,
  },
  Sync {
    tag: String,
  },
  BackgroundFetch {
    tag: String,
  },
  Message {
    #[serde(default)]
    client: Option<String>,
    /// Correlation id; a reply is only produced when present
    #[serde(default)]
    reply: Option<String>,
    #[serde(default)]
    data: Value,
  },
  #[serde(rename = "client.connect")]
  ClientConnect(ClientInfo),
  #[serde(rename = "client.disconnect")]
  ClientDisconnect { id: String },
  #[serde(other)]
  Unknown,
}

/// One intercepted fetch as described by the host.
#[derive(Debug, Clone, Deserialize)]
pub struct FetchSignal {
  pub id: String,
  pub url: String,
  #[serde(default)]
  pub method: Option<String>,
  #[serde(default)]
  pub destination: String,
  #[serde(default)]
  pub headers: BTreeMap<String, String>,
  /// Base64 request body
  #[serde(default)]
  pub body: Option<String>,
}

impl FetchSignal {
  pub fn to_request(&self) -> Result<Request> {
    let url = Url::parse(&self.url).map_err(|e| eyre!("Invalid url '{}': {}", self.url, e))?;
    let method = match &self.method {
      Some(m) => Method::from_bytes(m.trim().to_ascii_uppercase().as_bytes())
        .map_err(|e| eyre!("Invalid method '{}': {}", m, e))?,
      None => Method::GET,
    };

    let mut request = Request::get(url)
      .with_method(method)
      .with_destination(Destination::from(self.destination.as_str()));
    for (name, value) in &self.headers {
      request = request.with_header(name, value);
    }
    if let Some(body) = &self.body {
      let body = base64::engine::general_purpose::STANDARD
        .decode(body)
        .map_err(|e| eyre!("Invalid request body: {}", e))?;
      request.body = Some(body.into());
    }
    Ok(request)
  }
}

/// Raw bytes of a push payload.
pub fn payload_bytes(payload: Option<&Value>) -> Option<Vec<u8>> {
  match payload? {
    Value::Null => None,
    Value::String(s) => Some(s.clone().into_bytes()),
    other => serde_json::to_vec(other).ok(),
  }
}

/// Reads host signals off a line-oriented input.
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<Signal>,
}

impl EventHandler {
  /// Spawn a reader over `input`. The stream of signals ends at EOF.
  pub fn new<R>(input: R) -> Self
  where
    R: AsyncRead + Unpin + Send + 'static,
  {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
      let mut lines = BufReader::new(input).lines();
      loop {
        match lines.next_line().await {
          Ok(Some(line)) => {
            let line = line.trim();
            if line.is_empty() {
              continue;
            }
            match serde_json::from_str::<Signal>(line) {
              Ok(signal) => {
                if tx.send(signal).is_err() {
                  break;
                }
              }
              Err(e) => warn!("Skipping malformed signal: {}", e),
            }
          }
          Ok(None) => break,
          Err(e) => {
            error!("Failed to read host input: {}", e);
            break;
          }
        }
      }
    });

    Self { rx }
  }

  pub fn stdin() -> Self {
    Self::new(tokio::io::stdin())
  }

  /// Receive the next signal
  pub async fn next(&mut self) -> Option<Signal> {
    self.rx.recv().await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn parse(line: &str) -> Signal {
    serde_json::from_str(line).unwrap()
  }

  #[test]
  fn test_parse_fetch_signal() {
    let signal = parse(
      r#"{"signal": "fetch", "id": "r1", "url": "https://app.test/index.html#top",
          "method": "post", "destination": "document", "headers": {"Accept": "text/html"},
          "body": "aGVsbG8="}"#,
    );
    let Signal::Fetch(fetch) = signal else {
      panic!("expected a fetch signal");
    };
    assert_eq!(fetch.id, "r1");

    let request = fetch.to_request().unwrap();
    assert_eq!(request.method, Method::POST);
    assert!(request.is_navigation());
    assert_eq!(request.header("accept"), Some("text/html"));
    assert_eq!(request.body.as_deref(), Some(&b"hello"[..]));
  }

  #[test]
  fn test_fetch_defaults_to_get() {
    let Signal::Fetch(fetch) = parse(r#"{"signal": "fetch", "id": "r2", "url": "https://app.test/a"}"#)
    else {
      panic!("expected a fetch signal");
    };
    let request = fetch.to_request().unwrap();
    assert_eq!(request.method, Method::GET);
    assert_eq!(request.destination, Destination::Empty);
  }

  #[test]
  fn test_fetch_with_bad_url_fails_conversion() {
    let Signal::Fetch(fetch) = parse(r#"{"signal": "fetch", "id": "r3", "url": "nope"}"#) else {
      panic!("expected a fetch signal");
    };
    assert!(fetch.to_request().is_err());
  }

  #[test]
  fn test_parse_other_signals() {
    assert!(matches!(parse(r#"{"signal": "install"}"#), Signal::Install));
    assert!(matches!(
      parse(r#"{"signal": "sync", "tag": "background-sync"}"#),
      Signal::Sync { tag } if tag == "background-sync"
    ));
    assert!(matches!(
      parse(r#"{"signal": "backgroundfetch", "tag": "update-cache"}"#),
      Signal::BackgroundFetch { tag } if tag == "update-cache"
    ));
    assert!(matches!(
      parse(r#"{"signal": "client.connect", "id": "tab-1", "url": "https://app.test/"}"#),
      Signal::ClientConnect(info) if info.id == "tab-1" && !info.controlled
    ));
    assert!(matches!(
      parse(r#"{"signal": "message", "reply": "m1", "data": {"type": "GET_VERSION"}}"#),
      Signal::Message { reply: Some(reply), .. } if reply == "m1"
    ));
  }

  #[test]
  fn test_unknown_signal_kind() {
    assert!(matches!(parse(r#"{"signal": "periodicsync"}"#), Signal::Unknown));
  }

  #[test]
  fn test_payload_bytes() {
    assert_eq!(payload_bytes(None), None);
    assert_eq!(payload_bytes(Some(&Value::Null)), None);
    assert_eq!(payload_bytes(Some(&json!("{\"title\":\"T\"}"))), Some(br#"{"title":"T"}"#.to_vec()));
    assert_eq!(payload_bytes(Some(&json!({"title": "T"}))), Some(br#"{"title":"T"}"#.to_vec()));
  }

  #[tokio::test]
  async fn test_reader_skips_malformed_lines() {
    let input: &'static [u8] = b"{\"signal\": \"install\"}\n\nnot json\n{\"signal\": \"activate\"}\n";
    let mut events = EventHandler::new(input);

    assert!(matches!(events.next().await, Some(Signal::Install)));
    assert!(matches!(events.next().await, Some(Signal::Activate)));
    assert!(events.next().await.is_none());
  }
}
