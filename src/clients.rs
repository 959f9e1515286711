//! Host-side capabilities: connected clients and notification display.

use async_trait::async_trait;
use color_eyre::Result;
use serde::{Deserialize, Serialize};

use crate::control::OutboundEvent;
use crate::notify::NotificationDescriptor;

/// Kind of browsing context a client is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientKind {
  #[default]
  Window,
  Worker,
  Sharedworker,
}

/// Snapshot of one connected client, valid for the current task only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
  pub id: String,
  pub url: String,
  #[serde(default)]
  pub kind: ClientKind,
  /// Whether this worker generation controls the client
  #[serde(default)]
  pub controlled: bool,
}

/// Filter for `ClientPort::match_all`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientQuery {
  /// Only window clients
  pub windows_only: bool,
  /// Include clients this worker does not control yet
  pub include_uncontrolled: bool,
}

impl Default for ClientQuery {
  fn default() -> Self {
    Self {
      windows_only: true,
      include_uncontrolled: false,
    }
  }
}

impl ClientQuery {
  pub fn matches(&self, client: &ClientInfo) -> bool {
    (!self.windows_only || client.kind == ClientKind::Window)
      && (self.include_uncontrolled || client.controlled)
  }
}

/// Operations on connected clients provided by the host.
#[async_trait]
pub trait ClientPort: Send + Sync {
  async fn match_all(&self, query: ClientQuery) -> Result<Vec<ClientInfo>>;

  async fn navigate(&self, client_id: &str, url: &str) -> Result<()>;

  async fn focus(&self, client_id: &str) -> Result<()>;

  async fn open_window(&self, url: &str) -> Result<()>;

  async fn post_message(&self, client_id: &str, event: &OutboundEvent) -> Result<()>;

  /// Take control of every in-scope client.
  async fn claim(&self) -> Result<()>;
}

/// Notification display provided by the host.
#[async_trait]
pub trait NotificationPort: Send + Sync {
  async fn show(&self, notification: &NotificationDescriptor) -> Result<()>;

  async fn close(&self, notification: &NotificationDescriptor) -> Result<()>;
}

#[cfg(test)]
mod tests {
  use super::*;

  fn client(kind: ClientKind, controlled: bool) -> ClientInfo {
    ClientInfo {
      id: "c1".to_string(),
      url: "https://app.test/".to_string(),
      kind,
      controlled,
    }
  }

  #[test]
  fn test_default_query_is_controlled_windows() {
    let query = ClientQuery::default();
    assert!(query.matches(&client(ClientKind::Window, true)));
    assert!(!query.matches(&client(ClientKind::Window, false)));
    assert!(!query.matches(&client(ClientKind::Worker, true)));
  }

  #[test]
  fn test_query_including_uncontrolled() {
    let query = ClientQuery {
      windows_only: true,
      include_uncontrolled: true,
    };
    assert!(query.matches(&client(ClientKind::Window, false)));
    assert!(!query.matches(&client(ClientKind::Sharedworker, false)));
  }
}
