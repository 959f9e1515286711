//! Push notifications and notification clicks.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::clients::{ClientPort, ClientQuery, NotificationPort};

/// A button shown on a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
}

/// Everything needed to display one notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationDescriptor {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  #[serde(default)]
  pub data: Map<String, Value>,
  #[serde(default)]
  pub actions: Vec<NotificationAction>,
}

impl NotificationDescriptor {
  /// Where a click on this notification should lead.
  pub fn target_url(&self) -> &str {
    self
      .data
      .get("url")
      .and_then(Value::as_str)
      .filter(|url| !url.is_empty())
      .unwrap_or("/")
  }
}

/// What a notification click led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
  /// The "close" action; nothing else happened
  Dismissed,
  /// An existing window was navigated and focused
  Focused { client_id: String, url: String },
  /// A new window was opened
  Opened { url: String },
}

/// Turns push signals into notifications and clicks into window actions.
pub struct NotificationDispatcher {
  defaults: NotificationDescriptor,
  origin: Url,
  clients: Arc<dyn ClientPort>,
  notifications: Arc<dyn NotificationPort>,
}

impl NotificationDispatcher {
  pub fn new(
    defaults: NotificationDescriptor,
    origin: Url,
    clients: Arc<dyn ClientPort>,
    notifications: Arc<dyn NotificationPort>,
  ) -> Self {
    Self {
      defaults,
      origin,
      clients,
      notifications,
    }
  }

  /// Build and display the notification for one push. A push always
  /// displays something, whatever the payload looks like.
  pub async fn on_push(&self, payload: Option<&[u8]>) -> Result<NotificationDescriptor> {
    info!("Push received");
    let notification = build_notification(&self.defaults, payload);
    self.notifications.show(&notification).await?;
    Ok(notification)
  }

  /// Handle a click on `notification`, optionally on one of its actions.
  pub async fn on_click(
    &self,
    notification: &NotificationDescriptor,
    action: Option<&str>,
  ) -> Result<ClickOutcome> {
    info!(action = action.unwrap_or(""), "Notification clicked");

    if let Err(e) = self.notifications.close(notification).await {
      warn!("Failed to close notification: {:#}", e);
    }

    if action == Some("close") {
      return Ok(ClickOutcome::Dismissed);
    }

    let target = self
      .origin
      .join(notification.target_url())
      .map_err(|e| eyre!("Invalid notification url '{}': {}", notification.target_url(), e))?
      .to_string();

    let windows = self
      .clients
      .match_all(ClientQuery {
        windows_only: true,
        include_uncontrolled: true,
      })
      .await?;

    let origin = self.origin.origin();
    let same_origin = |url: &str| Url::parse(url).is_ok_and(|url| url.origin() == origin);
    if let Some(window) = windows.iter().find(|c| same_origin(&c.url)) {
      debug!(client = %window.id, url = %target, "Focusing existing window");
      match self.clients.navigate(&window.id, &target).await {
        Ok(()) => {
          self.clients.focus(&window.id).await?;
          return Ok(ClickOutcome::Focused {
            client_id: window.id.clone(),
            url: target,
          });
        }
        Err(e) => warn!(client = %window.id, "Failed to navigate window: {:#}", e),
      }
    }

    debug!(url = %target, "Opening new window");
    self.clients.open_window(&target).await?;
    Ok(ClickOutcome::Opened { url: target })
  }
}

/// Overlay a push payload onto the default descriptor.
///
/// Non-empty string `title`/`body` replace the defaults; an object `data` is
/// shallow-merged over the default data. A payload that is not a JSON object
/// is logged and ignored.
pub fn build_notification(
  defaults: &NotificationDescriptor,
  payload: Option<&[u8]>,
) -> NotificationDescriptor {
  let mut notification = defaults.clone();

  let Some(raw) = payload.filter(|raw| !raw.is_empty()) else {
    return notification;
  };

  let mut payload = match serde_json::from_slice::<Value>(raw) {
    Ok(Value::Object(payload)) => payload,
    Ok(other) => {
      warn!("Push payload is not an object, using defaults: {}", other);
      return notification;
    }
    Err(e) => {
      warn!("Malformed push payload, using defaults: {}", e);
      return notification;
    }
  };

  if let Some(title) = non_empty_str(payload.get("title")) {
    notification.title = title.to_string();
  }
  if let Some(body) = non_empty_str(payload.get("body")) {
    notification.body = body.to_string();
  }
  match payload.remove("data") {
    Some(Value::Object(data)) => notification.data.extend(data),
    Some(Value::Null) | None => {}
    Some(other) => debug!("Ignoring non-object push data: {}", other),
  }

  notification
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
  value.and_then(Value::as_str).filter(|s| !s.is_empty())
}
