//! Test doubles for the host capabilities.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::clients::{ClientInfo, ClientPort, ClientQuery, NotificationPort};
use crate::control::OutboundEvent;
use crate::net::Fetcher;
use crate::notify::NotificationDescriptor;
use crate::request::{Request, RequestKey, ResponseSnapshot};
use crate::store::{CacheStorage, MemoryStorage, StoredResponse};

/// Fetcher answering from a script keyed by URL.
///
/// Unscripted URLs fail like an offline network, unless a fallback response
/// was configured with `serving_all`.
#[derive(Default)]
pub struct ScriptedFetcher {
  responses: Mutex<HashMap<String, Option<ResponseSnapshot>>>,
  fallback: Option<ResponseSnapshot>,
  calls: AtomicUsize,
}

impl ScriptedFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  /// Answer every unscripted URL with the same response.
  pub fn serving_all(status: u16, body: &'static str) -> Self {
    Self {
      fallback: Some(ResponseSnapshot::new(status, body)),
      ..Self::default()
    }
  }

  pub fn respond(&self, url: &str, response: ResponseSnapshot) {
    self
      .responses
      .lock()
      .unwrap()
      .insert(url.to_string(), Some(response));
  }

  pub fn fail(&self, url: &str) {
    self.responses.lock().unwrap().insert(url.to_string(), None);
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
  async fn fetch(&self, request: &Request) -> Result<ResponseSnapshot> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    let scripted = self
      .responses
      .lock()
      .unwrap()
      .get(request.url.as_str())
      .cloned();

    match scripted {
      Some(Some(response)) => Ok(response),
      Some(None) => Err(eyre!("network unreachable: {}", request.url)),
      None => self
        .fallback
        .clone()
        .ok_or_else(|| eyre!("network unreachable: {}", request.url)),
    }
  }
}

/// Memory storage with chosen operations failing.
#[derive(Default)]
pub struct FlakyStorage {
  inner: MemoryStorage,
  failing_deletes: HashSet<String>,
  failing_gets: bool,
  failing_puts: bool,
}

impl FlakyStorage {
  /// Deletes of the named stores fail.
  pub fn failing_deletes<I: IntoIterator<Item = &'static str>>(names: I) -> Self {
    Self {
      failing_deletes: names.into_iter().map(String::from).collect(),
      ..Self::default()
    }
  }

  /// Every entry read fails.
  pub fn failing_gets() -> Self {
    Self {
      failing_gets: true,
      ..Self::default()
    }
  }

  /// Every entry write fails.
  pub fn failing_puts() -> Self {
    Self {
      failing_puts: true,
      ..Self::default()
    }
  }
}

impl CacheStorage for FlakyStorage {
  fn open(&self, store: &str) -> Result<()> {
    self.inner.open(store)
  }

  fn has(&self, store: &str) -> Result<bool> {
    self.inner.has(store)
  }

  fn names(&self) -> Result<Vec<String>> {
    self.inner.names()
  }

  fn delete(&self, store: &str) -> Result<bool> {
    if self.failing_deletes.contains(store) {
      return Err(eyre!("disk I/O error deleting {}", store));
    }
    self.inner.delete(store)
  }

  fn get(&self, store: &str, key: &RequestKey) -> Result<Option<StoredResponse>> {
    if self.failing_gets {
      return Err(eyre!("disk I/O error reading {}", store));
    }
    self.inner.get(store, key)
  }

  fn put(&self, store: &str, key: &RequestKey, response: &ResponseSnapshot) -> Result<()> {
    if self.failing_puts {
      return Err(eyre!("disk full writing {}", store));
    }
    self.inner.put(store, key, response)
  }

  fn len(&self, store: &str) -> Result<usize> {
    self.inner.len(store)
  }
}

/// A window operation recorded by `RecordingClients`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowOp {
  Navigate(String, String),
  Focus(String),
  Open(String),
}

/// Client port that records everything done to it.
#[derive(Default)]
pub struct RecordingClients {
  clients: Mutex<Vec<ClientInfo>>,
  window_ops: Mutex<Vec<WindowOp>>,
  messages: Mutex<Vec<(String, OutboundEvent)>>,
  claims: AtomicUsize,
  failing_navigation: bool,
}

impl RecordingClients {
  pub fn with_clients(clients: Vec<ClientInfo>) -> Self {
    Self {
      clients: Mutex::new(clients),
      ..Self::default()
    }
  }

  /// Navigating any window fails, as when it closed mid-task.
  pub fn with_failing_navigation(mut self) -> Self {
    self.failing_navigation = true;
    self
  }

  pub fn window_ops(&self) -> Vec<WindowOp> {
    self.window_ops.lock().unwrap().clone()
  }

  pub fn messages(&self) -> Vec<(String, OutboundEvent)> {
    self.messages.lock().unwrap().clone()
  }

  pub fn claims(&self) -> usize {
    self.claims.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl ClientPort for RecordingClients {
  async fn match_all(&self, query: ClientQuery) -> Result<Vec<ClientInfo>> {
    Ok(
      self
        .clients
        .lock()
        .unwrap()
        .iter()
        .filter(|c| query.matches(c))
        .cloned()
        .collect(),
    )
  }

  async fn navigate(&self, client_id: &str, url: &str) -> Result<()> {
    if self.failing_navigation {
      return Err(eyre!("client {} is gone", client_id));
    }
    self
      .window_ops
      .lock()
      .unwrap()
      .push(WindowOp::Navigate(client_id.to_string(), url.to_string()));
    Ok(())
  }

  async fn focus(&self, client_id: &str) -> Result<()> {
    self
      .window_ops
      .lock()
      .unwrap()
      .push(WindowOp::Focus(client_id.to_string()));
    Ok(())
  }

  async fn open_window(&self, url: &str) -> Result<()> {
    self
      .window_ops
      .lock()
      .unwrap()
      .push(WindowOp::Open(url.to_string()));
    Ok(())
  }

  async fn post_message(&self, client_id: &str, event: &OutboundEvent) -> Result<()> {
    self
      .messages
      .lock()
      .unwrap()
      .push((client_id.to_string(), *event));
    Ok(())
  }

  async fn claim(&self) -> Result<()> {
    self.claims.fetch_add(1, Ordering::SeqCst);
    for client in self.clients.lock().unwrap().iter_mut() {
      client.controlled = true;
    }
    Ok(())
  }
}

/// Notification port that records shown and closed notifications.
#[derive(Default)]
pub struct RecordingNotifications {
  shown: Mutex<Vec<NotificationDescriptor>>,
  closed: AtomicUsize,
}

impl RecordingNotifications {
  pub fn shown(&self) -> Vec<NotificationDescriptor> {
    self.shown.lock().unwrap().clone()
  }

  pub fn closed(&self) -> usize {
    self.closed.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl NotificationPort for RecordingNotifications {
  async fn show(&self, notification: &NotificationDescriptor) -> Result<()> {
    self.shown.lock().unwrap().push(notification.clone());
    Ok(())
  }

  async fn close(&self, _notification: &NotificationDescriptor) -> Result<()> {
    self.closed.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }
}
