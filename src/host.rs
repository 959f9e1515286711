//! The stdio host: signals in on stdin, outputs out on stdout.

use async_trait::async_trait;
use base64::Engine as _;
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::background::BackgroundOutcome;
use crate::clients::{ClientInfo, ClientPort, ClientQuery, NotificationPort};
use crate::control::OutboundEvent;
use crate::event::{payload_bytes, EventHandler, FetchSignal, Signal};
use crate::notify::NotificationDescriptor;
use crate::router::PassthroughReason;
use crate::strategy::ServeSource;
use crate::worker::{FetchDisposition, Worker};

/// One line written to the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "output")]
pub enum Output {
  #[serde(rename = "fetch.response")]
  FetchResponse {
    id: String,
    status: u16,
    headers: Vec<(String, String)>,
    /// Base64 body
    body: String,
    source: &'static str,
  },
  #[serde(rename = "fetch.passthrough")]
  FetchPassthrough { id: String, reason: &'static str },
  #[serde(rename = "fetch.error")]
  FetchError { id: String, error: String },
  #[serde(rename = "notification.show")]
  NotificationShow { notification: NotificationDescriptor },
  #[serde(rename = "notification.close")]
  NotificationClose { title: String },
  #[serde(rename = "client.navigate")]
  ClientNavigate { client: String, url: String },
  #[serde(rename = "client.focus")]
  ClientFocus { client: String },
  #[serde(rename = "client.message")]
  ClientMessage { client: String, data: OutboundEvent },
  #[serde(rename = "clients.claim")]
  ClientsClaim { clients: Vec<String> },
  #[serde(rename = "window.open")]
  WindowOpen { url: String },
  #[serde(rename = "message.reply")]
  MessageReply { reply: String, version: String },
  #[serde(rename = "install.report")]
  InstallReport {
    version: String,
    stored: usize,
    failed: Vec<(String, String)>,
  },
  #[serde(rename = "activate.report")]
  ActivateReport {
    version: String,
    deleted: Vec<String>,
    failed: Vec<(String, String)>,
  },
  #[serde(rename = "background.outcome")]
  Background { tag: String, outcome: String },
  #[serde(rename = "signal.error")]
  SignalError { signal: &'static str, error: String },
}

/// Client registry and output sink backing the worker's host ports.
pub struct StdioHost {
  clients: Mutex<BTreeMap<String, ClientInfo>>,
  out: mpsc::UnboundedSender<Output>,
}

impl StdioHost {
  pub fn new(out: mpsc::UnboundedSender<Output>) -> Self {
    Self {
      clients: Mutex::new(BTreeMap::new()),
      out,
    }
  }

  pub fn connect(&self, client: ClientInfo) -> Result<()> {
    debug!(client = %client.id, url = %client.url, "Client connected");
    self.registry()?.insert(client.id.clone(), client);
    Ok(())
  }

  pub fn disconnect(&self, id: &str) -> Result<()> {
    debug!(client = id, "Client disconnected");
    self.registry()?.remove(id);
    Ok(())
  }

  pub fn emit(&self, output: Output) {
    if self.out.send(output).is_err() {
      warn!("Output closed, dropping line");
    }
  }

  fn registry(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, ClientInfo>>> {
    self
      .clients
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  fn ensure_known(&self, id: &str) -> Result<()> {
    if self.registry()?.contains_key(id) {
      Ok(())
    } else {
      Err(eyre!("Unknown client '{}'", id))
    }
  }
}

#[async_trait]
impl ClientPort for StdioHost {
  async fn match_all(&self, query: ClientQuery) -> Result<Vec<ClientInfo>> {
    Ok(
      self
        .registry()?
        .values()
        .filter(|client| query.matches(client))
        .cloned()
        .collect(),
    )
  }

  async fn navigate(&self, client_id: &str, url: &str) -> Result<()> {
    self.ensure_known(client_id)?;
    if let Some(client) = self.registry()?.get_mut(client_id) {
      client.url = url.to_string();
    }
    self.emit(Output::ClientNavigate {
      client: client_id.to_string(),
      url: url.to_string(),
    });
    Ok(())
  }

  async fn focus(&self, client_id: &str) -> Result<()> {
    self.ensure_known(client_id)?;
    self.emit(Output::ClientFocus {
      client: client_id.to_string(),
    });
    Ok(())
  }

  async fn open_window(&self, url: &str) -> Result<()> {
    self.emit(Output::WindowOpen {
      url: url.to_string(),
    });
    Ok(())
  }

  async fn post_message(&self, client_id: &str, event: &OutboundEvent) -> Result<()> {
    self.ensure_known(client_id)?;
    self.emit(Output::ClientMessage {
      client: client_id.to_string(),
      data: *event,
    });
    Ok(())
  }

  async fn claim(&self) -> Result<()> {
    let mut claimed = Vec::new();
    for (id, client) in self.registry()?.iter_mut() {
      client.controlled = true;
      claimed.push(id.clone());
    }
    self.emit(Output::ClientsClaim { clients: claimed });
    Ok(())
  }
}

#[async_trait]
impl NotificationPort for StdioHost {
  async fn show(&self, notification: &NotificationDescriptor) -> Result<()> {
    self.emit(Output::NotificationShow {
      notification: notification.clone(),
    });
    Ok(())
  }

  async fn close(&self, notification: &NotificationDescriptor) -> Result<()> {
    self.emit(Output::NotificationClose {
      title: notification.title.clone(),
    });
    Ok(())
  }
}

/// Serialize outputs as JSON lines until every sender is gone.
pub async fn write_outputs<W>(mut rx: mpsc::UnboundedReceiver<Output>, mut writer: W) -> Result<()>
where
  W: AsyncWrite + Unpin,
{
  while let Some(output) = rx.recv().await {
    let mut line = serde_json::to_vec(&output)?;
    line.push(b'\n');
    writer
      .write_all(&line)
      .await
      .map_err(|e| eyre!("Failed to write output: {}", e))?;
    writer
      .flush()
      .await
      .map_err(|e| eyre!("Failed to flush output: {}", e))?;
  }
  Ok(())
}

/// Event loop: every signal is handled on its own tracked task. Returns once
/// input is exhausted and all tracked work has finished.
pub async fn run(worker: Arc<Worker>, host: Arc<StdioHost>, mut events: EventHandler) -> Result<()> {
  info!(version = %worker.version(), state = ?worker.state(), "Worker running");

  while let Some(signal) = events.next().await {
    match signal {
      Signal::ClientConnect(client) => host.connect(client)?,
      Signal::ClientDisconnect { id } => host.disconnect(&id)?,
      Signal::Unknown => warn!("Ignoring unknown signal"),
      signal => {
        let worker_task = Arc::clone(&worker);
        let host = Arc::clone(&host);
        worker.tracker().spawn(async move {
          dispatch(&worker_task, &host, signal).await;
        });
      }
    }
  }

  info!("Input closed, waiting for outstanding work");
  worker.wait_until_idle().await;
  Ok(())
}

/// One handler per signal kind.
pub async fn dispatch(worker: &Worker, host: &StdioHost, signal: Signal) {
  let kind = signal_name(&signal);
  let handled = match signal {
    Signal::Install => on_install(worker, host).await,
    Signal::Activate => on_activate(worker, host).await,
    Signal::Fetch(fetch) => {
      on_fetch(worker, host, fetch).await;
      Ok(())
    }
    Signal::Push { payload } => {
      let payload = payload_bytes(payload.as_ref());
      worker.handle_push(payload.as_deref()).await.map(|_| ())
    }
    Signal::NotificationClick {
      notification,
      action,
    } => worker
      .handle_notification_click(&notification, action.as_deref())
      .await
      .map(|outcome| debug!(?outcome, "Click handled")),
    Signal::Sync { tag } => {
      let outcome = worker.handle_sync(&tag).await;
      host.emit(background_output(tag, &outcome));
      Ok(())
    }
    Signal::BackgroundFetch { tag } => {
      let outcome = worker.handle_background_fetch(&tag).await;
      host.emit(background_output(tag, &outcome));
      Ok(())
    }
    Signal::Message {
      client,
      reply,
      data,
    } => on_message(worker, host, client, reply, data).await,
    Signal::ClientConnect(_) | Signal::ClientDisconnect { .. } | Signal::Unknown => Ok(()),
  };

  if let Err(e) = handled {
    warn!(signal = kind, "Signal failed: {:#}", e);
    host.emit(Output::SignalError {
      signal: kind,
      error: format!("{:#}", e),
    });
  }
}

async fn on_install(worker: &Worker, host: &StdioHost) -> Result<()> {
  let report = worker.install().await?;
  host.emit(Output::InstallReport {
    version: worker.version().to_string(),
    stored: report.stored.len(),
    failed: report.failed,
  });
  Ok(())
}

async fn on_activate(worker: &Worker, host: &StdioHost) -> Result<()> {
  if let Some(report) = worker.activate().await? {
    host.emit(Output::ActivateReport {
      version: worker.version().to_string(),
      deleted: report.deleted,
      failed: report.failed,
    });
  }
  Ok(())
}

async fn on_fetch(worker: &Worker, host: &StdioHost, fetch: FetchSignal) {
  let id = fetch.id.clone();
  let request = match fetch.to_request() {
    Ok(request) => request,
    Err(e) => {
      host.emit(Output::FetchError {
        id,
        error: format!("{:#}", e),
      });
      return;
    }
  };

  let output = match worker.handle_fetch(&request).await {
    FetchDisposition::Inactive => Output::FetchPassthrough {
      id,
      reason: "inactive",
    },
    FetchDisposition::Passthrough(reason) => Output::FetchPassthrough {
      id,
      reason: passthrough_reason(reason),
    },
    FetchDisposition::Respond(Ok(served)) => Output::FetchResponse {
      id,
      status: served.response.status,
      headers: served.response.headers,
      body: base64::engine::general_purpose::STANDARD.encode(&served.response.body),
      source: serve_source(served.source),
    },
    FetchDisposition::Respond(Err(e)) => Output::FetchError {
      id,
      error: format!("{:#}", e),
    },
  };
  host.emit(output);
}

async fn on_message(
  worker: &Worker,
  host: &StdioHost,
  client: Option<String>,
  reply: Option<String>,
  data: serde_json::Value,
) -> Result<()> {
  debug!(client = client.as_deref().unwrap_or("-"), "Message received");

  let Some(reply_id) = reply else {
    return worker.handle_message(&data, None).await;
  };

  let (tx, rx) = oneshot::channel();
  worker.handle_message(&data, Some(tx)).await?;
  // Only GET_VERSION answers; for anything else the port is dropped unused.
  if let Ok(answer) = rx.await {
    host.emit(Output::MessageReply {
      reply: reply_id,
      version: answer.version,
    });
  }
  Ok(())
}

fn background_output(tag: String, outcome: &BackgroundOutcome) -> Output {
  let outcome = match outcome {
    BackgroundOutcome::Ignored => "ignored".to_string(),
    BackgroundOutcome::Synced { notified } => format!("synced, {} clients notified", notified),
    BackgroundOutcome::SyncFailed => "sync failed".to_string(),
    BackgroundOutcome::Refreshed(report) => format!(
      "refreshed {} assets, {} failed",
      report.stored.len(),
      report.failed.len()
    ),
  };
  Output::Background { tag, outcome }
}

fn passthrough_reason(reason: PassthroughReason) -> &'static str {
  match reason {
    PassthroughReason::Scheme => "scheme",
    PassthroughReason::ExcludedHost => "excluded-host",
  }
}

fn serve_source(source: ServeSource) -> &'static str {
  match source {
    ServeSource::Network => "network",
    ServeSource::Store => "store",
    ServeSource::OfflinePage => "offline-page",
  }
}

fn signal_name(signal: &Signal) -> &'static str {
  match signal {
    Signal::Install => "install",
    Signal::Activate => "activate",
    Signal::Fetch(_) => "fetch",
    Signal::Push { .. } => "push",
    Signal::NotificationClick { .. } => "notificationclick",
    Signal::Sync { .. } => "sync",
    Signal::BackgroundFetch { .. } => "backgroundfetch",
    Signal::Message { .. } => "message",
    Signal::ClientConnect(_) => "client.connect",
    Signal::ClientDisconnect { .. } => "client.disconnect",
    Signal::Unknown => "unknown",
  }
}
