//! One worker generation: lifecycle, interception and background signals.

use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::background::{BackgroundOutcome, BackgroundRunner};
use crate::clients::{ClientPort, NotificationPort};
use crate::config::Config;
use crate::control::{ControlMessage, ReplyPort, VersionReply};
use crate::lifecycle::{Lifecycle, WorkerState};
use crate::manifest::AssetManifest;
use crate::net::Fetcher;
use crate::notify::{ClickOutcome, NotificationDescriptor, NotificationDispatcher};
use crate::request::Request;
use crate::router::{ExcludedHosts, PassthroughReason, Route, Router};
use crate::store::{CacheStorage, EvictionReport, PopulateReport, StoreManager, VersionTag};
use crate::strategy::{Served, Strategies};

/// Capabilities the host lends to a worker.
pub struct Ports {
  pub storage: Arc<dyn CacheStorage>,
  pub fetcher: Arc<dyn Fetcher>,
  pub clients: Arc<dyn ClientPort>,
  pub notifications: Arc<dyn NotificationPort>,
}

/// What happens to one intercepted fetch.
#[derive(Debug)]
pub enum FetchDisposition {
  /// Not active yet; the host performs the request itself
  Inactive,
  /// Routed around the worker
  Passthrough(PassthroughReason),
  /// Served by a strategy, or rejected
  Respond(Result<Served>),
}

pub struct Worker {
  version: VersionTag,
  manifest: AssetManifest,
  router: Router,
  store: Arc<StoreManager>,
  strategies: Strategies,
  lifecycle: Lifecycle,
  dispatcher: NotificationDispatcher,
  background: BackgroundRunner,
  clients: Arc<dyn ClientPort>,
  tracker: TaskTracker,
  skip_waiting_on_install: bool,
}

impl Worker {
  pub fn new(config: &Config, ports: Ports) -> Result<Self> {
    let origin = config.origin_url()?;
    let version = VersionTag::new(config.version.clone());
    let manifest =
      AssetManifest::new(config.assets.iter().cloned()).with_exact_root(config.exact_root_entry);
    if manifest.is_empty() {
      warn!("Asset manifest is empty; every request will be served network-first");
    }
    let router = Router::new(
      manifest.clone(),
      ExcludedHosts::new(&config.excluded_hosts),
    );

    let store = Arc::new(
      StoreManager::new(ports.storage, Arc::clone(&ports.fetcher), origin.clone())
        .with_vary_headers(config.vary_headers.clone()),
    );
    let tracker = TaskTracker::new();
    let strategies = Strategies::new(
      Arc::clone(&store),
      ports.fetcher,
      version.clone(),
      tracker.clone(),
    )
    .with_offline_page(config.offline_page.clone());

    let dispatcher = NotificationDispatcher::new(
      config.notification.descriptor(),
      origin,
      Arc::clone(&ports.clients),
      ports.notifications,
    );
    let background = BackgroundRunner::new(
      config.tags.clone(),
      Arc::clone(&store),
      manifest.clone(),
      version.clone(),
      Arc::clone(&ports.clients),
    );

    Ok(Self {
      version,
      manifest,
      router,
      store,
      strategies,
      lifecycle: Lifecycle::new(),
      dispatcher,
      background,
      clients: ports.clients,
      tracker,
      skip_waiting_on_install: config.skip_waiting_on_install,
    })
  }

  pub fn version(&self) -> &VersionTag {
    &self.version
  }

  pub fn state(&self) -> WorkerState {
    self.lifecycle.state()
  }

  /// Tracker for every piece of work the host must wait for before exiting.
  pub fn tracker(&self) -> &TaskTracker {
    &self.tracker
  }

  /// Pick up where a previous run left off.
  ///
  /// A store for this version holding every manifest asset was installed
  /// before, so the generation activates again without fetching: stale stores
  /// are evicted and clients claimed as on a normal activation. A missing or
  /// partial store is left for `install` to fill.
  pub async fn resume_if_current(&self) -> Result<bool> {
    if !self.store.holds_manifest(&self.version, &self.manifest)? {
      if self.store.exists(&self.version)? {
        info!(version = %self.version, "Existing store is incomplete, waiting for install");
      }
      return Ok(false);
    }
    if !self.lifecycle.resume()? {
      return Ok(false);
    }
    info!(version = %self.version, "Resuming existing store");
    self.complete_activation().await?;
    Ok(true)
  }

  /// Pre-populate the store for this version.
  ///
  /// A complete install promotes itself when configured to; so does any
  /// install if a client already asked to skip waiting.
  pub async fn install(&self) -> Result<PopulateReport> {
    if !self.lifecycle.begin_install()? {
      return Err(eyre!("Cannot install from state {:?}", self.lifecycle.state()));
    }

    let report = self
      .store
      .initialize_store(&self.version, &self.manifest)
      .await;
    self.lifecycle.finish_install()?;

    let promote = (report.is_complete() && self.skip_waiting_on_install)
      || self.lifecycle.skip_waiting_requested();
    if promote {
      self.activate().await?;
    } else {
      info!(version = %self.version, "Installed, waiting to activate");
    }
    Ok(report)
  }

  /// Promote a waiting version: evict every other store, then claim clients.
  ///
  /// Returns `None` when there is nothing waiting, e.g. because another task
  /// already activated this version.
  pub async fn activate(&self) -> Result<Option<EvictionReport>> {
    if !self.lifecycle.begin_activate()? {
      debug!(state = ?self.lifecycle.state(), "Nothing waiting to activate");
      return Ok(None);
    }
    self.complete_activation().await.map(Some)
  }

  async fn complete_activation(&self) -> Result<EvictionReport> {
    let report = self.store.evict_stale(&self.version).await;
    if let Err(e) = self.clients.claim().await {
      warn!("Failed to claim clients: {:#}", e);
    }
    self.lifecycle.finish_activate()?;

    info!(
      version = %self.version,
      evicted = report.deleted.len(),
      failed = report.failed.len(),
      "Activated"
    );
    Ok(report)
  }

  /// Route and serve one intercepted request.
  pub async fn handle_fetch(&self, request: &Request) -> FetchDisposition {
    if !self.lifecycle.is_active() {
      return FetchDisposition::Inactive;
    }

    match self.router.route(request) {
      Route::Passthrough(reason) => {
        debug!(url = %request.url, ?reason, "Passing through");
        FetchDisposition::Passthrough(reason)
      }
      Route::CacheFirst => FetchDisposition::Respond(self.strategies.cache_first(request).await),
      Route::NetworkFirst => {
        FetchDisposition::Respond(self.strategies.network_first(request).await)
      }
    }
  }

  /// Handle a message posted by a client.
  pub async fn handle_message(&self, data: &Value, reply: Option<ReplyPort>) -> Result<()> {
    match ControlMessage::parse(data) {
      Some(ControlMessage::SkipWaiting) => {
        info!("Client asked to skip waiting");
        if self.lifecycle.skip_waiting()? {
          self.activate().await?;
        }
      }
      Some(ControlMessage::GetVersion) => {
        let Some(reply) = reply else {
          warn!("GET_VERSION without a reply port");
          return Ok(());
        };
        let version = VersionReply {
          version: self.version.to_string(),
        };
        if reply.send(version).is_err() {
          debug!("Client dropped its reply port");
        }
      }
      None => debug!("Ignoring message: {}", data),
    }
    Ok(())
  }

  pub async fn handle_push(&self, payload: Option<&[u8]>) -> Result<NotificationDescriptor> {
    self.dispatcher.on_push(payload).await
  }

  pub async fn handle_notification_click(
    &self,
    notification: &NotificationDescriptor,
    action: Option<&str>,
  ) -> Result<ClickOutcome> {
    self.dispatcher.on_click(notification, action).await
  }

  pub async fn handle_sync(&self, tag: &str) -> BackgroundOutcome {
    self.background.on_sync(tag).await
  }

  pub async fn handle_background_fetch(&self, tag: &str) -> BackgroundOutcome {
    self.background.on_background_fetch(tag).await
  }

  /// Wait for all tracked work, including write-backs, to finish.
  pub async fn wait_until_idle(&self) {
    self.tracker.close();
    self.tracker.wait().await;
    self.tracker.reopen();
  }
}
