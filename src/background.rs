//! Work done outside the request/response cycle.

use async_trait::async_trait;
use color_eyre::Result;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::clients::{ClientPort, ClientQuery};
use crate::config::TagsConfig;
use crate::control::OutboundEvent;
use crate::manifest::AssetManifest;
use crate::store::{PopulateReport, StoreManager, VersionTag};

/// Deferred work run on the sync signal, such as replaying posts written
/// while offline.
#[async_trait]
pub trait DeferredSync: Send + Sync {
  async fn run(&self) -> Result<()>;
}

/// Nothing is queued offline yet.
pub struct NoPendingWork;

#[async_trait]
impl DeferredSync for NoPendingWork {
  async fn run(&self) -> Result<()> {
    Ok(())
  }
}

/// What a background signal amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackgroundOutcome {
  /// Tag not recognized
  Ignored,
  /// Sync finished; number of clients notified
  Synced { notified: usize },
  /// Sync work failed; nobody was notified
  SyncFailed,
  /// Store refreshed
  Refreshed(PopulateReport),
}

pub struct BackgroundRunner {
  tags: TagsConfig,
  store: Arc<StoreManager>,
  manifest: AssetManifest,
  version: VersionTag,
  clients: Arc<dyn ClientPort>,
  deferred: Arc<dyn DeferredSync>,
}

impl BackgroundRunner {
  pub fn new(
    tags: TagsConfig,
    store: Arc<StoreManager>,
    manifest: AssetManifest,
    version: VersionTag,
    clients: Arc<dyn ClientPort>,
  ) -> Self {
    Self {
      tags,
      store,
      manifest,
      version,
      clients,
      deferred: Arc::new(NoPendingWork),
    }
  }

  #[allow(dead_code)]
  pub fn with_deferred_sync(mut self, deferred: Arc<dyn DeferredSync>) -> Self {
    self.deferred = deferred;
    self
  }

  /// Handle a sync signal.
  pub async fn on_sync(&self, tag: &str) -> BackgroundOutcome {
    if tag != self.tags.sync {
      debug!(tag, "Ignoring unknown sync tag");
      return BackgroundOutcome::Ignored;
    }

    info!(tag, "Running background sync");
    if let Err(e) = self.deferred.run().await {
      error!(tag, "Background sync failed: {:#}", e);
      return BackgroundOutcome::SyncFailed;
    }

    let notified = self.broadcast(OutboundEvent::BackgroundSyncComplete).await;
    info!(tag, notified, "Background sync complete");
    BackgroundOutcome::Synced { notified }
  }

  /// Handle a background-fetch signal.
  pub async fn on_background_fetch(&self, tag: &str) -> BackgroundOutcome {
    if tag != self.tags.refresh {
      debug!(tag, "Ignoring unknown background fetch tag");
      return BackgroundOutcome::Ignored;
    }

    let report = self.store.refresh_store(&self.version, &self.manifest).await;
    BackgroundOutcome::Refreshed(report)
  }

  /// Send `event` to every connected client. Returns how many received it.
  async fn broadcast(&self, event: OutboundEvent) -> usize {
    let clients = match self.clients.match_all(ClientQuery::default()).await {
      Ok(clients) => clients,
      Err(e) => {
        warn!("Failed to list clients: {:#}", e);
        return 0;
      }
    };

    let mut notified = 0;
    for client in &clients {
      match self.clients.post_message(&client.id, &event).await {
        Ok(()) => notified += 1,
        Err(e) => warn!(client = %client.id, "Failed to notify client: {:#}", e),
      }
    }
    notified
  }
}
