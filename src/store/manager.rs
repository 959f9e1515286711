//! Store generations: creation, pre-population, refresh and eviction.

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use url::Url;

use super::traits::{CacheStorage, StoredResponse};
use crate::manifest::AssetManifest;
use crate::net::Fetcher;
use crate::request::{Request, RequestKey, ResponseSnapshot};

/// Names one generation of the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionTag(String);

impl VersionTag {
  pub fn new(tag: impl Into<String>) -> Self {
    Self(tag.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl std::fmt::Display for VersionTag {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}

/// Outcome of writing the manifest into a store.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PopulateReport {
  /// URLs written, in manifest order
  pub stored: Vec<String>,
  /// URLs that could not be fetched or written, with the reason
  pub failed: Vec<(String, String)>,
}

impl PopulateReport {
  pub fn is_complete(&self) -> bool {
    self.failed.is_empty()
  }
}

/// Outcome of deleting superseded stores.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EvictionReport {
  pub deleted: Vec<String>,
  pub failed: Vec<(String, String)>,
}

/// Owns the store backend and the rules for store generations.
///
/// The version is always passed in explicitly; the manager itself has no
/// notion of a "current" store.
pub struct StoreManager {
  storage: Arc<dyn CacheStorage>,
  fetcher: Arc<dyn Fetcher>,
  origin: Url,
  vary_headers: Vec<String>,
}

impl StoreManager {
  pub fn new(storage: Arc<dyn CacheStorage>, fetcher: Arc<dyn Fetcher>, origin: Url) -> Self {
    Self {
      storage,
      fetcher,
      origin,
      vary_headers: Vec::new(),
    }
  }

  /// Headers that take part in request identity.
  pub fn with_vary_headers(mut self, vary_headers: Vec<String>) -> Self {
    self.vary_headers = vary_headers;
    self
  }

  pub fn key_for(&self, request: &Request) -> RequestKey {
    RequestKey::new(request, &self.vary_headers)
  }

  /// Create store `version` and write every manifest entry into it.
  ///
  /// Failed entries are logged and reported; whatever succeeded stays
  /// written.
  pub async fn initialize_store(
    &self,
    version: &VersionTag,
    manifest: &AssetManifest,
  ) -> PopulateReport {
    info!(%version, assets = manifest.len(), "Opening store");
    if let Err(e) = self.storage.open(version.as_str()) {
      error!(%version, "Failed to open store: {:#}", e);
      return PopulateReport {
        stored: Vec::new(),
        failed: vec![(version.to_string(), e.to_string())],
      };
    }

    let report = self.populate(version, manifest).await;
    if report.is_complete() {
      info!(%version, stored = report.stored.len(), "Store populated");
    } else {
      error!(
        %version,
        stored = report.stored.len(),
        failed = report.failed.len(),
        "Store only partially populated"
      );
    }
    report
  }

  /// Re-write every manifest entry into store `version`, overwriting.
  pub async fn refresh_store(
    &self,
    version: &VersionTag,
    manifest: &AssetManifest,
  ) -> PopulateReport {
    info!(%version, "Refreshing store");
    let report = self.populate(version, manifest).await;
    if report.is_complete() {
      info!(%version, stored = report.stored.len(), "Store refreshed");
    } else {
      error!(%version, failed = report.failed.len(), "Store refresh incomplete");
    }
    report
  }

  /// Delete every store whose name is not `version`.
  ///
  /// Deletions run concurrently and each outcome is collected on its own, so
  /// one failing store never stops the others.
  pub async fn evict_stale(&self, version: &VersionTag) -> EvictionReport {
    let names = match self.storage.names() {
      Ok(names) => names,
      Err(e) => {
        error!("Failed to list stores: {:#}", e);
        return EvictionReport::default();
      }
    };

    let stale: Vec<String> = names
      .into_iter()
      .filter(|name| name != version.as_str())
      .collect();

    let deletions = stale.into_iter().map(|name| {
      let storage = Arc::clone(&self.storage);
      async move {
        info!(store = %name, "Deleting stale store");
        let task_name = name.clone();
        let outcome = tokio::task::spawn_blocking(move || storage.delete(&task_name))
          .await
          .map_err(|e| eyre!("Deletion task failed: {}", e))
          .and_then(|result| result);
        (name, outcome)
      }
    });

    let mut report = EvictionReport::default();
    for (name, outcome) in join_all(deletions).await {
      match outcome {
        Ok(_) => report.deleted.push(name),
        Err(e) => {
          warn!(store = %name, "Failed to delete stale store: {:#}", e);
          report.failed.push((name, e.to_string()));
        }
      }
    }
    report
  }

  /// Look up `request` in store `version`.
  pub fn lookup(&self, version: &VersionTag, request: &Request) -> Result<Option<StoredResponse>> {
    let key = self.key_for(request);
    let found = self.storage.get(version.as_str(), &key)?;
    debug!(
      %version,
      %key,
      cached_at = ?found.as_ref().map(|stored| stored.cached_at),
      "Store lookup"
    );
    Ok(found)
  }

  /// Look up a path on our own origin, e.g. the offline page.
  pub fn lookup_path(&self, version: &VersionTag, path: &str) -> Result<Option<StoredResponse>> {
    let url = self
      .origin
      .join(path)
      .map_err(|e| eyre!("Invalid path '{}': {}", path, e))?;
    self.lookup(version, &Request::get(url))
  }

  /// Write `response` for `request` into store `version`.
  pub fn put(
    &self,
    version: &VersionTag,
    request: &Request,
    response: &ResponseSnapshot,
  ) -> Result<()> {
    let key = self.key_for(request);
    self.storage.put(version.as_str(), &key, response)?;
    debug!(%version, %key, "Stored response");
    Ok(())
  }

  pub fn exists(&self, version: &VersionTag) -> Result<bool> {
    self.storage.has(version.as_str())
  }

  /// Whether store `version` holds an entry for every manifest asset.
  pub fn holds_manifest(&self, version: &VersionTag, manifest: &AssetManifest) -> Result<bool> {
    if !self.exists(version)? {
      return Ok(false);
    }
    for url in manifest.resolve(&self.origin)? {
      if self.lookup(version, &Request::get(url))?.is_none() {
        return Ok(false);
      }
    }
    Ok(true)
  }

  /// Every store name with its entry count.
  pub fn inventory(&self) -> Result<Vec<(String, usize)>> {
    self
      .storage
      .names()?
      .into_iter()
      .map(|name| {
        let len = self.storage.len(&name)?;
        Ok((name, len))
      })
      .collect()
  }

  /// Fetch every manifest entry concurrently and write each success.
  async fn populate(&self, version: &VersionTag, manifest: &AssetManifest) -> PopulateReport {
    let urls = match manifest.resolve(&self.origin) {
      Ok(urls) => urls,
      Err(e) => {
        error!("Failed to resolve manifest: {:#}", e);
        return PopulateReport {
          stored: Vec::new(),
          failed: vec![("manifest".to_string(), e.to_string())],
        };
      }
    };

    let fetches = urls.into_iter().map(|url| async move {
      let request = Request::get(url);
      let outcome = self.fetcher.fetch(&request).await;
      (request, outcome)
    });

    let mut report = PopulateReport::default();
    for (request, outcome) in join_all(fetches).await {
      let url = request.url.to_string();
      let written = outcome.and_then(|response| {
        if !response.is_success() {
          return Err(eyre!("Unexpected status {}", response.status));
        }
        self.put(version, &request, &response)
      });

      match written {
        Ok(()) => report.stored.push(url),
        Err(e) => {
          warn!(%url, "Failed to store manifest entry: {:#}", e);
          report.failed.push((url, e.to_string()));
        }
      }
    }
    report
  }
}
