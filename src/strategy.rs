//! Serving strategies for intercepted requests.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::net::Fetcher;
use crate::request::{Request, ResponseSnapshot};
use crate::store::{StoreManager, VersionTag};

/// A response produced for an intercepted request, with where it came from.
#[derive(Debug, Clone)]
pub struct Served {
  pub response: ResponseSnapshot,
  pub source: ServeSource,
}

impl Served {
  fn from_network(response: ResponseSnapshot) -> Self {
    Self {
      response,
      source: ServeSource::Network,
    }
  }

  fn from_store(response: ResponseSnapshot) -> Self {
    Self {
      response,
      source: ServeSource::Store,
    }
  }

  fn offline_page(response: ResponseSnapshot) -> Self {
    Self {
      response,
      source: ServeSource::OfflinePage,
    }
  }
}

/// Indicates where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeSource {
  /// Fresh from the network
  Network,
  /// Stored snapshot for this exact request
  Store,
  /// Network unavailable, serving the offline fallback document
  OfflinePage,
}

/// Cache-first and network-first serving over one store generation.
#[derive(Clone)]
pub struct Strategies {
  store: Arc<StoreManager>,
  fetcher: Arc<dyn Fetcher>,
  version: VersionTag,
  offline_page: Option<String>,
  write_backs: TaskTracker,
}

impl Strategies {
  pub fn new(
    store: Arc<StoreManager>,
    fetcher: Arc<dyn Fetcher>,
    version: VersionTag,
    write_backs: TaskTracker,
  ) -> Self {
    Self {
      store,
      fetcher,
      version,
      offline_page: None,
      write_backs,
    }
  }

  /// Path of the document served to navigations when everything else fails.
  pub fn with_offline_page(mut self, path: Option<String>) -> Self {
    self.offline_page = path;
    self
  }

  /// Serve a static asset.
  ///
  /// 1. Stored snapshot - returned as is, no network, no freshness check
  /// 2. Network - a 2xx response is written back in the background
  /// 3. Network failed - navigations get the stored offline page if any
  pub async fn cache_first(&self, request: &Request) -> Result<Served> {
    if let Some(stored) = self.lookup(request) {
      debug!(url = %request.url, "Serving asset from store");
      return Ok(Served::from_store(stored));
    }

    debug!(url = %request.url, "Asset not stored, fetching");
    match self.fetcher.fetch(request).await {
      Ok(response) => {
        if response.is_success() {
          self.write_back(request, &response);
        }
        Ok(Served::from_network(response))
      }
      Err(e) => {
        info!(url = %request.url, "Asset unavailable offline: {:#}", e);
        if request.is_navigation() {
          if let Some(page) = self.offline_page() {
            return Ok(Served::offline_page(page));
          }
        }
        Err(e)
      }
    }
  }

  /// Serve dynamic data.
  ///
  /// 1. Network, always first - a 2xx GET response is written back in the
  ///    background
  /// 2. Network failed - stored snapshot for this request if any
  pub async fn network_first(&self, request: &Request) -> Result<Served> {
    match self.fetcher.fetch(request).await {
      Ok(response) => {
        if response.is_success() && request.is_idempotent_read() {
          self.write_back(request, &response);
        }
        Ok(Served::from_network(response))
      }
      Err(e) => {
        info!(url = %request.url, "Network failed, trying store: {:#}", e);
        match self.lookup(request) {
          Some(stored) => Ok(Served::from_store(stored)),
          None => Err(eyre!("{} is not stored: {:#}", request.url, e)),
        }
      }
    }
  }

  /// Store lookup where a storage error counts as a miss.
  fn lookup(&self, request: &Request) -> Option<ResponseSnapshot> {
    match self.store.lookup(&self.version, request) {
      Ok(found) => found.map(|stored| stored.response),
      Err(e) => {
        warn!(url = %request.url, "Store lookup failed: {:#}", e);
        None
      }
    }
  }

  fn offline_page(&self) -> Option<ResponseSnapshot> {
    let path = self.offline_page.as_deref()?;
    match self.store.lookup_path(&self.version, path) {
      Ok(found) => found.map(|stored| stored.response),
      Err(e) => {
        warn!(path, "Offline page lookup failed: {:#}", e);
        None
      }
    }
  }

  /// Write a duplicate of `response` into the store without delaying the
  /// caller. Failures are logged and go nowhere else.
  fn write_back(&self, request: &Request, response: &ResponseSnapshot) {
    let store = Arc::clone(&self.store);
    let version = self.version.clone();
    let request = request.clone();
    let duplicate = response.clone();

    self.write_backs.spawn(async move {
      if let Err(e) = store.put(&version, &request, &duplicate) {
        warn!(url = %request.url, "Write-back failed: {:#}", e);
      }
    });
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::request::Destination;
  use crate::store::{CacheStorage, MemoryStorage};
  use crate::testing::{FlakyStorage, ScriptedFetcher};
  use reqwest::Method;
  use url::Url;

  struct Fixture {
    strategies: Strategies,
    store: Arc<StoreManager>,
    fetcher: Arc<ScriptedFetcher>,
    tracker: TaskTracker,
    version: VersionTag,
  }

  impl Fixture {
    fn new() -> Self {
      Self::with_storage(Arc::new(MemoryStorage::new()))
    }

    fn with_storage(storage: Arc<dyn CacheStorage>) -> Self {
      let fetcher = Arc::new(ScriptedFetcher::new());
      let origin = Url::parse("https://app.test").unwrap();
      let store = Arc::new(StoreManager::new(storage, fetcher.clone(), origin));
      let tracker = TaskTracker::new();
      let version = VersionTag::new("v1");
      let strategies = Strategies::new(store.clone(), fetcher.clone(), version.clone(), tracker.clone())
        .with_offline_page(Some("/offline.html".to_string()));

      Self {
        strategies,
        store,
        fetcher,
        tracker,
        version,
      }
    }

    fn seed(&self, request: &Request, body: &'static str) {
      self
        .store
        .put(&self.version, request, &ResponseSnapshot::new(200, body))
        .unwrap();
    }

    fn stored(&self, request: &Request) -> Option<ResponseSnapshot> {
      self
        .store
        .lookup(&self.version, request)
        .unwrap()
        .map(|s| s.response)
    }

    async fn settle(&self) {
      self.tracker.close();
      self.tracker.wait().await;
      self.tracker.reopen();
    }
  }

  fn get(path: &str) -> Request {
    Request::get(Url::parse("https://app.test").unwrap().join(path).unwrap())
  }

  #[tokio::test]
  async fn test_cache_first_hit_skips_network() {
    let fx = Fixture::new();
    let request = get("/js/app.js");
    fx.seed(&request, "stored");
    fx.fetcher.respond(request.url.as_str(), ResponseSnapshot::new(200, "fresh"));

    let served = fx.strategies.cache_first(&request).await.unwrap();

    assert_eq!(served.source, ServeSource::Store);
    assert_eq!(served.response, ResponseSnapshot::new(200, "stored"));
    assert_eq!(fx.fetcher.calls(), 0);
  }

  #[tokio::test]
  async fn test_cache_first_miss_fetches_and_writes_back() {
    let fx = Fixture::new();
    let request = get("/js/app.js");
    fx.fetcher.respond(request.url.as_str(), ResponseSnapshot::new(200, "fresh"));

    let served = fx.strategies.cache_first(&request).await.unwrap();
    assert_eq!(served.source, ServeSource::Network);
    assert_eq!(served.response.body.as_ref(), b"fresh");

    fx.settle().await;
    assert_eq!(fx.stored(&request), Some(ResponseSnapshot::new(200, "fresh")));
  }

  #[tokio::test]
  async fn test_cache_first_does_not_store_errors() {
    let fx = Fixture::new();
    let request = get("/images/icon-512.png");
    fx.fetcher.respond(request.url.as_str(), ResponseSnapshot::new(404, "nope"));

    let served = fx.strategies.cache_first(&request).await.unwrap();
    assert_eq!(served.response.status, 404);

    fx.settle().await;
    assert!(fx.stored(&request).is_none());
  }

  #[tokio::test]
  async fn test_cache_first_offline_navigation_gets_offline_page() {
    let fx = Fixture::new();
    fx.seed(&get("/offline.html"), "you are offline");
    let request = get("/index.html").with_destination(Destination::Document);
    fx.fetcher.fail(request.url.as_str());

    let served = fx.strategies.cache_first(&request).await.unwrap();

    assert_eq!(served.source, ServeSource::OfflinePage);
    assert_eq!(served.response.body.as_ref(), b"you are offline");
  }

  #[tokio::test]
  async fn test_cache_first_offline_navigation_without_page_fails() {
    let fx = Fixture::new();
    let request = get("/index.html").with_destination(Destination::Document);
    fx.fetcher.fail(request.url.as_str());

    assert!(fx.strategies.cache_first(&request).await.is_err());
  }

  #[tokio::test]
  async fn test_cache_first_offline_subresource_fails_even_with_page() {
    let fx = Fixture::new();
    fx.seed(&get("/offline.html"), "you are offline");
    let request = get("/css/style.css").with_destination(Destination::Style);
    fx.fetcher.fail(request.url.as_str());

    assert!(fx.strategies.cache_first(&request).await.is_err());
  }

  #[tokio::test]
  async fn test_network_first_success_is_stored() {
    let fx = Fixture::new();
    let request = get("/api/posts");
    fx.seed(&request, "old posts");
    fx.fetcher.respond(request.url.as_str(), ResponseSnapshot::new(200, "new posts"));

    let served = fx.strategies.network_first(&request).await.unwrap();
    assert_eq!(served.source, ServeSource::Network);
    assert_eq!(served.response.body.as_ref(), b"new posts");
    assert_eq!(fx.fetcher.calls(), 1);

    fx.settle().await;
    assert_eq!(fx.stored(&request), Some(ResponseSnapshot::new(200, "new posts")));
  }

  #[tokio::test]
  async fn test_network_first_does_not_store_non_get() {
    let fx = Fixture::new();
    let request = get("/api/posts").with_method(Method::POST);
    fx.fetcher.respond(request.url.as_str(), ResponseSnapshot::new(200, "created"));

    let served = fx.strategies.network_first(&request).await.unwrap();
    assert_eq!(served.response.body.as_ref(), b"created");

    fx.settle().await;
    assert!(fx.stored(&get("/api/posts")).is_none());
  }

  #[tokio::test]
  async fn test_network_first_falls_back_to_store() {
    let fx = Fixture::new();
    let request = get("/api/posts");
    fx.seed(&request, "cached posts");
    fx.fetcher.fail(request.url.as_str());

    let served = fx.strategies.network_first(&request).await.unwrap();

    assert_eq!(served.source, ServeSource::Store);
    assert_eq!(served.response.body.as_ref(), b"cached posts");
  }

  #[tokio::test]
  async fn test_network_first_fails_when_nothing_stored() {
    let fx = Fixture::new();
    let request = get("/api/posts");
    fx.fetcher.fail(request.url.as_str());

    assert!(fx.strategies.network_first(&request).await.is_err());
  }

  #[tokio::test]
  async fn test_cache_first_non_get_is_served_but_not_stored() {
    let fx = Fixture::new();
    let request = get("/js/app.js").with_method(Method::POST);
    fx.fetcher.respond(request.url.as_str(), ResponseSnapshot::new(200, "posted"));

    let served = fx.strategies.cache_first(&request).await.unwrap();
    assert_eq!(served.source, ServeSource::Network);
    assert_eq!(served.response.body.as_ref(), b"posted");

    fx.settle().await;
    assert!(fx.stored(&get("/js/app.js")).is_none());
  }

  #[tokio::test]
  async fn test_failed_write_back_does_not_affect_response() {
    let fx = Fixture::with_storage(Arc::new(FlakyStorage::failing_puts()));
    let asset = get("/js/app.js");
    let data = get("/api/posts");
    fx.fetcher.respond(asset.url.as_str(), ResponseSnapshot::new(200, "asset"));
    fx.fetcher.respond(data.url.as_str(), ResponseSnapshot::new(200, "posts"));

    let served = fx.strategies.cache_first(&asset).await.unwrap();
    assert_eq!(served.source, ServeSource::Network);
    assert_eq!(served.response.body.as_ref(), b"asset");

    let served = fx.strategies.network_first(&data).await.unwrap();
    assert_eq!(served.source, ServeSource::Network);
    assert_eq!(served.response.body.as_ref(), b"posts");

    fx.settle().await;
    assert!(fx.stored(&asset).is_none());
    assert!(fx.stored(&data).is_none());
  }

  #[tokio::test]
  async fn test_cache_first_lookup_error_counts_as_miss() {
    let fx = Fixture::with_storage(Arc::new(FlakyStorage::failing_gets()));
    let request = get("/js/app.js");
    fx.seed(&request, "stored");
    fx.fetcher.respond(request.url.as_str(), ResponseSnapshot::new(200, "fresh"));

    let served = fx.strategies.cache_first(&request).await.unwrap();

    assert_eq!(served.source, ServeSource::Network);
    assert_eq!(served.response.body.as_ref(), b"fresh");
    assert_eq!(fx.fetcher.calls(), 1);
  }

  #[tokio::test]
  async fn test_network_first_lookup_error_rejects_when_offline() {
    let fx = Fixture::with_storage(Arc::new(FlakyStorage::failing_gets()));
    let request = get("/api/posts");
    fx.seed(&request, "cached posts");
    fx.fetcher.fail(request.url.as_str());

    assert!(fx.strategies.network_first(&request).await.is_err());
  }
}
