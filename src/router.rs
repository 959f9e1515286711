//! Request classification.

use url::Url;

use crate::manifest::AssetManifest;
use crate::request::Request;

/// How an intercepted request is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  /// Not intercepted; the host performs the request itself
  Passthrough(PassthroughReason),
  /// Static asset
  CacheFirst,
  /// Dynamic data
  NetworkFirst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassthroughReason {
  /// Scheme is not http(s)
  Scheme,
  /// Host is on the always-online list
  ExcludedHost,
}

/// Always-online hosts.
///
/// Entries match a hostname exactly, ignoring case. An entry with a leading
/// dot (`.example.com`) matches every subdomain of `example.com` instead.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExcludedHosts {
  entries: Vec<String>,
}

impl ExcludedHosts {
  pub fn new<I, S>(entries: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    Self {
      entries: entries
        .into_iter()
        .map(|e| e.as_ref().trim().to_ascii_lowercase())
        .filter(|e| !e.is_empty())
        .collect(),
    }
  }

  pub fn contains(&self, host: &str) -> bool {
    let host = host.to_ascii_lowercase();
    self.entries.iter().any(|entry| match entry.strip_prefix('.') {
      Some(domain) => host
        .strip_suffix(domain)
        .is_some_and(|rest| rest.ends_with('.')),
      None => *entry == host,
    })
  }
}

/// Classifies every intercepted request into exactly one route.
#[derive(Debug, Clone)]
pub struct Router {
  manifest: AssetManifest,
  excluded: ExcludedHosts,
}

impl Router {
  pub fn new(manifest: AssetManifest, excluded: ExcludedHosts) -> Self {
    Self { manifest, excluded }
  }

  pub fn route(&self, request: &Request) -> Route {
    self.route_url(&request.url)
  }

  pub fn route_url(&self, url: &Url) -> Route {
    if !matches!(url.scheme(), "http" | "https") {
      return Route::Passthrough(PassthroughReason::Scheme);
    }

    if url.host_str().is_some_and(|host| self.excluded.contains(host)) {
      return Route::Passthrough(PassthroughReason::ExcludedHost);
    }

    if self.manifest.matches(url) {
      Route::CacheFirst
    } else {
      Route::NetworkFirst
    }
  }
}
