//! The static asset manifest.

use color_eyre::{eyre::eyre, Result};
use url::Url;

/// Ordered, immutable list of resource identifiers treated as static assets.
///
/// Entries are paths (`/css/style.css`) or absolute URLs. They decide which
/// requests are served cache-first, and they are what the store is
/// pre-populated with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetManifest {
  entries: Vec<String>,
  exact_root: bool,
}

impl AssetManifest {
  pub fn new<I, S>(entries: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      entries: entries.into_iter().map(Into::into).collect(),
      exact_root: false,
    }
  }

  /// Make the bare `/` entry match only the root path instead of every URL.
  pub fn with_exact_root(mut self, exact_root: bool) -> Self {
    self.exact_root = exact_root;
    self
  }

  pub fn entries(&self) -> &[String] {
    &self.entries
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Whether `url` names a static asset.
  ///
  /// Every entry matches as a substring of the full URL, so a bare `/` entry
  /// matches everything unless `with_exact_root` is set.
  pub fn matches(&self, url: &Url) -> bool {
    self.entries.iter().any(|entry| {
      if self.exact_root && entry == "/" {
        url.path() == "/"
      } else {
        url.as_str().contains(entry.as_str())
      }
    })
  }

  /// Resolve every entry against `origin`, keeping manifest order.
  pub fn resolve(&self, origin: &Url) -> Result<Vec<Url>> {
    self
      .entries
      .iter()
      .map(|entry| {
        origin
          .join(entry)
          .map_err(|e| eyre!("Invalid manifest entry '{}': {}", entry, e))
      })
      .collect()
  }
}

impl Default for AssetManifest {
  fn default() -> Self {
    Self::new([
      "/",
      "/index.html",
      "/css/style.css",
      "/js/app.js",
      "/js/auth.js",
      "/js/posts.js",
      "/js/calls.js",
      "/js/mobile.js",
      "/js/languages.js",
      "/js/profiles.js",
      "/js/messaging.js",
      "/manifest.json",
      "/images/icon-192.png",
      "/images/icon-512.png",
    ])
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_substring_match() {
    let manifest = AssetManifest::new(["/js/app.js", "/css/style.css"]);
    assert!(manifest.matches(&url("https://app.test/js/app.js")));
    assert!(manifest.matches(&url("https://app.test/js/app.js?v=3")));
    assert!(manifest.matches(&url("https://cdn.test/assets/css/style.css")));
    assert!(!manifest.matches(&url("https://app.test/js/auth.js")));
  }

  #[test]
  fn test_root_entry_matches_every_url() {
    let manifest = AssetManifest::new(["/"]);
    assert!(manifest.matches(&url("https://app.test/")));
    assert!(manifest.matches(&url("http://localhost:3000/api/posts")));
    assert!(manifest.matches(&url("https://other.test/any/path")));
  }

  #[test]
  fn test_exact_root_entry_only_matches_root() {
    let manifest = AssetManifest::new(["/", "/index.html"]).with_exact_root(true);
    assert!(manifest.matches(&url("https://app.test/")));
    assert!(manifest.matches(&url("https://app.test/?utm=x")));
    assert!(manifest.matches(&url("https://app.test/index.html")));
    assert!(!manifest.matches(&url("https://app.test/api/posts")));
  }

  #[test]
  fn test_resolve_keeps_order() {
    let manifest = AssetManifest::new(["/", "/index.html", "https://cdn.test/font.woff2"]);
    let resolved = manifest.resolve(&url("https://app.test")).unwrap();
    let resolved: Vec<&str> = resolved.iter().map(Url::as_str).collect();
    assert_eq!(
      resolved,
      vec![
        "https://app.test/",
        "https://app.test/index.html",
        "https://cdn.test/font.woff2"
      ]
    );
  }

  #[test]
  fn test_default_manifest() {
    let manifest = AssetManifest::default();
    assert_eq!(manifest.len(), 14);
    assert_eq!(manifest.entries()[0], "/");
  }
}
