//! Intercepted requests, response snapshots and request identity.

use bytes::Bytes;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

/// What kind of resource a request is loading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
  /// Full-document navigation
  Document,
  Script,
  Style,
  Image,
  Font,
  Manifest,
  Worker,
  /// fetch() / XHR style requests with no destination
  #[default]
  Empty,
  /// Anything the host reports that we do not distinguish
  Other,
}

impl From<&str> for Destination {
  fn from(value: &str) -> Self {
    match value.trim().to_ascii_lowercase().as_str() {
      "document" => Self::Document,
      "script" => Self::Script,
      "style" => Self::Style,
      "image" => Self::Image,
      "font" => Self::Font,
      "manifest" => Self::Manifest,
      "worker" => Self::Worker,
      "" => Self::Empty,
      _ => Self::Other,
    }
  }
}

/// A request produced by the host for one outgoing fetch.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub destination: Destination,
  pub headers: Vec<(String, String)>,
  pub body: Option<Bytes>,
}

impl Request {
  /// A plain GET with no headers, as used for manifest pre-population.
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      destination: Destination::Empty,
      headers: Vec::new(),
      body: None,
    }
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn with_method(mut self, method: Method) -> Self {
    self.method = method;
    self
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  /// Case-insensitive header lookup.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn is_navigation(&self) -> bool {
    self.destination == Destination::Document
  }

  /// Only GET is treated as an idempotent read worth storing.
  pub fn is_idempotent_read(&self) -> bool {
    self.method == Method::GET
  }
}

/// A fully buffered response.
///
/// Bodies are `Bytes`, so cloning a snapshot to both return it and write it
/// to the store shares the buffer instead of copying it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseSnapshot {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Bytes,
}

impl ResponseSnapshot {
  pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  #[cfg(test)]
  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  /// 2xx status.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

/// Identity of a request inside a store: method, URL and the configured
/// vary headers.
///
/// The fragment never takes part in identity, and neither does the
/// destination: a navigation to `/index.html` hits the entry written when
/// `/index.html` was pre-populated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  hash: String,
  method: String,
  url: String,
}

impl RequestKey {
  pub fn new(request: &Request, vary_headers: &[String]) -> Self {
    let mut url = request.url.clone();
    url.set_fragment(None);

    let mut varied: Vec<(String, String)> = vary_headers
      .iter()
      .map(|name| {
        let name = name.to_ascii_lowercase();
        let value = request.header(&name).unwrap_or_default().trim().to_string();
        (name, value)
      })
      .collect();
    varied.sort();

    let mut input = format!("{}\n{}", request.method.as_str(), url.as_str());
    for (name, value) in &varied {
      input.push('\n');
      input.push_str(name);
      input.push(':');
      input.push_str(value);
    }

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());

    Self {
      hash: hex::encode(hasher.finalize()),
      method: request.method.as_str().to_string(),
      url: url.to_string(),
    }
  }

  pub fn hash(&self) -> &str {
    &self.hash
  }

  pub fn method(&self) -> &str {
    &self.method
  }

  pub fn url(&self) -> &str {
    &self.url
  }
}

impl std::fmt::Display for RequestKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{} {}", self.method, self.url)
  }
}
