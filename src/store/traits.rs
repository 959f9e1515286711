//! Core traits and types for the response store.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};

use crate::request::{RequestKey, ResponseSnapshot};

/// A response read back from a store.
#[derive(Debug, Clone)]
pub struct StoredResponse {
  /// The stored snapshot, unchanged since it was written
  pub response: ResponseSnapshot,
  /// When the snapshot was written
  pub cached_at: DateTime<Utc>,
}

/// Trait for store backends.
///
/// A backend holds any number of named stores, one per store generation.
/// Every operation is synchronous; callers that need to fan out wrap calls in
/// `spawn_blocking`.
pub trait CacheStorage: Send + Sync {
  /// Create the named store if it does not exist yet.
  fn open(&self, store: &str) -> Result<()>;

  /// Whether the named store exists.
  fn has(&self, store: &str) -> Result<bool>;

  /// Names of every existing store.
  fn names(&self) -> Result<Vec<String>>;

  /// Delete a whole store. Returns false if it did not exist.
  fn delete(&self, store: &str) -> Result<bool>;

  /// Look up a response by request identity.
  fn get(&self, store: &str, key: &RequestKey) -> Result<Option<StoredResponse>>;

  /// Write a response, creating the store if needed. Last writer wins.
  fn put(&self, store: &str, key: &RequestKey, response: &ResponseSnapshot) -> Result<()>;

  /// Number of entries in the named store.
  fn len(&self, store: &str) -> Result<usize>;
}

/// Stores only hold GET responses.
pub(crate) fn ensure_storable(key: &RequestKey) -> Result<()> {
  if key.method() != "GET" {
    return Err(eyre!(
      "Refusing to store {}: only GET requests can be stored",
      key
    ));
  }
  Ok(())
}
