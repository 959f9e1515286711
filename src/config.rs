use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use serde_json::{json, Map};
use std::path::{Path, PathBuf};
use url::Url;

use crate::notify::{NotificationAction, NotificationDescriptor};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Version tag naming the current store generation
  pub version: String,
  /// Origin this worker controls; relative assets resolve against it
  pub origin: String,
  /// Static assets, in pre-population order
  pub assets: Vec<String>,
  /// Let the bare `/` asset match only the root path rather than every URL
  pub exact_root_entry: bool,
  /// Hosts that always go straight to the network
  pub excluded_hosts: Vec<String>,
  /// Document served to offline navigations, if stored
  pub offline_page: Option<String>,
  /// Request headers that take part in request identity
  pub vary_headers: Vec<String>,
  /// Promote the new version as soon as a complete install finishes
  pub skip_waiting_on_install: bool,
  pub store: StoreConfig,
  pub tags: TagsConfig,
  pub notification: NotificationConfig,
  pub logging: LoggingConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      version: "okapichat-v1.0.0".to_string(),
      origin: "http://localhost:3000".to_string(),
      assets: crate::manifest::AssetManifest::default()
        .entries()
        .to_vec(),
      exact_root_entry: false,
      excluded_hosts: vec!["xzjqpdnkxiizskqnckox.supabase.co".to_string()],
      offline_page: Some("/offline.html".to_string()),
      vary_headers: Vec::new(),
      skip_waiting_on_install: true,
      store: StoreConfig::default(),
      tags: TagsConfig::default(),
      notification: NotificationConfig::default(),
      logging: LoggingConfig::default(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
  /// SQLite file (default: $XDG_DATA_HOME/okapi-sw/stores.db)
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TagsConfig {
  /// Sync tag that runs deferred work and broadcasts completion
  pub sync: String,
  /// Background-fetch tag that refreshes the store
  pub refresh: String,
}

impl Default for TagsConfig {
  fn default() -> Self {
    Self {
      sync: "background-sync".to_string(),
      refresh: "update-cache".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  /// Default click target
  pub url: String,
  pub actions: Vec<NotificationAction>,
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      title: "OkapiChat".to_string(),
      body: "New message received!".to_string(),
      icon: "/images/icon-192.png".to_string(),
      badge: "/images/badge-72.png".to_string(),
      vibrate: vec![200, 100, 200],
      url: "/".to_string(),
      actions: vec![
        NotificationAction {
          action: "open".to_string(),
          title: "Open".to_string(),
        },
        NotificationAction {
          action: "close".to_string(),
          title: "Close".to_string(),
        },
      ],
    }
  }
}

impl NotificationConfig {
  /// The descriptor every push starts from.
  pub fn descriptor(&self) -> NotificationDescriptor {
    let mut data = Map::new();
    data.insert("url".to_string(), json!(self.url));

    NotificationDescriptor {
      title: self.title.clone(),
      body: self.body.clone(),
      icon: self.icon.clone(),
      badge: self.badge.clone(),
      vibrate: self.vibrate.clone(),
      data,
      actions: self.actions.clone(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Write daily rolling log files here instead of stderr
  pub directory: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./okapi-sw.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/okapi-sw/config.yaml
  ///
  /// Without any file the built-in defaults are used.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };

    Ok(config.with_env_overrides())
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("okapi-sw.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("okapi-sw").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.version.trim().is_empty() {
      return Err(eyre!("version must not be empty"));
    }
    Ok(config)
  }

  /// Apply `OKAPI_SW_VERSION`, which deploy pipelines use to stamp the tag.
  fn with_env_overrides(self) -> Self {
    match std::env::var("OKAPI_SW_VERSION") {
      Ok(version) if !version.trim().is_empty() => Config { version, ..self },
      _ => self,
    }
  }

  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))
  }

  /// Where the store database lives.
  pub fn store_path(&self) -> Result<PathBuf> {
    match &self.store.path {
      Some(path) => Ok(path.clone()),
      None => crate::store::SqliteStorage::default_path(),
    }
  }
}
