mod background;
mod clients;
mod config;
mod control;
mod event;
mod host;
mod lifecycle;
mod logging;
mod manifest;
mod net;
mod notify;
mod request;
mod router;
mod store;
mod strategy;
#[cfg(test)]
mod testing;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::event::{EventHandler, FetchSignal, Signal};
use crate::host::StdioHost;
use crate::net::HttpFetcher;
use crate::store::{CacheStorage, MemoryStorage, SqliteStorage, StoreManager};
use crate::worker::{Ports, Worker};

#[derive(Parser, Debug)]
#[command(name = "okapi-sw")]
#[command(about = "Offline-first request interception with versioned response stores")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/okapi-sw/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Version tag to use instead of the configured one
  #[arg(long)]
  version_tag: Option<String>,

  /// Keep stores in memory only
  #[arg(long)]
  ephemeral: bool,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Handle JSON-line signals from stdin until EOF (default)
  Run,
  /// Install and activate the current version
  Install,
  /// Serve one request through the worker
  Fetch {
    url: String,
    #[arg(short, long, default_value = "GET")]
    method: String,
    /// Request destination, e.g. "document"
    #[arg(short, long, default_value = "")]
    destination: String,
  },
  /// List store generations
  Stores,
  /// Print the version tag
  Version,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  // Override the version if specified on command line
  let config = match args.version_tag {
    Some(version) => Config { version, ..config },
    None => config,
  };

  let _log_guard = logging::init(&config.logging)?;

  match args.command.unwrap_or(Command::Run) {
    Command::Version => {
      println!("{}", config.version);
      Ok(())
    }
    Command::Stores => list_stores(&config, args.ephemeral),
    command => serve(&config, args.ephemeral, command).await,
  }
}

fn open_storage(config: &Config, ephemeral: bool) -> Result<Arc<dyn CacheStorage>> {
  if ephemeral {
    return Ok(Arc::new(MemoryStorage::new()));
  }
  Ok(Arc::new(SqliteStorage::open_at(&config.store_path()?)?))
}

async fn serve(config: &Config, ephemeral: bool, command: Command) -> Result<()> {
  let (tx, rx) = mpsc::unbounded_channel();
  let writer = tokio::spawn(host::write_outputs(rx, tokio::io::stdout()));

  let host = Arc::new(StdioHost::new(tx));
  let worker = Arc::new(Worker::new(
    config,
    Ports {
      storage: open_storage(config, ephemeral)?,
      fetcher: Arc::new(HttpFetcher::new()?),
      clients: host.clone(),
      notifications: host.clone(),
    },
  )?);

  match command {
    Command::Install => host::dispatch(&worker, &host, Signal::Install).await,
    Command::Fetch {
      url,
      method,
      destination,
    } => {
      worker.resume_if_current().await?;
      let fetch = FetchSignal {
        id: "cli".to_string(),
        url,
        method: Some(method),
        destination,
        headers: Default::default(),
        body: None,
      };
      host::dispatch(&worker, &host, Signal::Fetch(fetch)).await;
    }
    _ => {
      worker.resume_if_current().await?;
      host::run(Arc::clone(&worker), Arc::clone(&host), EventHandler::stdin()).await?;
    }
  }

  worker.wait_until_idle().await;

  // The writer finishes once the last sender, held by the host, is gone
  drop(worker);
  drop(host);
  writer
    .await
    .map_err(|e| eyre!("Output writer failed: {}", e))?
}

fn list_stores(config: &Config, ephemeral: bool) -> Result<()> {
  let manager = StoreManager::new(
    open_storage(config, ephemeral)?,
    Arc::new(HttpFetcher::new()?),
    config.origin_url()?,
  );

  let stores = manager.inventory()?;
  if stores.is_empty() {
    println!("No stores");
    return Ok(());
  }
  for (name, entries) in stores {
    let marker = if name == config.version { "*" } else { " " };
    println!("{} {}\t{} entries", marker, name, entries);
  }
  Ok(())
}
