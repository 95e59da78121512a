use churchdir_sync::clock;
use churchdir_sync::config::Config;
use churchdir_sync::connectivity::{ConnectivityMonitor, ConnectivityState, HttpProbe};
use churchdir_sync::images::{HttpFetcher, ImageCache};
use churchdir_sync::store::LocalStore;
use churchdir_sync::sync::{HttpRemote, SyncEngine};
use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use std::sync::Arc;
use tracing::{info, warn};

/// Everything a command needs, wired from the configuration.
pub struct App {
  pub config: Config,
  pub store: LocalStore,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let path = config.database_path()?;
    let store = LocalStore::open(&path, clock::system())
      .map_err(|e| {
        if e.is_corrupt() {
          eyre!("Cache at {} is corrupt, run `churchdir-sync reset`: {}", path.display(), e)
        } else {
          eyre!("Failed to open cache at {}: {}", path.display(), e)
        }
      })?
      .with_grace_window(config.sync.grace_window());

    Ok(Self { config, store })
  }

  /// Connectivity from HEAD probes against the remote, or a fixed state
  /// when no remote is configured.
  pub async fn connectivity(&self) -> Result<ConnectivityMonitor> {
    let Some(url) = &self.config.remote.url else {
      // Images come from their own hosts, so only sync needs a remote.
      warn!("no remote url configured, assuming online");
      return Ok(ConnectivityMonitor::fixed(ConnectivityState::Online));
    };

    let url = url::Url::parse(url).wrap_err_with(|| format!("Invalid remote url {url}"))?;
    let probe = HttpProbe::new(
      url,
      self.config.remote.timeout(),
      self.config.connectivity.degraded_latency(),
    )?;
    Ok(ConnectivityMonitor::spawn(Arc::new(probe), &self.config.connectivity).await)
  }

  pub fn sync_engine(&self, connectivity: ConnectivityMonitor) -> Result<SyncEngine> {
    let url = self
      .config
      .remote
      .url
      .as_deref()
      .ok_or_else(|| eyre!("No remote url configured. Set remote.url in the config file."))?;
    let remote = HttpRemote::new(url, self.config.remote.timeout(), Config::api_token())?;
    info!(remote = %remote.base_url(), "using remote store");

    Ok(
      SyncEngine::builder(self.store.clone(), Arc::new(remote), connectivity)
        .config(self.config.sync.clone())
        .entity_types(self.config.remote.entity_types.clone())
        .network_timeout(self.config.remote.timeout())
        .build(),
    )
  }

  pub fn image_cache(&self, connectivity: ConnectivityMonitor) -> Result<ImageCache> {
    let fetcher = HttpFetcher::new(self.config.images.fetch_timeout())?;
    Ok(ImageCache::new(
      self.store.clone(),
      Arc::new(fetcher),
      connectivity,
      self.config.image_dir()?,
      &self.config.images,
    ))
  }
}
