//! Bounded on-disk image cache.
//!
//! Bytes live as files under the cache directory, named by the SHA-256 of
//! their URL. Metadata lives in the [`LocalStore`] `images` table, which also
//! picks eviction victims.

mod fetcher;

pub use fetcher::{HttpFetcher, ImageFetcher};

use futures::stream::{self, StreamExt};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ImageConfig;
use crate::connectivity::{ConnectivityMonitor, ConnectivityState};
use crate::error::{FetchError, NetworkError, StorageError};
use crate::store::{ImageCacheEntry, ImageUsage, LocalStore};

struct Inner {
  store: LocalStore,
  fetcher: Arc<dyn ImageFetcher>,
  connectivity: ConnectivityMonitor,
  dir: PathBuf,
  cap_bytes: u64,
  fetch_timeout: Duration,
  prefetch_concurrency: usize,
  /// One download per URL at a time
  downloads: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

#[derive(Clone)]
pub struct ImageCache {
  inner: Arc<Inner>,
}

impl ImageCache {
  pub fn new(
    store: LocalStore,
    fetcher: Arc<dyn ImageFetcher>,
    connectivity: ConnectivityMonitor,
    dir: impl Into<PathBuf>,
    config: &ImageConfig,
  ) -> Self {
    Self {
      inner: Arc::new(Inner {
        store,
        fetcher,
        connectivity,
        dir: dir.into(),
        cap_bytes: config.cap_bytes,
        fetch_timeout: config.fetch_timeout(),
        prefetch_concurrency: config.prefetch_concurrency.max(1),
        downloads: Mutex::new(HashMap::new()),
      }),
    }
  }

  pub fn dir(&self) -> &Path {
    &self.inner.dir
  }

  /// Local path for `url`, downloading it on a miss.
  ///
  /// Hits never touch the network. Misses while offline fail immediately so
  /// the caller can show a placeholder.
  pub async fn resolve(&self, url: &str) -> Result<PathBuf, FetchError> {
    let parsed = parse_url(url)?;
    let key = parsed.as_str();
    if let Some(path) = self.cached_path(key).await? {
      return Ok(path);
    }
    if self.inner.connectivity.current_state() == ConnectivityState::Offline {
      debug!(url = key, "image miss while offline");
      return Err(FetchError::Offline(key.to_string()));
    }

    let lock = self.download_lock(key);
    let result = {
      let _guard = lock.lock().await;
      // A concurrent resolve may have finished the download while we waited.
      match self.cached_path(key).await {
        Ok(Some(path)) => Ok(path),
        Ok(None) => self.download(&parsed).await,
        Err(e) => Err(e),
      }
    };
    drop(lock);
    self.release_download_lock(key);
    result
  }

  /// Resolve several URLs with bounded concurrency. Failures are logged and
  /// counted, not returned.
  pub async fn prefetch<I>(&self, urls: I) -> usize
  where
    I: IntoIterator<Item = String>,
  {
    let results: Vec<bool> = stream::iter(urls)
      .map(|url| async move {
        match self.resolve(&url).await {
          Ok(_) => true,
          Err(e) => {
            debug!(url, error = %e, "prefetch failed");
            false
          }
        }
      })
      .buffer_unordered(self.inner.prefetch_concurrency)
      .collect()
      .await;

    let fetched = results.iter().filter(|ok| **ok).count();
    info!(fetched, failed = results.len() - fetched, "image prefetch finished");
    fetched
  }

  /// Exempt `url` from eviction. Returns `false` when it is not cached.
  pub fn pin(&self, url: &str) -> Result<bool, StorageError> {
    self.inner.store.set_image_permanent(&normalize(url), true)
  }

  /// Make `url` evictable again and enforce the cap.
  pub fn unpin(&self, url: &str) -> Result<bool, FetchError> {
    let found = self.inner.store.set_image_permanent(&normalize(url), false)?;
    if found {
      self.evict(None)?;
    }
    Ok(found)
  }

  /// Drop `url` and its file. The next `resolve` downloads it again.
  pub async fn invalidate(&self, url: &str) -> Result<bool, FetchError> {
    match self.inner.store.remove_image(&normalize(url))? {
      Some(entry) => {
        remove_file(&entry.local_path).await?;
        debug!(url, "image invalidated");
        Ok(true)
      }
      None => Ok(false),
    }
  }

  pub fn usage(&self) -> Result<ImageUsage, StorageError> {
    self.inner.store.image_usage()
  }

  pub fn entries(&self) -> Result<Vec<ImageCacheEntry>, StorageError> {
    self.inner.store.image_entries()
  }

  async fn cached_path(&self, url: &str) -> Result<Option<PathBuf>, FetchError> {
    let Some(entry) = self.inner.store.touch_image(url)? else {
      return Ok(None);
    };
    if tokio::fs::try_exists(&entry.local_path).await.unwrap_or(false) {
      return Ok(Some(entry.local_path));
    }

    warn!(url, path = %entry.local_path.display(), "cached image file missing, refetching");
    self.inner.store.remove_image(url)?;
    Ok(None)
  }

  async fn download(&self, url: &Url) -> Result<PathBuf, FetchError> {
    let key = url.as_str();
    let bytes = match tokio::time::timeout(self.inner.fetch_timeout, self.inner.fetcher.fetch(url)).await {
      Ok(Ok(bytes)) => bytes,
      Ok(Err(source)) => return Err(network_error(key, source)),
      Err(_) => return Err(network_error(key, NetworkError::Timeout(self.inner.fetch_timeout))),
    };

    let size = bytes.len() as u64;
    if size > self.inner.cap_bytes {
      warn!(url = key, size, cap = self.inner.cap_bytes, "image exceeds cache size");
      return Err(FetchError::TooLarge {
        url: key.to_string(),
        size,
        cap: self.inner.cap_bytes,
      });
    }

    tokio::fs::create_dir_all(&self.inner.dir).await?;
    let path = self.inner.dir.join(file_name(url));
    let partial = path.with_file_name(format!("{}.part", file_name(url)));

    if let Err(e) = write_atomically(&partial, &path, &bytes).await {
      let _ = tokio::fs::remove_file(&partial).await;
      return Err(e.into());
    }

    let now = self.inner.store.now();
    self.inner.store.upsert_image(&ImageCacheEntry {
      url: key.to_string(),
      local_path: path.clone(),
      size_bytes: size,
      cached_at: now,
      last_accessed_at: now,
      is_permanent: false,
    })?;
    debug!(url = key, size, "image cached");

    self.evict(Some(key))?;
    Ok(path)
  }

  /// Enforce the cap. `keep` is the entry just inserted, which must survive.
  fn evict(&self, keep: Option<&str>) -> Result<usize, FetchError> {
    let evicted = self.inner.store.evict_images(self.inner.cap_bytes, keep)?;
    for entry in &evicted {
      if let Err(e) = std::fs::remove_file(&entry.local_path) {
        if e.kind() != std::io::ErrorKind::NotFound {
          warn!(url = entry.url, error = %e, "failed to delete evicted image");
        }
      }
    }
    if !evicted.is_empty() {
      let freed: u64 = evicted.iter().map(|e| e.size_bytes).sum();
      info!(count = evicted.len(), freed, "evicted cached images");
    }
    Ok(evicted.len())
  }

  fn download_lock(&self, url: &str) -> Arc<tokio::sync::Mutex<()>> {
    match self.inner.downloads.lock() {
      Ok(mut downloads) => downloads.entry(url.to_string()).or_default().clone(),
      Err(_) => Arc::new(tokio::sync::Mutex::new(())),
    }
  }

  fn release_download_lock(&self, url: &str) {
    if let Ok(mut downloads) = self.inner.downloads.lock() {
      if downloads.get(url).is_some_and(|lock| Arc::strong_count(lock) == 1) {
        downloads.remove(url);
      }
    }
  }
}

fn parse_url(url: &str) -> Result<Url, FetchError> {
  let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
    url: url.to_string(),
    reason: e.to_string(),
  })?;
  match parsed.scheme() {
    "http" | "https" => Ok(parsed),
    other => Err(FetchError::InvalidUrl {
      url: url.to_string(),
      reason: format!("unsupported scheme {other}"),
    }),
  }
}

/// The key images are stored under; unparseable input is used verbatim.
fn normalize(url: &str) -> String {
  Url::parse(url).map_or_else(|_| url.to_string(), String::from)
}

fn network_error(url: &str, source: NetworkError) -> FetchError {
  warn!(url, error = %source, "image fetch failed");
  FetchError::Network {
    url: url.to_string(),
    source,
  }
}

/// SHA-256 of the URL, keeping a short extension from its path so viewers can
/// sniff the format.
fn file_name(url: &Url) -> String {
  let hash = hex::encode(Sha256::digest(url.as_str().as_bytes()));
  let extension = url
    .path_segments()
    .and_then(|mut segments| segments.next_back())
    .and_then(|last| last.rsplit_once('.'))
    .map(|(_, ext)| ext.to_ascii_lowercase())
    .filter(|ext| (1..=5).contains(&ext.len()) && ext.chars().all(|c| c.is_ascii_alphanumeric()));

  match extension {
    Some(ext) => format!("{hash}.{ext}"),
    None => hash,
  }
}

async fn write_atomically(partial: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
  tokio::fs::write(partial, bytes).await?;
  tokio::fs::rename(partial, path).await
}

async fn remove_file(path: &Path) -> std::io::Result<()> {
  match tokio::fs::remove_file(path).await {
    Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
    _ => Ok(()),
  }
}

#[cfg(test)]
mod tests;
