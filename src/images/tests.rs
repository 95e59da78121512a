use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

use super::*;
use crate::clock::ManualClock;
use crate::connectivity::ManualConnectivity;

const MB: usize = 1024 * 1024;

struct MockFetcher {
  default_size: usize,
  sizes: Mutex<HashMap<String, usize>>,
  failing: Mutex<HashSet<String>>,
  calls: AtomicUsize,
  delay: Duration,
}

impl MockFetcher {
  fn new(default_size: usize) -> Self {
    Self {
      default_size,
      sizes: Mutex::new(HashMap::new()),
      failing: Mutex::new(HashSet::new()),
      calls: AtomicUsize::new(0),
      delay: Duration::ZERO,
    }
  }

  fn fail(&self, url: &str) {
    self.failing.lock().unwrap().insert(url.to_string());
  }
}

#[async_trait]
impl ImageFetcher for MockFetcher {
  async fn fetch(&self, url: &Url) -> Result<Vec<u8>, NetworkError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    if !self.delay.is_zero() {
      tokio::time::sleep(self.delay).await;
    }
    if self.failing.lock().unwrap().contains(url.as_str()) {
      return Err(NetworkError::Server {
        status: 404,
        message: "not found".into(),
      });
    }
    let size = self
      .sizes
      .lock()
      .unwrap()
      .get(url.as_str())
      .copied()
      .unwrap_or(self.default_size);
    Ok(vec![0x89; size])
  }
}

struct Harness {
  dir: TempDir,
  clock: Arc<ManualClock>,
  fetcher: Arc<MockFetcher>,
  connectivity: ManualConnectivity,
  cache: ImageCache,
}

fn harness(fetcher: MockFetcher, cap_bytes: u64) -> Harness {
  let dir = TempDir::new().unwrap();
  let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap());
  let store = LocalStore::open(dir.path().join("cache.db"), clock.clone()).unwrap();
  let (monitor, connectivity) = ConnectivityMonitor::manual(ConnectivityState::Online);
  let fetcher = Arc::new(fetcher);
  let config = ImageConfig {
    cap_bytes,
    ..ImageConfig::default()
  };
  let cache = ImageCache::new(
    store,
    fetcher.clone(),
    monitor,
    dir.path().join("images"),
    &config,
  );

  Harness {
    dir,
    clock,
    fetcher,
    connectivity,
    cache,
  }
}

fn url(n: usize) -> String {
  format!("https://cdn.example.org/photos/church-{n}.jpg")
}

fn cached_urls(cache: &ImageCache) -> HashSet<String> {
  cache.entries().unwrap().into_iter().map(|e| e.url).collect()
}

#[tokio::test]
async fn test_hit_returns_same_path_without_fetching() {
  let h = harness(MockFetcher::new(64), 1024);

  let first = h.cache.resolve(&url(1)).await.unwrap();
  h.clock.advance(ChronoDuration::seconds(5));
  let second = h.cache.resolve(&url(1)).await.unwrap();

  assert_eq!(first, second);
  assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 1);
  assert_eq!(std::fs::read(&first).unwrap().len(), 64);
  assert!(first.to_string_lossy().ends_with(".jpg"));

  let entry = &h.cache.entries().unwrap()[0];
  assert_eq!(entry.last_accessed_at - entry.cached_at, ChronoDuration::seconds(5));
}

#[tokio::test]
async fn test_eviction_removes_least_recently_accessed_first() {
  let h = harness(MockFetcher::new(12 * MB), 100 * MB as u64);

  for n in 0..8 {
    h.clock.advance(ChronoDuration::seconds(1));
    h.cache.resolve(&url(n)).await.unwrap();
  }
  assert_eq!(h.cache.usage().unwrap().total_bytes, 96 * MB as u64);

  // Touch the oldest image so the second one becomes the LRU entry.
  h.clock.advance(ChronoDuration::seconds(1));
  let kept = h.cache.resolve(&url(0)).await.unwrap();

  h.clock.advance(ChronoDuration::seconds(1));
  h.cache.resolve(&url(8)).await.unwrap();

  let urls = cached_urls(&h.cache);
  assert_eq!(urls.len(), 8);
  assert!(!urls.contains(&url(1)));
  assert!(urls.contains(&url(0)) && urls.contains(&url(8)));
  assert!(kept.exists());
  assert!(h.cache.usage().unwrap().evictable_bytes <= 100 * MB as u64);

  h.clock.advance(ChronoDuration::seconds(1));
  h.cache.resolve(&url(9)).await.unwrap();
  let urls = cached_urls(&h.cache);
  assert!(!urls.contains(&url(2)));
  assert!(urls.contains(&url(9)));
  assert!(h.cache.usage().unwrap().evictable_bytes <= 100 * MB as u64);

  // Only the files of live entries remain on disk.
  let files = std::fs::read_dir(h.cache.dir()).unwrap().count();
  assert_eq!(files, 8);
}

#[tokio::test]
async fn test_pinned_entries_are_never_evicted() {
  let h = harness(MockFetcher::new(8), 10);

  h.cache.resolve(&url(1)).await.unwrap();
  assert!(h.cache.pin(&url(1)).unwrap());

  h.clock.advance(ChronoDuration::seconds(1));
  h.cache.resolve(&url(2)).await.unwrap();
  h.clock.advance(ChronoDuration::seconds(1));
  h.cache.resolve(&url(3)).await.unwrap();

  let urls = cached_urls(&h.cache);
  assert!(urls.contains(&url(1)));
  assert!(!urls.contains(&url(2)));
  assert!(urls.contains(&url(3)));

  let usage = h.cache.usage().unwrap();
  assert_eq!(usage.pinned_bytes, 8);
  assert_eq!(usage.total_bytes, 16);

  // Unpinning puts the entry back under the cap.
  assert!(h.cache.unpin(&url(1)).unwrap());
  assert_eq!(cached_urls(&h.cache), HashSet::from([url(3)]));
}

#[tokio::test]
async fn test_image_larger_than_cap_is_rejected() {
  let h = harness(MockFetcher::new(20), 10);

  let err = h.cache.resolve(&url(1)).await.unwrap_err();
  assert!(matches!(err, FetchError::TooLarge { size: 20, cap: 10, .. }));
  assert!(h.cache.entries().unwrap().is_empty());

  let files = std::fs::read_dir(h.cache.dir())
    .map(|dir| dir.count())
    .unwrap_or(0);
  assert_eq!(files, 0);
}

#[tokio::test]
async fn test_newcomer_survives_eviction_within_same_millisecond() {
  let h = harness(MockFetcher::new(8), 16);

  // No clock movement: every entry ties on both timestamps, and the newest
  // url sorts first.
  h.cache.resolve(&url(3)).await.unwrap();
  h.cache.resolve(&url(2)).await.unwrap();
  let newest = h.cache.resolve(&url(1)).await.unwrap();

  assert!(newest.exists());
  assert_eq!(cached_urls(&h.cache), HashSet::from([url(1), url(3)]));
  assert!(h.cache.usage().unwrap().evictable_bytes <= 16);
}

#[tokio::test]
async fn test_access_tie_evicts_older_download() {
  let h = harness(MockFetcher::new(8), 16);

  h.cache.resolve(&url(2)).await.unwrap();
  h.clock.advance(ChronoDuration::seconds(1));
  h.cache.resolve(&url(1)).await.unwrap();

  h.clock.advance(ChronoDuration::seconds(1));
  h.cache.resolve(&url(2)).await.unwrap();
  h.cache.resolve(&url(1)).await.unwrap();

  h.cache.resolve(&url(3)).await.unwrap();
  assert_eq!(cached_urls(&h.cache), HashSet::from([url(1), url(3)]));
}

#[tokio::test]
async fn test_fetch_failure_leaves_no_file() {
  let fetcher = MockFetcher::new(32);
  fetcher.fail(&url(1));
  let h = harness(fetcher, 1024);

  let err = h.cache.resolve(&url(1)).await.unwrap_err();
  assert!(matches!(err, FetchError::Network { .. }));
  assert!(h.cache.entries().unwrap().is_empty());

  let leftovers = std::fs::read_dir(h.cache.dir())
    .map(|dir| dir.count())
    .unwrap_or(0);
  assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn test_offline_miss_fails_fast_but_hits_still_resolve() {
  let h = harness(MockFetcher::new(16), 1024);
  let path = h.cache.resolve(&url(1)).await.unwrap();

  h.connectivity.set(ConnectivityState::Offline);
  assert_eq!(h.cache.resolve(&url(1)).await.unwrap(), path);

  let err = h.cache.resolve(&url(2)).await.unwrap_err();
  assert!(matches!(err, FetchError::Offline(_)));
  assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_missing_file_is_refetched() {
  let h = harness(MockFetcher::new(16), 1024);
  let path = h.cache.resolve(&url(1)).await.unwrap();
  std::fs::remove_file(&path).unwrap();

  let again = h.cache.resolve(&url(1)).await.unwrap();
  assert_eq!(again, path);
  assert!(again.exists());
  assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_invalidate_drops_entry_and_file() {
  let h = harness(MockFetcher::new(16), 1024);
  let path = h.cache.resolve(&url(1)).await.unwrap();

  assert!(h.cache.invalidate(&url(1)).await.unwrap());
  assert!(!path.exists());
  assert!(h.cache.entries().unwrap().is_empty());
  assert!(!h.cache.invalidate(&url(1)).await.unwrap());

  h.cache.resolve(&url(1)).await.unwrap();
  assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_invalid_url_is_rejected() {
  let h = harness(MockFetcher::new(16), 1024);
  for bad in ["not a url", "file:///etc/passwd"] {
    assert!(matches!(
      h.cache.resolve(bad).await.unwrap_err(),
      FetchError::InvalidUrl { .. }
    ));
  }
  assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_concurrent_resolves_share_one_download() {
  let mut fetcher = MockFetcher::new(16);
  fetcher.delay = Duration::from_millis(20);
  let h = harness(fetcher, 1024);

  let target = url(1);
  let (a, b) = tokio::join!(h.cache.resolve(&target), h.cache.resolve(&target));
  assert_eq!(a.unwrap(), b.unwrap());
  assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_prefetch_counts_successes() {
  let fetcher = MockFetcher::new(16);
  fetcher.fail(&url(2));
  let h = harness(fetcher, 1024);

  let fetched = h.cache.prefetch((1..=4).map(url)).await;
  assert_eq!(fetched, 3);
  assert_eq!(h.cache.entries().unwrap().len(), 3);
  assert!(h.dir.path().join("images").is_dir());
}

#[test]
fn test_file_name_is_stable_hash() {
  let a = Url::parse("https://cdn.example.org/p/Photo.JPG?w=200").unwrap();
  let b = Url::parse("https://cdn.example.org/p/Photo.JPG?w=400").unwrap();
  let c = Url::parse("https://cdn.example.org/p/avatar").unwrap();

  let name = file_name(&a);
  assert_eq!(name, file_name(&a));
  assert_ne!(name, file_name(&b));
  assert!(name.ends_with(".jpg"));
  assert_eq!(name.len(), 64 + 4);
  assert_eq!(file_name(&c).len(), 64);
}
