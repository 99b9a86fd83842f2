//! Asynchronous enrichment: thumbnails, channel discovery, channel avatars.
//!
//! One explicitly constructed `Coordinator` is shared by all stores. Stores
//! register a channel on creation and unregister on drop; job completions
//! fan out to every registered store and are applied on the store's owning
//! thread via `Store::drain_enrichment`. Jobs are cheap and idempotent, so
//! the only retry mechanism is the externally triggered missing-item sweep.

use reqwest::Client;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::pageinfo::{PageInfoExtract, RegexPageInfo};
use crate::platform;
use crate::store::{Store, StoreKind};

const BROWSER_USER_AGENT: &str =
  "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/115.0.0.0 Safari/537.36";
const CONSENT_COOKIE: &str = "CONSENT=YES+42";

/// A completed enrichment result, queued for the owning store to apply.
#[derive(Debug, Clone)]
pub enum EnrichEvent {
  /// Raw fetched thumbnail bytes for a video key (stores normalize them).
  Thumbnail { key: String, bytes: Vec<u8> },
  /// Channel identity discovered from a video page.
  ChannelInfo { key: String, channel_id: String, channel_name: String, avatar_url: String, title: Option<String> },
  /// Fetched avatar bytes for a channel key.
  ChannelAvatar { channel_key: String, bytes: Vec<u8> },
}

struct Registered {
  id: u64,
  kind: StoreKind,
  tx: UnboundedSender<EnrichEvent>,
}

type Registry = Arc<Mutex<Vec<Registered>>>;

/// Shared thumbnail byte cache, read by a rendering path and written by
/// network completions. The lock is held only across a map insert/lookup,
/// never across I/O.
#[derive(Clone, Default)]
pub struct ImageCache {
  inner: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl ImageCache {
  pub fn insert(&self, key: &str, bytes: Vec<u8>) {
    self.inner.lock().expect("image cache mutex poisoned").insert(key.to_string(), bytes);
  }

  pub fn get(&self, key: &str) -> Option<Vec<u8>> {
    self.inner.lock().expect("image cache mutex poisoned").get(key).cloned()
  }

  pub fn len(&self) -> usize {
    self.inner.lock().expect("image cache mutex poisoned").len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// Process-wide enrichment dispatcher. Construct one per process (or per
/// test) and hand an `Arc` of it to every store.
pub struct Coordinator {
  client: Client,
  registry: Registry,
  images: ImageCache,
  extractor: Arc<dyn PageInfoExtract + Send + Sync>,
  thumbnail_failures: Arc<AtomicUsize>,
  channel_failures: Arc<AtomicUsize>,
  thumbnail_requests: AtomicUsize,
  channel_requests: AtomicUsize,
  next_id: AtomicU64,
}

impl Coordinator {
  pub fn new() -> Self {
    Self::with_extractor(Arc::new(RegexPageInfo::new()))
  }

  pub fn with_extractor(extractor: Arc<dyn PageInfoExtract + Send + Sync>) -> Self {
    Self {
      client: Client::new(),
      registry: Arc::new(Mutex::new(Vec::new())),
      images: ImageCache::default(),
      extractor,
      thumbnail_failures: Arc::new(AtomicUsize::new(0)),
      channel_failures: Arc::new(AtomicUsize::new(0)),
      thumbnail_requests: AtomicUsize::new(0),
      channel_requests: AtomicUsize::new(0),
      next_id: AtomicU64::new(1),
    }
  }

  pub(crate) fn register(&self, kind: StoreKind, tx: UnboundedSender<EnrichEvent>) -> u64 {
    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    self.registry.lock().expect("registry mutex poisoned").push(Registered { id, kind, tx });
    id
  }

  pub(crate) fn unregister(&self, id: u64) {
    self.registry.lock().expect("registry mutex poisoned").retain(|r| r.id != id);
  }

  pub fn images(&self) -> &ImageCache {
    &self.images
  }

  pub fn thumbnail_failures(&self) -> usize {
    self.thumbnail_failures.load(Ordering::Relaxed)
  }

  pub fn channel_failures(&self) -> usize {
    self.channel_failures.load(Ordering::Relaxed)
  }

  /// Total thumbnail jobs issued so far.
  pub fn thumbnail_requests(&self) -> usize {
    self.thumbnail_requests.load(Ordering::Relaxed)
  }

  /// Total channel discovery jobs issued so far.
  pub fn channel_requests(&self) -> usize {
    self.channel_requests.load(Ordering::Relaxed)
  }

  /// Fetch a video thumbnail and fan the bytes to every registered store.
  /// Failure only bumps a counter; the record stays eligible for the sweep.
  pub fn fetch_thumbnail(&self, key: &str) {
    self.thumbnail_requests.fetch_add(1, Ordering::Relaxed);
    let urls = thumbnail_urls(platform::video_id(key));
    let client = self.client.clone();
    let registry = Arc::clone(&self.registry);
    let images = self.images.clone();
    let failures = Arc::clone(&self.thumbnail_failures);
    let key = key.to_string();
    tokio::spawn(async move {
      for url in &urls {
        if let Ok(resp) = client.get(url).send().await
          && resp.status().is_success()
          && let Ok(bytes) = resp.bytes().await
          && !bytes.is_empty()
        {
          fan_thumbnail(&registry, &images, &key, bytes.to_vec());
          return;
        }
      }
      warn!(key = %key, "every thumbnail candidate failed");
      failures.fetch_add(1, Ordering::Relaxed);
    });
  }

  /// Fetch the video page and run the page info extractor over it; a match
  /// fans channel identity to every registered store.
  pub fn fetch_channel(&self, key: &str) {
    self.channel_requests.fetch_add(1, Ordering::Relaxed);
    let Some(url) = platform::video_url(key, 0.0) else {
      warn!(key = %key, "cannot derive a video page url");
      self.channel_failures.fetch_add(1, Ordering::Relaxed);
      return;
    };
    let client = self.client.clone();
    let registry = Arc::clone(&self.registry);
    let extractor = Arc::clone(&self.extractor);
    let failures = Arc::clone(&self.channel_failures);
    let key = key.to_string();
    tokio::spawn(async move {
      let resp = client
        .get(&url)
        .header(reqwest::header::USER_AGENT, BROWSER_USER_AGENT)
        .header(reqwest::header::COOKIE, CONSENT_COOKIE)
        .send()
        .await;
      match resp {
        Ok(r) if r.status().is_success() => match r.text().await {
          Ok(body) => fan_video_page(&registry, extractor.as_ref(), &failures, &key, &body),
          Err(e) => {
            warn!(key = %key, err = %e, "failed reading video page body");
            failures.fetch_add(1, Ordering::Relaxed);
          }
        },
        Ok(r) => {
          warn!(key = %key, status = %r.status(), "video page request rejected");
          failures.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
          warn!(key = %key, err = %e, "video page request failed");
          failures.fetch_add(1, Ordering::Relaxed);
        }
      }
    });
  }

  /// Fetch a channel avatar (rewritten to the hi-res variant) and fan the
  /// bytes out. Avatar failures are logged but not counted; the next channel
  /// upsert retries naturally.
  pub fn fetch_channel_avatar(&self, channel_key: &str, url: &str) {
    if url.is_empty() {
      return;
    }
    let url = platform::avatar_hires(url);
    let client = self.client.clone();
    let registry = Arc::clone(&self.registry);
    let channel_key = channel_key.to_string();
    tokio::spawn(async move {
      match client.get(&url).send().await {
        Ok(r) if r.status().is_success() => {
          if let Ok(bytes) = r.bytes().await
            && !bytes.is_empty()
          {
            fan_avatar(&registry, &channel_key, bytes.to_vec());
          }
        }
        Ok(r) => warn!(channel = %channel_key, status = %r.status(), "avatar request rejected"),
        Err(e) => warn!(channel = %channel_key, err = %e, "avatar request failed"),
      }
    });
  }

  /// Re-issue jobs for every record still missing a thumbnail (all stores)
  /// or a channel id (bookmarks store). This sweep is the sole retry path.
  pub fn sweep(&self, stores: &[&Store]) {
    let Some(bookmarks) = stores.iter().find(|s| s.kind() == StoreKind::Bookmarks) else {
      panic!("enrichment sweep requires a bookmarks store");
    };
    info!(
      thumbnail_failures = self.thumbnail_failures(),
      channel_failures = self.channel_failures(),
      "enrichment sweep"
    );
    let mut missing: Vec<String> = stores.iter().flat_map(|s| s.missing_thumbnails()).collect();
    missing.sort_unstable();
    missing.dedup();
    for key in &missing {
      self.fetch_thumbnail(key);
    }
    for key in bookmarks.missing_channels() {
      self.fetch_channel(&key);
    }
  }

  // Completion entry points, separated from transport so they can be driven
  // without a network.

  pub(crate) fn apply_thumbnail(&self, key: &str, bytes: Vec<u8>) {
    fan_thumbnail(&self.registry, &self.images, key, bytes);
  }

  pub(crate) fn apply_video_page(&self, key: &str, body: &str) {
    fan_video_page(&self.registry, self.extractor.as_ref(), &self.channel_failures, key, body);
  }

  pub(crate) fn apply_channel_avatar(&self, channel_key: &str, bytes: Vec<u8>) {
    fan_avatar(&self.registry, channel_key, bytes);
  }
}

impl Default for Coordinator {
  fn default() -> Self {
    Self::new()
  }
}

/// Thumbnail URL candidates, best resolution first.
fn thumbnail_urls(video_id: &str) -> Vec<String> {
  [
    format!("https://img.youtube.com/vi/{video_id}/maxresdefault.jpg"),
    format!("https://img.youtube.com/vi/{video_id}/hqdefault.jpg"),
    format!("https://img.youtube.com/vi/{video_id}/0.jpg"),
  ]
  .into()
}

fn fan(registry: &Registry, event: EnrichEvent) {
  let stores = registry.lock().expect("registry mutex poisoned");
  for store in stores.iter() {
    // A torn-down store leaves a closed channel behind; dropping the event
    // is the correct outcome.
    let _ = store.tx.send(event.clone());
  }
}

fn fan_thumbnail(registry: &Registry, images: &ImageCache, key: &str, bytes: Vec<u8>) {
  images.insert(key, bytes.clone());
  fan(registry, EnrichEvent::Thumbnail { key: key.to_string(), bytes });
}

fn fan_video_page(
  registry: &Registry,
  extractor: &(dyn PageInfoExtract + Send + Sync),
  failures: &AtomicUsize,
  key: &str,
  body: &str,
) {
  if body.is_empty() {
    failures.fetch_add(1, Ordering::Relaxed);
    return;
  }
  match extractor.extract(key, body) {
    Some(info) => {
      let title = if info.title.is_empty() { None } else { Some(info.title) };
      fan(
        registry,
        EnrichEvent::ChannelInfo {
          key: key.to_string(),
          channel_id: info.channel_id,
          channel_name: info.channel_name,
          avatar_url: info.avatar_url,
          title,
        },
      );
    }
    None => {
      debug!(key = %key, "page info extractor found no channel");
      failures.fetch_add(1, Ordering::Relaxed);
    }
  }
}

fn fan_avatar(registry: &Registry, channel_key: &str, bytes: Vec<u8>) {
  fan(registry, EnrichEvent::ChannelAvatar { channel_key: channel_key.to_string(), bytes });
}

#[cfg(test)]
mod tests {
  use super::*;
  use tokio::sync::mpsc;

  #[test]
  fn no_match_page_bumps_failure_counter() {
    let coordinator = Coordinator::new();
    coordinator.apply_video_page("YTB_v_abc", "<html>no author here</html>");
    coordinator.apply_video_page("YTB_v_abc", "<html>still nothing</html>");
    assert_eq!(coordinator.channel_failures(), 2);
  }

  #[test]
  fn empty_page_counts_as_failure() {
    let coordinator = Coordinator::new();
    coordinator.apply_video_page("YTB_v_abc", "");
    assert_eq!(coordinator.channel_failures(), 1);
  }

  #[test]
  fn thumbnail_fans_to_registered_stores_and_image_cache() {
    let coordinator = Coordinator::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    coordinator.register(StoreKind::History, tx);

    coordinator.apply_thumbnail("YTB_v_abc", vec![1, 2, 3]);
    assert_eq!(coordinator.images().get("YTB_v_abc"), Some(vec![1, 2, 3]));
    match rx.try_recv() {
      Ok(EnrichEvent::Thumbnail { key, bytes }) => {
        assert_eq!(key, "YTB_v_abc");
        assert_eq!(bytes, vec![1, 2, 3]);
      }
      other => panic!("unexpected event: {other:?}"),
    }
  }

  #[test]
  fn unregistered_store_no_longer_receives_events() {
    let coordinator = Coordinator::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let id = coordinator.register(StoreKind::Bookmarks, tx);
    coordinator.unregister(id);

    coordinator.apply_thumbnail("YTB_v_abc", vec![9]);
    assert!(rx.try_recv().is_err());
  }

  #[test]
  fn dropped_receiver_is_tolerated() {
    let coordinator = Coordinator::new();
    let (tx, rx) = mpsc::unbounded_channel();
    coordinator.register(StoreKind::Bookmarks, tx);
    drop(rx);
    // Must not panic even though the channel is closed
    coordinator.apply_thumbnail("YTB_v_abc", vec![9]);
    coordinator.apply_channel_avatar("YTB_@c", vec![1]);
  }

  #[test]
  fn matched_page_fans_channel_info() {
    let coordinator = Coordinator::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    coordinator.register(StoreKind::Bookmarks, tx);

    let body = concat!(
      r#"<title>Intro - YouTube</title>"#,
      r#"<span itemprop="author" itemscope itemtype="http://schema.org/Person">"#,
      r#"<link itemprop="url" href="http://www.youtube.com/@somechannel">"#,
      r#"<link itemprop="name" content="Some Channel">"#,
    );
    coordinator.apply_video_page("YTB_v_abc", body);
    assert_eq!(coordinator.channel_failures(), 0);
    match rx.try_recv() {
      Ok(EnrichEvent::ChannelInfo { key, channel_id, channel_name, title, .. }) => {
        assert_eq!(key, "YTB_v_abc");
        assert_eq!(channel_id, "@somechannel");
        assert_eq!(channel_name, "Some Channel");
        assert_eq!(title.as_deref(), Some("Intro"));
      }
      other => panic!("unexpected event: {other:?}"),
    }
  }

  // --- sweep ---

  #[tokio::test]
  async fn sweep_reissues_jobs_and_dedupes_across_stores() {
    use crate::store::Store;
    use tempfile::TempDir;

    let bare = br#"{"title":"t"}"#;
    let root_a = TempDir::new().unwrap();
    std::fs::write(root_a.path().join("YTB_v_aaa.vmk"), bare).unwrap();
    let root_b = TempDir::new().unwrap();
    std::fs::write(root_b.path().join("YTB_v_aaa.vmk"), bare).unwrap();
    std::fs::write(root_b.path().join("YTB_v_bbb.vmk"), bare).unwrap();

    let coordinator = Arc::new(Coordinator::new());
    let mut bookmarks = Store::new(StoreKind::Bookmarks, Arc::clone(&coordinator));
    bookmarks.set_root(root_a.path());
    let mut history = Store::new(StoreKind::History, Arc::clone(&coordinator));
    history.set_root(root_b.path());

    coordinator.sweep(&[&bookmarks, &history]);
    // YTB_v_aaa is missing in both stores but fetched once
    assert_eq!(coordinator.thumbnail_requests(), 2);
    // Channel discovery only covers the bookmarks corpus
    assert_eq!(coordinator.channel_requests(), 1);
  }

  #[test]
  #[should_panic(expected = "requires a bookmarks store")]
  fn sweep_without_bookmarks_store_panics() {
    Coordinator::new().sweep(&[]);
  }

  #[test]
  fn thumbnail_url_candidates_use_platform_id() {
    let urls = thumbnail_urls("abc123");
    assert!(urls.iter().all(|u| u.contains("/vi/abc123/")));
    assert_eq!(urls.len(), 3);
  }
}
