//! The long-lived metadata store: an in-memory key -> record cache mirrored
//! onto a directory tree of sidecar files.
//!
//! A store is single-threaded; everything async flows through the
//! coordinator it registers with at construction, and completions are
//! applied on the owning thread via [`Store::drain_enrichment`]. Writes are
//! flushed eagerly after each mutation and again by [`Store::sync`], which
//! retries anything a failed write left dirty.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, info, warn};

use crate::channel::ChannelRecord;
use crate::enrich::{Coordinator, EnrichEvent};
use crate::platform;
use crate::scanner::{self, CHANNELS_DIR};
use crate::video::VideoRecord;

/// Which corpus a store manages. Only the bookmarks store maintains channel
/// records and the `.channels` directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
  Bookmarks,
  History,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
  /// No root yet; every query answers its default and mutations no-op.
  Uninitialized,
  Scanning,
  Ready,
}

/// Notifications for whoever renders the store (a view layer polls these).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
  /// The root finished scanning and the store is ready.
  Initialized(PathBuf),
  /// A record under this path changed.
  Changed(PathBuf),
}

/// Everything the caller knows about a video at add/update time.
#[derive(Debug, Clone, Default)]
pub struct AddRequest {
  pub key: String,
  pub title: String,
  pub position: f64,
  pub duration: f64,
  /// Channel page URL when the caller knows it; empty triggers asynchronous
  /// channel discovery instead.
  pub channel_url: String,
  /// Display name of the channel, when the caller already has it.
  pub channel_name: String,
  /// Avatar URL for the channel; fetched only while the channel record
  /// still lacks one.
  pub channel_avatar_url: String,
}

pub struct Store {
  kind: StoreKind,
  state: StoreState,
  root: PathBuf,
  cache: HashMap<String, VideoRecord>,
  channels: HashMap<String, ChannelRecord>,
  coordinator: Arc<Coordinator>,
  registration: u64,
  enrich_rx: UnboundedReceiver<EnrichEvent>,
  events: Vec<StoreEvent>,
}

impl Store {
  /// A store starts uninitialized; call [`Store::set_root`] to load a corpus.
  /// Registration with the coordinator lasts until drop.
  pub fn new(kind: StoreKind, coordinator: Arc<Coordinator>) -> Self {
    let (tx, enrich_rx) = mpsc::unbounded_channel();
    let registration = coordinator.register(kind, tx);
    Self {
      kind,
      state: StoreState::Uninitialized,
      root: PathBuf::new(),
      cache: HashMap::new(),
      channels: HashMap::new(),
      coordinator,
      registration,
      enrich_rx,
      events: Vec::new(),
    }
  }

  pub fn kind(&self) -> StoreKind {
    self.kind
  }

  pub fn state(&self) -> StoreState {
    self.state
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn len(&self) -> usize {
    self.cache.len()
  }

  pub fn is_empty(&self) -> bool {
    self.cache.is_empty()
  }

  /// Point the store at a directory tree and scan it. May be called again
  /// later to switch corpora; the previous cache is discarded unsaved, so
  /// callers sync first.
  pub fn set_root(&mut self, path: &Path) {
    assert!(path.is_dir(), "store root {} is not a directory", path.display());
    self.state = StoreState::Scanning;
    // A root switch replaces all prior state; pending notifications and
    // queued completions belong to the old corpus.
    self.events.clear();
    while self.enrich_rx.try_recv().is_ok() {}
    self.root = path.to_path_buf();
    self.cache = scanner::scan(path);
    if self.kind == StoreKind::Bookmarks {
      let channels_dir = path.join(CHANNELS_DIR);
      if let Err(e) = std::fs::create_dir_all(&channels_dir) {
        warn!(dir = %channels_dir.display(), err = %e, "cannot create channels directory");
      }
      self.channels = scanner::scan_channels(&channels_dir);
    }
    // Seed the shared image cache with everything already on disk so other
    // stores and the renderer skip refetching.
    for rec in self.cache.values() {
      if rec.has_thumbnail() {
        self.coordinator.images().insert(&rec.key, rec.thumbnail().to_vec());
      }
    }
    self.state = StoreState::Ready;
    info!(root = %path.display(), videos = self.cache.len(), channels = self.channels.len(), "store ready");
    self.events.push(StoreEvent::Initialized(path.to_path_buf()));
  }

  /// Add a video (or merge into an existing one). New records land in the
  /// root directory and get a thumbnail fetch enqueued; a missing channel
  /// URL triggers channel discovery instead.
  pub fn add(&mut self, req: &AddRequest) -> bool {
    if self.state != StoreState::Ready {
      warn!(key = %req.key, "add on a store that is not ready");
      return false;
    }
    if !platform::is_video_key(&req.key) {
      warn!(key = %req.key, "add with malformed key");
      return false;
    }
    let is_new = !self.cache.contains_key(&req.key);
    if is_new {
      self.cache.insert(req.key.clone(), VideoRecord::new(&req.key, &self.root));
    }

    let cached_image =
      if self.cache[&req.key].has_thumbnail() { None } else { self.coordinator.images().get(&req.key) };
    let needs_fetch = !self.cache[&req.key].has_thumbnail() && cached_image.is_none();
    if needs_fetch {
      self.coordinator.fetch_thumbnail(&req.key);
    }

    let changed = self.merge_request(req, true);
    if let Some(bytes) = cached_image
      && let Some(rec) = self.cache.get_mut(&req.key)
    {
      rec.set_thumbnail(&bytes);
    }
    if let Some(rec) = self.cache.get_mut(&req.key) {
      rec.save();
      let path = rec.file_path();
      if changed || is_new {
        self.events.push(StoreEvent::Changed(path));
      }
    }
    true
  }

  /// Merge new playback data into an existing record. Unlike add this never
  /// creates records and never enqueues fetches.
  pub fn update(&mut self, req: &AddRequest) -> bool {
    if self.state != StoreState::Ready || !self.cache.contains_key(&req.key) {
      return false;
    }
    let changed = self.merge_request(req, false);
    if let Some(rec) = self.cache.get_mut(&req.key) {
      rec.save();
      let path = rec.file_path();
      if changed {
        self.events.push(StoreEvent::Changed(path));
      }
    }
    true
  }

  /// Shared add/update body: merge fields, resolve the channel reference.
  fn merge_request(&mut self, req: &AddRequest, discover: bool) -> bool {
    let Some(rec) = self.cache.get_mut(&req.key) else {
      return false;
    };
    let mut changed = rec.merge(&req.title, req.position, req.duration);
    let vendor = rec.vendor;
    if req.channel_url.is_empty() {
      if discover && rec.channel_id().is_empty() {
        self.coordinator.fetch_channel(&req.key);
      }
      return changed;
    }
    // Shorts arrive with a channel URL only once actually opened in the
    // player, so a known channel implies the short was watched.
    if platform::is_short(&req.key) && !rec.viewed() {
      rec.set_viewed(true);
      changed = true;
    }
    let channel_id = platform::channel_id_from_url(&req.channel_url);
    if !channel_id.is_empty() {
      changed |= rec.set_channel_id(&channel_id);
      self.upsert_channel(vendor, &channel_id, &req.channel_name);
      if self.kind == StoreKind::Bookmarks && !req.channel_avatar_url.is_empty() {
        let channel_key = platform::channel_key(vendor, &channel_id);
        if self.channels.get(&channel_key).is_some_and(|c| !c.has_avatar()) {
          self.coordinator.fetch_channel_avatar(&channel_key, &req.channel_avatar_url);
        }
      }
    }
    changed
  }

  /// Create or refresh a channel record. Only the bookmarks store keeps
  /// channels; other kinds ignore this.
  fn upsert_channel(&mut self, vendor: platform::Vendor, channel_id: &str, name: &str) {
    if self.kind != StoreKind::Bookmarks || channel_id.is_empty() {
      return;
    }
    let key = platform::channel_key(vendor, channel_id);
    let dir = self.root.join(CHANNELS_DIR);
    let entry = self.channels.entry(key).or_insert_with(|| ChannelRecord::create(channel_id, name, vendor, &dir));
    if !name.is_empty() {
      entry.set_name(name);
    }
    entry.save();
  }

  pub fn view_entry(&mut self, key: &str, viewed: bool) {
    if let Some(rec) = self.cache.get_mut(key)
      && rec.viewed() != viewed
    {
      rec.set_viewed(viewed);
      rec.save();
      let path = rec.file_path();
      self.events.push(StoreEvent::Changed(path));
    }
  }

  pub fn star_entry(&mut self, key: &str, starred: bool) {
    if let Some(rec) = self.cache.get_mut(key)
      && rec.starred() != starred
    {
      rec.set_starred(starred);
      rec.save();
      let path = rec.file_path();
      self.events.push(StoreEvent::Changed(path));
    }
  }

  /// Move a video's sidecar into another category directory under the root.
  /// The key (and filename) never changes.
  pub fn move_entry(&mut self, key: &str, dir: &Path) -> bool {
    let Some(rec) = self.cache.get_mut(key) else {
      return false;
    };
    if !rec.move_to(dir) {
      return false;
    }
    let path = rec.file_path();
    self.events.push(StoreEvent::Changed(path));
    true
  }

  /// Create a category directory under the root.
  pub fn add_category(&mut self, dir: &Path) -> bool {
    if self.state != StoreState::Ready {
      return false;
    }
    match std::fs::create_dir_all(dir) {
      Ok(()) => {
        self.events.push(StoreEvent::Changed(dir.to_path_buf()));
        true
      }
      Err(e) => {
        warn!(dir = %dir.display(), err = %e, "cannot create category");
        false
      }
    }
  }

  /// Rename or relocate a whole category. Every cached record under the old
  /// path has a stale parent afterwards, so the cache is rebuilt.
  pub fn move_category(&mut self, from: &Path, to: &Path) -> bool {
    if let Err(e) = std::fs::rename(from, to) {
      warn!(from = %from.display(), to = %to.display(), err = %e, "cannot move category");
      return false;
    }
    self.cache = scanner::scan(&self.root);
    self.events.push(StoreEvent::Changed(to.to_path_buf()));
    true
  }

  /// Delete a video. With `cascade`, its working directory under
  /// `working_dir_root` is removed too (best effort).
  pub fn delete(&mut self, key: &str, working_dir_root: Option<&Path>, cascade: bool) -> bool {
    let Some(mut rec) = self.cache.remove(key) else {
      return false;
    };
    if cascade && let Some(root) = working_dir_root {
      let dir = root.join(key);
      if dir.is_dir()
        && let Err(e) = std::fs::remove_dir_all(&dir)
      {
        warn!(dir = %dir.display(), err = %e, "cannot remove working directory");
      }
    }
    let path = rec.file_path();
    let ok = rec.erase();
    self.events.push(StoreEvent::Changed(path));
    ok
  }

  /// Flush every dirty record. Failed writes stay dirty and are retried on
  /// the next call.
  pub fn sync(&mut self) {
    let mut flushed = 0usize;
    for rec in self.cache.values_mut().filter(|r| r.dirty()) {
      rec.save();
      flushed += 1;
    }
    for ch in self.channels.values_mut().filter(|c| c.dirty()) {
      ch.save();
      flushed += 1;
    }
    if flushed > 0 {
      debug!(flushed, "synced dirty records");
    }
  }

  // --- queries; all answer defaults for unknown keys or an unready store ---

  pub fn record(&self, key: &str) -> Option<&VideoRecord> {
    self.cache.get(key)
  }

  pub fn is_bookmarked(&self, key: &str) -> bool {
    self.cache.contains_key(key)
  }

  pub fn title(&self, key: &str) -> &str {
    self.cache.get(key).map(|r| r.title()).unwrap_or_default()
  }

  pub fn duration(&self, key: &str) -> f64 {
    self.cache.get(key).map(|r| r.duration()).unwrap_or_default()
  }

  /// Playback progress in [0, 1]; 0 when the duration is unknown.
  pub fn progress(&self, key: &str) -> f64 {
    match self.cache.get(key) {
      Some(r) if r.duration() > 0.0 => r.position() / r.duration(),
      _ => 0.0,
    }
  }

  pub fn is_viewed(&self, key: &str) -> bool {
    self.cache.get(key).map(|r| r.viewed()).unwrap_or_default()
  }

  pub fn is_starred(&self, key: &str) -> bool {
    self.cache.get(key).map(|r| r.starred()).unwrap_or_default()
  }

  pub fn is_short(&self, key: &str) -> bool {
    platform::is_short(key)
  }

  pub fn creation_date(&self, key: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    self.cache.get(key).map(|r| r.creation_date())
  }

  pub fn video_url(&self, key: &str, resume: bool) -> Option<String> {
    self.cache.get(key).and_then(|r| r.url(resume))
  }

  pub fn channel_id(&self, key: &str) -> &str {
    self.cache.get(key).map(|r| r.channel_id()).unwrap_or_default()
  }

  /// The display name of a video's channel, when the bookmarks store has a
  /// resolved record for it.
  pub fn channel_name(&self, key: &str) -> &str {
    let Some(rec) = self.cache.get(key) else {
      return "";
    };
    if rec.channel_id().is_empty() {
      return "";
    }
    let channel_key = platform::channel_key(rec.vendor, rec.channel_id());
    self.channels.get(&channel_key).map(|c| c.name()).unwrap_or_default()
  }

  /// Working directory state for a video under `root`: 0 none, 1 empty,
  /// 2 has content.
  pub fn has_working_dir(&self, key: &str, root: &Path) -> u8 {
    let dir = root.join(key);
    if !dir.is_dir() {
      return 0;
    }
    match std::fs::read_dir(&dir) {
      Ok(mut entries) => {
        if entries.next().is_some() {
          2
        } else {
          1
        }
      }
      Err(_) => 0,
    }
  }

  /// Keys still lacking a thumbnail, for the enrichment sweep.
  pub fn missing_thumbnails(&self) -> Vec<String> {
    self.cache.values().filter(|r| !r.has_thumbnail()).map(|r| r.key.clone()).collect()
  }

  /// Keys still lacking a channel reference, for the enrichment sweep.
  pub fn missing_channels(&self) -> Vec<String> {
    self.cache.values().filter(|r| r.channel_id().is_empty()).map(|r| r.key.clone()).collect()
  }

  /// Drain pending change notifications.
  pub fn take_events(&mut self) -> Vec<StoreEvent> {
    std::mem::take(&mut self.events)
  }

  /// Apply every queued enrichment completion. Call from the store's owning
  /// thread; each applied event flushes the touched record and queues a
  /// change notification.
  pub fn drain_enrichment(&mut self) {
    while let Ok(event) = self.enrich_rx.try_recv() {
      match event {
        EnrichEvent::Thumbnail { key, bytes } => {
          // A record that already has a thumbnail keeps it; late or
          // duplicate completions never overwrite.
          if let Some(rec) = self.cache.get_mut(&key).filter(|r| !r.has_thumbnail()) {
            rec.set_thumbnail(&bytes);
            rec.save();
            let path = rec.file_path();
            self.events.push(StoreEvent::Changed(path));
          }
        }
        EnrichEvent::ChannelInfo { key, channel_id, channel_name, avatar_url, title } => {
          self.apply_channel_info(&key, &channel_id, &channel_name, &avatar_url, title.as_deref());
        }
        EnrichEvent::ChannelAvatar { channel_key, bytes } => {
          if let Some(ch) = self.channels.get_mut(&channel_key) {
            ch.set_avatar(&bytes);
            ch.save();
          }
        }
      }
    }
  }

  fn apply_channel_info(&mut self, key: &str, channel_id: &str, channel_name: &str, avatar_url: &str, title: Option<&str>) {
    let mut avatar_wanted: Option<String> = None;
    {
      let Some(rec) = self.cache.get_mut(key) else {
        return;
      };
      let vendor = rec.vendor;
      let mut changed = rec.set_channel_id(channel_id);
      if let Some(t) = title
        && rec.title().is_empty()
      {
        changed |= rec.set_title(t);
      }
      rec.save();
      let path = rec.file_path();
      if changed {
        self.events.push(StoreEvent::Changed(path));
      }
      self.upsert_channel(vendor, channel_id, channel_name);
      if self.kind == StoreKind::Bookmarks && !avatar_url.is_empty() {
        let channel_key = platform::channel_key(vendor, channel_id);
        if self.channels.get(&channel_key).is_some_and(|c| !c.has_avatar()) {
          avatar_wanted = Some(channel_key);
        }
      }
    }
    if let Some(channel_key) = avatar_wanted {
      self.coordinator.fetch_channel_avatar(&channel_key, avatar_url);
    }
  }
}

impl Drop for Store {
  fn drop(&mut self) {
    // No implicit flush; callers sync explicitly before teardown.
    self.coordinator.unregister(self.registration);
  }
}
