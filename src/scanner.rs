//! Recursive sidecar discovery under a bookmarks/history root.
//!
//! Any non-dot-prefixed directory is a valid, unfiltered category; reserved
//! dot-directories (notably `.channels`) are pruned from video scans. Files
//! whose stem fails the key grammar are skipped silently so a partial or
//! corrupt corpus stays usable.

use std::collections::HashMap;
use std::path::Path;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use crate::channel::ChannelRecord;
use crate::platform::{self, CHANNEL_EXT, VIDEO_EXT};
use crate::video::VideoRecord;

/// Reserved subdirectory of the root holding channel sidecars.
pub const CHANNELS_DIR: &str = ".channels";

fn is_reserved_dir(entry: &DirEntry) -> bool {
  entry.depth() > 0
    && entry.file_type().is_dir()
    && entry.file_name().to_str().is_some_and(|name| name.starts_with('.'))
}

fn extension_is(path: &Path, ext: &str) -> bool {
  path.extension().and_then(|e| e.to_str()) == Some(ext)
}

/// Build the key -> video record map for everything under `root`.
pub fn scan(root: &Path) -> HashMap<String, VideoRecord> {
  let mut cache = HashMap::new();
  for entry in WalkDir::new(root).into_iter().filter_entry(|e| !is_reserved_dir(e)) {
    let entry = match entry {
      Ok(e) => e,
      Err(e) => {
        debug!(err = %e, "skipping unreadable entry during scan");
        continue;
      }
    };
    if !entry.file_type().is_file() || !extension_is(entry.path(), VIDEO_EXT) {
      continue;
    }
    let Some(key) = entry.path().file_stem().and_then(|s| s.to_str()) else {
      continue;
    };
    if !platform::is_video_key(key) {
      continue;
    }
    let parent = entry.path().parent().unwrap_or(root);
    match VideoRecord::load(key, parent) {
      Ok(record) => {
        cache.insert(key.to_string(), record);
      }
      Err(e) => debug!(key = %key, err = %e, "skipping unloadable sidecar"),
    }
  }
  cache
}

/// Build the key -> channel record map from a `.channels` directory.
pub fn scan_channels(dir: &Path) -> HashMap<String, ChannelRecord> {
  let mut cache = HashMap::new();
  if !dir.is_dir() {
    debug!(dir = %dir.display(), "no channels directory to scan");
    return cache;
  }
  for entry in WalkDir::new(dir) {
    let entry = match entry {
      Ok(e) => e,
      Err(e) => {
        debug!(err = %e, "skipping unreadable entry during channel scan");
        continue;
      }
    };
    if !entry.file_type().is_file() || !extension_is(entry.path(), CHANNEL_EXT) {
      continue;
    }
    let Some(key) = entry.path().file_stem().and_then(|s| s.to_str()) else {
      continue;
    };
    if !platform::is_channel_key(key) {
      continue;
    }
    match ChannelRecord::load(key, dir) {
      Ok(record) => {
        cache.insert(key.to_string(), record);
      }
      Err(e) => debug!(key = %key, err = %e, "skipping unloadable channel sidecar"),
    }
  }
  cache
}
