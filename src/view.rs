//! Read-only filtered listing over a store's directory tree.
//!
//! The overlay never owns data; it walks one directory level at a time and
//! consults the store for everything per-video. Directories are unfiltered
//! navigation structure (except hidden dot-directories) and always sort
//! ahead of videos regardless of direction.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::platform::{self, VIDEO_EXT};
use crate::store::Store;

/// Filter and sort settings for a listing. Defaults show everything,
/// ascending, with title search.
#[derive(Debug, Clone)]
pub struct ViewOptions {
  pub ascending: bool,
  pub show_starred: bool,
  pub show_unstarred: bool,
  pub show_opened: bool,
  pub show_unopened: bool,
  pub show_watched: bool,
  pub show_unwatched: bool,
  pub show_saved: bool,
  pub show_unsaved: bool,
  pub show_shorts: bool,
  pub show_regular: bool,
  pub search_term: String,
  pub search_titles: bool,
  pub search_channels: bool,
  /// Root of per-video working directories; `None` disables the saved
  /// filter pair entirely.
  pub working_dir_root: Option<PathBuf>,
}

impl Default for ViewOptions {
  fn default() -> Self {
    Self {
      ascending: true,
      show_starred: true,
      show_unstarred: true,
      show_opened: true,
      show_unopened: true,
      show_watched: true,
      show_unwatched: true,
      show_saved: true,
      show_unsaved: true,
      show_shorts: true,
      show_regular: true,
      search_term: String::new(),
      search_titles: true,
      search_channels: false,
      working_dir_root: None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewEntryKind {
  /// The `..` navigation entry.
  Parent,
  Directory,
  Video,
}

#[derive(Debug, Clone)]
pub struct ViewEntry {
  /// Display name: directory name, or the video title (key when untitled).
  pub name: String,
  pub path: PathBuf,
  pub kind: ViewEntryKind,
  pub key: Option<String>,
}

/// One filtered directory listing pass over a store.
pub struct ViewOverlay<'a> {
  store: &'a Store,
  opts: &'a ViewOptions,
}

impl<'a> ViewOverlay<'a> {
  pub fn new(store: &'a Store, opts: &'a ViewOptions) -> Self {
    Self { store, opts }
  }

  /// List one directory level: parent entry (when below the root), then
  /// directories sorted by name, then accepted videos sorted by creation
  /// date. Descending flips the video order and moves the parent entry to
  /// the end.
  pub fn list(&self, dir: &Path) -> Vec<ViewEntry> {
    let entries = match std::fs::read_dir(dir) {
      Ok(e) => e,
      Err(e) => {
        warn!(dir = %dir.display(), err = %e, "cannot list directory");
        return Vec::new();
      }
    };

    let mut dirs: Vec<ViewEntry> = Vec::new();
    let mut videos: Vec<ViewEntry> = Vec::new();
    for entry in entries.flatten() {
      let path = entry.path();
      let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
        continue;
      };
      if path.is_dir() {
        if name.starts_with('.') {
          continue;
        }
        dirs.push(ViewEntry { name, path, kind: ViewEntryKind::Directory, key: None });
        continue;
      }
      if path.extension().and_then(|e| e.to_str()) != Some(VIDEO_EXT) {
        continue;
      }
      let Some(key) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
        continue;
      };
      if !self.store.is_bookmarked(&key) || !self.accepts(&key) {
        continue;
      }
      let title = self.store.title(&key);
      let name = if title.is_empty() { key.clone() } else { title.to_string() };
      videos.push(ViewEntry { name, path, kind: ViewEntryKind::Video, key: Some(key) });
    }

    // Directories sort by name in every direction; navigation stays stable
    // while the video ordering flips.
    dirs.sort_by(|a, b| a.name.cmp(&b.name));
    videos.sort_by(|a, b| self.compare_videos(a, b));
    if !self.opts.ascending {
      videos.reverse();
    }

    let parent = (dir != self.store.root()).then(|| ViewEntry {
      name: "..".to_string(),
      path: dir.parent().unwrap_or(dir).to_path_buf(),
      kind: ViewEntryKind::Parent,
      key: None,
    });

    let mut out = Vec::with_capacity(dirs.len() + videos.len() + 1);
    if self.opts.ascending
      && let Some(p) = parent.clone()
    {
      out.push(p);
    }
    out.extend(dirs);
    out.extend(videos);
    if !self.opts.ascending
      && let Some(p) = parent
    {
      out.push(p);
    }
    out
  }

  fn compare_videos(&self, a: &ViewEntry, b: &ViewEntry) -> Ordering {
    let date = |e: &ViewEntry| e.key.as_deref().and_then(|k| self.store.record(k)).map(|r| r.creation_date());
    date(a).cmp(&date(b)).then_with(|| a.name.cmp(&b.name))
  }

  /// Whether a video passes every enabled filter pair and the search term.
  fn accepts(&self, key: &str) -> bool {
    let o = self.opts;
    let short = platform::is_short(key);
    let starred = self.store.is_starred(key);
    if (starred && !o.show_starred) || (!starred && !o.show_unstarred) {
      return false;
    }
    if (short && !o.show_shorts) || (!short && !o.show_regular) {
      return false;
    }
    // A video counts as opened once its duration is known; shorts are
    // exempt because the player never reports one for them.
    let opened = !short && self.store.duration(key) > 0.0;
    if (opened && !o.show_opened) || (!opened && !o.show_unopened) {
      return false;
    }
    let watched = !short && self.store.is_viewed(key);
    if (watched && !o.show_watched) || (!watched && !o.show_unwatched) {
      return false;
    }
    let saved = match &o.working_dir_root {
      None => true,
      Some(root) => self.store.has_working_dir(key, root) > 0,
    };
    if (saved && !o.show_saved) || (!saved && !o.show_unsaved) {
      return false;
    }

    if o.search_term.is_empty() {
      return true;
    }
    let term = o.search_term.to_lowercase();
    // Title search is implicit when no scope is selected at all.
    let in_titles = o.search_titles || !o.search_channels;
    if in_titles && self.store.title(key).to_lowercase().contains(&term) {
      return true;
    }
    if o.search_channels
      && (self.store.channel_name(key).to_lowercase().contains(&term)
        || self.store.channel_id(key).to_lowercase().contains(&term))
    {
      return true;
    }
    false
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::enrich::Coordinator;
  use crate::store::StoreKind;
  use std::sync::Arc;
  use tempfile::TempDir;

  fn write_sidecar(dir: &Path, key: &str, json: &str) {
    std::fs::write(dir.join(format!("{key}.{VIDEO_EXT}")), json).unwrap();
  }

  fn ready_store(root: &Path) -> Store {
    let mut store = Store::new(StoreKind::Bookmarks, Arc::new(Coordinator::new()));
    store.set_root(root);
    store
  }

  fn names(entries: &[ViewEntry]) -> Vec<&str> {
    entries.iter().map(|e| e.name.as_str()).collect()
  }

  #[test]
  fn dirs_sort_before_files_in_both_directions() {
    let root = TempDir::new().unwrap();
    std::fs::create_dir(root.path().join("zzz-dir")).unwrap();
    write_sidecar(root.path(), "YTB_v_aaa", r#"{"title":"AAA","creationDate":"2024-01-01T00:00:00Z"}"#);
    write_sidecar(root.path(), "YTB_v_bbb", r#"{"title":"BBB","creationDate":"2024-02-01T00:00:00Z"}"#);
    let store = ready_store(root.path());

    let opts = ViewOptions::default();
    let listing = ViewOverlay::new(&store, &opts).list(root.path());
    assert_eq!(names(&listing), vec!["zzz-dir", "AAA", "BBB"]);

    let opts = ViewOptions { ascending: false, ..Default::default() };
    let listing = ViewOverlay::new(&store, &opts).list(root.path());
    assert_eq!(names(&listing), vec!["zzz-dir", "BBB", "AAA"]);
  }

  #[test]
  fn dirs_stay_first_under_filters() {
    let root = TempDir::new().unwrap();
    std::fs::create_dir(root.path().join("sub")).unwrap();
    write_sidecar(root.path(), "YTB_v_aaa", r#"{"title":"AAA","starred":true}"#);
    write_sidecar(root.path(), "YTB_v_bbb", r#"{"title":"BBB"}"#);
    let store = ready_store(root.path());

    let opts = ViewOptions { show_unstarred: false, ..Default::default() };
    let listing = ViewOverlay::new(&store, &opts).list(root.path());
    assert_eq!(names(&listing), vec!["sub", "AAA"]);
  }

  #[test]
  fn parent_entry_first_ascending_last_descending() {
    let root = TempDir::new().unwrap();
    let sub = root.path().join("sub");
    std::fs::create_dir(&sub).unwrap();
    write_sidecar(&sub, "YTB_v_aaa", r#"{"title":"AAA"}"#);
    let store = ready_store(root.path());

    let opts = ViewOptions::default();
    let listing = ViewOverlay::new(&store, &opts).list(&sub);
    assert_eq!(listing[0].kind, ViewEntryKind::Parent);
    assert_eq!(names(&listing), vec!["..", "AAA"]);

    let opts = ViewOptions { ascending: false, ..Default::default() };
    let listing = ViewOverlay::new(&store, &opts).list(&sub);
    assert_eq!(listing.last().unwrap().kind, ViewEntryKind::Parent);

    // No parent entry at the root itself
    let opts = ViewOptions::default();
    assert!(ViewOverlay::new(&store, &opts).list(root.path()).iter().all(|e| e.kind != ViewEntryKind::Parent));
  }

  #[test]
  fn dot_directories_are_hidden() {
    let root = TempDir::new().unwrap();
    std::fs::create_dir(root.path().join(".channels")).unwrap();
    std::fs::create_dir(root.path().join("visible")).unwrap();
    let store = ready_store(root.path());

    let opts = ViewOptions::default();
    let listing = ViewOverlay::new(&store, &opts).list(root.path());
    assert_eq!(names(&listing), vec!["visible"]);
  }

  #[test]
  fn shorts_filter_pair() {
    let root = TempDir::new().unwrap();
    write_sidecar(root.path(), "YTB_v_aaa", r#"{"title":"Regular"}"#);
    write_sidecar(root.path(), "YTB_s_bbb", r#"{"title":"Short"}"#);
    let store = ready_store(root.path());

    let opts = ViewOptions { show_shorts: false, ..Default::default() };
    assert_eq!(names(&ViewOverlay::new(&store, &opts).list(root.path())), vec!["Regular"]);
    let opts = ViewOptions { show_regular: false, ..Default::default() };
    assert_eq!(names(&ViewOverlay::new(&store, &opts).list(root.path())), vec!["Short"]);
  }

  #[test]
  fn opened_means_known_duration() {
    let root = TempDir::new().unwrap();
    write_sidecar(root.path(), "YTB_v_aaa", r#"{"title":"Opened","duration":120.0}"#);
    write_sidecar(root.path(), "YTB_v_bbb", r#"{"title":"Untouched"}"#);
    let store = ready_store(root.path());

    let opts = ViewOptions { show_unopened: false, ..Default::default() };
    assert_eq!(names(&ViewOverlay::new(&store, &opts).list(root.path())), vec!["Opened"]);
    let opts = ViewOptions { show_opened: false, ..Default::default() };
    assert_eq!(names(&ViewOverlay::new(&store, &opts).list(root.path())), vec!["Untouched"]);
  }

  #[test]
  fn watched_filter_ignores_shorts() {
    let root = TempDir::new().unwrap();
    write_sidecar(root.path(), "YTB_v_aaa", r#"{"title":"Watched","duration":100.0,"viewed":true}"#);
    write_sidecar(root.path(), "YTB_s_bbb", r#"{"title":"Short","viewed":true}"#);
    let store = ready_store(root.path());

    // A viewed short still counts as unwatched for this pair
    let opts = ViewOptions { show_watched: false, ..Default::default() };
    assert_eq!(names(&ViewOverlay::new(&store, &opts).list(root.path())), vec!["Short"]);
  }

  #[test]
  fn saved_filter_uses_working_dirs() {
    let root = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    write_sidecar(root.path(), "YTB_v_aaa", r#"{"title":"Saved"}"#);
    write_sidecar(root.path(), "YTB_v_bbb", r#"{"title":"Unsaved"}"#);
    std::fs::create_dir(work.path().join("YTB_v_aaa")).unwrap();
    let store = ready_store(root.path());

    let opts = ViewOptions {
      show_unsaved: false,
      working_dir_root: Some(work.path().to_path_buf()),
      ..Default::default()
    };
    assert_eq!(names(&ViewOverlay::new(&store, &opts).list(root.path())), vec!["Saved"]);

    // Without a working dir root everything counts as saved
    let opts = ViewOptions { show_unsaved: false, ..Default::default() };
    assert_eq!(ViewOverlay::new(&store, &opts).list(root.path()).len(), 2);
  }

  #[test]
  fn search_defaults_to_titles() {
    let root = TempDir::new().unwrap();
    write_sidecar(root.path(), "YTB_v_aaa", r#"{"title":"Rust Tutorial"}"#);
    write_sidecar(root.path(), "YTB_v_bbb", r#"{"title":"Cooking"}"#);
    let store = ready_store(root.path());

    // Even with both scopes off, the term still matches titles
    let opts = ViewOptions {
      search_term: "rust".to_string(),
      search_titles: false,
      search_channels: false,
      ..Default::default()
    };
    assert_eq!(names(&ViewOverlay::new(&store, &opts).list(root.path())), vec!["Rust Tutorial"]);
  }

  #[test]
  fn search_by_channel_id() {
    let root = TempDir::new().unwrap();
    write_sidecar(root.path(), "YTB_v_aaa", r#"{"title":"One","channel":"@somechannel"}"#);
    write_sidecar(root.path(), "YTB_v_bbb", r#"{"title":"Two","channel":"@other"}"#);
    let store = ready_store(root.path());

    let opts = ViewOptions {
      search_term: "somechannel".to_string(),
      search_titles: false,
      search_channels: true,
      ..Default::default()
    };
    assert_eq!(names(&ViewOverlay::new(&store, &opts).list(root.path())), vec!["One"]);
  }

  #[test]
  fn untitled_videos_fall_back_to_key() {
    let root = TempDir::new().unwrap();
    write_sidecar(root.path(), "YTB_v_aaa", r#"{}"#);
    let store = ready_store(root.path());

    let opts = ViewOptions::default();
    assert_eq!(names(&ViewOverlay::new(&store, &opts).list(root.path())), vec!["YTB_v_aaa"]);
  }
}
