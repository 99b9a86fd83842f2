use anyhow::{Context, Result};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use image::{ImageFormat, imageops::FilterType};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::platform::{self, VIDEO_EXT, Vendor};

/// Position past this fraction of the duration marks a video as viewed.
const VIEWED_THRESHOLD: f64 = 0.9;

/// Videos shorter than this (seconds) never auto-mark as viewed; guards the
/// threshold math against zero/unknown durations.
const MIN_VIEWED_DURATION: f64 = 3.0;

/// Maximum thumbnail edge; larger images are downscaled preserving aspect.
const THUMBNAIL_MAX: u32 = 128;

/// On-disk shape of a video sidecar file. Every field is optional-with-default
/// so partially written or hand-edited files still load.
#[derive(Debug, Default, Serialize, Deserialize)]
struct VideoSidecar {
  #[serde(default)]
  title: String,
  #[serde(default)]
  duration: f64,
  #[serde(default)]
  position: f64,
  /// `None` distinguishes legacy files predating the viewed flag.
  #[serde(default)]
  viewed: Option<bool>,
  #[serde(default)]
  starred: bool,
  #[serde(default)]
  channel: String,
  #[serde(rename = "creationDate", default, skip_serializing_if = "Option::is_none")]
  creation_date: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  thumbnail: Option<String>,
}

/// One bookmarked video, backed by a single JSON sidecar file named after its
/// key inside a category directory.
#[derive(Debug, Clone)]
pub struct VideoRecord {
  pub key: String,
  pub vendor: Vendor,
  parent: PathBuf,
  title: String,
  channel_id: String,
  duration: f64,
  position: f64,
  viewed: bool,
  starred: bool,
  thumbnail: Vec<u8>,
  creation_date: DateTime<Utc>,
  dirty: bool,
  erased: bool,
}

impl VideoRecord {
  /// A fresh, not-yet-persisted record. Starts dirty so the first save
  /// actually writes it.
  pub fn new(key: &str, parent: &Path) -> Self {
    Self {
      key: key.to_string(),
      vendor: platform::key_vendor(key),
      parent: parent.to_path_buf(),
      title: String::new(),
      channel_id: String::new(),
      duration: 0.0,
      position: 0.0,
      viewed: false,
      starred: false,
      thumbnail: Vec::new(),
      creation_date: Utc::now(),
      dirty: true,
      erased: false,
    }
  }

  /// Decode the sidecar at `<parent>/<key>.vmk`.
  ///
  /// A missing file is an error; a file with unparseable JSON or malformed
  /// fields decodes to documented defaults so a partially corrupt corpus
  /// stays usable.
  pub fn load(key: &str, parent: &Path) -> Result<Self> {
    let mut record = Self::new(key, parent);
    let path = record.file_path();
    let raw = std::fs::read(&path).with_context(|| format!("no sidecar file for {key}"))?;
    let sidecar: VideoSidecar = match serde_json::from_slice(&raw) {
      Ok(s) => s,
      Err(e) => {
        warn!(key = %key, err = %e, "unparseable sidecar, loading defaults");
        VideoSidecar::default()
      }
    };

    record.title = sidecar.title;
    record.duration = sidecar.duration;
    record.position = sidecar.position;
    record.starred = sidecar.starred;
    record.channel_id = sidecar.channel;
    // Legacy files lack the viewed flag; infer it from the stored position.
    record.viewed = sidecar.viewed.unwrap_or_else(|| {
      sidecar.duration > 0.0 && sidecar.position > sidecar.duration * VIEWED_THRESHOLD
    });
    record.creation_date = sidecar
      .creation_date
      .as_deref()
      .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
      .map(|d| d.with_timezone(&Utc))
      .or_else(|| birth_time(&path))
      .unwrap_or_else(Utc::now);
    if let Some(b64) = sidecar.thumbnail {
      match BASE64.decode(b64.as_bytes()) {
        Ok(bytes) => record.thumbnail = bytes,
        Err(e) => warn!(key = %key, err = %e, "discarding undecodable inline thumbnail"),
      }
    }
    record.dirty = false;
    Ok(record)
  }

  pub fn file_path(&self) -> PathBuf {
    self.parent.join(format!("{}.{}", self.key, VIDEO_EXT))
  }

  pub fn parent(&self) -> &Path {
    &self.parent
  }

  pub fn title(&self) -> &str {
    &self.title
  }

  pub fn channel_id(&self) -> &str {
    &self.channel_id
  }

  pub fn duration(&self) -> f64 {
    self.duration
  }

  pub fn position(&self) -> f64 {
    self.position
  }

  pub fn viewed(&self) -> bool {
    self.viewed
  }

  pub fn starred(&self) -> bool {
    self.starred
  }

  pub fn creation_date(&self) -> DateTime<Utc> {
    self.creation_date
  }

  pub fn dirty(&self) -> bool {
    self.dirty
  }

  pub fn has_thumbnail(&self) -> bool {
    !self.thumbnail.is_empty()
  }

  pub fn thumbnail(&self) -> &[u8] {
    &self.thumbnail
  }

  pub fn set_duration(&mut self, duration: f64) {
    if duration == self.duration {
      return;
    }
    self.duration = duration;
    self.dirty = true;
  }

  /// Update the playback position, maintaining the one-way viewed ratchet.
  ///
  /// Shorts that are already viewed reject any rewind so the completed mark
  /// never flickers off. `viewed` flips to true only when the position
  /// crosses 90% of a known duration from at or below the threshold.
  pub fn set_position(&mut self, position: f64) {
    if position == self.position {
      return;
    }
    let old = self.position;
    if platform::is_short(&self.key) && self.viewed && position < old {
      return;
    }
    self.position = position;
    self.dirty = true;
    let threshold = self.duration * VIEWED_THRESHOLD;
    if self.duration > MIN_VIEWED_DURATION && self.position > threshold && old <= threshold {
      self.viewed = true;
    }
  }

  pub fn set_viewed(&mut self, viewed: bool) {
    if viewed == self.viewed {
      return;
    }
    self.viewed = viewed;
    self.dirty = true;
  }

  pub fn set_starred(&mut self, starred: bool) {
    if starred == self.starred {
      return;
    }
    self.starred = starred;
    self.dirty = true;
  }

  pub fn set_title(&mut self, title: &str) -> bool {
    if title == self.title {
      return false;
    }
    self.title = title.to_string();
    self.dirty = true;
    true
  }

  pub fn set_channel_id(&mut self, channel_id: &str) -> bool {
    if channel_id == self.channel_id {
      return false;
    }
    self.channel_id = channel_id.to_string();
    self.dirty = true;
    true
  }

  /// Merge the mutable fields shared by add and update. Returns whether
  /// anything changed.
  pub fn merge(&mut self, title: &str, position: f64, duration: f64) -> bool {
    let mut changed = false;
    if position != self.position {
      self.set_position(position);
      changed = true;
    }
    if duration != self.duration {
      self.set_duration(duration);
      changed = true;
    }
    if title != self.title {
      self.set_title(title);
      changed = true;
    }
    changed
  }

  /// Store a fetched thumbnail: decode, downscale to at most 128x128 keeping
  /// aspect, re-encode PNG. Empty or undecodable input is ignored.
  pub fn set_thumbnail(&mut self, bytes: &[u8]) {
    if bytes.is_empty() {
      return;
    }
    let Some(png) = normalize_thumbnail(bytes) else {
      debug!(key = %self.key, "discarding undecodable thumbnail bytes");
      return;
    };
    self.thumbnail = png;
    self.dirty = true;
  }

  /// Move the backing file to another category directory. The key, and thus
  /// the filename, never changes.
  pub fn move_to(&mut self, dir: &Path) -> bool {
    if dir == self.parent {
      return true;
    }
    let old_path = self.file_path();
    let new_path = dir.join(format!("{}.{}", self.key, VIDEO_EXT));
    match std::fs::rename(&old_path, &new_path) {
      Ok(()) => {
        self.parent = dir.to_path_buf();
        true
      }
      Err(e) => {
        warn!(from = %old_path.display(), to = %new_path.display(), err = %e, "failed moving sidecar");
        false
      }
    }
  }

  /// Remove the backing file. The record is marked erased so later flushes
  /// won't resurrect it.
  pub fn erase(&mut self) -> bool {
    self.erased = true;
    let path = self.file_path();
    match std::fs::remove_file(&path) {
      Ok(()) => true,
      Err(e) => {
        warn!(path = %path.display(), err = %e, "failed deleting sidecar");
        false
      }
    }
  }

  /// Flush to disk if dirty. A failed write keeps the dirty flag set so the
  /// next sync retries; the failure is logged, never fatal.
  pub fn save(&mut self) {
    if !self.dirty || self.erased {
      return;
    }
    let sidecar = VideoSidecar {
      title: self.title.clone(),
      duration: self.duration,
      position: self.position,
      viewed: Some(self.viewed),
      starred: self.starred,
      channel: self.channel_id.clone(),
      creation_date: Some(self.creation_date.to_rfc3339()),
      thumbnail: if self.thumbnail.is_empty() { None } else { Some(BASE64.encode(&self.thumbnail)) },
    };
    let json = match serde_json::to_vec_pretty(&sidecar) {
      Ok(j) => j,
      Err(e) => {
        warn!(key = %self.key, err = %e, "failed encoding sidecar");
        return;
      }
    };
    let path = self.file_path();
    if let Err(e) = std::fs::write(&path, json) {
      warn!(path = %path.display(), err = %e, "failed writing sidecar, will retry on next sync");
      return;
    }
    self.dirty = false;
  }

  /// The canonical video page URL, optionally with the stored resume offset.
  pub fn url(&self, resume: bool) -> Option<String> {
    let position = if resume { self.position } else { 0.0 };
    platform::video_url(&self.key, position)
  }
}

/// Decode image bytes and re-encode as a PNG no larger than 128x128.
/// Images already within bounds are only transcoded, not resized.
pub fn normalize_thumbnail(bytes: &[u8]) -> Option<Vec<u8>> {
  let img = image::load_from_memory(bytes).ok()?;
  if img.width() == 0 || img.height() == 0 {
    return None;
  }
  let img = if img.width() > THUMBNAIL_MAX && img.height() > THUMBNAIL_MAX {
    img.resize(THUMBNAIL_MAX, THUMBNAIL_MAX, FilterType::Triangle)
  } else {
    img
  };
  let mut out = Cursor::new(Vec::new());
  img.write_to(&mut out, ImageFormat::Png).ok()?;
  Some(out.into_inner())
}

fn birth_time(path: &Path) -> Option<DateTime<Utc>> {
  let meta = std::fs::metadata(path).ok()?;
  let created = meta.created().or_else(|_| meta.modified()).ok()?;
  Some(DateTime::<Utc>::from(created))
}
