use anyhow::{Context, Result};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::platform::{self, CHANNEL_EXT, Vendor};

/// On-disk shape of a channel sidecar file under `.channels`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct ChannelSidecar {
  #[serde(default)]
  name: String,
  #[serde(default)]
  id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  vendor: Option<String>,
  #[serde(rename = "creationDate", default, skip_serializing_if = "Option::is_none")]
  creation_date: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  thumbnail: Option<String>,
}

/// A video channel, one per (vendor, id), created lazily by the first video
/// referencing it and never auto-deleted.
#[derive(Debug, Clone)]
pub struct ChannelRecord {
  pub id: String,
  pub vendor: Vendor,
  root: PathBuf,
  name: String,
  avatar: Vec<u8>,
  creation_date: DateTime<Utc>,
  dirty: bool,
}

impl ChannelRecord {
  /// A fresh channel record; dirty so the next flush persists it.
  pub fn create(id: &str, name: &str, vendor: Vendor, root: &Path) -> Self {
    Self {
      id: id.to_string(),
      vendor,
      root: root.to_path_buf(),
      name: name.to_string(),
      avatar: Vec::new(),
      creation_date: Utc::now(),
      dirty: true,
    }
  }

  /// Decode the sidecar at `<root>/<key>.vmkc`, with the same leniency as
  /// video sidecars.
  pub fn load(key: &str, root: &Path) -> Result<Self> {
    let mut record = Self::create(platform::channel_id_of_key(key), "", platform::key_vendor(key), root);
    let path = record.file_path();
    let raw = std::fs::read(&path).with_context(|| format!("no sidecar file for channel {key}"))?;
    let sidecar: ChannelSidecar = match serde_json::from_slice(&raw) {
      Ok(s) => s,
      Err(e) => {
        warn!(key = %key, err = %e, "unparseable channel sidecar, loading defaults");
        ChannelSidecar::default()
      }
    };

    record.name = sidecar.name;
    if !sidecar.id.is_empty() {
      record.id = sidecar.id;
    }
    if let Some(tag) = sidecar.vendor {
      record.vendor = Vendor::from_tag(&tag);
    }
    record.creation_date = sidecar
      .creation_date
      .as_deref()
      .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
      .map(|d| d.with_timezone(&Utc))
      .or_else(|| birth_time(&path))
      .unwrap_or_else(Utc::now);
    if let Some(b64) = sidecar.thumbnail {
      match BASE64.decode(b64.as_bytes()) {
        Ok(bytes) => record.avatar = bytes,
        Err(e) => warn!(key = %key, err = %e, "discarding undecodable inline avatar"),
      }
    }
    record.dirty = false;
    Ok(record)
  }

  pub fn key(&self) -> String {
    platform::channel_key(self.vendor, &self.id)
  }

  pub fn file_path(&self) -> PathBuf {
    self.root.join(format!("{}.{}", self.key(), CHANNEL_EXT))
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn creation_date(&self) -> DateTime<Utc> {
    self.creation_date
  }

  pub fn dirty(&self) -> bool {
    self.dirty
  }

  pub fn has_avatar(&self) -> bool {
    !self.avatar.is_empty()
  }

  pub fn avatar(&self) -> &[u8] {
    &self.avatar
  }

  pub fn set_name(&mut self, name: &str) {
    if name == self.name {
      return;
    }
    self.name = name.to_string();
    self.dirty = true;
  }

  /// Avatars are already fetched at the wanted resolution; stored as-is.
  pub fn set_avatar(&mut self, bytes: &[u8]) {
    if bytes.is_empty() {
      return;
    }
    self.avatar = bytes.to_vec();
    self.dirty = true;
  }

  /// Flush to disk if dirty; a failed write keeps dirty set for retry.
  pub fn save(&mut self) {
    if !self.dirty {
      return;
    }
    let sidecar = ChannelSidecar {
      name: self.name.clone(),
      id: self.id.clone(),
      vendor: Some(self.vendor.tag().to_string()),
      creation_date: Some(self.creation_date.to_rfc3339()),
      thumbnail: if self.avatar.is_empty() { None } else { Some(BASE64.encode(&self.avatar)) },
    };
    let json = match serde_json::to_vec_pretty(&sidecar) {
      Ok(j) => j,
      Err(e) => {
        warn!(key = %self.key(), err = %e, "failed encoding channel sidecar");
        return;
      }
    };
    let path = self.file_path();
    if let Err(e) = std::fs::write(&path, json) {
      warn!(path = %path.display(), err = %e, "failed writing channel sidecar, will retry on next sync");
      return;
    }
    self.dirty = false;
  }
}

fn birth_time(path: &Path) -> Option<DateTime<Utc>> {
  let meta = std::fs::metadata(path).ok()?;
  let created = meta.created().or_else(|_| meta.modified()).ok()?;
  Some(DateTime::<Utc>::from(created))
}
