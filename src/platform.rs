//! Vendor tags, key grammar, and URL <-> key conversion.
//!
//! A video key is `VVV_t_platformid` — a 3-char uppercase vendor tag, a
//! 1-char type tag (`v` standard, `s` short) and the platform id. A channel
//! key is `VVV_channelid`. The key doubles as the sidecar filename stem and
//! as the input for URL reconstruction.

use tracing::warn;

/// Extension of video sidecar files.
pub const VIDEO_EXT: &str = "vmk";

/// Extension of channel sidecar files (stored under `.channels`).
pub const CHANNEL_EXT: &str = "vmkc";

const STANDARD_VIDEO_PATTERN: &str = "https://youtube.com/watch?v=";
const SHORTS_VIDEO_PATTERN: &str = "https://youtube.com/shorts/";

/// Video platform a record originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Vendor {
  #[default]
  Unknown,
  Youtube,
}

impl Vendor {
  /// The 3-char uppercase tag used in keys and sidecar files.
  pub fn tag(self) -> &'static str {
    match self {
      Vendor::Youtube => "YTB",
      Vendor::Unknown => "UNK",
    }
  }

  pub fn from_tag(tag: &str) -> Self {
    match tag {
      "YTB" => Vendor::Youtube,
      _ => Vendor::Unknown,
    }
  }
}

/// Whether `key` matches the video key grammar `^[A-Z]{3}_[vs]_.+$`.
pub fn is_video_key(key: &str) -> bool {
  let b = key.as_bytes();
  b.len() > 6
    && b[..3].iter().all(u8::is_ascii_uppercase)
    && b[3] == b'_'
    && (b[4] == b'v' || b[4] == b's')
    && b[5] == b'_'
}

/// Whether `key` matches the channel key grammar `^[A-Z]{3}_.+$`.
pub fn is_channel_key(key: &str) -> bool {
  let b = key.as_bytes();
  b.len() > 4 && b[..3].iter().all(u8::is_ascii_uppercase) && b[3] == b'_'
}

/// The vendor encoded in a video or channel key.
pub fn key_vendor(key: &str) -> Vendor {
  Vendor::from_tag(key.get(..3).unwrap_or_default())
}

/// Whether a video key refers to a short-form video (`s` type tag).
pub fn is_short(key: &str) -> bool {
  key.as_bytes().get(4) == Some(&b's')
}

/// The platform id portion of a video key.
pub fn video_id(key: &str) -> &str {
  key.get(6..).unwrap_or_default()
}

/// The platform id portion of a channel key.
pub fn channel_id_of_key(key: &str) -> &str {
  key.get(4..).unwrap_or_default()
}

pub fn video_key(vendor: Vendor, short: bool, id: &str) -> String {
  let tag = if short { 's' } else { 'v' };
  format!("{}_{}_{}", vendor.tag(), tag, id)
}

pub fn channel_key(vendor: Vendor, id: &str) -> String {
  format!("{}_{}", vendor.tag(), id)
}

/// Reconstruct the canonical video page URL for a key.
///
/// A positive `position` is appended as a resume offset for standard videos;
/// shorts never carry one. Unknown vendors yield `None`.
pub fn video_url(key: &str, position: f64) -> Option<String> {
  if key_vendor(key) == Vendor::Unknown || !is_video_key(key) {
    return None;
  }
  let id = video_id(key);
  if is_short(key) {
    Some(format!("{SHORTS_VIDEO_PATTERN}{id}"))
  } else if position > 0.0 {
    Some(format!("{STANDARD_VIDEO_PATTERN}{id}&t={}s", position as u64))
  } else {
    Some(format!("{STANDARD_VIDEO_PATTERN}{id}"))
  }
}

/// Classify a browser URL into a (vendor, video key) pair.
///
/// Recognizes standard watch pages and shorts, with or without `www.`;
/// anything else is `None`.
pub fn classify_url(url: &str) -> Option<(Vendor, String)> {
  let url = url.replacen("://www.", "://", 1);
  if let Some(rest) = url.strip_prefix(STANDARD_VIDEO_PATTERN) {
    let id = rest.split('&').next().unwrap_or_default();
    if id.is_empty() {
      return None;
    }
    return Some((Vendor::Youtube, video_key(Vendor::Youtube, false, id)));
  }
  if let Some(rest) = url.strip_prefix(SHORTS_VIDEO_PATTERN) {
    let id = rest.split('?').next().unwrap_or_default();
    if id.is_empty() {
      return None;
    }
    return Some((Vendor::Youtube, video_key(Vendor::Youtube, true, id)));
  }
  None
}

/// Rewrite an avatar URL to request the higher-resolution variant.
pub fn avatar_hires(url: &str) -> String {
  url.replacen("=s48-", "=s128-", 1)
}

/// Derive a channel id from a channel page URL.
///
/// The id is the first path segment and must be an `@handle`; anything else
/// yields an empty id (the record keeps a dangling reference until
/// enrichment resolves it).
pub fn channel_id_from_url(url: &str) -> String {
  let Ok(parsed) = reqwest::Url::parse(url) else {
    return String::new();
  };
  let segment = parsed.path().trim_start_matches('/').split('/').next().unwrap_or_default();
  if segment.starts_with('@') {
    segment.to_string()
  } else {
    warn!(url = %url, "invalid channel url, no @handle in path");
    String::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn video_key_grammar() {
    assert!(is_video_key("YTB_v_abc123"));
    assert!(is_video_key("YTB_s_abc123"));
    assert!(!is_video_key("YTB_x_abc123"));
    assert!(!is_video_key("ytb_v_abc123"));
    assert!(!is_video_key("YTB_v_"));
    assert!(!is_video_key("YTB_abc123"));
  }

  #[test]
  fn channel_key_grammar() {
    assert!(is_channel_key("YTB_@somechannel"));
    assert!(is_channel_key("YTB_v_abc123")); // video keys are also valid channel shapes
    assert!(!is_channel_key("YTB_"));
    assert!(!is_channel_key("ytb_@x"));
  }

  #[test]
  fn key_accessors() {
    assert_eq!(key_vendor("YTB_v_abc123"), Vendor::Youtube);
    assert_eq!(key_vendor("XXX_v_abc123"), Vendor::Unknown);
    assert!(is_short("YTB_s_abc123"));
    assert!(!is_short("YTB_v_abc123"));
    assert_eq!(video_id("YTB_v_abc123"), "abc123");
    assert_eq!(channel_id_of_key("YTB_@handle"), "@handle");
  }

  #[test]
  fn url_reconstruction() {
    assert_eq!(video_url("YTB_v_abc", 0.0).as_deref(), Some("https://youtube.com/watch?v=abc"));
    assert_eq!(video_url("YTB_v_abc", 95.7).as_deref(), Some("https://youtube.com/watch?v=abc&t=95s"));
    // Shorts never carry a resume offset
    assert_eq!(video_url("YTB_s_abc", 42.0).as_deref(), Some("https://youtube.com/shorts/abc"));
    assert_eq!(video_url("XXX_v_abc", 0.0), None);
  }

  #[test]
  fn url_classification() {
    assert_eq!(
      classify_url("https://www.youtube.com/watch?v=abc123&list=PL1"),
      Some((Vendor::Youtube, "YTB_v_abc123".to_string()))
    );
    assert_eq!(
      classify_url("https://youtube.com/shorts/xyz?feature=share"),
      Some((Vendor::Youtube, "YTB_s_xyz".to_string()))
    );
    assert_eq!(classify_url("https://youtube.com/@somechannel"), None);
    assert_eq!(classify_url("https://example.com/watch?v=abc"), None);
  }

  #[test]
  fn classified_keys_round_trip() {
    let (_, key) = classify_url("https://youtube.com/watch?v=abc123").unwrap();
    assert_eq!(video_url(&key, 0.0).as_deref(), Some("https://youtube.com/watch?v=abc123"));
  }

  #[test]
  fn avatar_rewrite() {
    assert_eq!(avatar_hires("https://yt3.ggpht.com/x=s48-c-k"), "https://yt3.ggpht.com/x=s128-c-k");
    assert_eq!(avatar_hires("https://yt3.ggpht.com/x=s176-c"), "https://yt3.ggpht.com/x=s176-c");
  }

  #[test]
  fn channel_id_derivation() {
    assert_eq!(channel_id_from_url("https://www.youtube.com/@somechannel"), "@somechannel");
    assert_eq!(channel_id_from_url("https://www.youtube.com/@somechannel/videos"), "@somechannel");
    assert_eq!(channel_id_from_url("https://www.youtube.com/channel/UCabc"), "");
    assert_eq!(channel_id_from_url("not a url"), "");
  }
}
