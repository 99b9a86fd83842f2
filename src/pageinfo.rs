//! Page info extraction: video page bytes in, channel identity out.
//!
//! The contract is fixed — `extract` either yields the channel id, channel
//! name, avatar URL and page title, or no match at all. The default
//! implementation scrapes the markup the platform embeds in watch pages;
//! swap in another implementation through `Coordinator::with_extractor`.

use regex::Regex;
use tracing::debug;

use crate::platform;

/// Everything a video page reveals about its channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageInfo {
  pub channel_id: String,
  pub channel_name: String,
  /// May be empty; the avatar is optional even on a matched page.
  pub avatar_url: String,
  /// Cleaned page title; may be empty.
  pub title: String,
}

pub trait PageInfoExtract {
  /// Extract channel info from a fetched video page body, or `None` when the
  /// page carries no recognizable author markup.
  fn extract(&self, key: &str, body: &str) -> Option<PageInfo>;
}

/// The default regex-based extractor.
pub struct RegexPageInfo {
  author: Regex,
  avatar: Regex,
  title: Regex,
}

impl RegexPageInfo {
  pub fn new() -> Self {
    // Patterns are compile-time constants; a failure here is a programming
    // error, not a runtime condition.
    Self {
      author: Regex::new(
        r#"<span itemprop="author" itemscope itemtype="http://schema\.org/Person"><link itemprop="url" href="http://www\.youtube\.com/(.+?)"><link itemprop="name" content="(.+?)">"#,
      )
      .expect("author pattern is valid"),
      avatar: Regex::new(r#"channelAvatar":\{"thumbnails":\[\{"url":"(https://.*?)""#).expect("avatar pattern is valid"),
      title: Regex::new(r"<title>(.*?)</title>").expect("title pattern is valid"),
    }
  }

  /// Shorts embed the avatar differently, anchored on the channel id.
  fn shorts_avatar(&self, channel_id: &str) -> Option<Regex> {
    let pattern = format!(
      r#"canonicalBaseUrl":"/{}"\}}\}}\}}\]\}},"channelThumbnail":\{{"thumbnails":\[\{{"url":"(https://.*?)""#,
      regex::escape(channel_id)
    );
    Regex::new(&pattern).ok()
  }
}

impl Default for RegexPageInfo {
  fn default() -> Self {
    Self::new()
  }
}

impl PageInfoExtract for RegexPageInfo {
  fn extract(&self, key: &str, body: &str) -> Option<PageInfo> {
    let Some(caps) = self.author.captures(body) else {
      debug!(key = %key, "no author markup in page body");
      return None;
    };
    let channel_id = caps[1].to_string();
    let channel_name = unescape_html(&caps[2]);

    let avatar_url = if platform::is_short(key) {
      self
        .shorts_avatar(&channel_id)
        .and_then(|re| re.captures(body).map(|c| c[1].to_string()))
        .unwrap_or_default()
    } else {
      self.avatar.captures(body).map(|c| c[1].to_string()).unwrap_or_default()
    };

    let title = self
      .title
      .captures(body)
      .map(|c| unescape_html(c[1].trim_end_matches(" - YouTube")))
      .unwrap_or_default();

    Some(PageInfo { channel_id, channel_name, avatar_url, title })
  }
}

/// Minimal HTML entity unescape for page titles and channel names.
fn unescape_html(s: &str) -> String {
  s.replace("&lt;", "<")
    .replace("&gt;", ">")
    .replace("&quot;", "\"")
    .replace("&#39;", "'")
    .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
  use super::*;

  const AUTHOR_SPAN: &str = concat!(
    r#"<span itemprop="author" itemscope itemtype="http://schema.org/Person">"#,
    r#"<link itemprop="url" href="http://www.youtube.com/@somechannel">"#,
    r#"<link itemprop="name" content="Some &amp; Channel">"#,
  );

  #[test]
  fn extracts_author_and_title() {
    let body = format!(
      r#"<html><title>A Great Video - YouTube</title>{AUTHOR_SPAN}"#,
    );
    let info = RegexPageInfo::new().extract("YTB_v_abc", &body).unwrap();
    assert_eq!(info.channel_id, "@somechannel");
    assert_eq!(info.channel_name, "Some & Channel");
    assert_eq!(info.title, "A Great Video");
    assert_eq!(info.avatar_url, "");
  }

  #[test]
  fn extracts_standard_avatar() {
    let body = format!(
      r#"{AUTHOR_SPAN} "channelAvatar":{{"thumbnails":[{{"url":"https://yt3.ggpht.com/a=s48-c""#,
    );
    let info = RegexPageInfo::new().extract("YTB_v_abc", &body).unwrap();
    assert_eq!(info.avatar_url, "https://yt3.ggpht.com/a=s48-c");
  }

  #[test]
  fn extracts_shorts_avatar() {
    let body = format!(
      r#"{AUTHOR_SPAN} "canonicalBaseUrl":"/@somechannel"}}}}}}]}},"channelThumbnail":{{"thumbnails":[{{"url":"https://yt3.ggpht.com/s=s48-c""#,
    );
    let info = RegexPageInfo::new().extract("YTB_s_abc", &body).unwrap();
    assert_eq!(info.avatar_url, "https://yt3.ggpht.com/s=s48-c");
  }

  #[test]
  fn no_author_is_no_match() {
    let extractor = RegexPageInfo::new();
    assert!(extractor.extract("YTB_v_abc", "<html><title>x</title></html>").is_none());
    assert!(extractor.extract("YTB_v_abc", "").is_none());
  }

  #[test]
  fn unescapes_entities() {
    assert_eq!(unescape_html("a &amp; b &lt;c&gt; &quot;d&quot; &#39;e&#39;"), "a & b <c> \"d\" 'e'");
  }
}
