//! Image link extraction from result pages.
//!
//! The result pages are plain HTML with no stable API, so links are found
//! by pattern: every `src="..."` attribute whose value carries the `?w=`
//! resize marker is treated as a final rendered image. Thumbnails and UI
//! assets have no marker and are dropped.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

static SRC_ATTR: Lazy<Regex> = Lazy::new(|| Regex::new(r#"src="([^"]+)""#).expect("valid regex"));

/// Query marker the service adds to sized image links.
pub const SIZING_MARKER: &str = "?w=";

/// Every distinct sizing-qualified link in `html`, cut at the sizing marker.
pub fn extract_image_links(html: &str) -> HashSet<String> {
    SRC_ATTR
        .captures_iter(html)
        .filter_map(|caps| caps.get(1))
        .filter_map(|m| strip_sizing(m.as_str()))
        .collect()
}

/// Like [`extract_image_links`] but only absolute `https` links.
pub fn extract_absolute_image_links(html: &str) -> HashSet<String> {
    extract_image_links(html)
        .into_iter()
        .filter(|link| link.starts_with("https"))
        .collect()
}

/// Up to `count` links from a deduplicated set. Which ones is unspecified.
pub fn take_links(links: HashSet<String>, count: usize) -> Vec<String> {
    links.into_iter().take(count).collect()
}

fn strip_sizing(link: &str) -> Option<String> {
    link.split_once(SIZING_MARKER)
        .map(|(base, _)| base.to_string())
        .filter(|base| !base.is_empty())
}
