//! Magnet locator parsing and synthesis.
//!
//! Only the pieces of a magnet URI the index cares about are interpreted:
//! the v1 info hash (`xt=urn:btih:<40 hex>`), the display name (`dn`), the
//! exact length (`xl`) and trackers (`tr`).

use std::sync::LazyLock;

use percent_encoding::{NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use regex::Regex;

/// Scheme prefix identifying a magnet locator.
pub const MAGNET_PREFIX: &str = "magnet:?";

/// Public trackers appended to every synthesized locator.
pub const FALLBACK_TRACKERS: &[&str] = &[
    "udp://tracker.opentrackr.org:1337/announce",
    "udp://open.demonii.com:1337/announce",
    "udp://tracker.openbittorrent.com:6969/announce",
    "udp://exodus.desync.com:6969/announce",
    "udp://tracker.torrent.eu.org:451/announce",
];

static BTIH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)xt=urn:btih:([0-9a-f]{40})(?:&|$)").expect("static regex")
});

static DN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:[?&])dn=([^&]*)").expect("static regex"));

/// Returns true if `value` looks like a magnet locator.
pub fn is_magnet(value: &str) -> bool {
    value.trim_start().to_ascii_lowercase().starts_with(MAGNET_PREFIX)
}

/// Extract the lowercase hex info hash from a magnet locator.
pub fn extract_info_hash(magnet: &str) -> Option<String> {
    BTIH_RE
        .captures(magnet)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_ascii_lowercase())
}

/// Extract a human-readable display name from a magnet locator.
///
/// `+`, `%20` and literal dots become single spaces, remaining escapes are
/// decoded and the result is trimmed. Empty names yield `None`.
pub fn extract_display_name(magnet: &str) -> Option<String> {
    let raw = DN_RE.captures(magnet)?.get(1)?.as_str();

    let spaced = raw.replace('+', " ").replace("%20", " ").replace('.', " ");
    let decoded = percent_decode_str(&spaced).decode_utf8_lossy();
    let name = decoded.trim();

    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Returns true if `value` is a 40-character hex string.
pub fn is_info_hash(value: &str) -> bool {
    value.len() == crate::INFO_HASH_HEX_LEN && value.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Build a canonical magnet locator.
///
/// Declared trackers come first, followed by [`FALLBACK_TRACKERS`] not
/// already present.
pub fn build_magnet(info_hash: &str, name: &str, size: u64, trackers: &[String]) -> String {
    let mut magnet = format!("magnet:?xt=urn:btih:{}", info_hash.to_ascii_lowercase());

    if !name.is_empty() {
        magnet.push_str("&dn=");
        magnet.push_str(&utf8_percent_encode(name, NON_ALPHANUMERIC).to_string());
    }
    if size > 0 {
        magnet.push_str(&format!("&xl={}", size));
    }

    let fallbacks = FALLBACK_TRACKERS.iter().map(|t| t.to_string());
    let mut seen = Vec::new();
    for tracker in trackers.iter().cloned().chain(fallbacks) {
        if seen.contains(&tracker) {
            continue;
        }
        magnet.push_str("&tr=");
        magnet.push_str(&utf8_percent_encode(&tracker, NON_ALPHANUMERIC).to_string());
        seen.push(tracker);
    }

    magnet
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAGNET: &str = "magnet:?xt=urn:btih:ABC123DEF456789012345678901234567890ABCD&dn=Test";

    #[test]
    fn test_extract_info_hash_lowercases() {
        assert_eq!(
            extract_info_hash(MAGNET).as_deref(),
            Some("abc123def456789012345678901234567890abcd")
        );
    }

    #[test]
    fn test_extract_info_hash_rejects_short_hash() {
        assert_eq!(extract_info_hash("magnet:?xt=urn:btih:abc123&dn=x"), None);
        assert_eq!(extract_info_hash("magnet:?dn=nothing"), None);
    }

    #[test]
    fn test_extract_display_name_normalizes_separators() {
        let magnet = "magnet:?xt=urn:btih:abc&dn=Some.Movie+2020%20Remux";
        assert_eq!(
            extract_display_name(magnet).as_deref(),
            Some("Some Movie 2020 Remux")
        );
        assert_eq!(extract_display_name(MAGNET).as_deref(), Some("Test"));
        assert_eq!(extract_display_name("magnet:?xt=urn:btih:abc&dn="), None);
    }

    #[test]
    fn test_is_magnet() {
        assert!(is_magnet(MAGNET));
        assert!(is_magnet("  MAGNET:?xt=urn:btih:abc"));
        assert!(!is_magnet("just a description"));
    }

    #[test]
    fn test_build_magnet_roundtrips_hash_and_name() {
        let hash = "abc123def456789012345678901234567890abcd";
        let magnet = build_magnet(hash, "Big Buck Bunny", 1024, &[]);

        assert!(magnet.starts_with("magnet:?xt=urn:btih:abc123"));
        assert!(magnet.contains("&xl=1024"));
        assert_eq!(extract_info_hash(&magnet).as_deref(), Some(hash));
        assert_eq!(
            extract_display_name(&magnet).as_deref(),
            Some("Big Buck Bunny")
        );
        assert_eq!(magnet.matches("&tr=").count(), FALLBACK_TRACKERS.len());
    }

    #[test]
    fn test_build_magnet_does_not_repeat_trackers() {
        let declared = vec![FALLBACK_TRACKERS[0].to_string()];
        let magnet = build_magnet("00".repeat(20).as_str(), "", 0, &declared);
        assert_eq!(magnet.matches("&tr=").count(), FALLBACK_TRACKERS.len());
        assert!(!magnet.contains("&dn="));
        assert!(!magnet.contains("&xl="));
    }
}
