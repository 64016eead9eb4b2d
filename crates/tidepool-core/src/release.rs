//! Release-name parsing for near-duplicate detection.
//!
//! Scene-style names such as `Movie.2020.1080p.BluRay.x264-GROUP.mkv` carry a
//! quality tier, a source type and a trailing release-group token.

use std::sync::LazyLock;

use regex::Regex;

static QUALITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(2160p|4k|uhd|1080p|1080i|720p|576p|480p)\b").expect("static regex")
});

static SOURCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(remux|blu-?ray|bdrip|brrip|web-?dl|web-?rip|webrip|hdtv|dvdrip|dvd|hdrip|cam|ts)\b")
        .expect("static regex")
});

static EXTENSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.[A-Za-z0-9]{2,4}$").expect("static regex"));

/// Attributes parsed from a release name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseInfo {
    /// Normalized quality tier (`2160p`, `1080p`, ...).
    pub quality: Option<String>,
    /// Normalized source type (`bluray`, `webdl`, ...).
    pub source: Option<String>,
    /// Uppercased release group.
    pub group: Option<String>,
}

/// Parse a release name.
pub fn parse_release(name: &str) -> ReleaseInfo {
    let quality = QUALITY_RE.captures(name).map(|c| {
        match c[1].to_ascii_lowercase().as_str() {
            "4k" | "uhd" => "2160p".to_string(),
            "1080i" => "1080p".to_string(),
            other => other.to_string(),
        }
    });

    let source = SOURCE_RE
        .captures(name)
        .map(|c| c[1].to_ascii_lowercase().replace('-', ""));

    ReleaseInfo {
        quality,
        source,
        group: release_group(name),
    }
}

/// Halves of hyphenated source tags (`WEB-DL`, `WEB-Rip`, `Blu-ray`).
const SOURCE_SUFFIXES: &[&str] = &["dl", "rip", "ray"];

/// Token after the last `-`, extension stripped, uppercased.
///
/// A trailing source tag is not a group: `Movie.1080p.WEB-DL` has none.
fn release_group(name: &str) -> Option<String> {
    let stem = EXTENSION_RE.replace(name.trim(), "");
    let (_, token) = stem.rsplit_once('-')?;
    let token = token.trim();

    let is_source = SOURCE_SUFFIXES.iter().any(|s| token.eq_ignore_ascii_case(s))
        || SOURCE_RE
            .find(token)
            .is_some_and(|m| m.range() == (0..token.len()));

    if token.is_empty() || token.contains(' ') || is_source {
        None
    } else {
        Some(token.to_ascii_uppercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scene_name() {
        let info = parse_release("Some.Movie.2020.1080p.BluRay.x264-GROUP.mkv");
        assert_eq!(info.quality.as_deref(), Some("1080p"));
        assert_eq!(info.source.as_deref(), Some("bluray"));
        assert_eq!(info.group.as_deref(), Some("GROUP"));
    }

    #[test]
    fn test_quality_aliases() {
        assert_eq!(parse_release("Film 4K HDR").quality.as_deref(), Some("2160p"));
        assert_eq!(parse_release("Show.S01E01.WEB-DL").source.as_deref(), Some("webdl"));
    }

    #[test]
    fn test_group_is_uppercased_and_optional() {
        assert_eq!(parse_release("movie.720p-ntb").group.as_deref(), Some("NTB"));
        assert_eq!(parse_release("Plain Title").group, None);
        assert_eq!(parse_release("Plain Title").quality, None);
    }

    #[test]
    fn test_trailing_source_tag_is_not_a_group() {
        for name in [
            "Some.Movie.2020.1080p.WEB-DL",
            "Some.Movie.2020.1080p.WEB-DL.mkv",
            "Some Movie 2020 720p Blu-ray",
            "Show.S01E01.720p.WEB-Rip",
            "Show.S01E01.720p-HDTV",
        ] {
            let info = parse_release(name);
            assert_eq!(info.group, None, "{}", name);
            assert!(info.source.is_some(), "{}", name);
        }
        assert_eq!(
            parse_release("Some.Movie.2020.1080p.WEB-DL-NTb").group.as_deref(),
            Some("NTB")
        );
    }
}
