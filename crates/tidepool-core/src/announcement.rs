//! NIP-35 torrent announcements.
//!
//! [`parse_announcement`] turns a kind 2003 event into an [`Announcement`].
//! It is pure: no I/O, no clock, no global state.
//!
//! # Parsing rules
//!
//! 1. A content body starting with `magnet:?` is the locator; any other body
//!    is a free-text description.
//! 2. Tags are walked in order. Single-valued fields keep the first valid
//!    value; `t`, `file`, `tracker` and `i` accumulate.
//! 3. A missing info hash is derived from the locator (`xt=urn:btih:`).
//! 4. A missing name is derived from the locator's `dn` parameter.
//! 5. A missing size is the sum of file manifest sizes.
//! 6. A missing locator is synthesized from hash, name, size and trackers.

use nostr::Event;
use serde::{Deserialize, Serialize};

use crate::category::{Category, derive_category};
use crate::magnet::{build_magnet, extract_display_name, extract_info_hash, is_info_hash, is_magnet};
use crate::{Error, Result, TORRENT_KIND};

/// One entry of a torrent's file manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub size: u64,
}

/// A parsed torrent announcement.
#[derive(Debug, Clone, Serialize)]
pub struct Announcement {
    /// Event ID (hex). Unique per network event.
    pub event_id: String,
    /// Publisher public key (lowercase hex).
    pub pubkey: String,
    /// Event creation time (Unix seconds).
    pub created_at: u64,
    /// Lowercase hex info hash. Empty when neither declared nor derivable.
    pub info_hash: String,
    pub name: String,
    pub size: u64,
    pub magnet: String,
    pub category: Category,
    pub files: Vec<FileEntry>,
    /// Lowercased `t` tags.
    pub tags: Vec<String>,
    pub trackers: Vec<String>,
    pub description: Option<String>,
    /// Primary external catalog id, e.g. `tt0111161`.
    pub imdb_id: Option<String>,
    /// Secondary external catalog id, e.g. `movie:278`.
    pub tmdb_id: Option<String>,
}

impl Announcement {
    /// Returns true if the announcement can be indexed.
    pub fn has_info_hash(&self) -> bool {
        !self.info_hash.is_empty()
    }
}

/// Parse an event into an announcement.
///
/// Returns `Ok(None)` for events of any other kind.
pub fn parse_announcement(event: &Event) -> Result<Option<Announcement>> {
    if event.kind.as_u16() != TORRENT_KIND {
        return Ok(None);
    }

    let mut magnet: Option<String> = None;
    let mut description: Option<String> = None;

    let content = event.content.trim();
    if is_magnet(content) {
        magnet = Some(content.to_string());
    } else if !content.is_empty() {
        description = Some(content.to_string());
    }

    let mut info_hash: Option<String> = None;
    let mut name: Option<String> = None;
    let mut size: Option<u64> = None;
    let mut label: Option<String> = None;
    let mut files = Vec::new();
    let mut tags = Vec::new();
    let mut trackers = Vec::new();
    let mut imdb_id = None;
    let mut tmdb_id = None;

    for tag in event.tags.iter() {
        let values = tag.as_slice();
        let (Some(key), Some(value)) = (values.first(), values.get(1)) else {
            continue;
        };
        let value = value.trim();

        match key.as_str() {
            "x" if info_hash.is_none() => {
                if !is_info_hash(value) {
                    return Err(Error::InvalidField {
                        field: "x",
                        reason: format!("expected 40 hex characters, got '{}'", value),
                    });
                }
                info_hash = Some(value.to_ascii_lowercase());
            }
            "title" if name.is_none() && !value.is_empty() => name = Some(value.to_string()),
            "size" if size.is_none() => size = value.parse().ok(),
            "magnet" if magnet.is_none() && is_magnet(value) => magnet = Some(value.to_string()),
            "category" if label.is_none() && !value.is_empty() => {
                label = Some(value.to_lowercase())
            }
            "file" => {
                let file_size = values.get(2).and_then(|s| s.trim().parse().ok()).unwrap_or(0);
                if !value.is_empty() {
                    files.push(FileEntry {
                        path: value.to_string(),
                        size: file_size,
                    });
                }
            }
            "t" if !value.is_empty() => {
                let t = value.to_lowercase();
                if !tags.contains(&t) {
                    tags.push(t);
                }
            }
            "tracker" if !value.is_empty() => trackers.push(value.to_string()),
            "i" => {
                if let Some(id) = value.strip_prefix("imdb:") {
                    imdb_id.get_or_insert_with(|| id.to_string());
                } else if let Some(id) = value.strip_prefix("tmdb:") {
                    tmdb_id.get_or_insert_with(|| id.to_string());
                }
            }
            _ => {}
        }
    }

    let info_hash = info_hash
        .or_else(|| magnet.as_deref().and_then(extract_info_hash))
        .unwrap_or_default();

    let name = name
        .or_else(|| magnet.as_deref().and_then(extract_display_name))
        .unwrap_or_default();

    let size = size.unwrap_or_else(|| files.iter().map(|f| f.size).sum());

    let magnet = match magnet {
        Some(m) => m,
        None if !info_hash.is_empty() => build_magnet(&info_hash, &name, size, &trackers),
        None => String::new(),
    };

    let mut category_tags = tags.clone();
    if let Some(label) = label {
        category_tags.push(label);
    }
    let category = derive_category(&category_tags);

    Ok(Some(Announcement {
        event_id: event.id.to_hex(),
        pubkey: event.pubkey.to_hex(),
        created_at: event.created_at.as_u64(),
        info_hash,
        name,
        size,
        magnet,
        category,
        files,
        tags,
        trackers,
        description,
        imdb_id,
        tmdb_id,
    }))
}
