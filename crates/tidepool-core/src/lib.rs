//! Core types and pure helpers for the Tidepool torrent index.
//!
//! This crate provides:
//! - Parsing of NIP-35 torrent announcements (kind 2003) into [`Announcement`]s
//! - Magnet locator parsing and synthesis
//! - Category derivation from content tags
//! - Structural fingerprints over file manifests
//! - Publisher identity normalization (hex / npub)
//! - Release-name parsing used by near-duplicate detection
//! - Prometheus metrics helpers
//! - Shared error types

pub mod announcement;
pub mod category;
mod error;
pub mod fingerprint;
pub mod magnet;
pub mod metrics;
pub mod pubkey;
pub mod release;

// ═══════════════════════════════════════════════════════════════════════════
// Constants
// ═══════════════════════════════════════════════════════════════════════════

/// Event kind for torrent announcements (NIP-35).
pub const TORRENT_KIND: u16 = 2003;

/// Length of a hex-encoded v1 info hash (20-byte SHA-1 digest).
pub const INFO_HASH_HEX_LEN: usize = 40;

pub use announcement::{Announcement, FileEntry, parse_announcement};
pub use category::{Category, derive_category};
pub use error::{Error, Result};
pub use fingerprint::file_tree_hash;
pub use magnet::{build_magnet, extract_display_name, extract_info_hash, is_magnet};
pub use pubkey::{normalize_pubkey, pubkeys_match};
pub use release::{ReleaseInfo, parse_release};
