//! Structural fingerprint of a file manifest.
//!
//! Two torrents with the same files (same paths and sizes, in any order,
//! regardless of path case) share a fingerprint even when their info hashes
//! differ, e.g. after a re-announce with different piece sizes.

use sha2::{Digest, Sha256};

use crate::announcement::FileEntry;

/// SHA-256 (hex) over `path:size` lines of the sorted, lowercased manifest.
///
/// Returns `None` for an empty manifest.
pub fn file_tree_hash(files: &[FileEntry]) -> Option<String> {
    if files.is_empty() {
        return None;
    }

    let mut entries: Vec<(String, u64)> = files
        .iter()
        .map(|f| (f.path.to_lowercase(), f.size))
        .collect();
    entries.sort();

    let mut hasher = Sha256::new();
    for (path, size) in &entries {
        hasher.update(format!("{}:{}\n", path, size).as_bytes());
    }

    Some(hex::encode(hasher.finalize()))
}
