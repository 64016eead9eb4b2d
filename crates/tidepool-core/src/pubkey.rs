//! Publisher identity normalization.
//!
//! Nostr public keys travel either as 64-char hex or as bech32 `npub1...`
//! strings. Everything stored or compared by Tidepool uses lowercase hex.

use nostr::PublicKey;

use crate::{Error, Result};

/// Normalize a publisher identity to lowercase hex.
///
/// Accepts hex (any case) or `npub` bech32. Surrounding whitespace is ignored.
pub fn normalize_pubkey(input: &str) -> Result<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidPubkey(input.to_string()));
    }

    let candidate = if trimmed.starts_with("npub1") {
        trimmed.to_string()
    } else {
        trimmed.to_ascii_lowercase()
    };

    PublicKey::parse(&candidate)
        .map(|pk| pk.to_hex())
        .map_err(|_| Error::InvalidPubkey(input.to_string()))
}

/// Compare two publisher identities regardless of their encoding.
pub fn pubkeys_match(a: &str, b: &str) -> bool {
    match (normalize_pubkey(a), normalize_pubkey(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
