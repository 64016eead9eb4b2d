//! Relay URL normalization.
//!
//! Two spellings of the same relay must map to one fleet entry, so every URL
//! is trimmed, checked for a websocket scheme, lowercased in scheme and host,
//! and stripped of trailing slashes (ports and paths are kept).
//!
//! Hosts that can only reach the operator's own network are refused: loopback,
//! private, link-local and unspecified addresses, `localhost` and `.local`.

use nostr_sdk::RelayUrl;
use std::net::{IpAddr, Ipv6Addr};
use thiserror::Error;

/// Why a relay URL was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayUrlError {
    #[error("invalid relay URL: {0}")]
    Invalid(String),
    #[error("blocked relay host '{host}': {reason}")]
    Blocked { host: String, reason: &'static str },
}

/// Normalize a relay URL, or explain why it cannot be used.
pub fn normalize_relay_url(raw: &str) -> Result<String, RelayUrlError> {
    let raw = raw.trim();

    let scheme_ok = ["wss://", "ws://"]
        .iter()
        .any(|s| raw.get(..s.len()).is_some_and(|p| p.eq_ignore_ascii_case(s)));
    if !scheme_ok {
        return Err(RelayUrlError::Invalid(format!(
            "'{}' does not use ws:// or wss://",
            raw
        )));
    }

    let parsed = RelayUrl::parse(raw).map_err(|e| RelayUrlError::Invalid(e.to_string()))?;
    let url = parsed.to_string().trim_end_matches('/').to_string();

    let host = host_of(&url);
    if let Some(reason) = blocked_reason(host) {
        return Err(RelayUrlError::Blocked {
            host: host.to_string(),
            reason,
        });
    }

    Ok(url)
}

/// Host without scheme, port, path or IPv6 brackets.
fn host_of(url: &str) -> &str {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let authority = rest.split('/').next().unwrap_or(rest);

    if let Some(v6) = authority.strip_prefix('[') {
        return v6.split(']').next().unwrap_or(v6);
    }
    authority.split(':').next().unwrap_or(authority)
}

fn blocked_reason(host: &str) -> Option<&'static str> {
    if host.is_empty() {
        return Some("empty host");
    }
    if host == "localhost" || host.ends_with(".localhost") {
        return Some("localhost");
    }
    if host.ends_with(".local") {
        return Some("mDNS name");
    }

    match host.parse::<IpAddr>().ok()? {
        IpAddr::V4(ip) if ip.is_loopback() => Some("loopback address"),
        IpAddr::V4(ip) if ip.is_unspecified() => Some("unspecified address"),
        IpAddr::V4(ip) if ip.is_private() => Some("private address"),
        IpAddr::V4(ip) if ip.is_link_local() => Some("link-local address"),
        IpAddr::V6(ip) if ip.is_loopback() || ip.is_unspecified() => Some("loopback address"),
        IpAddr::V6(ip) if is_unique_local(&ip) => Some("unique-local address"),
        _ => None,
    }
}

/// `fc00::/7`
fn is_unique_local(ip: &Ipv6Addr) -> bool {
    ip.segments()[0] & 0xfe00 == 0xfc00
}
