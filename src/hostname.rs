//! Hostname classification: registrable-domain (eTLD+1) extraction,
//! top-level-domain detection, wildcard handling and input normalization.
//!
//! All functions are pure; the only state is an LRU cache in front of the
//! public-suffix lookup. Malformed input yields `None`/`false` so callers can
//! fall back to storing the text as a raw unclassified entry.

use std::net::IpAddr;
use std::num::NonZeroUsize;

use lru::LruCache;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use publicsuffix::{List, Psl};
use regex::Regex;

/// Trimmed Public Suffix List snapshot embedded at build time.
static SUFFIX_LIST: Lazy<List> = Lazy::new(|| {
    include_str!("public_suffixes.dat")
        .parse()
        .expect("SUFFIX_LIST: embedded public suffix data is invalid")
});

/// Hostname syntax validator (labels of letters, digits and inner hyphens).
static HOSTNAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?(\.[a-z0-9]([a-z0-9-]*[a-z0-9])?)*$")
        .expect("HOSTNAME_PATTERN: hardcoded regex is invalid")
});

/// Registrable-domain lookups repeat heavily for subdomains of the same
/// site, so cache them.
static RD_CACHE: Lazy<Mutex<LruCache<String, Option<String>>>> = Lazy::new(|| {
    let capacity = NonZeroUsize::new(512).expect("RD_CACHE: capacity is non-zero");
    Mutex::new(LruCache::new(capacity))
});

/// Remove a single leading `*.` wildcard marker if present.
pub fn strip_wildcard(hostname: &str) -> &str {
    hostname.strip_prefix("*.").unwrap_or(hostname)
}

/// True when the text is a valid IPv4 or IPv6 literal.
pub fn is_ip_address(hostname: &str) -> bool {
    hostname.parse::<IpAddr>().is_ok()
}

/// True when, after wildcard stripping, the text equals its own public
/// suffix (e.g. "co.uk"). Unknown single-label TLDs do not count.
pub fn is_top_level_domain(hostname: &str) -> bool {
    let host = strip_wildcard(hostname);
    if host.is_empty() {
        return false;
    }
    match SUFFIX_LIST.suffix(host.as_bytes()) {
        Some(suffix) => suffix.is_known() && suffix.as_bytes() == host.as_bytes(),
        None => false,
    }
}

/// True when the text passes the hostname syntax validator. Wildcard markers
/// and IP literals are accepted.
pub fn is_valid_hostname(hostname: &str) -> bool {
    let host = strip_wildcard(hostname);
    if host.is_empty() || host.len() > 253 {
        return false;
    }
    is_ip_address(host) || HOSTNAME_PATTERN.is_match(host)
}

/// Compute the registrable domain (eTLD+1) for a hostname.
///
/// IP literals and top-level domains are returned unchanged. Otherwise the
/// lookup starts from the last two labels and re-includes labels to the left
/// until public-suffix extraction yields a registrable domain, which handles
/// suffixes longer than the two-label heuristic ("sub.example.co.uk").
/// Returns `None` for text that cannot be grouped.
pub fn registrable_domain(hostname: &str) -> Option<String> {
    let host = strip_wildcard(hostname.trim()).to_lowercase();
    if host.is_empty() {
        return None;
    }
    if is_ip_address(&host) {
        return Some(host);
    }
    if !HOSTNAME_PATTERN.is_match(&host) {
        return None;
    }
    if is_top_level_domain(&host) {
        return Some(host);
    }

    if let Some(cached) = RD_CACHE.lock().get(&host) {
        return cached.clone();
    }

    let result = compute_registrable(&host);
    RD_CACHE.lock().put(host, result.clone());
    result
}

fn compute_registrable(host: &str) -> Option<String> {
    let labels: Vec<&str> = host.split('.').collect();
    let mut start = labels.len().saturating_sub(2);
    loop {
        let candidate = labels[start..].join(".");
        if SUFFIX_LIST.domain(candidate.as_bytes()).is_some() {
            return Some(candidate);
        }
        if start == 0 {
            return None;
        }
        // Candidate was entirely a public suffix; widen by one label.
        start -= 1;
    }
}

/// Extract the subdomain part of `hostname` relative to its registrable
/// domain, dropping a leading "www." and the trailing label separator.
pub fn subdomain_label(hostname: &str, registrable: &str) -> String {
    let host = strip_wildcard(hostname);
    let host = host.strip_prefix("www.").unwrap_or(host);
    let label = host.strip_suffix(registrable).unwrap_or(host);
    label.trim_end_matches('.').to_string()
}

/// Normalize raw user input into a bare hostname: lower-case, strip scheme,
/// userinfo, path/query/fragment, port and trailing dot. A leading `*.`
/// wildcard marker is preserved. Returns `None` when the remainder fails the
/// hostname syntax validator.
pub fn normalize_input(raw: &str) -> Option<String> {
    let mut s = raw.trim().to_lowercase();
    if let Some(idx) = s.find("://") {
        s.drain(..idx + 3);
    }
    if let Some(idx) = s.find(['/', '?', '#']) {
        s.truncate(idx);
    }
    if let Some(idx) = s.rfind('@') {
        s.drain(..idx + 1);
    }

    if s.starts_with('[') {
        // Bracketed IPv6 literal, possibly with a port after the bracket.
        let end = s.find(']')?;
        s = s[1..end].to_string();
    } else if let Some((host, port)) = s.rsplit_once(':') {
        let port_is_numeric = !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit());
        if port_is_numeric && !host.contains(':') {
            s.truncate(host.len());
        }
    }

    let s = s.trim_end_matches('.').to_string();
    if s.is_empty() || !is_valid_hostname(&s) {
        return None;
    }
    Some(s)
}
