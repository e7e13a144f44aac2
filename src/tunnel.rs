//! Playit tunnel status extraction.
//!
//! The playit plugin running inside the game server prints its tunnel state
//! to the server console. This module reads that state back out of a log
//! snapshot — it owns nothing and never errors: when no marker is found the
//! tunnel is simply reported down.
//!
//! Two markers matter, scanned newest-first:
//!
//! - `found minecraft java tunnel: <name>.joinmc.link` — the tunnel is up
//!   and reachable at the bare domain (any `http(s)://` prefix is stripped);
//! - `... to claim visit: https://playit.gg/mc/<id>` — no tunnel yet, but
//!   the printed URL can be used to claim one.

/// Read-only tunnel state extracted from console output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TunnelStatus {
    /// Whether a public tunnel is currently established.
    pub up: bool,
    /// Claim URL printed by the plugin when no tunnel is assigned yet.
    pub claim_link: Option<String>,
    /// Bare public domain (`<name>.joinmc.link`), no scheme.
    pub public_link: Option<String>,
}

/// Scan buffered console lines (oldest first, as returned by the log
/// buffer) for tunnel markers. The most recent marker wins; a live tunnel
/// takes precedence over a stale claim link.
pub fn scan(lines: &[String]) -> TunnelStatus {
    let mut status = TunnelStatus::default();

    for line in lines.iter().rev() {
        let lower = line.to_lowercase();

        if lower.contains("found minecraft java tunnel") {
            if let Some(domain) = extract_joinmc_domain(line) {
                status.up = true;
                status.public_link = Some(domain);
                status.claim_link = None;
                break;
            }
        }

        if status.claim_link.is_none() && lower.contains("claim visit") {
            status.claim_link = extract_claim_url(line);
        }
    }

    status
}

/// Byte offset of the first ASCII-case-insensitive occurrence of `needle`.
///
/// A match can only begin at an ASCII byte, so the returned offset is always
/// a valid char boundary in `haystack`.
fn find_ascii_ci(haystack: &str, needle: &str) -> Option<usize> {
    haystack
        .as_bytes()
        .windows(needle.len())
        .position(|w| w.eq_ignore_ascii_case(needle.as_bytes()))
}

/// Extract the bare `<name>.joinmc.link` domain from a tunnel line.
///
/// Accepts both `something.joinmc.link` and `https://something.joinmc.link`;
/// the returned domain never carries a scheme.
fn extract_joinmc_domain(line: &str) -> Option<String> {
    const SUFFIX: &str = ".joinmc.link";

    let suffix_at = find_ascii_ci(line, SUFFIX)?;

    // Walk backwards over the subdomain label (ASCII letters, digits, '-').
    let head = &line[..suffix_at];
    let label_start = head
        .bytes()
        .rposition(|b| !(b.is_ascii_alphanumeric() || b == b'-'))
        .map_or(0, |i| i + 1);
    let label = &line[label_start..suffix_at];
    if label.is_empty() {
        return None;
    }

    let end = suffix_at + SUFFIX.len();
    Some(format!("{}{}", label, &line[suffix_at..end]))
}

/// Extract a `https://playit.gg/mc/<id>` claim URL from a claim line.
fn extract_claim_url(line: &str) -> Option<String> {
    const PREFIX: &str = "https://playit.gg/mc/";

    let start = find_ascii_ci(line, PREFIX)?;
    let id = &line[start + PREFIX.len()..];
    let id_len = id
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(id.len());
    if id_len == 0 {
        return None;
    }
    Some(format!("{}{}", PREFIX, &id[..id_len]))
}
