//! Deterministic cache-key fingerprint for a fetch (spec section 4.3,
//! "Fingerprint").
//!
//! Split out of the fetcher so `threadwatch-actions`' own cache
//! invalidation and this crate's tests can both exercise it without
//! depending on `threadwatch-fetch`.

use crate::provider::NotificationOptions;

/// Builds the deterministic fingerprint string for `opts`, excluding
/// `page` (per spec: "the boolean, string, and time fields that affect
/// the result"). Times serialize as epoch seconds.
pub fn fingerprint(opts: &NotificationOptions) -> String {
    let mut parts = Vec::with_capacity(8);
    parts.push(format!("all={}", opts.all));
    parts.push(format!("unread={}", opts.unread));
    parts.push(format!("repo={}", opts.repo_name.as_deref().unwrap_or("")));
    parts.push(format!("org={}", opts.org_name.as_deref().unwrap_or("")));
    parts.push(format!(
        "since={}",
        opts.since.map(|t| t.timestamp()).unwrap_or(0)
    ));
    parts.push(format!(
        "before={}",
        opts.before.map(|t| t.timestamp()).unwrap_or(0)
    ));
    parts.push(format!("participating={}", opts.participating));
    parts.push(format!("per_page={}", opts.per_page));
    parts.join("|")
}
