//! Planner endpoint normalization.
//!
//! Malformed URLs are passed through untouched; the network call reports them.

const INVOCATIONS: &str = "/invocations";

/// Canonical invocation URL for `explicit`, falling back to `default`.
///
/// The result ends in exactly one `/invocations` segment whatever the input
/// carried (none, one, repeated, or with trailing slashes).
pub fn invocation_url(explicit: Option<&str>, default: &str) -> String {
    let raw = explicit
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .unwrap_or(default);
    format!("{}{INVOCATIONS}", base_url(raw))
}

/// Strip trailing slashes and any `/invocations` suffixes to recover the base URL.
///
/// Used to reach sibling endpoints such as `{base}/trace/push`.
pub fn base_url(url: &str) -> String {
    let mut base = url.trim();
    loop {
        let trimmed = base.trim_end_matches('/');
        match trimmed.strip_suffix(INVOCATIONS) {
            Some(rest) => base = rest,
            None => return trimmed.to_string(),
        }
    }
}
