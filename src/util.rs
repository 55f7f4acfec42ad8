//! Small helpers shared by the stores and policies.

use chrono::{DateTime, SecondsFormat, Utc};
use url::Url;

/// Format a timestamp the way it is stored: RFC 3339, UTC, fixed microsecond precision.
///
/// Every stored timestamp uses this format so that text comparison in SQL
/// orders the same way as time does.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn now_timestamp() -> String {
    format_timestamp(&Utc::now())
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Strip the site home from a permalink.
///
/// Relative permalinks are returned as-is (with a leading slash); absolute
/// permalinks that point outside the site yield `None`.
pub fn relative_url(base: &Url, permalink: &str) -> Option<String> {
    let permalink = permalink.trim();
    if permalink.is_empty() {
        return None;
    }

    if permalink.starts_with('/') {
        return Some(permalink.to_string());
    }

    let absolute = Url::parse(permalink).ok()?;
    if absolute.scheme() != base.scheme()
        || absolute.host_str() != base.host_str()
        || absolute.port_or_known_default() != base.port_or_known_default()
    {
        return None;
    }

    let home = base.path().trim_end_matches('/');
    let path = absolute.path();
    let rest = path.strip_prefix(home)?;
    if !rest.is_empty() && !rest.starts_with('/') {
        return None;
    }

    let mut relative = if rest.is_empty() { "/".to_string() } else { rest.to_string() };
    if let Some(query) = absolute.query() {
        relative.push('?');
        relative.push_str(query);
    }
    Some(relative)
}

/// Join a stored relative URL back onto the site home.
pub fn absolute_url(base: &Url, relative: &str) -> String {
    let home = base.as_str().trim_end_matches('/');
    if relative.starts_with('/') {
        format!("{}{}", home, relative)
    } else {
        format!("{}/{}", home, relative)
    }
}
