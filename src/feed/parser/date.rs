//! Date normalization for the native date representations of each format.
//!
//! RSS uses RFC 822 (`Sat, 07 Sep 2002 00:00:01 GMT`), ATOM uses RFC 3339 and
//! RDF uses the W3C profile of ISO 8601 through `dc:date`. Real-world feeds
//! mix these up, so every entry point falls back to the other family before
//! giving up. All results are UTC instants.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// Parse an RFC 822 / RFC 2822 date, tolerating the usual feed quirks
/// (full weekday names, `UTC` zone, missing seconds, missing zone).
pub(crate) fn parse_rfc822(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }

    // Drop the weekday, whatever its spelling: "Monday, 01 Jan 2024 ..."
    let without_weekday = match s.split_once(',') {
        Some((_, rest)) => rest.trim(),
        None => s,
    };
    let normalized = normalize_zone_suffix(without_weekday);

    for fmt in ["%d %b %Y %H:%M:%S %z", "%d %b %Y %H:%M %z", "%d %B %Y %H:%M:%S %z"] {
        if let Ok(dt) = DateTime::parse_from_str(&normalized, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for fmt in ["%d %b %Y %H:%M:%S", "%d %b %Y %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&normalized, fmt) {
            return Some(naive.and_utc());
        }
    }
    None
}

/// Parse an ISO 8601 / RFC 3339 date as used by ATOM and `dc:date`.
///
/// Accepts full timestamps with offset or `Z`, timestamps without seconds,
/// timestamps without offset (taken as UTC) and plain dates (midnight UTC).
pub(crate) fn parse_iso8601(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    let with_offset = match s.strip_suffix('Z').or_else(|| s.strip_suffix('z')) {
        Some(head) => format!("{}+00:00", head),
        None => s.to_owned(),
    };
    for fmt in ["%Y-%m-%dT%H:%M%:z", "%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%:z"] {
        if let Ok(dt) = DateTime::parse_from_str(&with_offset, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// RFC 822 first, ISO 8601 as fallback. Used by the RSS variants.
pub(crate) fn parse_rss_date(raw: &str) -> Option<DateTime<Utc>> {
    parse_rfc822(raw).or_else(|| parse_iso8601(raw))
}

/// ISO 8601 first, RFC 822 as fallback. Used by ATOM and RDF.
pub(crate) fn parse_w3c_date(raw: &str) -> Option<DateTime<Utc>> {
    parse_iso8601(raw).or_else(|| parse_rfc822(raw))
}

fn normalize_zone_suffix(s: &str) -> String {
    for zone in [" UTC", " GMT", " UT", " Z"] {
        if let Some(head) = s.strip_suffix(zone) {
            return format!("{} +0000", head);
        }
    }
    s.to_owned()
}
