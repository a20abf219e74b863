//! Utility functions for search result normalization.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};

use super::types::RecencyWindow;
use crate::scoring::host_without_www;

/// Parse a provider date string in various formats.
///
/// Relative forms such as "3 hours ago" are resolved against `now`.
pub fn parse_date(date_str: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let date_str = date_str.trim();
    if date_str.is_empty() {
        return None;
    }

    // Try RFC3339
    if let Ok(date) = DateTime::parse_from_rfc3339(date_str) {
        return Some(date.with_timezone(&Utc));
    }

    // Try RFC2822
    if let Ok(date) = DateTime::parse_from_rfc2822(date_str) {
        return Some(date.with_timezone(&Utc));
    }

    // Try ISO 8601 with a numeric offset
    if let Ok(date) = DateTime::parse_from_str(date_str, "%Y-%m-%dT%H:%M:%S%z") {
        return Some(date.with_timezone(&Utc));
    }

    // Naive layouts are taken as UTC
    for format in &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%d/%m/%Y %H:%M:%S"] {
        if let Ok(date) = NaiveDateTime::parse_from_str(date_str, format) {
            return Some(date.and_utc());
        }
    }
    for format in &["%Y-%m-%d", "%b %d, %Y", "%B %d, %Y", "%d %b %Y", "%d/%m/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(date_str, format) {
            return date.and_hms_opt(0, 0, 0).map(|d| d.and_utc());
        }
    }

    parse_relative_date(date_str, now)
}

/// "5 mins ago", "1 hour ago", "2 days ago", "1 week ago", "3 months ago".
fn parse_relative_date(date_str: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let lower = date_str.to_lowercase();
    let rest = lower.strip_suffix("ago")?.trim();
    let mut parts = rest.split_whitespace();
    let amount: i64 = parts.next()?.parse().ok()?;
    let unit = parts.next()?;
    if parts.next().is_some() {
        return None;
    }

    // Out-of-range amounts are unparseable, not fatal.
    let delta = match unit.trim_end_matches('s') {
        "sec" | "second" => Duration::try_seconds(amount),
        "min" | "minute" => Duration::try_minutes(amount),
        "hour" | "hr" => Duration::try_hours(amount),
        "day" => Duration::try_days(amount),
        "week" => Duration::try_weeks(amount),
        "month" => amount.checked_mul(30).and_then(Duration::try_days),
        "year" => amount.checked_mul(365).and_then(Duration::try_days),
        _ => return None,
    }?;
    now.checked_sub_signed(delta)
}

/// The provider's `source` when present, otherwise the result's hostname
/// without a leading `www.`.
pub fn resolve_outlet(source: Option<&str>, link: &str) -> Option<String> {
    source
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| host_without_www(link))
}

/// Trims an alert query and wraps it as an exact phrase. Blank queries yield
/// `None`.
pub fn sanitize_query(query: &str) -> Option<String> {
    let cleaned = query.trim().replace('"', "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(format!("\"{}\"", cleaned))
    }
}

/// Smallest provider window covering everything since `since`, never
/// narrower than a day.
pub fn recency_window(since: DateTime<Utc>, now: DateTime<Utc>) -> RecencyWindow {
    let age = now - since;
    if age <= Duration::days(1) {
        RecencyWindow::Day
    } else if age <= Duration::weeks(1) {
        RecencyWindow::Week
    } else if age <= Duration::days(31) {
        RecencyWindow::Month
    } else {
        RecencyWindow::Year
    }
}
