//! Utility functions for date normalization, string handling and file system checks.
//!
//! - Date normalization for the relative and absolute forms news sites render
//! - String truncation for logging and rough token estimates for run reports
//! - Directory validation for state and result output

use chrono::{DateTime, Duration, Local, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fs as stdfs;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

static RELATIVE_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:(\d+)|an?)?\s*(h|hr|hrs|hours?|m|min|mins|minutes?|d|days?)(?:\s+ago)?$")
        .expect("relative date regex")
});

/// Absolute date layouts tried in order after the relative forms.
const DATE_FORMATS: &[&str] = &["%b %d, %Y", "%B %d, %Y", "%Y-%m-%d", "%d %b %Y", "%d %B %Y"];

/// Stored timestamp form: UTC, whole seconds, `Z` suffix. Text order of these
/// strings is time order.
pub fn utc_timestamp<Tz: TimeZone>(dt: &DateTime<Tz>) -> String {
    dt.with_timezone(&Utc).to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Normalize the date text rendered by a source into a UTC RFC 3339 timestamp.
///
/// Relative forms ("5 hours ago", "5h", "12 minutes ago", "yesterday",
/// "2 days ago") are resolved against `now`. Absolute forms cover
/// "Sep 30, 2025", ISO dates, RFC 3339 and RFC 2822; forms without an offset
/// are read as local time. Empty or unparsable text falls back to `now`.
///
/// # Examples
///
/// ```ignore
/// let now = Local::now();
/// assert_eq!(normalize_date("", now), utc_timestamp(&now));
/// ```
pub fn normalize_date(raw: &str, now: DateTime<Local>) -> String {
    let s = raw.trim().to_lowercase();
    if s.is_empty() {
        return utc_timestamp(&now);
    }
    if s == "yesterday" {
        return utc_timestamp(&(now - Duration::days(1)));
    }
    if s == "just now" || s == "now" {
        return utc_timestamp(&now);
    }

    if let Some(caps) = RELATIVE_DATE.captures(&s) {
        let n: i64 = caps
            .get(1)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(1);
        let unit = caps.get(2).map(|m| m.as_str()).unwrap_or("h");
        let delta = match unit.chars().next() {
            Some('h') => Duration::hours(n),
            Some('m') => Duration::minutes(n),
            _ => Duration::days(n),
        };
        return utc_timestamp(&(now - delta));
    }

    let trimmed = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return utc_timestamp(&dt);
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return utc_timestamp(&dt);
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S") {
        if let Some(dt) = Local.from_local_datetime(&naive).earliest() {
            return utc_timestamp(&dt);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, fmt) {
            if let Some(dt) = date
                .and_hms_opt(0, 0, 0)
                .and_then(|naive| Local.from_local_datetime(&naive).earliest())
            {
                return utc_timestamp(&dt);
            }
        }
    }

    tracing::debug!(raw, "Unrecognized date text; using current time");
    utc_timestamp(&now)
}

/// Truncate a string for logging purposes.
///
/// Long strings are cut at a character boundary no later than `max` bytes and
/// get `"…(+N bytes)"` appended.
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}

/// Rough token estimate used in run reports: one token per four characters.
pub fn estimate_tokens(text: &str) -> usize {
    let chars = text.chars().count();
    chars.div_ceil(4).max(1)
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if needed, then writes and removes a probe file.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(path).await?;
    let probe_path = path.join("..__probe_write__");
    match stdfs::File::create(&probe_path) {
        Ok(_) => {
            let _ = stdfs::remove_file(&probe_path);
            info!("Directory is writable");
            Ok(())
        }
        Err(e) => Err(Box::new(e)),
    }
}
