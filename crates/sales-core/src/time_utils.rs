use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;
use tracing::debug;

// ── Batch-name dates ──────────────────────────────────────────────────────────

fn filename_date_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{4})-(\d{2})-(\d{2})").expect("regex is valid"))
}

/// Extract the first `YYYY-MM-DD` date embedded anywhere in `filename`.
///
/// Returns `None` when no such substring exists or when the first match is
/// not a real calendar date (e.g. `2024-13-40`).
pub fn extract_date_from_filename(filename: &str) -> Option<NaiveDate> {
    let caps = filename_date_regex().captures(filename)?;
    let year: i32 = caps[1].parse().ok()?;
    let month: u32 = caps[2].parse().ok()?;
    let day: u32 = caps[3].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

// ── Record dates ──────────────────────────────────────────────────────────────

/// Coerce a raw `Date` cell to calendar-date granularity.
///
/// Accepts plain dates, naive date-times (time-of-day is discarded) and
/// RFC 3339 timestamps. Anything else yields `None`.
pub fn parse_record_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(date);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }

    const FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y/%m/%d %H:%M:%S",
    ];
    for fmt in FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.date());
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y/%m/%d") {
        return Some(date);
    }

    debug!("could not parse record date \"{}\"", s);
    None
}

// ── Archive stamps ────────────────────────────────────────────────────────────

/// Format an archive suffix as `YYYYMMDD_HHMMSS`.
pub fn archive_timestamp(at: NaiveDateTime) -> String {
    at.format("%Y%m%d_%H%M%S").to_string()
}

// ── Tests ──────────────────────────────────────────────────────────────────────
