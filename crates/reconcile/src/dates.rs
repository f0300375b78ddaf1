use chrono::{NaiveDate, NaiveDateTime};

/// Formats seen in the backup script's banners and the tracking file, in the
/// order they are tried. Shell `date` output carries a timezone abbreviation
/// chrono cannot parse, so zone-bearing strings are retried with the
/// abbreviation token removed.
const DATE_TIME_FORMATS: &[&str] = &[
    "%a %b %d %I:%M:%S %p %Y",
    "%a %b %d %H:%M:%S %Y",
    "%Y-%m-%d %H:%M:%S",
];

const DATE_ONLY_FORMAT: &str = "%Y-%m-%d";

/// Parses a timestamp string from the logs into a naive local instant.
/// Returns `None` when no known format applies; callers treat that as
/// "skip this entry", never as fatal.
pub fn parse_log_date(raw: &str) -> Option<NaiveDateTime> {
    let normalized = normalize_whitespace(raw);
    if normalized.is_empty() {
        return None;
    }
    if let Some(parsed) = try_formats(&normalized) {
        return Some(parsed);
    }
    let stripped = strip_zone_abbreviation(&normalized);
    if stripped != normalized
        && let Some(parsed) = try_formats(&stripped)
    {
        return Some(parsed);
    }
    NaiveDate::parse_from_str(&normalized, DATE_ONLY_FORMAT)
        .ok()
        .and_then(|day| day.and_hms_opt(0, 0, 0))
}

fn try_formats(value: &str) -> Option<NaiveDateTime> {
    DATE_TIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
}

fn normalize_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Drops a timezone abbreviation token (EDT, EST, UTC, ...). AM/PM markers
/// are uppercase too and must survive.
fn strip_zone_abbreviation(value: &str) -> String {
    value
        .split(' ')
        .filter(|token| !is_zone_abbreviation(token))
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_zone_abbreviation(token: &str) -> bool {
    if token == "AM" || token == "PM" {
        return false;
    }
    (2..=5).contains(&token.len()) && token.chars().all(|ch| ch.is_ascii_uppercase())
}
