use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use chrono::NaiveDateTime;
use plexback_core::{BackupKind, BackupStatus, format_instant};
use plexback_db::Db;
use regex::Regex;

use crate::dates::parse_log_date;
use crate::types::Result;

static BACKUP_START_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"=== Plex Backup Started: (.+?) ===").expect("valid regex"));
static BACKUP_SUCCESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"=== Plex Backup Completed Successfully: (.+?) ===").expect("valid regex")
});
static BACKUP_FAILED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"=== Plex Backup FAILED with code (\d+): (.+?) ===").expect("valid regex")
});
static SENT_BYTES_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"sent ([\d,]+) bytes\s+received ([\d,]+) bytes").expect("valid regex")
});
static TOTAL_SIZE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"total size is ([\d,]+)\s+speedup is").expect("valid regex"));

/// One completed run reassembled from the marker stream.
#[derive(Debug, Clone, PartialEq)]
struct RunEvent {
    start: Option<NaiveDateTime>,
    end: Option<NaiveDateTime>,
    status: BackupStatus,
    transferred_bytes: Option<i64>,
    total_size_bytes: Option<i64>,
}

#[derive(Debug, Default)]
struct OpenEvent {
    start: Option<NaiveDateTime>,
    transferred_bytes: Option<i64>,
    total_size_bytes: Option<i64>,
}

impl OpenEvent {
    fn close(self, end: Option<NaiveDateTime>, status: BackupStatus) -> RunEvent {
        RunEvent {
            start: self.start,
            end,
            status,
            transferred_bytes: self.transferred_bytes,
            total_size_bytes: self.total_size_bytes,
        }
    }
}

/// Reads the extracted cache and backfills stats onto matching mirror
/// records. Fields already populated on a record are left untouched, so a
/// later partial match can never clobber accurate data. Returns the number
/// of records actually modified. A missing or empty cache enriches nothing.
pub fn enrich_from_stats(db: &mut Db, cache_path: &Path) -> Result<usize> {
    let Ok(text) = fs::read_to_string(cache_path) else {
        return Ok(0);
    };
    if text.trim().is_empty() {
        return Ok(0);
    }

    let mut updated = 0usize;
    for event in collect_events(&text) {
        let Some(start) = event.start else {
            continue;
        };
        let Some(run) = db.find_run_on_day(start.date(), BackupKind::DailyMirror)? else {
            continue;
        };
        let completion = event
            .end
            .map(|end| (format_instant(end), (end - start).num_seconds() as f64));
        let changed = db.fill_run_stats(
            run.id,
            event.total_size_bytes,
            event.transferred_bytes,
            completion
                .as_ref()
                .map(|(finished_at, duration)| (finished_at.as_str(), *duration)),
        )?;
        if changed {
            updated += 1;
        }
    }
    Ok(updated)
}

/// Flat marker stream -> run events, via a single open-event accumulator. A
/// start banner always opens a fresh accumulator, discarding any unclosed
/// one (truncated caches leave dangling starts behind). The sent/total
/// counters keep the last occurrence: a snapshot-day run invokes rsync
/// twice and the second summary is the one that matches the mirror.
fn collect_events(text: &str) -> Vec<RunEvent> {
    let mut events = Vec::new();
    let mut current: Option<OpenEvent> = None;

    for line in text.lines() {
        if let Some(caps) = BACKUP_START_RE.captures(line) {
            current = Some(OpenEvent {
                start: parse_log_date(&caps[1]),
                ..OpenEvent::default()
            });
            continue;
        }
        let Some(open) = current.as_mut() else {
            continue;
        };
        if let Some(caps) = SENT_BYTES_RE.captures(line) {
            if let Some(value) = parse_grouped_int(&caps[1]) {
                open.transferred_bytes = Some(value);
            }
            continue;
        }
        if let Some(caps) = TOTAL_SIZE_RE.captures(line) {
            if let Some(value) = parse_grouped_int(&caps[1]) {
                open.total_size_bytes = Some(value);
            }
            continue;
        }
        if let Some(caps) = BACKUP_SUCCESS_RE.captures(line) {
            let end = parse_log_date(&caps[1]);
            if let Some(open) = current.take() {
                events.push(open.close(end, BackupStatus::Success));
            }
            continue;
        }
        if let Some(caps) = BACKUP_FAILED_RE.captures(line) {
            let end = parse_log_date(&caps[2]);
            if let Some(open) = current.take() {
                events.push(open.close(end, BackupStatus::Failure));
            }
        }
    }
    events
}

/// Parses an integer with thousands separators, e.g. `24,265,611`.
fn parse_grouped_int(value: &str) -> Option<i64> {
    value.replace(',', "").parse().ok()
}
