use std::collections::HashSet;
use std::fs;
use std::path::Path;

use chrono::{Datelike, NaiveDate, NaiveTime, Weekday};
use plexback_core::{BackupKind, BackupStatus, NewBackupRun, TriggeredBy, format_instant};
use plexback_db::Db;
use serde::{Deserialize, Serialize};

use crate::types::Result;

/// When the cron jobs run. The defaults mirror the production schedule: the
/// daily mirror at 03:00, and on Sundays a snapshot at 03:30 followed by a
/// cleanup at 04:00.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulePolicy {
    pub mirror_time: NaiveTime,
    pub snapshot_time: NaiveTime,
    pub cleanup_time: NaiveTime,
    pub snapshot_weekday: Weekday,
}

impl Default for SchedulePolicy {
    fn default() -> Self {
        Self {
            mirror_time: NaiveTime::from_hms_opt(3, 0, 0).expect("valid time"),
            snapshot_time: NaiveTime::from_hms_opt(3, 30, 0).expect("valid time"),
            cleanup_time: NaiveTime::from_hms_opt(4, 0, 0).expect("valid time"),
            snapshot_weekday: Weekday::Sun,
        }
    }
}

const TRACKING_DATE_FORMAT: &str = "%Y-%m-%d";

/// Imports the lightweight tracking file (`YYYY-MM-DD:success|failed`, one
/// line per day) into the run history. Malformed lines are skipped; the
/// (day, kind) dedup check makes reprocessing the same file a no-op. All new
/// rows are committed in a single batch. Returns the number of rows inserted.
pub fn import_tracking_file(
    db: &mut Db,
    tracking_path: &Path,
    policy: &SchedulePolicy,
) -> Result<usize> {
    let Ok(text) = fs::read_to_string(tracking_path) else {
        return Ok(0);
    };

    let mut pending: Vec<NewBackupRun> = Vec::new();
    let mut seen: HashSet<(NaiveDate, BackupKind)> = HashSet::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((date_part, result)) = line.rsplit_once(':') else {
            continue;
        };
        let Ok(day) = NaiveDate::parse_from_str(date_part.trim(), TRACKING_DATE_FORMAT) else {
            continue;
        };
        let status = if result.trim() == "success" {
            BackupStatus::Success
        } else {
            BackupStatus::Failure
        };

        if !seen.insert((day, BackupKind::DailyMirror)) {
            continue;
        }
        if db.find_run_on_day(day, BackupKind::DailyMirror)?.is_some() {
            continue;
        }
        pending.push(scheduled_run(
            BackupKind::DailyMirror,
            status,
            day,
            policy.mirror_time,
        ));

        // Snapshot day: the weekly snapshot and cleanup jobs only ran if the
        // mirror itself succeeded.
        if day.weekday() == policy.snapshot_weekday && status == BackupStatus::Success {
            if seen.insert((day, BackupKind::Snapshot))
                && db.find_run_on_day(day, BackupKind::Snapshot)?.is_none()
            {
                pending.push(scheduled_run(
                    BackupKind::Snapshot,
                    BackupStatus::Success,
                    day,
                    policy.snapshot_time,
                ));
            }
            if seen.insert((day, BackupKind::Cleanup))
                && db.find_run_on_day(day, BackupKind::Cleanup)?.is_none()
            {
                pending.push(scheduled_run(
                    BackupKind::Cleanup,
                    BackupStatus::Success,
                    day,
                    policy.cleanup_time,
                ));
            }
        }
    }

    Ok(db.insert_runs(&pending)?)
}

fn scheduled_run(
    kind: BackupKind,
    status: BackupStatus,
    day: NaiveDate,
    time: NaiveTime,
) -> NewBackupRun {
    NewBackupRun {
        kind,
        status,
        started_at: format_instant(day.and_time(time)),
        triggered_by: TriggeredBy::Scheduled,
    }
}
