use std::path::{Path, PathBuf};
use std::time::Duration;

use plexback_db::Db;

use crate::enrich::enrich_from_stats;
use crate::extract::extract_stats_file;
use crate::tracking::{SchedulePolicy, import_tracking_file};
use crate::types::{ReconcileStats, Result};

/// The backup script writes its one-line-per-day results next to the main
/// transcript: `plex-backup.log` -> `plex-backup-tracking.log`.
pub fn tracking_path_for(log_path: &Path) -> PathBuf {
    let name = log_path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();
    match name.strip_suffix(".log") {
        Some(stem) => log_path.with_file_name(format!("{}-tracking.log", stem)),
        None => log_path.with_file_name(format!("{}-tracking", name)),
    }
}

/// Startup pass: import the tracking file, then enrich from whatever cache a
/// previous extraction left behind. Never re-extracts; scanning the full
/// transcript is too expensive to sit on the startup path.
pub fn reconcile_full(
    db: &mut Db,
    log_path: &Path,
    cache_path: &Path,
    policy: &SchedulePolicy,
) -> Result<ReconcileStats> {
    let tracking_path = tracking_path_for(log_path);
    let imported = import_tracking_file(db, &tracking_path, policy)?;
    let enriched = enrich_from_stats(db, cache_path)?;
    Ok(ReconcileStats { imported, enriched })
}

/// Poll-tick pass: import the tracking file, and only when that produced new
/// records run a fresh extraction and enrich from it. The transcript only
/// grows when a scheduled run completed, so no new tracking entries means no
/// reason to rescan gigabytes of text.
pub fn reconcile_incremental(
    db: &mut Db,
    log_path: &Path,
    cache_path: &Path,
    policy: &SchedulePolicy,
    extract_timeout: Duration,
) -> Result<ReconcileStats> {
    let tracking_path = tracking_path_for(log_path);
    let imported = import_tracking_file(db, &tracking_path, policy)?;
    let mut enriched = 0;
    if imported > 0 && extract_stats_file(log_path, cache_path, extract_timeout).is_some() {
        enriched = enrich_from_stats(db, cache_path)?;
    }
    Ok(ReconcileStats { imported, enriched })
}
