use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use plexback_core::{BackupKind, BackupStatus, TriggeredBy};
use plexback_db::Db;
use reconcile::{
    SchedulePolicy, enrich_from_stats, extract_stats_file, import_tracking_file, reconcile_full,
    reconcile_incremental,
};
use tempfile::{TempDir, tempdir};

struct TestEnv {
    _dir: TempDir,
    db: Db,
    log_path: PathBuf,
    tracking_path: PathBuf,
    cache_path: PathBuf,
}

fn setup() -> TestEnv {
    let dir = tempdir().expect("temp dir");
    let db_path = dir.path().join("history.sqlite");
    let mut db = Db::open(&db_path).expect("open db");
    db.migrate().expect("migrate db");
    TestEnv {
        log_path: dir.path().join("plex-backup.log"),
        tracking_path: dir.path().join("plex-backup-tracking.log"),
        cache_path: dir.path().join("plex-backup-stats.txt"),
        _dir: dir,
        db,
    }
}

fn write_tracking(path: &Path, lines: &[&str]) {
    let mut file = fs::File::create(path).expect("create tracking file");
    for line in lines {
        writeln!(file, "{}", line).expect("write line");
    }
}

#[test]
fn sunday_success_imports_mirror_snapshot_and_cleanup() {
    let mut env = setup();
    // 2024-06-02 is a Sunday.
    write_tracking(&env.tracking_path, &["2024-06-02:success"]);

    let inserted =
        import_tracking_file(&mut env.db, &env.tracking_path, &SchedulePolicy::default())
            .expect("import");
    assert_eq!(inserted, 3);

    let day = chrono::NaiveDate::from_ymd_opt(2024, 6, 2).expect("date");
    let mirror = env
        .db
        .find_run_on_day(day, BackupKind::DailyMirror)
        .expect("query")
        .expect("mirror");
    assert_eq!(mirror.started_at, "2024-06-02T03:00:00");
    assert_eq!(mirror.status, BackupStatus::Success);
    assert_eq!(mirror.triggered_by, TriggeredBy::Scheduled);

    let snapshot = env
        .db
        .find_run_on_day(day, BackupKind::Snapshot)
        .expect("query")
        .expect("snapshot");
    assert_eq!(snapshot.started_at, "2024-06-02T03:30:00");
    assert_eq!(snapshot.status, BackupStatus::Success);

    let cleanup = env
        .db
        .find_run_on_day(day, BackupKind::Cleanup)
        .expect("query")
        .expect("cleanup");
    assert_eq!(cleanup.started_at, "2024-06-02T04:00:00");
    assert_eq!(cleanup.status, BackupStatus::Success);
}

#[test]
fn weekday_failure_imports_a_single_mirror_record() {
    let mut env = setup();
    // 2024-06-03 is a Monday.
    write_tracking(&env.tracking_path, &["2024-06-03:failed"]);

    let inserted =
        import_tracking_file(&mut env.db, &env.tracking_path, &SchedulePolicy::default())
            .expect("import");
    assert_eq!(inserted, 1);

    let day = chrono::NaiveDate::from_ymd_opt(2024, 6, 3).expect("date");
    let mirror = env
        .db
        .find_run_on_day(day, BackupKind::DailyMirror)
        .expect("query")
        .expect("mirror");
    assert_eq!(mirror.status, BackupStatus::Failure);
    assert!(
        env.db
            .find_run_on_day(day, BackupKind::Snapshot)
            .expect("query")
            .is_none()
    );
    assert!(
        env.db
            .find_run_on_day(day, BackupKind::Cleanup)
            .expect("query")
            .is_none()
    );
}

#[test]
fn sunday_failure_skips_companion_records() {
    let mut env = setup();
    write_tracking(&env.tracking_path, &["2024-06-02:failed"]);

    let inserted =
        import_tracking_file(&mut env.db, &env.tracking_path, &SchedulePolicy::default())
            .expect("import");
    assert_eq!(inserted, 1);
}

#[test]
fn importing_twice_inserts_nothing_new() {
    let mut env = setup();
    write_tracking(
        &env.tracking_path,
        &["2024-06-02:success", "2024-06-03:failed"],
    );

    let policy = SchedulePolicy::default();
    let first = import_tracking_file(&mut env.db, &env.tracking_path, &policy).expect("import");
    assert_eq!(first, 4);
    let second = import_tracking_file(&mut env.db, &env.tracking_path, &policy).expect("reimport");
    assert_eq!(second, 0);
    assert_eq!(env.db.count_runs().expect("count"), 4);
}

#[test]
fn malformed_lines_are_skipped_silently() {
    let mut env = setup();
    write_tracking(
        &env.tracking_path,
        &[
            "",
            "no colon here",
            "2024-13-40:success",
            "garbage:success",
            "2024-06-03:success",
        ],
    );

    let inserted =
        import_tracking_file(&mut env.db, &env.tracking_path, &SchedulePolicy::default())
            .expect("import");
    assert_eq!(inserted, 1);
}

#[test]
fn missing_tracking_file_imports_nothing() {
    let mut env = setup();
    let inserted =
        import_tracking_file(&mut env.db, &env.tracking_path, &SchedulePolicy::default())
            .expect("import");
    assert_eq!(inserted, 0);
}

#[test]
fn extract_then_enrich_backfills_the_mirror_record() {
    let mut env = setup();
    write_tracking(&env.tracking_path, &["2024-06-03:success"]);
    import_tracking_file(&mut env.db, &env.tracking_path, &SchedulePolicy::default())
        .expect("import");

    let transcript = "\
=== Plex Backup Started: Mon Jun 3 03:00:00 AM EDT 2024 ===
building file list ... done
sent 1,234 bytes  received 10,000,000 bytes  1,876.12 bytes/sec
total size is 50,000,000  speedup is 5.0
=== Plex Backup Completed Successfully: Mon Jun 3 03:12:00 AM EDT 2024 ===
";
    fs::write(&env.log_path, transcript).expect("write transcript");
    extract_stats_file(&env.log_path, &env.cache_path, Duration::from_secs(30))
        .expect("cache produced");

    let updated = enrich_from_stats(&mut env.db, &env.cache_path).expect("enrich");
    assert_eq!(updated, 1);

    let day = chrono::NaiveDate::from_ymd_opt(2024, 6, 3).expect("date");
    let mirror = env
        .db
        .find_run_on_day(day, BackupKind::DailyMirror)
        .expect("query")
        .expect("mirror");
    assert_eq!(mirror.transferred_bytes, Some(1234));
    assert_eq!(mirror.total_size_bytes, Some(50_000_000));
    assert_eq!(mirror.duration_seconds, Some(720.0));
    assert_eq!(mirror.finished_at.as_deref(), Some("2024-06-03T03:12:00"));
}

#[test]
fn enrich_never_overwrites_populated_fields() {
    let mut env = setup();
    write_tracking(&env.tracking_path, &["2024-06-03:success"]);
    import_tracking_file(&mut env.db, &env.tracking_path, &SchedulePolicy::default())
        .expect("import");

    let day = chrono::NaiveDate::from_ymd_opt(2024, 6, 3).expect("date");
    let mirror = env
        .db
        .find_run_on_day(day, BackupKind::DailyMirror)
        .expect("query")
        .expect("mirror");
    env.db
        .fill_run_stats(mirror.id, Some(123), None, None)
        .expect("seed size");

    let cache = "\
=== Plex Backup Started: Mon Jun 3 03:00:00 AM EDT 2024 ===
total size is 50,000,000  speedup is 5.0
=== Plex Backup Completed Successfully: Mon Jun 3 03:12:00 AM EDT 2024 ===
";
    fs::write(&env.cache_path, cache).expect("write cache");
    enrich_from_stats(&mut env.db, &env.cache_path).expect("enrich");

    let mirror = env.db.get_run(mirror.id).expect("get").expect("exists");
    assert_eq!(mirror.total_size_bytes, Some(123));
    // The still-missing completion fields were backfilled.
    assert_eq!(mirror.duration_seconds, Some(720.0));
}

#[test]
fn enrich_skips_events_with_no_matching_record() {
    let mut env = setup();
    let cache = "\
=== Plex Backup Started: Mon Jun 3 03:00:00 AM EDT 2024 ===
total size is 50,000,000  speedup is 5.0
=== Plex Backup Completed Successfully: Mon Jun 3 03:12:00 AM EDT 2024 ===
";
    fs::write(&env.cache_path, cache).expect("write cache");
    let updated = enrich_from_stats(&mut env.db, &env.cache_path).expect("enrich");
    assert_eq!(updated, 0);
}

#[test]
fn enrich_without_cache_is_a_no_op() {
    let mut env = setup();
    let updated = enrich_from_stats(&mut env.db, &env.cache_path).expect("enrich");
    assert_eq!(updated, 0);
}

#[test]
fn full_pass_uses_preexisting_cache_without_extracting() {
    let mut env = setup();
    write_tracking(&env.tracking_path, &["2024-06-03:success"]);
    let cache = "\
=== Plex Backup Started: Mon Jun 3 03:00:00 AM EDT 2024 ===
total size is 50,000,000  speedup is 5.0
=== Plex Backup Completed Successfully: Mon Jun 3 03:12:00 AM EDT 2024 ===
";
    fs::write(&env.cache_path, cache).expect("write cache");
    // No transcript on disk: full() must not need one.

    let stats = reconcile_full(
        &mut env.db,
        &env.log_path,
        &env.cache_path,
        &SchedulePolicy::default(),
    )
    .expect("full pass");
    assert_eq!(stats.imported, 1);
    assert_eq!(stats.enriched, 1);
}

#[test]
fn incremental_pass_extracts_only_when_new_records_appear() {
    let mut env = setup();
    write_tracking(&env.tracking_path, &["2024-06-03:success"]);
    let transcript = "\
=== Plex Backup Started: Mon Jun 3 03:00:00 AM EDT 2024 ===
total size is 50,000,000  speedup is 5.0
=== Plex Backup Completed Successfully: Mon Jun 3 03:12:00 AM EDT 2024 ===
";
    fs::write(&env.log_path, transcript).expect("write transcript");

    let policy = SchedulePolicy::default();
    let stats = reconcile_incremental(
        &mut env.db,
        &env.log_path,
        &env.cache_path,
        &policy,
        Duration::from_secs(30),
    )
    .expect("first tick");
    assert_eq!(stats.imported, 1);
    assert_eq!(stats.enriched, 1);
    assert!(env.cache_path.exists());

    // Second tick with no new tracking entries: the cache must not be
    // rewritten because extraction is skipped entirely.
    fs::remove_file(&env.cache_path).expect("drop cache");
    let stats = reconcile_incremental(
        &mut env.db,
        &env.log_path,
        &env.cache_path,
        &policy,
        Duration::from_secs(30),
    )
    .expect("second tick");
    assert_eq!(stats.imported, 0);
    assert_eq!(stats.enriched, 0);
    assert!(!env.cache_path.exists());
}
