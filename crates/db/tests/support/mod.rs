#![allow(dead_code)]

use std::path::PathBuf;

use plexback_core::{BackupKind, BackupStatus, NewBackupRun, TriggeredBy};
use plexback_db::Db;
use tempfile::TempDir;

pub struct TestDb {
    pub _dir: TempDir,
    pub db: Db,
    pub path: PathBuf,
}

pub fn setup_db() -> TestDb {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("test.sqlite");
    let mut db = Db::open(&path).expect("open db");
    db.migrate().expect("migrate db");
    TestDb {
        _dir: dir,
        db,
        path,
    }
}

pub fn make_run(kind: BackupKind, status: BackupStatus, started_at: &str) -> NewBackupRun {
    NewBackupRun {
        kind,
        status,
        started_at: started_at.to_string(),
        triggered_by: TriggeredBy::Scheduled,
    }
}

pub fn make_manual_running(started_at: &str) -> NewBackupRun {
    NewBackupRun {
        kind: BackupKind::Manual,
        status: BackupStatus::Running,
        started_at: started_at.to_string(),
        triggered_by: TriggeredBy::Manual,
    }
}
