use std::path::Path;

use chrono::NaiveDate;
use plexback_core::{
    BackupKind, BackupRun, BackupStatus, BackupSummary, DailySize, KindCount, NewBackupRun,
    TriggeredBy, day_bounds,
};
use rusqlite::{Connection, OptionalExtension, Row, params};

pub const MIGRATION_0001: &str = include_str!("../migrations/0001_init.sql");

pub const MIGRATIONS: &[(&str, &str)] = &[("0001_init", MIGRATION_0001)];

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, DbError>;

pub struct Db {
    conn: Connection,
}

impl Db {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "temp_store", "MEMORY")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self { conn })
    }

    pub fn migrate(&mut self) -> Result<()> {
        let tx = self.conn.transaction()?;
        for (_name, sql) in MIGRATIONS {
            tx.execute_batch(sql)?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn insert_run(&self, run: &NewBackupRun) -> Result<BackupRun> {
        self.conn.execute(
            r#"
            INSERT INTO backup_run (kind, status, started_at, triggered_by)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                run.kind.as_str(),
                run.status.as_str(),
                run.started_at,
                run.triggered_by.as_str(),
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_run(id)?
            .ok_or(DbError::Sqlite(rusqlite::Error::QueryReturnedNoRows))
    }

    /// Inserts a batch of runs in one transaction so readers never observe a
    /// partially imported tracking file.
    pub fn insert_runs(&mut self, runs: &[NewBackupRun]) -> Result<usize> {
        if runs.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.transaction()?;
        let mut inserted = 0usize;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO backup_run (kind, status, started_at, triggered_by)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            )?;
            for run in runs {
                stmt.execute(params![
                    run.kind.as_str(),
                    run.status.as_str(),
                    run.started_at,
                    run.triggered_by.as_str(),
                ])?;
                inserted += 1;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    pub fn get_run(&self, id: i64) -> Result<Option<BackupRun>> {
        self.conn
            .query_row(
                &format!("{} WHERE id = ?1", SELECT_RUN),
                params![id],
                row_to_backup_run,
            )
            .optional()
            .map_err(DbError::from)
    }

    /// Dedup lookup: first run of the given kind whose start falls on the day.
    pub fn find_run_on_day(&self, day: NaiveDate, kind: BackupKind) -> Result<Option<BackupRun>> {
        let (start, end) = day_bounds(day);
        self.conn
            .query_row(
                &format!(
                    "{} WHERE kind = ?1 AND started_at >= ?2 AND started_at < ?3 \
                     ORDER BY started_at ASC LIMIT 1",
                    SELECT_RUN
                ),
                params![kind.as_str(), start, end],
                row_to_backup_run,
            )
            .optional()
            .map_err(DbError::from)
    }

    pub fn latest_running(&self, triggered_by: TriggeredBy) -> Result<Option<BackupRun>> {
        self.conn
            .query_row(
                &format!(
                    "{} WHERE status = 'running' AND triggered_by = ?1 \
                     ORDER BY started_at DESC, id DESC LIMIT 1",
                    SELECT_RUN
                ),
                params![triggered_by.as_str()],
                row_to_backup_run,
            )
            .optional()
            .map_err(DbError::from)
    }

    pub fn recent_runs(&self, limit: u32) -> Result<Vec<BackupRun>> {
        let mut stmt = self.conn.prepare(&format!(
            "{} ORDER BY started_at DESC, id DESC LIMIT ?1",
            SELECT_RUN
        ))?;
        let rows = stmt
            .query_map(params![limit], row_to_backup_run)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Backfills stats extracted from the transcript. Each field is written
    /// only while still NULL so a later partial match can never clobber data
    /// already on the record. Returns whether anything changed.
    pub fn fill_run_stats(
        &mut self,
        id: i64,
        total_size_bytes: Option<i64>,
        transferred_bytes: Option<i64>,
        completion: Option<(&str, f64)>,
    ) -> Result<bool> {
        let tx = self.conn.transaction()?;
        let mut changed = 0usize;
        if let Some(total) = total_size_bytes {
            changed += tx.execute(
                "UPDATE backup_run SET total_size_bytes = ?1 \
                 WHERE id = ?2 AND total_size_bytes IS NULL",
                params![total, id],
            )?;
        }
        if let Some(sent) = transferred_bytes {
            changed += tx.execute(
                "UPDATE backup_run SET transferred_bytes = ?1 \
                 WHERE id = ?2 AND transferred_bytes IS NULL",
                params![sent, id],
            )?;
        }
        if let Some((finished_at, duration_seconds)) = completion {
            changed += tx.execute(
                "UPDATE backup_run SET finished_at = ?1, duration_seconds = ?2 \
                 WHERE id = ?3 AND duration_seconds IS NULL",
                params![finished_at, duration_seconds, id],
            )?;
        }
        tx.commit()?;
        Ok(changed > 0)
    }

    /// Transitions a running record to its terminal state.
    pub fn finish_run(
        &self,
        id: i64,
        status: BackupStatus,
        finished_at: &str,
        duration_seconds: f64,
        raw_output: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            r#"
            UPDATE backup_run
            SET status = ?1, finished_at = ?2, duration_seconds = ?3,
                raw_output = ?4, error_message = ?5
            WHERE id = ?6
            "#,
            params![
                status.as_str(),
                finished_at,
                duration_seconds,
                raw_output,
                error_message,
                id
            ],
        )?;
        Ok(())
    }

    /// Marks a record failed before its process ever ran (spawn failure).
    pub fn fail_run(&self, id: i64, finished_at: &str, error_message: &str) -> Result<()> {
        self.conn.execute(
            r#"
            UPDATE backup_run
            SET status = 'failure', finished_at = ?1, error_message = ?2
            WHERE id = ?3
            "#,
            params![finished_at, error_message, id],
        )?;
        Ok(())
    }

    pub fn summary(&self, since: &str) -> Result<BackupSummary> {
        let total_backups: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM backup_run WHERE started_at >= ?1",
            params![since],
            |row| row.get(0),
        )?;
        let success_count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM backup_run WHERE started_at >= ?1 AND status = 'success'",
            params![since],
            |row| row.get(0),
        )?;
        let failure_count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM backup_run WHERE started_at >= ?1 AND status = 'failure'",
            params![since],
            |row| row.get(0),
        )?;
        let success_rate = if total_backups > 0 {
            let rate = success_count as f64 / total_backups as f64 * 100.0;
            (rate * 10.0).round() / 10.0
        } else {
            0.0
        };
        let last_run = self
            .conn
            .query_row(
                &format!(
                    "{} WHERE status != 'running' ORDER BY started_at DESC, id DESC LIMIT 1",
                    SELECT_RUN
                ),
                [],
                row_to_backup_run,
            )
            .optional()?;
        let latest_size_bytes: Option<i64> = self
            .conn
            .query_row(
                r#"
                SELECT total_size_bytes FROM backup_run
                WHERE status = 'success' AND total_size_bytes IS NOT NULL
                ORDER BY started_at DESC LIMIT 1
                "#,
                [],
                |row| row.get(0),
            )
            .optional()?;
        let avg_duration_seconds: Option<f64> = self.conn.query_row(
            r#"
            SELECT AVG(duration_seconds) FROM backup_run
            WHERE started_at >= ?1 AND status = 'success' AND duration_seconds IS NOT NULL
            "#,
            params![since],
            |row| row.get(0),
        )?;
        Ok(BackupSummary {
            total_backups: total_backups.max(0) as u64,
            success_count: success_count.max(0) as u64,
            failure_count: failure_count.max(0) as u64,
            success_rate,
            last_run,
            latest_size_bytes,
            avg_duration_seconds: avg_duration_seconds.map(|value| value.round()),
        })
    }

    pub fn counts_by_kind(&self, since: &str) -> Result<Vec<KindCount>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT kind, COUNT(*) FROM backup_run
            WHERE started_at >= ?1
            GROUP BY kind
            ORDER BY kind
            "#,
        )?;
        let rows = stmt
            .query_map(params![since], |row| {
                let kind: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                Ok((kind, count))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows
            .into_iter()
            .filter_map(|(kind, count)| {
                BackupKind::parse(&kind).map(|kind| KindCount {
                    kind,
                    count: count.max(0) as u64,
                })
            })
            .collect())
    }

    /// Largest successful backup size per calendar day, for the size chart.
    pub fn daily_sizes(&self, since: &str) -> Result<Vec<DailySize>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT substr(started_at, 1, 10) AS day, MAX(total_size_bytes)
            FROM backup_run
            WHERE started_at >= ?1 AND status = 'success' AND total_size_bytes IS NOT NULL
            GROUP BY day
            ORDER BY day
            "#,
        )?;
        let rows = stmt
            .query_map(params![since], |row| {
                Ok(DailySize {
                    day: row.get(0)?,
                    size_bytes: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn count_runs(&self) -> Result<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM backup_run", [], |row| row.get(0))
            .map_err(DbError::from)
    }
}

const SELECT_RUN: &str = r#"
SELECT id, kind, status, started_at, finished_at, duration_seconds,
       total_size_bytes, transferred_bytes, error_message, raw_output, triggered_by
FROM backup_run
"#;

fn row_to_backup_run(row: &Row<'_>) -> std::result::Result<BackupRun, rusqlite::Error> {
    let kind: String = row.get(1)?;
    let status: String = row.get(2)?;
    let triggered_by: String = row.get(10)?;
    Ok(BackupRun {
        id: row.get(0)?,
        kind: BackupKind::parse(&kind).ok_or_else(|| bad_column(1, &kind))?,
        status: BackupStatus::parse(&status).ok_or_else(|| bad_column(2, &status))?,
        started_at: row.get(3)?,
        finished_at: row.get(4)?,
        duration_seconds: row.get(5)?,
        total_size_bytes: row.get(6)?,
        transferred_bytes: row.get(7)?,
        error_message: row.get(8)?,
        raw_output: row.get(9)?,
        triggered_by: TriggeredBy::parse(&triggered_by).ok_or_else(|| bad_column(10, &triggered_by))?,
    })
}

fn bad_column(index: usize, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        rusqlite::types::Type::Text,
        format!("unrecognized value: {}", value).into(),
    )
}
