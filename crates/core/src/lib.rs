use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Storage format for instants: timezone-naive local time, lexicographically
/// sortable, so day-range queries work on plain string comparison.
pub const INSTANT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

pub fn format_instant(instant: NaiveDateTime) -> String {
    instant.format(INSTANT_FORMAT).to_string()
}

pub fn parse_instant(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, INSTANT_FORMAT).ok()
}

/// Half-open [start, end) bounds covering one calendar day.
pub fn day_bounds(day: NaiveDate) -> (String, String) {
    let start = day.and_hms_opt(0, 0, 0).expect("midnight is valid");
    let end = day
        .succ_opt()
        .unwrap_or(day)
        .and_hms_opt(0, 0, 0)
        .expect("midnight is valid");
    (format_instant(start), format_instant(end))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupKind {
    DailyMirror,
    Snapshot,
    Cleanup,
    ScriptBackup,
    Manual,
}

impl BackupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DailyMirror => "daily_mirror",
            Self::Snapshot => "snapshot",
            Self::Cleanup => "cleanup",
            Self::ScriptBackup => "script_backup",
            Self::Manual => "manual",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "daily_mirror" => Some(Self::DailyMirror),
            "snapshot" => Some(Self::Snapshot),
            "cleanup" => Some(Self::Cleanup),
            "script_backup" => Some(Self::ScriptBackup),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    Running,
    Success,
    Failure,
}

impl BackupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "failure" => Some(Self::Failure),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggeredBy {
    Scheduled,
    Manual,
}

impl TriggeredBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Manual => "manual",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "scheduled" => Some(Self::Scheduled),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

/// One backup attempt as stored in the history table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRun {
    pub id: i64,
    pub kind: BackupKind,
    pub status: BackupStatus,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub duration_seconds: Option<f64>,
    pub total_size_bytes: Option<i64>,
    pub transferred_bytes: Option<i64>,
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<String>,
    pub triggered_by: TriggeredBy,
}

/// Insert payload for a new run. Records imported from logs are already
/// terminal; records created by the trigger path start out running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBackupRun {
    pub kind: BackupKind,
    pub status: BackupStatus,
    pub started_at: String,
    pub triggered_by: TriggeredBy,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackupSummary {
    pub total_backups: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub success_rate: f64,
    pub last_run: Option<BackupRun>,
    pub latest_size_bytes: Option<i64>,
    pub avg_duration_seconds: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KindCount {
    pub kind: BackupKind,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySize {
    pub day: String,
    pub size_bytes: i64,
}

pub fn format_bytes(n: i64) -> String {
    if n.abs() < 1024 {
        return format!("{} B", n);
    }
    let mut value = n as f64;
    for unit in ["KB", "MB", "GB", "TB"] {
        value /= 1024.0;
        if value.abs() < 1024.0 {
            return format!("{:.1} {}", value, unit);
        }
    }
    format!("{:.1} PB", value / 1024.0)
}

pub fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    if total < 60 {
        return format!("{}s", total);
    }
    let (minutes, secs) = (total / 60, total % 60);
    if minutes < 60 {
        return format!("{}m {}s", minutes, secs);
    }
    let (hours, minutes) = (minutes / 60, minutes % 60);
    format!("{}h {}m {}s", hours, minutes, secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instant_round_trips_through_storage_format() {
        let parsed = parse_instant("2024-06-02T03:00:00").expect("parse");
        assert_eq!(format_instant(parsed), "2024-06-02T03:00:00");
    }

    #[test]
    fn day_bounds_cover_the_whole_day() {
        let day = NaiveDate::from_ymd_opt(2024, 6, 2).expect("date");
        let (start, end) = day_bounds(day);
        assert_eq!(start, "2024-06-02T00:00:00");
        assert_eq!(end, "2024-06-03T00:00:00");
        assert!(start.as_str() <= "2024-06-02T03:00:00");
        assert!("2024-06-02T03:00:00" < end.as_str());
    }

    #[test]
    fn kind_strings_round_trip() {
        for kind in [
            BackupKind::DailyMirror,
            BackupKind::Snapshot,
            BackupKind::Cleanup,
            BackupKind::ScriptBackup,
            BackupKind::Manual,
        ] {
            assert_eq!(BackupKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(BackupKind::parse("weekly"), None);
    }

    #[test]
    fn format_bytes_picks_a_sensible_unit() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(50_000_000), "47.7 MB");
    }

    #[test]
    fn format_duration_splits_units() {
        assert_eq!(format_duration(42.0), "42s");
        assert_eq!(format_duration(720.0), "12m 0s");
        assert_eq!(format_duration(3723.0), "1h 2m 3s");
    }
}
