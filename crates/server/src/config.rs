use std::fs;
use std::path::{Path, PathBuf};

use reconcile::SchedulePolicy;
use serde::{Deserialize, Serialize};

const CONFIG_ENV: &str = "PLEXBACK_CONFIG";
const CONFIG_FILE_NAME: &str = "plexback.toml";

const DEFAULT_PORT: u16 = 9847;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
const DEFAULT_BACKUP_COOLDOWN_SECS: u64 = 300;
const DEFAULT_EXTRACT_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub backup_log_path: PathBuf,
    pub backup_script_path: PathBuf,
    pub poll_interval_secs: u64,
    pub backup_cooldown_secs: u64,
    pub extract_timeout_secs: u64,
    pub schedule: SchedulePolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            data_dir: PathBuf::from("data"),
            backup_log_path: PathBuf::from("/var/log/plex-backup.log"),
            backup_script_path: PathBuf::from("/usr/local/bin/backup-plex.sh"),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            backup_cooldown_secs: DEFAULT_BACKUP_COOLDOWN_SECS,
            extract_timeout_secs: DEFAULT_EXTRACT_TIMEOUT_SECS,
            schedule: SchedulePolicy::default(),
        }
    }
}

impl ServerConfig {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("plexback.sqlite")
    }

    pub fn stats_cache_path(&self) -> PathBuf {
        self.data_dir.join("plex-backup-stats.txt")
    }
}

#[derive(Debug, Clone)]
pub struct ConfigLoad {
    pub config: ServerConfig,
    pub created: bool,
}

pub fn resolve_config_path() -> PathBuf {
    match std::env::var_os(CONFIG_ENV) {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => PathBuf::from(CONFIG_FILE_NAME),
    }
}

pub fn load_or_create(path: &Path) -> Result<ConfigLoad, String> {
    if path.exists() {
        let contents = fs::read_to_string(path)
            .map_err(|err| format!("read config {}: {}", path.display(), err))?;
        let config: ServerConfig = toml::from_str(&contents)
            .map_err(|err| format!("parse config {}: {}", path.display(), err))?;
        return Ok(ConfigLoad {
            config,
            created: false,
        });
    }

    let config = ServerConfig::default();
    let contents =
        toml::to_string_pretty(&config).map_err(|err| format!("serialize config: {}", err))?;
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .map_err(|err| format!("create config dir {}: {}", parent.display(), err))?;
    }
    fs::write(path, contents).map_err(|err| format!("write config {}: {}", path.display(), err))?;
    Ok(ConfigLoad {
        config,
        created: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;

    #[test]
    fn load_or_create_writes_defaults_once() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("plexback.toml");

        let first = load_or_create(&path).expect("create");
        assert!(first.created);
        assert_eq!(first.config.port, DEFAULT_PORT);

        let second = load_or_create(&path).expect("reload");
        assert!(!second.created);
        assert_eq!(second.config.backup_cooldown_secs, 300);
        assert_eq!(second.config.schedule.snapshot_weekday, Weekday::Sun);
    }

    #[test]
    fn partial_config_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("plexback.toml");
        fs::write(&path, "port = 8080\nbackup_cooldown_secs = 10\n").expect("write config");

        let loaded = load_or_create(&path).expect("load");
        assert_eq!(loaded.config.port, 8080);
        assert_eq!(loaded.config.backup_cooldown_secs, 10);
        assert_eq!(
            loaded.config.backup_log_path,
            PathBuf::from("/var/log/plex-backup.log")
        );
        assert_eq!(loaded.config.schedule, SchedulePolicy::default());
    }

    #[test]
    fn schedule_overrides_parse_from_toml() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("plexback.toml");
        fs::write(
            &path,
            "[schedule]\nmirror_time = \"02:00:00\"\nsnapshot_weekday = \"Sat\"\n",
        )
        .expect("write config");

        let loaded = load_or_create(&path).expect("load");
        assert_eq!(
            loaded.config.schedule.mirror_time,
            chrono::NaiveTime::from_hms_opt(2, 0, 0).expect("time")
        );
        assert_eq!(loaded.config.schedule.snapshot_weekday, Weekday::Sat);
    }
}
