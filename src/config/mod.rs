// dbbackup/src/config/mod.rs
use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backup::target::ConnectionTarget;
use crate::scheduler::CronSchedule;

pub const DEFAULT_CONFIG_PATH: &str = "config.json";
pub const CONFIG_PATH_ENV: &str = "BACKUP_CONFIG";
pub const PASSWORD_ENV: &str = "DB_PASSWORD";
pub const DEFAULT_RETENTION_DAYS: u32 = 14;
pub const DEFAULT_DUMP_TOOL: &str = "mysqldump";

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

// Structs for deserializing config.json
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJsonConfig {
    pub enabled: Option<bool>,
    pub backup_dir: Option<PathBuf>,
    pub retention_days: Option<u32>,
    pub dump_tool_path: Option<String>,
    pub database_url: Option<String>,
    pub database_username: Option<String>,
    pub database_password: Option<String>,
    pub schedule: Option<String>,
    pub dump_timeout_secs: Option<u64>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for DatabaseCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Immutable backup settings, built once at startup and shared by reference.
#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub enabled: bool,
    pub backup_dir: PathBuf,
    pub retention: Duration,
    pub dump_tool_path: String,
    pub database_url: String,
    pub credentials: DatabaseCredentials,
    pub schedule: Option<String>,
    pub dump_timeout: Option<Duration>,
}

impl BackupConfig {
    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
        let raw: RawJsonConfig = serde_json::from_str(&config_content).with_context(|| {
            format!(
                "Failed to parse JSON from config file at {}",
                config_path.display()
            )
        })?;

        let password_from_env = env::var(PASSWORD_ENV).ok();
        Self::from_raw(raw, password_from_env)
    }

    /// Validates the raw config. `password_fallback` is used when the JSON has no password.
    pub fn from_raw(raw: RawJsonConfig, password_fallback: Option<String>) -> Result<Self> {
        let backup_dir = raw
            .backup_dir
            .context("backup_dir must be set in config.json")?;
        if backup_dir.as_os_str().is_empty() {
            anyhow::bail!("backup_dir cannot be empty in config.json.");
        }

        let database_url = raw
            .database_url
            .context("database_url must be set in config.json")?;
        // Fail at startup rather than on the first run.
        ConnectionTarget::parse(&database_url).context("database_url is not a supported MySQL locator")?;

        let username = raw
            .database_username
            .filter(|u| !u.trim().is_empty())
            .context("database_username must be set in config.json")?;
        let password = raw
            .database_password
            .or(password_fallback)
            .with_context(|| {
                format!(
                    "database_password must be set in config.json or via the {} environment variable",
                    PASSWORD_ENV
                )
            })?;

        let retention_days = raw.retention_days.unwrap_or(DEFAULT_RETENTION_DAYS);
        if retention_days == 0 {
            anyhow::bail!("retention_days must be at least 1.");
        }

        let dump_tool_path = raw
            .dump_tool_path
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DUMP_TOOL.to_string());

        let schedule = raw.schedule.filter(|s| !s.trim().is_empty());
        if let Some(expr) = &schedule {
            CronSchedule::parse(expr)
                .with_context(|| format!("schedule '{}' is not a valid cron expression", expr))?;
        }

        let dump_timeout = match raw.dump_timeout_secs {
            Some(0) => anyhow::bail!("dump_timeout_secs must be greater than zero when set."),
            Some(secs) => Some(Duration::from_secs(secs)),
            None => None,
        };

        Ok(BackupConfig {
            enabled: raw.enabled.unwrap_or(true),
            backup_dir,
            retention: Duration::from_secs(u64::from(retention_days) * SECONDS_PER_DAY),
            dump_tool_path,
            database_url,
            credentials: DatabaseCredentials { username, password },
            schedule,
            dump_timeout,
        })
    }

    /// Config file path: `--config <path>` beats `BACKUP_CONFIG`, which beats `config.json`.
    pub fn resolve_path(cli_override: Option<&str>) -> PathBuf {
        cli_override
            .map(PathBuf::from)
            .or_else(|| env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    pub fn retention_days(&self) -> u64 {
        self.retention.as_secs() / SECONDS_PER_DAY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: serde_json::Value) -> RawJsonConfig {
        serde_json::from_value(value).expect("valid raw config")
    }

    fn minimal() -> serde_json::Value {
        json!({
            "backup_dir": "/var/backups/library",
            "database_url": "jdbc:mysql://localhost:3306/library",
            "database_username": "root",
            "database_password": "secret"
        })
    }

    #[test]
    fn test_defaults_applied() -> anyhow::Result<()> {
        let config = BackupConfig::from_raw(raw(minimal()), None)?;

        assert!(config.enabled);
        assert_eq!(config.backup_dir, PathBuf::from("/var/backups/library"));
        assert_eq!(config.retention, Duration::from_secs(14 * 24 * 60 * 60));
        assert_eq!(config.retention_days(), 14);
        assert_eq!(config.dump_tool_path, "mysqldump");
        assert_eq!(config.schedule, None);
        assert_eq!(config.dump_timeout, None);
        Ok(())
    }

    #[test]
    fn test_full_config() -> anyhow::Result<()> {
        let config = BackupConfig::from_raw(
            raw(json!({
                "enabled": false,
                "backup_dir": "./backups",
                "retention_days": 30,
                "dump_tool_path": "/usr/bin/mysqldump",
                "database_url": "mysql://db.internal:3307/library",
                "database_username": "backup",
                "database_password": "pw",
                "schedule": "0 0 3 * * *",
                "dump_timeout_secs": 600
            })),
            None,
        )?;

        assert!(!config.enabled);
        assert_eq!(config.retention_days(), 30);
        assert_eq!(config.dump_tool_path, "/usr/bin/mysqldump");
        assert_eq!(config.schedule.as_deref(), Some("0 0 3 * * *"));
        assert_eq!(config.dump_timeout, Some(Duration::from_secs(600)));
        assert_eq!(config.credentials.username, "backup");
        Ok(())
    }

    #[test]
    fn test_password_falls_back_to_env_value() -> anyhow::Result<()> {
        let mut value = minimal();
        value.as_object_mut().unwrap().remove("database_password");

        let config = BackupConfig::from_raw(raw(value.clone()), Some("from-env".to_string()))?;
        assert_eq!(config.credentials.password, "from-env");

        assert!(BackupConfig::from_raw(raw(value), None).is_err());
        Ok(())
    }

    #[test]
    fn test_json_password_wins_over_env() -> anyhow::Result<()> {
        let config = BackupConfig::from_raw(raw(minimal()), Some("from-env".to_string()))?;
        assert_eq!(config.credentials.password, "secret");
        Ok(())
    }

    #[test]
    fn test_invalid_values_rejected() {
        let cases = [
            ("backup_dir", json!("")),
            ("database_url", json!("postgres://localhost/library")),
            ("database_url", json!("mysql://localhost")),
            ("database_username", json!("  ")),
            ("retention_days", json!(0)),
            ("schedule", json!("every tuesday")),
            ("dump_timeout_secs", json!(0)),
        ];

        for (key, bad) in cases {
            let mut value = minimal();
            value.as_object_mut().unwrap().insert(key.to_string(), bad.clone());
            assert!(
                BackupConfig::from_raw(raw(value), None).is_err(),
                "{} = {} should be rejected",
                key,
                bad
            );
        }
    }

    #[test]
    fn test_missing_required_keys() {
        for key in ["backup_dir", "database_url", "database_username"] {
            let mut value = minimal();
            value.as_object_mut().unwrap().remove(key);
            let err = BackupConfig::from_raw(raw(value), None).unwrap_err();
            assert!(err.to_string().contains(key), "error should name {}", key);
        }
    }

    #[test]
    fn test_debug_redacts_password() -> anyhow::Result<()> {
        let config = BackupConfig::from_raw(raw(minimal()), None)?;
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("<redacted>"));
        Ok(())
    }

    #[test]
    fn test_load_from_json_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.json");
        fs::write(&path, serde_json::to_string_pretty(&minimal())?)?;

        let config = BackupConfig::load_from_json(&path)?;
        assert_eq!(config.database_url, "jdbc:mysql://localhost:3306/library");

        let missing = BackupConfig::load_from_json(&dir.path().join("nope.json"));
        assert!(missing.unwrap_err().to_string().contains("Failed to read config file"));
        Ok(())
    }

    #[test]
    fn test_cli_override_wins() {
        assert_eq!(
            BackupConfig::resolve_path(Some("/etc/dbbackup.json")),
            PathBuf::from("/etc/dbbackup.json")
        );
    }
}
