use anyhow::{Context, Result};
use clap::Parser;
use std::{env, path::PathBuf, str::FromStr, time::Duration};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub backups_root: PathBuf,
    pub staging_dir: PathBuf,
    pub system_files_root: PathBuf,
    pub system_mail_dir: Option<PathBuf>,
    pub poll_interval_secs: u64,
    pub command_timeout_secs: u64,
}

/// What the binary should do after loading its configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Serve,
    /// Apply the schema and exit.
    Migrate,
    /// Run due schedules once, wait for them and exit.
    RunOnce,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Backup scheduling, execution and restore service")]
pub struct Args {
    /// Host to bind to (overrides BACKUPD_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides BACKUPD_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides BACKUPD_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Directory holding one archive folder per owner (overrides BACKUPD_BACKUPS_ROOT)
    #[arg(long)]
    pub backups_root: Option<PathBuf>,

    /// Scratch space for staging and extraction (overrides BACKUPD_STAGING_DIR)
    #[arg(long)]
    pub staging_dir: Option<PathBuf>,

    /// Files copied by system backups (overrides BACKUPD_SYSTEM_FILES_ROOT)
    #[arg(long)]
    pub system_files_root: Option<PathBuf>,

    /// Mail spool included in system backups (overrides BACKUPD_SYSTEM_MAIL_DIR)
    #[arg(long)]
    pub system_mail_dir: Option<PathBuf>,

    /// Seconds between scheduler polls (overrides BACKUPD_POLL_INTERVAL_SECS)
    #[arg(long)]
    pub poll_interval_secs: Option<u64>,

    /// Timeout for each external command (overrides BACKUPD_COMMAND_TIMEOUT_SECS)
    #[arg(long)]
    pub command_timeout_secs: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,

    /// Run due schedules once and exit
    #[arg(long, conflicts_with = "migrate")]
    pub run_once: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and run mode.
    pub fn from_env_and_args() -> Result<(Self, Mode)> {
        Self::merge(Args::parse(), |key| env::var(key))
    }

    /// Merge `args` over the variables returned by `lookup` over defaults.
    pub fn merge(
        args: Args,
        lookup: impl Fn(&str) -> Result<String, env::VarError>,
    ) -> Result<(Self, Mode)> {
        let var = |key: &str| -> Result<Option<String>> {
            match lookup(key) {
                Ok(value) => Ok(Some(value)),
                Err(env::VarError::NotPresent) => Ok(None),
                Err(err) => Err(err).with_context(|| format!("reading {}", key)),
            }
        };
        let parsed = |key: &str| -> Result<Option<u64>> {
            var(key)?
                .map(|value| {
                    u64::from_str(&value)
                        .with_context(|| format!("parsing {} value `{}`", key, value))
                })
                .transpose()
        };

        let env_port = match var("BACKUPD_PORT")? {
            Some(value) => Some(
                value
                    .parse::<u16>()
                    .with_context(|| format!("parsing BACKUPD_PORT value `{}`", value))?,
            ),
            None => None,
        };

        // --- Merge ---
        let cfg = Self {
            host: args
                .host
                .or(var("BACKUPD_HOST")?)
                .unwrap_or_else(|| "0.0.0.0".into()),
            port: args.port.or(env_port).unwrap_or(8085),
            database_url: args
                .database_url
                .or(var("BACKUPD_DATABASE_URL")?)
                .unwrap_or_else(|| "sqlite://./data/backupd.db".into()),
            backups_root: args
                .backups_root
                .or(var("BACKUPD_BACKUPS_ROOT")?.map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from("./data/backups")),
            staging_dir: args
                .staging_dir
                .or(var("BACKUPD_STAGING_DIR")?.map(PathBuf::from))
                .unwrap_or_else(|| env::temp_dir().join("backupd")),
            system_files_root: args
                .system_files_root
                .or(var("BACKUPD_SYSTEM_FILES_ROOT")?.map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from("/etc")),
            system_mail_dir: args
                .system_mail_dir
                .or(var("BACKUPD_SYSTEM_MAIL_DIR")?.map(PathBuf::from)),
            poll_interval_secs: args
                .poll_interval_secs
                .or(parsed("BACKUPD_POLL_INTERVAL_SECS")?)
                .unwrap_or(60)
                .max(1),
            command_timeout_secs: args
                .command_timeout_secs
                .or(parsed("BACKUPD_COMMAND_TIMEOUT_SECS")?)
                .unwrap_or(3600)
                .max(1),
        };

        let mode = if args.migrate {
            Mode::Migrate
        } else if args.run_once {
            Mode::RunOnce
        } else {
            Mode::Serve
        };
        Ok((cfg, mode))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Result<String, env::VarError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned().ok_or(env::VarError::NotPresent)
    }

    #[test]
    fn defaults_apply_without_env_or_flags() {
        let (cfg, mode) = AppConfig::merge(Args::default(), lookup(&[])).unwrap();
        assert_eq!(cfg.addr(), "0.0.0.0:8085");
        assert_eq!(cfg.database_url, "sqlite://./data/backupd.db");
        assert_eq!(cfg.backups_root, PathBuf::from("./data/backups"));
        assert_eq!(cfg.system_files_root, PathBuf::from("/etc"));
        assert!(cfg.system_mail_dir.is_none());
        assert_eq!(cfg.poll_interval(), Duration::from_secs(60));
        assert_eq!(cfg.command_timeout(), Duration::from_secs(3600));
        assert_eq!(mode, Mode::Serve);
    }

    #[test]
    fn flags_override_env() {
        let args = Args {
            port: Some(9000),
            run_once: true,
            ..Args::default()
        };
        let (cfg, mode) = AppConfig::merge(
            args,
            lookup(&[
                ("BACKUPD_PORT", "7000"),
                ("BACKUPD_HOST", "127.0.0.1"),
                ("BACKUPD_SYSTEM_MAIL_DIR", "/var/mail"),
            ]),
        )
        .unwrap();
        assert_eq!(cfg.addr(), "127.0.0.1:9000");
        assert_eq!(cfg.system_mail_dir, Some(PathBuf::from("/var/mail")));
        assert_eq!(mode, Mode::RunOnce);
    }

    #[test]
    fn malformed_numbers_are_errors() {
        assert!(AppConfig::merge(Args::default(), lookup(&[("BACKUPD_PORT", "http")])).is_err());
        assert!(
            AppConfig::merge(
                Args::default(),
                lookup(&[("BACKUPD_COMMAND_TIMEOUT_SECS", "-1")])
            )
            .is_err()
        );
    }
}
