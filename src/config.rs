use dirs::home_dir;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not determine the configuration directory")]
    NoConfigDirectory,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub enum LogLevel {
    #[serde(rename = "trace")]
    Trace,
    #[serde(rename = "debug")]
    Debug,
    #[serde(rename = "info")]
    Info,
    #[serde(rename = "warn")]
    #[default]
    Warn,
    #[serde(rename = "error")]
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,
    /// Write logs to `file_path` instead of stderr.
    #[serde(default = "default_file_output")]
    pub file_output: bool,
    #[serde(default = "default_log_file_path")]
    pub file_path: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: LogLevel::default(),
            file_output: default_file_output(),
            file_path: default_log_file_path(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    /// Driver used when `--driver` is not given.
    #[serde(default = "default_driver")]
    pub default_driver: String,
    /// 0 disables the query timeout.
    #[serde(default = "default_query_timeout_seconds")]
    pub query_timeout_seconds: u64,
    /// 0 disables cell truncation.
    #[serde(default = "default_truncate_chars")]
    pub truncate_chars: usize,
    /// 0 shows every row.
    #[serde(default)]
    pub max_rows: usize,
    /// Command definitions file, `<config dir>/commands.txt` when unset.
    #[serde(default)]
    pub commands_file: Option<String>,
    #[serde(default = "default_history_size")]
    pub history_size: usize,
    /// DSN name to connection URL, used with `--driver dsn`.
    #[serde(default)]
    pub dsn: HashMap<String, String>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            default_driver: default_driver(),
            query_timeout_seconds: default_query_timeout_seconds(),
            truncate_chars: default_truncate_chars(),
            max_rows: 0,
            commands_file: None,
            history_size: default_history_size(),
            dsn: HashMap::new(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_driver() -> String {
    "postgres".to_string()
}

fn default_query_timeout_seconds() -> u64 {
    30
}

fn default_truncate_chars() -> usize {
    100
}

fn default_history_size() -> usize {
    500
}

fn default_file_output() -> bool {
    false
}

fn default_log_file_path() -> String {
    match get_config_dir_impl() {
        Some(config_dir) => config_dir
            .join("logs")
            .join("sqlprompt.log")
            .to_string_lossy()
            .to_string(),
        None => "sqlprompt.log".to_string(),
    }
}

impl Config {
    /// `~/.config/sqlprompt`, created if missing.
    pub fn get_config_directory() -> Result<PathBuf, ConfigError> {
        let config_dir = get_config_dir_impl().ok_or(ConfigError::NoConfigDirectory)?;
        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)?;
        }
        Ok(config_dir)
    }

    /// Load `config.toml` from the configuration directory.
    pub fn load() -> Self {
        match get_config_dir_impl() {
            Some(dir) => Self::load_from_path(&dir.join("config.toml")),
            None => Config::default(),
        }
    }

    /// A missing file yields defaults. So does a broken one, after a warning.
    pub fn load_from_path(path: &Path) -> Self {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Config::default(),
            Err(e) => {
                eprintln!("Warning: cannot read {}: {e}. Using default configuration.", path.display());
                return Config::default();
            }
        };

        match Self::from_toml(&content) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {} ignored. {e}", path.display());
                Config::default()
            }
        }
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Where user command definitions are read from.
    pub fn commands_file_path(&self) -> Option<PathBuf> {
        match &self.commands_file {
            Some(path) => Some(expand_home(path)),
            None => get_config_dir_impl().map(|dir| dir.join("commands.txt")),
        }
    }

    pub fn history_file_path() -> Option<PathBuf> {
        Self::get_config_directory().ok().map(|dir| dir.join("history"))
    }
}

fn get_config_dir_impl() -> Option<PathBuf> {
    home_dir().map(|home| home.join(".config").join("sqlprompt"))
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;

    #[rstest]
    fn test_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.default_driver, "postgres");
        assert_eq!(config.query_timeout_seconds, 30);
        assert_eq!(config.truncate_chars, 100);
        assert_eq!(config.max_rows, 0);
        assert_eq!(config.history_size, 500);
        assert!(config.dsn.is_empty());
        assert_eq!(config.logging.level, LogLevel::Warn);
        assert!(!config.logging.file_output);
    }

    #[rstest]
    fn test_partial_file() {
        let config = Config::from_toml(
            r#"
default_driver = "mysql"
truncate_chars = 40
commands_file = "/etc/sqlprompt/commands.txt"

[dsn]
reporting = "postgres://reports.internal:5433/postgres"

[logging]
level = "debug"
file_output = true
file_path = "/tmp/sqlprompt.log"
"#,
        )
        .unwrap();

        assert_eq!(config.default_driver, "mysql");
        assert_eq!(config.truncate_chars, 40);
        assert_eq!(config.query_timeout_seconds, 30);
        assert_eq!(
            config.dsn.get("reporting").map(String::as_str),
            Some("postgres://reports.internal:5433/postgres")
        );
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.logging.file_path, "/tmp/sqlprompt.log");
        assert_eq!(
            config.commands_file_path(),
            Some(PathBuf::from("/etc/sqlprompt/commands.txt"))
        );
    }

    #[rstest]
    fn test_invalid_file_falls_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "truncate_chars = \"many\"").unwrap();
        assert!(Config::from_toml("truncate_chars = \"many\"").is_err());
        assert_eq!(Config::load_from_path(file.path()), Config::default());
    }

    #[rstest]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(Config::load_from_path(&dir.path().join("config.toml")), Config::default());
    }
}
