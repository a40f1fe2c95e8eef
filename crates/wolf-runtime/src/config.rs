use std::fs;
use std::path::{Path, PathBuf};

use log::*;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// The name of the runtime's config file, looked up next to the runtime.
pub const CONFIG_FILE_NAME: &str = "wolf.json";

/// Where log files go when the config doesn't say, relative to the runtime.
pub const DEFAULT_LOG_DIR: &str = "log";

/// How much a logger records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<Verbosity> for LevelFilter {
    fn from(value: Verbosity) -> Self {
        match value {
            Verbosity::Off => LevelFilter::Off,
            Verbosity::Error => LevelFilter::Error,
            Verbosity::Warn => LevelFilter::Warn,
            Verbosity::Info => LevelFilter::Info,
            Verbosity::Debug => LevelFilter::Debug,
            Verbosity::Trace => LevelFilter::Trace,
        }
    }
}

/// User-editable runtime settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// The level the log file is written at.
    pub log_level: Verbosity,

    /// The level the terminal logs at, when the game has one attached.
    pub terminal_log_level: Verbosity,

    /// Where log files go. Relative paths are resolved against the runtime's
    /// directory. Defaults to [DEFAULT_LOG_DIR].
    pub log_dir: Option<PathBuf>,

    /// The number of lines the console keeps before dropping the oldest.
    pub console_buffer_limit: usize,

    /// Whether every bitfield monitor is checked automatically on each game
    /// tick, in addition to explicit update calls.
    pub poll_monitors_on_tick: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            log_level: Verbosity::Info,
            terminal_log_level: Verbosity::Warn,
            log_dir: None,
            console_buffer_limit: 200,
            poll_monitors_on_tick: false,
        }
    }
}

impl RuntimeConfig {
    /// Loads the config from `path`.
    ///
    /// A missing file yields the defaults silently. A file that can't be read
    /// or parsed also yields the defaults, with a warning, since a broken
    /// config shouldn't keep every mod from loading.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::try_load(path) {
            Ok(config) => config,
            Err(err) if err.is_not_found() => Default::default(),
            Err(err) => {
                warn!("Ignoring {}: {err}", path.display());
                Default::default()
            }
        }
    }

    /// Loads the config from `path`, surfacing any error.
    pub fn try_load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(json::from_str(&content)?)
    }

    /// The directory log files are written to for a runtime loaded from
    /// `runtime_dir`.
    pub fn log_directory(&self, runtime_dir: impl AsRef<Path>) -> PathBuf {
        let log_dir = self.log_dir.as_deref().unwrap_or(Path::new(DEFAULT_LOG_DIR));
        runtime_dir.as_ref().join(log_dir)
    }

    /// Writes the config to `path` as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, json::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = RuntimeConfig::load(dir.path().join(CONFIG_FILE_NAME));
        assert_eq!(config, RuntimeConfig::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, r#"{ "poll_monitors_on_tick": true, "log_level": "debug" }"#).unwrap();

        let config = RuntimeConfig::load(&path);
        assert!(config.poll_monitors_on_tick);
        assert_eq!(config.log_level, Verbosity::Debug);
        assert_eq!(config.console_buffer_limit, 200);
    }

    #[test]
    fn test_malformed_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "{ not json").unwrap();

        assert!(RuntimeConfig::try_load(&path).is_err());
        assert_eq!(RuntimeConfig::load(&path), RuntimeConfig::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let config = RuntimeConfig {
            console_buffer_limit: 50,
            ..Default::default()
        };
        config.save(&path).unwrap();
        assert_eq!(RuntimeConfig::try_load(&path).unwrap(), config);
    }

    #[test]
    fn test_log_directory() {
        let runtime_dir = Path::new("game").join("wolf");
        let mut config = RuntimeConfig::default();
        assert_eq!(config.log_directory(&runtime_dir), runtime_dir.join(DEFAULT_LOG_DIR));

        config.log_dir = Some(PathBuf::from("logs/runtime"));
        assert_eq!(config.log_directory(&runtime_dir), runtime_dir.join("logs/runtime"));

        let absolute = std::env::temp_dir().join("wolf-logs");
        config.log_dir = Some(absolute.clone());
        assert_eq!(config.log_directory(&runtime_dir), absolute);
    }

    #[test]
    fn test_terminal_level_is_separate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, r#"{ "terminal_log_level": "off" }"#).unwrap();

        let config = RuntimeConfig::load(&path);
        assert_eq!(config.terminal_log_level, Verbosity::Off);
        assert_eq!(config.log_level, Verbosity::Info);
        assert_eq!(LevelFilter::from(config.terminal_log_level), LevelFilter::Off);
    }
}
