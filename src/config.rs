//! Configuration loading and persistence.
//!
//! Reads `config.json` from the sandbox-tty config directory and layers
//! `SANDBOX_TTY_*` environment variables on top. Endpoint credentials are
//! never stored here; they come from the caller per connection.

// Rust guideline compliant 2026-02

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{fmt, fs};

use crate::constants::{
    DEFAULT_AUTH_USER, DEFAULT_COLUMNS, DEFAULT_ROWS, EXEC_TIMEOUT, RECONNECT_DELAY,
    SHELL_SETTLE_DELAY,
};
use crate::exec::ExecOptions;
use crate::protocol::TerminalSize;
use crate::session::SessionOptions;

/// Environment variable that overrides the config directory.
pub const CONFIG_DIR_ENV: &str = "SANDBOX_TTY_CONFIG_DIR";

const CONFIG_FILE: &str = "config.json";

/// Configuration for the sandbox-tty client.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Delay before an automatic reconnect, in milliseconds.
    pub reconnect_delay_ms: u64,
    /// Delay between socket open and handshake for one-shot commands.
    pub settle_delay_ms: u64,
    /// Default time limit for one-shot commands.
    pub exec_timeout_ms: u64,
    /// Default terminal width.
    pub columns: u16,
    /// Default terminal height.
    pub rows: u16,
    /// Strip ANSI sequences from command output.
    pub strip_ansi: bool,
    /// Username paired with the endpoint secret.
    pub auth_user: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: duration_ms(RECONNECT_DELAY),
            settle_delay_ms: duration_ms(SHELL_SETTLE_DELAY),
            exec_timeout_ms: duration_ms(EXEC_TIMEOUT),
            columns: DEFAULT_COLUMNS,
            rows: DEFAULT_ROWS,
            strip_ansi: true,
            auth_user: DEFAULT_AUTH_USER.to_string(),
        }
    }
}

impl Config {
    /// Returns the configuration directory path.
    ///
    /// `SANDBOX_TTY_CONFIG_DIR` wins; otherwise the platform config dir
    /// (e.g. `~/.config/sandbox-tty`).
    pub fn config_dir() -> Result<PathBuf> {
        if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
            return Ok(PathBuf::from(dir));
        }
        Ok(dirs::config_dir()
            .context("Could not determine config directory")?
            .join("sandbox-tty"))
    }

    /// Path of the config file.
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join(CONFIG_FILE))
    }

    /// Loads configuration from file, with environment variable overrides.
    ///
    /// A missing file yields the defaults.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Read a config file without applying overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Invalid config in {}", path.display()))
    }

    /// Persists the configuration to the config directory.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Persists the configuration to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        // Set restrictive permissions (owner read/write only)
        #[cfg(unix)]
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }

    /// Apply `SANDBOX_TTY_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_with(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup. Unparseable values are ignored.
    pub fn apply_env_overrides_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        override_parsed(&lookup, "SANDBOX_TTY_RECONNECT_DELAY_MS", &mut self.reconnect_delay_ms);
        override_parsed(&lookup, "SANDBOX_TTY_SETTLE_DELAY_MS", &mut self.settle_delay_ms);
        override_parsed(&lookup, "SANDBOX_TTY_EXEC_TIMEOUT_MS", &mut self.exec_timeout_ms);
        override_parsed(&lookup, "SANDBOX_TTY_COLUMNS", &mut self.columns);
        override_parsed(&lookup, "SANDBOX_TTY_ROWS", &mut self.rows);
        override_parsed(&lookup, "SANDBOX_TTY_STRIP_ANSI", &mut self.strip_ansi);
        if let Some(user) = lookup("SANDBOX_TTY_AUTH_USER") {
            self.auth_user = user;
        }
    }

    /// Default terminal geometry.
    #[must_use]
    pub fn terminal_size(&self) -> TerminalSize {
        TerminalSize::new(self.columns, self.rows)
    }

    /// Options for an interactive [`crate::SessionController`].
    #[must_use]
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            initial_size: self.terminal_size(),
            ..SessionOptions::default()
        }
    }

    /// Options for one-shot command execution.
    #[must_use]
    pub fn exec_options(&self) -> ExecOptions {
        ExecOptions {
            timeout: Duration::from_millis(self.exec_timeout_ms),
            size: self.terminal_size(),
            strip_ansi: self.strip_ansi,
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            working_dir: None,
        }
    }
}

fn override_parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut T)
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *target = value,
        Err(e) => log::warn!("Ignoring {key}={raw:?}: {e}"),
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.reconnect_delay_ms, 3000);
        assert_eq!(config.settle_delay_ms, 500);
        assert_eq!(config.exec_timeout_ms, 30_000);
        assert_eq!(config.terminal_size(), TerminalSize::new(80, 24));
        assert!(config.strip_ansi);
        assert_eq!(config.auth_user, "user");
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.json");
        let config = Config {
            exec_timeout_ms: 5000,
            strip_ansi: false,
            ..Config::default()
        };
        config.save_to(&path).unwrap();

        assert_eq!(Config::load_from(&path).unwrap(), config);

        #[cfg(unix)]
        {
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_partial_file_uses_defaults_for_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "columns": 132 }"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.columns, 132);
        assert_eq!(config.rows, 24);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "not json").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("SANDBOX_TTY_EXEC_TIMEOUT_MS", "1200"),
            ("SANDBOX_TTY_STRIP_ANSI", "false"),
            ("SANDBOX_TTY_ROWS", "not-a-number"),
            ("SANDBOX_TTY_AUTH_USER", "admin"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env_overrides_with(|key| env.get(key).map(ToString::to_string));

        assert_eq!(config.exec_timeout_ms, 1200);
        assert!(!config.strip_ansi);
        assert_eq!(config.rows, 24);
        assert_eq!(config.auth_user, "admin");
    }

    #[test]
    fn test_projects_into_options() {
        let config = Config {
            reconnect_delay_ms: 100,
            exec_timeout_ms: 2000,
            settle_delay_ms: 0,
            columns: 120,
            rows: 40,
            ..Config::default()
        };

        let session = config.session_options();
        assert_eq!(session.reconnect_delay, Duration::from_millis(100));
        assert_eq!(session.initial_size, TerminalSize::new(120, 40));
        assert!(session.auto_reconnect);

        let exec = config.exec_options();
        assert_eq!(exec.timeout, Duration::from_secs(2));
        assert_eq!(exec.settle_delay, Duration::ZERO);
        assert!(exec.strip_ansi);
    }
}
