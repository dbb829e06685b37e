//! Daemon configuration.
//!
//! Loaded from `$XDG_CONFIG_HOME/agent-watch/config.toml` (or the path in
//! `AW_CONFIG`). Every key is optional; a missing file means all defaults.
//!
//! ```toml
//! poll_interval_ms = 2000
//! projects_dir = "/home/me/.claude/projects"
//! listen_addr = "127.0.0.1:9210"
//! notification_capacity = 50
//! deep_link_scheme = "agentwatch"
//! ```
//!
//! Environment overrides, applied after the file: `AW_LISTEN`, `AW_TOKEN`,
//! `AW_BRIDGE`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

/// Directory name used under the config and state directories.
pub const APP_DIR: &str = "agent-watch";

/// Errors that can occur while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("Failed to persist auth token at {path}: {source}")]
    Token {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Resolved daemon configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Poll tick interval
    pub poll_interval_ms: u64,

    /// Root of the per-project session log directories
    pub projects_dir: PathBuf,

    /// Executable name identifying agent processes
    pub agent_signature: String,

    /// Unmatched logs older than this are not reported
    pub recent_window_secs: u64,

    /// Log entries kept per session for classification
    pub tail_entries: usize,

    /// Socket transport address
    pub listen_addr: String,

    /// Shared secret for the socket handshake; generated when unset
    pub auth_token: Option<String>,

    /// Bridge executable; defaults to `aw-bridge` beside the daemon binary
    pub bridge_path: Option<PathBuf>,

    /// Fired notifications remembered for `openNotification`
    pub notification_capacity: usize,

    /// URL scheme for deep links
    pub deep_link_scheme: String,

    /// Program invoked as `<cmd> <project_path>` to open a session
    pub open_command: Option<String>,

    /// Agent settings file holding the permission policy
    pub settings_path: PathBuf,

    /// Persisted custom session titles
    pub titles_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"));
        let agent_dir = home.join(".claude");
        Self {
            poll_interval_ms: 2000,
            projects_dir: agent_dir.join("projects"),
            agent_signature: "claude".to_string(),
            recent_window_secs: 900,
            tail_entries: 40,
            listen_addr: "127.0.0.1:9210".to_string(),
            auth_token: None,
            bridge_path: None,
            notification_capacity: 50,
            deep_link_scheme: "agentwatch".to_string(),
            open_command: None,
            settings_path: agent_dir.join("settings.json"),
            titles_path: config_dir().join("titles.json"),
        }
    }
}

impl Config {
    /// Loads configuration from `AW_CONFIG` or the default location and
    /// applies environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var_os("AW_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(default_config_path);
        let mut config = Self::load_from(&path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Loads a config file; a missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(content) => {
                info!(path = %path.display(), "Loaded config file");
                Self::parse(&content, path)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.message().to_string(),
        })
    }

    /// Applies `AW_*` overrides read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(addr) = lookup("AW_LISTEN") {
            self.listen_addr = addr;
        }
        if let Some(token) = lookup("AW_TOKEN").filter(|t| !t.is_empty()) {
            self.auth_token = Some(token);
        }
        if let Some(bridge) = lookup("AW_BRIDGE") {
            self.bridge_path = Some(PathBuf::from(bridge));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "poll_interval_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.tail_entries == 0 {
            return Err(ConfigError::Invalid {
                key: "tail_entries",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.notification_capacity == 0 {
            return Err(ConfigError::Invalid {
                key: "notification_capacity",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.deep_link_scheme.is_empty() || self.deep_link_scheme.contains(':') {
            return Err(ConfigError::Invalid {
                key: "deep_link_scheme",
                reason: format!("'{}' is not a URL scheme", self.deep_link_scheme),
            });
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn recent_window(&self) -> Duration {
        Duration::from_secs(self.recent_window_secs)
    }

    /// Bridge program to spawn.
    ///
    /// Falls back to an `aw-bridge` next to the running executable, then to
    /// a bare name resolved on `PATH`.
    pub fn bridge_program(&self) -> PathBuf {
        if let Some(path) = &self.bridge_path {
            return path.clone();
        }
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join("aw-bridge")))
            .filter(|candidate| candidate.is_file())
            .unwrap_or_else(|| PathBuf::from("aw-bridge"))
    }

    /// Returns the socket auth token.
    ///
    /// When none is configured, a token is read from the state directory, or
    /// generated and written there with owner-only permissions so local
    /// clients can find it.
    pub fn resolve_token(&self) -> Result<String, ConfigError> {
        if let Some(token) = &self.auth_token {
            return Ok(token.clone());
        }
        let path = token_path();
        if let Ok(existing) = fs::read_to_string(&path) {
            let existing = existing.trim();
            if !existing.is_empty() {
                return Ok(existing.to_string());
            }
        }

        let token = uuid::Uuid::new_v4().to_string();
        write_private(&path, &token).map_err(|source| ConfigError::Token {
            path: path.clone(),
            source,
        })?;
        info!(path = %path.display(), "Generated socket auth token");
        Ok(token)
    }
}

/// `$XDG_CONFIG_HOME/agent-watch`
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(APP_DIR)
}

/// `$XDG_STATE_HOME/agent-watch`
pub fn state_dir() -> PathBuf {
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(APP_DIR)
}

pub fn default_config_path() -> PathBuf {
    config_dir().join("config.toml")
}

pub fn token_path() -> PathBuf {
    state_dir().join("token")
}

fn write_private(path: &Path, contents: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}
