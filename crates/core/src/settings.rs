use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::Dialect;

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:5000";
pub const DEFAULT_PREVIEW_ROW_LIMIT: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConnectorSettings {
    pub backend_url: String,
    pub preview_row_limit: usize,
    /// Transport timeout for backend requests. Unset leaves the HTTP
    /// client's own behavior in place.
    pub request_timeout_ms: Option<u64>,
    pub default_dialect: Dialect,
    /// Append successful connections to `connections.ndjson`.
    pub connection_log: bool,
}

impl Default for ConnectorSettings {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            preview_row_limit: DEFAULT_PREVIEW_ROW_LIMIT,
            request_timeout_ms: None,
            default_dialect: Dialect::default(),
            connection_log: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("config directory is unavailable for this platform")]
    ConfigDirUnavailable,
    #[error("failed to read settings file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to create config directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize settings: {source}")]
    Serialize {
        #[source]
        source: toml::ser::Error,
    },
    #[error("failed to write settings file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ConnectorSettings {
    /// Loads `settings.toml` from the default config directory and applies
    /// the `CONNECTOR_BACKEND_URL` override.
    pub fn load_default() -> Result<Self, SettingsError> {
        let settings = Self::load_from_path(default_settings_path()?)?;
        Ok(settings.with_backend_url_override(env::var_os("CONNECTOR_BACKEND_URL")))
    }

    pub fn load_from_path(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(&path).map_err(|source| SettingsError::Read {
            path: path.clone(),
            source,
        })?;

        if raw.trim().is_empty() {
            return Ok(Self::default());
        }

        let mut settings: Self = toml::from_str(&raw).map_err(|source| SettingsError::Parse {
            path: path.clone(),
            source,
        })?;
        settings.normalize();
        Ok(settings)
    }

    pub fn persist_to(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent_dir) = path.parent() {
            fs::create_dir_all(parent_dir).map_err(|source| SettingsError::CreateDir {
                path: parent_dir.to_path_buf(),
                source,
            })?;
        }

        let rendered =
            toml::to_string_pretty(self).map_err(|source| SettingsError::Serialize { source })?;

        fs::write(path, rendered).map_err(|source| SettingsError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    #[must_use]
    pub fn with_backend_url_override(mut self, value: Option<OsString>) -> Self {
        if let Some(url) = value
            .and_then(|raw| raw.into_string().ok())
            .filter(|url| !url.trim().is_empty())
        {
            self.backend_url = url;
            self.normalize();
        }
        self
    }

    fn normalize(&mut self) {
        let trimmed = self.backend_url.trim().trim_end_matches('/');
        self.backend_url = if trimmed.is_empty() {
            DEFAULT_BACKEND_URL.to_string()
        } else {
            trimmed.to_string()
        };
        if self.preview_row_limit == 0 {
            self.preview_row_limit = DEFAULT_PREVIEW_ROW_LIMIT;
        }
    }
}

pub fn default_config_dir() -> Result<PathBuf, SettingsError> {
    if let Some(custom) = env::var_os("CONNECTOR_CONFIG_DIR") {
        return Ok(PathBuf::from(custom));
    }

    let base_dir = if cfg!(target_os = "windows") {
        env::var_os("APPDATA")
            .map(PathBuf::from)
            .ok_or(SettingsError::ConfigDirUnavailable)?
    } else if let Some(xdg_config_home) = env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config_home)
    } else {
        let home = env::var_os("HOME").ok_or(SettingsError::ConfigDirUnavailable)?;
        PathBuf::from(home).join(".config")
    };

    Ok(base_dir.join("connector"))
}

pub fn default_settings_path() -> Result<PathBuf, SettingsError> {
    Ok(default_config_dir()?.join("settings.toml"))
}
