use std::{
    fs,
    path::{Path, PathBuf},
    sync::{LazyLock, PoisonError, RwLock},
};

use appimage_utils::{
    fs::write_atomic,
    path::{resolve_path, xdg_cache_home, xdg_config_home, xdg_data_home},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ConfigError, Result};

pub const DEFAULT_VENDOR_PREFIX: &str = "appimagekit";

/// Toolkit configuration, read from `config.toml`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Base directory for desktop entries, icons and MIME packages.
    /// Default: $XDG_DATA_HOME
    pub data_home: Option<String>,

    /// Base directory for thumbnails.
    /// Default: $XDG_CACHE_HOME
    pub cache_home: Option<String>,

    /// Prefix carried by every integration artifact.
    /// Default: appimagekit
    pub vendor_prefix: Option<String>,

    /// Generate freedesktop thumbnails on integration.
    /// Default: true
    pub thumbnails: Option<bool>,

    /// Deploy MIME packages shipped by the AppImage.
    /// Default: true
    pub mime_packages: Option<bool>,
}

pub static CONFIG: LazyLock<RwLock<Option<Config>>> = LazyLock::new(|| RwLock::new(None));

pub static CONFIG_PATH: LazyLock<RwLock<PathBuf>> = LazyLock::new(|| {
    RwLock::new(match std::env::var("APPIMAGE_CONFIG") {
        Ok(path_str) => PathBuf::from(path_str),
        Err(_) => xdg_config_home().join("appimage").join("config.toml"),
    })
});

/// Loads the configuration file into the global slot.
pub fn init() -> Result<()> {
    let config = Config::new()?;
    *CONFIG.write().unwrap_or_else(PoisonError::into_inner) = Some(config);
    Ok(())
}

/// Points later [`init`] calls at a different file.
pub fn set_config_path<P: AsRef<Path>>(path: P) {
    *CONFIG_PATH.write().unwrap_or_else(PoisonError::into_inner) = path.as_ref().to_path_buf();
}

pub fn config_path() -> PathBuf {
    CONFIG_PATH
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Returns the global configuration, falling back to defaults when [`init`] was never called.
pub fn get_config() -> Config {
    if let Some(config) = CONFIG
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .as_ref()
    {
        return config.clone();
    }

    let mut guard = CONFIG.write().unwrap_or_else(PoisonError::into_inner);
    guard.get_or_insert_with(Config::default_config).clone()
}

pub fn set_config(config: Config) {
    *CONFIG.write().unwrap_or_else(PoisonError::into_inner) = Some(config);
}

impl Config {
    pub fn default_config() -> Self {
        Self {
            data_home: None,
            cache_home: None,
            vendor_prefix: Some(DEFAULT_VENDOR_PREFIX.to_string()),
            thumbnails: Some(true),
            mime_packages: Some(true),
        }
    }

    /// Loads the configuration from [`CONFIG_PATH`].
    /// A missing file yields the default configuration.
    pub fn new() -> Result<Self> {
        Self::load_from(config_path())
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let mut config = match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "config file not found, using defaults");
                Self::default_config()
            }
            Err(err) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        };

        config.resolve()?;
        Ok(config)
    }

    /// Fills unset fields with defaults and validates the rest.
    pub fn resolve(&mut self) -> Result<()> {
        let prefix = self
            .vendor_prefix
            .get_or_insert_with(|| DEFAULT_VENDOR_PREFIX.to_string());

        if prefix.is_empty()
            || !prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(ConfigError::InvalidVendorPrefix(prefix.clone()));
        }

        self.thumbnails.get_or_insert(true);
        self.mime_packages.get_or_insert(true);

        Ok(())
    }

    pub fn get_data_home(&self) -> Result<PathBuf> {
        if let Ok(env_path) = std::env::var("APPIMAGE_DATA_HOME") {
            return Ok(resolve_path(&env_path)?);
        }
        match &self.data_home {
            Some(data_home) => Ok(resolve_path(data_home)?),
            None => Ok(xdg_data_home()),
        }
    }

    pub fn get_cache_home(&self) -> Result<PathBuf> {
        if let Ok(env_path) = std::env::var("APPIMAGE_CACHE_HOME") {
            return Ok(resolve_path(&env_path)?);
        }
        match &self.cache_home {
            Some(cache_home) => Ok(resolve_path(cache_home)?),
            None => Ok(xdg_cache_home()),
        }
    }

    pub fn vendor_prefix(&self) -> &str {
        self.vendor_prefix.as_deref().unwrap_or(DEFAULT_VENDOR_PREFIX)
    }

    pub fn thumbnails_enabled(&self) -> bool {
        self.thumbnails.unwrap_or(true)
    }

    pub fn mime_packages_enabled(&self) -> bool {
        self.mime_packages.unwrap_or(true)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = config_path();
        let serialized = toml::to_string_pretty(self)?;
        write_atomic(&config_path, serialized.as_bytes())?;
        info!("Configuration saved to {}", config_path.display());
        Ok(())
    }
}
