//! Navigation cache configuration.
//!
//! Project-level config: `.navcache/config.yaml`
//!
//! Resolution: explicit file → project file → defaults, then the
//! `NAVCACHE_NAMESPACE` / `NAVCACHE_DEFAULT_SYSTEM` environment overrides.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::menu::tree::MenuItem;
use crate::menu::{
    LoadMode, MenuSettings, System, BASE_WHITELIST, DEFAULT_MENU_TREE_CAP,
    DEFAULT_PATH_INDEX_CAP,
};
use crate::tabs::DEFAULT_REDIRECT_PREFIX;

pub const PROJECT_CONFIG_PATH: &str = ".navcache/config.yaml";
pub const ENV_NAMESPACE: &str = "NAVCACHE_NAMESPACE";
pub const ENV_DEFAULT_SYSTEM: &str = "NAVCACHE_DEFAULT_SYSTEM";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Everything the caches need to know about their deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavConfig {
    /// Prefix for every persisted key. Empty means unscoped.
    pub namespace: String,
    pub default_system: Option<String>,
    pub mode: LoadMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub static_menus: Option<Vec<MenuItem>>,
    /// Code and name used when a single tree is wrapped as a system.
    pub static_system: System,
    pub menu_tree_cap: usize,
    pub path_index_cap: usize,
    pub public_paths: Vec<String>,
    pub redirect_prefix: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistent_quota: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volatile_quota: Option<usize>,
    /// Base URL of an HTTP menu source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub menu_source_url: Option<String>,
}

impl Default for NavConfig {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            default_system: None,
            mode: LoadMode::Dynamic,
            static_menus: None,
            static_system: System::new("default", "Default"),
            menu_tree_cap: DEFAULT_MENU_TREE_CAP,
            path_index_cap: DEFAULT_PATH_INDEX_CAP,
            public_paths: BASE_WHITELIST.iter().map(|p| p.to_string()).collect(),
            redirect_prefix: DEFAULT_REDIRECT_PREFIX.into(),
            data_dir: None,
            persistent_quota: None,
            volatile_quota: None,
            menu_source_url: None,
        }
    }
}

impl NavConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Strict load of one file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    /// Lenient load: `path` if given, else the project file, else defaults.
    /// Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Self {
        let path = path.unwrap_or_else(|| Path::new(PROJECT_CONFIG_PATH));
        let mut config = match Self::load_from(path) {
            Ok(config) => config,
            Err(ConfigError::Read { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                Self::default()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable config");
                Self::default()
            }
        };
        config.apply_env_overrides(|name| std::env::var(name).ok());
        config
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(namespace) = lookup(ENV_NAMESPACE) {
            self.namespace = namespace.trim().to_string();
        }
        if let Some(code) = lookup(ENV_DEFAULT_SYSTEM).filter(|c| !c.trim().is_empty()) {
            self.default_system = Some(code.trim().to_string());
        }
    }

    /// Write this config as YAML to `path`.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|source| ConfigError::Write {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Where the persistent tier lives.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(".navcache/data"))
    }

    pub fn menu_settings(&self) -> MenuSettings {
        MenuSettings {
            mode: self.mode,
            default_system: self.default_system.clone(),
            static_menus: self.static_menus.clone(),
            static_system: self.static_system.clone(),
            menu_tree_cap: self.menu_tree_cap,
            path_index_cap: self.path_index_cap,
            public_paths: self.public_paths.clone(),
        }
    }
}
