//! Where Kanuka keeps its local state.
//!
//! | Setting | Source |
//! |---|---|
//! | config dir | `KANUKA_CONFIG_DIR`, else `<platform config dir>/kanuka` |
//! | data dir | `KANUKA_DATA_DIR`, else `<platform data dir>/kanuka` |
//! | device name | `KANUKA_DEVICE_NAME`, else `HOSTNAME`, else `device` |
//! | project root | `--project`, else the current directory |
//!
//! The user settings live in `<config dir>/config.toml` and the key pairs
//! under `<data dir>/keys`.

use std::path::{Path, PathBuf};

use kanuka_access::Context;
use kanuka_store::{KeyPairStore, ProjectLayout, UserSettings};

use crate::error::{KanukaError, Result};

pub const CONFIG_DIR_ENV: &str = "KANUKA_CONFIG_DIR";
pub const DATA_DIR_ENV: &str = "KANUKA_DATA_DIR";
pub const DEVICE_NAME_ENV: &str = "KANUKA_DEVICE_NAME";

const APP_DIR: &str = "kanuka";
const SETTINGS_FILE: &str = "config.toml";
const KEYS_DIR: &str = "keys";
const FALLBACK_DEVICE_NAME: &str = "device";

/// Resolved local configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
    pub project_root: PathBuf,
    /// Device name used when the local identity is first set.
    pub device_name: String,
}

impl Config {
    pub fn new(
        config_dir: impl Into<PathBuf>,
        data_dir: impl Into<PathBuf>,
        project_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            config_dir: config_dir.into(),
            data_dir: data_dir.into(),
            project_root: project_root.into(),
            device_name: FALLBACK_DEVICE_NAME.to_string(),
        }
    }

    pub fn with_device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = name.into();
        self
    }

    /// Resolve from the process environment.
    pub fn from_env(project_root: Option<PathBuf>) -> Result<Self> {
        let project_root = match project_root {
            Some(root) => root,
            None => std::env::current_dir()
                .map_err(|e| KanukaError::Config(format!("cannot read current directory: {}", e)))?,
        };
        Self::resolve(|key| std::env::var(key).ok(), project_root)
    }

    /// Resolve with an explicit variable lookup.
    pub fn resolve(lookup: impl Fn(&str) -> Option<String>, project_root: PathBuf) -> Result<Self> {
        let config_dir = match non_empty(lookup(CONFIG_DIR_ENV)) {
            Some(dir) => PathBuf::from(dir),
            None => dirs::config_dir()
                .map(|d| d.join(APP_DIR))
                .ok_or_else(|| KanukaError::Config(format!("no config directory; set {}", CONFIG_DIR_ENV)))?,
        };
        let data_dir = match non_empty(lookup(DATA_DIR_ENV)) {
            Some(dir) => PathBuf::from(dir),
            None => dirs::data_dir()
                .map(|d| d.join(APP_DIR))
                .ok_or_else(|| KanukaError::Config(format!("no data directory; set {}", DATA_DIR_ENV)))?,
        };
        let device_name = non_empty(lookup(DEVICE_NAME_ENV))
            .or_else(|| non_empty(lookup("HOSTNAME")))
            .unwrap_or_else(|| FALLBACK_DEVICE_NAME.to_string());

        Ok(Self {
            config_dir,
            data_dir,
            project_root,
            device_name,
        })
    }

    pub fn settings_path(&self) -> PathBuf {
        self.config_dir.join(SETTINGS_FILE)
    }

    pub fn keys_dir(&self) -> PathBuf {
        self.data_dir.join(KEYS_DIR)
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Build the operation context.
    ///
    /// With `email`, the local identity is set (or changed) and saved first.
    /// Without it, an existing identity is used as is.
    pub fn context(&self, email: Option<&str>) -> Result<Context> {
        let mut settings = UserSettings::load(self.settings_path())?;

        if let Some(email) = email {
            let email = email.trim();
            if !is_plausible_email(email) {
                return Err(KanukaError::Config(format!("{:?} is not an email address", email)));
            }
            let changed = settings.user().map_or(true, |u| u.email != email);
            if changed {
                let device_name = settings
                    .user()
                    .map(|u| u.device_name.clone())
                    .unwrap_or_else(|| self.device_name.clone());
                settings.set_user(email, &device_name);
                settings.save()?;
                tracing::info!(%email, "local identity set");
            }
        }

        Ok(Context::new(
            ProjectLayout::new(&self.project_root),
            KeyPairStore::new(self.keys_dir()),
            settings,
        ))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty() && !email.contains(char::is_whitespace),
        None => false,
    }
}
