//! Paths inside a project directory.

use std::path::{Path, PathBuf};

use kanuka_core::DeviceId;

/// Name of the per-project metadata directory.
pub const KANUKA_DIR: &str = ".kanuka";

/// Directory holding one public key per device.
pub const PUBLIC_KEYS_DIR: &str = "public_keys";

/// Directory holding one access record per device.
pub const SECRETS_DIR: &str = "secrets";

/// The project registry.
pub const REGISTRY_FILE: &str = "config.toml";

/// Extension of public key files.
pub const PUBLIC_KEY_EXT: &str = "pub";

/// Extension of access records and encrypted secret files.
pub const KANUKA_EXT: &str = "kanuka";

/// Resolves every path the stores touch inside one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    root: PathBuf,
}

impl ProjectLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The project directory (the one containing `.kanuka`).
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn kanuka_dir(&self) -> PathBuf {
        self.root.join(KANUKA_DIR)
    }

    pub fn registry_path(&self) -> PathBuf {
        self.kanuka_dir().join(REGISTRY_FILE)
    }

    pub fn public_keys_dir(&self) -> PathBuf {
        self.kanuka_dir().join(PUBLIC_KEYS_DIR)
    }

    pub fn secrets_dir(&self) -> PathBuf {
        self.kanuka_dir().join(SECRETS_DIR)
    }

    pub fn public_key_path(&self, device: &DeviceId) -> PathBuf {
        self.public_keys_dir().join(device.file_name(PUBLIC_KEY_EXT))
    }

    pub fn access_record_path(&self, device: &DeviceId) -> PathBuf {
        self.secrets_dir().join(device.file_name(KANUKA_EXT))
    }

    /// Whether `.kanuka` exists at all, initialized or not.
    pub fn has_kanuka_dir(&self) -> bool {
        self.kanuka_dir().is_dir()
    }

    /// Map a path inside the project to the device it names, if any.
    ///
    /// Accepts both `public_keys/<uuid>.pub` and `secrets/<uuid>.kanuka`,
    /// relative to the current directory or absolute.
    pub fn device_for_path(&self, path: &Path) -> Option<DeviceId> {
        let name = path.file_name()?.to_str()?;
        let parent = path.parent().and_then(|p| p.file_name()).and_then(|p| p.to_str());
        match parent {
            Some(PUBLIC_KEYS_DIR) => DeviceId::from_file_name(name, PUBLIC_KEY_EXT),
            Some(SECRETS_DIR) => DeviceId::from_file_name(name, KANUKA_EXT),
            _ => DeviceId::from_file_name(name, PUBLIC_KEY_EXT)
                .or_else(|| DeviceId::from_file_name(name, KANUKA_EXT)),
        }
    }
}
