//! Local user settings.
//!
//! One TOML file per machine recording who the local user is and which
//! device they use in each project:
//!
//! ```toml
//! [user]
//! uuid = "..."
//! email = "alice@example.com"
//! device_name = "laptop"
//!
//! [projects.<project uuid>]
//! device = "<device uuid>"
//! device_name = "laptop"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use kanuka_core::{DeviceId, ProjectId, UserId};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::fsutil::{self, PRIVATE_MODE};

/// The local user's identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSection {
    pub uuid: UserId,
    pub email: String,
    pub device_name: String,
}

/// Which device this machine uses in a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectBinding {
    pub device: DeviceId,
    pub device_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct SettingsDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user: Option<UserSection>,
    #[serde(default)]
    projects: BTreeMap<ProjectId, ProjectBinding>,
}

/// The settings file, loaded.
#[derive(Debug, Clone)]
pub struct UserSettings {
    path: PathBuf,
    doc: SettingsDocument,
}

impl UserSettings {
    /// Load settings from `path`. A missing file yields empty settings.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let doc = match fsutil::read_optional(&path)? {
            None => SettingsDocument::default(),
            Some(bytes) => {
                let text = std::str::from_utf8(&bytes)
                    .map_err(|_| StoreError::corrupt(&path, "not UTF-8"))?;
                toml::from_str(text)
                    .map_err(|e| StoreError::corrupt(&path, e.to_string().trim_end()))?
            }
        };
        Ok(Self { path, doc })
    }

    pub fn save(&self) -> Result<()> {
        let text =
            toml::to_string_pretty(&self.doc).map_err(|e| StoreError::Serialization(e.to_string()))?;
        fsutil::write_atomic(&self.path, text.as_bytes(), PRIVATE_MODE)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn user(&self) -> Option<&UserSection> {
        self.doc.user.as_ref()
    }

    /// Set the local identity, keeping an existing user UUID.
    pub fn set_user(&mut self, email: &str, device_name: &str) -> UserId {
        let uuid = self
            .doc
            .user
            .as_ref()
            .map(|u| u.uuid)
            .unwrap_or_else(UserId::generate);
        self.doc.user = Some(UserSection {
            uuid,
            email: email.to_string(),
            device_name: device_name.to_string(),
        });
        uuid
    }

    pub fn binding(&self, project: &ProjectId) -> Option<&ProjectBinding> {
        self.doc.projects.get(project)
    }

    pub fn bind(&mut self, project: ProjectId, device: DeviceId, device_name: &str) {
        self.doc.projects.insert(
            project,
            ProjectBinding {
                device,
                device_name: device_name.to_string(),
            },
        );
    }
}
