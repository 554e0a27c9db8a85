//! The explicit context every operation runs in.
//!
//! A [`Context`] bundles the project location, this machine's key store and
//! the local user settings. Nothing is read from process-wide state, so
//! several simulated users can operate on one project inside one test.

use kanuka_core::{ContentKey, DeviceId, KeyPair, ProjectId};
use kanuka_store::{
    AccessRecordStore, KeyPairStore, ProjectLayout, ProjectRegistry, PublicKeyDirectory,
    StoreError, UserSection, UserSettings,
};

use crate::error::{AccessError, Result};

/// Where the project is and who is acting on it.
#[derive(Debug, Clone)]
pub struct Context {
    layout: ProjectLayout,
    keys: KeyPairStore,
    settings: UserSettings,
}

/// The caller's unlocked view of a project.
pub struct Unlocked {
    pub device: DeviceId,
    pub keypair: KeyPair,
    pub content_key: ContentKey,
}

impl Context {
    pub fn new(layout: ProjectLayout, keys: KeyPairStore, settings: UserSettings) -> Self {
        Self {
            layout,
            keys,
            settings,
        }
    }

    pub fn layout(&self) -> &ProjectLayout {
        &self.layout
    }

    pub fn keys(&self) -> &KeyPairStore {
        &self.keys
    }

    pub fn settings(&self) -> &UserSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut UserSettings {
        &mut self.settings
    }

    pub fn records(&self) -> AccessRecordStore {
        AccessRecordStore::new(self.layout.clone())
    }

    pub fn public_keys(&self) -> PublicKeyDirectory {
        PublicKeyDirectory::new(self.layout.clone())
    }

    pub fn load_registry(&self) -> Result<ProjectRegistry> {
        Ok(ProjectRegistry::load_layout(self.layout.clone())?)
    }

    /// The local user, or an error asking for one.
    pub fn identity(&self) -> Result<&UserSection> {
        self.settings.user().ok_or_else(|| {
            AccessError::InvalidOperation(
                "no local identity configured; pass --email or set KANUKA_EMAIL".to_string(),
            )
        })
    }

    /// The device this machine uses in `project`, if bound.
    pub fn device_for(&self, project: &ProjectId) -> Option<DeviceId> {
        self.settings.binding(project).map(|b| b.device)
    }

    /// Recover the content key with the caller's own access record.
    ///
    /// - No bound device, no key pair or no record: `AccessDenied`.
    /// - Listed in the registry but the record is missing: `Consistency`.
    /// - A record that the local key cannot open: `RepairNeeded`.
    pub fn unlock(&self, registry: &ProjectRegistry) -> Result<Unlocked> {
        let project = registry.project_id();
        let device = self.device_for(&project).ok_or_else(|| {
            AccessError::AccessDenied(format!(
                "this machine has no device in project {}",
                registry.project_name()
            ))
        })?;

        let keypair = match self.keys.load(&project) {
            Ok(keypair) => keypair,
            Err(StoreError::NotFound { .. }) => {
                return Err(AccessError::AccessDenied(format!(
                    "no private key for project {} on this machine",
                    project
                )))
            }
            Err(e) => return Err(e.into()),
        };

        let record = match self.records().read(&device) {
            Ok(record) => record,
            Err(StoreError::NotFound { .. }) if registry.contains_device(&device) => {
                return Err(AccessError::Consistency(format!(
                    "device {} is registered but its access record is missing",
                    device
                )))
            }
            Err(StoreError::NotFound { .. }) => {
                let reason = if registry.pending_entry(&device).is_some() {
                    "access for this device was requested but not granted yet"
                } else {
                    "this device has no access record"
                };
                return Err(AccessError::AccessDenied(reason.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let content_key = record.open(keypair.private_key()).map_err(|_| {
            AccessError::RepairNeeded(format!(
                "the private key for device {} cannot open its access record",
                device
            ))
        })?;

        tracing::debug!(%device, %project, "unlocked content key");
        Ok(Unlocked {
            device,
            keypair,
            content_key,
        })
    }
}
