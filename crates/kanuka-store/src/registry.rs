//! The project registry.
//!
//! A TOML document at `.kanuka/config.toml` listing the project identity,
//! the users, their devices, and pending access requests. It is the single
//! source of truth for who is authorized; access records and public keys on
//! disk must match it one-to-one.
//!
//! ## Concurrent writers
//!
//! There is no lock. A loaded registry remembers the BLAKE3 digest of the
//! bytes it was parsed from, and [`ProjectRegistry::save`] refuses to
//! replace a file whose digest has since changed. The losing writer gets
//! [`StoreError::Conflict`] and can reload and retry instead of silently
//! dropping the other writer's changes.
//!
//! ## Usage
//!
//! ```ignore
//! let mut registry = ProjectRegistry::load(project_root)?;
//! registry.add_device(device, user, "alice@example.com", "laptop");
//! registry.save()?;
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use kanuka_core::{DeviceId, ProjectId, UserId};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::fsutil::{self, SHARED_MODE};
use crate::layout::ProjectLayout;
use crate::legacy;

/// Project identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSection {
    pub uuid: ProjectId,
    pub name: String,
}

/// An authorized device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub email: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A device that published its public key and awaits a grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingEntry {
    pub email: String,
    pub user: UserId,
    pub name: String,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct RegistryDocument {
    project: ProjectSection,
    #[serde(default)]
    users: BTreeMap<UserId, String>,
    #[serde(default)]
    devices: BTreeMap<DeviceId, DeviceEntry>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pending: BTreeMap<DeviceId, PendingEntry>,
}

/// In-memory registry bound to the file it came from.
#[derive(Debug, Clone)]
pub struct ProjectRegistry {
    layout: ProjectLayout,
    doc: RegistryDocument,
    /// Digest of the bytes on disk when loaded or last saved. `None` means
    /// the file did not exist.
    base: Option<blake3::Hash>,
}

impl ProjectRegistry {
    /// A new, empty registry for a project that has no file yet.
    pub fn create(layout: ProjectLayout, project: ProjectId, name: impl Into<String>) -> Self {
        Self {
            layout,
            doc: RegistryDocument {
                project: ProjectSection {
                    uuid: project,
                    name: name.into(),
                },
                users: BTreeMap::new(),
                devices: BTreeMap::new(),
                pending: BTreeMap::new(),
            },
            base: None,
        }
    }

    /// Load the registry of the project at `root`.
    pub fn load(root: impl AsRef<Path>) -> Result<Self> {
        Self::load_layout(ProjectLayout::new(root.as_ref()))
    }

    pub fn load_layout(layout: ProjectLayout) -> Result<Self> {
        let path = layout.registry_path();
        let Some(bytes) = fsutil::read_optional(&path)? else {
            if legacy::is_legacy_layout(layout.root()) {
                return Err(StoreError::LegacyLayout(layout.root().to_path_buf()));
            }
            return Err(StoreError::NotInitialized(layout.root().to_path_buf()));
        };

        let doc = parse_document(&path, &bytes)?;
        tracing::debug!(
            path = %path.display(),
            devices = doc.devices.len(),
            pending = doc.pending.len(),
            "loaded registry"
        );
        Ok(Self {
            layout,
            doc,
            base: Some(blake3::hash(&bytes)),
        })
    }

    /// Check registry bytes without binding them to a project.
    ///
    /// `path` is only used in the error.
    pub fn validate_bytes(path: &Path, bytes: &[u8]) -> Result<ProjectSection> {
        parse_document(path, bytes).map(|doc| doc.project)
    }

    /// Persist by atomic rename.
    ///
    /// Fails with [`StoreError::Conflict`] if the file changed on disk
    /// since this registry was loaded (or appeared, for a created one).
    pub fn save(&mut self) -> Result<()> {
        let path = self.layout.registry_path();
        let text = self.to_toml_string()?;

        let current = fsutil::read_optional(&path)?.map(|b| blake3::hash(&b));
        if current != self.base {
            tracing::warn!(path = %path.display(), "registry changed on disk since load");
            return Err(StoreError::Conflict(path));
        }

        fsutil::write_atomic(&path, text.as_bytes(), SHARED_MODE)?;
        self.base = Some(blake3::hash(text.as_bytes()));
        tracing::debug!(path = %path.display(), devices = self.doc.devices.len(), "saved registry");
        Ok(())
    }

    /// Serialize to the on-disk TOML text.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(&self.doc).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    pub fn layout(&self) -> &ProjectLayout {
        &self.layout
    }

    pub fn project(&self) -> &ProjectSection {
        &self.doc.project
    }

    pub fn project_id(&self) -> ProjectId {
        self.doc.project.uuid
    }

    pub fn project_name(&self) -> &str {
        &self.doc.project.name
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Devices
    // ─────────────────────────────────────────────────────────────────────────

    pub fn devices(&self) -> impl Iterator<Item = (&DeviceId, &DeviceEntry)> {
        self.doc.devices.iter()
    }

    pub fn device(&self, device: &DeviceId) -> Option<&DeviceEntry> {
        self.doc.devices.get(device)
    }

    pub fn contains_device(&self, device: &DeviceId) -> bool {
        self.doc.devices.contains_key(device)
    }

    pub fn device_count(&self) -> usize {
        self.doc.devices.len()
    }

    /// Devices registered to `email`, in UUID order.
    pub fn devices_for_email(&self, email: &str) -> Vec<DeviceId> {
        self.doc
            .devices
            .iter()
            .filter(|(_, entry)| entry.email.eq_ignore_ascii_case(email))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Add or replace a device entry. In memory only.
    ///
    /// `user` is recorded in the users index unless the email already maps
    /// to a user. Returns the replaced entry, if any.
    pub fn add_device(
        &mut self,
        device: DeviceId,
        user: UserId,
        email: &str,
        name: &str,
    ) -> Option<DeviceEntry> {
        if self.user_for_email(email).is_none() {
            self.doc.users.insert(user, email.to_string());
        }
        self.doc.devices.insert(
            device,
            DeviceEntry {
                email: email.to_string(),
                name: name.to_string(),
                created_at: Utc::now(),
            },
        )
    }

    /// Remove a device entry. In memory only.
    ///
    /// A user whose last device goes is dropped from the users index.
    pub fn remove_device(&mut self, device: &DeviceId) -> Option<DeviceEntry> {
        let entry = self.doc.devices.remove(device)?;
        if self.devices_for_email(&entry.email).is_empty() {
            self.doc
                .users
                .retain(|_, email| !email.eq_ignore_ascii_case(&entry.email));
        }
        Some(entry)
    }

    /// Refresh a device's key-creation timestamp after rotation.
    pub fn touch_device(&mut self, device: &DeviceId) -> bool {
        match self.doc.devices.get_mut(device) {
            Some(entry) => {
                entry.created_at = Utc::now();
                true
            }
            None => false,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Users
    // ─────────────────────────────────────────────────────────────────────────

    pub fn users(&self) -> impl Iterator<Item = (&UserId, &String)> {
        self.doc.users.iter()
    }

    pub fn user_for_email(&self, email: &str) -> Option<UserId> {
        self.doc
            .users
            .iter()
            .find(|(_, e)| e.eq_ignore_ascii_case(email))
            .map(|(id, _)| *id)
    }

    /// Rebuild the users index from the device entries.
    ///
    /// Known users keep their UUID; emails with no user get the UUID of a
    /// matching pending request or a fresh one. Returns whether anything
    /// changed.
    pub fn rebuild_users(&mut self) -> bool {
        let mut rebuilt = BTreeMap::new();
        for entry in self.doc.devices.values() {
            if rebuilt.values().any(|e: &String| e.eq_ignore_ascii_case(&entry.email)) {
                continue;
            }
            let user = self
                .user_for_email(&entry.email)
                .or_else(|| {
                    self.doc
                        .pending
                        .values()
                        .find(|p| p.email.eq_ignore_ascii_case(&entry.email))
                        .map(|p| p.user)
                })
                .unwrap_or_else(UserId::generate);
            rebuilt.insert(user, entry.email.clone());
        }
        let changed = rebuilt != self.doc.users;
        self.doc.users = rebuilt;
        changed
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Pending requests
    // ─────────────────────────────────────────────────────────────────────────

    pub fn pending(&self) -> impl Iterator<Item = (&DeviceId, &PendingEntry)> {
        self.doc.pending.iter()
    }

    pub fn pending_entry(&self, device: &DeviceId) -> Option<&PendingEntry> {
        self.doc.pending.get(device)
    }

    pub fn pending_for_email(&self, email: &str) -> Vec<DeviceId> {
        self.doc
            .pending
            .iter()
            .filter(|(_, entry)| entry.email.eq_ignore_ascii_case(email))
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn add_pending(&mut self, device: DeviceId, user: UserId, email: &str, name: &str) {
        self.doc.pending.insert(
            device,
            PendingEntry {
                email: email.to_string(),
                user,
                name: name.to_string(),
                requested_at: Utc::now(),
            },
        );
    }

    pub fn remove_pending(&mut self, device: &DeviceId) -> Option<PendingEntry> {
        self.doc.pending.remove(device)
    }
}

fn parse_document(path: &Path, bytes: &[u8]) -> Result<RegistryDocument> {
    let text = std::str::from_utf8(bytes).map_err(|_| StoreError::corrupt(path, "not UTF-8"))?;
    if text.trim().is_empty() {
        return Err(StoreError::corrupt(path, "registry is empty"));
    }

    let doc: RegistryDocument =
        toml::from_str(text).map_err(|e| StoreError::corrupt(path, e.to_string().trim_end()))?;

    if doc.project.uuid.is_nil() {
        return Err(StoreError::corrupt(path, "project uuid is nil"));
    }
    if doc.project.name.trim().is_empty() {
        return Err(StoreError::corrupt(path, "project name is empty"));
    }
    if let Some(device) = doc.devices.keys().chain(doc.pending.keys()).find(|d| d.is_nil()) {
        return Err(StoreError::corrupt(path, format!("nil device uuid {}", device)));
    }
    if let Some((device, _)) = doc.devices.iter().find(|(_, e)| e.email.trim().is_empty()) {
        return Err(StoreError::corrupt(path, format!("device {} has no email", device)));
    }
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use proptest::prelude::*;

    use super::*;

    fn new_registry(dir: &Path) -> ProjectRegistry {
        ProjectRegistry::create(ProjectLayout::new(dir), ProjectId::generate(), "payments")
    }

    fn write_registry(dir: &Path, text: &str) {
        let layout = ProjectLayout::new(dir);
        fs::create_dir_all(layout.kanuka_dir()).unwrap();
        fs::write(layout.registry_path(), text).unwrap();
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = new_registry(dir.path());
        let device = DeviceId::generate();
        let user = UserId::generate();
        registry.add_device(device, user, "alice@example.com", "laptop");
        registry.save().unwrap();

        let loaded = ProjectRegistry::load(dir.path()).unwrap();
        assert_eq!(loaded.project(), registry.project());
        assert_eq!(loaded.device(&device), registry.device(&device));
        assert_eq!(loaded.user_for_email("alice@example.com"), Some(user));
    }

    #[test]
    fn test_toml_shape() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = new_registry(dir.path());
        let device = DeviceId::generate();
        registry.add_device(device, UserId::generate(), "alice@example.com", "laptop");

        let text = registry.to_toml_string().unwrap();
        assert!(text.contains("[project]"));
        assert!(text.contains("name = \"payments\""));
        assert!(text.contains("[users]"));
        assert!(text.contains(&format!("[devices.{}]", device)));
        assert!(!text.contains("[pending"));
    }

    #[test]
    fn test_load_missing_is_not_initialized() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ProjectRegistry::load(dir.path()),
            Err(StoreError::NotInitialized(_))
        ));
    }

    #[test]
    fn test_load_legacy_layout() {
        let dir = tempfile::tempdir().unwrap();
        let keys = ProjectLayout::new(dir.path()).public_keys_dir();
        fs::create_dir_all(&keys).unwrap();
        fs::write(keys.join("alice.pub"), b"-----BEGIN PUBLIC KEY-----").unwrap();

        assert!(matches!(
            ProjectRegistry::load(dir.path()),
            Err(StoreError::LegacyLayout(_))
        ));
    }

    #[test]
    fn test_rejects_empty_and_garbage() {
        let dir = tempfile::tempdir().unwrap();

        write_registry(dir.path(), "   \n");
        assert!(matches!(ProjectRegistry::load(dir.path()), Err(StoreError::Corrupt { .. })));

        write_registry(dir.path(), "[project\nuuid = ");
        assert!(matches!(ProjectRegistry::load(dir.path()), Err(StoreError::Corrupt { .. })));

        write_registry(dir.path(), "[users]\n");
        assert!(matches!(ProjectRegistry::load(dir.path()), Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn test_rejects_invalid_identity() {
        let dir = tempfile::tempdir().unwrap();

        write_registry(
            dir.path(),
            "[project]\nuuid = \"00000000-0000-0000-0000-000000000000\"\nname = \"x\"\n",
        );
        assert!(matches!(ProjectRegistry::load(dir.path()), Err(StoreError::Corrupt { .. })));

        write_registry(
            dir.path(),
            &format!("[project]\nuuid = \"{}\"\nname = \"\"\n", ProjectId::generate()),
        );
        assert!(matches!(ProjectRegistry::load(dir.path()), Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn test_concurrent_save_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        new_registry(dir.path()).save().unwrap();

        let mut first = ProjectRegistry::load(dir.path()).unwrap();
        let mut second = ProjectRegistry::load(dir.path()).unwrap();

        first.add_device(DeviceId::generate(), UserId::generate(), "a@example.com", "a");
        first.save().unwrap();

        second.add_device(DeviceId::generate(), UserId::generate(), "b@example.com", "b");
        assert!(matches!(second.save(), Err(StoreError::Conflict(_))));

        // Reload and retry succeeds and keeps both.
        let mut retry = ProjectRegistry::load(dir.path()).unwrap();
        retry.add_device(DeviceId::generate(), UserId::generate(), "b@example.com", "b");
        retry.save().unwrap();
        assert_eq!(ProjectRegistry::load(dir.path()).unwrap().device_count(), 2);
    }

    #[test]
    fn test_create_over_existing_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        new_registry(dir.path()).save().unwrap();
        assert!(matches!(
            new_registry(dir.path()).save(),
            Err(StoreError::Conflict(_))
        ));
    }

    #[test]
    fn test_repeated_saves_from_same_instance() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = new_registry(dir.path());
        registry.save().unwrap();
        registry.add_device(DeviceId::generate(), UserId::generate(), "a@example.com", "a");
        registry.save().unwrap();
    }

    #[test]
    fn test_remove_last_device_drops_user() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = new_registry(dir.path());
        let user = UserId::generate();
        let laptop = DeviceId::generate();
        let desktop = DeviceId::generate();
        registry.add_device(laptop, user, "alice@example.com", "laptop");
        registry.add_device(desktop, UserId::generate(), "alice@example.com", "desktop");

        // Second device reuses the existing user.
        assert_eq!(registry.users().count(), 1);
        assert_eq!(registry.devices_for_email("ALICE@example.com").len(), 2);

        registry.remove_device(&laptop).unwrap();
        assert_eq!(registry.user_for_email("alice@example.com"), Some(user));

        registry.remove_device(&desktop).unwrap();
        assert_eq!(registry.user_for_email("alice@example.com"), None);
        assert!(registry.remove_device(&desktop).is_none());
    }

    #[test]
    fn test_pending_entries() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = new_registry(dir.path());
        let device = DeviceId::generate();
        let user = UserId::generate();
        registry.add_pending(device, user, "bob@example.com", "workstation");
        registry.save().unwrap();

        let mut loaded = ProjectRegistry::load(dir.path()).unwrap();
        assert_eq!(loaded.pending_for_email("bob@example.com"), vec![device]);
        assert_eq!(loaded.pending_entry(&device).unwrap().user, user);
        assert!(!loaded.contains_device(&device));

        loaded.remove_pending(&device).unwrap();
        assert_eq!(loaded.pending().count(), 0);
    }

    #[test]
    fn test_rebuild_users() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = new_registry(dir.path());
        let alice = UserId::generate();
        registry.add_device(DeviceId::generate(), alice, "alice@example.com", "laptop");
        assert!(!registry.rebuild_users());

        // Corrupt the index directly.
        registry.doc.users.clear();
        registry.doc.users.insert(UserId::generate(), "ghost@example.com".into());
        assert!(registry.rebuild_users());

        assert_eq!(registry.users().count(), 1);
        assert!(registry.user_for_email("alice@example.com").is_some());
        assert!(registry.user_for_email("ghost@example.com").is_none());
    }

    #[test]
    fn test_validate_bytes() {
        let path = Path::new("config.toml");
        assert!(ProjectRegistry::validate_bytes(path, b"").is_err());
        assert!(ProjectRegistry::validate_bytes(path, b"\xff\xfe").is_err());

        let dir = tempfile::tempdir().unwrap();
        let registry = new_registry(dir.path());
        let text = registry.to_toml_string().unwrap();
        let section = ProjectRegistry::validate_bytes(path, text.as_bytes()).unwrap();
        assert_eq!(section.name, "payments");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_metadata_survives_save(
            email in "[a-z]{1,12}@[a-z]{1,8}\\.com",
            name in "[ -~]{0,24}",
        ) {
            let dir = tempfile::tempdir().unwrap();
            let mut registry = new_registry(dir.path());
            let device = DeviceId::generate();
            registry.add_device(device, UserId::generate(), &email, &name);
            registry.save().unwrap();

            let loaded = ProjectRegistry::load(dir.path()).unwrap();
            let entry = loaded.device(&device).unwrap();
            prop_assert_eq!(&entry.email, &email);
            prop_assert_eq!(&entry.name, &name);
        }
    }
}
