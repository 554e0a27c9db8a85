//! Per-device files in the project: access records and public keys.
//!
//! Both directories are flat and keyed by [`DeviceId`]. Files whose names
//! are not `<uuid>.<ext>` are ignored by listings; [`crate::legacy`] deals
//! with per-username leftovers.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use kanuka_core::{AccessRecord, DeviceId, PublicKey};

use crate::error::{Result, StoreError};
use crate::fsutil::{self, Overwrite, SHARED_MODE};
use crate::layout::{ProjectLayout, KANUKA_EXT, PUBLIC_KEY_EXT};

/// List the devices named by `<uuid>.<ext>` files in `dir`.
fn list_devices(dir: &Path, ext: &str) -> Result<Vec<DeviceId>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::io(dir, e)),
    };

    let mut devices = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| StoreError::io(dir, e))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with('.') {
            continue;
        }
        match DeviceId::from_file_name(name, ext) {
            Some(device) => devices.push(device),
            None => tracing::warn!(file = %entry.path().display(), "ignoring unrecognized file"),
        }
    }
    devices.sort();
    Ok(devices)
}

/// Access records under `.kanuka/secrets/`.
#[derive(Debug, Clone)]
pub struct AccessRecordStore {
    layout: ProjectLayout,
}

impl AccessRecordStore {
    pub fn new(layout: ProjectLayout) -> Self {
        Self { layout }
    }

    pub fn path(&self, device: &DeviceId) -> PathBuf {
        self.layout.access_record_path(device)
    }

    pub fn exists(&self, device: &DeviceId) -> bool {
        self.path(device).is_file()
    }

    /// Read a device's record.
    pub fn read(&self, device: &DeviceId) -> Result<AccessRecord> {
        let path = self.path(device);
        let bytes = fsutil::read_optional(&path)?.ok_or_else(|| StoreError::NotFound {
            what: "access record",
            path: path.clone(),
        })?;
        AccessRecord::from_bytes(bytes).map_err(|e| StoreError::corrupt(&path, e.to_string()))
    }

    /// Write a device's record, replacing it only when allowed.
    pub fn write(&self, device: &DeviceId, record: &AccessRecord, overwrite: Overwrite) -> Result<()> {
        let path = self.path(device);
        if overwrite == Overwrite::Deny && path.exists() {
            return Err(StoreError::AlreadyExists {
                what: "access record",
                path,
            });
        }
        fsutil::write_atomic(&path, record.as_bytes(), SHARED_MODE)
    }

    /// Delete a device's record. Returns whether a file was removed.
    pub fn remove(&self, device: &DeviceId) -> Result<bool> {
        fsutil::remove_if_exists(&self.path(device))
    }

    /// Every device with a record on disk, sorted.
    pub fn list(&self) -> Result<Vec<DeviceId>> {
        list_devices(&self.layout.secrets_dir(), KANUKA_EXT)
    }
}

/// Public keys under `.kanuka/public_keys/`.
#[derive(Debug, Clone)]
pub struct PublicKeyDirectory {
    layout: ProjectLayout,
}

impl PublicKeyDirectory {
    pub fn new(layout: ProjectLayout) -> Self {
        Self { layout }
    }

    pub fn path(&self, device: &DeviceId) -> PathBuf {
        self.layout.public_key_path(device)
    }

    pub fn exists(&self, device: &DeviceId) -> bool {
        self.path(device).is_file()
    }

    pub fn read(&self, device: &DeviceId) -> Result<PublicKey> {
        let path = self.path(device);
        let bytes = fsutil::read_optional(&path)?.ok_or_else(|| StoreError::NotFound {
            what: "public key",
            path: path.clone(),
        })?;
        let pem = String::from_utf8(bytes).map_err(|_| StoreError::corrupt(&path, "not UTF-8"))?;
        PublicKey::from_pem(&pem).map_err(|e| StoreError::corrupt(&path, e.to_string()))
    }

    pub fn write(&self, device: &DeviceId, key: &PublicKey, overwrite: Overwrite) -> Result<()> {
        let path = self.path(device);
        if overwrite == Overwrite::Deny && path.exists() {
            return Err(StoreError::AlreadyExists {
                what: "public key",
                path,
            });
        }
        fsutil::write_atomic(&path, key.to_pem()?.as_bytes(), SHARED_MODE)
    }

    pub fn remove(&self, device: &DeviceId) -> Result<bool> {
        fsutil::remove_if_exists(&self.path(device))
    }

    pub fn list(&self) -> Result<Vec<DeviceId>> {
        list_devices(&self.layout.public_keys_dir(), PUBLIC_KEY_EXT)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::OnceLock;

    use kanuka_core::{ContentKey, KeyPair};

    use super::*;

    fn shared_keypair() -> &'static KeyPair {
        static KEY: OnceLock<KeyPair> = OnceLock::new();
        KEY.get_or_init(|| KeyPair::generate().unwrap())
    }

    fn stores() -> (tempfile::TempDir, AccessRecordStore, PublicKeyDirectory) {
        let dir = tempfile::tempdir().unwrap();
        let layout = ProjectLayout::new(dir.path());
        (
            dir,
            AccessRecordStore::new(layout.clone()),
            PublicKeyDirectory::new(layout),
        )
    }

    #[test]
    fn test_record_write_read() {
        let (_dir, records, _) = stores();
        let device = DeviceId::generate();
        let key = ContentKey::generate();
        let record = AccessRecord::seal(&key, shared_keypair().public_key()).unwrap();

        records.write(&device, &record, Overwrite::Deny).unwrap();
        assert!(records.exists(&device));

        let loaded = records.read(&device).unwrap();
        assert_eq!(loaded, record);
        assert_eq!(loaded.open(shared_keypair().private_key()).unwrap(), key);
    }

    #[test]
    fn test_record_refuses_overwrite() {
        let (_dir, records, _) = stores();
        let device = DeviceId::generate();
        let record = AccessRecord::seal(&ContentKey::generate(), shared_keypair().public_key()).unwrap();

        records.write(&device, &record, Overwrite::Deny).unwrap();
        assert!(matches!(
            records.write(&device, &record, Overwrite::Deny),
            Err(StoreError::AlreadyExists { .. })
        ));
        records.write(&device, &record, Overwrite::Allow).unwrap();
    }

    #[test]
    fn test_empty_record_is_corrupt() {
        let (_dir, records, _) = stores();
        let device = DeviceId::generate();
        fs::create_dir_all(records.path(&device).parent().unwrap()).unwrap();
        fs::write(records.path(&device), b"").unwrap();

        assert!(matches!(records.read(&device), Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn test_read_missing() {
        let (_dir, records, keys) = stores();
        let device = DeviceId::generate();
        assert!(matches!(records.read(&device), Err(StoreError::NotFound { .. })));
        assert!(matches!(keys.read(&device), Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn test_public_key_roundtrip_and_remove() {
        let (_dir, _, keys) = stores();
        let device = DeviceId::generate();

        keys.write(&device, shared_keypair().public_key(), Overwrite::Deny).unwrap();
        assert_eq!(&keys.read(&device).unwrap(), shared_keypair().public_key());

        assert!(keys.remove(&device).unwrap());
        assert!(!keys.remove(&device).unwrap());
        assert!(!keys.exists(&device));
    }

    #[test]
    fn test_list_skips_foreign_files() {
        let (dir, records, keys) = stores();
        let a = DeviceId::generate();
        let b = DeviceId::generate();
        keys.write(&a, shared_keypair().public_key(), Overwrite::Deny).unwrap();
        keys.write(&b, shared_keypair().public_key(), Overwrite::Deny).unwrap();

        let pk_dir = ProjectLayout::new(dir.path()).public_keys_dir();
        fs::write(pk_dir.join("alice.pub"), b"legacy").unwrap();
        fs::write(pk_dir.join(".gitkeep"), b"").unwrap();

        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(keys.list().unwrap(), expected);
        assert!(records.list().unwrap().is_empty());
    }
}
