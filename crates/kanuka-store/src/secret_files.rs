//! Secret files in the project tree.
//!
//! A secret file is any `.env` or `.env.<suffix>` file. Its encrypted form
//! sits next to it with `.kanuka` appended (`.env` -> `.env.kanuka`).
//! Discovery skips `.git` and `.kanuka` and does not follow symlinks.
//!
//! A content key rotation first writes each new ciphertext to a staged
//! sibling (`.kanuka-staged.env.kanuka`) and renames it over the original
//! once every access record holds the new key. Staged names match neither
//! discovery rule.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use kanuka_core::EncryptedPayload;

use crate::error::{Result, StoreError};
use crate::fsutil::{self, SHARED_MODE};
use crate::layout::{KANUKA_DIR, KANUKA_EXT};

const SKIPPED_DIRS: &[&str] = &[".git", KANUKA_DIR];
const STAGED_PREFIX: &str = ".kanuka-staged";

/// Whether `name` is a plaintext secret file name.
pub fn is_secret_file_name(name: &str) -> bool {
    (name == ".env" || name.starts_with(".env.")) && !name.ends_with(".kanuka")
}

/// Whether `name` is an encrypted secret file name.
pub fn is_encrypted_file_name(name: &str) -> bool {
    name.strip_suffix(".kanuka").is_some_and(is_secret_file_name)
}

/// `.env` -> `.env.kanuka`
pub fn encrypted_path(plaintext: &Path) -> PathBuf {
    let mut name = plaintext.as_os_str().to_owned();
    name.push(".");
    name.push(KANUKA_EXT);
    PathBuf::from(name)
}

/// `.env.kanuka` -> `.env`
pub fn plaintext_path(encrypted: &Path) -> Option<PathBuf> {
    let name = encrypted.file_name()?.to_str()?;
    let stem = name.strip_suffix(".kanuka")?;
    is_secret_file_name(stem).then(|| encrypted.with_file_name(OsString::from(stem)))
}

/// `api/.env.kanuka` -> `api/.kanuka-staged.env.kanuka`
pub fn staged_path(encrypted: &Path) -> PathBuf {
    let mut name = OsString::from(STAGED_PREFIX);
    if let Some(file_name) = encrypted.file_name() {
        name.push(file_name);
    }
    encrypted.with_file_name(name)
}

/// Move a staged ciphertext over the file it replaces.
pub fn publish_staged(encrypted: &Path) -> Result<()> {
    let staged = staged_path(encrypted);
    fs::rename(&staged, encrypted).map_err(|e| StoreError::io(encrypted, e))?;
    tracing::debug!(path = %encrypted.display(), "published staged file");
    Ok(())
}

/// Every plaintext secret file under `root`, sorted.
pub fn discover_plaintext(root: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    walk(root, &mut |path, name| {
        if is_secret_file_name(name) {
            found.push(path.to_path_buf());
        }
    })?;
    found.sort();
    Ok(found)
}

/// Every encrypted secret file under `root`, sorted.
pub fn discover_encrypted(root: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    walk(root, &mut |path, name| {
        if is_encrypted_file_name(name) {
            found.push(path.to_path_buf());
        }
    })?;
    found.sort();
    Ok(found)
}

fn walk(dir: &Path, visit: &mut dyn FnMut(&Path, &str)) -> Result<()> {
    let entries = fs::read_dir(dir).map_err(|e| StoreError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| StoreError::io(dir, e))?;
        let file_type = entry.file_type().map_err(|e| StoreError::io(entry.path(), e))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let path = entry.path();

        if file_type.is_dir() {
            if !SKIPPED_DIRS.contains(&name) {
                walk(&path, visit)?;
            }
        } else if file_type.is_file() {
            visit(&path, name);
        }
    }
    Ok(())
}

/// Read and parse an encrypted secret file.
pub fn read_encrypted(path: &Path) -> Result<EncryptedPayload> {
    let bytes = fs::read(path).map_err(|e| StoreError::io(path, e))?;
    EncryptedPayload::from_bytes(&bytes).map_err(|e| StoreError::corrupt(path, e.to_string()))
}

/// Write an encrypted secret file atomically.
pub fn write_encrypted(path: &Path, payload: &EncryptedPayload) -> Result<()> {
    fsutil::write_atomic(path, &payload.to_bytes()?, SHARED_MODE)
}
