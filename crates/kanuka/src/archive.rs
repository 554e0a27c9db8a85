//! Export and import of a project as a gzip-compressed tar archive.
//!
//! An archive holds exactly what a project shares:
//!
//! ```text
//! .kanuka/config.toml
//! .kanuka/public_keys/<uuid>.pub
//! .kanuka/secrets/<uuid>.kanuka
//! **/.env*.kanuka
//! ```
//!
//! Import checks every entry before anything is written. The `.kanuka`
//! directory is assembled in a staging directory next to it and renamed
//! into place, so a rejected archive leaves the project untouched.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use kanuka_access::{AccessError, Context};
use kanuka_core::{AccessRecord, DeviceId, EncryptedPayload, ProjectId, PublicKey};
use kanuka_store::fsutil::{self, SHARED_MODE};
use kanuka_store::layout::{KANUKA_DIR, KANUKA_EXT, PUBLIC_KEYS_DIR, PUBLIC_KEY_EXT, REGISTRY_FILE, SECRETS_DIR};
use kanuka_store::{secret_files, ProjectLayout, ProjectRegistry, StoreError};
use serde::Serialize;

use crate::error::{KanukaError, Result};

/// Outcome of [`export`].
#[derive(Debug, Clone, Serialize)]
pub struct ExportReport {
    pub path: PathBuf,
    pub project: ProjectId,
    /// Archive entries, relative to the project root.
    pub files: Vec<PathBuf>,
}

/// Outcome of [`import`].
#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    pub project: ProjectId,
    pub name: String,
    pub devices: usize,
    pub public_keys: usize,
    pub records: usize,
    pub secret_files: Vec<PathBuf>,
    /// Entries that were not imported.
    pub skipped: Vec<PathBuf>,
    /// An existing `.kanuka` directory was replaced.
    pub replaced: bool,
}

/// Write the project's shared state to `output`.
pub fn export(ctx: &Context, output: &Path) -> Result<ExportReport> {
    let layout = ctx.layout();
    let registry = ctx.load_registry()?;
    let root = layout.root();

    let mut sources = vec![layout.registry_path()];
    sources.extend(
        ctx.public_keys()
            .list()?
            .iter()
            .map(|d| layout.public_key_path(d)),
    );
    sources.extend(
        ctx.records()
            .list()?
            .iter()
            .map(|d| layout.access_record_path(d)),
    );
    sources.extend(secret_files::discover_encrypted(root)?);

    let dir = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
    let tmp = tempfile::Builder::new()
        .prefix(".kanuka-export-")
        .tempfile_in(dir)
        .map_err(|e| StoreError::io(dir, e))?;

    let mut builder = tar::Builder::new(GzEncoder::new(tmp.as_file(), Compression::default()));
    builder.mode(tar::HeaderMode::Deterministic);
    let mut files = Vec::with_capacity(sources.len());
    for source in &sources {
        let relative = source.strip_prefix(root).unwrap_or(source);
        builder
            .append_path_with_name(source, relative)
            .map_err(|e| KanukaError::archive(output, e))?;
        files.push(relative.to_path_buf());
    }
    builder
        .into_inner()
        .and_then(|gz| gz.finish())
        .map_err(|e| KanukaError::archive(output, e))?;

    tmp.persist(output)
        .map_err(|e| StoreError::io(output, e.error))?;

    tracing::info!(
        path = %output.display(),
        project = %registry.project_id(),
        files = files.len(),
        "exported project"
    );
    Ok(ExportReport {
        path: output.to_path_buf(),
        project: registry.project_id(),
        files,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    Registry,
    PublicKey,
    Record,
    SecretFile,
}

struct Entry {
    path: PathBuf,
    kind: EntryKind,
    bytes: Vec<u8>,
}

/// Unpack `archive` into `project_root`.
///
/// Refuses a project that already has a `.kanuka` directory unless `force`.
pub fn import(project_root: &Path, archive: &Path, force: bool) -> Result<ImportReport> {
    let layout = ProjectLayout::new(project_root);
    let replaced = layout.has_kanuka_dir();
    if replaced && !force {
        return Err(AccessError::AlreadyExists(format!(
            "Kanuka project at {}",
            project_root.display()
        ))
        .into());
    }

    let (entries, skipped) = read_entries(archive)?;
    let project = validate(&layout, archive, &entries)?;

    fs::create_dir_all(project_root).map_err(|e| StoreError::io(project_root, e))?;
    let staging = tempfile::Builder::new()
        .prefix(".kanuka-import-")
        .tempdir_in(project_root)
        .map_err(|e| StoreError::io(project_root, e))?;

    let mut report = ImportReport {
        project: project.uuid,
        name: project.name,
        devices: 0,
        public_keys: 0,
        records: 0,
        secret_files: Vec::new(),
        skipped,
        replaced,
    };

    for entry in entries.iter().filter(|e| e.kind != EntryKind::SecretFile) {
        let inside = entry.path.strip_prefix(KANUKA_DIR).unwrap_or(&entry.path);
        fsutil::write_atomic(&staging.path().join(inside), &entry.bytes, SHARED_MODE)?;
        match entry.kind {
            EntryKind::PublicKey => report.public_keys += 1,
            EntryKind::Record => report.records += 1,
            _ => {}
        }
    }
    swap_in(staging.path(), &layout.kanuka_dir())?;

    for entry in entries.iter().filter(|e| e.kind == EntryKind::SecretFile) {
        let target = project_root.join(&entry.path);
        if !force && target.exists() && fs::read(&target).ok().as_deref() != Some(&entry.bytes[..]) {
            tracing::warn!(path = %target.display(), "keeping existing secret file");
            report.skipped.push(entry.path.clone());
            continue;
        }
        fsutil::write_atomic(&target, &entry.bytes, SHARED_MODE)?;
        report.secret_files.push(entry.path.clone());
    }

    report.devices = ProjectRegistry::load_layout(layout)?.device_count();
    tracing::info!(
        project = %report.project,
        devices = report.devices,
        files = report.secret_files.len(),
        "imported project"
    );
    Ok(report)
}

fn read_entries(archive: &Path) -> Result<(Vec<Entry>, Vec<PathBuf>)> {
    let file = File::open(archive).map_err(|e| StoreError::io(archive, e))?;
    let mut tar = tar::Archive::new(GzDecoder::new(file));
    let mut entries = Vec::new();
    let mut skipped = Vec::new();

    for entry in tar.entries().map_err(|e| KanukaError::archive(archive, e))? {
        let mut entry = entry.map_err(|e| KanukaError::archive(archive, e))?;
        let path = entry
            .path()
            .map_err(|e| KanukaError::archive(archive, e))?
            .into_owned();
        if !is_safe(&path) {
            return Err(KanukaError::archive(
                archive,
                format!("entry {} escapes the project directory", path.display()),
            ));
        }
        if entry.header().entry_type().is_dir() {
            continue;
        }
        let path: PathBuf = path
            .components()
            .filter(|c| matches!(c, Component::Normal(_)))
            .collect();

        let kind = match classify(&path) {
            Some(kind) if entry.header().entry_type().is_file() => kind,
            _ => {
                tracing::warn!(entry = %path.display(), "skipping archive entry");
                skipped.push(path);
                continue;
            }
        };
        let mut bytes = Vec::new();
        entry
            .read_to_end(&mut bytes)
            .map_err(|e| KanukaError::archive(archive, e))?;
        entries.push(Entry { path, kind, bytes });
    }
    Ok((entries, skipped))
}

fn is_safe(path: &Path) -> bool {
    path.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

fn classify(path: &Path) -> Option<EntryKind> {
    let parts: Option<Vec<&str>> = path.iter().map(|c| c.to_str()).collect();
    match parts?.as_slice() {
        [KANUKA_DIR, REGISTRY_FILE] => Some(EntryKind::Registry),
        [KANUKA_DIR, PUBLIC_KEYS_DIR, name] => {
            DeviceId::from_file_name(name, PUBLIC_KEY_EXT).map(|_| EntryKind::PublicKey)
        }
        [KANUKA_DIR, SECRETS_DIR, name] => {
            DeviceId::from_file_name(name, KANUKA_EXT).map(|_| EntryKind::Record)
        }
        [KANUKA_DIR, ..] => None,
        [.., name] if secret_files::is_encrypted_file_name(name) => Some(EntryKind::SecretFile),
        _ => None,
    }
}

/// Every entry must parse before anything is written.
fn validate(
    layout: &ProjectLayout,
    archive: &Path,
    entries: &[Entry],
) -> Result<kanuka_store::ProjectSection> {
    let mut registry = None;
    for entry in entries {
        let target = layout.root().join(&entry.path);
        match entry.kind {
            EntryKind::Registry => {
                registry = Some(ProjectRegistry::validate_bytes(&target, &entry.bytes)?);
            }
            EntryKind::PublicKey => {
                let pem = std::str::from_utf8(&entry.bytes)
                    .map_err(|_| StoreError::corrupt(&target, "not UTF-8"))?;
                PublicKey::from_pem(pem).map_err(|e| StoreError::corrupt(&target, e.to_string()))?;
            }
            EntryKind::Record => {
                AccessRecord::from_bytes(entry.bytes.clone())
                    .map_err(|e| StoreError::corrupt(&target, e.to_string()))?;
            }
            EntryKind::SecretFile => {
                EncryptedPayload::from_bytes(&entry.bytes)
                    .map_err(|e| StoreError::corrupt(&target, e.to_string()))?;
            }
        }
    }
    registry.ok_or_else(|| {
        KanukaError::archive(archive, format!("no {}/{} entry", KANUKA_DIR, REGISTRY_FILE))
    })
}

/// Rename `staging` to `target`, moving an existing `target` out of the way
/// first and back if the rename fails.
fn swap_in(staging: &Path, target: &Path) -> Result<()> {
    if !target.exists() {
        return fs::rename(staging, target).map_err(|e| StoreError::io(target, e).into());
    }

    let backup = staging.with_extension("old");
    fs::rename(target, &backup).map_err(|e| StoreError::io(target, e))?;
    if let Err(e) = fs::rename(staging, target) {
        if let Err(restore) = fs::rename(&backup, target) {
            tracing::error!(
                backup = %backup.display(),
                error = %restore,
                "could not restore previous .kanuka directory"
            );
        }
        return Err(StoreError::io(target, e).into());
    }
    if let Err(e) = fs::remove_dir_all(&backup) {
        tracing::warn!(path = %backup.display(), error = %e, "could not remove replaced .kanuka directory");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        let device = DeviceId::generate();
        let public_key = format!(".kanuka/public_keys/{}", device.file_name(PUBLIC_KEY_EXT));
        let record = format!(".kanuka/secrets/{}", device.file_name(KANUKA_EXT));

        assert_eq!(classify(Path::new(".kanuka/config.toml")), Some(EntryKind::Registry));
        assert_eq!(classify(Path::new(&public_key)), Some(EntryKind::PublicKey));
        assert_eq!(classify(Path::new(&record)), Some(EntryKind::Record));
        assert_eq!(classify(Path::new("api/.env.kanuka")), Some(EntryKind::SecretFile));

        assert_eq!(classify(Path::new(".kanuka/public_keys/alice.pub")), None);
        assert_eq!(classify(Path::new(".kanuka/.env.kanuka")), None);
        assert_eq!(classify(Path::new("api/.env")), None);
        assert_eq!(classify(Path::new("README.md")), None);
    }

    #[test]
    fn test_unsafe_paths() {
        assert!(is_safe(Path::new("./.kanuka/config.toml")));
        assert!(!is_safe(Path::new("../.env.kanuka")));
        assert!(!is_safe(Path::new("/etc/.env.kanuka")));
    }
}
