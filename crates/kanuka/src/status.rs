//! Project status: who has access and which secret files are current.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use kanuka_access::{verify, CallerAccess, Context, Issue};
use kanuka_core::{DeviceId, ProjectId};
use kanuka_store::{secret_files, StoreError};
use serde::Serialize;

use crate::error::Result;

/// State of one registered device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    Active,
    MissingRecord,
    MissingPublicKey,
    /// Neither file is left, only the registry entry.
    HalfRevoked,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatus {
    pub device: DeviceId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub state: DeviceState,
    pub is_caller: bool,
}

/// One email and its devices.
#[derive(Debug, Clone, Serialize)]
pub struct MemberStatus {
    pub email: String,
    pub devices: Vec<DeviceStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingStatus {
    pub device: DeviceId,
    pub email: String,
    pub name: String,
    pub requested_at: DateTime<Utc>,
    pub is_caller: bool,
}

/// State of one secret file pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    /// Both files, the encrypted one at least as new.
    Encrypted,
    /// Plaintext changed after the last encryption.
    Stale,
    PlaintextOnly,
    EncryptedOnly,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileStatus {
    /// Plaintext path relative to the project root.
    pub path: PathBuf,
    pub state: FileState,
}

/// Outcome of [`status`].
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub project: ProjectId,
    pub name: String,
    pub root: PathBuf,
    pub caller: CallerAccess,
    pub caller_device: Option<DeviceId>,
    pub members: Vec<MemberStatus>,
    pub pending: Vec<PendingStatus>,
    pub files: Vec<FileStatus>,
    pub issues: Vec<Issue>,
}

/// Collect the status of the project in the context's root.
pub fn status(ctx: &Context) -> Result<StatusReport> {
    let registry = ctx.load_registry()?;
    let consistency = verify::verify_with(ctx, &registry)?;
    let caller_device = consistency.caller_device;
    let records = ctx.records();
    let public_keys = ctx.public_keys();

    let mut members: BTreeMap<String, Vec<DeviceStatus>> = BTreeMap::new();
    for (device, entry) in registry.devices() {
        let state = match (records.exists(device), public_keys.exists(device)) {
            (true, true) => DeviceState::Active,
            (false, true) => DeviceState::MissingRecord,
            (true, false) => DeviceState::MissingPublicKey,
            (false, false) => DeviceState::HalfRevoked,
        };
        members
            .entry(entry.email.to_lowercase())
            .or_default()
            .push(DeviceStatus {
                device: *device,
                name: entry.name.clone(),
                created_at: entry.created_at,
                state,
                is_caller: caller_device == Some(*device),
            });
    }

    let pending = registry
        .pending()
        .map(|(device, entry)| PendingStatus {
            device: *device,
            email: entry.email.clone(),
            name: entry.name.clone(),
            requested_at: entry.requested_at,
            is_caller: caller_device == Some(*device),
        })
        .collect();

    let root = ctx.layout().root().to_path_buf();
    Ok(StatusReport {
        project: registry.project_id(),
        name: registry.project_name().to_string(),
        files: file_states(&root)?,
        root,
        caller: consistency.caller,
        caller_device,
        members: members
            .into_iter()
            .map(|(email, devices)| MemberStatus { email, devices })
            .collect(),
        pending,
        issues: consistency.issues,
    })
}

fn file_states(root: &Path) -> Result<Vec<FileStatus>> {
    let mut states: BTreeMap<PathBuf, FileState> = BTreeMap::new();

    for plaintext in secret_files::discover_plaintext(root)? {
        let encrypted = secret_files::encrypted_path(&plaintext);
        let state = if encrypted.is_file() {
            if modified(&plaintext)? > modified(&encrypted)? {
                FileState::Stale
            } else {
                FileState::Encrypted
            }
        } else {
            FileState::PlaintextOnly
        };
        states.insert(plaintext, state);
    }
    for encrypted in secret_files::discover_encrypted(root)? {
        if let Some(plaintext) = secret_files::plaintext_path(&encrypted) {
            states.entry(plaintext).or_insert(FileState::EncryptedOnly);
        }
    }

    Ok(states
        .into_iter()
        .map(|(path, state)| FileStatus {
            path: path.strip_prefix(root).map(Path::to_path_buf).unwrap_or(path),
            state,
        })
        .collect())
}

fn modified(path: &Path) -> Result<SystemTime> {
    let meta = fs::metadata(path).map_err(|e| StoreError::io(path, e))?;
    Ok(meta.modified().map_err(|e| StoreError::io(path, e))?)
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Project {} ({})", self.name, self.project)?;
        let caller = match self.caller {
            CallerAccess::Granted => "granted",
            CallerAccess::Pending => "pending",
            CallerAccess::NoAccess => "no access",
            CallerAccess::KeyMismatch => "key mismatch, run `kanuka repair` or re-request access",
        };
        writeln!(f, "Your access: {}", caller)?;

        writeln!(f, "\nMembers:")?;
        for member in &self.members {
            writeln!(f, "  {}", member.email)?;
            for device in &member.devices {
                let marker = if device.is_caller { " (this device)" } else { "" };
                let state = match device.state {
                    DeviceState::Active => "",
                    DeviceState::MissingRecord => " [no access record]",
                    DeviceState::MissingPublicKey => " [no public key]",
                    DeviceState::HalfRevoked => " [half-revoked]",
                };
                writeln!(f, "    {} {}{}{}", device.device, device.name, marker, state)?;
            }
        }

        if !self.pending.is_empty() {
            writeln!(f, "\nPending requests:")?;
            for request in &self.pending {
                let marker = if request.is_caller { " (this device)" } else { "" };
                writeln!(
                    f,
                    "  {} {} {}{}",
                    request.device, request.email, request.name, marker
                )?;
            }
        }

        if !self.files.is_empty() {
            writeln!(f, "\nSecret files:")?;
            for file in &self.files {
                let state = match file.state {
                    FileState::Encrypted => "encrypted",
                    FileState::Stale => "modified since last encryption",
                    FileState::PlaintextOnly => "not encrypted",
                    FileState::EncryptedOnly => "encrypted only",
                };
                writeln!(f, "  {} {}", file.path.display(), state)?;
            }
        }

        if !self.issues.is_empty() {
            writeln!(f, "\nIssues:")?;
            for issue in &self.issues {
                writeln!(f, "  {}", issue)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_file_states() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("api")).unwrap();

        fs::write(root.join(".env"), b"A=1").unwrap();
        fs::write(root.join(".env.kanuka"), b"x").unwrap();
        fs::write(root.join("api/.env.local"), b"B=2").unwrap();
        fs::write(root.join(".env.prod.kanuka"), b"x").unwrap();
        fs::write(root.join("api/.env.test"), b"C=3").unwrap();
        fs::write(root.join("api/.env.test.kanuka"), b"x").unwrap();

        // Plaintext touched after encryption.
        let later = SystemTime::now() + Duration::from_secs(60);
        File::options()
            .write(true)
            .open(root.join("api/.env.test"))
            .unwrap()
            .set_modified(later)
            .unwrap();

        let states: Vec<(PathBuf, FileState)> = file_states(root)
            .unwrap()
            .into_iter()
            .map(|f| (f.path, f.state))
            .collect();
        assert_eq!(
            states,
            vec![
                (PathBuf::from(".env"), FileState::Encrypted),
                (PathBuf::from(".env.prod"), FileState::EncryptedOnly),
                (PathBuf::from("api/.env.local"), FileState::PlaintextOnly),
                (PathBuf::from("api/.env.test"), FileState::Stale),
            ]
        );
    }
}
