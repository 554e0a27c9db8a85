//! Key rotation.
//!
//! Two variants:
//!
//! - [`rotate_self`] replaces the caller's own key pair. The content key
//!   value is unchanged, so nobody else has to do anything.
//! - [`rotate_content_key`] replaces the content key itself, re-wraps it for
//!   every registered device and re-encrypts every secret file. This is the
//!   follow-up that makes a revocation final.

use std::path::{Path, PathBuf};

use kanuka_core::{AccessRecord, ContentKey, DeviceId, EncryptedPayload, KeyPair};
use kanuka_store::{secret_files, Overwrite, StoreError};
use serde::Serialize;

use crate::context::Context;
use crate::error::{AccessError, Result};
use crate::plan::{Change, ChangePlan};
use crate::verify;

/// Outcome of [`rotate_self`].
#[derive(Debug, Clone, Serialize)]
pub struct RotateReport {
    pub device: DeviceId,
    pub old_fingerprint: String,
    pub new_fingerprint: Option<String>,
    pub plan: ChangePlan,
    pub applied: bool,
    pub warnings: Vec<String>,
}

/// Outcome of [`rotate_content_key`].
#[derive(Debug, Clone, Serialize)]
pub struct ContentRotationReport {
    pub devices: usize,
    pub files: usize,
    pub plan: ChangePlan,
    pub applied: bool,
}

/// Replace the caller's key pair, keeping the content key.
///
/// Once the new private key is on disk the old one is gone. If writing the
/// new record fails after that point the device can no longer open its
/// record, and the error is [`AccessError::RepairNeeded`].
pub fn rotate_self(ctx: &Context, dry_run: bool) -> Result<RotateReport> {
    let mut registry = ctx.load_registry()?;
    let unlocked = ctx.unlock(&registry)?;
    let project = registry.project_id();
    let device = unlocked.device;

    let mut plan = ChangePlan::new();
    plan.push(Change::ReplaceFile {
        path: ctx.keys().private_key_path(&project),
    });
    plan.push(Change::write(ctx.keys().public_key_path(&project)));
    plan.push(Change::write(ctx.public_keys().path(&device)));
    plan.push(Change::ReplaceFile {
        path: ctx.records().path(&device),
    });
    if registry.contains_device(&device) {
        plan.push(Change::UpdateDevice { device });
    }

    let mut report = RotateReport {
        device,
        old_fingerprint: unlocked.keypair.public_key().fingerprint()?,
        new_fingerprint: None,
        plan,
        applied: false,
        warnings: Vec::new(),
    };
    if dry_run {
        return Ok(report);
    }

    let new_keypair = ctx.keys().generate(&project)?;
    let record = AccessRecord::seal(&unlocked.content_key, new_keypair.public_key())?;

    if let Err(e) = ctx.keys().persist(&project, &new_keypair, Overwrite::Allow) {
        if private_key_replaced(ctx, &project, &new_keypair) {
            return Err(repair_needed(device, &e));
        }
        return Err(e.into());
    }

    if let Err(e) = ctx
        .public_keys()
        .write(&device, new_keypair.public_key(), Overwrite::Allow)
    {
        return Err(repair_needed(device, &e));
    }
    if let Err(e) = ctx.records().write(&device, &record, Overwrite::Allow) {
        return Err(repair_needed(device, &e));
    }

    if registry.touch_device(&device) {
        if let Err(e) = registry.save() {
            tracing::warn!(%device, error = %e, "rotated key but could not update registry timestamp");
            report
                .warnings
                .push(format!("registry timestamp not updated: {}", e));
        }
    }

    report.new_fingerprint = Some(new_keypair.public_key().fingerprint()?);
    report.applied = true;
    tracing::info!(%device, "rotated device key pair");
    Ok(report)
}

fn private_key_replaced(ctx: &Context, project: &kanuka_core::ProjectId, new: &KeyPair) -> bool {
    ctx.keys()
        .load(project)
        .map(|kp| kp.public_key() == new.public_key())
        .unwrap_or(false)
}

fn repair_needed(device: DeviceId, cause: &StoreError) -> AccessError {
    tracing::error!(%device, error = %cause, "key pair replaced but access record not updated");
    AccessError::RepairNeeded(format!(
        "the new private key for device {} is in place but its access record could not be updated: {}",
        device, cause
    ))
}

/// Replace the content key for the whole project.
///
/// Requires a consistent project: every registered device needs its public
/// key. All new ciphertexts are computed before the first write and staged
/// next to the files they replace. Then the access records are replaced and
/// finally the staged files are renamed into place.
///
/// Between the first record write and the last rename, members whose record
/// already holds the new key cannot read the files not yet renamed. A failure
/// in that window is [`AccessError::RotationIncomplete`]; running the rotation
/// again picks up the staged files and finishes it.
pub fn rotate_content_key(ctx: &Context, dry_run: bool) -> Result<ContentRotationReport> {
    let registry = ctx.load_registry()?;
    let unlocked = ctx.unlock(&registry)?;
    verify::verify_with(ctx, &registry)?.into_result()?;

    let new_key = ContentKey::generate();
    let public_keys = ctx.public_keys();
    let records = ctx.records();

    let mut new_records: Vec<(DeviceId, AccessRecord)> = Vec::new();
    for (device, _) in registry.devices() {
        let key = public_keys.read(device)?;
        new_records.push((*device, AccessRecord::seal(&new_key, &key)?));
    }

    let mut new_files: Vec<(PathBuf, EncryptedPayload)> = Vec::new();
    for path in secret_files::discover_encrypted(ctx.layout().root())? {
        let plaintext = current_plaintext(&path, &unlocked.content_key)?;
        new_files.push((path, EncryptedPayload::encrypt(&plaintext, &new_key)?));
    }

    let mut plan = ChangePlan::new();
    for (device, _) in &new_records {
        plan.push(Change::ReplaceFile {
            path: records.path(device),
        });
    }
    for (path, _) in &new_files {
        plan.push(Change::ReplaceFile { path: path.clone() });
    }

    let report = ContentRotationReport {
        devices: new_records.len(),
        files: new_files.len(),
        plan,
        applied: false,
    };
    if dry_run {
        return Ok(report);
    }

    for (staged, (path, payload)) in new_files.iter().enumerate() {
        if let Err(e) = secret_files::write_encrypted(&secret_files::staged_path(path), payload) {
            discard_staged(&new_files[..staged]);
            return Err(e.into());
        }
    }

    for (written, (device, record)) in new_records.iter().enumerate() {
        if let Err(e) = records.write(device, record, Overwrite::Allow) {
            if written == 0 {
                discard_staged(&new_files);
                return Err(e.into());
            }
            tracing::error!(written, total = new_records.len(), error = %e, "content key rotation interrupted");
            return Err(AccessError::RotationIncomplete(format!(
                "{} of {} access records hold the new content key: {}",
                written,
                new_records.len(),
                e
            )));
        }
    }

    for (published, (path, _)) in new_files.iter().enumerate() {
        if let Err(e) = secret_files::publish_staged(path) {
            tracing::error!(published, total = new_files.len(), error = %e, "content key rotation interrupted");
            return Err(AccessError::RotationIncomplete(format!(
                "access records hold the new content key but only {} of {} secret files were moved into place: {}",
                published,
                new_files.len(),
                e
            )));
        }
    }

    tracing::info!(devices = report.devices, files = report.files, "rotated content key");
    Ok(ContentRotationReport {
        applied: true,
        ..report
    })
}

/// Plaintext of an encrypted file under the caller's current key.
///
/// After an interrupted rotation the caller may already hold the new key,
/// and then only the staged copy opens with it.
fn current_plaintext(path: &Path, key: &ContentKey) -> Result<Vec<u8>> {
    let staged = secret_files::staged_path(path);
    if staged.exists() {
        match secret_files::read_encrypted(&staged).map(|p| p.decrypt(key)) {
            Ok(Ok(plaintext)) => return Ok(plaintext),
            _ => tracing::debug!(path = %staged.display(), "ignoring stale staged file"),
        }
    }

    let payload = secret_files::read_encrypted(path)?;
    payload.decrypt(key).map_err(|e| AccessError::Corrupt {
        path: path.to_path_buf(),
        reason: format!("cannot decrypt with the current content key: {}", e),
    })
}

fn discard_staged(files: &[(PathBuf, EncryptedPayload)]) {
    for (path, _) in files {
        let staged = secret_files::staged_path(path);
        if let Err(e) = kanuka_store::fsutil::remove_if_exists(&staged) {
            tracing::warn!(path = %staged.display(), error = %e, "could not remove staged file");
        }
    }
}
