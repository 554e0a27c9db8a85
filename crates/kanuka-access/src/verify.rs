//! Consistency checking and repair.
//!
//! The registry, the access records and the public keys have to agree one
//! to one. Nothing on a plain filesystem makes a multi-file update atomic,
//! so drift is expected after an interrupted command or a bad merge.
//! [`verify`] reports it; [`repair`] fixes whatever can be fixed without
//! guessing:
//!
//! | Finding | Repair |
//! |---|---|
//! | registered, public key, no record | finish the grant (caller needs access) |
//! | registered, no public key, no record | drop the entry (half-revoked) |
//! | registered, record, no public key | report only |
//! | record unreadable or the wrong size for its key | re-wrap it (caller needs access) |
//! | record or public key with no entry | delete the file |
//! | pending request without public key | drop the request |
//! | users index out of step with devices | rebuild it |

use std::collections::BTreeSet;
use std::fmt;

use kanuka_core::{AccessRecord, DeviceId, ProjectId, UserId};
use kanuka_store::{Overwrite, ProjectRegistry};
use serde::Serialize;

use crate::context::Context;
use crate::error::{AccessError, Result};
use crate::plan::{Change, ChangePlan};

/// One disagreement between the registry and the files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Issue {
    MissingRecord { device: DeviceId },
    MissingPublicKey { device: DeviceId },
    OrphanRecord { device: DeviceId },
    OrphanPublicKey { device: DeviceId },
    PendingHasRecord { device: DeviceId },
    PendingMissingPublicKey { device: DeviceId },
    UnreadableRecord { device: DeviceId, reason: String },
    UnreadablePublicKey { device: DeviceId, reason: String },
    UnindexedUser { device: DeviceId, email: String },
    UserWithoutDevice { user: UserId, email: String },
    CallerKeyMismatch { device: DeviceId },
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Issue::MissingRecord { device } => {
                write!(f, "device {} is registered but has no access record", device)
            }
            Issue::MissingPublicKey { device } => {
                write!(f, "device {} is registered but has no public key", device)
            }
            Issue::OrphanRecord { device } => {
                write!(f, "access record for unregistered device {}", device)
            }
            Issue::OrphanPublicKey { device } => {
                write!(f, "public key for unregistered device {}", device)
            }
            Issue::PendingHasRecord { device } => {
                write!(f, "pending request {} already has an access record", device)
            }
            Issue::PendingMissingPublicKey { device } => {
                write!(f, "pending request {} has no public key", device)
            }
            Issue::UnreadableRecord { device, reason } => {
                write!(f, "access record for {} is unreadable: {}", device, reason)
            }
            Issue::UnreadablePublicKey { device, reason } => {
                write!(f, "public key for {} is unreadable: {}", device, reason)
            }
            Issue::UnindexedUser { device, email } => {
                write!(f, "device {} belongs to {} who is not in the users index", device, email)
            }
            Issue::UserWithoutDevice { user, email } => {
                write!(f, "user {} ({}) has no devices", email, user)
            }
            Issue::CallerKeyMismatch { device } => {
                write!(f, "this machine's private key cannot open the record of device {}", device)
            }
        }
    }
}

/// The caller's own standing in the project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallerAccess {
    Granted,
    Pending,
    NoAccess,
    KeyMismatch,
}

/// Outcome of [`verify`].
#[derive(Debug, Clone, Serialize)]
pub struct ConsistencyReport {
    pub project: ProjectId,
    pub devices: usize,
    pub pending: usize,
    pub caller: CallerAccess,
    pub caller_device: Option<DeviceId>,
    pub issues: Vec<Issue>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.issues.is_empty()
    }

    /// `Err(Consistency)` listing the issues, if there are any.
    pub fn into_result(self) -> Result<Self> {
        if self.is_consistent() {
            return Ok(self);
        }
        let listed: Vec<String> = self.issues.iter().map(ToString::to_string).collect();
        Err(AccessError::Consistency(listed.join("; ")))
    }
}

/// Check the project in the context's root.
pub fn verify(ctx: &Context) -> Result<ConsistencyReport> {
    let registry = ctx.load_registry()?;
    verify_with(ctx, &registry)
}

/// Check against an already loaded registry.
pub fn verify_with(ctx: &Context, registry: &ProjectRegistry) -> Result<ConsistencyReport> {
    let records = ctx.records();
    let public_keys = ctx.public_keys();
    let record_files: BTreeSet<DeviceId> = records.list()?.into_iter().collect();
    let key_files: BTreeSet<DeviceId> = public_keys.list()?.into_iter().collect();
    let mut issues = Vec::new();

    for (device, entry) in registry.devices() {
        let record = if record_files.contains(device) {
            match records.read(device) {
                Ok(record) => Some(record),
                Err(e) => {
                    issues.push(Issue::UnreadableRecord {
                        device: *device,
                        reason: e.to_string(),
                    });
                    None
                }
            }
        } else {
            issues.push(Issue::MissingRecord { device: *device });
            None
        };

        let key = if key_files.contains(device) {
            match public_keys.read(device) {
                Ok(key) => Some(key),
                Err(e) => {
                    issues.push(Issue::UnreadablePublicKey {
                        device: *device,
                        reason: e.to_string(),
                    });
                    None
                }
            }
        } else {
            issues.push(Issue::MissingPublicKey { device: *device });
            None
        };

        if let (Some(record), Some(key)) = (&record, &key) {
            if let Err(e) = record.check_size(key) {
                issues.push(Issue::UnreadableRecord {
                    device: *device,
                    reason: e.to_string(),
                });
            }
        }

        if registry.user_for_email(&entry.email).is_none() {
            issues.push(Issue::UnindexedUser {
                device: *device,
                email: entry.email.clone(),
            });
        }
    }

    for (device, _) in registry.pending() {
        if !key_files.contains(device) {
            issues.push(Issue::PendingMissingPublicKey { device: *device });
        }
        if record_files.contains(device) {
            issues.push(Issue::PendingHasRecord { device: *device });
        }
    }

    for device in &record_files {
        if !registry.contains_device(device) && registry.pending_entry(device).is_none() {
            issues.push(Issue::OrphanRecord { device: *device });
        }
    }
    for device in &key_files {
        if !registry.contains_device(device) && registry.pending_entry(device).is_none() {
            issues.push(Issue::OrphanPublicKey { device: *device });
        }
    }

    for (user, email) in registry.users() {
        if registry.devices_for_email(email).is_empty() {
            issues.push(Issue::UserWithoutDevice {
                user: *user,
                email: email.clone(),
            });
        }
    }

    let caller_device = ctx.device_for(&registry.project_id());
    let caller = match ctx.unlock(registry) {
        Ok(_) => CallerAccess::Granted,
        Err(AccessError::RepairNeeded(_)) => {
            if let Some(device) = caller_device {
                issues.push(Issue::CallerKeyMismatch { device });
            }
            CallerAccess::KeyMismatch
        }
        Err(AccessError::AccessDenied(_)) | Err(AccessError::Consistency(_)) => {
            match caller_device {
                Some(device) if registry.pending_entry(&device).is_some() => CallerAccess::Pending,
                _ => CallerAccess::NoAccess,
            }
        }
        Err(AccessError::Corrupt { .. }) => CallerAccess::NoAccess,
        Err(e) => return Err(e),
    };

    tracing::debug!(
        project = %registry.project_id(),
        issues = issues.len(),
        "verified project"
    );
    Ok(ConsistencyReport {
        project: registry.project_id(),
        devices: registry.device_count(),
        pending: registry.pending().count(),
        caller,
        caller_device,
        issues,
    })
}

/// Outcome of [`repair`].
#[derive(Debug, Clone, Serialize)]
pub struct RepairReport {
    pub plan: ChangePlan,
    pub applied: bool,
    /// Issues left for a human.
    pub unresolved: Vec<Issue>,
}

/// Reconcile the registry with the files on disk.
pub fn repair(ctx: &Context, dry_run: bool) -> Result<RepairReport> {
    let mut registry = ctx.load_registry()?;
    let found = verify_with(ctx, &registry)?;
    let records = ctx.records();
    let public_keys = ctx.public_keys();

    let content_key = match found.caller {
        CallerAccess::Granted => Some(ctx.unlock(&registry)?.content_key),
        _ => None,
    };

    let mut deletions = Vec::new();
    let mut drop_devices = Vec::new();
    let mut drop_pending = Vec::new();
    let mut rewrap = Vec::new();
    let mut rebuild_users = false;
    let mut unresolved = Vec::new();

    for issue in &found.issues {
        match issue {
            Issue::MissingRecord { device } => {
                if !public_keys.exists(device) {
                    drop_devices.push(*device);
                } else if content_key.is_some() {
                    rewrap.push(*device);
                } else {
                    unresolved.push(issue.clone());
                }
            }
            Issue::MissingPublicKey { device } => {
                // Without a record too, the device is dropped above.
                if records.exists(device) {
                    unresolved.push(issue.clone());
                }
            }
            Issue::UnreadableRecord { device, .. } => {
                if content_key.is_some() && public_keys.read(device).is_ok() {
                    rewrap.push(*device);
                } else {
                    unresolved.push(issue.clone());
                }
            }
            Issue::OrphanRecord { device } => deletions.push(records.path(device)),
            Issue::OrphanPublicKey { device } => deletions.push(public_keys.path(device)),
            Issue::PendingMissingPublicKey { device } => drop_pending.push(*device),
            Issue::UnindexedUser { .. } | Issue::UserWithoutDevice { .. } => rebuild_users = true,
            Issue::PendingHasRecord { .. }
            | Issue::UnreadablePublicKey { .. }
            | Issue::CallerKeyMismatch { .. } => unresolved.push(issue.clone()),
        }
    }

    let mut plan = ChangePlan::new();
    for path in &deletions {
        plan.push(Change::DeleteFile { path: path.clone() });
    }
    for device in &drop_devices {
        if let Some(entry) = registry.device(device) {
            plan.push(Change::RemoveDevice {
                device: *device,
                email: entry.email.clone(),
                name: entry.name.clone(),
            });
        }
    }
    for device in &drop_pending {
        plan.push(Change::RemovePending { device: *device });
    }
    if rebuild_users {
        plan.push(Change::RebuildUsers);
    }
    for device in &rewrap {
        plan.push(Change::write(records.path(device)));
    }

    let mut report = RepairReport {
        plan,
        applied: false,
        unresolved,
    };
    if dry_run || report.plan.is_empty() {
        return Ok(report);
    }

    for path in &deletions {
        if let Err(e) = kanuka_store::fsutil::remove_if_exists(path) {
            tracing::warn!(path = %path.display(), error = %e, "could not delete orphaned file");
            return Err(e.into());
        }
    }

    let registry_changed = !drop_devices.is_empty() || !drop_pending.is_empty() || rebuild_users;
    for device in &drop_devices {
        registry.remove_device(device);
    }
    for device in &drop_pending {
        registry.remove_pending(device);
    }
    if rebuild_users {
        registry.rebuild_users();
    }
    if registry_changed {
        registry.save()?;
    }

    if let Some(content_key) = &content_key {
        for device in &rewrap {
            let key = public_keys.read(device)?;
            let record = AccessRecord::seal(content_key, &key)?;
            records.write(device, &record, Overwrite::Allow)?;
        }
    }

    tracing::info!(
        changes = report.plan.len(),
        unresolved = report.unresolved.len(),
        "repaired project"
    );
    report.applied = true;
    Ok(report)
}
