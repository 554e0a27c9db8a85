//! Revoking a device.
//!
//! Files go first (public key, then access record), the registry entry
//! last. File deletion is best effort: a failure is logged and reported
//! but the registry entry is still removed, so a half-cleaned device never
//! stays authorized.
//!
//! Revocation does not change the content key. A revoked device that kept
//! a copy of its record (in version control history, say) can still
//! recover the current key until a full rotation.

use std::collections::BTreeSet;

use kanuka_core::DeviceId;
use kanuka_store::ProjectRegistry;
use serde::Serialize;

use crate::context::Context;
use crate::error::{AccessError, Result};
use crate::plan::{Change, ChangePlan};
use crate::resolve::{self, Target};

/// Outcome of [`revoke`].
#[derive(Debug, Clone, Serialize)]
pub struct RevokeReport {
    pub device: DeviceId,
    pub email: Option<String>,
    pub device_name: Option<String>,
    pub plan: ChangePlan,
    pub applied: bool,
    /// Devices still authorized afterwards.
    pub remaining_devices: usize,
    /// Distinct users (by email) still authorized afterwards.
    pub remaining_users: usize,
    /// Always false: revoke never rotates the content key.
    pub content_key_rotated: bool,
    /// Best-effort steps that failed.
    pub warnings: Vec<String>,
}

impl RevokeReport {
    pub fn rotation_recommended(&self) -> bool {
        !self.content_key_rotated
    }
}

/// Compute what revoking `target` would change.
pub fn plan_revoke(ctx: &Context, target: &Target) -> Result<RevokeReport> {
    let registry = ctx.load_registry()?;
    plan_with(ctx, &registry, target)
}

/// Revoke `target`, or only report when `dry_run`.
pub fn revoke(ctx: &Context, target: &Target, dry_run: bool) -> Result<RevokeReport> {
    let mut registry = ctx.load_registry()?;
    let mut report = plan_with(ctx, &registry, target)?;
    if dry_run {
        return Ok(report);
    }

    let device = report.device;
    let public_keys = ctx.public_keys();
    let records = ctx.records();

    if let Err(e) = public_keys.remove(&device) {
        tracing::warn!(%device, error = %e, "could not delete public key");
        report.warnings.push(format!("could not delete public key: {}", e));
    }
    if let Err(e) = records.remove(&device) {
        tracing::warn!(%device, error = %e, "could not delete access record");
        report.warnings.push(format!("could not delete access record: {}", e));
    }

    if report.plan.iter().any(Change::is_registry_change) {
        registry.remove_device(&device);
        registry.remove_pending(&device);
        registry.save()?;
    }

    tracing::info!(
        %device,
        remaining = report.remaining_devices,
        warnings = report.warnings.len(),
        "revoked device"
    );
    report.applied = true;
    Ok(report)
}

fn plan_with(ctx: &Context, registry: &ProjectRegistry, target: &Target) -> Result<RevokeReport> {
    let device = resolve::resolve_device(registry, ctx.layout(), target)?;
    let entry = registry.device(&device);
    let pending = registry.pending_entry(&device);

    let mut plan = ChangePlan::new();
    let public_key = ctx.public_keys().path(&device);
    if public_key.exists() {
        plan.push(Change::DeleteFile { path: public_key });
    }
    let record = ctx.records().path(&device);
    if record.exists() {
        plan.push(Change::DeleteFile { path: record });
    }

    let mut warnings = Vec::new();
    if let Some(entry) = entry {
        plan.push(Change::RemoveDevice {
            device,
            email: entry.email.clone(),
            name: entry.name.clone(),
        });
        if registry.devices_for_email(&entry.email).len() == 1 {
            plan.push(Change::RemoveUser {
                email: entry.email.clone(),
            });
        }
        if !ctx.records().exists(&device) {
            warnings.push(format!(
                "device {} was registered without an access record (half-revoked)",
                device
            ));
        }
    } else if !ctx.records().exists(&device) && pending.is_none() {
        // Only a stray public key left.
        warnings.push(format!("device {} is not registered", device));
    }
    if pending.is_some() {
        plan.push(Change::RemovePending { device });
    }

    if plan.is_empty() {
        return Err(AccessError::UserNotFound(target.to_string()));
    }

    let remaining: Vec<_> = registry
        .devices()
        .filter(|(id, _)| **id != device)
        .map(|(_, entry)| entry)
        .collect();
    let remaining_users = remaining
        .iter()
        .map(|entry| entry.email.to_ascii_lowercase())
        .collect::<BTreeSet<_>>()
        .len();

    Ok(RevokeReport {
        device,
        email: entry.map(|e| e.email.clone()).or_else(|| pending.map(|p| p.email.clone())),
        device_name: entry.map(|e| e.name.clone()).or_else(|| pending.map(|p| p.name.clone())),
        plan,
        applied: false,
        remaining_devices: remaining.len(),
        remaining_users,
        content_key_rotated: false,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::grant::{grant, GrantOptions, GrantTarget};
    use crate::project::{init_project, request_access};
    use crate::testutil::{snapshot, two_member_project, Member};

    #[test]
    fn test_revoke_removes_files_and_entry() {
        let (_project, alice, bob, device) = two_member_project();

        let report = revoke(&alice.ctx, &Target::parse("bob@example.com", None), false).unwrap();
        assert!(report.applied);
        assert_eq!(report.remaining_devices, 1);
        assert_eq!(report.remaining_users, 1);
        assert!(!report.content_key_rotated);
        assert!(report.rotation_recommended());

        let registry = alice.ctx.load_registry().unwrap();
        assert!(!registry.contains_device(&device));
        assert!(registry.user_for_email("bob@example.com").is_none());
        assert!(!alice.ctx.records().exists(&device));
        assert!(!alice.ctx.public_keys().exists(&device));

        assert!(matches!(bob.ctx.unlock(&registry), Err(AccessError::AccessDenied(_))));
        assert!(matches!(
            revoke(&alice.ctx, &Target::Device(device), false),
            Err(AccessError::UserNotFound(_))
        ));
    }

    #[test]
    fn test_dry_run_is_exact_and_mutates_nothing() {
        let (project, alice, _bob, device) = two_member_project();
        let before = snapshot(project.path());

        let dry = revoke(&alice.ctx, &Target::Device(device), true).unwrap();
        assert!(!dry.applied);
        assert_eq!(snapshot(project.path()), before);
        assert_eq!(dry.remaining_devices, 1);
        assert_eq!(dry.remaining_users, 1);

        let real = revoke(&alice.ctx, &Target::Device(device), false).unwrap();
        assert_eq!(dry.plan, real.plan);

        let after = snapshot(project.path());
        let deleted: Vec<_> = before.keys().filter(|p| !after.contains_key(*p)).collect();
        let planned: Vec<_> = real
            .plan
            .iter()
            .filter_map(|c| match c {
                Change::DeleteFile { path } => Some(path),
                _ => None,
            })
            .collect();
        assert_eq!(deleted, planned);
    }

    #[test]
    fn test_revoke_by_file_path() {
        let (_project, alice, _bob, device) = two_member_project();
        let path = alice.ctx.records().path(&device);

        let report = revoke(&alice.ctx, &Target::File(path), false).unwrap();
        assert_eq!(report.device, device);
    }

    #[test]
    fn test_registry_updated_even_if_file_delete_fails() {
        let (_project, alice, _bob, device) = two_member_project();

        // Replace the public key file with a non-empty directory.
        let pk = alice.ctx.public_keys().path(&device);
        fs::remove_file(&pk).unwrap();
        fs::create_dir_all(pk.join("blocker")).unwrap();

        let report = revoke(&alice.ctx, &Target::Device(device), false).unwrap();
        assert_eq!(report.warnings.len(), 1);

        let registry = alice.ctx.load_registry().unwrap();
        assert!(!registry.contains_device(&device));
        assert!(!alice.ctx.records().exists(&device));
    }

    #[test]
    fn test_revoke_half_revoked_device_warns() {
        let (_project, alice, _bob, device) = two_member_project();
        fs::remove_file(alice.ctx.records().path(&device)).unwrap();

        let report = revoke(&alice.ctx, &Target::Device(device), false).unwrap();
        assert!(report.warnings.iter().any(|w| w.contains("half-revoked")));
        assert!(!alice.ctx.load_registry().unwrap().contains_device(&device));
    }

    #[test]
    fn test_revoke_pending_request() {
        let project = tempfile::tempdir().unwrap();
        let mut alice = Member::new(project.path(), "alice@example.com", "laptop");
        init_project(&mut alice.ctx, "payments").unwrap();
        let mut bob = Member::new(project.path(), "bob@example.com", "workstation");
        let device = request_access(&mut bob.ctx, None, false).unwrap().device;

        let report = revoke(&alice.ctx, &Target::parse("bob@example.com", None), false).unwrap();
        assert!(report.plan.iter().any(|c| matches!(c, Change::RemovePending { .. })));

        let registry = alice.ctx.load_registry().unwrap();
        assert!(registry.pending_entry(&device).is_none());
        assert!(!alice.ctx.public_keys().exists(&device));
    }

    #[test]
    fn test_email_with_several_devices_is_ambiguous() {
        let (project, alice, _bob, _device) = two_member_project();
        let mut bob2 = Member::new(project.path(), "bob@example.com", "phone");
        let phone = request_access(&mut bob2.ctx, None, false).unwrap().device;
        grant(
            &alice.ctx,
            &GrantTarget::Known(Target::Device(phone)),
            GrantOptions::default(),
        )
        .unwrap();

        assert!(matches!(
            plan_revoke(&alice.ctx, &Target::parse("bob@example.com", None)),
            Err(AccessError::Ambiguous { .. })
        ));

        let report = revoke(&alice.ctx, &Target::parse("bob@example.com", Some("phone")), false).unwrap();
        assert_eq!(report.device, phone);
        // Bob still has the workstation, so the user stays.
        assert!(!report.plan.iter().any(|c| matches!(c, Change::RemoveUser { .. })));
        assert!(alice
            .ctx
            .load_registry()
            .unwrap()
            .user_for_email("bob@example.com")
            .is_some());
    }
}
