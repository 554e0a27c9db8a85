//! Granting a device access to the project.
//!
//! The caller unwraps the content key with their own access record and
//! wraps it again under the target device's public key.
//!
//! ## Write order
//!
//! 1. Public key file (direct grants only)
//! 2. Registry entry, saved
//! 3. Access record
//!
//! A record never exists without a registry entry. If step 3 fails the
//! registry addition is rolled back; if the rollback fails too the error
//! says so and `repair` completes or drops the half-granted entry.

use kanuka_core::{AccessRecord, DeviceId, PublicKey, UserId};
use kanuka_store::{Overwrite, ProjectRegistry, StoreError};
use serde::Serialize;

use crate::context::Context;
use crate::error::{AccessError, Result};
use crate::plan::{Change, ChangePlan};
use crate::resolve::{self, Target};

/// Who receives access.
#[derive(Debug, Clone)]
pub enum GrantTarget {
    /// A device already known to the project, usually a pending request.
    Known(Target),
    /// A public key handed over out of band.
    PublicKey {
        key: PublicKey,
        email: String,
        device_name: String,
    },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GrantOptions {
    /// Replace an existing access record.
    pub force: bool,
    /// Compute the plan without writing anything.
    pub dry_run: bool,
}

/// Outcome of [`grant`].
#[derive(Debug, Clone, Serialize)]
pub struct GrantReport {
    pub device: DeviceId,
    pub email: String,
    pub device_name: String,
    pub fingerprint: String,
    pub plan: ChangePlan,
    pub applied: bool,
}

struct Recipient {
    device: DeviceId,
    user: UserId,
    email: String,
    name: String,
    key: PublicKey,
    publish_key: bool,
}

/// Grant `target` access to the project.
pub fn grant(ctx: &Context, target: &GrantTarget, options: GrantOptions) -> Result<GrantReport> {
    let mut registry = ctx.load_registry()?;
    let unlocked = ctx.unlock(&registry)?;
    let recipient = resolve_recipient(ctx, &registry, target)?;

    if ctx.records().exists(&recipient.device) && !options.force {
        return Err(AccessError::AlreadyExists(format!(
            "access record for device {} ({})",
            recipient.device, recipient.email
        )));
    }

    let plan = plan_grant(ctx, &registry, &recipient);
    let mut report = GrantReport {
        device: recipient.device,
        email: recipient.email.clone(),
        device_name: recipient.name.clone(),
        fingerprint: recipient.key.fingerprint()?,
        plan,
        applied: false,
    };
    if options.dry_run {
        return Ok(report);
    }

    let record = AccessRecord::seal(&unlocked.content_key, &recipient.key)?;
    let device = recipient.device;

    if recipient.publish_key {
        ctx.public_keys().write(&device, &recipient.key, Overwrite::Deny)?;
    }

    let was_registered = registry.contains_device(&device);
    let pending = registry.remove_pending(&device);
    registry.add_device(device, recipient.user, &recipient.email, &recipient.name);
    if let Err(e) = registry.save() {
        if recipient.publish_key {
            discard_public_key(ctx, &device);
        }
        return Err(e.into());
    }

    if let Err(e) = ctx.records().write(&device, &record, Overwrite::from(options.force)) {
        tracing::warn!(%device, error = %e, "access record write failed, rolling back registry");
        if !was_registered {
            registry.remove_device(&device);
            if let Some(p) = pending {
                registry.add_pending(device, p.user, &p.email, &p.name);
            }
            if let Err(rollback) = registry.save() {
                return Err(AccessError::Consistency(format!(
                    "writing the access record for {} failed ({}) and the registry entry could not be rolled back ({})",
                    device, e, rollback
                )));
            }
            if recipient.publish_key {
                discard_public_key(ctx, &device);
            }
        }
        return Err(e.into());
    }

    tracing::info!(%device, email = %recipient.email, "granted access");
    report.applied = true;
    Ok(report)
}

fn plan_grant(ctx: &Context, registry: &ProjectRegistry, recipient: &Recipient) -> ChangePlan {
    let device = recipient.device;
    let mut plan = ChangePlan::new();
    if recipient.publish_key {
        plan.push(Change::CreateFile {
            path: ctx.public_keys().path(&device),
        });
    }
    if registry.contains_device(&device) {
        plan.push(Change::UpdateDevice { device });
    } else {
        plan.push(Change::AddDevice {
            device,
            email: recipient.email.clone(),
            name: recipient.name.clone(),
        });
    }
    if registry.pending_entry(&device).is_some() {
        plan.push(Change::RemovePending { device });
    }
    plan.push(Change::write(ctx.records().path(&device)));
    plan
}

fn resolve_recipient(
    ctx: &Context,
    registry: &ProjectRegistry,
    target: &GrantTarget,
) -> Result<Recipient> {
    match target {
        GrantTarget::Known(target) => {
            let device = match resolve::resolve_pending(registry, target) {
                Ok(device) => device,
                Err(AccessError::UserNotFound(_)) => {
                    resolve::resolve_device(registry, ctx.layout(), target)?
                }
                Err(e) => return Err(e),
            };

            let (user, email, name) = if let Some(p) = registry.pending_entry(&device) {
                (p.user, p.email.clone(), p.name.clone())
            } else if let Some(d) = registry.device(&device) {
                let user = registry
                    .user_for_email(&d.email)
                    .unwrap_or_else(UserId::generate);
                (user, d.email.clone(), d.name.clone())
            } else {
                return Err(AccessError::UserNotFound(format!(
                    "{} (files exist but the registry does not list it)",
                    target
                )));
            };

            let key = match ctx.public_keys().read(&device) {
                Ok(key) => key,
                Err(StoreError::NotFound { path, .. }) => {
                    return Err(AccessError::Consistency(format!(
                        "device {} has no public key at {}",
                        device,
                        path.display()
                    )))
                }
                Err(e) => return Err(e.into()),
            };

            Ok(Recipient {
                device,
                user,
                email,
                name,
                key,
                publish_key: false,
            })
        }
        GrantTarget::PublicKey {
            key,
            email,
            device_name,
        } => {
            let existing = find_device_by_key(ctx, key)?;
            let device = existing.unwrap_or_else(DeviceId::generate);
            let user = registry
                .user_for_email(email)
                .or_else(|| registry.pending_entry(&device).map(|p| p.user))
                .unwrap_or_else(UserId::generate);
            Ok(Recipient {
                device,
                user,
                email: email.clone(),
                name: device_name.clone(),
                key: key.clone(),
                publish_key: existing.is_none(),
            })
        }
    }
}

/// The device whose published public key equals `key`, if any.
fn find_device_by_key(ctx: &Context, key: &PublicKey) -> Result<Option<DeviceId>> {
    let directory = ctx.public_keys();
    for device in directory.list()? {
        match directory.read(&device) {
            Ok(existing) if &existing == key => return Ok(Some(device)),
            Ok(_) => {}
            Err(e) => tracing::debug!(%device, error = %e, "skipping unreadable public key"),
        }
    }
    Ok(None)
}

fn discard_public_key(ctx: &Context, device: &DeviceId) {
    if let Err(e) = ctx.public_keys().remove(device) {
        tracing::warn!(%device, error = %e, "could not remove public key after failed grant");
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use kanuka_core::KeyPair;

    use super::*;
    use crate::project::{init_project, request_access};
    use crate::testutil::{snapshot, Member};

    fn project_with_pending() -> (tempfile::TempDir, Member, Member, DeviceId) {
        let project = tempfile::tempdir().unwrap();
        let mut alice = Member::new(project.path(), "alice@example.com", "laptop");
        init_project(&mut alice.ctx, "payments").unwrap();
        let mut bob = Member::new(project.path(), "bob@example.com", "workstation");
        let request = request_access(&mut bob.ctx, None, false).unwrap();
        (project, alice, bob, request.device)
    }

    fn by_email(email: &str) -> GrantTarget {
        GrantTarget::Known(Target::parse(email, None))
    }

    #[test]
    fn test_granted_device_recovers_same_key() {
        let (_project, alice, bob, device) = project_with_pending();

        let report = grant(&alice.ctx, &by_email("bob@example.com"), GrantOptions::default()).unwrap();
        assert!(report.applied);
        assert_eq!(report.device, device);

        let registry = alice.ctx.load_registry().unwrap();
        assert!(registry.contains_device(&device));
        assert!(registry.pending_entry(&device).is_none());

        let alice_key = alice.ctx.unlock(&registry).unwrap().content_key;
        let bob_key = bob.ctx.unlock(&registry).unwrap().content_key;
        assert_eq!(alice_key, bob_key);
    }

    #[test]
    fn test_regrant_without_force_changes_nothing() {
        let (project, alice, _bob, device) = project_with_pending();
        grant(&alice.ctx, &by_email("bob@example.com"), GrantOptions::default()).unwrap();
        let before = snapshot(project.path());

        let result = grant(
            &alice.ctx,
            &GrantTarget::Known(Target::Device(device)),
            GrantOptions::default(),
        );
        assert!(matches!(result, Err(AccessError::AlreadyExists(_))));
        assert_eq!(snapshot(project.path()), before);
    }

    #[test]
    fn test_forced_regrant_rewraps_same_key() {
        let (_project, alice, bob, device) = project_with_pending();
        grant(&alice.ctx, &by_email("bob@example.com"), GrantOptions::default()).unwrap();
        let first = fs::read(bob.ctx.records().path(&device)).unwrap();

        let options = GrantOptions {
            force: true,
            ..Default::default()
        };
        grant(&alice.ctx, &by_email("bob@example.com"), options).unwrap();
        let second = fs::read(bob.ctx.records().path(&device)).unwrap();

        // OAEP is randomized, so only the unwrapped key is comparable.
        assert_ne!(first, second);
        let registry = bob.ctx.load_registry().unwrap();
        assert_eq!(
            bob.ctx.unlock(&registry).unwrap().content_key,
            alice.ctx.unlock(&registry).unwrap().content_key
        );
    }

    #[test]
    fn test_grant_requires_caller_access() {
        let (project, _alice, bob, _device) = project_with_pending();
        let mut carol = Member::new(project.path(), "carol@example.com", "phone");
        request_access(&mut carol.ctx, None, false).unwrap();

        let result = grant(&bob.ctx, &by_email("carol@example.com"), GrantOptions::default());
        assert!(matches!(result, Err(AccessError::AccessDenied(_))));
    }

    #[test]
    fn test_dry_run_matches_real_run() {
        let (project, alice, _bob, _device) = project_with_pending();
        let before = snapshot(project.path());

        let options = GrantOptions {
            dry_run: true,
            ..Default::default()
        };
        let dry = grant(&alice.ctx, &by_email("bob@example.com"), options).unwrap();
        assert!(!dry.applied);
        assert_eq!(snapshot(project.path()), before);

        let real = grant(&alice.ctx, &by_email("bob@example.com"), GrantOptions::default()).unwrap();
        assert_eq!(dry.plan, real.plan);
    }

    #[test]
    fn test_direct_public_key_grant() {
        let project = tempfile::tempdir().unwrap();
        let mut alice = Member::new(project.path(), "alice@example.com", "laptop");
        init_project(&mut alice.ctx, "payments").unwrap();

        let outside = KeyPair::generate().unwrap();
        let target = GrantTarget::PublicKey {
            key: outside.public_key().clone(),
            email: "erin@example.com".into(),
            device_name: "ci".into(),
        };
        let report = grant(&alice.ctx, &target, GrantOptions::default()).unwrap();

        let registry = alice.ctx.load_registry().unwrap();
        assert_eq!(registry.device(&report.device).unwrap().name, "ci");
        assert!(registry.user_for_email("erin@example.com").is_some());
        assert_eq!(
            &alice.ctx.public_keys().read(&report.device).unwrap(),
            outside.public_key()
        );

        let record = alice.ctx.records().read(&report.device).unwrap();
        assert_eq!(
            record.open(outside.private_key()).unwrap(),
            alice.ctx.unlock(&registry).unwrap().content_key
        );

        // Same key again resolves to the same device.
        assert!(matches!(
            grant(&alice.ctx, &target, GrantOptions::default()),
            Err(AccessError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_failed_record_write_rolls_back_registry() {
        let (_project, alice, bob, device) = project_with_pending();

        // A directory at the record path makes the write fail.
        fs::create_dir_all(bob.ctx.records().path(&device)).unwrap();

        let result = grant(&alice.ctx, &by_email("bob@example.com"), GrantOptions::default());
        assert!(result.is_err());

        let registry = alice.ctx.load_registry().unwrap();
        assert!(!registry.contains_device(&device));
        assert!(registry.pending_entry(&device).is_some());
        assert!(registry.user_for_email("bob@example.com").is_none());
    }
}
