//! Creating projects and requesting access to them.

use kanuka_core::{AccessRecord, ContentKey, DeviceId, ProjectId, UserId};
use kanuka_store::{LayoutState, Overwrite, ProjectRegistry};
use serde::Serialize;

use crate::context::Context;
use crate::error::{AccessError, Result};

/// Outcome of [`init_project`].
#[derive(Debug, Clone, Serialize)]
pub struct InitReport {
    pub project: ProjectId,
    pub name: String,
    pub device: DeviceId,
    pub user: UserId,
    pub fingerprint: String,
}

/// Outcome of [`request_access`].
#[derive(Debug, Clone, Serialize)]
pub struct RequestReport {
    pub project: ProjectId,
    pub device: DeviceId,
    pub device_name: String,
    pub fingerprint: String,
    /// A previous pending request replaced because of `force`.
    pub replaced: Option<DeviceId>,
}

/// Create a new project in the context's root with the caller as its
/// first authorized device.
pub fn init_project(ctx: &mut Context, name: &str) -> Result<InitReport> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AccessError::InvalidOperation("project name must not be empty".into()));
    }
    match kanuka_store::detect_layout(ctx.layout().root()) {
        LayoutState::Current => {
            return Err(AccessError::ProjectExists(ctx.layout().root().to_path_buf()))
        }
        LayoutState::Legacy => {
            return Err(AccessError::LegacyLayout(ctx.layout().root().to_path_buf()))
        }
        LayoutState::Uninitialized => {}
    }

    let identity = ctx.identity()?.clone();
    let project = ProjectId::generate();
    let device = DeviceId::generate();

    let keypair = ctx.keys().generate(&project)?;
    let content_key = ContentKey::generate();
    let record = AccessRecord::seal(&content_key, keypair.public_key())?;

    ctx.keys().persist(&project, &keypair, Overwrite::Deny)?;
    ctx.public_keys().write(&device, keypair.public_key(), Overwrite::Deny)?;

    let mut registry = ProjectRegistry::create(ctx.layout().clone(), project, name);
    registry.add_device(device, identity.uuid, &identity.email, &identity.device_name);
    registry.save()?;
    ctx.records().write(&device, &record, Overwrite::Deny)?;

    let settings = ctx.settings_mut();
    settings.bind(project, device, &identity.device_name);
    settings.save()?;

    tracing::info!(%project, %device, name, "initialized project");
    Ok(InitReport {
        project,
        name: name.to_string(),
        device,
        user: identity.uuid,
        fingerprint: keypair.public_key().fingerprint()?,
    })
}

/// Publish a fresh key pair for this machine and record a pending request.
///
/// An authorized member completes the request with `grant`.
pub fn request_access(ctx: &mut Context, device_name: Option<&str>, force: bool) -> Result<RequestReport> {
    let mut registry = ctx.load_registry()?;
    let project = registry.project_id();
    let identity = ctx.identity()?.clone();
    let device_name = device_name.unwrap_or(&identity.device_name).to_string();

    let mut replaced = None;
    if let Some(existing) = ctx.device_for(&project) {
        if ctx.records().exists(&existing) && !force {
            return Err(AccessError::AlreadyExists(format!(
                "access for device {}",
                existing
            )));
        }
        if registry.pending_entry(&existing).is_some() {
            if !force {
                return Err(AccessError::AlreadyExists(format!(
                    "access request for device {}",
                    existing
                )));
            }
            replaced = Some(existing);
        }
    }

    let device = DeviceId::generate();
    let keypair = ctx.keys().generate(&project)?;
    ctx.keys().persist(&project, &keypair, Overwrite::from(force))?;

    if let Some(old) = replaced {
        if let Err(e) = ctx.public_keys().remove(&old) {
            tracing::warn!(device = %old, error = %e, "could not remove replaced public key");
        }
        registry.remove_pending(&old);
    }
    ctx.public_keys().write(&device, keypair.public_key(), Overwrite::Deny)?;
    registry.add_pending(device, identity.uuid, &identity.email, &device_name);
    registry.save()?;

    let settings = ctx.settings_mut();
    settings.bind(project, device, &device_name);
    settings.save()?;

    tracing::info!(%project, %device, device_name = %device_name, "requested access");
    Ok(RequestReport {
        project,
        device,
        device_name,
        fingerprint: keypair.public_key().fingerprint()?,
        replaced,
    })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::testutil::Member;

    #[test]
    fn test_init_creates_consistent_project() {
        let project = tempfile::tempdir().unwrap();
        let mut alice = Member::new(project.path(), "alice@example.com", "laptop");

        let report = init_project(&mut alice.ctx, "payments").unwrap();

        let registry = ProjectRegistry::load(project.path()).unwrap();
        assert_eq!(registry.project_id(), report.project);
        assert_eq!(registry.project_name(), "payments");
        assert!(registry.contains_device(&report.device));
        assert!(alice.ctx.records().exists(&report.device));
        assert!(alice.ctx.public_keys().exists(&report.device));
        assert_eq!(alice.ctx.device_for(&report.project), Some(report.device));

        alice.ctx.unlock(&registry).unwrap();
    }

    #[test]
    fn test_init_refuses_existing_project() {
        let project = tempfile::tempdir().unwrap();
        let mut alice = Member::new(project.path(), "alice@example.com", "laptop");
        init_project(&mut alice.ctx, "payments").unwrap();

        assert!(matches!(
            init_project(&mut alice.ctx, "again"),
            Err(AccessError::ProjectExists(_))
        ));
    }

    #[test]
    fn test_init_refuses_legacy_layout() {
        let project = tempfile::tempdir().unwrap();
        let mut alice = Member::new(project.path(), "alice@example.com", "laptop");
        let keys = alice.ctx.layout().public_keys_dir();
        fs::create_dir_all(&keys).unwrap();
        fs::write(keys.join("alice.pub"), "key").unwrap();

        assert!(matches!(
            init_project(&mut alice.ctx, "payments"),
            Err(AccessError::LegacyLayout(_))
        ));
    }

    #[test]
    fn test_request_access_adds_pending() {
        let project = tempfile::tempdir().unwrap();
        let mut alice = Member::new(project.path(), "alice@example.com", "laptop");
        init_project(&mut alice.ctx, "payments").unwrap();

        let mut bob = Member::new(project.path(), "bob@example.com", "workstation");
        let report = request_access(&mut bob.ctx, None, false).unwrap();

        let registry = ProjectRegistry::load(project.path()).unwrap();
        let pending = registry.pending_entry(&report.device).unwrap();
        assert_eq!(pending.email, "bob@example.com");
        assert_eq!(pending.name, "workstation");
        assert!(bob.ctx.public_keys().exists(&report.device));
        assert!(!bob.ctx.records().exists(&report.device));

        assert!(matches!(
            bob.ctx.unlock(&registry),
            Err(AccessError::AccessDenied(_))
        ));
    }

    #[test]
    fn test_repeat_request_needs_force() {
        let project = tempfile::tempdir().unwrap();
        let mut alice = Member::new(project.path(), "alice@example.com", "laptop");
        init_project(&mut alice.ctx, "payments").unwrap();
        let mut bob = Member::new(project.path(), "bob@example.com", "workstation");
        let first = request_access(&mut bob.ctx, None, false).unwrap();

        assert!(matches!(
            request_access(&mut bob.ctx, None, false),
            Err(AccessError::AlreadyExists(_))
        ));

        let second = request_access(&mut bob.ctx, Some("ws-2"), true).unwrap();
        assert_eq!(second.replaced, Some(first.device));

        let registry = ProjectRegistry::load(project.path()).unwrap();
        assert!(registry.pending_entry(&first.device).is_none());
        assert!(!bob.ctx.public_keys().exists(&first.device));
        assert_eq!(registry.pending_entry(&second.device).unwrap().name, "ws-2");
    }

    #[test]
    fn test_authorized_member_cannot_request_again() {
        let project = tempfile::tempdir().unwrap();
        let mut alice = Member::new(project.path(), "alice@example.com", "laptop");
        init_project(&mut alice.ctx, "payments").unwrap();

        assert!(matches!(
            request_access(&mut alice.ctx, None, false),
            Err(AccessError::AlreadyExists(_))
        ));
    }
}
