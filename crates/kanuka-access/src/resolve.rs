//! Resolving user-supplied identities to a [`DeviceId`].

use std::fmt;
use std::path::PathBuf;

use kanuka_core::DeviceId;
use kanuka_store::{ProjectLayout, ProjectRegistry};

use crate::error::{AccessError, Result};

/// How a command names a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// By UUID.
    Device(DeviceId),
    /// By its public key or access record file.
    File(PathBuf),
    /// By owner email, optionally narrowed to one device name.
    Email {
        email: String,
        device_name: Option<String>,
    },
}

impl Target {
    /// Interpret a free-form argument: a UUID, an email, or a file path.
    pub fn parse(arg: &str, device_name: Option<&str>) -> Self {
        if let Ok(device) = arg.parse::<DeviceId>() {
            return Target::Device(device);
        }
        if arg.contains('@') && !arg.contains(std::path::MAIN_SEPARATOR) {
            return Target::Email {
                email: arg.to_string(),
                device_name: device_name.map(str::to_string),
            };
        }
        Target::File(PathBuf::from(arg))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Device(device) => write!(f, "device {}", device),
            Target::File(path) => write!(f, "{}", path.display()),
            Target::Email {
                email,
                device_name: Some(name),
            } => write!(f, "{} ({})", email, name),
            Target::Email { email, .. } => write!(f, "{}", email),
        }
    }
}

/// Resolve to a device that is registered or has files on disk.
pub fn resolve_device(
    registry: &ProjectRegistry,
    layout: &ProjectLayout,
    target: &Target,
) -> Result<DeviceId> {
    let device = match target {
        Target::Device(device) => *device,
        Target::File(path) => layout
            .device_for_path(path)
            .ok_or_else(|| AccessError::UserNotFound(format!("{} (not a device file)", path.display())))?,
        Target::Email { email, device_name } => {
            let mut matches = registry.devices_for_email(email);
            if matches.is_empty() {
                matches = registry.pending_for_email(email);
            }
            return pick_by_name(registry, target, matches, device_name.as_deref());
        }
    };

    let known = registry.contains_device(&device)
        || registry.pending_entry(&device).is_some()
        || layout.access_record_path(&device).exists()
        || layout.public_key_path(&device).exists();
    if !known {
        return Err(AccessError::UserNotFound(target.to_string()));
    }
    Ok(device)
}

/// Resolve to a pending access request.
pub fn resolve_pending(registry: &ProjectRegistry, target: &Target) -> Result<DeviceId> {
    match target {
        Target::Device(device) if registry.pending_entry(device).is_some() => Ok(*device),
        Target::Device(_) | Target::File(_) => {
            Err(AccessError::UserNotFound(format!("pending request for {}", target)))
        }
        Target::Email { email, device_name } => {
            let matches = registry.pending_for_email(email);
            pick_by_name(registry, target, matches, device_name.as_deref())
        }
    }
}

fn pick_by_name(
    registry: &ProjectRegistry,
    target: &Target,
    candidates: Vec<DeviceId>,
    device_name: Option<&str>,
) -> Result<DeviceId> {
    let name_of = |device: &DeviceId| -> String {
        registry
            .device(device)
            .map(|e| e.name.clone())
            .or_else(|| registry.pending_entry(device).map(|e| e.name.clone()))
            .unwrap_or_default()
    };

    let candidates: Vec<DeviceId> = match device_name {
        Some(name) => candidates.into_iter().filter(|d| name_of(d) == name).collect(),
        None => candidates,
    };

    match candidates.as_slice() {
        [] => Err(AccessError::UserNotFound(target.to_string())),
        [device] => Ok(*device),
        many => Err(AccessError::Ambiguous {
            target: target.to_string(),
            candidates: many
                .iter()
                .map(|d| format!("{} ({})", name_of(d), d))
                .collect(),
        }),
    }
}
