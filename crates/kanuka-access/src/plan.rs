//! Change plans.
//!
//! Every mutating operation first computes a [`ChangePlan`], then either
//! returns it untouched (dry run) or applies it. A dry run therefore
//! reports exactly what the real run would do.

use std::fmt;
use std::path::{Path, PathBuf};

use kanuka_core::DeviceId;
use serde::Serialize;

/// One filesystem or registry change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Change {
    CreateFile { path: PathBuf },
    ReplaceFile { path: PathBuf },
    DeleteFile { path: PathBuf },
    AddDevice { device: DeviceId, email: String, name: String },
    UpdateDevice { device: DeviceId },
    RemoveDevice { device: DeviceId, email: String, name: String },
    AddPending { device: DeviceId, email: String, name: String },
    RemovePending { device: DeviceId },
    RemoveUser { email: String },
    RebuildUsers,
}

impl Change {
    /// Create or replace, depending on whether `path` exists now.
    pub fn write(path: PathBuf) -> Self {
        if path.exists() {
            Change::ReplaceFile { path }
        } else {
            Change::CreateFile { path }
        }
    }

    /// The file this change touches, if any.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Change::CreateFile { path } | Change::ReplaceFile { path } | Change::DeleteFile { path } => {
                Some(path)
            }
            _ => None,
        }
    }

    pub fn is_registry_change(&self) -> bool {
        self.path().is_none()
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Change::CreateFile { path } => write!(f, "create {}", path.display()),
            Change::ReplaceFile { path } => write!(f, "replace {}", path.display()),
            Change::DeleteFile { path } => write!(f, "delete {}", path.display()),
            Change::AddDevice { device, email, name } => {
                write!(f, "register device {} ({}, {})", device, email, name)
            }
            Change::UpdateDevice { device } => write!(f, "update registry entry {}", device),
            Change::RemoveDevice { device, email, name } => {
                write!(f, "unregister device {} ({}, {})", device, email, name)
            }
            Change::AddPending { device, email, name } => {
                write!(f, "record access request {} ({}, {})", device, email, name)
            }
            Change::RemovePending { device } => write!(f, "clear access request {}", device),
            Change::RemoveUser { email } => write!(f, "remove user {}", email),
            Change::RebuildUsers => write!(f, "rebuild users index"),
        }
    }
}

/// An ordered list of changes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ChangePlan {
    changes: Vec<Change>,
}

impl ChangePlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, change: Change) {
        self.changes.push(change);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Change> {
        self.changes.iter()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Paths of every file the plan creates, replaces or deletes.
    pub fn touched_paths(&self) -> Vec<&Path> {
        self.changes.iter().filter_map(Change::path).collect()
    }
}

impl<'a> IntoIterator for &'a ChangePlan {
    type Item = &'a Change;
    type IntoIter = std::slice::Iter<'a, Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.iter()
    }
}

impl fmt::Display for ChangePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for change in &self.changes {
            writeln!(f, "  - {}", change)?;
        }
        Ok(())
    }
}
