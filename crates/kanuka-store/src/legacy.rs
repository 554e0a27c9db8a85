//! Detection of pre-registry project layouts.
//!
//! Older projects named public keys and records after usernames
//! (`public_keys/alice.pub`) and had no `config.toml`. Detection is all the
//! store offers; converting such a project is a separate migration step.

use std::fs;
use std::path::Path;

use kanuka_core::DeviceId;

use crate::layout::{ProjectLayout, PUBLIC_KEY_EXT};

/// What kind of project lives at a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutState {
    /// No `.kanuka` directory, or one with nothing recognizable in it.
    Uninitialized,
    /// Per-username public keys and no registry.
    Legacy,
    /// A registry file is present.
    Current,
}

/// Classify the project at `root`.
pub fn detect_layout(root: &Path) -> LayoutState {
    let layout = ProjectLayout::new(root);
    if layout.registry_path().is_file() {
        LayoutState::Current
    } else if !legacy_usernames(&layout).is_empty() {
        LayoutState::Legacy
    } else {
        LayoutState::Uninitialized
    }
}

/// True when `root` holds per-username `.pub` files but no registry.
pub fn is_legacy_layout(root: &Path) -> bool {
    detect_layout(root) == LayoutState::Legacy
}

/// Usernames of `.pub` files that are not named by a device UUID.
pub fn legacy_usernames(layout: &ProjectLayout) -> Vec<String> {
    let Ok(entries) = fs::read_dir(layout.public_keys_dir()) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .filter(|name| DeviceId::from_file_name(name, PUBLIC_KEY_EXT).is_none())
        .filter_map(|name| {
            name.strip_suffix(".pub")
                .filter(|stem| !stem.is_empty() && !stem.starts_with('.'))
                .map(str::to_string)
        })
        .collect();
    names.sort();
    names
}
