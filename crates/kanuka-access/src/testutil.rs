//! Helpers for unit tests: simulated members sharing one project directory.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use kanuka_core::DeviceId;
use kanuka_store::{KeyPairStore, ProjectLayout, UserSettings};
use tempfile::TempDir;

use crate::context::Context;
use crate::grant::{grant, GrantOptions, GrantTarget};
use crate::project::{init_project, request_access};
use crate::resolve::Target;

/// One person on one machine: a private home directory plus a context
/// pointing at the shared project.
pub(crate) struct Member {
    pub ctx: Context,
    _home: TempDir,
}

impl Member {
    pub fn new(project_root: &Path, email: &str, device_name: &str) -> Self {
        let home = tempfile::tempdir().unwrap();
        let mut settings = UserSettings::load(home.path().join("config.toml")).unwrap();
        settings.set_user(email, device_name);
        let ctx = Context::new(
            ProjectLayout::new(project_root),
            KeyPairStore::new(home.path().join("keys")),
            settings,
        );
        Self { ctx, _home: home }
    }
}

/// Every file under `root` with its bytes.
pub(crate) fn snapshot(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    fn walk(dir: &Path, out: &mut BTreeMap<PathBuf, Vec<u8>>) {
        for entry in fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                walk(&path, out);
            } else {
                out.insert(path.clone(), fs::read(&path).unwrap());
            }
        }
    }
    let mut out = BTreeMap::new();
    walk(root, &mut out);
    out
}

/// Alice initializes the project, Bob requests access and Alice grants it.
/// Returns Bob's device.
pub(crate) fn two_member_project() -> (TempDir, Member, Member, DeviceId) {
    let project = tempfile::tempdir().unwrap();
    let mut alice = Member::new(project.path(), "alice@example.com", "laptop");
    init_project(&mut alice.ctx, "payments").unwrap();
    let mut bob = Member::new(project.path(), "bob@example.com", "workstation");
    let device = request_access(&mut bob.ctx, None, false).unwrap().device;
    grant(
        &alice.ctx,
        &GrantTarget::Known(Target::Device(device)),
        GrantOptions::default(),
    )
    .unwrap();
    (project, alice, bob, device)
}
