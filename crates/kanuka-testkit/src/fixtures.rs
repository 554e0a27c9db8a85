//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use kanuka::Config;
use kanuka_access::{grant, init_project, request_access, Context, GrantOptions, GrantTarget, Target};
use kanuka_core::{AccessRecord, ContentKey, DeviceId, UserId};
use kanuka_store::{Overwrite, ProjectRegistry};
use tempfile::TempDir;

use crate::keys::pooled_keypair;

/// A temporary project directory.
pub struct TestProject {
    dir: TempDir,
}

/// One person on one machine: private config and data directories plus a
/// context pointing at the shared project.
pub struct Member {
    pub ctx: Context,
    pub config: Config,
    _home: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create project dir"),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// A member with an identity but no device in the project yet.
    pub fn member(&self, email: &str, device_name: &str) -> Member {
        Member::new(self.root(), email, device_name)
    }

    /// Create the project with a first member.
    pub fn init(&self, email: &str, device_name: &str, name: &str) -> Member {
        let mut member = self.member(email, device_name);
        init_project(&mut member.ctx, name).expect("init project");
        member
    }

    /// A new member requests access and `granter` grants it.
    pub fn join(&self, granter: &Member, email: &str, device_name: &str) -> Member {
        let mut member = self.member(email, device_name);
        let device = request_access(&mut member.ctx, None, false)
            .expect("request access")
            .device;
        grant(
            &granter.ctx,
            &GrantTarget::Known(Target::Device(device)),
            GrantOptions::default(),
        )
        .expect("grant access");
        member
    }

    /// Register `count` devices of `email` directly through the store, each
    /// holding a valid record for a pooled key. Returns them in creation
    /// order.
    pub fn add_pooled_devices(&self, owner: &Member, email: &str, count: usize) -> Vec<DeviceId> {
        let mut registry = owner.ctx.load_registry().expect("load registry");
        let content_key = owner.content_key();
        let user = registry.user_for_email(email).unwrap_or_else(UserId::generate);
        let mut devices = Vec::with_capacity(count);

        for i in 0..count {
            let device = DeviceId::generate();
            let key = pooled_keypair(i).public_key();
            let record = AccessRecord::seal(&content_key, key).expect("seal record");
            owner
                .ctx
                .public_keys()
                .write(&device, key, Overwrite::Deny)
                .expect("write public key");
            owner
                .ctx
                .records()
                .write(&device, &record, Overwrite::Deny)
                .expect("write record");
            registry.add_device(device, user, email, &format!("device-{}", i + 1));
            devices.push(device);
        }

        registry.save().expect("save registry");
        devices
    }

    pub fn registry(&self) -> ProjectRegistry {
        ProjectRegistry::load(self.root()).expect("load registry")
    }

    /// Write a file relative to the project root.
    pub fn write(&self, relative: &str, contents: &[u8]) -> PathBuf {
        let path = self.root().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dir");
        }
        fs::write(&path, contents).expect("write file");
        path
    }

    /// Every file under the project root with its bytes.
    pub fn snapshot(&self) -> BTreeMap<PathBuf, Vec<u8>> {
        snapshot(self.root())
    }
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}

impl Member {
    pub fn new(project_root: &Path, email: &str, device_name: &str) -> Self {
        let home = tempfile::tempdir().expect("create home dir");
        let config = Config::new(home.path().join("config"), home.path().join("data"), project_root)
            .with_device_name(device_name);
        let ctx = config.context(Some(email)).expect("build context");
        Self {
            ctx,
            config,
            _home: home,
        }
    }

    /// This member's device in the project.
    pub fn device(&self) -> DeviceId {
        let registry = self.ctx.load_registry().expect("load registry");
        self.ctx
            .device_for(&registry.project_id())
            .expect("member has a device")
    }

    pub fn content_key(&self) -> ContentKey {
        let registry = self.ctx.load_registry().expect("load registry");
        self.ctx.unlock(&registry).expect("unlock").content_key
    }

    /// A fresh context for the same member, reloaded from disk.
    pub fn reload(&self) -> Context {
        self.config.context(None).expect("reload context")
    }
}

/// Every file under `root` with its bytes.
pub fn snapshot(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    fn walk(dir: &Path, out: &mut BTreeMap<PathBuf, Vec<u8>>) {
        for entry in fs::read_dir(dir).expect("read dir") {
            let path = entry.expect("dir entry").path();
            if path.is_dir() {
                walk(&path, out);
            } else {
                out.insert(path.clone(), fs::read(&path).expect("read file"));
            }
        }
    }
    let mut out = BTreeMap::new();
    walk(root, &mut out);
    out
}
