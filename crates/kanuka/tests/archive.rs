//! Export and import of project archives.

use std::fs::{self, File};
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use kanuka::access::AccessError;
use kanuka::{Config, KanukaError};
use kanuka_testkit::fixtures::snapshot;
use kanuka_testkit::{pooled_keypair, TestProject};

/// Build a `.tar.gz` with the given entries.
fn write_archive(path: &Path, entries: &[(&str, &[u8])]) {
    let file = File::create(path).unwrap();
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    for (name, contents) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, *contents).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
}

fn assert_left_empty(root: &Path) {
    let leftovers: Vec<_> = fs::read_dir(root)
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert!(leftovers.is_empty(), "left behind: {:?}", leftovers);
}

#[test]
fn test_import_rejects_empty_registry() {
    let work = tempfile::tempdir().unwrap();
    let archive = work.path().join("bad.tar.gz");
    let target = tempfile::tempdir().unwrap();
    let pem = pooled_keypair(0).public_key().to_pem().unwrap();
    let key_entry = format!(".kanuka/public_keys/{}.pub", kanuka::DeviceId::generate());
    write_archive(
        &archive,
        &[
            (".kanuka/config.toml", b""),
            (key_entry.as_str(), pem.as_bytes()),
        ],
    );

    let result = kanuka::import(target.path(), &archive, false);
    assert!(matches!(
        result,
        Err(KanukaError::Access(AccessError::Corrupt { .. }))
    ));
    assert_left_empty(target.path());
}

#[test]
fn test_import_rejects_invalid_registry() {
    let work = tempfile::tempdir().unwrap();
    let target = tempfile::tempdir().unwrap();

    let cases: [&[u8]; 3] = [
        b"[project\nuuid = ",
        b"[project]\nuuid = \"00000000-0000-0000-0000-000000000000\"\nname = \"x\"\n",
        b"[project]\nuuid = \"4f8e1c2a-9b7d-4e3f-8a6b-1c2d3e4f5a6b\"\nname = \"\"\n",
    ];
    for (i, registry) in cases.iter().enumerate() {
        let archive = work.path().join(format!("bad-{}.tar.gz", i));
        write_archive(&archive, &[(".kanuka/config.toml", registry)]);

        let result = kanuka::import(target.path(), &archive, false);
        assert!(
            matches!(result, Err(KanukaError::Access(AccessError::Corrupt { .. }))),
            "case {} accepted: {:?}",
            i,
            result.map(|r| r.project)
        );
        assert_left_empty(target.path());
    }
}

#[test]
fn test_import_requires_registry_and_safe_paths() {
    let work = tempfile::tempdir().unwrap();
    let target = tempfile::tempdir().unwrap();

    let no_registry = work.path().join("empty.tar.gz");
    write_archive(&no_registry, &[("README.md", b"hello")]);
    assert!(matches!(
        kanuka::import(target.path(), &no_registry, false),
        Err(KanukaError::Archive { .. })
    ));

    let not_gzip = work.path().join("plain.tar.gz");
    fs::write(&not_gzip, b"definitely not an archive").unwrap();
    assert!(matches!(
        kanuka::import(target.path(), &not_gzip, false),
        Err(KanukaError::Archive { .. })
    ));

    assert_left_empty(target.path());
}

#[test]
fn test_export_import_roundtrip() {
    let project = TestProject::new();
    let alice = project.init("alice@example.com", "laptop", "payments");
    let _bob = project.join(&alice, "bob@example.com", "workstation");
    project.write(".env", b"TOKEN=abc\n");
    project.write("services/api/.env.staging", b"TOKEN=def\n");
    kanuka::encrypt(&alice.ctx, &[]).unwrap();

    let work = tempfile::tempdir().unwrap();
    let archive = work.path().join("payments.tar.gz");
    let exported = kanuka::export(&alice.ctx, &archive).unwrap();
    // Registry, 2 public keys, 2 records, 2 secret files.
    assert_eq!(exported.files.len(), 7);

    let copy = tempfile::tempdir().unwrap();
    let imported = kanuka::import(copy.path(), &archive, false).unwrap();
    assert_eq!(imported.name, "payments");
    assert_eq!(imported.devices, 2);
    assert_eq!(imported.public_keys, 2);
    assert_eq!(imported.records, 2);
    assert_eq!(imported.secret_files.len(), 2);
    assert!(!imported.replaced);

    // Everything but the plaintext files arrives byte for byte.
    let relative = |root: &Path| -> Vec<_> {
        snapshot(root)
            .into_iter()
            .map(|(p, b)| (p.strip_prefix(root).unwrap().to_path_buf(), b))
            .filter(|(p, _)| !p.ends_with(".env") && !p.ends_with(".env.staging"))
            .collect()
    };
    assert_eq!(relative(copy.path()), relative(project.root()));

    // Alice's keys open the copy too.
    let ctx = Config {
        project_root: copy.path().to_path_buf(),
        ..alice.config.clone()
    }
    .context(None)
    .unwrap();
    kanuka::decrypt(&ctx, &[]).unwrap();
    assert_eq!(fs::read(copy.path().join(".env")).unwrap(), b"TOKEN=abc\n");
}

#[test]
fn test_import_over_existing_project_needs_force() {
    let project = TestProject::new();
    let alice = project.init("alice@example.com", "laptop", "payments");
    let work = tempfile::tempdir().unwrap();
    let archive = work.path().join("payments.tar.gz");
    kanuka::export(&alice.ctx, &archive).unwrap();

    let other = TestProject::new();
    other.init("carol@example.com", "desktop", "other");
    let before = other.snapshot();

    assert!(matches!(
        kanuka::import(other.root(), &archive, false),
        Err(KanukaError::Access(AccessError::AlreadyExists(_)))
    ));
    assert_eq!(other.snapshot(), before);

    let report = kanuka::import(other.root(), &archive, true).unwrap();
    assert!(report.replaced);
    assert_eq!(other.registry().project_name(), "payments");
    // The old project's files are gone, not merged.
    assert_eq!(other.registry().device_count(), 1);
    assert_eq!(
        fs::read_dir(other.root().join(".kanuka/secrets")).unwrap().count(),
        1
    );
    // No staging or backup directories remain.
    let names: Vec<_> = fs::read_dir(other.root())
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(names, vec![".kanuka".to_string()]);
}
