mod support;

use std::fs;
use std::path::Path;

use launchkit_core::{state, BuildVersion, GameName};
use launchkit_sync::integrity;
use launchkit_sync::{DigestRecord, DigestSource, SyncError, Toolchain};
use support::{request, CountingDigest, FakeArchiver, FakeDiffer, Fixture, GAME, V1, V2};

#[test]
fn manifest_describes_uploaded_build() {
    let fx = Fixture::new();
    let (publisher, _) = fx.session("publisher");
    let source = fx.build("v1", V1);
    let report = fx.publish(&publisher, &source, "1.0.0");

    let manifest = fx.manifest();
    assert_eq!(manifest, report.manifest);
    assert_eq!(manifest.version, BuildVersion::from("1.0.0"));
    assert_eq!(manifest.executable, std::path::PathBuf::from("bin/game.exe"));
    assert!(manifest.published_at.is_some());
    assert_eq!(manifest.sizes, integrity::size(&source).expect("sizes"));
    assert!(manifest.hashes.keys().eq(manifest.sizes.keys()));
    manifest.validate().expect("valid manifest");

    let names: Vec<_> = (1..=manifest.files.len())
        .map(|n| format!("Game_1_0_0.7z.{n:03}"))
        .collect();
    assert_eq!(manifest.files, names, "volumes listed in extraction order");
    for file in &manifest.files {
        assert!(fx.bucket().join(GAME).join(file).is_file(), "{file} uploaded");
    }
    assert_eq!(
        report.uploaded.last().map(|k| k.0.as_str()),
        Some("zomfi/manifest.json"),
        "manifest is uploaded last"
    );
    assert!(!fx.layout("publisher").temp_dir().exists());
}

#[test]
fn same_version_is_rejected_before_any_side_effect() {
    let fx = Fixture::new();
    let (publisher, _) = fx.session("publisher");
    fx.publish(&publisher, &fx.build("v1", V1), "1.0.0");
    let before = fx.manifest();

    let temp = fx.layout("publisher").temp_dir();
    fs::create_dir_all(&temp).expect("temp");
    fs::write(temp.join("leftover"), "x").expect("leftover");

    let err = publisher
        .publish(&request(&fx.build("v2", V2), "1.0.0"))
        .expect_err("same version");
    assert!(matches!(err, SyncError::Validation(_)), "{err}");
    assert_eq!(fx.manifest(), before);
    assert!(temp.join("leftover").exists(), "rejected publish must not touch temp");
    assert!(fx.bucket().join(GAME).join("Game_1_0_0.7z.001").is_file());
}

#[test]
fn older_version_is_rejected() {
    let fx = Fixture::new();
    let (publisher, _) = fx.session("publisher");
    fx.publish(&publisher, &fx.build("v1", V1), "1.2.0");
    let err = publisher
        .publish(&request(&fx.build("v2", V2), "1.1.9"))
        .expect_err("older version");
    assert!(matches!(err, SyncError::Validation(_)));
    assert_eq!(fx.manifest().version, BuildVersion::from("1.2.0"));
}

#[test]
fn newer_version_is_accepted() {
    let fx = Fixture::new();
    let (publisher, _) = fx.session("publisher");
    fx.publish(&publisher, &fx.build("v1", V1), "1.0.0");
    fx.publish(&publisher, &fx.build("v2", V2), "1.0.1");
    assert_eq!(fx.manifest().version, BuildVersion::from("1.0.1"));
}

#[test]
fn patch_is_generated_from_installed_copy() {
    let fx = Fixture::new();
    let (publisher, _) = fx.session("publisher");
    fx.publish(&publisher, &fx.build("v1", V1), "1.0.0");
    publisher.sync().expect("install 1.0.0");

    let report = fx.publish(&publisher, &fx.build("v2", V2), "1.0.1");
    let patch = report
        .manifest
        .from
        .get(&BuildVersion::from("1.0.0"))
        .expect("patch entry");
    assert_eq!(patch, "PATCH_1_0_0_TO_1_0_1.bin");
    assert!(fx.bucket().join(GAME).join(patch).is_file());
    // Publishing never changes what is installed locally.
    let local = state::load(&fx.layout("publisher"), &GameName::from(GAME)).expect("state");
    assert_eq!(local.version, Some("1.0.0".into()));
}

#[test]
fn diff_failure_aborts_without_new_manifest() {
    let fx = Fixture::new();
    let (publisher, _) = fx.session("publisher");
    fx.publish(&publisher, &fx.build("v1", V1), "1.0.0");
    publisher.sync().expect("install 1.0.0");

    let failing = fx.session_with(
        "publisher",
        Toolchain {
            digests: Box::new(CountingDigest::default()),
            compressor: Box::new(FakeArchiver),
            differ: Box::new(FakeDiffer { fail: true }),
        },
    );
    let err = failing
        .publish(&request(&fx.build("v2", V2), "1.0.1"))
        .expect_err("diff fails");
    assert!(matches!(err, SyncError::Tool { .. }), "{err}");
    assert_eq!(fx.manifest().version, BuildVersion::from("1.0.0"));
    assert!(!fx.bucket().join(GAME).join("Game_1_0_1.7z.001").exists());
    assert!(!fx.layout("publisher").temp_dir().exists());
}

#[test]
fn publish_remembers_source_folder() {
    let fx = Fixture::new();
    let (publisher, _) = fx.session("publisher");
    let source = fx.build("v1", V1);
    fx.publish(&publisher, &source, "1.0.0");
    let local = state::load(&fx.layout("publisher"), &GameName::from(GAME)).expect("state");
    assert_eq!(local.folder, Some(source.canonicalize().expect("canonical")));
    assert_eq!(local.version, None);
}

#[test]
fn source_given_through_dot_dot_keeps_file_keys() {
    let fx = Fixture::new();
    let (publisher, _) = fx.session("publisher");
    let source = fx.build("v1", V1);
    let dotted = source.join("data").join("..");

    let report = fx.publish(&publisher, &dotted, "1.0.0");
    let manifest = report.manifest;
    assert!(manifest.hashes.contains_key("bin/game.exe"), "{:?}", manifest.hashes);
    assert!(manifest.hashes.keys().eq(manifest.sizes.keys()));
    assert_eq!(manifest.sizes, integrity::size(&source).expect("sizes"));
}

/// Reports every file under a bare name, so its keys never match the sizes.
struct FlatDigest;

impl DigestSource for FlatDigest {
    fn digest_tree(
        &self,
        root: &Path,
        _progress: &mut dyn FnMut(f32),
    ) -> Result<Vec<DigestRecord>, SyncError> {
        let sizes = integrity::size(root)?;
        Ok(sizes
            .keys()
            .map(|key| DigestRecord {
                path: key.rsplit('/').next().unwrap_or(key).to_string(),
                digest: "0".repeat(64),
            })
            .collect())
    }
}

#[test]
fn inconsistent_manifest_uploads_nothing() {
    let fx = Fixture::new();
    let publisher = fx.session_with(
        "publisher",
        Toolchain {
            digests: Box::new(FlatDigest),
            compressor: Box::new(FakeArchiver),
            differ: Box::new(FakeDiffer::default()),
        },
    );
    let err = publisher
        .publish(&request(&fx.build("v1", V1), "1.0.0"))
        .expect_err("keys differ");
    assert!(matches!(err, SyncError::Core(_)), "{err}");
    let game_dir = fx.bucket().join(GAME);
    assert!(
        !game_dir.exists() || fs::read_dir(&game_dir).expect("bucket").next().is_none(),
        "no artifact may be uploaded"
    );
    assert!(!fx.layout("publisher").temp_dir().exists());
}
