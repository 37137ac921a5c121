//! Shared fixtures: in-process stand-ins for the archiver and differ, a
//! digest source that counts (and can pause) hash passes, and a bucket
//! backed by a temp directory.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};

use launchkit_core::{BuildManifest, Layout};
use launchkit_sync::integrity::{self, Sha256Source};
use launchkit_sync::{
    Compressor, DigestRecord, DigestSource, Differ, LocalStore, PublishReport, PublishRequest,
    Session, SyncError, Toolchain,
};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

pub const GAME: &str = "zomfi";

fn read_tree(root: &Path) -> BTreeMap<String, Vec<u8>> {
    integrity::size(root)
        .expect("size tree")
        .into_keys()
        .map(|rel| {
            let bytes = fs::read(root.join(&rel)).expect("read file");
            (rel, bytes)
        })
        .collect()
}

fn write_file(root: &Path, rel: &str, bytes: &[u8]) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    fs::write(path, bytes).expect("write file");
}

// ---------------------------------------------------------------------------
// Archiver
// ---------------------------------------------------------------------------

/// Serializes the tree as JSON and splits it into numbered volumes.
pub struct FakeArchiver;

impl Compressor for FakeArchiver {
    fn compress(
        &self,
        source: &Path,
        archive: &Path,
        volume_size: u64,
        progress: &mut dyn FnMut(f32),
    ) -> Result<(), SyncError> {
        let body = serde_json::to_vec(&read_tree(source))?;
        let chunks: Vec<&[u8]> = body.chunks(volume_size.max(1) as usize).collect();
        for (i, chunk) in chunks.iter().enumerate() {
            fs::write(format!("{}.{:03}", archive.display(), i + 1), chunk).expect("write volume");
            progress((i + 1) as f32 / chunks.len() as f32 * 100.0);
        }
        Ok(())
    }

    fn extract(
        &self,
        first_volume: &Path,
        dest: &Path,
        progress: &mut dyn FnMut(f32),
    ) -> Result<(), SyncError> {
        let first = first_volume.to_string_lossy();
        let base = first.strip_suffix(".001").expect("first volume");
        let mut body = Vec::new();
        for n in 1.. {
            match fs::read(format!("{base}.{n:03}")) {
                Ok(bytes) => body.extend(bytes),
                Err(_) => break,
            }
        }
        let tree: BTreeMap<String, Vec<u8>> = serde_json::from_slice(&body)?;
        for (rel, bytes) in &tree {
            write_file(dest, rel, bytes);
        }
        progress(100.0);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Differ
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
struct FakePatch {
    removed: Vec<String>,
    changed: BTreeMap<String, Vec<u8>>,
}

/// Patches carry changed files whole plus a list of removed paths.
#[derive(Default)]
pub struct FakeDiffer {
    pub fail: bool,
}

impl Differ for FakeDiffer {
    fn diff(&self, old: &Path, new: &Path, out: &Path) -> Result<(), SyncError> {
        if self.fail {
            return Err(SyncError::Tool {
                tool: "hdiffz".into(),
                status: "exit status: 1".into(),
                stderr: "out of memory".into(),
            });
        }
        let before = read_tree(old);
        let after = read_tree(new);
        let patch = FakePatch {
            removed: before
                .keys()
                .filter(|k| !after.contains_key(*k))
                .cloned()
                .collect(),
            changed: after
                .into_iter()
                .filter(|(k, v)| before.get(k) != Some(v))
                .collect(),
        };
        fs::write(out, serde_json::to_vec(&patch)?).expect("write patch");
        Ok(())
    }

    fn apply(&self, tree: &Path, patch: &Path) -> Result<(), SyncError> {
        let patch: FakePatch = serde_json::from_slice(&fs::read(patch).expect("read patch"))?;
        for rel in &patch.removed {
            let _ = fs::remove_file(tree.join(rel));
        }
        for (rel, bytes) in &patch.changed {
            write_file(tree, rel, bytes);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Digest source
// ---------------------------------------------------------------------------

/// Pauses a hash pass until the test releases it.
pub struct Gate {
    pub started: Sender<()>,
    pub release: Mutex<Receiver<()>>,
}

/// Real SHA-256 hashing that counts passes.
#[derive(Default)]
pub struct CountingDigest {
    pub calls: Arc<AtomicUsize>,
    pub gate: Option<Gate>,
}

impl DigestSource for CountingDigest {
    fn digest_tree(
        &self,
        root: &Path,
        progress: &mut dyn FnMut(f32),
    ) -> Result<Vec<DigestRecord>, SyncError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.started.send(()).expect("signal start");
            gate.release.lock().expect("gate").recv().expect("release");
        }
        Sha256Source.digest_tree(root, progress)
    }
}

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

/// One bucket shared by any number of machines, each with its own data root.
pub struct Fixture {
    pub tmp: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            tmp: TempDir::new().expect("tmp"),
        }
    }

    pub fn bucket(&self) -> PathBuf {
        self.tmp.path().join("bucket")
    }

    pub fn layout(&self, machine: &str) -> Layout {
        Layout::new(self.tmp.path().join(machine))
    }

    /// A session with the default fakes; `calls` counts hash passes.
    pub fn session(&self, machine: &str) -> (Session, Arc<AtomicUsize>) {
        let digests = CountingDigest::default();
        let calls = Arc::clone(&digests.calls);
        let tools = Toolchain {
            digests: Box::new(digests),
            compressor: Box::new(FakeArchiver),
            differ: Box::new(FakeDiffer::default()),
        };
        (self.session_with(machine, tools), calls)
    }

    pub fn session_with(&self, machine: &str, tools: Toolchain) -> Session {
        Session::new(
            GAME,
            self.layout(machine),
            Box::new(LocalStore::new(self.bucket())),
            tools,
        )
        .with_volume_size(64)
    }

    /// Write a source build under `builds/<name>`.
    pub fn build(&self, name: &str, files: &[(&str, &str)]) -> PathBuf {
        let root = self.tmp.path().join("builds").join(name);
        for (rel, contents) in files {
            write_file(&root, rel, contents.as_bytes());
        }
        root
    }

    pub fn publish(&self, session: &Session, source: &Path, version: &str) -> PublishReport {
        session
            .publish(&request(source, version))
            .expect("publish")
    }

    /// The manifest currently in the bucket.
    pub fn manifest(&self) -> BuildManifest {
        let path = self.bucket().join(GAME).join("manifest.json");
        serde_json::from_slice(&fs::read(path).expect("manifest")).expect("parse manifest")
    }
}

pub fn request(source: &Path, version: &str) -> PublishRequest {
    PublishRequest {
        source: source.to_path_buf(),
        executable: PathBuf::from("bin/game.exe"),
        version: version.into(),
    }
}

/// Relative path -> contents of every file under `root`.
pub fn snapshot(root: &Path) -> BTreeMap<String, String> {
    read_tree(root)
        .into_iter()
        .map(|(k, v)| (k, String::from_utf8(v).expect("utf8")))
        .collect()
}

pub const V1: &[(&str, &str)] = &[
    ("bin/game.exe", "engine v1"),
    ("data/level1.pak", "level one"),
    ("data/obsolete.pak", "removed in v2"),
];

pub const V2: &[(&str, &str)] = &[
    ("bin/game.exe", "engine v2"),
    ("data/level1.pak", "level one"),
    ("data/level2.pak", "level two"),
];

pub const V3: &[(&str, &str)] = &[
    ("bin/game.exe", "engine v3"),
    ("data/level1.pak", "level one"),
    ("data/level2.pak", "level two, remastered"),
];
