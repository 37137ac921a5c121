//! Integrity engine: per-file SHA-256 digests and byte sizes over a tree,
//! and comparison of a local tree against a manifest.
//!
//! Keys are relative paths with `/` separators. Verification precedence:
//! 1. size pre-check (cheap; a mismatch short-circuits the hash pass)
//! 2. hash pass (required before a tree is reported clean)

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::error::{io_err, SyncError};
use crate::progress::Monotonic;
use crate::tools::{DigestRecord, DigestSource};

/// Relative path -> lowercase hex SHA-256.
pub type DigestMap = BTreeMap<String, String>;

/// Relative path -> size in bytes.
pub type SizeMap = BTreeMap<String, u64>;

/// Normalize a tool-reported path into a manifest key.
///
/// Backslashes become `/`; with `strip_top` the first path component (the
/// tree's own folder name) is dropped so keys are rooted at the tree contents.
pub fn normalize_key(raw: &str, strip_top: bool) -> String {
    let path = raw.trim().replace('\\', "/");
    let path = path.trim_start_matches("./");
    if strip_top {
        if let Some(idx) = path.find('/') {
            if idx > 0 {
                return path[idx + 1..].to_string();
            }
        }
    }
    path.to_string()
}

/// Hash every file under `tree`.
///
/// `progress` receives a non-decreasing percentage in `[0, 100]`.
pub fn hash(
    source: &dyn DigestSource,
    tree: &Path,
    strip_top: bool,
    progress: &mut dyn FnMut(f32),
) -> Result<DigestMap, SyncError> {
    let mut monotonic = Monotonic::default();
    let records = source.digest_tree(tree, &mut |p| progress(monotonic.next(p)))?;
    let map: DigestMap = records
        .into_iter()
        .map(|r| (normalize_key(&r.path, strip_top), r.digest.to_ascii_lowercase()))
        .collect();
    tracing::debug!(tree = %tree.display(), files = map.len(), "hashed tree");
    Ok(map)
}

/// Size of every file under `tree`, keyed relative to `tree`.
pub fn size(tree: &Path) -> Result<SizeMap, SyncError> {
    let mut sizes = SizeMap::new();
    for (rel, path) in files_under(tree)? {
        let meta = std::fs::metadata(&path).map_err(|e| io_err(&path, e))?;
        sizes.insert(rel, meta.len());
    }
    Ok(sizes)
}

/// Sorted `(relative key, absolute path)` pairs for every regular file under `tree`.
fn files_under(tree: &Path) -> Result<Vec<(String, std::path::PathBuf)>, SyncError> {
    let mut out = Vec::new();
    for entry in WalkDir::new(tree).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(tree).to_path_buf();
            io_err(path, e.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(tree)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .to_string();
        out.push((normalize_key(&rel, false), entry.path().to_path_buf()));
    }
    Ok(out)
}

/// Streaming SHA-256 of one file.
pub fn hash_file(path: &Path) -> Result<String, SyncError> {
    let file = File::open(path).map_err(|e| io_err(path, e))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf).map_err(|e| io_err(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// In-process digest source; progress advances by bytes hashed.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Source;

impl DigestSource for Sha256Source {
    fn digest_tree(
        &self,
        root: &Path,
        progress: &mut dyn FnMut(f32),
    ) -> Result<Vec<DigestRecord>, SyncError> {
        let top = tree_label(root);
        let files = files_under(root)?;
        let total: u64 = files
            .iter()
            .filter_map(|(_, p)| std::fs::metadata(p).ok())
            .map(|m| m.len())
            .sum();

        progress(0.0);
        let mut done = 0u64;
        let mut records = Vec::with_capacity(files.len());
        for (rel, path) in files {
            let digest = hash_file(&path)?;
            done += std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            let path = format!("{top}/{rel}");
            records.push(DigestRecord { path, digest });
            if total > 0 {
                progress(done as f32 / total as f32 * 100.0);
            }
        }
        progress(100.0);
        Ok(records)
    }
}

/// Folder name records are prefixed with, so `strip_top` always removes
/// exactly this label. Paths such as `a/..` or `/` have no file name of their
/// own; they are resolved first and fall back to a fixed label.
fn tree_label(root: &Path) -> String {
    root.file_name()
        .map(|n| n.to_os_string())
        .or_else(|| {
            root.canonicalize()
                .ok()
                .and_then(|p| p.file_name().map(|n| n.to_os_string()))
        })
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "root".to_string())
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

/// Differences between an expected file set and what is on disk.
///
/// An empty report means the tree matches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    /// Expected but absent locally.
    pub missing: Vec<String>,
    /// Present locally but not expected.
    pub extra: Vec<String>,
    /// Present on both sides with a different size or digest.
    pub mismatched: Vec<String>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty() && self.mismatched.is_empty()
    }

    /// Short human summary, e.g. `2 missing, 1 mismatched (data/a.pak, …)`.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if !self.missing.is_empty() {
            parts.push(format!("{} missing", self.missing.len()));
        }
        if !self.extra.is_empty() {
            parts.push(format!("{} extra", self.extra.len()));
        }
        if !self.mismatched.is_empty() {
            parts.push(format!("{} mismatched", self.mismatched.len()));
        }
        if parts.is_empty() {
            return "clean".to_string();
        }
        let preview: Vec<&str> = self
            .missing
            .iter()
            .chain(&self.mismatched)
            .chain(&self.extra)
            .take(3)
            .map(String::as_str)
            .collect();
        format!("{} ({})", parts.join(", "), preview.join(", "))
    }
}

/// Compare two keyed maps. Both sides must have the same key set and equal values.
fn compare<V: PartialEq>(
    expected: &BTreeMap<String, V>,
    actual: &BTreeMap<String, V>,
) -> IntegrityReport {
    let mut report = IntegrityReport::default();
    for (key, want) in expected {
        match actual.get(key) {
            None => report.missing.push(key.clone()),
            Some(got) if got != want => report.mismatched.push(key.clone()),
            Some(_) => {}
        }
    }
    report.extra = actual
        .keys()
        .filter(|k| !expected.contains_key(*k))
        .cloned()
        .collect();
    report
}

/// Size pre-check. Any count, path or size difference is a mismatch.
pub fn compare_sizes(expected: &SizeMap, actual: &SizeMap) -> IntegrityReport {
    compare(expected, actual)
}

/// Digest comparison; digests are compared case-insensitively.
pub fn compare_digests(expected: &DigestMap, actual: &DigestMap) -> IntegrityReport {
    let lower = |m: &DigestMap| -> DigestMap {
        m.iter()
            .map(|(k, v)| (k.clone(), v.to_ascii_lowercase()))
            .collect()
    };
    compare(&lower(expected), &lower(actual))
}
