//! Boundary to the external hashing, compression and binary-diff tools.
//!
//! The rest of the crate talks to these tools only through the
//! [`DigestSource`], [`Compressor`] and [`Differ`] traits, which deal in
//! structured records and numeric progress. Text produced by a tool is
//! interpreted here and nowhere else.

use std::ffi::{OsStr, OsString};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use launchkit_core::ToolPaths;

use crate::error::SyncError;
use crate::integrity::Sha256Source;

/// One hashed file: `path` is relative to the parent of the hashed tree
/// (its first component is the tree's own folder name).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestRecord {
    pub path: String,
    pub digest: String,
}

/// Produces a SHA-256 digest for every file under a tree.
pub trait DigestSource: Send + Sync {
    fn digest_tree(
        &self,
        root: &Path,
        progress: &mut dyn FnMut(f32),
    ) -> Result<Vec<DigestRecord>, SyncError>;
}

/// Multi-volume archiver.
pub trait Compressor: Send + Sync {
    /// Archive the contents of `source` into `archive` split into
    /// `volume_size`-byte volumes named `<archive>.001`, `<archive>.002`, ….
    fn compress(
        &self,
        source: &Path,
        archive: &Path,
        volume_size: u64,
        progress: &mut dyn FnMut(f32),
    ) -> Result<(), SyncError>;

    /// Extract the volume set starting at `first_volume` into `dest`.
    fn extract(
        &self,
        first_volume: &Path,
        dest: &Path,
        progress: &mut dyn FnMut(f32),
    ) -> Result<(), SyncError>;
}

/// Directory-tree binary diff. Reports only success or failure.
pub trait Differ: Send + Sync {
    /// Write a single patch transforming `old` into `new` to `out`.
    fn diff(&self, old: &Path, new: &Path, out: &Path) -> Result<(), SyncError>;

    /// Apply `patch` to `tree` in place.
    fn apply(&self, tree: &Path, patch: &Path) -> Result<(), SyncError>;
}

/// The set of tools a session works with.
pub struct Toolchain {
    pub digests: Box<dyn DigestSource>,
    pub compressor: Box<dyn Compressor>,
    pub differ: Box<dyn Differ>,
}

impl Toolchain {
    /// 7-Zip and HDiffPatch from the configured paths; hashing runs
    /// in-process unless `external_hashing` is set.
    pub fn from_config(tools: &ToolPaths) -> Self {
        let digests: Box<dyn DigestSource> = if tools.external_hashing {
            Box::new(SevenZipDigest::new(&tools.seven_zip))
        } else {
            Box::new(Sha256Source)
        };
        Self {
            digests,
            compressor: Box::new(SevenZip::new(&tools.seven_zip)),
            differ: Box::new(HDiffPatch::new(&tools.hdiff, &tools.hpatch)),
        }
    }
}

// ---------------------------------------------------------------------------
// Process runner
// ---------------------------------------------------------------------------

/// A command-line tool invoked once per step and awaited to completion.
#[derive(Debug, Clone)]
pub struct ExternalTool {
    program: PathBuf,
}

impl ExternalTool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }

    /// Run with `args`, feeding every stdout segment (split on `\r`, `\n`
    /// and backspace) to `on_segment`. Non-zero exit is a [`SyncError::Tool`].
    pub fn run(
        &self,
        args: &[OsString],
        cwd: Option<&Path>,
        mut on_segment: impl FnMut(&str),
    ) -> Result<(), SyncError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        tracing::debug!(tool = %self.name(), ?args, "spawning");

        let mut child = cmd.spawn().map_err(|e| SyncError::Tool {
            tool: self.name(),
            status: "spawn failed".to_string(),
            stderr: e.to_string(),
        })?;

        // A full stderr pipe would block the child; drain it on its own thread.
        let stderr_reader = child.stderr.take().map(|mut pipe| {
            std::thread::spawn(move || {
                let mut buf = String::new();
                let _ = pipe.read_to_string(&mut buf);
                buf
            })
        });

        if let Some(stdout) = child.stdout.take() {
            let mut reader = BufReader::new(stdout);
            let mut chunk = [0u8; 4096];
            let mut pending = Vec::new();
            loop {
                let n = match reader.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                };
                for &b in &chunk[..n] {
                    if matches!(b, b'\r' | b'\n' | 0x08) {
                        flush_segment(&mut pending, &mut on_segment);
                    } else {
                        pending.push(b);
                    }
                }
            }
            flush_segment(&mut pending, &mut on_segment);
        }

        let status = child.wait().map_err(|e| SyncError::Tool {
            tool: self.name(),
            status: "wait failed".to_string(),
            stderr: e.to_string(),
        })?;
        let stderr = stderr_reader
            .and_then(|h| h.join().ok())
            .unwrap_or_default();

        if !status.success() {
            return Err(SyncError::Tool {
                tool: self.name(),
                status: status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }
        if !stderr.trim().is_empty() {
            tracing::debug!(tool = %self.name(), stderr = %stderr.trim(), "tool stderr");
        }
        Ok(())
    }
}

fn flush_segment(pending: &mut Vec<u8>, on_segment: &mut impl FnMut(&str)) {
    if pending.is_empty() {
        return;
    }
    let text = String::from_utf8_lossy(pending);
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        on_segment(trimmed);
    }
    pending.clear();
}

fn os(s: impl AsRef<OsStr>) -> OsString {
    s.as_ref().to_os_string()
}

/// Extract a percent token such as `42%` from a progress segment.
pub fn parse_percent(segment: &str) -> Option<f32> {
    segment.split_whitespace().find_map(|token| {
        let number = token.strip_suffix('%')?;
        let value: f32 = number.parse().ok()?;
        (0.0..=100.0).contains(&value).then_some(value)
    })
}

/// Parse a hash-listing line: 64 hex digits, an optional size column, then the path.
pub fn parse_digest_line(line: &str) -> Option<DigestRecord> {
    let digest = line.get(..64)?;
    if !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let rest = line[64..].trim_start();
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_digit()).trim();
    if rest.is_empty() {
        return None;
    }
    Some(DigestRecord {
        path: rest.replace('\\', "/"),
        digest: digest.to_ascii_lowercase(),
    })
}

// ---------------------------------------------------------------------------
// 7-Zip
// ---------------------------------------------------------------------------

/// `7za` as archiver.
#[derive(Debug, Clone)]
pub struct SevenZip {
    tool: ExternalTool,
}

impl SevenZip {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            tool: ExternalTool::new(program),
        }
    }
}

impl Compressor for SevenZip {
    fn compress(
        &self,
        source: &Path,
        archive: &Path,
        volume_size: u64,
        progress: &mut dyn FnMut(f32),
    ) -> Result<(), SyncError> {
        let args = vec![
            os("a"),
            os("-aoa"),
            os("-bsp1"),
            os(format!("-v{volume_size}b")),
            os(archive),
            os(source.join("*")),
        ];
        progress(0.0);
        self.tool.run(&args, None, |segment| {
            if let Some(p) = parse_percent(segment) {
                progress(p);
            }
        })
    }

    fn extract(
        &self,
        first_volume: &Path,
        dest: &Path,
        progress: &mut dyn FnMut(f32),
    ) -> Result<(), SyncError> {
        let mut out = OsString::from("-o");
        out.push(dest);
        let args = vec![os("x"), os("-aoa"), os("-bsp1"), os(first_volume), out];
        progress(0.0);
        self.tool.run(&args, None, |segment| {
            if let Some(p) = parse_percent(segment) {
                progress(p);
            }
        })
    }
}

/// `7za h -scrcsha256` as digest source, for trees too large to hash in-process.
#[derive(Debug, Clone)]
pub struct SevenZipDigest {
    tool: ExternalTool,
}

impl SevenZipDigest {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            tool: ExternalTool::new(program),
        }
    }
}

impl DigestSource for SevenZipDigest {
    fn digest_tree(
        &self,
        root: &Path,
        progress: &mut dyn FnMut(f32),
    ) -> Result<Vec<DigestRecord>, SyncError> {
        let (parent, name) = match (root.parent(), root.file_name()) {
            (Some(parent), Some(name)) => (parent, name),
            _ => {
                return Err(SyncError::Validation(format!(
                    "cannot hash '{}': not a named directory",
                    root.display()
                )))
            }
        };
        let args = vec![
            os("h"),
            os("-scrcsha256"),
            os("-ba"),
            os("-bsp1"),
            os(name),
        ];
        let mut records = Vec::new();
        progress(0.0);
        self.tool.run(&args, Some(parent), |segment| {
            if let Some(record) = parse_digest_line(segment) {
                records.push(record);
            } else if let Some(p) = parse_percent(segment) {
                progress(p);
            }
        })?;
        progress(100.0);
        Ok(records)
    }
}

// ---------------------------------------------------------------------------
// HDiffPatch
// ---------------------------------------------------------------------------

/// `hdiffz` / `hpatchz` in directory mode.
#[derive(Debug, Clone)]
pub struct HDiffPatch {
    diff: ExternalTool,
    patch: ExternalTool,
}

impl HDiffPatch {
    pub fn new(hdiff: impl Into<PathBuf>, hpatch: impl Into<PathBuf>) -> Self {
        Self {
            diff: ExternalTool::new(hdiff),
            patch: ExternalTool::new(hpatch),
        }
    }
}

impl Differ for HDiffPatch {
    fn diff(&self, old: &Path, new: &Path, out: &Path) -> Result<(), SyncError> {
        let args = vec![os("-D"), os("-f"), os(old), os(new), os(out)];
        self.diff.run(&args, None, |_| {})
    }

    fn apply(&self, tree: &Path, patch: &Path) -> Result<(), SyncError> {
        let args = vec![os("-f"), os(tree), os(patch), os(tree)];
        self.patch.run(&args, None, |_| {})
    }
}
