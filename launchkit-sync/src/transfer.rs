//! Transfer engine: move one named artifact at a time between the session
//! temp area and object storage, reporting `(transferred, total)` bytes.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use launchkit_core::{ArtifactKey, Direction, LauncherConfig, TransferTask};

use crate::error::{io_err, transfer_err, SyncError};

/// Object storage addressed by [`ArtifactKey`].
pub trait ObjectStore: Send + Sync {
    /// Upload the file at `local` as `key`.
    fn upload(
        &self,
        local: &Path,
        key: &ArtifactKey,
        progress: &mut dyn FnMut(u64, u64),
    ) -> Result<(), SyncError>;

    /// Download `key` into the file at `local`, creating parent directories.
    fn download(
        &self,
        key: &ArtifactKey,
        local: &Path,
        progress: &mut dyn FnMut(u64, u64),
    ) -> Result<(), SyncError>;

    /// Fetch a small object fully into memory; `Ok(None)` when it does not exist.
    fn get_bytes(&self, key: &ArtifactKey) -> Result<Option<Vec<u8>>, SyncError>;

    /// Replace a small object in one step; readers see the old or the new body, never a mix.
    fn put_bytes(&self, key: &ArtifactKey, bytes: &[u8]) -> Result<(), SyncError>;
}

// ---------------------------------------------------------------------------
// Progress reader
// ---------------------------------------------------------------------------

/// Wraps a reader and reports cumulative byte progress after every read.
pub struct ProgressReader<R, F> {
    inner: R,
    task: TransferTask,
    on_progress: F,
}

impl<R: Read, F: FnMut(u64, u64)> ProgressReader<R, F> {
    pub fn new(inner: R, task: TransferTask, on_progress: F) -> Self {
        Self {
            inner,
            task,
            on_progress,
        }
    }

    pub fn task(&self) -> &TransferTask {
        &self.task
    }
}

impl<R: Read, F: FnMut(u64, u64)> Read for ProgressReader<R, F> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.task.advance(n as u64);
            (self.on_progress)(self.task.bytes_transferred, self.task.bytes_total);
        }
        Ok(n)
    }
}

/// Copy `reader` into a `.part` sibling of `dest`, then rename over `dest`.
fn write_via_part(dest: &Path, reader: &mut impl Read) -> Result<u64, SyncError> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let part = PathBuf::from(format!("{}.part", dest.display()));
    let written = {
        let mut file = File::create(&part).map_err(|e| io_err(&part, e))?;
        let n = io::copy(reader, &mut file).map_err(|e| io_err(&part, e))?;
        file.flush().map_err(|e| io_err(&part, e))?;
        n
    };
    if let Err(e) = std::fs::rename(&part, dest) {
        let _ = std::fs::remove_file(&part);
        return Err(io_err(dest, e));
    }
    Ok(written)
}

// ---------------------------------------------------------------------------
// Filesystem-backed store
// ---------------------------------------------------------------------------

/// An object store rooted at a local directory (mirrors, tests).
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Filesystem path backing `key`.
    pub fn object_path(&self, key: &ArtifactKey) -> PathBuf {
        key.0.split('/').fold(self.root.clone(), |p, seg| p.join(seg))
    }

    fn copy(
        &self,
        from: &Path,
        to: &Path,
        key: &ArtifactKey,
        direction: Direction,
        progress: &mut dyn FnMut(u64, u64),
    ) -> Result<(), SyncError> {
        let file = File::open(from).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => transfer_err(key, format!("{} not found", from.display())),
            _ => io_err(from, e),
        })?;
        let total = file.metadata().map(|m| m.len()).unwrap_or(0);
        progress(0, total);
        let task = TransferTask::new(key.clone(), direction, total);
        let mut reader = ProgressReader::new(file, task, |done, total| progress(done, total));
        write_via_part(to, &mut reader)?;
        tracing::debug!(key = %key, %direction, bytes = total, "local transfer complete");
        Ok(())
    }
}

impl ObjectStore for LocalStore {
    fn upload(
        &self,
        local: &Path,
        key: &ArtifactKey,
        progress: &mut dyn FnMut(u64, u64),
    ) -> Result<(), SyncError> {
        let dest = self.object_path(key);
        self.copy(local, &dest, key, Direction::Upload, progress)
    }

    fn download(
        &self,
        key: &ArtifactKey,
        local: &Path,
        progress: &mut dyn FnMut(u64, u64),
    ) -> Result<(), SyncError> {
        let src = self.object_path(key);
        self.copy(&src, local, key, Direction::Download, progress)
    }

    fn get_bytes(&self, key: &ArtifactKey) -> Result<Option<Vec<u8>>, SyncError> {
        let path = self.object_path(key);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(path, e)),
        }
    }

    fn put_bytes(&self, key: &ArtifactKey, bytes: &[u8]) -> Result<(), SyncError> {
        let dest = self.object_path(key);
        write_via_part(&dest, &mut &bytes[..])?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// HTTP store
// ---------------------------------------------------------------------------

/// A short-lived authorization to PUT exactly one object.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SignedRequest {
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Issues upload authorization for one artifact at a time.
pub trait Authorizer: Send + Sync {
    fn authorize(&self, key: &ArtifactKey) -> Result<SignedRequest, SyncError>;
}

/// Asks a signing endpoint (`GET <sign_url>?key=<key>`) for a presigned PUT URL.
pub struct SignedUrlAuthorizer {
    agent: ureq::Agent,
    sign_url: String,
    token: Option<String>,
}

impl SignedUrlAuthorizer {
    pub fn new(sign_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            agent: build_agent(),
            sign_url: sign_url.into(),
            token,
        }
    }
}

impl Authorizer for SignedUrlAuthorizer {
    fn authorize(&self, key: &ArtifactKey) -> Result<SignedRequest, SyncError> {
        let mut req = self.agent.get(&self.sign_url).query("key", &key.0);
        if let Some(token) = &self.token {
            req = req.set("Authorization", &format!("Bearer {token}"));
        }
        let resp = req
            .call()
            .map_err(|e| transfer_err(key, format!("authorization failed: {e}")))?;
        resp.into_json::<SignedRequest>()
            .map_err(|e| transfer_err(key, format!("malformed authorization: {e}")))
    }
}

fn build_agent() -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(Duration::from_secs(15))
        .timeout_read(Duration::from_secs(120))
        .build()
}

/// Object storage over HTTP: anonymous GET by key, authorized PUT per artifact.
pub struct HttpStore {
    agent: ureq::Agent,
    base_url: String,
    authorizer: Option<Box<dyn Authorizer>>,
}

impl HttpStore {
    pub fn new(base_url: impl Into<String>, authorizer: Option<Box<dyn Authorizer>>) -> Self {
        Self {
            agent: build_agent(),
            base_url: base_url.into(),
            authorizer,
        }
    }

    /// `<base_url>/<key>`
    pub fn url_for(&self, key: &ArtifactKey) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), key.0)
    }

    fn authorize(&self, key: &ArtifactKey) -> Result<SignedRequest, SyncError> {
        let authorizer = self
            .authorizer
            .as_ref()
            .ok_or_else(|| transfer_err(key, "no upload authorization endpoint configured"))?;
        // Signed URLs are short-lived: one per PUT.
        authorizer.authorize(key)
    }

    fn put(
        &self,
        key: &ArtifactKey,
        len: u64,
        body: impl Read,
    ) -> Result<(), SyncError> {
        let signed = self.authorize(key)?;
        let mut req = self
            .agent
            .put(&signed.url)
            .set("Content-Length", &len.to_string());
        for (name, value) in &signed.headers {
            req = req.set(name, value);
        }
        req.send(body).map_err(|e| transfer_err(key, e))?;
        Ok(())
    }
}

impl ObjectStore for HttpStore {
    fn upload(
        &self,
        local: &Path,
        key: &ArtifactKey,
        progress: &mut dyn FnMut(u64, u64),
    ) -> Result<(), SyncError> {
        let file = File::open(local).map_err(|e| io_err(local, e))?;
        let total = file.metadata().map_err(|e| io_err(local, e))?.len();
        progress(0, total);
        let task = TransferTask::new(key.clone(), Direction::Upload, total);
        let reader = ProgressReader::new(file, task, |done, total| progress(done, total));
        self.put(key, total, reader)?;
        tracing::debug!(key = %key, bytes = total, "uploaded");
        Ok(())
    }

    fn download(
        &self,
        key: &ArtifactKey,
        local: &Path,
        progress: &mut dyn FnMut(u64, u64),
    ) -> Result<(), SyncError> {
        let resp = self
            .agent
            .get(&self.url_for(key))
            .call()
            .map_err(|e| transfer_err(key, e))?;
        let total = resp
            .header("Content-Length")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        progress(0, total);
        let task = TransferTask::new(key.clone(), Direction::Download, total);
        let mut reader = ProgressReader::new(resp.into_reader(), task, |done, total| {
            progress(done, total)
        });
        let written = write_via_part(local, &mut reader).map_err(|e| match e {
            SyncError::Io { source, .. } if source.kind() != io::ErrorKind::PermissionDenied => {
                transfer_err(key, source)
            }
            other => other,
        })?;
        if total > 0 && written != total {
            return Err(transfer_err(
                key,
                format!("short read: {written} of {total} bytes"),
            ));
        }
        tracing::debug!(key = %key, bytes = written, "downloaded");
        Ok(())
    }

    fn get_bytes(&self, key: &ArtifactKey) -> Result<Option<Vec<u8>>, SyncError> {
        match self.agent.get(&self.url_for(key)).call() {
            Ok(resp) => {
                let mut bytes = Vec::new();
                resp.into_reader()
                    .read_to_end(&mut bytes)
                    .map_err(|e| transfer_err(key, e))?;
                Ok(Some(bytes))
            }
            Err(ureq::Error::Status(404, _)) => Ok(None),
            Err(e) => Err(transfer_err(key, e)),
        }
    }

    fn put_bytes(&self, key: &ArtifactKey, bytes: &[u8]) -> Result<(), SyncError> {
        self.put(key, bytes.len() as u64, bytes)
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// The store a config points at: a `file://` base URL selects a [`LocalStore`],
/// anything else an [`HttpStore`] authorized through `sign_url` when set.
pub fn store_from_config(config: &LauncherConfig) -> Box<dyn ObjectStore> {
    if let Some(root) = config.base_url.strip_prefix("file://") {
        tracing::debug!(root, "using local object store");
        return Box::new(LocalStore::new(root));
    }
    let authorizer = config.sign_url.as_ref().map(|url| {
        Box::new(SignedUrlAuthorizer::new(url.clone(), config.auth_token.clone()))
            as Box<dyn Authorizer>
    });
    Box::new(HttpStore::new(config.base_url.clone(), authorizer))
}
