//! Local filesystem blob store.
//!
//! Blobs live under a root directory at their storage key. Writes go to a
//! hidden sibling file first and are renamed into place once synced, so a
//! half-written upload is never visible under its final key.

use crate::error::{StorageError, StorageResult};
use crate::traits::{ByteStream, ObjectMeta, ObjectStore, StreamingUpload};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use uuid::Uuid;

/// Chunk size for streaming reads (64 KiB).
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Prefix of in-flight write files. Listing skips anything starting with it.
const PARTIAL_PREFIX: &str = ".partial-";

/// Local filesystem object store.
#[derive(Debug)]
pub struct FilesystemBackend {
    root: PathBuf,
}

fn not_found_or_io(key: &str, err: std::io::Error) -> StorageError {
    if err.kind() == ErrorKind::NotFound {
        StorageError::NotFound(key.to_string())
    } else {
        StorageError::Io(err)
    }
}

fn with_context(err: std::io::Error, what: &str) -> StorageError {
    StorageError::Io(std::io::Error::new(err.kind(), format!("{what}: {err}")))
}

/// Canonicalize `path` and require it to stay inside `root`.
fn ensure_within(
    root: &Path,
    path: &Path,
    is_symlink: bool,
    key: &str,
    label: &str,
) -> StorageResult<()> {
    let canonical = path.canonicalize().map_err(|err| {
        if is_symlink {
            StorageError::InvalidKey(format!("{label} symlink target missing: {key}"))
        } else {
            with_context(err, "failed to canonicalize path")
        }
    })?;
    if !canonical.starts_with(root) {
        return Err(StorageError::InvalidKey(format!(
            "{label} escapes storage root: {key}"
        )));
    }
    Ok(())
}

/// Map a key to a path under `root`, refusing anything that could escape it.
///
/// Besides rejecting `..` and absolute keys, this follows symlinks: an
/// existing path must resolve inside the root, and for a path that does not
/// exist yet the nearest existing ancestor must.
fn resolve_key(root: &Path, key: &str) -> StorageResult<PathBuf> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("empty key".to_string()));
    }
    if key.starts_with(['/', '\\']) || key.contains("..") {
        return Err(StorageError::InvalidKey(format!(
            "path traversal not allowed: {key}"
        )));
    }
    if !Path::new(key)
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
    {
        return Err(StorageError::InvalidKey(format!(
            "unsafe path component in key: {key}"
        )));
    }

    let root_canonical = root
        .canonicalize()
        .map_err(|err| with_context(err, "failed to canonicalize root"))?;
    let path = root.join(key);

    let mut probe = Some(path.as_path());
    while let Some(candidate) = probe {
        match std::fs::symlink_metadata(candidate) {
            Ok(meta) => {
                let label = if candidate == path { "path" } else { "ancestor" };
                ensure_within(
                    &root_canonical,
                    candidate,
                    meta.file_type().is_symlink(),
                    key,
                    label,
                )?;
                return Ok(path);
            }
            Err(err) if err.kind() == ErrorKind::NotFound => probe = candidate.parent(),
            Err(err) => return Err(with_context(err, "failed to stat path")),
        }
    }

    Ok(path)
}

fn partial_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{PARTIAL_PREFIX}{}-{name}", Uuid::new_v4()))
}

impl FilesystemBackend {
    /// Open (creating if needed) a store rooted at `root`.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        let root = self.root.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || resolve_key(&root, &key))
            .await
            .map_err(|err| StorageError::Io(std::io::Error::other(format!("join error: {err}"))))?
    }

    async fn ensure_parent(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Remove directories left empty by a delete, stopping at the root.
    async fn prune_empty_dirs(&self, start: Option<&Path>) {
        let mut dir = start;
        while let Some(current) = dir {
            if current == self.root || !current.starts_with(&self.root) {
                break;
            }
            // remove_dir fails on non-empty directories, which ends the walk.
            if fs::remove_dir(current).await.is_err() {
                break;
            }
            dir = current.parent();
        }
    }
}

#[async_trait]
impl ObjectStore for FilesystemBackend {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.key_path(key).await?;
        Ok(fs::try_exists(&path).await?)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        let path = self.key_path(key).await?;
        let metadata = fs::metadata(&path)
            .await
            .map_err(|err| not_found_or_io(key, err))?;

        Ok(ObjectMeta {
            size: metadata.len(),
            last_modified: metadata.modified().ok().map(Into::into),
            content_type: None,
        })
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let path = self.key_path(key).await?;
        let data = fs::read(&path)
            .await
            .map_err(|err| not_found_or_io(key, err))?;
        Ok(Bytes::from(data))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        use tokio::io::AsyncReadExt;

        let path = self.key_path(key).await?;
        let mut file = fs::File::open(&path)
            .await
            .map_err(|err| not_found_or_io(key, err))?;

        let stream = async_stream::try_stream! {
            let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                yield Bytes::copy_from_slice(&buf[..n]);
            }
        };

        Ok(Box::pin(stream))
    }

    #[instrument(skip(self, data), fields(backend = "filesystem", size = data.len()))]
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        let mut upload = self.put_stream(key, None).await?;
        if let Err(err) = upload.write(data).await {
            let _ = upload.abort().await;
            return Err(err);
        }
        upload.finish().await?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn put_stream(
        &self,
        key: &str,
        _content_type: Option<&str>,
    ) -> StorageResult<Box<dyn StreamingUpload>> {
        let path = self.key_path(key).await?;
        self.ensure_parent(&path).await?;

        let partial_path = partial_path_for(&path);
        let file = fs::File::create(&partial_path).await?;

        Ok(Box::new(FilesystemUpload {
            file,
            partial_path,
            final_path: path,
            bytes_written: 0,
        }))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.key_path(key).await?;
        fs::remove_file(&path)
            .await
            .map_err(|err| not_found_or_io(key, err))?;
        self.prune_empty_dirs(path.parent()).await;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let base = if prefix.trim_matches('/').is_empty() {
            self.root.clone()
        } else {
            self.key_path(prefix.trim_end_matches('/')).await?
        };

        let mut keys = Vec::new();
        match fs::metadata(&base).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Ok(keys),
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(keys),
            Err(err) => return Err(StorageError::Io(err)),
        }

        let mut pending = vec![base];
        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                // file_type() does not follow symlinks; links are skipped.
                let file_type = entry.file_type().await?;
                let path = entry.path();
                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }
                if !file_type.is_file()
                    || entry.file_name().to_string_lossy().starts_with(PARTIAL_PREFIX)
                {
                    continue;
                }
                if let Ok(rel) = path.strip_prefix(&self.root) {
                    let key = rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn copy(&self, from: &str, to: &str) -> StorageResult<()> {
        let from_path = self.key_path(from).await?;
        let to_path = self.key_path(to).await?;
        self.ensure_parent(&to_path).await?;
        fs::copy(&from_path, &to_path)
            .await
            .map_err(|err| not_found_or_io(from, err))?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn health_check(&self) -> StorageResult<()> {
        let metadata = fs::metadata(&self.root)
            .await
            .map_err(|err| with_context(err, "storage root not accessible"))?;
        if !metadata.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                ErrorKind::NotADirectory,
                format!("storage root is not a directory: {}", self.root.display()),
            )));
        }

        let probe = self.root.join(format!("{PARTIAL_PREFIX}health-{}", Uuid::new_v4()));
        fs::write(&probe, b"ok")
            .await
            .map_err(|err| with_context(err, "storage root not writable"))?;
        let _ = fs::remove_file(&probe).await;
        Ok(())
    }
}

/// Streaming write into a hidden partial file.
struct FilesystemUpload {
    file: fs::File,
    partial_path: PathBuf,
    final_path: PathBuf,
    bytes_written: u64,
}

#[async_trait]
impl StreamingUpload for FilesystemUpload {
    async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        self.file.write_all(&data).await?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    async fn finish(self: Box<Self>) -> StorageResult<u64> {
        let Self {
            mut file,
            partial_path,
            final_path,
            bytes_written,
        } = *self;

        let committed = async {
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&partial_path, &final_path).await
        }
        .await;

        if let Err(err) = committed {
            let _ = fs::remove_file(&partial_path).await;
            return Err(StorageError::Io(err));
        }
        Ok(bytes_written)
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        let Self {
            file, partial_path, ..
        } = *self;
        drop(file);
        match fs::remove_file(&partial_path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StorageError::Io(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    async fn backend() -> (tempfile::TempDir, FilesystemBackend) {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();
        (dir, backend)
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let (_dir, backend) = backend().await;
        let key = "uploads/user/1700000000000_abcd1234_notes.pdf";

        backend.put(key, Bytes::from("hello world")).await.unwrap();
        assert!(backend.exists(key).await.unwrap());
        assert_eq!(backend.get(key).await.unwrap(), Bytes::from("hello world"));
        assert_eq!(backend.head(key).await.unwrap().size, 11);
    }

    #[tokio::test]
    async fn test_streaming_upload_invisible_until_finish() {
        let (_dir, backend) = backend().await;
        let key = "uploads/u/report.docx";

        let mut upload = backend.put_stream(key, None).await.unwrap();
        upload.write(Bytes::from_static(b"part one, ")).await.unwrap();
        assert!(!backend.exists(key).await.unwrap());
        assert!(backend.list("uploads").await.unwrap().is_empty());

        upload.write(Bytes::from_static(b"part two")).await.unwrap();
        assert_eq!(upload.finish().await.unwrap(), 18);

        let streamed: Vec<Bytes> = backend
            .get_stream(key)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(streamed.concat(), b"part one, part two");
    }

    #[tokio::test]
    async fn test_abort_leaves_nothing_behind() {
        let (dir, backend) = backend().await;
        let key = "uploads/u/draft.txt";

        let mut upload = backend.put_stream(key, None).await.unwrap();
        upload.write(Bytes::from_static(b"discard me")).await.unwrap();
        upload.abort().await.unwrap();

        assert!(!backend.exists(key).await.unwrap());
        let leftovers = std::fs::read_dir(dir.path().join("uploads/u")).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found_and_prunes_dirs() {
        let (dir, backend) = backend().await;

        assert!(matches!(
            backend.delete("uploads/u/missing.pdf").await,
            Err(StorageError::NotFound(_))
        ));

        backend
            .put("uploads/u/a.pdf", Bytes::from_static(b"a"))
            .await
            .unwrap();
        backend.delete("uploads/u/a.pdf").await.unwrap();
        assert!(!dir.path().join("uploads").exists());
        assert!(dir.path().exists());
    }

    #[tokio::test]
    async fn test_list_is_sorted_and_scoped() {
        let (_dir, backend) = backend().await;
        for key in ["uploads/b/2.txt", "uploads/a/1.txt", "organizations/o/x.txt"] {
            backend.put(key, Bytes::from_static(b"x")).await.unwrap();
        }

        assert_eq!(
            backend.list("uploads/").await.unwrap(),
            vec!["uploads/a/1.txt", "uploads/b/2.txt"]
        );
        assert_eq!(backend.list("").await.unwrap().len(), 3);
        assert!(backend.list("nothing-here").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let (_dir, backend) = backend().await;

        for key in ["../escape", "/absolute/path", "a/../b", "a/../../etc/passwd", ""] {
            assert!(
                matches!(backend.exists(key).await, Err(StorageError::InvalidKey(_))),
                "{key:?} should be rejected"
            );
        }
        assert!(backend.exists("valid/nested/key").await.is_ok());
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_symlink_escape_rejected() {
        use std::os::unix::fs::symlink;

        let (dir, backend) = backend().await;
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "secret").unwrap();

        symlink(outside.path().join("secret.txt"), dir.path().join("link")).unwrap();
        match backend.get("link").await {
            Err(StorageError::InvalidKey(msg)) => assert!(msg.contains("escapes storage root")),
            other => panic!("expected InvalidKey, got {other:?}"),
        }

        symlink(outside.path(), dir.path().join("escape")).unwrap();
        let result = backend
            .put("escape/nested/deep/file.txt", Bytes::from("data"))
            .await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));
        assert!(!outside.path().join("nested").exists());
    }

    #[tokio::test]
    async fn test_health_check() {
        let (dir, backend) = backend().await;
        backend.health_check().await.unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
