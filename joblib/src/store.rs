use crate::error::{Error, Result};
use crate::types::ArtifactId;
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;
use std::convert::Infallible;
use std::path::{Component, Path, PathBuf};
use std::{fmt, io, result};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

const ALLOWED_EXTENSIONS: &[&str] = &["las", "txt"];
/// Name the store root is listed under, matching the `/uploads/...` download route.
pub const ROOT_LABEL: &str = "uploads";

/// An uploaded file, stored alone in a directory named by its id.
#[derive(Clone, Debug, Serialize)]
pub struct Artifact {
    pub id: ArtifactId,
    pub filename: String,
    #[serde(skip)]
    pub dir: PathBuf,
}

impl Artifact {
    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.filename)
    }
}

/// One directory of the store as reported by [`ArtifactStore::list`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UploadsEntry {
    pub path: String,
    pub subdirs: Vec<String>,
    pub files: Vec<String>,
}

/// On-disk storage for uploaded artifacts.
///
/// Every artifact lives in `<root>/<uuid>/<filename>`. The store holds no in-memory index, the directory
/// tree is the source of truth, so concurrent creators never need to coordinate.
#[derive(Clone, Debug)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await.map_err(Error::Storage)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store `bytes` under a fresh id, keeping the original file name.
    pub async fn create(&self, bytes: &[u8], original_name: &str) -> Result<Artifact> {
        let chunk = Bytes::copy_from_slice(bytes);
        self.create_streamed(original_name, stream::iter([Ok::<_, Infallible>(chunk)]))
            .await
    }

    /// Store an upload as it arrives, chunk by chunk, so it never has to fit in memory.
    ///
    /// A chunk error from the sender is a `Validation` error; either way a failed upload leaves nothing behind.
    pub async fn create_streamed<S, E>(&self, original_name: &str, chunks: S) -> Result<Artifact>
    where
        S: Stream<Item = result::Result<Bytes, E>>,
        E: fmt::Display,
    {
        validate_filename(original_name)?;

        let id = Uuid::new_v4();
        let dir = self.root.join(id.to_string());
        fs::create_dir_all(&self.root)
            .await
            .map_err(Error::Storage)?;
        // create_dir, not create_dir_all: an existing directory means an id collision
        fs::create_dir(&dir).await.map_err(Error::Storage)?;

        let artifact = Artifact {
            id,
            filename: original_name.to_string(),
            dir,
        };
        match write_chunks(&artifact.path(), chunks).await {
            Ok(bytes) => {
                tracing::info!(artifact = %id, filename = original_name, bytes, "stored upload");
                Ok(artifact)
            }
            Err(err) => {
                let _ = fs::remove_dir_all(&artifact.dir).await;
                Err(err)
            }
        }
    }

    /// Absolute path of `filename` inside artifact `id`, if it exists and stays inside that artifact's directory.
    pub async fn resolve(&self, id: &str, filename: &str) -> Result<PathBuf> {
        let id = parse_id(id)?;
        let base = self.root.join(id.to_string());
        contained_file(&base, filename)
            .await
            .map_err(|_| Error::NotFound)
    }

    /// Recursively remove artifact `id`.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let id = parse_id(id)?;
        let dir = self.root.join(id.to_string());
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                tracing::info!(artifact = %id, "deleted upload");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(Error::NotFound),
            Err(err) => Err(Error::Storage(err)),
        }
    }

    /// Snapshot walk of the whole store, parents before children, names sorted.
    pub async fn list(&self) -> Result<Vec<UploadsEntry>> {
        let mut entries = Vec::new();
        if fs::metadata(&self.root).await.is_err() {
            return Ok(entries);
        }

        let mut pending = vec![(self.root.clone(), ROOT_LABEL.to_string())];
        while let Some((dir, path)) = pending.pop() {
            let (subdirs, files) = match read_children(&dir).await {
                Ok(children) => children,
                // lost a race with delete
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => return Err(Error::Storage(err)),
            };
            for name in subdirs.iter().rev() {
                pending.push((dir.join(name), format!("{}/{}", path, name)));
            }
            entries.push(UploadsEntry {
                path,
                subdirs,
                files,
            });
        }
        Ok(entries)
    }

    /// Remove the entire store root. Called once at shutdown.
    pub async fn purge_all(&self) -> Result<()> {
        match fs::remove_dir_all(&self.root).await {
            Ok(()) => {
                tracing::info!(root = %self.root.display(), "purged upload store");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Error::Storage(err)),
        }
    }
}

/// Resolve `relative` against `base` and return the file it names.
///
/// A path that lexically climbs out of `base` is `Forbidden` whether or not it exists. A path that exists
/// but canonicalizes outside `base` (through a symlink) is `Forbidden` too. Anything missing, or not a
/// regular file, is `NotFound`. Containment is checked component-wise on canonical paths, so `base-evil`
/// is never mistaken for a child of `base`.
pub async fn contained_file(base: &Path, relative: &str) -> Result<PathBuf> {
    if escapes(relative) {
        return Err(Error::Forbidden);
    }
    let base = fs::canonicalize(base).await.map_err(|_| Error::NotFound)?;
    let resolved = fs::canonicalize(base.join(relative))
        .await
        .map_err(|_| Error::NotFound)?;
    if resolved == base || !resolved.starts_with(&base) {
        return Err(Error::Forbidden);
    }
    match fs::metadata(&resolved).await {
        Ok(meta) if meta.is_file() => Ok(resolved),
        _ => Err(Error::NotFound),
    }
}

fn escapes(relative: &str) -> bool {
    let mut depth = 0usize;
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => match depth.checked_sub(1) {
                Some(d) => depth = d,
                None => return true,
            },
            Component::RootDir | Component::Prefix(_) => return true,
        }
    }
    false
}

async fn write_chunks<S, E>(path: &Path, chunks: S) -> Result<u64>
where
    S: Stream<Item = result::Result<Bytes, E>>,
    E: fmt::Display,
{
    futures::pin_mut!(chunks);
    let mut file = fs::File::create(path).await.map_err(Error::Storage)?;
    let mut written = 0u64;
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.map_err(|err| Error::Validation(format!("Upload failed: {}", err)))?;
        file.write_all(&chunk).await.map_err(Error::Storage)?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(Error::Storage)?;
    Ok(written)
}

fn parse_id(id: &str) -> Result<ArtifactId> {
    Uuid::parse_str(id).map_err(|_| Error::NotFound)
}

fn validate_filename(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Validation("No file selected".into()));
    }
    let path = Path::new(name);
    if name.contains(['/', '\\']) || path.file_name().and_then(|n| n.to_str()) != Some(name) {
        return Err(Error::Validation(format!("Invalid file name: {}", name)));
    }
    let ext = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        let shown = if ext.is_empty() {
            "no extension".to_string()
        } else {
            format!(".{}", ext)
        };
        return Err(Error::Validation(format!(
            "Only .las and .txt files allowed. Got {}",
            shown
        )));
    }
    Ok(())
}

async fn read_children(dir: &Path) -> io::Result<(Vec<String>, Vec<String>)> {
    let mut subdirs = Vec::new();
    let mut files = Vec::new();
    let mut read_dir = fs::read_dir(dir).await?;
    while let Some(entry) = read_dir.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        // symlinks are listed as files and never followed
        if entry.file_type().await?.is_dir() {
            subdirs.push(name);
        } else {
            files.push(name);
        }
    }
    subdirs.sort();
    files.sort();
    Ok((subdirs, files))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    async fn store() -> (tempfile::TempDir, ArtifactStore) {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::open(tmp.path().join("uploads"))
            .await
            .expect("open store");
        (tmp, store)
    }

    #[tokio::test]
    async fn create_then_resolve_returns_uploaded_bytes() {
        let (_tmp, store) = store().await;
        let artifact = store.create(b"x y z\n1 2 3\n", "core.las").await.unwrap();
        assert_eq!(artifact.filename, "core.las");

        let path = store
            .resolve(&artifact.id.to_string(), "core.las")
            .await
            .expect("resolve after create");
        assert!(path.is_absolute());
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"x y z\n1 2 3\n");
    }

    #[tokio::test]
    async fn extension_check_is_case_insensitive() {
        let (_tmp, store) = store().await;
        assert!(store.create(b"a", "SCAN.LAS").await.is_ok());
        assert!(store.create(b"a", "notes.Txt").await.is_ok());
        for bad in ["scan.laz", "archive.tar", "noext", "", "../core.las", "dir/core.las"] {
            match store.create(b"a", bad).await {
                Err(Error::Validation(_)) => {}
                other => panic!("{:?} should be rejected, got {:?}", bad, other),
            }
        }
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let (_tmp, store) = store().await;
        let id = Uuid::new_v4().to_string();
        assert!(matches!(store.resolve(&id, "core.las").await, Err(Error::NotFound)));
        assert!(matches!(store.delete(&id).await, Err(Error::NotFound)));
        assert!(matches!(store.delete("not-a-uuid").await, Err(Error::NotFound)));
    }

    #[tokio::test]
    async fn traversal_never_resolves() {
        let (tmp, store) = store().await;
        tokio::fs::write(tmp.path().join("secret.txt"), b"secret")
            .await
            .unwrap();
        let artifact = store.create(b"a", "core.las").await.unwrap();
        let id = artifact.id.to_string();

        for filename in ["../../secret.txt", "../../../etc/passwd", "/etc/passwd", ".", ""] {
            assert!(
                matches!(store.resolve(&id, filename).await, Err(Error::NotFound)),
                "{} resolved",
                filename
            );
        }
        let nested = format!("{}/..", id);
        for bad_id in ["..", "../..", "../../etc", nested.as_str()] {
            assert!(matches!(
                store.resolve(bad_id, "core.las").await,
                Err(Error::NotFound)
            ));
            assert!(matches!(store.delete(bad_id).await, Err(Error::NotFound)));
        }
        // delete with a bad id must not have touched anything
        assert!(store.resolve(&id, "core.las").await.is_ok());
    }

    #[tokio::test]
    async fn contained_file_distinguishes_forbidden_from_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("modules");
        tokio::fs::create_dir(&base).await.unwrap();
        tokio::fs::create_dir(tmp.path().join("modules-evil")).await.unwrap();
        tokio::fs::write(tmp.path().join("modules-evil/x.js"), b"x")
            .await
            .unwrap();
        tokio::fs::write(base.join("app.js"), b"ok").await.unwrap();

        assert!(contained_file(&base, "app.js").await.is_ok());
        assert!(contained_file(&base, "./sub/../app.js").await.is_err());
        assert!(matches!(
            contained_file(&base, "../modules-evil/x.js").await,
            Err(Error::Forbidden)
        ));
        assert!(matches!(
            contained_file(&base, "../nowhere.js").await,
            Err(Error::Forbidden)
        ));
        assert!(matches!(
            contained_file(&base, "missing.js").await,
            Err(Error::NotFound)
        ));
    }

    #[tokio::test]
    async fn contained_file_rejects_symlink_escape() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("modules");
        tokio::fs::create_dir(&base).await.unwrap();
        tokio::fs::write(tmp.path().join("secret"), b"s").await.unwrap();
        std::os::unix::fs::symlink(tmp.path().join("secret"), base.join("link")).unwrap();

        assert!(matches!(
            contained_file(&base, "link").await,
            Err(Error::Forbidden)
        ));
    }

    #[tokio::test]
    async fn delete_removes_artifact() {
        let (_tmp, store) = store().await;
        let artifact = store.create(b"a", "core.las").await.unwrap();
        let id = artifact.id.to_string();
        store.delete(&id).await.unwrap();
        assert!(!artifact.dir.exists());
        assert!(matches!(store.resolve(&id, "core.las").await, Err(Error::NotFound)));
        assert!(matches!(store.delete(&id).await, Err(Error::NotFound)));
    }

    #[tokio::test]
    async fn empty_store_lists_single_root_entry() {
        let (_tmp, store) = store().await;
        let listing = store.list().await.unwrap();
        assert_eq!(
            listing,
            vec![UploadsEntry {
                path: "uploads".into(),
                subdirs: vec![],
                files: vec![],
            }]
        );
    }

    #[tokio::test]
    async fn root_is_listed_as_uploads_whatever_its_dir_name() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(tmp.path().join("data").join("store"))
            .await
            .unwrap();
        let artifact = store.create(b"a", "core.las").await.unwrap();
        let listing = store.list().await.unwrap();
        assert_eq!(listing[0].path, "uploads");
        assert_eq!(listing[1].path, format!("uploads/{}", artifact.id));
    }

    #[tokio::test]
    async fn streamed_create_writes_every_chunk() {
        let (_tmp, store) = store().await;
        let chunks = stream::iter(
            ["0 0 0\n", "1 1 1\n", "2 2 2\n"]
                .into_iter()
                .map(|chunk| Ok::<_, Infallible>(Bytes::from_static(chunk.as_bytes()))),
        );
        let artifact = store.create_streamed("core.las", chunks).await.unwrap();
        let path = store
            .resolve(&artifact.id.to_string(), "core.las")
            .await
            .unwrap();
        assert_eq!(
            tokio::fs::read(&path).await.unwrap(),
            b"0 0 0\n1 1 1\n2 2 2\n"
        );
    }

    #[tokio::test]
    async fn broken_stream_leaves_nothing_behind() {
        let (_tmp, store) = store().await;
        let chunks = stream::iter(vec![
            Ok(Bytes::from_static(b"0 0 0\n")),
            Err("connection reset"),
        ]);
        match store.create_streamed("core.las", chunks).await {
            Err(Error::Validation(message)) => assert!(message.contains("connection reset")),
            other => panic!("expected a validation error, got {:?}", other),
        }
        let listing = store.list().await.unwrap();
        assert_eq!(listing.len(), 1);
        assert!(listing[0].subdirs.is_empty());
    }

    #[tokio::test]
    async fn listing_is_sorted_and_parent_first() {
        let (_tmp, store) = store().await;
        let a = store.create(b"a", "b.las").await.unwrap();
        tokio::fs::write(a.dir.join("a.txt"), b"a").await.unwrap();
        let b = store.create(b"b", "core.las").await.unwrap();

        let listing = store.list().await.unwrap();
        let mut ids = vec![a.id.to_string(), b.id.to_string()];
        ids.sort();
        assert_eq!(listing.len(), 3);
        assert_eq!(listing[0].path, "uploads");
        assert_eq!(listing[0].subdirs, ids);
        assert!(listing[0].files.is_empty());
        assert_eq!(listing[1].path, format!("uploads/{}", ids[0]));
        assert_eq!(listing[2].path, format!("uploads/{}", ids[1]));

        let a_entry = listing
            .iter()
            .find(|entry| entry.path.ends_with(&a.id.to_string()))
            .unwrap();
        assert_eq!(a_entry.files, vec!["a.txt".to_string(), "b.las".to_string()]);
    }

    #[tokio::test]
    async fn purge_all_removes_root() {
        let (_tmp, store) = store().await;
        store.create(b"a", "core.las").await.unwrap();
        store.purge_all().await.unwrap();
        assert!(!store.root().exists());
        assert!(store.list().await.unwrap().is_empty());
        // purging twice is fine
        store.purge_all().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creates_never_collide() {
        let (_tmp, store) = store().await;
        let mut tasks = Vec::new();
        for i in 0..128 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                let body = format!("client {}", i);
                let artifact = store.create(body.as_bytes(), "core.las").await.unwrap();
                (artifact, body)
            }));
        }

        let mut ids = HashSet::new();
        for task in tasks {
            let (artifact, body) = task.await.unwrap();
            assert!(ids.insert(artifact.id));
            let path = store
                .resolve(&artifact.id.to_string(), "core.las")
                .await
                .unwrap();
            assert_eq!(tokio::fs::read_to_string(path).await.unwrap(), body);
        }
        assert_eq!(ids.len(), 128);
        assert_eq!(store.list().await.unwrap()[0].subdirs.len(), 128);
    }
}
