//! Snapshot writer (C7): walks one or more roots, chunks and uploads their
//! content, and assembles the resulting tree bottom-up into a snapshot.
//!
//! Directory traversal fans out on an effectively unbounded pool while the
//! actual chunk uploads are bounded to the configured worker count — see
//! [`crate::concurrency`] for why that split is what keeps recursion from
//! deadlocking against the upload bound. A directory's own object is only
//! ever built, hashed, and written after every child underneath it has
//! finished, so a directory's id always reflects its final, complete
//! content (bottom-up hashing).
//!
//! Grounded on `examples/original_source/src/rekord/repository_write.cc`'s
//! `PutContext`/`PutDirectory`/`PutFile`/`rk_Put`.

use crate::backend::Backend as _;
use crate::cache::Cache;
use crate::codec::ObjectType;
use crate::concurrency::{default_worker_count, WorkerPool};
use crate::entries::{encode_directory, encode_file_chunks, ChunkEntry, EntryKind, FileEntry, Snapshot};
use crate::error::{Error, Result};
use crate::oid::Oid;
use crate::paths;
use crate::repository::Repository;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::AsyncReadExt;

pub struct PutSettings {
    /// Raw mode: exactly one root, stored as a single object with no
    /// enclosing snapshot or tag.
    pub raw: bool,
    /// Stat through symlinks and store the target's content instead of a
    /// `Link` entry.
    pub follow_symlinks: bool,
    /// Overrides the generated `snapshot-<unix time>` name.
    pub name: Option<String>,
    pub workers: usize,
}

impl Default for PutSettings {
    fn default() -> Self {
        Self {
            raw: false,
            follow_symlinks: false,
            name: None,
            workers: default_worker_count(),
        }
    }
}

pub struct PutOutcome {
    /// `None` in raw mode.
    pub tag_name: Option<String>,
    /// The snapshot's object id, or (raw mode) the single root's own id.
    pub oid: Oid,
    pub total_len: i64,
    pub stored_len: i64,
}

#[derive(Clone)]
struct WriteCtx {
    repo: Arc<Repository>,
    cache: Arc<Cache>,
    dir_pool: WorkerPool,
    file_pool: WorkerPool,
    stored: Arc<AtomicI64>,
    follow_symlinks: bool,
}

pub async fn put(repo: Arc<Repository>, cache: Arc<Cache>, roots: &[PathBuf], settings: &PutSettings) -> Result<PutOutcome> {
    if settings.raw && roots.len() != 1 {
        return Err(Error::Config("raw mode takes exactly one root".into()));
    }

    let ctx = WriteCtx {
        repo,
        cache,
        dir_pool: WorkerPool::unbounded_for_fanout(),
        file_pool: WorkerPool::new(settings.workers),
        stored: Arc::new(AtomicI64::new(0)),
        follow_symlinks: settings.follow_symlinks,
    };

    if settings.raw {
        let root = paths::validate_root(&roots[0])?;
        let entry = put_path(&ctx, &root).await?;
        return Ok(PutOutcome {
            tag_name: None,
            oid: entry.id,
            total_len: entry.size,
            stored_len: ctx.stored.load(Ordering::Relaxed),
        });
    }

    let mut root_entries = Vec::with_capacity(roots.len());
    for root in roots {
        let root = paths::validate_root(root)?;
        let mut entry = put_path(&ctx, &root).await?;
        entry.name = paths::normalize_root_name(&root.to_string_lossy());
        root_entries.push(entry);
    }

    let total_len: i64 = root_entries.iter().map(|e| e.size).sum();
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64;
    let snapshot = Snapshot {
        name: settings.name.clone().unwrap_or_else(|| format!("snapshot-{now}")),
        time: now,
        len: total_len,
        stored: ctx.stored.load(Ordering::Relaxed),
        roots: root_entries,
    };
    let body = snapshot.encode();
    let (oid, written) = ctx.repo.write_object(ObjectType::Snapshot2, &body, &ctx.cache).await?;
    if written {
        ctx.stored.fetch_add(body.len() as i64, Ordering::Relaxed);
    }
    let tag_name = ctx.repo.write_tag(&oid).await?;

    Ok(PutOutcome {
        tag_name: Some(tag_name),
        oid,
        total_len,
        stored_len: ctx.stored.load(Ordering::Relaxed),
    })
}

#[cfg(unix)]
fn file_owner(meta: &std::fs::Metadata) -> (u32, u32, u32) {
    use std::os::unix::fs::MetadataExt;
    (meta.uid(), meta.gid(), meta.mode())
}

#[cfg(not(unix))]
fn file_owner(_meta: &std::fs::Metadata) -> (u32, u32, u32) {
    (0, 0, 0o644)
}

#[cfg(unix)]
fn file_mtime(meta: &std::fs::Metadata) -> i64 {
    use std::os::unix::fs::MetadataExt;
    meta.mtime()
}

#[cfg(not(unix))]
fn file_mtime(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn entry_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn seed_from_salt(salt: &[u8; 32]) -> u64 {
    u64::from_le_bytes(salt[0..8].try_into().unwrap())
}

fn put_path<'a>(ctx: &'a WriteCtx, path: &'a Path) -> Pin<Box<dyn Future<Output = Result<FileEntry>> + Send + 'a>> {
    Box::pin(async move {
        let meta = if ctx.follow_symlinks {
            tokio::fs::metadata(path).await?
        } else {
            tokio::fs::symlink_metadata(path).await?
        };
        let name = entry_name(path);
        let (uid, gid, mode) = file_owner(&meta);
        let mtime = file_mtime(&meta);

        if meta.file_type().is_symlink() {
            let target = tokio::fs::read_link(path).await?;
            return Ok(FileEntry {
                id: Oid::from_bytes([0u8; 32]),
                kind: EntryKind::Link,
                name,
                mtime,
                btime: mtime,
                uid,
                gid,
                mode,
                size: 0,
                link_target: Some(target.to_string_lossy().into_owned()),
                chunks: Vec::new(),
            });
        }

        let path_key = path.to_string_lossy().into_owned();
        let size = meta.len() as i64;

        if let Some(cached) = ctx.cache.lookup(&path_key) {
            if cached.mtime == mtime && cached.mode == mode && cached.size == size {
                return Ok(FileEntry {
                    id: cached.id,
                    kind: if meta.is_dir() { EntryKind::Directory } else { EntryKind::File },
                    name,
                    mtime,
                    btime: mtime,
                    uid,
                    gid,
                    mode,
                    size: if meta.is_dir() { 0 } else { size },
                    link_target: None,
                    chunks: Vec::new(),
                });
            }
        }

        if meta.is_dir() {
            return put_directory(ctx, path, &path_key, name, mtime, uid, gid, mode).await;
        }

        put_file(ctx, path, &path_key, name, mtime, uid, gid, mode, size).await
    })
}

#[allow(clippy::too_many_arguments)]
async fn put_directory(
    ctx: &WriteCtx,
    path: &Path,
    path_key: &str,
    name: String,
    mtime: i64,
    uid: u32,
    gid: u32,
    mode: u32,
) -> Result<FileEntry> {
    let mut read_dir = tokio::fs::read_dir(path).await?;
    let mut children_paths = Vec::new();
    while let Some(entry) = read_dir.next_entry().await? {
        children_paths.push(entry.path());
    }
    children_paths.sort();

    let results: Arc<Mutex<Vec<Option<FileEntry>>>> = Arc::new(Mutex::new((0..children_paths.len()).map(|_| None).collect()));
    let mut group = ctx.dir_pool.group();
    for (index, child_path) in children_paths.into_iter().enumerate() {
        let ctx = ctx.clone();
        let results = results.clone();
        group.spawn(async move {
            let entry = put_path(&ctx, &child_path).await?;
            results.lock().unwrap()[index] = Some(entry);
            Ok(())
        });
    }
    group.sync().await?;

    let children: Vec<FileEntry> = Arc::try_unwrap(results)
        .expect("all spawned tasks have completed")
        .into_inner()
        .unwrap()
        .into_iter()
        .map(|entry| entry.expect("every indexed slot was filled by its task"))
        .collect();

    let body = encode_directory(&children);
    let (oid, written) = ctx.repo.write_object(ObjectType::Directory2, &body, &ctx.cache).await?;
    if written {
        ctx.stored.fetch_add(body.len() as i64, Ordering::Relaxed);
    }
    ctx.cache.record(path_key, mtime, mode, 0, oid);

    Ok(FileEntry {
        id: oid,
        kind: EntryKind::Directory,
        name,
        mtime,
        btime: mtime,
        uid,
        gid,
        mode,
        size: 0,
        link_target: None,
        chunks: Vec::new(),
    })
}

#[allow(clippy::too_many_arguments)]
async fn put_file(
    ctx: &WriteCtx,
    path: &Path,
    path_key: &str,
    name: String,
    mtime: i64,
    uid: u32,
    gid: u32,
    mode: u32,
    size: i64,
) -> Result<FileEntry> {
    let mut file = tokio::fs::File::open(path).await?;
    let seed = seed_from_salt(ctx.repo.hash_salt());
    let mut chunker = crate::chunker::Chunker::with_defaults(seed);

    let chunk_entries: Arc<Mutex<Vec<ChunkEntry>>> = Arc::new(Mutex::new(Vec::new()));
    let mut group = ctx.file_pool.group();
    let mut buf: Vec<u8> = Vec::new();
    let mut read_buf = vec![0u8; 256 * 1024];

    loop {
        let n = file.read(&mut read_buf).await?;
        let eof = n == 0;
        if n > 0 {
            buf.extend_from_slice(&read_buf[..n]);
        }

        let mut spans = Vec::new();
        let consumed = chunker.process(&buf, eof, |offset, bytes| spans.push((offset, bytes.to_vec())));
        for (offset, bytes) in spans {
            let ctx = ctx.clone();
            let chunk_entries = chunk_entries.clone();
            group.spawn(async move {
                let (oid, written) = ctx.repo.write_object(ObjectType::Chunk, &bytes, &ctx.cache).await?;
                if written {
                    ctx.stored.fetch_add(bytes.len() as i64, Ordering::Relaxed);
                }
                chunk_entries.lock().unwrap().push(ChunkEntry {
                    offset,
                    len: bytes.len() as u32,
                    id: oid,
                });
                Ok(())
            });
        }
        buf.drain(..consumed);
        if eof {
            break;
        }
    }
    group.sync().await?;

    let mut chunks = Arc::try_unwrap(chunk_entries).expect("all spawned tasks have completed").into_inner().unwrap();
    chunks.sort_by_key(|c| c.offset);

    if chunks.is_empty() {
        // Zero-length file: still needs one (empty) chunk object to point
        // at, so reading it back reconstructs zero bytes rather than
        // failing to resolve an id.
        let (oid, _) = ctx.repo.write_object(ObjectType::Chunk, &[], &ctx.cache).await?;
        chunks.push(ChunkEntry { offset: 0, len: 0, id: oid });
    }

    let id = if chunks.len() == 1 {
        chunks[0].id
    } else {
        let body = encode_file_chunks(&chunks);
        let (oid, written) = ctx.repo.write_object(ObjectType::File, &body, &ctx.cache).await?;
        if written {
            ctx.stored.fetch_add(body.len() as i64, Ordering::Relaxed);
        }
        oid
    };

    ctx.cache.record(path_key, mtime, mode, size, id);

    Ok(FileEntry {
        id,
        kind: EntryKind::File,
        name,
        mtime,
        btime: mtime,
        uid,
        gid,
        mode,
        size,
        link_target: None,
        chunks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::Repository;
    use tempfile::tempdir;

    async fn fresh_repo(root: &Path) -> (Arc<Repository>, Arc<Cache>) {
        let url = root.to_string_lossy().into_owned();
        let repo = Repository::init(&url, "full-pw", "write-pw").await.unwrap();
        (Arc::new(repo), Arc::new(Cache::in_memory()))
    }

    #[tokio::test]
    async fn put_then_object_exists_and_is_deduplicated() {
        let repo_dir = tempdir().unwrap();
        let (repo, cache) = fresh_repo(repo_dir.path()).await;

        let src = tempdir().unwrap();
        std::fs::write(src.path().join("a.txt"), b"hello world").unwrap();
        std::fs::create_dir(src.path().join("sub")).unwrap();
        std::fs::write(src.path().join("sub/b.txt"), b"nested file content").unwrap();

        let outcome = put(repo.clone(), cache.clone(), &[src.path().to_path_buf()], &PutSettings::default())
            .await
            .unwrap();
        assert!(outcome.tag_name.is_some());
        assert!(repo.has_object(&outcome.oid).await.unwrap());

        // Putting the same tree again should dedup every object (nothing
        // new is uploaded) while still producing a fresh snapshot/tag.
        let outcome2 = put(repo.clone(), cache.clone(), &[src.path().to_path_buf()], &PutSettings::default())
            .await
            .unwrap();
        assert_ne!(outcome.oid, outcome2.oid);
        // Every chunk and directory is deduplicated; only the (always
        // fresh, timestamped) snapshot object is newly stored.
        assert!(outcome2.stored_len < outcome.stored_len);
        assert!(outcome2.stored_len < outcome2.total_len);
    }

    #[tokio::test]
    async fn raw_mode_stores_single_root_with_no_tag() {
        let repo_dir = tempdir().unwrap();
        let (repo, cache) = fresh_repo(repo_dir.path()).await;

        let src = tempdir().unwrap();
        std::fs::write(src.path().join("only.bin"), vec![7u8; 10_000]).unwrap();

        let settings = PutSettings { raw: true, ..PutSettings::default() };
        let outcome = put(repo.clone(), cache.clone(), &[src.path().to_path_buf()], &settings)
            .await
            .unwrap();
        assert!(outcome.tag_name.is_none());
        assert!(repo.has_object(&outcome.oid).await.unwrap());
    }

    #[tokio::test]
    async fn raw_mode_rejects_multiple_roots() {
        let repo_dir = tempdir().unwrap();
        let (repo, cache) = fresh_repo(repo_dir.path()).await;
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        let settings = PutSettings { raw: true, ..PutSettings::default() };
        let result = put(repo, cache, &[a.path().to_path_buf(), b.path().to_path_buf()], &settings).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn empty_file_round_trips_through_a_chunk() {
        let repo_dir = tempdir().unwrap();
        let (repo, cache) = fresh_repo(repo_dir.path()).await;
        let src = tempdir().unwrap();
        std::fs::write(src.path().join("empty.txt"), b"").unwrap();

        let outcome = put(repo.clone(), cache, &[src.path().to_path_buf()], &PutSettings::default())
            .await
            .unwrap();
        let (_, snapshot_body) = repo.read_object(&outcome.oid).await.unwrap();
        let snapshot = Snapshot::decode(&snapshot_body, ObjectType::Snapshot2).unwrap();
        let dir_body = repo.read_object(&snapshot.roots[0].id).await.unwrap().1;
        let children = crate::entries::decode_directory(&dir_body, ObjectType::Directory2).unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].size, 0);
    }
}
