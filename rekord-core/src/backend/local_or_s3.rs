//! Local-disk and S3 transports, both expressed through `object_store`.
//!
//! Grounded on `tvix-castore`'s `ObjectStoreBlobService`
//! (`blobservice/object_store.rs`), which uses the same crate to cover both
//! a local filesystem root and a remote object store behind one
//! implementation. The bucketed layout (`blobs/XX/<hex>`) is eagerly
//! materialized as real directories for the local transport only, mirroring
//! `disk_local.cc`'s `LocalDisk::Init` — corrected to 256 two-hex-digit
//! buckets rather than that function's 4096-bucket bug (see
//! `SPEC_FULL.md` §C.5).

use crate::backend::Backend;
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use object_store::{aws::AmazonS3Builder, local::LocalFileSystem, path::Path as StorePath, ObjectStore};
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

pub struct ObjectStoreBackend {
    store: Arc<dyn ObjectStore>,
    /// Present only for the local transport, so `init` can pre-create the
    /// bucket directory tree the way a real filesystem repository expects.
    local_root: Option<PathBuf>,
}

impl ObjectStoreBackend {
    pub fn local(path: &str) -> Result<Self> {
        let root = PathBuf::from(path);
        std::fs::create_dir_all(&root)?;
        let store = LocalFileSystem::new_with_prefix(&root)
            .map_err(|e| Error::Backend(format!("opening local repository at {path}: {e}")))?;
        Ok(Self {
            store: Arc::new(store),
            local_root: Some(root),
        })
    }

    /// `url` carries bucket and region in its path/host; credentials come
    /// from the standard `AWS_*` environment variables via
    /// `AmazonS3Builder::from_env`, matching `rk_DecodeURL`'s framing of S3
    /// as a transport the core merely composes, never re-implements.
    pub fn s3(url: &Url) -> Result<Self> {
        let store = AmazonS3Builder::from_env()
            .with_url(url.as_str())
            .build()
            .map_err(|e| Error::Config(format!("invalid S3 repository url: {e}")))?;
        Ok(Self {
            store: Arc::new(store),
            local_root: None,
        })
    }
}

#[async_trait]
impl Backend for ObjectStoreBackend {
    async fn init(&self) -> Result<()> {
        if let Some(root) = &self.local_root {
            for bucket in 0u16..256 {
                std::fs::create_dir_all(root.join("blobs").join(format!("{bucket:02x}")))?;
            }
            std::fs::create_dir_all(root.join("tags"))?;
            std::fs::create_dir_all(root.join("keys"))?;
        }
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        match self.store.head(&StorePath::from(path)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let result = self.store.get(&StorePath::from(path)).await?;
        Ok(result.bytes().await?.to_vec())
    }

    async fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        // Objects are content-addressed: a path that already exists holds
        // identical bytes by construction, so a second writer racing to
        // create it is a no-op, not a conflict.
        if self.exists(path).await? {
            return Ok(());
        }
        self.store
            .put(&StorePath::from(path), Bytes::copy_from_slice(data).into())
            .await?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix_path = if prefix.is_empty() {
            None
        } else {
            Some(StorePath::from(prefix))
        };
        let mut stream = self.store.list(prefix_path.as_ref());
        let mut out = Vec::new();
        while let Some(meta) = stream.next().await {
            out.push(meta?.location.to_string());
        }
        Ok(out)
    }
}
