use crate::block_meta::{object_path, BlockMeta, META_NAME};
use crate::error::{Result, StorageError};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::TryStreamExt;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Named-object access to the files of a block, addressed by
/// `(name, block id, tenant id)`.
#[async_trait]
pub trait Backend: Send + Sync + fmt::Debug {
    /// Read `length` bytes of a named object starting at `offset`
    async fn read_range(
        &self,
        name: &str,
        block_id: Uuid,
        tenant_id: &str,
        offset: u64,
        length: u64,
    ) -> Result<Bytes>;

    /// Read a whole named object
    async fn read(&self, name: &str, block_id: Uuid, tenant_id: &str) -> Result<Bytes>;

    /// Write a whole named object, replacing any previous content
    async fn write(&self, name: &str, block_id: Uuid, tenant_id: &str, data: Bytes) -> Result<()>;

    /// Size in bytes of a named object
    async fn stat(&self, name: &str, block_id: Uuid, tenant_id: &str) -> Result<u64>;

    /// Ids of every block of a tenant that has a meta record
    async fn blocks(&self, tenant_id: &str) -> Result<Vec<Uuid>>;

    /// Persist the meta record of a block
    async fn write_block_meta(&self, meta: &BlockMeta) -> Result<()> {
        let data = serde_json::to_vec(meta)?;
        self.write(META_NAME, meta.block_id, &meta.tenant_id, Bytes::from(data))
            .await
    }

    /// Load the meta record of a block
    async fn block_meta(&self, block_id: Uuid, tenant_id: &str) -> Result<BlockMeta> {
        let data = self.read(META_NAME, block_id, tenant_id).await?;
        Ok(serde_json::from_slice(&data)?)
    }
}

/// Backend over any `object_store` implementation (S3, local filesystem, memory).
/// Objects live at `<prefix>/<tenant>/<block>/<name>`.
#[derive(Debug, Clone)]
pub struct ObjectStoreBackend {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl ObjectStoreBackend {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: &str) -> Self {
        Self {
            store,
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    /// In-memory backend, used by tests and benchmarks
    pub fn in_memory() -> Self {
        Self::new(Arc::new(object_store::memory::InMemory::new()), "")
    }

    fn with_prefix(&self, path: String) -> ObjectPath {
        if self.prefix.is_empty() {
            ObjectPath::from(path)
        } else {
            ObjectPath::from(format!("{}/{}", self.prefix, path))
        }
    }

    fn path(&self, name: &str, block_id: Uuid, tenant_id: &str) -> ObjectPath {
        self.with_prefix(object_path(tenant_id, block_id, name))
    }
}

#[async_trait]
impl Backend for ObjectStoreBackend {
    #[instrument(level = "debug", skip(self), fields(block_id = %block_id))]
    async fn read_range(
        &self,
        name: &str,
        block_id: Uuid,
        tenant_id: &str,
        offset: u64,
        length: u64,
    ) -> Result<Bytes> {
        if length == 0 {
            return Ok(Bytes::new());
        }
        let path = self.path(name, block_id, tenant_id);
        let data = self.store.get_range(&path, offset..offset + length).await?;
        if data.len() as u64 != length {
            return Err(StorageError::ShortRead {
                expected: length as usize,
                actual: data.len(),
            });
        }
        Ok(data)
    }

    async fn read(&self, name: &str, block_id: Uuid, tenant_id: &str) -> Result<Bytes> {
        let path = self.path(name, block_id, tenant_id);
        let result = self.store.get(&path).await?;
        Ok(result.bytes().await?)
    }

    #[instrument(level = "debug", skip(self, data), fields(block_id = %block_id, bytes = data.len()))]
    async fn write(&self, name: &str, block_id: Uuid, tenant_id: &str, data: Bytes) -> Result<()> {
        let path = self.path(name, block_id, tenant_id);
        self.store.put(&path, PutPayload::from(data)).await?;
        Ok(())
    }

    async fn stat(&self, name: &str, block_id: Uuid, tenant_id: &str) -> Result<u64> {
        let path = self.path(name, block_id, tenant_id);
        Ok(self.store.head(&path).await?.size)
    }

    async fn blocks(&self, tenant_id: &str) -> Result<Vec<Uuid>> {
        let tenant_path = self.with_prefix(tenant_id.to_string());
        let objects: Vec<_> = match self.store.list(Some(&tenant_path)).try_collect().await {
            Ok(objects) => objects,
            Err(object_store::Error::NotFound { .. }) => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let suffix = format!("/{}", META_NAME);
        let mut ids: Vec<Uuid> = objects
            .iter()
            .filter_map(|obj| {
                let location = obj.location.as_ref().strip_suffix(suffix.as_str())?;
                let dir = location.rsplit('/').next()?;
                Uuid::parse_str(dir).ok()
            })
            .collect();
        ids.sort();

        debug!(tenant_id, count = ids.len(), "Listed blocks");
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_meta::Encoding;
    use object_store::local::LocalFileSystem;

    #[tokio::test]
    async fn test_write_then_read() {
        let backend = ObjectStoreBackend::in_memory();
        let block = Uuid::new_v4();

        backend
            .write("data", block, "tenant", Bytes::from_static(b"hello world"))
            .await
            .unwrap();

        assert_eq!(backend.read("data", block, "tenant").await.unwrap(), "hello world");
        assert_eq!(backend.stat("data", block, "tenant").await.unwrap(), 11);
        assert_eq!(
            backend.read_range("data", block, "tenant", 6, 5).await.unwrap(),
            "world"
        );
        assert!(backend
            .read_range("data", block, "tenant", 0, 0)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let backend = ObjectStoreBackend::in_memory();
        let err = backend.read("data", Uuid::new_v4(), "tenant").await.unwrap_err();
        assert!(err.is_not_found());

        let err = backend.stat("data", Uuid::new_v4(), "tenant").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_blocks_only_lists_blocks_with_meta() {
        let backend = ObjectStoreBackend::in_memory();
        let complete = Uuid::new_v4();
        let partial = Uuid::new_v4();

        let meta = BlockMeta::new("tenant", complete, "vParquet", Encoding::None, "vParquet");
        backend
            .write("data.parquet", complete, "tenant", Bytes::from_static(b"x"))
            .await
            .unwrap();
        backend.write_block_meta(&meta).await.unwrap();
        backend
            .write("data.parquet", partial, "tenant", Bytes::from_static(b"x"))
            .await
            .unwrap();

        assert_eq!(backend.blocks("tenant").await.unwrap(), vec![complete]);
        assert!(backend.blocks("other").await.unwrap().is_empty());
        assert_eq!(backend.block_meta(complete, "tenant").await.unwrap(), meta);
    }

    #[tokio::test]
    async fn test_local_backend_with_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileSystem::new_with_prefix(dir.path()).unwrap();
        let backend = ObjectStoreBackend::new(Arc::new(store), "/traces/");
        let block = Uuid::new_v4();

        backend
            .write("bloom-0", block, "tenant", Bytes::from_static(b"bloom"))
            .await
            .unwrap();

        let on_disk = dir
            .path()
            .join("traces")
            .join("tenant")
            .join(block.to_string())
            .join("bloom-0");
        assert!(on_disk.is_file());
        assert_eq!(backend.read("bloom-0", block, "tenant").await.unwrap(), "bloom");
    }
}
