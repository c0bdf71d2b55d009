use crate::backend::Backend;
use crate::error::{Result, StorageError};
use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, StreamExt, TryStreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::trace;
use uuid::Uuid;

/// Random-access reader over one named object of a block.
///
/// Reads are served from fixed-size, segment-aligned buffers. Segments not
/// yet cached are fetched from the backend concurrently, at most
/// `max_segments` of them are retained. Safe to share between concurrent
/// readers of the same block.
#[derive(Debug)]
pub struct BufferedReaderAt {
    backend: Arc<dyn Backend>,
    name: String,
    block_id: Uuid,
    tenant_id: String,
    size: u64,
    segment_size: u64,
    max_segments: usize,
    segments: Mutex<HashMap<u64, Bytes>>,
}

impl BufferedReaderAt {
    pub fn new(
        backend: Arc<dyn Backend>,
        name: impl Into<String>,
        block_id: Uuid,
        tenant_id: impl Into<String>,
        size: u64,
        segment_size: usize,
        max_segments: usize,
    ) -> Self {
        Self {
            backend,
            name: name.into(),
            block_id,
            tenant_id: tenant_id.into(),
            size,
            segment_size: segment_size.max(1) as u64,
            max_segments: max_segments.max(1),
            segments: Mutex::new(HashMap::new()),
        }
    }

    /// Total size of the underlying object
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Read exactly `length` bytes starting at `offset`.
    ///
    /// Fails with [`StorageError::OutOfRange`] when the range extends past
    /// the end of the object, and with [`StorageError::Cancelled`] once
    /// `cancel` fires. A failure of any segment fails the whole read.
    pub async fn read_at(&self, offset: u64, length: u64, cancel: &CancellationToken) -> Result<Bytes> {
        if cancel.is_cancelled() {
            return Err(StorageError::Cancelled);
        }
        let end = offset
            .checked_add(length)
            .filter(|end| *end <= self.size)
            .ok_or(StorageError::OutOfRange {
                offset,
                length,
                size: self.size,
            })?;
        if length == 0 {
            return Ok(Bytes::new());
        }

        let first = offset / self.segment_size;
        let last = (end - 1) / self.segment_size;

        let mut found: HashMap<u64, Bytes> = HashMap::with_capacity((last - first + 1) as usize);
        let mut missing = Vec::new();
        {
            let cache = self.segments.lock();
            for idx in first..=last {
                match cache.get(&idx) {
                    Some(segment) => {
                        found.insert(idx, segment.clone());
                    }
                    None => missing.push(idx),
                }
            }
        }

        if !missing.is_empty() {
            trace!(
                name = %self.name,
                offset,
                length,
                segments = missing.len(),
                "Fetching segments"
            );
            let fetched = tokio::select! {
                _ = cancel.cancelled() => return Err(StorageError::Cancelled),
                fetched = self.fetch_segments(missing) => fetched?,
            };

            let mut cache = self.segments.lock();
            for (idx, segment) in fetched {
                while cache.len() >= self.max_segments {
                    let Some(victim) = cache.keys().next().copied() else {
                        break;
                    };
                    cache.remove(&victim);
                }
                cache.insert(idx, segment.clone());
                found.insert(idx, segment);
            }
        }

        let start_in_first = (offset - first * self.segment_size) as usize;
        if first == last {
            let segment = &found[&first];
            return Ok(segment.slice(start_in_first..start_in_first + length as usize));
        }

        let mut out = BytesMut::with_capacity(length as usize);
        for idx in first..=last {
            let segment = &found[&idx];
            let from = if idx == first { start_in_first } else { 0 };
            let to = if idx == last {
                (end - idx * self.segment_size) as usize
            } else {
                segment.len()
            };
            out.extend_from_slice(&segment[from..to]);
        }
        Ok(out.freeze())
    }

    async fn fetch_segments(&self, indices: Vec<u64>) -> Result<Vec<(u64, Bytes)>> {
        let concurrency = indices.len().min(self.max_segments);
        stream::iter(indices)
            .map(|idx| async move {
                let start = idx * self.segment_size;
                let len = self.segment_size.min(self.size - start);
                let data = self
                    .backend
                    .read_range(&self.name, self.block_id, &self.tenant_id, start, len)
                    .await?;
                // slicing in read_at relies on full segments
                if data.len() as u64 != len {
                    return Err(StorageError::ShortRead {
                        expected: len as usize,
                        actual: data.len(),
                    });
                }
                Ok::<_, StorageError>((idx, data))
            })
            .buffered(concurrency)
            .try_collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ObjectStoreBackend;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Records every ranged read and can be told to fail or truncate them
    #[derive(Debug)]
    struct RecordingBackend {
        inner: ObjectStoreBackend,
        ranges: Mutex<Vec<(u64, u64)>>,
        fail: AtomicBool,
        truncate: AtomicBool,
    }

    #[async_trait]
    impl Backend for RecordingBackend {
        async fn read_range(
            &self,
            name: &str,
            block_id: Uuid,
            tenant_id: &str,
            offset: u64,
            length: u64,
        ) -> Result<Bytes> {
            self.ranges.lock().push((offset, length));
            if self.fail.load(Ordering::SeqCst) {
                return Err(StorageError::Io(std::io::Error::other("boom")));
            }
            let data = self.inner.read_range(name, block_id, tenant_id, offset, length).await?;
            if self.truncate.load(Ordering::SeqCst) {
                return Ok(data.slice(..data.len() / 2));
            }
            Ok(data)
        }

        async fn read(&self, name: &str, block_id: Uuid, tenant_id: &str) -> Result<Bytes> {
            self.inner.read(name, block_id, tenant_id).await
        }

        async fn write(&self, name: &str, block_id: Uuid, tenant_id: &str, data: Bytes) -> Result<()> {
            self.inner.write(name, block_id, tenant_id, data).await
        }

        async fn stat(&self, name: &str, block_id: Uuid, tenant_id: &str) -> Result<u64> {
            self.inner.stat(name, block_id, tenant_id).await
        }

        async fn blocks(&self, tenant_id: &str) -> Result<Vec<Uuid>> {
            self.inner.blocks(tenant_id).await
        }
    }

    async fn setup(len: usize) -> (Arc<RecordingBackend>, Uuid, Vec<u8>) {
        let backend = Arc::new(RecordingBackend {
            inner: ObjectStoreBackend::in_memory(),
            ranges: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
            truncate: AtomicBool::new(false),
        });
        let block = Uuid::new_v4();
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        backend
            .write("data", block, "tenant", Bytes::from(data.clone()))
            .await
            .unwrap();
        (backend, block, data)
    }

    #[tokio::test]
    async fn test_reads_span_segments() {
        let (backend, block, data) = setup(1000).await;
        let reader = BufferedReaderAt::new(backend.clone(), "data", block, "tenant", 1000, 64, 32);
        let cancel = CancellationToken::new();

        let got = reader.read_at(50, 200, &cancel).await.unwrap();
        assert_eq!(&got[..], &data[50..250]);

        let got = reader.read_at(960, 40, &cancel).await.unwrap();
        assert_eq!(&got[..], &data[960..1000]);

        // every backend read is aligned and the tail segment is truncated
        for (offset, length) in backend.ranges.lock().iter() {
            assert_eq!(offset % 64, 0);
            assert!(*length == 64 || offset + length == 1000);
        }
    }

    #[tokio::test]
    async fn test_cached_segments_are_not_refetched() {
        let (backend, block, data) = setup(512).await;
        let reader = BufferedReaderAt::new(backend.clone(), "data", block, "tenant", 512, 128, 8);
        let cancel = CancellationToken::new();

        reader.read_at(0, 256, &cancel).await.unwrap();
        let fetched = backend.ranges.lock().len();
        assert_eq!(fetched, 2);

        let got = reader.read_at(10, 20, &cancel).await.unwrap();
        assert_eq!(&got[..], &data[10..30]);
        assert_eq!(backend.ranges.lock().len(), fetched);
    }

    #[tokio::test]
    async fn test_small_cache_still_serves_large_reads() {
        let (backend, block, data) = setup(1024).await;
        let reader = BufferedReaderAt::new(backend, "data", block, "tenant", 1024, 100, 2);
        let cancel = CancellationToken::new();

        let got = reader.read_at(0, 1024, &cancel).await.unwrap();
        assert_eq!(&got[..], &data[..]);
        assert!(reader.segments.lock().len() <= 2);
    }

    #[tokio::test]
    async fn test_out_of_range() {
        let (backend, block, _) = setup(100).await;
        let reader = BufferedReaderAt::new(backend, "data", block, "tenant", 100, 32, 4);
        let cancel = CancellationToken::new();

        let err = reader.read_at(90, 20, &cancel).await.unwrap_err();
        assert!(matches!(err, StorageError::OutOfRange { offset: 90, length: 20, size: 100 }));
        assert!(reader.read_at(100, 0, &cancel).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_segment_failure_fails_read() {
        let (backend, block, _) = setup(300).await;
        backend.fail.store(true, Ordering::SeqCst);
        let reader = BufferedReaderAt::new(backend, "data", block, "tenant", 300, 64, 4);

        let err = reader
            .read_at(0, 300, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Io(_)));
        assert!(reader.segments.lock().is_empty());
    }

    #[tokio::test]
    async fn test_short_segment_fails_read() {
        let (backend, block, data) = setup(256).await;
        backend.truncate.store(true, Ordering::SeqCst);
        let reader = BufferedReaderAt::new(backend.clone(), "data", block, "tenant", 256, 64, 4);
        let cancel = CancellationToken::new();

        let err = reader.read_at(40, 20, &cancel).await.unwrap_err();
        assert!(matches!(err, StorageError::ShortRead { expected: 64, actual: 32 }));
        let err = reader.read_at(0, 256, &cancel).await.unwrap_err();
        assert!(matches!(err, StorageError::ShortRead { .. }));
        assert!(reader.segments.lock().is_empty());

        // nothing bad was cached, so the reader recovers
        backend.truncate.store(false, Ordering::SeqCst);
        let got = reader.read_at(40, 20, &cancel).await.unwrap();
        assert_eq!(&got[..], &data[40..60]);
    }

    #[tokio::test]
    async fn test_cancelled_read() {
        let (backend, block, _) = setup(300).await;
        let reader = BufferedReaderAt::new(backend.clone(), "data", block, "tenant", 300, 64, 4);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = reader.read_at(0, 10, &cancel).await.unwrap_err();
        assert!(matches!(err, StorageError::Cancelled));
        assert!(backend.ranges.lock().is_empty());
    }
}
