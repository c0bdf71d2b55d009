//! Integration tests for point lookups by trace id

mod common;

use async_trait::async_trait;
use bytes::Bytes;
use common::*;
use config::BlockConfig;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use storage::{Backend, ObjectStoreBackend};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use vparquet::{BackendBlock, VParquetError};

/// Counts data reads and can stall them
#[derive(Debug)]
struct CountingBackend {
    inner: ObjectStoreBackend,
    range_reads: AtomicUsize,
    stall: bool,
}

impl CountingBackend {
    fn new(stall: bool) -> Self {
        Self {
            inner: ObjectStoreBackend::in_memory(),
            range_reads: AtomicUsize::new(0),
            stall,
        }
    }
}

#[async_trait]
impl Backend for CountingBackend {
    async fn read_range(
        &self,
        name: &str,
        block_id: Uuid,
        tenant_id: &str,
        offset: u64,
        length: u64,
    ) -> storage::Result<Bytes> {
        self.range_reads.fetch_add(1, Ordering::SeqCst);
        if self.stall {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        self.inner
            .read_range(name, block_id, tenant_id, offset, length)
            .await
    }

    async fn read(&self, name: &str, block_id: Uuid, tenant_id: &str) -> storage::Result<Bytes> {
        self.inner.read(name, block_id, tenant_id).await
    }

    async fn write(
        &self,
        name: &str,
        block_id: Uuid,
        tenant_id: &str,
        data: Bytes,
    ) -> storage::Result<()> {
        self.inner.write(name, block_id, tenant_id, data).await
    }

    async fn stat(&self, name: &str, block_id: Uuid, tenant_id: &str) -> storage::Result<u64> {
        self.inner.stat(name, block_id, tenant_id).await
    }

    async fn blocks(&self, tenant_id: &str) -> storage::Result<Vec<Uuid>> {
        self.inner.blocks(tenant_id).await
    }
}

#[tokio::test]
async fn test_find_trace_by_id() {
    let ids = random_ids(10, 2);
    let other = simple_trace(ids[0].clone(), "other", MS);
    let want = full_trace(ids[1].clone());
    let block = write_block(memory_backend(), &BlockConfig::default(), &[other, want.clone()]).await;

    let got = block
        .find_trace_by_id(&want.trace_id, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(got, Some(want));
}

#[tokio::test]
async fn test_find_across_row_groups() {
    let ids = random_ids(11, 60);
    let traces: Vec<_> = ids
        .iter()
        .enumerate()
        .map(|(i, id)| simple_trace(id.clone(), &format!("svc-{}", i), i as u64 * MS))
        .collect();
    let block = write_block(memory_backend(), &small_config(7), &traces).await;
    let cancel = CancellationToken::new();

    for i in [0, 6, 7, 33, 59] {
        let got = block.find_trace_by_id(&ids[i], &cancel).await.unwrap();
        assert_eq!(got.as_ref(), Some(&traces[i]), "trace {}", i);
    }
}

#[tokio::test]
async fn test_find_missing_trace() {
    let ids = random_ids(12, 21);
    let traces: Vec<_> = ids[..20]
        .iter()
        .map(|id| simple_trace(id.clone(), "svc", MS))
        .collect();
    let block = write_block(memory_backend(), &small_config(5), &traces).await;

    let got = block
        .find_trace_by_id(&ids[20], &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(got, None);
}

#[tokio::test]
async fn test_bloom_negative_skips_data_reads() {
    let backend = Arc::new(CountingBackend::new(false));
    let ids = random_ids(13, 1000);
    let traces: Vec<_> = ids[..1]
        .iter()
        .map(|id| simple_trace(id.clone(), "svc", MS))
        .collect();
    let block = write_block(backend.clone(), &BlockConfig::default(), &traces).await;
    let cancel = CancellationToken::new();

    // with one id in the block, nearly every other id is rejected by the bloom
    let mut rejected = 0;
    for id in &ids[1..] {
        let before = backend.range_reads.load(Ordering::SeqCst);
        assert_eq!(block.find_trace_by_id(id, &cancel).await.unwrap(), None);
        if backend.range_reads.load(Ordering::SeqCst) == before {
            rejected += 1;
        }
    }
    assert!(rejected > 900, "only {} lookups skipped the data", rejected);
}

#[tokio::test]
async fn test_find_cancelled_while_reading() {
    let backend = Arc::new(CountingBackend::new(false));
    let ids = random_ids(14, 1);
    let traces = vec![simple_trace(ids[0].clone(), "svc", MS)];
    let written = write_block(backend.clone(), &BlockConfig::default(), &traces).await;

    let stalled = Arc::new(CountingBackend {
        inner: backend.inner.clone(),
        range_reads: AtomicUsize::new(0),
        stall: true,
    });
    let block = BackendBlock::new(written.meta().clone(), stalled, &BlockConfig::default());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = block.find_trace_by_id(&ids[0], &cancel).await.unwrap_err();
    assert!(err.is_cancelled());
    assert!(matches!(
        err,
        VParquetError::Block { op: "find_trace_by_id", .. }
    ));
}

#[tokio::test]
async fn test_open_block_by_id() {
    let backend = memory_backend();
    let ids = random_ids(15, 3);
    let traces: Vec<_> = ids
        .iter()
        .map(|id| simple_trace(id.clone(), "svc", MS))
        .collect();
    let written = write_block(backend.clone(), &BlockConfig::default(), &traces).await;

    let block = BackendBlock::open(
        written.meta().block_id,
        TENANT,
        backend,
        &BlockConfig::default(),
    )
    .await
    .unwrap();
    assert_eq!(block.meta(), written.meta());
    let got = block
        .find_trace_by_id(&ids[2], &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(got.as_ref(), Some(&traces[2]));
}
