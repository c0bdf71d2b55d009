//! Single-writer block builder
//!
//! Traces are appended one at a time. Rows are staged in a
//! [`TraceBatchBuilder`] and handed to the parquet writer every
//! `flush_traces` traces. [`StreamingBlock::complete`] writes the data
//! object, the bloom shards and finally `meta.json`, which is what makes the
//! block visible to readers.

use crate::bloom::{shard_name, ShardedBloom};
use crate::error::{Result, VParquetError};
use crate::schema::field_paths::leaf;
use crate::schema::{trace_schema, Attribute, Trace, TraceBatchBuilder};
use crate::{DATA_FILE_NAME, VERSION};
use bytes::Bytes;
use config::BlockConfig;
use futures_util::future::try_join_all;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, Encoding as ColumnEncoding, GzipLevel, ZstdLevel};
use parquet::file::properties::WriterProperties;
use parquet::schema::types::ColumnPath;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use storage::{Backend, BlockMeta, Encoding};
use tracing::{debug, info, instrument, warn};

/// Lifecycle of a [`StreamingBlock`]; transitions only move forward
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    /// Created, nothing added yet
    Open,
    /// At least one trace was added
    Accumulating,
    /// `complete` is writing the block
    Completing,
    /// Written; no further changes accepted
    Sealed,
    /// A flush or write failed; nothing further is accepted
    Failed,
}

/// Parquet compression for a block encoding
pub fn compression_for(encoding: Encoding) -> Compression {
    match encoding {
        Encoding::None => Compression::UNCOMPRESSED,
        Encoding::Gzip => Compression::GZIP(GzipLevel::default()),
        Encoding::Snappy => Compression::SNAPPY,
        Encoding::Zstd => Compression::ZSTD(ZstdLevel::default()),
        Encoding::Lz4 => Compression::LZ4_RAW,
    }
}

/// Writer settings of the data object. Integer leaves skip the dictionary
/// and use delta binary packing.
pub fn writer_properties(encoding: Encoding, row_group_size: usize) -> WriterProperties {
    let mut builder = WriterProperties::builder()
        .set_compression(compression_for(encoding))
        .set_max_row_group_size(row_group_size.max(1));

    for path in leaf::DELTA_COLUMNS {
        let column = ColumnPath::new(path.split('.').map(String::from).collect());
        builder = builder
            .set_column_dictionary_enabled(column.clone(), false)
            .set_column_encoding(column, ColumnEncoding::DELTA_BINARY_PACKED);
    }
    builder.build()
}

/// Builds one block from a stream of traces
pub struct StreamingBlock {
    meta: BlockMeta,
    backend: Arc<dyn Backend>,
    state: BlockState,
    flush_traces: usize,
    writer: Option<ArrowWriter<Vec<u8>>>,
    rows: TraceBatchBuilder,
    bloom: ShardedBloom,
    ids: HashSet<Vec<u8>>,
    failure: Option<String>,
}

impl fmt::Debug for StreamingBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingBlock")
            .field("block_id", &self.meta.block_id)
            .field("tenant_id", &self.meta.tenant_id)
            .field("state", &self.state)
            .field("total_objects", &self.meta.total_objects)
            .finish()
    }
}

impl StreamingBlock {
    /// Start a block for `meta`'s tenant and block id.
    ///
    /// The bloom shards are sized for `estimated_objects` traces. `meta`'s
    /// encoding must match `cfg.encoding`.
    pub fn new(
        cfg: &BlockConfig,
        meta: &BlockMeta,
        estimated_objects: usize,
        backend: Arc<dyn Backend>,
    ) -> Result<Self> {
        let encoding: Encoding = cfg
            .encoding
            .parse()
            .map_err(VParquetError::InvalidConfig)?;
        if meta.encoding != encoding {
            return Err(VParquetError::InvalidConfig(format!(
                "block meta encoding {} does not match configured encoding {}",
                meta.encoding, encoding
            )));
        }
        if !(cfg.bloom_fp > 0.0 && cfg.bloom_fp < 1.0) {
            return Err(VParquetError::InvalidConfig(format!(
                "bloom_fp must be in (0, 1), got {}",
                cfg.bloom_fp
            )));
        }
        if cfg.bloom_shard_size_bytes == 0 {
            return Err(VParquetError::InvalidConfig(
                "bloom_shard_size_bytes must be positive".to_string(),
            ));
        }

        let mut new_meta = BlockMeta::new(
            meta.tenant_id.clone(),
            meta.block_id,
            VERSION,
            meta.encoding,
            VERSION,
        );
        let bloom = ShardedBloom::new(
            cfg.bloom_fp,
            cfg.bloom_shard_size_bytes,
            estimated_objects.max(1),
        );
        new_meta.bloom_shard_count = bloom.shard_count() as u32;
        new_meta.bloom_fp = cfg.bloom_fp;
        new_meta.bloom_shard_size_bytes = cfg.bloom_shard_size_bytes as u64;

        let props = writer_properties(meta.encoding, cfg.row_group_size_rows);
        let writer = ArrowWriter::try_new(Vec::new(), trace_schema(), Some(props))?;

        debug!(
            block_id = %new_meta.block_id,
            tenant_id = %new_meta.tenant_id,
            shards = new_meta.bloom_shard_count,
            estimated_objects,
            "Opened streaming block"
        );

        Ok(Self {
            meta: new_meta,
            backend,
            state: BlockState::Open,
            flush_traces: cfg.flush_traces.max(1),
            writer: Some(writer),
            rows: TraceBatchBuilder::new(),
            bloom,
            ids: HashSet::new(),
            failure: None,
        })
    }

    pub fn state(&self) -> BlockState {
        self.state
    }

    /// Meta as accumulated so far
    pub fn meta(&self) -> &BlockMeta {
        &self.meta
    }

    /// Bytes written to the data object so far, including buffered rows
    pub fn estimated_size(&self) -> u64 {
        self.writer
            .as_ref()
            .map(|w| (w.bytes_written() + w.in_progress_size()) as u64)
            .unwrap_or(self.meta.size)
    }

    fn check_writable(&self) -> Result<()> {
        match self.state {
            BlockState::Open | BlockState::Accumulating => Ok(()),
            BlockState::Completing | BlockState::Sealed => Err(VParquetError::AlreadySealed),
            BlockState::Failed => Err(VParquetError::WriterFailed(
                self.failure.clone().unwrap_or_default(),
            )),
        }
    }

    fn fail(&mut self, err: &VParquetError) {
        warn!(block_id = %self.meta.block_id, error = %err, "Streaming block failed");
        self.state = BlockState::Failed;
        self.failure = Some(err.to_string());
    }

    /// Add one trace.
    ///
    /// A trace that fails validation is rejected with
    /// [`VParquetError::InvalidTrace`] and leaves the block untouched. A
    /// failed flush moves the block to [`BlockState::Failed`].
    pub fn add(&mut self, trace: &Trace) -> Result<()> {
        self.check_writable()?;

        if let Err(err) = self.validate(trace) {
            warn!(
                block_id = %self.meta.block_id,
                trace_id = %trace.trace_id_hex(),
                error = %err,
                "Rejected trace"
            );
            return Err(err);
        }

        // nothing below may fail until the row is buffered
        self.rows.append(trace)?;
        self.ids.insert(trace.trace_id.clone());
        self.bloom.add(&trace.trace_id);
        self.meta.object_added(
            &trace.trace_id,
            trace.start_time_unix_nano,
            trace.end_time_unix_nano(),
        );
        self.state = BlockState::Accumulating;

        if self.rows.len() >= self.flush_traces {
            if let Err(err) = self.flush() {
                self.fail(&err);
                return Err(err);
            }
        }
        self.meta.size = self.meta.size.max(self.estimated_size());
        Ok(())
    }

    fn validate(&self, trace: &Trace) -> Result<()> {
        if trace.trace_id.is_empty() {
            return Err(VParquetError::InvalidTrace("empty trace id".to_string()));
        }
        if self.ids.contains(&trace.trace_id) {
            return Err(VParquetError::InvalidTrace(format!(
                "trace {} already in block",
                trace.trace_id_hex()
            )));
        }
        for rs in &trace.resource_spans {
            if rs.resource.service_name.is_empty() {
                return Err(VParquetError::InvalidTrace(
                    "resource without service name".to_string(),
                ));
            }
            check_keys(&rs.resource.attrs)?;
        }
        for (_, span) in trace.spans() {
            check_keys(&span.attrs)?;
            if span.events.iter().flat_map(|e| &e.attrs).any(|a| a.key.is_empty()) {
                return Err(VParquetError::InvalidTrace(
                    "event attribute with empty key".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.rows.is_empty() {
            return Ok(());
        }
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| VParquetError::WriterFailed("column writer is closed".to_string()))?;
        let batch = self.rows.finish()?;
        writer.write(&batch)?;
        debug!(
            block_id = %self.meta.block_id,
            rows = batch.num_rows(),
            "Flushed rows to column writer"
        );
        Ok(())
    }

    /// Write the block and seal it. Returns the persisted meta.
    ///
    /// `meta.json` is written last; if any earlier write fails the block is
    /// never advertised and moves to [`BlockState::Failed`]. A second call
    /// after success fails with [`VParquetError::AlreadySealed`].
    #[instrument(skip(self), fields(block_id = %self.meta.block_id, tenant_id = %self.meta.tenant_id))]
    pub async fn complete(&mut self) -> Result<BlockMeta> {
        self.check_writable()?;
        self.state = BlockState::Completing;
        match self.write_block().await {
            Ok(meta) => {
                self.state = BlockState::Sealed;
                Ok(meta)
            }
            Err(err) => {
                self.fail(&err);
                Err(err)
            }
        }
    }

    async fn write_block(&mut self) -> Result<BlockMeta> {
        self.flush()?;
        let writer = self.writer.take().ok_or(VParquetError::AlreadySealed)?;
        let data = writer.into_inner()?;
        self.meta.size = data.len() as u64;

        let block_id = self.meta.block_id;
        let tenant_id = self.meta.tenant_id.clone();
        self.backend
            .write(DATA_FILE_NAME, block_id, &tenant_id, Bytes::from(data))
            .await?;

        let shards = self.bloom.marshal();
        try_join_all(shards.into_iter().enumerate().map(|(n, shard)| {
            let backend = self.backend.clone();
            let tenant_id = tenant_id.clone();
            async move {
                backend
                    .write(&shard_name(n), block_id, &tenant_id, shard)
                    .await
            }
        }))
        .await?;

        self.backend.write_block_meta(&self.meta).await?;

        info!(
            total_objects = self.meta.total_objects,
            size = self.meta.size,
            shards = self.meta.bloom_shard_count,
            "Completed block"
        );
        Ok(self.meta.clone())
    }
}

fn check_keys(attrs: &[Attribute]) -> Result<()> {
    if attrs.iter().any(|a| a.key.is_empty()) {
        return Err(VParquetError::InvalidTrace(
            "attribute with empty key".to_string(),
        ));
    }
    Ok(())
}
