//! Read side of a sealed block
//!
//! One [`BackendBlock`] owns a shared [`BufferedReaderAt`] over the data
//! object and caches the decoded footer, so point lookups, searches and
//! iterators opened from it reuse the same segments and metadata.

use crate::bloom::{shard_key, shard_name, BloomFilter};
use crate::error::{Result, VParquetError};
use crate::file_reader::{
    decode_durations, leaf_index, load_metadata, reader_metadata, row_group_stream,
    BlockFileReader,
};
use crate::filter::{filter_row_groups, SearchFilter, TraceIdFilter};
use crate::iter::BlockIterator;
use crate::schema::field_paths::leaf;
use crate::schema::rows::trace_ids_from_batch;
use crate::schema::{traces_from_batch, Trace};
use crate::search::{SearchMetrics, SearchOptions, SearchRequest, SearchResponse, TraceSearchMetadata};
use crate::DATA_FILE_NAME;
use arrow::array::Array;
use config::BlockConfig;
use futures_util::TryStreamExt;
use parquet::arrow::arrow_reader::{ArrowReaderMetadata, RowSelection, RowSelector};
use parquet::arrow::ProjectionMask;
use std::sync::Arc;
use storage::{Backend, BlockMeta, BufferedReaderAt};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// A sealed block opened for reading
#[derive(Debug)]
pub struct BackendBlock {
    meta: BlockMeta,
    backend: Arc<dyn Backend>,
    reader: Arc<BufferedReaderAt>,
    reader_meta: OnceCell<ArrowReaderMetadata>,
    batch_size: usize,
}

impl BackendBlock {
    pub fn new(meta: BlockMeta, backend: Arc<dyn Backend>, cfg: &BlockConfig) -> Self {
        let reader = Arc::new(BufferedReaderAt::new(
            backend.clone(),
            DATA_FILE_NAME,
            meta.block_id,
            meta.tenant_id.clone(),
            meta.size,
            cfg.read_buffer_size_bytes,
            cfg.read_buffer_count,
        ));
        Self {
            meta,
            backend,
            reader,
            reader_meta: OnceCell::new(),
            batch_size: cfg.search_batch_size.max(1),
        }
    }

    /// Open a block by id, reading its persisted meta first
    pub async fn open(
        block_id: uuid::Uuid,
        tenant_id: &str,
        backend: Arc<dyn Backend>,
        cfg: &BlockConfig,
    ) -> Result<Self> {
        let meta = backend.block_meta(block_id, tenant_id).await?;
        Ok(Self::new(meta, backend, cfg))
    }

    pub fn meta(&self) -> &BlockMeta {
        &self.meta
    }

    /// Footer metadata, loaded on first use
    async fn reader_meta(&self, cancel: &CancellationToken) -> Result<ArrowReaderMetadata> {
        self.reader_meta
            .get_or_try_init(|| async {
                let metadata = load_metadata(&self.reader, cancel).await?;
                reader_metadata(metadata)
            })
            .await
            .cloned()
    }

    fn file(&self, reader_meta: &ArrowReaderMetadata, cancel: &CancellationToken) -> BlockFileReader {
        BlockFileReader::new(
            self.reader.clone(),
            reader_meta.metadata().clone(),
            cancel.clone(),
        )
    }

    /// Look up one trace by id. A miss is `Ok(None)`.
    #[instrument(skip_all, fields(block_id = %self.meta.block_id, trace_id = %hex::encode(id)))]
    pub async fn find_trace_by_id(
        &self,
        id: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Option<Trace>> {
        self.find(id, cancel)
            .await
            .map_err(|err| err.in_block(self.meta.block_id, "find_trace_by_id"))
    }

    async fn find(&self, id: &[u8], cancel: &CancellationToken) -> Result<Option<Trace>> {
        if cancel.is_cancelled() {
            return Err(VParquetError::Cancelled);
        }
        if !self.bloom_may_contain(id, cancel).await? {
            debug!("Bloom filter rejected trace id");
            return Ok(None);
        }

        let reader_meta = self.reader_meta(cancel).await?;
        let metadata = reader_meta.metadata();
        let id_column = leaf_index(metadata.file_metadata().schema_descr(), leaf::TRACE_ID)?;
        let candidates = filter_row_groups(metadata.row_groups(), &TraceIdFilter::new(id));

        for rg in candidates {
            let projection =
                ProjectionMask::leaves(metadata.file_metadata().schema_descr(), [id_column]);
            let mut ids = row_group_stream(
                self.file(&reader_meta, cancel),
                &reader_meta,
                rg,
                projection,
                None,
                self.batch_size,
            )?;

            let mut offset = 0;
            let mut row = None;
            while let Some(batch) = ids.try_next().await? {
                let column = trace_ids_from_batch(&batch)?;
                if let Some(pos) = (0..column.len()).find(|&i| column.value(i) == id) {
                    row = Some(offset + pos);
                    break;
                }
                offset += batch.num_rows();
            }
            let Some(row) = row else {
                continue;
            };

            let selection = RowSelection::from(vec![RowSelector::skip(row), RowSelector::select(1)]);
            let mut rows = row_group_stream(
                self.file(&reader_meta, cancel),
                &reader_meta,
                rg,
                ProjectionMask::all(),
                Some(selection),
                1,
            )?;
            while let Some(batch) = rows.try_next().await? {
                if let Some(trace) = traces_from_batch(&batch)?.into_iter().next() {
                    return Ok(Some(trace));
                }
            }
            return Err(VParquetError::CorruptRow(format!(
                "row {} of row group {} could not be read back",
                row, rg
            )));
        }

        Ok(None)
    }

    async fn bloom_may_contain(&self, id: &[u8], cancel: &CancellationToken) -> Result<bool> {
        let shards = self.meta.bloom_shard_count as usize;
        if shards == 0 {
            return Ok(true);
        }
        let name = shard_name(shard_key(id, shards));
        let data = tokio::select! {
            _ = cancel.cancelled() => return Err(VParquetError::Cancelled),
            data = self.backend.read(&name, self.meta.block_id, &self.meta.tenant_id) => data?,
        };
        Ok(BloomFilter::from_bytes(&data)?.contains(id))
    }

    /// Every trace matching `request`, in storage order
    #[instrument(skip_all, fields(block_id = %self.meta.block_id))]
    pub async fn search(
        &self,
        request: &SearchRequest,
        options: SearchOptions,
        cancel: &CancellationToken,
    ) -> Result<SearchResponse> {
        self.search_inner(request, options, cancel)
            .await
            .map_err(|err| err.in_block(self.meta.block_id, "search"))
    }

    async fn search_inner(
        &self,
        request: &SearchRequest,
        options: SearchOptions,
        cancel: &CancellationToken,
    ) -> Result<SearchResponse> {
        if cancel.is_cancelled() {
            return Err(VParquetError::Cancelled);
        }
        let mut response = SearchResponse::default();
        if options.limit == Some(0) {
            return Ok(response);
        }

        let reader_meta = self.reader_meta(cancel).await?;
        let metadata = reader_meta.metadata();
        let row_groups = metadata.row_groups();
        let candidates = filter_row_groups(row_groups, &SearchFilter::new(request));
        let mut metrics = SearchMetrics {
            skipped_row_groups: (row_groups.len() - candidates.len()) as u32,
            ..Default::default()
        };
        let duration_column =
            leaf_index(metadata.file_metadata().schema_descr(), leaf::DURATION_NANO)?;

        'row_groups: for rg in candidates {
            let rg_meta = &row_groups[rg];
            let file = self.file(&reader_meta, cancel);

            let selection = if request.has_duration_bounds() {
                let durations = decode_durations(&file, rg_meta, duration_column).await?;
                metrics.inspected_bytes += rg_meta.column(duration_column).compressed_size() as u64;
                match durations {
                    Some(durations) => {
                        let selection = selection_from_mask(
                            durations.iter().map(|d| request.duration_matches(*d)),
                        );
                        if !selection.selects_any() {
                            metrics.skipped_row_groups += 1;
                            continue;
                        }
                        Some(selection)
                    }
                    None => None,
                }
            } else {
                None
            };

            metrics.inspected_bytes += rg_meta.compressed_size() as u64;
            let mut rows = row_group_stream(
                file,
                &reader_meta,
                rg,
                ProjectionMask::all(),
                selection,
                options.batch_size,
            )?;
            while let Some(batch) = rows.try_next().await? {
                for trace in traces_from_batch(&batch)? {
                    metrics.inspected_traces += 1;
                    if request.matches(&trace) {
                        response.traces.push(TraceSearchMetadata::from(&trace));
                        if options.limit.is_some_and(|limit| response.traces.len() >= limit) {
                            break 'row_groups;
                        }
                    }
                }
            }
        }

        debug!(
            matches = response.traces.len(),
            inspected_traces = metrics.inspected_traces,
            skipped_row_groups = metrics.skipped_row_groups,
            "Search finished"
        );
        response.metrics = metrics;
        Ok(response)
    }

    /// Forward scan over every trace of the block, in storage order
    pub async fn iterator(&self, cancel: &CancellationToken) -> Result<BlockIterator> {
        let reader_meta = self
            .reader_meta(cancel)
            .await
            .map_err(|err| err.in_block(self.meta.block_id, "iterator"))?;
        Ok(BlockIterator::new(
            self.meta.block_id,
            self.file(&reader_meta, cancel),
            reader_meta,
            self.batch_size,
        ))
    }
}

/// Run-length row selection covering every row of the mask
fn selection_from_mask(mask: impl Iterator<Item = bool>) -> RowSelection {
    let mut selectors: Vec<RowSelector> = Vec::new();
    for keep in mask {
        match selectors.last_mut() {
            Some(last) if last.skip != keep => last.row_count += 1,
            _ => selectors.push(if keep {
                RowSelector::select(1)
            } else {
                RowSelector::skip(1)
            }),
        }
    }
    RowSelection::from(selectors)
}
