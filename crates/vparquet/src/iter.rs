//! Full-scan trace iterator
//!
//! Row groups are opened one at a time and decoded batch by batch, so at
//! most one batch of traces is held in memory.

use crate::error::{Result, VParquetError};
use crate::file_reader::{row_group_stream, BlockFileReader};
use crate::schema::{traces_from_batch, Trace};
use futures_util::{Stream, TryStreamExt};
use parquet::arrow::arrow_reader::ArrowReaderMetadata;
use parquet::arrow::async_reader::ParquetRecordBatchStream;
use parquet::arrow::ProjectionMask;
use std::collections::VecDeque;
use std::fmt;
use uuid::Uuid;

/// Forward-only cursor over every trace of a block.
///
/// The data reader is shared with the block it came from; closing the
/// iterator releases only the iterator's own state.
pub struct BlockIterator {
    block_id: Uuid,
    file: BlockFileReader,
    reader_meta: ArrowReaderMetadata,
    batch_size: usize,
    next_row_group: usize,
    rows: Option<ParquetRecordBatchStream<BlockFileReader>>,
    pending: VecDeque<Trace>,
    done: bool,
}

impl fmt::Debug for BlockIterator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockIterator")
            .field("block_id", &self.block_id)
            .field("next_row_group", &self.next_row_group)
            .field("pending", &self.pending.len())
            .field("done", &self.done)
            .finish()
    }
}

impl BlockIterator {
    pub(crate) fn new(
        block_id: Uuid,
        file: BlockFileReader,
        reader_meta: ArrowReaderMetadata,
        batch_size: usize,
    ) -> Self {
        Self {
            block_id,
            file,
            reader_meta,
            batch_size,
            next_row_group: 0,
            rows: None,
            pending: VecDeque::new(),
            done: false,
        }
    }

    /// Next trace, or `None` once the block is exhausted.
    ///
    /// After the end or an error every further call returns `Ok(None)`.
    pub async fn next(&mut self) -> Result<Option<Trace>> {
        if self.done {
            return Ok(None);
        }
        match self.advance().await {
            Ok(Some(trace)) => Ok(Some(trace)),
            Ok(None) => {
                self.close();
                Ok(None)
            }
            Err(err) => {
                self.close();
                Err(err.in_block(self.block_id, "iterator"))
            }
        }
    }

    async fn advance(&mut self) -> Result<Option<Trace>> {
        loop {
            if let Some(trace) = self.pending.pop_front() {
                return Ok(Some(trace));
            }

            if let Some(rows) = self.rows.as_mut() {
                match rows.try_next().await? {
                    Some(batch) => {
                        self.pending.extend(traces_from_batch(&batch)?);
                        continue;
                    }
                    None => self.rows = None,
                }
            }

            if self.next_row_group >= self.reader_meta.metadata().num_row_groups() {
                return Ok(None);
            }
            if self.file.is_cancelled() {
                return Err(VParquetError::Cancelled);
            }
            self.rows = Some(row_group_stream(
                self.file.clone(),
                &self.reader_meta,
                self.next_row_group,
                ProjectionMask::all(),
                None,
                self.batch_size,
            )?);
            self.next_row_group += 1;
        }
    }

    /// Stop iterating. The block's shared reader stays open.
    pub fn close(&mut self) {
        self.done = true;
        self.rows = None;
        self.pending.clear();
    }

    /// Adapt the iterator into a stream of traces
    pub fn into_stream(mut self) -> impl Stream<Item = Result<Trace>> {
        async_stream::try_stream! {
            while let Some(trace) = self.next().await? {
                yield trace;
            }
        }
    }
}
