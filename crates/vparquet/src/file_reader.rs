//! Parquet access on top of the buffered range reader
//!
//! [`BlockFileReader`] adapts a shared [`BufferedReaderAt`] to the async
//! parquet reader, so every byte a scan needs goes through the segment
//! cache. [`decode_durations`] reads the trace duration column of one row
//! group straight from its pages with the crate's delta decoder.

use crate::encoding::delta::DeltaDecoder;
use crate::error::{Result, VParquetError};
use bytes::{Buf, Bytes};
use futures_util::future::{BoxFuture, FutureExt};
use parquet::arrow::arrow_reader::{ArrowReaderMetadata, ArrowReaderOptions, RowSelection};
use parquet::arrow::async_reader::{AsyncFileReader, ParquetRecordBatchStream};
use parquet::arrow::{ParquetRecordBatchStreamBuilder, ProjectionMask};
use parquet::basic::Encoding;
use parquet::column::page::{Page, PageReader};
use parquet::errors::ParquetError;
use parquet::file::metadata::{ParquetMetaData, ParquetMetaDataReader, RowGroupMetaData};
use parquet::file::reader::{ChunkReader, Length};
use parquet::file::serialized_reader::SerializedPageReader;
use parquet::schema::types::SchemaDescriptor;
use std::ops::Range;
use std::sync::Arc;
use storage::BufferedReaderAt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const FOOTER_SIZE: u64 = 8;
const MAGIC: &[u8; 4] = b"PAR1";

/// Read and decode the footer metadata of a parquet object
pub async fn load_metadata(
    reader: &BufferedReaderAt,
    cancel: &CancellationToken,
) -> Result<ParquetMetaData> {
    let size = reader.size();
    if size < FOOTER_SIZE + MAGIC.len() as u64 {
        return Err(VParquetError::DecodeFailure(format!(
            "data object of {} bytes is too small for a parquet file",
            size
        )));
    }

    let tail = reader.read_at(size - FOOTER_SIZE, FOOTER_SIZE, cancel).await?;
    if &tail[4..] != MAGIC {
        return Err(VParquetError::DecodeFailure(
            "data object has no parquet magic".to_string(),
        ));
    }
    let metadata_len = (&tail[..4]).get_u32_le() as u64;
    if metadata_len + FOOTER_SIZE + MAGIC.len() as u64 > size {
        return Err(VParquetError::DecodeFailure(format!(
            "footer length {} exceeds object size {}",
            metadata_len, size
        )));
    }

    let footer = reader
        .read_at(size - FOOTER_SIZE - metadata_len, metadata_len, cancel)
        .await?;
    let metadata = ParquetMetaDataReader::decode_metadata(&footer)?;
    debug!(
        row_groups = metadata.num_row_groups(),
        metadata_len, "Loaded parquet footer"
    );
    Ok(metadata)
}

/// Async parquet input over a shared buffered reader
#[derive(Debug, Clone)]
pub struct BlockFileReader {
    reader: Arc<BufferedReaderAt>,
    cancel: CancellationToken,
    metadata: Arc<ParquetMetaData>,
}

impl BlockFileReader {
    pub fn new(
        reader: Arc<BufferedReaderAt>,
        metadata: Arc<ParquetMetaData>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            reader,
            cancel,
            metadata,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fetch a byte range of the data object
    pub async fn fetch(&self, range: Range<u64>) -> Result<Bytes> {
        let length = range.end.saturating_sub(range.start);
        Ok(self.reader.read_at(range.start, length, &self.cancel).await?)
    }
}

impl AsyncFileReader for BlockFileReader {
    fn get_bytes(&mut self, range: Range<u64>) -> BoxFuture<'_, parquet::errors::Result<Bytes>> {
        async move {
            let length = range.end.saturating_sub(range.start);
            self.reader
                .read_at(range.start, length, &self.cancel)
                .await
                .map_err(|err| ParquetError::External(Box::new(err)))
        }
        .boxed()
    }

    fn get_metadata<'a>(
        &'a mut self,
        _options: Option<&'a ArrowReaderOptions>,
    ) -> BoxFuture<'a, parquet::errors::Result<Arc<ParquetMetaData>>> {
        let metadata = self.metadata.clone();
        async move { Ok(metadata) }.boxed()
    }
}

/// Record batches of one row group
pub fn row_group_stream(
    file: BlockFileReader,
    reader_meta: &ArrowReaderMetadata,
    row_group: usize,
    projection: ProjectionMask,
    selection: Option<RowSelection>,
    batch_size: usize,
) -> Result<ParquetRecordBatchStream<BlockFileReader>> {
    let mut builder = ParquetRecordBatchStreamBuilder::new_with_metadata(file, reader_meta.clone())
        .with_row_groups(vec![row_group])
        .with_projection(projection)
        .with_batch_size(batch_size.max(1));
    if let Some(selection) = selection {
        builder = builder.with_row_selection(selection);
    }
    Ok(builder.build()?)
}

/// Reader metadata for a decoded footer
pub fn reader_metadata(metadata: ParquetMetaData) -> Result<ArrowReaderMetadata> {
    Ok(ArrowReaderMetadata::try_new(
        Arc::new(metadata),
        ArrowReaderOptions::new(),
    )?)
}

/// Position of a leaf column by its dotted path
pub fn leaf_index(schema: &SchemaDescriptor, path: &str) -> Result<usize> {
    schema
        .columns()
        .iter()
        .position(|c| c.path().string() == path)
        .ok_or_else(|| VParquetError::MissingColumn(path.to_string()))
}

/// A column chunk held in memory, addressed by its offsets in the file
#[derive(Debug)]
struct ChunkBytes {
    offset: u64,
    data: Bytes,
}

impl ChunkBytes {
    fn slice(&self, start: u64, length: usize) -> parquet::errors::Result<Bytes> {
        let begin = start
            .checked_sub(self.offset)
            .map(|b| b as usize)
            .filter(|b| b.saturating_add(length) <= self.data.len())
            .ok_or_else(|| {
                ParquetError::EOF(format!(
                    "range {}+{} outside column chunk at {}",
                    start, length, self.offset
                ))
            })?;
        Ok(self.data.slice(begin..begin + length))
    }
}

impl Length for ChunkBytes {
    fn len(&self) -> u64 {
        self.offset + self.data.len() as u64
    }
}

impl ChunkReader for ChunkBytes {
    type T = bytes::buf::Reader<Bytes>;

    fn get_read(&self, start: u64) -> parquet::errors::Result<Self::T> {
        let remaining = (self.len().saturating_sub(start)) as usize;
        Ok(self.slice(start, remaining)?.reader())
    }

    fn get_bytes(&self, start: u64, length: usize) -> parquet::errors::Result<Bytes> {
        self.slice(start, length)
    }
}

/// Decode every value of an INT64 column chunk written with delta binary
/// packing.
///
/// Returns `Ok(None)` when the chunk cannot be decoded this way: the column
/// is nullable or nested, or a page uses another encoding. Callers then
/// evaluate the predicate on the decoded rows instead.
pub async fn decode_durations(
    file: &BlockFileReader,
    row_group: &RowGroupMetaData,
    column: usize,
) -> Result<Option<Vec<u64>>> {
    let col_meta = row_group.column(column);
    let descr = col_meta.column_descr();
    if descr.max_def_level() > 0 || descr.max_rep_level() > 0 {
        return Ok(None);
    }

    let (start, length) = col_meta.byte_range();
    let data = file.fetch(start..start + length).await?;
    let chunk = Arc::new(ChunkBytes {
        offset: start,
        data,
    });

    let num_rows = row_group.num_rows().max(0) as usize;
    let mut pages = SerializedPageReader::new(chunk, col_meta, num_rows, None)?;
    let mut decoder = DeltaDecoder::new();
    let mut raw = Vec::with_capacity(num_rows);

    while let Some(page) = pages.get_next_page()? {
        let values = match page {
            Page::DictionaryPage { .. } => continue,
            Page::DataPage { buf, encoding, .. } => {
                if encoding != Encoding::DELTA_BINARY_PACKED {
                    return Ok(None);
                }
                buf
            }
            Page::DataPageV2 {
                buf,
                encoding,
                def_levels_byte_len,
                rep_levels_byte_len,
                ..
            } => {
                if encoding != Encoding::DELTA_BINARY_PACKED {
                    return Ok(None);
                }
                let skip = (def_levels_byte_len + rep_levels_byte_len) as usize;
                if skip > buf.len() {
                    return Err(VParquetError::DecodeFailure(
                        "page levels exceed page size".to_string(),
                    ));
                }
                buf.slice(skip..)
            }
        };
        decoder.decode_i64(&values, &mut raw)?;
    }

    if raw.len() != num_rows {
        return Err(VParquetError::DecodeFailure(format!(
            "decoded {} durations for {} rows",
            raw.len(),
            num_rows
        )));
    }
    Ok(Some(raw.into_iter().map(|v| v as u64).collect()))
}
