//! # vparquet
//!
//! Columnar block storage for traces.
//!
//! A block is a set of objects under `<tenant>/<block-id>/` in a
//! [`storage::Backend`]:
//! - `data.parquet`: one row per trace, nested resource/scope/span/event
//!   columns, integer leaves delta binary packed
//! - `bloom-<n>`: sharded bloom filter over trace ids
//! - `meta.json`: the [`storage::BlockMeta`], written last
//!
//! Blocks are written once with [`StreamingBlock`] and read with
//! [`BackendBlock`]:
//!
//! ```no_run
//! # async fn demo(trace: vparquet::Trace) -> vparquet::Result<()> {
//! use std::sync::Arc;
//! use storage::{BlockMeta, Encoding, ObjectStoreBackend};
//! use tokio_util::sync::CancellationToken;
//! use vparquet::{BackendBlock, SearchOptions, SearchRequest, StreamingBlock};
//!
//! let backend = Arc::new(ObjectStoreBackend::in_memory());
//! let cfg = config::BlockConfig::default();
//! let meta = BlockMeta::new("single-tenant", uuid::Uuid::new_v4(), "", Encoding::None, "");
//!
//! let mut block = StreamingBlock::new(&cfg, &meta, 1, backend.clone())?;
//! block.add(&trace)?;
//! let meta = block.complete().await?;
//!
//! let cancel = CancellationToken::new();
//! let block = BackendBlock::new(meta, backend, &cfg);
//! let found = block.find_trace_by_id(&trace.trace_id, &cancel).await?;
//! let request = SearchRequest::default().with_tag("service.name", "frontend");
//! let response = block.search(&request, SearchOptions::default(), &cancel).await?;
//! # Ok(())
//! # }
//! ```

pub mod backend_block;
pub mod bloom;
pub mod encoding;
pub mod error;
pub mod file_reader;
pub mod filter;
pub mod iter;
pub mod schema;
pub mod search;
pub mod streaming_block;

/// Version and data encoding recorded in the meta of blocks written here
pub const VERSION: &str = "vParquet";

/// Object name of a block's column data
pub const DATA_FILE_NAME: &str = "data.parquet";

pub use backend_block::BackendBlock;
pub use bloom::{BloomFilter, ShardedBloom};
pub use error::{Result, VParquetError};
pub use iter::BlockIterator;
pub use schema::{
    Attribute, AttributeValue, Event, EventAttribute, InstrumentationScope, Resource,
    ResourceSpans, ScopeSpans, Span, Trace,
};
pub use search::{SearchMetrics, SearchOptions, SearchRequest, SearchResponse, TraceSearchMetadata};
pub use streaming_block::{BlockState, StreamingBlock};
