//! Row group pruning
//!
//! Filters decide from footer statistics alone whether a row group can
//! hold a match. A `false` answer is definitive; `true` only means the
//! rows must be read.

pub mod statistics;

pub use statistics::{column_bounds, column_index, ColumnBounds, RowGroupStats};

use crate::schema::field_paths::{leaf, resource, span};
use crate::search::{labels, status_code_from_name, SearchRequest};
use parquet::file::metadata::RowGroupMetaData;

/// Trait for filtering row groups based on metadata
pub trait RowGroupFilter {
    /// Returns true if the row group should be read
    fn should_include(&self, row_group: &RowGroupMetaData) -> bool;
}

/// Keeps row groups whose trace ID range covers one ID
#[derive(Debug, Clone)]
pub struct TraceIdFilter<'a> {
    id: &'a [u8],
}

impl<'a> TraceIdFilter<'a> {
    pub fn new(id: &'a [u8]) -> Self {
        Self { id }
    }
}

impl RowGroupFilter for TraceIdFilter<'_> {
    fn should_include(&self, row_group: &RowGroupMetaData) -> bool {
        RowGroupStats::from_metadata(row_group).may_contain_trace_id(self.id)
    }
}

/// Keeps row groups that may hold a trace matching a search request
#[derive(Debug, Clone)]
pub struct SearchFilter<'a> {
    request: &'a SearchRequest,
}

impl<'a> SearchFilter<'a> {
    pub fn new(request: &'a SearchRequest) -> Self {
        Self { request }
    }

    fn duration_may_match(&self, row_group: &RowGroupMetaData) -> bool {
        if !self.request.has_duration_bounds() {
            return true;
        }
        let min = self.request.min_duration_nanos().unwrap_or(0);
        let max = self.request.max_duration_nanos().unwrap_or(u64::MAX);
        RowGroupStats::from_metadata(row_group).overlaps_duration(min, max)
    }
}

impl RowGroupFilter for SearchFilter<'_> {
    fn should_include(&self, row_group: &RowGroupMetaData) -> bool {
        self.duration_may_match(row_group)
            && self
                .request
                .tags
                .iter()
                .all(|(key, value)| tag_may_match(row_group, key, value))
    }
}

/// Whether any resource or span of the row group can carry `key` = `value`
pub fn tag_may_match(row_group: &RowGroupMetaData, key: &str, value: &str) -> bool {
    // every key may also appear as a generic attribute
    column_bounds(row_group, leaf::RESOURCE_ATTR_KEY).may_contain_bytes(key.as_bytes())
        || column_bounds(row_group, leaf::SPAN_ATTR_KEY).may_contain_bytes(key.as_bytes())
        || dedicated_may_match(row_group, key, value)
}

fn dedicated_may_match(row_group: &RowGroupMetaData, key: &str, value: &str) -> bool {
    let bytes = |path: String| column_bounds(row_group, &path).may_contain_bytes(value.as_bytes());
    match key {
        labels::SERVICE_NAME => bytes(leaf::resource_column(resource::SERVICE_NAME)),
        labels::CLUSTER => bytes(leaf::resource_column(resource::CLUSTER)),
        labels::NAMESPACE => bytes(leaf::resource_column(resource::NAMESPACE)),
        labels::POD => bytes(leaf::resource_column(resource::POD)),
        labels::CONTAINER => bytes(leaf::resource_column(resource::CONTAINER)),
        labels::K8S_CLUSTER_NAME => bytes(leaf::resource_column(resource::K8S_CLUSTER_NAME)),
        labels::K8S_NAMESPACE_NAME => bytes(leaf::resource_column(resource::K8S_NAMESPACE_NAME)),
        labels::K8S_POD_NAME => bytes(leaf::resource_column(resource::K8S_POD_NAME)),
        labels::K8S_CONTAINER_NAME => bytes(leaf::resource_column(resource::K8S_CONTAINER_NAME)),
        labels::NAME => bytes(leaf::span_column(span::NAME)),
        labels::HTTP_METHOD => bytes(leaf::span_column(span::HTTP_METHOD)),
        labels::HTTP_URL => bytes(leaf::span_column(span::HTTP_URL)),
        labels::HTTP_STATUS_CODE => value.parse::<i64>().is_ok_and(|code| {
            column_bounds(row_group, leaf::SPAN_HTTP_STATUS_CODE).may_contain_int(code)
        }),
        labels::STATUS => status_code_from_name(value).is_some_and(|code| {
            column_bounds(row_group, leaf::SPAN_STATUS_CODE).may_contain_int(code as i64)
        }),
        _ => false,
    }
}

/// Indices of the row groups the filter keeps
pub fn filter_row_groups(row_groups: &[RowGroupMetaData], filter: &impl RowGroupFilter) -> Vec<usize> {
    row_groups
        .iter()
        .enumerate()
        .filter(|(_, rg)| filter.should_include(rg))
        .map(|(idx, _)| idx)
        .collect()
}
