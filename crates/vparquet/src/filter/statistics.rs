//! Row group statistics extraction
//!
//! Bounds come from the column chunk statistics in the footer, so a row
//! group can be skipped without reading any of its pages.

use crate::schema::field_paths::leaf;
use parquet::file::metadata::RowGroupMetaData;
use parquet::file::statistics::Statistics;

/// What the footer says about the values of one column chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnBounds {
    /// No statistics were written, anything is possible
    Unknown,

    /// Statistics exist but the chunk holds no values
    Empty,

    Int { min: i64, max: i64 },

    Bytes { min: Vec<u8>, max: Vec<u8> },
}

impl ColumnBounds {
    /// False only if no value in the chunk can equal `value`
    pub fn may_contain_bytes(&self, value: &[u8]) -> bool {
        match self {
            ColumnBounds::Unknown => true,
            ColumnBounds::Empty => false,
            ColumnBounds::Bytes { min, max } => min.as_slice() <= value && value <= max.as_slice(),
            // type mismatch, stay conservative
            ColumnBounds::Int { .. } => true,
        }
    }

    /// False only if no value in the chunk can equal `value`
    pub fn may_contain_int(&self, value: i64) -> bool {
        self.overlaps_int(value, value)
    }

    /// False only if no value in the chunk lies in `[lo, hi]`
    pub fn overlaps_int(&self, lo: i64, hi: i64) -> bool {
        match self {
            ColumnBounds::Unknown => true,
            ColumnBounds::Empty => false,
            ColumnBounds::Int { min, max } => *max >= lo && *min <= hi,
            ColumnBounds::Bytes { .. } => true,
        }
    }
}

/// Index of the leaf column with the given dotted path
pub fn column_index(row_group: &RowGroupMetaData, path: &str) -> Option<usize> {
    row_group
        .columns()
        .iter()
        .position(|c| c.column_path().string() == path)
}

/// Bounds of the leaf column with the given dotted path
pub fn column_bounds(row_group: &RowGroupMetaData, path: &str) -> ColumnBounds {
    let Some(idx) = column_index(row_group, path) else {
        return ColumnBounds::Unknown;
    };
    let Some(stats) = row_group.column(idx).statistics() else {
        return ColumnBounds::Unknown;
    };

    macro_rules! int_bounds {
        ($s:expr) => {
            match ($s.min_opt(), $s.max_opt()) {
                (Some(min), Some(max)) => ColumnBounds::Int {
                    min: *min as i64,
                    max: *max as i64,
                },
                (None, None) => ColumnBounds::Empty,
                _ => ColumnBounds::Unknown,
            }
        };
    }

    match stats {
        Statistics::Int32(s) => int_bounds!(s),
        Statistics::Int64(s) => int_bounds!(s),
        Statistics::ByteArray(s) => match (s.min_bytes_opt(), s.max_bytes_opt()) {
            (Some(min), Some(max)) => ColumnBounds::Bytes {
                min: min.to_vec(),
                max: max.to_vec(),
            },
            (None, None) => ColumnBounds::Empty,
            _ => ColumnBounds::Unknown,
        },
        _ => ColumnBounds::Unknown,
    }
}

/// Trace-level statistics of one row group
#[derive(Debug, Clone)]
pub struct RowGroupStats {
    /// Minimum TraceID value in this row group (binary)
    pub min_trace_id: Option<Vec<u8>>,

    /// Maximum TraceID value in this row group (binary)
    pub max_trace_id: Option<Vec<u8>>,

    pub min_start_time_ns: Option<u64>,
    pub max_start_time_ns: Option<u64>,

    pub min_duration_ns: Option<u64>,
    pub max_duration_ns: Option<u64>,

    /// Number of rows in this row group
    pub num_rows: i64,
}

impl RowGroupStats {
    /// Extracts statistics from a row group's metadata
    pub fn from_metadata(row_group: &RowGroupMetaData) -> Self {
        let (min_trace_id, max_trace_id) = match column_bounds(row_group, leaf::TRACE_ID) {
            ColumnBounds::Bytes { min, max } => (Some(min), Some(max)),
            _ => (None, None),
        };
        let (min_start_time_ns, max_start_time_ns) =
            Self::u64_range(row_group, leaf::START_TIME_UNIX_NANO);
        let (min_duration_ns, max_duration_ns) = Self::u64_range(row_group, leaf::DURATION_NANO);

        Self {
            min_trace_id,
            max_trace_id,
            min_start_time_ns,
            max_start_time_ns,
            min_duration_ns,
            max_duration_ns,
            num_rows: row_group.num_rows(),
        }
    }

    fn u64_range(row_group: &RowGroupMetaData, path: &str) -> (Option<u64>, Option<u64>) {
        // unsigned columns are stored as INT64
        match column_bounds(row_group, path) {
            ColumnBounds::Int { min, max } => (Some(min as u64), Some(max as u64)),
            _ => (None, None),
        }
    }

    /// Checks if this row group might contain the given trace ID
    pub fn may_contain_trace_id(&self, id: &[u8]) -> bool {
        match (&self.min_trace_id, &self.max_trace_id) {
            (Some(min), Some(max)) => min.as_slice() <= id && id <= max.as_slice(),
            _ => true,
        }
    }

    /// Checks if any trace of this row group can have a duration in `[min_ns, max_ns]`
    pub fn overlaps_duration(&self, min_ns: u64, max_ns: u64) -> bool {
        let (Some(lo), Some(hi)) = (self.min_duration_ns, self.max_duration_ns) else {
            return true;
        };
        hi >= min_ns && lo <= max_ns
    }
}
