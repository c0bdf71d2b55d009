//! Trace model and its columnar mapping
//!
//! The in-memory [`Trace`] tree is flattened into one arena table per
//! nesting level ([`columns::TraceBatchBuilder`]) and reconstructed from
//! Arrow record batches by [`rows`].

pub mod columns;
pub mod field_paths;
pub mod rows;

pub use columns::{trace_schema, TraceBatchBuilder};
pub use rows::traces_from_batch;

use std::fmt;

/// A complete trace: the unit stored in one row of a block
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Trace {
    /// Trace ID, non-empty and unique within a block
    pub trace_id: Vec<u8>,

    /// Start of the trace (unix nanoseconds)
    pub start_time_unix_nano: u64,

    /// Duration of the trace in nanoseconds
    pub duration_nano: u64,

    /// Service of the root span, empty when unknown
    pub root_service_name: String,

    /// Name of the root span, empty when unknown
    pub root_span_name: String,

    pub resource_spans: Vec<ResourceSpans>,
}

impl Trace {
    /// Returns the trace ID as a hex string
    pub fn trace_id_hex(&self) -> String {
        hex::encode(&self.trace_id)
    }

    /// End of the trace (unix nanoseconds)
    pub fn end_time_unix_nano(&self) -> u64 {
        self.start_time_unix_nano.saturating_add(self.duration_nano)
    }

    /// Returns the total number of spans in this trace
    pub fn total_spans(&self) -> usize {
        self.resource_spans
            .iter()
            .flat_map(|rs| &rs.scope_spans)
            .map(|ss| ss.spans.len())
            .sum()
    }

    /// Iterates every span together with the resource it belongs to
    pub fn spans(&self) -> impl Iterator<Item = (&Resource, &Span)> {
        self.resource_spans.iter().flat_map(|rs| {
            rs.scope_spans
                .iter()
                .flat_map(move |ss| ss.spans.iter().map(move |span| (&rs.resource, span)))
        })
    }
}

/// Spans emitted by one resource
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResourceSpans {
    pub resource: Resource,
    pub scope_spans: Vec<ScopeSpans>,
}

/// The entity producing spans. Well-known attributes have their own fields
/// and are absent (not empty) when unset.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Resource {
    /// service.name, required
    pub service_name: String,
    pub cluster: Option<String>,
    pub namespace: Option<String>,
    pub pod: Option<String>,
    pub container: Option<String>,
    pub k8s_cluster_name: Option<String>,
    pub k8s_namespace_name: Option<String>,
    pub k8s_pod_name: Option<String>,
    pub k8s_container_name: Option<String>,
    pub attrs: Vec<Attribute>,
}

/// Spans sharing an instrumentation scope
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScopeSpans {
    pub scope: InstrumentationScope,
    pub spans: Vec<Span>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct InstrumentationScope {
    pub name: String,
    pub version: String,
}

/// Status code values stored in [`Span::status_code`]
pub mod status_code {
    pub const UNSET: i32 = 0;
    pub const OK: i32 = 1;
    pub const ERROR: i32 = 2;
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Span {
    /// May be empty
    pub span_id: Vec<u8>,
    /// Empty for root spans
    pub parent_span_id: Vec<u8>,
    pub name: String,
    /// OTLP span kind (INTERNAL=1, SERVER=2, CLIENT=3, PRODUCER=4, CONSUMER=5)
    pub kind: i32,
    pub start_time_unix_nano: u64,
    pub duration_nano: u64,
    /// UNSET=0, OK=1, ERROR=2
    pub status_code: i32,
    pub status_message: String,
    pub http_method: Option<String>,
    pub http_url: Option<String>,
    pub http_status_code: Option<i64>,
    pub attrs: Vec<Attribute>,
    pub events: Vec<Event>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Event {
    pub time_unix_nano: u64,
    pub name: String,
    pub attrs: Vec<EventAttribute>,
}

/// Event attributes keep their value as a string
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EventAttribute {
    pub key: String,
    pub value: String,
}

/// Free-form key/value attribute of a resource or span
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub key: String,
    pub value: AttributeValue,
}

impl Attribute {
    pub fn new(key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Typed attribute value; exactly one variant is stored
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    String(String),
    Int(i64),
    Double(f64),
    Bool(bool),
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::String(s) => f.write_str(s),
            AttributeValue::Int(i) => write!(f, "{}", i),
            AttributeValue::Double(d) => write!(f, "{}", d),
            AttributeValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::String(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Double(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}
