//! Search request/response types and per-trace predicate evaluation

use crate::schema::{status_code, Attribute, Resource, Span, Trace};
use std::collections::HashMap;

/// Tag keys with dedicated columns
pub mod labels {
    pub const SERVICE_NAME: &str = "service.name";
    pub const CLUSTER: &str = "cluster";
    pub const NAMESPACE: &str = "namespace";
    pub const POD: &str = "pod";
    pub const CONTAINER: &str = "container";
    pub const K8S_CLUSTER_NAME: &str = "k8s.cluster.name";
    pub const K8S_NAMESPACE_NAME: &str = "k8s.namespace.name";
    pub const K8S_POD_NAME: &str = "k8s.pod.name";
    pub const K8S_CONTAINER_NAME: &str = "k8s.container.name";
    pub const HTTP_METHOD: &str = "http.method";
    pub const HTTP_URL: &str = "http.url";
    pub const HTTP_STATUS_CODE: &str = "http.status_code";
    pub const STATUS: &str = "status.code";
    pub const NAME: &str = "name";
}

/// Values of the `status.code` tag
pub mod status_names {
    pub const UNSET: &str = "unset";
    pub const OK: &str = "ok";
    pub const ERROR: &str = "error";
}

const NANOS_PER_MS: u64 = 1_000_000;

/// A search over one block. An empty request matches every trace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchRequest {
    /// Inclusive lower bound on the trace duration
    pub min_duration_ms: Option<u32>,

    /// Inclusive upper bound on the trace duration
    pub max_duration_ms: Option<u32>,

    /// Every key must match at least one resource or span of the trace
    pub tags: HashMap<String, String>,
}

impl SearchRequest {
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.min_duration_ms.is_none() && self.max_duration_ms.is_none() && self.tags.is_empty()
    }

    pub fn has_duration_bounds(&self) -> bool {
        self.min_duration_ms.is_some() || self.max_duration_ms.is_some()
    }

    /// Smallest duration in nanoseconds that satisfies the lower bound
    pub fn min_duration_nanos(&self) -> Option<u64> {
        self.min_duration_ms.map(|ms| ms as u64 * NANOS_PER_MS)
    }

    /// Largest duration in nanoseconds that satisfies the upper bound
    pub fn max_duration_nanos(&self) -> Option<u64> {
        self.max_duration_ms
            .map(|ms| (ms as u64 + 1) * NANOS_PER_MS - 1)
    }

    /// Whether a duration satisfies the request's bounds
    pub fn duration_matches(&self, duration_nano: u64) -> bool {
        self.min_duration_nanos().map_or(true, |min| duration_nano >= min)
            && self.max_duration_nanos().map_or(true, |max| duration_nano <= max)
    }

    /// Full per-trace verdict
    pub fn matches(&self, trace: &Trace) -> bool {
        self.duration_matches(trace.duration_nano)
            && self
                .tags
                .iter()
                .all(|(key, value)| trace_has_tag(trace, key, value))
    }
}

/// Options for [`crate::BackendBlock::search`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchOptions {
    /// Stop after this many results
    pub limit: Option<usize>,

    /// Rows per record batch while scanning
    pub batch_size: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: None,
            batch_size: 1024,
        }
    }
}

/// Summary of one matching trace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceSearchMetadata {
    /// Hex-encoded trace ID
    pub trace_id: String,
    pub start_time_unix_nano: u64,
    pub duration_ms: u32,
    pub root_service_name: String,
    pub root_trace_name: String,
}

impl From<&Trace> for TraceSearchMetadata {
    fn from(trace: &Trace) -> Self {
        Self {
            trace_id: trace.trace_id_hex(),
            start_time_unix_nano: trace.start_time_unix_nano,
            duration_ms: u32::try_from(trace.duration_nano / NANOS_PER_MS).unwrap_or(u32::MAX),
            root_service_name: trace.root_service_name.clone(),
            root_trace_name: trace.root_span_name.clone(),
        }
    }
}

/// Work done by one search
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchMetrics {
    pub inspected_traces: u64,
    pub inspected_bytes: u64,
    pub skipped_row_groups: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchResponse {
    /// Matches in storage order
    pub traces: Vec<TraceSearchMetadata>,
    pub metrics: SearchMetrics,
}

/// Numeric status code for a `status.code` tag value
pub fn status_code_from_name(name: &str) -> Option<i32> {
    match name {
        status_names::UNSET => Some(status_code::UNSET),
        status_names::OK => Some(status_code::OK),
        status_names::ERROR => Some(status_code::ERROR),
        _ => None,
    }
}

fn resource_dedicated<'a>(resource: &'a Resource, key: &str) -> Option<&'a str> {
    match key {
        labels::SERVICE_NAME => Some(&resource.service_name),
        labels::CLUSTER => resource.cluster.as_deref(),
        labels::NAMESPACE => resource.namespace.as_deref(),
        labels::POD => resource.pod.as_deref(),
        labels::CONTAINER => resource.container.as_deref(),
        labels::K8S_CLUSTER_NAME => resource.k8s_cluster_name.as_deref(),
        labels::K8S_NAMESPACE_NAME => resource.k8s_namespace_name.as_deref(),
        labels::K8S_POD_NAME => resource.k8s_pod_name.as_deref(),
        labels::K8S_CONTAINER_NAME => resource.k8s_container_name.as_deref(),
        _ => None,
    }
}

fn span_dedicated_matches(span: &Span, key: &str, value: &str) -> bool {
    match key {
        labels::NAME => span.name == value,
        labels::HTTP_METHOD => span.http_method.as_deref() == Some(value),
        labels::HTTP_URL => span.http_url.as_deref() == Some(value),
        labels::HTTP_STATUS_CODE => span
            .http_status_code
            .is_some_and(|code| code.to_string() == value),
        labels::STATUS => status_code_from_name(value) == Some(span.status_code),
        _ => false,
    }
}

fn attrs_match(attrs: &[Attribute], key: &str, value: &str) -> bool {
    attrs
        .iter()
        .any(|a| a.key == key && a.value.to_string() == value)
}

/// True if any resource or span of the trace carries `key` = `value`
pub fn trace_has_tag(trace: &Trace, key: &str, value: &str) -> bool {
    trace.resource_spans.iter().any(|rs| {
        let resource = &rs.resource;
        resource_dedicated(resource, key) == Some(value)
            || attrs_match(&resource.attrs, key, value)
            || rs.scope_spans.iter().flat_map(|ss| &ss.spans).any(|span| {
                span_dedicated_matches(span, key, value) || attrs_match(&span.attrs, key, value)
            })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ResourceSpans, ScopeSpans};

    fn trace() -> Trace {
        Trace {
            trace_id: vec![0x12, 0x34],
            start_time_unix_nano: 5,
            duration_nano: 100 * NANOS_PER_MS,
            root_service_name: "RootService".into(),
            root_span_name: "RootSpan".into(),
            resource_spans: vec![ResourceSpans {
                resource: Resource {
                    service_name: "myservice".into(),
                    pod: Some("pod".into()),
                    attrs: vec![Attribute::new("bat", "baz")],
                    ..Default::default()
                },
                scope_spans: vec![ScopeSpans {
                    spans: vec![Span {
                        name: "hello".into(),
                        http_method: Some("get".into()),
                        http_status_code: Some(500),
                        status_code: status_code::ERROR,
                        attrs: vec![
                            Attribute::new("foo", "bar"),
                            Attribute::new("retries", 3i64),
                            Attribute::new("http.method", "post"),
                        ],
                        ..Default::default()
                    }],
                    ..Default::default()
                }],
            }],
        }
    }

    #[test]
    fn test_duration_bounds_are_inclusive_in_ms() {
        let req = SearchRequest {
            min_duration_ms: Some(100),
            max_duration_ms: Some(100),
            ..Default::default()
        };
        assert!(req.duration_matches(100 * NANOS_PER_MS));
        assert!(req.duration_matches(100 * NANOS_PER_MS + 999_999));
        assert!(!req.duration_matches(101 * NANOS_PER_MS));
        assert!(!req.duration_matches(100 * NANOS_PER_MS - 1));
    }

    #[test]
    fn test_tags() {
        let t = trace();
        assert!(SearchRequest::default().matches(&t));
        assert!(SearchRequest::default().with_tag("service.name", "myservice").matches(&t));
        assert!(SearchRequest::default().with_tag("pod", "pod").matches(&t));
        assert!(SearchRequest::default().with_tag("http.status_code", "500").matches(&t));
        assert!(SearchRequest::default().with_tag("status.code", "error").matches(&t));
        assert!(SearchRequest::default().with_tag("name", "hello").matches(&t));
        assert!(SearchRequest::default().with_tag("bat", "baz").matches(&t));
        assert!(SearchRequest::default().with_tag("retries", "3").matches(&t));
        // well-known key found in the generic attributes
        assert!(SearchRequest::default().with_tag("http.method", "post").matches(&t));

        assert!(!SearchRequest::default().with_tag("service.name", "service").matches(&t));
        assert!(!SearchRequest::default().with_tag("cluster", "foo").matches(&t));
        assert!(!SearchRequest::default().with_tag("status.code", "ok").matches(&t));
        assert!(!SearchRequest::default().with_tag("http.status_code", "200").matches(&t));
        assert!(!SearchRequest::default().with_tag("foo", "baz").matches(&t));
    }

    #[test]
    fn test_tags_are_and_across_keys() {
        let t = trace();
        let both = SearchRequest::default()
            .with_tag("service.name", "myservice")
            .with_tag("foo", "bar");
        assert!(both.matches(&t));

        let one_wrong = both.with_tag("http.method", "put");
        assert!(!one_wrong.matches(&t));
    }

    #[test]
    fn test_metadata() {
        let meta = TraceSearchMetadata::from(&trace());
        assert_eq!(meta.trace_id, "1234");
        assert_eq!(meta.duration_ms, 100);
        assert_eq!(meta.root_trace_name, "RootSpan");
    }
}
