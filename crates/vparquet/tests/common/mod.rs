//! Shared fixtures for block integration tests

#![allow(dead_code)]

use config::BlockConfig;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use storage::{Backend, BlockMeta, Encoding, ObjectStoreBackend};
use uuid::Uuid;
use vparquet::schema::status_code;
use vparquet::{
    Attribute, BackendBlock, Event, EventAttribute, Resource, ResourceSpans, ScopeSpans, Span,
    StreamingBlock, Trace,
};

pub const TENANT: &str = "fake";
pub const MS: u64 = 1_000_000;

pub fn memory_backend() -> Arc<dyn Backend> {
    Arc::new(ObjectStoreBackend::in_memory())
}

/// Small row groups and buffers so tests cover multi-group blocks
pub fn small_config(row_group_size_rows: usize) -> BlockConfig {
    BlockConfig {
        row_group_size_rows,
        flush_traces: 7,
        read_buffer_size_bytes: 4 * 1024,
        read_buffer_count: 4,
        search_batch_size: 16,
        ..Default::default()
    }
}

/// Empty meta with the encoding `cfg` writes
pub fn new_meta(cfg: &BlockConfig) -> BlockMeta {
    let encoding: Encoding = cfg.encoding.parse().expect("valid encoding");
    BlockMeta::new(TENANT, Uuid::new_v4(), "", encoding, "")
}

/// Write `traces` into a new block and open it for reading
pub async fn write_block(
    backend: Arc<dyn Backend>,
    cfg: &BlockConfig,
    traces: &[Trace],
) -> BackendBlock {
    let mut block = StreamingBlock::new(cfg, &new_meta(cfg), traces.len(), backend.clone())
        .expect("create streaming block");
    for trace in traces {
        block.add(trace).expect("add trace");
    }
    let meta = block.complete().await.expect("complete block");
    BackendBlock::new(meta, backend, cfg)
}

pub fn random_ids(seed: u64, n: usize) -> Vec<Vec<u8>> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    (0..n).map(|_| rng.gen::<[u8; 16]>().to_vec()).collect()
}

/// Minimal valid trace with one resource and one span
pub fn simple_trace(id: Vec<u8>, service: &str, duration_nano: u64) -> Trace {
    Trace {
        trace_id: id,
        start_time_unix_nano: 1_700_000_000_000_000_000,
        duration_nano,
        root_service_name: service.to_string(),
        root_span_name: "root".to_string(),
        resource_spans: vec![ResourceSpans {
            resource: Resource {
                service_name: service.to_string(),
                attrs: vec![Attribute::new("foo", "bar")],
                ..Default::default()
            },
            scope_spans: vec![ScopeSpans {
                spans: vec![Span {
                    span_id: vec![1, 2, 3, 4, 5, 6, 7, 8],
                    name: "root".to_string(),
                    start_time_unix_nano: 1_700_000_000_000_000_000,
                    duration_nano,
                    attrs: vec![Attribute::new("foo", "bar")],
                    ..Default::default()
                }],
                ..Default::default()
            }],
        }],
    }
}

/// Trace with every well-known field populated
pub fn full_trace(id: Vec<u8>) -> Trace {
    let start = 1_700_000_000_000_000_000;
    Trace {
        trace_id: id,
        start_time_unix_nano: start,
        duration_nano: 100 * MS,
        root_service_name: "RootService".to_string(),
        root_span_name: "RootSpan".to_string(),
        resource_spans: vec![ResourceSpans {
            resource: Resource {
                service_name: "myservice".to_string(),
                cluster: Some("cluster".to_string()),
                namespace: Some("namespace".to_string()),
                pod: Some("pod".to_string()),
                container: Some("container".to_string()),
                k8s_cluster_name: Some("k8scluster".to_string()),
                k8s_namespace_name: Some("k8snamespace".to_string()),
                k8s_pod_name: Some("k8spod".to_string()),
                k8s_container_name: Some("k8scontainer".to_string()),
                attrs: vec![Attribute::new("bat", "baz")],
            },
            scope_spans: vec![ScopeSpans {
                scope: vparquet::InstrumentationScope {
                    name: "lib".to_string(),
                    version: "1.0".to_string(),
                },
                spans: vec![Span {
                    span_id: vec![],
                    parent_span_id: vec![],
                    name: "hello".to_string(),
                    kind: 2,
                    start_time_unix_nano: start,
                    duration_nano: 100 * MS,
                    status_code: status_code::ERROR,
                    status_message: "boom".to_string(),
                    http_method: Some("get".to_string()),
                    http_url: Some("url/hello/world".to_string()),
                    http_status_code: Some(500),
                    attrs: vec![
                        Attribute::new("foo", "bar"),
                        Attribute::new("retries", 3i64),
                        Attribute::new("ratio", 0.5f64),
                        Attribute::new("sampled", true),
                    ],
                    events: vec![Event {
                        time_unix_nano: start + 5,
                        name: "exception".to_string(),
                        attrs: vec![EventAttribute {
                            key: "message".to_string(),
                            value: "oops".to_string(),
                        }],
                    }],
                }],
            }],
        }],
    }
}
