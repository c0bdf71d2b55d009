//! Integration tests for block search

mod common;

use common::*;
use config::BlockConfig;
use tokio_util::sync::CancellationToken;
use vparquet::{SearchOptions, SearchRequest, TraceSearchMetadata};

fn tag(key: &str, value: &str) -> SearchRequest {
    SearchRequest::default().with_tag(key, value)
}

#[tokio::test]
async fn test_search_full_trace() {
    let want = full_trace(random_ids(1, 1).remove(0));
    let block = write_block(memory_backend(), &BlockConfig::default(), &[want.clone()]).await;
    let cancel = CancellationToken::new();

    let expected = TraceSearchMetadata {
        trace_id: hex::encode(&want.trace_id),
        start_time_unix_nano: want.start_time_unix_nano,
        duration_ms: 100,
        root_service_name: "RootService".to_string(),
        root_trace_name: "RootSpan".to_string(),
    };

    let matching = vec![
        SearchRequest::default(),
        SearchRequest {
            min_duration_ms: Some(99),
            max_duration_ms: Some(101),
            ..Default::default()
        },
        SearchRequest {
            min_duration_ms: Some(100),
            max_duration_ms: Some(100),
            ..Default::default()
        },
        // well-known resource attributes
        tag("service.name", "myservice"),
        tag("cluster", "cluster"),
        tag("namespace", "namespace"),
        tag("pod", "pod"),
        tag("container", "container"),
        tag("k8s.cluster.name", "k8scluster"),
        tag("k8s.namespace.name", "k8snamespace"),
        tag("k8s.pod.name", "k8spod"),
        tag("k8s.container.name", "k8scontainer"),
        // well-known span attributes
        tag("name", "hello"),
        tag("http.method", "get"),
        tag("http.url", "url/hello/world"),
        tag("http.status_code", "500"),
        tag("status.code", "error"),
        // span attributes
        tag("foo", "bar"),
        tag("retries", "3"),
        tag("ratio", "0.5"),
        tag("sampled", "true"),
        // resource attributes
        tag("bat", "baz"),
        // multiple
        tag("service.name", "myservice")
            .with_tag("http.method", "get")
            .with_tag("foo", "bar"),
    ];
    for req in matching {
        let res = block
            .search(&req, SearchOptions::default(), &cancel)
            .await
            .unwrap();
        assert_eq!(res.traces, vec![expected.clone()], "request: {:?}", req);
    }

    let excluded = vec![
        SearchRequest {
            min_duration_ms: Some(101),
            ..Default::default()
        },
        SearchRequest {
            max_duration_ms: Some(99),
            ..Default::default()
        },
        SearchRequest {
            max_duration_ms: Some(50),
            ..Default::default()
        },
        // well-known resource attributes
        tag("service.name", "foo"),
        tag("service.name", "service"),
        tag("cluster", "foo"),
        tag("namespace", "foo"),
        tag("pod", "foo"),
        tag("container", "foo"),
        // well-known span attributes
        tag("http.method", "post"),
        tag("http.url", "asdf"),
        tag("http.status_code", "200"),
        tag("status.code", "ok"),
        // span attributes
        tag("foo", "baz"),
        // one of several keys missing
        tag("service.name", "myservice").with_tag("foo", "baz"),
    ];
    for req in excluded {
        let res = block
            .search(&req, SearchOptions::default(), &cancel)
            .await
            .unwrap();
        assert!(res.traces.is_empty(), "request: {:?}", req);
    }
}

#[tokio::test]
async fn test_search_limit_and_order() {
    let ids = random_ids(2, 30);
    let traces: Vec<_> = ids
        .iter()
        .map(|id| simple_trace(id.clone(), "svc", 10 * MS))
        .collect();
    let block = write_block(memory_backend(), &small_config(8), &traces).await;
    let cancel = CancellationToken::new();

    let all = block
        .search(&SearchRequest::default(), SearchOptions::default(), &cancel)
        .await
        .unwrap();
    let found: Vec<_> = all.traces.iter().map(|t| t.trace_id.clone()).collect();
    let written: Vec<_> = ids.iter().map(hex::encode).collect();
    assert_eq!(found, written);
    assert_eq!(all.metrics.inspected_traces, 30);

    let limited = block
        .search(
            &SearchRequest::default(),
            SearchOptions {
                limit: Some(5),
                ..Default::default()
            },
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(limited.traces.len(), 5);
    assert_eq!(limited.traces[..], all.traces[..5]);

    let none = block
        .search(
            &SearchRequest::default(),
            SearchOptions {
                limit: Some(0),
                ..Default::default()
            },
            &cancel,
        )
        .await
        .unwrap();
    assert!(none.traces.is_empty());
}

#[tokio::test]
async fn test_search_skips_row_groups_by_duration_statistics() {
    // durations rise with the row, so each row group covers its own range
    let traces: Vec<_> = random_ids(3, 100)
        .into_iter()
        .enumerate()
        .map(|(i, id)| simple_trace(id, "svc", i as u64 * MS))
        .collect();
    let block = write_block(memory_backend(), &small_config(10), &traces).await;

    let req = SearchRequest {
        min_duration_ms: Some(50),
        max_duration_ms: Some(59),
        ..Default::default()
    };
    let res = block
        .search(&req, SearchOptions::default(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(res.traces.len(), 10);
    assert!(res.traces.iter().all(|t| (50..=59).contains(&t.duration_ms)));
    assert_eq!(res.metrics.skipped_row_groups, 9);
    assert_eq!(res.metrics.inspected_traces, 10);
}

#[tokio::test]
async fn test_search_selects_rows_from_duration_pages() {
    // every row group holds durations 0..10ms, so statistics cannot prune
    let traces: Vec<_> = random_ids(4, 100)
        .into_iter()
        .enumerate()
        .map(|(i, id)| simple_trace(id, "svc", (i % 10) as u64 * MS + 7))
        .collect();
    let block = write_block(memory_backend(), &small_config(10), &traces).await;

    let req = SearchRequest {
        min_duration_ms: Some(3),
        max_duration_ms: Some(3),
        ..Default::default()
    };
    let res = block
        .search(&req, SearchOptions::default(), &CancellationToken::new())
        .await
        .unwrap();

    let expected: Vec<_> = traces
        .iter()
        .filter(|t| t.duration_nano / MS == 3)
        .map(|t| hex::encode(&t.trace_id))
        .collect();
    let found: Vec<_> = res.traces.into_iter().map(|t| t.trace_id).collect();
    assert_eq!(found, expected);
    assert_eq!(res.metrics.skipped_row_groups, 0);
    assert_eq!(res.metrics.inspected_traces, 10);
}

#[tokio::test]
async fn test_search_skips_row_groups_by_tag_statistics() {
    let ids = random_ids(5, 20);
    let traces: Vec<_> = ids
        .iter()
        .enumerate()
        .map(|(i, id)| simple_trace(id.clone(), if i < 10 { "alpha" } else { "beta" }, MS))
        .collect();
    let block = write_block(memory_backend(), &small_config(10), &traces).await;
    let cancel = CancellationToken::new();

    let res = block
        .search(&tag("service.name", "beta"), SearchOptions::default(), &cancel)
        .await
        .unwrap();
    assert_eq!(res.traces.len(), 10);
    assert_eq!(res.metrics.skipped_row_groups, 1);
    assert_eq!(res.metrics.inspected_traces, 10);

    let res = block
        .search(&tag("service.name", "gamma"), SearchOptions::default(), &cancel)
        .await
        .unwrap();
    assert!(res.traces.is_empty());
    assert_eq!(res.metrics.skipped_row_groups, 2);
    assert_eq!(res.metrics.inspected_traces, 0);

    // a key present as a generic attribute keeps every row group
    let res = block
        .search(&tag("foo", "bar"), SearchOptions::default(), &cancel)
        .await
        .unwrap();
    assert_eq!(res.traces.len(), 20);
    assert_eq!(res.metrics.skipped_row_groups, 0);
}

#[tokio::test]
async fn test_search_cancelled() {
    let traces = vec![simple_trace(random_ids(6, 1).remove(0), "svc", MS)];
    let block = write_block(memory_backend(), &BlockConfig::default(), &traces).await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = block
        .search(&SearchRequest::default(), SearchOptions::default(), &cancel)
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert!(err.to_string().contains(&block.meta().block_id.to_string()));
}
