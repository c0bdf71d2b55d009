//! Column names and leaf paths of the block schema
//!
//! Lists are stored with the standard three-level layout, so the leaf path of
//! a nested field reads `<list>.list.element.<field>`.

/// Name of the item field of every list column
pub const LIST_ITEM: &str = "element";

/// Trace-level columns
pub mod trace {
    /// Binary trace ID
    pub const TRACE_ID: &str = "TraceID";

    /// Start time in nanoseconds since Unix epoch
    pub const START_TIME_UNIX_NANO: &str = "StartTimeUnixNano";

    /// Duration in nanoseconds
    pub const DURATION_NANO: &str = "DurationNano";

    /// Root service name
    pub const ROOT_SERVICE_NAME: &str = "RootServiceName";

    /// Root span name
    pub const ROOT_SPAN_NAME: &str = "RootSpanName";

    /// Resource spans (list of ResourceSpans)
    pub const RESOURCE_SPANS: &str = "rs";
}

/// ResourceSpans fields
pub mod resource_spans {
    pub const RESOURCE: &str = "Resource";

    /// Scope spans (list of ScopeSpans)
    pub const SCOPE_SPANS: &str = "ss";
}

/// Resource fields
pub mod resource {
    /// Service name (service.name attribute)
    pub const SERVICE_NAME: &str = "ServiceName";
    pub const CLUSTER: &str = "Cluster";
    pub const NAMESPACE: &str = "Namespace";
    pub const POD: &str = "Pod";
    pub const CONTAINER: &str = "Container";
    pub const K8S_CLUSTER_NAME: &str = "K8sClusterName";
    pub const K8S_NAMESPACE_NAME: &str = "K8sNamespaceName";
    pub const K8S_POD_NAME: &str = "K8sPodName";
    pub const K8S_CONTAINER_NAME: &str = "K8sContainerName";

    /// Generic attributes list
    pub const ATTRS: &str = "Attrs";
}

/// ScopeSpans fields
pub mod scope_spans {
    pub const SCOPE: &str = "Scope";
    pub const SCOPE_NAME: &str = "Name";
    pub const SCOPE_VERSION: &str = "Version";
    pub const SPANS: &str = "Spans";
}

/// Span fields
pub mod span {
    pub const SPAN_ID: &str = "SpanID";
    pub const PARENT_SPAN_ID: &str = "ParentSpanID";
    pub const NAME: &str = "Name";

    /// Span kind (INTERNAL=1, SERVER=2, CLIENT=3, PRODUCER=4, CONSUMER=5)
    pub const KIND: &str = "Kind";
    pub const START_TIME_UNIX_NANO: &str = "StartTimeUnixNano";
    pub const DURATION_NANO: &str = "DurationNano";

    /// Status code (UNSET=0, OK=1, ERROR=2)
    pub const STATUS_CODE: &str = "StatusCode";
    pub const STATUS_MESSAGE: &str = "StatusMessage";
    pub const HTTP_METHOD: &str = "HttpMethod";
    pub const HTTP_URL: &str = "HttpUrl";
    pub const HTTP_STATUS_CODE: &str = "HttpStatusCode";
    pub const ATTRS: &str = "Attrs";
    pub const EVENTS: &str = "Events";
}

/// Attribute fields (resource and span attributes)
pub mod attr {
    pub const KEY: &str = "Key";
    pub const VALUE: &str = "Value";
    pub const VALUE_INT: &str = "ValueInt";
    pub const VALUE_DOUBLE: &str = "ValueDouble";
    pub const VALUE_BOOL: &str = "ValueBool";
}

/// Event fields
pub mod event {
    pub const TIME_UNIX_NANO: &str = "TimeUnixNano";
    pub const NAME: &str = "Name";
    pub const ATTRS: &str = "Attrs";
}

/// Full leaf paths used for statistics and writer settings
pub mod leaf {
    pub const TRACE_ID: &str = "TraceID";
    pub const START_TIME_UNIX_NANO: &str = "StartTimeUnixNano";
    pub const DURATION_NANO: &str = "DurationNano";

    const RESOURCE: &str = "rs.list.element.Resource";
    const SPAN: &str = "rs.list.element.ss.list.element.Spans.list.element";

    pub const RESOURCE_SERVICE_NAME: &str = "rs.list.element.Resource.ServiceName";
    pub const RESOURCE_ATTR_KEY: &str = "rs.list.element.Resource.Attrs.list.element.Key";
    pub const RESOURCE_ATTR_VALUE_INT: &str = "rs.list.element.Resource.Attrs.list.element.ValueInt";

    pub const SPAN_NAME: &str = "rs.list.element.ss.list.element.Spans.list.element.Name";
    pub const SPAN_KIND: &str = "rs.list.element.ss.list.element.Spans.list.element.Kind";
    pub const SPAN_START_TIME_UNIX_NANO: &str =
        "rs.list.element.ss.list.element.Spans.list.element.StartTimeUnixNano";
    pub const SPAN_DURATION_NANO: &str =
        "rs.list.element.ss.list.element.Spans.list.element.DurationNano";
    pub const SPAN_STATUS_CODE: &str =
        "rs.list.element.ss.list.element.Spans.list.element.StatusCode";
    pub const SPAN_HTTP_STATUS_CODE: &str =
        "rs.list.element.ss.list.element.Spans.list.element.HttpStatusCode";
    pub const SPAN_ATTR_KEY: &str =
        "rs.list.element.ss.list.element.Spans.list.element.Attrs.list.element.Key";
    pub const SPAN_ATTR_VALUE_INT: &str =
        "rs.list.element.ss.list.element.Spans.list.element.Attrs.list.element.ValueInt";
    pub const EVENT_TIME_UNIX_NANO: &str =
        "rs.list.element.ss.list.element.Spans.list.element.Events.list.element.TimeUnixNano";

    /// Leaf path of a dedicated resource column
    pub fn resource_column(name: &str) -> String {
        format!("{}.{}", RESOURCE, name)
    }

    /// Leaf path of a dedicated span column
    pub fn span_column(name: &str) -> String {
        format!("{}.{}", SPAN, name)
    }

    /// Integer leaves written with delta binary packing
    pub const DELTA_COLUMNS: &[&str] = &[
        START_TIME_UNIX_NANO,
        DURATION_NANO,
        RESOURCE_ATTR_VALUE_INT,
        SPAN_KIND,
        SPAN_START_TIME_UNIX_NANO,
        SPAN_DURATION_NANO,
        SPAN_STATUS_CODE,
        SPAN_HTTP_STATUS_CODE,
        SPAN_ATTR_VALUE_INT,
        EVENT_TIME_UNIX_NANO,
    ];
}
