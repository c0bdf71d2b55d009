//! Columnar → trace mapping
//!
//! Walks the list offsets of a record batch level by level and rebuilds the
//! nested [`Trace`] values in row order.

use super::field_paths::{attr, event, resource, resource_spans, scope_spans, span, trace};
use super::{
    Attribute, AttributeValue, Event, EventAttribute, InstrumentationScope, Resource,
    ResourceSpans, ScopeSpans, Span, Trace,
};
use crate::error::{Result, VParquetError};
use arrow::array::{
    Array, BinaryArray, BooleanArray, Float64Array, Int32Array, Int64Array, ListArray,
    StringArray, StructArray, UInt64Array,
};
use arrow::record_batch::RecordBatch;
use std::ops::Range;

/// Look up a child column of a struct and downcast it
fn column<'a, T: 'static>(parent: &'a StructArray, name: &str) -> Result<&'a T> {
    parent
        .column_by_name(name)
        .ok_or_else(|| VParquetError::MissingColumn(name.to_string()))?
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| VParquetError::CorruptRow(format!("{} has an unexpected type", name)))
}

/// A list column and its item struct
struct Nested<'a> {
    list: &'a ListArray,
    items: &'a StructArray,
}

impl<'a> Nested<'a> {
    fn open(parent: &'a StructArray, name: &str) -> Result<Self> {
        let list = column::<ListArray>(parent, name)?;
        let items = list
            .values()
            .as_any()
            .downcast_ref::<StructArray>()
            .ok_or_else(|| VParquetError::CorruptRow(format!("{} items are not structs", name)))?;
        Ok(Self { list, items })
    }

    /// Item indices of the list at `row`
    fn range(&self, row: usize) -> Range<usize> {
        let offsets = self.list.value_offsets();
        offsets[row] as usize..offsets[row + 1] as usize
    }
}

fn opt_string(array: &StringArray, i: usize) -> Option<String> {
    if array.is_null(i) {
        None
    } else {
        Some(array.value(i).to_string())
    }
}

struct AttrColumns<'a> {
    nested: Nested<'a>,
    key: &'a StringArray,
    value: &'a StringArray,
    value_int: &'a Int64Array,
    value_double: &'a Float64Array,
    value_bool: &'a BooleanArray,
}

impl<'a> AttrColumns<'a> {
    fn open(parent: &'a StructArray, name: &str) -> Result<Self> {
        let nested = Nested::open(parent, name)?;
        let items = nested.items;
        Ok(Self {
            key: column(items, attr::KEY)?,
            value: column(items, attr::VALUE)?,
            value_int: column(items, attr::VALUE_INT)?,
            value_double: column(items, attr::VALUE_DOUBLE)?,
            value_bool: column(items, attr::VALUE_BOOL)?,
            nested,
        })
    }

    fn attributes(&self, row: usize) -> Result<Vec<Attribute>> {
        self.nested.range(row).map(|i| self.attribute(i)).collect()
    }

    fn attribute(&self, i: usize) -> Result<Attribute> {
        let key = self.key.value(i).to_string();
        let mut values = Vec::with_capacity(1);
        if !self.value.is_null(i) {
            values.push(AttributeValue::String(self.value.value(i).to_string()));
        }
        if !self.value_int.is_null(i) {
            values.push(AttributeValue::Int(self.value_int.value(i)));
        }
        if !self.value_double.is_null(i) {
            values.push(AttributeValue::Double(self.value_double.value(i)));
        }
        if !self.value_bool.is_null(i) {
            values.push(AttributeValue::Bool(self.value_bool.value(i)));
        }

        match values.len() {
            1 => Ok(Attribute {
                key,
                value: values.remove(0),
            }),
            0 => Err(VParquetError::CorruptRow(format!("attribute '{}' has no value", key))),
            n => Err(VParquetError::CorruptRow(format!(
                "attribute '{}' has {} values",
                key, n
            ))),
        }
    }
}

struct EventColumns<'a> {
    nested: Nested<'a>,
    time: &'a UInt64Array,
    name: &'a StringArray,
    attrs: Nested<'a>,
    attr_key: &'a StringArray,
    attr_value: &'a StringArray,
}

impl<'a> EventColumns<'a> {
    fn open(parent: &'a StructArray) -> Result<Self> {
        let nested = Nested::open(parent, span::EVENTS)?;
        let items = nested.items;
        let attrs = Nested::open(items, event::ATTRS)?;
        Ok(Self {
            time: column(items, event::TIME_UNIX_NANO)?,
            name: column(items, event::NAME)?,
            attr_key: column(attrs.items, attr::KEY)?,
            attr_value: column(attrs.items, attr::VALUE)?,
            attrs,
            nested,
        })
    }

    fn events(&self, row: usize) -> Vec<Event> {
        self.nested
            .range(row)
            .map(|e| Event {
                time_unix_nano: self.time.value(e),
                name: self.name.value(e).to_string(),
                attrs: self
                    .attrs
                    .range(e)
                    .map(|a| EventAttribute {
                        key: self.attr_key.value(a).to_string(),
                        value: self.attr_value.value(a).to_string(),
                    })
                    .collect(),
            })
            .collect()
    }
}

struct SpanColumns<'a> {
    nested: Nested<'a>,
    span_id: &'a BinaryArray,
    parent_span_id: &'a BinaryArray,
    name: &'a StringArray,
    kind: &'a Int32Array,
    start_time: &'a UInt64Array,
    duration: &'a UInt64Array,
    status_code: &'a Int32Array,
    status_message: &'a StringArray,
    http_method: &'a StringArray,
    http_url: &'a StringArray,
    http_status_code: &'a Int64Array,
    attrs: AttrColumns<'a>,
    events: EventColumns<'a>,
}

impl<'a> SpanColumns<'a> {
    fn open(parent: &'a StructArray) -> Result<Self> {
        let nested = Nested::open(parent, scope_spans::SPANS)?;
        let s = nested.items;
        Ok(Self {
            span_id: column(s, span::SPAN_ID)?,
            parent_span_id: column(s, span::PARENT_SPAN_ID)?,
            name: column(s, span::NAME)?,
            kind: column(s, span::KIND)?,
            start_time: column(s, span::START_TIME_UNIX_NANO)?,
            duration: column(s, span::DURATION_NANO)?,
            status_code: column(s, span::STATUS_CODE)?,
            status_message: column(s, span::STATUS_MESSAGE)?,
            http_method: column(s, span::HTTP_METHOD)?,
            http_url: column(s, span::HTTP_URL)?,
            http_status_code: column(s, span::HTTP_STATUS_CODE)?,
            attrs: AttrColumns::open(s, span::ATTRS)?,
            events: EventColumns::open(s)?,
            nested,
        })
    }

    fn spans(&self, row: usize) -> Result<Vec<Span>> {
        self.nested
            .range(row)
            .map(|i| {
                Ok(Span {
                    span_id: self.span_id.value(i).to_vec(),
                    parent_span_id: self.parent_span_id.value(i).to_vec(),
                    name: self.name.value(i).to_string(),
                    kind: self.kind.value(i),
                    start_time_unix_nano: self.start_time.value(i),
                    duration_nano: self.duration.value(i),
                    status_code: self.status_code.value(i),
                    status_message: self.status_message.value(i).to_string(),
                    http_method: opt_string(self.http_method, i),
                    http_url: opt_string(self.http_url, i),
                    http_status_code: (!self.http_status_code.is_null(i))
                        .then(|| self.http_status_code.value(i)),
                    attrs: self.attrs.attributes(i)?,
                    events: self.events.events(i),
                })
            })
            .collect()
    }
}

struct ResourceSpansColumns<'a> {
    nested: Nested<'a>,
    service_name: &'a StringArray,
    cluster: &'a StringArray,
    namespace: &'a StringArray,
    pod: &'a StringArray,
    container: &'a StringArray,
    k8s_cluster_name: &'a StringArray,
    k8s_namespace_name: &'a StringArray,
    k8s_pod_name: &'a StringArray,
    k8s_container_name: &'a StringArray,
    resource_attrs: AttrColumns<'a>,
    scope_spans: Nested<'a>,
    scope_name: &'a StringArray,
    scope_version: &'a StringArray,
    spans: SpanColumns<'a>,
}

impl<'a> ResourceSpansColumns<'a> {
    fn open(batch: &'a StructArray) -> Result<Self> {
        let nested = Nested::open(batch, trace::RESOURCE_SPANS)?;
        let res = column::<StructArray>(nested.items, resource_spans::RESOURCE)?;
        let scope_spans = Nested::open(nested.items, resource_spans::SCOPE_SPANS)?;
        let scope = column::<StructArray>(scope_spans.items, scope_spans::SCOPE)?;
        Ok(Self {
            service_name: column(res, resource::SERVICE_NAME)?,
            cluster: column(res, resource::CLUSTER)?,
            namespace: column(res, resource::NAMESPACE)?,
            pod: column(res, resource::POD)?,
            container: column(res, resource::CONTAINER)?,
            k8s_cluster_name: column(res, resource::K8S_CLUSTER_NAME)?,
            k8s_namespace_name: column(res, resource::K8S_NAMESPACE_NAME)?,
            k8s_pod_name: column(res, resource::K8S_POD_NAME)?,
            k8s_container_name: column(res, resource::K8S_CONTAINER_NAME)?,
            resource_attrs: AttrColumns::open(res, resource::ATTRS)?,
            scope_name: column(scope, scope_spans::SCOPE_NAME)?,
            scope_version: column(scope, scope_spans::SCOPE_VERSION)?,
            spans: SpanColumns::open(scope_spans.items)?,
            scope_spans,
            nested,
        })
    }

    fn resource_spans(&self, row: usize) -> Result<Vec<ResourceSpans>> {
        self.nested
            .range(row)
            .map(|r| {
                if self.service_name.is_null(r) {
                    return Err(VParquetError::CorruptRow(
                        "resource has no service name".to_string(),
                    ));
                }
                let resource = Resource {
                    service_name: self.service_name.value(r).to_string(),
                    cluster: opt_string(self.cluster, r),
                    namespace: opt_string(self.namespace, r),
                    pod: opt_string(self.pod, r),
                    container: opt_string(self.container, r),
                    k8s_cluster_name: opt_string(self.k8s_cluster_name, r),
                    k8s_namespace_name: opt_string(self.k8s_namespace_name, r),
                    k8s_pod_name: opt_string(self.k8s_pod_name, r),
                    k8s_container_name: opt_string(self.k8s_container_name, r),
                    attrs: self.resource_attrs.attributes(r)?,
                };
                let scope_spans = self
                    .scope_spans
                    .range(r)
                    .map(|s| {
                        Ok(ScopeSpans {
                            scope: InstrumentationScope {
                                name: self.scope_name.value(s).to_string(),
                                version: self.scope_version.value(s).to_string(),
                            },
                            spans: self.spans.spans(s)?,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(ResourceSpans {
                    resource,
                    scope_spans,
                })
            })
            .collect()
    }
}

/// Rebuild every trace stored in `batch`, in row order
pub fn traces_from_batch(batch: &RecordBatch) -> Result<Vec<Trace>> {
    let root = StructArray::from(batch.clone());
    let trace_id = column::<BinaryArray>(&root, trace::TRACE_ID)?;
    let start_time = column::<UInt64Array>(&root, trace::START_TIME_UNIX_NANO)?;
    let duration = column::<UInt64Array>(&root, trace::DURATION_NANO)?;
    let root_service_name = column::<StringArray>(&root, trace::ROOT_SERVICE_NAME)?;
    let root_span_name = column::<StringArray>(&root, trace::ROOT_SPAN_NAME)?;
    let rs = ResourceSpansColumns::open(&root)?;

    (0..batch.num_rows())
        .map(|row| {
            if trace_id.is_null(row) || trace_id.value(row).is_empty() {
                return Err(VParquetError::CorruptRow(format!("row {} has no trace id", row)));
            }
            Ok(Trace {
                trace_id: trace_id.value(row).to_vec(),
                start_time_unix_nano: start_time.value(row),
                duration_nano: duration.value(row),
                root_service_name: root_service_name.value(row).to_string(),
                root_span_name: root_span_name.value(row).to_string(),
                resource_spans: rs.resource_spans(row)?,
            })
        })
        .collect()
}

/// Trace ids of a batch read with only the trace id column projected
pub fn trace_ids_from_batch(batch: &RecordBatch) -> Result<&BinaryArray> {
    batch
        .column_by_name(trace::TRACE_ID)
        .ok_or_else(|| VParquetError::MissingColumn(trace::TRACE_ID.to_string()))?
        .as_any()
        .downcast_ref::<BinaryArray>()
        .ok_or_else(|| VParquetError::CorruptRow("TraceID is not a BinaryArray".to_string()))
}
