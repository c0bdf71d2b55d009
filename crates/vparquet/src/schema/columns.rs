//! Trace → columnar mapping
//!
//! Each nesting level of a trace is an arena table: a set of column builders
//! plus an offsets vector pointing into the child table. Finishing the
//! builder turns every table into an Arrow `StructArray` and every offsets
//! vector into a `ListArray` around its child.

use super::field_paths::{attr, event, resource, resource_spans, scope_spans, span, trace, LIST_ITEM};
use super::{Attribute, AttributeValue, Trace};
use crate::error::{Result, VParquetError};
use arrow::array::{
    ArrayBuilder, ArrayRef, BinaryBuilder, BooleanBuilder, Float64Builder, Int32Builder,
    Int64Builder, ListArray, StringBuilder, StructArray, UInt64Builder,
};
use arrow::buffer::{OffsetBuffer, ScalarBuffer};
use arrow::datatypes::{DataType, Field, FieldRef, Fields, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use std::sync::{Arc, OnceLock};

fn item_field(fields: Fields) -> FieldRef {
    Arc::new(Field::new(LIST_ITEM, DataType::Struct(fields), false))
}

fn list_of(fields: Fields) -> DataType {
    DataType::List(item_field(fields))
}

fn attr_fields() -> Fields {
    Fields::from(vec![
        Field::new(attr::KEY, DataType::Utf8, false),
        Field::new(attr::VALUE, DataType::Utf8, true),
        Field::new(attr::VALUE_INT, DataType::Int64, true),
        Field::new(attr::VALUE_DOUBLE, DataType::Float64, true),
        Field::new(attr::VALUE_BOOL, DataType::Boolean, true),
    ])
}

fn event_attr_fields() -> Fields {
    Fields::from(vec![
        Field::new(attr::KEY, DataType::Utf8, false),
        Field::new(attr::VALUE, DataType::Utf8, false),
    ])
}

fn event_fields() -> Fields {
    Fields::from(vec![
        Field::new(event::TIME_UNIX_NANO, DataType::UInt64, false),
        Field::new(event::NAME, DataType::Utf8, false),
        Field::new(event::ATTRS, list_of(event_attr_fields()), false),
    ])
}

fn span_fields() -> Fields {
    Fields::from(vec![
        Field::new(span::SPAN_ID, DataType::Binary, false),
        Field::new(span::PARENT_SPAN_ID, DataType::Binary, false),
        Field::new(span::NAME, DataType::Utf8, false),
        Field::new(span::KIND, DataType::Int32, false),
        Field::new(span::START_TIME_UNIX_NANO, DataType::UInt64, false),
        Field::new(span::DURATION_NANO, DataType::UInt64, false),
        Field::new(span::STATUS_CODE, DataType::Int32, false),
        Field::new(span::STATUS_MESSAGE, DataType::Utf8, false),
        Field::new(span::HTTP_METHOD, DataType::Utf8, true),
        Field::new(span::HTTP_URL, DataType::Utf8, true),
        Field::new(span::HTTP_STATUS_CODE, DataType::Int64, true),
        Field::new(span::ATTRS, list_of(attr_fields()), false),
        Field::new(span::EVENTS, list_of(event_fields()), false),
    ])
}

fn scope_fields() -> Fields {
    Fields::from(vec![
        Field::new(scope_spans::SCOPE_NAME, DataType::Utf8, false),
        Field::new(scope_spans::SCOPE_VERSION, DataType::Utf8, false),
    ])
}

fn scope_spans_fields() -> Fields {
    Fields::from(vec![
        Field::new(scope_spans::SCOPE, DataType::Struct(scope_fields()), false),
        Field::new(scope_spans::SPANS, list_of(span_fields()), false),
    ])
}

fn resource_fields() -> Fields {
    Fields::from(vec![
        Field::new(resource::SERVICE_NAME, DataType::Utf8, false),
        Field::new(resource::CLUSTER, DataType::Utf8, true),
        Field::new(resource::NAMESPACE, DataType::Utf8, true),
        Field::new(resource::POD, DataType::Utf8, true),
        Field::new(resource::CONTAINER, DataType::Utf8, true),
        Field::new(resource::K8S_CLUSTER_NAME, DataType::Utf8, true),
        Field::new(resource::K8S_NAMESPACE_NAME, DataType::Utf8, true),
        Field::new(resource::K8S_POD_NAME, DataType::Utf8, true),
        Field::new(resource::K8S_CONTAINER_NAME, DataType::Utf8, true),
        Field::new(resource::ATTRS, list_of(attr_fields()), false),
    ])
}

fn resource_spans_fields() -> Fields {
    Fields::from(vec![
        Field::new(resource_spans::RESOURCE, DataType::Struct(resource_fields()), false),
        Field::new(resource_spans::SCOPE_SPANS, list_of(scope_spans_fields()), false),
    ])
}

/// Arrow schema of a block's data object
pub fn trace_schema() -> SchemaRef {
    static SCHEMA: OnceLock<SchemaRef> = OnceLock::new();
    SCHEMA
        .get_or_init(|| {
            Arc::new(Schema::new(vec![
                Field::new(trace::TRACE_ID, DataType::Binary, false),
                Field::new(trace::START_TIME_UNIX_NANO, DataType::UInt64, false),
                Field::new(trace::DURATION_NANO, DataType::UInt64, false),
                Field::new(trace::ROOT_SERVICE_NAME, DataType::Utf8, false),
                Field::new(trace::ROOT_SPAN_NAME, DataType::Utf8, false),
                Field::new(trace::RESOURCE_SPANS, list_of(resource_spans_fields()), false),
            ]))
        })
        .clone()
}

/// Offsets of one list level, always starting at 0
#[derive(Debug)]
struct Offsets(Vec<i32>);

impl Offsets {
    fn new() -> Self {
        Self(vec![0])
    }

    /// `child_len` must fit in an `i32`; [`TraceBatchBuilder::reserve`] checks it
    fn push(&mut self, child_len: usize) {
        self.0.push(child_len as i32);
    }

    fn finish(&mut self) -> OffsetBuffer<i32> {
        OffsetBuffer::new(ScalarBuffer::from(std::mem::replace(&mut self.0, vec![0])))
    }
}

fn list(fields: Fields, offsets: &mut Offsets, values: StructArray) -> Result<ArrayRef> {
    Ok(Arc::new(ListArray::try_new(
        item_field(fields),
        offsets.finish(),
        Arc::new(values),
        None,
    )?))
}

/// Child rows one trace adds to each nested table
#[derive(Debug, Default)]
struct NestedRows {
    resources: usize,
    resource_attrs: usize,
    scopes: usize,
    spans: usize,
    span_attrs: usize,
    events: usize,
    event_attrs: usize,
}

/// Resource or span attributes
#[derive(Debug, Default)]
struct AttrTable {
    key: StringBuilder,
    value: StringBuilder,
    value_int: Int64Builder,
    value_double: Float64Builder,
    value_bool: BooleanBuilder,
}

impl AttrTable {
    fn len(&self) -> usize {
        self.key.len()
    }

    fn append(&mut self, attribute: &Attribute) {
        self.key.append_value(&attribute.key);
        let (s, i, d, b) = match &attribute.value {
            AttributeValue::String(s) => (Some(s.as_str()), None, None, None),
            AttributeValue::Int(i) => (None, Some(*i), None, None),
            AttributeValue::Double(d) => (None, None, Some(*d), None),
            AttributeValue::Bool(b) => (None, None, None, Some(*b)),
        };
        self.value.append_option(s);
        self.value_int.append_option(i);
        self.value_double.append_option(d);
        self.value_bool.append_option(b);
    }

    fn finish(&mut self) -> Result<StructArray> {
        Ok(StructArray::try_new(
            attr_fields(),
            vec![
                Arc::new(self.key.finish()),
                Arc::new(self.value.finish()),
                Arc::new(self.value_int.finish()),
                Arc::new(self.value_double.finish()),
                Arc::new(self.value_bool.finish()),
            ],
            None,
        )?)
    }
}

/// Accumulates traces and turns them into record batches of the block schema
#[derive(Debug)]
pub struct TraceBatchBuilder {
    schema: SchemaRef,
    rows: usize,
    nested_limit: usize,

    // trace
    trace_id: BinaryBuilder,
    start_time: UInt64Builder,
    duration: UInt64Builder,
    root_service_name: StringBuilder,
    root_span_name: StringBuilder,
    rs_offsets: Offsets,

    // resource spans
    service_name: StringBuilder,
    cluster: StringBuilder,
    namespace: StringBuilder,
    pod: StringBuilder,
    container: StringBuilder,
    k8s_cluster_name: StringBuilder,
    k8s_namespace_name: StringBuilder,
    k8s_pod_name: StringBuilder,
    k8s_container_name: StringBuilder,
    resource_attr_offsets: Offsets,
    resource_attrs: AttrTable,
    ss_offsets: Offsets,

    // scope spans
    scope_name: StringBuilder,
    scope_version: StringBuilder,
    span_offsets: Offsets,

    // spans
    span_id: BinaryBuilder,
    parent_span_id: BinaryBuilder,
    span_name: StringBuilder,
    kind: Int32Builder,
    span_start_time: UInt64Builder,
    span_duration: UInt64Builder,
    status_code: Int32Builder,
    status_message: StringBuilder,
    http_method: StringBuilder,
    http_url: StringBuilder,
    http_status_code: Int64Builder,
    span_attr_offsets: Offsets,
    span_attrs: AttrTable,
    event_offsets: Offsets,

    // events
    event_time: UInt64Builder,
    event_name: StringBuilder,
    event_attr_offsets: Offsets,
    event_attr_key: StringBuilder,
    event_attr_value: StringBuilder,
}

impl Default for TraceBatchBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceBatchBuilder {
    pub fn new() -> Self {
        Self {
            schema: trace_schema(),
            rows: 0,
            nested_limit: i32::MAX as usize,
            trace_id: BinaryBuilder::new(),
            start_time: UInt64Builder::new(),
            duration: UInt64Builder::new(),
            root_service_name: StringBuilder::new(),
            root_span_name: StringBuilder::new(),
            rs_offsets: Offsets::new(),
            service_name: StringBuilder::new(),
            cluster: StringBuilder::new(),
            namespace: StringBuilder::new(),
            pod: StringBuilder::new(),
            container: StringBuilder::new(),
            k8s_cluster_name: StringBuilder::new(),
            k8s_namespace_name: StringBuilder::new(),
            k8s_pod_name: StringBuilder::new(),
            k8s_container_name: StringBuilder::new(),
            resource_attr_offsets: Offsets::new(),
            resource_attrs: AttrTable::default(),
            ss_offsets: Offsets::new(),
            scope_name: StringBuilder::new(),
            scope_version: StringBuilder::new(),
            span_offsets: Offsets::new(),
            span_id: BinaryBuilder::new(),
            parent_span_id: BinaryBuilder::new(),
            span_name: StringBuilder::new(),
            kind: Int32Builder::new(),
            span_start_time: UInt64Builder::new(),
            span_duration: UInt64Builder::new(),
            status_code: Int32Builder::new(),
            status_message: StringBuilder::new(),
            http_method: StringBuilder::new(),
            http_url: StringBuilder::new(),
            http_status_code: Int64Builder::new(),
            span_attr_offsets: Offsets::new(),
            span_attrs: AttrTable::default(),
            event_offsets: Offsets::new(),
            event_time: UInt64Builder::new(),
            event_name: StringBuilder::new(),
            event_attr_offsets: Offsets::new(),
            event_attr_key: StringBuilder::new(),
            event_attr_value: StringBuilder::new(),
        }
    }

    /// Number of traces appended since the last [`TraceBatchBuilder::finish`]
    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    #[cfg(test)]
    pub(crate) fn with_nested_limit(nested_limit: usize) -> Self {
        Self {
            nested_limit,
            ..Self::new()
        }
    }

    /// Fail unless every nested table can take the rows of `t`
    fn reserve(&self, t: &Trace) -> Result<()> {
        let mut added = NestedRows::default();
        for rs in &t.resource_spans {
            added.resources += 1;
            added.resource_attrs += rs.resource.attrs.len();
            added.scopes += rs.scope_spans.len();
            for ss in &rs.scope_spans {
                added.spans += ss.spans.len();
                for s in &ss.spans {
                    added.span_attrs += s.attrs.len();
                    added.events += s.events.len();
                    added.event_attrs += s.events.iter().map(|e| e.attrs.len()).sum::<usize>();
                }
            }
        }

        let tables = [
            ("resource", self.service_name.len(), added.resources),
            ("resource attribute", self.resource_attrs.len(), added.resource_attrs),
            ("scope", self.scope_name.len(), added.scopes),
            ("span", self.span_id.len(), added.spans),
            ("span attribute", self.span_attrs.len(), added.span_attrs),
            ("event", self.event_time.len(), added.events),
            ("event attribute", self.event_attr_key.len(), added.event_attrs),
        ];
        for (table, current, added) in tables {
            if current.saturating_add(added) > self.nested_limit {
                return Err(VParquetError::InvalidTrace(format!(
                    "{} {} rows exceed one batch ({} buffered)",
                    added, table, current
                )));
            }
        }
        Ok(())
    }

    /// Append one trace as one row.
    ///
    /// On error nothing was appended.
    pub fn append(&mut self, t: &Trace) -> Result<()> {
        self.reserve(t)?;

        for rs in &t.resource_spans {
            let res = &rs.resource;
            self.service_name.append_value(&res.service_name);
            self.cluster.append_option(res.cluster.as_deref());
            self.namespace.append_option(res.namespace.as_deref());
            self.pod.append_option(res.pod.as_deref());
            self.container.append_option(res.container.as_deref());
            self.k8s_cluster_name.append_option(res.k8s_cluster_name.as_deref());
            self.k8s_namespace_name.append_option(res.k8s_namespace_name.as_deref());
            self.k8s_pod_name.append_option(res.k8s_pod_name.as_deref());
            self.k8s_container_name.append_option(res.k8s_container_name.as_deref());
            for a in &res.attrs {
                self.resource_attrs.append(a);
            }
            self.resource_attr_offsets.push(self.resource_attrs.len());

            for ss in &rs.scope_spans {
                self.scope_name.append_value(&ss.scope.name);
                self.scope_version.append_value(&ss.scope.version);

                for s in &ss.spans {
                    self.span_id.append_value(&s.span_id);
                    self.parent_span_id.append_value(&s.parent_span_id);
                    self.span_name.append_value(&s.name);
                    self.kind.append_value(s.kind);
                    self.span_start_time.append_value(s.start_time_unix_nano);
                    self.span_duration.append_value(s.duration_nano);
                    self.status_code.append_value(s.status_code);
                    self.status_message.append_value(&s.status_message);
                    self.http_method.append_option(s.http_method.as_deref());
                    self.http_url.append_option(s.http_url.as_deref());
                    self.http_status_code.append_option(s.http_status_code);
                    for a in &s.attrs {
                        self.span_attrs.append(a);
                    }
                    self.span_attr_offsets.push(self.span_attrs.len());

                    for e in &s.events {
                        self.event_time.append_value(e.time_unix_nano);
                        self.event_name.append_value(&e.name);
                        for a in &e.attrs {
                            self.event_attr_key.append_value(&a.key);
                            self.event_attr_value.append_value(&a.value);
                        }
                        self.event_attr_offsets.push(self.event_attr_key.len());
                    }
                    self.event_offsets.push(self.event_time.len());
                }
                self.span_offsets.push(self.span_id.len());
            }
            self.ss_offsets.push(self.scope_name.len());
        }
        self.rs_offsets.push(self.service_name.len());

        self.trace_id.append_value(&t.trace_id);
        self.start_time.append_value(t.start_time_unix_nano);
        self.duration.append_value(t.duration_nano);
        self.root_service_name.append_value(&t.root_service_name);
        self.root_span_name.append_value(&t.root_span_name);
        self.rows += 1;
        Ok(())
    }

    /// Build a record batch from everything appended so far and reset
    pub fn finish(&mut self) -> Result<RecordBatch> {
        let event_attrs = StructArray::try_new(
            event_attr_fields(),
            vec![
                Arc::new(self.event_attr_key.finish()),
                Arc::new(self.event_attr_value.finish()),
            ],
            None,
        )?;
        let events = StructArray::try_new(
            event_fields(),
            vec![
                Arc::new(self.event_time.finish()),
                Arc::new(self.event_name.finish()),
                list(event_attr_fields(), &mut self.event_attr_offsets, event_attrs)?,
            ],
            None,
        )?;

        let span_attrs = self.span_attrs.finish()?;
        let spans = StructArray::try_new(
            span_fields(),
            vec![
                Arc::new(self.span_id.finish()),
                Arc::new(self.parent_span_id.finish()),
                Arc::new(self.span_name.finish()),
                Arc::new(self.kind.finish()),
                Arc::new(self.span_start_time.finish()),
                Arc::new(self.span_duration.finish()),
                Arc::new(self.status_code.finish()),
                Arc::new(self.status_message.finish()),
                Arc::new(self.http_method.finish()),
                Arc::new(self.http_url.finish()),
                Arc::new(self.http_status_code.finish()),
                list(attr_fields(), &mut self.span_attr_offsets, span_attrs)?,
                list(event_fields(), &mut self.event_offsets, events)?,
            ],
            None,
        )?;

        let scope = StructArray::try_new(
            scope_fields(),
            vec![
                Arc::new(self.scope_name.finish()),
                Arc::new(self.scope_version.finish()),
            ],
            None,
        )?;
        let scope_spans = StructArray::try_new(
            scope_spans_fields(),
            vec![
                Arc::new(scope),
                list(span_fields(), &mut self.span_offsets, spans)?,
            ],
            None,
        )?;

        let resource_attrs = self.resource_attrs.finish()?;
        let resource = StructArray::try_new(
            resource_fields(),
            vec![
                Arc::new(self.service_name.finish()),
                Arc::new(self.cluster.finish()),
                Arc::new(self.namespace.finish()),
                Arc::new(self.pod.finish()),
                Arc::new(self.container.finish()),
                Arc::new(self.k8s_cluster_name.finish()),
                Arc::new(self.k8s_namespace_name.finish()),
                Arc::new(self.k8s_pod_name.finish()),
                Arc::new(self.k8s_container_name.finish()),
                list(attr_fields(), &mut self.resource_attr_offsets, resource_attrs)?,
            ],
            None,
        )?;
        let resource_spans = StructArray::try_new(
            resource_spans_fields(),
            vec![
                Arc::new(resource),
                list(scope_spans_fields(), &mut self.ss_offsets, scope_spans)?,
            ],
            None,
        )?;

        let columns: Vec<ArrayRef> = vec![
            Arc::new(self.trace_id.finish()),
            Arc::new(self.start_time.finish()),
            Arc::new(self.duration.finish()),
            Arc::new(self.root_service_name.finish()),
            Arc::new(self.root_span_name.finish()),
            list(resource_spans_fields(), &mut self.rs_offsets, resource_spans)?,
        ];
        self.rows = 0;

        Ok(RecordBatch::try_new(self.schema.clone(), columns)?)
    }
}
