//! Field trees and JSON pruning
//!
//! Producers upstream of the sidecar may emit fields that the published
//! schema does not know yet. Pruning drops every object key that has no
//! matching field at its nesting level, so the remaining well-known fields
//! can still be encoded.
//!
//! The tree is derived from the parsed Avro schema. Records are stored once
//! in an arena and referenced by index, which keeps recursive types finite.

use super::avro::{as_record, branch_keys, AvroSchema, NamedTypes};
use apache_avro::schema::{Name, RecordSchema};
use apache_avro::Schema as AvroSchemaInner;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;

/// Nested shape of a field value that pruning can descend into
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    /// A record, by arena index
    Record(usize),
    /// A union with at least one record branch; every branch is listed
    Union(Vec<UnionBranch>),
    /// Array whose items have a nested shape
    Array(Box<Shape>),
    /// Map whose values have a nested shape
    Map(Box<Shape>),
}

/// One branch of a union
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnionBranch {
    /// Keys a wrapped value of this branch is written under
    pub names: Vec<String>,
    /// Arena index when the branch is a record
    pub record: Option<usize>,
}

/// A single record field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldNode {
    pub name: String,
    pub nested: Option<Shape>,
}

/// Ordered field lists for every record reachable from a schema
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldTree {
    records: Vec<Vec<FieldNode>>,
    root: Option<Shape>,
}

impl FieldTree {
    /// Build the field tree for a parsed schema
    pub fn from_schema(schema: &AvroSchema) -> Self {
        let mut builder = TreeBuilder {
            names: schema.names(),
            records: Vec::new(),
            index: HashMap::new(),
        };
        let root = builder.shape_of(schema.inner());

        Self {
            records: builder.records,
            root,
        }
    }

    /// Top-level field names, in schema order
    pub fn field_names(&self) -> Vec<&str> {
        match &self.root {
            Some(Shape::Record(idx)) => self.records[*idx]
                .iter()
                .map(|f| f.name.as_str())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Fields of the record at `idx`
    pub fn record(&self, idx: usize) -> &[FieldNode] {
        &self.records[idx]
    }

    pub fn root(&self) -> Option<&Shape> {
        self.root.as_ref()
    }

    /// Drop every object key that is not a schema field at its level.
    ///
    /// Values that are not objects where a record is expected are left as
    /// they are; the Avro conversion reports those.
    pub fn prune(&self, value: &mut JsonValue) {
        if let Some(shape) = &self.root {
            self.prune_shape(shape, value);
        }
    }

    /// Pruned copy of `value`
    pub fn pruned(&self, value: &JsonValue) -> JsonValue {
        let mut copy = value.clone();
        self.prune(&mut copy);
        copy
    }

    fn prune_shape(&self, shape: &Shape, value: &mut JsonValue) {
        match shape {
            Shape::Record(idx) => self.prune_record(*idx, value),
            Shape::Union(branches) => self.prune_union(branches, value),
            Shape::Array(items) => {
                if let JsonValue::Array(arr) = value {
                    for item in arr {
                        self.prune_shape(items, item);
                    }
                }
            }
            Shape::Map(values) => {
                if let JsonValue::Object(obj) = value {
                    for (_, v) in obj.iter_mut() {
                        self.prune_shape(values, v);
                    }
                }
            }
        }
    }

    fn prune_record(&self, idx: usize, value: &mut JsonValue) {
        if let JsonValue::Object(obj) = value {
            self.prune_fields(idx, obj);
        }
    }

    fn prune_fields(&self, idx: usize, obj: &mut Map<String, JsonValue>) {
        let fields = &self.records[idx];

        obj.retain(|key, _| fields.iter().any(|f| &f.name == key));

        for field in fields {
            if let (Some(nested), Some(v)) = (&field.nested, obj.get_mut(&field.name)) {
                self.prune_shape(nested, v);
            }
        }
    }

    fn prune_union(&self, branches: &[UnionBranch], value: &mut JsonValue) {
        let JsonValue::Object(obj) = value else {
            return;
        };

        // wrapped form: {"<branch name>": value}
        if obj.len() == 1 {
            if let Some((key, inner)) = obj.iter_mut().next() {
                if let Some(branch) = branches.iter().find(|b| b.names.contains(key)) {
                    if let Some(record) = branch.record {
                        self.prune_record(record, inner);
                    }
                    return;
                }
            }
        }

        // an unwrapped object is only unambiguous with a single record branch
        let mut records = branches.iter().filter_map(|b| b.record);
        if let (Some(record), None) = (records.next(), records.next()) {
            self.prune_fields(record, obj);
        }
    }
}

struct TreeBuilder<'a> {
    names: &'a NamedTypes,
    records: Vec<Vec<FieldNode>>,
    index: HashMap<Name, usize>,
}

impl TreeBuilder<'_> {
    fn shape_of(&mut self, schema: &AvroSchemaInner) -> Option<Shape> {
        match schema {
            AvroSchemaInner::Record(_) | AvroSchemaInner::Ref { .. } => {
                let record = as_record(schema, self.names)?;
                Some(Shape::Record(self.record_index(record)))
            }
            AvroSchemaInner::Union(union) => {
                let branches: Vec<UnionBranch> = union
                    .variants()
                    .iter()
                    .map(|variant| UnionBranch {
                        names: branch_keys(variant),
                        record: as_record(variant, self.names).map(|r| self.record_index(r)),
                    })
                    .collect();
                branches
                    .iter()
                    .any(|b| b.record.is_some())
                    .then_some(Shape::Union(branches))
            }
            AvroSchemaInner::Array(array) => self
                .shape_of(&array.items)
                .map(|s| Shape::Array(Box::new(s))),
            AvroSchemaInner::Map(map) => self
                .shape_of(&map.types)
                .map(|s| Shape::Map(Box::new(s))),
            _ => None,
        }
    }

    fn record_index(&mut self, record: &RecordSchema) -> usize {
        if let Some(idx) = self.index.get(&record.name) {
            return *idx;
        }

        // reserve the slot first so self references resolve to it
        let idx = self.records.len();
        self.records.push(Vec::new());
        self.index.insert(record.name.clone(), idx);

        let fields = record
            .fields
            .iter()
            .map(|field| FieldNode {
                name: field.name.clone(),
                nested: self.shape_of(&field.schema),
            })
            .collect();
        self.records[idx] = fields;
        idx
    }
}
