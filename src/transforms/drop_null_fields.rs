//! Removal of columns that are null in every record.

use crate::dataset::{Dataset, Schema};
use crate::record::Record;
use crate::value::{DataType, Field, Value};
use rayon::prelude::*;
use std::collections::BTreeMap;
use tracing::info;

/// Non-null observations below one field.
#[derive(Debug, Default)]
struct Presence {
    seen: bool,
    children: BTreeMap<String, Presence>,
}

impl Presence {
    /// Record `value`; returns whether it holds anything non-null.
    fn observe(&mut self, value: &Value) -> bool {
        let seen = match value {
            Value::Null => false,
            Value::Struct(map) => map
                .iter()
                .fold(false, |any, (k, v)| self.child(k).observe(v) | any),
            _ => true,
        };
        self.seen |= seen;
        seen
    }

    fn child(&mut self, name: &str) -> &mut Presence {
        self.children.entry(name.to_string()).or_default()
    }

    fn merge(mut self, other: Presence) -> Presence {
        self.seen |= other.seen;
        for (name, child) in other.children {
            let mine = self.children.remove(&name).unwrap_or_default();
            self.children.insert(name, mine.merge(child));
        }
        self
    }

    fn scan(partition: &[Record]) -> Presence {
        let mut root = Presence::default();
        for record in partition {
            for (name, value) in record.iter() {
                root.child(name).observe(value);
            }
        }
        root
    }
}

/// Keep the fields of `fields` that `presence` saw non-null, pruning struct
/// sub-fields the same way. Dropped paths are appended to `dropped`.
fn prune_fields(
    fields: &[Field],
    presence: &Presence,
    path: &str,
    dropped: &mut Vec<String>,
) -> Vec<Field> {
    let mut kept = Vec::with_capacity(fields.len());
    for field in fields {
        let full = if path.is_empty() {
            field.name.clone()
        } else {
            format!("{path}.{}", field.name)
        };
        match presence.children.get(&field.name) {
            Some(p) if p.seen => {
                let data_type = match &field.data_type {
                    DataType::Struct(sub) => {
                        DataType::Struct(prune_fields(sub, p, &full, dropped))
                    }
                    other => other.clone(),
                };
                kept.push(Field::new(field.name.clone(), data_type));
            }
            _ => dropped.push(full),
        }
    }
    kept
}

fn prune_value(value: &mut Value, data_type: &DataType) {
    if let (Value::Struct(map), DataType::Struct(fields)) = (value, data_type) {
        map.retain(|k, _| fields.iter().any(|f| &f.name == k));
        for field in fields {
            if let Some(child) = map.get_mut(&field.name) {
                prune_value(child, &field.data_type);
            }
        }
    }
}

fn prune(dataset: &Dataset) -> (Vec<Field>, Vec<String>) {
    let presence = dataset
        .partitions()
        .par_iter()
        .map(|part| Presence::scan(part))
        .reduce(Presence::default, Presence::merge);
    let mut dropped = Vec::new();
    let kept = prune_fields(dataset.schema().fields(), &presence, "", &mut dropped);
    (kept, dropped)
}

/// Dotted paths of the fields [`drop_null_fields`] would remove.
#[must_use]
pub fn null_field_paths(dataset: &Dataset) -> Vec<String> {
    prune(dataset).1
}

/// Remove every field, top-level or nested, whose value is null (or absent)
/// in all records. A struct left without sub-fields is removed too.
///
/// The decision is dataset-wide: a field non-null in any record of any
/// partition is kept everywhere. An empty dataset loses every field.
#[must_use]
pub fn drop_null_fields(dataset: Dataset, ctx: &str) -> Dataset {
    let (kept, dropped) = prune(&dataset);
    if dropped.is_empty() {
        info!(ctx, "no all-null fields");
        return dataset;
    }
    info!(ctx, dropped = ?dropped, remaining = kept.len(), "dropped all-null fields");

    let schema = Schema::new(kept);
    let fields = schema.fields().to_vec();
    dataset.update_records(schema, move |record| {
        let absent: Vec<String> = record
            .names()
            .filter(|n| !fields.iter().any(|f| f.name == *n))
            .map(str::to_string)
            .collect();
        for name in absent {
            record.remove(&name);
        }
        for field in &fields {
            if let Some(value) = record.get_mut(&field.name) {
                prune_value(value, &field.data_type);
            }
        }
    })
}
