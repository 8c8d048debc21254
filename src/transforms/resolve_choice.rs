//! Resolution of ambiguous (`choice`) columns.

use crate::dataset::{Dataset, Schema};
use crate::value::{DataType, Field, Value};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// How ambiguous columns are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChoiceResolution {
    /// Replace the column with a struct holding one sub-field per observed
    /// representation, named after the representation (`long`, `string`, …).
    #[default]
    MakeStruct,
}

/// Resolve every choice column, at any depth.
///
/// A dataset without choice columns is returned as is. The returned schema
/// never contains a choice.
#[must_use]
pub fn resolve_choice(dataset: Dataset, resolution: ChoiceResolution, ctx: &str) -> Dataset {
    if !dataset.schema().contains_choice() {
        debug!(ctx, "no ambiguous columns");
        return dataset;
    }
    let ChoiceResolution::MakeStruct = resolution;

    let schema = dataset.schema();
    let resolved: Vec<Field> = schema
        .fields()
        .iter()
        .map(|f| Field::new(f.name.clone(), struct_type(&f.data_type)))
        .collect();
    let ambiguous: Vec<Field> = schema
        .fields()
        .iter()
        .filter(|f| f.data_type.contains_choice())
        .cloned()
        .collect();
    for field in &ambiguous {
        info!(ctx, field = %field.name, data_type = %field.data_type, "make_struct");
    }

    let out = dataset.update_records(Schema::new(resolved), |record| {
        for field in &ambiguous {
            if let Some(value) = record.get_mut(&field.name) {
                let taken = std::mem::take(value);
                *value = struct_value(taken, &field.data_type);
            }
        }
    });
    debug_assert!(!out.schema().contains_choice());
    out
}

fn struct_type(data_type: &DataType) -> DataType {
    match data_type {
        DataType::Choice(members) => DataType::Struct(
            members
                .iter()
                .map(|m| Field::new(m.name(), struct_type(m)))
                .collect(),
        ),
        DataType::Struct(fields) => DataType::Struct(
            fields
                .iter()
                .map(|f| Field::new(f.name.clone(), struct_type(&f.data_type)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn struct_value(value: Value, data_type: &DataType) -> Value {
    match (data_type, value) {
        (_, Value::Null) => Value::Null,
        (DataType::Choice(members), value) => {
            let observed = value.data_type();
            let mut slots: BTreeMap<String, Value> = members
                .iter()
                .map(|m| (m.name().to_string(), Value::Null))
                .collect();
            if let Some(member) = members.iter().find(|m| m.name() == observed.name()) {
                slots.insert(member.name().to_string(), struct_value(value, member));
            }
            Value::Struct(slots)
        }
        (DataType::Struct(fields), Value::Struct(mut map)) => {
            for field in fields.iter().filter(|f| f.data_type.contains_choice()) {
                if let Some(child) = map.remove(&field.name) {
                    map.insert(field.name.clone(), struct_value(child, &field.data_type));
                }
            }
            Value::Struct(map)
        }
        (_, value) => value,
    }
}
