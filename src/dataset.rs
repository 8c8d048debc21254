//! Immutable, partitioned collections of [`Record`]s.
//!
//! A [`Dataset`] pairs an ordered [`Schema`] with its rows split into
//! partitions. Partitions model physical fragmentation: the source reader
//! produces one per object, the stages transform partitions independently
//! and in parallel, and [`Dataset::coalesce`] merges them before the write.
//!
//! Every stage consumes a dataset and returns a new one.

use crate::record::Record;
use crate::value::{DataType, Field};
use rayon::prelude::*;

/// Ordered list of top-level fields.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    #[must_use]
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// True if any column, at any depth, is still ambiguous.
    #[must_use]
    pub fn contains_choice(&self) -> bool {
        self.fields.iter().any(|f| f.data_type.contains_choice())
    }

    /// Infer a schema by merging the observed type of every cell.
    ///
    /// Field order is first appearance across partitions (in partition
    /// order), so the result does not depend on the thread schedule.
    #[must_use]
    pub fn infer(partitions: &[Vec<Record>]) -> Self {
        let fields = partitions
            .par_iter()
            .map(|part| {
                part.iter().fold(Vec::new(), |acc, rec| {
                    let observed = rec
                        .iter()
                        .map(|(k, v)| Field::new(k, v.data_type()))
                        .collect();
                    merge_schema_fields(acc, observed)
                })
            })
            .reduce(Vec::new, merge_schema_fields);
        Self { fields }
    }
}

fn merge_schema_fields(left: Vec<Field>, right: Vec<Field>) -> Vec<Field> {
    match DataType::Struct(left).merge(DataType::Struct(right)) {
        DataType::Struct(fields) => fields,
        // Struct ⊔ Struct is always a struct; keep the compiler happy.
        _ => Vec::new(),
    }
}

/// A schema plus partitioned rows.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    schema: Schema,
    partitions: Vec<Vec<Record>>,
}

impl Dataset {
    #[must_use]
    pub fn new(schema: Schema, partitions: Vec<Vec<Record>>) -> Self {
        Self { schema, partitions }
    }

    /// Build a dataset and infer its schema from the data.
    #[must_use]
    pub fn from_partitions(partitions: Vec<Vec<Record>>) -> Self {
        let schema = Schema::infer(&partitions);
        Self { schema, partitions }
    }

    /// Single-partition convenience constructor.
    #[must_use]
    pub fn from_records(records: Vec<Record>) -> Self {
        Self::from_partitions(vec![records])
    }

    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    #[must_use]
    pub fn partitions(&self) -> &[Vec<Record>] {
        &self.partitions
    }

    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.partitions.iter().map(Vec::len).sum()
    }

    #[must_use]
    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.partitions.iter().flatten()
    }

    /// Values of one column across all rows (absent reads as null).
    pub fn column_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a crate::Value> {
        self.records().map(move |r| r.get(name))
    }

    /// Apply `f` to every record, partition-parallel, producing a dataset with
    /// the given output schema. Partitioning is preserved.
    #[must_use]
    pub fn map_records<F>(&self, schema: Schema, f: F) -> Dataset
    where
        F: Fn(&Record) -> Record + Send + Sync,
    {
        let partitions = self
            .partitions
            .par_iter()
            .map(|part| part.iter().map(&f).collect())
            .collect();
        Dataset { schema, partitions }
    }

    /// Consume the dataset, mutating each record in place, partition-parallel.
    #[must_use]
    pub fn update_records<F>(self, schema: Schema, f: F) -> Dataset
    where
        F: Fn(&mut Record) + Send + Sync,
    {
        let mut partitions = self.partitions;
        partitions
            .par_iter_mut()
            .for_each(|part| part.iter_mut().for_each(&f));
        Dataset { schema, partitions }
    }

    /// Merge partitions down to at most `units` (minimum 1).
    ///
    /// Contiguous partitions are concatenated, so the relative order of rows
    /// is kept. A dataset that already has `units` or fewer partitions is
    /// returned unchanged; an empty dataset coalesces to one empty partition.
    #[must_use]
    pub fn coalesce(self, units: usize) -> Dataset {
        let units = units.max(1);
        if self.partitions.is_empty() {
            return Dataset {
                schema: self.schema,
                partitions: vec![Vec::new()],
            };
        }
        if self.partitions.len() <= units {
            return self;
        }
        let per_unit = self.partitions.len().div_ceil(units);
        let mut merged: Vec<Vec<Record>> = Vec::with_capacity(units);
        let mut current: Vec<Record> = Vec::new();
        for (i, part) in self.partitions.into_iter().enumerate() {
            current.extend(part);
            if (i + 1) % per_unit == 0 {
                merged.push(std::mem::take(&mut current));
            }
        }
        if !current.is_empty() || merged.is_empty() {
            merged.push(current);
        }
        Dataset {
            schema: self.schema,
            partitions: merged,
        }
    }
}
