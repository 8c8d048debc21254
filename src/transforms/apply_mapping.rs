//! Projection of raw records onto the fixed trending schema.

use crate::dataset::{Dataset, Schema};
use crate::record::Record;
use crate::value::{DataType, Field, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, warn};

/// One `(source, source type) -> (target, target type)` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMapping {
    pub source: &'static str,
    pub source_type: DataType,
    pub target: &'static str,
    pub target_type: DataType,
}

impl FieldMapping {
    #[must_use]
    pub const fn new(
        source: &'static str,
        source_type: DataType,
        target: &'static str,
        target_type: DataType,
    ) -> Self {
        Self {
            source,
            source_type,
            target,
            target_type,
        }
    }

    /// Cast `value` through the source type into the target type.
    /// `None` means the value could not be represented.
    fn convert(&self, value: &Value) -> Option<Value> {
        value
            .cast(&self.source_type)
            .and_then(|v| v.cast(&self.target_type))
    }
}

/// The trending schema, in output column order.
pub const TRENDING_MAPPINGS: &[FieldMapping] = &[
    FieldMapping::new("video_id", DataType::String, "video_id", DataType::String),
    FieldMapping::new("trending_date", DataType::String, "trending_date", DataType::String),
    FieldMapping::new("title", DataType::String, "title", DataType::String),
    FieldMapping::new("channel_title", DataType::String, "channel_title", DataType::String),
    FieldMapping::new("category_id", DataType::Long, "category_id", DataType::Long),
    FieldMapping::new("publish_time", DataType::String, "publish_time", DataType::String),
    FieldMapping::new("tags", DataType::String, "tags", DataType::String),
    FieldMapping::new("views", DataType::Long, "views", DataType::Long),
    FieldMapping::new("likes", DataType::Long, "likes", DataType::Long),
    FieldMapping::new("dislikes", DataType::Long, "dislikes", DataType::Long),
    FieldMapping::new("comment_count", DataType::Long, "comment_count", DataType::Long),
    FieldMapping::new("thumbnail_link", DataType::String, "thumbnail_link", DataType::String),
    FieldMapping::new(
        "comments_disabled",
        DataType::Boolean,
        "comments_disabled",
        DataType::Boolean,
    ),
    FieldMapping::new("ratings_disabled", DataType::Boolean, "ratings_disabled", DataType::Boolean),
    FieldMapping::new(
        "video_error_or_removed",
        DataType::Boolean,
        "video_error_or_removed",
        DataType::Boolean,
    ),
    FieldMapping::new("description", DataType::String, "description", DataType::String),
    FieldMapping::new("region", DataType::String, "region", DataType::String),
];

/// Output schema of `mappings`.
#[must_use]
pub fn mapped_schema(mappings: &[FieldMapping]) -> Schema {
    Schema::new(
        mappings
            .iter()
            .map(|m| Field::new(m.target, m.target_type.clone()))
            .collect(),
    )
}

/// Project every record onto `mappings`.
///
/// Fields not named by a mapping are dropped; a missing source field becomes
/// null. A value that cannot be cast becomes null as well and is counted; the
/// counts are logged per target field. Every output record carries every
/// target field.
#[must_use]
pub fn apply_mapping(dataset: &Dataset, mappings: &[FieldMapping], ctx: &str) -> Dataset {
    let schema = mapped_schema(mappings);
    let failures: Vec<AtomicUsize> = mappings.iter().map(|_| AtomicUsize::new(0)).collect();

    let mapped = dataset.map_records(schema, |record| {
        mappings
            .iter()
            .zip(&failures)
            .map(|(mapping, failed)| {
                let value = mapping.convert(record.get(mapping.source)).unwrap_or_else(|| {
                    failed.fetch_add(1, Ordering::Relaxed);
                    Value::Null
                });
                (mapping.target.to_string(), value)
            })
            .collect::<Record>()
    });

    for (mapping, failed) in mappings.iter().zip(&failures) {
        let failed = failed.load(Ordering::Relaxed);
        if failed > 0 {
            warn!(
                ctx,
                field = mapping.target,
                target_type = %mapping.target_type,
                failed,
                "cast failures replaced with null"
            );
        } else {
            debug!(ctx, field = mapping.target, "mapped without cast failures");
        }
    }
    info!(
        ctx,
        rows = mapped.num_rows(),
        columns = mappings.len(),
        "applied field mapping"
    );
    mapped
}
