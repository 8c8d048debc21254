//! Record-level stages between the source read and the quality gate.
//!
//! Each stage takes a [`Dataset`](crate::dataset::Dataset) and returns a new
//! one; per-partition work runs on the rayon pool.

pub mod apply_mapping;
pub mod drop_null_fields;
pub mod resolve_choice;

pub use apply_mapping::{FieldMapping, TRENDING_MAPPINGS, apply_mapping};
pub use drop_null_fields::{drop_null_fields, null_field_paths};
pub use resolve_choice::{ChoiceResolution, resolve_choice};
