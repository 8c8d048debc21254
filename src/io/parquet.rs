//! Parquet encoding of dynamic records.
//!
//! This module provides:
//! - [`encode_parquet`] to turn a schema plus records into one Parquet object
//! - [`decode_parquet`] to read a Parquet object back into records
//! - [`arrow_schema`] mapping [`DataType`] onto Arrow types
//!
//! Records are dynamically typed, so arrays are built column by column with
//! Arrow builders rather than through a derived serde schema. Every column is
//! nullable.

use crate::record::Record;
use crate::value::{DataType, Field, Value};
use anyhow::{Context, Result};
use arrow::array::{
    Array, ArrayRef, AsArray, BooleanBuilder, Float64Builder, Int64Builder, StringBuilder,
    StructArray,
};
use arrow::buffer::NullBuffer;
use arrow::datatypes::{
    DataType as ArrowType, Field as ArrowField, Fields, Float32Type, Float64Type, Int8Type,
    Int16Type, Int32Type, Int64Type, Schema as ArrowSchema, UInt8Type, UInt16Type, UInt32Type,
};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use arrow::util::display::array_value_to_string;
use bytes::Bytes;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::arrow_writer::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::collections::BTreeMap;
use std::sync::Arc;

static NULL: Value = Value::Null;

/// Arrow type for a column type. Ambiguous and all-null columns are written
/// as text; a struct without fields has no Parquet representation and is
/// written as text as well.
#[must_use]
pub fn arrow_type(data_type: &DataType) -> ArrowType {
    match data_type {
        DataType::Boolean => ArrowType::Boolean,
        DataType::Long => ArrowType::Int64,
        DataType::Double => ArrowType::Float64,
        DataType::Struct(fields) if !fields.is_empty() => {
            ArrowType::Struct(fields.iter().map(arrow_field).collect::<Fields>())
        }
        DataType::String | DataType::Null | DataType::Choice(_) | DataType::Struct(_) => {
            ArrowType::Utf8
        }
    }
}

fn arrow_field(field: &Field) -> ArrowField {
    ArrowField::new(&field.name, arrow_type(&field.data_type), true)
}

/// Arrow schema for an ordered field list.
#[must_use]
pub fn arrow_schema(fields: &[Field]) -> ArrowSchema {
    ArrowSchema::new(fields.iter().map(arrow_field).collect::<Vec<_>>())
}

fn build_array(data_type: &DataType, values: &[&Value]) -> Result<ArrayRef> {
    let array: ArrayRef = match data_type {
        DataType::Long => {
            let mut b = Int64Builder::with_capacity(values.len());
            for v in values {
                match v.cast(&DataType::Long) {
                    Some(Value::Long(x)) => b.append_value(x),
                    _ => b.append_null(),
                }
            }
            Arc::new(b.finish())
        }
        DataType::Double => {
            let mut b = Float64Builder::with_capacity(values.len());
            for v in values {
                match v.cast(&DataType::Double) {
                    Some(Value::Double(x)) => b.append_value(x),
                    _ => b.append_null(),
                }
            }
            Arc::new(b.finish())
        }
        DataType::Boolean => {
            let mut b = BooleanBuilder::with_capacity(values.len());
            for v in values {
                match v.cast(&DataType::Boolean) {
                    Some(Value::Boolean(x)) => b.append_value(x),
                    _ => b.append_null(),
                }
            }
            Arc::new(b.finish())
        }
        DataType::Struct(fields) if !fields.is_empty() => {
            let mut children = Vec::with_capacity(fields.len());
            for field in fields {
                let child_values: Vec<&Value> = values
                    .iter()
                    .map(|v| match v {
                        Value::Struct(map) => map.get(&field.name).unwrap_or(&NULL),
                        _ => &NULL,
                    })
                    .collect();
                children.push(build_array(&field.data_type, &child_values)?);
            }
            let validity: Vec<bool> = values
                .iter()
                .map(|v| matches!(v, Value::Struct(_)))
                .collect();
            let arrow_fields: Fields = fields.iter().map(arrow_field).collect();
            Arc::new(
                StructArray::try_new(arrow_fields, children, Some(NullBuffer::from(validity)))
                    .context("assemble struct column")?,
            )
        }
        DataType::String | DataType::Null | DataType::Choice(_) | DataType::Struct(_) => {
            let mut b = StringBuilder::with_capacity(values.len(), values.len() * 32);
            for v in values {
                if v.is_null() {
                    b.append_null();
                } else {
                    b.append_value(v.to_text());
                }
            }
            Arc::new(b.finish())
        }
    };
    Ok(array)
}

/// Build one Arrow batch holding `records` laid out by `fields`.
///
/// # Errors
/// Returns an error if Arrow rejects the assembled columns.
pub fn to_record_batch(fields: &[Field], records: &[&Record]) -> Result<RecordBatch> {
    let schema = Arc::new(arrow_schema(fields));
    let mut columns = Vec::with_capacity(fields.len());
    for field in fields {
        let values: Vec<&Value> = records.iter().map(|r| r.get(&field.name)).collect();
        columns.push(
            build_array(&field.data_type, &values)
                .with_context(|| format!("build column {}", field.name))?,
        );
    }
    let options = RecordBatchOptions::new().with_row_count(Some(records.len()));
    RecordBatch::try_new_with_options(schema, columns, &options).context("assemble RecordBatch")
}

/// Encode records as a single Parquet object.
///
/// # Errors
/// Returns an error if the batch cannot be built or the writer fails.
pub fn encode_parquet(
    fields: &[Field],
    records: &[&Record],
    compression: Compression,
) -> Result<Vec<u8>> {
    let batch = to_record_batch(fields, records)?;
    let props = WriterProperties::builder()
        .set_compression(compression)
        .build();
    let mut writer = ArrowWriter::try_new(Vec::new(), batch.schema(), Some(props))
        .context("create ArrowWriter")?;
    writer.write(&batch).context("write batch to parquet")?;
    writer.into_inner().context("close ArrowWriter")
}

/// Decode a Parquet object into records.
///
/// Every column of the file is present on every record, null cells included,
/// so callers can tell a null column from a missing one.
///
/// # Errors
/// Returns an error if the payload is not valid Parquet.
pub fn decode_parquet(data: impl Into<Bytes>) -> Result<Vec<Record>> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(data.into())
        .context("open ParquetRecordBatchReader")?;
    let reader = builder
        .with_batch_size(64 * 1024)
        .build()
        .context("build ParquetRecordBatchReader")?;

    let mut out = Vec::new();
    for batch in reader {
        let batch = batch.context("read next batch")?;
        let schema = batch.schema();
        for row in 0..batch.num_rows() {
            let record: Record = schema
                .fields()
                .iter()
                .zip(batch.columns())
                .map(|(f, col)| (f.name().clone(), cell(col.as_ref(), row)))
                .collect();
            out.push(record);
        }
    }
    Ok(out)
}

/// Column names and Arrow types stored in a Parquet object.
///
/// # Errors
/// Returns an error if the payload is not valid Parquet.
pub fn parquet_columns(data: impl Into<Bytes>) -> Result<Vec<(String, ArrowType)>> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(data.into())
        .context("open ParquetRecordBatchReader")?;
    Ok(builder
        .schema()
        .fields()
        .iter()
        .map(|f| (f.name().clone(), f.data_type().clone()))
        .collect())
}

fn cell(array: &dyn Array, row: usize) -> Value {
    if matches!(array.data_type(), ArrowType::Null) || array.is_null(row) {
        return Value::Null;
    }
    match array.data_type() {
        ArrowType::Utf8 => Value::String(array.as_string::<i32>().value(row).to_string()),
        ArrowType::LargeUtf8 => Value::String(array.as_string::<i64>().value(row).to_string()),
        ArrowType::Boolean => Value::Boolean(array.as_boolean().value(row)),
        ArrowType::Int64 => Value::Long(array.as_primitive::<Int64Type>().value(row)),
        ArrowType::Int32 => Value::Long(i64::from(array.as_primitive::<Int32Type>().value(row))),
        ArrowType::Int16 => Value::Long(i64::from(array.as_primitive::<Int16Type>().value(row))),
        ArrowType::Int8 => Value::Long(i64::from(array.as_primitive::<Int8Type>().value(row))),
        ArrowType::UInt32 => Value::Long(i64::from(array.as_primitive::<UInt32Type>().value(row))),
        ArrowType::UInt16 => Value::Long(i64::from(array.as_primitive::<UInt16Type>().value(row))),
        ArrowType::UInt8 => Value::Long(i64::from(array.as_primitive::<UInt8Type>().value(row))),
        ArrowType::Float64 => Value::Double(array.as_primitive::<Float64Type>().value(row)),
        ArrowType::Float32 => {
            Value::Double(f64::from(array.as_primitive::<Float32Type>().value(row)))
        }
        ArrowType::Struct(fields) => {
            let s = array.as_struct();
            let map: BTreeMap<String, Value> = fields
                .iter()
                .zip(s.columns())
                .map(|(f, col)| (f.name().clone(), cell(col.as_ref(), row)))
                .collect();
            Value::Struct(map)
        }
        _ => array_value_to_string(array, row).map_or(Value::Null, Value::String),
    }
}
