use arrow::datatypes::DataType as ArrowType;
use parquet::basic::Compression;
use std::collections::BTreeMap;
use trending_etl::io::parquet::{decode_parquet, encode_parquet, parquet_columns};
use trending_etl::{DataType, Field, Record, Value};

#[test]
fn keeps_scalar_types_and_nulls() -> anyhow::Result<()> {
    let fields = vec![
        Field::new("video_id", DataType::String),
        Field::new("views", DataType::Long),
        Field::new("score", DataType::Double),
        Field::new("comments_disabled", DataType::Boolean),
    ];
    let rows = [
        Record::new()
            .with("video_id", "a")
            .with("views", 10_i64)
            .with("score", 0.5)
            .with("comments_disabled", true),
        Record::new().with("video_id", "b"),
    ];
    let refs: Vec<&Record> = rows.iter().collect();
    let body = encode_parquet(&fields, &refs, Compression::SNAPPY)?;

    assert_eq!(
        parquet_columns(body.clone())?,
        vec![
            ("video_id".to_string(), ArrowType::Utf8),
            ("views".to_string(), ArrowType::Int64),
            ("score".to_string(), ArrowType::Float64),
            ("comments_disabled".to_string(), ArrowType::Boolean),
        ]
    );

    let decoded = decode_parquet(body)?;
    assert_eq!(decoded[0], rows[0]);
    assert_eq!(decoded[1].get("views"), &Value::Null);
    // Null cells are present, not missing.
    assert!(decoded[1].contains("score"));
    Ok(())
}

#[test]
fn structs_become_nested_columns() -> anyhow::Result<()> {
    let fields = vec![Field::new(
        "category_id",
        DataType::Struct(vec![
            Field::new("long", DataType::Long),
            Field::new("string", DataType::String),
        ]),
    )];
    let both = Value::Struct(BTreeMap::from([
        ("long".to_string(), Value::Null),
        ("string".to_string(), Value::from("music")),
    ]));
    let rows = [Record::new().with("category_id", both.clone()), Record::new()];
    let refs: Vec<&Record> = rows.iter().collect();
    let decoded = decode_parquet(encode_parquet(&fields, &refs, Compression::UNCOMPRESSED)?)?;

    assert_eq!(decoded[0].get("category_id"), &both);
    assert_eq!(decoded[1].get("category_id"), &Value::Null);
    Ok(())
}

#[test]
fn ambiguous_columns_are_written_as_text() -> anyhow::Result<()> {
    let fields = vec![Field::new(
        "mixed",
        DataType::Choice(vec![DataType::Long, DataType::String]),
    )];
    let rows = [
        Record::new().with("mixed", 7_i64),
        Record::new().with("mixed", "seven"),
    ];
    let refs: Vec<&Record> = rows.iter().collect();
    let body = encode_parquet(&fields, &refs, Compression::SNAPPY)?;

    assert_eq!(parquet_columns(body.clone())?[0].1, ArrowType::Utf8);
    let decoded = decode_parquet(body)?;
    assert_eq!(decoded[0].get("mixed"), &Value::from("7"));
    assert_eq!(decoded[1].get("mixed"), &Value::from("seven"));
    Ok(())
}

#[test]
fn values_are_cast_to_the_column_type() -> anyhow::Result<()> {
    let fields = vec![Field::new("views", DataType::Long)];
    let rows = [
        Record::new().with("views", "42"),
        Record::new().with("views", "lots"),
    ];
    let refs: Vec<&Record> = rows.iter().collect();
    let decoded = decode_parquet(encode_parquet(&fields, &refs, Compression::SNAPPY)?)?;
    assert_eq!(decoded[0].get("views"), &Value::Long(42));
    assert_eq!(decoded[1].get("views"), &Value::Null);
    Ok(())
}

#[test]
fn garbage_is_not_parquet() {
    assert!(decode_parquet(b"definitely not parquet".to_vec()).is_err());
    assert!(parquet_columns(Vec::<u8>::new()).is_err());
}
