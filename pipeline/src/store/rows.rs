//! Dynamic row decoding
//!
//! The indexer reads whole rows from read-model tables whose exact column
//! sets vary per table, so rows are decoded dynamically into JSON objects
//! keyed by the column name. Timestamps are carried as RFC 3339 strings;
//! the search-document transform reformats them for the store.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use sqlx::postgres::PgRow;
use sqlx::{Column, Row, TypeInfo};

use super::error::StoreError;

/// Decode one row into `column name → JSON value`
pub fn row_to_json(row: &PgRow) -> Result<Map<String, Value>, StoreError> {
    let mut object = Map::new();
    for column in row.columns() {
        let name = column.name();
        let value = decode_column(row, column.ordinal(), name, column.type_info().name())?;
        object.insert(name.to_string(), value);
    }
    Ok(object)
}

fn decode_column(
    row: &PgRow,
    ordinal: usize,
    column: &str,
    type_name: &str,
) -> Result<Value, StoreError> {
    let value = match type_name {
        "BOOL" => json_opt(row.try_get::<Option<bool>, _>(ordinal)?),
        "INT2" => json_opt(row.try_get::<Option<i16>, _>(ordinal)?),
        "INT4" => json_opt(row.try_get::<Option<i32>, _>(ordinal)?),
        "INT8" => json_opt(row.try_get::<Option<i64>, _>(ordinal)?),
        "FLOAT4" => float_opt(row.try_get::<Option<f32>, _>(ordinal)?.map(f64::from)),
        "FLOAT8" => float_opt(row.try_get::<Option<f64>, _>(ordinal)?),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CHAR" => {
            json_opt(row.try_get::<Option<String>, _>(ordinal)?)
        }
        "UUID" => json_opt(
            row.try_get::<Option<sqlx::types::Uuid>, _>(ordinal)?
                .map(|u| u.to_string()),
        ),
        "JSON" | "JSONB" => row
            .try_get::<Option<Value>, _>(ordinal)?
            .unwrap_or(Value::Null),
        "TIMESTAMPTZ" => json_opt(
            row.try_get::<Option<DateTime<Utc>>, _>(ordinal)?
                .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Micros, true)),
        ),
        "TIMESTAMP" => json_opt(
            row.try_get::<Option<NaiveDateTime>, _>(ordinal)?
                .map(|ts| ts.and_utc().to_rfc3339_opts(SecondsFormat::Micros, true)),
        ),
        "TEXT[]" | "VARCHAR[]" => json_opt(row.try_get::<Option<Vec<String>>, _>(ordinal)?),
        "INT4[]" => json_opt(row.try_get::<Option<Vec<i32>>, _>(ordinal)?),
        "INT8[]" => json_opt(row.try_get::<Option<Vec<i64>>, _>(ordinal)?),
        "FLOAT4[]" => json_opt(
            row.try_get::<Option<Vec<f32>>, _>(ordinal)?
                .map(|v| v.into_iter().map(f64::from).collect::<Vec<_>>()),
        ),
        "FLOAT8[]" => json_opt(row.try_get::<Option<Vec<f64>>, _>(ordinal)?),
        other => {
            // Last resort: textual decode keeps unknown columns visible
            // instead of dropping them.
            match row.try_get::<Option<String>, _>(ordinal) {
                Ok(text) => json_opt(text),
                Err(_) => {
                    return Err(StoreError::UnsupportedColumn {
                        column: column.to_string(),
                        type_name: other.to_string(),
                    });
                }
            }
        }
    };
    Ok(value)
}

fn json_opt<T: Into<Value>>(value: Option<T>) -> Value {
    value.map(Into::into).unwrap_or(Value::Null)
}

fn float_opt(value: Option<f64>) -> Value {
    value
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
