//! Read-model row → search document transform
//!
//! Rules:
//! - snake_case column names become camelCase document keys
//! - arrays pass through unchanged
//! - `created_at`/`updated_at`/`last_modified_at`/`processed_at` become
//!   `YYYY-MM-DDTHH:MM:SS.ffffff` UTC without a trailing `Z`
//! - embedding columns arrive either as arrays or JSON-encoded strings and
//!   always leave as arrays
//! - `bbox` elements are coerced to integers, decoding a JSON-encoded
//!   string first when necessary

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};

/// Columns reformatted into the search-store timestamp form
const TIMESTAMP_COLUMNS: [&str; 4] = [
    "created_at",
    "updated_at",
    "last_modified_at",
    "processed_at",
];

/// Convert a snake_case column name to camelCase
pub fn snake_to_camel(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;
    for ch in name.chars() {
        if ch == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(ch.to_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}

/// `YYYY-MM-DDTHH:MM:SS.ffffff`, UTC, no trailing `Z`
pub fn format_timestamp(raw: &str) -> Option<String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(
            ts.with_timezone(&Utc)
                .format("%Y-%m-%dT%H:%M:%S%.6f")
                .to_string(),
        );
    }
    // Naive timestamps are taken as UTC
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|ts| ts.format("%Y-%m-%dT%H:%M:%S%.6f").to_string())
}

fn is_embedding_column(name: &str) -> bool {
    name.contains("embedding")
}

fn parse_embedding(value: &Value) -> Value {
    match value {
        Value::String(raw) => serde_json::from_str::<Value>(raw)
            .ok()
            .filter(Value::is_array)
            .unwrap_or(Value::Null),
        Value::Array(_) => value.clone(),
        _ => Value::Null,
    }
}

fn coerce_bbox(value: &Value) -> Value {
    let elements = match value {
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Array(items)) => items,
            _ => return Value::Null,
        },
        Value::Array(items) => items.clone(),
        _ => return Value::Null,
    };

    Value::Array(
        elements
            .iter()
            .filter_map(|v| {
                v.as_i64()
                    .or_else(|| v.as_f64().map(|f| f.round() as i64))
                    .or_else(|| v.as_str().and_then(|s| s.parse::<f64>().ok()).map(|f| f.round() as i64))
            })
            .map(Value::from)
            .collect(),
    )
}

/// Transform one decoded row into the search document
pub fn transform_row(row: &Map<String, Value>) -> Map<String, Value> {
    let mut document = Map::new();
    for (column, value) in row {
        let key = snake_to_camel(column);

        let transformed = if TIMESTAMP_COLUMNS.contains(&column.as_str()) {
            match value.as_str().and_then(format_timestamp) {
                Some(formatted) => Value::String(formatted),
                None => value.clone(),
            }
        } else if is_embedding_column(column) {
            parse_embedding(value)
        } else if column == "bbox" {
            coerce_bbox(value)
        } else {
            value.clone()
        };

        document.insert(key, transformed);
    }
    document
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(entries: &[(&str, Value)]) -> Map<String, Value> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_snake_to_camel() {
        assert_eq!(snake_to_camel("media_id"), "mediaId");
        assert_eq!(snake_to_camel("last_modified_at"), "lastModifiedAt");
        assert_eq!(snake_to_camel("bbox"), "bbox");
        assert_eq!(snake_to_camel("face_embedding"), "faceEmbedding");
    }

    #[test]
    fn test_timestamp_no_trailing_z() {
        let formatted = format_timestamp("2024-03-01T12:30:45.123456+00:00").unwrap();
        assert_eq!(formatted, "2024-03-01T12:30:45.123456");
        assert!(!formatted.ends_with('Z'));
    }

    #[test]
    fn test_timestamp_offset_converted_to_utc() {
        let formatted = format_timestamp("2024-03-01T12:30:45+05:00").unwrap();
        assert_eq!(formatted, "2024-03-01T07:30:45.000000");
    }

    #[test]
    fn test_timestamp_naive_accepted() {
        let formatted = format_timestamp("2024-03-01T12:30:45.5").unwrap();
        assert_eq!(formatted, "2024-03-01T12:30:45.500000");
    }

    #[test]
    fn test_transform_keys_and_timestamps() {
        let document = transform_row(&row(&[
            ("media_id", json!(42)),
            ("created_at", json!("2024-03-01T12:30:45.123456Z")),
            ("ai_tags", json!(["beach", "people"])),
        ]));

        assert_eq!(document["mediaId"], json!(42));
        assert_eq!(document["createdAt"], json!("2024-03-01T12:30:45.123456"));
        assert_eq!(document["aiTags"], json!(["beach", "people"]));
        assert!(!document.contains_key("media_id"));
    }

    #[test]
    fn test_embedding_string_parsed() {
        let document = transform_row(&row(&[
            ("face_embedding", json!("[0.1, 0.2, 0.3]")),
            ("image_embedding", json!([0.4, 0.5])),
        ]));
        assert_eq!(document["faceEmbedding"], json!([0.1, 0.2, 0.3]));
        assert_eq!(document["imageEmbedding"], json!([0.4, 0.5]));
    }

    #[test]
    fn test_embedding_garbage_becomes_null() {
        let document = transform_row(&row(&[("embedding", json!("not json"))]));
        assert_eq!(document["embedding"], Value::Null);
    }

    #[test]
    fn test_bbox_coercion() {
        let document = transform_row(&row(&[("bbox", json!([1.6, "2", 3]))]));
        assert_eq!(document["bbox"], json!([2, 2, 3]));
    }

    #[test]
    fn test_bbox_json_string_decoded() {
        let document = transform_row(&row(&[("bbox", json!("[10.2, 20, 30, 40]"))]));
        assert_eq!(document["bbox"], json!([10, 20, 30, 40]));
    }

    #[test]
    fn test_repeat_transform_identical() {
        let source = row(&[
            ("media_id", json!(7)),
            ("created_at", json!("2024-03-01T12:30:45Z")),
            ("face_embedding", json!("[0.1]")),
            ("bbox", json!([1, 2, 3, 4])),
        ]);
        assert_eq!(transform_row(&source), transform_row(&source));
    }
}
