//! Stream entry representation and Redis reply parsing
//!
//! Every entry is an opaque monotonic id plus a flat map of string fields.
//! Nested payloads (faces, tag lists, DLQ blobs) travel as JSON-encoded
//! single field values. Consumers tolerate unknown extra fields and skip
//! entries whose `version` they do not understand.

use std::collections::HashMap;

use deadpool_redis::redis::Value as RedisValue;

/// Flat field map carried by every stream entry
pub type Fields = HashMap<String, String>;

/// A single entry read from a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    /// Opaque monotonic id assigned by the bus
    pub id: String,
    /// Field/value pairs
    pub fields: Fields,
}

impl StreamEntry {
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self { id: id.into(), fields }
    }

    /// Field value by name, if present and non-empty
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str).filter(|v| !v.is_empty())
    }

    /// Field value by name, or an empty string
    pub fn get_or_empty(&self, name: &str) -> &str {
        self.get(name).unwrap_or("")
    }
}

/// Parse an XREADGROUP reply into entries.
///
/// Reply shape: `[[stream_name, [[id, [field, value, ...]], ...]], ...]`.
/// A Nil reply (block timeout) yields an empty vector. Entries whose id or
/// fields cannot be decoded are skipped.
pub fn parse_read_reply(value: RedisValue) -> Vec<StreamEntry> {
    let streams = match value {
        RedisValue::Array(arr) => arr,
        _ => return Vec::new(),
    };

    let mut entries = Vec::new();
    for stream_data in streams {
        let RedisValue::Array(parts) = stream_data else {
            continue;
        };
        if parts.len() < 2 {
            continue;
        }
        // parts[0] = stream name, parts[1] = entry array
        let RedisValue::Array(entry_list) = &parts[1] else {
            continue;
        };
        entries.extend(parse_entry_list(entry_list));
    }
    entries
}

/// Parse an XRANGE or XCLAIM reply (`[[id, [field, value, ...]], ...]`)
pub fn parse_entry_reply(value: RedisValue) -> Vec<StreamEntry> {
    match value {
        RedisValue::Array(entry_list) => parse_entry_list(&entry_list),
        _ => Vec::new(),
    }
}

fn parse_entry_list(entry_list: &[RedisValue]) -> Vec<StreamEntry> {
    let mut entries = Vec::new();
    for entry in entry_list {
        let RedisValue::Array(entry_parts) = entry else {
            continue;
        };
        if entry_parts.len() < 2 {
            continue;
        }
        let RedisValue::BulkString(id_bytes) = &entry_parts[0] else {
            continue;
        };
        let Ok(id) = String::from_utf8(id_bytes.clone()) else {
            continue;
        };
        let RedisValue::Array(field_values) = &entry_parts[1] else {
            continue;
        };
        entries.push(StreamEntry::new(id, parse_fields(field_values)));
    }
    entries
}

/// Decode `[field1, value1, field2, value2, ...]` into a field map.
///
/// Non-UTF8 values are replaced lossily; producers in this system only emit
/// UTF-8 strings.
fn parse_fields(field_values: &[RedisValue]) -> Fields {
    let mut fields = Fields::with_capacity(field_values.len() / 2);
    let mut iter = field_values.iter();
    while let (Some(name), Some(value)) = (iter.next(), iter.next()) {
        let (RedisValue::BulkString(name_bytes), RedisValue::BulkString(value_bytes)) =
            (name, value)
        else {
            continue;
        };
        fields.insert(
            String::from_utf8_lossy(name_bytes).into_owned(),
            String::from_utf8_lossy(value_bytes).into_owned(),
        );
    }
    fields
}

/// One row of an XPENDING detail reply
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub id: String,
    pub consumer: String,
    pub idle_ms: u64,
    pub delivery_count: u64,
}

/// Parse an XPENDING detail reply (`[[id, consumer, idle, deliveries], ...]`)
pub fn parse_pending_reply(value: RedisValue) -> Vec<PendingEntry> {
    let rows = match value {
        RedisValue::Array(rows) => rows,
        _ => return Vec::new(),
    };

    let mut pending = Vec::new();
    for row in rows {
        let RedisValue::Array(parts) = row else {
            continue;
        };
        if parts.len() < 4 {
            continue;
        }
        let (
            RedisValue::BulkString(id_bytes),
            RedisValue::BulkString(consumer_bytes),
            RedisValue::Int(idle),
            RedisValue::Int(deliveries),
        ) = (&parts[0], &parts[1], &parts[2], &parts[3])
        else {
            continue;
        };
        let (Ok(id), Ok(consumer)) = (
            String::from_utf8(id_bytes.clone()),
            String::from_utf8(consumer_bytes.clone()),
        ) else {
            continue;
        };
        pending.push(PendingEntry {
            id,
            consumer,
            idle_ms: (*idle).max(0) as u64,
            delivery_count: (*deliveries).max(0) as u64,
        });
    }
    pending
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(s: &str) -> RedisValue {
        RedisValue::BulkString(s.as_bytes().to_vec())
    }

    fn entry_value(id: &str, fields: &[(&str, &str)]) -> RedisValue {
        let mut fv = Vec::new();
        for (k, v) in fields {
            fv.push(bulk(k));
            fv.push(bulk(v));
        }
        RedisValue::Array(vec![bulk(id), RedisValue::Array(fv)])
    }

    #[test]
    fn test_parse_read_reply() {
        let reply = RedisValue::Array(vec![RedisValue::Array(vec![
            bulk("post-image-processing"),
            RedisValue::Array(vec![
                entry_value("1-0", &[("mediaId", "m1"), ("postId", "p1")]),
                entry_value("2-0", &[("mediaId", "m2")]),
            ]),
        ])]);

        let entries = parse_read_reply(reply);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, "1-0");
        assert_eq!(entries[0].get("mediaId"), Some("m1"));
        assert_eq!(entries[0].get("postId"), Some("p1"));
        assert_eq!(entries[1].get("postId"), None);
    }

    #[test]
    fn test_parse_read_reply_nil() {
        assert!(parse_read_reply(RedisValue::Nil).is_empty());
    }

    #[test]
    fn test_parse_entry_reply() {
        let reply = RedisValue::Array(vec![entry_value("5-1", &[("a", "1")])]);
        let entries = parse_entry_reply(reply);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "5-1");
        assert_eq!(entries[0].get("a"), Some("1"));
    }

    #[test]
    fn test_parse_entry_reply_skips_malformed() {
        let reply = RedisValue::Array(vec![
            RedisValue::Int(7),
            entry_value("5-1", &[("a", "1")]),
            RedisValue::Array(vec![bulk("id-only")]),
        ]);
        let entries = parse_entry_reply(reply);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "5-1");
    }

    #[test]
    fn test_parse_pending_reply() {
        let reply = RedisValue::Array(vec![RedisValue::Array(vec![
            bulk("9-0"),
            bulk("worker-a"),
            RedisValue::Int(301_000),
            RedisValue::Int(2),
        ])]);
        let pending = parse_pending_reply(reply);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "9-0");
        assert_eq!(pending[0].consumer, "worker-a");
        assert_eq!(pending[0].idle_ms, 301_000);
        assert_eq!(pending[0].delivery_count, 2);
    }

    #[test]
    fn test_get_or_empty() {
        let entry = StreamEntry::new("1-0", Fields::new());
        assert_eq!(entry.get_or_empty("missing"), "");
    }

    #[test]
    fn test_empty_field_treated_as_missing() {
        let mut fields = Fields::new();
        fields.insert("correlationId".into(), String::new());
        let entry = StreamEntry::new("1-0", fields);
        assert_eq!(entry.get("correlationId"), None);
    }
}
