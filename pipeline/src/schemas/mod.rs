//! Typed messages over the bus wire format
//!
//! Every stream entry is a flat map of string fields; nested values (faces,
//! tag lists, DLQ blobs) are JSON-encoded single fields. Each message type
//! knows how to encode itself to fields and decode itself from a
//! [`StreamEntry`], tolerating unknown extra fields for forward
//! compatibility. Every produced entry is stamped with the current schema
//! `version`; entries carrying a version this build does not understand are
//! skipped by consumers via [`is_supported_version`].

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::bus::{Fields, StreamEntry};
use crate::core::constants::MESSAGE_VERSION;

// =============================================================================
// Service identifiers
// =============================================================================

/// `service` values carried by per-image analysis results. The aggregator
/// requires all four core services per media id before declaring a post
/// complete (face results are optional and carry no `service`).
pub const SERVICE_MODERATION: &str = "moderation";
pub const SERVICE_TAGGING: &str = "tagging";
pub const SERVICE_SCENE: &str = "scene_recognition";
pub const SERVICE_CAPTIONING: &str = "image_captioning";

/// Core services required for aggregation completeness
pub const REQUIRED_SERVICES: [&str; 4] = [
    SERVICE_MODERATION,
    SERVICE_TAGGING,
    SERVICE_SCENE,
    SERVICE_CAPTIONING,
];

/// Current wire timestamp: RFC 3339 UTC with microseconds
pub fn wire_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Whether this build understands the entry's schema version.
///
/// A missing `version` is accepted (older producers); an unrecognized one is
/// not: the consumer acks and skips such entries.
pub fn is_supported_version(entry: &StreamEntry) -> bool {
    match entry.get("version") {
        None => true,
        Some(v) => v == MESSAGE_VERSION,
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Invalid message on {stream}: {reason}")]
pub struct SchemaError {
    pub stream: &'static str,
    pub reason: String,
}

fn missing(stream: &'static str, field: &str) -> SchemaError {
    SchemaError {
        stream,
        reason: format!("missing required field '{field}'"),
    }
}

// =============================================================================
// Image job (post-image-processing)
// =============================================================================

/// Immutable job describing one uploaded image to analyze
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageJob {
    pub media_id: String,
    pub post_id: String,
    pub media_url: String,
    pub correlation_id: String,
}

impl ImageJob {
    /// Decode from an entry, requiring non-empty `mediaId` and `mediaUrl`
    pub fn from_entry(entry: &StreamEntry) -> Result<Self, SchemaError> {
        let media_id = entry
            .get("mediaId")
            .ok_or_else(|| missing("post-image-processing", "mediaId"))?;
        let media_url = entry
            .get("mediaUrl")
            .ok_or_else(|| missing("post-image-processing", "mediaUrl"))?;

        Ok(Self {
            media_id: media_id.to_string(),
            post_id: entry.get_or_empty("postId").to_string(),
            media_url: media_url.to_string(),
            correlation_id: entry.get_or_empty("correlationId").to_string(),
        })
    }

    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("mediaId".into(), self.media_id.clone());
        fields.insert("postId".into(), self.post_id.clone());
        fields.insert("mediaUrl".into(), self.media_url.clone());
        fields.insert("correlationId".into(), self.correlation_id.clone());
        fields.insert("version".into(), MESSAGE_VERSION.into());
        fields
    }
}

// =============================================================================
// Per-image analysis results (ml-insights-results)
// =============================================================================

/// Task-specific payload attached to an [`InsightResult`]
#[derive(Debug, Clone, PartialEq)]
pub enum InsightPayload {
    Moderation {
        is_safe: bool,
        confidence: f64,
        top_label: String,
    },
    Tagging {
        /// Ordered, highest score first
        tags: Vec<String>,
    },
    Scene {
        scene: String,
        confidence: f64,
        /// Labels that cleared the threshold (or top-N fallback)
        scenes: Vec<String>,
    },
    Captioning {
        caption: String,
    },
}

impl InsightPayload {
    pub fn service(&self) -> &'static str {
        match self {
            Self::Moderation { .. } => SERVICE_MODERATION,
            Self::Tagging { .. } => SERVICE_TAGGING,
            Self::Scene { .. } => SERVICE_SCENE,
            Self::Captioning { .. } => SERVICE_CAPTIONING,
        }
    }
}

/// One per-image result; duplicates are possible under retry and consumers
/// deduplicate on `(mediaId, service)`.
#[derive(Debug, Clone, PartialEq)]
pub struct InsightResult {
    pub media_id: String,
    pub post_id: String,
    pub correlation_id: String,
    pub payload: InsightPayload,
}

impl InsightResult {
    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("mediaId".into(), self.media_id.clone());
        fields.insert("postId".into(), self.post_id.clone());
        fields.insert("service".into(), self.payload.service().into());
        fields.insert("correlationId".into(), self.correlation_id.clone());
        fields.insert("timestamp".into(), wire_timestamp());
        fields.insert("version".into(), MESSAGE_VERSION.into());

        match &self.payload {
            InsightPayload::Moderation {
                is_safe,
                confidence,
                top_label,
            } => {
                fields.insert("isSafe".into(), bool_str(*is_safe).into());
                fields.insert("moderationConfidence".into(), confidence.to_string());
                fields.insert("topLabel".into(), top_label.clone());
            }
            InsightPayload::Tagging { tags } => {
                fields.insert("tags".into(), json_list(tags));
            }
            InsightPayload::Scene {
                scene,
                confidence,
                scenes,
            } => {
                fields.insert("scene".into(), scene.clone());
                fields.insert("sceneConfidence".into(), confidence.to_string());
                fields.insert("scenes".into(), json_list(scenes));
            }
            InsightPayload::Captioning { caption } => {
                fields.insert("caption".into(), caption.clone());
            }
        }

        fields
    }
}

// =============================================================================
// Face results (face-detection-results)
// =============================================================================

/// A single detected face; `embedding` is normalized to the configured
/// dimension before the message is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceRecord {
    pub face_id: String,
    #[serde(default)]
    pub bbox: Vec<i64>,
    #[serde(default)]
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FaceResultMessage {
    pub media_id: String,
    pub post_id: String,
    pub correlation_id: String,
    pub faces: Vec<FaceRecord>,
}

impl FaceResultMessage {
    pub fn to_fields(&self) -> Result<Fields, SchemaError> {
        let faces_json = serde_json::to_string(&self.faces).map_err(|e| SchemaError {
            stream: "face-detection-results",
            reason: format!("faces not serializable: {e}"),
        })?;

        let mut fields = Fields::new();
        fields.insert("mediaId".into(), self.media_id.clone());
        fields.insert("postId".into(), self.post_id.clone());
        fields.insert("correlationId".into(), self.correlation_id.clone());
        fields.insert("facesDetected".into(), self.faces.len().to_string());
        fields.insert("faces".into(), faces_json);
        fields.insert("timestamp".into(), wire_timestamp());
        fields.insert("version".into(), MESSAGE_VERSION.into());
        Ok(fields)
    }
}

// =============================================================================
// Aggregation trigger (post-aggregation-trigger)
// =============================================================================

/// Trigger telling the aggregator a post has finished ingesting.
///
/// At least one of `all_media_ids` / `total_media` must be present so the
/// aggregator can detect completeness; `media_insights` optionally seeds the
/// fan-in map.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationTrigger {
    pub post_id: String,
    pub all_media_ids: Option<Vec<String>>,
    pub total_media: Option<usize>,
    pub media_insights: Option<String>,
    pub correlation_id: String,
}

impl AggregationTrigger {
    pub fn from_entry(entry: &StreamEntry) -> Result<Self, SchemaError> {
        let post_id = entry
            .get("postId")
            .ok_or_else(|| missing("post-aggregation-trigger", "postId"))?;

        let all_media_ids = entry
            .get("allMediaIds")
            .and_then(|raw| serde_json::from_str::<Vec<String>>(raw).ok());
        let total_media = entry.get("totalMedia").and_then(|raw| raw.parse().ok());

        if all_media_ids.is_none() && total_media.is_none() {
            return Err(SchemaError {
                stream: "post-aggregation-trigger",
                reason: "neither allMediaIds nor totalMedia present".to_string(),
            });
        }

        Ok(Self {
            post_id: post_id.to_string(),
            all_media_ids,
            total_media,
            media_insights: entry.get("mediaInsights").map(str::to_string),
            correlation_id: entry.get_or_empty("correlationId").to_string(),
        })
    }

    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("postId".into(), self.post_id.clone());
        if let Some(ids) = &self.all_media_ids {
            fields.insert("allMediaIds".into(), json_list(ids));
        }
        if let Some(total) = self.total_media {
            fields.insert("totalMedia".into(), total.to_string());
        }
        if let Some(insights) = &self.media_insights {
            fields.insert("mediaInsights".into(), insights.clone());
        }
        fields.insert("correlationId".into(), self.correlation_id.clone());
        fields.insert("version".into(), MESSAGE_VERSION.into());
        fields
    }
}

// =============================================================================
// Enriched post record (post-insights-enriched)
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedPost {
    pub post_id: String,
    pub media_count: usize,
    pub all_ai_tags: Vec<String>,
    pub all_ai_scenes: Vec<String>,
    pub aggregated_tags: Vec<String>,
    pub aggregated_scenes: Vec<String>,
    pub total_faces: u64,
    pub is_safe: bool,
    pub moderation_confidence: f64,
    pub inferred_event_type: String,
    pub combined_caption: String,
    pub correlation_id: String,
}

impl EnrichedPost {
    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("postId".into(), self.post_id.clone());
        fields.insert("mediaCount".into(), self.media_count.to_string());
        fields.insert("allAiTags".into(), json_list(&self.all_ai_tags));
        fields.insert("allAiScenes".into(), json_list(&self.all_ai_scenes));
        fields.insert("aggregatedTags".into(), json_list(&self.aggregated_tags));
        fields.insert("aggregatedScenes".into(), json_list(&self.aggregated_scenes));
        fields.insert("totalFaces".into(), self.total_faces.to_string());
        fields.insert("isSafe".into(), bool_str(self.is_safe).into());
        fields.insert(
            "moderationConfidence".into(),
            self.moderation_confidence.to_string(),
        );
        fields.insert("inferredEventType".into(), self.inferred_event_type.clone());
        fields.insert("combinedCaption".into(), self.combined_caption.clone());
        fields.insert(
            "hasMultipleImages".into(),
            bool_str(self.media_count > 1).into(),
        );
        fields.insert("correlationId".into(), self.correlation_id.clone());
        fields.insert("timestamp".into(), wire_timestamp());
        fields.insert("version".into(), MESSAGE_VERSION.into());
        fields
    }
}

// =============================================================================
// Search-store sync events (es-sync-queue)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOperation {
    Index,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncEvent {
    pub index_type: String,
    pub document_id: String,
    pub operation: SyncOperation,
}

impl SyncEvent {
    pub fn from_entry(entry: &StreamEntry) -> Result<Self, SchemaError> {
        let index_type = entry
            .get("indexType")
            .ok_or_else(|| missing("es-sync-queue", "indexType"))?;
        let document_id = entry
            .get("documentId")
            .ok_or_else(|| missing("es-sync-queue", "documentId"))?;

        // Unknown operations default to index; delete must be explicit.
        let operation = match entry.get_or_empty("operation") {
            "delete" => SyncOperation::Delete,
            _ => SyncOperation::Index,
        };

        Ok(Self {
            index_type: index_type.to_string(),
            document_id: document_id.to_string(),
            operation,
        })
    }

    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("indexType".into(), self.index_type.clone());
        fields.insert("documentId".into(), self.document_id.clone());
        fields.insert(
            "operation".into(),
            match self.operation {
                SyncOperation::Index => "index".into(),
                SyncOperation::Delete => "delete".into(),
            },
        );
        fields.insert("version".into(), MESSAGE_VERSION.into());
        fields
    }
}

// =============================================================================
// Dead-letter envelope (ai-processing-dlq)
// =============================================================================

/// Envelope written by any worker when an entry exhausts its retry budget or
/// fails permanently. `original_data` is the original entry's field map as a
/// JSON object so the DLQ processor can re-emit it unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DlqEntry {
    pub original_message_id: String,
    pub original_data: String,
    pub service: String,
    pub error: String,
    pub error_type: String,
    pub retry_count: u32,
}

impl DlqEntry {
    /// Build an envelope around a failed entry
    pub fn for_entry(
        original: &StreamEntry,
        service: &str,
        error: &str,
        error_type: &str,
        retry_count: u32,
    ) -> Self {
        let original_data =
            serde_json::to_string(&original.fields).unwrap_or_else(|_| "{}".to_string());
        Self {
            original_message_id: original.id.clone(),
            original_data,
            service: service.to_string(),
            error: error.to_string(),
            error_type: error_type.to_string(),
            retry_count,
        }
    }

    pub fn from_entry(entry: &StreamEntry) -> Result<Self, SchemaError> {
        Ok(Self {
            original_message_id: entry.get_or_empty("originalMessageId").to_string(),
            original_data: entry.get_or_empty("originalData").to_string(),
            service: entry.get_or_empty("service").to_string(),
            error: entry.get_or_empty("error").to_string(),
            error_type: entry.get_or_empty("errorType").to_string(),
            retry_count: entry
                .get_or_empty("retryCount")
                .parse()
                .unwrap_or_default(),
        })
    }

    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("originalMessageId".into(), self.original_message_id.clone());
        fields.insert("originalData".into(), self.original_data.clone());
        fields.insert("service".into(), self.service.clone());
        fields.insert("error".into(), self.error.clone());
        fields.insert("errorType".into(), self.error_type.clone());
        fields.insert("retryCount".into(), self.retry_count.to_string());
        fields.insert("timestamp".into(), wire_timestamp());
        fields.insert("version".into(), MESSAGE_VERSION.into());
        fields
    }

    /// Decode the original entry's field map for re-emission
    pub fn original_fields(&self) -> Option<Fields> {
        serde_json::from_str(&self.original_data).ok()
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn bool_str(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

fn json_list(values: &[String]) -> String {
    serde_json::to_string(values).unwrap_or_else(|_| "[]".to_string())
}

/// Parse a JSON-encoded string list field, tolerating absence
pub fn parse_json_list(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_with(fields: &[(&str, &str)]) -> StreamEntry {
        let mut map = Fields::new();
        for (k, v) in fields {
            map.insert((*k).to_string(), (*v).to_string());
        }
        StreamEntry::new("1-0", map)
    }

    #[test]
    fn test_image_job_roundtrip() {
        let job = ImageJob {
            media_id: "m1".into(),
            post_id: "p1".into(),
            media_url: "https://res.cloudinary.com/x/a.jpg".into(),
            correlation_id: "c1".into(),
        };
        let entry = StreamEntry::new("1-0", job.to_fields());
        let decoded = ImageJob::from_entry(&entry).unwrap();
        assert_eq!(decoded, job);
    }

    #[test]
    fn test_image_job_requires_media_fields() {
        let entry = entry_with(&[("postId", "p1"), ("mediaUrl", "https://x/a.jpg")]);
        assert!(ImageJob::from_entry(&entry).is_err());

        let entry = entry_with(&[("mediaId", "m1"), ("postId", "p1")]);
        assert!(ImageJob::from_entry(&entry).is_err());
    }

    #[test]
    fn test_image_job_tolerates_extra_fields() {
        let entry = entry_with(&[
            ("mediaId", "m1"),
            ("mediaUrl", "https://x/a.jpg"),
            ("dlqRetry", "true"),
            ("someFutureField", "whatever"),
        ]);
        assert!(ImageJob::from_entry(&entry).is_ok());
    }

    #[test]
    fn test_version_gate() {
        let current = entry_with(&[("version", MESSAGE_VERSION)]);
        assert!(is_supported_version(&current));

        let old_producer = entry_with(&[("mediaId", "m1")]);
        assert!(is_supported_version(&old_producer));

        let future = entry_with(&[("version", "99")]);
        assert!(!is_supported_version(&future));
    }

    #[test]
    fn test_insight_result_fields() {
        let result = InsightResult {
            media_id: "m1".into(),
            post_id: "p1".into(),
            correlation_id: "c1".into(),
            payload: InsightPayload::Moderation {
                is_safe: true,
                confidence: 0.97,
                top_label: "safe content".into(),
            },
        };
        let fields = result.to_fields();
        assert_eq!(fields.get("service").unwrap(), "moderation");
        assert_eq!(fields.get("isSafe").unwrap(), "true");
        assert_eq!(fields.get("moderationConfidence").unwrap(), "0.97");
        assert!(fields.contains_key("timestamp"));
        assert_eq!(fields.get("version").unwrap(), MESSAGE_VERSION);
    }

    #[test]
    fn test_tagging_fields_json() {
        let result = InsightResult {
            media_id: "m1".into(),
            post_id: "p1".into(),
            correlation_id: String::new(),
            payload: InsightPayload::Tagging {
                tags: vec!["beach".into(), "people".into()],
            },
        };
        let fields = result.to_fields();
        assert_eq!(fields.get("service").unwrap(), "tagging");
        assert_eq!(fields.get("tags").unwrap(), r#"["beach","people"]"#);
    }

    #[test]
    fn test_face_message_roundtrip() {
        let message = FaceResultMessage {
            media_id: "m1".into(),
            post_id: "p1".into(),
            correlation_id: "c1".into(),
            faces: vec![FaceRecord {
                face_id: "f1".into(),
                bbox: vec![1, 2, 3, 4],
                embedding: vec![0.5; 8],
                confidence: 0.9,
            }],
        };
        let fields = message.to_fields().unwrap();
        assert_eq!(fields.get("facesDetected").unwrap(), "1");

        let faces: Vec<FaceRecord> =
            serde_json::from_str(fields.get("faces").unwrap()).unwrap();
        assert_eq!(faces, message.faces);
    }

    #[test]
    fn test_trigger_requires_completeness_hint() {
        let entry = entry_with(&[("postId", "p1")]);
        assert!(AggregationTrigger::from_entry(&entry).is_err());

        let entry = entry_with(&[("postId", "p1"), ("totalMedia", "3")]);
        let trigger = AggregationTrigger::from_entry(&entry).unwrap();
        assert_eq!(trigger.total_media, Some(3));
        assert!(trigger.all_media_ids.is_none());

        let entry = entry_with(&[("postId", "p1"), ("allMediaIds", r#"["m1","m2"]"#)]);
        let trigger = AggregationTrigger::from_entry(&entry).unwrap();
        assert_eq!(
            trigger.all_media_ids,
            Some(vec!["m1".to_string(), "m2".to_string()])
        );
    }

    #[test]
    fn test_sync_event_roundtrip() {
        let event = SyncEvent {
            index_type: "media_search".into(),
            document_id: "42".into(),
            operation: SyncOperation::Delete,
        };
        let entry = StreamEntry::new("1-0", event.to_fields());
        assert_eq!(SyncEvent::from_entry(&entry).unwrap(), event);
    }

    #[test]
    fn test_sync_event_unknown_operation_defaults_to_index() {
        let entry = entry_with(&[
            ("indexType", "post_search"),
            ("documentId", "7"),
            ("operation", "upsert"),
        ]);
        let event = SyncEvent::from_entry(&entry).unwrap();
        assert_eq!(event.operation, SyncOperation::Index);
    }

    #[test]
    fn test_dlq_roundtrip_preserves_original() {
        let original = entry_with(&[
            ("mediaId", "m1"),
            ("mediaUrl", "https://x/a.jpg"),
            ("correlationId", "c1"),
        ]);
        let envelope = DlqEntry::for_entry(&original, "content-moderation", "503", "HttpStatus", 3);
        let fields = envelope.to_fields();
        assert_eq!(fields.get("retryCount").unwrap(), "3");
        assert_eq!(fields.get("service").unwrap(), "content-moderation");

        let decoded = DlqEntry::from_entry(&StreamEntry::new("9-0", fields)).unwrap();
        let recovered = decoded.original_fields().unwrap();
        assert_eq!(recovered, original.fields);
    }

    #[test]
    fn test_enriched_post_fields() {
        let record = EnrichedPost {
            post_id: "p1".into(),
            media_count: 1,
            all_ai_tags: vec!["beach".into()],
            all_ai_scenes: vec!["outdoor".into()],
            aggregated_tags: vec!["beach".into()],
            aggregated_scenes: vec!["outdoor".into()],
            total_faces: 2,
            is_safe: true,
            moderation_confidence: 0.91,
            inferred_event_type: "general".into(),
            combined_caption: "A beach scene".into(),
            correlation_id: "c1".into(),
        };
        let fields = record.to_fields();
        assert_eq!(fields.get("mediaCount").unwrap(), "1");
        assert_eq!(fields.get("hasMultipleImages").unwrap(), "false");
        assert_eq!(fields.get("totalFaces").unwrap(), "2");
    }
}
