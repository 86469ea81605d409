//! Post-level fan-in aggregator
//!
//! Consumes aggregation triggers, gathers the per-image results for the
//! post from the two result streams, and emits one enriched record per
//! trigger. Per trigger the flow is: seed the media map from the trigger's
//! optional `mediaInsights`, then poll its own consumer groups on the
//! insight and face streams until either every expected media id has the
//! required service set or the deadline passes, then merge and emit.
//! Completeness never blocks emission: a timeout emits with warnings naming
//! the missing media.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::runtime::{WorkerError, WorkerRuntime};
use crate::bus::{BusError, EntryHandler, StreamConsumer, StreamEntry};
use crate::core::cli::CliConfig;
use crate::core::constants::{
    STREAM_AGGREGATION_TRIGGER, STREAM_ENRICHED, STREAM_FACES, STREAM_INSIGHTS,
};
use crate::core::WorkerConfig;
use crate::schemas::{
    is_supported_version, parse_json_list, AggregationTrigger, EnrichedPost, REQUIRED_SERVICES,
    SERVICE_CAPTIONING, SERVICE_MODERATION, SERVICE_SCENE, SERVICE_TAGGING,
};

const SERVICE_NAME: &str = "post-aggregator";
const TRIGGER_GROUP: &str = "post-aggregator-group";
const INSIGHTS_GROUP: &str = "post-aggregator-insights-group";
const FACES_GROUP: &str = "post-aggregator-faces-group";

/// Posts retained in the fan-in buffer before the oldest are evicted
const MAX_BUFFERED_POSTS: usize = 1_000;

/// Non-blocking drain reads use a short block
const DRAIN_BLOCK_MS: u64 = 100;
const DRAIN_COUNT: usize = 100;

// =============================================================================
// Event-type inference
// =============================================================================

struct EventPattern {
    name: &'static str,
    min_images: usize,
    required_tags: &'static [&'static str],
    required_scenes: &'static [&'static str],
}

/// Scored against aggregated tags (×2) and scenes (×1); a pattern is
/// disqualified when the post has fewer images than `min_images`.
const EVENT_PATTERNS: [EventPattern; 8] = [
    EventPattern {
        name: "beach_party",
        min_images: 2,
        required_tags: &["beach", "people"],
        required_scenes: &["beach", "outdoor"],
    },
    EventPattern {
        name: "wedding",
        min_images: 3,
        required_tags: &["people", "formal"],
        required_scenes: &["indoor", "outdoor"],
    },
    EventPattern {
        name: "meeting",
        min_images: 2,
        required_tags: &["people", "indoor"],
        required_scenes: &["office", "indoor"],
    },
    EventPattern {
        name: "concert",
        min_images: 2,
        required_tags: &["people", "music"],
        required_scenes: &["indoor", "outdoor"],
    },
    EventPattern {
        name: "vacation",
        min_images: 3,
        required_tags: &[],
        required_scenes: &["beach", "mountains", "outdoor"],
    },
    EventPattern {
        name: "restaurant",
        min_images: 2,
        required_tags: &["food", "people"],
        required_scenes: &["restaurant", "indoor"],
    },
    EventPattern {
        name: "outdoor_activity",
        min_images: 2,
        required_tags: &[],
        required_scenes: &["outdoor", "nature", "mountains", "forest"],
    },
    EventPattern {
        name: "indoor_gathering",
        min_images: 3,
        required_tags: &["people"],
        required_scenes: &["indoor"],
    },
];

/// Pick the highest-scoring pattern, `"general"` when nothing scores
pub fn infer_event_type(tags: &[String], scenes: &[String], media_count: usize) -> String {
    let tag_set: HashSet<String> = tags.iter().map(|t| t.to_lowercase()).collect();
    let scene_set: HashSet<String> = scenes.iter().map(|s| s.to_lowercase()).collect();

    let mut best: Option<(&'static str, usize)> = None;
    for pattern in &EVENT_PATTERNS {
        if media_count < pattern.min_images {
            continue;
        }

        let tag_hits = pattern
            .required_tags
            .iter()
            .filter(|t| tag_set.contains(**t))
            .count();
        let scene_hits = pattern
            .required_scenes
            .iter()
            .filter(|s| scene_set.contains(**s))
            .count();
        let score = tag_hits * 2 + scene_hits;

        if score > 0 && best.map(|(_, s)| score > s).unwrap_or(true) {
            best = Some((pattern.name, score));
        }
    }

    best.map(|(name, _)| name.to_string())
        .unwrap_or_else(|| "general".to_string())
}

// =============================================================================
// Fan-in state
// =============================================================================

/// Accumulated per-image insights; merged by (mediaId, service) with the
/// last value winning on duplicates.
#[derive(Debug, Clone, Default)]
pub struct MediaInsight {
    pub services: HashSet<String>,
    pub tags: Vec<String>,
    pub scenes: Vec<String>,
    pub caption: Option<String>,
    pub faces_detected: u64,
    pub is_safe: Option<bool>,
    pub moderation_confidence: Option<f64>,
}

impl MediaInsight {
    fn has_required_services(&self) -> bool {
        REQUIRED_SERVICES.iter().all(|s| self.services.contains(*s))
    }

    fn missing_services(&self) -> Vec<&'static str> {
        REQUIRED_SERVICES
            .iter()
            .filter(|s| !self.services.contains(**s))
            .copied()
            .collect()
    }
}

/// Media map preserving first-seen order so concatenated tag/scene lists
/// are deterministic.
#[derive(Debug, Default)]
pub struct MediaMap {
    order: Vec<String>,
    insights: HashMap<String, MediaInsight>,
}

impl MediaMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn entry(&mut self, media_id: &str) -> &mut MediaInsight {
        if !self.insights.contains_key(media_id) {
            self.order.push(media_id.to_string());
        }
        self.insights.entry(media_id.to_string()).or_default()
    }

    pub fn get(&self, media_id: &str) -> Option<&MediaInsight> {
        self.insights.get(media_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MediaInsight)> {
        self.order
            .iter()
            .filter_map(|id| self.insights.get(id).map(|insight| (id, insight)))
    }

    /// Merge one result-stream entry. Entries for other posts are the
    /// caller's responsibility to filter.
    pub fn apply_entry(&mut self, entry: &StreamEntry) {
        let Some(media_id) = entry.get("mediaId") else {
            return;
        };
        let media_id = media_id.to_string();
        let insight = self.entry(&media_id);

        match entry.get("service") {
            Some(SERVICE_MODERATION) => {
                insight.services.insert(SERVICE_MODERATION.to_string());
                insight.is_safe = Some(entry.get_or_empty("isSafe") == "true");
                if let Some(conf) = entry.get("moderationConfidence").and_then(|c| c.parse().ok()) {
                    insight.moderation_confidence = Some(conf);
                }
            }
            Some(SERVICE_TAGGING) => {
                insight.services.insert(SERVICE_TAGGING.to_string());
                insight.tags = entry.get("tags").map(parse_json_list).unwrap_or_default();
            }
            Some(SERVICE_SCENE) => {
                insight.services.insert(SERVICE_SCENE.to_string());
                let mut scenes = entry.get("scenes").map(parse_json_list).unwrap_or_default();
                if scenes.is_empty() {
                    if let Some(scene) = entry.get("scene") {
                        scenes = vec![scene.to_string()];
                    }
                }
                insight.scenes = scenes;
            }
            Some(SERVICE_CAPTIONING) => {
                insight.services.insert(SERVICE_CAPTIONING.to_string());
                insight.caption = entry.get("caption").map(str::to_string);
            }
            _ => {
                // Face results carry no service marker
                if let Some(count) = entry.get("facesDetected").and_then(|c| c.parse().ok()) {
                    insight.faces_detected = count;
                }
            }
        }
    }

    /// Seed from one `mediaInsights` object; services are credited for the
    /// fields present.
    pub fn apply_seed(&mut self, seed: &Value) {
        let Some(media_id) = seed
            .get("mediaId")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
        else {
            return;
        };
        let insight = self.entry(media_id);

        if let Some(tags) = seed.get("tags") {
            insight.tags = string_list(tags);
            insight.services.insert(SERVICE_TAGGING.to_string());
        }
        if let Some(scenes) = seed.get("scenes") {
            insight.scenes = string_list(scenes);
            insight.services.insert(SERVICE_SCENE.to_string());
        }
        if let Some(caption) = seed.get("caption").and_then(Value::as_str) {
            if !caption.is_empty() {
                insight.caption = Some(caption.to_string());
                insight.services.insert(SERVICE_CAPTIONING.to_string());
            }
        }
        if let Some(is_safe) = seed.get("isSafe") {
            let safe = match is_safe {
                Value::Bool(b) => Some(*b),
                Value::String(s) => Some(s == "true"),
                _ => None,
            };
            if let Some(safe) = safe {
                insight.is_safe = Some(safe);
                insight.services.insert(SERVICE_MODERATION.to_string());
            }
        }
        if let Some(conf) = seed.get("moderationConfidence").and_then(coerce_f64) {
            insight.moderation_confidence = Some(conf);
            insight.services.insert(SERVICE_MODERATION.to_string());
        }
        if let Some(faces) = seed.get("facesDetected").and_then(coerce_u64) {
            insight.faces_detected = faces;
        }
    }
}

fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Value::String(raw) => parse_json_list(raw),
        _ => Vec::new(),
    }
}

fn coerce_f64(value: &Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

fn coerce_u64(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

/// What "all results arrived" means for a trigger
#[derive(Debug, Clone)]
pub enum Expected {
    /// Every listed media id must have the required service set
    Ids(Vec<String>),
    /// At least this many media, each with the required service set
    Count(usize),
}

impl Expected {
    pub fn from_trigger(trigger: &AggregationTrigger) -> Self {
        match &trigger.all_media_ids {
            Some(ids) => Self::Ids(ids.clone()),
            None => Self::Count(trigger.total_media.unwrap_or(0)),
        }
    }

    /// Completeness: face results are optional and never block
    pub fn is_complete(&self, media_map: &MediaMap) -> bool {
        match self {
            Self::Ids(ids) => ids.iter().all(|id| {
                media_map
                    .get(id)
                    .map(MediaInsight::has_required_services)
                    .unwrap_or(false)
            }),
            Self::Count(total) => {
                media_map.len() >= *total
                    && media_map.iter().all(|(_, m)| m.has_required_services())
            }
        }
    }

    /// `(mediaId, missing services)` pairs for the timeout warning
    pub fn missing(&self, media_map: &MediaMap) -> Vec<(String, Vec<&'static str>)> {
        let mut missing = Vec::new();
        match self {
            Self::Ids(ids) => {
                for id in ids {
                    match media_map.get(id) {
                        Some(insight) if insight.has_required_services() => {}
                        Some(insight) => missing.push((id.clone(), insight.missing_services())),
                        None => missing.push((id.clone(), REQUIRED_SERVICES.to_vec())),
                    }
                }
            }
            Self::Count(_) => {
                for (id, insight) in media_map.iter() {
                    if !insight.has_required_services() {
                        missing.push((id.clone(), insight.missing_services()));
                    }
                }
            }
        }
        missing
    }
}

// =============================================================================
// Aggregate computation
// =============================================================================

/// Top-N values by frequency; ties resolve in first-seen order
fn top_by_frequency(values: &[String], top_n: usize) -> Vec<String> {
    let mut counts: Vec<(String, usize)> = Vec::new();
    for value in values {
        match counts.iter_mut().find(|(v, _)| v == value) {
            Some((_, count)) => *count += 1,
            None => counts.push((value.clone(), 1)),
        }
    }
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts.into_iter().take(top_n).map(|(v, _)| v).collect()
}

fn combined_caption(captions: &[String], tags: &[String], scenes: &[String]) -> String {
    match captions.len() {
        0 => {
            if !tags.is_empty() && !scenes.is_empty() {
                format!(
                    "A post featuring {} in a {} setting",
                    tags.iter().take(3).cloned().collect::<Vec<_>>().join(", "),
                    scenes[0]
                )
            } else if !tags.is_empty() {
                format!(
                    "A post about {}",
                    tags.iter().take(3).cloned().collect::<Vec<_>>().join(", ")
                )
            } else if !scenes.is_empty() {
                format!("A {} scene", scenes[0])
            } else {
                "A visual post".to_string()
            }
        }
        1 => captions[0].clone(),
        _ => captions.iter().take(3).cloned().collect::<Vec<_>>().join(" "),
    }
}

/// Merge the media map into one enriched record
pub fn aggregate(media_map: &MediaMap, post_id: &str, correlation_id: &str) -> EnrichedPost {
    let mut all_tags: Vec<String> = Vec::new();
    let mut all_scenes: Vec<String> = Vec::new();
    let mut captions: Vec<String> = Vec::new();
    let mut total_faces: u64 = 0;
    let mut is_safe = true;
    let mut moderation_confidence = 1.0_f64;

    for (_, insight) in media_map.iter() {
        all_tags.extend(insight.tags.iter().cloned());
        all_scenes.extend(insight.scenes.iter().cloned());
        if let Some(caption) = &insight.caption {
            if !caption.is_empty() {
                captions.push(caption.clone());
            }
        }
        total_faces += insight.faces_detected;
        if let Some(safe) = insight.is_safe {
            is_safe = is_safe && safe;
        }
        if let Some(conf) = insight.moderation_confidence {
            moderation_confidence = moderation_confidence.min(conf);
        }
    }

    let aggregated_tags = top_by_frequency(&all_tags, 10);
    let aggregated_scenes = top_by_frequency(&all_scenes, 5);
    let media_count = media_map.len();

    EnrichedPost {
        post_id: post_id.to_string(),
        media_count,
        inferred_event_type: infer_event_type(&aggregated_tags, &aggregated_scenes, media_count),
        combined_caption: combined_caption(&captions, &aggregated_tags, &aggregated_scenes),
        all_ai_tags: all_tags,
        all_ai_scenes: all_scenes,
        aggregated_tags,
        aggregated_scenes,
        total_faces,
        is_safe,
        moderation_confidence,
        correlation_id: correlation_id.to_string(),
    }
}

// =============================================================================
// Result-stream buffer
// =============================================================================

/// Drains the aggregator's dedicated groups on both result streams and
/// buffers entries per post until a trigger claims them. Everything drained
/// is acked immediately: the analysis groups own durability of the results;
/// this buffer exists only for fan-in.
struct InsightBuffer {
    insights: StreamConsumer,
    faces: StreamConsumer,
    by_post: HashMap<String, Vec<StreamEntry>>,
    post_order: VecDeque<String>,
}

impl InsightBuffer {
    fn new(insights: StreamConsumer, faces: StreamConsumer) -> Self {
        Self {
            insights,
            faces,
            by_post: HashMap::new(),
            post_order: VecDeque::new(),
        }
    }

    async fn ensure_groups(&self) -> Result<(), BusError> {
        self.insights.ensure_group().await?;
        self.faces.ensure_group().await
    }

    /// Pull whatever is currently readable from both streams
    async fn drain(&mut self) {
        let mut collected = Vec::new();
        for consumer in [&self.insights, &self.faces] {
            match consumer.read(DRAIN_BLOCK_MS, DRAIN_COUNT).await {
                Ok(entries) => {
                    for entry in entries {
                        if let Err(e) = consumer.ack(&entry.id).await {
                            tracing::warn!(id = %entry.id, error = %e, "Failed to ack buffered entry");
                        }
                        collected.push(entry);
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        stream = consumer.stream(),
                        error = %e,
                        "Failed to drain result stream"
                    );
                }
            }
        }
        for entry in collected {
            self.stash(entry);
        }
        self.evict();
    }

    fn stash(&mut self, entry: StreamEntry) {
        if !is_supported_version(&entry) {
            return;
        }
        let Some(post_id) = entry.get("postId") else {
            return;
        };
        let post_id = post_id.to_string();
        if !self.by_post.contains_key(&post_id) {
            self.post_order.push_back(post_id.clone());
        }
        self.by_post.entry(post_id).or_default().push(entry);
    }

    fn take(&mut self, post_id: &str) -> Vec<StreamEntry> {
        self.by_post.remove(post_id).unwrap_or_default()
    }

    /// Bound memory when triggers never arrive for some posts
    fn evict(&mut self) {
        while self.by_post.len() > MAX_BUFFERED_POSTS {
            let Some(oldest) = self.post_order.pop_front() else {
                break;
            };
            if self.by_post.remove(&oldest).is_some() {
                tracing::warn!(post_id = %oldest, "Evicted buffered results without a trigger");
            }
        }
    }
}

// =============================================================================
// Worker
// =============================================================================

struct AggregatorHandler {
    runtime: Arc<WorkerRuntime>,
    buffer: Mutex<InsightBuffer>,
}

impl AggregatorHandler {
    async fn process(&self, entry: &StreamEntry) -> Result<(), WorkerError> {
        let trigger = AggregationTrigger::from_entry(entry)?;

        tracing::info!(
            post_id = %trigger.post_id,
            correlation_id = %trigger.correlation_id,
            "Received aggregation trigger"
        );

        let mut media_map = MediaMap::new();
        if let Some(raw) = &trigger.media_insights {
            match serde_json::from_str::<Vec<Value>>(raw) {
                Ok(seeds) => {
                    for seed in &seeds {
                        media_map.apply_seed(seed);
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        post_id = %trigger.post_id,
                        error = %e,
                        "Ignoring malformed mediaInsights seed"
                    );
                }
            }
        }

        let expected = Expected::from_trigger(&trigger);
        let deadline = Instant::now() + self.runtime.config.aggregation.wait;
        let mut complete = false;

        loop {
            {
                let mut buffer = self.buffer.lock().await;
                buffer.drain().await;
                for result in buffer.take(&trigger.post_id) {
                    media_map.apply_entry(&result);
                }
            }

            if expected.is_complete(&media_map) {
                complete = true;
                break;
            }
            if Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(self.runtime.config.aggregation.poll_interval).await;
        }

        if !complete {
            for (media_id, services) in expected.missing(&media_map) {
                tracing::warn!(
                    post_id = %trigger.post_id,
                    media_id = %media_id,
                    missing_services = ?services,
                    "Aggregation deadline reached with incomplete results"
                );
            }
        }

        let enriched = aggregate(&media_map, &trigger.post_id, &trigger.correlation_id);

        tracing::info!(
            post_id = %trigger.post_id,
            media_count = enriched.media_count,
            event_type = %enriched.inferred_event_type,
            total_faces = enriched.total_faces,
            complete,
            "Aggregation complete"
        );

        self.runtime
            .publisher
            .append_default(STREAM_ENRICHED, &enriched.to_fields())
            .await
            .map_err(|e| WorkerError::Retryable {
                message: format!("enriched publish failed: {e}"),
                kind: "BusError",
            })?;

        Ok(())
    }
}

#[async_trait]
impl EntryHandler for AggregatorHandler {
    async fn handle(&self, entry: &StreamEntry) -> Result<(), BusError> {
        if !is_supported_version(entry) {
            tracing::warn!(id = %entry.id, "Skipping trigger with unsupported version");
            return Ok(());
        }

        self.runtime
            .process_with_retry(entry, |_| self.process(entry))
            .await;
        Ok(())
    }
}

/// Bootstrap and run the aggregator process to completion
pub async fn run_aggregator(config: WorkerConfig, cli: &CliConfig) -> anyhow::Result<()> {
    let runtime = WorkerRuntime::bootstrap(SERVICE_NAME, config, cli).await?;

    let buffer = InsightBuffer::new(
        runtime
            .bus
            .consumer(STREAM_INSIGHTS, INSIGHTS_GROUP, runtime.consumer_name.clone()),
        runtime
            .bus
            .consumer(STREAM_FACES, FACES_GROUP, runtime.consumer_name.clone()),
    );
    buffer.ensure_groups().await?;

    let consumer = runtime
        .bus
        .consumer(
            STREAM_AGGREGATION_TRIGGER,
            TRIGGER_GROUP,
            runtime.consumer_name.clone(),
        )
        .with_dead_letter_sink(runtime.dead_letter_sink());

    let handler = AggregatorHandler {
        runtime: Arc::clone(&runtime),
        buffer: Mutex::new(buffer),
    };
    runtime.run_consumer(consumer, &handler).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Fields;

    fn result_entry(fields: &[(&str, &str)]) -> StreamEntry {
        let mut map = Fields::new();
        for (k, v) in fields {
            map.insert((*k).to_string(), (*v).to_string());
        }
        StreamEntry::new("1-0", map)
    }

    fn full_media(media_map: &mut MediaMap, media_id: &str) {
        for (service, extra) in [
            (SERVICE_MODERATION, vec![("isSafe", "true"), ("moderationConfidence", "0.9")]),
            (SERVICE_TAGGING, vec![("tags", r#"["beach","people"]"#)]),
            (SERVICE_SCENE, vec![("scenes", r#"["beach","outdoor"]"#)]),
            (SERVICE_CAPTIONING, vec![("caption", "a sunny beach")]),
        ] {
            let mut fields = vec![("mediaId", media_id), ("postId", "p1"), ("service", service)];
            fields.extend(extra);
            media_map.apply_entry(&result_entry(&fields));
        }
    }

    #[test]
    fn test_apply_entry_merges_by_service() {
        let mut media_map = MediaMap::new();
        full_media(&mut media_map, "m1");

        let insight = media_map.get("m1").unwrap();
        assert!(insight.has_required_services());
        assert_eq!(insight.tags, vec!["beach", "people"]);
        assert_eq!(insight.caption.as_deref(), Some("a sunny beach"));
        assert_eq!(insight.is_safe, Some(true));
    }

    #[test]
    fn test_duplicate_results_last_wins() {
        let mut media_map = MediaMap::new();
        media_map.apply_entry(&result_entry(&[
            ("mediaId", "m1"),
            ("service", SERVICE_TAGGING),
            ("tags", r#"["old"]"#),
        ]));
        media_map.apply_entry(&result_entry(&[
            ("mediaId", "m1"),
            ("service", SERVICE_TAGGING),
            ("tags", r#"["new"]"#),
        ]));

        assert_eq!(media_map.len(), 1);
        assert_eq!(media_map.get("m1").unwrap().tags, vec!["new"]);
    }

    #[test]
    fn test_face_entry_is_optional_for_completeness() {
        let mut media_map = MediaMap::new();
        full_media(&mut media_map, "m1");
        media_map.apply_entry(&result_entry(&[
            ("mediaId", "m1"),
            ("facesDetected", "3"),
        ]));

        let expected = Expected::Ids(vec!["m1".to_string()]);
        assert!(expected.is_complete(&media_map));
        assert_eq!(media_map.get("m1").unwrap().faces_detected, 3);
    }

    #[test]
    fn test_completeness_by_ids() {
        let mut media_map = MediaMap::new();
        full_media(&mut media_map, "m1");

        let expected = Expected::Ids(vec!["m1".to_string(), "m2".to_string()]);
        assert!(!expected.is_complete(&media_map));

        full_media(&mut media_map, "m2");
        assert!(expected.is_complete(&media_map));
    }

    #[test]
    fn test_completeness_by_count() {
        let mut media_map = MediaMap::new();
        full_media(&mut media_map, "m1");

        let expected = Expected::Count(2);
        assert!(!expected.is_complete(&media_map));

        full_media(&mut media_map, "m2");
        assert!(expected.is_complete(&media_map));
    }

    #[test]
    fn test_missing_reports_media_and_services() {
        let mut media_map = MediaMap::new();
        media_map.apply_entry(&result_entry(&[
            ("mediaId", "m1"),
            ("service", SERVICE_MODERATION),
            ("isSafe", "true"),
        ]));

        let expected = Expected::Ids(vec!["m1".to_string(), "m2".to_string()]);
        let missing = expected.missing(&media_map);
        assert_eq!(missing.len(), 2);
        assert_eq!(missing[0].0, "m1");
        assert!(!missing[0].1.contains(&SERVICE_MODERATION));
        assert_eq!(missing[1].1.len(), REQUIRED_SERVICES.len());
    }

    #[test]
    fn test_aggregate_single_image() {
        let mut media_map = MediaMap::new();
        full_media(&mut media_map, "m1");
        media_map.apply_entry(&result_entry(&[("mediaId", "m1"), ("facesDetected", "2")]));

        let enriched = aggregate(&media_map, "p1", "c1");
        assert_eq!(enriched.media_count, 1);
        assert_eq!(enriched.total_faces, 2);
        assert!(enriched.is_safe);
        assert_eq!(enriched.moderation_confidence, 0.9);
        assert_eq!(enriched.combined_caption, "a sunny beach");

        let fields = enriched.to_fields();
        assert_eq!(fields.get("mediaCount").unwrap(), "1");
        assert_eq!(fields.get("hasMultipleImages").unwrap(), "false");
    }

    #[test]
    fn test_aggregate_is_safe_conjunction_and_min_confidence() {
        let mut media_map = MediaMap::new();
        media_map.apply_entry(&result_entry(&[
            ("mediaId", "m1"),
            ("service", SERVICE_MODERATION),
            ("isSafe", "true"),
            ("moderationConfidence", "0.95"),
        ]));
        media_map.apply_entry(&result_entry(&[
            ("mediaId", "m2"),
            ("service", SERVICE_MODERATION),
            ("isSafe", "false"),
            ("moderationConfidence", "0.4"),
        ]));

        let enriched = aggregate(&media_map, "p1", "");
        assert!(!enriched.is_safe);
        assert_eq!(enriched.moderation_confidence, 0.4);
    }

    #[test]
    fn test_aggregate_twice_no_double_counting() {
        let mut media_map = MediaMap::new();
        full_media(&mut media_map, "m1");
        full_media(&mut media_map, "m1");

        let enriched = aggregate(&media_map, "p1", "");
        assert_eq!(enriched.media_count, 1);
        assert_eq!(enriched.all_ai_tags, vec!["beach", "people"]);
    }

    #[test]
    fn test_top_by_frequency_order() {
        let values: Vec<String> = ["a", "b", "b", "c", "c", "c"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(top_by_frequency(&values, 2), vec!["c", "b"]);
    }

    #[test]
    fn test_top_by_frequency_tie_keeps_first_seen() {
        let values: Vec<String> = ["x", "y"].iter().map(|s| s.to_string()).collect();
        assert_eq!(top_by_frequency(&values, 2), vec!["x", "y"]);
    }

    #[test]
    fn test_event_type_beach_party() {
        let tags = vec!["beach".to_string(), "people".to_string()];
        let scenes = vec!["beach".to_string(), "outdoor".to_string()];
        assert_eq!(infer_event_type(&tags, &scenes, 2), "beach_party");
    }

    #[test]
    fn test_event_type_min_images_disqualifies() {
        let tags = vec!["beach".to_string(), "people".to_string()];
        let scenes = vec!["beach".to_string(), "outdoor".to_string()];
        // beach_party needs 2 images; with one image only patterns with
        // min_images <= 1 can score, and none do.
        assert_eq!(infer_event_type(&tags, &scenes, 1), "general");
    }

    #[test]
    fn test_event_type_general_when_nothing_matches() {
        let tags = vec!["abstract".to_string()];
        let scenes = vec!["texture".to_string()];
        assert_eq!(infer_event_type(&tags, &scenes, 5), "general");
    }

    #[test]
    fn test_event_type_scene_only_pattern() {
        let tags = Vec::new();
        let scenes = vec![
            "outdoor".to_string(),
            "nature".to_string(),
            "forest".to_string(),
        ];
        assert_eq!(infer_event_type(&tags, &scenes, 2), "outdoor_activity");
    }

    #[test]
    fn test_combined_caption_rules() {
        let tags = vec!["beach".to_string(), "people".to_string()];
        let scenes = vec!["outdoor".to_string()];

        assert_eq!(
            combined_caption(&[], &tags, &scenes),
            "A post featuring beach, people in a outdoor setting"
        );
        assert_eq!(combined_caption(&[], &tags, &[]), "A post about beach, people");
        assert_eq!(combined_caption(&[], &[], &scenes), "A outdoor scene");
        assert_eq!(combined_caption(&[], &[], &[]), "A visual post");

        let one = vec!["a single caption".to_string()];
        assert_eq!(combined_caption(&one, &tags, &scenes), "a single caption");

        let many: Vec<String> = (1..=5).map(|i| format!("c{i}")).collect();
        assert_eq!(combined_caption(&many, &tags, &scenes), "c1 c2 c3");
    }

    #[test]
    fn test_aggregate_empty_map() {
        let media_map = MediaMap::new();
        let enriched = aggregate(&media_map, "p1", "");
        assert_eq!(enriched.media_count, 0);
        assert!(enriched.is_safe);
        assert_eq!(enriched.moderation_confidence, 1.0);
        assert_eq!(enriched.inferred_event_type, "general");
        assert_eq!(enriched.combined_caption, "A visual post");
    }

    #[test]
    fn test_seed_credits_services() {
        let mut media_map = MediaMap::new();
        let seed = serde_json::json!({
            "mediaId": "m1",
            "tags": ["beach"],
            "scenes": ["outdoor"],
            "caption": "sunny",
            "isSafe": "true",
            "moderationConfidence": "0.8",
            "facesDetected": 2
        });
        media_map.apply_seed(&seed);

        let insight = media_map.get("m1").unwrap();
        assert!(insight.has_required_services());
        assert_eq!(insight.faces_detected, 2);
        assert_eq!(insight.moderation_confidence, Some(0.8));
    }

    #[test]
    fn test_seed_partial_fields_partial_services() {
        let mut media_map = MediaMap::new();
        media_map.apply_seed(&serde_json::json!({"mediaId": "m1", "tags": ["a"]}));

        let insight = media_map.get("m1").unwrap();
        assert!(insight.services.contains(SERVICE_TAGGING));
        assert!(!insight.has_required_services());
    }
}
