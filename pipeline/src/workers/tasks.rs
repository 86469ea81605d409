//! The five analysis tasks
//!
//! Each task wraps one provider interface and shapes its outcome into the
//! result entry for the appropriate stream. Moderation, tagging, scene, and
//! captioning publish to the insights stream with a `service` marker; face
//! detection publishes to its own stream.

use std::sync::Arc;

use async_trait::async_trait;

use super::analysis::AnalysisTask;
use super::runtime::WorkerError;
use crate::bus::Fields;
use crate::core::constants::{STREAM_FACES, STREAM_INSIGHTS};
use crate::providers::{
    CaptioningProvider, FaceProvider, ModerationProvider, ProviderRegistry, SceneProvider,
    TaggingProvider,
};
use crate::schemas::{FaceResultMessage, ImageJob, InsightPayload, InsightResult};

/// Tags returned per image
const TAG_TOP_N: usize = 5;
/// Minimum tag score
const TAG_THRESHOLD: f64 = 0.01;
/// Minimum scene score
const SCENE_THRESHOLD: f64 = 0.005;
/// Scenes returned when nothing clears the threshold
const SCENE_FALLBACK_TOP_N: usize = 3;

fn insight_fields(job: &ImageJob, payload: InsightPayload) -> Fields {
    InsightResult {
        media_id: job.media_id.clone(),
        post_id: job.post_id.clone(),
        correlation_id: job.correlation_id.clone(),
        payload,
    }
    .to_fields()
}

// =============================================================================
// Moderation
// =============================================================================

pub struct ModerationTask {
    provider: Arc<dyn ModerationProvider>,
}

impl ModerationTask {
    pub fn from_registry(registry: &ProviderRegistry) -> Result<Self, WorkerError> {
        Ok(Self {
            provider: registry.moderation(None)?,
        })
    }
}

#[async_trait]
impl AnalysisTask for ModerationTask {
    fn service(&self) -> &'static str {
        "content-moderation"
    }

    fn group(&self) -> &'static str {
        "content-moderation-group"
    }

    fn output_stream(&self) -> &'static str {
        STREAM_INSIGHTS
    }

    async fn analyze(&self, image: &[u8], job: &ImageJob) -> Result<Fields, WorkerError> {
        let outcome = self.provider.analyze(image).await?;
        tracing::info!(
            media_id = %job.media_id,
            is_safe = outcome.is_safe,
            top_label = %outcome.top_label,
            "Moderation complete"
        );
        Ok(insight_fields(
            job,
            InsightPayload::Moderation {
                is_safe: outcome.is_safe,
                confidence: outcome.confidence,
                top_label: outcome.top_label,
            },
        ))
    }
}

// =============================================================================
// Tagging
// =============================================================================

pub struct TaggingTask {
    provider: Arc<dyn TaggingProvider>,
}

impl TaggingTask {
    pub fn from_registry(registry: &ProviderRegistry) -> Result<Self, WorkerError> {
        Ok(Self {
            provider: registry.tagging(None)?,
        })
    }
}

#[async_trait]
impl AnalysisTask for TaggingTask {
    fn service(&self) -> &'static str {
        "image-tagger"
    }

    fn group(&self) -> &'static str {
        "image-tagger-group"
    }

    fn output_stream(&self) -> &'static str {
        STREAM_INSIGHTS
    }

    async fn analyze(&self, image: &[u8], job: &ImageJob) -> Result<Fields, WorkerError> {
        let outcome = self.provider.tag(image, TAG_TOP_N, TAG_THRESHOLD).await?;
        tracing::info!(
            media_id = %job.media_id,
            tag_count = outcome.tags.len(),
            "Tagging complete"
        );
        Ok(insight_fields(job, InsightPayload::Tagging { tags: outcome.tags }))
    }
}

// =============================================================================
// Scene recognition
// =============================================================================

pub struct SceneTask {
    provider: Arc<dyn SceneProvider>,
}

impl SceneTask {
    pub fn from_registry(registry: &ProviderRegistry) -> Result<Self, WorkerError> {
        Ok(Self {
            provider: registry.scene(None)?,
        })
    }
}

#[async_trait]
impl AnalysisTask for SceneTask {
    fn service(&self) -> &'static str {
        "scene-recognition"
    }

    fn group(&self) -> &'static str {
        "scene-recognition-group"
    }

    fn output_stream(&self) -> &'static str {
        STREAM_INSIGHTS
    }

    async fn analyze(&self, image: &[u8], job: &ImageJob) -> Result<Fields, WorkerError> {
        let outcome = self
            .provider
            .recognize(image, None, SCENE_THRESHOLD, SCENE_FALLBACK_TOP_N)
            .await?;

        // Scene list ordered by score so downstream frequency counts see the
        // strongest labels first.
        let mut ranked: Vec<(String, f64)> = outcome.scores.clone().into_iter().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let scenes = ranked.into_iter().map(|(label, _)| label).collect();

        tracing::info!(
            media_id = %job.media_id,
            scene = %outcome.scene,
            "Scene recognition complete"
        );
        Ok(insight_fields(
            job,
            InsightPayload::Scene {
                scene: outcome.scene,
                confidence: outcome.confidence,
                scenes,
            },
        ))
    }
}

// =============================================================================
// Captioning
// =============================================================================

pub struct CaptioningTask {
    provider: Arc<dyn CaptioningProvider>,
}

impl CaptioningTask {
    pub fn from_registry(registry: &ProviderRegistry) -> Result<Self, WorkerError> {
        Ok(Self {
            provider: registry.captioning(None)?,
        })
    }
}

#[async_trait]
impl AnalysisTask for CaptioningTask {
    fn service(&self) -> &'static str {
        "image-captioning"
    }

    fn group(&self) -> &'static str {
        "image-captioning-group"
    }

    fn output_stream(&self) -> &'static str {
        STREAM_INSIGHTS
    }

    async fn analyze(&self, image: &[u8], job: &ImageJob) -> Result<Fields, WorkerError> {
        let outcome = self.provider.caption(image).await?;
        tracing::info!(
            media_id = %job.media_id,
            caption_len = outcome.caption.len(),
            "Captioning complete"
        );
        Ok(insight_fields(
            job,
            InsightPayload::Captioning {
                caption: outcome.caption,
            },
        ))
    }
}

// =============================================================================
// Face detection
// =============================================================================

pub struct FaceTask {
    provider: Arc<dyn FaceProvider>,
}

impl FaceTask {
    pub fn from_registry(registry: &ProviderRegistry) -> Result<Self, WorkerError> {
        Ok(Self {
            provider: registry.face(None)?,
        })
    }
}

#[async_trait]
impl AnalysisTask for FaceTask {
    fn service(&self) -> &'static str {
        "face-recognition"
    }

    fn group(&self) -> &'static str {
        "face-recognition-group"
    }

    fn output_stream(&self) -> &'static str {
        STREAM_FACES
    }

    async fn analyze(&self, image: &[u8], job: &ImageJob) -> Result<Fields, WorkerError> {
        let outcome = self.provider.detect(image).await?;
        tracing::info!(
            media_id = %job.media_id,
            faces_detected = outcome.faces_detected,
            "Face detection complete"
        );

        let message = FaceResultMessage {
            media_id: job.media_id.clone(),
            post_id: job.post_id.clone(),
            correlation_id: job.correlation_id.clone(),
            faces: outcome.faces,
        };
        Ok(message.to_fields()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{FaceOutcome, FaceRecord, ModerationOutcome, ProviderError};

    struct StaticModeration;

    #[async_trait]
    impl ModerationProvider for StaticModeration {
        async fn analyze(&self, _image: &[u8]) -> Result<ModerationOutcome, ProviderError> {
            Ok(ModerationOutcome {
                is_safe: true,
                confidence: 0.93,
                scores: Default::default(),
                top_label: "safe content".into(),
            })
        }
    }

    struct StaticFaces;

    #[async_trait]
    impl FaceProvider for StaticFaces {
        async fn detect(&self, _image: &[u8]) -> Result<FaceOutcome, ProviderError> {
            Ok(FaceOutcome {
                faces_detected: 1,
                faces: vec![FaceRecord {
                    face_id: "f1".into(),
                    bbox: vec![0, 0, 10, 10],
                    embedding: vec![0.0; 8],
                    confidence: 0.8,
                }],
            })
        }
    }

    fn job() -> ImageJob {
        ImageJob {
            media_id: "m1".into(),
            post_id: "p1".into(),
            media_url: "https://res.cloudinary.com/x/a.jpg".into(),
            correlation_id: "c1".into(),
        }
    }

    #[tokio::test]
    async fn test_moderation_task_fields() {
        let task = ModerationTask {
            provider: Arc::new(StaticModeration),
        };
        let fields = task.analyze(b"img", &job()).await.unwrap();
        assert_eq!(fields.get("service").unwrap(), "moderation");
        assert_eq!(fields.get("isSafe").unwrap(), "true");
        assert_eq!(fields.get("mediaId").unwrap(), "m1");
        assert_eq!(task.output_stream(), STREAM_INSIGHTS);
    }

    #[tokio::test]
    async fn test_face_task_fields() {
        let task = FaceTask {
            provider: Arc::new(StaticFaces),
        };
        let fields = task.analyze(b"img", &job()).await.unwrap();
        assert_eq!(fields.get("facesDetected").unwrap(), "1");
        assert!(fields.get("service").is_none());
        assert_eq!(task.output_stream(), STREAM_FACES);
    }

    #[test]
    fn test_group_names_are_distinct() {
        let groups = [
            "content-moderation-group",
            "image-tagger-group",
            "scene-recognition-group",
            "image-captioning-group",
            "face-recognition-group",
        ];
        let unique: std::collections::HashSet<_> = groups.iter().collect();
        assert_eq!(unique.len(), groups.len());
    }
}
