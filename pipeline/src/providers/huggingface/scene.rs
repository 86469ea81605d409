//! Scene recognition via a zero-shot classification endpoint

use std::collections::HashMap;

use async_trait::async_trait;

use super::super::error::ProviderError;
use super::super::types::SceneOutcome;
use super::super::SceneProvider;
use super::client::{label_scores, round4, sorted_entries, top_entry, HfEndpoint};
use crate::core::constants::ENV_SCENE_LABELS;

/// Default candidate scene labels, overridable via `SCENE_LABELS`
pub const DEFAULT_SCENE_LABELS: [&str; 16] = [
    "beach",
    "mountains",
    "urban",
    "office",
    "restaurant",
    "forest",
    "desert",
    "lake",
    "park",
    "indoor",
    "outdoor",
    "rural",
    "coastal",
    "mountainous",
    "tropical",
    "arctic",
];

pub struct HfSceneProvider {
    endpoint: HfEndpoint,
    scene_labels: Vec<String>,
}

impl HfSceneProvider {
    pub fn from_env() -> Self {
        let scene_labels = std::env::var(ENV_SCENE_LABELS)
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(|label| label.trim().to_string())
                    .filter(|label| !label.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|labels| !labels.is_empty())
            .unwrap_or_else(|| DEFAULT_SCENE_LABELS.iter().map(|s| s.to_string()).collect());

        Self {
            endpoint: HfEndpoint::from_env("HF_SCENE_API_URL", "hf-scene"),
            scene_labels,
        }
    }
}

#[async_trait]
impl SceneProvider for HfSceneProvider {
    async fn recognize(
        &self,
        image: &[u8],
        labels: Option<&[String]>,
        threshold: f64,
        top_n: usize,
    ) -> Result<SceneOutcome, ProviderError> {
        let candidates = labels.unwrap_or(&self.scene_labels);
        let reply = self.endpoint.post_image(image, Some(candidates)).await?;
        Ok(select_scenes(&label_scores(&reply), threshold, top_n))
    }
}

/// Best scene plus the labels above threshold; when nothing clears the
/// threshold but the model scored anything, fall back to the top-N so a
/// scored response never yields an empty scene set.
pub fn select_scenes(scores: &HashMap<String, f64>, threshold: f64, top_n: usize) -> SceneOutcome {
    let (scene, confidence) = top_entry(scores)
        .map(|(label, score)| (label.to_string(), score))
        .unwrap_or_else(|| ("unknown".to_string(), 0.0));

    let mut filtered: HashMap<String, f64> = scores
        .iter()
        .filter(|(_, score)| **score > threshold)
        .map(|(label, score)| (label.clone(), round4(*score)))
        .collect();

    if filtered.is_empty() && !scores.is_empty() {
        filtered = sorted_entries(scores)
            .into_iter()
            .take(top_n)
            .map(|(label, score)| (label, round4(score)))
            .collect();
        tracing::info!(threshold, top_n, "No scenes above threshold; returning top-N anyway");
    }

    SceneOutcome {
        scene,
        confidence: round4(confidence),
        scores: filtered,
    }
}
