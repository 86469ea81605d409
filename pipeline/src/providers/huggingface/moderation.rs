//! Content moderation via a zero-shot classification endpoint

use std::collections::HashMap;

use async_trait::async_trait;

use super::super::error::ProviderError;
use super::super::types::ModerationOutcome;
use super::super::ModerationProvider;
use super::client::{label_scores, round4, sorted_entries, HfEndpoint};

/// Candidate labels sent to the zero-shot endpoint
pub const MODERATION_LABELS: [&str; 7] = [
    "safe content",
    "appropriate content",
    "nsfw content",
    "explicit content",
    "nudity",
    "violence",
    "gore",
];

const SAFE_SET: [&str; 2] = ["safe content", "appropriate content"];
const NSFW_SET: [&str; 5] = [
    "nsfw content",
    "explicit content",
    "nudity",
    "violence",
    "gore",
];

/// NSFW score at or above this fails moderation outright
const NSFW_THRESHOLD: f64 = 0.45;

pub struct HfModerationProvider {
    endpoint: HfEndpoint,
    labels: Vec<String>,
}

impl HfModerationProvider {
    pub fn from_env() -> Self {
        Self {
            endpoint: HfEndpoint::from_env("HF_MODERATION_API_URL", "hf-moderation"),
            labels: MODERATION_LABELS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[async_trait]
impl ModerationProvider for HfModerationProvider {
    async fn analyze(&self, image: &[u8]) -> Result<ModerationOutcome, ProviderError> {
        let reply = self.endpoint.post_image(image, Some(&self.labels)).await?;
        Ok(synthesize_verdict(&label_scores(&reply)))
    }
}

fn normalize_label(label: &str) -> String {
    label.to_lowercase().replace('_', " ").trim().to_string()
}

/// Derive the safety verdict from raw label scores.
///
/// `nsfw_score` is the max over the NSFW label set and `safe_score` the max
/// over the safe set (after label normalization); content is safe iff the
/// NSFW score stays under threshold and the safe score beats it.
pub fn synthesize_verdict(scores: &HashMap<String, f64>) -> ModerationOutcome {
    let normalized: HashMap<String, f64> = scores
        .iter()
        .map(|(label, score)| (normalize_label(label), *score))
        .collect();

    let max_over = |set: &[&str]| {
        set.iter()
            .filter_map(|label| normalized.get(*label).copied())
            .fold(0.0_f64, f64::max)
    };

    let nsfw_score = max_over(&NSFW_SET);
    let safe_score = max_over(&SAFE_SET);
    let is_safe = nsfw_score < NSFW_THRESHOLD && safe_score > nsfw_score;

    let (top_label, confidence) = sorted_entries(scores)
        .into_iter()
        .next()
        .unwrap_or_else(|| ("unknown".to_string(), 0.0));

    ModerationOutcome {
        is_safe,
        confidence: round4(confidence),
        scores: scores
            .iter()
            .map(|(label, score)| (label.clone(), round4(*score)))
            .collect(),
        top_label,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(entries: &[(&str, f64)]) -> HashMap<String, f64> {
        entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_clearly_safe() {
        let verdict = synthesize_verdict(&scores(&[
            ("safe content", 0.92),
            ("nsfw content", 0.03),
            ("violence", 0.01),
        ]));
        assert!(verdict.is_safe);
        assert_eq!(verdict.top_label, "safe content");
        assert_eq!(verdict.confidence, 0.92);
    }

    #[test]
    fn test_nsfw_over_threshold_is_unsafe() {
        let verdict = synthesize_verdict(&scores(&[
            ("safe content", 0.5),
            ("nudity", 0.46),
        ]));
        assert!(!verdict.is_safe);
    }

    #[test]
    fn test_nsfw_beating_safe_is_unsafe() {
        let verdict = synthesize_verdict(&scores(&[
            ("safe content", 0.2),
            ("gore", 0.3),
        ]));
        assert!(!verdict.is_safe);
    }

    #[test]
    fn test_underscored_labels_normalized() {
        let verdict = synthesize_verdict(&scores(&[
            ("SAFE_CONTENT", 0.8),
            ("NSFW_CONTENT", 0.1),
        ]));
        assert!(verdict.is_safe);
    }

    #[test]
    fn test_empty_scores() {
        let verdict = synthesize_verdict(&HashMap::new());
        // No safe signal at all: nothing beats the NSFW score of zero.
        assert!(!verdict.is_safe);
        assert_eq!(verdict.top_label, "unknown");
        assert_eq!(verdict.confidence, 0.0);
    }

    #[test]
    fn test_scores_rounded() {
        let verdict = synthesize_verdict(&scores(&[("safe content", 0.123456789)]));
        assert_eq!(verdict.scores["safe content"], 0.1235);
    }
}
