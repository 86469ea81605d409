//! Image tagging via an image-classification endpoint

use std::collections::HashMap;

use async_trait::async_trait;

use super::super::error::ProviderError;
use super::super::types::TaggingOutcome;
use super::super::TaggingProvider;
use super::client::{label_scores, round4, sorted_entries, HfEndpoint};

pub struct HfTaggerProvider {
    endpoint: HfEndpoint,
}

impl HfTaggerProvider {
    pub fn from_env() -> Self {
        Self {
            endpoint: HfEndpoint::from_env("HF_TAGGER_API_URL", "hf-tagger"),
        }
    }
}

#[async_trait]
impl TaggingProvider for HfTaggerProvider {
    async fn tag(
        &self,
        image: &[u8],
        top_n: usize,
        threshold: f64,
    ) -> Result<TaggingOutcome, ProviderError> {
        let reply = self.endpoint.post_image(image, None).await?;
        Ok(select_tags(&label_scores(&reply), top_n, threshold))
    }
}

/// Top-N tags above threshold; when nothing clears the threshold but the
/// model scored anything at all, fall back to top-N regardless so a scored
/// response never produces an empty tag list.
pub fn select_tags(scores: &HashMap<String, f64>, top_n: usize, threshold: f64) -> TaggingOutcome {
    let ranked = sorted_entries(scores);

    let mut selected: Vec<(String, f64)> = ranked
        .iter()
        .filter(|(_, score)| *score > threshold)
        .take(top_n)
        .cloned()
        .collect();

    if selected.is_empty() && !ranked.is_empty() {
        selected = ranked.into_iter().take(top_n).collect();
    }

    TaggingOutcome {
        tags: selected.iter().map(|(tag, _)| tag.clone()).collect(),
        scores: selected
            .into_iter()
            .map(|(tag, score)| (tag, round4(score)))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(entries: &[(&str, f64)]) -> HashMap<String, f64> {
        entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_top_n_above_threshold() {
        let outcome = select_tags(
            &scores(&[("beach", 0.9), ("sand", 0.5), ("sky", 0.004), ("dust", 0.001)]),
            3,
            0.01,
        );
        assert_eq!(outcome.tags, vec!["beach", "sand"]);
        assert_eq!(outcome.scores.len(), 2);
    }

    #[test]
    fn test_never_empty_when_scored() {
        let outcome = select_tags(&scores(&[("a", 0.004), ("b", 0.002)]), 5, 0.01);
        assert_eq!(outcome.tags, vec!["a", "b"]);
    }

    #[test]
    fn test_all_zero_scores_still_returned() {
        let outcome = select_tags(&scores(&[("a", 0.0), ("b", 0.0)]), 5, 0.01);
        assert_eq!(outcome.tags.len(), 2);
    }

    #[test]
    fn test_empty_scores_stay_empty() {
        let outcome = select_tags(&HashMap::new(), 5, 0.01);
        assert!(outcome.tags.is_empty());
        assert!(outcome.scores.is_empty());
    }

    #[test]
    fn test_top_n_limit() {
        let outcome = select_tags(
            &scores(&[("a", 0.9), ("b", 0.8), ("c", 0.7), ("d", 0.6)]),
            2,
            0.01,
        );
        assert_eq!(outcome.tags, vec!["a", "b"]);
    }
}
