//! Shared HuggingFace endpoint client
//!
//! Each provider instance owns one endpoint: a URL (per-task override or the
//! shared `HF_API_URL`), an optional bearer token, and a circuit breaker.
//! Images are POSTed as multipart form data; candidate labels ride along as
//! a JSON-encoded text part for zero-shot endpoints.
//!
//! Deployed endpoints have returned several response shapes over time, so
//! [`label_scores`] coerces all of them into one `label → score` map:
//! `[{label, score}, …]`, `{results: […]}`, `{labels, scores}`,
//! `{scenes, scores}`, `{scores: {…}}`, and plain numeric-valued objects.

use std::collections::HashMap;

use serde_json::Value;

use super::super::error::ProviderError;
use crate::core::constants::{ENV_HF_API_TOKEN, ENV_HF_API_URL};
use crate::core::secret::get_secret;
use crate::utils::circuit::CircuitBreaker;
use crate::utils::http::http_client;

pub struct HfEndpoint {
    api_url: String,
    api_token: Option<String>,
    breaker: CircuitBreaker,
}

impl HfEndpoint {
    /// Build from the per-task URL env var, falling back to `HF_API_URL`
    pub fn from_env(url_env: &str, circuit_name: &str) -> Self {
        let api_url = std::env::var(url_env)
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| std::env::var(ENV_HF_API_URL).ok().filter(|v| !v.is_empty()))
            .unwrap_or_default();

        if api_url.is_empty() {
            tracing::warn!(url_env, "{url_env} / {ENV_HF_API_URL} not configured");
        }

        Self {
            api_url,
            api_token: get_secret(ENV_HF_API_TOKEN),
            breaker: CircuitBreaker::new(circuit_name),
        }
    }

    /// POST the image (and optional candidate labels) and parse the JSON
    /// reply. The circuit breaker brackets the whole exchange.
    pub async fn post_image(
        &self,
        image: &[u8],
        labels: Option<&[String]>,
    ) -> Result<Value, ProviderError> {
        if self.api_url.is_empty() {
            return Err(ProviderError::Config(
                "provider endpoint URL not configured".to_string(),
            ));
        }

        self.breaker.check()?;

        match self.exchange(image, labels).await {
            Ok(value) => {
                self.breaker.on_success();
                Ok(value)
            }
            Err(e) => {
                self.breaker.on_failure();
                Err(e)
            }
        }
    }

    async fn exchange(
        &self,
        image: &[u8],
        labels: Option<&[String]>,
    ) -> Result<Value, ProviderError> {
        let file_part = reqwest::multipart::Part::bytes(image.to_vec())
            .file_name("image.jpg")
            .mime_str("image/jpeg")?;
        let mut form = reqwest::multipart::Form::new().part("file", file_part);

        if let Some(labels) = labels {
            let encoded = serde_json::to_string(labels)
                .map_err(|e| ProviderError::Config(format!("labels not serializable: {e}")))?;
            form = form.text("labels", encoded);
        }

        let mut request = http_client().post(&self.api_url).multipart(form);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status {
                status: status.as_u16(),
            });
        }

        Ok(response.json().await?)
    }
}

/// Coerce any observed endpoint response shape into `label → score`
pub fn label_scores(value: &Value) -> HashMap<String, f64> {
    match value {
        Value::Array(items) => scores_from_list(items),
        Value::Object(map) => {
            if let Some(Value::Object(scores)) = map.get("scores") {
                let numeric = numeric_entries(scores);
                if !numeric.is_empty() {
                    return numeric;
                }
            }
            if let Some(Value::Array(items)) = map.get("results") {
                return scores_from_list(items);
            }
            if let (Some(Value::Array(labels)), Some(Value::Array(scores))) =
                (map.get("labels"), map.get("scores"))
            {
                return zip_label_scores(labels, scores);
            }
            if let (Some(Value::Array(scenes)), Some(Value::Array(scores))) =
                (map.get("scenes"), map.get("scores"))
            {
                return zip_label_scores(scenes, scores);
            }
            numeric_entries(map)
        }
        _ => HashMap::new(),
    }
}

fn scores_from_list(items: &[Value]) -> HashMap<String, f64> {
    let mut scores = HashMap::new();
    for item in items {
        if let (Some(label), Some(score)) = (
            item.get("label").and_then(Value::as_str),
            item.get("score").and_then(Value::as_f64),
        ) {
            scores.insert(label.to_string(), score);
        }
    }
    scores
}

fn zip_label_scores(labels: &[Value], scores: &[Value]) -> HashMap<String, f64> {
    labels
        .iter()
        .zip(scores.iter())
        .filter_map(|(label, score)| Some((label.as_str()?.to_string(), score.as_f64()?)))
        .collect()
}

fn numeric_entries(map: &serde_json::Map<String, Value>) -> HashMap<String, f64> {
    map.iter()
        .filter_map(|(k, v)| Some((k.clone(), v.as_f64()?)))
        .collect()
}

/// Highest-scored entry, for top-label style summaries
pub fn top_entry(scores: &HashMap<String, f64>) -> Option<(&str, f64)> {
    scores
        .iter()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(label, score)| (label.as_str(), *score))
}

/// Entries sorted by score descending
pub fn sorted_entries(scores: &HashMap<String, f64>) -> Vec<(String, f64)> {
    let mut entries: Vec<(String, f64)> = scores.iter().map(|(k, v)| (k.clone(), *v)).collect();
    entries.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    entries
}

pub fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_inference_list_shape() {
        let value = json!([
            {"label": "beach", "score": 0.9},
            {"label": "city", "score": 0.1}
        ]);
        let scores = label_scores(&value);
        assert_eq!(scores.len(), 2);
        assert_eq!(scores["beach"], 0.9);
    }

    #[test]
    fn test_results_wrapper_shape() {
        let value = json!({"results": [{"label": "dog", "score": 0.7}]});
        let scores = label_scores(&value);
        assert_eq!(scores["dog"], 0.7);
    }

    #[test]
    fn test_parallel_arrays_shape() {
        let value = json!({"labels": ["a", "b"], "scores": [0.6, 0.4]});
        let scores = label_scores(&value);
        assert_eq!(scores["a"], 0.6);
        assert_eq!(scores["b"], 0.4);
    }

    #[test]
    fn test_scenes_arrays_shape() {
        let value = json!({"scenes": ["beach", "outdoor"], "scores": [0.8, 0.2]});
        let scores = label_scores(&value);
        assert_eq!(scores["beach"], 0.8);
    }

    #[test]
    fn test_scores_object_shape() {
        let value = json!({"scores": {"cat": 0.55, "dog": 0.45}});
        let scores = label_scores(&value);
        assert_eq!(scores["cat"], 0.55);
    }

    #[test]
    fn test_numeric_dict_shape() {
        let value = json!({"beach": 0.9, "city": 0.05});
        let scores = label_scores(&value);
        assert_eq!(scores["beach"], 0.9);
    }

    #[test]
    fn test_unusable_shape_is_empty() {
        assert!(label_scores(&json!("just a string")).is_empty());
        assert!(label_scores(&json!({"caption": "a dog"})).is_empty());
    }

    #[test]
    fn test_top_entry_and_sorting() {
        let value = json!({"a": 0.2, "b": 0.9, "c": 0.5});
        let scores = label_scores(&value);
        let (label, score) = top_entry(&scores).unwrap();
        assert_eq!(label, "b");
        assert_eq!(score, 0.9);

        let sorted = sorted_entries(&scores);
        assert_eq!(sorted[0].0, "b");
        assert_eq!(sorted[2].0, "a");
    }

    #[test]
    fn test_round4() {
        assert_eq!(round4(0.123456), 0.1235);
        assert_eq!(round4(1.0), 1.0);
    }
}
