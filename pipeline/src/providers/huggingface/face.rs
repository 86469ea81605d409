//! Face detection and embedding extraction

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use super::super::error::ProviderError;
use super::super::types::{FaceOutcome, FaceRecord};
use super::super::FaceProvider;
use super::client::HfEndpoint;

pub struct HfFaceProvider {
    endpoint: HfEndpoint,
    embedding_dim: usize,
}

impl HfFaceProvider {
    pub fn from_env(embedding_dim: usize) -> Self {
        Self {
            endpoint: HfEndpoint::from_env("HF_FACE_API_URL", "hf-face"),
            embedding_dim,
        }
    }
}

#[async_trait]
impl FaceProvider for HfFaceProvider {
    async fn detect(&self, image: &[u8]) -> Result<FaceOutcome, ProviderError> {
        let reply = self.endpoint.post_image(image, None).await?;
        Ok(parse_faces(&reply, self.embedding_dim))
    }
}

/// Parse the endpoint reply into face records.
///
/// Embeddings are padded with zeros or truncated to `embedding_dim`; a face
/// missing its id gets a freshly generated one.
pub fn parse_faces(reply: &Value, embedding_dim: usize) -> FaceOutcome {
    let raw_faces = reply
        .get("faces")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let faces: Vec<FaceRecord> = raw_faces
        .iter()
        .map(|face| FaceRecord {
            face_id: face
                .get("face_id")
                .and_then(Value::as_str)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            bbox: face
                .get("bbox")
                .and_then(Value::as_array)
                .map(|bbox| bbox.iter().filter_map(|v| coerce_i64(v)).collect())
                .unwrap_or_default(),
            embedding: normalize_embedding(
                face.get("embedding")
                    .and_then(Value::as_array)
                    .map(|e| e.iter().filter_map(Value::as_f64).map(|v| v as f32).collect())
                    .unwrap_or_default(),
                embedding_dim,
            ),
            confidence: face.get("confidence").and_then(Value::as_f64).unwrap_or(0.0),
        })
        .collect();

    FaceOutcome {
        faces_detected: faces.len(),
        faces,
    }
}

fn coerce_i64(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f.round() as i64))
}

/// Pad with zeros or truncate so every emitted embedding has exactly
/// `embedding_dim` elements.
pub fn normalize_embedding(mut embedding: Vec<f32>, embedding_dim: usize) -> Vec<f32> {
    match embedding.len().cmp(&embedding_dim) {
        std::cmp::Ordering::Less => {
            tracing::warn!(
                from = embedding.len(),
                to = embedding_dim,
                "Padding face embedding"
            );
            embedding.resize(embedding_dim, 0.0);
        }
        std::cmp::Ordering::Greater => {
            tracing::warn!(
                from = embedding.len(),
                to = embedding_dim,
                "Truncating face embedding"
            );
            embedding.truncate(embedding_dim);
        }
        std::cmp::Ordering::Equal => {}
    }
    embedding
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_embedding_padded() {
        let normalized = normalize_embedding(vec![1.0, 2.0], 5);
        assert_eq!(normalized, vec![1.0, 2.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_embedding_truncated() {
        let normalized = normalize_embedding(vec![1.0; 10], 4);
        assert_eq!(normalized.len(), 4);
    }

    #[test]
    fn test_embedding_exact() {
        let normalized = normalize_embedding(vec![0.5; 8], 8);
        assert_eq!(normalized, vec![0.5; 8]);
    }

    #[test]
    fn test_parse_faces() {
        let reply = json!({
            "faces_detected": 2,
            "faces": [
                {
                    "face_id": "f1",
                    "bbox": [10, 20, 30, 40],
                    "embedding": [0.1, 0.2],
                    "confidence": 0.88
                },
                {
                    "bbox": [1.6, 2.2, 3.0, 4.0],
                    "embedding": [0.3, 0.3, 0.3, 0.3, 0.3, 0.3],
                    "confidence": 0.75
                }
            ]
        });

        let outcome = parse_faces(&reply, 4);
        assert_eq!(outcome.faces_detected, 2);

        let first = &outcome.faces[0];
        assert_eq!(first.face_id, "f1");
        assert_eq!(first.bbox, vec![10, 20, 30, 40]);
        assert_eq!(first.embedding.len(), 4);

        let second = &outcome.faces[1];
        assert!(!second.face_id.is_empty());
        assert_eq!(second.bbox, vec![2, 2, 3, 4]);
        assert_eq!(second.embedding.len(), 4);
    }

    #[test]
    fn test_no_faces_field() {
        let outcome = parse_faces(&json!({"something": "else"}), 4);
        assert_eq!(outcome.faces_detected, 0);
        assert!(outcome.faces.is_empty());
    }

    #[test]
    fn test_every_embedding_has_configured_dim() {
        let reply = json!({
            "faces": [
                {"embedding": [0.1]},
                {"embedding": vec![0.2; 100]},
                {}
            ]
        });
        let outcome = parse_faces(&reply, 16);
        for face in &outcome.faces {
            assert_eq!(face.embedding.len(), 16);
        }
    }
}
