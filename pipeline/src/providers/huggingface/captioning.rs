//! Image captioning via an image-to-text endpoint

use async_trait::async_trait;
use serde_json::Value;

use super::super::error::ProviderError;
use super::super::types::CaptionOutcome;
use super::super::CaptioningProvider;
use super::client::HfEndpoint;

pub struct HfCaptioningProvider {
    endpoint: HfEndpoint,
}

impl HfCaptioningProvider {
    pub fn from_env() -> Self {
        Self {
            endpoint: HfEndpoint::from_env("HF_CAPTIONING_API_URL", "hf-captioning"),
        }
    }
}

#[async_trait]
impl CaptioningProvider for HfCaptioningProvider {
    async fn caption(&self, image: &[u8]) -> Result<CaptionOutcome, ProviderError> {
        let reply = self.endpoint.post_image(image, None).await?;
        Ok(CaptionOutcome {
            caption: extract_caption(&reply),
        })
    }
}

/// Image-to-text endpoints reply either `[{generated_text}]` or
/// `{generated_text}`; anything else captions as empty.
pub fn extract_caption(reply: &Value) -> String {
    let text = match reply {
        Value::Array(items) => items
            .first()
            .and_then(|item| item.get("generated_text"))
            .and_then(Value::as_str),
        Value::Object(map) => map.get("generated_text").and_then(Value::as_str),
        _ => None,
    };
    text.unwrap_or_default().trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_list_shape() {
        let reply = json!([{"generated_text": "a dog on a beach"}]);
        assert_eq!(extract_caption(&reply), "a dog on a beach");
    }

    #[test]
    fn test_object_shape() {
        let reply = json!({"generated_text": " two people at a table "});
        assert_eq!(extract_caption(&reply), "two people at a table");
    }

    #[test]
    fn test_unusable_shape() {
        assert_eq!(extract_caption(&json!(42)), "");
        assert_eq!(extract_caption(&json!([])), "");
        assert_eq!(extract_caption(&json!({"caption": "wrong key"})), "");
    }
}
