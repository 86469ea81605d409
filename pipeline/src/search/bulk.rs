//! Search-store bulk writer
//!
//! Batches are written with a single `_bulk` request (NDJSON body). A
//! partial failure (`errors == true`) falls back to per-document writes so
//! one poison document cannot block a batch; a failed bulk request falls
//! back to per-document writes with exponential retry. Deletes tolerate
//! missing documents.

use std::time::Duration;

use serde_json::{json, Value};

use super::error::SearchError;
use crate::core::constants::{SEARCH_MAX_RETRIES, SEARCH_RETRY_DELAY_SECS};
use crate::utils::http::http_client;

/// One queued index or delete operation
#[derive(Debug, Clone, PartialEq)]
pub enum BulkAction {
    Index {
        index: String,
        id: String,
        document: Value,
    },
    Delete {
        index: String,
        id: String,
    },
}

impl BulkAction {
    pub fn index_name(&self) -> &str {
        match self {
            Self::Index { index, .. } | Self::Delete { index, .. } => index,
        }
    }

    pub fn document_id(&self) -> &str {
        match self {
            Self::Index { id, .. } | Self::Delete { id, .. } => id,
        }
    }
}

#[derive(Clone)]
pub struct SearchClient {
    base_url: String,
}

impl SearchClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Validate reachability; workers exit non-zero when this fails at start
    pub async fn health_check(&self) -> Result<(), SearchError> {
        let response = http_client().get(&self.base_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SearchError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }

    /// Write a batch; returns the number of actions that ultimately failed.
    pub async fn write_batch(&self, actions: &[BulkAction]) -> usize {
        if actions.is_empty() {
            return 0;
        }

        match self.bulk_once(actions).await {
            Ok(reply) if !reply.errors => {
                tracing::info!(count = actions.len(), "Bulk write succeeded");
                0
            }
            Ok(reply) => {
                tracing::warn!(
                    count = actions.len(),
                    failed = reply.failed_items,
                    "Partial bulk failure, falling back to per-document writes"
                );
                self.write_individually(actions).await
            }
            Err(e) => {
                tracing::error!(
                    count = actions.len(),
                    error = %e,
                    "Bulk request failed, falling back to per-document writes with retry"
                );
                self.write_individually(actions).await
            }
        }
    }

    async fn write_individually(&self, actions: &[BulkAction]) -> usize {
        let mut failed = 0;
        for action in actions {
            if let Err(e) = self.write_document(action).await {
                failed += 1;
                tracing::error!(
                    index = action.index_name(),
                    document_id = action.document_id(),
                    error = %e,
                    "Document write failed after retries"
                );
            }
        }
        failed
    }

    /// Write one action with exponential backoff
    /// (`SEARCH_RETRY_DELAY_SECS * 2^attempt`, up to `SEARCH_MAX_RETRIES`
    /// attempts).
    pub async fn write_document(&self, action: &BulkAction) -> Result<(), SearchError> {
        let mut last_error = None;
        for attempt in 0..SEARCH_MAX_RETRIES {
            match self.write_once(action).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    last_error = Some(e);
                    if attempt + 1 < SEARCH_MAX_RETRIES {
                        let delay =
                            Duration::from_secs(SEARCH_RETRY_DELAY_SECS << attempt);
                        tracing::warn!(
                            index = action.index_name(),
                            document_id = action.document_id(),
                            attempt = attempt + 1,
                            delay_secs = delay.as_secs(),
                            "Document write failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        Err(last_error.unwrap_or_else(|| SearchError::Config("no attempts made".into())))
    }

    async fn write_once(&self, action: &BulkAction) -> Result<(), SearchError> {
        match action {
            BulkAction::Index {
                index,
                id,
                document,
            } => {
                let url = format!("{}/{index}/_doc/{id}", self.base_url);
                let response = http_client().put(&url).json(document).send().await?;
                check_status(response).await
            }
            BulkAction::Delete { index, id } => {
                let url = format!("{}/{index}/_doc/{id}", self.base_url);
                let response = http_client().delete(&url).send().await?;
                let status = response.status();
                // Already-deleted documents are fine
                if status.as_u16() == 404 {
                    tracing::debug!(index, id, "Document already absent");
                    return Ok(());
                }
                check_status(response).await
            }
        }
    }

    async fn bulk_once(&self, actions: &[BulkAction]) -> Result<BulkReply, SearchError> {
        let url = format!("{}/_bulk", self.base_url);
        let body = bulk_body(actions)?;

        let response = http_client()
            .post(&url)
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SearchError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let reply: Value = response.json().await?;
        Ok(BulkReply::from_value(&reply))
    }
}

struct BulkReply {
    errors: bool,
    failed_items: usize,
}

impl BulkReply {
    fn from_value(reply: &Value) -> Self {
        let errors = reply.get("errors").and_then(Value::as_bool).unwrap_or(false);
        let failed_items = reply
            .get("items")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter(|item| {
                        item.as_object()
                            .and_then(|op| op.values().next())
                            .and_then(|detail| detail.get("error"))
                            .is_some()
                    })
                    .count()
            })
            .unwrap_or(0);
        Self {
            errors,
            failed_items,
        }
    }
}

/// NDJSON body: one action line plus, for index operations, one source line
pub fn bulk_body(actions: &[BulkAction]) -> Result<String, SearchError> {
    let mut body = String::new();
    for action in actions {
        match action {
            BulkAction::Index {
                index,
                id,
                document,
            } => {
                body.push_str(&serde_json::to_string(
                    &json!({"index": {"_index": index, "_id": id}}),
                )?);
                body.push('\n');
                body.push_str(&serde_json::to_string(document)?);
                body.push('\n');
            }
            BulkAction::Delete { index, id } => {
                body.push_str(&serde_json::to_string(
                    &json!({"delete": {"_index": index, "_id": id}}),
                )?);
                body.push('\n');
            }
        }
    }
    Ok(body)
}

async fn check_status(response: reqwest::Response) -> Result<(), SearchError> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(SearchError::Status {
            status: status.as_u16(),
            body: response.text().await.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bulk_body_shape() {
        let actions = vec![
            BulkAction::Index {
                index: "media_search".into(),
                id: "1".into(),
                document: json!({"mediaId": 1}),
            },
            BulkAction::Delete {
                index: "post_search".into(),
                id: "2".into(),
            },
        ];

        let body = bulk_body(&actions).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            serde_json::from_str::<Value>(lines[0]).unwrap(),
            json!({"index": {"_index": "media_search", "_id": "1"}})
        );
        assert_eq!(
            serde_json::from_str::<Value>(lines[1]).unwrap(),
            json!({"mediaId": 1})
        );
        assert_eq!(
            serde_json::from_str::<Value>(lines[2]).unwrap(),
            json!({"delete": {"_index": "post_search", "_id": "2"}})
        );
        assert!(body.ends_with('\n'));
    }

    #[test]
    fn test_bulk_reply_parsing() {
        let reply = BulkReply::from_value(&json!({
            "took": 3,
            "errors": true,
            "items": [
                {"index": {"_id": "1", "status": 201}},
                {"index": {"_id": "2", "status": 400, "error": {"type": "mapper_parsing_exception"}}}
            ]
        }));
        assert!(reply.errors);
        assert_eq!(reply.failed_items, 1);

        let clean = BulkReply::from_value(&json!({"errors": false, "items": []}));
        assert!(!clean.errors);
        assert_eq!(clean.failed_items, 0);
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = SearchClient::new("http://elasticsearch:9200/");
        assert_eq!(client.base_url, "http://elasticsearch:9200");
    }
}
