//! Qdrant-backed [`VectorStore`] speaking the REST API directly.
//!
//! Collections are created with cosine distance, so Qdrant's scores are
//! already "larger = more similar" and pass through unchanged. Points
//! carry the chunk payload verbatim; deletions filter on the payload's
//! `path` field.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use super::{ChunkPayload, SearchHit, VectorPoint, VectorStore};

const TIMEOUT_SECS: u64 = 30;

pub struct QdrantStore {
    client: reqwest::Client,
    base_url: String,
    collection: String,
    min_score: f64,
}

impl QdrantStore {
    pub fn new(url: &str, api_key: &str, collection: String, min_score: f64) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        if !api_key.is_empty() {
            let value = reqwest::header::HeaderValue::from_str(api_key)
                .context("Invalid Qdrant API key")?;
            headers.insert("api-key", value);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(TIMEOUT_SECS))
            .default_headers(headers)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: url.trim_end_matches('/').to_string(),
            collection,
            min_score,
        })
    }

    fn collection_url(&self, suffix: &str) -> String {
        format!("{}/collections/{}{}", self.base_url, self.collection, suffix)
    }

    async fn expect_ok(response: reqwest::Response, action: &str) -> Result<Value> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Qdrant {} failed ({}): {}", action, status, body);
        }
        response
            .json()
            .await
            .with_context(|| format!("Qdrant {}: invalid JSON response", action))
    }

    async fn delete_with_filter(&self, filter: Value) -> Result<()> {
        let response = self
            .client
            .post(self.collection_url("/points/delete?wait=true"))
            .json(&json!({ "filter": filter }))
            .send()
            .await
            .context("Qdrant delete request failed")?;
        Self::expect_ok(response, "delete").await?;
        Ok(())
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn initialize(&self, dimension: usize) -> Result<()> {
        if self.collection_exists().await? {
            return Ok(());
        }

        let body = json!({
            "vectors": { "size": dimension, "distance": "Cosine" }
        });
        let response = self
            .client
            .put(self.collection_url(""))
            .json(&body)
            .send()
            .await
            .context("Qdrant create-collection request failed")?;
        Self::expect_ok(response, "create collection").await?;
        Ok(())
    }

    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }

        let body = json!({
            "points": points
                .iter()
                .map(|p| json!({
                    "id": p.id,
                    "vector": p.vector,
                    "payload": { "path": p.payload.path, "text": p.payload.text },
                }))
                .collect::<Vec<_>>()
        });

        let response = self
            .client
            .put(self.collection_url("/points?wait=true"))
            .json(&body)
            .send()
            .await
            .context("Qdrant upsert request failed")?;
        Self::expect_ok(response, "upsert").await?;
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        path_prefix: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let mut body = json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
            "score_threshold": self.min_score,
        });
        if let Some(prefix) = path_prefix {
            body["filter"] = json!({
                "must": [{ "key": "path", "match": { "text": prefix } }]
            });
        }

        let response = self
            .client
            .post(self.collection_url("/points/search"))
            .json(&body)
            .send()
            .await
            .context("Qdrant search request failed")?;
        let json = Self::expect_ok(response, "search").await?;

        let hits = json
            .get("result")
            .and_then(|r| r.as_array())
            .map(|points| {
                points
                    .iter()
                    .filter_map(|p| {
                        let score = p.get("score")?.as_f64()?;
                        let payload = p.get("payload")?;
                        Some(SearchHit {
                            score,
                            payload: ChunkPayload {
                                path: payload
                                    .get("path")
                                    .and_then(|v| v.as_str())
                                    .unwrap_or_default()
                                    .to_string(),
                                text: payload
                                    .get("text")
                                    .and_then(|v| v.as_str())
                                    .unwrap_or_default()
                                    .to_string(),
                            },
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(hits)
    }

    async fn delete_by_path(&self, path: &str) -> Result<()> {
        self.delete_with_filter(json!({
            "must": [{ "key": "path", "match": { "value": path } }]
        }))
        .await
    }

    async fn delete_by_paths(&self, paths: &[String]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        self.delete_with_filter(json!({
            "must": [{ "key": "path", "match": { "any": paths } }]
        }))
        .await
    }

    async fn clear_collection(&self) -> Result<()> {
        // An empty filter matches every point.
        self.delete_with_filter(json!({})).await
    }

    async fn delete_collection(&self) -> Result<()> {
        let response = self
            .client
            .delete(self.collection_url(""))
            .send()
            .await
            .context("Qdrant delete-collection request failed")?;
        Self::expect_ok(response, "delete collection").await?;
        Ok(())
    }

    async fn collection_exists(&self) -> Result<bool> {
        let response = self
            .client
            .get(self.collection_url(""))
            .send()
            .await
            .context("Qdrant collection probe failed")?;
        Ok(response.status().is_success())
    }
}
