//! Chroma-backed [`VectorStore`] speaking the REST API directly.
//!
//! Chroma addresses collections by server-assigned id, so the id is
//! resolved lazily on first use and cached. Query results come back as
//! distances (smaller = closer); they are negated at this boundary to
//! match the uniform larger-is-better score convention.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::RwLock;

use super::{ChunkPayload, SearchHit, VectorPoint, VectorStore};

const TIMEOUT_SECS: u64 = 30;

pub struct ChromaStore {
    client: reqwest::Client,
    base_url: String,
    collection: String,
    collection_id: RwLock<Option<String>>,
}

impl ChromaStore {
    pub fn new(url: &str, api_key: &str, collection: String) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        if !api_key.is_empty() {
            let value = reqwest::header::HeaderValue::from_str(&format!("Bearer {}", api_key))
                .context("Invalid Chroma API key")?;
            headers.insert(reqwest::header::AUTHORIZATION, value);
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
            collection_id: RwLock::new(None),
        })
    }

    fn api_url(&self, suffix: &str) -> String {
        format!("{}/api/v1{}", self.base_url, suffix)
    }

    async fn expect_ok(response: reqwest::Response, action: &str) -> Result<Value> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Chroma {} failed ({}): {}", action, status, body);
        }
        response
            .json()
            .await
            .with_context(|| format!("Chroma {}: invalid JSON response", action))
    }

    /// Resolve (get-or-create) the collection and cache its id.
    async fn resolve_collection_id(&self) -> Result<String> {
        if let Some(id) = self.collection_id.read().await.clone() {
            return Ok(id);
        }

        let response = self
            .client
            .post(self.api_url("/collections"))
            .json(&json!({ "name": self.collection, "get_or_create": true }))
            .send()
            .await
            .context("Chroma get-or-create collection request failed")?;
        let json = Self::expect_ok(response, "get-or-create collection").await?;

        let id = json
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("Chroma response missing collection id"))?
            .to_string();

        *self.collection_id.write().await = Some(id.clone());
        Ok(id)
    }

    async fn delete_where(&self, filter: Value) -> Result<()> {
        let id = self.resolve_collection_id().await?;
        let response = self
            .client
            .post(self.api_url(&format!("/collections/{}/delete", id)))
            .json(&json!({ "where": filter }))
            .send()
            .await
            .context("Chroma delete request failed")?;
        Self::expect_ok(response, "delete").await?;
        Ok(())
    }
}

#[async_trait]
impl VectorStore for ChromaStore {
    async fn initialize(&self, _dimension: usize) -> Result<()> {
        // Chroma sizes the collection from the first upsert; creating it
        // up front is all that is needed here.
        self.resolve_collection_id().await?;
        Ok(())
    }

    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let id = self.resolve_collection_id().await?;

        let body = json!({
            "ids": points.iter().map(|p| p.id.clone()).collect::<Vec<_>>(),
            "embeddings": points.iter().map(|p| p.vector.clone()).collect::<Vec<_>>(),
            "documents": points.iter().map(|p| p.payload.text.clone()).collect::<Vec<_>>(),
            "metadatas": points
                .iter()
                .map(|p| json!({ "path": p.payload.path }))
                .collect::<Vec<_>>(),
        });

        let response = self
            .client
            .post(self.api_url(&format!("/collections/{}/upsert", id)))
            .json(&body)
            .send()
            .await
            .context("Chroma upsert request failed")?;
        Self::expect_ok(response, "upsert").await?;
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        path_prefix: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let id = self.resolve_collection_id().await?;

        let mut body = json!({
            "query_embeddings": [vector],
            "n_results": limit,
            "include": ["documents", "metadatas", "distances"],
        });
        if let Some(prefix) = path_prefix {
            // Chroma has no prefix operator; an exact path match is the
            // closest available filter.
            body["where"] = json!({ "path": prefix });
        }

        let response = self
            .client
            .post(self.api_url(&format!("/collections/{}/query", id)))
            .json(&body)
            .send()
            .await
            .context("Chroma query request failed")?;
        let json = Self::expect_ok(response, "query").await?;

        let first = |key: &str| -> Vec<Value> {
            json.get(key)
                .and_then(|v| v.as_array())
                .and_then(|rows| rows.first())
                .and_then(|row| row.as_array())
                .cloned()
                .unwrap_or_default()
        };

        let documents = first("documents");
        let metadatas = first("metadatas");
        let distances = first("distances");

        let mut hits = Vec::with_capacity(documents.len());
        for (i, doc) in documents.iter().enumerate() {
            let distance = distances.get(i).and_then(|d| d.as_f64()).unwrap_or(f64::MAX);
            let path = metadatas
                .get(i)
                .and_then(|m| m.get("path"))
                .and_then(|p| p.as_str())
                .unwrap_or_default()
                .to_string();
            hits.push(SearchHit {
                // Distance to similarity: negate so larger = more similar.
                score: -distance,
                payload: ChunkPayload {
                    path,
                    text: doc.as_str().unwrap_or_default().to_string(),
                },
            });
        }

        Ok(hits)
    }

    async fn delete_by_path(&self, path: &str) -> Result<()> {
        self.delete_where(json!({ "path": path })).await
    }

    async fn delete_by_paths(&self, paths: &[String]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        self.delete_where(json!({ "path": { "$in": paths } })).await
    }

    async fn clear_collection(&self) -> Result<()> {
        self.delete_where(json!({ "path": { "$ne": "" } })).await
    }

    async fn delete_collection(&self) -> Result<()> {
        let response = self
            .client
            .delete(self.api_url(&format!("/collections/{}", self.collection)))
            .send()
            .await
            .context("Chroma delete-collection request failed")?;
        Self::expect_ok(response, "delete collection").await?;
        *self.collection_id.write().await = None;
        Ok(())
    }

    async fn collection_exists(&self) -> Result<bool> {
        let response = self
            .client
            .get(self.api_url(&format!("/collections/{}", self.collection)))
            .send()
            .await
            .context("Chroma collection probe failed")?;
        Ok(response.status().is_success())
    }
}
