//! Storage abstraction for domain indexes.
//!
//! The [`VectorStore`] trait defines the operations the indexing and
//! retrieval pipeline needs, enabling pluggable backends behind one
//! interface. Implementations must be `Send + Sync` to work with async
//! runtimes.
//!
//! Every backend maps its native similarity metric to one convention at
//! this boundary: **larger score = more similar**. Callers never see a
//! store's raw distance semantics.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`initialize`](VectorStore::initialize) | Create the backing collection for a dimensionality |
//! | [`upsert`](VectorStore::upsert) | Insert or replace points |
//! | [`search`](VectorStore::search) | Ranked nearest-neighbor search |
//! | [`delete_by_path`](VectorStore::delete_by_path) | Remove all points for one source path |
//! | [`delete_by_paths`](VectorStore::delete_by_paths) | Remove points for several paths |
//! | [`clear_collection`](VectorStore::clear_collection) | Remove every point, keep the collection |
//! | [`delete_collection`](VectorStore::delete_collection) | Drop the collection entirely |
//! | [`collection_exists`](VectorStore::collection_exists) | Probe for the collection |

pub mod chroma;
pub mod flat;
pub mod qdrant;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

use crate::config::IndexingConfig;

/// Construction-time store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The configured store type is not one this crate supports. No
    /// fallback store is substituted.
    #[error("unsupported vector store type '{0}'")]
    Unsupported(String),
}

/// The closed set of supported vector store backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorStoreKind {
    Qdrant,
    Faiss,
    Chroma,
}

impl VectorStoreKind {
    /// Parse the raw store-type string from the normalized config.
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        match raw {
            "qdrant" => Ok(VectorStoreKind::Qdrant),
            "faiss" => Ok(VectorStoreKind::Faiss),
            "chroma" => Ok(VectorStoreKind::Chroma),
            other => Err(StoreError::Unsupported(other.to_string())),
        }
    }
}

/// Payload stored alongside each vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkPayload {
    /// Source path the chunk came from.
    pub path: String,
    /// The chunk text itself.
    pub text: String,
}

/// One point to upsert: a stable id, its vector, and its payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: ChunkPayload,
}

/// A ranked search hit. Larger score = more similar.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub score: f64,
    pub payload: ChunkPayload,
}

/// Derive a deterministic point id from a chunk's path and content, so
/// re-upserting unchanged content replaces rather than duplicates.
pub fn point_id(path: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    hasher.update([0]);
    hasher.update(text.as_bytes());
    let digest = hex::encode(hasher.finalize());
    Uuid::new_v5(&Uuid::NAMESPACE_OID, digest.as_bytes()).to_string()
}

/// The collection name backing a domain's index.
pub fn collection_name(domain: &str) -> String {
    format!("domain-{}", domain)
}

/// Abstract vector store backend.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the backing collection sized to `dimension`, if absent.
    async fn initialize(&self, dimension: usize) -> Result<()>;

    /// Insert or replace points.
    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<()>;

    /// Ranked similarity search, optionally restricted to paths starting
    /// with `path_prefix`.
    async fn search(
        &self,
        vector: &[f32],
        path_prefix: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SearchHit>>;

    /// Remove all points originating from `path`.
    async fn delete_by_path(&self, path: &str) -> Result<()>;

    /// Remove all points originating from any of `paths`.
    async fn delete_by_paths(&self, paths: &[String]) -> Result<()>;

    /// Remove every point while keeping the collection.
    async fn clear_collection(&self) -> Result<()>;

    /// Drop the collection entirely.
    async fn delete_collection(&self) -> Result<()>;

    /// Whether the backing collection exists.
    async fn collection_exists(&self) -> Result<bool>;
}

/// Construct the vector store selected by the normalized configuration.
///
/// Selection is a pure switch on the configured store type; an
/// unrecognized type fails with [`StoreError::Unsupported`]. The flat
/// variant resolves its bundle under `data_dir` per domain.
pub fn create_vector_store(
    config: &IndexingConfig,
    domain: &str,
    data_dir: &Path,
) -> Result<Box<dyn VectorStore>> {
    match VectorStoreKind::parse(&config.vector_store_type)? {
        VectorStoreKind::Qdrant => Ok(Box::new(qdrant::QdrantStore::new(
            &config.vector_store_url,
            &config.vector_store_api_key,
            collection_name(domain),
            config.search_min_score,
        )?)),
        VectorStoreKind::Chroma => Ok(Box::new(chroma::ChromaStore::new(
            &config.vector_store_url,
            &config.vector_store_api_key,
            collection_name(domain),
        )?)),
        VectorStoreKind::Faiss => {
            let bundle = flat::bundle_path(data_dir, domain);
            Ok(Box::new(flat::FlatIndex::load(domain, &bundle)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parse_covers_supported_types() {
        assert_eq!(VectorStoreKind::parse("qdrant").unwrap(), VectorStoreKind::Qdrant);
        assert_eq!(VectorStoreKind::parse("faiss").unwrap(), VectorStoreKind::Faiss);
        assert_eq!(VectorStoreKind::parse("chroma").unwrap(), VectorStoreKind::Chroma);
    }

    #[test]
    fn kind_parse_rejects_unknown() {
        let err = VectorStoreKind::parse("pinecone").unwrap_err();
        assert!(matches!(err, StoreError::Unsupported(ref t) if t == "pinecone"));
    }

    #[test]
    fn factory_fails_on_unknown_type_without_fallback() {
        let config = IndexingConfig {
            vector_store_type: "pinecone".to_string(),
            vector_store_url: "http://localhost".to_string(),
            ..Default::default()
        };
        let result = create_vector_store(&config, "general", Path::new("/tmp"));
        let err = result.err().expect("construction must fail");
        assert!(err.downcast_ref::<StoreError>().is_some());
    }

    #[test]
    fn point_ids_are_deterministic_and_content_sensitive() {
        let a = point_id("src/a.rs", "fn main() {}");
        let b = point_id("src/a.rs", "fn main() {}");
        let c = point_id("src/a.rs", "fn other() {}");
        let d = point_id("src/b.rs", "fn main() {}");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn collection_names_embed_the_domain() {
        assert_eq!(collection_name("healthcare"), "domain-healthcare");
    }
}
