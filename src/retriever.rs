//! Domain-scoped retrieval over a single cached index.
//!
//! A [`DomainRetriever`] owns at most one loaded [`FlatIndex`] at a time:
//! an explicit optional slot, not a cache with eviction. Requesting a
//! different domain replaces the slot and discards the previous index,
//! including on load failure, so a broken load never leaves a stale or
//! half-initialized index behind; the next call retries from scratch.
//!
//! Loads are serialized through the slot's mutex. A search holds the
//! lock from the load decision through scoring, so an overlapping load
//! for another domain can never swap the index out from under a search
//! in progress.

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::embedder::{embed_query, Embedder};
use crate::store::flat::{bundle_path, FlatIndex, LoadError};

/// Default number of chunks returned by [`DomainRetriever::search`].
pub const DEFAULT_TOP_N: usize = 5;

/// One retrieved chunk, ranked by similarity.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub text: String,
    pub score: f64,
}

/// Retrieval failures.
#[derive(Debug, Error)]
pub enum RetrieveError {
    /// The slot is empty despite a completed load attempt. Defensive
    /// invariant check; should not occur in practice.
    #[error("no index loaded for domain '{0}'")]
    NotLoaded(String),

    /// The embedder returned a vector that does not match the index's
    /// dimensionality. Raised before any scoring happens.
    #[error("embedding has {actual} dimensions but the index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The domain's bundle could not be loaded.
    #[error("failed to load index for domain '{domain}'")]
    Load {
        domain: String,
        #[source]
        source: LoadError,
    },

    /// The embedding call itself failed.
    #[error("query embedding failed")]
    Embed(#[source] anyhow::Error),
}

/// Retrieves top-N chunks for a query against a domain's index.
pub struct DomainRetriever {
    embedder: Arc<dyn Embedder>,
    data_dir: PathBuf,
    slot: Mutex<Option<FlatIndex>>,
}

impl DomainRetriever {
    /// Create a retriever resolving bundles under `data_dir`.
    pub fn new(embedder: Arc<dyn Embedder>, data_dir: PathBuf) -> Self {
        Self {
            embedder,
            data_dir,
            slot: Mutex::new(None),
        }
    }

    fn load_into(
        &self,
        slot: &mut Option<FlatIndex>,
        domain: &str,
    ) -> Result<(), RetrieveError> {
        if slot
            .as_ref()
            .map(|index| index.domain() == domain && index.is_loaded())
            .unwrap_or(false)
        {
            debug!(domain, "index already loaded");
            return Ok(());
        }

        // Discard the previous index before loading: a failed load must
        // leave the slot empty, never a stale index.
        if let Some(previous) = slot.take() {
            debug!(
                previous = previous.domain(),
                requested = domain,
                "replacing cached index"
            );
        }

        let bundle = bundle_path(&self.data_dir, domain);
        let index = FlatIndex::load(domain, &bundle).map_err(|source| RetrieveError::Load {
            domain: domain.to_string(),
            source,
        })?;
        debug!(domain, entries = index.len(), "index loaded");
        *slot = Some(index);
        Ok(())
    }

    /// Ensure the slot holds `domain`'s index, loading it if needed.
    pub async fn ensure_loaded(&self, domain: &str) -> Result<(), RetrieveError> {
        let mut slot = self.slot.lock().await;
        self.load_into(&mut slot, domain)
    }

    /// The domain of the currently cached index, if any.
    pub async fn loaded_domain(&self) -> Option<String> {
        self.slot
            .lock()
            .await
            .as_ref()
            .map(|index| index.domain().to_string())
    }

    /// Retrieve the `top_n` most similar chunks for `query` from
    /// `domain`'s index.
    ///
    /// Results are ranked descending by score; ties keep insertion
    /// order. A short index returns fewer than `top_n` results without
    /// padding or error.
    pub async fn search(
        &self,
        query: &str,
        domain: &str,
        top_n: usize,
    ) -> Result<Vec<RetrievedChunk>, RetrieveError> {
        let mut slot = self.slot.lock().await;
        self.load_into(&mut slot, domain)?;

        let index = slot
            .as_ref()
            .ok_or_else(|| RetrieveError::NotLoaded(domain.to_string()))?;

        let query_vec = embed_query(self.embedder.as_ref(), query)
            .await
            .map_err(RetrieveError::Embed)?;

        if query_vec.len() != index.dimension() {
            return Err(RetrieveError::DimensionMismatch {
                expected: index.dimension(),
                actual: query_vec.len(),
            });
        }

        let mut hits = index.score_all(&query_vec);
        hits.truncate(top_n);

        Ok(hits
            .into_iter()
            .map(|hit| RetrievedChunk {
                text: hit.payload.text,
                score: hit.score,
            })
            .collect())
    }
}
