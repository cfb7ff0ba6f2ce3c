//! In-process flat index backed by a per-domain bundle file.
//!
//! A bundle is a JSON file holding parallel `vectors` and `texts` arrays
//! (optionally an explicit `dimension`). Loading is all-or-nothing: any
//! inconsistency (missing file, unparsable JSON, length mismatch, ragged
//! vectors) fails the load and leaves no index behind.
//!
//! Search scans every stored vector and scores it by **negative Euclidean
//! distance**, so larger scores mean more similar and the ordering matches
//! the other store backends. Ties keep insertion order (the sort is
//! stable), which keeps results deterministic across runs on unchanged
//! data.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use thiserror::Error;

use super::{ChunkPayload, SearchHit, VectorPoint, VectorStore};

/// Bundle-loading failures. The cache slot stays empty on any of these.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("bundle not found at {}", .0.display())]
    Missing(PathBuf),

    #[error("failed to read bundle {}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse bundle {}: {}", .path.display(), .source)]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("bundle holds {vectors} vectors but {texts} texts")]
    LengthMismatch { vectors: usize, texts: usize },

    #[error("bundle vector {index} has {actual} dimensions, expected {expected}")]
    RaggedVector {
        index: usize,
        expected: usize,
        actual: usize,
    },

    #[error("bundle is empty and declares no dimension")]
    EmptyBundle,
}

/// On-disk bundle shape.
#[derive(Debug, Serialize, Deserialize)]
struct BundleFile {
    #[serde(default)]
    dimension: Option<usize>,
    vectors: Vec<Vec<f32>>,
    texts: Vec<String>,
}

/// The bundle file backing a domain's flat index.
pub fn bundle_path(data_dir: &Path, domain: &str) -> PathBuf {
    data_dir.join(format!("{}.json", domain))
}

struct Entry {
    vector: Vec<f32>,
    text: String,
    path: String,
}

/// In-process flat vector index for one domain.
pub struct FlatIndex {
    domain: String,
    dimension: usize,
    entries: RwLock<Vec<Entry>>,
    loaded: bool,
}

impl FlatIndex {
    /// Load a domain's bundle from disk.
    pub fn load(domain: &str, bundle: &Path) -> Result<Self, LoadError> {
        if !bundle.exists() {
            return Err(LoadError::Missing(bundle.to_path_buf()));
        }

        let content = std::fs::read_to_string(bundle).map_err(|source| LoadError::Io {
            path: bundle.to_path_buf(),
            source,
        })?;
        let parsed: BundleFile =
            serde_json::from_str(&content).map_err(|source| LoadError::Parse {
                path: bundle.to_path_buf(),
                source,
            })?;

        if parsed.vectors.len() != parsed.texts.len() {
            return Err(LoadError::LengthMismatch {
                vectors: parsed.vectors.len(),
                texts: parsed.texts.len(),
            });
        }

        let dimension = match parsed.dimension.or_else(|| parsed.vectors.first().map(Vec::len)) {
            Some(d) if d > 0 => d,
            _ => return Err(LoadError::EmptyBundle),
        };

        for (index, vector) in parsed.vectors.iter().enumerate() {
            if vector.len() != dimension {
                return Err(LoadError::RaggedVector {
                    index,
                    expected: dimension,
                    actual: vector.len(),
                });
            }
        }

        let entries = parsed
            .vectors
            .into_iter()
            .zip(parsed.texts)
            .map(|(vector, text)| Entry {
                vector,
                text,
                path: String::new(),
            })
            .collect();

        Ok(Self {
            domain: domain.to_string(),
            dimension,
            entries: RwLock::new(entries),
            loaded: true,
        })
    }

    /// Build an index directly from `(vector, text)` pairs.
    ///
    /// Used by tests and embedding hosts that hold bundles in memory.
    pub fn from_pairs(
        domain: &str,
        dimension: usize,
        pairs: Vec<(Vec<f32>, String)>,
    ) -> Self {
        let entries = pairs
            .into_iter()
            .map(|(vector, text)| Entry {
                vector,
                text,
                path: String::new(),
            })
            .collect();
        Self {
            domain: domain.to_string(),
            dimension,
            entries: RwLock::new(entries),
            loaded: true,
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Score every stored vector against `query`, descending, ties in
    /// insertion order.
    pub fn score_all(&self, query: &[f32]) -> Vec<SearchHit> {
        let entries = self.entries.read().unwrap();
        let mut hits: Vec<SearchHit> = entries
            .iter()
            .map(|entry| SearchHit {
                score: neg_euclidean(query, &entry.vector),
                payload: ChunkPayload {
                    path: entry.path.clone(),
                    text: entry.text.clone(),
                },
            })
            .collect();
        // sort_by is stable: equal scores keep insertion order.
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits
    }
}

/// Negative Euclidean distance: 0 for identical vectors, increasingly
/// negative with distance.
fn neg_euclidean(a: &[f32], b: &[f32]) -> f64 {
    let sum: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = (*x - *y) as f64;
            d * d
        })
        .sum();
    -sum.sqrt()
}

#[async_trait]
impl VectorStore for FlatIndex {
    async fn initialize(&self, _dimension: usize) -> Result<()> {
        Ok(())
    }

    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<()> {
        let mut entries = self.entries.write().unwrap();
        for point in points {
            entries.push(Entry {
                vector: point.vector,
                text: point.payload.text,
                path: point.payload.path,
            });
        }
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        path_prefix: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let mut hits = self.score_all(vector);
        if let Some(prefix) = path_prefix {
            hits.retain(|h| h.payload.path.starts_with(prefix));
        }
        hits.truncate(limit);
        Ok(hits)
    }

    async fn delete_by_path(&self, path: &str) -> Result<()> {
        self.entries.write().unwrap().retain(|e| e.path != path);
        Ok(())
    }

    async fn delete_by_paths(&self, paths: &[String]) -> Result<()> {
        self.entries
            .write()
            .unwrap()
            .retain(|e| !paths.contains(&e.path));
        Ok(())
    }

    async fn clear_collection(&self) -> Result<()> {
        self.entries.write().unwrap().clear();
        Ok(())
    }

    async fn delete_collection(&self) -> Result<()> {
        self.entries.write().unwrap().clear();
        Ok(())
    }

    async fn collection_exists(&self) -> Result<bool> {
        Ok(self.loaded)
    }
}
