//! Persistent nearest-neighbour index over chunk embeddings.
//!
//! Similarity is cosine, computed from raw stored vectors with norms taken at query time, so
//! indexing and querying always agree on normalisation. Access is single writer / many readers:
//! readers work on an immutable snapshot of the active generation, writers build the next
//! generation, persist it and then swap it in.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use pill_core::clock::now_rfc3339_utc;
use pill_core::error::{AppError, DIMENSION_MISMATCH, INDEX_EMPTY, RETRIEVAL_FAILED};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

mod similarity;
mod store;

pub use similarity::{cosine_similarity, l2_norm};
use store::{CollectionStore, PersistedCollection, FORMAT_VERSION};

pub const METRIC: &str = "cosine";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexEntry {
    pub id: String,
    pub text: String,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredEntry {
    pub id: String,
    pub text: String,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexStatus {
    pub ready: bool,
    pub collection: String,
    pub metric: String,
    pub dims: Option<u32>,
    pub entry_count: u32,
    pub generation: u64,
    pub updated_at: Option<String>,
    pub corpus_sha256: Option<String>,
}

/// Provenance recorded alongside a commit.
#[derive(Debug, Clone, Default)]
pub struct CommitMeta {
    pub corpus_sha256: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct Generation {
    number: u64,
    dims: Option<usize>,
    entries: BTreeMap<String, IndexEntry>,
    updated_at: Option<String>,
    corpus_sha256: Option<String>,
}

pub struct VectorIndex {
    collection: String,
    store: CollectionStore,
    active: ArcSwap<Generation>,
    writer: Mutex<()>,
}

impl VectorIndex {
    /// Open (or lazily create) the named collection under `root`.
    pub fn open(root: &Path, collection: &str) -> Result<Self, AppError> {
        validate_collection_name(collection)?;
        let store = CollectionStore::new(root, collection);
        let generation = match store.read()? {
            Some(p) => {
                if p.metric != METRIC {
                    return Err(AppError::new(
                        "INDEX_STORE_FAILED",
                        "Index was built with a different similarity metric; rebuild the index",
                    )
                    .with_details(format!("found={}; expected={METRIC}", p.metric)));
                }
                let dims = p.dims.map(|d| d as usize);
                let mut entries = BTreeMap::new();
                for e in p.entries {
                    if Some(e.vector.len()) != dims {
                        return Err(AppError::new(
                            "INDEX_STORE_FAILED",
                            "Persisted index entry has the wrong dimension",
                        )
                        .with_details(format!(
                            "id={}; expected={:?}; got={}",
                            e.id,
                            dims,
                            e.vector.len()
                        )));
                    }
                    entries.insert(e.id.clone(), e);
                }
                Generation {
                    number: p.generation,
                    dims,
                    entries,
                    updated_at: p.updated_at,
                    corpus_sha256: p.corpus_sha256,
                }
            }
            None => Generation::default(),
        };
        debug!(
            collection,
            path = %store.dir().display(),
            entries = generation.entries.len(),
            "opened vector index"
        );
        Ok(Self {
            collection: collection.to_string(),
            store,
            active: ArcSwap::from_pointee(generation),
            writer: Mutex::new(()),
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn len(&self) -> usize {
        self.active.load().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimension(&self) -> Option<usize> {
        self.active.load().dims
    }

    pub fn get(&self, id: &str) -> Option<IndexEntry> {
        self.active.load().entries.get(id).cloned()
    }

    pub fn status(&self) -> IndexStatus {
        let g = self.active.load();
        IndexStatus {
            ready: !g.entries.is_empty(),
            collection: self.collection.clone(),
            metric: METRIC.to_string(),
            dims: g.dims.map(|d| d as u32),
            entry_count: g.entries.len() as u32,
            generation: g.number,
            updated_at: g.updated_at.clone(),
            corpus_sha256: g.corpus_sha256.clone(),
        }
    }

    /// Upsert a batch. Upserting into a non-empty collection clears `corpus_sha256` unless the
    /// batch carries the same hash. The whole batch is validated before anything changes; a rejected batch
    /// leaves both the in-memory snapshot and the persisted collection untouched.
    pub fn add_batch(&self, entries: Vec<IndexEntry>) -> Result<IndexStatus, AppError> {
        self.add_batch_with_meta(entries, CommitMeta::default())
    }

    pub fn add_batch_with_meta(
        &self,
        entries: Vec<IndexEntry>,
        meta: CommitMeta,
    ) -> Result<IndexStatus, AppError> {
        let _guard = self.lock_writer()?;
        let current = self.active.load_full();
        let dims = validate_batch(current.dims, &entries)?;
        if entries.is_empty() {
            return Ok(self.status());
        }

        let mut next_entries = current.entries.clone();
        let added = entries.len();
        for e in entries {
            next_entries.insert(e.id.clone(), e);
        }
        let next = Generation {
            number: current.number + 1,
            dims,
            entries: next_entries,
            updated_at: Some(now_rfc3339_utc()?),
            corpus_sha256: merged_corpus_hash(&current, meta.corpus_sha256),
        };
        self.commit(next, added)
    }

    /// Replace the whole collection with `entries` as a fresh generation (re-indexing). The
    /// dimension is re-established from the new entries.
    pub fn replace_all(&self, entries: Vec<IndexEntry>, meta: CommitMeta) -> Result<IndexStatus, AppError> {
        let _guard = self.lock_writer()?;
        let current = self.active.load_full();
        let dims = validate_batch(None, &entries)?;
        let added = entries.len();
        let next = Generation {
            number: current.number + 1,
            dims,
            entries: entries.into_iter().map(|e| (e.id.clone(), e)).collect(),
            updated_at: Some(now_rfc3339_utc()?),
            corpus_sha256: meta.corpus_sha256,
        };
        self.commit(next, added)
    }

    /// Up to `k` entries ranked by descending cosine similarity, ties broken by id.
    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredEntry>, AppError> {
        let snapshot = self.active.load_full();
        if snapshot.entries.is_empty() {
            return Err(AppError::new(
                INDEX_EMPTY,
                "Index is empty; load a corpus before querying",
            )
            .with_details(format!("collection={}", self.collection)));
        }
        if k == 0 {
            return Ok(Vec::new());
        }
        if let Some(dims) = snapshot.dims {
            if vector.len() != dims {
                return Err(AppError::new(
                    DIMENSION_MISMATCH,
                    "Query vector dims do not match index dims",
                )
                .with_details(format!("index_dims={dims}; query_dims={}", vector.len())));
            }
        }
        let qnorm = l2_norm(vector);
        if qnorm == 0.0 || !qnorm.is_finite() {
            return Err(AppError::new(
                RETRIEVAL_FAILED,
                "Query vector norm is zero or not finite",
            ));
        }

        let mut hits: Vec<(&IndexEntry, f32)> = snapshot
            .entries
            .values()
            .map(|e| {
                let score = cosine_similarity(vector, &e.vector, qnorm, l2_norm(&e.vector));
                (e, score)
            })
            .collect();
        hits.sort_by(|a, b| {
            b.1.total_cmp(&a.1).then(a.0.id.cmp(&b.0.id))
        });
        hits.truncate(k);

        Ok(hits
            .into_iter()
            .map(|(e, score)| ScoredEntry {
                id: e.id.clone(),
                text: e.text.clone(),
                score,
            })
            .collect())
    }

    fn lock_writer(&self) -> Result<std::sync::MutexGuard<'_, ()>, AppError> {
        self.writer
            .lock()
            .map_err(|_| AppError::new("INDEX_STORE_FAILED", "Index writer lock poisoned"))
    }

    // Persist first; only a durable generation becomes visible to readers.
    fn commit(&self, next: Generation, added: usize) -> Result<IndexStatus, AppError> {
        let persisted = PersistedCollection {
            format_version: FORMAT_VERSION,
            collection: self.collection.clone(),
            metric: METRIC.to_string(),
            dims: next.dims.map(|d| d as u32),
            generation: next.number,
            updated_at: next.updated_at.clone(),
            corpus_sha256: next.corpus_sha256.clone(),
            entries: next.entries.values().cloned().collect(),
        };
        self.store.write(&persisted)?;
        info!(
            collection = %self.collection,
            generation = next.number,
            added,
            total = next.entries.len(),
            "committed index generation"
        );
        self.active.store(Arc::new(next));
        Ok(self.status())
    }
}

// The hash only describes the collection while every entry came from that one corpus; an upsert
// over a non-empty generation from anything else leaves the provenance unknown.
fn merged_corpus_hash(current: &Generation, incoming: Option<String>) -> Option<String> {
    if current.entries.is_empty() {
        return incoming;
    }
    match incoming {
        Some(h) if current.corpus_sha256.as_deref() == Some(h.as_str()) => Some(h),
        _ => None,
    }
}

fn validate_collection_name(name: &str) -> Result<(), AppError> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !ok {
        return Err(AppError::new(
            "INDEX_STORE_FAILED",
            "Collection names may only contain ASCII letters, digits, '_' and '-'",
        )
        .with_details(format!("collection={name}")));
    }
    Ok(())
}

/// Returns the dimension the collection will have once the batch is applied.
fn validate_batch(established: Option<usize>, entries: &[IndexEntry]) -> Result<Option<usize>, AppError> {
    let mut dims = established;
    for e in entries {
        if e.id.trim().is_empty() {
            return Err(AppError::new("INDEX_ENTRY_INVALID", "Index entry id must not be empty"));
        }
        if e.vector.is_empty() {
            return Err(AppError::new(DIMENSION_MISMATCH, "Index entry vector is empty")
                .with_details(format!("id={}", e.id)));
        }
        if e.vector.iter().any(|x| !x.is_finite()) {
            return Err(AppError::new(
                "INDEX_ENTRY_INVALID",
                "Index entry vector contains non-finite values",
            )
            .with_details(format!("id={}", e.id)));
        }
        match dims {
            Some(d) if d != e.vector.len() => {
                return Err(AppError::new(
                    DIMENSION_MISMATCH,
                    "Embedding dimension does not match the index",
                )
                .with_details(format!("expected={d}; got={}; id={}", e.vector.len(), e.id)));
            }
            Some(_) => {}
            None => dims = Some(e.vector.len()),
        }
    }
    Ok(dims)
}
