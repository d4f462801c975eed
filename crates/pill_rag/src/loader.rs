//! One-shot corpus ingestion: chunk, embed, commit.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use pill_core::error::{AppError, EMBEDDING_FAILED};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::chunking::{chunk_document, Chunk};
use crate::embeddings::{embed_all, Embedder};
use crate::index::{CommitMeta, IndexEntry, IndexStatus, VectorIndex};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoadSummary {
    pub chunk_count: u32,
    pub batch_count: u32,
    pub dims: Option<u32>,
    pub corpus_sha256: String,
    pub status: IndexStatus,
}

pub struct CorpusLoader {
    embedder: Arc<dyn Embedder>,
    index: Arc<VectorIndex>,
}

impl CorpusLoader {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<VectorIndex>) -> Self {
        Self { embedder, index }
    }

    /// Chunk and embed `document`, then upsert every chunk in a single commit. Chunks of an
    /// earlier, longer corpus stay behind; use [`CorpusLoader::rebuild`] to re-index.
    pub fn load(&self, document: &str, chunk_size: usize, overlap: usize) -> Result<LoadSummary, AppError> {
        self.ingest(document, chunk_size, overlap, false)
    }

    /// Like [`CorpusLoader::load`], but the committed generation replaces the whole collection.
    pub fn rebuild(&self, document: &str, chunk_size: usize, overlap: usize) -> Result<LoadSummary, AppError> {
        self.ingest(document, chunk_size, overlap, true)
    }

    /// Read a corpus from disk and [`rebuild`](CorpusLoader::rebuild) or, with
    /// `replace == false`, [`load`](CorpusLoader::load) it.
    pub fn load_file(
        &self,
        path: &Path,
        chunk_size: usize,
        overlap: usize,
        replace: bool,
    ) -> Result<LoadSummary, AppError> {
        let document = fs::read_to_string(path).map_err(|e| {
            AppError::new("CORPUS_READ_FAILED", "Failed to read corpus file")
                .with_details(format!("path={}; err={}", path.display(), e))
        })?;
        info!(path = %path.display(), bytes = document.len(), "read corpus file");
        self.ingest(&document, chunk_size, overlap, replace)
    }

    fn ingest(
        &self,
        document: &str,
        chunk_size: usize,
        overlap: usize,
        replace: bool,
    ) -> Result<LoadSummary, AppError> {
        let chunks = chunk_document(document, chunk_size, overlap)?;
        if chunks.is_empty() {
            return Err(AppError::new("CORPUS_EMPTY", "Corpus produced no chunks"));
        }
        let chunk_count = chunks.len();
        let corpus_sha256 = hex::encode(Sha256::digest(document.as_bytes()));
        let batch_size = self.embedder.max_batch_size().max(1);
        let batch_count = chunks.len().div_ceil(batch_size);
        info!(
            collection = %self.index.collection(),
            chunks = chunks.len(),
            batches = batch_count,
            chunk_size,
            overlap,
            "embedding corpus"
        );

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let vectors = embed_all(self.embedder.as_ref(), &texts).map_err(|e| {
            if e.code == EMBEDDING_FAILED {
                e
            } else {
                AppError::new(EMBEDDING_FAILED, "Failed to compute corpus embeddings")
                    .with_details(format!("code={}; err={}", e.code, e.message))
                    .with_retryable(e.retryable)
            }
        })?;

        let entries = to_entries(chunks, vectors);
        let meta = CommitMeta {
            corpus_sha256: Some(corpus_sha256.clone()),
        };
        let status = if replace {
            self.index.replace_all(entries, meta)?
        } else {
            self.index.add_batch_with_meta(entries, meta)?
        };

        Ok(LoadSummary {
            chunk_count: chunk_count as u32,
            batch_count: batch_count as u32,
            dims: status.dims,
            corpus_sha256,
            status,
        })
    }
}

fn to_entries(chunks: Vec<Chunk>, vectors: Vec<Vec<f32>>) -> Vec<IndexEntry> {
    chunks
        .into_iter()
        .zip(vectors)
        .map(|(c, vector)| IndexEntry {
            id: c.id,
            text: c.text,
            vector,
        })
        .collect()
}
