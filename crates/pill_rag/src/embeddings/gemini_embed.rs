use std::time::Duration;

use pill_core::config::GeminiConfig;
use pill_core::error::{AppError, EMBEDDING_FAILED};
use serde::{Deserialize, Serialize};

use super::{Embedder, Embedding};
use crate::gemini::GeminiClient;

/// Gemini's documented ceiling for `batchEmbedContents`.
pub const GEMINI_MAX_BATCH: usize = 100;

#[derive(Debug, Clone)]
pub struct GeminiEmbedder {
    client: GeminiClient,
    model: String,
    timeout: Duration,
    max_batch_size: usize,
}

impl GeminiEmbedder {
    pub fn new(client: GeminiClient, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            model: model.into(),
            timeout,
            max_batch_size: GEMINI_MAX_BATCH,
        }
    }

    pub fn from_config(client: GeminiClient, cfg: &GeminiConfig) -> Self {
        Self::new(
            client,
            cfg.embedding_model.clone(),
            Duration::from_secs(cfg.embed_timeout_secs),
        )
        .with_max_batch_size(cfg.max_batch_size)
    }

    pub fn with_max_batch_size(mut self, n: usize) -> Self {
        self.max_batch_size = n.clamp(1, GEMINI_MAX_BATCH);
        self
    }
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: String,
    content: Content<'a>,
}

#[derive(Debug, Serialize)]
struct BatchEmbedRequest<'a> {
    requests: Vec<EmbedRequest<'a>>,
}

#[derive(Debug, Deserialize)]
struct ContentEmbedding {
    #[serde(default)]
    values: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<ContentEmbedding>,
}

impl Embedder for GeminiEmbedder {
    fn embed(&self, texts: &[&str]) -> Result<Vec<Embedding>, AppError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.len() > self.max_batch_size {
            return Err(AppError::new(
                EMBEDDING_FAILED,
                "Embedding batch exceeds provider limit",
            )
            .with_details(format!("batch={}; max={}", texts.len(), self.max_batch_size)));
        }

        let model_ref = format!("models/{}", self.model.trim_start_matches("models/"));
        let req = BatchEmbedRequest {
            requests: texts
                .iter()
                .map(|t| EmbedRequest {
                    model: model_ref.clone(),
                    content: Content {
                        parts: [Part { text: *t }],
                    },
                })
                .collect(),
        };

        let resp: BatchEmbedResponse = self.client.call(
            &self.model,
            "batchEmbedContents",
            &req,
            self.timeout,
            EMBEDDING_FAILED,
        )?;

        if resp.embeddings.len() != texts.len() {
            return Err(AppError::new(
                EMBEDDING_FAILED,
                "Gemini returned an unexpected number of embeddings",
            )
            .with_details(format!("expected={}; got={}", texts.len(), resp.embeddings.len())));
        }
        // Gemini answers in request order.
        resp.embeddings
            .into_iter()
            .enumerate()
            .map(|(i, e)| {
                if e.values.is_empty() {
                    return Err(AppError::new(EMBEDDING_FAILED, "Embeddings response was empty")
                        .with_details(format!("source_index={i}")));
                }
                Ok(Embedding {
                    vector: e.values,
                    source_index: i,
                })
            })
            .collect()
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }
}
