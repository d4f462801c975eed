use pill_core::error::{AppError, EMBEDDING_FAILED};

/// One vector returned by a provider, tagged with the position of its input in the request.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub source_index: usize,
}

pub trait Embedder: Send + Sync {
    fn embed(&self, texts: &[&str]) -> Result<Vec<Embedding>, AppError>;

    /// Largest request the provider accepts. Callers split bigger inputs.
    fn max_batch_size(&self) -> usize {
        usize::MAX
    }
}

/// Single-item convenience over [`Embedder::embed`].
pub fn embed_one(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>, AppError> {
    let mut out = embedder.embed(&[text])?;
    match out.pop() {
        Some(e) if out.is_empty() && e.source_index == 0 => Ok(e.vector),
        _ => Err(AppError::new(
            EMBEDDING_FAILED,
            "Embedding provider returned an unexpected number of vectors",
        )
        .with_details("expected=1".to_string())),
    }
}

/// Embed every input, splitting into provider-sized batches, and return vectors in input order.
pub fn embed_all(embedder: &dyn Embedder, texts: &[&str]) -> Result<Vec<Vec<f32>>, AppError> {
    let batch_size = embedder.max_batch_size().max(1);
    let mut out: Vec<Option<Vec<f32>>> = vec![None; texts.len()];

    for (batch_no, batch) in texts.chunks(batch_size).enumerate() {
        let offset = batch_no * batch_size;
        let got = embedder.embed(batch)?;
        if got.len() != batch.len() {
            return Err(AppError::new(
                EMBEDDING_FAILED,
                "Embedding provider returned an unexpected number of vectors",
            )
            .with_details(format!("batch={batch_no}; expected={}; got={}", batch.len(), got.len())));
        }
        for e in got {
            let slot = out.get_mut(offset + e.source_index).filter(|_| e.source_index < batch.len());
            match slot {
                Some(s) if s.is_none() => *s = Some(e.vector),
                _ => {
                    return Err(AppError::new(
                        EMBEDDING_FAILED,
                        "Embedding provider returned an invalid source index",
                    )
                    .with_details(format!("batch={batch_no}; source_index={}", e.source_index)))
                }
            }
        }
    }

    // Every slot is filled: counts matched and indices were unique and in range.
    Ok(out.into_iter().flatten().collect())
}

pub mod gemini_embed;
