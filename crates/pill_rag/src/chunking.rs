use pill_core::config::validate_chunking;
use pill_core::error::AppError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    /// Offset of the first character of `text` in the source document, counted in chars.
    pub source_offset: usize,
}

pub fn chunk_id(ordinal: usize) -> String {
    format!("chunk_{ordinal}")
}

/// Split `text` into windows of `chunk_size` characters, each starting `chunk_size - overlap`
/// characters after the previous one. The last window may be short.
pub fn split(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<String>, AppError> {
    validate_chunking(chunk_size, overlap)?;
    Ok(windows(text, chunk_size, overlap)
        .into_iter()
        .map(|(_, w)| w.to_string())
        .collect())
}

/// Same windows as [`split`], with stable ids and source offsets attached.
pub fn chunk_document(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<Chunk>, AppError> {
    validate_chunking(chunk_size, overlap)?;
    Ok(windows(text, chunk_size, overlap)
        .into_iter()
        .enumerate()
        .map(|(i, (offset, w))| Chunk {
            id: chunk_id(i),
            text: w.to_string(),
            source_offset: offset,
        })
        .collect())
}

fn windows(text: &str, chunk_size: usize, overlap: usize) -> Vec<(usize, &str)> {
    // Byte offset of every char boundary, including the end of the string.
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_count = bounds.len() - 1;
    let step = chunk_size - overlap;

    let mut out = Vec::with_capacity((char_count / step).saturating_add(1));
    let mut start = 0usize;
    while start < char_count {
        let end = start.saturating_add(chunk_size).min(char_count);
        out.push((start, &text[bounds[start]..bounds[end]]));
        start = start.saturating_add(step);
    }
    out
}
