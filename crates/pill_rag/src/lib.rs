pub mod chunking;
pub mod embeddings;
pub mod gemini;
pub mod index;
pub mod intake;
pub mod llm;
pub mod loader;
pub mod query;
pub mod retry;
