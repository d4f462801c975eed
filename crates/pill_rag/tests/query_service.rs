use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use pill_core::domain::MedicineDetail;
use pill_core::error::{
    AppError, FailureReason, GENERATION_FAILED, INDEX_EMPTY, MALFORMED_RESPONSE, RETRIEVAL_FAILED,
};
use pill_core::history::{HistoryOutcome, SqliteHistory};
use pill_rag::embeddings::{Embedder, Embedding};
use pill_rag::index::VectorIndex;
use pill_rag::llm::{GenerationRequest, Generator, ResponseFormat};
use pill_rag::loader::CorpusLoader;
use pill_rag::query::{LookupOutcome, QueryService, QueryStage};
use pretty_assertions::assert_eq;

const CORPUS: &str = "Aspirin treats headache.\n---\nIbuprofen treats inflammation.";
const KEYWORDS: [&str; 3] = ["aspirin", "ibuprofen", "inflamm"];

/// Bag-of-keywords embedding; counts calls.
struct KeywordEmbedder {
    calls: AtomicUsize,
}

impl KeywordEmbedder {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Embedder for KeywordEmbedder {
    fn embed(&self, texts: &[&str]) -> Result<Vec<Embedding>, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let lower = t.to_lowercase();
                Embedding {
                    vector: KEYWORDS
                        .iter()
                        .map(|k| lower.matches(k).count() as f32)
                        .collect(),
                    source_index: i,
                }
            })
            .collect())
    }
}

struct ScriptedGenerator {
    reply: Result<String, AppError>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    fn replying(reply: &str) -> Self {
        Self {
            reply: Ok(reply.to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn failing(err: AppError) -> Self {
        Self {
            reply: Err(err),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().expect("lock").clone()
    }
}

impl Generator for ScriptedGenerator {
    fn generate(&self, request: &GenerationRequest) -> Result<String, AppError> {
        self.requests.lock().expect("lock").push(request.clone());
        self.reply.clone()
    }
}

fn loaded_index(root: &std::path::Path, embedder: Arc<KeywordEmbedder>) -> Arc<VectorIndex> {
    let index = Arc::new(VectorIndex::open(root, "meds").expect("open"));
    CorpusLoader::new(embedder, index.clone())
        .load(CORPUS, 30, 5)
        .expect("load corpus");
    index
}

const ASPIRIN_JSON: &str =
    r#"{"condition": "headache", "instructions": "take with water", "sideEffects": ["stomach upset"]}"#;

#[test]
fn aspirin_lookup_ranks_the_aspirin_chunk_first_and_answers() {
    let root = tempfile::tempdir().expect("tempdir");
    let embedder = Arc::new(KeywordEmbedder::new());
    let index = loaded_index(root.path(), embedder.clone());
    let generator = Arc::new(ScriptedGenerator::replying(ASPIRIN_JSON));
    let service = QueryService::new(embedder, index, generator.clone(), 3);

    let hits = service.retrieve("Aspirin").expect("retrieve");
    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0].id, "chunk_0");
    assert!(hits[0].text.contains("Aspirin"));

    let detail = service.answer("Aspirin").expect("answer");
    assert_eq!(
        detail,
        MedicineDetail {
            condition: Some("headache".to_string()),
            instructions: Some("take with water".to_string()),
            side_effects: vec!["stomach upset".to_string()],
        }
    );

    let requests = generator.requests();
    assert_eq!(requests.len(), 1);
    let req = &requests[0];
    assert_eq!(req.response_format, ResponseFormat::Json);
    assert!(req.image.is_none());
    assert!(req.prompt.contains("MEDICINE NAME: Aspirin"));
    // Best chunk leads the context; chunks are separated by the context separator.
    assert!(req
        .prompt
        .contains("CONTEXT:\nAspirin treats headache.\n---\nI\n---\n---\nIbuprofen"));
}

#[test]
fn non_json_generation_is_a_tagged_malformed_failure() {
    let root = tempfile::tempdir().expect("tempdir");
    let embedder = Arc::new(KeywordEmbedder::new());
    let index = loaded_index(root.path(), embedder.clone());
    let generator = Arc::new(ScriptedGenerator::replying("Aspirin is for headaches."));
    let service = QueryService::new(embedder, index, generator, 3);

    let err = service.answer("Aspirin").expect_err("malformed");
    assert_eq!(err.code, MALFORMED_RESPONSE);

    match service.answer_outcome("Aspirin") {
        LookupOutcome::Failed {
            reason,
            stage,
            code,
            ..
        } => {
            assert_eq!(reason, FailureReason::MalformedResponse);
            assert_eq!(stage, QueryStage::Parsing);
            assert_eq!(code, MALFORMED_RESPONSE);
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[test]
fn empty_index_fails_at_retrieval_without_generating() {
    let root = tempfile::tempdir().expect("tempdir");
    let embedder = Arc::new(KeywordEmbedder::new());
    let index = Arc::new(VectorIndex::open(root.path(), "meds").expect("open"));
    let generator = Arc::new(ScriptedGenerator::replying(ASPIRIN_JSON));
    let service = QueryService::new(embedder, index, generator.clone(), 3);

    let outcome = service.answer_outcome("Aspirin");
    assert_eq!(
        outcome,
        LookupOutcome::Failed {
            reason: FailureReason::EmptyIndex,
            stage: QueryStage::Retrieving,
            code: INDEX_EMPTY.to_string(),
            message: "Index is empty; load a corpus before querying".to_string(),
        }
    );
    assert!(generator.requests().is_empty());
}

#[test]
fn blank_names_fail_before_any_provider_call() {
    let root = tempfile::tempdir().expect("tempdir");
    let embedder = Arc::new(KeywordEmbedder::new());
    let index = loaded_index(root.path(), embedder.clone());
    let calls_after_load = embedder.call_count();
    let generator = Arc::new(ScriptedGenerator::replying(ASPIRIN_JSON));
    let service = QueryService::new(embedder.clone(), index, generator.clone(), 3);

    match service.answer_outcome("   ") {
        LookupOutcome::Failed { reason, stage, .. } => {
            assert_eq!(reason, FailureReason::Retrieval);
            assert_eq!(stage, QueryStage::Created);
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(service.answer("").expect_err("blank").code, RETRIEVAL_FAILED);
    assert_eq!(embedder.call_count(), calls_after_load);
    assert!(generator.requests().is_empty());
}

#[test]
fn provider_errors_are_normalised_to_generation_failures() {
    let root = tempfile::tempdir().expect("tempdir");
    let embedder = Arc::new(KeywordEmbedder::new());
    let index = loaded_index(root.path(), embedder.clone());
    let generator = Arc::new(ScriptedGenerator::failing(
        AppError::new("UPSTREAM_TIMEOUT", "timed out").with_retryable(true),
    ));
    let service = QueryService::new(embedder, index, generator, 3);

    let err = service.answer("Aspirin").expect_err("generation");
    assert_eq!(err.code, GENERATION_FAILED);
    assert!(err.retryable);
    assert_eq!(err.failure_reason(), Some(FailureReason::Generation));
}

#[test]
fn every_lookup_is_appended_to_history() {
    let root = tempfile::tempdir().expect("tempdir");
    let embedder = Arc::new(KeywordEmbedder::new());
    let index = loaded_index(root.path(), embedder.clone());
    let history = Arc::new(SqliteHistory::open_in_memory().expect("history"));
    let generator = Arc::new(ScriptedGenerator::replying(ASPIRIN_JSON));
    let service = QueryService::new(embedder, index, generator, 3).with_history(history.clone());

    assert!(service.answer_outcome("Aspirin").is_completed());
    let bad = QueryService::new(
        Arc::new(KeywordEmbedder::new()),
        Arc::new(VectorIndex::open(&root.path().join("empty"), "meds").expect("open")),
        Arc::new(ScriptedGenerator::replying(ASPIRIN_JSON)),
        3,
    )
    .with_history(history.clone());
    assert!(!bad.answer_outcome("Ibuprofen").is_completed());
    // Blank names are not recorded.
    let _ = service.answer_outcome(" ");

    let entries = history.list_recent(10).expect("list");
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].medicine_name, "Ibuprofen");
    assert_eq!(entries[0].outcome, HistoryOutcome::Failed);
    assert_eq!(entries[0].failure_code.as_deref(), Some(INDEX_EMPTY));
    assert_eq!(entries[1].medicine_name, "Aspirin");
    assert_eq!(entries[1].outcome, HistoryOutcome::Completed);
    let payload: MedicineDetail = serde_json::from_str(&entries[1].payload_json).expect("payload");
    assert_eq!(payload.condition.as_deref(), Some("headache"));
}
