//! Retrieval-augmented medicine lookup.
//!
//! A lookup walks `Created -> Embedding -> Retrieving -> Prompting -> Generating -> Parsing` and
//! ends `Completed` or `Failed`. Every error leaving a stage is normalised to the stage's
//! failure code, so callers always see one of the lookup taxonomy codes.

use std::sync::Arc;

use pill_core::clock::now_rfc3339_utc;
use pill_core::domain::{MedicineDetail, PrescriptionRecord};
use pill_core::error::{
    AppError, FailureReason, EMBEDDING_FAILED, GENERATION_FAILED, INDEX_EMPTY,
    MALFORMED_RESPONSE, RETRIEVAL_FAILED,
};
use pill_core::history::{HistoryEntryInput, HistoryOutcome, HistorySink};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::embeddings::{embed_one, Embedder};
use crate::index::{ScoredEntry, VectorIndex};
use crate::llm::{GenerationRequest, Generator};

pub mod prompts;

/// Joins retrieved chunk texts inside the prompt context.
pub const CONTEXT_SEPARATOR: &str = "\n---\n";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueryStage {
    Created,
    Embedding,
    Retrieving,
    Prompting,
    Generating,
    Parsing,
    Completed,
    Failed,
}

/// Terminal state of one lookup. A failure always names its stage and reason.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LookupOutcome {
    Completed {
        detail: MedicineDetail,
    },
    Failed {
        reason: FailureReason,
        stage: QueryStage,
        code: String,
        message: String,
    },
}

impl LookupOutcome {
    pub fn detail(&self) -> Option<&MedicineDetail> {
        match self {
            Self::Completed { detail } => Some(detail),
            Self::Failed { .. } => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    fn from_result(result: Result<MedicineDetail, StageFailure>) -> Self {
        match result {
            Ok(detail) => Self::Completed { detail },
            Err(f) => Self::Failed {
                reason: f.error.failure_reason().unwrap_or(FailureReason::Retrieval),
                stage: f.stage,
                code: f.error.code,
                message: f.error.message,
            },
        }
    }
}

#[derive(Debug)]
struct StageFailure {
    stage: QueryStage,
    error: AppError,
}

struct StageTracker<'a> {
    medicine: &'a str,
    stage: QueryStage,
}

impl<'a> StageTracker<'a> {
    fn new(medicine: &'a str) -> Self {
        debug!(medicine, stage = ?QueryStage::Created, "lookup created");
        Self {
            medicine,
            stage: QueryStage::Created,
        }
    }

    fn advance(&mut self, next: QueryStage) {
        debug!(medicine = self.medicine, from = ?self.stage, to = ?next, "lookup stage");
        self.stage = next;
    }

    fn fail(&self, error: AppError) -> StageFailure {
        debug!(
            medicine = self.medicine,
            from = ?self.stage,
            to = ?QueryStage::Failed,
            code = %error.code,
            "lookup stage"
        );
        StageFailure {
            stage: self.stage,
            error,
        }
    }
}

pub struct QueryService {
    embedder: Arc<dyn Embedder>,
    index: Arc<VectorIndex>,
    generator: Arc<dyn Generator>,
    top_k: usize,
    history: Option<Arc<dyn HistorySink>>,
}

impl QueryService {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<VectorIndex>,
        generator: Arc<dyn Generator>,
        top_k: usize,
    ) -> Self {
        Self {
            embedder,
            index,
            generator,
            top_k,
            history: None,
        }
    }

    pub fn with_history(mut self, history: Arc<dyn HistorySink>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Top-k chunks for `medicine_name` without generating an answer.
    pub fn retrieve(&self, medicine_name: &str) -> Result<Vec<ScoredEntry>, AppError> {
        let name = require_name(medicine_name)?;
        let vector = self.embed_query(name)?;
        self.search(&vector)
    }

    pub fn answer(&self, medicine_name: &str) -> Result<MedicineDetail, AppError> {
        self.run_recorded(medicine_name, None).map_err(|f| f.error)
    }

    /// Like [`QueryService::answer`], but failures come back as a tagged outcome.
    pub fn answer_outcome(&self, medicine_name: &str) -> LookupOutcome {
        LookupOutcome::from_result(self.run_recorded(medicine_name, None))
    }

    /// Lookup for a name read off a prescription; the prescription is kept with the history entry.
    pub fn answer_for_prescription(&self, prescription: &PrescriptionRecord) -> LookupOutcome {
        LookupOutcome::from_result(self.run_recorded(&prescription.name, Some(prescription)))
    }

    fn run_recorded(
        &self,
        medicine_name: &str,
        prescription: Option<&PrescriptionRecord>,
    ) -> Result<MedicineDetail, StageFailure> {
        let mut tracker = StageTracker::new(medicine_name.trim());
        let result = self.run(&mut tracker);
        match &result {
            Ok(_) => {
                tracker.advance(QueryStage::Completed);
                info!(medicine = tracker.medicine, "lookup completed");
            }
            Err(f) => {
                warn!(
                    medicine = tracker.medicine,
                    stage = ?f.stage,
                    code = %f.error.code,
                    message = %f.error.message,
                    "lookup failed"
                );
            }
        }
        self.record(tracker.medicine, &result, prescription);
        result
    }

    fn run(&self, tracker: &mut StageTracker<'_>) -> Result<MedicineDetail, StageFailure> {
        let name = require_name(tracker.medicine).map_err(|e| tracker.fail(e))?;

        tracker.advance(QueryStage::Embedding);
        let vector = self.embed_query(name).map_err(|e| tracker.fail(e))?;

        tracker.advance(QueryStage::Retrieving);
        let hits = self.search(&vector).map_err(|e| tracker.fail(e))?;
        debug!(medicine = name, hits = hits.len(), top_k = self.top_k, "retrieved context");

        tracker.advance(QueryStage::Prompting);
        let context = join_context(&hits);
        let prompt = prompts::medicine_detail_prompt(name, &context);

        tracker.advance(QueryStage::Generating);
        let raw = self
            .generator
            .generate(&GenerationRequest::json(prompt))
            .map_err(|e| tracker.fail(normalise(e, GENERATION_FAILED, "Generation failed")))?;

        tracker.advance(QueryStage::Parsing);
        parse_medicine_detail(&raw).map_err(|e| tracker.fail(e))
    }

    fn embed_query(&self, name: &str) -> Result<Vec<f32>, AppError> {
        embed_one(self.embedder.as_ref(), name)
            .map_err(|e| normalise(e, EMBEDDING_FAILED, "Failed to embed query"))
    }

    fn search(&self, vector: &[f32]) -> Result<Vec<ScoredEntry>, AppError> {
        self.index.query(vector, self.top_k).map_err(|e| {
            if e.code == INDEX_EMPTY {
                e
            } else {
                normalise(e, RETRIEVAL_FAILED, "Index query failed")
            }
        })
    }

    fn record(
        &self,
        medicine_name: &str,
        result: &Result<MedicineDetail, StageFailure>,
        prescription: Option<&PrescriptionRecord>,
    ) {
        let Some(history) = self.history.as_ref() else {
            return;
        };
        if medicine_name.is_empty() {
            debug!("skipping history for blank medicine name");
            return;
        }
        if let Err(e) = self.try_record(history.as_ref(), medicine_name, result, prescription) {
            warn!(code = %e.code, message = %e.message, "failed to record lookup history");
        }
    }

    fn try_record(
        &self,
        history: &dyn HistorySink,
        medicine_name: &str,
        result: &Result<MedicineDetail, StageFailure>,
        prescription: Option<&PrescriptionRecord>,
    ) -> Result<(), AppError> {
        let (outcome, failure_code, payload) = match result {
            Ok(detail) => (HistoryOutcome::Completed, None, serde_json::to_string(detail)),
            Err(f) => (
                HistoryOutcome::Failed,
                Some(f.error.code.clone()),
                serde_json::to_string(&f.error),
            ),
        };
        let payload_json = payload.map_err(|e| {
            AppError::new("HISTORY_WRITE_FAILED", "Failed to encode history payload")
                .with_details(e.to_string())
        })?;
        let prescription_json = prescription
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| {
                AppError::new("HISTORY_WRITE_FAILED", "Failed to encode prescription")
                    .with_details(e.to_string())
            })?;
        history.append(HistoryEntryInput {
            medicine_name: medicine_name.to_string(),
            outcome,
            failure_code,
            payload_json,
            prescription_json,
            created_at: now_rfc3339_utc()?,
        })?;
        Ok(())
    }
}

fn require_name(medicine_name: &str) -> Result<&str, AppError> {
    let name = medicine_name.trim();
    if name.is_empty() {
        return Err(AppError::new(
            RETRIEVAL_FAILED,
            "Medicine name must not be empty",
        ));
    }
    Ok(name)
}

// Keeps the original code in details; retryable survives so backoff decisions stay intact.
fn normalise(e: AppError, code: &str, message: &str) -> AppError {
    if e.code == code {
        return e;
    }
    AppError::new(code, message)
        .with_details(format!("code={}; err={}", e.code, e.message))
        .with_retryable(e.retryable)
}

pub fn join_context(hits: &[ScoredEntry]) -> String {
    hits.iter()
        .map(|h| h.text.as_str())
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

pub fn parse_medicine_detail(raw: &str) -> Result<MedicineDetail, AppError> {
    decode_json_object(raw, "medicine detail")
}

/// Decode a model answer that must be a single JSON object. Code fences are tolerated; the raw
/// text is logged on failure.
pub fn decode_json_object<T: DeserializeOwned>(raw: &str, what: &str) -> Result<T, AppError> {
    let body = strip_code_fence(raw);
    let value: serde_json::Value = serde_json::from_str(body).map_err(|e| {
        warn!(what, raw, "model returned invalid JSON");
        AppError::new(MALFORMED_RESPONSE, "Model response is not valid JSON")
            .with_details(format!("what={what}; err={e}"))
    })?;
    if !value.is_object() {
        warn!(what, raw, "model returned JSON that is not an object");
        return Err(AppError::new(
            MALFORMED_RESPONSE,
            "Model response must be a JSON object",
        )
        .with_details(format!("what={what}")));
    }
    serde_json::from_value(value).map_err(|e| {
        warn!(what, raw, "model returned JSON with an unexpected shape");
        AppError::new(MALFORMED_RESPONSE, "Model response does not match the expected schema")
            .with_details(format!("what={what}; err={e}"))
    })
}

fn strip_code_fence(raw: &str) -> &str {
    let t = raw.trim();
    let Some(rest) = t.strip_prefix("```") else {
        return t;
    };
    // Drop the info string (e.g. "json") on the opening fence line.
    let rest = match rest.find('\n') {
        Some(i) => &rest[i + 1..],
        None => rest,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_detail_with_nulls() {
        let d = parse_medicine_detail(
            r#"{"condition": "headache", "instructions": null, "sideEffects": null}"#,
        )
        .expect("parse");
        assert_eq!(
            d,
            MedicineDetail {
                condition: Some("headache".to_string()),
                instructions: None,
                side_effects: Vec::new(),
            }
        );
    }

    #[test]
    fn tolerates_code_fences() {
        let d = parse_medicine_detail("```json\n{\"condition\": \"pain\", \"sideEffects\": [\"nausea\"]}\n```")
            .expect("parse");
        assert_eq!(d.condition.as_deref(), Some("pain"));
        assert_eq!(d.side_effects, vec!["nausea".to_string()]);
    }

    #[test]
    fn rejects_non_objects_and_bad_shapes() {
        for raw in [
            "Aspirin treats headaches.",
            "[1, 2, 3]",
            "\"text\"",
            r#"{"sideEffects": "nausea"}"#,
        ] {
            let err = parse_medicine_detail(raw).expect_err(raw);
            assert_eq!(err.code, MALFORMED_RESPONSE, "{raw}");
        }
    }

    #[test]
    fn normalise_keeps_matching_codes_and_retryability() {
        let same = AppError::new(EMBEDDING_FAILED, "x");
        assert_eq!(normalise(same.clone(), EMBEDDING_FAILED, "y"), same);

        let other = normalise(
            AppError::new("GEMINI_CONFIG_INVALID", "no key").with_retryable(true),
            GENERATION_FAILED,
            "Generation failed",
        );
        assert_eq!(other.code, GENERATION_FAILED);
        assert!(other.retryable);
        assert_eq!(
            other.details.as_deref(),
            Some("code=GEMINI_CONFIG_INVALID; err=no key")
        );
    }

    #[test]
    fn outcome_serialises_with_status_tag() {
        let failed = LookupOutcome::Failed {
            reason: FailureReason::MalformedResponse,
            stage: QueryStage::Parsing,
            code: MALFORMED_RESPONSE.to_string(),
            message: "bad".to_string(),
        };
        let v = serde_json::to_value(&failed).expect("json");
        assert_eq!(
            v,
            serde_json::json!({
                "status": "failed",
                "reason": "malformed_response",
                "stage": "parsing",
                "code": "RAG_MALFORMED_RESPONSE",
                "message": "bad"
            })
        );
    }

    #[test]
    fn context_is_joined_with_separator() {
        let hits = vec![
            ScoredEntry {
                id: "chunk_0".to_string(),
                text: "a".to_string(),
                score: 1.0,
            },
            ScoredEntry {
                id: "chunk_1".to_string(),
                text: "b".to_string(),
                score: 0.5,
            },
        ];
        assert_eq!(join_context(&hits), "a\n---\nb");
        assert_eq!(join_context(&[]), "");
    }
}
