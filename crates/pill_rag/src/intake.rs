//! Prescription intake: read a prescription photo, then look up the medicine it names.

use std::path::Path;
use std::sync::Arc;

use pill_core::domain::PrescriptionRecord;
use pill_core::error::{AppError, GENERATION_FAILED};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::llm::{GenerationRequest, Generator, InlineImage};
use crate::query::{decode_json_object, prompts, LookupOutcome, QueryService};

pub const UNKNOWN_MEDICINE: &str = "Unknown Medicine";

const SUPPORTED_MIME_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/webp",
    "image/heic",
    "image/heif",
];

/// Mime type for a prescription photo, guessed from its extension.
pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        "heic" => Some("image/heic"),
        "heif" => Some("image/heif"),
        _ => None,
    }
}

fn validate_image(image: &InlineImage) -> Result<(), AppError> {
    if image.data.is_empty() {
        return Err(AppError::new(
            "INTAKE_IMAGE_MISSING",
            "Prescription image is empty",
        ));
    }
    if !SUPPORTED_MIME_TYPES.contains(&image.mime_type.as_str()) {
        return Err(AppError::new(
            "INTAKE_IMAGE_INVALID",
            "Unsupported prescription image type",
        )
        .with_details(format!("mime_type={}", image.mime_type)));
    }
    Ok(())
}

pub fn parse_prescription(raw: &str) -> Result<PrescriptionRecord, AppError> {
    decode_json_object(raw, "prescription")
}

pub struct PrescriptionExtractor {
    generator: Arc<dyn Generator>,
}

impl PrescriptionExtractor {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator }
    }

    pub fn extract(&self, image: &InlineImage) -> Result<PrescriptionRecord, AppError> {
        validate_image(image)?;
        let request = GenerationRequest::json(prompts::prescription_extraction_prompt())
            .with_image(image.clone());
        let raw = self.generator.generate(&request).map_err(|e| {
            if e.code == GENERATION_FAILED {
                e
            } else {
                AppError::new(GENERATION_FAILED, "Prescription extraction failed")
                    .with_details(format!("code={}; err={}", e.code, e.message))
                    .with_retryable(e.retryable)
            }
        })?;
        parse_prescription(&raw)
    }
}

/// Reminder-ready view of a processed prescription. Detail fields are empty when the lookup
/// failed; `lookup` says why.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IntakeResponse {
    pub pill_name: String,
    pub dosage_info: String,
    /// Times per day.
    pub dosage: u32,
    pub dosage_amount: Option<String>,
    /// Days.
    pub duration: u32,
    pub condition: String,
    pub instructions: String,
    pub side_effects: Vec<String>,
    pub lookup: LookupOutcome,
}

impl IntakeResponse {
    fn new(prescription: &PrescriptionRecord, lookup: LookupOutcome) -> Self {
        let name = prescription.name.trim();
        let detail = lookup.detail().cloned().unwrap_or_default();
        Self {
            pill_name: if name.is_empty() {
                UNKNOWN_MEDICINE.to_string()
            } else {
                name.to_string()
            },
            dosage_info: prescription.extra_information.clone().unwrap_or_default(),
            dosage: prescription.frequency_or_default(),
            dosage_amount: prescription.dosage.clone(),
            duration: prescription.duration_or_default(),
            condition: detail.condition.unwrap_or_default(),
            instructions: detail.instructions.unwrap_or_default(),
            side_effects: detail.side_effects,
            lookup,
        }
    }
}

pub struct IntakeService {
    extractor: PrescriptionExtractor,
    query: Arc<QueryService>,
}

impl IntakeService {
    pub fn new(extractor: PrescriptionExtractor, query: Arc<QueryService>) -> Self {
        Self { extractor, query }
    }

    /// Extraction failures are returned as errors; lookup failures are reported in the response.
    pub fn process(&self, image: &InlineImage) -> Result<IntakeResponse, AppError> {
        let prescription = self.extractor.extract(image)?;
        info!(
            medicine = %prescription.name,
            frequency_per_day = ?prescription.frequency_per_day,
            "extracted prescription"
        );
        let lookup = self.query.answer_for_prescription(&prescription);
        Ok(IntakeResponse::new(&prescription, lookup))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pill_core::error::MALFORMED_RESPONSE;

    #[test]
    fn guesses_mime_from_extension() {
        assert_eq!(mime_for_path(Path::new("rx.JPG")), Some("image/jpeg"));
        assert_eq!(mime_for_path(Path::new("rx.png")), Some("image/png"));
        assert_eq!(mime_for_path(Path::new("rx.txt")), None);
        assert_eq!(mime_for_path(Path::new("rx")), None);
    }

    #[test]
    fn rejects_empty_and_unsupported_images() {
        let empty = InlineImage {
            mime_type: "image/jpeg".to_string(),
            data: Vec::new(),
        };
        assert_eq!(validate_image(&empty).expect_err("empty").code, "INTAKE_IMAGE_MISSING");

        let pdf = InlineImage {
            mime_type: "application/pdf".to_string(),
            data: vec![1],
        };
        assert_eq!(validate_image(&pdf).expect_err("pdf").code, "INTAKE_IMAGE_INVALID");
    }

    #[test]
    fn parses_quoted_numbers_and_missing_fields() {
        let rec = parse_prescription(
            r#"{"name": "Aspirin", "frequency_per_day": "2", "dosage": "500mg", "duration_of_intake": null}"#,
        )
        .expect("parse");
        assert_eq!(rec.name, "Aspirin");
        assert_eq!(rec.frequency_or_default(), 2);
        assert_eq!(rec.duration_or_default(), PrescriptionRecord::DEFAULT_DURATION_DAYS);
        assert_eq!(rec.extra_information, None);

        assert_eq!(
            parse_prescription("not json").expect_err("bad").code,
            MALFORMED_RESPONSE
        );
    }

    #[test]
    fn response_defaults_name_and_empties_detail_on_failure() {
        let rec = PrescriptionRecord {
            name: "  ".to_string(),
            frequency_per_day: None,
            dosage: None,
            duration_of_intake: Some(0),
            extra_information: Some("after meals".to_string()),
        };
        let lookup = LookupOutcome::Failed {
            reason: pill_core::error::FailureReason::Retrieval,
            stage: crate::query::QueryStage::Created,
            code: pill_core::error::RETRIEVAL_FAILED.to_string(),
            message: "Medicine name must not be empty".to_string(),
        };
        let resp = IntakeResponse::new(&rec, lookup);
        assert_eq!(resp.pill_name, UNKNOWN_MEDICINE);
        assert_eq!(resp.dosage, 1);
        assert_eq!(resp.duration, 7);
        assert_eq!(resp.dosage_info, "after meals");
        assert!(resp.side_effects.is_empty());

        let v = serde_json::to_value(&resp).expect("json");
        assert_eq!(v["pillName"], "Unknown Medicine");
        assert_eq!(v["sideEffects"], serde_json::json!([]));
        assert_eq!(v["lookup"]["status"], "failed");
    }
}
