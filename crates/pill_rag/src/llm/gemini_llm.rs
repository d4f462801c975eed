use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use pill_core::config::GeminiConfig;
use pill_core::error::{AppError, GENERATION_FAILED};
use serde::{Deserialize, Serialize};

use super::{GenerationRequest, Generator, ResponseFormat};
use crate::gemini::GeminiClient;

#[derive(Debug, Clone)]
pub struct GeminiLlm {
    client: GeminiClient,
    model: String,
    timeout: Duration,
}

impl GeminiLlm {
    pub fn new(client: GeminiClient, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            model: model.into(),
            timeout,
        }
    }

    pub fn from_config(client: GeminiClient, cfg: &GeminiConfig) -> Self {
        Self::new(
            client,
            cfg.generation_model.clone(),
            Duration::from_secs(cfg.generate_timeout_secs),
        )
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RequestPart<'a> {
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
    Text {
        text: &'a str,
    },
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<ResponseContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

fn build_request(request: &GenerationRequest) -> GenerateRequest<'_> {
    let mut parts = Vec::with_capacity(2);
    if let Some(img) = request.image.as_ref() {
        parts.push(RequestPart::Inline {
            inline_data: InlineData {
                mime_type: img.mime_type.clone(),
                data: BASE64.encode(&img.data),
            },
        });
    }
    parts.push(RequestPart::Text {
        text: &request.prompt,
    });

    GenerateRequest {
        contents: vec![RequestContent {
            role: "user",
            parts,
        }],
        generation_config: match request.response_format {
            ResponseFormat::Json => Some(GenerationConfig {
                response_mime_type: "application/json",
            }),
            ResponseFormat::Text => None,
        },
    }
}

fn response_text(resp: GenerateResponse) -> Result<String, AppError> {
    let candidate = resp.candidates.into_iter().next().ok_or_else(|| {
        AppError::new(GENERATION_FAILED, "Gemini returned no candidates")
    })?;
    let finish_reason = candidate.finish_reason.unwrap_or_default();
    let text = candidate
        .content
        .map(|c| {
            c.parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err(AppError::new(GENERATION_FAILED, "Generation response was empty")
            .with_details(format!("finish_reason={finish_reason}")));
    }
    Ok(text)
}

impl Generator for GeminiLlm {
    fn generate(&self, request: &GenerationRequest) -> Result<String, AppError> {
        if request.prompt.trim().is_empty() {
            return Err(AppError::new(GENERATION_FAILED, "Prompt must not be empty"));
        }
        let body = build_request(request);
        let resp: GenerateResponse = self.client.call(
            &self.model,
            "generateContent",
            &body,
            self.timeout,
            GENERATION_FAILED,
        )?;
        response_text(resp)
    }
}
