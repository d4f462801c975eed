use std::time::Duration;

use pill_core::config::GeminiConfig;
use pill_core::error::AppError;
use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct GeminiClient {
    base_url: String,
    api_key: String,
}

impl GeminiClient {
    /// Remote endpoints must be https; plain http is only accepted on 127.0.0.1 (local stubs).
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, AppError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let local = base_url.starts_with("http://127.0.0.1:") || base_url == "http://127.0.0.1";
        if !base_url.starts_with("https://") && !local {
            return Err(AppError::new(
                "GEMINI_CONFIG_INVALID",
                "Gemini base URL must use https",
            )
            .with_details(format!("base_url={base_url}")));
        }
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(AppError::new(
                "GEMINI_CONFIG_INVALID",
                "Gemini API key is required",
            ));
        }
        Ok(Self {
            base_url,
            api_key: api_key.to_string(),
        })
    }

    pub fn from_config(cfg: &GeminiConfig) -> Result<Self, AppError> {
        let key = cfg.api_key.as_deref().ok_or_else(|| {
            AppError::new(
                "GEMINI_CONFIG_INVALID",
                "Gemini API key is required (set GEMINI_API_KEY)",
            )
        })?;
        Self::new(&cfg.base_url, key)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn model_url(&self, model: &str, method: &str) -> String {
        let model = model.trim_start_matches("models/");
        format!("{}/models/{model}:{method}", self.base_url)
    }

    /// POST `body` to `models/<model>:<method>` and decode the JSON reply. Failures carry
    /// `error_code`; transport errors, 429 and 5xx are marked retryable.
    pub(crate) fn call<Req, Resp>(
        &self,
        model: &str,
        method: &str,
        body: &Req,
        timeout: Duration,
        error_code: &str,
    ) -> Result<Resp, AppError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let url = self.model_url(model, method);
        let payload = serde_json::to_value(body).map_err(|e| {
            AppError::new(error_code, "Failed to encode Gemini request")
                .with_details(e.to_string())
        })?;

        let resp = ureq::post(&url)
            .timeout(timeout)
            .set("x-goog-api-key", &self.api_key)
            .send_json(payload);

        match resp {
            Ok(r) if r.status() == 200 => r.into_json::<Resp>().map_err(|e| {
                AppError::new(error_code, "Failed to decode Gemini response")
                    .with_details(format!("method={method}; err={e}"))
            }),
            Ok(r) => Err(AppError::new(error_code, "Gemini request failed")
                .with_details(format!("method={method}; status={}", r.status()))),
            Err(ureq::Error::Status(code, r)) => {
                let body = r
                    .into_string()
                    .unwrap_or_else(|_| "<body unavailable>".to_string());
                Err(AppError::new(error_code, "Gemini request rejected")
                    .with_details(format!("method={method}; status={code}; body={}", truncate(&body, 512)))
                    .with_retryable(code == 429 || code >= 500))
            }
            Err(e) => Err(AppError::new(error_code, "Failed to reach Gemini")
                .with_details(format!("method={method}; err={e}"))
                .with_retryable(true)),
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((i, _)) => format!("{}...", &s[..i]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enforces_https_or_loopback() {
        assert!(GeminiClient::new("https://generativelanguage.googleapis.com/v1beta", "k").is_ok());
        assert!(GeminiClient::new("http://127.0.0.1:8080", "k").is_ok());
        assert!(GeminiClient::new("http://example.com", "k").is_err());
        assert!(GeminiClient::new("http://127.0.0.1.evil.com", "k").is_err());
        assert!(GeminiClient::new("https://example.com", "  ").is_err());
    }

    #[test]
    fn model_urls_accept_prefixed_names() {
        let c = GeminiClient::new("https://x.test/v1beta/", "k").expect("client");
        assert_eq!(
            c.model_url("models/text-embedding-004", "batchEmbedContents"),
            "https://x.test/v1beta/models/text-embedding-004:batchEmbedContents"
        );
        assert_eq!(
            c.model_url("gemini-2.5-flash", "generateContent"),
            "https://x.test/v1beta/models/gemini-2.5-flash:generateContent"
        );
    }

    #[test]
    fn missing_key_in_config_is_rejected() {
        let err = GeminiClient::from_config(&GeminiConfig::default()).expect_err("no key");
        assert_eq!(err.code, "GEMINI_CONFIG_INVALID");
    }

    #[test]
    fn truncate_is_char_safe() {
        assert_eq!(truncate("ééé", 2), "éé...");
        assert_eq!(truncate("ab", 5), "ab");
    }
}
