use serde::{Deserialize, Serialize};
use std::fmt;

pub const CONFIGURATION_INVALID: &str = "RAG_CONFIGURATION_INVALID";
pub const DIMENSION_MISMATCH: &str = "RAG_DIMENSION_MISMATCH";
pub const INDEX_EMPTY: &str = "RAG_INDEX_EMPTY";
pub const EMBEDDING_FAILED: &str = "RAG_EMBEDDING_FAILED";
pub const RETRIEVAL_FAILED: &str = "RAG_RETRIEVAL_FAILED";
pub const GENERATION_FAILED: &str = "RAG_GENERATION_FAILED";
pub const MALFORMED_RESPONSE: &str = "RAG_MALFORMED_RESPONSE";

/// Single structured error shape used across crates and emitted as JSON at the CLI boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppError {
    pub code: String,
    pub message: String,
    pub details: Option<String>,
    pub retryable: bool,
}

impl AppError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            retryable: false,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// The pipeline failure tag for this error, if its code belongs to the lookup taxonomy.
    pub fn failure_reason(&self) -> Option<FailureReason> {
        FailureReason::from_code(&self.code)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}

/// Tagged reason attached to a failed lookup.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Configuration,
    DimensionMismatch,
    EmptyIndex,
    Embedding,
    Retrieval,
    Generation,
    MalformedResponse,
}

impl FailureReason {
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            CONFIGURATION_INVALID => Some(Self::Configuration),
            DIMENSION_MISMATCH => Some(Self::DimensionMismatch),
            INDEX_EMPTY => Some(Self::EmptyIndex),
            EMBEDDING_FAILED => Some(Self::Embedding),
            RETRIEVAL_FAILED => Some(Self::Retrieval),
            GENERATION_FAILED => Some(Self::Generation),
            MALFORMED_RESPONSE => Some(Self::MalformedResponse),
            _ => None,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::Configuration => CONFIGURATION_INVALID,
            Self::DimensionMismatch => DIMENSION_MISMATCH,
            Self::EmptyIndex => INDEX_EMPTY,
            Self::Embedding => EMBEDDING_FAILED,
            Self::Retrieval => RETRIEVAL_FAILED,
            Self::Generation => GENERATION_FAILED,
            Self::MalformedResponse => MALFORMED_RESPONSE,
        }
    }

    /// Structural failures are deterministic; repeating the call cannot help.
    pub fn is_structural(self) -> bool {
        matches!(
            self,
            Self::Configuration | Self::DimensionMismatch | Self::MalformedResponse
        )
    }
}
