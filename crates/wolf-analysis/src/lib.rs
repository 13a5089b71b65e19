//! Report content extraction and the analysis collaborator boundary.
//!
//! The ingestion pipeline treats analysis as an opaque
//! `analyze(content) -> result` call. `GeminiAnalyzer` is the production
//! implementation; tests substitute their own `Analyzer`.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

mod extract;
mod gemini;

pub use extract::{extract_text, SUPPORTED_EXTENSIONS};
pub use gemini::{GeminiAnalyzer, GeminiAnalyzerConfig};

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("unsupported file format '{extension}' for {filename}")]
    UnsupportedFormat { filename: String, extension: String },
    #[error("file {0} is not valid UTF-8 text")]
    InvalidEncoding(String),
    #[error("file {0} has no text content")]
    EmptyContent(String),
    #[error("analysis service is not configured: GOOGLE_API_KEY is unset")]
    NotConfigured,
    #[error("prompt was blocked: {0}")]
    Blocked(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("analysis service returned non-success status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Text extracted from one report file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportContent {
    pub source_filename: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    pub payload: Value,
    pub model: String,
}

impl AnalysisResult {
    /// Value persisted as the report's `analysis_result`.
    pub fn into_record(self) -> Value {
        let mut payload = self.payload;
        if let Value::Object(map) = &mut payload {
            map.entry("model")
                .or_insert_with(|| Value::String(self.model.clone()));
            return payload;
        }
        serde_json::json!({ "result": payload, "model": self.model })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzerState {
    Configured,
    NotConfigured,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalyzerStatus {
    pub state: AnalyzerState,
    pub detail: String,
}

impl AnalyzerStatus {
    pub fn is_configured(&self) -> bool {
        self.state == AnalyzerState::Configured
    }
}

/// The external analysis collaborator.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, content: &ReportContent) -> Result<AnalysisResult, AnalysisError>;

    fn status(&self) -> AnalyzerStatus;
}
