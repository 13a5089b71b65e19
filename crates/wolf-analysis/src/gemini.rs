use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use wolf_core::truncate_for_error;
use wolf_keys::{KeyName, KeyRegistry};

use crate::{AnalysisError, AnalysisResult, Analyzer, AnalyzerState, AnalyzerStatus, ReportContent};

const SUMMARY_INSTRUCTION: &str = "請將以下文字內容進行摘要，並以中文輸出重點。\
請只回傳一個 JSON 物件，欄位為 summary (字串) 與 key_points (字串陣列)。";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeminiAnalyzerConfig {
    pub api_base: String,
    pub model: String,
    pub request_timeout: Duration,
    pub max_retries: usize,
    pub retry_base_delay_ms: u64,
}

/// Analyzer calling Gemini `generateContent`.
///
/// The API key is read from the registry on every call, so runtime key
/// updates apply without rebuilding the analyzer.
pub struct GeminiAnalyzer {
    client: reqwest::Client,
    config: GeminiAnalyzerConfig,
    keys: Arc<KeyRegistry>,
}

impl GeminiAnalyzer {
    pub fn new(config: GeminiAnalyzerConfig, keys: Arc<KeyRegistry>) -> Result<Self, AnalysisError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout.max(Duration::from_millis(1)))
            .build()?;
        Ok(Self {
            client,
            config,
            keys,
        })
    }

    fn generate_content_url(&self) -> String {
        let base = self.config.api_base.trim_end_matches('/');
        format!("{base}/models/{}:generateContent", self.config.model)
    }
}

#[async_trait]
impl Analyzer for GeminiAnalyzer {
    async fn analyze(&self, content: &ReportContent) -> Result<AnalysisResult, AnalysisError> {
        let api_key = self
            .keys
            .get(KeyName::GoogleApiKey)
            .ok_or(AnalysisError::NotConfigured)?;
        let body = build_generate_content_body(&content.text);
        let url = self.generate_content_url();

        for attempt in 0..=self.config.max_retries {
            let response = self
                .client
                .post(&url)
                .header("x-wolf-retry-attempt", attempt.to_string())
                .query(&[("key", api_key.as_str())])
                .json(&body)
                .send()
                .await;
            match response {
                Ok(response) => {
                    let status = response.status();
                    let raw = response.text().await?;
                    if status.is_success() {
                        let payload = parse_generate_content_response(&raw)?;
                        tracing::info!(
                            file = %content.source_filename,
                            model = %self.config.model,
                            "analysis completed"
                        );
                        return Ok(AnalysisResult {
                            payload,
                            model: self.config.model.clone(),
                        });
                    }
                    if attempt < self.config.max_retries && should_retry_status(status.as_u16()) {
                        tracing::warn!(
                            file = %content.source_filename,
                            status = status.as_u16(),
                            attempt,
                            "retrying analysis request"
                        );
                        tokio::time::sleep(retry_delay(self.config.retry_base_delay_ms, attempt))
                            .await;
                        continue;
                    }
                    return Err(AnalysisError::HttpStatus {
                        status: status.as_u16(),
                        body: truncate_for_error(&raw, 800),
                    });
                }
                Err(error) => {
                    if attempt < self.config.max_retries && is_retryable_http_error(&error) {
                        tokio::time::sleep(retry_delay(self.config.retry_base_delay_ms, attempt))
                            .await;
                        continue;
                    }
                    return Err(AnalysisError::Http(error));
                }
            }
        }

        Err(AnalysisError::InvalidResponse(
            "request retry loop terminated unexpectedly".to_string(),
        ))
    }

    fn status(&self) -> AnalyzerStatus {
        if self.keys.get(KeyName::GoogleApiKey).is_some() {
            AnalyzerStatus {
                state: AnalyzerState::Configured,
                detail: format!("model {}", self.config.model),
            }
        } else {
            AnalyzerStatus {
                state: AnalyzerState::NotConfigured,
                detail: "GOOGLE_API_KEY is not set".to_string(),
            }
        }
    }
}

fn build_generate_content_body(text: &str) -> Value {
    json!({
        "contents": [{
            "role": "user",
            "parts": [{ "text": format!("{SUMMARY_INSTRUCTION}\n\n---\n{text}\n---") }],
        }],
        "generationConfig": {
            "responseMimeType": "application/json",
        },
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    candidates: Option<Vec<GoogleCandidate>>,
    prompt_feedback: Option<GooglePromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct GoogleCandidate {
    content: Option<GoogleContent>,
}

#[derive(Debug, Deserialize)]
struct GoogleContent {
    parts: Option<Vec<GooglePart>>,
}

#[derive(Debug, Deserialize)]
struct GooglePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GooglePromptFeedback {
    block_reason: Option<String>,
    block_reason_message: Option<String>,
}

fn parse_generate_content_response(raw: &str) -> Result<Value, AnalysisError> {
    let parsed: GenerateContentResponse = serde_json::from_str(raw)?;
    let text = parsed
        .candidates
        .unwrap_or_default()
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .and_then(|content| content.parts)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|part| part.text)
        .collect::<String>();

    if text.trim().is_empty() {
        if let Some(feedback) = parsed.prompt_feedback {
            if let Some(reason) = feedback.block_reason_message.or(feedback.block_reason) {
                return Err(AnalysisError::Blocked(reason));
            }
        }
        return Err(AnalysisError::InvalidResponse(
            "response contained no text".to_string(),
        ));
    }

    Ok(parse_model_text(&text))
}

/// Model output as JSON when it parses, otherwise wrapped as a summary string.
fn parse_model_text(text: &str) -> Value {
    let trimmed = strip_code_fence(text.trim());
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value @ Value::Object(_)) => value,
        _ => json!({ "summary": text.trim() }),
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn should_retry_status(status: u16) -> bool {
    status == 408 || status == 429 || status >= 500
}

fn is_retryable_http_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request() || error.is_body()
}

fn retry_delay(base_delay_ms: u64, attempt: usize) -> Duration {
    let shift = attempt.min(6) as u32;
    Duration::from_millis(base_delay_ms.saturating_mul(2_u64.saturating_pow(shift)))
}
