//! Record structuring collaborator
//!
//! Converts raw document text into a best-effort candidate record.
//! The production implementation calls an LLM over HTTP with a
//! long-lived reqwest::Client for connection pooling; validation of the
//! candidate happens downstream, never here.

use crate::error::PipelineError;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{error, info};

/// Trait for turning raw text into a candidate record
#[async_trait::async_trait]
pub trait RecordStructurer: Send + Sync {
    /// Produce candidate record fields from text. `feedback` carries the
    /// critic's correction guidance on retry attempts.
    async fn structure(&self, text: &str, feedback: Option<&str>) -> Result<Value>;
}

const SYSTEM_PROMPT: &str = r#"You are a financial document extraction engine.

Extract the document into a single JSON object with these fields:
- document_number (string, exactly as printed)
- date (ISO date), due_date (ISO date, optional)
- vendor_name (string)
- agreement_id (string, the referenced contract/agreement number, optional)
- total_amount (decimal string)
- line_items: array of {id, description, quantity, unit_price, total, cost_code}

Use decimal strings for all monetary values. Use cost code 99-999 only when
no code is printed. Return ONLY the JSON object."#;

/// LLM-backed structurer (connection-pooled)
pub struct LlmStructurer {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl LlmStructurer {
    pub fn new(api_key: String, base_url: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| PipelineError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            base_url,
        })
    }
}

#[async_trait::async_trait]
impl RecordStructurer for LlmStructurer {
    async fn structure(&self, text: &str, feedback: Option<&str>) -> Result<Value> {
        if self.api_key.is_empty() {
            return Err(PipelineError::ConfigError(
                "LLM API key not configured".to_string(),
            ));
        }

        let mut prompt = text.to_string();
        if let Some(feedback) = feedback {
            prompt.push_str("\n\nCRITIC FEEDBACK (FIX THESE ISSUES):\n");
            prompt.push_str(feedback);
        }

        let url = format!("{}?key={}", self.base_url, self.api_key);
        let request = CompletionRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.1,
                max_output_tokens: 4096,
            },
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: SYSTEM_PROMPT.to_string(),
                }],
            },
        };

        info!(text_length = text.len(), retry = feedback.is_some(), "Calling structuring LLM");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Structuring LLM request failed: {}", e);
                PipelineError::LlmError(format!("Structuring request failed: {}", e))
            })?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Structuring LLM error response: {}", error_text);
            return Err(PipelineError::LlmError(format!(
                "Structuring API error: {}",
                error_text
            )));
        }

        let completion: CompletionResponse = response.json().await.map_err(|e| {
            PipelineError::LlmError(format!("Completion parse error: {}", e))
        })?;

        let answer = completion
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.as_str())
            .ok_or_else(|| PipelineError::LlmError("Empty completion".to_string()))?;

        let candidate = extract_json_object(answer).ok_or_else(|| {
            PipelineError::StructuringError(
                "Completion did not contain a JSON object".to_string(),
            )
        })?;

        Ok(candidate)
    }
}

/// Pull a JSON object out of a completion, tolerating ```json fences and
/// surrounding prose.
fn extract_json_object(text: &str) -> Option<Value> {
    // 1) Try a ```json ... ``` fenced block
    if let Some(start) = text.find("```json") {
        let after = &text[start + 7..];
        if let Some(end) = after.find("```") {
            let json_str = after[..end].trim();
            if let Ok(parsed) = serde_json::from_str::<Value>(json_str) {
                if parsed.is_object() {
                    return Some(parsed);
                }
            }
        }
    }

    // 2) Fallback: the largest { ... } block in the text
    if let (Some(brace_start), Some(brace_end)) = (text.find('{'), text.rfind('}')) {
        if brace_start < brace_end {
            let json_str = &text[brace_start..=brace_end];
            if let Ok(parsed) = serde_json::from_str::<Value>(json_str) {
                if parsed.is_object() {
                    return Some(parsed);
                }
            }
        }
    }

    None
}

#[derive(Debug, Serialize)]
struct CompletionRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    system_instruction: SystemInstruction,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: i32,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

//
// ================= Mock =================
//

/// Scripted structurer for development & testing. Pops scripted outputs
/// in order, then falls back to a fixed candidate if one is set.
pub struct MockStructurer {
    scripted: Mutex<VecDeque<std::result::Result<Value, String>>>,
    fallback: Option<Value>,
    last_feedback: Mutex<Option<String>>,
}

impl MockStructurer {
    pub fn always(candidate: Value) -> Self {
        Self {
            scripted: Mutex::new(VecDeque::new()),
            fallback: Some(candidate),
            last_feedback: Mutex::new(None),
        }
    }

    pub fn scripted(outputs: Vec<std::result::Result<Value, String>>) -> Self {
        Self {
            scripted: Mutex::new(outputs.into_iter().collect()),
            fallback: None,
            last_feedback: Mutex::new(None),
        }
    }

    pub fn scripted_with_fallback(
        outputs: Vec<std::result::Result<Value, String>>,
        fallback: Value,
    ) -> Self {
        Self {
            scripted: Mutex::new(outputs.into_iter().collect()),
            fallback: Some(fallback),
            last_feedback: Mutex::new(None),
        }
    }

    pub fn last_feedback(&self) -> Option<String> {
        self.last_feedback.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl RecordStructurer for MockStructurer {
    async fn structure(&self, _text: &str, feedback: Option<&str>) -> Result<Value> {
        *self.last_feedback.lock().unwrap() = feedback.map(|f| f.to_string());

        let next = self.scripted.lock().unwrap().pop_front();
        match next {
            Some(Ok(candidate)) => Ok(candidate),
            Some(Err(message)) => Err(PipelineError::StructuringError(message)),
            None => match &self.fallback {
                Some(candidate) => Ok(candidate.clone()),
                None => Err(PipelineError::StructuringError(
                    "No scripted output remaining".to_string(),
                )),
            },
        }
    }
}

//
// ================= Tests =================
//
