//! HTTP client for an Ollama-style generation API.
//!
//! The per-document budget is applied to each generation request, so a
//! caller can change it between runs without rebuilding the client. A
//! separate quick client (5 s) serves health checks so an unreachable
//! backend fails fast.

use std::time::Duration;

use log::{debug, warn};
use serde::Deserialize;

use crate::record::DeedRecord;

use super::prompt::{build_user_prompt, EXTRACTION_SYSTEM_PROMPT};
use super::{LlmError, StructuredExtractor};

/// Low temperature keeps the model faithful to the page instead of creative.
const GENERATION_TEMPERATURE: f64 = 0.1;

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

pub struct LlmExtractor {
    base_url: String,
    model: String,
    client: reqwest::blocking::Client,
    client_quick: reqwest::blocking::Client,
}

impl LlmExtractor {
    pub fn new(base_url: &str, model: &str) -> Result<Self, LlmError> {
        // No default timeout on the generation client; every request gets
        // the caller's budget explicitly.
        let client = reqwest::blocking::Client::builder()
            .timeout(None::<Duration>)
            .build()
            .map_err(|e| LlmError::Network(e.to_string()))?;

        let client_quick = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| LlmError::Network(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client,
            client_quick,
        })
    }

    /// Default local backend.
    pub fn default_local() -> Result<Self, LlmError> {
        Self::new("http://localhost:11434", "qwen2.5:3b-instruct")
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Verifies the backend is reachable. Returns within 5 s either way.
    pub fn health_check(&self) -> Result<(), LlmError> {
        let url = format!("{}/", self.base_url);
        let response = self
            .client_quick
            .get(&url)
            .send()
            .map_err(map_transport_error)?;

        if !response.status().is_success() {
            return Err(LlmError::Http {
                status: response.status().as_u16(),
                message: response.text().unwrap_or_default(),
            });
        }
        Ok(())
    }

    fn generate(&self, text: &str, timeout: Duration) -> Result<String, LlmError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "system": EXTRACTION_SYSTEM_PROMPT,
            "prompt": build_user_prompt(text),
            "stream": false,
            "options": { "temperature": GENERATION_TEMPERATURE },
        });

        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(&body)
            .send()
            .map_err(map_transport_error)?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(LlmError::RateLimited);
        }
        if !status.is_success() {
            let message = response.text().unwrap_or_default();
            warn!("LLM backend returned {}: {}", status, message);
            return Err(LlmError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .map_err(|e| LlmError::Parse(format!("Bad generate envelope: {}", e)))?;
        Ok(parsed.response)
    }
}

impl StructuredExtractor for LlmExtractor {
    fn parse(&self, text: &str, timeout: Duration) -> Result<DeedRecord, LlmError> {
        let _span = tracing::info_span!("llm.parse", model = %self.model).entered();

        let raw = self.generate(text, timeout)?;
        debug!("LLM returned {} chars", raw.len());
        parse_record_response(&raw)
    }
}

fn map_transport_error(e: reqwest::Error) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout
    } else {
        LlmError::Network(e.to_string())
    }
}

/// Parses the model's free-text output into a validated record.
pub fn parse_record_response(raw: &str) -> Result<DeedRecord, LlmError> {
    let json_str = extract_json(raw);

    let value: serde_json::Value = serde_json::from_str(json_str)
        .map_err(|e| LlmError::Parse(format!("{}; response was: {:.200}", e, json_str)))?;

    validate_shape(&value)?;

    serde_json::from_value(value).map_err(|e| LlmError::InvalidShape(e.to_string()))
}

const KNOWN_SECTIONS: &[&str] = &[
    "document_details",
    "property_details",
    "buyer_details",
    "seller_details",
    "confirming_party_details",
];

fn validate_shape(value: &serde_json::Value) -> Result<(), LlmError> {
    let object = value
        .as_object()
        .ok_or_else(|| LlmError::InvalidShape("response is not a JSON object".to_string()))?;

    if !KNOWN_SECTIONS.iter().any(|key| object.contains_key(*key)) {
        return Err(LlmError::InvalidShape(
            "response has none of the deed record sections".to_string(),
        ));
    }

    for key in ["buyer_details", "seller_details", "confirming_party_details"] {
        if let Some(section) = object.get(key) {
            if !section.is_array() && !section.is_null() {
                return Err(LlmError::InvalidShape(format!("{} is not an array", key)));
            }
        }
    }

    Ok(())
}

/// Scanner mode while walking the candidate JSON object.
enum Scan {
    /// Outside any string literal; braces count toward nesting.
    Bare,
    /// Inside a string literal; braces are data.
    InString,
    /// The character after a backslash inside a string.
    Escaped,
}

/// Slices the first balanced JSON object out of the response, tolerating
/// prose before or after it. Models love to wrap the payload in pleasantries.
fn extract_json(response: &str) -> &str {
    let open = match response.find('{') {
        Some(idx) => idx,
        None => return response,
    };

    let mut mode = Scan::Bare;
    let mut nesting = 0usize;

    for (offset, ch) in response[open..].char_indices() {
        mode = match (mode, ch) {
            (Scan::Bare, '"') => Scan::InString,
            (Scan::Bare, '{') => {
                nesting += 1;
                Scan::Bare
            }
            (Scan::Bare, '}') => {
                nesting -= 1;
                if nesting == 0 {
                    return &response[open..open + offset + ch.len_utf8()];
                }
                Scan::Bare
            }
            (Scan::InString, '\\') => Scan::Escaped,
            (Scan::InString, '"') => Scan::Bare,
            (Scan::Escaped, _) => Scan::InString,
            (other, _) => other,
        };
    }

    // Truncated object (response cut off mid-JSON); hand back what we have
    // and let serde report the syntax error.
    &response[open..]
}
