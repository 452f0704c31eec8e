use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{TargetLanguage, TranslateConfig};
use crate::error::{DublineError, Result};
use super::Translator;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationResponse {
    pub response: String,
    pub done: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationResult {
    pub text: String,
}

/// Translator backed by an Ollama `/api/generate` endpoint
pub struct OllamaTranslator {
    client: Client,
    config: TranslateConfig,
}

impl OllamaTranslator {
    pub fn new(config: TranslateConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()?;

        Ok(Self { client, config })
    }

    /// Build translation prompt, asking for a JSON reply
    fn build_translation_prompt(&self, text: &str, target: TargetLanguage) -> String {
        let source_name = language_code_to_name(&self.config.source_language);
        let language_name = target.name();

        format!(
            "You are a professional translator for video dubbing.\n\
             \n\
             Translate the following {} speech into {} ONLY (language code: {}).\n\
             The translation will be spoken aloud, so keep it about as short as the original.\n\
             \n\
             Return ONLY the translation in JSON format as {{\"text\":\"your {} translation here\"}}.\n\
             Do not include any explanations, alternatives, or text in other languages.\n\
             \n\
             [Text to translate]\n\
             {}\n",
            source_name,
            language_name,
            target.code(),
            language_name,
            text
        )
    }
}

#[async_trait]
impl Translator for OllamaTranslator {
    async fn translate(&self, text: &str, target: TargetLanguage) -> Result<String> {
        if text.trim().is_empty() {
            return Err(DublineError::PermanentSegment("empty source text".to_string()));
        }

        let request = TranslationRequest {
            model: self.config.model.clone(),
            prompt: self.build_translation_prompt(text, target),
            stream: false,
            format: "json".to_string(),
        };

        let url = format!("{}/api/generate", self.config.endpoint.trim_end_matches('/'));
        debug!("Sending translation request to: {}", url);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &error_text));
        }

        let translation_response: TranslationResponse = response.json().await.map_err(|e| {
            DublineError::TransientService(format!("Failed to parse Ollama response: {}", e))
        })?;

        let raw_response = translation_response.response.trim();
        debug!("Raw Ollama response: {}", raw_response);

        let translation = parse_translation(raw_response);
        if translation.is_empty() {
            return Err(DublineError::PermanentSegment("empty translation received".to_string()));
        }
        Ok(translation)
    }
}

/// Connection-level failures are worth retrying; malformed requests are not
fn classify_request_error(e: reqwest::Error) -> DublineError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        DublineError::TransientService(format!("HTTP request failed: {}", e))
    } else {
        DublineError::PermanentSegment(format!("HTTP request failed: {}", e))
    }
}

fn classify_status(status: StatusCode, body: &str) -> DublineError {
    let message = format!("Ollama API error {}: {}", status, body.trim());
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        DublineError::TransientService(message)
    } else {
        DublineError::PermanentSegment(message)
    }
}

/// Extract the translation from the model reply: the `{"text": ...}` contract
/// first, then the first line that does not look like commentary.
fn parse_translation(raw_response: &str) -> String {
    if let Ok(result) = serde_json::from_str::<TranslationResult>(raw_response) {
        return result.text.trim().to_string();
    }
    clean_translation_response(raw_response)
}

fn clean_translation_response(response: &str) -> String {
    let lines: Vec<&str> = response.lines().map(str::trim).filter(|l| !l.is_empty()).collect();

    for &line in &lines {
        if line.starts_with("Here is")
            || line.starts_with("Here are")
            || line.starts_with("Translation:")
            || line.starts_with("- ")
            || line.starts_with("* ")
        {
            continue;
        }
        if line.starts_with("**") && line.ends_with("**") {
            continue;
        }
        if line.chars().count() > 3 {
            return line.trim_matches('"').to_string();
        }
    }

    lines.first().map(|l| l.to_string()).unwrap_or_default()
}

fn language_code_to_name(code: &str) -> String {
    match code.to_lowercase().as_str() {
        "zh" | "zh-cn" | "cmn" => "Chinese".to_string(),
        "en" => "English".to_string(),
        "fr" => "French".to_string(),
        "de" => "German".to_string(),
        "ja" => "Japanese".to_string(),
        "ko" => "Korean".to_string(),
        _ => code.to_string(),
    }
}

/// Check if Ollama is available and the model is loaded
pub async fn check_ollama_availability(endpoint: &str, model: &str) -> Result<()> {
    let client = Client::new();
    let url = format!("{}/api/show", endpoint.trim_end_matches('/'));

    let response = client
        .post(&url)
        .json(&json!({ "name": model }))
        .send()
        .await
        .map_err(|e| DublineError::Config(format!("Failed to connect to Ollama: {}", e)))?;

    if response.status().is_success() {
        info!("Ollama model '{}' is available", model);
        Ok(())
    } else {
        Err(DublineError::Config(format!(
            "Ollama model '{}' not found. Please pull the model first: ollama pull {}",
            model, model
        )))
    }
}
