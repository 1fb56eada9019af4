//! Google Generative Language API client for the language stage.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::instrument;

use aurasign_ai::{CapabilityError, SentenceGenerator};

use super::http::status_error;

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Clone)]
pub struct GeminiGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl core::fmt::Debug for GeminiGenerator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GeminiGenerator")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

impl GeminiGenerator {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: api_key.into(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }
}

/// Concatenated text of the first candidate.
fn first_candidate_text(resp: GenerateResponse) -> Result<String, CapabilityError> {
    let text: String = resp
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(CapabilityError::InvalidResponse("no candidate text".into()));
    }
    Ok(text)
}

#[async_trait]
impl SentenceGenerator for GeminiGenerator {
    #[instrument(skip_all, fields(model = %self.model), err)]
    async fn generate(&self, prompt: &str) -> Result<String, CapabilityError> {
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": { "responseMimeType": "application/json" },
        });

        let resp = self
            .client
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CapabilityError::Unavailable(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(status_error(status, text));
        }

        let parsed: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| CapabilityError::InvalidResponse(e.to_string()))?;
        first_candidate_text(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_names_model() {
        let generator = GeminiGenerator::new("key").with_endpoint("http://localhost:9000/");
        assert_eq!(
            generator.url(),
            "http://localhost:9000/models/gemini-2.5-flash:generateContent"
        );
    }

    #[test]
    fn joins_parts_of_first_candidate() {
        let resp: GenerateResponse = serde_json::from_value(json!({
            "candidates": [
                { "content": { "parts": [
                    { "text": "{\"sentence\":" },
                    { "text": "\"Hi.\",\"tone\":\"Casual\"}" }
                ] } },
                { "content": { "parts": [{ "text": "ignored" }] } }
            ]
        }))
        .unwrap();
        assert_eq!(
            first_candidate_text(resp).unwrap(),
            r#"{"sentence":"Hi.","tone":"Casual"}"#
        );
    }

    #[test]
    fn empty_response_is_invalid() {
        let resp: GenerateResponse = serde_json::from_value(json!({ "candidates": [] })).unwrap();
        assert!(matches!(
            first_candidate_text(resp),
            Err(CapabilityError::InvalidResponse(_))
        ));
    }

    #[test]
    fn bad_key_is_rejected_and_outage_is_unavailable() {
        use reqwest::StatusCode;

        assert!(matches!(
            status_error(StatusCode::FORBIDDEN, "API key not valid".into()),
            CapabilityError::Rejected(msg) if msg.contains("API key not valid")
        ));
        assert!(matches!(
            status_error(StatusCode::BAD_GATEWAY, String::new()),
            CapabilityError::Unavailable(_)
        ));
    }

    #[test]
    fn debug_hides_api_key() {
        let generator = GeminiGenerator::new("secret-key");
        assert!(!format!("{generator:?}").contains("secret-key"));
    }
}
