//! JSON-over-HTTP client for a model server hosting all four capabilities.
//!
//! | Capability          | Request                                   | Response                          |
//! |---------------------|-------------------------------------------|-----------------------------------|
//! | `POST /predict`     | `{"window": [[f32]]}`                     | `{"label": str, "confidence": f32}` |
//! | `POST /classify`    | `{"features": [f32]}`                     | `{"label": str}`                  |
//! | `POST /generate`    | `{"prompt": str}`                         | `{"text": str}`                   |
//! | `POST /synthesize`  | `{"text": str, "emotion": str?}`          | raw audio bytes                   |

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::json;
use tracing::{debug, instrument};

use aurasign_ai::{
    CapabilityError, EmotionClassifier, Prediction, SentenceGenerator, SignClassifier,
    SpeechSynthesizer,
};

#[derive(Debug, Clone)]
pub struct HttpCapabilityClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct LabelResponse {
    label: String,
}

#[derive(Deserialize)]
struct TextResponse {
    text: String,
}

#[derive(Serialize)]
struct SynthesizeRequest<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    emotion: Option<&'a str>,
}

impl HttpCapabilityClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Use a preconfigured client (timeouts, TLS, proxies).
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> Result<reqwest::Response, CapabilityError> {
        let resp = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| CapabilityError::Unavailable(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let text = resp.text().await.unwrap_or_default();
        debug!(path, status = status.as_u16(), body = %text, "capability call failed");
        Err(status_error(status, text))
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> Result<T, CapabilityError> {
        self.post(path, body)
            .await?
            .json::<T>()
            .await
            .map_err(|e| CapabilityError::InvalidResponse(e.to_string()))
    }
}

pub(crate) fn status_error(status: StatusCode, body: String) -> CapabilityError {
    if status.is_client_error() {
        CapabilityError::Rejected(format!("{status}: {body}"))
    } else {
        CapabilityError::Unavailable(format!("{status}: {body}"))
    }
}

#[async_trait]
impl SignClassifier for HttpCapabilityClient {
    #[instrument(skip_all, fields(frames = window.len()), err)]
    async fn predict(&self, window: &[Vec<f32>]) -> Result<Prediction, CapabilityError> {
        self.post_json("/predict", &json!({ "window": window })).await
    }
}

#[async_trait]
impl EmotionClassifier for HttpCapabilityClient {
    async fn classify(&self, features: &[f32]) -> Result<String, CapabilityError> {
        let resp: LabelResponse = self
            .post_json("/classify", &json!({ "features": features }))
            .await?;
        Ok(resp.label)
    }
}

#[async_trait]
impl SentenceGenerator for HttpCapabilityClient {
    #[instrument(skip_all, err)]
    async fn generate(&self, prompt: &str) -> Result<String, CapabilityError> {
        let resp: TextResponse = self
            .post_json("/generate", &json!({ "prompt": prompt }))
            .await?;
        Ok(resp.text)
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpCapabilityClient {
    #[instrument(skip_all, fields(chars = text.len()), err)]
    async fn synthesize(
        &self,
        text: &str,
        emotion: Option<&str>,
    ) -> Result<Vec<u8>, CapabilityError> {
        let bytes = self
            .post("/synthesize", &SynthesizeRequest { text, emotion })
            .await?
            .bytes()
            .await
            .map_err(|e| CapabilityError::InvalidResponse(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_normalised() {
        let client = HttpCapabilityClient::new("http://models:8500/");
        assert_eq!(client.url("/predict"), "http://models:8500/predict");
    }

    #[test]
    fn client_errors_are_rejections() {
        assert!(matches!(
            status_error(StatusCode::UNPROCESSABLE_ENTITY, "bad window".into()),
            CapabilityError::Rejected(_)
        ));
        assert!(matches!(
            status_error(StatusCode::SERVICE_UNAVAILABLE, String::new()),
            CapabilityError::Unavailable(_)
        ));
    }

    #[test]
    fn synthesize_request_omits_missing_emotion() {
        let body = serde_json::to_value(SynthesizeRequest {
            text: "Hello.",
            emotion: None,
        })
        .unwrap();
        assert_eq!(body, json!({ "text": "Hello." }));
    }
}
