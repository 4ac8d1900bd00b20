use crate::{
    config::GeminiConfig,
    error::{GenerationError, Result},
};
use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, Url};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Remote model-serving API. Everything above this trait treats it as
/// opaque and unreliable.
#[async_trait]
pub trait GenerativeApi: Send + Sync {
    /// `models/{model}:generateContent`
    async fn generate_content(&self, model: &str, body: &Value) -> Result<Value>;

    /// `models/{model}:predict`
    async fn predict(&self, model: &str, body: &Value) -> Result<Value>;

    /// Downloads a file referenced by a response, returning bytes and the
    /// content type if the server sent one.
    async fn fetch_bytes(&self, url: &str) -> Result<(Vec<u8>, Option<String>)>;
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
}

/// Gemini REST transport over `reqwest`.
#[derive(Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
    /// Parsed `base_url`; only its origin may receive the API key.
    base: Url,
    api_key: String,
}

impl HttpTransport {
    pub fn new(config: &GeminiConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| GenerationError::Config("GEMINI_API_KEY is not set".into()))?;

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout.unwrap_or(Duration::from_secs(90)))
            .build()
            .map_err(|e| GenerationError::Config(format!("HTTP client: {}", e)))?;

        let base_url = config.base_url().to_string();
        let base = Url::parse(&base_url)
            .map_err(|e| GenerationError::Config(format!("base URL {}: {}", base_url, e)))?;

        Ok(Self {
            http,
            base_url,
            base,
            api_key,
        })
    }

    async fn post_model(&self, model: &str, method: &str, body: &Value) -> Result<Value> {
        let url = format!("{}/models/{}:{}", self.base_url, model, method);
        log::debug!("POST {}", url);

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(error_from_response(status.as_u16(), &text));
        }

        serde_json::from_str(&text).map_err(|e| {
            GenerationError::MalformedResponse(format!("{} returned invalid JSON: {}", model, e))
        })
    }
}

/// Turns a non-2xx response into a classified error, using the structured
/// `{"error": {...}}` body when present.
pub fn error_from_response(status: u16, body: &str) -> GenerationError {
    let message = match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(parsed) => match parsed.error.status {
            Some(code) => format!("{}: {}", code, parsed.error.message),
            None => parsed.error.message,
        },
        Err(_) => body.chars().take(300).collect(),
    };
    GenerationError::from_status(status, message)
}

/// Scheme, host and port all match. A string prefix is not enough:
/// `https://api.example` is a prefix of `https://api.example.evil.test`.
fn same_origin(base: &Url, url: &str) -> bool {
    Url::parse(url)
        .map(|url| url.origin() == base.origin())
        .unwrap_or(false)
}

#[async_trait]
impl GenerativeApi for HttpTransport {
    async fn generate_content(&self, model: &str, body: &Value) -> Result<Value> {
        self.post_model(model, "generateContent", body).await
    }

    async fn predict(&self, model: &str, body: &Value) -> Result<Value> {
        self.post_model(model, "predict", body).await
    }

    async fn fetch_bytes(&self, url: &str) -> Result<(Vec<u8>, Option<String>)> {
        let mut request = self.http.get(url);
        // Files API links need the key, arbitrary CDNs must not see it.
        if same_origin(&self.base, url) {
            request = request.header("x-goog-api-key", &self.api_key);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(GenerationError::from_status(
                status.as_u16(),
                format!("download of {} failed", url),
            ));
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());
        let bytes = response.bytes().await?;
        Ok((bytes.to_vec(), content_type))
    }
}
