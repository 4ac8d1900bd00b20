use super::transport::GenerativeApi;
use crate::{
    config::{ImageConfig, InvocationShape, ModelCandidate},
    error::{GenerationError, Result},
    models::{ImageGenerationResult, InlineImage},
    retry::{retry, sleep_or_cancel, with_timeout},
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Image generation across a priority-ordered list of candidate models.
#[derive(Clone)]
pub struct ImageClient {
    api: Arc<dyn GenerativeApi>,
    config: ImageConfig,
}

impl ImageClient {
    pub fn new(api: Arc<dyn GenerativeApi>, config: ImageConfig) -> Self {
        Self { api, config }
    }

    pub fn candidates(&self) -> &[ModelCandidate] {
        &self.config.candidates
    }

    pub fn config(&self) -> &ImageConfig {
        &self.config
    }

    /// Tries each candidate in order and returns the first image as a data
    /// URL. Never fails; total failure is reported inside the result.
    pub async fn generate_image(
        &self,
        prompt: &str,
        token: &CancellationToken,
    ) -> ImageGenerationResult {
        let candidates = &self.config.candidates;
        if candidates.is_empty() {
            return ImageGenerationResult::failure("no image models configured", false);
        }

        let mut last_error = String::from("no candidate attempted");
        let mut saw_quota = false;

        for (index, candidate) in candidates.iter().enumerate() {
            let label = format!("image:{}", candidate.id);
            let attempts = retry(&self.config.retry, token, &label, || {
                self.invoke(candidate, prompt)
            });
            let outcome = with_timeout(Some(self.config.candidate_timeout), attempts).await;

            let error = match outcome {
                Ok(image) => {
                    log::info!("Image generated by {}", candidate.id);
                    return ImageGenerationResult::success(image.to_data_url(), &candidate.id);
                }
                Err(e) => e,
            };

            if error.is_cancelled() {
                log::info!("Image generation cancelled during {}", candidate.id);
                return ImageGenerationResult::failure("cancelled", false);
            }

            let is_quota = error.is_quota();
            saw_quota |= is_quota;
            last_error = format!("{}: {}", candidate.id, error);

            if index + 1 == candidates.len() {
                break;
            }
            let cooldown = if is_quota {
                self.config.quota_cooldown
            } else {
                self.config.error_cooldown
            };
            log::warn!(
                "{} failed ({}), switching to next model in {:?}",
                candidate.id,
                error,
                cooldown
            );
            if sleep_or_cancel(token, cooldown).await.is_err() {
                log::info!("Image generation cancelled during model cooldown");
                return ImageGenerationResult::failure("cancelled", false);
            }
        }

        log::error!("All image models failed, last error: {}", last_error);
        ImageGenerationResult::failure(last_error, saw_quota)
    }

    async fn invoke(&self, candidate: &ModelCandidate, prompt: &str) -> Result<InlineImage> {
        match candidate.shape {
            InvocationShape::Batch => {
                let body = json!({
                    "instances": [{"prompt": prompt}],
                    "parameters": {
                        "sampleCount": 1,
                        "aspectRatio": self.config.aspect_ratio
                    }
                });
                let response = self.api.predict(&candidate.id, &body).await?;
                first_prediction(&candidate.id, &response)
            }
            InvocationShape::Multimodal => {
                let body = json!({
                    "contents": [{"role": "user", "parts": [{"text": prompt}]}],
                    "generationConfig": {"responseModalities": ["TEXT", "IMAGE"]}
                });
                let response = self.api.generate_content(&candidate.id, &body).await?;
                match scan_parts(&candidate.id, &response)? {
                    ImagePart::Inline(image) => Ok(image),
                    ImagePart::Remote { uri, mime_type } => {
                        let (bytes, fetched_mime) = self.api.fetch_bytes(&uri).await?;
                        if bytes.is_empty() {
                            return Err(GenerationError::NoImageData {
                                model: candidate.id.clone(),
                                text: None,
                            });
                        }
                        Ok(InlineImage {
                            mime_type: fetched_mime
                                .or(mime_type)
                                .unwrap_or_else(|| "image/png".to_string()),
                            data: BASE64.encode(bytes),
                        })
                    }
                }
            }
        }
    }
}

#[derive(Debug, PartialEq)]
enum ImagePart {
    Inline(InlineImage),
    Remote {
        uri: String,
        mime_type: Option<String>,
    },
}

fn str_field<'a>(value: &'a Value, camel: &str, snake: &str) -> Option<&'a str> {
    value
        .get(camel)
        .or_else(|| value.get(snake))
        .and_then(Value::as_str)
}

/// Reads `predictions[0]` of a batch (`predict`) response.
fn first_prediction(model: &str, response: &Value) -> Result<InlineImage> {
    let predictions = response
        .get("predictions")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    predictions
        .iter()
        .find_map(|p| {
            let data = str_field(p, "bytesBase64Encoded", "bytes_base64_encoded")
                .filter(|d| !d.is_empty())?;
            Some(InlineImage {
                mime_type: str_field(p, "mimeType", "mime_type")
                    .unwrap_or("image/png")
                    .to_string(),
                data: data.to_string(),
            })
        })
        .ok_or_else(|| {
            // Filtered prompts come back as 200 with an empty prediction list.
            GenerationError::NoImageData {
                model: model.to_string(),
                text: None,
            }
        })
}

/// Scans every candidate part of a multimodal response for image data.
/// Text-only answers are failures for this model.
fn scan_parts(model: &str, response: &Value) -> Result<ImagePart> {
    let mut text = String::new();
    let parts = response
        .get("candidates")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|c| c.get("content")?.get("parts")?.as_array())
        .flatten();

    for part in parts {
        if let Some(inline) = part.get("inlineData").or_else(|| part.get("inline_data")) {
            if let Some(data) = inline.get("data").and_then(Value::as_str).filter(|d| !d.is_empty()) {
                return Ok(ImagePart::Inline(InlineImage {
                    mime_type: str_field(inline, "mimeType", "mime_type")
                        .unwrap_or("image/png")
                        .to_string(),
                    data: data.to_string(),
                }));
            }
        }
        if let Some(file) = part.get("fileData").or_else(|| part.get("file_data")) {
            if let Some(uri) = str_field(file, "fileUri", "file_uri") {
                let mime_type = str_field(file, "mimeType", "mime_type").map(str::to_string);
                if let Some(image) = crate::models::parse_data_url(uri) {
                    return Ok(ImagePart::Inline(image));
                }
                if uri.starts_with("http://") || uri.starts_with("https://") {
                    return Ok(ImagePart::Remote {
                        uri: uri.to_string(),
                        mime_type,
                    });
                }
            }
        }
        if let Some(t) = part.get("text").and_then(Value::as_str) {
            text.push_str(t);
        }
    }

    if !text.is_empty() {
        log::debug!("{} answered with text instead of an image: {}", model, text);
    }
    Err(GenerationError::NoImageData {
        model: model.to_string(),
        text: (!text.is_empty()).then_some(text),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::gemini::testing::{
        inline_image_response, predict_response, quota_error, server_error, text_response,
        FakeApi, PNG_BASE64,
    };
    use std::time::Duration;

    fn client(api: FakeApi, candidates: Vec<ModelCandidate>, attempts: u32) -> (ImageClient, Arc<FakeApi>) {
        let api = Arc::new(api);
        let config = ImageConfig::new()
            .with_candidates(candidates)
            .with_retry(RetryPolicy::immediate(attempts))
            .with_cooldowns(Duration::ZERO, Duration::ZERO);
        (ImageClient::new(api.clone(), config), api)
    }

    fn three_models() -> Vec<ModelCandidate> {
        vec![
            ModelCandidate::multimodal("m1"),
            ModelCandidate::batch("m2"),
            ModelCandidate::batch("m3"),
        ]
    }

    #[tokio::test]
    async fn test_first_success_wins() {
        let api = FakeApi::new()
            .always("m1", inline_image_response(PNG_BASE64))
            .always("m2", predict_response("SHOULD_NOT_BE_USED"));
        let (client, api) = client(api, three_models(), 2);

        let result = client.generate_image("a cat", &CancellationToken::new()).await;
        assert_eq!(
            result.image_url.as_deref(),
            Some(format!("data:image/png;base64,{}", PNG_BASE64).as_str())
        );
        assert_eq!(result.model.as_deref(), Some("m1"));
        assert_eq!(api.calls(), vec!["m1"]);
    }

    #[tokio::test]
    async fn test_quota_models_skipped_until_third_succeeds() {
        let api = FakeApi::new()
            .failing("m1", quota_error)
            .failing("m2", quota_error)
            .always("m3", predict_response(PNG_BASE64));
        let (client, api) = client(api, three_models(), 1);

        let result = client.generate_image("a cat", &CancellationToken::new()).await;
        assert!(result.is_success());
        assert_eq!(result.model.as_deref(), Some("m3"));
        assert_eq!(api.calls(), vec!["m1", "m2", "m3"]);
    }

    #[tokio::test]
    async fn test_retries_within_candidate_before_switching() {
        let api = FakeApi::new()
            .failing("m1", server_error)
            .on("m2", |n| {
                if n == 0 {
                    Err(server_error())
                } else {
                    Ok(predict_response(PNG_BASE64))
                }
            });
        let (client, api) = client(api, three_models(), 2);

        let result = client.generate_image("a cat", &CancellationToken::new()).await;
        assert_eq!(result.model.as_deref(), Some("m2"));
        assert_eq!(api.calls(), vec!["m1", "m1", "m2", "m2"]);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        // m1 is unregistered, so the fake answers 404.
        let api = FakeApi::new().always("m2", predict_response(PNG_BASE64));
        let (client, api) = client(api, three_models(), 3);

        let result = client.generate_image("a cat", &CancellationToken::new()).await;
        assert!(result.is_success());
        assert_eq!(api.calls_to("m1"), 1);
    }

    #[tokio::test]
    async fn test_text_instead_of_image_is_failure() {
        let api = FakeApi::new()
            .always("m1", text_response("I'd rather describe it: a cat."))
            .always("m2", predict_response(PNG_BASE64));
        let (client, api) = client(api, three_models(), 3);

        let result = client.generate_image("a cat", &CancellationToken::new()).await;
        assert_eq!(result.model.as_deref(), Some("m2"));
        // Malformed answers are not retried on the same model.
        assert_eq!(api.calls_to("m1"), 1);
    }

    #[tokio::test]
    async fn test_total_failure_reports_quota() {
        let api = FakeApi::new()
            .failing("m1", server_error)
            .failing("m2", quota_error)
            .failing("m3", server_error);
        let (client, _) = client(api, three_models(), 1);

        let result = client.generate_image("a cat", &CancellationToken::new()).await;
        assert!(!result.is_success());
        assert_eq!(result.is_quota_error, Some(true));
        assert!(result.error.unwrap().starts_with("m3:"));
    }

    #[tokio::test]
    async fn test_total_failure_without_quota() {
        let api = FakeApi::new().failing("m1", server_error);
        let (client, _) = client(api, vec![ModelCandidate::multimodal("m1")], 2);

        let result = client.generate_image("a cat", &CancellationToken::new()).await;
        assert_eq!(result.is_quota_error, Some(false));
    }

    #[tokio::test]
    async fn test_file_uri_is_fetched_and_encoded() {
        let response = json!({"candidates": [{"content": {"parts": [
            {"fileData": {"fileUri": "https://files.example/img/1", "mimeType": "image/png"}}
        ]}}]});
        let api = FakeApi::new().always("m1", response);
        let (client, api) = client(api, three_models(), 1);

        let result = client.generate_image("a cat", &CancellationToken::new()).await;
        assert_eq!(result.image_url.as_deref(), Some("data:image/png;base64,iVBORw=="));
        assert!(api.calls().contains(&"fetch:https://files.example/img/1".to_string()));
    }

    #[tokio::test]
    async fn test_cancel_stops_candidate_loop() {
        let token = CancellationToken::new();
        let api = FakeApi::new()
            .always("m2", predict_response(PNG_BASE64))
            .cancel_on_call("m1", 1, token.clone());
        let (client, api) = client(api, three_models(), 3);

        let result = client.generate_image("a cat", &token).await;
        assert_eq!(result.error.as_deref(), Some("cancelled"));
        assert_eq!(api.calls(), vec!["m1"]);
    }

    fn timed_client(api: FakeApi, candidates: Vec<ModelCandidate>) -> (ImageClient, Arc<FakeApi>) {
        let api = Arc::new(api);
        let config = ImageConfig::new()
            .with_candidates(candidates)
            .with_retry(RetryPolicy::immediate(1))
            .with_cooldowns(Duration::from_secs(5), Duration::from_secs(1));
        (ImageClient::new(api.clone(), config), api)
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_model_gives_way_to_next_candidate() {
        let api = Arc::new(
            FakeApi::new()
                .hanging("m1")
                .always("m2", predict_response(PNG_BASE64)),
        );
        let config = ImageConfig::new().with_candidates(vec![
            ModelCandidate::multimodal("m1"),
            ModelCandidate::batch("m2"),
        ]);
        let client = ImageClient::new(api.clone(), config.clone());

        let started = tokio::time::Instant::now();
        let result = client.generate_image("a cat", &CancellationToken::new()).await;

        assert_eq!(result.model.as_deref(), Some("m2"));
        // First attempt hits the per-attempt limit, the retry hits the
        // per-candidate limit.
        assert_eq!(api.calls_to("m1"), 2);
        assert!(started.elapsed() <= config.candidate_timeout + config.error_cooldown + Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_failure_waits_quota_cooldown() {
        let api = FakeApi::new()
            .failing("m1", quota_error)
            .always("m2", predict_response(PNG_BASE64));
        let (client, _) = timed_client(api, three_models());

        let started = tokio::time::Instant::now();
        let result = client.generate_image("a cat", &CancellationToken::new()).await;

        assert!(result.is_success());
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(5), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(5100), "{:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_failure_waits_error_cooldown() {
        let api = FakeApi::new()
            .failing("m1", server_error)
            .always("m2", predict_response(PNG_BASE64));
        let (client, _) = timed_client(api, three_models());

        let started = tokio::time::Instant::now();
        let result = client.generate_image("a cat", &CancellationToken::new()).await;

        assert!(result.is_success());
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(1), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(1100), "{:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_cooldown_after_last_candidate() {
        let api = FakeApi::new()
            .failing("m1", quota_error)
            .failing("m2", quota_error);
        let candidates = vec![ModelCandidate::multimodal("m1"), ModelCandidate::batch("m2")];
        let (client, _) = timed_client(api, candidates);

        let started = tokio::time::Instant::now();
        let result = client.generate_image("a cat", &CancellationToken::new()).await;

        assert!(!result.is_success());
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(5), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(5100), "{:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_model_cooldown() {
        let token = CancellationToken::new();
        let api = FakeApi::new()
            .failing("m1", quota_error)
            .always("m2", predict_response(PNG_BASE64));
        let api = Arc::new(api);
        let config = ImageConfig::new()
            .with_candidates(three_models())
            .with_retry(RetryPolicy::immediate(1))
            .with_cooldowns(Duration::from_secs(60), Duration::from_secs(60));
        let client = ImageClient::new(api.clone(), config);

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let started = tokio::time::Instant::now();
        let result = client.generate_image("a cat", &token).await;

        assert_eq!(result.error.as_deref(), Some("cancelled"));
        assert_eq!(api.calls(), vec!["m1"]);
        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[test]
    fn test_scan_parts_snake_case() {
        let response = json!({"candidates": [{"content": {"parts": [
            {"inline_data": {"mime_type": "image/jpeg", "data": "abc"}}
        ]}}]});
        assert_eq!(
            scan_parts("m", &response).unwrap(),
            ImagePart::Inline(InlineImage {
                mime_type: "image/jpeg".into(),
                data: "abc".into()
            })
        );
    }

    #[test]
    fn test_empty_predictions_is_no_image() {
        let err = first_prediction("m", &json!({"predictions": []})).unwrap_err();
        assert!(matches!(err, GenerationError::NoImageData { .. }));
    }
}
