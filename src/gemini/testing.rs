//! Scripted in-memory [`GenerativeApi`] for unit tests.

use super::transport::GenerativeApi;
use crate::error::{GenerationError, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

type Responder = Box<dyn Fn(usize) -> Result<Value> + Send + Sync>;

pub const PNG_BASE64: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNk+M9QDwADhgGAWjR9awAAAABJRU5ErkJggg==";

/// Model ids are the dispatch key. Unknown models answer 404.
pub struct FakeApi {
    responders: HashMap<String, Responder>,
    hanging: HashSet<String>,
    calls: Mutex<Vec<String>>,
    cancel_on: Option<(String, usize, CancellationToken)>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self {
            responders: HashMap::new(),
            hanging: HashSet::new(),
            calls: Mutex::new(Vec::new()),
            cancel_on: None,
        }
    }

    /// `respond` receives the 0-based index of the call to this model.
    pub fn on(
        mut self,
        model: &str,
        respond: impl Fn(usize) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        self.responders.insert(model.to_string(), Box::new(respond));
        self
    }

    pub fn always(self, model: &str, value: Value) -> Self {
        self.on(model, move |_| Ok(value.clone()))
    }

    pub fn failing(self, model: &str, error: fn() -> GenerationError) -> Self {
        self.on(model, move |_| Err(error()))
    }

    /// Calls to `model` never complete.
    pub fn hanging(mut self, model: &str) -> Self {
        self.hanging.insert(model.to_string());
        self
    }

    /// On the `nth` (1-based) call to `model`, cancel `token` and never
    /// answer, like a request still in flight when the user hits stop.
    pub fn cancel_on_call(mut self, model: &str, nth: usize, token: CancellationToken) -> Self {
        self.cancel_on = Some((model.to_string(), nth, token));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, model: &str) -> usize {
        self.calls().iter().filter(|m| m.as_str() == model).count()
    }

    async fn respond(&self, model: &str) -> Result<Value> {
        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(model.to_string());
            calls.iter().filter(|m| m.as_str() == model).count() - 1
        };

        if let Some((target, nth, token)) = &self.cancel_on {
            if target == model && index + 1 == *nth {
                token.cancel();
                std::future::pending::<()>().await;
            }
        }

        if self.hanging.contains(model) {
            std::future::pending::<()>().await;
        }

        match self.responders.get(model) {
            Some(respond) => respond(index),
            None => Err(GenerationError::from_status(404, format!("models/{} is not found", model))),
        }
    }
}

#[async_trait]
impl GenerativeApi for FakeApi {
    async fn generate_content(&self, model: &str, _body: &Value) -> Result<Value> {
        self.respond(model).await
    }

    async fn predict(&self, model: &str, _body: &Value) -> Result<Value> {
        self.respond(model).await
    }

    async fn fetch_bytes(&self, url: &str) -> Result<(Vec<u8>, Option<String>)> {
        self.calls.lock().unwrap().push(format!("fetch:{}", url));
        Ok((vec![0x89, 0x50, 0x4e, 0x47], Some("image/png".to_string())))
    }
}

pub fn text_response(text: &str) -> Value {
    json!({
        "candidates": [{"content": {"role": "model", "parts": [{"text": text}]}}]
    })
}

pub fn inline_image_response(data: &str) -> Value {
    json!({
        "candidates": [{"content": {"parts": [
            {"text": "Here you go"},
            {"inlineData": {"mimeType": "image/png", "data": data}}
        ]}}]
    })
}

pub fn predict_response(data: &str) -> Value {
    json!({
        "predictions": [{"bytesBase64Encoded": data, "mimeType": "image/png"}]
    })
}

pub fn quota_error() -> GenerationError {
    GenerationError::from_status(429, "RESOURCE_EXHAUSTED: quota exceeded")
}

pub fn server_error() -> GenerationError {
    GenerationError::from_status(503, "UNAVAILABLE: model overloaded")
}
