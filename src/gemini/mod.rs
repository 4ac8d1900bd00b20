pub mod image_client;
pub mod text_client;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

use crate::{config::Config, error::Result};
use std::sync::Arc;

pub use image_client::ImageClient;
pub use text_client::TextClient;
pub use transport::{GenerativeApi, HttpTransport};

/// Text and image clients sharing one transport.
#[derive(Clone)]
pub struct GeminiClient {
    text_client: TextClient,
    image_client: ImageClient,
}

impl GeminiClient {
    /// Builds the HTTP transport from `config.gemini`.
    pub fn new(config: &Config) -> Result<Self> {
        let transport = HttpTransport::new(&config.gemini)?;
        Ok(Self::with_api(Arc::new(transport), config))
    }

    /// Uses any [`GenerativeApi`] implementation, e.g. a proxy or a fake.
    pub fn with_api(api: Arc<dyn GenerativeApi>, config: &Config) -> Self {
        log::debug!(
            "Text model {}, image candidates: {}",
            config.text.model,
            config
                .image
                .candidates
                .iter()
                .map(|c| c.id.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Self {
            text_client: TextClient::new(api.clone(), config.text.clone()),
            image_client: ImageClient::new(api, config.image.clone()),
        }
    }

    pub fn text(&self) -> &TextClient {
        &self.text_client
    }

    pub fn image(&self) -> &ImageClient {
        &self.image_client
    }
}
