use serde::{Deserialize, Serialize};

/// Outcome of one image request across all candidate models.
///
/// Built only through [`ImageGenerationResult::success`] and
/// [`ImageGenerationResult::failure`], so exactly one of `image_url` and
/// `error` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageGenerationResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_quota_error: Option<bool>,
    /// Candidate that produced the image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl ImageGenerationResult {
    pub fn success(image_url: String, model: impl Into<String>) -> Self {
        Self {
            image_url: Some(image_url),
            error: None,
            is_quota_error: None,
            model: Some(model.into()),
        }
    }

    pub fn failure(error: impl Into<String>, is_quota_error: bool) -> Self {
        Self {
            image_url: None,
            error: Some(error.into()),
            is_quota_error: Some(is_quota_error),
            model: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.image_url.is_some()
    }
}

/// Raw image bytes as returned by a model, before data-URL wrapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub mime_type: String,
    /// Base64, standard alphabet.
    pub data: String,
}

impl InlineImage {
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

/// Splits `data:<mime>;base64,<payload>` into its parts.
pub fn parse_data_url(url: &str) -> Option<InlineImage> {
    let rest = url.strip_prefix("data:")?;
    let (meta, data) = rest.split_once(',')?;
    let mime_type = meta.strip_suffix(";base64")?;
    Some(InlineImage {
        mime_type: mime_type.to_string(),
        data: data.to_string(),
    })
}
