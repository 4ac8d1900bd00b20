use serde::{Deserialize, Serialize};

/// Caption triple produced by the text model for a single meme.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemeCaption {
    /// Always English, fed to the image model.
    pub visual_prompt: String,
    pub top_text: String,
    pub bottom_text: String,
}

impl MemeCaption {
    pub fn is_complete(&self) -> bool {
        !self.visual_prompt.trim().is_empty()
            && !(self.top_text.trim().is_empty() && self.bottom_text.trim().is_empty())
    }

    pub fn into_result(self, image_url: Option<String>) -> MemeResult {
        MemeResult {
            visual_prompt: self.visual_prompt,
            top_text: self.top_text,
            bottom_text: self.bottom_text,
            image_url,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemeResult {
    pub visual_prompt: String,
    pub top_text: String,
    pub bottom_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}
