use crate::{
    config::MAX_TOPIC_CHARS,
    error::{GenerationError, Result},
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// User-supplied description of the pain point to joke about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GenerationTopic(String);

impl GenerationTopic {
    /// Trims whitespace and truncates to [`MAX_TOPIC_CHARS`] characters.
    pub fn new(raw: impl AsRef<str>) -> Result<Self> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(GenerationError::Config("topic must not be empty".into()));
        }
        let topic: String = trimmed.chars().take(MAX_TOPIC_CHARS).collect();
        Ok(Self(topic.trim_end().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for GenerationTopic {
    type Error = GenerationError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<GenerationTopic> for String {
    fn from(topic: GenerationTopic) -> Self {
        topic.0
    }
}

impl fmt::Display for GenerationTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum GenerationKind {
    Single,
    Comic { panels: usize },
}

impl fmt::Display for GenerationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationKind::Single => write!(f, "single meme"),
            GenerationKind::Comic { panels } => write!(f, "{}-panel comic", panels),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub topic: GenerationTopic,
    pub kind: GenerationKind,
    /// Appended to every visual prompt, e.g. ", pixel art style".
    pub style_suffix: String,
}

impl GenerationRequest {
    pub fn single(topic: GenerationTopic) -> Self {
        Self {
            topic,
            kind: GenerationKind::Single,
            style_suffix: String::new(),
        }
    }

    pub fn comic(topic: GenerationTopic, panels: usize) -> Self {
        Self {
            topic,
            kind: GenerationKind::Comic { panels },
            style_suffix: String::new(),
        }
    }

    pub fn with_style(mut self, style_suffix: impl Into<String>) -> Self {
        self.style_suffix = style_suffix.into();
        self
    }

    /// Visual prompt with the style suffix attached.
    pub fn styled_prompt(&self, prompt: &str) -> String {
        let suffix = self.style_suffix.trim();
        if suffix.is_empty() {
            prompt.trim().to_string()
        } else {
            let prompt = prompt.trim().trim_end_matches(&['.', ','][..]);
            format!("{}, {}", prompt, suffix.trim_start_matches(',').trim())
        }
    }
}
