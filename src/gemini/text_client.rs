use super::transport::GenerativeApi;
use crate::{
    config::TextConfig,
    error::{GenerationError, Result},
    extract::parse_json,
    models::{ComicPanel, ComicScript, GenerationTopic, MemeCaption},
    retry::retry,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const FALLBACK_VISUAL_PROMPT: &str = "A tired programmer at a desk late at night, staring at a monitor full of red error messages, cold coffee mug, dim office light";
pub const FALLBACK_TOP_TEXT: &str = "КОГДА НЕЙРОСЕТЬ ТОЖЕ УСТАЛА";
pub const FALLBACK_BOTTOM_TEXT: &str = "НО ДЕДЛАЙН НИКТО НЕ ОТМЕНЯЛ";

/// (description, caption) pairs used when the script cannot be generated.
const FALLBACK_PANELS: [(&str, &str); 6] = [
    (
        "A programmer confidently clicks deploy on a Friday evening, office clock shows 18:00",
        "Пятница, 18:00. Что может пойти не так?",
    ),
    (
        "A monitoring dashboard on a big screen turns completely red with alerts",
        "Мониторинг: всё красное",
    ),
    (
        "The programmer typing frantically, surrounded by empty coffee cups",
        "Горячий фикс для горячего фикса",
    ),
    (
        "The whole team silently staring at one laptop screen",
        "Кто последний трогал прод?",
    ),
    (
        "The programmer asleep on the keyboard while the sun rises outside",
        "Зато теперь работает. Наверное.",
    ),
    (
        "The programmer writing a post-mortem document with a thousand-yard stare",
        "Постмортем номер сорок два",
    ),
];

pub fn fallback_caption() -> MemeCaption {
    MemeCaption {
        visual_prompt: FALLBACK_VISUAL_PROMPT.to_string(),
        top_text: FALLBACK_TOP_TEXT.to_string(),
        bottom_text: FALLBACK_BOTTOM_TEXT.to_string(),
    }
}

fn fallback_panel(index: usize) -> ComicPanel {
    let (description, caption) = FALLBACK_PANELS[index % FALLBACK_PANELS.len()];
    ComicPanel {
        panel_number: index as u32 + 1,
        description: description.to_string(),
        caption: caption.to_string(),
        image_url: None,
    }
}

pub fn fallback_script(topic: &str, panel_count: usize) -> ComicScript {
    ComicScript {
        topic: topic.to_string(),
        panels: (0..panel_count.max(1)).map(fallback_panel).collect(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPanel {
    #[serde(default)]
    description: String,
    #[serde(default)]
    caption: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ScriptPayload {
    Wrapped { panels: Vec<RawPanel> },
    Bare(Vec<RawPanel>),
}

impl ScriptPayload {
    fn into_panels(self) -> Vec<RawPanel> {
        match self {
            ScriptPayload::Wrapped { panels } | ScriptPayload::Bare(panels) => panels,
        }
    }
}

/// Caption and comic-script generation. Never fails: every error ends in
/// fallback content.
#[derive(Clone)]
pub struct TextClient {
    api: Arc<dyn GenerativeApi>,
    config: TextConfig,
}

impl TextClient {
    pub fn new(api: Arc<dyn GenerativeApi>, config: TextConfig) -> Self {
        Self { api, config }
    }

    pub fn config(&self) -> &TextConfig {
        &self.config
    }

    pub async fn generate_caption(
        &self,
        topic: &GenerationTopic,
        token: &CancellationToken,
    ) -> MemeCaption {
        match self.try_caption(topic, token).await {
            Ok(caption) => caption,
            Err(GenerationError::Cancelled) => {
                log::info!("Caption generation cancelled");
                fallback_caption()
            }
            Err(e) => {
                log::error!("Caption generation failed, using fallback: {}", e);
                fallback_caption()
            }
        }
    }

    pub async fn generate_script(
        &self,
        topic: &GenerationTopic,
        panel_count: usize,
        token: &CancellationToken,
    ) -> ComicScript {
        let panel_count = panel_count.max(1);
        let raw = match self.try_script(topic, panel_count, token).await {
            Ok(panels) if !panels.is_empty() => panels,
            Ok(_) => {
                log::error!("Script came back with zero panels, using fallback script");
                return fallback_script(topic.as_str(), panel_count);
            }
            Err(GenerationError::Cancelled) => {
                log::info!("Script generation cancelled");
                return fallback_script(topic.as_str(), panel_count);
            }
            Err(e) => {
                log::error!("Script generation failed, using fallback script: {}", e);
                return fallback_script(topic.as_str(), panel_count);
            }
        };

        if raw.len() != panel_count {
            log::warn!(
                "Model returned {} panels, expected {}; normalising",
                raw.len(),
                panel_count
            );
        }

        let mut raw = raw.into_iter();
        let panels = (0..panel_count)
            .map(|index| match raw.next() {
                Some(panel) if !panel.description.trim().is_empty() => ComicPanel {
                    panel_number: index as u32 + 1,
                    description: panel.description.trim().to_string(),
                    caption: panel.caption.trim().to_string(),
                    image_url: None,
                },
                _ => fallback_panel(index),
            })
            .collect();

        ComicScript {
            topic: topic.as_str().to_string(),
            panels,
        }
    }

    async fn try_caption(
        &self,
        topic: &GenerationTopic,
        token: &CancellationToken,
    ) -> Result<MemeCaption> {
        let prompt = caption_prompt(topic.as_str(), &self.config.display_language);
        let text = self.request_json(&prompt, caption_schema(), token).await?;
        let caption: MemeCaption = parse_json(&text)?;
        if !caption.is_complete() {
            return Err(GenerationError::MalformedResponse(
                "caption is missing required fields".into(),
            ));
        }
        Ok(MemeCaption {
            visual_prompt: caption.visual_prompt.trim().to_string(),
            top_text: caption.top_text.trim().to_string(),
            bottom_text: caption.bottom_text.trim().to_string(),
        })
    }

    async fn try_script(
        &self,
        topic: &GenerationTopic,
        panel_count: usize,
        token: &CancellationToken,
    ) -> Result<Vec<RawPanel>> {
        let prompt = script_prompt(topic.as_str(), panel_count, &self.config.display_language);
        let text = self.request_json(&prompt, script_schema(), token).await?;
        // A bare top-level array would lose its brackets in extraction.
        let payload: ScriptPayload =
            serde_json::from_str(text.trim()).or_else(|_| parse_json(&text))?;
        Ok(payload.into_panels())
    }

    /// Schema-constrained generateContent call, retried. Returns the raw text
    /// of the first candidate.
    async fn request_json(
        &self,
        prompt: &str,
        schema: Value,
        token: &CancellationToken,
    ) -> Result<String> {
        let body = json!({
            "contents": [{"role": "user", "parts": [{"text": prompt}]}],
            "generationConfig": {
                "temperature": self.config.temperature,
                "responseMimeType": "application/json",
                "responseSchema": schema
            }
        });
        log::debug!("Text generation request: {}", prompt);

        let model = self.config.model.as_str();
        let label = format!("text:{}", model);
        let response = retry(&self.config.retry, token, &label, || {
            self.api.generate_content(model, &body)
        })
        .await?;

        response_text(&response)
            .ok_or_else(|| GenerationError::MalformedResponse("no text in response".into()))
    }
}

/// Concatenated text parts of the first candidate.
pub fn response_text(response: &Value) -> Option<String> {
    let parts = response
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect();
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

fn caption_prompt(topic: &str, language: &str) -> String {
    format!(
        "You are a witty meme author for software engineers.\n\
         Topic (an IT or programmer pain point): \"{topic}\"\n\n\
         Return a JSON object with exactly these fields:\n\
         - \"visualPrompt\": a vivid description of the meme image, in English, no text in the image\n\
         - \"topText\": the top caption, in {language}, short and punchy\n\
         - \"bottomText\": the bottom caption (punchline), in {language}\n\
         The humor must come from everyday software engineering life. Return only JSON."
    )
}

fn script_prompt(topic: &str, panel_count: usize, language: &str) -> String {
    format!(
        "You are a comic strip writer for software engineers.\n\
         Topic (an IT or programmer pain point): \"{topic}\"\n\n\
         Write a comic of exactly {panel_count} panels that builds up to a punchline in the last panel.\n\
         Return a JSON object {{\"panels\": [...]}} with exactly {panel_count} items, each having:\n\
         - \"panelNumber\": 1-based integer\n\
         - \"description\": what the panel shows, in English, for an image model, no text in the image\n\
         - \"caption\": the panel caption or dialogue, in {language}\n\
         Return only JSON."
    )
}

fn caption_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "visualPrompt": {"type": "STRING"},
            "topText": {"type": "STRING"},
            "bottomText": {"type": "STRING"}
        },
        "required": ["visualPrompt", "topText", "bottomText"]
    })
}

fn script_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "panels": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "panelNumber": {"type": "INTEGER"},
                        "description": {"type": "STRING"},
                        "caption": {"type": "STRING"}
                    },
                    "required": ["panelNumber", "description", "caption"]
                }
            }
        },
        "required": ["panels"]
    })
}
