use super::{ComicScript, GenerationKind, MemeResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationState {
    Idle,
    Running,
    Completed,
    Aborted,
    Failed,
}

impl GenerationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GenerationState::Completed | GenerationState::Aborted | GenerationState::Failed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum GenerationOutput {
    Pending,
    Meme(MemeResult),
    Comic(ComicScript),
}

/// Panel `current` of `total` has finished (1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub current: usize,
    pub total: usize,
}

/// Immutable point-in-time view of one generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub generation_id: Uuid,
    pub sequence: u32,
    pub timestamp: DateTime<Utc>,
    pub kind: GenerationKind,
    pub state: GenerationState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
    pub output: GenerationOutput,
    /// Human readable status or failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Snapshot {
    pub fn meme(&self) -> Option<&MemeResult> {
        match &self.output {
            GenerationOutput::Meme(meme) => Some(meme),
            _ => None,
        }
    }

    pub fn comic(&self) -> Option<&ComicScript> {
        match &self.output {
            GenerationOutput::Comic(script) => Some(script),
            _ => None,
        }
    }
}
