//! Programmer memes and short comic strips from a topic, generated through a
//! rate-limited multi-model generative API.

pub mod config;
pub mod error;
pub mod extract;
pub mod gemini;
pub mod history;
pub mod logger;
pub mod models;
pub mod orchestrator;
pub mod retry;

pub use config::{
    Config, GeminiConfig, ImageConfig, ModelCandidate, OrchestratorConfig, RetryPolicy,
    TextConfig,
};
pub use error::{ErrorKind, GenerationError, Result};
pub use gemini::{GeminiClient, GenerativeApi, HttpTransport, ImageClient, TextClient};
pub use history::{FileBackend, History, HistoryBackend, HistoryEntry, MemoryBackend};
pub use models::*;
pub use orchestrator::{GenerationHandle, Orchestrator};
