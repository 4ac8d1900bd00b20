use std::env;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_TEXT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_PLACEHOLDER_BASE: &str = "https://placehold.co/1024x1024/1f2937/f87171/png";

/// Longest topic accepted from the user, in characters.
pub const MAX_TOPIC_CHARS: usize = 300;

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub request_timeout: Option<Duration>,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        GeminiConfig {
            api_key: None,
            base_url: None,
            request_timeout: None,
        }
    }
}

impl GeminiConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        let api_key = env::var("GEMINI_API_KEY")
            .or_else(|_| env::var("GOOGLE_API_KEY"))
            .ok();
        let base_url = env::var("GEMINI_BASE_URL").ok();
        let request_timeout = env::var("GEMINI_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs);

        GeminiConfig {
            api_key,
            base_url,
            request_timeout,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
    }
}

/// Backoff schedule for one retried remote call.
///
/// Delay after failed attempt `n` is
/// `base_delay * backoff_factor^(n-1)`, capped at `max_delay`, scaled by a
/// random factor in `[jitter_min, jitter_max]`. Quota errors never wait less
/// than `quota_floor`. Each attempt is cut off after `attempt_timeout`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
    pub quota_floor: Duration,
    pub jitter_min: f64,
    pub jitter_max: f64,
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::text_default()
    }
}

impl RetryPolicy {
    pub fn text_default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(8),
            quota_floor: Duration::from_secs(10),
            jitter_min: 0.75,
            jitter_max: 1.25,
            attempt_timeout: Some(Duration::from_secs(15)),
        }
    }

    pub fn image_default() -> Self {
        RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_secs(2),
            attempt_timeout: Some(Duration::from_secs(25)),
            ..Self::text_default()
        }
    }

    /// No waiting at all. Meant for tests and offline fakes.
    pub fn immediate(max_attempts: u32) -> Self {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::ZERO,
            backoff_factor: 1.0,
            max_delay: Duration::ZERO,
            quota_floor: Duration::ZERO,
            jitter_min: 1.0,
            jitter_max: 1.0,
            attempt_timeout: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, base_delay: Duration, backoff_factor: f64) -> Self {
        self.base_delay = base_delay;
        self.backoff_factor = backoff_factor;
        self
    }

    pub fn with_quota_floor(mut self, floor: Duration) -> Self {
        self.quota_floor = floor;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn with_jitter(mut self, min: f64, max: f64) -> Self {
        self.jitter_min = min.min(max);
        self.jitter_max = max.max(min);
        self
    }
}

/// How a candidate image model must be invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationShape {
    /// `generateContent` with image response modality; image arrives as an
    /// inline part next to (or instead of) text.
    Multimodal,
    /// `predict`, returns a batch of generated images.
    Batch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCandidate {
    pub id: String,
    pub shape: InvocationShape,
}

impl ModelCandidate {
    pub fn multimodal(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            shape: InvocationShape::Multimodal,
        }
    }

    pub fn batch(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            shape: InvocationShape::Batch,
        }
    }
}

/// Fast and cheap first, then the heavier models with separate quota pools.
pub fn default_image_candidates() -> Vec<ModelCandidate> {
    vec![
        ModelCandidate::multimodal("gemini-2.5-flash-image"),
        ModelCandidate::batch("imagen-4.0-fast-generate-001"),
        ModelCandidate::batch("imagen-4.0-generate-001"),
        ModelCandidate::multimodal("gemini-2.0-flash-preview-image-generation"),
    ]
}

#[derive(Debug, Clone)]
pub struct TextConfig {
    pub model: String,
    pub display_language: String,
    pub temperature: f32,
    pub retry: RetryPolicy,
}

impl Default for TextConfig {
    fn default() -> Self {
        TextConfig {
            model: DEFAULT_TEXT_MODEL.to_string(),
            display_language: "Russian".to_string(),
            temperature: 0.9,
            retry: RetryPolicy::text_default(),
        }
    }
}

impl TextConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_display_language(mut self, language: impl Into<String>) -> Self {
        self.display_language = language.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ImageConfig {
    pub candidates: Vec<ModelCandidate>,
    pub retry: RetryPolicy,
    /// Pause before the next candidate after a quota failure.
    pub quota_cooldown: Duration,
    /// Pause before the next candidate after any other failure.
    pub error_cooldown: Duration,
    /// Cap on one candidate, retries included, so a stalled model cannot
    /// use up the time meant for the others.
    pub candidate_timeout: Duration,
    pub aspect_ratio: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        ImageConfig {
            candidates: default_image_candidates(),
            retry: RetryPolicy::image_default(),
            quota_cooldown: Duration::from_secs(5),
            error_cooldown: Duration::from_secs(1),
            candidate_timeout: Duration::from_secs(30),
            aspect_ratio: "1:1".to_string(),
        }
    }
}

impl ImageConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_candidates(mut self, candidates: Vec<ModelCandidate>) -> Self {
        self.candidates = candidates;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cooldowns(mut self, quota: Duration, error: Duration) -> Self {
        self.quota_cooldown = quota;
        self.error_cooldown = error;
        self
    }

    pub fn with_candidate_timeout(mut self, timeout: Duration) -> Self {
        self.candidate_timeout = timeout;
        self
    }

    /// Longest time a full walk over every candidate can take.
    pub fn worst_case_duration(&self) -> Duration {
        let n = self.candidates.len() as u32;
        let cooldown = self.quota_cooldown.max(self.error_cooldown);
        self.candidate_timeout * n + cooldown * n.saturating_sub(1)
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Hard cap on one caption/script call, retries included.
    pub text_timeout: Duration,
    /// Hard cap on one image call, all candidates included. Should not be
    /// shorter than [`ImageConfig::worst_case_duration`].
    pub image_timeout: Duration,
    pub panel_cooldown: Duration,
    pub max_panels: usize,
    pub placeholder_base: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig {
            text_timeout: Duration::from_secs(60),
            image_timeout: Duration::from_secs(150),
            panel_cooldown: Duration::from_secs(4),
            max_panels: 6,
            placeholder_base: DEFAULT_PLACEHOLDER_BASE.to_string(),
        }
    }
}

impl OrchestratorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero cooldowns, short timeouts.
    pub fn fast() -> Self {
        OrchestratorConfig {
            text_timeout: Duration::from_secs(5),
            image_timeout: Duration::from_secs(5),
            panel_cooldown: Duration::ZERO,
            ..Self::default()
        }
    }

    pub fn with_timeouts(mut self, text: Duration, image: Duration) -> Self {
        self.text_timeout = text;
        self.image_timeout = image;
        self
    }

    pub fn with_panel_cooldown(mut self, cooldown: Duration) -> Self {
        self.panel_cooldown = cooldown;
        self
    }

    pub fn with_max_panels(mut self, max_panels: usize) -> Self {
        self.max_panels = max_panels;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub gemini: GeminiConfig,
    pub text: TextConfig,
    pub image: ImageConfig,
    pub orchestrator: OrchestratorConfig,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        let mut config = Config {
            gemini: GeminiConfig::from_env(),
            ..Default::default()
        };
        if let Ok(model) = env::var("MEMEGEN_TEXT_MODEL") {
            config.text.model = model;
        }
        if let Ok(language) = env::var("MEMEGEN_LANGUAGE") {
            config.text.display_language = language;
        }
        if let Some(secs) = env::var("MEMEGEN_PANEL_COOLDOWN_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.orchestrator.panel_cooldown = Duration::from_secs(secs);
        }
        config
    }

    pub fn with_gemini(mut self, gemini: GeminiConfig) -> Self {
        self.gemini = gemini;
        self
    }

    pub fn with_text(mut self, text: TextConfig) -> Self {
        self.text = text;
        self
    }

    pub fn with_image(mut self, image: ImageConfig) -> Self {
        self.image = image;
        self
    }

    pub fn with_orchestrator(mut self, orchestrator: OrchestratorConfig) -> Self {
        self.orchestrator = orchestrator;
        self
    }
}
