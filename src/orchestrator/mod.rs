//! Per-request generation state machine.
//!
//! One request runs as one sequential task: caption or script first, then
//! images one at a time. Progress is published as immutable [`Snapshot`]s.
//! Cancellation is checked before and after every remote call and during
//! cooldowns; once observed, nothing else is published and the run returns
//! an `Aborted` snapshot.

pub mod placeholder;


use crate::{
    config::OrchestratorConfig,
    gemini::{text_client, GeminiClient},
    logger,
    models::{
        ComicScript, GenerationKind, GenerationOutput, GenerationRequest, GenerationState,
        GenerationTopic, ImageGenerationResult, MemeCaption, Progress, Snapshot,
    },
    retry::sleep_or_cancel,
};
use chrono::Utc;
use placeholder::image_or_placeholder;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub struct Orchestrator {
    client: GeminiClient,
    config: OrchestratorConfig,
    current: Mutex<Option<CancellationToken>>,
}

impl Orchestrator {
    pub fn new(client: GeminiClient, config: OrchestratorConfig) -> Self {
        let worst_case = client.image().config().worst_case_duration();
        if worst_case > config.image_timeout {
            log::warn!(
                "Image candidates may need {:?} but image timeout is {:?}; later candidates can be cut off",
                worst_case,
                config.image_timeout
            );
        }
        Self {
            client,
            config,
            current: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Spawns a generation on the tokio runtime. A request that is still in
    /// flight is cancelled first.
    pub fn start(self: &Arc<Self>, request: GenerationRequest) -> GenerationHandle {
        let token = CancellationToken::new();
        let previous = self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(token.clone());
        if let Some(previous) = previous {
            if !previous.is_cancelled() {
                log::info!("Cancelling previous generation in favour of a new request");
                previous.cancel();
            }
        }

        let id = Uuid::new_v4();
        let kind = request.kind;
        let (sink, receiver) = mpsc::unbounded_channel();
        let (state, state_receiver) = watch::channel(GenerationState::Idle);
        let this = Arc::clone(self);
        let task_token = token.clone();
        let task = tokio::spawn(logger::scoped(id, async move {
            let publisher = Publisher::new(id, kind, sink, state);
            this.run_as(request, &task_token, publisher).await
        }));

        GenerationHandle {
            id,
            kind,
            token,
            snapshots: Some(UnboundedReceiverStream::new(receiver)),
            state: state_receiver,
            task,
        }
    }

    /// Runs one generation to a terminal state on the current task.
    pub async fn run(
        &self,
        request: GenerationRequest,
        token: &CancellationToken,
        sink: UnboundedSender<Snapshot>,
    ) -> Snapshot {
        let (state, _) = watch::channel(GenerationState::Idle);
        let publisher = Publisher::new(Uuid::new_v4(), request.kind, sink, state);
        self.run_as(request, token, publisher).await
    }

    async fn run_as(
        &self,
        request: GenerationRequest,
        token: &CancellationToken,
        mut publisher: Publisher,
    ) -> Snapshot {
        let id = publisher.id;
        log::info!(
            "Generation {} started: {} about \"{}\"",
            id,
            request.kind,
            request.topic
        );
        let _timer = logger::timer(&format!("generation {}", id));

        let snapshot = match request.kind {
            GenerationKind::Single => self.run_single(&request, token, &mut publisher).await,
            GenerationKind::Comic { panels } => {
                self.run_comic(&request, panels, token, &mut publisher).await
            }
        };

        match snapshot.state {
            GenerationState::Aborted => log::info!("Generation {} aborted", id),
            GenerationState::Failed => log::error!(
                "Generation {} failed: {}",
                id,
                snapshot.message.as_deref().unwrap_or("unknown reason")
            ),
            _ => log::info!("Generation {} completed", id),
        }
        snapshot
    }

    async fn run_single(
        &self,
        request: &GenerationRequest,
        token: &CancellationToken,
        publisher: &mut Publisher,
    ) -> Snapshot {
        publisher.publish(
            GenerationState::Running,
            None,
            GenerationOutput::Pending,
            Some("Writing captions"),
        );
        if token.is_cancelled() {
            return publisher.aborted(GenerationOutput::Pending);
        }

        let caption = self.caption(&request.topic, token).await;
        if token.is_cancelled() {
            return publisher.aborted(GenerationOutput::Pending);
        }

        let mut meme = caption.into_result(None);
        publisher.publish(
            GenerationState::Running,
            None,
            GenerationOutput::Meme(meme.clone()),
            Some("Drawing"),
        );

        let prompt = request.styled_prompt(&meme.visual_prompt);
        let image = self.image(&prompt, token).await;
        if token.is_cancelled() {
            return publisher.aborted(GenerationOutput::Meme(meme));
        }

        let message = image.error.clone().map(|e| format!("Image failed: {}", e));
        meme.image_url = Some(image_or_placeholder(&self.config.placeholder_base, &image));
        publisher.publish(
            GenerationState::Completed,
            None,
            GenerationOutput::Meme(meme),
            message.as_deref(),
        )
    }

    async fn run_comic(
        &self,
        request: &GenerationRequest,
        panel_count: usize,
        token: &CancellationToken,
        publisher: &mut Publisher,
    ) -> Snapshot {
        if panel_count == 0 || panel_count > self.config.max_panels {
            let reason = format!(
                "A comic needs between 1 and {} panels, got {}",
                self.config.max_panels, panel_count
            );
            return publisher.publish(
                GenerationState::Failed,
                None,
                GenerationOutput::Pending,
                Some(&reason),
            );
        }

        publisher.publish(
            GenerationState::Running,
            None,
            GenerationOutput::Pending,
            Some("Writing script"),
        );
        if token.is_cancelled() {
            return publisher.aborted(GenerationOutput::Pending);
        }

        let mut script = self.script(&request.topic, panel_count, token).await;
        if token.is_cancelled() {
            return publisher.aborted(GenerationOutput::Pending);
        }
        if script.panels.is_empty() {
            return publisher.publish(
                GenerationState::Failed,
                None,
                GenerationOutput::Pending,
                Some("Could not write a script, please try again"),
            );
        }

        let total = script.panels.len();
        publisher.publish(
            GenerationState::Running,
            Some(Progress { current: 0, total }),
            GenerationOutput::Comic(script.clone()),
            Some("Script ready, drawing panels"),
        );

        let mut failed = 0;
        for index in 0..total {
            if token.is_cancelled() {
                return publisher.aborted(GenerationOutput::Comic(script));
            }

            log::info!("Drawing panel {} of {}", index + 1, total);
            let prompt = request.styled_prompt(&script.panels[index].description);
            let image = self.image(&prompt, token).await;
            if token.is_cancelled() {
                return publisher.aborted(GenerationOutput::Comic(script));
            }

            if !image.is_success() {
                failed += 1;
            }
            script.fill_panel(index, image_or_placeholder(&self.config.placeholder_base, &image));

            if index + 1 < total {
                publisher.publish(
                    GenerationState::Running,
                    Some(Progress {
                        current: index + 1,
                        total,
                    }),
                    GenerationOutput::Comic(script.clone()),
                    None,
                );
                if sleep_or_cancel(token, self.config.panel_cooldown).await.is_err() {
                    return publisher.aborted(GenerationOutput::Comic(script));
                }
            }
        }

        let message = (failed > 0).then(|| format!("{} of {} panels failed", failed, total));
        publisher.publish(
            GenerationState::Completed,
            Some(Progress {
                current: total,
                total,
            }),
            GenerationOutput::Comic(script),
            message.as_deref(),
        )
    }

    async fn caption(&self, topic: &GenerationTopic, token: &CancellationToken) -> MemeCaption {
        let limit = self.config.text_timeout;
        match tokio::time::timeout(limit, self.client.text().generate_caption(topic, token)).await {
            Ok(caption) => caption,
            Err(_) => {
                log::warn!("Caption generation timed out after {:?}, using fallback", limit);
                text_client::fallback_caption()
            }
        }
    }

    async fn script(
        &self,
        topic: &GenerationTopic,
        panel_count: usize,
        token: &CancellationToken,
    ) -> ComicScript {
        let limit = self.config.text_timeout;
        let call = self.client.text().generate_script(topic, panel_count, token);
        match tokio::time::timeout(limit, call).await {
            Ok(script) => script,
            Err(_) => {
                log::warn!("Script generation timed out after {:?}, using fallback", limit);
                text_client::fallback_script(topic.as_str(), panel_count)
            }
        }
    }

    async fn image(&self, prompt: &str, token: &CancellationToken) -> ImageGenerationResult {
        let limit = self.config.image_timeout;
        match tokio::time::timeout(limit, self.client.image().generate_image(prompt, token)).await {
            Ok(result) => result,
            Err(_) => {
                log::warn!("Image generation timed out after {:?}", limit);
                ImageGenerationResult::failure(format!("timed out after {:?}", limit), false)
            }
        }
    }
}

/// Builds and sends numbered snapshots for one generation. Every snapshot
/// built, sent or not, also moves the watched state.
struct Publisher {
    id: Uuid,
    kind: GenerationKind,
    sequence: u32,
    sink: UnboundedSender<Snapshot>,
    state: watch::Sender<GenerationState>,
}

impl Publisher {
    fn new(
        id: Uuid,
        kind: GenerationKind,
        sink: UnboundedSender<Snapshot>,
        state: watch::Sender<GenerationState>,
    ) -> Self {
        Self {
            id,
            kind,
            sequence: 0,
            sink,
            state,
        }
    }

    fn build(
        &mut self,
        state: GenerationState,
        progress: Option<Progress>,
        output: GenerationOutput,
        message: Option<&str>,
    ) -> Snapshot {
        self.sequence += 1;
        self.state.send_replace(state);
        Snapshot {
            generation_id: self.id,
            sequence: self.sequence,
            timestamp: Utc::now(),
            kind: self.kind,
            state,
            progress,
            output,
            message: message.map(str::to_string),
        }
    }

    fn publish(
        &mut self,
        state: GenerationState,
        progress: Option<Progress>,
        output: GenerationOutput,
        message: Option<&str>,
    ) -> Snapshot {
        let snapshot = self.build(state, progress, output, message);
        if self.sink.send(snapshot.clone()).is_err() {
            log::debug!("Snapshot receiver for {} is gone", self.id);
        }
        snapshot
    }

    /// Terminal snapshot after cancellation. Returned, never sent.
    fn aborted(&mut self, output: GenerationOutput) -> Snapshot {
        let progress = match &output {
            GenerationOutput::Comic(script) => Some(Progress {
                current: script.rendered_panels(),
                total: script.panels.len(),
            }),
            _ => None,
        };
        self.build(GenerationState::Aborted, progress, output, Some("Cancelled"))
    }
}

/// Caller side of a running generation.
pub struct GenerationHandle {
    id: Uuid,
    kind: GenerationKind,
    token: CancellationToken,
    snapshots: Option<UnboundedReceiverStream<Snapshot>>,
    state: watch::Receiver<GenerationState>,
    task: JoinHandle<Snapshot>,
}

impl GenerationHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Takes the snapshot stream. Returns `None` on the second call.
    pub fn snapshots(&mut self) -> Option<UnboundedReceiverStream<Snapshot>> {
        self.snapshots.take()
    }

    /// `Idle` until the task publishes its first snapshot.
    pub fn state(&self) -> GenerationState {
        *self.state.borrow()
    }

    /// True once a terminal snapshot exists or the task has stopped.
    pub fn is_finished(&self) -> bool {
        self.state().is_terminal() || self.task.is_finished()
    }

    /// Waits for the final snapshot. A crashed task becomes a `Failed`
    /// snapshot instead of a panic in the caller.
    pub async fn finish(self) -> Snapshot {
        match self.task.await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                log::error!("Generation {} crashed: {}", self.id, e);
                Snapshot {
                    generation_id: self.id,
                    sequence: u32::MAX,
                    timestamp: Utc::now(),
                    kind: self.kind,
                    state: GenerationState::Failed,
                    progress: None,
                    output: GenerationOutput::Pending,
                    message: Some("Something went wrong, please try again".to_string()),
                }
            }
        }
    }
}
