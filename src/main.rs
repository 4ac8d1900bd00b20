use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::Parser;
use futures::StreamExt;
use memegen::{
    history::DEFAULT_CAPACITY,
    logger::{self, LogLevel, LoggerConfig},
    models::parse_data_url,
    Config, FileBackend, GeminiClient, GenerationOutput, GenerationRequest, GenerationState,
    GenerationTopic, History, HistoryEntry, Orchestrator, Snapshot,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "memegen", version)]
#[command(about = "Turns a programmer pain point into a meme or a short comic strip")]
struct Cli {
    /// What hurts, e.g. "merge conflict on Friday"
    topic: String,

    /// Draw a comic with this many panels instead of a single meme
    #[arg(long, value_name = "PANELS")]
    comic: Option<usize>,

    /// Style appended to every visual prompt, e.g. "pixel art"
    #[arg(long)]
    style: Option<String>,

    /// Directory for generated images
    #[arg(long, default_value = "memes")]
    out: PathBuf,

    /// History file, most recent results first
    #[arg(long, default_value = "memegen-history.json")]
    history: PathBuf,

    /// Print the final snapshot as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let dotenv_loaded = dotenv::dotenv().is_ok();

    let logger_config = if cli.json_logs {
        LoggerConfig::production()
    } else {
        LoggerConfig::default()
    };
    let level = if cli.verbose { LogLevel::Debug } else { LogLevel::Info };
    logger::init_with_config(logger_config.with_level(level))?;
    if !dotenv_loaded {
        log::debug!("No .env file found, using process environment");
    }

    let topic = GenerationTopic::new(&cli.topic)?;
    let mut request = match cli.comic {
        Some(panels) => GenerationRequest::comic(topic.clone(), panels),
        None => GenerationRequest::single(topic.clone()),
    };
    if let Some(style) = &cli.style {
        request = request.with_style(style.as_str());
    }

    let config = Config::from_env();
    let client = match GeminiClient::new(&config) {
        Ok(client) => client,
        Err(e) => {
            log::error!("Failed to initialize API client: {}", e);
            return Err(e.into());
        }
    };
    let orchestrator = Arc::new(Orchestrator::new(client, config.orchestrator.clone()));

    let mut handle = orchestrator.start(request);
    let token = handle.cancellation_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, cancelling generation");
            token.cancel();
        }
    });

    let progress = handle.snapshots().map(|mut snapshots| {
        tokio::spawn(async move {
            while let Some(snapshot) = snapshots.next().await {
                report(&snapshot);
            }
        })
    });

    let last = handle.finish().await;
    interrupt.abort();
    if let Some(progress) = progress {
        let _ = progress.await;
    }

    if last.state == GenerationState::Completed {
        save_images(&cli.out, &last).await;
        record_history(&cli.history, topic.as_str(), &last).await;
    }
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&last)?);
    }

    Ok(match last.state {
        GenerationState::Completed => ExitCode::SUCCESS,
        GenerationState::Aborted => ExitCode::from(130),
        _ => {
            log::error!(
                "Generation failed: {}",
                last.message.as_deref().unwrap_or("unknown reason")
            );
            ExitCode::FAILURE
        }
    })
}

fn report(snapshot: &Snapshot) {
    if let Some(progress) = snapshot.progress {
        log::info!(
            "[{}/{}] {}",
            progress.current,
            progress.total,
            snapshot.message.as_deref().unwrap_or("panel ready")
        );
    } else if let Some(message) = &snapshot.message {
        log::info!("{}", message);
    }

    if snapshot.state == GenerationState::Completed {
        match &snapshot.output {
            GenerationOutput::Meme(meme) => {
                log::info!("Top: {}", meme.top_text);
                log::info!("Bottom: {}", meme.bottom_text);
            }
            GenerationOutput::Comic(script) => {
                for panel in &script.panels {
                    log::info!("Panel {}: {}", panel.panel_number, panel.caption);
                }
            }
            GenerationOutput::Pending => {}
        }
    }
}

async fn save_images(out: &Path, snapshot: &Snapshot) {
    let id = snapshot.generation_id.simple().to_string();
    let images: Vec<(String, &str)> = match &snapshot.output {
        GenerationOutput::Meme(meme) => meme
            .image_url
            .as_deref()
            .map(|url| vec![(id.clone(), url)])
            .unwrap_or_default(),
        GenerationOutput::Comic(script) => script
            .panels
            .iter()
            .filter_map(|panel| {
                panel
                    .image_url
                    .as_deref()
                    .map(|url| (format!("{}-panel-{}", id, panel.panel_number), url))
            })
            .collect(),
        GenerationOutput::Pending => Vec::new(),
    };

    for (stem, url) in images {
        match save_image(out, &stem, url).await {
            Ok(Some(path)) => log::info!("Saved {}", path.display()),
            Ok(None) => log::warn!("No image for {}, placeholder: {}", stem, url),
            Err(e) => log::error!("Could not save {}: {}", stem, e),
        }
    }
}

/// Decodes a data URL into `out/stem.ext`. Remote URLs are not fetched.
async fn save_image(out: &Path, stem: &str, url: &str) -> std::io::Result<Option<PathBuf>> {
    let Some(image) = parse_data_url(url) else {
        return Ok(None);
    };
    let bytes = STANDARD
        .decode(image.data.as_bytes())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    tokio::fs::create_dir_all(out).await?;
    let path = out.join(format!("{}.{}", stem, extension(&image.mime_type)));
    tokio::fs::write(&path, bytes).await?;
    Ok(Some(path))
}

fn extension(mime_type: &str) -> &'static str {
    match mime_type {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/png" => "png",
        _ => "bin",
    }
}

async fn record_history(path: &Path, topic: &str, snapshot: &Snapshot) {
    let Some(entry) = HistoryEntry::from_snapshot(topic, snapshot) else {
        return;
    };
    let result = async {
        let mut history = History::open(FileBackend::new(path), DEFAULT_CAPACITY).await?;
        history.add(entry).await
    }
    .await;
    match result {
        Ok(count) => log::debug!("History now holds {} entries", count),
        Err(e) => log::warn!("Could not update history at {}: {}", path.display(), e),
    }
}
