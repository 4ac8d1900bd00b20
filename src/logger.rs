use chrono::{DateTime, Utc};
use colored::*;
use log::{Level, LevelFilter, Metadata, Record};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::future::Future;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

static LOGGER: Lazy<MemeLogger> = Lazy::new(MemeLogger::new);

tokio::task_local! {
    static GENERATION_ID: Uuid;
}

const CRATE_TARGET: &str = env!("CARGO_PKG_NAME");

pub fn init() -> Result<(), String> {
    init_with_config(LoggerConfig::default())
}

pub fn init_with_config(config: LoggerConfig) -> Result<(), String> {
    let max_level = config.min_level.to_level_filter();
    LOGGER.update_config(config)?;

    log::set_logger(&*LOGGER).map_err(|e| format!("Failed to set logger: {:?}", e))?;
    log::set_max_level(max_level);
    Ok(())
}

/// Runs `fut` with every log line it emits tagged with `id`.
pub async fn scoped<F: Future>(id: Uuid, fut: F) -> F::Output {
    GENERATION_ID.scope(id, fut).await
}

pub fn current_generation() -> Option<Uuid> {
    GENERATION_ID.try_with(|id| *id).ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn color(&self) -> Color {
        match self {
            LogLevel::Trace => Color::Cyan,
            LogLevel::Debug => Color::Blue,
            LogLevel::Info => Color::Green,
            LogLevel::Warn => Color::Yellow,
            LogLevel::Error => Color::Red,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }

    pub fn to_level(&self) -> Level {
        match self {
            LogLevel::Trace => Level::Trace,
            LogLevel::Debug => Level::Debug,
            LogLevel::Info => Level::Info,
            LogLevel::Warn => Level::Warn,
            LogLevel::Error => Level::Error,
        }
    }

    pub fn to_level_filter(&self) -> LevelFilter {
        self.to_level().to_level_filter()
    }

    pub fn from_level(level: Level) -> Self {
        match level {
            Level::Trace => LogLevel::Trace,
            Level::Debug => LogLevel::Debug,
            Level::Info => LogLevel::Info,
            Level::Warn => LogLevel::Warn,
            Level::Error => LogLevel::Error,
        }
    }
}

/// One formatted log record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub target: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_id: Option<Uuid>,
}

impl LogEntry {
    fn from_record(record: &Record) -> Self {
        Self {
            timestamp: Utc::now(),
            level: LogLevel::from_level(record.level()),
            target: record.target().to_string(),
            message: record.args().to_string(),
            location: record
                .file()
                .map(|file| format!("{}:{}", file, record.line().unwrap_or(0))),
            generation_id: current_generation(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub min_level: LogLevel,
    /// Threshold for records from other crates (reqwest, hyper).
    pub dependency_level: LogLevel,
    pub show_colors: bool,
    pub show_location: bool,
    pub timestamp_format: String,
    pub output_json: bool,
    pub log_file_path: Option<PathBuf>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Info,
            dependency_level: LogLevel::Warn,
            show_colors: true,
            show_location: false,
            timestamp_format: "%H:%M:%S%.3f".to_string(),
            output_json: false,
            log_file_path: None,
        }
    }
}

impl LoggerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    pub fn with_colors(mut self, enabled: bool) -> Self {
        self.show_colors = enabled;
        self
    }

    pub fn with_json_output(mut self, enabled: bool) -> Self {
        self.output_json = enabled;
        if enabled {
            self.show_colors = false;
        }
        self
    }

    pub fn with_file_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file_path = Some(path.into());
        self
    }

    pub fn production() -> Self {
        Self {
            min_level: LogLevel::Info,
            show_colors: false,
            output_json: true,
            ..Default::default()
        }
    }

    pub fn development() -> Self {
        Self {
            min_level: LogLevel::Debug,
            show_location: true,
            ..Default::default()
        }
    }

    fn allows(&self, level: Level, target: &str) -> bool {
        let threshold = if target.starts_with(CRATE_TARGET) {
            self.min_level
        } else {
            self.dependency_level.max(self.min_level)
        };
        level <= threshold.to_level()
    }
}

pub struct MemeLogger {
    config: Mutex<LoggerConfig>,
    log_file: Mutex<Option<File>>,
}

impl MemeLogger {
    fn new() -> Self {
        Self {
            config: Mutex::new(LoggerConfig::default()),
            log_file: Mutex::new(None),
        }
    }

    fn update_config(&self, new_config: LoggerConfig) -> Result<(), String> {
        let file = match &new_config.log_file_path {
            Some(path) => Some(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|e| format!("Failed to open log file {}: {}", path.display(), e))?,
            ),
            None => None,
        };
        *self.log_file.lock().map_err(|e| e.to_string())? = file;
        *self.config.lock().map_err(|e| e.to_string())? = new_config;
        Ok(())
    }

    fn write_to_file(&self, line: &str) {
        if let Ok(mut guard) = self.log_file.lock() {
            if let Some(file) = guard.as_mut() {
                let _ = writeln!(file, "{}", line);
            }
        }
    }
}

pub fn format_entry(entry: &LogEntry, config: &LoggerConfig) -> String {
    if config.output_json {
        return serde_json::to_string(entry).unwrap_or_else(|_| entry.message.clone());
    }

    let timestamp = entry.timestamp.format(&config.timestamp_format).to_string();
    let level = format!("{:5}", entry.level.as_str());
    let generation = entry
        .generation_id
        .map(|id| id.simple().to_string()[..8].to_string());

    let mut output = String::new();
    if config.show_colors {
        output.push_str(&format!(
            "{} {} ",
            timestamp.bright_black(),
            level.color(entry.level.color()).bold()
        ));
        if let Some(generation) = &generation {
            output.push_str(&format!("[{}] ", generation.bright_yellow()));
        }
        output.push_str(&entry.message);
    } else {
        output.push_str(&format!("{} {} ", timestamp, level));
        if let Some(generation) = &generation {
            output.push_str(&format!("[{}] ", generation));
        }
        output.push_str(&entry.message);
    }

    if config.show_location {
        if let Some(location) = &entry.location {
            if config.show_colors {
                output.push_str(&format!(" ({})", location.bright_black()));
            } else {
                output.push_str(&format!(" ({})", location));
            }
        }
    }
    output
}

impl log::Log for MemeLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        match self.config.lock() {
            Ok(config) => config.allows(metadata.level(), metadata.target()),
            Err(_) => true,
        }
    }

    fn log(&self, record: &Record) {
        let Ok(config) = self.config.lock() else {
            return;
        };
        if !config.allows(record.level(), record.target()) {
            return;
        }

        let entry = LogEntry::from_record(record);
        // Progress lines go to stderr so stdout stays clean for --json output.
        eprintln!("{}", format_entry(&entry, &config));

        if config.log_file_path.is_some() {
            let plain = LoggerConfig {
                show_colors: false,
                ..config.clone()
            };
            self.write_to_file(&format_entry(&entry, &plain));
        }
    }

    fn flush(&self) {
        let _ = io::stderr().flush();
        if let Ok(mut guard) = self.log_file.lock() {
            if let Some(file) = guard.as_mut() {
                let _ = file.flush();
            }
        }
    }
}

/// Logs the wall time of a scope when dropped.
pub struct Timer {
    start: Instant,
    name: String,
}

impl Timer {
    pub fn new(name: &str) -> Self {
        log::debug!("Starting timer: {}", name);
        Self {
            start: Instant::now(),
            name: name.to_string(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        log::info!(
            "Timer '{}' finished in {:.2}s",
            self.name,
            self.elapsed().as_secs_f64()
        );
    }
}

pub fn timer(name: &str) -> Timer {
    Timer::new(name)
}
