use chrono::{DateTime, Utc};
use colored::*;
use log::{Level, LevelFilter, Metadata, Record};
use once_cell::sync::{Lazy, OnceCell};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

static SD_LOGGER: Lazy<SdLogger> = Lazy::new(SdLogger::new);
static INSTALLED: OnceCell<()> = OnceCell::new();

pub fn init() -> Result<(), String> {
    init_with_config(LoggerConfig::default())
}

/// Installs the process logger on first call; later calls only swap the config.
pub fn init_with_config(config: LoggerConfig) -> Result<(), String> {
    let max_level = config.effective_filter();
    SD_LOGGER.update_config(config)?;

    INSTALLED.get_or_try_init(|| {
        log::set_logger(&*SD_LOGGER).map_err(|e| format!("Failed to set logger: {:?}", e))
    })?;

    log::set_max_level(max_level);
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
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

    pub fn emoji(&self) -> &'static str {
        match self {
            LogLevel::Trace => "🔍",
            LogLevel::Debug => "🐛",
            LogLevel::Info => "💡",
            LogLevel::Warn => "⚠️",
            LogLevel::Error => "❌",
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

    pub fn to_level_filter(&self) -> LevelFilter {
        match self {
            LogLevel::Trace => LevelFilter::Trace,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Error => LevelFilter::Error,
        }
    }

    /// Accepts the usual level names in any case.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

impl From<Level> for LogLevel {
    fn from(level: Level) -> Self {
        match level {
            Level::Trace => LogLevel::Trace,
            Level::Debug => LogLevel::Debug,
            Level::Info => LogLevel::Info,
            Level::Warn => LogLevel::Warn,
            Level::Error => LogLevel::Error,
        }
    }
}

/// One record as written to the JSON sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub target: String,
    pub message: String,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub thread: String,
    /// Time since the logger was created.
    pub uptime_ms: u64,
}

impl LogEntry {
    fn from_record(record: &Record, started: Instant) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            level: record.level().into(),
            target: record.target().to_string(),
            message: record.args().to_string(),
            file: record.file().map(str::to_string),
            line: record.line(),
            thread: std::thread::current()
                .name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("{:?}", std::thread::current().id())),
            uptime_ms: started.elapsed().as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub min_level: LogLevel,
    pub show_colors: bool,
    pub show_emojis: bool,
    pub show_thread: bool,
    pub show_file_location: bool,
    pub show_target: bool,
    pub timestamp_format: Option<String>,
    pub output_json: bool,
    pub log_file_path: Option<PathBuf>,
    /// The file is rotated to `<path>.1` once it grows past this size.
    pub max_file_size_mb: u64,
    /// Targets capped at `Warn`, e.g. the HTTP stack which is chatty at debug level.
    pub quiet_targets: Vec<String>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Info,
            show_colors: true,
            show_emojis: true,
            show_thread: false,
            show_file_location: false,
            show_target: true,
            timestamp_format: Some("%Y-%m-%d %H:%M:%S%.3f".to_string()),
            output_json: false,
            log_file_path: None,
            max_file_size_mb: 50,
            quiet_targets: vec!["hyper".to_string(), "reqwest".to_string()],
        }
    }
}

impl LoggerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `SD_LOG_LEVEL`, `SD_LOG_FILE` and `SD_LOG_JSON` over the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(level) = env::var("SD_LOG_LEVEL").ok().and_then(|v| LogLevel::parse(&v)) {
            config.min_level = level;
        }
        if let Ok(path) = env::var("SD_LOG_FILE") {
            config.log_file_path = Some(PathBuf::from(path));
        }
        if let Ok(json) = env::var("SD_LOG_JSON") {
            config.output_json = json == "true" || json == "1";
        }
        config
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    pub fn with_colors(mut self, enabled: bool) -> Self {
        self.show_colors = enabled;
        self
    }

    pub fn with_file_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file_path = Some(path.into());
        self
    }

    pub fn with_json_output(mut self, enabled: bool) -> Self {
        self.output_json = enabled;
        self
    }

    pub fn with_quiet_target(mut self, target: impl Into<String>) -> Self {
        self.quiet_targets.push(target.into());
        self
    }

    pub fn production() -> Self {
        Self {
            min_level: LogLevel::Info,
            show_colors: false,
            show_emojis: false,
            output_json: true,
            log_file_path: Some(PathBuf::from("sdgen.log")),
            ..Default::default()
        }
    }

    pub fn development() -> Self {
        Self {
            min_level: LogLevel::Debug,
            show_file_location: true,
            ..Default::default()
        }
    }

    fn effective_filter(&self) -> LevelFilter {
        self.min_level.to_level_filter()
    }

    fn allows(&self, level: LogLevel, target: &str) -> bool {
        if level < self.min_level {
            return false;
        }
        let quiet = self
            .quiet_targets
            .iter()
            .any(|t| target == t || target.starts_with(&format!("{}::", t)));
        !quiet || level >= LogLevel::Warn
    }

    /// Single console line for `entry`.
    pub fn render(&self, entry: &LogEntry) -> String {
        let mut line = String::new();

        if let Some(format) = &self.timestamp_format {
            let stamp = entry.timestamp.format(format).to_string();
            line.push_str(&paint(&stamp, self.show_colors, |s| s.bright_black()));
            line.push(' ');
        }

        let level = if self.show_emojis {
            format!("{} {}", entry.level.emoji(), entry.level.as_str())
        } else {
            entry.level.as_str().to_string()
        };
        let level = if self.show_colors {
            level.color(entry.level.color()).bold().to_string()
        } else {
            level
        };
        line.push_str(&format!("[{}] ", level));

        if self.show_target {
            line.push_str(&paint(&entry.target, self.show_colors, |s| s.bright_blue()));
            line.push_str(": ");
        }
        line.push_str(&entry.message);

        if self.show_thread {
            line.push_str(&format!(" [thread:{}]", entry.thread));
        }
        if self.show_file_location {
            if let (Some(file), Some(no)) = (&entry.file, entry.line) {
                let location = format!("{}:{}", file, no);
                line.push_str(&format!(" ({})", paint(&location, self.show_colors, |s| s.bright_black())));
            }
        }
        line
    }
}

fn paint(text: &str, enabled: bool, style: impl Fn(&str) -> ColoredString) -> String {
    if enabled {
        style(text).to_string()
    } else {
        text.to_string()
    }
}

/// Append-only log file that rotates once it passes a size cap.
struct FileSink {
    path: PathBuf,
    max_bytes: u64,
    file: File,
    written: u64,
}

impl FileSink {
    fn open(path: PathBuf, max_file_size_mb: u64) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(Self {
            path,
            max_bytes: max_file_size_mb.saturating_mul(1024 * 1024),
            file,
            written,
        })
    }

    fn write_line(&mut self, line: &str) -> io::Result<()> {
        if self.max_bytes > 0 && self.written >= self.max_bytes {
            self.rotate()?;
        }
        self.file.write_all(line.as_bytes())?;
        self.file.write_all(b"\n")?;
        self.written += line.len() as u64 + 1;
        Ok(())
    }

    fn rotate(&mut self) -> io::Result<()> {
        let mut rotated = self.path.clone().into_os_string();
        rotated.push(".1");
        self.file.flush()?;
        fs::rename(&self.path, &rotated)?;
        self.file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

/// Process-wide `log` backend: colored console lines, optional JSON-lines file.
pub struct SdLogger {
    config: Mutex<LoggerConfig>,
    sink: Mutex<Option<FileSink>>,
    started: Instant,
}

impl SdLogger {
    fn new() -> Self {
        Self {
            config: Mutex::new(LoggerConfig::default()),
            sink: Mutex::new(None),
            started: Instant::now(),
        }
    }

    fn update_config(&self, config: LoggerConfig) -> Result<(), String> {
        let sink = match &config.log_file_path {
            Some(path) => Some(FileSink::open(path.clone(), config.max_file_size_mb).map_err(|e| {
                format!("Failed to open log file {}: {}", path.display(), e)
            })?),
            None => None,
        };

        if let Ok(mut current) = self.sink.lock() {
            *current = sink;
        }
        if let Ok(mut current) = self.config.lock() {
            *current = config;
        }
        Ok(())
    }
}

impl log::Log for SdLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        match self.config.lock() {
            Ok(config) => config.allows(metadata.level().into(), metadata.target()),
            Err(_) => true,
        }
    }

    fn log(&self, record: &Record) {
        let config = match self.config.lock() {
            Ok(config) => config.clone(),
            Err(_) => return,
        };
        if !config.allows(record.level().into(), record.target()) {
            return;
        }

        let entry = LogEntry::from_record(record, self.started);
        let json = serde_json::to_string(&entry).unwrap_or_default();

        if config.output_json {
            println!("{}", json);
        } else {
            println!("{}", config.render(&entry));
        }

        if let Ok(mut sink) = self.sink.lock() {
            if let Some(sink) = sink.as_mut() {
                let line = if config.output_json {
                    json
                } else {
                    config.clone().with_colors(false).render(&entry)
                };
                let _ = sink.write_line(&line);
            }
        }
    }

    fn flush(&self) {
        let _ = io::stdout().flush();
        if let Ok(mut sink) = self.sink.lock() {
            if let Some(sink) = sink.as_mut() {
                let _ = sink.file.flush();
            }
        }
    }
}

/// Logs how long a scope took when dropped.
pub struct Timer {
    start: Instant,
    name: String,
}

impl Timer {
    pub fn new(name: &str) -> Self {
        log::debug!("⏱️  Starting: {}", name);
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
            "⏱️  {} took {:.2}s",
            self.name,
            self.elapsed().as_secs_f64()
        );
    }
}

pub fn timer(name: &str) -> Timer {
    Timer::new(name)
}

pub fn log_startup_info(app_name: &str, version: &str) {
    log::info!("🚀 Starting {} v{}", app_name, version);
    log::info!("📝 Logger initialized");
}

pub fn log_config_info(config: &crate::config::Config) {
    let server = &config.server;
    log::info!("⚙️  Configuration loaded:");
    log::info!("   Server: {}", server.endpoints.server_url);
    log::info!(
        "   Auth: {}",
        if server.request.use_auth { "✅" } else { "❌" }
    );
    match server.timeout {
        Some(timeout) => log::info!("   Timeout: {:?}", timeout),
        None => log::info!("   Timeout: none"),
    }
    log::info!("   Progress poll interval: {:?}", server.poll_interval);
    log::info!(
        "   Defaults: {} steps, cfg {}, {}x{}, sampler '{}'",
        config.defaults.steps,
        config.defaults.cfg_scale,
        config.defaults.width,
        config.defaults.height,
        config.defaults.sampler
    );
    log::info!("   Output folder: {}", config.output_folder);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(level: LogLevel, target: &str, message: &str) -> LogEntry {
        LogEntry {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            level,
            target: target.to_string(),
            message: message.to_string(),
            file: Some("src/client/mod.rs".to_string()),
            line: Some(42),
            thread: "main".to_string(),
            uptime_ms: 0,
        }
    }

    #[test]
    fn test_log_levels() {
        assert_eq!(LogLevel::Info.as_str(), "INFO");
        assert_eq!(LogLevel::Error.emoji(), "❌");
        assert_eq!(LogLevel::Debug.color(), Color::Blue);
        assert_eq!(LogLevel::parse("WARNING"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("loud"), None);
        assert_eq!(LogLevel::from(Level::Trace), LogLevel::Trace);
    }

    #[test]
    fn test_logger_config_presets() {
        let dev = LoggerConfig::development();
        assert_eq!(dev.min_level, LogLevel::Debug);
        assert!(dev.show_colors);

        let prod = LoggerConfig::production();
        assert!(!prod.show_colors);
        assert!(prod.output_json);
        assert!(prod.log_file_path.is_some());
    }

    #[test]
    fn test_quiet_targets_only_pass_warnings() {
        let config = LoggerConfig::development();
        assert!(config.allows(LogLevel::Debug, "sdgen::client"));
        assert!(!config.allows(LogLevel::Debug, "hyper::proto::h1"));
        assert!(!config.allows(LogLevel::Info, "reqwest"));
        assert!(config.allows(LogLevel::Warn, "reqwest::connect"));
        assert!(config.allows(LogLevel::Debug, "hyperdrive"));
        assert!(!config.allows(LogLevel::Trace, "sdgen::client"));
    }

    #[test]
    fn test_render_plain() {
        let config = LoggerConfig {
            show_colors: false,
            show_emojis: false,
            timestamp_format: None,
            show_file_location: true,
            ..Default::default()
        };
        let line = config.render(&entry(LogLevel::Warn, "sdgen::client", "busy"));
        assert_eq!(line, "[WARN] sdgen::client: busy (src/client/mod.rs:42)");
    }

    #[test]
    fn test_entry_serializes_as_json_line() {
        let json = serde_json::to_string(&entry(LogLevel::Info, "sdgen", "hello")).unwrap();
        assert!(!json.contains('\n'));
        let back: LogEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back.level, LogLevel::Info);
        assert_eq!(back.message, "hello");
    }

    #[test]
    fn test_init_is_idempotent() {
        assert!(init_with_config(LoggerConfig::development()).is_ok());
        assert!(init_with_config(LoggerConfig::development().with_level(LogLevel::Warn)).is_ok());
        assert!(init().is_ok());
    }
}
