use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub library: LibraryConfig,
    #[serde(default)]
    pub segmenting: SegmentingConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LibraryConfig {
    /// Directory scanned for source documents (.pdf, .epub).
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SegmentingConfig {
    /// Soft target length of one excerpt, in characters.
    #[serde(default = "default_target_chars")]
    pub target_chars: usize,
    /// Hard cap on excerpt length, in characters. Must leave headroom under
    /// the transport limit for the message header.
    #[serde(default = "default_hard_cap_chars")]
    pub hard_cap_chars: usize,
}

impl Default for SegmentingConfig {
    fn default() -> Self {
        Self {
            target_chars: default_target_chars(),
            hard_cap_chars: default_hard_cap_chars(),
        }
    }
}

fn default_target_chars() -> usize {
    800
}
fn default_hard_cap_chars() -> usize {
    3500
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProcessingConfig {
    /// Extraction + segmentation deadline per document.
    #[serde(default = "default_processing_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_processing_timeout(),
            max_file_size_mb: default_max_file_size_mb(),
        }
    }
}

fn default_processing_timeout() -> u64 {
    120
}
fn default_max_file_size_mb() -> u64 {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_secs: f64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            max_attempts: default_max_attempts(),
            initial_backoff_secs: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
        }
    }
}

fn default_poll_interval() -> u64 {
    60
}
fn default_max_attempts() -> u32 {
    5
}
fn default_initial_backoff() -> f64 {
    1.0
}
fn default_max_backoff() -> f64 {
    30.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotifierConfig {
    /// `console` (print deliveries to stdout) or `botapi` (HTTP bot API).
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub token: String,
    /// Transport's maximum message length, in characters.
    #[serde(default = "default_transport_max_chars")]
    pub transport_max_chars: usize,
    /// Characters reserved for the message header (title, author, position).
    #[serde(default = "default_header_reserve")]
    pub header_reserve: usize,
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            api_base: default_api_base(),
            token: String::new(),
            transport_max_chars: default_transport_max_chars(),
            header_reserve: default_header_reserve(),
            send_timeout_secs: default_send_timeout(),
        }
    }
}

fn default_provider() -> String {
    "console".to_string()
}
fn default_api_base() -> String {
    "https://api.telegram.org".to_string()
}
fn default_transport_max_chars() -> usize {
    4096
}
fn default_header_reserve() -> usize {
    200
}
fn default_send_timeout() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate segmenting
    if config.segmenting.target_chars == 0 {
        anyhow::bail!("segmenting.target_chars must be > 0");
    }
    if config.segmenting.hard_cap_chars <= config.segmenting.target_chars {
        anyhow::bail!("segmenting.hard_cap_chars must be greater than target_chars");
    }
    if config.segmenting.hard_cap_chars + config.notifier.header_reserve
        > config.notifier.transport_max_chars
    {
        anyhow::bail!(
            "segmenting.hard_cap_chars ({}) + notifier.header_reserve ({}) exceeds notifier.transport_max_chars ({})",
            config.segmenting.hard_cap_chars,
            config.notifier.header_reserve,
            config.notifier.transport_max_chars
        );
    }

    // Validate processing
    if config.processing.timeout_secs == 0 {
        anyhow::bail!("processing.timeout_secs must be > 0");
    }

    // Validate scheduler
    if config.scheduler.poll_interval_secs == 0 {
        anyhow::bail!("scheduler.poll_interval_secs must be > 0");
    }
    if config.scheduler.max_attempts == 0 {
        anyhow::bail!("scheduler.max_attempts must be >= 1");
    }
    if config.scheduler.initial_backoff_secs <= 0.0 {
        anyhow::bail!("scheduler.initial_backoff_secs must be > 0");
    }
    if config.scheduler.max_backoff_secs < config.scheduler.initial_backoff_secs {
        anyhow::bail!("scheduler.max_backoff_secs must be >= initial_backoff_secs");
    }

    // Validate notifier
    match config.notifier.provider.as_str() {
        "console" => {}
        "botapi" => {
            if config.notifier.token.is_empty() {
                anyhow::bail!("notifier.token must be set when provider is 'botapi'");
            }
        }
        other => anyhow::bail!(
            "Unknown notifier provider: '{}'. Must be console or botapi.",
            other
        ),
    }

    Ok(config)
}
