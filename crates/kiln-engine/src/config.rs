use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_QUEUE_BASE: &str = "https://queue.fal.run";
pub const DEFAULT_OUTPUT_DIR: &str = "generated_images";
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub queue_base: String,
    pub output_dir: PathBuf,
    pub archive_dir: PathBuf,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            queue_base: DEFAULT_QUEUE_BASE.to_string(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            archive_dir: PathBuf::from("."),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `FAL_QUEUE_BASE`, `KILN_OUTPUT_DIR`,
    /// `KILN_ARCHIVE_DIR`, `KILN_TIMEOUT_SECS` and `KILN_POLL_INTERVAL_MS`.
    /// Blank or unparsable values are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let value = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let mut config = Self::default();
        if let Some(base) = value("FAL_QUEUE_BASE") {
            config = config.with_queue_base(base);
        }
        if let Some(dir) = value("KILN_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(dir);
        }
        if let Some(dir) = value("KILN_ARCHIVE_DIR") {
            config.archive_dir = PathBuf::from(dir);
        }
        if let Some(secs) = value("KILN_TIMEOUT_SECS").and_then(|s| s.parse().ok()) {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = value("KILN_POLL_INTERVAL_MS").and_then(|s| s.parse().ok()) {
            config.poll_interval = Duration::from_millis(ms);
        }
        config
    }

    pub fn with_queue_base(mut self, base: impl Into<String>) -> Self {
        self.queue_base = base.into().trim().trim_end_matches('/').to_string();
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_archive_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.archive_dir = dir.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}
