use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Size of the first output chunk of the command stream.
    pub min_chunk_size: usize,
    /// Cap on live output chunk bytes. Unbounded when absent.
    pub max_stream_size: Option<usize>,
    /// The reply buffer never shrinks below this.
    pub reply_min_size: usize,
    /// How long a call waits for its reply. Forever when absent.
    pub wait_timeout_ms: Option<u64>,
    pub log_level: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            min_chunk_size: 16 * 1024,
            max_stream_size: None,
            reply_min_size: 1024 * 1024,
            wait_timeout_ms: None,
            log_level: "info".to_owned(),
        }
    }
}

impl SessionConfig {
    pub fn new(config: Option<&str>) -> anyhow::Result<Self> {
        let config: SessionConfig = toml::from_str(config.unwrap_or(""))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::new(Some(&content))
    }

    /// Reject values a session cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.min_chunk_size > 0, "min_chunk_size must be non-zero");
        anyhow::ensure!(self.reply_min_size > 0, "reply_min_size must be non-zero");
        if let Some(max) = self.max_stream_size {
            anyhow::ensure!(max > 0, "max_stream_size must be non-zero");
        }
        Ok(())
    }

    /// Install the global subscriber at the configured `log_level`.
    pub fn init_log(&self, ansi: bool) -> anyhow::Result<()> {
        crate::logging::init_log(&self.log_level, ansi)
    }
}
