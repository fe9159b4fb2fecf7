use serde::Deserialize;

use logbuf_api::OverflowPolicy;

use crate::error::LogError;

/// Log buffer tuning, parsed from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct LogBufferConfig {
    /// Queue depth of listeners registered without an explicit size.
    #[serde(default = "default_listener_buffer")]
    pub listener_buffer: usize,

    /// Slow-consumer policy of listeners registered without an explicit one.
    #[serde(default = "default_listener_overflow")]
    pub listener_overflow: OverflowPolicy,

    /// Queue depth of the persistence watcher. The watcher always applies
    /// back-pressure, records are never dropped on the way to the sink.
    #[serde(default = "default_persist_buffer")]
    pub persist_buffer: usize,
}

fn default_listener_buffer() -> usize {
    1024
}
fn default_listener_overflow() -> OverflowPolicy {
    OverflowPolicy::Drop
}
fn default_persist_buffer() -> usize {
    4096
}

impl Default for LogBufferConfig {
    fn default() -> Self {
        Self {
            listener_buffer: default_listener_buffer(),
            listener_overflow: default_listener_overflow(),
            persist_buffer: default_persist_buffer(),
        }
    }
}

impl LogBufferConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, LogError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| LogError::Config(format!("{path}: {e}")))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self, LogError> {
        let config: Self = toml::from_str(toml_str).map_err(|e| LogError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), LogError> {
        if self.listener_buffer == 0 {
            return Err(LogError::Config("listener_buffer must be at least 1".into()));
        }
        if self.persist_buffer == 0 {
            return Err(LogError::Config("persist_buffer must be at least 1".into()));
        }
        Ok(())
    }
}
