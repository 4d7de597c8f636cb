//! Streaming cache configuration.

use serde::Deserialize;

use crate::error::{StreamingError, StreamingResult};

/// Configuration for the streaming cache and its worker.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Width of the prefetch border around every hard radius, in columns.
    pub soft_border: i32,
    /// How long the idle worker sleeps before rescanning (ms).
    /// Subscription changes wake it earlier.
    pub idle_backoff_ms: u64,
    /// Pause after a failed load or save before the next attempt (ms).
    pub failure_backoff_ms: u64,
    /// Save every resident region when the worker stops.
    pub flush_on_shutdown: bool,
    /// Capacity of the event channel. Events are dropped when it is full.
    pub event_capacity: usize,
    /// Name of the worker thread.
    pub worker_name: String,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            soft_border: 1,
            idle_backoff_ms: 50,
            failure_backoff_ms: 250,
            flush_on_shutdown: true,
            event_capacity: 1024,
            worker_name: "tessera-streaming".to_string(),
        }
    }
}

impl StreamingConfig {
    /// Production config: long idle sleeps, a deep event buffer.
    #[must_use]
    pub fn production() -> Self {
        Self {
            idle_backoff_ms: 100,
            failure_backoff_ms: 1000,
            event_capacity: 4096,
            ..Self::default()
        }
    }

    /// Test config: the worker reacts within a few milliseconds.
    #[must_use]
    pub fn test() -> Self {
        Self {
            idle_backoff_ms: 2,
            failure_backoff_ms: 5,
            event_capacity: 4096,
            worker_name: "tessera-streaming-test".to_string(),
            ..Self::default()
        }
    }

    /// Parses a TOML document. Missing keys take their default value.
    ///
    /// # Errors
    ///
    /// Returns [`StreamingError::InvalidConfig`] if the document does not
    /// parse or fails validation.
    pub fn from_toml_str(source: &str) -> StreamingResult<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| StreamingError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`StreamingError::InvalidConfig`] on a negative soft border
    /// or an empty worker name.
    pub fn validate(&self) -> StreamingResult<()> {
        if self.soft_border < 0 {
            return Err(StreamingError::InvalidConfig(format!(
                "soft_border must be >= 0, got {}",
                self.soft_border
            )));
        }
        if self.worker_name.is_empty() {
            return Err(StreamingError::InvalidConfig("worker_name is empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = StreamingConfig::from_toml_str("soft_border = 2\nflush_on_shutdown = false\n").unwrap();
        assert_eq!(config.soft_border, 2);
        assert!(!config.flush_on_shutdown);
        assert_eq!(config.idle_backoff_ms, StreamingConfig::default().idle_backoff_ms);
    }

    #[test]
    fn test_negative_border_rejected() {
        let result = StreamingConfig::from_toml_str("soft_border = -1");
        assert!(matches!(result, Err(StreamingError::InvalidConfig(_))));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(StreamingConfig::from_toml_str("soft_border = \"wide\"").is_err());
    }
}
