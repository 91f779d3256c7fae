use std::sync::Arc;
use std::time::Duration;

use formsync_core::{ClockSource, SystemClock};

/// Per-session engine configuration.
///
/// Controls autosave timing and the clock used for `savedAt` timestamps. The
/// identity of the execution context comes from the storage handle.
#[derive(Clone)]
pub struct EngineConfig {
    /// Quiet period before a change is written to storage, in milliseconds.
    /// Every further change restarts the period.
    pub autosave_debounce_ms: u64,
    /// Clock behind snapshot timestamps.
    pub clock: Arc<dyn ClockSource>,
}

impl EngineConfig {
    #[must_use]
    pub fn autosave_debounce(&self) -> Duration {
        Duration::from_millis(self.autosave_debounce_ms)
    }

    #[must_use]
    pub fn with_debounce_ms(mut self, millis: u64) -> Self {
        self.autosave_debounce_ms = millis;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn ClockSource>) -> Self {
        self.clock = clock;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            autosave_debounce_ms: 300,
            clock: Arc::new(SystemClock),
        }
    }
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("autosave_debounce_ms", &self.autosave_debounce_ms)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use formsync_core::ManualClock;

    use super::*;

    #[test]
    fn engine_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.autosave_debounce_ms, 300);
        assert_eq!(config.autosave_debounce(), Duration::from_millis(300));
        assert!(config.clock.now() > 0);
    }

    #[test]
    fn builders_override_fields() {
        let config = EngineConfig::default()
            .with_debounce_ms(50)
            .with_clock(Arc::new(ManualClock::new(42)));
        assert_eq!(config.autosave_debounce(), Duration::from_millis(50));
        assert_eq!(config.clock.now(), 42);
    }
}
