use std::env;
use std::time::Duration;

use crate::errors::{Error, Result};

/// Engine tuning knobs.
#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {
    /// Number of dispatcher workers.
    pub workers: usize,
    /// How long an idle worker sleeps when no chat is eligible.
    pub idle_backoff: Duration,
    /// Poll interval of the emulator's run-and-wait helper.
    pub emulator_poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            idle_backoff: Duration::from_millis(100),
            emulator_poll_interval: Duration::from_millis(5),
        }
    }
}

impl EngineConfig {
    /// Load overrides from the environment (`CONFAB_WORKERS`,
    /// `CONFAB_IDLE_BACKOFF_MS`), falling back to defaults.
    pub fn load() -> Result<Self> {
        let mut cfg = Self::default();

        if let Some(raw) = env_str("CONFAB_WORKERS") {
            cfg.workers = raw
                .parse()
                .map_err(|_| Error::Config(format!("invalid CONFAB_WORKERS: {raw}")))?;
        }
        if let Some(raw) = env_str("CONFAB_IDLE_BACKOFF_MS") {
            let ms: u64 = raw
                .parse()
                .map_err(|_| Error::Config(format!("invalid CONFAB_IDLE_BACKOFF_MS: {raw}")))?;
            cfg.idle_backoff = Duration::from_millis(ms);
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Config("workers must be >= 1".to_string()));
        }
        Ok(())
    }
}

fn env_str(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = EngineConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.workers, 3);
        assert_eq!(cfg.idle_backoff, Duration::from_millis(100));
    }

    #[test]
    fn zero_workers_rejected() {
        let cfg = EngineConfig {
            workers: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }
}
