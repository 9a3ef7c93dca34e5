use std::time::Duration;

use optrack_core::DEFAULT_KEEP_ALIVE_SECS;

use crate::error::RegistryError;

/// Configuration for an [`OperationManager`](crate::OperationManager).
///
/// Controls the reaper cadence and the keep-alive applied to new operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Interval between reaper passes in milliseconds.
    pub cleanup_interval_ms: u64,
    /// Keep-alive, in seconds, for operations created without one.
    pub default_keep_alive_secs: u64,
    /// Optional cap, in seconds, on the keep-alive a caller may request.
    /// `None` accepts any value.
    pub max_keep_alive_secs: Option<u64>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_ms: 60_000,
            default_keep_alive_secs: DEFAULT_KEEP_ALIVE_SECS,
            max_keep_alive_secs: None,
        }
    }
}

impl RegistryConfig {
    /// Reaper interval as a `Duration`.
    #[must_use]
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    /// Checks the configuration for values the manager cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidConfig`] for a zero cleanup interval
    /// or a default keep-alive above the configured cap.
    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.cleanup_interval_ms == 0 {
            return Err(RegistryError::InvalidConfig(
                "cleanup_interval_ms must be greater than zero".into(),
            ));
        }
        if let Some(max) = self.max_keep_alive_secs {
            if self.default_keep_alive_secs > max {
                return Err(RegistryError::InvalidConfig(format!(
                    "default_keep_alive_secs must not exceed {max}, got {}",
                    self.default_keep_alive_secs
                )));
            }
        }
        Ok(())
    }

    /// Resolves a caller-supplied keep-alive, falling back to the default.
    ///
    /// Zero is valid: the record becomes purgeable as soon as it resolves.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidKeepAlive`] only when a cap is
    /// configured and the value exceeds it.
    pub fn resolve_keep_alive(&self, requested: Option<u64>) -> Result<u64, RegistryError> {
        let keep_alive = requested.unwrap_or(self.default_keep_alive_secs);
        match self.max_keep_alive_secs {
            Some(max) if keep_alive > max => Err(RegistryError::InvalidKeepAlive {
                requested: keep_alive,
                max,
            }),
            _ => Ok(keep_alive),
        }
    }
}
