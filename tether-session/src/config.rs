//! Session configuration.

use crate::error::{SessionError, SessionResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Session manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Key namespace prefix
    pub prefix: String,
    /// Inactivity allowed before a new session expires
    pub max_inactive_interval: Duration,
    /// Tasks used to drain a key scan
    pub scan_parallelism: usize,
    /// Pause between background maintenance cycles
    pub maintenance_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            prefix: "TOMCAT_SESSION".to_string(),
            max_inactive_interval: Duration::from_secs(3600), // 1 hour
            scan_parallelism: 4,
            maintenance_interval: Duration::from_secs(60),
        }
    }
}

impl SessionConfig {
    /// Create a configuration with the given key prefix.
    ///
    /// # Examples
    ///
    /// ```
    /// use tether_session::SessionConfig;
    ///
    /// let config = SessionConfig::new("myapp:session");
    /// assert_eq!(config.prefix, "myapp:session");
    /// ```
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Default::default()
        }
    }

    /// Load overrides from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(prefix) = std::env::var("TETHER_SESSION_PREFIX") {
            config.prefix = prefix;
        }

        if let Ok(secs) = std::env::var("TETHER_SESSION_MAX_INACTIVE")
            && let Ok(secs) = secs.parse()
        {
            config.max_inactive_interval = Duration::from_secs(secs);
        }

        if let Ok(parallelism) = std::env::var("TETHER_SESSION_SCAN_PARALLELISM")
            && let Ok(parallelism) = parallelism.parse()
        {
            config.scan_parallelism = parallelism;
        }

        config
    }

    /// Set the key namespace prefix.
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }

    /// Set the default max inactive interval.
    pub fn with_max_inactive_interval(mut self, interval: Duration) -> Self {
        self.max_inactive_interval = interval;
        self
    }

    /// Set the scan parallelism.
    pub fn with_scan_parallelism(mut self, parallelism: usize) -> Self {
        self.scan_parallelism = parallelism;
        self
    }

    /// Set the maintenance interval.
    pub fn with_maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = interval;
        self
    }

    /// Max inactive interval in whole seconds, as stored in `TTL`.
    pub fn max_inactive_secs(&self) -> i32 {
        i32::try_from(self.max_inactive_interval.as_secs()).unwrap_or(i32::MAX)
    }

    /// Reject settings the manager cannot work with.
    pub fn validate(&self) -> SessionResult<()> {
        if self.prefix.is_empty() {
            return Err(SessionError::Config("key prefix must not be empty".to_string()));
        }
        if self.max_inactive_interval.as_secs() == 0 {
            return Err(SessionError::Config(
                "max inactive interval must be at least one second".to_string(),
            ));
        }
        if self.scan_parallelism == 0 {
            return Err(SessionError::Config(
                "scan parallelism must be at least 1".to_string(),
            ));
        }
        if self.maintenance_interval.is_zero() {
            return Err(SessionError::Config(
                "maintenance interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
