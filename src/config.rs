// MIT License - Copyright (c) 2026 Peter Wright
// Panel connection and polling configuration

use std::time::Duration;

use crate::error::{ParadoxError, Result};
use crate::store::Container;

/// Upper bounds on how many objects of each kind the inventory loads.
///
/// `None` loads everything the panel's memory map describes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InventoryLimits {
    pub partitions: Option<u32>,
    pub zones: Option<u32>,
    pub pgms: Option<u32>,
    pub users: Option<u32>,
    pub doors: Option<u32>,
    pub modules: Option<u32>,
}

impl InventoryLimits {
    pub fn get(&self, container: Container) -> Option<u32> {
        match container {
            Container::Partition => self.partitions,
            Container::Zone => self.zones,
            Container::Pgm => self.pgms,
            Container::User => self.users,
            Container::Door => self.doors,
            Container::Module => self.modules,
            Container::System => None,
        }
    }

    /// `available` cut to the configured limit.
    pub fn cap(&self, container: Container, available: u32) -> u32 {
        self.get(container).map_or(available, |limit| limit.min(available))
    }
}

/// Configuration for connecting to a Paradox panel.
#[derive(Debug, Clone)]
pub struct PanelConfig {
    /// Serial-over-IP bridge host
    pub host: String,
    /// Serial-over-IP bridge port
    pub port: u16,
    /// PC password programmed in the panel (default: 0000)
    pub pc_password: String,
    /// Optional user code, logs in as that user
    pub user_code: Option<String>,
    /// Label charmap language
    pub language: String,
    /// Interval between RAM status polls (default: 5s)
    pub poll_interval: Duration,
    /// How long an action waits for its response (default: 2s)
    pub action_timeout: Duration,
    /// How long a memory read or login step waits (default: 1s)
    pub io_timeout: Duration,
    /// First reconnect delay, doubled per failure (default: 1s)
    pub reconnect_base: Duration,
    /// Largest reconnect delay (default: 60s)
    pub reconnect_max: Duration,
    /// Frames queued before transport reads pause (default: 128)
    pub queue_high_water: usize,
    /// Consecutive failed polls before the session is dropped (default: 3)
    pub max_poll_failures: u32,
    /// Set the panel clock after login
    pub sync_time: bool,
    pub limits: InventoryLimits,
    /// Capacity of the broadcast channel carrying `PanelEvent`s
    pub event_capacity: usize,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 10000,
            pc_password: "0000".to_string(),
            user_code: None,
            language: "en".to_string(),
            poll_interval: Duration::from_secs(5),
            action_timeout: Duration::from_secs(2),
            io_timeout: Duration::from_secs(1),
            reconnect_base: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(60),
            queue_high_water: 128,
            max_poll_failures: 3,
            sync_time: false,
            limits: InventoryLimits::default(),
            event_capacity: 256,
        }
    }
}

impl PanelConfig {
    /// Create a new config builder starting from defaults.
    pub fn builder() -> PanelConfigBuilder {
        PanelConfigBuilder::default()
    }

    /// Reject settings the session cannot run with.
    pub fn validate(&self) -> Result<()> {
        let digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
        if !digits(&self.pc_password) || !matches!(self.pc_password.len(), 0 | 4 | 6) {
            return Err(ParadoxError::Config(
                "pc_password must be empty or 4 or 6 digits".to_string(),
            ));
        }
        if let Some(code) = &self.user_code {
            if code.is_empty() || !digits(code) || code.len() > 8 {
                return Err(ParadoxError::Config("user_code must be 1 to 8 digits".to_string()));
            }
        }
        if self.poll_interval.is_zero() {
            return Err(ParadoxError::Config("poll_interval must be positive".to_string()));
        }
        if self.reconnect_base > self.reconnect_max {
            return Err(ParadoxError::Config(
                "reconnect_base must not exceed reconnect_max".to_string(),
            ));
        }
        Ok(())
    }

    /// Delay before reconnect attempt `attempt` (0-based).
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.reconnect_base.saturating_mul(factor).min(self.reconnect_max)
    }
}

/// Builder for PanelConfig.
#[derive(Debug, Clone, Default)]
pub struct PanelConfigBuilder {
    config: PanelConfig,
}

impl PanelConfigBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn pc_password(mut self, password: impl Into<String>) -> Self {
        self.config.pc_password = password.into();
        self
    }

    pub fn user_code(mut self, code: impl Into<String>) -> Self {
        self.config.user_code = Some(code.into());
        self
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.config.language = language.into();
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn action_timeout(mut self, timeout: Duration) -> Self {
        self.config.action_timeout = timeout;
        self
    }

    pub fn io_timeout(mut self, timeout: Duration) -> Self {
        self.config.io_timeout = timeout;
        self
    }

    pub fn reconnect_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.config.reconnect_base = base;
        self.config.reconnect_max = max;
        self
    }

    pub fn queue_high_water(mut self, frames: usize) -> Self {
        self.config.queue_high_water = frames;
        self
    }

    pub fn max_poll_failures(mut self, failures: u32) -> Self {
        self.config.max_poll_failures = failures;
        self
    }

    pub fn sync_time(mut self, sync: bool) -> Self {
        self.config.sync_time = sync;
        self
    }

    pub fn limits(mut self, limits: InventoryLimits) -> Self {
        self.config.limits = limits;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    pub fn build(self) -> PanelConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PanelConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.action_timeout, Duration::from_secs(2));
        assert_eq!(config.queue_high_water, 128);
        assert_eq!(config.max_poll_failures, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = PanelConfig::builder()
            .host("10.0.0.1")
            .port(23)
            .pc_password("1234")
            .user_code("5678")
            .language("de")
            .build();

        assert_eq!(config.host, "10.0.0.1");
        assert_eq!(config.port, 23);
        assert_eq!(config.user_code.as_deref(), Some("5678"));
        assert_eq!(config.language, "de");
    }

    #[test]
    fn test_validate_rejects_bad_passwords() {
        assert!(PanelConfig::builder().pc_password("12ab").build().validate().is_err());
        assert!(PanelConfig::builder().pc_password("123").build().validate().is_err());
        assert!(PanelConfig::builder().user_code("").build().validate().is_err());
        assert!(PanelConfig::builder().pc_password("").build().validate().is_ok());
    }

    #[test]
    fn test_reconnect_delay_doubles_up_to_cap() {
        let config = PanelConfig::default();
        assert_eq!(config.reconnect_delay(0), Duration::from_secs(1));
        assert_eq!(config.reconnect_delay(3), Duration::from_secs(8));
        assert_eq!(config.reconnect_delay(6), Duration::from_secs(60));
        assert_eq!(config.reconnect_delay(40), Duration::from_secs(60));
    }

    #[test]
    fn test_inventory_limits_cap() {
        let limits = InventoryLimits {
            zones: Some(10),
            ..Default::default()
        };
        assert_eq!(limits.cap(Container::Zone, 192), 10);
        assert_eq!(limits.cap(Container::Zone, 8), 8);
        assert_eq!(limits.cap(Container::User, 999), 999);
    }
}
