//! Transport tuning
//!
//! Every field has a default, so an empty `[transport]` table is valid.
//!
//! ```toml
//! [transport]
//! read_timeout_ms = 100
//! write_timeout_ms = 1000
//! join_timeout_ms = 5000
//!
//! [transport.queue]
//! capacity = 512
//! overflow = "drop_oldest"
//! ```

use crate::error::{Result, TransportError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Largest transfer timeout libusb can represent
pub const MAX_TRANSFER_TIMEOUT_MS: u64 = u32::MAX as u64;

/// What `send` does when a bounded outbound queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Wait for the send worker to make room
    Block,
    /// Evict the oldest queued frame
    DropOldest,
    /// Fail the send with `QueueFull`
    #[default]
    Reject,
}

/// Outbound queue configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Maximum queued frames; `None` means unbounded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<usize>,
    /// Policy applied when `capacity` is reached
    #[serde(default)]
    pub overflow: OverflowPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportSettings {
    /// Receive poll interval; bounds how long stop waits on a blocked read
    #[serde(default = "TransportSettings::default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Per-frame write timeout
    #[serde(default = "TransportSettings::default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    /// How long stop waits for each worker
    #[serde(default = "TransportSettings::default_join_timeout_ms")]
    pub join_timeout_ms: u64,
    #[serde(default)]
    pub queue: QueueSettings,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            read_timeout_ms: Self::default_read_timeout_ms(),
            write_timeout_ms: Self::default_write_timeout_ms(),
            join_timeout_ms: Self::default_join_timeout_ms(),
            queue: QueueSettings::default(),
        }
    }
}

impl TransportSettings {
    fn default_read_timeout_ms() -> u64 {
        100
    }

    fn default_write_timeout_ms() -> u64 {
        1000
    }

    fn default_join_timeout_ms() -> u64 {
        5000
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    /// Reject values the workers cannot run with
    pub fn validate(&self) -> Result<()> {
        // libusb takes a 32-bit millisecond timeout, where 0 means wait forever
        for (name, value) in [
            ("read_timeout_ms", self.read_timeout_ms),
            ("write_timeout_ms", self.write_timeout_ms),
        ] {
            if value == 0 || value > MAX_TRANSFER_TIMEOUT_MS {
                return Err(TransportError::InvalidConfig(format!(
                    "{} must be between 1 and {}",
                    name, MAX_TRANSFER_TIMEOUT_MS
                )));
            }
        }
        if self.join_timeout_ms == 0 {
            return Err(TransportError::InvalidConfig(
                "join_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.queue.capacity == Some(0) {
            return Err(TransportError::InvalidConfig(
                "queue capacity must be greater than 0 (omit it for an unbounded queue)"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = TransportSettings::default();
        assert_eq!(settings.read_timeout(), Duration::from_millis(100));
        assert_eq!(settings.write_timeout(), Duration::from_secs(1));
        assert_eq!(settings.join_timeout(), Duration::from_secs(5));
        assert_eq!(settings.queue.capacity, None);
        assert_eq!(settings.queue.overflow, OverflowPolicy::Reject);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_table() {
        let settings: TransportSettings = toml::from_str(
            r#"
read_timeout_ms = 50

[queue]
capacity = 16
overflow = "drop_oldest"
"#,
        )
        .unwrap();

        assert_eq!(settings.read_timeout_ms, 50);
        assert_eq!(settings.write_timeout_ms, 1000);
        assert_eq!(settings.queue.capacity, Some(16));
        assert_eq!(settings.queue.overflow, OverflowPolicy::DropOldest);
    }

    #[test]
    fn test_unknown_overflow_policy_rejected() {
        let result: std::result::Result<TransportSettings, _> = toml::from_str(
            r#"
[queue]
overflow = "drop_newest"
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut settings = TransportSettings::default();
        settings.read_timeout_ms = 0;
        assert!(matches!(
            settings.validate(),
            Err(TransportError::InvalidConfig(_))
        ));

        let mut settings = TransportSettings::default();
        settings.queue.capacity = Some(0);
        assert!(matches!(
            settings.validate(),
            Err(TransportError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validate_rejects_unrepresentable_timeouts() {
        let mut settings = TransportSettings::default();
        settings.read_timeout_ms = MAX_TRANSFER_TIMEOUT_MS;
        assert!(settings.validate().is_ok());

        settings.read_timeout_ms = MAX_TRANSFER_TIMEOUT_MS + 1;
        assert!(matches!(
            settings.validate(),
            Err(TransportError::InvalidConfig(_))
        ));

        let mut settings = TransportSettings::default();
        settings.write_timeout_ms = 1 << 32;
        assert!(settings.validate().is_err());
    }
}
