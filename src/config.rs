//! Store configuration.

use serde::{Deserialize, Serialize};

use crate::error::{StoreResult, ValidationError};

/// How listener notifications are scheduled relative to the write that
/// triggered them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Every accepted write fans out before `set` returns. A write made from
    /// inside a listener fans out nested, on the same stack.
    #[default]
    Immediate,
    /// A write accepted while a fan-out is already running is stored at once,
    /// but its notification is queued until the running fan-out completes.
    Deferred,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub dispatch: DispatchMode,
    /// Max live registrations before `subscribe` fails fast.
    pub max_listeners: usize,
    /// Default buffer capacity for change streams.
    pub stream_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dispatch: DispatchMode::Immediate,
            max_listeners: 4096,
            stream_capacity: 1024,
        }
    }
}

impl StoreConfig {
    /// Parses a configuration from JSON. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Config` on malformed JSON and
    /// `ValidationError::InvalidConfig` if the parsed values are unusable.
    pub fn from_json(json: &str) -> StoreResult<Self> {
        let cfg: Self = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Checks that the configuration can back a store.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` if `max_listeners` is zero.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_listeners == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "max_listeners must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Returns a copy using the given dispatch mode.
    #[must_use]
    pub fn with_dispatch(mut self, dispatch: DispatchMode) -> Self {
        self.dispatch = dispatch;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = StoreConfig::default();
        assert_eq!(cfg.dispatch, DispatchMode::Immediate);
        assert_eq!(cfg.max_listeners, 4096);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let cfg = StoreConfig::from_json(r#"{"dispatch":"deferred"}"#).unwrap();
        assert_eq!(cfg.dispatch, DispatchMode::Deferred);
        assert_eq!(cfg.stream_capacity, 1024);
    }

    #[test]
    fn test_from_json_rejects_zero_listeners() {
        let err = StoreConfig::from_json(r#"{"max_listeners":0}"#).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_from_json_rejects_malformed() {
        let err = StoreConfig::from_json("{").unwrap_err();
        assert!(err.is_config());
        let err = StoreConfig::from_json(r#"{"dispatch":"later"}"#).unwrap_err();
        assert!(err.is_config());
    }
}
