//! Change events emitted for accepted writes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::key::CompositeKey;

/// Snapshot of one accepted write.
///
/// `value` is `None` when the write cleared the key. `version` is the store
/// version after the write; consecutive accepted writes have consecutive
/// versions.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent<N, C, V> {
    pub key: CompositeKey<N, C>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<V>,
    pub version: u64,
    pub changed_at: DateTime<Utc>,
}

impl<N, C, V> ChangeEvent<N, C, V> {
    /// Returns true if the write cleared the key.
    #[must_use]
    pub const fn is_clear(&self) -> bool {
        self.value.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_event_serializes_without_value() {
        let event: ChangeEvent<u64, String, u32> = ChangeEvent {
            key: CompositeKey::new(7, "chess".to_string()),
            value: None,
            version: 3,
            changed_at: Utc::now(),
        };
        assert!(event.is_clear());

        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("value").is_none());
        assert_eq!(json["key"]["namespace"], 7);
        assert_eq!(json["version"], 3);

        let back: ChangeEvent<u64, String, u32> = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
