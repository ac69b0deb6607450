//! Call context for freshness-gated reads.
//!
//! A read issued by an unattended data-capture pipeline is flagged so that
//! stale data turns into a silent skip instead of a reportable error.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Attribute key the host runtime sets on reads coming from data capture.
pub const FROM_DATA_CAPTURE_KEY: &str = "fromDataManagement";

/// Context of a read or command-decision call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadContext {
    /// Call originates from a best-effort background capture pipeline
    pub background_capture: bool,
}

impl ReadContext {
    /// Context of a background capture pipeline.
    pub fn background_capture() -> Self {
        Self {
            background_capture: true,
        }
    }

    /// Build a context from a loosely typed "extra" attribute map.
    ///
    /// Only a literal `true` under [`FROM_DATA_CAPTURE_KEY`] marks the call
    /// as background capture.
    pub fn from_extra(extra: &Map<String, Value>) -> Self {
        Self {
            background_capture: extra.get(FROM_DATA_CAPTURE_KEY) == Some(&Value::Bool(true)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_extra() {
        let extra = json!({ "fromDataManagement": true });
        assert!(ReadContext::from_extra(extra.as_object().unwrap()).background_capture);

        let extra = json!({ "fromDataManagement": "true" });
        assert!(!ReadContext::from_extra(extra.as_object().unwrap()).background_capture);

        assert_eq!(ReadContext::from_extra(&Map::new()), ReadContext::default());
    }
}
