//! Adapter capability tracking.

use std::collections::HashSet;

use serde_json::Value;

use crate::error::DapError;
use crate::json::JsonValueExt;

/// The capability set advertised by the adapter in its `initialize`
/// response. Fixed at handshake time and immutable afterwards.
///
/// A capability counts as advertised when its key is present in the
/// `capabilities` object; adapters assert support by setting the key, and
/// presence is the signal observed in the wild.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    advertised: HashSet<String>,
}

impl Capabilities {
    /// Extract the capability key set from an `initialize` response body.
    ///
    /// A missing body or missing `capabilities` object yields an empty set
    /// (an adapter that advertises nothing supports nothing optional).
    pub fn from_initialize_body(body: Option<&Value>) -> Self {
        let advertised = body
            .and_then(|body| body.member("capabilities"))
            .and_then(Value::as_object)
            .map(|caps| caps.keys().cloned().collect())
            .unwrap_or_default();
        Self { advertised }
    }

    /// Whether the adapter advertised `name`.
    pub fn supports(&self, name: &str) -> bool {
        self.advertised.contains(name)
    }

    /// Fail with [`DapError::UnsupportedFeature`] unless `name` was
    /// advertised.
    pub fn require(&self, name: &str) -> Result<(), DapError> {
        if self.supports(name) {
            Ok(())
        } else {
            Err(DapError::UnsupportedFeature(format!(
                "adapter does not support {name}"
            )))
        }
    }

    /// Number of advertised capabilities.
    pub fn len(&self) -> usize {
        self.advertised.len()
    }

    /// Whether the adapter advertised nothing.
    pub fn is_empty(&self) -> bool {
        self.advertised.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn capabilities_from_full_body() {
        let body = json!({
            "capabilities": {
                "supportsConfigurationDoneRequest": true,
                "supportsStepBack": true,
                "supportsSetVariable": false,
            }
        });
        let caps = Capabilities::from_initialize_body(Some(&body));
        assert_eq!(caps.len(), 3);
        assert!(caps.supports("supportsConfigurationDoneRequest"));
        assert!(caps.supports("supportsStepBack"));
        // Key presence is the signal, even with a false value.
        assert!(caps.supports("supportsSetVariable"));
        assert!(!caps.supports("supportsFunctionBreakpoints"));
    }

    #[test]
    fn capabilities_from_missing_body() {
        let caps = Capabilities::from_initialize_body(None);
        assert!(caps.is_empty());
        assert!(!caps.supports("supportsStepBack"));
    }

    #[test]
    fn capabilities_from_body_without_capabilities_object() {
        let body = json!({"something": "else"});
        let caps = Capabilities::from_initialize_body(Some(&body));
        assert!(caps.is_empty());
    }

    #[test]
    fn capabilities_from_non_object_capabilities() {
        let body = json!({"capabilities": [1, 2, 3]});
        let caps = Capabilities::from_initialize_body(Some(&body));
        assert!(caps.is_empty());
    }

    #[test]
    fn require_passes_for_advertised() {
        let body = json!({"capabilities": {"supportsSetExpression": true}});
        let caps = Capabilities::from_initialize_body(Some(&body));
        assert!(caps.require("supportsSetExpression").is_ok());
    }

    #[test]
    fn require_fails_for_missing() {
        let caps = Capabilities::default();
        let err = caps.require("supportsStepBack").unwrap_err();
        assert!(matches!(err, DapError::UnsupportedFeature(_)));
        assert!(err.to_string().contains("supportsStepBack"));
    }
}
