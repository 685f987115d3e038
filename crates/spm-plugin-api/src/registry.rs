//! Registration slots for the wireless plugin callbacks.

use parking_lot::RwLock;
use std::sync::Arc;

use crate::error::{PluginCallback, PluginError, PluginResult};
use crate::metadata::WifiMetadata;

/// Install-time check of a rule's WLAN parameters.
pub trait WlanRuleValidator: Send + Sync {
    fn validate(&self, metadata: &WifiMetadata) -> bool;
}

/// Classification-time check of a WLAN rule against a live flow.
pub trait WlanRuleQuery: Send + Sync {
    fn query(&self, metadata: &WifiMetadata) -> bool;
}

impl<F> WlanRuleValidator for F
where
    F: Fn(&WifiMetadata) -> bool + Send + Sync,
{
    fn validate(&self, metadata: &WifiMetadata) -> bool {
        self(metadata)
    }
}

impl<F> WlanRuleQuery for F
where
    F: Fn(&WifiMetadata) -> bool + Send + Sync,
{
    fn query(&self, metadata: &WifiMetadata) -> bool {
        self(metadata)
    }
}

/// Holds at most one validator and one query callback.
///
/// Reads take a shared lock for the duration of the callback; callbacks
/// must not re-register themselves.
#[derive(Default)]
pub struct WifiPluginRegistry {
    validator: RwLock<Option<Arc<dyn WlanRuleValidator>>>,
    query: RwLock<Option<Arc<dyn WlanRuleQuery>>>,
}

impl WifiPluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the validate callback.
    ///
    /// Fails with `AlreadyRegistered` if the slot is occupied.
    pub fn register_validator(&self, validator: Arc<dyn WlanRuleValidator>) -> PluginResult<()> {
        let mut slot = self.validator.write();
        if slot.is_some() {
            tracing::warn!("Rejected second WLAN validate callback");
            return Err(PluginError::AlreadyRegistered {
                callback: PluginCallback::Validate,
            });
        }

        *slot = Some(validator);
        tracing::info!("Registered WLAN validate callback");
        Ok(())
    }

    /// Empties the validate slot.
    pub fn unregister_validator(&self) {
        if self.validator.write().take().is_some() {
            tracing::info!("Unregistered WLAN validate callback");
        }
    }

    /// Installs the query callback.
    ///
    /// Fails with `AlreadyRegistered` if the slot is occupied.
    pub fn register_query(&self, query: Arc<dyn WlanRuleQuery>) -> PluginResult<()> {
        let mut slot = self.query.write();
        if slot.is_some() {
            tracing::warn!("Rejected second WLAN query callback");
            return Err(PluginError::AlreadyRegistered {
                callback: PluginCallback::Query,
            });
        }

        *slot = Some(query);
        tracing::info!("Registered WLAN query callback");
        Ok(())
    }

    /// Empties the query slot.
    pub fn unregister_query(&self) {
        if self.query.write().take().is_some() {
            tracing::info!("Unregistered WLAN query callback");
        }
    }

    pub fn has_validator(&self) -> bool {
        self.validator.read().is_some()
    }

    pub fn has_query(&self) -> bool {
        self.query.read().is_some()
    }

    /// Runs the validate callback.
    ///
    /// Returns `NotRegistered` when the slot is empty.
    pub fn validate(&self, metadata: &WifiMetadata) -> PluginResult<bool> {
        let slot = self.validator.read();
        let validator = slot.as_ref().ok_or(PluginError::NotRegistered {
            callback: PluginCallback::Validate,
        })?;
        Ok(validator.validate(metadata))
    }

    /// Runs the query callback, `None` when the slot is empty.
    pub fn query(&self, metadata: &WifiMetadata) -> Option<bool> {
        self.query.read().as_ref().map(|q| q.query(metadata))
    }
}

impl std::fmt::Debug for WifiPluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WifiPluginRegistry")
            .field("validator", &self.has_validator())
            .field("query", &self.has_query())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::WlanParams;

    #[test]
    fn test_empty_registry() {
        let registry = WifiPluginRegistry::new();
        let meta = WifiMetadata::default();

        assert!(!registry.has_validator());
        assert!(!registry.has_query());
        assert_eq!(
            registry.validate(&meta),
            Err(PluginError::NotRegistered {
                callback: PluginCallback::Validate
            })
        );
        assert_eq!(registry.query(&meta), None);
    }

    #[test]
    fn test_single_slot_per_callback() {
        let registry = WifiPluginRegistry::new();
        let accept_all = |_: &WifiMetadata| true;

        registry.register_validator(Arc::new(accept_all)).unwrap();
        assert_eq!(
            registry.register_validator(Arc::new(accept_all)),
            Err(PluginError::AlreadyRegistered {
                callback: PluginCallback::Validate
            })
        );

        registry.register_query(Arc::new(accept_all)).unwrap();
        assert!(registry.register_query(Arc::new(accept_all)).is_err());

        registry.unregister_validator();
        registry.unregister_query();
        assert!(registry.register_validator(Arc::new(accept_all)).is_ok());
        assert!(registry.register_query(Arc::new(accept_all)).is_ok());
    }

    #[test]
    fn test_callbacks_see_metadata() {
        let registry = WifiPluginRegistry::new();
        registry
            .register_validator(Arc::new(|m: &WifiMetadata| m.params.ssid == "home"))
            .unwrap();
        registry
            .register_query(Arc::new(|m: &WifiMetadata| m.pcp == Some(6)))
            .unwrap();

        let mut params = WlanParams {
            ssid: "home".to_string(),
            ..Default::default()
        };
        assert_eq!(registry.validate(&WifiMetadata::for_rule(&params)), Ok(true));
        params.ssid = "guest".to_string();
        assert_eq!(registry.validate(&WifiMetadata::for_rule(&params)), Ok(false));

        let tagged = WifiMetadata {
            pcp: Some(6),
            ..Default::default()
        };
        assert_eq!(registry.query(&tagged), Some(true));
        assert_eq!(registry.query(&WifiMetadata::default()), Some(false));
    }
}
