// SPM Plugin API
// Callback boundary between the rule engine and the wireless driver plugin

pub mod error;
pub mod metadata;
pub mod registry;

pub use error::{PluginCallback, PluginError, PluginResult};
pub use metadata::{RadioConfig, WifiMetadata, WlanParams};
pub use registry::{WifiPluginRegistry, WlanRuleQuery, WlanRuleValidator};

/// Plugin API version
pub const PLUGIN_API_VERSION: &str = "0.2.0";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_version() {
        assert_eq!(PLUGIN_API_VERSION, "0.2.0");
    }
}
