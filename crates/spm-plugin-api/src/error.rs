use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The two callback slots a wireless plugin can fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PluginCallback {
    /// Checks WLAN parameters when a rule is installed
    Validate,
    /// Checks WLAN parameters for a live flow during classification
    Query,
}

impl fmt::Display for PluginCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginCallback::Validate => write!(f, "validate"),
            PluginCallback::Query => write!(f, "query"),
        }
    }
}

/// Plugin system error types
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PluginError {
    #[error("A {callback} callback is already registered")]
    AlreadyRegistered { callback: PluginCallback },

    #[error("No {callback} callback registered")]
    NotRegistered { callback: PluginCallback },

    #[error("Invalid plugin metadata: {0}")]
    InvalidMetadata(String),
}

pub type PluginResult<T> = Result<T, PluginError>;
