//! # SPM Core
//!
//! Shared types, error handling and configuration for the service
//! prioritization rule engine.
//!
//! - **Types**: classifier families, MAC addresses, radio descriptors and the
//!   output codes and sentinels used across the engine.
//! - **Errors**: `thiserror` based taxonomy with the numeric result codes
//!   reported to management clients.
//! - **Configuration**: YAML configuration with environment overrides and
//!   validation.
//!
//! ## Example
//!
//! ```
//! use spm_core::types::{ClassifierType, MacAddr};
//! use spm_core::error::UpdateError;
//!
//! let classifier: ClassifierType = "sawf_scs".parse().unwrap();
//! assert_eq!(classifier.code(), 5);
//!
//! let mac: MacAddr = "02:00:00:00:00:01".parse().unwrap();
//! assert!(!mac.is_zero());
//!
//! assert_eq!(UpdateError::TableEmpty.code(), 1);
//! ```

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types for convenience
pub use config::EngineConfig;
pub use error::{Result, SpmError, UpdateError, UpdateOutcome};
pub use types::{AeType, ClassifierType, MacAddr};
