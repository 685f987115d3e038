//! Error types for the rule table and its administrative surface.
//!
//! Every mutation of the rule table reports either an [`UpdateOutcome`] or an
//! [`UpdateError`]. Both carry the numeric codes used by the management
//! interface, so a caller that only speaks codes can still interpret them.

use crate::types::ClassifierType;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using SpmError as the error type.
pub type Result<T> = std::result::Result<T, SpmError>;

/// Top-level error type for the policy engine.
#[derive(Debug, Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "details")]
pub enum SpmError {
    /// Rule table update failures
    #[error("Update error: {0}")]
    Update(#[from] UpdateError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Storage that could not be allocated during an insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocTarget {
    /// The rule node itself
    Node,
    /// The flow hash entry of an IFLI rule
    HashEntry,
}

/// Failures reported by rule table mutations and queries.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateError {
    /// The table already holds its configured maximum number of rules
    #[error("Rule table full ({capacity} rules)")]
    TableFull { capacity: usize },

    /// The rule failed validation
    #[error("Invalid rule entry: {reason}")]
    InvalidEntry { reason: String },

    /// Storage for the rule could not be reserved
    #[error("Allocation failure for {target:?}")]
    AllocationFailure { target: AllocTarget },

    /// The table holds no rules
    #[error("Rule table is empty")]
    TableEmpty,

    /// No rule with the given identity exists
    #[error("Rule {id:#x} of type {classifier} not found")]
    RuleNotFound { id: u32, classifier: ClassifierType },

    /// Another writer holds the table
    #[error("Concurrent write rejected")]
    ConcurrentWriteRejected,

    /// The administrative command code is not recognised
    #[error("Unknown command code {code}")]
    UnknownCommand { code: u8 },
}

impl UpdateError {
    /// Creates an invalid entry error.
    pub fn invalid_entry(reason: impl Into<String>) -> Self {
        Self::InvalidEntry {
            reason: reason.into(),
        }
    }

    /// Creates a not found error.
    pub fn not_found(id: u32, classifier: ClassifierType) -> Self {
        Self::RuleNotFound { id, classifier }
    }

    /// Numeric status code reported to management clients.
    pub fn code(&self) -> u8 {
        match self {
            UpdateError::TableFull { .. } => 0,
            UpdateError::TableEmpty => 1,
            UpdateError::AllocationFailure {
                target: AllocTarget::Node,
            } => 2,
            UpdateError::AllocationFailure {
                target: AllocTarget::HashEntry,
            } => 3,
            UpdateError::RuleNotFound { .. } => 4,
            UpdateError::UnknownCommand { .. } => 5,
            UpdateError::ConcurrentWriteRejected => 6,
            UpdateError::InvalidEntry { .. } => 7,
        }
    }
}

/// Successful result of a rule table command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UpdateOutcome<R> {
    /// A new rule was inserted; `key` is its flow hash key for IFLI rules
    Added { key: Option<u32> },
    /// An existing rule was removed
    Deleted,
    /// An existing rule was replaced in place
    Modified { key: Option<u32> },
    /// A query located the rule; reported with its own code so a reply can
    /// be told apart from a modify
    Found(Box<R>),
}

impl<R> UpdateOutcome<R> {
    /// Numeric status code reported to management clients.
    pub fn code(&self) -> u8 {
        match self {
            UpdateOutcome::Added { .. } => 10,
            UpdateOutcome::Deleted => 11,
            UpdateOutcome::Modified { .. } => 12,
            UpdateOutcome::Found(_) => 13,
        }
    }

    /// Returns the flow hash key, if the outcome carries one.
    pub fn key(&self) -> Option<u32> {
        match self {
            UpdateOutcome::Added { key } | UpdateOutcome::Modified { key } => *key,
            _ => None,
        }
    }
}

/// Errors related to configuration.
#[derive(Debug, Error, Serialize, Deserialize)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {reason}")]
    LoadFailed { path: String, reason: String },

    /// Invalid configuration format
    #[error("Invalid configuration format: {reason}")]
    InvalidFormat { reason: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    /// Configuration validation failed
    #[error("Configuration validation failed: {reason}")]
    ValidationFailed { reason: String },
}

impl ConfigError {
    /// Creates a file not found error.
    pub fn file_not_found(path: impl Into<String>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    /// Creates an invalid value error.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates a validation failed error.
    pub fn validation_failed(reason: impl Into<String>) -> Self {
        Self::ValidationFailed {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_error_codes() {
        assert_eq!(UpdateError::TableFull { capacity: 4 }.code(), 0);
        assert_eq!(UpdateError::TableEmpty.code(), 1);
        assert_eq!(
            UpdateError::AllocationFailure {
                target: AllocTarget::Node
            }
            .code(),
            2
        );
        assert_eq!(
            UpdateError::AllocationFailure {
                target: AllocTarget::HashEntry
            }
            .code(),
            3
        );
        assert_eq!(UpdateError::not_found(1, ClassifierType::Mesh).code(), 4);
        assert_eq!(UpdateError::UnknownCommand { code: 9 }.code(), 5);
        assert_eq!(UpdateError::ConcurrentWriteRejected.code(), 6);
        assert_eq!(UpdateError::invalid_entry("bad output").code(), 7);
    }

    #[test]
    fn test_outcome_codes() {
        let added: UpdateOutcome<()> = UpdateOutcome::Added { key: Some(3) };
        assert_eq!(added.code(), 10);
        assert_eq!(added.key(), Some(3));
        assert_eq!(UpdateOutcome::<()>::Deleted.code(), 11);
        assert_eq!(UpdateOutcome::<()>::Modified { key: None }.code(), 12);
        assert_eq!(UpdateOutcome::<()>::Deleted.key(), None);
        assert_eq!(UpdateOutcome::Found(Box::new(())).code(), 13);
    }

    #[test]
    fn test_not_found_display() {
        let err = UpdateError::not_found(0x2a, ClassifierType::Scs);
        let display = err.to_string();
        assert!(display.contains("0x2a"));
        assert!(display.contains("scs"));
    }

    #[test]
    fn test_error_serialization() {
        let err = SpmError::Update(UpdateError::TableFull { capacity: 1024 });
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("Update"));
        assert!(json.contains("1024"));
    }
}
