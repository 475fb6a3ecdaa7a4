//! Error types for outline_core operations.

use crate::RecordId;
use thiserror::Error;

/// Core error type for outline_core operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The storage engine could not be opened (missing permissions, disk
    /// disabled, file held by another process).
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A single put or delete was rejected by the engine or by record validation.
    #[error("transaction failed on {table} {key}: {reason}")]
    TransactionFailure {
        /// Table the write targeted
        table: &'static str,
        /// Key of the rejected record
        key: RecordId,
        /// Why the write was rejected
        reason: String,
    },

    /// Some keys of a bulk write failed. Keys not listed here were written.
    #[error("{} of the keys in a bulk write failed", failures.len())]
    PartialBulkFailure {
        /// The per-key failures, in input order
        failures: Vec<KeyFailure>,
    },

    /// A context references a child thought that does not exist.
    #[error("context {context} references missing thought {child}")]
    IntegrityViolation {
        /// The context being traversed
        context: RecordId,
        /// The child key with no thought behind it
        child: RecordId,
    },

    /// A raw change event could not be interpreted.
    #[error("malformed change event: {0}")]
    MalformedChangeEvent(String),

    /// The database file was written by an incompatible schema version.
    #[error("schema version mismatch: found {found}, expected {expected}")]
    SchemaVersionMismatch {
        /// Version stored in the file
        found: u32,
        /// Version this build understands
        expected: u32,
    },

    /// Invalid hex string for RecordId parsing.
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    /// Serialization error while encoding a record.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error while decoding a record.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Configuration error (loading, parsing, invalid values).
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One failed key of a bulk write.
#[derive(Debug)]
pub struct KeyFailure {
    /// The key that was not written.
    pub key: RecordId,
    /// Why it failed.
    pub error: StoreError,
}

impl StoreError {
    /// Returns a user-friendly recovery suggestion for the error, if available.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            Self::StorageUnavailable(_) => Some(
                "Check that the store directory is writable and not opened by another process.",
            ),
            Self::SchemaVersionMismatch { .. } => {
                Some("The store was written by a different version. Run 'outline clear' to start fresh.")
            }
            Self::PartialBulkFailure { .. } => {
                Some("Keys not listed as failed were written; retry only the failed keys.")
            }
            Self::IntegrityViolation { .. } => {
                Some("Run 'outline rebuild' and re-import the affected context.")
            }
            Self::ConfigError(_) => Some("Fix or delete .outline/config.toml to use defaults."),
            _ => None,
        }
    }

    /// Returns the keys that failed, if this is a bulk failure.
    pub fn failed_keys(&self) -> Vec<RecordId> {
        match self {
            Self::PartialBulkFailure { failures } => failures.iter().map(|f| f.key).collect(),
            Self::TransactionFailure { key, .. } => vec![*key],
            _ => Vec::new(),
        }
    }
}

/// Convenience Result type for outline_core operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Maps any redb error into `StorageUnavailable` with a short description of
/// what was being attempted.
pub(crate) fn storage<E: std::fmt::Display>(what: &'static str) -> impl Fn(E) -> StoreError {
    move |e| StoreError::StorageUnavailable(format!("{}: {}", what, e))
}
