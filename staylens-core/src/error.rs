//! Error types for Staylens operations

use crate::{ItemKind, ListingId};
use thiserror::Error;

/// Persistence layer errors (ledger and insight cache store).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Connection failed: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Schema initialization failed: {reason}")]
    SchemaInitFailed { reason: String },

    #[error("Query {operation} failed: {reason}")]
    QueryFailed { operation: String, reason: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Corrupted insight record for listing {listing_id}: {reason}")]
    CorruptedRecord { listing_id: ListingId, reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Errors raised by the external analysis service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("No analysis provider configured")]
    ProviderNotConfigured,

    #[error("Request to {provider} failed: {message}")]
    ExternalService { provider: String, message: String },

    #[error("Request to {provider} failed with status {status}: {message}")]
    RequestFailed {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("Rate limited by {provider}, retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: u64,
    },

    #[error("Request to {provider} timed out after {timeout_ms}ms")]
    Timeout { provider: String, timeout_ms: u64 },

    #[error("Malformed response from {provider}: {reason}")]
    MalformedResponse { provider: String, reason: String },
}

impl AnalysisError {
    /// True for payloads that arrived but could not be parsed.
    pub fn is_malformed(&self) -> bool {
        matches!(self, AnalysisError::MalformedResponse { .. })
    }
}

/// Validation errors on items handed to the core.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{kind} {item_id} belongs to listing {found}, expected {expected}")]
    ListingMismatch {
        kind: ItemKind,
        item_id: String,
        expected: ListingId,
        found: ListingId,
    },

    #[error("{kind} without an identifier for listing {listing_id}")]
    EmptyItemId { kind: ItemKind, listing_id: ListingId },

    #[error("Unknown item kind: {value}")]
    UnknownItemKind { value: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Configuration errors. Fatal at start-up.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Provider not supported: {provider}")]
    ProviderNotSupported { provider: String },

    #[error("Persistence backend not supported: {backend}")]
    BackendNotSupported { backend: String },
}

/// Master error type for all Staylens errors.
#[derive(Debug, Clone, Error)]
pub enum StaylensError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl StaylensError {
    /// Persistence failures get exactly one retry; everything else is final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StaylensError::Storage(_))
    }
}

/// Result type alias for Staylens operations.
pub type StaylensResult<T> = Result<T, StaylensError>;

// =============================================================================
// TESTS
// =============================================================================
