// 🚨 Error taxonomy
//
// Two families, matching how far a failure is allowed to travel:
// - CacheError: fatal. Aborts the entity class being read and halts the build.
// - IntegrityError: contained. The offending entity is skipped and reported.
//
// Resolution misses from the address lookup are not errors at all
// (see dar::DarEntry::NoMatch).

use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// FATAL ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum CacheError {
    /// Non-success status from the registry or the address lookup
    #[error("request to {url} failed with status {status}")]
    Transport { url: String, status: u16 },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response body did not have the expected shape
    #[error("could not decode response from {url}: {detail}")]
    Decode { url: String, detail: String },

    #[error("artifact store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("artifact {name} could not be (de)serialized: {source}")]
    Artifact {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    /// Dry run asked for an artifact that was never written
    #[error("no stored artifact named {0}; run a live build first")]
    MissingArtifact(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("could not determine the root organisation: {0}")]
    Organisation(String),
}

pub type Result<T> = std::result::Result<T, CacheError>;

// ============================================================================
// DATA-INTEGRITY ERRORS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityError {
    /// A required group has no value anywhere in the registration
    #[error("required group {group} is missing for the entire validity")]
    MissingGroup { group: String },

    /// The raw object could not be read as a registry object at all
    #[error("malformed registry object: {0}")]
    MalformedObject(String),

    #[error("invalid value in {group}: {detail}")]
    InvalidValue { group: String, detail: String },

    #[error("unknown address type {0}")]
    UnknownAddressType(String),

    /// Parent chain did not terminate within the unit count
    #[error("parent chain of unit {unit} exceeds {depth} steps, cycle suspected")]
    CyclicParent { unit: Uuid, depth: usize },
}

impl IntegrityError {
    pub fn missing(group: impl Into<String>) -> Self {
        IntegrityError::MissingGroup {
            group: group.into(),
        }
    }

    pub fn invalid(group: impl Into<String>, detail: impl Into<String>) -> Self {
        IntegrityError::InvalidValue {
            group: group.into(),
            detail: detail.into(),
        }
    }

    /// Short machine-friendly name, used when summarising issues
    pub fn kind(&self) -> &'static str {
        match self {
            IntegrityError::MissingGroup { .. } => "missing_group",
            IntegrityError::MalformedObject(_) => "malformed_object",
            IntegrityError::InvalidValue { .. } => "invalid_value",
            IntegrityError::UnknownAddressType(_) => "unknown_address_type",
            IntegrityError::CyclicParent { .. } => "cyclic_parent",
        }
    }
}
