use thiserror::Error;

#[derive(Error, Debug)]
pub enum TwinError {
    /// Malformed rule, type or feature metadata. Fatal to that registration only.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown subject, instance, type or feature.
    #[error("Lookup error: {0}")]
    Lookup(String),

    /// Invalid rule construction (path, excludeOn selector, rules type, ...).
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Invalid index {0} given")]
    InvalidIndex(i64),

    #[error("Partial update error: {0}")]
    PartialUpdate(String),

    #[error("Feature dependency cycle detected: {0}")]
    DependencyCycle(String),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, TwinError>;
