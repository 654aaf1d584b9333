//! Registry errors

use thiserror::Error;

/// Confluent-compatible error codes
pub mod error_codes {
    // Authentication
    pub const UNAUTHENTICATED: u32 = 40101;

    // Subject/schema not found
    pub const SUBJECT_NOT_FOUND: u32 = 40401;
    pub const VERSION_NOT_FOUND: u32 = 40402;
    pub const SCHEMA_NOT_FOUND: u32 = 40403;

    // Invalid schema/compatibility
    pub const INVALID_SCHEMA: u32 = 42201;
    pub const INVALID_VERSION: u32 = 42202;
    pub const INVALID_COMPATIBILITY_LEVEL: u32 = 42203;
    pub const INCOMPATIBLE_SCHEMA: u32 = 409;

    // Cluster errors
    pub const NO_PRIMARY: u32 = 50301;
    pub const NODE_DEGRADED: u32 = 50302;

    // Internal errors
    pub const INTERNAL_ERROR: u32 = 50001;
    pub const STORAGE_ERROR: u32 = 50002;
}

/// Registry error types.
///
/// `NotFound`, `SubjectNotFound` and `VersionNotFound` are deliberately the
/// same values for "resource absent" and "read denied": a caller without
/// Read on a resource learns nothing about whether it exists. Only
/// `Unauthenticated` (no verified principal at all) is reported distinctly.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Authentication required")]
    Unauthenticated,

    #[error("Schema not found")]
    NotFound,

    #[error("Subject '{0}' not found")]
    SubjectNotFound(String),

    #[error("Version {version} not found for subject '{subject}'")]
    VersionNotFound { subject: String, version: u32 },

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Incompatible schema: {0}")]
    IncompatibleSchema(String),

    #[error("No primary available for write forwarding")]
    NoPrimaryAvailable,

    /// A failure relayed verbatim from the primary. Code, status and
    /// message pass through unchanged so forwarding stays transparent to
    /// the caller.
    #[error("{message}")]
    Forwarded {
        error_code: u32,
        http_status: u16,
        message: String,
    },

    #[error("Replication record out of order: expected sequence {expected}, got {got}")]
    OutOfOrderReplication { expected: u64, got: u64 },

    #[error("Node projection is degraded and refuses to serve reads")]
    Degraded,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RegistryError {
    /// Get the Confluent-compatible error code
    pub fn error_code(&self) -> u32 {
        match self {
            RegistryError::Unauthenticated => error_codes::UNAUTHENTICATED,
            RegistryError::NotFound => error_codes::SCHEMA_NOT_FOUND,
            RegistryError::SubjectNotFound(_) => error_codes::SUBJECT_NOT_FOUND,
            RegistryError::VersionNotFound { .. } => error_codes::VERSION_NOT_FOUND,
            RegistryError::InvalidSchema(_) => error_codes::INVALID_SCHEMA,
            RegistryError::IncompatibleSchema(_) => error_codes::INCOMPATIBLE_SCHEMA,
            RegistryError::NoPrimaryAvailable => error_codes::NO_PRIMARY,
            RegistryError::Forwarded { error_code, .. } => *error_code,
            RegistryError::OutOfOrderReplication { .. } | RegistryError::Degraded => {
                error_codes::NODE_DEGRADED
            }
            RegistryError::Storage(_) => error_codes::STORAGE_ERROR,
            RegistryError::Config(_) => error_codes::INVALID_COMPATIBILITY_LEVEL,
            RegistryError::Serialization(_) => error_codes::INTERNAL_ERROR,
            RegistryError::Io(_) => error_codes::INTERNAL_ERROR,
            RegistryError::Internal(_) => error_codes::INTERNAL_ERROR,
        }
    }

    /// Get the HTTP status code
    pub fn http_status(&self) -> u16 {
        match self {
            RegistryError::Unauthenticated => 401,
            RegistryError::NotFound
            | RegistryError::SubjectNotFound(_)
            | RegistryError::VersionNotFound { .. } => 404,
            RegistryError::InvalidSchema(_) | RegistryError::Config(_) => 422,
            RegistryError::IncompatibleSchema(_) => 409,
            RegistryError::Forwarded { http_status, .. } => *http_status,
            RegistryError::NoPrimaryAvailable
            | RegistryError::OutOfOrderReplication { .. }
            | RegistryError::Degraded => 503,
            _ => 500,
        }
    }
}

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

impl From<serde_json::Error> for RegistryError {
    fn from(e: serde_json::Error) -> Self {
        RegistryError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(RegistryError::Unauthenticated.error_code(), 40101);
        assert_eq!(RegistryError::NotFound.error_code(), 40403);
        assert_eq!(
            RegistryError::SubjectNotFound("s".into()).error_code(),
            40401
        );
        assert_eq!(
            RegistryError::VersionNotFound {
                subject: "s".into(),
                version: 3
            }
            .error_code(),
            40402
        );
    }

    #[test]
    fn test_http_status() {
        assert_eq!(RegistryError::Unauthenticated.http_status(), 401);
        assert_eq!(RegistryError::NotFound.http_status(), 404);
        assert_eq!(
            RegistryError::IncompatibleSchema("x".into()).http_status(),
            409
        );
        assert_eq!(RegistryError::NoPrimaryAvailable.http_status(), 503);
        assert_eq!(RegistryError::Degraded.http_status(), 503);
    }

    #[test]
    fn test_not_found_shape_is_uniform() {
        // The disguised (denied) and genuine (absent) variants must be
        // indistinguishable: same display, same code, same status.
        let absent = RegistryError::NotFound;
        let denied = RegistryError::NotFound;
        assert_eq!(absent.to_string(), denied.to_string());
        assert_eq!(absent.error_code(), denied.error_code());
        assert_eq!(absent.http_status(), denied.http_status());
    }
}
