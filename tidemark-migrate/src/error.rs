//! Error types for the reconciliation engine.

use thiserror::Error;

/// Result type alias for reconciliation operations.
pub type MigrateResult<T> = Result<T, MigrationError>;

/// Errors that can occur while reconciling migrations.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// File system error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed definition or snapshot JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Bookkeeping store operation error.
    #[error("Database error: {0}")]
    Database(String),

    /// Introspection of the live schema failed.
    #[error("Introspection error: {0}")]
    Introspection(String),

    /// A definition could not be extracted from migration source.
    #[error("Extraction failed for migration '{name}': {reason}")]
    Extraction {
        /// Migration name.
        name: String,
        /// Why extraction failed.
        reason: String,
    },

    /// A definition record is structurally invalid.
    #[error("Invalid definition: {0}")]
    InvalidDefinition(String),

    /// A consolidation precondition was violated.
    #[error("Consolidation error: {0}")]
    Consolidation(String),

    /// The migration generator could not emit an artifact.
    #[error("Generator error: {0}")]
    Generator(String),

    /// No disposable database could be provisioned for verification.
    #[error("Shadow database unavailable: {0}")]
    ShadowUnavailable(String),

    /// Shadow database error after provisioning succeeded.
    #[error("Shadow database error: {0}")]
    ShadowDatabase(String),

    /// Configuration file error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Migration not found.
    #[error("Migration '{0}' not found")]
    NotFound(String),

    /// General error.
    #[error("Migration error: {0}")]
    Other(String),
}

impl MigrationError {
    /// Create a database error.
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create an introspection error.
    pub fn introspection(msg: impl Into<String>) -> Self {
        Self::Introspection(msg.into())
    }

    /// Create an extraction error.
    pub fn extraction(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Extraction {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid definition error.
    pub fn invalid_definition(msg: impl Into<String>) -> Self {
        Self::InvalidDefinition(msg.into())
    }

    /// Create a consolidation error.
    pub fn consolidation(msg: impl Into<String>) -> Self {
        Self::Consolidation(msg.into())
    }

    /// Create a generator error.
    pub fn generator(msg: impl Into<String>) -> Self {
        Self::Generator(msg.into())
    }

    /// Create a shadow-unavailable error.
    pub fn shadow_unavailable(msg: impl Into<String>) -> Self {
        Self::ShadowUnavailable(msg.into())
    }

    /// Create a shadow database error.
    pub fn shadow_database(msg: impl Into<String>) -> Self {
        Self::ShadowDatabase(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Check if this error degrades to a warning instead of aborting a run.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Extraction { .. } | Self::ShadowUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MigrationError::NotFound("2024_01_01_000000_create_users_table".to_string());
        assert!(err.to_string().contains("create_users_table"));
    }

    #[test]
    fn test_extraction_display() {
        let err = MigrationError::extraction("add_email", "unexpected token");
        let msg = err.to_string();
        assert!(msg.contains("add_email"));
        assert!(msg.contains("unexpected token"));
    }

    #[test]
    fn test_is_recoverable() {
        assert!(MigrationError::extraction("x", "y").is_recoverable());
        assert!(MigrationError::shadow_unavailable("sqlite").is_recoverable());
        assert!(!MigrationError::database("connection refused").is_recoverable());
        assert!(!MigrationError::consolidation("one definition").is_recoverable());
    }
}
