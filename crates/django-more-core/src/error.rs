//! Core error types for django-more.
//!
//! [`DjangoError`] covers configuration, patching, migration-state and
//! validation failures. Nothing in django-more recovers from these locally:
//! they propagate to the start-up sequence or the migration-planning pass,
//! which aborts.

use std::collections::HashMap;
use std::fmt;

use django_more_patchy::PatchError;
use thiserror::Error;

/// Represents a validation error with optional field-level errors.
///
/// # Examples
///
/// ```
/// use django_more_core::error::ValidationError;
///
/// let err = ValidationError::new("This field cannot be null.", "null");
/// assert_eq!(err.code, "null");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The primary error message.
    pub message: String,
    /// A short code identifying the failure (e.g. "null", "invalid_choice").
    pub code: String,
    /// Additional parameters providing context for the message.
    pub params: HashMap<String, String>,
    /// Per-field validation errors, keyed by field name.
    pub field_errors: HashMap<String, Vec<Self>>,
}

impl ValidationError {
    /// Creates a new `ValidationError` with a message and code.
    pub fn new(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: code.into(),
            params: HashMap::new(),
            field_errors: HashMap::new(),
        }
    }

    /// Creates a `ValidationError` containing per-field errors.
    pub fn with_field_errors(field_errors: HashMap<String, Vec<Self>>) -> Self {
        Self {
            message: String::new(),
            code: String::new(),
            params: HashMap::new(),
            field_errors,
        }
    }

    /// Adds a parameter to this validation error.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.message.is_empty() {
            write!(f, "{}", self.message)?;
        } else if !self.field_errors.is_empty() {
            let mut first = true;
            for (field, errors) in &self.field_errors {
                for error in errors {
                    if !first {
                        write!(f, "; ")?;
                    }
                    write!(f, "{field}: {error}")?;
                    first = false;
                }
            }
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// The primary error type for django-more.
#[derive(Error, Debug)]
pub enum DjangoError {
    // ── Start-up ─────────────────────────────────────────────────────

    /// A patch could not be applied.
    #[error("Patch error: {0}")]
    Patch(#[from] PatchError),

    /// The framework is improperly configured.
    #[error("Improperly configured: {0}")]
    ImproperlyConfigured(String),

    /// A configuration value is invalid.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    // ── Migration state ──────────────────────────────────────────────

    /// An operation referenced a custom type absent from the state.
    #[error("{operation}: type '{type_name}' not found in state")]
    TypeNotFound {
        /// The operation kind, e.g. `RemoveEnum`.
        operation: String,
        /// The missing type name.
        type_name: String,
    },

    /// An operation tried to create a custom type that already exists.
    #[error("{operation}: type '{type_name}' already exists in state")]
    TypeAlreadyExists {
        /// The operation kind, e.g. `CreateEnum`.
        operation: String,
        /// The clashing type name.
        type_name: String,
    },

    /// Operations or migrations depend on each other in a cycle.
    #[error("Circular dependency: {0}")]
    CircularDependency(String),

    /// A migration or migration operation is invalid.
    #[error("Migration error: {0}")]
    MigrationError(String),

    // ── Database ─────────────────────────────────────────────────────

    /// A schema editor could not produce or run a statement.
    #[error("Database error: {0}")]
    DatabaseError(String),

    // ── Validation ───────────────────────────────────────────────────

    /// A field value failed validation.
    #[error("Validation error: {0}")]
    ValidationError(#[from] ValidationError),

    // ── Serialization / IO ───────────────────────────────────────────

    /// Failed to serialize or deserialize data.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// An I/O error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl DjangoError {
    /// Builds a [`DjangoError::TypeNotFound`].
    pub fn type_not_found(operation: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self::TypeNotFound {
            operation: operation.into(),
            type_name: type_name.into(),
        }
    }

    /// Builds a [`DjangoError::TypeAlreadyExists`].
    pub fn type_already_exists(operation: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self::TypeAlreadyExists {
            operation: operation.into(),
            type_name: type_name.into(),
        }
    }
}

impl From<serde_json::Error> for DjangoError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

/// A convenience type alias for results using [`DjangoError`].
pub type DjangoResult<T> = Result<T, DjangoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_simple() {
        let err = ValidationError::new("This field is required.", "required");
        assert_eq!(err.to_string(), "This field is required.");
        assert_eq!(err.code, "required");
    }

    #[test]
    fn test_validation_error_with_param() {
        let err = ValidationError::new("Value %(value)r is not a valid choice.", "invalid_choice")
            .with_param("value", "purple");
        assert_eq!(err.params.get("value").unwrap(), "purple");
    }

    #[test]
    fn test_validation_error_field_errors() {
        let mut field_errors = HashMap::new();
        field_errors.insert(
            "status".to_string(),
            vec![ValidationError::new("Invalid value.", "invalid_value")],
        );
        let err = ValidationError::with_field_errors(field_errors);
        assert_eq!(err.to_string(), "status: Invalid value.");
    }

    #[test]
    fn test_type_not_found_names_operation_and_type() {
        let err = DjangoError::type_not_found("RenameEnum", "app_enum_status");
        assert_eq!(
            err.to_string(),
            "RenameEnum: type 'app_enum_status' not found in state"
        );
    }

    #[test]
    fn test_from_patch_error() {
        let err: DjangoError = PatchError::NotFound {
            name: "django.db.Missing".into(),
        }
        .into();
        assert!(matches!(err, DjangoError::Patch(_)));
        assert!(err.to_string().contains("django.db.Missing"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: DjangoError = io_err.into();
        assert!(matches!(err, DjangoError::IoError(_)));
    }

    #[test]
    fn test_from_validation_error() {
        let err: DjangoError = ValidationError::new("bad", "invalid").into();
        assert_eq!(err.to_string(), "Validation error: bad");
    }
}
