use std::borrow::Cow;

use thiserror::Error;

use crate::hooks::Operation;

/// Failure raised while assembling a schema from configuration.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// Two logical fields of one table resolve to the same column.
    #[error("table `{entity}`: fields `{first}` and `{second}` both map to column `{column}`")]
    PhysicalNameCollision {
        entity: String,
        column: String,
        first: String,
        second: String,
    },

    /// Options or extensions mention a field the table does not declare.
    #[error("table `{entity}` has no field `{field}`")]
    UnknownField { entity: String, field: String },

    /// A lookup named an entity that is not part of the schema.
    #[error("unknown entity `{entity}`")]
    UnknownEntity { entity: String },

    /// A field declaration in configuration could not be converted.
    #[error("invalid field `{entity}.{field}`: {message}")]
    InvalidField {
        entity: String,
        field: String,
        message: String,
    },
}

/// Failure raised by a storage backend.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Underlying Redis command failed.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Underlying SQL driver failed.
    #[error("sql error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("unknown model `{model}`")]
    UnknownModel { model: String },

    #[error("model `{model}` has no field `{field}`")]
    UnknownField { model: String, field: String },

    /// Record could not be (de)serialized for storage.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The value of a unique field already belongs to another row.
    #[error("unique constraint violation on `{model}.{field}` (held by `{existing_id}`)")]
    UniqueConstraintViolation {
        model: String,
        field: String,
        existing_id: String,
    },

    /// A write reached the backend without a primary key.
    #[error("record for `{model}` has no `id`")]
    MissingId { model: String },

    /// Could not enter the transaction scope in time.
    #[error("timed out waiting for transaction lock `{key}`")]
    LockTimeout { key: String },

    #[error("{message}")]
    Other { message: Cow<'static, str> },
}

/// Top-level error returned by registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A row returned by the backend does not match the entity schema.
    #[error("validation failed")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// A required lookup found nothing.
    #[error("{model} not found")]
    NotFound { model: String },

    /// The backend returned no row for a create or update.
    #[error("failed to {operation} {model}: backend returned no row")]
    WriteFailed { model: String, operation: Operation },

    /// A `before` hook refused the write.
    #[error("{operation} of {model} rejected: {reason}")]
    Rejected {
        model: String,
        operation: Operation,
        reason: String,
    },

    /// A `before` hook failed outright (as opposed to refusing the write).
    #[error("{operation} hook for {model} failed: {source}")]
    Hook {
        model: String,
        operation: Operation,
        #[source]
        source: HookError,
    },

    /// Two identifiers resolved to different rows.
    #[error("conflict: {message}")]
    Conflict { message: String },
}

/// Failure reported by a hook implementation.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HookError {
    pub message: String,
}

impl HookError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Failure raised while planning, compiling or applying a migration.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The live database could not be introspected.
    #[error("introspection failed: {0}")]
    Introspection(#[source] AdapterError),

    /// Migrations are only generated against SQL backends.
    #[error("adapter `{adapter}` does not support SQL migrations")]
    UnsupportedAdapter { adapter: String },

    /// The compiled script targets a different dialect than the database.
    #[error("migration compiled for {expected} cannot run on {actual}")]
    DialectMismatch { expected: String, actual: String },

    #[error("invalid migration plan: {message}")]
    InvalidPlan { message: String },

    /// A statement failed while applying the migration; nothing was committed.
    #[error("failed to apply migration: {0}")]
    Apply(#[source] AdapterError),
}

/// Collection of validation issues found in a record.
#[derive(Debug, Error)]
#[error("validation errors: {issues:?}")]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationError {
    pub fn new<I>(issues: I) -> Self
    where
        I: IntoIterator<Item = ValidationIssue>,
    {
        Self {
            issues: issues.into_iter().collect(),
        }
    }

    /// Convenience helper for constructing a single-field validation error.
    pub fn single(field: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new([ValidationIssue::new(field, code, message)])
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    /// Returns the issues reported for `field`.
    pub fn for_field<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a ValidationIssue> + 'a {
        self.issues.iter().filter(move |issue| issue.field == field)
    }
}

/// Detailed validation failure for a single field.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    pub field: String,
    pub code: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(field: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            code: code.into(),
            message: message.into(),
        }
    }
}

pub type ValidationResult<T> = Result<T, ValidationError>;
