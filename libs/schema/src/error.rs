//! Schema loading errors
//!
//! Mirrors the diagnostic style of the teacher's protocol errors: each
//! variant carries enough context (entity index, field path, offending
//! value) that a bad schema document can be fixed without re-reading the
//! loader source.

use thiserror::Error;

/// Errors raised while parsing a schema document into the in-memory model
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SchemaError {
    /// Top-level document is not a JSON array of entity objects
    #[error("schema document must be a JSON array of entities, got {actual}")]
    NotAnArray { actual: String },

    /// An entity object is missing the `type` discriminator
    #[error("entity {index} is missing required `type` field")]
    MissingType { index: usize },

    /// An entity's `type` discriminator is not one of the recognized kinds
    #[error("entity {index} has unknown type discriminator `{type_name}`")]
    UnknownEntityType { index: usize, type_name: String },

    /// A required key is missing on an entity
    #[error("entity {index} ({entity_name}) is missing required key `{key}`")]
    MissingKey {
        index: usize,
        entity_name: String,
        key: String,
    },

    /// A key has the wrong JSON shape (e.g. a string where a number is expected)
    #[error("entity {index} ({entity_name}) field `{key}` has invalid value: {reason}")]
    InvalidValue {
        index: usize,
        entity_name: String,
        key: String,
        reason: String,
    },

    /// A field tree is malformed: unknown format, missing contents, etc.
    #[error("malformed field tree at {path}: {reason}")]
    MalformedField { path: String, reason: String },

    /// A Message's `service` name does not resolve to a declared Service
    #[error("message `{message}` references undeclared service `{service}`")]
    UnknownService { message: String, service: String },

    /// A `common-ref` field names a CommonRef that was not declared before use
    #[error("field `{field}` references common-ref `{name}` which is not declared before use")]
    DanglingCommonRef { field: String, name: String },

    /// Two TLVs within the same message input (or output) share a tag id
    #[error("message `{message}` has duplicate TLV tag {tag} in its {direction} (first used by `{first}`, reused by `{second}`)")]
    DuplicateTag {
        message: String,
        direction: String,
        tag: u8,
        first: String,
        second: String,
    },

    /// The canonical Operation Result TLV (tag 2) does not have the mandated shape
    #[error("message `{message}` output declares tag 2 (Operation Result) with a non-canonical shape: {reason}")]
    InvalidOperationResult { message: String, reason: String },
}

/// Result type for schema loading operations
pub type SchemaResult<T> = std::result::Result<T, SchemaError>;
