//! Codegen-time errors
//!
//! Generation is an all-or-nothing pass: any error here aborts emission for
//! the whole document, the same way a bad schema aborts the teacher's
//! protocol layer rather than limping on with partial state.

use thiserror::Error;

use qmi_schema::SchemaError;

/// Errors raised while mapping schema types or synthesizing codec routines
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodegenError {
    /// The schema document itself failed to load or validate
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// A field's format falls outside the closed set the mapper handles
    #[error("field `{field}` has unsupported format `{format}`: {reason}")]
    UnsupportedFormat {
        field: String,
        format: String,
        reason: String,
    },

    /// A struct/sequence content entry has no name, so no field can be emitted for it
    #[error("field `{field}` contents entry at index {index} has no `name`")]
    UnnamedContent { field: String, index: usize },

    /// A common-ref field pointed at a name absent from the resolved CommonRef table
    ///
    /// Distinct from `SchemaError::DanglingCommonRef` (declaration-order violation,
    /// caught at schema load): this fires when the reference is well-ordered in the
    /// document but the mapper's running `common_sizes` table still lacks an entry,
    /// which only happens if the loader and mapper disagree about entity order — a
    /// codegen-internal bug, not a malformed schema.
    #[error("common-ref `{name}` used by field `{field}` has no registered struct")]
    UnresolvedCommonRef { field: String, name: String },
}

/// Result type for codegen operations
pub type CodegenResult<T> = std::result::Result<T, CodegenError>;
