//! In-memory schema model and loader for QMI service/message/TLV definitions
//!
//! Schema documents are the source of truth the codegen crate compiles
//! against: a JSON array of entities describing services, messages,
//! indications, and shared field groups (`common-ref`s). This crate owns
//! parsing and validating that document; it has no opinion on what gets
//! generated from it.

pub mod error;
pub mod loader;
pub mod model;

pub use error::{SchemaError, SchemaResult};
pub use loader::{load_str, load_value, load_with_common};
pub use model::{
    CommonRefDef, Entity, Field, Format, IndicationDef, MessageDef, PassiveKind, PassiveMarker,
    Schema, ServiceDef, Tlv, DEFAULT_TAG_OPERATION_RESULT,
};

/// Load and validate a schema document from its JSON text.
///
/// Thin re-export of [`loader::load_str`] so callers can write
/// `qmi_schema::load(text)?` without reaching into the `loader` module.
pub fn load(document: &str) -> SchemaResult<Schema> {
    loader::load_str(document)
}
