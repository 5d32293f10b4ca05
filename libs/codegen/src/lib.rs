//! Schema-to-Rust compiler for QMI messages
//!
//! Three pure stages, run in order: [`type_mapper`] decides how one field
//! maps to a Rust type, [`synthesizer`] walks a whole schema into an
//! ordered plan of structs and TLV slots, [`emit`] renders that plan as a
//! source file. Nothing here touches the filesystem — that is the CLI's job.

pub mod emit;
pub mod error;
pub mod naming;
pub mod synthesizer;
pub mod type_mapper;

pub use error::{CodegenError, CodegenResult};
pub use synthesizer::{synthesize, MessagePlan, Plan, TlvSlot};
pub use type_mapper::{map_field, MappedType, Size, StructDef, StructField};

use qmi_schema::Schema;

/// Compile a loaded schema into one Rust source file's contents.
pub fn generate(schema: &Schema) -> CodegenResult<String> {
    let plan = synthesizer::synthesize(schema)?;
    Ok(emit::emit(&plan))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_end_to_end_for_allocate_cid() {
        let schema = qmi_schema::load(
            r#"[
                {"type": "Service", "name": "CTL", "id": 0},
                {"type": "Message", "name": "AllocateCID", "service": "CTL", "id": 34,
                 "input": [
                    {"id": 1, "name": "Service", "format": "uint8"}
                 ],
                 "output": [
                    {"id": 2, "name": "Operation Result", "format": "struct", "contents": [
                        {"name": "Status", "format": "uint16"},
                        {"name": "Error", "format": "uint16"}
                    ]},
                    {"id": 1, "name": "Allocation", "format": "struct", "contents": [
                        {"name": "Service", "format": "uint8"},
                        {"name": "ClientId", "format": "uint8"}
                    ]}
                 ]}
            ]"#,
        )
        .unwrap();
        let source = generate(&schema).unwrap();
        assert!(source.contains("pub struct CtlAllocateCidInput"));
        assert!(source.contains("pub struct CtlAllocateCidOutput"));
        assert!(source.contains("impl Request for CtlAllocateCidInput"));
        assert!(source.contains("impl Message for CtlAllocateCidOutput"));
    }

    #[test]
    fn unsupported_empty_field_aborts_generation() {
        let schema = qmi_schema::load(
            r#"[
                {"type": "Service", "name": "CTL", "id": 0},
                {"type": "Message", "name": "Bad", "service": "CTL", "id": 1,
                 "input": [{"name": "Mystery"}], "output": []}
            ]"#,
        )
        .unwrap();
        assert!(matches!(
            generate(&schema),
            Err(CodegenError::UnsupportedFormat { .. })
        ));
    }
}
