//! Codec Synthesizer: Schema -> synthesized struct/TLV plan
//!
//! Turns the schema model plus the type mapper's per-field results into an
//! ordered plan the emitter can render without any further schema lookups.
//! Keeping this split (synthesize, then emit) mirrors the teacher's
//! `builder.rs`/`parser.rs` split between "decide what bytes go where" and
//! "write them" — here the second half writes Rust source instead of wire
//! bytes.

use qmi_schema::{Entity, Schema, DEFAULT_TAG_OPERATION_RESULT};

use crate::error::CodegenResult;
use crate::naming::to_pascal_case;
use crate::type_mapper::{map_common_refs, map_field, Size, StructDef};

/// One TLV slot on a generated Input or Output struct.
#[derive(Debug, Clone)]
pub struct TlvSlot {
    pub tag: u8,
    pub rust_name: String,
    pub rust_type: String,
    pub size: Size,
    pub is_operation_result: bool,
}

/// Everything the emitter needs to render one Message's Input/Output types
/// and codec methods.
#[derive(Debug, Clone)]
pub struct MessagePlan {
    pub schema_name: String,
    pub type_prefix: String,
    pub service_name: String,
    pub service_id: u8,
    pub message_id: u16,
    pub input_tlvs: Vec<TlvSlot>,
    pub output_tlvs: Vec<TlvSlot>,
    pub has_operation_result: bool,
}

/// The full synthesis result for one schema document.
#[derive(Debug, Clone)]
pub struct Plan {
    pub services: Vec<(String, u8)>,
    pub common_structs: Vec<StructDef>,
    pub nested_structs: Vec<StructDef>,
    pub messages: Vec<MessagePlan>,
}

pub fn synthesize(schema: &Schema) -> CodegenResult<Plan> {
    let services: Vec<(String, u8)> = schema
        .services()
        .map(|s| (s.name.clone(), s.id))
        .collect();

    let (common_structs, common_sizes) = map_common_refs(schema)?;
    let mut nested_structs = Vec::new();
    let mut messages = Vec::new();

    for entity in &schema.entities {
        let Entity::Message(message) = entity else {
            continue;
        };

        let type_prefix = format!(
            "{}{}",
            to_pascal_case(&message.service),
            to_pascal_case(&message.name)
        );

        let mut input_tlvs = Vec::with_capacity(message.input.len());
        for tlv in &message.input {
            let name = tlv
                .name
                .clone()
                .unwrap_or_else(|| format!("Tag{}", tlv.tag));
            let path = format!("{}.{}", type_prefix, name);
            let mapped = map_field(&path, &tlv.field, &common_sizes, None)?;
            nested_structs.extend(mapped.extra_structs);
            input_tlvs.push(TlvSlot {
                tag: tlv.tag,
                rust_name: crate::naming::to_snake_case(&name),
                rust_type: mapped.rust_type,
                size: mapped.size,
                is_operation_result: false,
            });
        }

        let mut output_tlvs = Vec::with_capacity(message.output.len());
        let mut has_operation_result = false;
        for tlv in &message.output {
            let name = tlv
                .name
                .clone()
                .unwrap_or_else(|| format!("Tag{}", tlv.tag));
            let path = format!("{}.{}", type_prefix, name);
            let mapped = map_field(&path, &tlv.field, &common_sizes, None)?;
            nested_structs.extend(mapped.extra_structs);
            let is_operation_result = tlv.tag == DEFAULT_TAG_OPERATION_RESULT;
            has_operation_result |= is_operation_result;
            output_tlvs.push(TlvSlot {
                tag: tlv.tag,
                rust_name: crate::naming::to_snake_case(&name),
                rust_type: mapped.rust_type,
                size: mapped.size,
                is_operation_result,
            });
        }

        messages.push(MessagePlan {
            schema_name: message.name.clone(),
            type_prefix,
            service_name: message.service.clone(),
            service_id: schema
                .find_service(&message.service)
                .map(|s| s.id)
                .unwrap_or(0),
            message_id: message.id,
            input_tlvs,
            output_tlvs,
            has_operation_result,
        });
    }

    Ok(Plan {
        services,
        common_structs,
        nested_structs,
        messages,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesizes_ctl_sync() {
        let schema = qmi_schema::load(
            r#"[
                {"type": "Service", "name": "CTL", "id": 0},
                {"type": "Message", "name": "Sync", "service": "CTL", "id": 39,
                 "input": [], "output": [
                    {"id": 2, "name": "Operation Result", "format": "struct", "contents": [
                        {"name": "Status", "format": "uint16"},
                        {"name": "Error", "format": "uint16"}
                    ]}
                ]}
            ]"#,
        )
        .unwrap();
        let plan = synthesize(&schema).unwrap();
        assert_eq!(plan.messages.len(), 1);
        let m = &plan.messages[0];
        assert_eq!(m.type_prefix, "CtlSync");
        assert!(m.has_operation_result);
        assert_eq!(m.output_tlvs[0].tag, 2);
    }

    #[test]
    fn synthesizes_common_ref_reuse() {
        let schema = qmi_schema::load(
            r#"[
                {"type": "Service", "name": "CTL", "id": 0},
                {"type": "TLV", "common-ref": "LinkFlags", "name": "Link Flags",
                 "format": "struct", "contents": [{"name": "Up", "format": "uint8"}]},
                {"type": "Message", "name": "GetFlags", "service": "CTL", "id": 5,
                 "input": [{"name": "Flags", "common-ref": "LinkFlags"}], "output": []}
            ]"#,
        )
        .unwrap();
        let plan = synthesize(&schema).unwrap();
        assert_eq!(plan.common_structs.len(), 1);
        assert_eq!(plan.common_structs[0].name, "LinkFlags");
        assert_eq!(plan.messages[0].input_tlvs[0].rust_type, "LinkFlags");
    }
}
