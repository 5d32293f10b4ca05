//! Schema document loader
//!
//! Parses a JSON schema document into a [`Schema`], then validates the
//! cross-entity invariants from §3: service resolution, common-ref
//! declaration order, TLV tag uniqueness, and the canonical Operation
//! Result shape. Entities are immutable once built — this is the only place
//! that touches `serde_json::Value` directly, the same "parse once at the
//! boundary" discipline the teacher's config loaders follow
//! (`services/adapters/config/mod.rs`: `load_chain_config`).

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use tracing::{debug, trace};

use crate::error::{SchemaError, SchemaResult};
use crate::model::*;

/// Load and validate a schema document from its JSON text.
pub fn load_str(document: &str) -> SchemaResult<Schema> {
    let value: Value = serde_json::from_str(document).map_err(|e| SchemaError::InvalidValue {
        index: 0,
        entity_name: "<document>".to_string(),
        key: "<root>".to_string(),
        reason: e.to_string(),
    })?;
    load_value(&value)
}

/// Load and validate a schema document that has already been parsed as JSON
/// (used when the CLI loads the common schema and a service schema and needs
/// to merge them before validation — see §6).
pub fn load_value(value: &Value) -> SchemaResult<Schema> {
    let array = value.as_array().ok_or_else(|| SchemaError::NotAnArray {
        actual: type_name(value),
    })?;

    let mut entities = Vec::with_capacity(array.len());
    let mut common_refs = HashMap::new();

    for (index, item) in array.iter().enumerate() {
        let entity = parse_entity(index, item)?;
        if let Entity::CommonRef(def) = &entity {
            common_refs.insert(def.name.clone(), def.clone());
        }
        entities.push(entity);
    }

    let schema = Schema {
        entities,
        common_refs,
    };
    validate(&schema)?;
    debug!(
        services = schema.services().count(),
        messages = schema.messages().count(),
        indications = schema.indications().count(),
        common_refs = schema.common_refs.len(),
        "loaded schema document"
    );
    Ok(schema)
}

/// Merge a common schema (already loaded) with a service-specific schema
/// document, so the service schema's `common-ref` fields resolve against
/// definitions declared in the shared document (§6: "after first loading the
/// common schema from the same directory so shared types resolve").
pub fn load_with_common(common: &str, service_document: &str) -> SchemaResult<Schema> {
    let common_value: Value =
        serde_json::from_str(common).map_err(|e| SchemaError::InvalidValue {
            index: 0,
            entity_name: "<common>".to_string(),
            key: "<root>".to_string(),
            reason: e.to_string(),
        })?;
    let service_value: Value =
        serde_json::from_str(service_document).map_err(|e| SchemaError::InvalidValue {
            index: 0,
            entity_name: "<service>".to_string(),
            key: "<root>".to_string(),
            reason: e.to_string(),
        })?;

    let common_array = common_value.as_array().ok_or_else(|| SchemaError::NotAnArray {
        actual: type_name(&common_value),
    })?;
    let service_array = service_value
        .as_array()
        .ok_or_else(|| SchemaError::NotAnArray {
            actual: type_name(&service_value),
        })?;

    let mut merged = Vec::with_capacity(common_array.len() + service_array.len());
    merged.extend(common_array.iter().cloned());
    merged.extend(service_array.iter().cloned());
    load_value(&Value::Array(merged))
}

fn type_name(v: &Value) -> String {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
    .to_string()
}

fn parse_entity(index: usize, item: &Value) -> SchemaResult<Entity> {
    let obj = item
        .as_object()
        .ok_or_else(|| SchemaError::InvalidValue {
            index,
            entity_name: "<entity>".to_string(),
            key: "<root>".to_string(),
            reason: format!("entity must be an object, got {}", type_name(item)),
        })?;

    let type_str = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or(SchemaError::MissingType { index })?;

    // Entities carrying a `common-ref` key are routed to the CommonRef table
    // regardless of their declared `type`, per §4.1.
    if let Some(common_ref_name) = obj.get("common-ref").and_then(Value::as_str) {
        let name = required_str(index, type_str, obj, "name")?;
        let tag = parse_tag(obj);
        let field = parse_field_tree(&format!("{}/{}", type_str, name), obj)?;
        return Ok(Entity::CommonRef(CommonRefDef {
            name: common_ref_name.to_string(),
            tlv: Tlv {
                tag,
                name: Some(name),
                field,
            },
        }));
    }

    match type_str {
        "Service" => {
            let name = required_str(index, type_str, obj, "name")?;
            let id = required_u8(index, type_str, obj, "id")?;
            Ok(Entity::Service(ServiceDef { id, name }))
        }
        "Message" => {
            let name = required_str(index, type_str, obj, "name")?;
            let service = required_str(index, type_str, obj, "service")?;
            let id = required_u16(index, type_str, obj, "id")?;
            let input = parse_tlv_list(&name, obj.get("input"))?;
            let output = parse_tlv_list(&name, obj.get("output"))?;
            Ok(Entity::Message(MessageDef {
                name,
                service,
                id,
                input,
                output,
            }))
        }
        "Indication" => {
            let name = required_str(index, type_str, obj, "name")?;
            let service = required_str(index, type_str, obj, "service")?;
            let id = required_u16(index, type_str, obj, "id")?;
            let output = parse_tlv_list(&name, obj.get("output"))?;
            Ok(Entity::Indication(IndicationDef {
                name,
                service,
                id,
                output,
            }))
        }
        "TLV" => {
            // A top-level TLV without a common-ref key is schema-malformed:
            // at this level TLV entities only exist to be shared (§4.1).
            Err(SchemaError::MissingKey {
                index,
                entity_name: required_str(index, type_str, obj, "name").unwrap_or_default(),
                key: "common-ref".to_string(),
            })
        }
        "Client" => Ok(Entity::Passive(PassiveMarker {
            kind: PassiveKind::Client,
            name: obj
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("Client")
                .to_string(),
        })),
        "Message-ID-Enum" => Ok(Entity::Passive(PassiveMarker {
            kind: PassiveKind::MessageIdEnum,
            name: obj
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("Message-ID-Enum")
                .to_string(),
        })),
        "Indication-ID-Enum" => Ok(Entity::Passive(PassiveMarker {
            kind: PassiveKind::IndicationIdEnum,
            name: obj
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("Indication-ID-Enum")
                .to_string(),
        })),
        "prerequisite" => Ok(Entity::Passive(PassiveMarker {
            kind: PassiveKind::Prerequisite,
            name: obj
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("prerequisite")
                .to_string(),
        })),
        other => Err(SchemaError::UnknownEntityType {
            index,
            type_name: other.to_string(),
        }),
    }
}

fn required_str(
    index: usize,
    entity_name: &str,
    obj: &serde_json::Map<String, Value>,
    key: &str,
) -> SchemaResult<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| SchemaError::MissingKey {
            index,
            entity_name: entity_name.to_string(),
            key: key.to_string(),
        })
}

fn required_u8(
    index: usize,
    entity_name: &str,
    obj: &serde_json::Map<String, Value>,
    key: &str,
) -> SchemaResult<u8> {
    let v = obj.get(key).ok_or_else(|| SchemaError::MissingKey {
        index,
        entity_name: entity_name.to_string(),
        key: key.to_string(),
    })?;
    parse_numeric_like(v).and_then(|n| {
        u8::try_from(n).map_err(|_| SchemaError::InvalidValue {
            index,
            entity_name: entity_name.to_string(),
            key: key.to_string(),
            reason: format!("{} does not fit in a byte", n),
        })
    })
}

fn required_u16(
    index: usize,
    entity_name: &str,
    obj: &serde_json::Map<String, Value>,
    key: &str,
) -> SchemaResult<u16> {
    let v = obj.get(key).ok_or_else(|| SchemaError::MissingKey {
        index,
        entity_name: entity_name.to_string(),
        key: key.to_string(),
    })?;
    parse_numeric_like(v).and_then(|n| {
        u16::try_from(n).map_err(|_| SchemaError::InvalidValue {
            index,
            entity_name: entity_name.to_string(),
            key: key.to_string(),
            reason: format!("{} does not fit in 16 bits", n),
        })
    })
}

/// Schema documents are "relaxed JSON": numeric ids are accepted either as
/// JSON numbers or as hex/decimal strings (`"0x27"`, `"39"`).
fn parse_numeric_like(v: &Value) -> SchemaResult<u64> {
    if let Some(n) = v.as_u64() {
        return Ok(n);
    }
    if let Some(s) = v.as_str() {
        let s = s.trim();
        let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            u64::from_str_radix(hex, 16)
        } else {
            s.parse::<u64>()
        };
        if let Ok(n) = parsed {
            return Ok(n);
        }
    }
    Err(SchemaError::InvalidValue {
        index: 0,
        entity_name: "<numeric>".to_string(),
        key: "<value>".to_string(),
        reason: format!("expected a number or numeric string, got {:?}", v),
    })
}

fn parse_tag(obj: &serde_json::Map<String, Value>) -> u8 {
    obj.get("id")
        .and_then(|v| parse_numeric_like(v).ok())
        .and_then(|n| u8::try_from(n).ok())
        .unwrap_or(DEFAULT_TAG_OPERATION_RESULT)
}

fn parse_tlv_list(message_name: &str, value: Option<&Value>) -> SchemaResult<Vec<Tlv>> {
    let Some(value) = value else {
        return Ok(Vec::new());
    };
    let array = value.as_array().ok_or_else(|| SchemaError::InvalidValue {
        index: 0,
        entity_name: message_name.to_string(),
        key: "input/output".to_string(),
        reason: format!("expected an array of TLVs, got {}", type_name(value)),
    })?;

    array
        .iter()
        .map(|item| {
            let obj = item.as_object().ok_or_else(|| SchemaError::MalformedField {
                path: message_name.to_string(),
                reason: format!("TLV entry must be an object, got {}", type_name(item)),
            })?;
            let tag = parse_tag(obj);
            let name = obj.get("name").and_then(Value::as_str).map(str::to_string);
            let path = format!(
                "{}/{}",
                message_name,
                name.clone().unwrap_or_else(|| format!("tag{}", tag))
            );
            let field = parse_field_tree(&path, obj)?;
            Ok(Tlv { tag, name, field })
        })
        .collect()
}

/// Parses one field's content according to its `format` key. Used both for
/// top-level TLV field trees and for nested `contents`/`array-element`.
fn parse_field_tree(path: &str, obj: &serde_json::Map<String, Value>) -> SchemaResult<Field> {
    let name = obj.get("name").and_then(Value::as_str).map(str::to_string);
    let public_format = obj
        .get("public-format")
        .and_then(Value::as_str)
        .map(str::to_string);

    let format_str = obj.get("format").and_then(Value::as_str);
    let common_ref = obj
        .get("common-ref")
        .and_then(Value::as_str)
        .map(str::to_string);

    let format = match format_str {
        None | Some("") => Format::Empty { common_ref },
        Some("int8") => Format::Int8,
        Some("uint8") => Format::Uint8,
        Some("byte") => Format::Byte,
        Some("int16") => Format::Int16,
        Some("uint16") => Format::Uint16,
        Some("int32") => Format::Int32,
        Some("uint32") => Format::Uint32,
        Some("uint64") => Format::Uint64,
        Some("int64") => Format::Int64,
        Some("string") => Format::String,
        Some("guint-sized") => {
            let int_size = obj
                .get("int-size")
                .and_then(Value::as_u64)
                .ok_or_else(|| SchemaError::MalformedField {
                    path: path.to_string(),
                    reason: "guint-sized field is missing `int-size`".to_string(),
                })? as usize;
            Format::GuintSized { int_size }
        }
        Some("struct") => Format::Struct {
            contents: parse_contents(path, obj)?,
        },
        Some("sequence") => Format::Sequence {
            contents: parse_contents(path, obj)?,
        },
        Some("array") => {
            let element_obj = obj
                .get("array-element")
                .and_then(Value::as_object)
                .ok_or_else(|| SchemaError::MalformedField {
                    path: path.to_string(),
                    reason: "array field is missing `array-element`".to_string(),
                })?;
            let element = parse_field_tree(&format!("{}[]", path), element_obj)?;
            Format::Array {
                element: Box::new(element),
            }
        }
        Some(other) => {
            return Err(SchemaError::MalformedField {
                path: path.to_string(),
                reason: format!("unrecognized format `{}`", other),
            })
        }
    };

    Ok(Field {
        name,
        format,
        public_format,
    })
}

fn parse_contents(path: &str, obj: &serde_json::Map<String, Value>) -> SchemaResult<Vec<Field>> {
    let contents = obj
        .get("contents")
        .and_then(Value::as_array)
        .ok_or_else(|| SchemaError::MalformedField {
            path: path.to_string(),
            reason: "struct/sequence field is missing `contents`".to_string(),
        })?;
    contents
        .iter()
        .map(|item| {
            let item_obj = item.as_object().ok_or_else(|| SchemaError::MalformedField {
                path: path.to_string(),
                reason: format!("content entry must be an object, got {}", type_name(item)),
            })?;
            parse_field_tree(&format!("{}/contents", path), item_obj)
        })
        .collect()
}

/// Cross-entity validation (§3 invariants i-iv).
fn validate(schema: &Schema) -> SchemaResult<()> {
    let service_names: HashSet<&str> = schema.services().map(|s| s.name.as_str()).collect();

    for message in schema.messages() {
        if !service_names.contains(message.service.as_str()) {
            return Err(SchemaError::UnknownService {
                message: message.name.clone(),
                service: message.service.clone(),
            });
        }
        check_tag_uniqueness(&message.name, "input", &message.input)?;
        check_tag_uniqueness(&message.name, "output", &message.output)?;
        check_operation_result(&message.name, &message.output)?;
    }
    for indication in schema.indications() {
        if !service_names.contains(indication.service.as_str()) {
            return Err(SchemaError::UnknownService {
                message: indication.name.clone(),
                service: indication.service.clone(),
            });
        }
        check_tag_uniqueness(&indication.name, "output", &indication.output)?;
    }

    // Declaration-before-use for common-ref fields: walk entities in order,
    // growing the set of names seen so far, and check every common-ref
    // encountered en route against it.
    let mut seen = HashSet::new();
    for entity in &schema.entities {
        match entity {
            Entity::CommonRef(def) => {
                check_field_common_refs(&def.name, &def.tlv.field, &seen)?;
                seen.insert(def.name.clone());
            }
            Entity::Message(m) => {
                for tlv in m.input.iter().chain(m.output.iter()) {
                    check_field_common_refs(&m.name, &tlv.field, &seen)?;
                }
            }
            Entity::Indication(i) => {
                for tlv in &i.output {
                    check_field_common_refs(&i.name, &tlv.field, &seen)?;
                }
            }
            _ => {}
        }
    }

    Ok(())
}

fn check_field_common_refs(
    owner: &str,
    field: &Field,
    seen: &HashSet<String>,
) -> SchemaResult<()> {
    match &field.format {
        Format::Empty {
            common_ref: Some(name),
        } => {
            if !seen.contains(name) {
                return Err(SchemaError::DanglingCommonRef {
                    field: format!("{}/{}", owner, field.name.as_deref().unwrap_or("?")),
                    name: name.clone(),
                });
            }
            Ok(())
        }
        Format::Struct { contents } | Format::Sequence { contents } => {
            for f in contents {
                check_field_common_refs(owner, f, seen)?;
            }
            Ok(())
        }
        Format::Array { element } => check_field_common_refs(owner, element, seen),
        _ => Ok(()),
    }
}

fn check_tag_uniqueness(message: &str, direction: &str, tlvs: &[Tlv]) -> SchemaResult<()> {
    let mut seen: HashMap<u8, String> = HashMap::new();
    for tlv in tlvs {
        let label = tlv
            .name
            .clone()
            .unwrap_or_else(|| format!("tag{}", tlv.tag));
        if let Some(first) = seen.get(&tlv.tag) {
            return Err(SchemaError::DuplicateTag {
                message: message.to_string(),
                direction: direction.to_string(),
                tag: tlv.tag,
                first: first.clone(),
                second: label,
            });
        }
        seen.insert(tlv.tag, label);
        trace!(message, direction, tag = tlv.tag, "tlv tag recorded");
    }
    Ok(())
}

fn check_operation_result(message: &str, output: &[Tlv]) -> SchemaResult<()> {
    let Some(result_tlv) = output
        .iter()
        .find(|t| t.tag == DEFAULT_TAG_OPERATION_RESULT)
    else {
        return Ok(());
    };

    let is_canonical = match &result_tlv.field.format {
        Format::Struct { contents } | Format::Sequence { contents } => {
            contents.len() == 2
                && matches!(contents[0].format, Format::Uint16)
                && matches!(contents[1].format, Format::Uint16)
        }
        _ => false,
    };

    if !is_canonical {
        return Err(SchemaError::InvalidOperationResult {
            message: message.to_string(),
            reason: format!(
                "expected a struct of (status:uint16, error:uint16), got format `{}`",
                result_tlv.field.format.name()
            ),
        });
    }
    Ok(())
}
