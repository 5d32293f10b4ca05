//! Type Mapper: Field -> (TargetType, FixedSize | Variable)
//!
//! Pure function over the schema model. Does not touch I/O or the output
//! file; `synthesizer` and `emit` consume its output. Mirrors the teacher's
//! `tlv_types.rs` in spirit (one place that knows how a wire format maps to
//! a Rust type) even though the teacher's mapping is static and this one is
//! schema-driven.

use std::collections::HashMap;

use qmi_schema::{Field, Format, Schema};

use crate::error::{CodegenError, CodegenResult};
use crate::naming::{to_pascal_case, to_snake_case};

/// Whether a mapped type has a statically known wire width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Size {
    Fixed(usize),
    Variable,
}

impl Size {
    pub fn add(self, other: Size) -> Size {
        match (self, other) {
            (Size::Fixed(a), Size::Fixed(b)) => Size::Fixed(a + b),
            _ => Size::Variable,
        }
    }

    pub fn is_fixed(self) -> bool {
        matches!(self, Size::Fixed(_))
    }
}

/// One field of a generated struct.
#[derive(Debug, Clone)]
pub struct StructField {
    pub rust_name: String,
    pub rust_type: String,
    pub schema_name: String,
    pub size: Size,
}

/// A named Rust struct the mapper had to synthesize for a `struct`/`sequence`
/// field, or for a CommonRef's top-level payload.
#[derive(Debug, Clone)]
pub struct StructDef {
    pub name: String,
    pub fields: Vec<StructField>,
    pub size: Size,
    pub doc: Option<String>,
}

/// Result of mapping one field: its Rust type, its size discipline, and any
/// nested struct types the mapping required (innermost first, so emitting
/// them in order satisfies Rust's forward-reference-free item ordering).
#[derive(Debug, Clone)]
pub struct MappedType {
    pub rust_type: String,
    pub size: Size,
    pub extra_structs: Vec<StructDef>,
}

/// Registry of already-synthesized CommonRef struct names and sizes, keyed
/// by the schema's `common-ref` name. Built once, top-to-bottom over the
/// schema's entities, before any Message is mapped (declaration-before-use,
/// §3 invariant ii, is already enforced at load time by `qmi_schema`).
pub type CommonRefSizes = HashMap<String, (String, Size)>;

/// Map one field to its Rust representation.
///
/// `path` is a dotted diagnostic path used in error messages and, for
/// `struct`/`sequence` fields with no better name, as the basis for a
/// synthesized type name. `name_hint` overrides that synthesized name for
/// the top-level call (e.g. a CommonRef maps with `name_hint` set to its
/// own declared name, so the emitted type is `LinkFlags`, not
/// `SomeMessageFlagsStruct`).
pub fn map_field(
    path: &str,
    field: &Field,
    common_refs: &CommonRefSizes,
    name_hint: Option<&str>,
) -> CodegenResult<MappedType> {
    match &field.format {
        Format::Int8 => scalar("i8", 1),
        Format::Uint8 | Format::Byte => scalar("u8", 1),
        Format::Int16 => scalar("i16", 2),
        Format::Uint16 => scalar("u16", 2),
        Format::Int32 => scalar("i32", 4),
        Format::Uint32 => scalar("u32", 4),
        Format::Uint64 => scalar("u64", 8),
        Format::Int64 => scalar("i64", 8),
        Format::String => Ok(MappedType {
            rust_type: "String".to_string(),
            size: Size::Variable,
            extra_structs: Vec::new(),
        }),
        Format::GuintSized { int_size } => Ok(MappedType {
            rust_type: format!("[u8; {}]", int_size),
            size: Size::Fixed(*int_size),
            extra_structs: Vec::new(),
        }),
        Format::Struct { contents } | Format::Sequence { contents } => {
            map_composite(path, contents, common_refs, name_hint)
        }
        Format::Array { element } => {
            let mapped = map_field(&format!("{}[]", path), element, common_refs, None)?;
            if !mapped.size.is_fixed() {
                // Array length comes from the enclosing TLV only; without a
                // fixed per-element width there is no way to tell where one
                // element ends and the next begins.
                return Err(CodegenError::UnsupportedFormat {
                    field: path.to_string(),
                    format: "array".to_string(),
                    reason: "array elements must have a fixed wire size".to_string(),
                });
            }
            Ok(MappedType {
                rust_type: format!("Vec<{}>", mapped.rust_type),
                size: Size::Variable,
                extra_structs: mapped.extra_structs,
            })
        }
        Format::Empty {
            common_ref: Some(name),
        } => {
            let (rust_type, size) =
                common_refs
                    .get(name)
                    .cloned()
                    .ok_or_else(|| CodegenError::UnresolvedCommonRef {
                        field: path.to_string(),
                        name: name.clone(),
                    })?;
            Ok(MappedType {
                rust_type,
                size,
                extra_structs: Vec::new(),
            })
        }
        Format::Empty { common_ref: None } => Err(CodegenError::UnsupportedFormat {
            field: path.to_string(),
            format: "empty".to_string(),
            reason: "field has neither a concrete format nor a common-ref; \
                     no bytes would be read or written for it"
                .to_string(),
        }),
    }
}

fn scalar(rust_type: &str, width: usize) -> CodegenResult<MappedType> {
    Ok(MappedType {
        rust_type: rust_type.to_string(),
        size: Size::Fixed(width),
        extra_structs: Vec::new(),
    })
}

fn map_composite(
    path: &str,
    contents: &[Field],
    common_refs: &CommonRefSizes,
    name_hint: Option<&str>,
) -> CodegenResult<MappedType> {
    let mut fields = Vec::with_capacity(contents.len());
    let mut extra_structs = Vec::new();
    let mut size = Size::Fixed(0);

    for (index, content) in contents.iter().enumerate() {
        let schema_name = content
            .name
            .clone()
            .ok_or_else(|| CodegenError::UnnamedContent {
                field: path.to_string(),
                index,
            })?;
        let child_path = format!("{}.{}", path, schema_name);
        let mapped = map_field(&child_path, content, common_refs, None)?;
        extra_structs.extend(mapped.extra_structs);
        size = size.add(mapped.size);
        fields.push(StructField {
            rust_name: to_snake_case(&schema_name),
            rust_type: mapped.rust_type,
            schema_name,
            size: mapped.size,
        });
    }

    let struct_name = to_pascal_case(name_hint.unwrap_or(path));
    let def = StructDef {
        name: struct_name.clone(),
        fields,
        size,
        doc: None,
    };
    extra_structs.push(def);

    Ok(MappedType {
        rust_type: struct_name,
        size,
        extra_structs,
    })
}

/// Map every declared CommonRef's top-level payload, in schema declaration
/// order, seeding `CommonRefSizes` as we go so later CommonRefs (and every
/// Message) can resolve references to earlier ones.
pub fn map_common_refs(schema: &Schema) -> CodegenResult<(Vec<StructDef>, CommonRefSizes)> {
    let mut structs = Vec::new();
    let mut sizes = CommonRefSizes::new();

    for entity in &schema.entities {
        if let qmi_schema::Entity::CommonRef(def) = entity {
            let mapped = map_field(&def.name, &def.tlv.field, &sizes, Some(&def.name))?;
            structs.extend(mapped.extra_structs.clone());
            let top_name = mapped.rust_type.clone();
            sizes.insert(def.name.clone(), (top_name, mapped.size));
        }
    }

    Ok((structs, sizes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use qmi_schema::Format;

    fn scalar_field(name: &str, format: Format) -> Field {
        Field {
            name: Some(name.to_string()),
            format,
            public_format: None,
        }
    }

    #[test]
    fn maps_scalars_to_fixed_width_types() {
        let common = CommonRefSizes::new();
        let f = scalar_field("Status", Format::Uint16);
        let mapped = map_field("m.Status", &f, &common, None).unwrap();
        assert_eq!(mapped.rust_type, "u16");
        assert_eq!(mapped.size, Size::Fixed(2));
    }

    #[test]
    fn string_is_variable() {
        let common = CommonRefSizes::new();
        let f = scalar_field("Name", Format::String);
        let mapped = map_field("m.Name", &f, &common, None).unwrap();
        assert_eq!(mapped.rust_type, "String");
        assert_eq!(mapped.size, Size::Variable);
    }

    #[test]
    fn struct_of_all_fixed_fields_is_fixed() {
        let common = CommonRefSizes::new();
        let contents = vec![
            scalar_field("Status", Format::Uint16),
            scalar_field("Error", Format::Uint16),
        ];
        let f = Field {
            name: Some("Operation Result".to_string()),
            format: Format::Struct { contents },
            public_format: None,
        };
        let mapped = map_field("Msg.OperationResult", &f, &common, None).unwrap();
        assert_eq!(mapped.size, Size::Fixed(4));
        assert_eq!(mapped.extra_structs.len(), 1);
        assert_eq!(mapped.extra_structs[0].fields.len(), 2);
    }

    #[test]
    fn array_is_always_variable() {
        let common = CommonRefSizes::new();
        let element = Box::new(scalar_field("Entry", Format::Uint8));
        let f = Field {
            name: Some("Entries".to_string()),
            format: Format::Array { element },
            public_format: None,
        };
        let mapped = map_field("Msg.Entries", &f, &common, None).unwrap();
        assert_eq!(mapped.rust_type, "Vec<u8>");
        assert_eq!(mapped.size, Size::Variable);
    }

    #[test]
    fn empty_without_common_ref_is_unsupported() {
        let common = CommonRefSizes::new();
        let f = Field {
            name: Some("Mystery".to_string()),
            format: Format::Empty { common_ref: None },
            public_format: None,
        };
        assert!(matches!(
            map_field("Msg.Mystery", &f, &common, None),
            Err(CodegenError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn empty_with_common_ref_resolves_from_table() {
        let mut common = CommonRefSizes::new();
        common.insert("LinkFlags".to_string(), ("LinkFlags".to_string(), Size::Fixed(1)));
        let f = Field {
            name: Some("Flags".to_string()),
            format: Format::Empty {
                common_ref: Some("LinkFlags".to_string()),
            },
            public_format: None,
        };
        let mapped = map_field("Msg.Flags", &f, &common, None).unwrap();
        assert_eq!(mapped.rust_type, "LinkFlags");
        assert_eq!(mapped.size, Size::Fixed(1));
    }
}
