//! In-memory schema model
//!
//! A [`Schema`] is the immutable result of loading one schema document
//! (§3 of the design). Construction happens once, in [`crate::load`]; nothing
//! here mutates after that point — the same discipline the teacher's TLV
//! type registry follows for its `TLVType` enum (static, inspectable, never
//! rebuilt at runtime).

use std::collections::HashMap;

/// A fully parsed, validated schema document: an ordered sequence of entities
/// plus the CommonRef table entities were routed into during load.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    pub entities: Vec<Entity>,
    pub common_refs: HashMap<String, CommonRefDef>,
}

impl Schema {
    pub fn services(&self) -> impl Iterator<Item = &ServiceDef> {
        self.entities.iter().filter_map(|e| match e {
            Entity::Service(s) => Some(s),
            _ => None,
        })
    }

    pub fn messages(&self) -> impl Iterator<Item = &MessageDef> {
        self.entities.iter().filter_map(|e| match e {
            Entity::Message(m) => Some(m),
            _ => None,
        })
    }

    pub fn indications(&self) -> impl Iterator<Item = &IndicationDef> {
        self.entities.iter().filter_map(|e| match e {
            Entity::Indication(i) => Some(i),
            _ => None,
        })
    }

    pub fn find_service(&self, name: &str) -> Option<&ServiceDef> {
        self.services().find(|s| s.name == name)
    }
}

/// One entity parsed from the schema document
#[derive(Debug, Clone)]
pub enum Entity {
    Service(ServiceDef),
    Message(MessageDef),
    Indication(IndicationDef),
    /// A reusable field group registered under a name; the entity still
    /// occupies a slot in declaration order even though it is routed into
    /// `Schema::common_refs` rather than emitted inline.
    CommonRef(CommonRefDef),
    /// Message-ID-Enum, Indication-ID-Enum, prerequisite, and Client markers:
    /// carried for completeness, influence no generated code.
    Passive(PassiveMarker),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDef {
    pub id: u8,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct MessageDef {
    pub name: String,
    pub service: String,
    pub id: u16,
    pub input: Vec<Tlv>,
    pub output: Vec<Tlv>,
}

#[derive(Debug, Clone)]
pub struct IndicationDef {
    pub name: String,
    pub service: String,
    pub id: u16,
    pub output: Vec<Tlv>,
}

#[derive(Debug, Clone)]
pub struct CommonRefDef {
    pub name: String,
    pub tlv: Tlv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassiveKind {
    MessageIdEnum,
    IndicationIdEnum,
    Prerequisite,
    Client,
}

#[derive(Debug, Clone)]
pub struct PassiveMarker {
    pub kind: PassiveKind,
    pub name: String,
}

/// The tag id defaulted onto a TLV with no explicit `id` — the canonical
/// Operation Result slot (§3 invariant iv, §4.3 design note).
pub const DEFAULT_TAG_OPERATION_RESULT: u8 = 2;

/// One TLV: tag id, optional name, and the field tree describing its payload
#[derive(Debug, Clone)]
pub struct Tlv {
    pub tag: u8,
    pub name: Option<String>,
    pub field: Field,
}

/// One field in a field tree. Top-level TLV fields and nested struct/sequence
/// members share this shape.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: Option<String>,
    pub format: Format,
    /// Present when the schema carries a `public-format` key; the codec
    /// synthesizer ignores it entirely (§3) but the emitter may surface it
    /// as a doc comment for the generated accessor.
    pub public_format: Option<String>,
}

/// The closed set of field formats the mapper must handle (§3)
#[derive(Debug, Clone)]
pub enum Format {
    Int8,
    Uint8,
    Byte,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Uint64,
    Int64,
    String,
    GuintSized { int_size: usize },
    Struct { contents: Vec<Field> },
    Sequence { contents: Vec<Field> },
    Array { element: Box<Field> },
    /// Marker for a CommonRef reference with no inline payload, or (if
    /// `common_ref` is `None`) a malformed field the type mapper must reject
    /// as `UnsupportedFormat` (§9 design note, Open Question).
    Empty { common_ref: Option<String> },
}

impl Format {
    pub fn name(&self) -> &'static str {
        match self {
            Format::Int8 => "int8",
            Format::Uint8 => "uint8",
            Format::Byte => "byte",
            Format::Int16 => "int16",
            Format::Uint16 => "uint16",
            Format::Int32 => "int32",
            Format::Uint32 => "uint32",
            Format::Uint64 => "uint64",
            Format::Int64 => "int64",
            Format::String => "string",
            Format::GuintSized { .. } => "guint-sized",
            Format::Struct { .. } => "struct",
            Format::Sequence { .. } => "sequence",
            Format::Array { .. } => "array",
            Format::Empty { .. } => "empty",
        }
    }
}
