//! Cross-document loading (§6): a service schema's `common-ref` fields must
//! resolve against definitions declared in a separately-authored common
//! schema, once the two are merged by `load_with_common`. This is the one
//! behavior in this crate that is inherently about *two* documents rather
//! than one, so it lives here instead of inline in `loader.rs`.

use qmi_schema::{Format, PassiveKind};

const COMMON: &str = r#"[
    {"type": "Service", "name": "CTL", "id": "0x00"},
    {"type": "Service", "name": "DMS", "id": "0x02"},
    {
        "type": "TLV",
        "common-ref": "ByteRange",
        "name": "Byte Range",
        "format": "struct",
        "contents": [
            {"name": "Low", "format": "uint8"},
            {"name": "High", "format": "uint8"}
        ]
    }
]"#;

const SERVICE: &str = r#"[
    {
        "type": "Message", "name": "SetEventReport", "service": "DMS", "id": "0x0001",
        "input": [
            {"id": 16, "name": "Signal Strength Range", "common-ref": "ByteRange"}
        ],
        "output": [
            {"id": 2, "name": "Operation Result", "format": "struct", "contents": [
                {"name": "Status", "format": "uint16"},
                {"name": "Error", "format": "uint16"}
            ]}
        ]
    }
]"#;

#[test]
fn service_document_resolves_common_refs_declared_in_the_common_document() {
    let schema = qmi_schema::load_with_common(COMMON, SERVICE).expect("merge should validate");

    assert!(schema.find_service("DMS").is_some());
    assert!(schema.common_refs.contains_key("ByteRange"));

    let message = schema
        .messages()
        .find(|m| m.name == "SetEventReport")
        .expect("message from the service document should be present");

    let field = &message.input[0].field;
    match &field.format {
        Format::Empty { common_ref } => {
            assert_eq!(common_ref.as_deref(), Some("ByteRange"));
        }
        other => panic!("expected an unresolved common-ref marker, got {:?}", other.name()),
    }
}

#[test]
fn loading_the_service_document_alone_fails_on_the_dangling_common_ref() {
    let err = qmi_schema::load(SERVICE).expect_err("ByteRange is not declared in this document");
    let message = err.to_string();
    assert!(
        message.contains("ByteRange"),
        "expected the dangling common-ref name in the error, got: {message}"
    );
}

#[test]
fn common_document_alone_carries_no_messages() {
    let schema = qmi_schema::load(COMMON).expect("the common document validates on its own");
    assert_eq!(schema.messages().count(), 0);
    assert_eq!(schema.services().count(), 2);
}

#[test]
fn passive_markers_survive_the_merge_without_affecting_validation() {
    let common_with_marker = r#"[
        {"type": "Service", "name": "CTL", "id": "0x00"},
        {"type": "Message-ID-Enum", "name": "ctl_message_id"}
    ]"#;
    let schema = qmi_schema::load_with_common(common_with_marker, "[]").unwrap();
    let marker = schema
        .entities
        .iter()
        .find_map(|e| match e {
            qmi_schema::Entity::Passive(p) => Some(p),
            _ => None,
        })
        .expect("Message-ID-Enum entity should parse as a passive marker");
    assert_eq!(marker.kind, PassiveKind::MessageIdEnum);
}
