//! Envelope and per-variant node spec converters.
//!
//! Every variant shares a common envelope (`typename`, `name`,
//! `description`, `incoming`, `outgoing`); variant-specific fields are
//! appended after it. Decoding builds nested value objects innermost-first
//! (option -> field -> form) because `NodeSpec` consumes finished value
//! objects rather than patching references afterwards.

use serde_json::{Map, Value, json};
use sluice_types::process::{
    FieldOption, FieldProperty, FieldValidation, Form, FormField, NodeKind, NodeSpec,
};

use super::registry::{
    SerializerError, require, require_array, require_object, require_str, string_list,
};

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

fn encode_envelope(spec: &NodeSpec) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("typename".into(), json!(spec.kind.discriminator()));
    map.insert("name".into(), json!(spec.name));
    map.insert("description".into(), json!(spec.description));
    map.insert("incoming".into(), json!(spec.incoming));
    map.insert("outgoing".into(), json!(spec.outgoing));
    map
}

fn decode_envelope(
    map: &Map<String, Value>,
    kind: NodeKind,
) -> Result<NodeSpec, SerializerError> {
    Ok(NodeSpec {
        name: require_str(map, "name", "node spec")?.to_string(),
        description: require_str(map, "description", "node spec")?.to_string(),
        incoming: string_list(map, "incoming", "node spec")?,
        outgoing: string_list(map, "outgoing", "node spec")?,
        kind,
    })
}

// ---------------------------------------------------------------------------
// Envelope-only variants
// ---------------------------------------------------------------------------

pub(crate) fn encode_simple(spec: &NodeSpec) -> Result<Map<String, Value>, SerializerError> {
    Ok(encode_envelope(spec))
}

pub(crate) fn decode_simple(map: &Map<String, Value>) -> Result<NodeSpec, SerializerError> {
    decode_envelope(map, NodeKind::Simple)
}

pub(crate) fn encode_join(spec: &NodeSpec) -> Result<Map<String, Value>, SerializerError> {
    Ok(encode_envelope(spec))
}

pub(crate) fn decode_join(map: &Map<String, Value>) -> Result<NodeSpec, SerializerError> {
    decode_envelope(map, NodeKind::Join)
}

pub(crate) fn encode_merge(spec: &NodeSpec) -> Result<Map<String, Value>, SerializerError> {
    Ok(encode_envelope(spec))
}

pub(crate) fn decode_merge(map: &Map<String, Value>) -> Result<NodeSpec, SerializerError> {
    decode_envelope(map, NodeKind::Merge)
}

// ---------------------------------------------------------------------------
// UserTask
// ---------------------------------------------------------------------------

pub(crate) fn encode_user_task(spec: &NodeSpec) -> Result<Map<String, Value>, SerializerError> {
    let NodeKind::UserTask { form } = &spec.kind else {
        return Err(SerializerError::InvalidField {
            field: "typename",
            context: "user task",
            reason: "node spec is not a user task".to_string(),
        });
    };
    let mut map = encode_envelope(spec);
    map.insert("form".into(), form_to_value(form));
    Ok(map)
}

pub(crate) fn decode_user_task(map: &Map<String, Value>) -> Result<NodeSpec, SerializerError> {
    let form = form_from_value(require_object(map, "form", "user task")?)?;
    decode_envelope(map, NodeKind::UserTask { form })
}

fn form_to_value(form: &Form) -> Value {
    let fields: Vec<Value> = form
        .fields
        .iter()
        .map(|field| {
            let mut map = Map::new();
            map.insert("id".into(), json!(field.id));
            map.insert("default_value".into(), json!(field.default_value));
            map.insert("label".into(), json!(field.label));
            map.insert("type".into(), json!(field.field_type));
            map.insert(
                "properties".into(),
                Value::Array(
                    field
                        .properties
                        .iter()
                        .map(|p| json!({"id": p.id, "value": p.value}))
                        .collect(),
                ),
            );
            map.insert(
                "validation".into(),
                Value::Array(
                    field
                        .validation
                        .iter()
                        .map(|v| json!({"name": v.name, "config": v.config}))
                        .collect(),
                ),
            );
            if field.field_type == "enum" {
                map.insert(
                    "options".into(),
                    Value::Array(
                        field
                            .options
                            .iter()
                            .map(|o| json!({"id": o.id, "name": o.name}))
                            .collect(),
                    ),
                );
            }
            Value::Object(map)
        })
        .collect();

    json!({"key": form.key, "fields": fields})
}

fn form_from_value(map: &Map<String, Value>) -> Result<Form, SerializerError> {
    let mut fields = Vec::new();
    for value in require_array(map, "fields", "form")? {
        let field_map = value.as_object().ok_or(SerializerError::InvalidField {
            field: "fields",
            context: "form",
            reason: "expected an array of mappings".to_string(),
        })?;
        fields.push(field_from_value(field_map)?);
    }
    Ok(Form {
        key: require_str(map, "key", "form")?.to_string(),
        fields,
    })
}

fn field_from_value(map: &Map<String, Value>) -> Result<FormField, SerializerError> {
    let field_type = require_str(map, "type", "form field")?.to_string();

    // Innermost first: options, then properties and validation rules, then
    // the field that owns them.
    let options = if field_type == "enum" {
        require_array(map, "options", "form field")?
            .iter()
            .map(|v| {
                let o = v.as_object().ok_or(SerializerError::InvalidField {
                    field: "options",
                    context: "form field",
                    reason: "expected an array of mappings".to_string(),
                })?;
                Ok(FieldOption {
                    id: require_str(o, "id", "field option")?.to_string(),
                    name: require_str(o, "name", "field option")?.to_string(),
                })
            })
            .collect::<Result<Vec<_>, SerializerError>>()?
    } else {
        Vec::new()
    };

    let properties = require_array(map, "properties", "form field")?
        .iter()
        .map(|v| {
            let p = v.as_object().ok_or(SerializerError::InvalidField {
                field: "properties",
                context: "form field",
                reason: "expected an array of mappings".to_string(),
            })?;
            Ok(FieldProperty {
                id: require_str(p, "id", "field property")?.to_string(),
                value: require_str(p, "value", "field property")?.to_string(),
            })
        })
        .collect::<Result<Vec<_>, SerializerError>>()?;

    let validation = require_array(map, "validation", "form field")?
        .iter()
        .map(|v| {
            let r = v.as_object().ok_or(SerializerError::InvalidField {
                field: "validation",
                context: "form field",
                reason: "expected an array of mappings".to_string(),
            })?;
            Ok(FieldValidation {
                name: require_str(r, "name", "validation rule")?.to_string(),
                config: require_str(r, "config", "validation rule")?.to_string(),
            })
        })
        .collect::<Result<Vec<_>, SerializerError>>()?;

    let default_value = match require(map, "default_value", "form field")? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        _ => {
            return Err(SerializerError::InvalidField {
                field: "default_value",
                context: "form field",
                reason: "expected a string or null".to_string(),
            });
        }
    };

    Ok(FormField {
        id: require_str(map, "id", "form field")?.to_string(),
        default_value,
        label: require_str(map, "label", "form field")?.to_string(),
        field_type,
        properties,
        validation,
        options,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::ConverterRegistry;

    fn wired(mut spec: NodeSpec) -> NodeSpec {
        spec.description = "a step".to_string();
        spec.incoming = vec!["up1".to_string(), "up2".to_string()];
        spec.outgoing = vec!["down".to_string()];
        spec
    }

    fn full_user_task() -> NodeSpec {
        let form = Form::new("review-form")
            .with_field(
                FormField::new("summary", "Summary", "string")
                    .with_default("n/a")
                    .with_property("rows", "4")
                    .with_validation("required", "true")
                    .with_validation("max-length", "200"),
            )
            .with_field(
                FormField::new("verdict", "Verdict", "enum")
                    .with_option("approve", "Approve")
                    .with_option("reject", "Reject"),
            );
        wired(NodeSpec::user_task("review", form))
    }

    #[test]
    fn every_variant_round_trips_by_value() {
        let registry = ConverterRegistry::standard();
        let specs = vec![
            wired(NodeSpec::simple("s")),
            wired(NodeSpec::join("j")),
            wired(NodeSpec::merge("m")),
            full_user_task(),
        ];
        for spec in specs {
            let mapping = registry.encode_node(&spec).unwrap();
            let decoded = registry.decode_node(&mapping).unwrap();
            assert_eq!(decoded, spec, "variant '{}'", spec.kind.discriminator());
        }
    }

    #[test]
    fn encode_decode_encode_is_identity_on_mappings() {
        let registry = ConverterRegistry::standard();
        for spec in [
            wired(NodeSpec::simple("s")),
            wired(NodeSpec::join("j")),
            wired(NodeSpec::merge("m")),
            full_user_task(),
        ] {
            let mapping = registry.encode_node(&spec).unwrap();
            let again = registry
                .encode_node(&registry.decode_node(&mapping).unwrap())
                .unwrap();
            assert_eq!(again, mapping);
        }
    }

    #[test]
    fn envelope_carries_edges_in_order() {
        let registry = ConverterRegistry::standard();
        let mapping = registry.encode_node(&wired(NodeSpec::simple("s"))).unwrap();
        assert_eq!(mapping["typename"], "simple");
        assert_eq!(mapping["incoming"], json!(["up1", "up2"]));
        assert_eq!(mapping["outgoing"], json!(["down"]));
    }

    #[test]
    fn enum_field_keeps_options_others_omit_them() {
        let registry = ConverterRegistry::standard();
        let mapping = registry.encode_node(&full_user_task()).unwrap();
        let fields = mapping["form"]["fields"].as_array().unwrap();

        let summary = &fields[0];
        assert_eq!(summary["type"], "string");
        assert!(summary.get("options").is_none());

        let verdict = &fields[1];
        assert_eq!(verdict["type"], "enum");
        assert_eq!(verdict["options"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn missing_form_field_attribute_fails_closed() {
        let registry = ConverterRegistry::standard();
        let mut mapping = registry.encode_node(&full_user_task()).unwrap();
        // Strip the label from the first field.
        mapping["form"]["fields"][0]
            .as_object_mut()
            .unwrap()
            .remove("label");

        let err = registry.decode_node(&mapping).unwrap_err();
        assert!(matches!(
            err,
            SerializerError::MissingField { field: "label", .. }
        ));
    }

    #[test]
    fn enum_field_without_options_fails_closed() {
        let registry = ConverterRegistry::standard();
        let mut mapping = registry.encode_node(&full_user_task()).unwrap();
        mapping["form"]["fields"][1]
            .as_object_mut()
            .unwrap()
            .remove("options");

        let err = registry.decode_node(&mapping).unwrap_err();
        assert!(matches!(
            err,
            SerializerError::MissingField { field: "options", .. }
        ));
    }
}
