//! The converter registry: discriminator string to (encode, decode) pair.
//!
//! The registry is static and process-wide: `ConverterRegistry::standard()`
//! populates it exactly once behind a `OnceLock` and hands out a shared
//! reference forever after. Nothing mutates it at runtime, which is what
//! makes `encode`/`decode` safe to call from anywhere without coordination.

use std::collections::HashMap;
use std::sync::OnceLock;

use serde_json::{Map, Value};
use sluice_types::process::NodeSpec;
use thiserror::Error;

use super::node;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors raised while encoding or decoding engine state.
///
/// Decoding fails closed: no partial object is ever constructed.
#[derive(Debug, Error)]
pub enum SerializerError {
    /// The discriminator has no registered converter.
    #[error("no converter registered for type '{0}'")]
    UnknownType(String),

    /// A mapping lacks a field the converter requires.
    #[error("missing field '{field}' while decoding {context}")]
    MissingField {
        field: &'static str,
        context: &'static str,
    },

    /// A field is present but has the wrong shape.
    #[error("invalid field '{field}' while decoding {context}: {reason}")]
    InvalidField {
        field: &'static str,
        context: &'static str,
        reason: String,
    },

    /// The decoded parts do not assemble into a valid workflow.
    #[error("decoded workflow is invalid: {0}")]
    InvalidWorkflow(String),
}

// ---------------------------------------------------------------------------
// ConverterRegistry
// ---------------------------------------------------------------------------

/// An (encode, decode) pair for one node spec variant.
///
/// Plain function pointers: converters carry no state, the registry is the
/// only lookup structure.
#[derive(Clone, Copy)]
pub struct NodeConverter {
    pub encode: fn(&NodeSpec) -> Result<Map<String, Value>, SerializerError>,
    pub decode: fn(&Map<String, Value>) -> Result<NodeSpec, SerializerError>,
}

/// Static mapping from discriminator strings to converters.
pub struct ConverterRegistry {
    converters: HashMap<&'static str, NodeConverter>,
}

impl ConverterRegistry {
    /// The process-wide registry with every built-in variant registered.
    pub fn standard() -> &'static ConverterRegistry {
        static REGISTRY: OnceLock<ConverterRegistry> = OnceLock::new();
        REGISTRY.get_or_init(|| {
            let mut registry = ConverterRegistry {
                converters: HashMap::new(),
            };
            registry.register(
                "simple",
                NodeConverter {
                    encode: node::encode_simple,
                    decode: node::decode_simple,
                },
            );
            registry.register(
                "join",
                NodeConverter {
                    encode: node::encode_join,
                    decode: node::decode_join,
                },
            );
            registry.register(
                "merge",
                NodeConverter {
                    encode: node::encode_merge,
                    decode: node::decode_merge,
                },
            );
            registry.register(
                "user_task",
                NodeConverter {
                    encode: node::encode_user_task,
                    decode: node::decode_user_task,
                },
            );
            registry
        })
    }

    fn register(&mut self, discriminator: &'static str, converter: NodeConverter) {
        self.converters.insert(discriminator, converter);
    }

    /// Discriminators with a registered converter, for diagnostics.
    pub fn registered(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.converters.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Encode a node spec to its portable mapping.
    pub fn encode_node(&self, spec: &NodeSpec) -> Result<Value, SerializerError> {
        let discriminator = spec.kind.discriminator();
        let converter = self
            .converters
            .get(discriminator)
            .ok_or_else(|| SerializerError::UnknownType(discriminator.to_string()))?;
        Ok(Value::Object((converter.encode)(spec)?))
    }

    /// Decode a portable mapping back into a node spec.
    ///
    /// Dispatches on the `typename` discriminator; an unregistered value
    /// fails with `UnknownType` before anything is built.
    pub fn decode_node(&self, value: &Value) -> Result<NodeSpec, SerializerError> {
        let map = value
            .as_object()
            .ok_or(SerializerError::MissingField {
                field: "typename",
                context: "node spec",
            })?;
        let discriminator = require_str(map, "typename", "node spec")?;
        let converter = self
            .converters
            .get(discriminator)
            .ok_or_else(|| SerializerError::UnknownType(discriminator.to_string()))?;
        (converter.decode)(map)
    }
}

// ---------------------------------------------------------------------------
// Decode helpers (shared by node and workflow converters)
// ---------------------------------------------------------------------------

pub(crate) fn require<'a>(
    map: &'a Map<String, Value>,
    field: &'static str,
    context: &'static str,
) -> Result<&'a Value, SerializerError> {
    map.get(field)
        .ok_or(SerializerError::MissingField { field, context })
}

pub(crate) fn require_str<'a>(
    map: &'a Map<String, Value>,
    field: &'static str,
    context: &'static str,
) -> Result<&'a str, SerializerError> {
    require(map, field, context)?
        .as_str()
        .ok_or_else(|| SerializerError::InvalidField {
            field,
            context,
            reason: "expected a string".to_string(),
        })
}

pub(crate) fn require_array<'a>(
    map: &'a Map<String, Value>,
    field: &'static str,
    context: &'static str,
) -> Result<&'a Vec<Value>, SerializerError> {
    require(map, field, context)?
        .as_array()
        .ok_or_else(|| SerializerError::InvalidField {
            field,
            context,
            reason: "expected an array".to_string(),
        })
}

pub(crate) fn require_object<'a>(
    map: &'a Map<String, Value>,
    field: &'static str,
    context: &'static str,
) -> Result<&'a Map<String, Value>, SerializerError> {
    require(map, field, context)?
        .as_object()
        .ok_or_else(|| SerializerError::InvalidField {
            field,
            context,
            reason: "expected a mapping".to_string(),
        })
}

/// Decode an array of name strings (envelope incoming/outgoing lists).
pub(crate) fn string_list(
    map: &Map<String, Value>,
    field: &'static str,
    context: &'static str,
) -> Result<Vec<String>, SerializerError> {
    require_array(map, field, context)?
        .iter()
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| SerializerError::InvalidField {
                    field,
                    context,
                    reason: "expected an array of strings".to_string(),
                })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn standard_registry_has_all_builtin_variants() {
        let registry = ConverterRegistry::standard();
        assert_eq!(
            registry.registered(),
            vec!["join", "merge", "simple", "user_task"]
        );
    }

    #[test]
    fn standard_registry_is_one_instance() {
        let a = ConverterRegistry::standard() as *const ConverterRegistry;
        let b = ConverterRegistry::standard() as *const ConverterRegistry;
        assert_eq!(a, b);
    }

    #[test]
    fn unknown_discriminator_fails_closed() {
        let registry = ConverterRegistry::standard();
        let mapping = json!({
            "typename": "alien",
            "name": "x",
            "description": "",
            "incoming": [],
            "outgoing": [],
        });
        let err = registry.decode_node(&mapping).unwrap_err();
        assert!(matches!(err, SerializerError::UnknownType(t) if t == "alien"));
    }

    #[test]
    fn non_mapping_input_is_rejected() {
        let registry = ConverterRegistry::standard();
        let err = registry.decode_node(&json!([1, 2, 3])).unwrap_err();
        assert!(matches!(err, SerializerError::MissingField { .. }));
    }

    #[test]
    fn missing_typename_is_rejected() {
        let registry = ConverterRegistry::standard();
        let err = registry.decode_node(&json!({"name": "x"})).unwrap_err();
        assert!(matches!(
            err,
            SerializerError::MissingField { field: "typename", .. }
        ));
    }
}
