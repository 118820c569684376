//! Definition-time process types.
//!
//! A `NodeSpec` describes one step of a process definition: its name, a
//! description, the names of its predecessor and successor nodes, and a
//! `NodeKind` behavior variant. Node specs are built once, validated, and
//! never mutated while workflows execute against them.
//!
//! `Form` and its nested value objects describe the data a `UserTask`
//! collects from a human. They are pure values: everything in them is a
//! string or a list, so they serialize to primitive mappings without any
//! opaque payloads.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// NodeSpec
// ---------------------------------------------------------------------------

/// Immutable definition-time description of one process step.
///
/// Identity is the `name`, unique within the owning `ProcessSpec`. Edges are
/// stored as ordered name lists on both ends so that a spec round-trips
/// through the serializer without an auxiliary edge table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Unique name within the owning process spec.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Names of predecessor nodes, in connection order.
    #[serde(default)]
    pub incoming: Vec<String>,
    /// Names of successor nodes, in connection order.
    #[serde(default)]
    pub outgoing: Vec<String>,
    /// Behavior variant.
    pub kind: NodeKind,
}

impl NodeSpec {
    /// Create a pass-through step.
    pub fn simple(name: impl Into<String>) -> Self {
        Self::with_kind(name, NodeKind::Simple)
    }

    /// Create a control-flow synchronization point.
    pub fn join(name: impl Into<String>) -> Self {
        Self::with_kind(name, NodeKind::Join)
    }

    /// Create a synchronization point that also reconciles branch data.
    pub fn merge(name: impl Into<String>) -> Self {
        Self::with_kind(name, NodeKind::Merge)
    }

    /// Create a human-facing step that suspends its branch until the host
    /// supplies data for the given form.
    pub fn user_task(name: impl Into<String>, form: Form) -> Self {
        Self::with_kind(name, NodeKind::UserTask { form })
    }

    fn with_kind(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            incoming: Vec::new(),
            outgoing: Vec::new(),
            kind,
        }
    }

    /// Attach a description, builder-style.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// True for the variants that synchronize converging branches.
    pub fn is_join_family(&self) -> bool {
        matches!(self.kind, NodeKind::Join | NodeKind::Merge)
    }
}

/// The behavior variant of a node spec.
///
/// Variants compose rather than subclass: `Merge` reuses `Join`'s
/// synchronization in the engine and layers data reconciliation on top.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    /// Pass-through step with no special behavior.
    Simple,
    /// Synchronizes converging branches; control flow only.
    Join,
    /// Synchronizes converging branches and unions their data on firing.
    Merge,
    /// Suspends the branch until a human completes the attached form.
    UserTask { form: Form },
}

impl NodeKind {
    /// Stable discriminator string, shared with the serializer registry.
    pub fn discriminator(&self) -> &'static str {
        match self {
            NodeKind::Simple => "simple",
            NodeKind::Join => "join",
            NodeKind::Merge => "merge",
            NodeKind::UserTask { .. } => "user_task",
        }
    }
}

// ---------------------------------------------------------------------------
// Form value objects
// ---------------------------------------------------------------------------

/// The form attached to a `UserTask` node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Form {
    /// Form key, referencing the rendering definition on the host side.
    pub key: String,
    /// Fields in display order.
    #[serde(default)]
    pub fields: Vec<FormField>,
}

impl Form {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            fields: Vec::new(),
        }
    }

    /// Append a field, builder-style.
    pub fn with_field(mut self, field: FormField) -> Self {
        self.fields.push(field);
        self
    }
}

/// One input field of a form.
///
/// `options` is meaningful only when `field_type` is `"enum"`; for every
/// other type tag it stays empty and is omitted from the serialized form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormField {
    pub id: String,
    /// Default value, preloaded into the task data when no input arrives.
    #[serde(default)]
    pub default_value: Option<String>,
    pub label: String,
    /// Type tag ("string", "long", "boolean", "date", "enum", ...).
    #[serde(rename = "type")]
    pub field_type: String,
    /// Renderer hints and other host-interpreted key/values.
    #[serde(default)]
    pub properties: Vec<FieldProperty>,
    /// Validation rules. The engine interprets only `required`; everything
    /// else is opaque host data.
    #[serde(default)]
    pub validation: Vec<FieldValidation>,
    /// Choices for `"enum"` fields.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<FieldOption>,
}

impl FormField {
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        field_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            default_value: None,
            label: label.into(),
            field_type: field_type.into(),
            properties: Vec::new(),
            validation: Vec::new(),
            options: Vec::new(),
        }
    }

    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn with_property(mut self, id: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.push(FieldProperty {
            id: id.into(),
            value: value.into(),
        });
        self
    }

    pub fn with_validation(mut self, name: impl Into<String>, config: impl Into<String>) -> Self {
        self.validation.push(FieldValidation {
            name: name.into(),
            config: config.into(),
        });
        self
    }

    pub fn with_option(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.options.push(FieldOption {
            id: id.into(),
            name: name.into(),
        });
        self
    }

    /// True if this field carries a `required` validation rule.
    pub fn is_required(&self) -> bool {
        self.validation.iter().any(|v| v.name == "required")
    }
}

/// A renderer hint attached to a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldProperty {
    pub id: String,
    pub value: String,
}

/// A validation rule attached to a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValidation {
    pub name: String,
    pub config: String,
}

/// One choice of an `"enum"` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldOption {
    pub id: String,
    pub name: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discriminators_are_stable() {
        assert_eq!(NodeSpec::simple("a").kind.discriminator(), "simple");
        assert_eq!(NodeSpec::join("a").kind.discriminator(), "join");
        assert_eq!(NodeSpec::merge("a").kind.discriminator(), "merge");
        let ut = NodeSpec::user_task("a", Form::new("f"));
        assert_eq!(ut.kind.discriminator(), "user_task");
    }

    #[test]
    fn join_family_classification() {
        assert!(NodeSpec::join("j").is_join_family());
        assert!(NodeSpec::merge("m").is_join_family());
        assert!(!NodeSpec::simple("s").is_join_family());
        assert!(!NodeSpec::user_task("u", Form::new("f")).is_join_family());
    }

    #[test]
    fn field_builder_accumulates() {
        let field = FormField::new("color", "Pick a color", "enum")
            .with_default("red")
            .with_property("group", "appearance")
            .with_validation("required", "true")
            .with_option("red", "Red")
            .with_option("blue", "Blue");

        assert_eq!(field.default_value.as_deref(), Some("red"));
        assert_eq!(field.properties.len(), 1);
        assert_eq!(field.validation.len(), 1);
        assert_eq!(field.options.len(), 2);
        assert!(field.is_required());
    }

    #[test]
    fn non_enum_field_omits_options_in_json() {
        let field = FormField::new("age", "Age", "long");
        let value = serde_json::to_value(&field).unwrap();
        assert!(value.get("options").is_none());
    }

    #[test]
    fn required_detection_ignores_other_rules() {
        let field = FormField::new("name", "Name", "string").with_validation("max-length", "20");
        assert!(!field.is_required());
    }
}
