//! Full workflow round-trips: spec plus task tree as one JSON document.
//!
//! Tasks are written in arena order, so parent/children/contributor
//! relations serialize as plain array positions. Ids are uuid strings and
//! timestamps are RFC 3339; the document carries everything needed to
//! resume the instance in a fresh process.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};
use sluice_types::task::TaskState;
use uuid::Uuid;

use crate::engine::process::ProcessSpec;
use crate::engine::workflow::{Task, Workflow};

use super::registry::{
    ConverterRegistry, SerializerError, require, require_array, require_object, require_str,
};

// ---------------------------------------------------------------------------
// Encode
// ---------------------------------------------------------------------------

/// Encode a workflow instance to its portable JSON document.
pub fn encode_workflow(workflow: &Workflow) -> Result<Value, SerializerError> {
    let registry = ConverterRegistry::standard();

    let nodes = workflow
        .spec()
        .nodes()
        .iter()
        .map(|node| registry.encode_node(node))
        .collect::<Result<Vec<_>, SerializerError>>()?;

    let tasks: Vec<Value> = workflow.tasks.iter().map(encode_task).collect();

    Ok(json!({
        "id": workflow.id.to_string(),
        "spec": {
            "name": workflow.spec().name(),
            "start": workflow.spec().start(),
            "nodes": nodes,
        },
        "tasks": tasks,
    }))
}

fn encode_task(task: &Task) -> Value {
    json!({
        "id": task.id.to_string(),
        "node": task.node,
        "state": task.state.to_string(),
        "data": task.data,
        "parent": task.parent,
        "children": task.children,
        "contributors": task.contributors,
        "round_split": task.round_split,
        "created_at": task.created_at.to_rfc3339(),
        "finished_at": task.finished_at.map(|t| t.to_rfc3339()),
    })
}

// ---------------------------------------------------------------------------
// Decode
// ---------------------------------------------------------------------------

/// Decode a portable JSON document back into a runnable workflow.
///
/// The spec is revalidated and every arena index is bounds-checked before
/// the instance is assembled; a corrupt document never yields a workflow.
pub fn decode_workflow(value: &Value) -> Result<Workflow, SerializerError> {
    let map = value.as_object().ok_or(SerializerError::MissingField {
        field: "id",
        context: "workflow",
    })?;
    let registry = ConverterRegistry::standard();

    let id = parse_uuid(require_str(map, "id", "workflow")?, "id", "workflow")?;

    let spec_map = require_object(map, "spec", "workflow")?;
    let nodes = require_array(spec_map, "nodes", "workflow spec")?
        .iter()
        .map(|node| registry.decode_node(node))
        .collect::<Result<Vec<_>, SerializerError>>()?;
    let spec = ProcessSpec::from_nodes(
        require_str(spec_map, "name", "workflow spec")?,
        require_str(spec_map, "start", "workflow spec")?,
        nodes,
    )
    .map_err(|e| SerializerError::InvalidWorkflow(e.to_string()))?;

    let task_values = require_array(map, "tasks", "workflow")?;
    let mut tasks = Vec::with_capacity(task_values.len());
    for value in task_values {
        let task_map = value.as_object().ok_or(SerializerError::InvalidField {
            field: "tasks",
            context: "workflow",
            reason: "expected an array of mappings".to_string(),
        })?;
        tasks.push(decode_task(task_map)?);
    }

    // Arena relations must point inside the arena.
    let len = tasks.len();
    for task in &tasks {
        let related = task
            .parent
            .iter()
            .chain(task.children.iter())
            .chain(task.contributors.iter())
            .chain(task.round_split.iter());
        for &idx in related {
            if idx >= len {
                return Err(SerializerError::InvalidWorkflow(format!(
                    "task '{}' references arena index {idx} out of {len}",
                    task.id
                )));
            }
        }
    }

    Workflow::from_parts(id, spec, tasks)
        .map_err(|e| SerializerError::InvalidWorkflow(e.to_string()))
}

fn decode_task(map: &Map<String, Value>) -> Result<Task, SerializerError> {
    let state: TaskState = serde_json::from_value(require(map, "state", "task")?.clone())
        .map_err(|e| SerializerError::InvalidField {
            field: "state",
            context: "task",
            reason: e.to_string(),
        })?;

    let data: HashMap<String, Value> = require_object(map, "data", "task")?
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let finished_at = match require(map, "finished_at", "task")? {
        Value::Null => None,
        value => Some(parse_timestamp(value, "finished_at")?),
    };

    Ok(Task {
        id: parse_uuid(require_str(map, "id", "task")?, "id", "task")?,
        node: require_str(map, "node", "task")?.to_string(),
        state,
        data,
        parent: optional_index(map, "parent")?,
        children: index_list(map, "children")?,
        contributors: index_list(map, "contributors")?,
        round_split: optional_index(map, "round_split")?,
        created_at: parse_timestamp(require(map, "created_at", "task")?, "created_at")?,
        finished_at,
    })
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

fn parse_uuid(
    raw: &str,
    field: &'static str,
    context: &'static str,
) -> Result<Uuid, SerializerError> {
    Uuid::parse_str(raw).map_err(|e| SerializerError::InvalidField {
        field,
        context,
        reason: e.to_string(),
    })
}

fn parse_timestamp(value: &Value, field: &'static str) -> Result<DateTime<Utc>, SerializerError> {
    let raw = value.as_str().ok_or(SerializerError::InvalidField {
        field,
        context: "task",
        reason: "expected an RFC 3339 string".to_string(),
    })?;
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| SerializerError::InvalidField {
            field,
            context: "task",
            reason: e.to_string(),
        })
}

fn optional_index(
    map: &Map<String, Value>,
    field: &'static str,
) -> Result<Option<usize>, SerializerError> {
    match require(map, field, "task")? {
        Value::Null => Ok(None),
        value => value
            .as_u64()
            .map(|i| Some(i as usize))
            .ok_or_else(|| SerializerError::InvalidField {
                field,
                context: "task",
                reason: "expected an array index or null".to_string(),
            }),
    }
}

fn index_list(map: &Map<String, Value>, field: &'static str) -> Result<Vec<usize>, SerializerError> {
    require_array(map, field, "task")?
        .iter()
        .map(|v| {
            v.as_u64()
                .map(|i| i as usize)
                .ok_or_else(|| SerializerError::InvalidField {
                    field,
                    context: "task",
                    reason: "expected an array of indices".to_string(),
                })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
