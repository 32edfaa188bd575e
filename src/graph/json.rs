//! Loading and saving task graphs from declarative JSON documents.
//!
//! The document format is open-world on task properties, so the loader works
//! on [`serde_json::Value`] trees rather than typed records: a property value
//! can be a primitive, an array of primitives, a nested task object
//! (recognized by its `plugin` key) or an arbitrary object the task
//! interprets itself.

use std::fs;
use std::path::Path;

use anyhow::Result;
use serde_json::{Map, Value};

use crate::graph::TaskGraph;
use crate::task::registry::PluginManager;
use crate::task::{PropertyValue, Task, TaskRole};
use crate::Error;

/*
 * ChangeLog:
 * - 1.1: Add "index" and "total" keys to the root object
 * - 2.0: Add "index" and "total" keys to the root object
 */
/// Version of the graph description format this crate reads and writes.
/// Documents with a different major version are rejected.
pub const JSON_API_VERSION: &str = "2.0";

impl TaskGraph {
    /// Read a JSON graph description file, instantiating nodes through
    /// `manager`.
    pub fn from_json_file(manager: &PluginManager, path: impl AsRef<Path>) -> Result<TaskGraph> {
        let data = fs::read_to_string(path).map_err(|e| Error::JsonKey(format!("Parsing JSON: {e}")))?;
        Self::from_json_str(manager, &data)
    }

    /// Read a JSON graph description from a string, instantiating nodes
    /// through `manager`.
    pub fn from_json_str(manager: &PluginManager, data: &str) -> Result<TaskGraph> {
        let root: Value = serde_json::from_str(data).map_err(|e| Error::JsonKey(format!("Parsing JSON: {e}")))?;
        Self::from_json_value(manager, &root)
    }

    /// Build a task graph from a parsed JSON document.
    pub fn from_json_value(manager: &PluginManager, root: &Value) -> Result<TaskGraph> {
        let object = root
            .as_object()
            .ok_or_else(|| Error::JsonKey("Graph description is not an object".into()))?;
        check_version(object)?;

        let mut graph = TaskGraph::new();

        if let (Some(index), Some(total)) = (object.get("index"), object.get("total")) {
            graph.set_partition(as_uint(index, "index")?, as_uint(total, "total")?)?;
        }

        let Some(nodes) = object.get("nodes") else { return Ok(graph) };
        let nodes = nodes
            .as_array()
            .ok_or_else(|| Error::JsonKey("`nodes` is not an array".into()))?;

        for node in nodes {
            let task = create_task_from_json(manager, node)?;
            let name = task.identifier().to_string();
            if graph.get(&name).is_some() {
                return Err(Error::JsonKey(format!("Duplicate name `{name}` found")).into());
            }
            graph.add_task(task)?;
        }

        // Edges only make sense once there are nodes.
        if let Some(edges) = object.get("edges") {
            let edges = edges
                .as_array()
                .ok_or_else(|| Error::JsonKey("`edges` is not an array".into()))?;
            for edge in edges {
                install_edge(&mut graph, edge)?;
            }
        }

        Ok(graph)
    }

    /// Serialize this graph to a JSON document.
    ///
    /// Remote placeholder tasks created by expansion are not serializable
    /// and are omitted together with their edges. Properties still holding
    /// their default value are omitted, so loading the result reproduces an
    /// equivalent graph.
    pub fn to_json_value(&self) -> Result<Value> {
        let tasks = self.tasks();
        let mut nodes = Vec::new();
        let mut edges = Vec::new();

        for task in &tasks {
            let guard = task.lock().map_err(Error::from)?;
            if guard.role() == TaskRole::Remote {
                continue;
            }
            nodes.push(Value::Object(task_to_json(&guard)?));
        }

        for task in &tasks {
            let from_name = {
                let guard = task.lock().map_err(Error::from)?;
                if guard.role() == TaskRole::Remote {
                    continue;
                }
                guard.identifier().to_string()
            };
            for (consumer, input) in self.outgoing_edges(task)? {
                let guard = consumer.lock().map_err(Error::from)?;
                if guard.role() == TaskRole::Remote {
                    continue;
                }
                let mut from = Map::new();
                from.insert("name".into(), Value::String(from_name.clone()));
                let mut to = Map::new();
                to.insert("name".into(), Value::String(guard.identifier().to_string()));
                to.insert("input".into(), Value::Number(input.into()));
                let mut edge = Map::new();
                edge.insert("from".into(), Value::Object(from));
                edge.insert("to".into(), Value::Object(to));
                edges.push(Value::Object(edge));
            }
        }

        let (index, total) = self.get_partition();
        let mut root = Map::new();
        root.insert("version".into(), Value::String(JSON_API_VERSION.into()));
        root.insert("index".into(), Value::Number(index.into()));
        root.insert("total".into(), Value::Number(total.into()));
        root.insert("nodes".into(), Value::Array(nodes));
        root.insert("edges".into(), Value::Array(edges));
        Ok(Value::Object(root))
    }

    /// Serialize this graph to a JSON string.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_json_value()?)?)
    }

    /// Write the JSON representation of this graph to a file.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.to_json_value()?)?;
        fs::write(path, json)?;
        Ok(())
    }
}

fn check_version(object: &Map<String, Value>) -> Result<()> {
    // An absent version is treated as the current format.
    let Some(version) = object.get("version") else { return Ok(()) };
    let version = version
        .as_str()
        .ok_or_else(|| Error::JsonKey("`version` is not a string".into()))?;
    let major = version.split('.').next().unwrap_or(version);
    let current_major = JSON_API_VERSION.split('.').next().unwrap();
    if major != current_major {
        return Err(Error::JsonKey(format!("Unsupported graph description version `{version}`")).into());
    }
    Ok(())
}

fn as_uint(value: &Value, key: &str) -> Result<usize> {
    value
        .as_u64()
        .map(|v| v as usize)
        .ok_or_else(|| Error::JsonKey(format!("`{key}` is not an unsigned integer")).into())
}

fn create_task_from_json(manager: &PluginManager, node: &Value) -> Result<Task> {
    let object = node
        .as_object()
        .ok_or_else(|| Error::JsonKey("Node is not an object".into()))?;

    let (Some(plugin), Some(name)) = (object.get("plugin"), object.get("name")) else {
        return Err(Error::JsonKey("Node does not have `plugin` or `name` key".into()).into());
    };
    let plugin = plugin
        .as_str()
        .ok_or_else(|| Error::JsonKey("`plugin` is not a string".into()))?;
    let name = name
        .as_str()
        .ok_or_else(|| Error::JsonKey("`name` is not a string".into()))?;
    let package = match object.get("package") {
        Some(package) => Some(
            package
                .as_str()
                .ok_or_else(|| Error::JsonKey("`package` is not a string".into()))?,
        ),
        None => None,
    };

    let mut task = manager.create(package, plugin, name)?;

    if let Some(properties) = object.get("properties") {
        let properties = properties
            .as_object()
            .ok_or_else(|| Error::JsonKey("`properties` is not an object".into()))?;
        for (key, value) in properties {
            set_property_from_json(manager, &mut task, key, value)?;
        }
    }

    Ok(task)
}

fn set_property_from_json(manager: &PluginManager, task: &mut Task, name: &str, value: &Value) -> Result<()> {
    match value {
        Value::Object(object) => {
            if object.contains_key("plugin") {
                let inner = create_task_from_json(manager, value)?;
                task.plugin_mut().set_property(name, PropertyValue::Task(inner))
            } else {
                task.plugin_mut().set_json_object_property(name, object)
            }
        }
        other => {
            let value = property_value_from_json(other)?;
            task.plugin_mut().set_property(name, value)
        }
    }
}

fn property_value_from_json(value: &Value) -> Result<PropertyValue> {
    match value {
        Value::Bool(b) => Ok(PropertyValue::Bool(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(PropertyValue::Int(i))
            } else if let Some(f) = n.as_f64() {
                Ok(PropertyValue::Float(f))
            } else {
                Err(Error::JsonKey(format!("`{n}` is out of range")).into())
            }
        }
        Value::String(s) => Ok(PropertyValue::Str(s.clone())),
        Value::Array(items) => Ok(PropertyValue::List(
            items.iter().map(property_value_from_json).collect::<Result<_>>()?,
        )),
        other => Err(Error::JsonKey(format!("`{other}` is neither a primitive value nor an array")).into()),
    }
}

fn property_value_to_json(value: &PropertyValue) -> Result<Value> {
    Ok(match value {
        PropertyValue::Bool(b) => Value::Bool(*b),
        PropertyValue::Int(i) => Value::Number((*i).into()),
        PropertyValue::Float(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .ok_or_else(|| Error::JsonKey(format!("`{f}` is not representable in JSON")))?,
        PropertyValue::Str(s) => Value::String(s.clone()),
        PropertyValue::List(items) => Value::Array(
            items.iter().map(property_value_to_json).collect::<Result<_>>()?,
        ),
        PropertyValue::Task(task) => Value::Object(task_to_json(task)?),
    })
}

fn task_to_json(task: &Task) -> Result<Map<String, Value>> {
    let mut object = Map::new();
    object.insert("plugin".into(), Value::String(task.plugin_name().into()));
    if let Some(package) = task.package_name() {
        object.insert("package".into(), Value::String(package.into()));
    }
    object.insert("name".into(), Value::String(task.identifier().into()));

    let mut properties = Map::new();
    for (name, value) in task.plugin().properties() {
        properties.insert(name, property_value_to_json(&value)?);
    }
    object.insert("properties".into(), Value::Object(properties));

    Ok(object)
}

fn install_edge(graph: &mut TaskGraph, edge: &Value) -> Result<()> {
    let object = edge
        .as_object()
        .ok_or_else(|| Error::JsonKey("Edge is not an object".into()))?;

    let (Some(from), Some(to)) = (object.get("from"), object.get("to")) else {
        return Err(Error::JsonKey("Edge does not have `from` or `to` key".into()).into());
    };

    let from_name = from
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::JsonKey("From node does not have `name` key".into()))?;
    let to_name = to
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::JsonKey("To node does not have `name` key".into()))?;
    let input = match to.get("input") {
        Some(input) => as_uint(input, "input")?,
        None => 0,
    };

    let from_task = graph
        .get(from_name)
        .ok_or_else(|| Error::JsonKey(format!("No task `{from_name}` defined")))?;
    let to_task = graph
        .get(to_name)
        .ok_or_else(|| Error::JsonKey(format!("No task `{to_name}` defined")))?;

    graph.connect_full(&from_task, &to_task, input)
}
