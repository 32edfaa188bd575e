//! Task graphs: construction, JSON (de)serialization, validation, expansion
//! and GPU mapping.
//!
//! The [`generic`] module provides the underlying directed multigraph with
//! port-labeled edges; [`TaskGraph`] specializes it for task nodes and adds
//! the transformations the scheduler relies on:
//!
//! - **validation** ([`TaskGraph::is_alright()`]) checks that every leaf is a
//!   sink and warns about input combinations known to deadlock,
//! - **expansion** ([`TaskGraph::expand()`]) duplicates the longest GPU-only
//!   path into parallel lanes for data-parallel replication,
//! - **mapping** ([`TaskGraph::map()`]) binds tasks to concrete GPU
//!   execution contexts, round-robin across lanes.
//!
//! Graphs can be assembled programmatically through
//! [`TaskGraph::connect_full()`] or loaded from a declarative JSON document;
//! see the [`json`] module.
//!
//! # Example
//!
//! ```no_run
//! use deimos::prelude::*;
//! # fn plugins() -> PluginManager { PluginManager::new() }
//!
//! let manager = plugins();
//! let graph = TaskGraph::from_json_str(&manager, r#"{
//!     "version": "2.0",
//!     "nodes": [ { "plugin": "reader", "name": "r" },
//!                { "plugin": "writer", "name": "w" } ],
//!     "edges": [ { "from": { "name": "r" }, "to": { "name": "w" } } ]
//! }"#)?;
//! graph.is_alright()?;
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod generic;
pub mod json;
pub mod task_graph;

pub use generic::{Graph, NodeId};
pub use json::JSON_API_VERSION;
pub use task_graph::TaskGraph;
