//! Exposes the deimos error type

use std::sync::PoisonError;

use thiserror::Error;

/// Error type that deimos can return.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing, duplicate or mistyped key in a graph description document.
    #[error("{0}")]
    JsonKey(String),
    /// The task graph failed validation and cannot be executed.
    #[error("{0}")]
    BadInputs(String),
    /// Task graph contains a cycle and is impossible to schedule.
    #[error("Task graph contains cycle.")]
    CycleDetected,
    /// Node not found in graph. Generally this should not happen.
    #[error("Implementation error. Node not found. Please open an issue.")]
    NodeNotFound,
    /// A task mode callback that the worker needs is absent.
    #[error("Virtual method `{0}` is not implemented.")]
    MethodNotImplemented(&'static str),
    /// No task factory registered under the requested plugin name.
    #[error("No plugin named `{0}` registered.")]
    PluginNotFound(String),
    /// Buffer or queue creation failed.
    #[error("Resource allocation failed: {0}")]
    ResourceAllocation(String),
    /// Error surfaced by a task callback at runtime. Carries the plugin name
    /// and the instance identifier of the failing task.
    #[error("Task `{identifier}` ({plugin}) failed: {source}")]
    TaskRuntime {
        /// Plugin name of the failing task.
        plugin: String,
        /// Instance identifier of the failing task.
        identifier: String,
        /// The error the callback returned.
        #[source]
        source: anyhow::Error,
    },
    /// Poisoned mutex
    #[error("Poisoned mutex")]
    PoisonError,
    /// Uncategorized error.
    #[error("Uncategorized error: `{0}`")]
    Uncategorized(&'static str),
}

impl<T> From<PoisonError<T>> for Error {
    fn from(_: PoisonError<T>) -> Self {
        Error::PoisonError
    }
}
