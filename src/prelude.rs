//! Re-exports most commonly used types in the library

pub use crate::error::Error;
pub use crate::exec::info::{EventRecord, ExecutionInfo, RunSummary};
pub use crate::exec::relation::{Message, Relation};
pub use crate::exec::scheduler::{build_relations, Scheduler};
pub use crate::exec::StopToken;
pub use crate::graph::generic::{Graph, NodeId};
pub use crate::graph::json::JSON_API_VERSION;
pub use crate::graph::task_graph::TaskGraph;
pub use crate::remote::{RemoteMode, RemoteNode, RemoteRef};
pub use crate::resource::buffer::Buffer;
pub use crate::resource::{
    CommandQueue, CommandStatus, CommandType, EventProfile, GpuEvent, GpuNode, HostResources,
    ResourceManager,
};
pub use crate::task::builtin::{DummyTask, InputFeed, InputTask, RemoteTask};
pub use crate::task::registry::PluginManager;
pub use crate::task::{
    InputParameter, OutputParameter, ProcNode, ProcessorTask, PropertyValue, ReductorTask,
    SinkTask, SourceTask, Task, TaskKind, TaskMode, TaskPlugin, TaskRef, TaskRole,
};
