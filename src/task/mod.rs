//! Task nodes and the plugin capability contract.
//!
//! A task is one processing node in the graph. Its behavior is supplied by a
//! plugin implementing one of the four mode traits ([`SourceTask`],
//! [`ProcessorTask`], [`ReductorTask`], [`SinkTask`]), all of which extend
//! the common [`TaskPlugin`] contract. The worker picks its lifecycle once at
//! startup by matching on [`TaskKind`]; callbacks the plugin does not provide
//! fall back to defaults returning
//! [`Error::MethodNotImplemented`](crate::Error::MethodNotImplemented).

use std::fmt;
use std::sync::{Arc, Mutex};

use anyhow::Result;

use crate::remote::RemoteRef;
use crate::resource::{Buffer, CommandQueue, GpuEvent, GpuNode};
use crate::Error;

pub mod builtin;
pub mod registry;

/// Processing mode of a task, which selects its worker lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskMode {
    /// No inputs; produces a stream until `generate` returns `false`.
    Source,
    /// N inputs to M outputs, one batch per iteration.
    Processor,
    /// Accumulates an entire input stream, then emits few results.
    Reductor,
    /// Consumes a stream; no outputs.
    Sink,
}

/// Special roles a task can play in graph transformation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskRole {
    /// An ordinary task.
    #[default]
    Regular,
    /// A host-side injection point; bound to a processing node during
    /// mapping even though it does not use the GPU.
    Input,
    /// A placeholder for a subgraph running on a remote worker. Mapping does
    /// not advance its round-robin counter, and the task is skipped when the
    /// graph is serialized.
    Remote,
}

/// Static description of one input port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputParameter {
    /// How many items this port consumes over the whole run; `None` means
    /// unbounded. Once the limit is reached the last buffer stays available
    /// to the task without being recycled upstream.
    pub n_expected_items: Option<usize>,
}

impl InputParameter {
    /// A port that consumes the whole upstream stream.
    pub fn infinite() -> Self {
        InputParameter {
            n_expected_items: None,
        }
    }

    /// A port that consumes exactly `n` items.
    pub fn expecting(n: usize) -> Self {
        InputParameter {
            n_expected_items: Some(n),
        }
    }
}

/// Static description of one output port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputParameter {
    /// Dimensionality of the buffers produced on this port. The concrete
    /// extents are decided by the task's `initialize` callback.
    pub n_dims: usize,
}

impl OutputParameter {
    /// An output port producing `n_dims`-dimensional buffers.
    pub fn with_dims(n_dims: usize) -> Self {
        OutputParameter {
            n_dims,
        }
    }
}

/// A property value as found in a graph description document.
///
/// The coercing accessors implement the loader's element-wise conversion
/// rules: integers and floats convert freely into the type a plugin asks
/// for, scalars promote to one-element lists.
#[derive(Debug)]
pub enum PropertyValue {
    /// A boolean.
    Bool(bool),
    /// An integer.
    Int(i64),
    /// A floating point number.
    Float(f64),
    /// A string.
    Str(String),
    /// An array of primitives.
    List(Vec<PropertyValue>),
    /// A nested task, built from an object containing a `plugin` key.
    Task(Task),
}

impl PropertyValue {
    /// Interpret the value as a boolean.
    pub fn as_bool(&self) -> Result<bool> {
        match self {
            PropertyValue::Bool(b) => Ok(*b),
            other => Err(Error::JsonKey(format!("expected a boolean, got {other:?}")).into()),
        }
    }

    /// Interpret the value as an integer. Floats are truncated.
    pub fn as_i64(&self) -> Result<i64> {
        match self {
            PropertyValue::Int(i) => Ok(*i),
            PropertyValue::Float(f) => Ok(*f as i64),
            other => Err(Error::JsonKey(format!("expected an integer, got {other:?}")).into()),
        }
    }

    /// Interpret the value as an unsigned size.
    pub fn as_usize(&self) -> Result<usize> {
        let value = self.as_i64()?;
        usize::try_from(value)
            .map_err(|_| Error::JsonKey(format!("expected an unsigned integer, got {value}")).into())
    }

    /// Interpret the value as a 64-bit float.
    pub fn as_f64(&self) -> Result<f64> {
        match self {
            PropertyValue::Float(f) => Ok(*f),
            PropertyValue::Int(i) => Ok(*i as f64),
            other => Err(Error::JsonKey(format!("expected a number, got {other:?}")).into()),
        }
    }

    /// Interpret the value as a 32-bit float.
    pub fn as_f32(&self) -> Result<f32> {
        Ok(self.as_f64()? as f32)
    }

    /// Interpret the value as a string slice.
    pub fn as_str(&self) -> Result<&str> {
        match self {
            PropertyValue::Str(s) => Ok(s),
            other => Err(Error::JsonKey(format!("expected a string, got {other:?}")).into()),
        }
    }

    /// Interpret the value as a list of 32-bit floats, coercing every
    /// element. A scalar promotes to a one-element list.
    pub fn as_f32_vec(&self) -> Result<Vec<f32>> {
        match self {
            PropertyValue::List(items) => items.iter().map(|item| item.as_f32()).collect(),
            other => Ok(vec![other.as_f32()?]),
        }
    }

    /// Interpret the value as a list of sizes, coercing every element.
    pub fn as_usize_vec(&self) -> Result<Vec<usize>> {
        match self {
            PropertyValue::List(items) => items.iter().map(|item| item.as_usize()).collect(),
            other => Ok(vec![other.as_usize()?]),
        }
    }
}

/// The contract every task implementation provides, independent of its mode.
pub trait TaskPlugin: Send {
    /// The input ports of this task. Empty for sources.
    fn input_parameters(&self) -> Vec<InputParameter> {
        Vec::new()
    }

    /// The output ports of this task. Empty for sinks.
    fn output_parameters(&self) -> Vec<OutputParameter> {
        Vec::new()
    }

    /// True if this task provides a GPU processing entry point. GPU tasks
    /// participate in path expansion and are bound to a GPU node during
    /// mapping.
    fn uses_gpu(&self) -> bool {
        false
    }

    /// Transformation role of this task. See [`TaskRole`].
    fn role(&self) -> TaskRole {
        TaskRole::Regular
    }

    /// Set a named property from a graph description document.
    fn set_property(&mut self, name: &str, value: PropertyValue) -> Result<()> {
        let _ = value;
        Err(Error::JsonKey(format!("Property `{name}` does not exist")).into())
    }

    /// Current property values that differ from their defaults, for
    /// serialization. Read-only state must not be reported here.
    fn properties(&self) -> Vec<(String, PropertyValue)> {
        Vec::new()
    }

    /// Hand a raw JSON object property to the task. Only called for object
    /// values that are not nested tasks.
    fn set_json_object_property(&mut self, name: &str, object: &serde_json::Map<String, serde_json::Value>) -> Result<()> {
        let _ = (name, object);
        Err(Error::MethodNotImplemented("set_json_object_property").into())
    }
}

/// Lifecycle of a task without inputs.
pub trait SourceTask: TaskPlugin {
    /// Decide the concrete extents of every output port. `output_dims[port]`
    /// arrives pre-sized to the declared dimensionality, zero-filled.
    fn initialize(&mut self, output_dims: &mut [Vec<usize>]) -> Result<()> {
        let _ = output_dims;
        Ok(())
    }

    /// Fill one buffer per output port. Returns `false` when the stream is
    /// exhausted; the already-filled buffers of that call are discarded.
    fn generate(&mut self, outputs: &mut [Buffer], queue: &CommandQueue) -> Result<bool> {
        let _ = (outputs, queue);
        Err(Error::MethodNotImplemented("generate").into())
    }

    /// Create an independent copy of this task for graph expansion.
    fn duplicate(&self) -> Box<dyn SourceTask>;
}

/// Lifecycle of a synchronous N-to-M task.
pub trait ProcessorTask: TaskPlugin {
    /// Inspect the first input batch and decide output extents.
    fn initialize(&mut self, work: &[&Buffer], output_dims: &mut [Vec<usize>]) -> Result<()> {
        let _ = (work, output_dims);
        Ok(())
    }

    /// Process one batch on the host.
    fn process_cpu(&mut self, work: &[&Buffer], result: &mut [Buffer], queue: &CommandQueue) -> Result<()> {
        let _ = (work, result, queue);
        Err(Error::MethodNotImplemented("process_cpu").into())
    }

    /// Process one batch on the device. May return events for the per-task
    /// profiling log. Only called when [`TaskPlugin::uses_gpu()`] is true.
    fn process_gpu(&mut self, work: &[&Buffer], result: &mut [Buffer], queue: &CommandQueue) -> Result<Option<Vec<GpuEvent>>> {
        let _ = (work, result, queue);
        Err(Error::MethodNotImplemented("process_gpu").into())
    }

    /// Create an independent copy of this task for graph expansion.
    fn duplicate(&self) -> Box<dyn ProcessorTask>;
}

/// Lifecycle of a stream-reducing task.
pub trait ReductorTask: TaskPlugin {
    /// Inspect the first input batch, decide output extents and the value the
    /// result buffers are primed with before collection starts. `work` is
    /// empty when the upstream terminated before delivering anything.
    fn initialize(&mut self, work: &[&Buffer], output_dims: &mut [Vec<usize>], default_value: &mut f32) -> Result<()> {
        let _ = (work, output_dims, default_value);
        Ok(())
    }

    /// Fold one input batch into the result buffers. The same result buffers
    /// are handed back on every call so state accumulates in place.
    fn collect(&mut self, work: &[&Buffer], result: &mut [Buffer], queue: &CommandQueue) -> Result<()> {
        let _ = (work, result, queue);
        Err(Error::MethodNotImplemented("collect").into())
    }

    /// Produce one round of reduction results after the input stream ended.
    /// Returning `true` emits the current result buffers downstream and the
    /// worker calls again with fresh buffers; `false` ends the task.
    fn reduce(&mut self, result: &mut [Buffer], queue: &CommandQueue) -> Result<bool> {
        let _ = (result, queue);
        Err(Error::MethodNotImplemented("reduce").into())
    }

    /// Create an independent copy of this task for graph expansion.
    fn duplicate(&self) -> Box<dyn ReductorTask>;
}

/// Lifecycle of a task without outputs.
pub trait SinkTask: TaskPlugin {
    /// Inspect the first input batch.
    fn initialize(&mut self, work: &[&Buffer]) -> Result<()> {
        let _ = work;
        Ok(())
    }

    /// Consume one input batch.
    fn consume(&mut self, work: &[&Buffer], queue: &CommandQueue) -> Result<()> {
        let _ = (work, queue);
        Err(Error::MethodNotImplemented("consume").into())
    }

    /// Create an independent copy of this task for graph expansion.
    fn duplicate(&self) -> Box<dyn SinkTask>;
}

/// A task implementation tagged with its mode.
///
/// The worker matches on this once at startup to select its lifecycle, which
/// replaces the upcast-and-branch dispatch of class hierarchies.
pub enum TaskKind {
    /// See [`SourceTask`].
    Source(Box<dyn SourceTask>),
    /// See [`ProcessorTask`].
    Processor(Box<dyn ProcessorTask>),
    /// See [`ReductorTask`].
    Reductor(Box<dyn ReductorTask>),
    /// See [`SinkTask`].
    Sink(Box<dyn SinkTask>),
}

impl TaskKind {
    /// The mode this implementation runs in.
    pub fn mode(&self) -> TaskMode {
        match self {
            TaskKind::Source(_) => TaskMode::Source,
            TaskKind::Processor(_) => TaskMode::Processor,
            TaskKind::Reductor(_) => TaskMode::Reductor,
            TaskKind::Sink(_) => TaskMode::Sink,
        }
    }

    /// Access the mode-independent plugin contract.
    pub fn plugin(&self) -> &dyn TaskPlugin {
        match self {
            TaskKind::Source(t) => t.as_ref(),
            TaskKind::Processor(t) => t.as_ref(),
            TaskKind::Reductor(t) => t.as_ref(),
            TaskKind::Sink(t) => t.as_ref(),
        }
    }

    /// Mutable access to the mode-independent plugin contract.
    pub fn plugin_mut(&mut self) -> &mut dyn TaskPlugin {
        match self {
            TaskKind::Source(t) => t.as_mut(),
            TaskKind::Processor(t) => t.as_mut(),
            TaskKind::Reductor(t) => t.as_mut(),
            TaskKind::Sink(t) => t.as_mut(),
        }
    }

    /// Create an independent copy of the implementation.
    pub fn duplicate(&self) -> TaskKind {
        match self {
            TaskKind::Source(t) => TaskKind::Source(t.duplicate()),
            TaskKind::Processor(t) => TaskKind::Processor(t.duplicate()),
            TaskKind::Reductor(t) => TaskKind::Reductor(t.duplicate()),
            TaskKind::Sink(t) => TaskKind::Sink(t.duplicate()),
        }
    }
}

/// The execution context a task was mapped to.
#[derive(Clone)]
pub enum ProcNode {
    /// A GPU execution context on this host.
    Gpu(GpuNode),
    /// A remote worker.
    Remote(RemoteRef),
}

impl fmt::Debug for ProcNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcNode::Gpu(node) => f.debug_tuple("Gpu").field(node).finish(),
            ProcNode::Remote(_) => f.write_str("Remote(..)"),
        }
    }
}

/// One processing node of a task graph.
///
/// Port counts and per-port parameters are snapshotted from the plugin at
/// construction and immutable afterwards. The identifier must be unique
/// within a graph; [`TaskGraph::add_task`](crate::TaskGraph::add_task)
/// enforces this.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Task {
    plugin_name: String,
    package_name: Option<String>,
    identifier: String,
    #[derivative(Debug = "ignore")]
    kind: TaskKind,
    input_params: Vec<InputParameter>,
    output_params: Vec<OutputParameter>,
    proc_node: Option<ProcNode>,
    num_processed: u64,
}

/// Shared handle to a task node. Node equality is handle identity.
pub type TaskRef = Arc<Mutex<Task>>;

impl Task {
    /// Create a task node from a plugin implementation.
    /// # Errors
    /// - Fails with [`Error::BadInputs`] if the plugin name is empty.
    pub fn new(plugin_name: impl Into<String>, identifier: impl Into<String>, kind: TaskKind) -> Result<Self> {
        let plugin_name = plugin_name.into();
        if plugin_name.is_empty() {
            return Err(Error::BadInputs("plugin name must not be empty".into()).into());
        }
        let input_params = kind.plugin().input_parameters();
        let output_params = kind.plugin().output_parameters();
        Ok(Task {
            plugin_name,
            package_name: None,
            identifier: identifier.into(),
            kind,
            input_params,
            output_params,
            proc_node: None,
            num_processed: 0,
        })
    }

    /// Attach the package name this task's plugin was loaded from.
    pub fn with_package(mut self, package: impl Into<String>) -> Self {
        self.package_name = Some(package.into());
        self
    }

    /// Wrap the task in the shared handle the graph and scheduler work with.
    pub fn into_ref(self) -> TaskRef {
        Arc::new(Mutex::new(self))
    }

    /// Name of the plugin this task was created from.
    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    /// Package the plugin was loaded from, if any.
    pub fn package_name(&self) -> Option<&str> {
        self.package_name.as_deref()
    }

    /// Unique instance identifier of this task.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Processing mode.
    pub fn mode(&self) -> TaskMode {
        self.kind.mode()
    }

    /// Transformation role.
    pub fn role(&self) -> TaskRole {
        self.kind.plugin().role()
    }

    /// True if the task provides a GPU entry point.
    pub fn uses_gpu(&self) -> bool {
        self.kind.plugin().uses_gpu()
    }

    /// Number of input ports.
    pub fn num_inputs(&self) -> usize {
        self.input_params.len()
    }

    /// Number of output ports.
    pub fn num_outputs(&self) -> usize {
        self.output_params.len()
    }

    /// Per-port input parameters.
    pub fn input_parameters(&self) -> &[InputParameter] {
        &self.input_params
    }

    /// Per-port output parameters.
    pub fn output_parameters(&self) -> &[OutputParameter] {
        &self.output_params
    }

    /// The execution context this task was mapped to, if any.
    pub fn proc_node(&self) -> Option<&ProcNode> {
        self.proc_node.as_ref()
    }

    /// Bind the task to an execution context.
    pub fn set_proc_node(&mut self, node: ProcNode) {
        self.proc_node = Some(node);
    }

    /// Number of batches the worker has pushed through this task. Read-only
    /// runtime state; never serialized.
    pub fn num_processed(&self) -> u64 {
        self.num_processed
    }

    pub(crate) fn add_processed(&mut self, n: u64) {
        self.num_processed += n;
    }

    /// The tagged implementation.
    pub fn kind(&self) -> &TaskKind {
        &self.kind
    }

    /// Mutable access to the tagged implementation.
    pub fn kind_mut(&mut self) -> &mut TaskKind {
        &mut self.kind
    }

    /// Access the mode-independent plugin contract.
    pub fn plugin(&self) -> &dyn TaskPlugin {
        self.kind.plugin()
    }

    /// Mutable access to the mode-independent plugin contract.
    pub fn plugin_mut(&mut self) -> &mut dyn TaskPlugin {
        self.kind.plugin_mut()
    }

    /// Create an independent copy of this task under a fresh identifier.
    /// The copy starts unmapped and with a zero processed count.
    pub fn duplicate_as(&self, identifier: impl Into<String>) -> Task {
        Task {
            plugin_name: self.plugin_name.clone(),
            package_name: self.package_name.clone(),
            identifier: identifier.into(),
            kind: self.kind.duplicate(),
            input_params: self.input_params.clone(),
            output_params: self.output_params.clone(),
            proc_node: None,
            num_processed: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::builtin::DummyTask;

    #[test]
    fn numbers_coerce_both_ways() {
        assert_eq!(PropertyValue::Int(3).as_f32().unwrap(), 3.0);
        assert_eq!(PropertyValue::Float(2.7).as_i64().unwrap(), 2);
        assert!(PropertyValue::Str("x".into()).as_f64().is_err());
    }

    #[test]
    fn scalars_promote_to_one_element_lists() {
        assert_eq!(PropertyValue::Int(4).as_f32_vec().unwrap(), vec![4.0]);
        let list = PropertyValue::List(vec![PropertyValue::Int(1), PropertyValue::Float(0.5)]);
        assert_eq!(list.as_f32_vec().unwrap(), vec![1.0, 0.5]);
    }

    #[test]
    fn negative_sizes_are_rejected() {
        let err = PropertyValue::Int(-1).as_usize().unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::JsonKey(_))));
    }

    #[test]
    fn empty_plugin_names_are_rejected() {
        let err = Task::new("", "t", DummyTask::kind()).unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::BadInputs(_))));
    }

    #[test]
    fn duplicates_reset_runtime_state() {
        let mut task = Task::new("dummy", "d", DummyTask::kind()).unwrap();
        task.add_processed(5);
        let copy = task.duplicate_as("d-1");
        assert_eq!(copy.identifier(), "d-1");
        assert_eq!(copy.num_processed(), 0);
        assert!(copy.proc_node().is_none());
        assert_eq!(copy.num_inputs(), task.num_inputs());
    }
}
