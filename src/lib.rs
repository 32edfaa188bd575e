//! Task-graph scheduler and dataflow engine for GPU compute pipelines
//!
//! Deimos executes directed graphs of processing tasks that exchange
//! N-dimensional buffers over typed ports. Tasks run truly in parallel, one
//! thread each, and coordinate exclusively through per-edge queue pairs with
//! recycled buffer pools, so backpressure and shutdown emerge from the
//! dataflow itself instead of a central loop.
//!
//! To get started, the easiest way is to simply
//! ```
//! // Import all important types under a namespace.
//! use deimos::prelude as dx;
//!
//! // Or, if you dont care about using the types under a namespace
//! use deimos::prelude::*;
//! ```
//!
//! # Example
//!
//! A pipeline is assembled either programmatically or from a declarative
//! JSON document, validated, optionally expanded over the available GPUs,
//! and handed to the scheduler:
//!
//! ```no_run
//! use std::sync::Arc;
//! use deimos::prelude::*;
//!
//! # fn plugins() -> PluginManager { PluginManager::new() }
//! let manager = plugins();
//! let mut graph = TaskGraph::from_json_file(&manager, "pipeline.json")?;
//!
//! // Check the graph is executable: every leaf must be a sink.
//! graph.is_alright()?;
//!
//! // Duplicate the longest GPU-only path across all available devices and
//! // bind tasks to concrete execution contexts.
//! let resources = Arc::new(HostResources::new(3));
//! graph.expand(resources.gpu_nodes().len(), &[])?;
//! graph.map(&resources.gpu_nodes());
//!
//! // One worker thread per task; the run ends when the poison pills have
//! // drained the graph.
//! let scheduler = Scheduler::new(resources);
//! let summary = scheduler.run(&graph)?;
//! println!("finished in {:?}", summary.wall_time);
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! Task behavior comes from plugins implementing one of the four mode
//! traits. A minimal processor:
//!
//! ```
//! use deimos::prelude::*;
//! use anyhow::Result;
//!
//! #[derive(Clone, Default)]
//! struct Scale {
//!     factor: f32,
//! }
//!
//! impl TaskPlugin for Scale {
//!     fn input_parameters(&self) -> Vec<InputParameter> {
//!         vec![InputParameter::infinite()]
//!     }
//!     fn output_parameters(&self) -> Vec<OutputParameter> {
//!         vec![OutputParameter::with_dims(1)]
//!     }
//!     fn set_property(&mut self, name: &str, value: PropertyValue) -> Result<()> {
//!         match name {
//!             "factor" => {
//!                 self.factor = value.as_f32()?;
//!                 Ok(())
//!             }
//!             _ => Err(Error::JsonKey(format!("Property `{name}` does not exist")).into()),
//!         }
//!     }
//! }
//!
//! impl ProcessorTask for Scale {
//!     fn initialize(&mut self, work: &[&Buffer], output_dims: &mut [Vec<usize>]) -> Result<()> {
//!         output_dims[0] = work[0].dims().to_vec();
//!         Ok(())
//!     }
//!     fn process_cpu(&mut self, work: &[&Buffer], result: &mut [Buffer], _queue: &CommandQueue) -> Result<()> {
//!         for (out, input) in result[0].data_mut().iter_mut().zip(work[0].data()) {
//!             *out = input * self.factor;
//!         }
//!         Ok(())
//!     }
//!     fn duplicate(&self) -> Box<dyn ProcessorTask> {
//!         Box::new(self.clone())
//!     }
//! }
//! ```
//!
//! For further reading, check out the following modules
//! - [`graph`] for graph construction, JSON loading, validation, expansion
//!   and GPU mapping.
//! - [`task`] for the plugin contract and the built-in tasks.
//! - [`exec`] for the scheduler, the relation queue fabric and per-task
//!   execution statistics.
//! - [`resource`] for buffers, command queues and the resource manager seam.
//! - [`remote`] for the remote worker interface used by distributed
//!   expansion.

#[macro_use]
extern crate derivative;
#[macro_use]
extern crate log;

pub mod prelude;
pub use crate::prelude::*;

pub mod error;
pub mod exec;
pub mod graph;
pub mod remote;
pub mod resource;
pub mod task;
