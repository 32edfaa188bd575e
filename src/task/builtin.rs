//! Built-in tasks used by graph transformation and host-side data injection.

use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::resource::{Buffer, CommandQueue};
use crate::task::{
    InputParameter, OutputParameter, ProcessorTask, SourceTask, TaskKind, TaskPlugin, TaskRole,
};
use crate::Error;

/// Pass-through processor used to pad trivial remote subgraphs so a remote
/// worker always receives at least one operator.
#[derive(Debug, Default, Clone)]
pub struct DummyTask;

impl DummyTask {
    /// Plugin name the task registers under.
    pub const PLUGIN_NAME: &'static str = "dummy";

    /// Factory suitable for [`PluginManager::register`](crate::PluginManager::register).
    pub fn kind() -> TaskKind {
        TaskKind::Processor(Box::new(DummyTask))
    }
}

impl TaskPlugin for DummyTask {
    fn input_parameters(&self) -> Vec<InputParameter> {
        vec![InputParameter::infinite()]
    }

    fn output_parameters(&self) -> Vec<OutputParameter> {
        vec![OutputParameter::with_dims(1)]
    }
}

impl ProcessorTask for DummyTask {
    fn initialize(&mut self, work: &[&Buffer], output_dims: &mut [Vec<usize>]) -> Result<()> {
        output_dims[0] = work[0].dims().to_vec();
        Ok(())
    }

    fn process_cpu(&mut self, work: &[&Buffer], result: &mut [Buffer], _queue: &CommandQueue) -> Result<()> {
        result[0].write_data(work[0].data());
        Ok(())
    }

    fn duplicate(&self) -> Box<dyn ProcessorTask> {
        Box::new(self.clone())
    }
}

/// Placeholder spliced between expansion anchors for a subgraph that runs on
/// a remote worker.
///
/// The placeholder itself only forwards buffers; the actual transport of
/// stream data to the remote is owned by the remote node implementation the
/// task was mapped to.
#[derive(Debug, Default, Clone)]
pub struct RemoteTask;

impl RemoteTask {
    pub(crate) fn kind() -> TaskKind {
        TaskKind::Processor(Box::new(RemoteTask))
    }
}

impl TaskPlugin for RemoteTask {
    fn input_parameters(&self) -> Vec<InputParameter> {
        vec![InputParameter::infinite()]
    }

    fn output_parameters(&self) -> Vec<OutputParameter> {
        vec![OutputParameter::with_dims(1)]
    }

    fn role(&self) -> TaskRole {
        TaskRole::Remote
    }
}

impl ProcessorTask for RemoteTask {
    fn initialize(&mut self, work: &[&Buffer], output_dims: &mut [Vec<usize>]) -> Result<()> {
        output_dims[0] = work[0].dims().to_vec();
        Ok(())
    }

    fn process_cpu(&mut self, work: &[&Buffer], result: &mut [Buffer], _queue: &CommandQueue) -> Result<()> {
        result[0].write_data(work[0].data());
        Ok(())
    }

    fn duplicate(&self) -> Box<dyn ProcessorTask> {
        Box::new(self.clone())
    }
}

/// Feeding side of an [`InputTask`]. Dropping all feeds ends the stream.
#[derive(Debug, Clone)]
pub struct InputFeed {
    tx: Sender<Vec<f32>>,
}

impl InputFeed {
    /// Queue one item for injection. Fails once the task side is gone.
    pub fn push(&self, data: Vec<f32>) -> Result<()> {
        self.tx
            .send(data)
            .map_err(|_| Error::Uncategorized("input task is no longer running").into())
    }
}

/// A source that emits buffers injected from the host.
///
/// Input tasks are bound to a processing node during mapping even though
/// they do not use the GPU, so that the lane they feed stays on one device.
#[derive(Debug, Clone)]
pub struct InputTask {
    dims: Vec<usize>,
    feed: Receiver<Vec<f32>>,
}

impl InputTask {
    /// Create an input task producing buffers of the given shape, together
    /// with the feed handle used to inject data.
    pub fn new(dims: Vec<usize>) -> (Self, InputFeed) {
        let (tx, rx) = unbounded();
        (
            InputTask {
                dims,
                feed: rx,
            },
            InputFeed {
                tx,
            },
        )
    }

    /// Wrap the task in its mode tag.
    pub fn into_kind(self) -> TaskKind {
        TaskKind::Source(Box::new(self))
    }
}

impl TaskPlugin for InputTask {
    fn output_parameters(&self) -> Vec<OutputParameter> {
        vec![OutputParameter::with_dims(self.dims.len())]
    }

    fn role(&self) -> TaskRole {
        TaskRole::Input
    }
}

impl SourceTask for InputTask {
    fn initialize(&mut self, output_dims: &mut [Vec<usize>]) -> Result<()> {
        output_dims[0] = self.dims.clone();
        Ok(())
    }

    fn generate(&mut self, outputs: &mut [Buffer], _queue: &CommandQueue) -> Result<bool> {
        match self.feed.recv() {
            Ok(data) => {
                outputs[0].write_data(&data);
                Ok(true)
            }
            // All feed handles dropped: the injected stream is over.
            Err(_) => Ok(false),
        }
    }

    fn duplicate(&self) -> Box<dyn SourceTask> {
        Box::new(self.clone())
    }
}
