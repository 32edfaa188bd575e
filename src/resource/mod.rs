//! The resource layer supplies buffers and command queues to the execution
//! engine.
//!
//! The scheduler itself never allocates device memory. Everything it hands to
//! workers comes from a [`ResourceManager`]: output buffer pools are requested
//! once per worker at initialization time, and command queues are passed to
//! task callbacks as opaque handles. [`HostResources`] is the default
//! implementation backed by host memory, used by tests and host-only
//! pipelines; accelerator backends implement the same trait.

use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use serde::Serialize;

pub mod buffer;

pub use buffer::Buffer;

/// Opaque handle to a device command queue.
///
/// The scheduler performs no locking on command queues. They are handed to
/// task callbacks as-is; serializing access within a callback is the task's
/// responsibility.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommandQueue {
    id: usize,
}

impl CommandQueue {
    pub(crate) fn new(id: usize) -> Self {
        CommandQueue {
            id,
        }
    }

    /// Stable identifier of this queue within its resource manager.
    pub fn id(&self) -> usize {
        self.id
    }
}

/// A GPU execution context that tasks can be mapped onto.
///
/// Each node wraps the command queue that mapped tasks will be handed during
/// execution. See [`TaskGraph::map()`](crate::TaskGraph::map).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuNode {
    index: usize,
    queue: CommandQueue,
}

impl GpuNode {
    /// Create a GPU node over a command queue.
    pub fn new(index: usize, queue: CommandQueue) -> Self {
        GpuNode {
            index,
            queue,
        }
    }

    /// Position of this node in the resource manager's queue list.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The command queue tasks mapped to this node execute on.
    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }
}

/// Kind of device command an event was recorded for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CommandType {
    /// A compute kernel launch.
    Kernel,
    /// A device-to-host read.
    ReadBuffer,
    /// A host-to-device write.
    WriteBuffer,
    /// A device-to-device copy.
    CopyBuffer,
}

/// Execution status of a device command at the time its event was inspected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CommandStatus {
    /// Queued on the host, not yet submitted.
    Queued,
    /// Submitted to the device.
    Submitted,
    /// Currently executing.
    Running,
    /// Finished executing; profiling timestamps are available.
    Complete,
}

/// Profiling timestamps of a completed device command, in device ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EventProfile {
    /// When the command was enqueued on the host.
    pub queued: u64,
    /// When the command was submitted to the device.
    pub submitted: u64,
    /// When the device started executing the command.
    pub started: u64,
    /// When the device finished executing the command.
    pub ended: u64,
}

/// A device event returned by a GPU processing callback.
///
/// Workers drain these into the per-task event log after every
/// `process_gpu` call. Profiling timestamps are only present once the
/// command has completed.
#[derive(Debug, Clone)]
pub struct GpuEvent {
    queue: CommandQueue,
    command: CommandType,
    status: CommandStatus,
    profile: Option<EventProfile>,
}

impl GpuEvent {
    /// Create an event for a command that has not completed yet.
    pub fn pending(queue: CommandQueue, command: CommandType, status: CommandStatus) -> Self {
        GpuEvent {
            queue,
            command,
            status,
            profile: None,
        }
    }

    /// Create an event for a completed command with its profiling timestamps.
    pub fn completed(queue: CommandQueue, command: CommandType, profile: EventProfile) -> Self {
        GpuEvent {
            queue,
            command,
            status: CommandStatus::Complete,
            profile: Some(profile),
        }
    }

    /// The command queue the command executed on.
    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    /// The kind of command this event tracks.
    pub fn command_type(&self) -> CommandType {
        self.command
    }

    /// Status at inspection time.
    pub fn status(&self) -> CommandStatus {
        self.status
    }

    /// Profiling timestamps, present only when [`Self::status()`] is
    /// [`CommandStatus::Complete`].
    pub fn profile(&self) -> Option<EventProfile> {
        self.profile
    }
}

/// Supplies GPU-backed buffers and command queues to the scheduler.
///
/// Workers call into the manager only while initializing their output buffer
/// pools; afterwards they exchange nothing but queues. Implementations must
/// therefore be shareable across worker threads.
pub trait ResourceManager: Send + Sync {
    /// Allocate a buffer with the given shape. `host_data` pre-populates the
    /// buffer, `fill_value` primes every element instead. `host_data` wins if
    /// both are given.
    fn request_buffer(&self, dims: &[usize], host_data: Option<&[f32]>, fill_value: Option<f32>) -> Result<Buffer>;

    /// All command queues this manager exposes. Must be non-empty.
    fn command_queues(&self) -> Vec<CommandQueue>;

    /// The mappable GPU execution contexts, one per command queue.
    fn gpu_nodes(&self) -> Vec<GpuNode> {
        self.command_queues()
            .into_iter()
            .enumerate()
            .map(|(index, queue)| GpuNode::new(index, queue))
            .collect()
    }
}

/// Host-memory resource manager.
///
/// Exposes a configurable number of opaque command queues and allocates plain
/// host buffers. This is the manager of choice for tests and CPU-only
/// pipelines.
#[derive(Debug)]
pub struct HostResources {
    queues: Vec<CommandQueue>,
    allocated: AtomicUsize,
}

impl HostResources {
    /// Create a manager with `n_queues` command queues. At least one queue is
    /// always created.
    pub fn new(n_queues: usize) -> Self {
        let n_queues = n_queues.max(1);
        HostResources {
            queues: (0..n_queues).map(CommandQueue::new).collect(),
            allocated: AtomicUsize::new(0),
        }
    }

    /// Number of buffers handed out so far.
    pub fn allocation_count(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }
}

impl Default for HostResources {
    fn default() -> Self {
        Self::new(1)
    }
}

impl ResourceManager for HostResources {
    fn request_buffer(&self, dims: &[usize], host_data: Option<&[f32]>, fill_value: Option<f32>) -> Result<Buffer> {
        let mut buffer = Buffer::new(dims)?;
        if let Some(data) = host_data {
            buffer.write_data(data);
        } else if let Some(value) = fill_value {
            buffer.fill_with_value(value);
        }
        self.allocated.fetch_add(1, Ordering::Relaxed);
        Ok(buffer)
    }

    fn command_queues(&self) -> Vec<CommandQueue> {
        self.queues.clone()
    }
}

static_assertions::assert_impl_all!(Buffer: Send);
static_assertions::assert_impl_all!(HostResources: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_data_wins_over_fill_value() {
        let manager = HostResources::new(1);
        let buffer = manager
            .request_buffer(&[3], Some(&[1.0, 2.0, 3.0]), Some(7.0))
            .unwrap();
        assert_eq!(buffer.data(), &[1.0, 2.0, 3.0]);
        assert_eq!(manager.allocation_count(), 1);
    }

    #[test]
    fn gpu_nodes_cover_every_queue() {
        let manager = HostResources::new(3);
        let nodes = manager.gpu_nodes();
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[2].queue().id(), 2);
    }
}
