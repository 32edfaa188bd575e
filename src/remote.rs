//! Interface to remote worker nodes.
//!
//! The wire protocol is not part of the scheduler core. During graph
//! expansion the core only needs to ship a serialized subgraph to each remote
//! worker, which happens through the [`RemoteNode`] trait. Transport
//! implementations live outside this crate.

use std::sync::Arc;

use anyhow::Result;

/// How a remote worker should treat a received graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteMode {
    /// The remote processes a share of the data stream.
    Stream,
    /// The remote runs a full copy of the graph on its own data.
    Replicate,
}

/// A handle to a remote worker that can receive task graphs.
pub trait RemoteNode: Send + Sync {
    /// Ship a serialized task graph to the remote worker.
    fn send_json(&self, mode: RemoteMode, json: &str) -> Result<()>;
}

/// Shared handle to a remote worker.
pub type RemoteRef = Arc<dyn RemoteNode>;
