//! The data-flow execution engine.
//!
//! A [`Scheduler`] turns the edges of a task graph into [`Relation`]s, the
//! per-edge queue fabric, and runs every task on its own worker thread.
//! Workers communicate exclusively through the relation queues: populated
//! buffers travel downstream on the data queues, emptied buffers return
//! upstream on the recycle queues, and the fixed-size recycle pools provide
//! credit-based backpressure. End-of-stream propagates as a poison pill,
//! giving a topologically ordered shutdown without any central coordination.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub mod info;
pub mod relation;
pub mod scheduler;
pub(crate) mod worker;

pub use info::{EventRecord, ExecutionInfo, RunSummary};
pub use relation::{Message, Relation};
pub use scheduler::{build_relations, Scheduler};

/// Cooperative shutdown signal.
///
/// The daemon front-end (or any other embedder) requests a stop; sources
/// observe the token between iterations and end their streams, after which
/// the poison pills drain the graph. There is no asynchronous thread kill.
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    flag: Arc<AtomicBool>,
}

impl StopToken {
    /// Create a token with no stop requested.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a cooperative shutdown.
    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// True once a shutdown was requested.
    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}
