//! Per-task execution bookkeeping: CPU time and the GPU event log.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::resource::{CommandStatus, CommandType, GpuEvent};

// The event log starts out with room for this many rows and doubles when it
// runs full.
const EVENT_LOG_INITIAL_ROWS: usize = 256;

/// One row of the per-task GPU event log.
///
/// Profiling timestamps are zero unless the command had completed by the
/// time its event was inspected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EventRecord {
    /// Identifier of the command queue the command ran on.
    pub queue: usize,
    /// The kind of command.
    pub command: CommandType,
    /// Status at inspection time.
    pub status: CommandStatus,
    /// Device tick at which the command was enqueued.
    pub queued: u64,
    /// Device tick at which the command was submitted.
    pub submitted: u64,
    /// Device tick at which execution started.
    pub started: u64,
    /// Device tick at which execution ended.
    pub ended: u64,
}

impl EventRecord {
    pub(crate) fn from_event(event: &GpuEvent) -> Self {
        let profile = event.profile().unwrap_or_default();
        EventRecord {
            queue: event.queue().id(),
            command: event.command_type(),
            status: event.status(),
            queued: profile.queued,
            submitted: profile.submitted,
            started: profile.started,
            ended: profile.ended,
        }
    }
}

/// Execution statistics of one task over a scheduler run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionInfo {
    /// Host CPU time spent inside the task's callbacks.
    pub cpu_time: Duration,
    /// GPU events recorded from the task's `process_gpu` calls.
    pub events: Vec<EventRecord>,
}

impl ExecutionInfo {
    pub(crate) fn new() -> Self {
        ExecutionInfo {
            cpu_time: Duration::ZERO,
            events: Vec::with_capacity(EVENT_LOG_INITIAL_ROWS),
        }
    }

    pub(crate) fn log_event(&mut self, event: &GpuEvent) {
        self.events.push(EventRecord::from_event(event));
    }
}

/// Result of a completed scheduler run.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Wall time from worker launch to the last join.
    pub wall_time: Duration,
    /// Per-task statistics, keyed by task identifier.
    pub tasks: HashMap<String, ExecutionInfo>,
}

/// Accumulating timer bracketing the task callbacks. Created stopped.
#[derive(Debug, Default)]
pub(crate) struct CpuTimer {
    total: Duration,
    started: Option<Instant>,
}

impl CpuTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resume(&mut self) {
        self.started = Some(Instant::now());
    }

    pub fn stop(&mut self) {
        if let Some(started) = self.started.take() {
            self.total += started.elapsed();
        }
    }

    pub fn total(&self) -> Duration {
        self.total
    }
}
