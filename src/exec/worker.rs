//! The per-task driver executed on one thread per task.
//!
//! A worker selects its lifecycle once from the task's mode, then loops over
//! the fetch/process/push primitives until the poison pill arrives or the
//! task declares its stream finished. It suspends in exactly four places:
//! pulling an input buffer, pulling an empty output buffer from the recycle
//! pool, inside the task callback, and at the final join.
//!
//! An input port can be fed by several relations at once; this is how the
//! parallel lanes created by expansion merge back together. Such a port
//! yields buffers from whichever lane is ready (no ordering between lanes is
//! guaranteed), returns every buffer to the lane it came from, and counts as
//! terminated only once every lane has delivered its pill.
//!
//! Termination travels both ways through the queue fabric. A pill on a data
//! queue means the upstream is done; a pill on a recycle queue means the
//! downstream is gone and the producer should wind down instead of blocking
//! on a pool that will never refill. Workers that stop for either reason, or
//! because of an error, pill all their remaining neighbors so the whole
//! graph drains in finite time.

use anyhow::Result;
use crossbeam_channel::{Receiver, Select, Sender};

use crate::exec::info::{CpuTimer, ExecutionInfo};
use crate::exec::relation::{Message, Relation};
use crate::exec::StopToken;
use crate::resource::{Buffer, CommandQueue, GpuEvent, ResourceManager};
use crate::task::{ProcNode, Task, TaskKind, TaskMode, TaskRef};
use crate::Error;

/// Buffers seeded into each output port's recycle pool. Must stay at least 1
/// or the dataflow cannot make progress.
pub(crate) const OUTPUT_POOL_DEPTH: usize = 4;

pub(crate) struct WorkerContext<'run> {
    pub task: TaskRef,
    pub relations: &'run [Relation],
    pub manager: &'run dyn ResourceManager,
    pub queues: &'run [CommandQueue],
    pub stop: StopToken,
}

/// How a lifecycle ended.
#[derive(Debug, PartialEq, Eq)]
enum WorkerExit {
    /// The stream ran to completion: the source ended it or the upstream
    /// pills arrived.
    Finished,
    /// The downstream side disappeared; the worker wound down early and the
    /// drain has to continue upstream.
    Drained,
}

/// One upstream relation feeding an input port.
struct LaneSource {
    push: Sender<Message>,
    pop: Receiver<Message>,
    done: bool,
}

/// The merged view of one input port over all relations feeding it.
struct InputPort {
    sources: Vec<LaneSource>,
}

impl InputPort {
    /// Pop the next buffer from any live lane, blocking until one is ready.
    /// Pills end their lane (and are forwarded on that lane's recycle path
    /// to free the upstream); `None` means every lane has terminated.
    /// The second element is the lane the buffer must be recycled to.
    fn pop(&mut self) -> Option<(Buffer, usize)> {
        loop {
            let live: Vec<usize> = self
                .sources
                .iter()
                .enumerate()
                .filter(|(_, source)| !source.done)
                .map(|(i, _)| i)
                .collect();
            if live.is_empty() {
                return None;
            }

            let (lane, message) = if live.len() == 1 {
                let lane = live[0];
                (lane, self.sources[lane].pop.recv())
            } else {
                let mut select = Select::new();
                for &i in &live {
                    select.recv(&self.sources[i].pop);
                }
                let op = select.select();
                let lane = live[op.index()];
                (lane, op.recv(&self.sources[lane].pop))
            };

            match message {
                Ok(Message::Buffer(buffer)) => return Some((buffer, lane)),
                Ok(Message::PoisonPill) => {
                    let _ = self.sources[lane].push.send(Message::PoisonPill);
                    self.sources[lane].done = true;
                }
                // The producer side is gone; treat it like an end of stream.
                Err(_) => self.sources[lane].done = true,
            }
        }
    }

    fn recycle(&self, buffer: Buffer, lane: usize) {
        let _ = self.sources[lane].push.send(Message::Buffer(buffer));
    }

    fn pill(&self) {
        for source in &self.sources {
            if !source.done {
                let _ = source.push.send(Message::PoisonPill);
            }
        }
    }
}

/// Run one task to completion. Returns its execution statistics, or the
/// first error its callbacks surfaced, wrapped with the task identity.
pub(crate) fn run(ctx: WorkerContext<'_>) -> Result<ExecutionInfo> {
    let task_ref = ctx.task.clone();
    let mut guard = task_ref.lock().map_err(|_| Error::PoisonError)?;
    let plugin = guard.plugin_name().to_string();
    let identifier = guard.identifier().to_string();

    // Tasks execute on the queue of the node they were mapped to; unmapped
    // tasks share the first queue.
    let queue = match guard.proc_node() {
        Some(ProcNode::Gpu(node)) => node.queue().clone(),
        _ => match ctx.queues.first() {
            Some(queue) => queue.clone(),
            None => return Err(Error::ResourceAllocation("no command queues available".into()).into()),
        },
    };

    let n_inputs = guard.num_inputs();
    let n_outputs = guard.num_outputs();
    let expected: Vec<Option<usize>> = guard.input_parameters().iter().map(|p| p.n_expected_items).collect();
    let output_dims: Vec<Vec<usize>> = guard
        .output_parameters()
        .iter()
        .map(|p| vec![0; p.n_dims])
        .collect();

    let mut inputs: Vec<InputPort> = (0..n_inputs)
        .map(|_| InputPort {
            sources: Vec::new(),
        })
        .collect();
    let mut output_push: Vec<Option<Sender<Message>>> = vec![None; n_outputs];
    let mut output_pop: Vec<Option<Receiver<Message>>> = vec![None; n_outputs];
    let mut output_seed: Vec<Option<Sender<Message>>> = vec![None; n_outputs];
    let mut producing: Vec<&Relation> = Vec::new();

    for relation in ctx.relations {
        if let Some(port) = relation.consumer_port(&task_ref) {
            if port < n_inputs {
                let (push, pop) = relation.consumer_queues(&task_ref).ok_or(Error::NodeNotFound)?;
                inputs[port].sources.push(LaneSource {
                    push,
                    pop,
                    done: false,
                });
            }
        }
        if TaskRef::ptr_eq(relation.producer(), &task_ref) {
            producing.push(relation);
            let port = relation.producer_port();
            if port < n_outputs {
                let (push, pop) = relation.producer_queues();
                output_push[port] = Some(push);
                output_pop[port] = Some(pop);
                output_seed[port] = Some(relation.recycle_seed());
            }
        }
    }

    for (port, input) in inputs.iter().enumerate() {
        if input.sources.is_empty() {
            return Err(Error::BadInputs(format!(
                "input port {port} of `{identifier}` is not connected"
            ))
            .into());
        }
    }

    let mut state = WorkerState {
        task: &mut *guard,
        manager: ctx.manager,
        queue,
        stop: ctx.stop.clone(),
        expected,
        fetched: vec![0; n_inputs],
        work: (0..n_inputs).map(|_| None).collect(),
        output_dims,
        inputs,
        output_push,
        output_pop,
        output_seed,
        scratch: (0..n_outputs).map(|_| None).collect(),
        timer: CpuTimer::new(),
        info: ExecutionInfo::new(),
    };

    let result = match state.task.mode() {
        TaskMode::Source => state.run_source(),
        TaskMode::Processor => state.run_processor(),
        TaskMode::Reductor => state.run_reductor(),
        TaskMode::Sink => state.run_sink(),
    };

    match result {
        Ok(exit) => {
            info!("scheduler: {plugin}-{identifier} finished");
            for relation in &producing {
                relation.push_poison_pill();
            }
            if exit == WorkerExit::Drained {
                state.pill_upstream();
            }
            let WorkerState {
                mut info,
                timer,
                ..
            } = state;
            info.cpu_time = timer.total();
            Ok(info)
        }
        Err(source) => {
            // Task data may be corrupt, so nothing is reclaimed; but the
            // neighbors still get their pills, otherwise the join would
            // wedge on queues this worker will never touch again.
            for relation in &producing {
                relation.push_poison_pill();
            }
            state.pill_upstream();
            Err(Error::TaskRuntime {
                plugin,
                identifier,
                source,
            }
            .into())
        }
    }
}

fn collect_refs(work: &[Option<(Buffer, usize)>]) -> Vec<&Buffer> {
    work.iter().filter_map(|slot| slot.as_ref().map(|(buffer, _)| buffer)).collect()
}

struct WorkerState<'a> {
    task: &'a mut Task,
    manager: &'a dyn ResourceManager,
    queue: CommandQueue,
    stop: StopToken,
    expected: Vec<Option<usize>>,
    fetched: Vec<usize>,
    // One slot per input port, holding the buffer and the lane it must be
    // recycled to. A port that reached its expected item count keeps its
    // last buffer here and re-exposes it to every further callback.
    work: Vec<Option<(Buffer, usize)>>,
    output_dims: Vec<Vec<usize>>,
    inputs: Vec<InputPort>,
    output_push: Vec<Option<Sender<Message>>>,
    output_pop: Vec<Option<Receiver<Message>>>,
    output_seed: Vec<Option<Sender<Message>>>,
    // Private result buffers for output ports without consumers.
    scratch: Vec<Option<Buffer>>,
    timer: CpuTimer,
    info: ExecutionInfo,
}

impl WorkerState<'_> {
    fn still_expecting(&self, port: usize) -> bool {
        match self.expected[port] {
            None => true,
            Some(limit) => self.fetched[port] < limit,
        }
    }

    /// Pull one buffer per input port that has not reached its item limit,
    /// in ascending port order. Returns `false` once any port has fully
    /// terminated.
    fn fetch_work(&mut self) -> bool {
        let mut success = true;
        for port in 0..self.inputs.len() {
            if !self.still_expecting(port) {
                continue;
            }
            match self.inputs[port].pop() {
                Some((buffer, lane)) => {
                    self.work[port] = Some((buffer, lane));
                    self.fetched[port] += 1;
                }
                None => {
                    self.work[port] = None;
                    success = false;
                }
            }
        }
        success
    }

    /// Return this round's input buffers to their upstream recycle queues.
    /// Ports that reached a finite item limit retain their buffer instead.
    fn push_work(&mut self) {
        for port in 0..self.inputs.len() {
            if self.still_expecting(port) {
                if let Some((buffer, lane)) = self.work[port].take() {
                    self.inputs[port].recycle(buffer, lane);
                }
            }
        }
    }

    /// Release the buffers retained by finite-limit ports. Without this the
    /// upstream pool never gets them back and the predecessor cannot drain.
    fn cleanup_fetched(&mut self) {
        for port in 0..self.inputs.len() {
            if self.expected[port] == Some(self.fetched[port]) {
                if let Some((buffer, lane)) = self.work[port].take() {
                    self.inputs[port].recycle(buffer, lane);
                }
            }
        }
    }

    /// Tell every upstream producer to wind down. Used on the teardown
    /// paths, where no more buffers will be recycled from here.
    fn pill_upstream(&self) {
        for input in &self.inputs {
            input.pill();
        }
    }

    /// Pull one empty buffer per output port from the recycle pools.
    /// Returns `None` when a pool delivered the pill, meaning the consumers
    /// are gone and the worker should wind down.
    fn fetch_result(&mut self) -> Result<Option<Vec<Buffer>>> {
        let mut results = Vec::with_capacity(self.output_pop.len());
        for port in 0..self.output_pop.len() {
            let buffer = match &self.output_pop[port] {
                Some(pop) => match pop.recv() {
                    Ok(Message::Buffer(buffer)) => buffer,
                    Ok(Message::PoisonPill) | Err(_) => return Ok(None),
                },
                None => self
                    .scratch[port]
                    .take()
                    .ok_or(Error::Uncategorized("scratch buffer missing"))?,
            };
            results.push(buffer);
        }
        Ok(Some(results))
    }

    /// Push this round's filled buffers to the downstream data queues.
    fn push_result(&mut self, results: Vec<Buffer>) {
        for (port, buffer) in results.into_iter().enumerate() {
            match &self.output_push[port] {
                Some(push) => {
                    let _ = push.send(Message::Buffer(buffer));
                }
                None => self.scratch[port] = Some(buffer),
            }
        }
    }

    /// Allocate the fixed-size buffer pool of every output port and seed the
    /// recycle queues with it.
    fn alloc_output_buffers(&mut self) -> Result<()> {
        for port in 0..self.output_dims.len() {
            let dims = self.output_dims[port].clone();
            match &self.output_seed[port] {
                Some(seed) => {
                    for _ in 0..OUTPUT_POOL_DEPTH {
                        let buffer = self.manager.request_buffer(&dims, None, None)?;
                        let _ = seed.send(Message::Buffer(buffer));
                    }
                }
                None => {
                    // Output port without consumers: keep one private buffer
                    // so callbacks still see a full result slice.
                    self.scratch[port] = Some(self.manager.request_buffer(&dims, None, None)?);
                }
            }
        }
        Ok(())
    }

    fn run_source(&mut self) -> Result<WorkerExit> {
        match self.task.kind_mut() {
            TaskKind::Source(source) => source.initialize(&mut self.output_dims)?,
            _ => return Err(Error::MethodNotImplemented("initialize").into()),
        }
        self.alloc_output_buffers()?;

        loop {
            // A stop request is translated into an end of stream, which
            // makes the pill propagate from here.
            if self.stop.is_stopped() {
                return Ok(WorkerExit::Finished);
            }
            let Some(mut results) = self.fetch_result()? else {
                return Ok(WorkerExit::Drained);
            };
            if !self.generate(&mut results)? {
                return Ok(WorkerExit::Finished);
            }
            self.task.add_processed(1);
            self.push_result(results);
        }
    }

    fn run_processor(&mut self) -> Result<WorkerExit> {
        if !self.fetch_work() {
            return Ok(WorkerExit::Finished);
        }
        {
            let work = collect_refs(&self.work);
            match self.task.kind_mut() {
                TaskKind::Processor(processor) => processor.initialize(&work, &mut self.output_dims)?,
                _ => return Err(Error::MethodNotImplemented("initialize").into()),
            }
        }
        self.alloc_output_buffers()?;

        let Some(mut results) = self.fetch_result()? else {
            self.cleanup_fetched();
            return Ok(WorkerExit::Drained);
        };
        let exit = loop {
            if self.task.uses_gpu() {
                if let Some(events) = self.process_gpu(&mut results)? {
                    for event in &events {
                        self.info.log_event(event);
                    }
                }
            } else {
                self.process_cpu(&mut results)?;
            }
            self.task.add_processed(1);

            self.push_work();
            self.push_result(results);

            results = match self.fetch_result()? {
                Some(results) => results,
                None => break WorkerExit::Drained,
            };
            if !self.fetch_work() {
                break WorkerExit::Finished;
            }
        };

        // Inputs retained under a finite item limit go back upstream now,
        // otherwise the preceding task can never drain its pool.
        self.cleanup_fetched();
        Ok(exit)
    }

    fn run_reductor(&mut self) -> Result<WorkerExit> {
        let got_first = self.fetch_work();

        // Initialization happens even when the stream was pilled before the
        // first batch: the reduce phase still runs over the default-primed
        // result buffers.
        let mut default_value = 0.0f32;
        {
            let work = collect_refs(&self.work);
            match self.task.kind_mut() {
                TaskKind::Reductor(reductor) => {
                    reductor.initialize(&work, &mut self.output_dims, &mut default_value)?
                }
                _ => return Err(Error::MethodNotImplemented("initialize").into()),
            }
        }
        self.alloc_output_buffers()?;

        // The same result buffers are reused across the whole collection
        // phase so results accumulate in place.
        let Some(mut results) = self.fetch_result()? else {
            self.cleanup_fetched();
            return Ok(WorkerExit::Drained);
        };
        for buffer in &mut results {
            buffer.fill_with_value(default_value);
        }

        if got_first {
            loop {
                self.collect(&mut results)?;
                self.task.add_processed(1);
                self.push_work();
                if !self.fetch_work() {
                    break;
                }
            }
        }

        let exit = loop {
            if !self.reduce(&mut results)? {
                break WorkerExit::Finished;
            }
            self.push_result(results);
            results = match self.fetch_result()? {
                Some(results) => results,
                None => break WorkerExit::Drained,
            };
        };

        self.cleanup_fetched();
        Ok(exit)
    }

    fn run_sink(&mut self) -> Result<WorkerExit> {
        if !self.fetch_work() {
            return Ok(WorkerExit::Finished);
        }
        {
            let work = collect_refs(&self.work);
            match self.task.kind_mut() {
                TaskKind::Sink(sink) => sink.initialize(&work)?,
                _ => return Err(Error::MethodNotImplemented("initialize").into()),
            }
        }

        loop {
            self.consume()?;
            self.task.add_processed(1);
            self.push_work();
            if !self.fetch_work() {
                break;
            }
        }

        self.cleanup_fetched();
        Ok(WorkerExit::Finished)
    }

    fn generate(&mut self, outputs: &mut [Buffer]) -> Result<bool> {
        self.timer.resume();
        let result = match self.task.kind_mut() {
            TaskKind::Source(source) => source.generate(outputs, &self.queue),
            _ => Err(Error::MethodNotImplemented("generate").into()),
        };
        self.timer.stop();
        result
    }

    fn process_cpu(&mut self, results: &mut [Buffer]) -> Result<()> {
        self.timer.resume();
        let result = {
            let work = collect_refs(&self.work);
            match self.task.kind_mut() {
                TaskKind::Processor(processor) => processor.process_cpu(&work, results, &self.queue),
                _ => Err(Error::MethodNotImplemented("process_cpu").into()),
            }
        };
        self.timer.stop();
        result
    }

    fn process_gpu(&mut self, results: &mut [Buffer]) -> Result<Option<Vec<GpuEvent>>> {
        self.timer.resume();
        let result = {
            let work = collect_refs(&self.work);
            match self.task.kind_mut() {
                TaskKind::Processor(processor) => processor.process_gpu(&work, results, &self.queue),
                _ => Err(Error::MethodNotImplemented("process_gpu").into()),
            }
        };
        self.timer.stop();
        result
    }

    fn collect(&mut self, results: &mut [Buffer]) -> Result<()> {
        self.timer.resume();
        let result = {
            let work = collect_refs(&self.work);
            match self.task.kind_mut() {
                TaskKind::Reductor(reductor) => reductor.collect(&work, results, &self.queue),
                _ => Err(Error::MethodNotImplemented("collect").into()),
            }
        };
        self.timer.stop();
        result
    }

    fn reduce(&mut self, results: &mut [Buffer]) -> Result<bool> {
        self.timer.resume();
        let result = match self.task.kind_mut() {
            TaskKind::Reductor(reductor) => reductor.reduce(results, &self.queue),
            _ => Err(Error::MethodNotImplemented("reduce").into()),
        };
        self.timer.stop();
        result
    }

    fn consume(&mut self) -> Result<()> {
        self.timer.resume();
        let result = {
            let work = collect_refs(&self.work);
            match self.task.kind_mut() {
                TaskKind::Sink(sink) => sink.consume(&work, &self.queue),
                _ => Err(Error::MethodNotImplemented("consume").into()),
            }
        };
        self.timer.stop();
        result
    }
}
