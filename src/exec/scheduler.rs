//! The scheduler launches one worker per task and collects their results.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use anyhow::Result;

use crate::exec::info::RunSummary;
use crate::exec::relation::Relation;
use crate::exec::worker::{self, WorkerContext};
use crate::exec::StopToken;
use crate::graph::TaskGraph;
use crate::resource::ResourceManager;
use crate::task::TaskRef;
use crate::Error;

/// Derive the runtime relations from the edges of a task graph.
///
/// Outgoing edges of a producer are assigned to its output ports in the
/// order the connections were made; once the ports are exhausted, the
/// remaining edges share the last port. A single-output producer therefore
/// fans out on port 0, with all consumers competing on one queue.
pub fn build_relations(graph: &TaskGraph) -> Result<Vec<Relation>> {
    let mut relations = Vec::new();
    for task in graph.tasks() {
        let edges = graph.outgoing_edges(&task)?;
        if edges.is_empty() {
            continue;
        }
        let n_outputs = {
            let guard = task.lock().map_err(Error::from)?;
            if guard.num_outputs() == 0 {
                return Err(Error::BadInputs(format!(
                    "`{}` has successors but no output ports",
                    guard.identifier()
                ))
                .into());
            }
            guard.num_outputs()
        };

        let mut per_port: Vec<Vec<(TaskRef, usize)>> = vec![Vec::new(); n_outputs];
        for (i, (consumer, input)) in edges.into_iter().enumerate() {
            per_port[i.min(n_outputs - 1)].push((consumer, input));
        }

        for (port, consumers) in per_port.into_iter().enumerate() {
            if consumers.is_empty() {
                continue;
            }
            let mut relation = Relation::new(task.clone(), port);
            for (consumer, input) in consumers {
                relation.add_consumer(consumer, input);
            }
            relations.push(relation);
        }
    }
    Ok(relations)
}

/// Executes task graphs by running every task on its own thread.
///
/// The scheduler derives the relations from the graph, spins up one worker
/// per task and joins them. There is no central loop at runtime; ordering
/// emerges from the dataflow edges and the backpressure of the recycle
/// pools.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use deimos::prelude::*;
/// # fn graph() -> TaskGraph { TaskGraph::new() }
///
/// let graph = graph();
/// graph.is_alright()?;
/// let scheduler = Scheduler::new(Arc::new(HostResources::new(1)));
/// let summary = scheduler.run(&graph)?;
/// println!("finished in {:?}", summary.wall_time);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub struct Scheduler {
    manager: Arc<dyn ResourceManager>,
    stop: StopToken,
}

impl Scheduler {
    /// Create a scheduler on top of a resource manager.
    pub fn new(manager: Arc<dyn ResourceManager>) -> Self {
        Scheduler {
            manager,
            stop: StopToken::new(),
        }
    }

    /// The token external code can use to request a cooperative shutdown.
    /// Sources observe it between iterations and translate it into poison
    /// pills, which then drain the graph in topological order.
    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }

    /// Execute a task graph and block until every worker has finished.
    pub fn run(&self, graph: &TaskGraph) -> Result<RunSummary> {
        let relations = build_relations(graph)?;
        self.run_relations(&relations)
    }

    /// Execute the tasks connected by `relations` and block until every
    /// worker has finished. The unique task set is derived from the
    /// producer and consumers of every relation.
    ///
    /// The first error any worker returns is propagated once all workers
    /// have joined; buffers are not reclaimed on the error path since the
    /// task data may be corrupt.
    pub fn run_relations(&self, relations: &[Relation]) -> Result<RunSummary> {
        let queues = self.manager.command_queues();

        let mut tasks: Vec<TaskRef> = Vec::new();
        for relation in relations {
            let mut insert = |candidate: &TaskRef| {
                if !tasks.iter().any(|t| TaskRef::ptr_eq(t, candidate)) {
                    tasks.push(candidate.clone());
                }
            };
            insert(relation.producer());
            for (consumer, _) in relation.consumers() {
                insert(consumer);
            }
        }

        let start = Instant::now();
        let results: Vec<Result<_>> = thread::scope(|scope| {
            let handles: Vec<_> = tasks
                .iter()
                .map(|task| {
                    let ctx = WorkerContext {
                        task: task.clone(),
                        relations,
                        manager: self.manager.as_ref(),
                        queues: &queues,
                        stop: self.stop.clone(),
                    };
                    scope.spawn(move || worker::run(ctx))
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(Error::Uncategorized("worker thread panicked").into()))
                })
                .collect()
        });
        let wall_time = start.elapsed();

        let mut summary = RunSummary {
            wall_time,
            tasks: HashMap::new(),
        };
        let mut first_error = None;
        for (task, result) in tasks.iter().zip(results) {
            match result {
                Ok(info) => {
                    let identifier = task.lock().map_err(Error::from)?.identifier().to_string();
                    summary.tasks.insert(identifier, info);
                }
                Err(error) => {
                    if first_error.is_none() {
                        first_error = Some(error);
                    }
                }
            }
        }

        if let Some(error) = first_error {
            return Err(error);
        }

        info!("Processing finished after {:.5} seconds", wall_time.as_secs_f64());
        Ok(summary)
    }
}
