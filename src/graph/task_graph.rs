//! The task graph: a typed multigraph of task nodes with validation,
//! expansion and GPU mapping.

use std::collections::HashMap;

use anyhow::Result;
use petgraph::dot::Dot;

use crate::graph::generic::{Graph, NodeId};
use crate::remote::{RemoteMode, RemoteRef};
use crate::resource::GpuNode;
use crate::task::builtin::{DummyTask, RemoteTask};
use crate::task::{ProcNode, Task, TaskMode, TaskRef, TaskRole};
use crate::Error;

/// The central data structure connecting task nodes into computational
/// pipelines. To execute a task graph, hand it to a
/// [`Scheduler`](crate::Scheduler).
///
/// Edges carry the consumer's input port. Tasks are registered under their
/// unique instance identifier, and the graph additionally carries the
/// partition `(index, total)` of this shard in a distributed deployment.
#[derive(Debug)]
pub struct TaskGraph {
    graph: Graph<TaskRef>,
    names: HashMap<String, NodeId>,
    index: usize,
    total: usize,
    remote_tasks: Vec<NodeId>,
}

impl Default for TaskGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskGraph {
    /// Create a task graph without any nodes.
    pub fn new() -> Self {
        TaskGraph {
            graph: Graph::new(),
            names: HashMap::new(),
            index: 0,
            total: 1,
            remote_tasks: Vec::new(),
        }
    }

    /// Number of tasks in the graph.
    pub fn num_tasks(&self) -> usize {
        self.graph.num_nodes()
    }

    /// Add a task to the graph and return the shared handle to it.
    /// # Errors
    /// - Fails with [`Error::BadInputs`] if a task with the same identifier
    ///   is already registered.
    pub fn add_task(&mut self, task: Task) -> Result<TaskRef> {
        let identifier = task.identifier().to_string();
        if self.names.contains_key(&identifier) {
            return Err(Error::BadInputs(format!("duplicate task identifier `{identifier}`")).into());
        }
        let task = task.into_ref();
        let node = self.graph.add_node(task.clone());
        self.names.insert(identifier, node);
        Ok(task)
    }

    pub(crate) fn add_task_ref(&mut self, task: TaskRef) -> Result<NodeId> {
        let identifier = task.lock().map_err(Error::from)?.identifier().to_string();
        if self.names.contains_key(&identifier) {
            return Err(Error::BadInputs(format!("duplicate task identifier `{identifier}`")).into());
        }
        let node = self.graph.add_node(task);
        self.names.insert(identifier, node);
        Ok(node)
    }

    /// Look up a task by its identifier.
    pub fn get(&self, identifier: &str) -> Option<TaskRef> {
        self.names
            .get(identifier)
            .and_then(|&node| self.graph.node(node))
            .cloned()
    }

    /// All tasks, in insertion order.
    pub fn tasks(&self) -> Vec<TaskRef> {
        self.graph.nodes().filter_map(|node| self.graph.node(node)).cloned().collect()
    }

    /// All tasks without predecessors.
    pub fn roots(&self) -> Vec<TaskRef> {
        self.graph
            .roots()
            .into_iter()
            .filter_map(|node| self.graph.node(node))
            .cloned()
            .collect()
    }

    /// All tasks without successors.
    pub fn leaves(&self) -> Vec<TaskRef> {
        self.graph
            .leaves()
            .into_iter()
            .filter_map(|node| self.graph.node(node))
            .cloned()
            .collect()
    }

    fn node_id(&self, task: &TaskRef) -> Result<NodeId> {
        let identifier = task.lock().map_err(Error::from)?.identifier().to_string();
        let node = *self.names.get(&identifier).ok_or(Error::NodeNotFound)?;
        let registered = self.graph.node(node).ok_or(Error::NodeNotFound)?;
        if !TaskRef::ptr_eq(registered, task) {
            return Err(Error::NodeNotFound.into());
        }
        Ok(node)
    }

    /// Connect `from` to `to` using `to`'s default input port 0. To specify
    /// any other port, use [`Self::connect_full()`].
    pub fn connect(&mut self, from: &TaskRef, to: &TaskRef) -> Result<()> {
        self.connect_full(from, to, 0)
    }

    /// Connect `from` to `to` using `to`'s input port `input`.
    /// # Errors
    /// - Fails with [`Error::BadInputs`] if `input` is out of range for `to`.
    /// - Fails with [`Error::CycleDetected`] if the edge would close a cycle.
    pub fn connect_full(&mut self, from: &TaskRef, to: &TaskRef, input: usize) -> Result<()> {
        let from_node = self.node_id(from)?;
        let to_node = self.node_id(to)?;
        {
            let to_guard = to.lock().map_err(Error::from)?;
            if input >= to_guard.num_inputs() {
                return Err(Error::BadInputs(format!(
                    "`{}` has no input port {input}",
                    to_guard.identifier()
                ))
                .into());
            }
            debug!(
                "CONN {} -> {} [input={}]",
                from.lock().map_err(Error::from)?.identifier(),
                to_guard.identifier(),
                input
            );
        }
        self.graph.connect(from_node, to_node, input)
    }

    /// Outgoing edges of `task` as `(consumer, input port)` pairs, in the
    /// order the connections were made.
    pub fn outgoing_edges(&self, task: &TaskRef) -> Result<Vec<(TaskRef, usize)>> {
        let node = self.node_id(task)?;
        Ok(self
            .graph
            .edges_from(node)
            .into_iter()
            .filter_map(|(target, label)| self.graph.node(target).cloned().map(|t| (t, label)))
            .collect())
    }

    /// All direct predecessors of `task`, one entry per incoming edge.
    pub fn predecessors(&self, task: &TaskRef) -> Result<Vec<TaskRef>> {
        let node = self.node_id(task)?;
        Ok(self
            .graph
            .predecessors(node)
            .into_iter()
            .filter_map(|p| self.graph.node(p))
            .cloned()
            .collect())
    }

    /// All direct successors of `task`, one entry per outgoing edge.
    pub fn successors(&self, task: &TaskRef) -> Result<Vec<TaskRef>> {
        let node = self.node_id(task)?;
        Ok(self
            .graph
            .successors(node)
            .into_iter()
            .filter_map(|s| self.graph.node(s))
            .cloned()
            .collect())
    }

    /// Set the partition of this task graph.
    /// # Errors
    /// - Fails with [`Error::BadInputs`] unless `index < total`.
    pub fn set_partition(&mut self, index: usize, total: usize) -> Result<()> {
        if index >= total {
            return Err(Error::BadInputs(format!("partition index {index} must be less than total {total}")).into());
        }
        self.index = index;
        self.total = total;
        Ok(())
    }

    /// The partition `(index, total)` of this task graph.
    pub fn get_partition(&self) -> (usize, usize) {
        (self.index, self.total)
    }

    /// Check that the tasks in the graph are properly connected: every leaf
    /// must be a sink. A task receiving both processor and reductor inputs
    /// is reported as a warning, since a reductor drains its upstream before
    /// producing and can starve a processor sibling indefinitely.
    pub fn is_alright(&self) -> Result<()> {
        self.check(false)
    }

    /// Like [`Self::is_alright()`], but the mixed processor/reductor warning
    /// is promoted to an error.
    pub fn is_alright_strict(&self) -> Result<()> {
        self.check(true)
    }

    fn check(&self, strict: bool) -> Result<()> {
        for node in self.graph.nodes() {
            if self.graph.num_predecessors(node) < 2 {
                continue;
            }
            let mut has_processor = false;
            let mut has_reductor = false;
            for pred in self.graph.predecessors(node) {
                let task = self.graph.node(pred).ok_or(Error::NodeNotFound)?;
                match task.lock().map_err(Error::from)?.mode() {
                    TaskMode::Processor => has_processor = true,
                    TaskMode::Reductor => has_reductor = true,
                    _ => {}
                }
            }
            if has_processor && has_reductor {
                let task = self.graph.node(node).ok_or(Error::NodeNotFound)?;
                let plugin = task.lock().map_err(Error::from)?.plugin_name().to_string();
                if strict {
                    return Err(Error::BadInputs(format!(
                        "`{plugin}` receives both processor and reductor inputs which may deadlock"
                    ))
                    .into());
                }
                warn!("`{plugin}` receives both processor and reductor inputs which may deadlock");
            }
        }

        for leaf in self.graph.leaves() {
            let task = self.graph.node(leaf).ok_or(Error::NodeNotFound)?;
            let guard = task.lock().map_err(Error::from)?;
            if guard.mode() != TaskMode::Sink {
                return Err(Error::BadInputs(format!(
                    "`{}` is a leaf node but not a sink task",
                    guard.plugin_name()
                ))
                .into());
            }
        }

        Ok(())
    }

    /// Pick an unused identifier derived from `base`.
    fn fresh_identifier(&self, base: &str) -> String {
        let mut n = 1;
        loop {
            let candidate = format!("{base}-{n}");
            if !self.names.contains_key(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    /// Expand the graph so that most of the available devices can be
    /// occupied: the longest GPU-only path is duplicated into `n_gpus`
    /// parallel lanes. When `remotes` is non-empty, the interior of that
    /// path is additionally shipped to every remote worker as a serialized
    /// subgraph, spliced in as a placeholder lane between the same anchors.
    ///
    /// Expansion is skipped with a warning when more than one node on the
    /// path has multiple inputs, since the shape is then too ambiguous to
    /// duplicate safely. With exactly one such node, the path is pruned to
    /// begin strictly after it.
    pub fn expand(&mut self, n_gpus: usize, remotes: &[RemoteRef]) -> Result<()> {
        let mut path = self.graph.find_longest_path(|task| {
            task.lock().map(|guard| guard.uses_gpu()).unwrap_or(false)
        });

        let common: Vec<NodeId> = path
            .iter()
            .copied()
            .filter(|&node| self.graph.num_predecessors(node) > 1)
            .collect();

        if common.len() > 1 {
            warn!("more than one node on the GPU path has multiple inputs, not going to expand");
            return Ok(());
        }

        if let Some(&common_node) = common.first() {
            debug!("found node with multiple inputs, pruning path");
            let position = path.iter().position(|&node| node == common_node).ok_or(Error::NodeNotFound)?;
            path.drain(..=position);
        }

        if path.is_empty() {
            return Ok(());
        }

        // Anchor the lane into the unchanged parts of the graph.
        if let Some(&pred) = self.graph.predecessors(path[0]).first() {
            path.insert(0, pred);
        }
        if let Some(&succ) = self.graph.successors(*path.last().unwrap()).first() {
            path.push(succ);
        }

        if !remotes.is_empty() {
            debug!("expand for {} remote nodes", remotes.len());
            self.expand_remotes(remotes, &path)?;
        }

        debug!("expand for {n_gpus} GPU nodes");
        for _ in 1..n_gpus {
            self.expand_lane(&path)?;
        }

        Ok(())
    }

    fn expand_lane(&mut self, path: &[NodeId]) -> Result<()> {
        use std::cell::RefCell;
        use std::collections::HashSet;

        // The copy callback runs while the graph is mutably borrowed, so
        // identifier bookkeeping goes through a side table.
        let used: RefCell<HashSet<String>> = RefCell::new(self.names.keys().cloned().collect());
        let failure: RefCell<Option<Error>> = RefCell::new(None);

        let clones = self.graph.expand_path(path, |task| {
            let guard = match task.lock() {
                Ok(guard) => guard,
                Err(_) => {
                    *failure.borrow_mut() = Some(Error::PoisonError);
                    return task.clone();
                }
            };
            let mut used = used.borrow_mut();
            let mut n = 1;
            let identifier = loop {
                let candidate = format!("{}-{}", guard.identifier(), n);
                if !used.contains(&candidate) {
                    break candidate;
                }
                n += 1;
            };
            used.insert(identifier.clone());
            guard.duplicate_as(identifier).into_ref()
        })?;

        if let Some(error) = failure.into_inner() {
            return Err(error.into());
        }

        for clone in clones {
            let task = self.graph.node(clone).ok_or(Error::NodeNotFound)?.clone();
            let identifier = task.lock().map_err(Error::from)?.identifier().to_string();
            self.names.insert(identifier, clone);
        }
        Ok(())
    }

    fn expand_remotes(&mut self, remotes: &[RemoteRef], path: &[NodeId]) -> Result<()> {
        if path.len() < 3 {
            warn!("GPU path has no interior nodes, not expanding to remotes");
            return Ok(());
        }
        let interior: Vec<TaskRef> = path[1..path.len() - 1]
            .iter()
            .map(|&node| self.graph.node(node).ok_or(Error::NodeNotFound).cloned())
            .collect::<Result<_, _>>()?;
        let first = self.graph.node(path[0]).ok_or(Error::NodeNotFound)?.clone();
        let last = self.graph.node(*path.last().unwrap()).ok_or(Error::NodeNotFound)?.clone();

        // The remote always gets at least one operator, a trivial subgraph
        // is padded with a dummy task.
        let mut remote_graph = TaskGraph::new();
        if interior.len() == 1 {
            let dummy = remote_graph.add_task(Task::new(DummyTask::PLUGIN_NAME, "dummy", DummyTask::kind())?)?;
            remote_graph.add_task_ref(interior[0].clone())?;
            remote_graph.connect(&dummy, &interior[0])?;
        } else {
            for task in &interior {
                remote_graph.add_task_ref(task.clone())?;
            }
            for pair in interior.windows(2) {
                remote_graph.connect(&pair[0], &pair[1])?;
            }
        }
        let json = remote_graph.to_json_string()?;

        for remote in remotes {
            remote.send_json(RemoteMode::Stream, &json)?;

            let identifier = self.fresh_identifier("remote");
            let mut task = Task::new("remote", identifier, RemoteTask::kind())?;
            task.set_proc_node(ProcNode::Remote(remote.clone()));
            let task = task.into_ref();
            let node = self.add_task_ref(task.clone())?;
            self.remote_tasks.push(node);

            self.connect(&first, &task)?;
            self.connect(&task, &last)?;
            debug!(
                "remote: connected {} -> [remote] -> {}",
                first.lock().map_err(Error::from)?.identifier(),
                last.lock().map_err(Error::from)?.identifier()
            );
        }

        Ok(())
    }

    /// Map task nodes onto the given GPU execution contexts.
    ///
    /// Walks depth-first from every root, binding each still-unmapped
    /// GPU-using or input task to the current context and advancing
    /// round-robin on every non-remote hop, so parallel lanes land on
    /// distinct devices. Already-mapped tasks are never overwritten.
    pub fn map(&mut self, gpu_nodes: &[GpuNode]) {
        if gpu_nodes.is_empty() {
            return;
        }
        for root in self.graph.roots() {
            self.map_proc_node(root, 0, gpu_nodes);
        }
    }

    fn map_proc_node(&self, node: NodeId, mut proc_index: usize, gpu_nodes: &[GpuNode]) {
        let Some(task) = self.graph.node(node) else { return };
        {
            let mut guard = task.lock().unwrap();
            let eligible = guard.uses_gpu() || guard.role() == TaskRole::Input;
            if eligible && guard.proc_node().is_none() {
                debug!("MAP GpuNode-{} -> {}", gpu_nodes[proc_index].index(), guard.identifier());
                guard.set_proc_node(ProcNode::Gpu(gpu_nodes[proc_index].clone()));
            }
        }

        let n_gpus = gpu_nodes.len();
        for succ in self.graph.successors(node) {
            self.map_proc_node(succ, proc_index, gpu_nodes);
            let is_remote = self
                .graph
                .node(succ)
                .map(|t| t.lock().map(|g| g.role() == TaskRole::Remote).unwrap_or(false))
                .unwrap_or(false);
            if !is_remote {
                proc_index = (proc_index + 1) % n_gpus;
            }
        }
    }

    /// The remote placeholder tasks created by expansion, in creation
    /// order.
    pub fn remote_tasks(&self) -> Vec<TaskRef> {
        self.remote_tasks
            .iter()
            .filter_map(|&node| self.graph.node(node))
            .cloned()
            .collect()
    }

    /// Fuse task nodes to increase data locality.
    ///
    /// Note: This is not implemented and a no-op right now.
    pub fn fuse(&mut self) {}

    /// Get the string representation of this graph in `dot` format.
    pub fn dot(&self) -> String {
        let mapped = self.graph.graph.map(
            |_, task| {
                task.lock()
                    .map(|guard| guard.identifier().to_string())
                    .unwrap_or_else(|_| String::from("<poisoned>"))
            },
            |_, &label| label,
        );
        format!("{}", Dot::new(&mapped))
    }
}
