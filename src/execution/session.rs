use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::execution::scheduler::{self, BuiltGraph, Scheduler};
use crate::graph::node::Node;
use crate::graph::topology::Topology;
use crate::task::Task;
use crate::tensor::{Shape, TensorView, TensorViewMut};

/// How the scheduler maps groups onto worker threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// One worker thread services every node in topological order.
    Serial,
    /// One worker thread per group.
    Parallel,
}

/// Session configuration. `num_thread` is an advisory upper bound on the
/// number of groups; exceeding it logs a warning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub mode: ExecutionMode,
    pub num_thread: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Parallel,
            num_thread: 1,
        }
    }
}

struct SessionState {
    nodes: HashMap<String, Node>,
    creation_order: Vec<String>,
    declared_groups: Vec<Vec<String>>,
    graph: Option<Arc<BuiltGraph>>,
    scheduler: Option<Scheduler>,
}

/// Top-level facade binding nodes, topology and scheduler.
///
/// The session owns every node and queue pair for its lifetime. `feed` and
/// `get_result` may be called concurrently from separate external threads
/// after `start`; they are single-producer / single-consumer with respect
/// to the graph.
pub struct Session {
    name: String,
    config: SessionConfig,
    state: Mutex<SessionState>,
    started: AtomicBool,
    stopped: AtomicBool,
    error_slot: Arc<Mutex<Option<Error>>>,
}

impl Session {
    pub fn new(name: &str, config: SessionConfig) -> Self {
        Self {
            name: name.to_string(),
            config,
            state: Mutex::new(SessionState {
                nodes: HashMap::new(),
                creation_order: Vec::new(),
                declared_groups: Vec::new(),
                graph: None,
                scheduler: None,
            }),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            error_slot: Arc::new(Mutex::new(None)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Register a normal node wrapping a user task.
    pub fn create_node<T: Task + 'static>(
        &self,
        name: &str,
        task: T,
        input_shapes: Vec<Shape>,
        output_shapes: Vec<Shape>,
        group_id: usize,
    ) -> Result<()> {
        let mut state = self.lock_state();
        if state.graph.is_some() {
            return Err(Error::AlreadyBuilt);
        }
        if state.nodes.contains_key(name) {
            return Err(Error::DuplicateNode(name.to_string()));
        }
        let node = Node::new_normal(name, Box::new(task), input_shapes, output_shapes, group_id);
        state.nodes.insert(name.to_string(), node);
        state.creation_order.push(name.to_string());
        Ok(())
    }

    /// Register a composite node encapsulating the sub-graph described by
    /// `relation`. The referenced nodes are claimed out of the session at
    /// build time and scheduled inside the composite.
    pub fn create_composite(&self, name: &str, relation: &[(&str, &str)]) -> Result<()> {
        let mut state = self.lock_state();
        if state.graph.is_some() {
            return Err(Error::AlreadyBuilt);
        }
        if state.nodes.contains_key(name) {
            return Err(Error::DuplicateNode(name.to_string()));
        }
        let relation = own_edges(relation);
        let node = Node::new_composite(name, relation);
        state.nodes.insert(name.to_string(), node);
        state.creation_order.push(name.to_string());
        Ok(())
    }

    /// Assign group ids: group *i* of the ordered list marks each named
    /// node with id *i*. Nodes left unnamed keep the id given at creation
    /// (default 0).
    pub fn group(&self, groups: &[&[&str]]) -> Result<()> {
        let mut state = self.lock_state();
        if state.graph.is_some() {
            return Err(Error::AlreadyBuilt);
        }

        let mut assigned = HashSet::new();
        for members in groups {
            for name in *members {
                if !state.nodes.contains_key(*name) {
                    return Err(Error::UnknownNode(name.to_string()));
                }
                if !assigned.insert(name.to_string()) {
                    return Err(Error::InvalidGraph(format!(
                        "node '{}' named in more than one group",
                        name
                    )));
                }
            }
        }

        for (gid, members) in groups.iter().enumerate() {
            for name in *members {
                if let Some(node) = state.nodes.get_mut(*name) {
                    node.mark_group_id(gid);
                }
            }
        }
        state.declared_groups = groups
            .iter()
            .map(|members| members.iter().map(|n| n.to_string()).collect())
            .collect();
        Ok(())
    }

    /// Build the topology from the edge list, wire queue pairs along every
    /// edge, validate shape contracts and reorder queue lists. May be
    /// called exactly once.
    pub fn build_graph(&self, edges: &[(&str, &str)]) -> Result<()> {
        let mut state = self.lock_state();
        if state.graph.is_some() {
            return Err(Error::AlreadyBuilt);
        }

        let edges = own_edges(edges);

        // Composite nodes claim their internal nodes first; the outer
        // topology is built over whatever remains.
        let composite_names: Vec<String> = state
            .creation_order
            .iter()
            .filter(|name| {
                state
                    .nodes
                    .get(*name)
                    .map(|n| n.is_composite())
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        for name in composite_names {
            let Some(mut node) = state.nodes.remove(&name) else {
                // Already claimed by an enclosing composite.
                continue;
            };
            if let Some(relation) = node.unbuilt_composite_relation().map(|r| r.to_vec()) {
                let body = scheduler::build_composite_body(&relation, &mut state.nodes)?;
                node.set_composite_body(body)?;
            }
            state.nodes.insert(name, node);
        }

        let known: HashSet<String> = state.nodes.keys().cloned().collect();
        let topology = Topology::build(&known, &edges)?;

        // Registered nodes that appear in no edge are not part of the
        // graph.
        let orphans: Vec<String> = state
            .nodes
            .keys()
            .filter(|name| !topology.contains(name))
            .cloned()
            .collect();
        for name in orphans {
            warn!(node = %name, "node is not connected to the graph, dropping");
            state.nodes.remove(&name);
            state.creation_order.retain(|n| n != &name);
        }

        let mut nodes = std::mem::take(&mut state.nodes);
        let (input_node, output_node, pairs) = match scheduler::wire_queues(&mut nodes, &topology) {
            Ok(wired) => wired,
            Err(e) => {
                state.nodes = nodes;
                return Err(e);
            }
        };

        let creation_order: Vec<String> = state
            .creation_order
            .iter()
            .filter(|name| topology.contains(name))
            .cloned()
            .collect();

        let graph = Arc::new(BuiltGraph {
            nodes,
            topology,
            input_node,
            output_node,
            pairs: pairs.clone(),
            creation_order,
            declared_groups: std::mem::take(&mut state.declared_groups),
        });

        info!(
            session = %self.name,
            nodes = graph.nodes.len(),
            edges = graph.topology.edges().len(),
            input = %graph.input_node,
            output = %graph.output_node,
            "graph built"
        );

        state.scheduler = Some(Scheduler::new(pairs, self.error_slot.clone()));
        state.graph = Some(graph);
        Ok(())
    }

    /// Spawn the worker threads. A second call while running is a warned
    /// no-op.
    pub fn start(&self) -> Result<()> {
        let mut state = self.lock_state();
        let graph = state.graph.clone().ok_or(Error::NotBuilt)?;
        if self.stopped.load(Ordering::Acquire) {
            return Err(Error::AlreadyStarted);
        }
        if self.started.swap(true, Ordering::AcqRel) {
            warn!(session = %self.name, "start() called twice, ignoring");
            return Ok(());
        }

        let serial = self.config.mode == ExecutionMode::Serial;
        let plan = scheduler::plan_workers(&graph, serial);
        let scheduler = state.scheduler.as_mut().ok_or(Error::NotBuilt)?;
        scheduler.tasks_spawn(&self.name, &graph, plan, self.config.num_thread)?;
        info!(session = %self.name, mode = ?self.config.mode, "session started");
        Ok(())
    }

    /// Stop the workers and join them. A second call after the first
    /// completes is a warned no-op. Surfaces a pending task error.
    pub fn stop(&self) -> Result<()> {
        if !self.started.load(Ordering::Acquire) && !self.stopped.load(Ordering::Acquire) {
            return Err(Error::NotStarted);
        }
        if self.stopped.swap(true, Ordering::AcqRel) {
            warn!(session = %self.name, "stop() called twice, ignoring");
            return Ok(());
        }

        let mut state = self.lock_state();
        if let Some(scheduler) = state.scheduler.as_mut() {
            scheduler.tasks_stop();
            scheduler.tasks_join();
        }
        self.started.store(false, Ordering::Release);
        info!(session = %self.name, "session stopped");

        match self.pending_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Push one tensor onto the graph's input edge. Blocks until the edge
    /// has a free slot; that stall is the external face of backpressure.
    ///
    /// A shape, element-type or memory-type violation against the edge
    /// contract is a data-integrity error: it kills the whole graph, not
    /// just this call.
    pub fn feed(&self, input: &TensorView<'_>) -> Result<()> {
        let graph = self.running_graph()?;
        if let Some(err) = self.pending_error() {
            return Err(err);
        }
        let entry = graph.node(&graph.input_node)?;
        let queue = entry
            .input_queues()
            .first()
            .ok_or_else(|| Error::InvalidGraph("graph input has no feed queue".to_string()))?;
        match queue.enqueue(input) {
            Ok(()) => Ok(()),
            Err(Error::Stopped) => Err(Error::Stopped),
            Err(err) => {
                self.abort(&err);
                Err(err)
            }
        }
    }

    /// Block until a result is available and copy it into `output`. When
    /// the graph died, the terminating error is surfaced here once the
    /// remaining results have drained.
    ///
    /// A wrong-shaped `output` view is a data-integrity error and fatal to
    /// the graph; the undelivered result stays at the head of the edge.
    pub fn get_result(&self, output: &mut TensorViewMut<'_>) -> Result<()> {
        let graph = self.running_graph()?;
        let exit = graph.node(&graph.output_node)?;
        let queue = exit
            .output_queues()
            .first()
            .ok_or_else(|| Error::InvalidGraph("graph output has no fetch queue".to_string()))?;
        match queue.dequeue(output) {
            Ok(()) => Ok(()),
            Err(Error::Stopped) => match self.pending_error() {
                Some(err) => Err(err),
                None => Err(Error::Stopped),
            },
            Err(err) => {
                self.abort(&err);
                Err(err)
            }
        }
    }

    /// Fatal path shared with worker-side task failures: record the first
    /// error in the session slot, raise the stop flag and close every
    /// queue pair so workers and external callers wind down.
    fn abort(&self, err: &Error) {
        warn!(session = %self.name, error = %err, "data-integrity failure, stopping the graph");
        if let Ok(mut slot) = self.error_slot.lock() {
            slot.get_or_insert(err.clone());
        }
        let state = self.lock_state();
        if let Some(scheduler) = state.scheduler.as_ref() {
            scheduler.tasks_stop();
        }
    }

    /// Diagnostic dump of nodes, shapes, relationships, queue pairs and
    /// groups.
    pub fn show_info(&self) {
        let state = self.lock_state();
        info!(session = %self.name, "session info");
        let Some(graph) = state.graph.as_ref() else {
            info!(
                nodes = state.creation_order.len(),
                "graph not built yet; registered nodes: {:?}", state.creation_order
            );
            return;
        };

        info!(input = %graph.input_node, output = %graph.output_node, "graph boundaries");
        for name in graph.topology.run_order() {
            let Ok(node) = graph.node(name) else {
                continue;
            };
            info!(
                node = %name,
                group = node.group_id(),
                inputs = ?node.input_shapes(),
                outputs = ?node.output_shapes(),
                "node"
            );
            info!(
                node = %name,
                in_nodes = ?node.input_nodes().unwrap_or(&[]),
                out_nodes = ?node.output_nodes().unwrap_or(&[]),
                "relationship"
            );
        }
        for pair in &graph.pairs {
            info!(
                front = %pair.front_name(),
                rear = %pair.rear_name(),
                capacity = pair.capacity(),
                full = pair.full_len(),
                free = pair.free_len(),
                "queue pair"
            );
        }
        for (gid, members) in graph.declared_groups.iter().enumerate() {
            info!(group = gid, members = ?members, "group");
        }
    }

    fn running_graph(&self) -> Result<Arc<BuiltGraph>> {
        let state = self.lock_state();
        let graph = state.graph.clone().ok_or(Error::NotBuilt)?;
        drop(state);
        if !self.started.load(Ordering::Acquire) {
            return Err(Error::NotStarted);
        }
        Ok(graph)
    }

    fn pending_error(&self) -> Option<Error> {
        self.error_slot
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().cloned())
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.started.load(Ordering::Acquire) && !self.stopped.load(Ordering::Acquire) {
            let _ = self.stop();
        }
    }
}

fn own_edges(edges: &[(&str, &str)]) -> Vec<(String, String)> {
    edges
        .iter()
        .map(|(src, dst)| (src.to_string(), dst.to_string()))
        .collect()
}
