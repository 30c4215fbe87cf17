use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::graph::node::{CompositeBody, Node};
use crate::graph::topology::Topology;
use crate::queue::BlockingQueuePair;

/// Per-edge queue capacity. Two buffers per edge keep producer and
/// consumer decoupled while bounding the tensors in existence.
pub const EDGE_CAPACITY: usize = 2;

/// Queue name used on the external side of boundary pairs.
pub(crate) const EXTERNAL: &str = "external";

/// Parked multi-node workers re-scan their group at this interval.
const IDLE_POLL: Duration = Duration::from_micros(200);

/// Resolve neighbor lists, allocate one queue pair per edge plus the
/// boundary pairs, validate shape contracts and reorder every node's queue
/// lists. Returns the boundary node names and all allocated pairs.
///
/// Shape contract: on edge (u -> v), the tensors carry
/// `u.output_shapes[i]` where `i` is v's position among u's outputs, and
/// that shape must equal `v.input_shapes[j]` for u's position among v's
/// inputs.
pub(crate) fn wire_queues(
    nodes: &mut HashMap<String, Node>,
    topology: &Topology,
) -> Result<(String, String, Vec<Arc<BlockingQueuePair>>)> {
    for name in topology.run_order() {
        let node = nodes
            .get_mut(name)
            .ok_or_else(|| Error::UnknownNode(name.clone()))?;
        node.set_input_nodes(topology.inputs_of(name).map(|v| v.to_vec()));
        node.set_output_nodes(topology.outputs_of(name).map(|v| v.to_vec()));
    }

    let entry = topology.input_node()?.to_string();
    let exit = topology.output_node()?.to_string();

    // Every non-boundary edge list must line up with the declared shapes.
    for name in topology.run_order() {
        let node = &nodes[name];
        if let Some(inputs) = node.input_nodes() {
            if inputs.len() != node.input_shapes().len() {
                return Err(Error::InvalidGraph(format!(
                    "node '{}' declares {} input shapes but has {} input edges",
                    name,
                    node.input_shapes().len(),
                    inputs.len()
                )));
            }
        }
        if let Some(outputs) = node.output_nodes() {
            if outputs.len() != node.output_shapes().len() {
                return Err(Error::InvalidGraph(format!(
                    "node '{}' declares {} output shapes but has {} output edges",
                    name,
                    node.output_shapes().len(),
                    outputs.len()
                )));
            }
        }
    }

    let mut pairs = Vec::new();

    for (src, dst) in topology.edges() {
        let out_index = position_of(nodes[src].output_nodes(), dst)?;
        let in_index = position_of(nodes[dst].input_nodes(), src)?;
        let shape = nodes[src].output_shapes()[out_index].clone();
        let expected = &nodes[dst].input_shapes()[in_index];
        if &shape != expected {
            return Err(Error::ShapeMismatch {
                expected: expected.clone(),
                actual: shape,
            });
        }

        let pair = Arc::new(BlockingQueuePair::new(src, dst, &shape, EDGE_CAPACITY)?);
        pairs.push(pair.clone());
        if let Some(node) = nodes.get_mut(src) {
            node.attach_output_queue(pair.clone());
        }
        if let Some(node) = nodes.get_mut(dst) {
            node.attach_input_queue(pair);
        }
    }

    // Boundary pairs: the graph input node is fed externally, the graph
    // output node is drained externally.
    let entry_shapes = nodes[&entry].input_shapes().to_vec();
    for shape in &entry_shapes {
        let pair = Arc::new(BlockingQueuePair::new(EXTERNAL, &entry, shape, EDGE_CAPACITY)?);
        pairs.push(pair.clone());
        if let Some(node) = nodes.get_mut(&entry) {
            node.attach_input_queue(pair);
        }
    }
    let exit_shapes = nodes[&exit].output_shapes().to_vec();
    for shape in &exit_shapes {
        let pair = Arc::new(BlockingQueuePair::new(&exit, EXTERNAL, shape, EDGE_CAPACITY)?);
        pairs.push(pair.clone());
        if let Some(node) = nodes.get_mut(&exit) {
            node.attach_output_queue(pair);
        }
    }

    for name in topology.run_order() {
        if let Some(node) = nodes.get_mut(name) {
            node.reorder_input_queues();
            node.reorder_output_queues();
        }
    }

    Ok((entry, exit, pairs))
}

fn position_of(neighbors: Option<&[String]>, name: &str) -> Result<usize> {
    neighbors
        .and_then(|list| list.iter().position(|n| n == name))
        .ok_or_else(|| Error::UnknownNode(name.to_string()))
}

/// Build the internal body of a composite node: claim the referenced nodes
/// out of `pool`, recursively building nested composites, then wire the
/// internal topology the same way the outer graph is wired.
pub(crate) fn build_composite_body(
    relation: &[(String, String)],
    pool: &mut HashMap<String, Node>,
) -> Result<CompositeBody> {
    let mut names = Vec::new();
    let mut seen = HashSet::new();
    for (src, dst) in relation {
        for name in [src, dst] {
            if seen.insert(name.clone()) {
                names.push(name.clone());
            }
        }
    }

    let mut internal: HashMap<String, Node> = HashMap::new();
    for name in &names {
        let mut node = pool
            .remove(name)
            .ok_or_else(|| Error::UnknownNode(name.clone()))?;
        if let Some(nested) = node.unbuilt_composite_relation().map(|r| r.to_vec()) {
            let body = build_composite_body(&nested, pool)?;
            node.set_composite_body(body)?;
        }
        internal.insert(name.clone(), node);
    }

    let topology = Topology::build(&seen, relation)?;
    let (entry, exit, _pairs) = wire_queues(&mut internal, &topology)?;
    let run_order = topology.run_order().to_vec();

    Ok(CompositeBody::new(internal, run_order, entry, exit))
}

/// The built, immutable graph the workers execute over.
pub(crate) struct BuiltGraph {
    pub(crate) nodes: HashMap<String, Node>,
    pub(crate) topology: Topology,
    pub(crate) input_node: String,
    pub(crate) output_node: String,
    pub(crate) pairs: Vec<Arc<BlockingQueuePair>>,
    /// Participating node names in creation order; drives default group
    /// servicing order.
    pub(crate) creation_order: Vec<String>,
    /// Groups as declared via `Session::group`, for servicing order.
    pub(crate) declared_groups: Vec<Vec<String>>,
}

impl BuiltGraph {
    pub(crate) fn node(&self, name: &str) -> Result<&Node> {
        self.nodes
            .get(name)
            .ok_or_else(|| Error::UnknownNode(name.to_string()))
    }
}

/// Plan one ordered node list per worker thread.
///
/// Serial mode collapses everything into a single worker servicing the
/// nodes in topological order. Parallel mode buckets nodes by group id;
/// within a bucket, nodes declared via `Session::group` come first in
/// declaration order, the rest follow in creation order.
pub(crate) fn plan_workers(graph: &BuiltGraph, serial: bool) -> Vec<(usize, Vec<String>)> {
    if serial {
        return vec![(0, graph.topology.run_order().to_vec())];
    }

    let mut buckets: BTreeMap<usize, Vec<(usize, String)>> = BTreeMap::new();
    for (created, name) in graph.creation_order.iter().enumerate() {
        let Some(node) = graph.nodes.get(name) else {
            continue;
        };
        let gid = node.group_id();
        let key = graph
            .declared_groups
            .get(gid)
            .and_then(|members| members.iter().position(|m| m == name))
            .unwrap_or(usize::MAX / 2 + created);
        buckets.entry(gid).or_default().push((key, name.clone()));
    }

    buckets
        .into_iter()
        .map(|(gid, mut members)| {
            members.sort_by_key(|(key, _)| *key);
            (gid, members.into_iter().map(|(_, name)| name).collect())
        })
        .collect()
}

/// Owns the worker threads, the stop flag and the teardown path for every
/// queue pair of the outer graph.
pub struct Scheduler {
    stop: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
    pairs: Vec<Arc<BlockingQueuePair>>,
    error_slot: Arc<Mutex<Option<Error>>>,
}

impl Scheduler {
    pub(crate) fn new(
        pairs: Vec<Arc<BlockingQueuePair>>,
        error_slot: Arc<Mutex<Option<Error>>>,
    ) -> Self {
        Self {
            stop: Arc::new(AtomicBool::new(false)),
            workers: Vec::new(),
            pairs,
            error_slot,
        }
    }

    /// Spawn one worker thread per planned group.
    pub(crate) fn tasks_spawn(
        &mut self,
        session_name: &str,
        graph: &Arc<BuiltGraph>,
        plan: Vec<(usize, Vec<String>)>,
        num_thread: usize,
    ) -> Result<()> {
        if plan.len() > num_thread {
            warn!(
                groups = plan.len(),
                num_thread, "more groups than the configured thread count"
            );
        }

        for (gid, names) in plan {
            debug!(group = gid, nodes = ?names, "spawning worker");
            let graph = graph.clone();
            let stop = self.stop.clone();
            let pairs = self.pairs.clone();
            let error_slot = self.error_slot.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-g{}", session_name, gid))
                .spawn(move || worker_loop(graph, names, stop, pairs, error_slot))
                .map_err(|e| Error::SpawnFailed(e.to_string()))?;
            self.workers.push(handle);
        }
        Ok(())
    }

    /// Raise the stop flag and close every queue pair so parked workers
    /// (and external feeders) wake up.
    pub(crate) fn tasks_stop(&self) {
        self.stop.store(true, Ordering::Release);
        for pair in &self.pairs {
            pair.close();
        }
    }

    /// Wait for every worker to exit.
    pub(crate) fn tasks_join(&mut self) {
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("worker thread panicked during join");
            }
        }
    }
}

fn worker_loop(
    graph: Arc<BuiltGraph>,
    names: Vec<String>,
    stop: Arc<AtomicBool>,
    pairs: Vec<Arc<BlockingQueuePair>>,
    error_slot: Arc<Mutex<Option<Error>>>,
) {
    let nodes: Vec<&Node> = names
        .iter()
        .filter_map(|name| graph.nodes.get(name))
        .collect();
    let solo = nodes.len() == 1;

    while !stop.load(Ordering::Relaxed) {
        let mut progressed = false;
        for node in &nodes {
            if stop.load(Ordering::Relaxed) {
                return;
            }
            // A worker hosting several nodes services only the ready ones
            // so a blocked neighbor cannot starve the rest of the group; a
            // solo worker just parks inside the queue wait.
            if !solo && !node.check_io_is_ready() {
                continue;
            }
            match node.run() {
                Ok(()) => progressed = true,
                Err(Error::Stopped) => return,
                Err(err) => {
                    fail(err, &error_slot, &stop, &pairs);
                    return;
                }
            }
        }
        if !solo && !progressed {
            thread::sleep(IDLE_POLL);
        }
    }
}

fn fail(
    err: Error,
    error_slot: &Arc<Mutex<Option<Error>>>,
    stop: &Arc<AtomicBool>,
    pairs: &[Arc<BlockingQueuePair>],
) {
    warn!(error = %err, "task failed, stopping the graph");
    if let Ok(mut slot) = error_slot.lock() {
        slot.get_or_insert(err);
    }
    stop.store(true, Ordering::Release);
    for pair in pairs {
        pair.close();
    }
}
