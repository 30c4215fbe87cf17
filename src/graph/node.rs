use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::queue::BlockingQueuePair;
use crate::task::Task;
use crate::tensor::{Shape, TensorView, TensorViewMut};

/// The payload variant of a node: a user task, or an encapsulated
/// sub-graph.
pub(crate) enum NodeKind {
    Normal {
        task: Box<dyn Task>,
    },
    Composite {
        relation: Vec<(String, String)>,
        body: Option<CompositeBody>,
    },
}

/// A unit of computation in the graph.
///
/// Neighbor lists and queue lists are written once during build and
/// read-only during execution; `run` needs no synchronization beyond what
/// the queue pairs provide internally.
pub struct Node {
    name: String,
    input_shapes: Vec<Shape>,
    output_shapes: Vec<Shape>,
    group_id: usize,
    input_nodes: Option<Vec<String>>,
    output_nodes: Option<Vec<String>>,
    input_queues: Vec<Arc<BlockingQueuePair>>,
    output_queues: Vec<Arc<BlockingQueuePair>>,
    kind: NodeKind,
}

impl Node {
    pub(crate) fn new_normal(
        name: &str,
        task: Box<dyn Task>,
        input_shapes: Vec<Shape>,
        output_shapes: Vec<Shape>,
        group_id: usize,
    ) -> Self {
        Self {
            name: name.to_string(),
            input_shapes,
            output_shapes,
            group_id,
            input_nodes: None,
            output_nodes: None,
            input_queues: Vec::new(),
            output_queues: Vec::new(),
            kind: NodeKind::Normal { task },
        }
    }

    pub(crate) fn new_composite(name: &str, relation: Vec<(String, String)>) -> Self {
        Self {
            name: name.to_string(),
            input_shapes: Vec::new(),
            output_shapes: Vec::new(),
            group_id: 0,
            input_nodes: None,
            output_nodes: None,
            input_queues: Vec::new(),
            output_queues: Vec::new(),
            kind: NodeKind::Composite {
                relation,
                body: None,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn input_shapes(&self) -> &[Shape] {
        &self.input_shapes
    }

    pub fn output_shapes(&self) -> &[Shape] {
        &self.output_shapes
    }

    pub fn group_id(&self) -> usize {
        self.group_id
    }

    /// Input neighbors in topology order; `None` marks the graph input
    /// boundary.
    pub fn input_nodes(&self) -> Option<&[String]> {
        self.input_nodes.as_deref()
    }

    /// Output neighbors in topology order; `None` marks the graph output
    /// boundary.
    pub fn output_nodes(&self) -> Option<&[String]> {
        self.output_nodes.as_deref()
    }

    pub fn input_queues(&self) -> &[Arc<BlockingQueuePair>] {
        &self.input_queues
    }

    pub fn output_queues(&self) -> &[Arc<BlockingQueuePair>] {
        &self.output_queues
    }

    pub(crate) fn is_composite(&self) -> bool {
        matches!(self.kind, NodeKind::Composite { .. })
    }

    /// The declared internal edges of a composite whose body has not been
    /// built yet.
    pub(crate) fn unbuilt_composite_relation(&self) -> Option<&[(String, String)]> {
        match &self.kind {
            NodeKind::Composite {
                relation,
                body: None,
            } => Some(relation),
            _ => None,
        }
    }

    /// Install a built composite body and adopt the shape contracts of its
    /// boundary nodes.
    pub(crate) fn set_composite_body(&mut self, built: CompositeBody) -> Result<()> {
        self.input_shapes = built.entry_node()?.input_shapes.clone();
        self.output_shapes = built.exit_node()?.output_shapes.clone();
        match &mut self.kind {
            NodeKind::Composite { body, .. } => {
                *body = Some(built);
                Ok(())
            }
            NodeKind::Normal { .. } => Err(Error::InvalidGraph(format!(
                "node '{}' is not composite",
                self.name
            ))),
        }
    }

    pub(crate) fn set_input_nodes(&mut self, neighbors: Option<Vec<String>>) {
        self.input_nodes = neighbors;
    }

    pub(crate) fn set_output_nodes(&mut self, neighbors: Option<Vec<String>>) {
        self.output_nodes = neighbors;
    }

    pub(crate) fn mark_group_id(&mut self, group_id: usize) {
        self.group_id = group_id;
    }

    pub(crate) fn attach_input_queue(&mut self, pair: Arc<BlockingQueuePair>) {
        self.input_queues.push(pair);
    }

    pub(crate) fn attach_output_queue(&mut self, pair: Arc<BlockingQueuePair>) {
        self.output_queues.push(pair);
    }

    /// Permute `input_queues` so that `input_queues[i].front_name` equals
    /// `input_nodes[i]`. Topology build order and queue-allocation order
    /// are independent, so the lists disagree until this pass runs.
    pub(crate) fn reorder_input_queues(&mut self) {
        if let Some(neighbors) = &self.input_nodes {
            for (ni, target) in neighbors.iter().enumerate() {
                for qi in 0..self.input_queues.len() {
                    if self.input_queues[qi].front_name() == target && ni != qi {
                        self.input_queues.swap(ni, qi);
                    }
                }
            }
        }
    }

    /// Permute `output_queues` to match `output_nodes` by `rear_name`.
    pub(crate) fn reorder_output_queues(&mut self) {
        if let Some(neighbors) = &self.output_nodes {
            for (ni, target) in neighbors.iter().enumerate() {
                for qi in 0..self.output_queues.len() {
                    if self.output_queues[qi].rear_name() == target && ni != qi {
                        self.output_queues.swap(ni, qi);
                    }
                }
            }
        }
    }

    /// True iff every input queue holds a full tensor and every output
    /// queue holds a free tensor, i.e. `run` would not block.
    pub fn check_io_is_ready(&self) -> bool {
        self.input_queues.iter().all(|q| q.has_full())
            && self.output_queues.iter().all(|q| q.has_free())
    }

    /// Execute one iteration of this node.
    ///
    /// Borrows one tensor from every input `full` queue and one from every
    /// output `free` queue, runs the payload on positional views, publishes
    /// the filled outputs and recycles the consumed inputs. Returns
    /// `Error::Stopped` when a queue was closed underneath the wait.
    pub fn run(&self) -> Result<()> {
        let mut input_tensors = Vec::with_capacity(self.input_queues.len());
        for queue in &self.input_queues {
            match queue.borrow_full() {
                Some(tensor) => input_tensors.push(tensor),
                None => return Err(Error::Stopped),
            }
        }

        let mut output_tensors = Vec::with_capacity(self.output_queues.len());
        for queue in &self.output_queues {
            match queue.borrow_free() {
                Some(tensor) => output_tensors.push(tensor),
                None => return Err(Error::Stopped),
            }
        }

        let outcome = {
            let input_views: Vec<TensorView<'_>> =
                input_tensors.iter().map(|t| t.view()).collect();
            let mut output_views: Vec<TensorViewMut<'_>> =
                output_tensors.iter_mut().map(|t| t.view_mut()).collect();
            self.execute(&input_views, &mut output_views)
        };

        match outcome {
            Ok(()) => {
                for (queue, tensor) in self.output_queues.iter().zip(output_tensors) {
                    queue.return_full(tensor);
                }
                for (queue, tensor) in self.input_queues.iter().zip(input_tensors) {
                    queue.return_free(tensor);
                }
                Ok(())
            }
            Err(err) => {
                // Keep the pools balanced even though the error is fatal to
                // the whole graph.
                for (queue, tensor) in self.output_queues.iter().zip(output_tensors) {
                    queue.return_free(tensor);
                }
                for (queue, tensor) in self.input_queues.iter().zip(input_tensors) {
                    queue.return_free(tensor);
                }
                Err(err)
            }
        }
    }

    fn execute(
        &self,
        inputs: &[TensorView<'_>],
        outputs: &mut [TensorViewMut<'_>],
    ) -> Result<()> {
        match &self.kind {
            NodeKind::Normal { task } => {
                task.compute(inputs, outputs).map_err(|e| match e {
                    Error::Stopped => Error::Stopped,
                    other => Error::TaskFailed {
                        node: self.name.clone(),
                        message: other.to_string(),
                    },
                })
            }
            NodeKind::Composite { body, .. } => match body {
                Some(body) => body.run(inputs, outputs),
                None => Err(Error::NotBuilt),
            },
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("input_shapes", &self.input_shapes)
            .field("output_shapes", &self.output_shapes)
            .field("group_id", &self.group_id)
            .field("composite", &self.is_composite())
            .finish()
    }
}

/// The built internals of a composite node: its claimed nodes, wired
/// queues, boundary node names and a topological run order.
///
/// The internal edges are scheduled by an embedded serial sub-scheduler:
/// `run` executes every internal node exactly once, in topological order,
/// inline on the calling worker thread. With the pool balanced and the
/// order respected, none of the internal queue waits can block
/// indefinitely.
pub(crate) struct CompositeBody {
    nodes: HashMap<String, Node>,
    run_order: Vec<String>,
    entry: String,
    exit: String,
}

impl CompositeBody {
    pub(crate) fn new(
        nodes: HashMap<String, Node>,
        run_order: Vec<String>,
        entry: String,
        exit: String,
    ) -> Self {
        Self {
            nodes,
            run_order,
            entry,
            exit,
        }
    }

    pub(crate) fn entry_node(&self) -> Result<&Node> {
        self.nodes
            .get(&self.entry)
            .ok_or_else(|| Error::UnknownNode(self.entry.clone()))
    }

    pub(crate) fn exit_node(&self) -> Result<&Node> {
        self.nodes
            .get(&self.exit)
            .ok_or_else(|| Error::UnknownNode(self.exit.clone()))
    }

    /// Feed the external input views into the entry node's boundary
    /// queues, run the sub-graph to completion, then drain the exit node's
    /// boundary queues into the external output views.
    fn run(&self, inputs: &[TensorView<'_>], outputs: &mut [TensorViewMut<'_>]) -> Result<()> {
        let entry = self.entry_node()?;
        for (queue, view) in entry.input_queues().iter().zip(inputs) {
            queue.enqueue(view)?;
        }

        for name in &self.run_order {
            let node = self
                .nodes
                .get(name)
                .ok_or_else(|| Error::UnknownNode(name.clone()))?;
            node.run()?;
        }

        let exit = self.exit_node()?;
        for (queue, view) in exit.output_queues().iter().zip(outputs.iter_mut()) {
            queue.dequeue(view)?;
        }
        Ok(())
    }
}
